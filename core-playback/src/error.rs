//! # Playback Error Types
//!
//! Errors raised by the streaming core, grouped by who has to act on them.

use bridge_traits::error::BridgeError;
use bridge_traits::playback::BufferId;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while streaming packets to an engine.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Fatal: the session is torn down and `SessionEvent::Failed` is emitted
    // ========================================================================
    /// The engine factory could not create an engine for the stream format.
    #[error("Failed to allocate playback engine: {0}")]
    EngineAllocation(#[source] BridgeError),

    /// The engine rejected a call.
    #[error("Playback engine error: {0}")]
    Engine(#[from] BridgeError),

    /// A single packet does not fit in one playback buffer.
    #[error("Packet of {size} bytes exceeds buffer capacity of {capacity} bytes")]
    PacketTooLarge { size: usize, capacity: usize },

    /// A packet description points outside the bytes it travelled with.
    #[error("Packet {offset}+{size} lies outside {available} decoded bytes")]
    InvalidPacket {
        offset: usize,
        size: usize,
        available: usize,
    },

    /// The engine reported completion of a buffer this session never owned.
    #[error("Engine completed unknown buffer {0}")]
    UnknownBuffer(BufferId),

    /// A write reached a buffer that is still lent to the engine.
    #[error("Buffer {0} is in use by the engine")]
    BufferInUse(BufferId),

    /// The engine did not return a buffer within the configured wait.
    #[error("Engine did not return buffer {buffer} within {waited:?}")]
    EngineStalled { buffer: BufferId, waited: Duration },

    /// The decoder produced more packet bytes than the byte count it announced.
    #[error("Decoded {decoded} bytes but the stream announced {expected}")]
    StreamLengthExceeded { expected: u64, decoded: u64 },

    // ========================================================================
    // Propagated
    // ========================================================================
    /// The decoder failed to parse input; the session is left intact.
    #[error("Decoder error: {0}")]
    Decoder(#[source] BridgeError),

    // ========================================================================
    // Caller errors
    // ========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid volume value (must be in range [0.0, 1.0]).
    #[error("Invalid volume: {0} (must be between 0.0 and 1.0)")]
    InvalidVolume(f32),

    /// The decoder has not reported a format yet, so there is no engine.
    #[error("No active playback session")]
    NoActiveSession,

    /// The controller was disposed; call `reset()` to stream again.
    #[error("Streaming controller has been disposed")]
    Disposed,

    /// A required collaborator was not supplied to the builder.
    #[error("Required capability missing: {capability}. {message}")]
    CapabilityMissing { capability: String, message: String },

    // ========================================================================
    // Control flow
    // ========================================================================
    /// A producer blocked on a buffer was released by disposal.
    #[error("Operation cancelled by disposal")]
    Cancelled,

    /// The session already failed; feed a new stream after `reset()`.
    #[error("Playback session has failed")]
    SessionFailed,
}

impl PlaybackError {
    /// Returns `true` if this error ends the current session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlaybackError::EngineAllocation(_)
                | PlaybackError::Engine(_)
                | PlaybackError::PacketTooLarge { .. }
                | PlaybackError::InvalidPacket { .. }
                | PlaybackError::UnknownBuffer(_)
                | PlaybackError::BufferInUse(_)
                | PlaybackError::EngineStalled { .. }
                | PlaybackError::StreamLengthExceeded { .. }
        )
    }

    /// Returns `true` for mistakes in how the controller was called.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::InvalidConfig(_)
                | PlaybackError::InvalidVolume(_)
                | PlaybackError::NoActiveSession
                | PlaybackError::Disposed
                | PlaybackError::CapabilityMissing { .. }
        )
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(PlaybackError::PacketTooLarge {
            size: 4096,
            capacity: 2048
        }
        .is_fatal());
        assert!(PlaybackError::UnknownBuffer(BufferId::from_raw(1)).is_fatal());
        assert!(PlaybackError::Engine(BridgeError::OperationFailed("stop".into())).is_fatal());

        assert!(!PlaybackError::Cancelled.is_fatal());
        assert!(!PlaybackError::Decoder(BridgeError::UnsupportedFormat("ogg".into())).is_fatal());
        assert!(!PlaybackError::NoActiveSession.is_fatal());
    }

    #[test]
    fn test_caller_errors() {
        assert!(PlaybackError::InvalidVolume(1.5).is_caller_error());
        assert!(PlaybackError::Disposed.is_caller_error());
        assert!(!PlaybackError::SessionFailed.is_caller_error());
    }

    #[test]
    fn test_display_messages() {
        let err = PlaybackError::EngineStalled {
            buffer: BufferId::from_raw(7),
            waited: Duration::from_secs(10),
        };
        assert_eq!(
            err.to_string(),
            "Engine did not return buffer buf#7 within 10s"
        );
    }
}
