//! # Queue Configuration
//!
//! Buffer pool sizing and pacing for the streaming controller, plus the state
//! and statistics it reports.
//!
//! The configuration is read once per session, when the decoder reports its
//! format. Changing it afterwards affects the next session only.

use bridge_traits::playback::PlaybackSessionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffer pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity of each playback buffer in bytes.
    ///
    /// Every packet must fit in one buffer.
    ///
    /// Default: 2048 bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Number of buffers in the pool.
    ///
    /// The producer runs at most `buffer_count - 1` buffers ahead of the
    /// engine before it blocks.
    ///
    /// Default: 4.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,

    /// Upper bound on packet descriptions per buffer. A buffer is submitted
    /// when its table is full even if bytes remain.
    ///
    /// Default: 512.
    #[serde(default = "default_max_packets_per_buffer")]
    pub max_packets_per_buffer: usize,

    /// How long the producer waits for the engine to return a buffer before
    /// the session fails with `EngineStalled`. `None` waits forever.
    ///
    /// Default: 10 seconds.
    #[serde(default = "default_buffer_wait_timeout")]
    pub buffer_wait_timeout: Option<Duration>,

    /// Capacity of the event bus created by the builder when none is given.
    ///
    /// Default: 256 events.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            buffer_count: default_buffer_count(),
            max_packets_per_buffer: default_max_packets_per_buffer(),
            buffer_wait_timeout: default_buffer_wait_timeout(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl QueueConfig {
    /// Small buffers and a short stall timeout.
    ///
    /// Roughly 70ms of 128 kbps audio in flight.
    pub fn low_latency() -> Self {
        Self {
            buffer_size: 1024,
            buffer_count: 3,
            max_packets_per_buffer: 64,
            buffer_wait_timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        }
    }

    /// Large buffers for high-bitrate or lossless streams.
    pub fn high_quality() -> Self {
        Self {
            buffer_size: 64 * 1024,
            buffer_count: 6,
            max_packets_per_buffer: 1024,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_size == 0 {
            return Err("buffer_size must be > 0".to_string());
        }

        if self.buffer_count == 0 {
            return Err("buffer_count must be > 0".to_string());
        }

        if self.max_packets_per_buffer == 0 {
            return Err("max_packets_per_buffer must be > 0".to_string());
        }

        if self.buffer_wait_timeout == Some(Duration::ZERO) {
            return Err("buffer_wait_timeout must be > 0 or None".to_string());
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be > 0".to_string());
        }

        Ok(())
    }

    /// Total bytes the pool holds.
    pub fn pool_bytes(&self) -> usize {
        self.buffer_size * self.buffer_count
    }
}

// ============================================================================
// Default Functions (for serde)
// ============================================================================

fn default_buffer_size() -> usize {
    2048
}

fn default_buffer_count() -> usize {
    4
}

fn default_max_packets_per_buffer() -> usize {
    512
}

fn default_buffer_wait_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10))
}

fn default_event_capacity() -> usize {
    256
}

// ============================================================================
// Queue State
// ============================================================================

/// Observable state of a streaming controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueState {
    /// No session: the decoder has not reported a format yet.
    Idle,
    /// Session allocated, engine not started.
    Buffering,
    /// Engine started.
    Playing,
    Paused,
    /// The session hit a fatal error and was torn down.
    Failed,
    /// `dispose()` ran; `reset()` re-arms the controller.
    Disposed,
}

impl QueueState {
    /// Returns `true` if a session exists.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Buffering | Self::Playing | Self::Paused)
    }

    /// Returns `true` if the controller needs `reset()` before it can stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Disposed)
    }
}

/// Snapshot of controller counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub session_id: Option<PlaybackSessionId>,
    pub buffer_count: usize,
    pub buffer_size: usize,
    /// Buffers submitted and not yet completed.
    pub queued: usize,
    pub buffers_submitted: u64,
    pub buffers_completed: u64,
    /// Times the producer had to wait for a buffer.
    pub producer_waits: u64,
    /// Packet bytes decoded in the current decode run.
    pub decoded_bytes: u64,
    /// Total announced by the decoder, if any.
    pub expected_bytes: Option<u64>,
}

impl QueueStats {
    /// Fraction of the announced stream decoded so far.
    pub fn progress(&self) -> Option<f32> {
        match self.expected_bytes {
            Some(0) => Some(1.0),
            Some(expected) => Some((self.decoded_bytes as f64 / expected as f64).min(1.0) as f32),
            None => None,
        }
    }

    /// Returns `true` when every buffer is lent to the engine.
    pub fn is_saturated(&self) -> bool {
        self.buffer_count > 0 && self.queued >= self.buffer_count
    }
}
