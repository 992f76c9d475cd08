//! # Event Bus System
//!
//! Broadcasts streaming notifications to the owner of a controller using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`SessionEvent`] for lifecycle changes of one streaming
//!   session and [`QueueEvent`] for per-buffer traffic, wrapped in [`CoreEvent`]
//! - **EventBus**: cloneable sender handed to the controller
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │  producer    ├────────>│           ├────────────>│   owner    │
//! └──────────────┘         │ EventBus  │             └────────────┘
//! ┌──────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ engine thread├────────>│           ├────────────>│  UI / log  │
//! └──────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! Emission never blocks, so the engine's render thread can publish
//! `BufferCompleted` and `Finished` without waiting on subscribers. A bus
//! with no subscribers simply drops events.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventStream, SessionEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut lifecycle = EventStream::new(bus.subscribe())
//!     .filter(|event| matches!(event, CoreEvent::Session(_)));
//!
//! bus.emit(CoreEvent::Session(SessionEvent::Finished)).ok();
//! assert_eq!(
//!     lifecycle.recv().await.unwrap(),
//!     CoreEvent::Session(SessionEvent::Finished)
//! );
//! # }
//! ```
//!
//! ## Lagging
//!
//! A subscriber that falls more than `capacity` events behind receives
//! `RecvError::Lagged(n)` and continues with the oldest retained event.
//! Queue events are frequent; owners that only care about lifecycle should
//! filter them out or size the bus generously.

use bridge_traits::playback::{AudioCodec, BufferId, PlaybackSessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError, Receiver};

/// Default buffer size for the event bus.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Session(SessionEvent),
    Queue(QueueEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Session(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Session(SessionEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Queue(QueueEvent::ProducerBlocked { .. }) => EventSeverity::Debug,
            CoreEvent::Queue(_) => EventSeverity::Debug,
            CoreEvent::Session(_) => EventSeverity::Info,
        }
    }

    /// True for events that end a session, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoreEvent::Session(SessionEvent::Finished)
                | CoreEvent::Session(SessionEvent::Failed { .. })
                | CoreEvent::Session(SessionEvent::Disposed { .. })
        )
    }
}

impl From<SessionEvent> for CoreEvent {
    fn from(event: SessionEvent) -> Self {
        CoreEvent::Session(event)
    }
}

impl From<QueueEvent> for CoreEvent {
    fn from(event: QueueEvent) -> Self {
        CoreEvent::Queue(event)
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Session Events
// ============================================================================

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum SessionEvent {
    /// The decoder reported its format, the engine was created and the
    /// buffer pool allocated.
    OutputReady {
        session_id: PlaybackSessionId,
        codec: AudioCodec,
        sample_rate: u32,
        channels: u16,
        buffer_count: usize,
        buffer_size: usize,
    },
    /// The engine was started, either by the first submission or by `play()`.
    Started { session_id: PlaybackSessionId },
    Paused { session_id: PlaybackSessionId },
    /// Every submitted buffer has been rendered and no buffer is queued.
    ///
    /// Raised once per drain-to-zero transition. Owners typically dispose
    /// the controller, or feed more bytes, when they see it.
    Finished,
    /// The session hit a fatal condition and was torn down. Reported at most
    /// once per session.
    Failed {
        session_id: PlaybackSessionId,
        message: String,
    },
    /// The session was released by `dispose()` or `reset_output_queue()`.
    Disposed { session_id: PlaybackSessionId },
}

impl SessionEvent {
    fn description(&self) -> &str {
        match self {
            SessionEvent::OutputReady { .. } => "Audio output ready",
            SessionEvent::Started { .. } => "Playback started",
            SessionEvent::Paused { .. } => "Playback paused",
            SessionEvent::Finished => "All queued buffers rendered",
            SessionEvent::Failed { .. } => "Streaming session failed",
            SessionEvent::Disposed { .. } => "Streaming session disposed",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Per-buffer traffic between producer and engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// A buffer was lent to the engine.
    BufferSubmitted {
        buffer_id: BufferId,
        bytes: usize,
        packets: usize,
        /// Buffers outstanding after this submission.
        queued: usize,
    },
    /// The engine returned a buffer.
    BufferCompleted {
        buffer_id: BufferId,
        /// Buffers still outstanding.
        queued: usize,
    },
    /// The producer is waiting for the engine to return `buffer_id`.
    ProducerBlocked { buffer_id: BufferId },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::BufferSubmitted { .. } => "Buffer submitted to engine",
            QueueEvent::BufferCompleted { .. } => "Buffer returned by engine",
            QueueEvent::ProducerBlocked { .. } => "Producer waiting for a free buffer",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable broadcast sender for [`CoreEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every subscriber.
    ///
    /// Returns the number of receivers, or an error carrying the event back
    /// when nobody is subscribed.
    pub fn emit(&self, event: impl Into<CoreEvent>) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event.into())
    }

    /// New receiver for all future events; past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Convenience for `EventStream::new(self.subscribe())`.
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Wait for the next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if this stream fell behind by `n` events,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }

    /// Drain every matching event that is currently buffered.
    ///
    /// Lag is skipped over; the caller gets whatever was retained.
    pub fn drain(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Some(Ok(event)) => events.push(event),
                Some(Err(RecvError::Lagged(_))) => continue,
                Some(Err(RecvError::Closed)) | None => return events,
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
