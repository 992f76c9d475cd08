//! Completion callbacks from the playback engine.
//!
//! The engine calls [`BufferCompletion::buffer_completed`] from its own
//! thread whenever it has finished rendering a buffer. The handler recycles
//! that buffer, wakes a producer waiting on it and keeps the queued count.

use crate::error::Result;
use crate::session::Session;
use bridge_traits::playback::{BufferCompletion, BufferId};
use std::sync::{OnceLock, Weak};
use tracing::debug;

/// Engine-facing completion surface of one session.
///
/// The engine is created before the session it feeds, so the handler is
/// handed to the engine factory first and attached to its session right
/// after. Notifications arriving while it is detached, or after the session
/// is gone, are stale and ignored.
#[derive(Debug, Default)]
pub struct CompletionHandler {
    session: OnceLock<Weak<Session>>,
}

impl CompletionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, session: Weak<Session>) {
        if self.session.set(session).is_err() {
            debug!("Completion handler already attached");
        }
    }

    /// Process a completion notification.
    ///
    /// # Errors
    ///
    /// [`PlaybackError::UnknownBuffer`](crate::error::PlaybackError::UnknownBuffer)
    /// if `id` does not belong to the session's pool. The session has already
    /// been aborted and its `Failed` event emitted when this is returned.
    pub fn on_buffer_completed(&self, id: BufferId) -> Result<()> {
        let Some(session) = self.session.get().and_then(Weak::upgrade) else {
            debug!(buffer = %id, "Stale completion for a released session");
            return Ok(());
        };
        if session.is_torn_down() {
            debug!(buffer = %id, session = %session.id(), "Completion after teardown");
            return Ok(());
        }

        session.complete(id).map_err(|err| {
            session.abort(&err);
            err
        })
    }
}

impl BufferCompletion for CompletionHandler {
    fn buffer_completed(&self, id: BufferId) {
        // Failures are reported on the event bus by `on_buffer_completed`.
        let _ = self.on_buffer_completed(id);
    }
}
