//! # Streaming Session
//!
//! State shared between the producer and the engine's completion callbacks
//! for one stream format: the buffer pool, the engine, and the counters that
//! pace them.
//!
//! A session lives from format-ready until teardown. The controller owns it
//! through an `Arc`; the [`CompletionHandler`](crate::completion::CompletionHandler)
//! only holds a `Weak`, so completions that outlive the session are dropped.

use crate::buffer::Buffer;
use crate::config::QueueConfig;
use crate::error::{PlaybackError, Result};
use crate::pool::BufferPool;
use bridge_traits::playback::{BufferId, PlaybackEngine, PlaybackSessionId, StreamFormat};
use core_runtime::events::{EventBus, QueueEvent, SessionEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct Session {
    id: PlaybackSessionId,
    format: StreamFormat,
    config: QueueConfig,
    pool: BufferPool,
    engine: Arc<dyn PlaybackEngine>,
    events: EventBus,

    queued: AtomicUsize,
    started: AtomicBool,
    paused: AtomicBool,
    failed: AtomicBool,
    torn_down: AtomicBool,

    submitted: AtomicU64,
    completed: AtomicU64,
    producer_waits: AtomicU64,
}

impl Session {
    pub(crate) fn new(
        id: PlaybackSessionId,
        format: StreamFormat,
        config: QueueConfig,
        pool: BufferPool,
        engine: Arc<dyn PlaybackEngine>,
        events: EventBus,
    ) -> Self {
        Self {
            id,
            format,
            config,
            pool,
            engine,
            events,
            queued: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            producer_waits: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> PlaybackSessionId {
        self.id
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Configuration frozen when the session was created.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn engine(&self) -> &Arc<dyn PlaybackEngine> {
        &self.engine
    }

    /// Buffers submitted and not yet completed.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub fn buffers_submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn buffers_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn producer_waits(&self) -> u64 {
        self.producer_waits.load(Ordering::Relaxed)
    }

    // ========================================================================
    // Producer side
    // ========================================================================

    /// Lend `buffer` to the engine and start the engine if needed.
    ///
    /// Returns `Ok(false)` without touching the engine when the buffer is
    /// already in use, or empty and `allow_empty` is false.
    pub(crate) fn submit(&self, buffer: &Buffer, allow_empty: bool) -> Result<bool> {
        if self.is_torn_down() {
            return Err(PlaybackError::Cancelled);
        }
        let Some(lent) = buffer.take_for_submit(allow_empty) else {
            return Ok(false);
        };

        // Counted before the engine sees the buffer: a synchronous completion
        // inside enqueue must find it queued.
        let queued = self.queued.fetch_add(1, Ordering::AcqRel) + 1;
        self.submitted.fetch_add(1, Ordering::Relaxed);

        debug!(
            buffer = %lent.id,
            bytes = lent.len(),
            packets = lent.packets.len(),
            queued,
            "Submitting buffer"
        );
        self.events
            .emit(QueueEvent::BufferSubmitted {
                buffer_id: lent.id,
                bytes: lent.len(),
                packets: lent.packets.len(),
                queued,
            })
            .ok();

        let id = lent.id;
        if let Err(err) = self.engine.enqueue(lent) {
            buffer.recycle_with(|| self.decrement_queued(id));
            return Err(err.into());
        }

        if !self.started.swap(true, Ordering::AcqRel) {
            self.engine.start()?;
            self.paused.store(false, Ordering::Release);
            info!(session = %self.id, "Engine started");
            self.events
                .emit(SessionEvent::Started {
                    session_id: self.id,
                })
                .ok();
        }

        Ok(true)
    }

    /// Rotate to the next buffer, blocking until the engine returns it if
    /// it is still lent.
    pub(crate) fn advance(&self) -> Result<&Buffer> {
        let next = self.pool.rotate();
        if !next.is_in_use() {
            return Ok(next);
        }

        self.producer_waits.fetch_add(1, Ordering::Relaxed);
        debug!(buffer = %next.id(), queued = self.queued(), "Producer waiting for buffer");
        self.events
            .emit(QueueEvent::ProducerBlocked {
                buffer_id: next.id(),
            })
            .ok();

        match next.wait_until_free(self.config.buffer_wait_timeout) {
            Ok(()) => Ok(next),
            Err(PlaybackError::Cancelled) if self.is_failed() => Err(PlaybackError::SessionFailed),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
    }

    pub(crate) fn mark_paused(&self) {
        self.started.store(false, Ordering::Release);
        self.paused.store(true, Ordering::Release);
    }

    // ========================================================================
    // Engine side
    // ========================================================================

    /// Handle the engine's report that `id` has been rendered.
    ///
    /// `queued` drops while the buffer is still held, so it never counts a
    /// buffer the producer can already write to.
    pub(crate) fn complete(&self, id: BufferId) -> Result<()> {
        let Some(buffer) = self.pool.find(id) else {
            return Err(PlaybackError::UnknownBuffer(id));
        };

        let Some(decremented) = buffer.recycle_with(|| {
            self.completed.fetch_add(1, Ordering::Relaxed);
            self.decrement_queued(id)
        }) else {
            warn!(buffer = %id, "Completion for a buffer that is not in use; ignoring");
            return Ok(());
        };
        let Some(previous) = decremented else {
            return Ok(());
        };
        let queued = previous - 1;

        debug!(buffer = %id, queued, "Buffer completed");
        self.events
            .emit(QueueEvent::BufferCompleted {
                buffer_id: id,
                queued,
            })
            .ok();

        if previous == 1 {
            info!(session = %self.id, "All queued buffers rendered");
            self.events.emit(SessionEvent::Finished).ok();
        }
        Ok(())
    }

    /// Checked decrement; returns the value before the decrement.
    fn decrement_queued(&self, id: BufferId) -> Option<usize> {
        match self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| q.checked_sub(1))
        {
            Ok(previous) => Some(previous),
            Err(_) => {
                warn!(buffer = %id, "Queued count already zero");
                None
            }
        }
    }

    // ========================================================================
    // Failure and teardown
    // ========================================================================

    /// Latch the failure and emit the session's single `Failed` event.
    ///
    /// Returns `false` if a failure was already reported.
    pub(crate) fn report_failure(&self, err: &PlaybackError) -> bool {
        if self.failed.swap(true, Ordering::AcqRel) {
            return false;
        }
        error!(session = %self.id, error = %err, "Streaming session failed");
        self.events
            .emit(SessionEvent::Failed {
                session_id: self.id,
                message: err.to_string(),
            })
            .ok();
        true
    }

    /// Report `err` and tear down. Used from the engine's callback context.
    pub(crate) fn abort(&self, err: &PlaybackError) {
        self.report_failure(err);
        self.teardown();
    }

    /// Release waiters, stop and dispose the engine, clear the pool.
    ///
    /// Idempotent. Must be called without holding any controller lock: the
    /// engine may deliver completions synchronously from `stop`.
    pub(crate) fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.pool.cancel_waiters();
        if let Err(err) = self.engine.stop(true) {
            warn!(session = %self.id, error = %err, "Engine stop failed during teardown");
        }
        self.pool.reset();
        if let Err(err) = self.engine.dispose() {
            warn!(session = %self.id, error = %err, "Engine dispose failed during teardown");
        }

        self.queued.store(0, Ordering::Release);
        self.started.store(false, Ordering::Release);
        debug!(session = %self.id, "Session torn down");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("buffers", &self.pool.len())
            .field("queued", &self.queued())
            .field("started", &self.is_started())
            .field("failed", &self.is_failed())
            .finish()
    }
}
