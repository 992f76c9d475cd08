//! # Streaming Controller
//!
//! Orchestrates the path from raw stream bytes to the playback engine.
//!
//! ## Overview
//!
//! ```text
//! parse_bytes ─> PacketDecoder ─> DecoderEvent inbox
//!                                   │
//!        FormatReady ───────────────┼──> new Session (engine + BufferPool)
//!        ByteCount ─────────────────┼──> expected stream length
//!        Packets ───────────────────┴──> active Buffer ──submit──> engine
//!                                                  ^                  │
//!                                                  └── recycle <──────┘
//!                                                   CompletionHandler
//! ```
//!
//! The producer fills the active buffer until the next packet would not fit
//! (or the packet table is full), submits it, rotates to the next buffer in
//! the pool and blocks on that buffer's condition if the engine still holds
//! it. Once the decoded byte count reaches the announced stream length the
//! last partial buffer is submitted without waiting for more input.
//!
//! ## Threads
//!
//! Producers are serialised by an internal mutex. Completions arrive on the
//! engine's thread and never take that mutex. Engine calls are made without
//! holding any buffer lock or the session slot lock, so an engine that
//! completes buffers synchronously from `enqueue`, `stop` or `flush` is safe.
//! `dispose()` may be called from any thread, including while a producer is
//! blocked; the producer returns [`PlaybackError::Cancelled`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::{FixedFrameDecoder, StreamingController};
//!
//! let controller = StreamingController::builder()
//!     .decoder_factory(FixedFrameDecoder::factory(format, Some(total)))
//!     .engine_factory(my_engine_factory)
//!     .build()?;
//!
//! let mut events = controller.subscribe();
//! for chunk in network_chunks {
//!     controller.parse_bytes(&chunk, false)?;
//! }
//! ```

use crate::completion::CompletionHandler;
use crate::config::{QueueConfig, QueueState, QueueStats};
use crate::error::{PlaybackError, Result};
use crate::pool::BufferPool;
use crate::session::Session;
use bridge_traits::decoder::{DecoderEvent, DecoderFactory, PacketDecoder};
use bridge_traits::error::BridgeError;
use bridge_traits::playback::{
    EngineFactory, PacketDescription, PlaybackEngine, PlaybackSessionId, StreamFormat,
};
use core_runtime::events::{EventBus, EventStream, SessionEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

struct ProducerState {
    decoder: Option<Box<dyn PacketDecoder>>,
}

/// Streams decoded packets through a fixed pool of buffers into a
/// [`PlaybackEngine`].
pub struct StreamingController {
    config: Mutex<QueueConfig>,
    decoder_factory: Arc<dyn DecoderFactory>,
    engine_factory: Arc<dyn EngineFactory>,
    events: EventBus,

    session: RwLock<Option<Arc<Session>>>,
    producer: Mutex<ProducerState>,

    decoded_bytes: AtomicU64,
    expected_bytes: Mutex<Option<u64>>,
    failed: AtomicBool,
    disposed: AtomicBool,
}

impl StreamingController {
    pub fn builder() -> StreamingControllerBuilder {
        StreamingControllerBuilder::default()
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.stream()
    }

    pub fn state(&self) -> QueueState {
        if self.disposed.load(Ordering::Acquire) {
            return QueueState::Disposed;
        }
        match self.session.read().as_ref() {
            Some(session) if session.is_failed() => QueueState::Failed,
            Some(session) if session.is_started() => QueueState::Playing,
            Some(session) if session.is_paused() => QueueState::Paused,
            Some(_) => QueueState::Buffering,
            None if self.failed.load(Ordering::Acquire) => QueueState::Failed,
            None => QueueState::Idle,
        }
    }

    pub fn stats(&self) -> QueueStats {
        let session = self.session.read().clone();
        let config = match &session {
            Some(session) => session.config().clone(),
            None => self.config(),
        };

        QueueStats {
            session_id: session.as_ref().map(|s| s.id()),
            buffer_count: config.buffer_count,
            buffer_size: config.buffer_size,
            queued: session.as_ref().map_or(0, |s| s.queued()),
            buffers_submitted: session.as_ref().map_or(0, |s| s.buffers_submitted()),
            buffers_completed: session.as_ref().map_or(0, |s| s.buffers_completed()),
            producer_waits: session.as_ref().map_or(0, |s| s.producer_waits()),
            decoded_bytes: self.decoded_bytes(),
            expected_bytes: self.expected_bytes(),
        }
    }

    pub fn session_id(&self) -> Option<PlaybackSessionId> {
        self.session.read().as_ref().map(|s| s.id())
    }

    /// Buffers submitted to the engine and not yet completed.
    pub fn queued(&self) -> usize {
        self.session.read().as_ref().map_or(0, |s| s.queued())
    }

    pub fn decoded_bytes(&self) -> u64 {
        self.decoded_bytes.load(Ordering::Acquire)
    }

    pub fn expected_bytes(&self) -> Option<u64> {
        *self.expected_bytes.lock()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn config(&self) -> QueueConfig {
        self.config.lock().clone()
    }

    /// Replace the configuration. A running session keeps the values it was
    /// created with; the next format-ready picks these up.
    pub fn set_config(&self, config: QueueConfig) -> Result<()> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;
        debug!(?config, "Queue configuration updated");
        *self.config.lock() = config;
        Ok(())
    }

    pub fn set_buffer_size(&self, buffer_size: usize) -> Result<()> {
        let mut config = self.config();
        config.buffer_size = buffer_size;
        self.set_config(config)
    }

    pub fn set_buffer_count(&self, buffer_count: usize) -> Result<()> {
        let mut config = self.config();
        config.buffer_count = buffer_count;
        self.set_config(config)
    }

    // ========================================================================
    // Producer path
    // ========================================================================

    /// Feed the next chunk of the stream through the decoder and act on
    /// everything it reports, in order.
    ///
    /// May block while every buffer is lent to the engine.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::Decoder`] if the decoder rejects the bytes; the
    ///   session is left running
    /// - [`PlaybackError::Disposed`] after `dispose()`
    /// - [`PlaybackError::Cancelled`] if disposal released a blocked producer
    /// - any fatal error, after the session was torn down and reported
    #[instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    pub fn parse_bytes(&self, bytes: &[u8], discontinuity: bool) -> Result<()> {
        let mut producer = self.producer.lock();
        let decoder = producer.decoder.as_mut().ok_or(PlaybackError::Disposed)?;
        let events = decoder
            .parse_bytes(bytes, discontinuity)
            .map_err(PlaybackError::Decoder)?;

        for event in events {
            self.handle_decoder_event(event)?;
        }
        Ok(())
    }

    /// Write a batch of packets for hosts that run their own parser.
    ///
    /// Each description's offset is relative to `data`.
    pub fn on_packets_decoded(&self, data: &[u8], packets: &[PacketDescription]) -> Result<()> {
        let producer = self.producer.lock();
        if producer.decoder.is_none() {
            return Err(PlaybackError::Disposed);
        }
        self.write_packets(data, packets)
    }

    fn handle_decoder_event(&self, event: DecoderEvent) -> Result<()> {
        match event {
            DecoderEvent::FormatReady(format) => self.on_format_ready(format),
            DecoderEvent::CodecConfig(config) => {
                let session = self.live_session()?;
                debug!(bytes = config.len(), "Codec configuration changed");
                self.engine_call(&session, |engine| engine.set_codec_config(&config))
            }
            DecoderEvent::ByteCount(total) => {
                let previous = self.expected_bytes.lock().replace(total);
                if let Some(previous) = previous.filter(|p| *p != total) {
                    debug!(previous, total, "Stream length revised");
                } else {
                    debug!(total, "Stream length known");
                }
                self.on_byte_count(total)
            }
            DecoderEvent::Packets { data, packets } => self.write_packets(&data, &packets),
        }
    }

    /// A length announced after the packets it covers still ends the stream.
    fn on_byte_count(&self, total: u64) -> Result<()> {
        let session = match self.live_session() {
            Ok(session) => session,
            Err(PlaybackError::NoActiveSession) => return Ok(()),
            Err(err) => return Err(err),
        };

        let outcome = match self.decoded_bytes() {
            decoded if decoded > total => Err(PlaybackError::StreamLengthExceeded {
                expected: total,
                decoded,
            }),
            _ => self.flush_end_of_stream(&session),
        };
        self.fail_if_fatal(&session, outcome)
    }

    fn write_packets(&self, data: &[u8], packets: &[PacketDescription]) -> Result<()> {
        let session = self.live_session()?;
        let outcome = self.write_into(&session, data, packets);
        self.fail_if_fatal(&session, outcome)
    }

    fn fail_if_fatal(&self, session: &Session, outcome: Result<()>) -> Result<()> {
        match outcome {
            Err(err) if err.is_fatal() => {
                self.fail_session(session, &err);
                Err(err)
            }
            other => other,
        }
    }

    fn write_into(&self, session: &Session, data: &[u8], packets: &[PacketDescription]) -> Result<()> {
        let capacity = session.pool().capacity();
        let max_packets = session.config().max_packets_per_buffer;

        for packet in packets {
            let end = packet
                .offset
                .checked_add(packet.size)
                .filter(|end| *end <= data.len())
                .ok_or(PlaybackError::InvalidPacket {
                    offset: packet.offset,
                    size: packet.size,
                    available: data.len(),
                })?;
            if packet.size > capacity {
                return Err(PlaybackError::PacketTooLarge {
                    size: packet.size,
                    capacity,
                });
            }

            // Counted only once the bytes are in a buffer; producers are
            // serialised, so the load cannot go stale.
            let size = packet.size as u64;
            let decoded = self.decoded_bytes() + size;
            if let Some(expected) = self.expected_bytes() {
                if decoded > expected {
                    return Err(PlaybackError::StreamLengthExceeded { expected, decoded });
                }
            }

            let mut buffer = session.pool().current_active();
            if buffer.is_in_use() {
                buffer = session.advance()?;
            }
            if buffer.remaining() < packet.size || buffer.packet_count() >= max_packets {
                session.submit(buffer, false)?;
                buffer = session.advance()?;
            }

            buffer.append(&data[packet.offset..end], *packet)?;
            self.decoded_bytes.fetch_add(size, Ordering::AcqRel);
        }

        self.flush_end_of_stream(session)
    }

    /// Submit the final partial buffer once every announced byte is decoded.
    fn flush_end_of_stream(&self, session: &Session) -> Result<()> {
        if !self.reached_end_of_stream() {
            return Ok(());
        }
        let active = session.pool().current_active();
        if session.submit(active, false)? {
            info!(decoded = self.decoded_bytes(), "End of stream; flushed final buffer");
        }
        Ok(())
    }

    fn reached_end_of_stream(&self) -> bool {
        matches!(self.expected_bytes(), Some(expected) if expected == self.decoded_bytes())
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    #[instrument(skip(self, format), fields(codec = ?format.codec, sample_rate = format.sample_rate))]
    fn on_format_ready(&self, format: StreamFormat) -> Result<()> {
        self.release_session();

        let config = self.config();
        let session_id = PlaybackSessionId::new();
        self.decoded_bytes.store(0, Ordering::Release);
        self.failed.store(false, Ordering::Release);

        let pool = BufferPool::for_format(&config, &format)
            .map_err(|err| self.fail_setup(session_id, err))?;

        let handler = Arc::new(CompletionHandler::new());
        let engine = self
            .engine_factory
            .create(&format, handler.clone())
            .map_err(|err| self.fail_setup(session_id, PlaybackError::EngineAllocation(err)))?;

        let codec_config = format.codec_config.clone();
        let session = Arc::new(Session::new(
            session_id,
            format,
            config.clone(),
            pool,
            engine,
            self.events.clone(),
        ));
        handler.attach(Arc::downgrade(&session));

        if let Some(codec_config) = codec_config {
            if let Err(err) = session.engine().set_codec_config(&codec_config) {
                let err = PlaybackError::Engine(err);
                self.fail_session(&session, &err);
                return Err(err);
            }
        }

        // A concurrent dispose has already released the slot; publishing now
        // would leave a live engine nobody releases.
        let published = {
            let mut slot = self.session.write();
            let open = !self.disposed.load(Ordering::Acquire);
            if open {
                *slot = Some(Arc::clone(&session));
            }
            open
        };
        if !published {
            debug!(session = %session_id, "Controller disposed during setup; discarding session");
            session.teardown();
            return Err(PlaybackError::Disposed);
        }

        let format = session.format();
        info!(
            session = %session_id,
            buffers = config.buffer_count,
            buffer_size = config.buffer_size,
            "Audio output ready"
        );
        self.events
            .emit(SessionEvent::OutputReady {
                session_id,
                codec: format.codec.clone(),
                sample_rate: format.sample_rate,
                channels: format.channels,
                buffer_count: config.buffer_count,
                buffer_size: config.buffer_size,
            })
            .ok();
        Ok(())
    }

    /// Current session, or why there is none.
    fn live_session(&self) -> Result<Arc<Session>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(PlaybackError::Disposed);
        }

        let current = self.session.read().clone();
        match current {
            Some(session) if session.is_failed() => {
                // Aborted from the engine thread; detach it here.
                self.fail_session(&session, &PlaybackError::SessionFailed);
                Err(PlaybackError::SessionFailed)
            }
            Some(session) => Ok(session),
            None if self.failed.load(Ordering::Acquire) => Err(PlaybackError::SessionFailed),
            None => Err(PlaybackError::NoActiveSession),
        }
    }

    fn engine_call<T>(
        &self,
        session: &Session,
        call: impl FnOnce(&dyn PlaybackEngine) -> std::result::Result<T, BridgeError>,
    ) -> Result<T> {
        call(session.engine().as_ref()).map_err(|err| {
            let err = PlaybackError::Engine(err);
            self.fail_session(session, &err);
            err
        })
    }

    /// Report `err` once, detach the session and tear it down.
    fn fail_session(&self, session: &Session, err: &PlaybackError) {
        session.report_failure(err);
        self.failed.store(true, Ordering::Release);
        {
            let mut slot = self.session.write();
            if slot.as_ref().map_or(false, |s| s.id() == session.id()) {
                *slot = None;
            }
        }
        session.teardown();
    }

    /// Failure before a session exists; still reported once on the bus.
    fn fail_setup(&self, session_id: PlaybackSessionId, err: PlaybackError) -> PlaybackError {
        error!(session = %session_id, error = %err, "Failed to set up audio output");
        self.failed.store(true, Ordering::Release);
        self.events
            .emit(SessionEvent::Failed {
                session_id,
                message: err.to_string(),
            })
            .ok();
        err
    }

    /// Detach and tear down the current session, if any.
    fn release_session(&self) {
        let session = self.session.write().take();
        let Some(session) = session else {
            return;
        };

        let already_failed = session.is_failed();
        session.teardown();
        if !already_failed {
            info!(session = %session.id(), "Session released");
            self.events
                .emit(SessionEvent::Disposed {
                    session_id: session.id(),
                })
                .ok();
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    #[instrument(skip(self))]
    pub fn play(&self) -> Result<()> {
        let session = self.live_session()?;
        self.engine_call(&session, |engine| engine.start())?;
        session.mark_started();
        info!(session = %session.id(), "Playback started");
        self.events
            .emit(SessionEvent::Started {
                session_id: session.id(),
            })
            .ok();
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn pause(&self) -> Result<()> {
        let session = self.live_session()?;
        self.engine_call(&session, |engine| engine.pause())?;
        session.mark_paused();
        info!(session = %session.id(), "Playback paused");
        self.events
            .emit(SessionEvent::Paused {
                session_id: session.id(),
            })
            .ok();
        Ok(())
    }

    pub fn volume(&self) -> Result<f32> {
        let session = self.live_session()?;
        self.engine_call(&session, |engine| engine.volume())
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlaybackError::InvalidVolume(volume));
        }
        let session = self.live_session()?;
        self.engine_call(&session, |engine| engine.set_volume(volume))
    }

    // ========================================================================
    // Reset and teardown
    // ========================================================================

    /// Replace the decoder and forget stream accounting. The session, its
    /// engine and its buffers are left alone.
    ///
    /// Also re-arms a controller after `dispose()` or a failure.
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        let mut producer = self.producer.lock();
        if let Some(mut decoder) = producer.decoder.take() {
            decoder.close();
        }
        producer.decoder = Some(
            self.decoder_factory
                .create()
                .map_err(PlaybackError::Decoder)?,
        );

        self.decoded_bytes.store(0, Ordering::Release);
        *self.expected_bytes.lock() = None;

        let failed = {
            let mut slot = self.session.write();
            match slot.as_ref() {
                Some(session) if session.is_failed() => slot.take(),
                _ => None,
            }
        };
        if let Some(session) = failed {
            session.teardown();
        }
        self.failed.store(false, Ordering::Release);
        self.disposed.store(false, Ordering::Release);

        info!("Decoder reset");
        Ok(())
    }

    /// Stop the engine immediately and release the session. The decoder is
    /// kept; the next format-ready creates a new session.
    #[instrument(skip(self))]
    pub fn reset_output_queue(&self) {
        self.release_session();
    }

    /// Submit whatever the active buffer holds, let the engine play out
    /// everything queued, then dispose.
    #[instrument(skip(self))]
    pub fn flush_and_close(&self) -> Result<()> {
        let result = self.flush_active();
        self.dispose();
        result
    }

    fn flush_active(&self) -> Result<()> {
        let _producer = self.producer.lock();
        let session = match self.live_session() {
            Ok(session) => session,
            Err(PlaybackError::NoActiveSession) => return Ok(()),
            Err(err) => return Err(err),
        };

        let active = session.pool().current_active();
        let outcome = session
            .submit(active, true)
            .and_then(|_| session.engine().flush().map_err(PlaybackError::from));
        if let Err(err) = &outcome {
            if err.is_fatal() {
                self.fail_session(&session, err);
            } else {
                warn!(error = %err, "Flush interrupted");
            }
        }
        outcome
    }

    /// Release everything. Idempotent, callable from any thread, and run
    /// again on drop.
    #[instrument(skip(self))]
    pub fn dispose(&self) {
        let first = !self.disposed.swap(true, Ordering::AcqRel);

        // Releasing the session wakes a blocked producer, which then gives
        // up the producer lock taken below.
        self.release_session();

        let mut producer = self.producer.lock();
        if let Some(mut decoder) = producer.decoder.take() {
            decoder.close();
        }
        // Anything published before the producer saw the flag.
        self.release_session();

        if first {
            info!("Streaming controller disposed");
        }
    }
}

impl Drop for StreamingController {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for StreamingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingController")
            .field("state", &self.state())
            .field("session", &self.session_id())
            .field("decoded_bytes", &self.decoded_bytes())
            .field("expected_bytes", &self.expected_bytes())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`StreamingController`].
///
/// Both factories are required; `build()` fails fast with
/// [`PlaybackError::CapabilityMissing`] naming the one that is absent.
#[derive(Default)]
pub struct StreamingControllerBuilder {
    config: Option<QueueConfig>,
    decoder_factory: Option<Arc<dyn DecoderFactory>>,
    engine_factory: Option<Arc<dyn EngineFactory>>,
    event_bus: Option<EventBus>,
}

impl StreamingControllerBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn decoder_factory(mut self, factory: impl DecoderFactory + 'static) -> Self {
        let factory: Arc<dyn DecoderFactory> = Arc::new(factory);
        self.decoder_factory = Some(factory);
        self
    }

    pub fn engine_factory(mut self, factory: impl EngineFactory + 'static) -> Self {
        let factory: Arc<dyn EngineFactory> = Arc::new(factory);
        self.engine_factory = Some(factory);
        self
    }

    pub fn shared_engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.engine_factory = Some(factory);
        self
    }

    /// Publish on an existing bus instead of creating one.
    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.event_bus = Some(events);
        self
    }

    pub fn build(self) -> Result<StreamingController> {
        let config = self.config.unwrap_or_default();
        config.validate().map_err(PlaybackError::InvalidConfig)?;

        let decoder_factory = self.decoder_factory.ok_or_else(|| PlaybackError::CapabilityMissing {
            capability: "DecoderFactory".to_string(),
            message: "A packet decoder is required to split the byte stream into packets. \
                      Use .decoder_factory() with FixedFrameDecoder::factory() for \
                      constant-size packets or a host parser."
                .to_string(),
        })?;
        let engine_factory = self.engine_factory.ok_or_else(|| PlaybackError::CapabilityMissing {
            capability: "EngineFactory".to_string(),
            message: "A playback engine is required to render buffers. \
                      Use .engine_factory() to inject the host audio output."
                .to_string(),
        })?;

        let decoder = decoder_factory.create().map_err(PlaybackError::Decoder)?;
        let events = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(config.event_capacity));

        Ok(StreamingController {
            config: Mutex::new(config),
            decoder_factory,
            engine_factory,
            events,
            session: RwLock::new(None),
            producer: Mutex::new(ProducerState {
                decoder: Some(decoder),
            }),
            decoded_bytes: AtomicU64::new(0),
            expected_bytes: Mutex::new(None),
            failed: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }
}
