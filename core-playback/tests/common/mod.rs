//! Shared fixtures for the streaming controller tests.
//!
//! `ManualEngine` records every buffer it is lent and only reports completion
//! when a test tells it to, which makes backpressure deterministic.
#![allow(dead_code)]

use bridge_traits::decoder::DecoderFactory;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::playback::{
    BufferCompletion, BufferId, EngineBuffer, EngineFactory, PlaybackEngine, StreamFormat,
};
use core_playback::{FixedFrameDecoder, QueueConfig, StreamingController};
use core_runtime::events::{CoreEvent, EventStream, QueueEvent, SessionEvent};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// Manual engine
// ============================================================================

pub struct ManualEngine {
    completion: Arc<dyn BufferCompletion>,
    pub format: StreamFormat,
    auto_complete: bool,
    outstanding: Mutex<VecDeque<BufferId>>,
    history: Mutex<Vec<EngineBuffer>>,
    codec_configs: Mutex<Vec<Vec<u8>>>,
    volume: Mutex<f32>,
    pub starts: AtomicUsize,
    pub pauses: AtomicUsize,
    pub stops: AtomicUsize,
    pub flushes: AtomicUsize,
    pub disposed: AtomicBool,
}

impl ManualEngine {
    /// Report the oldest outstanding buffer as rendered.
    pub fn complete_next(&self) -> Option<BufferId> {
        let id = self.outstanding.lock().pop_front()?;
        self.completion.buffer_completed(id);
        Some(id)
    }

    /// Report a specific buffer as rendered, in any order.
    pub fn complete(&self, id: BufferId) {
        self.outstanding.lock().retain(|queued| *queued != id);
        self.completion.buffer_completed(id);
    }

    pub fn complete_all(&self) -> usize {
        let mut count = 0;
        while self.complete_next().is_some() {
            count += 1;
        }
        count
    }

    pub fn outstanding(&self) -> Vec<BufferId> {
        self.outstanding.lock().iter().copied().collect()
    }

    /// Every buffer ever enqueued, in submission order.
    pub fn enqueued(&self) -> Vec<EngineBuffer> {
        self.history.lock().clone()
    }

    pub fn codec_configs(&self) -> Vec<Vec<u8>> {
        self.codec_configs.lock().clone()
    }

    pub fn completion(&self) -> Arc<dyn BufferCompletion> {
        Arc::clone(&self.completion)
    }
}

impl PlaybackEngine for ManualEngine {
    fn enqueue(&self, buffer: EngineBuffer) -> BridgeResult<()> {
        let id = buffer.id;
        self.history.lock().push(buffer);
        if self.auto_complete {
            self.completion.buffer_completed(id);
        } else {
            self.outstanding.lock().push_back(id);
        }
        Ok(())
    }

    fn start(&self) -> BridgeResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> BridgeResult<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self, _immediate: bool) -> BridgeResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.outstanding.lock().clear();
        Ok(())
    }

    fn flush(&self) -> BridgeResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_codec_config(&self, config: &[u8]) -> BridgeResult<()> {
        self.codec_configs.lock().push(config.to_vec());
        Ok(())
    }

    fn volume(&self) -> BridgeResult<f32> {
        Ok(*self.volume.lock())
    }

    fn set_volume(&self, volume: f32) -> BridgeResult<()> {
        *self.volume.lock() = volume;
        Ok(())
    }

    fn dispose(&self) -> BridgeResult<()> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct ManualEngineFactory {
    auto_complete: bool,
    engines: Mutex<Vec<Arc<ManualEngine>>>,
}

impl ManualEngineFactory {
    /// Engines that complete every buffer synchronously inside `enqueue`.
    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Default::default()
        }
    }

    pub fn latest(&self) -> Arc<ManualEngine> {
        self.engines
            .lock()
            .last()
            .cloned()
            .expect("no engine created yet")
    }

    pub fn created(&self) -> usize {
        self.engines.lock().len()
    }
}

impl EngineFactory for ManualEngineFactory {
    fn create(
        &self,
        format: &StreamFormat,
        completion: Arc<dyn BufferCompletion>,
    ) -> BridgeResult<Arc<dyn PlaybackEngine>> {
        let engine = Arc::new(ManualEngine {
            completion,
            format: format.clone(),
            auto_complete: self.auto_complete,
            outstanding: Mutex::new(VecDeque::new()),
            history: Mutex::new(Vec::new()),
            codec_configs: Mutex::new(Vec::new()),
            volume: Mutex::new(1.0),
            starts: AtomicUsize::new(0),
            pauses: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        });
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

/// Holds `create` until the test opens the gate, so work can be scheduled
/// while a session is half built.
#[derive(Default)]
pub struct GatedEngineFactory {
    pub inner: ManualEngineFactory,
    entered: AtomicBool,
    open: Mutex<bool>,
    opened: Condvar,
}

impl GatedEngineFactory {
    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl EngineFactory for GatedEngineFactory {
    fn create(
        &self,
        format: &StreamFormat,
        completion: Arc<dyn BufferCompletion>,
    ) -> BridgeResult<Arc<dyn PlaybackEngine>> {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        drop(open);
        self.inner.create(format, completion)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: Arc<StreamingController>,
    pub engines: Arc<ManualEngineFactory>,
    pub events: EventStream,
}

impl Harness {
    pub fn engine(&self) -> Arc<ManualEngine> {
        self.engines.latest()
    }

    /// Events published since the last call.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        self.events.drain()
    }
}

/// 16-bit mono PCM: every packet is 2 bytes.
pub fn pcm_format() -> StreamFormat {
    StreamFormat::pcm(8_000, 1, 16)
}

pub fn config(buffer_size: usize, buffer_count: usize) -> QueueConfig {
    QueueConfig {
        buffer_size,
        buffer_count,
        buffer_wait_timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

pub fn harness(config: QueueConfig, total_bytes: Option<u64>) -> Harness {
    harness_with(
        config,
        FixedFrameDecoder::factory(pcm_format(), total_bytes),
        Arc::new(ManualEngineFactory::default()),
    )
}

pub fn harness_with(
    config: QueueConfig,
    decoder_factory: impl DecoderFactory + 'static,
    engines: Arc<ManualEngineFactory>,
) -> Harness {
    let controller = StreamingController::builder()
        .config(config)
        .decoder_factory(decoder_factory)
        .shared_engine_factory(engines.clone())
        .build()
        .expect("controller builds");
    let events = controller.subscribe();

    Harness {
        controller: Arc::new(controller),
        engines,
        events,
    }
}

/// `len` bytes counting up from `start`, so copied regions are recognisable.
pub fn ramp(start: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| start.wrapping_add(i as u8)).collect()
}

pub fn count(events: &[CoreEvent], predicate: impl Fn(&CoreEvent) -> bool) -> usize {
    events.iter().filter(|event| predicate(event)).count()
}

pub fn is_finished(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Session(SessionEvent::Finished))
}

pub fn is_failed(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Session(SessionEvent::Failed { .. }))
}

pub fn is_submitted(event: &CoreEvent) -> bool {
    matches!(event, CoreEvent::Queue(QueueEvent::BufferSubmitted { .. }))
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
