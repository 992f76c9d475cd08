//! Engine call contract, checked against a mocked `PlaybackEngine`.

mod common;

use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::playback::{
    BufferCompletion, EngineBuffer, PlaybackEngine, StreamFormat,
};
use common::{count, is_failed, pcm_format, ramp};
use core_playback::{FixedFrameDecoder, PlaybackError, QueueConfig, QueueState, StreamingController};
use core_runtime::events::EventStream;
use mockall::mock;
use mockall::predicate::eq;
use std::sync::Arc;

mock! {
    pub Engine {}

    impl PlaybackEngine for Engine {
        fn enqueue(&self, buffer: EngineBuffer) -> BridgeResult<()>;
        fn start(&self) -> BridgeResult<()>;
        fn pause(&self) -> BridgeResult<()>;
        fn stop(&self, immediate: bool) -> BridgeResult<()>;
        fn flush(&self) -> BridgeResult<()>;
        fn set_codec_config(&self, config: &[u8]) -> BridgeResult<()>;
        fn volume(&self) -> BridgeResult<f32>;
        fn set_volume(&self, volume: f32) -> BridgeResult<()>;
        fn dispose(&self) -> BridgeResult<()>;
    }
}

fn controller_with(engine: MockEngine, total: Option<u64>) -> (StreamingController, EventStream) {
    let engine: Arc<dyn PlaybackEngine> = Arc::new(engine);
    let controller = StreamingController::builder()
        .config(QueueConfig {
            buffer_size: 8,
            buffer_count: 4,
            ..Default::default()
        })
        .decoder_factory(FixedFrameDecoder::factory(pcm_format(), total))
        .engine_factory(
            move |_format: &StreamFormat,
                  _completion: Arc<dyn BufferCompletion>|
                  -> BridgeResult<Arc<dyn PlaybackEngine>> { Ok(Arc::clone(&engine)) },
        )
        .build()
        .unwrap();
    let events = controller.subscribe();
    (controller, events)
}

#[test]
fn test_submit_enqueues_then_starts_once() {
    let mut engine = MockEngine::new();
    let mut seq = mockall::Sequence::new();
    engine
        .expect_enqueue()
        .withf(|buffer: &EngineBuffer| buffer.len() == 8 && buffer.packets.len() == 4)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    engine
        .expect_start()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(()));
    engine
        .expect_enqueue()
        .withf(|buffer: &EngineBuffer| buffer.len() == 4)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(()));
    engine
        .expect_stop()
        .with(eq(true))
        .times(1)
        .returning(|_| Ok(()));
    engine.expect_dispose().times(1).returning(|| Ok(()));

    let (controller, _events) = controller_with(engine, Some(12));
    controller.parse_bytes(&ramp(0, 12), false).unwrap();
    assert_eq!(controller.queued(), 2);

    controller.dispose();
}

#[test]
fn test_start_failure_reported_once() {
    let mut engine = MockEngine::new();
    engine.expect_enqueue().times(1).returning(|_| Ok(()));
    engine
        .expect_start()
        .times(1)
        .returning(|| Err(BridgeError::OperationFailed("audio device lost".into())));
    engine.expect_stop().times(1).returning(|_| Ok(()));
    engine.expect_dispose().times(1).returning(|| Ok(()));

    let (controller, mut events) = controller_with(engine, None);
    let result = controller.parse_bytes(&ramp(0, 10), false);

    assert!(matches!(result, Err(PlaybackError::Engine(_))));
    assert_eq!(controller.state(), QueueState::Failed);
    assert!(matches!(controller.play(), Err(PlaybackError::SessionFailed)));
    assert_eq!(count(&events.drain(), is_failed), 1);
}

#[test]
fn test_enqueue_failure_recycles_buffer() {
    let mut engine = MockEngine::new();
    engine
        .expect_enqueue()
        .times(1)
        .returning(|_| Err(BridgeError::OperationFailed("queue full".into())));
    engine.expect_start().never();
    engine.expect_stop().times(1).returning(|_| Ok(()));
    engine.expect_dispose().times(1).returning(|| Ok(()));

    let (controller, mut events) = controller_with(engine, None);
    let result = controller.parse_bytes(&ramp(0, 10), false);

    assert!(matches!(result, Err(PlaybackError::Engine(_))));
    assert_eq!(controller.queued(), 0);
    assert_eq!(count(&events.drain(), is_failed), 1);
}

#[test]
fn test_volume_passes_through() {
    let mut engine = MockEngine::new();
    engine
        .expect_set_volume()
        .with(eq(0.5))
        .times(1)
        .returning(|_| Ok(()));
    engine.expect_volume().returning(|| Ok(0.5));
    engine.expect_stop().returning(|_| Ok(()));
    engine.expect_dispose().returning(|| Ok(()));

    let (controller, _events) = controller_with(engine, None);
    controller.parse_bytes(&[1], false).unwrap();
    controller.set_volume(0.5).unwrap();
    assert_eq!(controller.volume().unwrap(), 0.5);
}

#[test]
fn test_pause_failure_fails_session() {
    let mut engine = MockEngine::new();
    engine
        .expect_pause()
        .times(1)
        .returning(|| Err(BridgeError::NotAvailable("route changed".into())));
    engine.expect_stop().times(1).returning(|_| Ok(()));
    engine.expect_dispose().times(1).returning(|| Ok(()));

    let (controller, mut events) = controller_with(engine, None);
    controller.parse_bytes(&[1], false).unwrap();

    assert!(matches!(controller.pause(), Err(PlaybackError::Engine(_))));
    assert_eq!(controller.state(), QueueState::Failed);
    assert_eq!(count(&events.drain(), is_failed), 1);
}

#[test]
fn test_factory_error_reported_as_allocation_failure() {
    let controller = StreamingController::builder()
        .decoder_factory(FixedFrameDecoder::factory(pcm_format(), None))
        .engine_factory(
            |_format: &StreamFormat,
             _completion: Arc<dyn BufferCompletion>|
             -> BridgeResult<Arc<dyn PlaybackEngine>> {
                Err(BridgeError::NotAvailable("no output device".into()))
            },
        )
        .build()
        .unwrap();
    let mut events = controller.subscribe();

    let result = controller.parse_bytes(&[1, 2], false);
    assert!(matches!(result, Err(PlaybackError::EngineAllocation(_))));
    assert_eq!(controller.state(), QueueState::Failed);
    assert_eq!(count(&events.drain(), is_failed), 1);

    controller.reset().unwrap();
    assert_eq!(controller.state(), QueueState::Idle);
}
