//! # Streaming Controller Demo
//!
//! Streams two seconds of a synthetic 440 Hz tone through a
//! `StreamingController` into a simulated engine that renders each buffer in
//! real time on a tokio task.
//!
//! Run with: `cargo run --example playback_demo --package core-playback`

use anyhow::{Context, Result};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::log::LogLevel;
use bridge_traits::playback::{
    BufferCompletion, BufferId, EngineBuffer, PlaybackEngine, StreamFormat,
};
use core_playback::{FixedFrameDecoder, QueueConfig, StreamingController};
use core_runtime::events::{CoreEvent, QueueEvent, SessionEvent};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};

const SAMPLE_RATE: u32 = 8_000;
const CHANNELS: u16 = 1;
const TONE_HZ: f64 = 440.0;
const SECONDS: usize = 2;
const CHUNK: usize = 1_000;

// ============================================================================
// Simulated engine
// ============================================================================

/// Renders each buffer by sleeping for its duration, then reports it done.
struct SimulatedEngine {
    queue: mpsc::UnboundedSender<(BufferId, Duration)>,
    bytes_per_second: u64,
    running: Arc<AtomicBool>,
    volume: Mutex<f32>,
}

impl SimulatedEngine {
    fn spawn(
        handle: &Handle,
        format: &StreamFormat,
        completion: Arc<dyn BufferCompletion>,
    ) -> Self {
        let (queue, mut rendering) = mpsc::unbounded_channel::<(BufferId, Duration)>();
        let running = Arc::new(AtomicBool::new(false));
        let bytes_per_second = u64::from(format.sample_rate)
            * u64::from(format.bytes_per_packet.unwrap_or(1));

        let render_running = Arc::clone(&running);
        handle.spawn(async move {
            while let Some((id, duration)) = rendering.recv().await {
                while !render_running.load(Ordering::Acquire) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                tokio::time::sleep(duration).await;
                completion.buffer_completed(id);
            }
        });

        Self {
            queue,
            bytes_per_second,
            running,
            volume: Mutex::new(1.0),
        }
    }
}

impl PlaybackEngine for SimulatedEngine {
    fn enqueue(&self, buffer: EngineBuffer) -> BridgeResult<()> {
        let duration =
            Duration::from_secs_f64(buffer.len() as f64 / self.bytes_per_second as f64);
        self.queue
            .send((buffer.id, duration))
            .map_err(|_| BridgeError::OperationFailed("render task stopped".to_string()))
    }

    fn start(&self) -> BridgeResult<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> BridgeResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn stop(&self, _immediate: bool) -> BridgeResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }

    fn flush(&self) -> BridgeResult<()> {
        self.running.store(true, Ordering::Release);
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
        Ok(())
    }
}

/// Signed 16-bit little-endian mono samples of a sine tone.
fn synthesize_tone() -> Vec<u8> {
    let frames = SAMPLE_RATE as usize * SECONDS;
    (0..frames)
        .flat_map(|i| {
            let t = i as f64 / f64::from(SAMPLE_RATE);
            let sample = (2.0 * std::f64::consts::PI * TONE_HZ * t).sin() * 0.3;
            ((sample * f64::from(i16::MAX)) as i16).to_le_bytes()
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Info),
    )
    .context("logging setup")?;

    let pcm = synthesize_tone();
    let format = StreamFormat::pcm(SAMPLE_RATE, CHANNELS, 16);
    let handle = Handle::current();

    let controller = Arc::new(
        StreamingController::builder()
            .config(QueueConfig::low_latency())
            .decoder_factory(FixedFrameDecoder::factory(
                format,
                Some(pcm.len() as u64),
            ))
            .engine_factory(
                move |format: &StreamFormat,
                      completion: Arc<dyn BufferCompletion>|
                      -> BridgeResult<Arc<dyn PlaybackEngine>> {
                    Ok(Arc::new(SimulatedEngine::spawn(&handle, format, completion)))
                },
            )
            .build()
            .context("building controller")?,
    );
    let mut events = controller.subscribe();

    info!(bytes = pcm.len(), "Streaming synthetic tone");

    // The producer blocks while every buffer is queued, so it runs off the
    // async worker threads.
    let producer = {
        let controller = Arc::clone(&controller);
        tokio::task::spawn_blocking(move || -> core_playback::Result<()> {
            for chunk in pcm.chunks(CHUNK) {
                controller.parse_bytes(chunk, false)?;
            }
            Ok(())
        })
    };

    let mut waits = 0;
    loop {
        match events.recv().await {
            Ok(CoreEvent::Queue(QueueEvent::ProducerBlocked { .. })) => waits += 1,
            Ok(CoreEvent::Session(SessionEvent::Finished)) if producer.is_finished() => break,
            Ok(CoreEvent::Session(SessionEvent::Failed { message, .. })) => {
                warn!(%message, "Stream failed");
                break;
            }
            Ok(event) => info!(event = event.description(), "Event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
            Err(err) => {
                warn!(error = %err, "Event stream closed");
                break;
            }
        }
    }

    producer.await.context("producer task")??;

    let stats = controller.stats();
    info!(
        submitted = stats.buffers_submitted,
        completed = stats.buffers_completed,
        producer_waits = waits,
        "Playback finished"
    );

    controller.dispose();
    Ok(())
}
