//! Playback engine contract and the audio types shared with it.
//!
//! The core never renders audio itself. It fills fixed-capacity buffers with
//! compressed packets and lends them to a host [`PlaybackEngine`] (AudioQueue,
//! AAudio, a cpal callback, ...). The engine renders each buffer asynchronously
//! and reports back through [`BufferCompletion`] once the buffer may be reused.

use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Supported audio codec identifiers.
///
/// Use [`AudioCodec::Other`] for codecs not explicitly listed here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Mp3,
    Aac,
    Flac,
    Vorbis,
    Opus,
    Alac,
    /// Uncompressed linear PCM.
    Pcm,
    Unknown,
    Other(String),
}

/// Stream format reported by the decoder once enough of the stream was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub codec: AudioCodec,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames in every packet, for constant-frame codecs.
    pub frames_per_packet: Option<u32>,
    /// Bytes in every packet, for constant-bit-rate layouts.
    pub bytes_per_packet: Option<u32>,
    /// Upper bound on a single packet's size, when the container declares one.
    pub max_packet_size: Option<usize>,
    /// Codec-specific configuration (magic cookie, AudioSpecificConfig, ...).
    pub codec_config: Option<Bytes>,
}

impl StreamFormat {
    pub fn new(codec: AudioCodec, sample_rate: u32, channels: u16) -> Self {
        Self {
            codec,
            sample_rate,
            channels,
            frames_per_packet: None,
            bytes_per_packet: None,
            max_packet_size: None,
            codec_config: None,
        }
    }

    /// Interleaved linear PCM where one packet is one frame.
    pub fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let bytes_per_frame = u32::from(channels) * u32::from(bits_per_sample / 8);
        Self::new(AudioCodec::Pcm, sample_rate, channels)
            .with_packet_layout(bytes_per_frame, 1)
    }

    pub fn with_packet_layout(mut self, bytes_per_packet: u32, frames_per_packet: u32) -> Self {
        self.bytes_per_packet = Some(bytes_per_packet);
        self.frames_per_packet = Some(frames_per_packet);
        self.max_packet_size = Some(bytes_per_packet as usize);
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = Some(max_packet_size);
        self
    }

    pub fn with_codec_config(mut self, config: Bytes) -> Self {
        self.codec_config = Some(config);
        self
    }
}

/// Location and size of one packet inside a byte region.
///
/// Offsets are relative to whichever region the description travels with: the
/// decoder's source bytes on the way in, the playback buffer on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescription {
    pub offset: usize,
    pub size: usize,
    /// Frames carried by this packet, for variable-frame codecs.
    pub frames: Option<u32>,
}

impl PacketDescription {
    pub fn new(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            frames: None,
        }
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = Some(frames);
        self
    }

    /// One past the last byte of the packet.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Same packet, placed at `offset` in another region.
    pub fn relocated(&self, offset: usize) -> Self {
        Self { offset, ..*self }
    }
}

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Storage identity of a playback buffer.
///
/// Identities are unique for the lifetime of the process, so a completion that
/// arrives for a buffer of an earlier session can never match a current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(u64);

impl BufferId {
    /// Allocate a fresh identity.
    pub fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Unique identifier for one streaming session (format-ready to teardown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybackSessionId(Uuid);

impl PlaybackSessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PlaybackSessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlaybackSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A filled buffer lent to the engine for rendering.
///
/// `data` holds exactly the valid bytes; every packet description is relative
/// to its start. The engine must drop `data` no later than when it reports the
/// buffer complete.
#[derive(Debug, Clone)]
pub struct EngineBuffer {
    pub id: BufferId,
    pub data: Bytes,
    pub packets: Vec<PacketDescription>,
}

impl EngineBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Callback surface the engine uses to report rendered buffers.
///
/// Called from the engine's own thread, possibly while the producer is blocked
/// waiting for exactly that buffer.
pub trait BufferCompletion: Send + Sync {
    fn buffer_completed(&self, id: BufferId);
}

/// Host audio engine rendering lent buffers asynchronously.
///
/// Implementations may invoke the session's [`BufferCompletion`] from any
/// thread, including synchronously from inside `enqueue`, `stop` or `flush`.
pub trait PlaybackEngine: Send + Sync {
    /// Queue a buffer for rendering. Must not block until it is rendered.
    fn enqueue(&self, buffer: EngineBuffer) -> Result<()>;

    /// Begin (or resume) rendering queued buffers.
    fn start(&self) -> Result<()>;

    /// Pause rendering, keeping queued buffers.
    fn pause(&self) -> Result<()>;

    /// Stop rendering. With `immediate` the engine drops queued buffers
    /// without rendering them; otherwise it stops after the queue drains.
    fn stop(&self, immediate: bool) -> Result<()>;

    /// Render everything queued so far, even if the engine was waiting for more.
    fn flush(&self) -> Result<()>;

    /// Apply codec configuration reported by the decoder.
    fn set_codec_config(&self, _config: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Output gain in `0.0..=1.0`.
    fn volume(&self) -> Result<f32>;

    fn set_volume(&self, volume: f32) -> Result<()>;

    /// Release every engine resource. No completion is delivered afterwards.
    fn dispose(&self) -> Result<()>;
}

/// Creates an engine bound to a stream format.
pub trait EngineFactory: Send + Sync {
    fn create(
        &self,
        format: &StreamFormat,
        completion: Arc<dyn BufferCompletion>,
    ) -> Result<Arc<dyn PlaybackEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(&StreamFormat, Arc<dyn BufferCompletion>) -> Result<Arc<dyn PlaybackEngine>>
        + Send
        + Sync,
{
    fn create(
        &self,
        format: &StreamFormat,
        completion: Arc<dyn BufferCompletion>,
    ) -> Result<Arc<dyn PlaybackEngine>> {
        self(format, completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_ids_are_unique() {
        let a = BufferId::next();
        let b = BufferId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(BufferId::from_raw(a.as_u64()), a);
    }

    #[test]
    fn session_id_is_unique() {
        assert_ne!(PlaybackSessionId::new(), PlaybackSessionId::new());
    }

    #[test]
    fn pcm_format_layout() {
        let format = StreamFormat::pcm(44_100, 2, 16);
        assert_eq!(format.codec, AudioCodec::Pcm);
        assert_eq!(format.bytes_per_packet, Some(4));
        assert_eq!(format.frames_per_packet, Some(1));
        assert_eq!(format.max_packet_size, Some(4));
    }

    #[test]
    fn packet_relocation_keeps_size_and_frames() {
        let packet = PacketDescription::new(100, 417).with_frames(1152);
        let moved = packet.relocated(0);

        assert_eq!(moved.offset, 0);
        assert_eq!(moved.size, 417);
        assert_eq!(moved.frames, Some(1152));
        assert_eq!(packet.end(), 517);
    }

    #[test]
    fn engine_buffer_length_tracks_data() {
        let buffer = EngineBuffer {
            id: BufferId::next(),
            data: Bytes::from_static(&[1, 2, 3]),
            packets: vec![PacketDescription::new(0, 3)],
        };
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.is_empty());
    }
}
