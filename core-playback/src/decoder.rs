//! # Fixed-Frame Packet Decoder
//!
//! A [`PacketDecoder`] for streams whose packets all have the same size:
//! raw linear PCM, or CBR codecs framed without headers.
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::decoder::{DecoderEvent, PacketDecoder};
//! use bridge_traits::playback::StreamFormat;
//! use core_playback::decoder::FixedFrameDecoder;
//!
//! let format = StreamFormat::pcm(44_100, 2, 16);
//! let mut decoder = FixedFrameDecoder::new(format, Some(8)).unwrap();
//!
//! let events = decoder.parse_bytes(&[0u8; 6], false).unwrap();
//! assert!(matches!(events[0], DecoderEvent::FormatReady(_)));
//! assert_eq!(events.last().unwrap().packet_bytes(), 4);
//! ```

use bridge_traits::decoder::{DecoderEvent, DecoderFactory, PacketDecoder};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::playback::{PacketDescription, StreamFormat};
use bytes::BytesMut;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct FixedFrameDecoder {
    format: StreamFormat,
    packet_size: usize,
    total_bytes: Option<u64>,
    pending: BytesMut,
    format_reported: bool,
    closed: bool,
}

impl FixedFrameDecoder {
    /// Create a decoder for `format`, which must declare `bytes_per_packet`.
    ///
    /// `total_bytes` is announced as the stream's byte count, letting the
    /// controller flush the last partial buffer on its own.
    pub fn new(format: StreamFormat, total_bytes: Option<u64>) -> Result<Self> {
        let packet_size = match format.bytes_per_packet {
            Some(size) if size > 0 => size as usize,
            _ => {
                return Err(BridgeError::UnsupportedFormat(format!(
                    "{:?} stream without a constant packet size",
                    format.codec
                )))
            }
        };

        Ok(Self {
            format,
            packet_size,
            total_bytes,
            pending: BytesMut::with_capacity(packet_size),
            format_reported: false,
            closed: false,
        })
    }

    /// Factory producing a fresh decoder for the same stream on every reset.
    pub fn factory(format: StreamFormat, total_bytes: Option<u64>) -> impl DecoderFactory {
        move || -> Result<Box<dyn PacketDecoder>> {
            Ok(Box::new(FixedFrameDecoder::new(format.clone(), total_bytes)?))
        }
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Bytes of an incomplete packet carried over to the next call.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

impl PacketDecoder for FixedFrameDecoder {
    fn parse_bytes(&mut self, bytes: &[u8], discontinuity: bool) -> Result<Vec<DecoderEvent>> {
        if self.closed {
            return Err(BridgeError::OperationFailed("decoder is closed".to_string()));
        }

        let mut events = Vec::new();

        if discontinuity && !self.pending.is_empty() {
            debug!(dropped = self.pending.len(), "Discontinuity; dropping partial packet");
            self.pending.clear();
        }

        if bytes.is_empty() {
            return Ok(events);
        }

        if !self.format_reported {
            self.format_reported = true;
            events.push(DecoderEvent::FormatReady(self.format.clone()));
            if let Some(total) = self.total_bytes {
                events.push(DecoderEvent::ByteCount(total));
            }
        }

        self.pending.extend_from_slice(bytes);
        let count = self.pending.len() / self.packet_size;
        if count == 0 {
            return Ok(events);
        }

        let data = self.pending.split_to(count * self.packet_size).freeze();
        let packets = (0..count)
            .map(|i| {
                let packet = PacketDescription::new(i * self.packet_size, self.packet_size);
                match self.format.frames_per_packet {
                    Some(frames) => packet.with_frames(frames),
                    None => packet,
                }
            })
            .collect();

        trace!(packets = count, carried = self.pending.len(), "Framed packets");
        events.push(DecoderEvent::Packets { data, packets });
        Ok(events)
    }

    fn close(&mut self) {
        self.pending.clear();
        self.closed = true;
    }
}
