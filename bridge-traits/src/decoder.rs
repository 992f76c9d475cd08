//! Packet decoder contract.
//!
//! A decoder turns raw container bytes into packets without decompressing
//! them (AudioFileStream, an ADTS/MPEG frame parser, an Ogg page reader).
//! Instead of calling back into the core, [`PacketDecoder::parse_bytes`]
//! returns the events it produced, in order, so the producer thread handles
//! them as a single ordered inbox.

use crate::error::Result;
use crate::playback::{PacketDescription, StreamFormat};
use bytes::Bytes;

/// Everything a decoder can report while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// The stream format is known; playback resources can be created.
    FormatReady(StreamFormat),
    /// Codec configuration changed mid-stream.
    CodecConfig(Bytes),
    /// Total audio byte count of the stream, reported once known.
    ByteCount(u64),
    /// A batch of packets. Each description's offset is relative to `data`.
    Packets {
        data: Bytes,
        packets: Vec<PacketDescription>,
    },
}

impl DecoderEvent {
    /// Sum of packet sizes for a [`DecoderEvent::Packets`] batch, 0 otherwise.
    pub fn packet_bytes(&self) -> u64 {
        match self {
            DecoderEvent::Packets { packets, .. } => {
                packets.iter().map(|p| p.size as u64).sum()
            }
            _ => 0,
        }
    }
}

/// Parses a compressed byte stream into packets.
pub trait PacketDecoder: Send {
    /// Feed the next chunk of the byte stream.
    ///
    /// `discontinuity` marks a non-contiguous restart point (seek, reconnect);
    /// the decoder must discard any partial packet it was holding.
    fn parse_bytes(&mut self, bytes: &[u8], discontinuity: bool) -> Result<Vec<DecoderEvent>>;

    /// Release parser resources. Further calls to `parse_bytes` are not expected.
    fn close(&mut self) {}
}

/// Creates decoders; called again on every decoder reset.
pub trait DecoderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn PacketDecoder>>;
}

impl<F> DecoderFactory for F
where
    F: Fn() -> Result<Box<dyn PacketDecoder>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn PacketDecoder>> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_bytes_sums_batch() {
        let event = DecoderEvent::Packets {
            data: Bytes::from_static(&[0; 10]),
            packets: vec![PacketDescription::new(0, 4), PacketDescription::new(4, 6)],
        };
        assert_eq!(event.packet_bytes(), 10);
        assert_eq!(DecoderEvent::ByteCount(99).packet_bytes(), 0);
    }
}
