//! # Host Bridge Traits
//!
//! Contracts between the streaming core and the host platform.
//!
//! ## Overview
//!
//! The core stages compressed audio packets in a small pool of playback
//! buffers. Everything around that job is supplied by the host through the
//! traits in this crate:
//!
//! - [`PacketDecoder`](decoder::PacketDecoder) / [`DecoderFactory`](decoder::DecoderFactory)
//!   split raw bytes into packets and report the stream format
//! - [`PlaybackEngine`](playback::PlaybackEngine) / [`EngineFactory`](playback::EngineFactory)
//!   render lent buffers and report completion through
//!   [`BufferCompletion`](playback::BufferCompletion)
//! - [`LoggerSink`](log::LoggerSink) receives mirrored log events
//!
//! ## Error Handling
//!
//! Every contract returns [`BridgeError`](error::BridgeError). Host adapters
//! convert their platform errors (OSStatus, AAudio result codes, io errors)
//! into it with an actionable message.
//!
//! ## Thread Safety
//!
//! Engines and factories are `Send + Sync`: completions arrive on the engine's
//! render thread while the producer runs on the caller's thread. Decoders are
//! only `Send`; the core drives each decoder from one thread at a time.

pub mod decoder;
pub mod error;
pub mod log;
pub mod playback;

pub use error::BridgeError;

pub use decoder::{DecoderEvent, DecoderFactory, PacketDecoder};
pub use log::{ConsoleLogger, LogEntry, LogLevel, LoggerSink, MemoryLogger};
pub use playback::{
    AudioCodec, BufferCompletion, BufferId, EngineBuffer, EngineFactory, PacketDescription,
    PlaybackEngine, PlaybackSessionId, StreamFormat,
};
