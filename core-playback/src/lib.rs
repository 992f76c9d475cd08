//! # Playback & Streaming Module
//!
//! Packet-buffer streaming core: paces a compressed audio byte stream into a
//! small fixed pool of buffers that a host playback engine renders.
//!
//! ## Overview
//!
//! This module handles:
//! - Splitting the byte stream into packets through a host [`PacketDecoder`](bridge_traits::decoder::PacketDecoder)
//! - Filling, submitting and recycling playback buffers ([`buffer`], [`pool`])
//! - Producer backpressure and end-of-stream flushing ([`controller`])
//! - Engine completion callbacks ([`completion`])
//! - Lifecycle notifications on the [`EventBus`](core_runtime::events::EventBus)
//!
//! ## Example
//!
//! ```rust,ignore
//! use core_playback::{FixedFrameDecoder, QueueConfig, StreamingController};
//! use bridge_traits::playback::StreamFormat;
//!
//! let format = StreamFormat::pcm(44_100, 2, 16);
//! let controller = StreamingController::builder()
//!     .config(QueueConfig::low_latency())
//!     .decoder_factory(FixedFrameDecoder::factory(format, Some(total_bytes)))
//!     .engine_factory(host_engine_factory)
//!     .build()?;
//!
//! controller.parse_bytes(&chunk, false)?;
//! ```

pub mod buffer;
pub mod completion;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod pool;
pub mod session;

pub use buffer::Buffer;
pub use completion::CompletionHandler;
pub use config::{QueueConfig, QueueState, QueueStats};
pub use controller::{StreamingController, StreamingControllerBuilder};
pub use decoder::FixedFrameDecoder;
pub use error::{PlaybackError, Result};
pub use pool::BufferPool;
pub use session::Session;
