//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the streaming core:
//! - Logging and tracing setup, with optional forwarding to a host sink
//! - Event bus carrying session and queue notifications to the owner
//!
//! ## Overview
//!
//! `core-playback` logs through `tracing` and reports every lifecycle change
//! (output ready, started, finished, failed) on an [`EventBus`](events::EventBus).
//! Hosts initialise logging once with [`init_logging`](logging::init_logging)
//! and subscribe to the bus they hand to the controller.

pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
