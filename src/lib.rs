//! Workspace facade crate.
//!
//! Re-exports the workspace crates behind feature flags so host applications can
//! depend on `aqstream-workspace` alone. `playback` (default) pulls in the
//! streaming core together with the runtime it reports through.

pub use bridge_traits as bridge;

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;

#[cfg(feature = "playback")]
pub use core_playback as playback;
