//! # Playback Buffer
//!
//! One fixed-capacity region of packet bytes plus its packet table.
//!
//! ## Design
//!
//! - **Storage**: a `BytesMut` allocated once per session. Submission splits
//!   the filled bytes off and freezes them into the `Bytes` lent to the
//!   engine; recycling reserves the capacity again, which reclaims the same
//!   allocation once the engine has dropped its handle.
//! - **Ownership**: `in_use` is true from submission until the engine reports
//!   completion. Writes are refused while it is set.
//! - **Waiting**: each buffer has its own `Condvar`, so the producer waits on
//!   exactly the buffer it needs next and a completion wakes only that waiter.

use crate::error::{PlaybackError, Result};
use bridge_traits::playback::{BufferId, EngineBuffer, PacketDescription};
use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
struct BufferState {
    storage: BytesMut,
    packets: Vec<PacketDescription>,
    in_use: bool,
    cancelled: bool,
}

/// A playback buffer owned by a [`BufferPool`](crate::pool::BufferPool).
#[derive(Debug)]
pub struct Buffer {
    id: BufferId,
    index: usize,
    capacity: usize,
    state: Mutex<BufferState>,
    available: Condvar,
}

impl Buffer {
    pub fn new(index: usize, capacity: usize) -> Self {
        Self {
            id: BufferId::next(),
            index,
            capacity,
            state: Mutex::new(BufferState {
                storage: BytesMut::with_capacity(capacity),
                packets: Vec::new(),
                in_use: false,
                cancelled: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Position in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written since the buffer was last recycled.
    pub fn write_offset(&self) -> usize {
        self.state.lock().storage.len()
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.state.lock().storage.len()
    }

    pub fn packet_count(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn packets(&self) -> Vec<PacketDescription> {
        self.state.lock().packets.clone()
    }

    pub fn is_in_use(&self) -> bool {
        self.state.lock().in_use
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().packets.is_empty()
    }

    /// Copy one packet's bytes to the write offset and record its
    /// description relocated to that offset.
    pub fn append(&self, bytes: &[u8], description: PacketDescription) -> Result<()> {
        let mut state = self.state.lock();
        if state.cancelled {
            return Err(PlaybackError::Cancelled);
        }
        if state.in_use {
            return Err(PlaybackError::BufferInUse(self.id));
        }

        let offset = state.storage.len();
        if bytes.len() > self.capacity - offset {
            return Err(PlaybackError::PacketTooLarge {
                size: bytes.len(),
                capacity: self.capacity - offset,
            });
        }

        state.storage.extend_from_slice(bytes);
        let mut relocated = description.relocated(offset);
        relocated.size = bytes.len();
        state.packets.push(relocated);
        Ok(())
    }

    /// Mark the buffer in use and hand out its contents.
    ///
    /// Returns `None` when the buffer is already lent, or when it holds no
    /// packets and `allow_empty` is false.
    pub fn take_for_submit(&self, allow_empty: bool) -> Option<EngineBuffer> {
        let mut state = self.state.lock();
        if state.in_use || state.cancelled {
            return None;
        }
        if state.packets.is_empty() && !allow_empty {
            return None;
        }

        state.in_use = true;
        Some(EngineBuffer {
            id: self.id,
            data: state.storage.split().freeze(),
            packets: std::mem::take(&mut state.packets),
        })
    }

    /// Return the buffer to the writable state after the engine is done
    /// with it and wake the producer waiting on it.
    ///
    /// Returns `false` if the buffer was not in use.
    pub fn recycle(&self) -> bool {
        self.recycle_with(|| ()).is_some()
    }

    /// Like [`recycle`](Self::recycle), but runs `release` under the buffer
    /// lock before the buffer becomes writable. A producer woken by this
    /// call observes everything `release` did.
    ///
    /// Returns `None` without running `release` if the buffer was not in use.
    /// `release` must not touch this buffer.
    pub fn recycle_with<R>(&self, release: impl FnOnce() -> R) -> Option<R> {
        let released = {
            let mut state = self.state.lock();
            if !state.in_use {
                return None;
            }
            let released = release();
            state.in_use = false;
            state.storage.clear();
            state.storage.reserve(self.capacity);
            state.packets.clear();
            released
        };
        self.available.notify_one();
        Some(released)
    }

    /// Block until the engine returns this buffer.
    ///
    /// Spurious wakeups are absorbed by re-checking `in_use`.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::Cancelled`] when the pool was cancelled
    /// - [`PlaybackError::EngineStalled`] when `timeout` elapses first
    pub fn wait_until_free(&self, timeout: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut state = self.state.lock();

        while state.in_use && !state.cancelled {
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out()
                        && state.in_use
                        && !state.cancelled
                    {
                        return Err(PlaybackError::EngineStalled {
                            buffer: self.id,
                            waited: started.elapsed(),
                        });
                    }
                }
                None => self.available.wait(&mut state),
            }
        }

        if state.cancelled {
            return Err(PlaybackError::Cancelled);
        }
        trace!(buffer = %self.id, waited_us = started.elapsed().as_micros() as u64, "buffer free");
        Ok(())
    }

    /// Release every thread waiting on this buffer with `Cancelled`.
    pub fn cancel_waiters(&self) {
        self.state.lock().cancelled = true;
        self.available.notify_all();
    }

    /// Drop contents and ownership without waiting for the engine.
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.in_use = false;
            state.storage.clear();
            state.packets.clear();
        }
        self.available.notify_all();
    }
}
