//! Fixed pool of playback buffers with strictly circular rotation.

use crate::buffer::Buffer;
use crate::config::QueueConfig;
use crate::error::{PlaybackError, Result};
use bridge_traits::playback::{BufferId, StreamFormat};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct BufferPool {
    buffers: Vec<Buffer>,
    capacity: usize,
    active: AtomicUsize,
}

impl BufferPool {
    /// Allocate `count` empty buffers of `capacity` bytes each. The active
    /// index starts at 0.
    pub fn allocate(count: usize, capacity: usize) -> Result<Self> {
        if count == 0 || capacity == 0 {
            return Err(PlaybackError::InvalidConfig(format!(
                "buffer pool needs at least one buffer of at least one byte (got {} x {})",
                count, capacity
            )));
        }

        let buffers: Vec<Buffer> = (0..count).map(|index| Buffer::new(index, capacity)).collect();
        debug!(
            count,
            capacity,
            first = %buffers[0].id(),
            "Allocated buffer pool"
        );

        Ok(Self {
            buffers,
            capacity,
            active: AtomicUsize::new(0),
        })
    }

    /// Allocate from a session's frozen configuration, refusing formats
    /// whose largest packet cannot fit in one buffer.
    pub fn for_format(config: &QueueConfig, format: &StreamFormat) -> Result<Self> {
        if let Some(max_packet) = format.max_packet_size {
            if max_packet > config.buffer_size {
                return Err(PlaybackError::PacketTooLarge {
                    size: max_packet,
                    capacity: config.buffer_size,
                });
            }
        }
        Self::allocate(config.buffer_count, config.buffer_size)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Capacity of each buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn current_active(&self) -> &Buffer {
        &self.buffers[self.active_index()]
    }

    /// Advance to the next buffer, wrapping around. Availability is not
    /// checked; the caller waits on the returned buffer if it is in use.
    pub fn rotate(&self) -> &Buffer {
        let len = self.buffers.len();
        let next = (self.active.load(Ordering::Acquire) + 1) % len;
        self.active.store(next, Ordering::Release);
        &self.buffers[next]
    }

    pub fn find(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.iter().find(|buffer| buffer.id() == id)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    pub fn in_use_count(&self) -> usize {
        self.buffers.iter().filter(|buffer| buffer.is_in_use()).count()
    }

    /// Clear every buffer and rewind to index 0.
    pub fn reset(&self) {
        for buffer in &self.buffers {
            buffer.clear();
        }
        self.active.store(0, Ordering::Release);
    }

    pub fn cancel_waiters(&self) {
        for buffer in &self.buffers {
            buffer.cancel_waiters();
        }
    }
}
