//! Command buffers handed between the gateway, the exchange and response jobs.
//!
//! A [`CommandBuffer`] is move-only: it is released by consuming it with
//! [`CommandBuffer::release`] or by dropping it, so a buffer can neither be
//! used after release nor released twice. The owning [`BufferPool`] keeps a
//! live-allocation count that tests use to prove every exit path released
//! what it allocated.

use crate::command::CommandId;
use bytes::BytesMut;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

#[derive(Debug, Default)]
struct PoolState {
    live: AtomicUsize,
    total: AtomicUsize,
    limit: Option<usize>,
}

/// Allocator for command buffers.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    state: Arc<PoolState>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool that refuses to hold more than `limit` live buffers at once.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                limit: Some(limit),
                ..PoolState::default()
            }),
        }
    }

    /// Allocate a zero-filled buffer of `len` bytes tagged with `id`.
    ///
    /// Returns `None` when the pool is exhausted.
    pub fn allocate(&self, id: CommandId, len: usize) -> Option<CommandBuffer> {
        let reserved = self
            .state
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| match self.state.limit {
                Some(limit) if live >= limit => None,
                _ => Some(live + 1),
            });
        if reserved.is_err() {
            trace!(%id, len, "Buffer pool exhausted");
            return None;
        }
        self.state.total.fetch_add(1, Ordering::Relaxed);
        Some(CommandBuffer {
            id,
            data: BytesMut::zeroed(len),
            pool: Arc::clone(&self.state),
        })
    }

    /// Buffers currently allocated and not yet released
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::Acquire)
    }

    /// Buffers ever handed out by this pool
    pub fn total_allocations(&self) -> usize {
        self.state.total.load(Ordering::Relaxed)
    }
}

/// A command or response payload owned by exactly one component at a time.
pub struct CommandBuffer {
    id: CommandId,
    data: BytesMut,
    pool: Arc<PoolState>,
}

impl CommandBuffer {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replace the contents with `payload`, resizing the buffer to fit.
    pub fn fill(&mut self, payload: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(payload);
    }

    /// Give the buffer back to its pool.
    pub fn release(self) {
        trace!(id = %self.id, len = self.data.len(), "Releasing command buffer");
        drop(self);
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        self.pool.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("id", &self.id)
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}
