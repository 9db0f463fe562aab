//! Fence - monotonic counter-based GPU/CPU synchronization primitive
//!
//! A fence is associated with one command queue. `signal` advances the
//! counter and enqueues a native signal that fires once GPU work submitted
//! before it has completed. Waits come in two flavors: `wait_on_cpu`
//! blocks the calling thread (used sparingly, e.g. flushing an upload
//! queue) and `wait_on_gpu` inserts a device-side wait into another queue,
//! which is the primary mechanism for cross-queue ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::gpu::backend::{NativeCommandQueue, NativeFence};
use crate::gpu::command_queue::CommandQueue;
use crate::gpu_trace;

pub struct Fence {
    name: String,
    native: Arc<dyn NativeFence>,
    queue: Arc<dyn NativeCommandQueue>,
    value: AtomicU64,
}

impl Fence {
    /// Wrap a native fence bound to the given native queue
    ///
    /// Public creation goes through [`CommandQueue::create_fence`].
    pub(crate) fn from_native(
        name: impl Into<String>,
        native: Arc<dyn NativeFence>,
        queue: Arc<dyn NativeCommandQueue>,
    ) -> Self {
        Self {
            name: name.into(),
            native,
            queue,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last signaled target value; values are never reused
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Highest value the GPU has reached
    pub fn completed_value(&self) -> u64 {
        self.native.completed_value()
    }

    /// Advance the counter and enqueue the native signal
    ///
    /// Returns the new target value.
    pub fn signal(&self) -> Result<u64> {
        let value = self.value.fetch_add(1, Ordering::AcqRel) + 1;
        gpu_trace!("nebula::Fence", "Fence '{}' SIGNAL value {}", self.name, value);
        self.queue.signal_fence(self.native.as_ref(), value)?;
        Ok(value)
    }

    /// Block the calling thread until the last-signaled value is reached
    ///
    /// Returns immediately when the GPU already passed it. A zero timeout
    /// means an infinite wait.
    pub fn wait_on_cpu(&self, timeout_ms: u32) -> Result<()> {
        self.wait_value_on_cpu(self.value(), timeout_ms)
    }

    /// Block the calling thread until the given value is reached
    pub fn wait_value_on_cpu(&self, value: u64, timeout_ms: u32) -> Result<()> {
        if self.native.completed_value() >= value {
            return Ok(());
        }
        gpu_trace!(
            "nebula::Fence",
            "Fence '{}' WAIT on CPU for value {}",
            self.name,
            value
        );
        self.native.wait_on_cpu(value, timeout_ms)
    }

    /// Insert a device-side wait into `queue` for the last-signaled value
    ///
    /// Subsequent submissions on `queue` do not begin until this fence
    /// reaches that value. Does not block the calling thread.
    pub fn wait_on_gpu(&self, queue: &CommandQueue) -> Result<()> {
        let value = self.value();
        gpu_trace!(
            "nebula::Fence",
            "Fence '{}' WAIT on GPU queue '{}' for value {}",
            self.name,
            queue.name(),
            value
        );
        queue.native().wait_fence(self.native.as_ref(), value)
    }

    /// Signal and wait on the CPU in one step (full flush of the owning queue)
    pub fn flush_on_cpu(&self) -> Result<()> {
        self.signal()?;
        self.wait_on_cpu(0)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.name)
            .field("value", &self.value())
            .field("completed", &self.completed_value())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "fence_tests.rs"]
mod tests;
