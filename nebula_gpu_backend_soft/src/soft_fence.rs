//! Software fence - a condvar-guarded timeline counter

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use nebula_gpu::error::{Error, Result};
use nebula_gpu::gpu::backend::NativeFence;

/// Shared timeline the queue thread advances and waiters block on
pub struct Timeline {
    value: Mutex<u64>,
    advanced: Condvar,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(0),
            advanced: Condvar::new(),
        })
    }

    pub fn current(&self) -> u64 {
        *self.value.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advance the timeline to at least `value` and wake all waiters
    pub fn complete_to(&self, value: u64) {
        let mut current = self.value.lock().unwrap_or_else(|e| e.into_inner());
        if *current < value {
            *current = value;
            self.advanced.notify_all();
        }
    }

    /// Block until the timeline reaches `value`
    ///
    /// A zero timeout blocks indefinitely.
    pub fn wait_for(&self, value: u64, timeout_ms: u32) -> Result<()> {
        let mut current = self.value.lock().unwrap_or_else(|e| e.into_inner());
        if timeout_ms == 0 {
            while *current < value {
                current = self
                    .advanced
                    .wait(current)
                    .unwrap_or_else(|e| e.into_inner());
            }
            return Ok(());
        }
        let deadline = std::time::Instant::now() + Duration::from_millis(u64::from(timeout_ms));
        while *current < value {
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(Error::BackendError {
                    code: 1,
                    message: format!(
                        "fence wait for value {} timed out after {} ms",
                        value, timeout_ms
                    ),
                });
            }
            let (next, _) = self
                .advanced
                .wait_timeout(current, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            current = next;
        }
        Ok(())
    }
}

pub struct SoftFence {
    timeline: Arc<Timeline>,
}

impl SoftFence {
    pub fn new() -> Self {
        Self {
            timeline: Timeline::new(),
        }
    }

    pub(crate) fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }
}

impl NativeFence for SoftFence {
    fn completed_value(&self) -> u64 {
        self.timeline.current()
    }

    fn wait_on_cpu(&self, value: u64, timeout_ms: u32) -> Result<()> {
        self.timeline.wait_for(value, timeout_ms)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
