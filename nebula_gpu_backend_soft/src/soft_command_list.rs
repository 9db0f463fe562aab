//! Software command list - records closures instead of GPU commands

use std::any::Any;
use std::sync::Mutex;

use nebula_gpu::error::{Error, Result};
use nebula_gpu::gpu::backend::NativeCommandList;
use nebula_gpu::gpu::resource::ResourceBarrierSet;

/// Unit of recorded work, run on the queue's execution thread
pub type SoftTask = Box<dyn FnOnce() + Send>;

pub struct SoftCommandList {
    // Interior mutability: the queue drains tasks through a shared
    // reference at submit time
    tasks: Mutex<Vec<SoftTask>>,
    open_debug_groups: usize,
    committed: bool,
}

impl SoftCommandList {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            open_debug_groups: 0,
            committed: false,
        }
    }

    /// Record a closure to run when the list executes
    pub fn record_task(&mut self, task: impl FnOnce() + Send + 'static) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(task));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn take_tasks(&self) -> Vec<SoftTask> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Default for SoftCommandList {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCommandList for SoftCommandList {
    fn reset(&mut self) -> Result<()> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.open_debug_groups = 0;
        self.committed = false;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Err(Error::BackendError {
                code: 2,
                message: "command list is already committed".to_string(),
            });
        }
        self.committed = true;
        Ok(())
    }

    fn push_debug_group(&mut self, _name: &str) {
        self.open_debug_groups += 1;
    }

    fn pop_debug_group(&mut self) {
        self.open_debug_groups = self.open_debug_groups.saturating_sub(1);
    }

    fn set_resource_barriers(&mut self, _barriers: &ResourceBarrierSet) -> Result<()> {
        // Tasks run in recorded order on one thread; no memory barriers
        // are needed in software
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
