//! Command list lifecycle state machine
//!
//! A command list is created bound to one queue and cycles through
//! Pending -> Encoding -> Committed -> Executing -> Pending once per
//! submit/complete cycle. Encoding operations are only valid in the
//! Encoding state; violating this is a programming-contract failure
//! surfaced as `Error::StateViolation`. Completion is detected on the
//! queue's waiting thread, so state is guarded by a mutex plus a
//! condition variable that `wait_until_completed` blocks on.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gpu::backend::NativeCommandList;
use crate::gpu::bindings::{ArgumentAccessMask, BindingSet};
use crate::gpu::command_queue::CommandQueue;
use crate::gpu::resource::{Resource, ResourceBarrierSet};
use crate::{gpu_bail, gpu_trace, gpu_warn};

/// Callback invoked once a command list completes GPU execution
///
/// Shared by every list in a submitted set, invoked on the queue's
/// waiting thread.
pub type CompletedCallback = Arc<dyn Fn(&CommandList) + Send + Sync>;

/// Kind of work a command list records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListType {
    /// Resource upload and copy commands
    Transfer,
    /// Rendering commands
    Render,
    /// Rendering commands recorded in parallel across threads
    ParallelRender,
}

/// Lifecycle state of a command list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// No open recording; previous execution (if any) completed
    Pending,
    /// Recording commands
    Encoding,
    /// Recording closed, ready for submission
    Committed,
    /// Submitted, GPU execution not yet complete
    Executing,
}

struct ListState {
    state: CommandListState,
    open_debug_groups: Vec<String>,
    retained_resources: Vec<Arc<Resource>>,
    binding_set: Option<Arc<BindingSet>>,
    executing_frame_index: u32,
    completed_callback: Option<CompletedCallback>,
}

pub struct CommandList {
    name: String,
    list_type: CommandListType,
    queue: Arc<CommandQueue>,
    native: Mutex<Box<dyn NativeCommandList>>,
    state: Mutex<ListState>,
    state_changed: Condvar,
}

impl CommandList {
    pub(crate) fn new(
        name: impl Into<String>,
        list_type: CommandListType,
        queue: Arc<CommandQueue>,
        native: Box<dyn NativeCommandList>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            list_type,
            queue,
            native: Mutex::new(native),
            state: Mutex::new(ListState {
                state: CommandListState::Pending,
                open_debug_groups: Vec::new(),
                retained_resources: Vec::new(),
                binding_set: None,
                executing_frame_index: 0,
                completed_callback: None,
            }),
            state_changed: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn state(&self) -> CommandListState {
        self.lock_state().state
    }

    /// Begin a new recording
    ///
    /// Valid from Pending or Committed; a list already Encoding stays as
    /// is. Clears the previous debug-group stack and releases resources
    /// retained by the previous recording. Optionally opens a debug group.
    pub fn reset(&self, debug_group: Option<&str>) -> Result<()> {
        let mut state = self.lock_state();
        match state.state {
            CommandListState::Encoding => return Ok(()),
            CommandListState::Executing => {
                return Err(self.state_violation(&state, "reset"));
            }
            CommandListState::Pending | CommandListState::Committed => {}
        }

        gpu_trace!("nebula::CommandList", "Command list '{}' RESET", self.name);
        state.open_debug_groups.clear();
        state.retained_resources.clear();
        state.binding_set = None;
        state.completed_callback = None;

        let mut native = self.native.lock().unwrap_or_else(|e| e.into_inner());
        native.reset()?;
        state.state = CommandListState::Encoding;

        if let Some(group) = debug_group {
            native.push_debug_group(group);
            state.open_debug_groups.push(group.to_string());
        }
        Ok(())
    }

    /// Open a nested debug group (Encoding only)
    pub fn push_debug_group(&self, name: &str) -> Result<()> {
        let mut state = self.lock_state();
        self.verify_encoding(&state, "push_debug_group")?;
        self.native
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_debug_group(name);
        state.open_debug_groups.push(name.to_string());
        Ok(())
    }

    /// Close the innermost debug group (Encoding only)
    pub fn pop_debug_group(&self) -> Result<()> {
        let mut state = self.lock_state();
        self.verify_encoding(&state, "pop_debug_group")?;
        if state.open_debug_groups.pop().is_none() {
            gpu_bail!(
                "nebula::CommandList",
                StateViolation,
                "{} command list '{}' has no open debug group to pop",
                self.type_name(),
                self.name
            );
        }
        self.native
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_debug_group();
        Ok(())
    }

    /// Record a set of resource transition barriers (Encoding only)
    ///
    /// An empty barrier set is a no-op.
    pub fn set_resource_barriers(&self, barriers: &ResourceBarrierSet) -> Result<()> {
        let state = self.lock_state();
        self.verify_encoding(&state, "set_resource_barriers")?;
        if barriers.is_empty() {
            return Ok(());
        }
        self.native
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_resource_barriers(barriers)
    }

    /// Bind a resource binding set (Encoding only)
    ///
    /// Computes and records the transition barriers required by bindings
    /// matching `apply_access_mask`, retains the bound resources until
    /// completion and remembers the binding set.
    pub fn set_binding_set(
        &self,
        binding_set: &Arc<BindingSet>,
        apply_access_mask: ArgumentAccessMask,
    ) -> Result<()> {
        let mut state = self.lock_state();
        self.verify_encoding(&state, "set_binding_set")?;

        let barriers = binding_set.apply_transition_barriers(apply_access_mask);
        if !barriers.is_empty() {
            self.native
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .set_resource_barriers(&barriers)?;
        }
        state
            .retained_resources
            .extend(binding_set.bound_resources());
        state.binding_set = Some(Arc::clone(binding_set));
        Ok(())
    }

    /// Binding set recorded by the current recording, if any
    pub fn binding_set(&self) -> Option<Arc<BindingSet>> {
        self.lock_state().binding_set.clone()
    }

    /// Keep a resource alive until this list's GPU execution completes
    pub fn retain_resource(&self, resource: Arc<Resource>) {
        self.lock_state().retained_resources.push(resource);
    }

    /// Number of resources retained by the current recording
    pub fn retained_resource_count(&self) -> usize {
        self.lock_state().retained_resources.len()
    }

    /// Close the recording for submission (Encoding -> Committed)
    ///
    /// Fails when the debug-group stack is unbalanced or the list is not
    /// Encoding.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.lock_state();
        if state.state != CommandListState::Encoding {
            return Err(self.state_violation(&state, "commit"));
        }
        if !state.open_debug_groups.is_empty() {
            gpu_bail!(
                "nebula::CommandList",
                StateViolation,
                "{} command list '{}' can not be committed with {} open debug group(s)",
                self.type_name(),
                self.name,
                state.open_debug_groups.len()
            );
        }
        self.native
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .commit()?;
        state.state = CommandListState::Committed;
        gpu_trace!("nebula::CommandList", "Command list '{}' COMMITTED", self.name);
        Ok(())
    }

    /// Mark the list as submitted (Committed -> Executing)
    ///
    /// Invoked by the owning queue only, never by client code.
    pub(crate) fn execute(
        &self,
        frame_index: u32,
        completed_callback: Option<CompletedCallback>,
    ) -> Result<()> {
        let mut state = self.lock_state();
        if state.state != CommandListState::Committed {
            return Err(self.state_violation(&state, "execute"));
        }
        state.state = CommandListState::Executing;
        state.executing_frame_index = frame_index;
        state.completed_callback = completed_callback;
        Ok(())
    }

    /// Mark GPU execution complete (Executing -> Pending)
    ///
    /// Invoked from the queue's completion-detection path, which runs on
    /// a dedicated waiting thread distinct from the recording thread.
    /// Releases retained resources and invokes the completion callback.
    pub(crate) fn complete(self: &Arc<Self>, frame_index: u32) -> Result<()> {
        let (retained, callback) = {
            let mut state = self.lock_state();
            if state.state != CommandListState::Executing {
                return Err(self.state_violation(&state, "complete"));
            }
            if state.executing_frame_index != frame_index {
                return Err(Error::StateViolation(format!(
                    "{} command list '{}' is executing on frame {} but was completed for frame {}",
                    self.type_name(),
                    self.name,
                    state.executing_frame_index,
                    frame_index
                )));
            }
            state.state = CommandListState::Pending;
            let retained = std::mem::take(&mut state.retained_resources);
            let callback = state.completed_callback.take();
            (retained, callback)
        };
        gpu_trace!(
            "nebula::CommandList",
            "Command list '{}' COMPLETED on frame {}",
            self.name,
            frame_index
        );

        // Retained resources are released and the callback runs outside
        // the state lock, since either may re-enter this list; waiters
        // are woken only after both are done
        drop(retained);
        if let Some(callback) = callback {
            callback(self);
        }
        self.state_changed.notify_all();
        Ok(())
    }

    /// Block the calling thread until the list leaves the Executing state
    ///
    /// A zero timeout means an infinite wait; on timeout expiry a warning
    /// is logged and the call returns with the list still executing.
    pub fn wait_until_completed(&self, timeout_ms: u32) -> Result<()> {
        let mut state = self.lock_state();
        if timeout_ms == 0 {
            while state.state == CommandListState::Executing {
                state = self
                    .state_changed
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }
        } else {
            let timeout = Duration::from_millis(u64::from(timeout_ms));
            while state.state == CommandListState::Executing {
                let (guard, result) = self
                    .state_changed
                    .wait_timeout(state, timeout)
                    .unwrap_or_else(|e| e.into_inner());
                state = guard;
                if result.timed_out() {
                    if state.state == CommandListState::Executing {
                        gpu_warn!(
                            "nebula::CommandList",
                            "Command list '{}' wait timed out after {} ms",
                            self.name,
                            timeout_ms
                        );
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    /// Run backend-specific encoding against the native list (Encoding only)
    pub fn with_native<R>(
        &self,
        encode: impl FnOnce(&mut dyn NativeCommandList) -> R,
    ) -> Result<R> {
        let state = self.lock_state();
        self.verify_encoding(&state, "with_native")?;
        let mut native = self.native.lock().unwrap_or_else(|e| e.into_inner());
        Ok(encode(native.as_mut()))
    }

    pub(crate) fn native_lock(&self) -> MutexGuard<'_, Box<dyn NativeCommandList>> {
        self.native.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn verify_encoding(&self, state: &ListState, operation: &str) -> Result<()> {
        if state.state != CommandListState::Encoding {
            gpu_bail!(
                "nebula::CommandList",
                StateViolation,
                "{} command list '{}' {} is not possible in {:?} state",
                self.type_name(),
                self.name,
                operation,
                state.state
            );
        }
        Ok(())
    }

    fn state_violation(&self, state: &ListState, operation: &str) -> Error {
        Error::StateViolation(format!(
            "{} command list '{}' {} is not possible in {:?} state",
            self.type_name(),
            self.name,
            operation,
            state.state
        ))
    }

    fn type_name(&self) -> &'static str {
        match self.list_type {
            CommandListType::Transfer => "Transfer",
            CommandListType::Render => "Render",
            CommandListType::ParallelRender => "ParallelRender",
        }
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("name", &self.name)
            .field("type", &self.list_type)
            .field("state", &self.state())
            .finish()
    }
}

/// Ordered, non-empty set of command lists submitted as one atomic unit
///
/// All lists share one queue. The set is owned exclusively by the
/// submission call until completion, after which contained lists return
/// to Pending.
pub struct CommandListSet {
    lists: Vec<Arc<CommandList>>,
    frame_index: Option<u32>,
}

impl CommandListSet {
    pub fn new(lists: Vec<Arc<CommandList>>, frame_index: Option<u32>) -> Result<Self> {
        if lists.is_empty() {
            return Err(Error::InvalidArgument(
                "command list set can not be empty".to_string(),
            ));
        }
        let queue = lists[0].queue();
        for list in &lists[1..] {
            if !Arc::ptr_eq(list.queue(), queue) {
                return Err(Error::InvalidArgument(format!(
                    "command list '{}' belongs to queue '{}', expected '{}'",
                    list.name(),
                    list.queue().name(),
                    queue.name()
                )));
            }
        }
        Ok(Self { lists, frame_index })
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn lists(&self) -> &[Arc<CommandList>] {
        &self.lists
    }

    pub fn frame_index(&self) -> Option<u32> {
        self.frame_index
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        self.lists[0].queue()
    }
}

impl std::fmt::Debug for CommandListSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandListSet")
            .field("lists", &self.lists.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "command_list_tests.rs"]
mod tests;
