//! Command queue with in-flight execution tracking
//!
//! A queue submits command list sets to the native backend and tracks
//! them in a FIFO, each associated with a value of the queue's execution
//! fence. One dedicated background waiting thread per queue blocks on the
//! front set's fence value, completes every list in that set (invoking
//! completion callbacks and releasing retained resources) and pops it.
//! Within one queue, completion order is always a prefix of submission
//! order; cross-queue ordering exists only through explicit fence waits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::gpu::backend::{NativeCommandQueue, NativeDevice};
use crate::gpu::command_list::{
    CommandList, CommandListSet, CommandListType, CompletedCallback,
};
use crate::gpu::fence::Fence;
use crate::{gpu_bail, gpu_debug, gpu_error, gpu_trace};

struct InflightEntry {
    lists: Vec<Arc<CommandList>>,
    frame_index: u32,
    fence_value: u64,
}

struct QueueTracking {
    fence: Fence,
    inflight: Mutex<VecDeque<InflightEntry>>,
    work_added: Condvar,
    stopping: AtomicBool,
    // Serializes pop-and-complete between the waiting thread and
    // complete_execution so callbacks fire strictly in submission order
    completing: Mutex<()>,
}

impl QueueTracking {
    /// Complete and pop every front entry whose fence value the GPU has
    /// already reached
    fn complete_ready(&self) {
        // Popped entries must not drop while `completing` is held: a list
        // can carry the last handle of its own queue, and releasing it
        // runs CommandQueue::drop, which re-locks `completing`
        let mut completed: Vec<InflightEntry> = Vec::new();
        {
            let _completing = self.completing.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                let entry = {
                    let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
                    match inflight.front() {
                        Some(front) if front.fence_value <= self.fence.completed_value() => {
                            inflight.pop_front().expect("front entry just observed")
                        }
                        _ => break,
                    }
                };
                // Completion runs outside the FIFO lock: callbacks may
                // submit new sets to this queue
                for list in &entry.lists {
                    if let Err(err) = list.complete(entry.frame_index) {
                        gpu_error!(
                            "nebula::CommandQueue",
                            "Failed to complete command list '{}': {}",
                            list.name(),
                            err
                        );
                    }
                }
                completed.push(entry);
            }
        }
    }
}

fn waiting_thread_main(tracking: Arc<QueueTracking>) {
    loop {
        let target_value = {
            let mut inflight = tracking.inflight.lock().unwrap_or_else(|e| e.into_inner());
            loop {
                if let Some(front) = inflight.front() {
                    break front.fence_value;
                }
                if tracking.stopping.load(Ordering::Acquire) {
                    return;
                }
                inflight = tracking
                    .work_added
                    .wait(inflight)
                    .unwrap_or_else(|e| e.into_inner());
            }
        };

        // Block on GPU completion of the front set, then drain everything ready
        if let Err(err) = tracking.fence.wait_value_on_cpu(target_value, 0) {
            gpu_error!(
                "nebula::CommandQueue",
                "Waiting thread fence wait failed: {}",
                err
            );
        }
        tracking.complete_ready();
    }
}

pub struct CommandQueue {
    name: String,
    list_type: CommandListType,
    device: Arc<dyn NativeDevice>,
    native: Arc<dyn NativeCommandQueue>,
    tracking: Arc<QueueTracking>,
    worker: Mutex<Option<JoinHandle<()>>>,
    list_counter: AtomicU32,
}

impl CommandQueue {
    /// Create a queue with its execution fence and waiting thread
    pub fn new(
        device: Arc<dyn NativeDevice>,
        list_type: CommandListType,
        name: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let native = device.create_command_queue(list_type, &name)?;
        let native_fence = device.create_fence(&native)?;
        let tracking = Arc::new(QueueTracking {
            fence: Fence::from_native(
                format!("{} Execution Fence", name),
                native_fence,
                Arc::clone(&native),
            ),
            inflight: Mutex::new(VecDeque::new()),
            work_added: Condvar::new(),
            stopping: AtomicBool::new(false),
            completing: Mutex::new(()),
        });

        let worker_tracking = Arc::clone(&tracking);
        let worker = std::thread::Builder::new()
            .name(format!("{} Waiting Thread", name))
            .spawn(move || waiting_thread_main(worker_tracking))
            .map_err(|err| {
                Error::InitializationFailed(format!(
                    "failed to start waiting thread for queue '{}': {}",
                    name, err
                ))
            })?;

        gpu_debug!("nebula::CommandQueue", "Command queue '{}' created", name);
        Ok(Arc::new(Self {
            name,
            list_type,
            device,
            native,
            tracking,
            worker: Mutex::new(Some(worker)),
            list_counter: AtomicU32::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn list_type(&self) -> CommandListType {
        self.list_type
    }

    pub(crate) fn native(&self) -> &Arc<dyn NativeCommandQueue> {
        &self.native
    }

    /// Create a command list bound to this queue
    pub fn create_command_list(self: &Arc<Self>, name: impl Into<String>) -> Result<Arc<CommandList>> {
        let mut name = name.into();
        if name.is_empty() {
            let index = self.list_counter.fetch_add(1, Ordering::Relaxed);
            name = format!("{} List {}", self.name, index);
        }
        let native = self.device.create_command_list(&self.native)?;
        Ok(CommandList::new(name, self.list_type, Arc::clone(self), native))
    }

    /// Create a fence associated with this queue
    pub fn create_fence(&self, name: impl Into<String>) -> Result<Fence> {
        let native = self.device.create_fence(&self.native)?;
        Ok(Fence::from_native(name, native, Arc::clone(&self.native)))
    }

    /// Submit a command list set for execution; returns without blocking
    ///
    /// Every list must belong to this queue and be Committed. The set's
    /// frame index (or zero) correlates the completion. The optional
    /// callback is invoked for every list once the GPU finishes the set.
    pub fn execute(
        &self,
        set: CommandListSet,
        completed_callback: Option<CompletedCallback>,
    ) -> Result<()> {
        if !std::ptr::eq(set.queue().as_ref(), self) {
            gpu_bail!(
                "nebula::CommandQueue",
                InvalidArgument,
                "command list set belongs to queue '{}', submitted to '{}'",
                set.queue().name(),
                self.name
            );
        }

        let frame_index = set.frame_index().unwrap_or(0);
        gpu_trace!(
            "nebula::CommandQueue",
            "Command queue '{}' EXECUTING {} list(s) on frame {}",
            self.name,
            set.len(),
            frame_index
        );

        for list in set.lists() {
            list.execute(frame_index, completed_callback.clone())?;
        }

        {
            // Native handles stay locked across the submit so the set goes
            // down as one atomic unit
            let guards: Vec<_> = set.lists().iter().map(|list| list.native_lock()).collect();
            let refs: Vec<&dyn crate::gpu::backend::NativeCommandList> =
                guards.iter().map(|guard| guard.as_ref()).collect();
            self.native.submit(&refs)?;
        }

        let fence_value = self.tracking.fence.signal()?;
        let mut inflight = self
            .tracking
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        inflight.push_back(InflightEntry {
            lists: set.lists().to_vec(),
            frame_index,
            fence_value,
        });
        drop(inflight);
        self.tracking.work_added.notify_one();
        Ok(())
    }

    /// Synchronously drain in-flight sets up to and including `frame_index`
    ///
    /// Drains everything when `frame_index` is `None`. Used when the
    /// caller must guarantee resources are free before reuse, e.g. frame
    /// N+k reusing frame N's buffers.
    pub fn complete_execution(&self, frame_index: Option<u32>) -> Result<()> {
        // As in complete_ready, popped entries drop only after the
        // `completing` lock is released
        let mut completed: Vec<InflightEntry> = Vec::new();
        {
            let _completing = self
                .tracking
                .completing
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            loop {
                let entry = {
                    let mut inflight = self
                        .tracking
                        .inflight
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    match inflight.front() {
                        Some(front)
                            if frame_index.map_or(true, |frame| front.frame_index <= frame) =>
                        {
                            inflight.pop_front().expect("front entry just observed")
                        }
                        _ => break,
                    }
                };
                completed.push(entry);
                let entry = completed.last().expect("entry just pushed");
                self.tracking.fence.wait_value_on_cpu(entry.fence_value, 0)?;
                for list in &entry.lists {
                    list.complete(entry.frame_index)?;
                }
            }
        }
        Ok(())
    }

    /// Number of submitted sets not yet completed
    pub fn inflight_count(&self) -> usize {
        self.tracking
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Drain remaining work, then stop and join the waiting thread
        // before native handles are released
        if let Err(err) = self.complete_execution(None) {
            gpu_error!(
                "nebula::CommandQueue",
                "Command queue '{}' failed to drain on drop: {}",
                self.name,
                err
            );
        }
        self.tracking.stopping.store(true, Ordering::Release);
        self.tracking.work_added.notify_all();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            // The last queue handle can be released from a completion
            // callback running on the waiting thread itself
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
        gpu_debug!("nebula::CommandQueue", "Command queue '{}' destroyed", self.name);
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("name", &self.name)
            .field("type", &self.list_type)
            .field("inflight", &self.inflight_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "command_queue_tests.rs"]
mod tests;
