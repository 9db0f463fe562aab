//! Context - cross-queue upload synchronization and deferred actions
//!
//! Resource uploads run on a dedicated transfer queue while dependent
//! work runs on other queues. `upload_resources` orders the two sides
//! entirely through GPU-side fence waits, never blocking the submitting
//! thread: other queues' pre-sync lists run before the upload begins, and
//! their post-sync lists wait for the upload to finish. Actions requested
//! while GPU work is in flight coalesce into one deferred action drained
//! after the next CPU wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::gpu::backend::NativeDevice;
use crate::gpu::command_list::{CommandList, CommandListSet, CommandListState, CommandListType};
use crate::gpu::command_queue::CommandQueue;
use crate::gpu::fence::Fence;
use crate::{gpu_debug, gpu_trace};

/// Role of a command list or fence inside a command kit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListPurpose {
    /// The kit's primary workload
    Main,
    /// Work other queues must finish before an upload begins
    PreUploadSync,
    /// Work on other queues that depends on an upload
    PostUploadSync,
}

/// Action requested while GPU work was in flight, applied later
///
/// Ordered by priority so repeated requests coalesce to the strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeferredAction {
    None,
    UploadResources,
    CompleteInitialization,
}

/// What a CPU-side GPU wait is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitFor {
    RenderComplete,
    ResourcesUploaded,
}

// ============================================================================
// Command kit
// ============================================================================

/// A queue bundled with lazily created command lists and fences per purpose
pub struct CommandKit {
    queue: Arc<CommandQueue>,
    lists: Mutex<FxHashMap<CommandListPurpose, Arc<CommandList>>>,
    fences: Mutex<FxHashMap<CommandListPurpose, Arc<Fence>>>,
}

impl CommandKit {
    pub fn new(queue: Arc<CommandQueue>) -> Arc<Self> {
        Arc::new(Self {
            queue,
            lists: Mutex::new(FxHashMap::default()),
            fences: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    /// Command list for the given purpose, created on first use
    pub fn list(&self, purpose: CommandListPurpose) -> Result<Arc<CommandList>> {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = lists.get(&purpose) {
            return Ok(Arc::clone(list));
        }
        let list = self
            .queue
            .create_command_list(format!("{} {:?} List", self.queue.name(), purpose))?;
        lists.insert(purpose, Arc::clone(&list));
        Ok(list)
    }

    /// State of the purpose's list, or `None` when never created
    pub fn list_state(&self, purpose: CommandListPurpose) -> Option<CommandListState> {
        self.lists
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&purpose)
            .map(|list| list.state())
    }

    /// Fence for the given purpose, created on first use
    pub fn fence(&self, purpose: CommandListPurpose) -> Result<Arc<Fence>> {
        let mut fences = self.fences.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(fence) = fences.get(&purpose) {
            return Ok(Arc::clone(fence));
        }
        let fence = Arc::new(
            self.queue
                .create_fence(format!("{} {:?} Fence", self.queue.name(), purpose))?,
        );
        fences.insert(purpose, Arc::clone(&fence));
        Ok(fence)
    }
}

// ============================================================================
// Context
// ============================================================================

/// Owner of the per-type command kits and the upload protocol
///
/// # Example
///
/// ```no_run
/// use nebula_gpu::nebula::gpu::{CommandListPurpose, Context, WaitFor};
/// use nebula_gpu_backend_soft::SoftDevice;
///
/// let context = Context::new(SoftDevice::new(), "Main Context");
///
/// // Record the upload through the transfer kit's Main list
/// let upload = context.upload_kit()?.list(CommandListPurpose::Main)?;
/// upload.reset(None)?;
/// // ... encode copies through the backend escape hatch ...
///
/// context.upload_resources()?;
/// context.wait_for_gpu(WaitFor::ResourcesUploaded)?;
/// # Ok::<(), nebula_gpu::nebula::Error>(())
/// ```
pub struct Context {
    name: String,
    device: Arc<dyn NativeDevice>,
    kits: Mutex<FxHashMap<CommandListType, Arc<CommandKit>>>,
    deferred_action: Mutex<DeferredAction>,
    completing_initialization: AtomicBool,
}

impl Context {
    pub fn new(device: Arc<dyn NativeDevice>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            device,
            kits: Mutex::new(FxHashMap::default()),
            deferred_action: Mutex::new(DeferredAction::None),
            completing_initialization: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command kit owning the default queue for a command list type,
    /// created on first use
    pub fn default_kit(&self, list_type: CommandListType) -> Result<Arc<CommandKit>> {
        let mut kits = self.kits.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(kit) = kits.get(&list_type) {
            return Ok(Arc::clone(kit));
        }
        let queue = CommandQueue::new(
            Arc::clone(&self.device),
            list_type,
            format!("{} {:?} Queue", self.name, list_type),
        )?;
        let kit = CommandKit::new(queue);
        kits.insert(list_type, Arc::clone(&kit));
        Ok(kit)
    }

    /// The transfer kit resource uploads are recorded into
    pub fn upload_kit(&self) -> Result<Arc<CommandKit>> {
        self.default_kit(CommandListType::Transfer)
    }

    /// Submit recorded uploads, ordered against other queues' sync lists
    ///
    /// Returns `false` when no upload was recorded (upload list Pending)
    /// and `true` when an upload is executing, whether it was submitted
    /// here or already in flight. The ordering {pre-sync} -> {upload} ->
    /// {post-sync} is established purely by GPU-side fence waits.
    pub fn upload_resources(&self) -> Result<bool> {
        let upload_kit = self.upload_kit()?;
        let upload_list = upload_kit.list(CommandListPurpose::Main)?;
        match upload_list.state() {
            CommandListState::Pending => return Ok(false),
            CommandListState::Executing => return Ok(true),
            CommandListState::Encoding => upload_list.commit()?,
            CommandListState::Committed => {}
        }
        gpu_trace!("nebula::Context", "Context '{}' UPLOAD resources", self.name);

        let other_kits: Vec<Arc<CommandKit>> = {
            let kits = self.kits.lock().unwrap_or_else(|e| e.into_inner());
            kits.iter()
                .filter(|(list_type, _)| **list_type != CommandListType::Transfer)
                .map(|(_, kit)| Arc::clone(kit))
                .collect()
        };

        // Pre-upload sync: the upload queue waits for every other queue's
        // recorded pre-sync work
        for kit in &other_kits {
            if !self.execute_sync_list(kit, CommandListPurpose::PreUploadSync)? {
                continue;
            }
            let fence = kit.fence(CommandListPurpose::PreUploadSync)?;
            fence.signal()?;
            fence.wait_on_gpu(upload_kit.queue())?;
        }

        // Upload execution
        let upload_set = CommandListSet::new(vec![upload_list], None)?;
        upload_kit.queue().execute(upload_set, None)?;

        // Post-upload sync: every other queue's post-sync work waits for
        // the upload just submitted
        for kit in &other_kits {
            let has_post_sync = matches!(
                kit.list_state(CommandListPurpose::PostUploadSync),
                Some(CommandListState::Encoding | CommandListState::Committed)
            );
            if !has_post_sync {
                continue;
            }
            let upload_fence = upload_kit.fence(CommandListPurpose::PostUploadSync)?;
            upload_fence.signal()?;
            upload_fence.wait_on_gpu(kit.queue())?;
            self.execute_sync_list(kit, CommandListPurpose::PostUploadSync)?;
        }
        Ok(true)
    }

    /// Commit and execute the kit's sync list when one was recorded
    ///
    /// Returns whether a list was submitted.
    fn execute_sync_list(&self, kit: &CommandKit, purpose: CommandListPurpose) -> Result<bool> {
        let list = match kit.list_state(purpose) {
            Some(CommandListState::Encoding) => {
                let list = kit.list(purpose)?;
                list.commit()?;
                list
            }
            Some(CommandListState::Committed) => kit.list(purpose)?,
            _ => return Ok(false),
        };
        let set = CommandListSet::new(vec![list], None)?;
        kit.queue().execute(set, None)?;
        Ok(true)
    }

    /// Upload pending resources and drain the deferred action
    ///
    /// Re-entrant calls (e.g. from a completion callback fired by the
    /// upload itself) are ignored.
    pub fn complete_initialization(&self) -> Result<()> {
        if self.completing_initialization.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        gpu_debug!(
            "nebula::Context",
            "Context '{}' COMPLETE initialization",
            self.name
        );
        let result = self.upload_resources();
        *self
            .deferred_action
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = DeferredAction::None;
        self.completing_initialization.store(false, Ordering::SeqCst);
        result.map(|_| ())
    }

    /// Record an action to run after the next CPU-side GPU wait
    ///
    /// Repeated requests coalesce to the highest-priority one.
    pub fn request_deferred_action(&self, action: DeferredAction) {
        let mut current = self
            .deferred_action
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *current = (*current).max(action);
    }

    pub fn deferred_action(&self) -> DeferredAction {
        *self
            .deferred_action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Block the calling thread until the GPU reaches the given point
    ///
    /// `ResourcesUploaded` flushes the upload queue's fence and keeps the
    /// deferred action pending; any other wait drains all queues and then
    /// performs the deferred action.
    pub fn wait_for_gpu(&self, wait_for: WaitFor) -> Result<()> {
        gpu_trace!(
            "nebula::Context",
            "Context '{}' WAIT for {:?}",
            self.name,
            wait_for
        );
        match wait_for {
            WaitFor::ResourcesUploaded => {
                let upload_kit = self.upload_kit()?;
                upload_kit.fence(CommandListPurpose::Main)?.flush_on_cpu()?;
            }
            WaitFor::RenderComplete => {
                let kits: Vec<Arc<CommandKit>> = {
                    let kits = self.kits.lock().unwrap_or_else(|e| e.into_inner());
                    kits.values().cloned().collect()
                };
                for kit in kits {
                    kit.queue().complete_execution(None)?;
                }
                self.perform_deferred_action()?;
            }
        }
        Ok(())
    }

    fn perform_deferred_action(&self) -> Result<()> {
        let action = {
            let mut current = self
                .deferred_action
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, DeferredAction::None)
        };
        match action {
            DeferredAction::None => Ok(()),
            DeferredAction::UploadResources => self.upload_resources().map(|_| ()),
            DeferredAction::CompleteInitialization => self.complete_initialization(),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("deferred_action", &self.deferred_action())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
