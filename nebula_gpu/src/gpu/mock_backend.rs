//! Mock backend - records native calls for unit tests
//!
//! Every native object shares one operation log so tests can assert the
//! exact call sequence the core drove. Mock fences complete immediately
//! when signaled, so CPU waits never block.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gpu::backend::{
    NativeCommandList, NativeCommandQueue, NativeDescriptorStore, NativeDevice, NativeFence,
};
use crate::gpu::command_list::CommandListType;
use crate::gpu::descriptor_heap::DescriptorHeapSettings;
use crate::gpu::resource::{Resource, ResourceBarrierSet};

pub type OperationLog = Arc<Mutex<Vec<String>>>;

fn push_op(log: &OperationLog, op: String) {
    log.lock().unwrap_or_else(|e| e.into_inner()).push(op);
}

// ============================================================================
// Device
// ============================================================================

pub type SlotContents = Arc<Mutex<Vec<Option<String>>>>;

pub struct MockDevice {
    ops: OperationLog,
    stores: Mutex<Vec<SlotContents>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            stores: Mutex::new(Vec::new()),
        })
    }

    /// Slot contents of the n-th descriptor store created on this device
    pub fn store_slots(&self, index: usize) -> SlotContents {
        Arc::clone(&self.stores.lock().unwrap_or_else(|e| e.into_inner())[index])
    }

    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_operations(&self) {
        self.ops.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn operation_log(&self) -> OperationLog {
        Arc::clone(&self.ops)
    }
}

impl NativeDevice for MockDevice {
    fn create_command_queue(
        &self,
        list_type: CommandListType,
        name: &str,
    ) -> Result<Arc<dyn NativeCommandQueue>> {
        push_op(&self.ops, format!("create_queue({:?}, {})", list_type, name));
        Ok(Arc::new(MockQueue {
            name: name.to_string(),
            ops: Arc::clone(&self.ops),
        }))
    }

    fn create_command_list(
        &self,
        _queue: &Arc<dyn NativeCommandQueue>,
    ) -> Result<Box<dyn NativeCommandList>> {
        push_op(&self.ops, "create_command_list".to_string());
        Ok(Box::new(MockCommandList {
            ops: Arc::clone(&self.ops),
            committed: false,
        }))
    }

    fn create_fence(&self, _queue: &Arc<dyn NativeCommandQueue>) -> Result<Arc<dyn NativeFence>> {
        push_op(&self.ops, "create_fence".to_string());
        Ok(Arc::new(MockFence::new()))
    }

    fn create_descriptor_store(
        &self,
        settings: &DescriptorHeapSettings,
    ) -> Result<Box<dyn NativeDescriptorStore>> {
        push_op(
            &self.ops,
            format!("create_descriptor_store({:?})", settings.heap_type),
        );
        let slots: SlotContents = Arc::new(Mutex::new(Vec::new()));
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&slots));
        Ok(Box::new(MockDescriptorStore {
            ops: Arc::clone(&self.ops),
            slots,
            shader_visible: settings.shader_visible,
        }))
    }
}

// ============================================================================
// Queue
// ============================================================================

pub struct MockQueue {
    name: String,
    ops: OperationLog,
}

impl NativeCommandQueue for MockQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, lists: &[&dyn NativeCommandList]) -> Result<()> {
        push_op(&self.ops, format!("{}: submit({})", self.name, lists.len()));
        Ok(())
    }

    fn signal_fence(&self, fence: &dyn NativeFence, value: u64) -> Result<()> {
        push_op(&self.ops, format!("{}: signal_fence({})", self.name, value));
        let mock = fence
            .as_any()
            .downcast_ref::<MockFence>()
            .ok_or_else(|| Error::InvalidArgument("fence is not a mock fence".to_string()))?;
        mock.complete(value);
        Ok(())
    }

    fn wait_fence(&self, _fence: &dyn NativeFence, value: u64) -> Result<()> {
        push_op(&self.ops, format!("{}: wait_fence({})", self.name, value));
        Ok(())
    }
}

// ============================================================================
// Command list
// ============================================================================

pub struct MockCommandList {
    ops: OperationLog,
    committed: bool,
}

impl MockCommandList {
    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

impl NativeCommandList for MockCommandList {
    fn reset(&mut self) -> Result<()> {
        push_op(&self.ops, "list: reset".to_string());
        self.committed = false;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        push_op(&self.ops, "list: commit".to_string());
        self.committed = true;
        Ok(())
    }

    fn push_debug_group(&mut self, name: &str) {
        push_op(&self.ops, format!("list: push_debug_group({})", name));
    }

    fn pop_debug_group(&mut self) {
        push_op(&self.ops, "list: pop_debug_group".to_string());
    }

    fn set_resource_barriers(&mut self, barriers: &ResourceBarrierSet) -> Result<()> {
        let described: Vec<String> = barriers.iter().map(|b| b.to_string()).collect();
        push_op(
            &self.ops,
            format!("list: barriers[{}]", described.join(", ")),
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Fence
// ============================================================================

pub struct MockFence {
    completed: AtomicU64,
    signal: Mutex<()>,
    signaled: Condvar,
}

impl MockFence {
    pub fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            signal: Mutex::new(()),
            signaled: Condvar::new(),
        }
    }

    pub fn complete(&self, value: u64) {
        let _guard = self.signal.lock().unwrap_or_else(|e| e.into_inner());
        self.completed.fetch_max(value, Ordering::SeqCst);
        self.signaled.notify_all();
    }
}

impl NativeFence for MockFence {
    fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn wait_on_cpu(&self, value: u64, timeout_ms: u32) -> Result<()> {
        let mut guard = self.signal.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.completed.load(Ordering::SeqCst) >= value {
                return Ok(());
            }
            if timeout_ms == 0 {
                guard = self
                    .signaled
                    .wait(guard)
                    .unwrap_or_else(|e| e.into_inner());
            } else {
                let (next, result) = self
                    .signaled
                    .wait_timeout(guard, Duration::from_millis(timeout_ms as u64))
                    .unwrap_or_else(|e| e.into_inner());
                guard = next;
                if result.timed_out() && self.completed.load(Ordering::SeqCst) < value {
                    return Err(Error::BackendError {
                        code: -1,
                        message: format!("mock fence wait for {} timed out", value),
                    });
                }
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Descriptor store
// ============================================================================

pub struct MockDescriptorStore {
    ops: OperationLog,
    slots: SlotContents,
    shader_visible: bool,
}

impl NativeDescriptorStore for MockDescriptorStore {
    fn allocated_size(&self) -> u32 {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len() as u32
    }

    fn reallocate(&mut self, new_size: u32) -> Result<()> {
        push_op(&self.ops, format!("store: reallocate({})", new_size));
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if self.shader_visible {
            // Shader-visible memory gets fresh addresses, old contents lost
            *slots = vec![None; new_size as usize];
        } else {
            slots.resize(new_size as usize, None);
        }
        Ok(())
    }

    fn write_slot(&mut self, index: u32, resource: &Resource) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.get_mut(index as usize).ok_or_else(|| {
            Error::InvalidArgument(format!("descriptor slot {} is out of range", index))
        })?;
        *slot = Some(resource.name().to_string());
        Ok(())
    }

    fn clear_slot(&mut self, index: u32) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(index as usize) {
            *slot = None;
        }
    }
}
