/// Backend traits - narrow interfaces to the native graphics API
///
/// The core drives native command submission through these traits only.
/// Each backend (Direct3D 12, Vulkan, Metal, or the software backend used
/// in tests) provides one flat implementation per trait, selected when the
/// device is constructed; there is no runtime backend switching.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;
use crate::gpu::command_list::CommandListType;
use crate::gpu::descriptor_heap::DescriptorHeapSettings;
use crate::gpu::resource::{Resource, ResourceBarrierSet};

/// Native device factory
///
/// This is the single entry point a backend exposes. All other native
/// objects are created through it.
pub trait NativeDevice: Send + Sync {
    /// Create a native command queue for the given command list type
    fn create_command_queue(
        &self,
        list_type: CommandListType,
        name: &str,
    ) -> Result<Arc<dyn NativeCommandQueue>>;

    /// Create a native command list bound to the given queue
    fn create_command_list(
        &self,
        queue: &Arc<dyn NativeCommandQueue>,
    ) -> Result<Box<dyn NativeCommandList>>;

    /// Create a native fence usable with the given queue
    fn create_fence(&self, queue: &Arc<dyn NativeCommandQueue>) -> Result<Arc<dyn NativeFence>>;

    /// Create a native descriptor backing store
    fn create_descriptor_store(
        &self,
        settings: &DescriptorHeapSettings,
    ) -> Result<Box<dyn NativeDescriptorStore>>;
}

/// Native GPU execution lane
pub trait NativeCommandQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Submit committed command lists for execution as one atomic unit
    fn submit(&self, lists: &[&dyn NativeCommandList]) -> Result<()>;

    /// Enqueue a fence signal that fires once prior submissions complete
    fn signal_fence(&self, fence: &dyn NativeFence, value: u64) -> Result<()>;

    /// Enqueue a device-side wait: later submissions on this queue do not
    /// begin until the fence reaches `value`
    fn wait_fence(&self, fence: &dyn NativeFence, value: u64) -> Result<()>;
}

/// Native recorded command sequence
pub trait NativeCommandList: Send {
    /// Begin a new recording, discarding previously recorded commands
    fn reset(&mut self) -> Result<()>;

    /// Close the recording for submission
    fn commit(&mut self) -> Result<()>;

    fn push_debug_group(&mut self, name: &str);

    fn pop_debug_group(&mut self);

    /// Record a set of resource transition barriers
    fn set_resource_barriers(&mut self, barriers: &ResourceBarrierSet) -> Result<()>;

    /// Downcasts for backend-specific encoding
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Native monotonic-counter synchronization primitive
pub trait NativeFence: Send + Sync {
    /// Highest counter value the GPU has completed
    fn completed_value(&self) -> u64;

    /// Block the calling thread until the counter reaches `value`
    ///
    /// `timeout_ms == 0` means an infinite wait.
    fn wait_on_cpu(&self, value: u64, timeout_ms: u32) -> Result<()>;

    /// Downcast for the queue that signals this fence
    fn as_any(&self) -> &dyn Any;
}

/// Native descriptor backing store
///
/// The store is the address space descriptor slot indices point into.
/// Reallocation rules differ by visibility: CPU-visible stores copy their
/// existing slots to the new allocation, shader-visible stores get fresh
/// addresses and must be re-populated by re-applying all live bindings.
pub trait NativeDescriptorStore: Send {
    /// Number of slots in the materialized store
    fn allocated_size(&self) -> u32;

    /// Grow the backing store to `new_size` slots
    fn reallocate(&mut self, new_size: u32) -> Result<()>;

    /// Write the descriptor for `resource` into the given slot
    fn write_slot(&mut self, index: u32, resource: &Resource) -> Result<()>;

    /// Clear the given slot
    fn clear_slot(&mut self, index: u32);
}
