//! Descriptor heap - slot allocation with deferred growth
//!
//! Maintains a free-range set over `[0, size)` descriptor slots. Naive
//! reallocation of the native backing store on every insertion is too
//! slow for per-draw binding churn, so growth is deferred: reservations
//! beyond the current capacity only advance a `deferred_size` counter and
//! hand out ranges inside the not-yet-materialized capacity; `allocate`
//! later creates the larger native store in one step. CPU-visible stores
//! copy their existing slots across reallocation; shader-visible stores
//! change addresses and must be re-populated by re-applying live binding
//! sets, which is why heap observers are notified after each allocation.

use std::sync::{Mutex, Weak};

use crate::data::range_set::{Range, RangeSet};
use crate::error::{Error, Result};
use crate::gpu::backend::{NativeDescriptorStore, NativeDevice};
use crate::gpu::resource::Resource;
use crate::{gpu_debug, gpu_trace};
use std::sync::Arc;

/// Kind of descriptors a heap holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapType {
    ShaderResources,
    Samplers,
    RenderTargets,
    DepthStencil,
}

/// Construction-time heap settings
#[derive(Debug, Clone)]
pub struct DescriptorHeapSettings {
    pub heap_type: DescriptorHeapType,
    /// Initial slot capacity
    pub size: u32,
    /// Grow logical capacity on demand instead of failing when full
    pub deferred_allocation: bool,
    /// Shader-visible stores can not be copied across reallocation
    pub shader_visible: bool,
}

/// Observer notified when the heap's backing store was reallocated
pub trait DescriptorHeapCallback: Send + Sync {
    fn on_heap_allocated(&self, heap: &DescriptorHeap);
}

struct HeapState {
    store: Box<dyn NativeDescriptorStore>,
    free_ranges: RangeSet,
    resources: Vec<Option<Arc<Resource>>>,
    allocated_size: u32,
    deferred_size: u32,
    deferred_allocation: bool,
}

pub struct DescriptorHeap {
    heap_type: DescriptorHeapType,
    shader_visible: bool,
    state: Mutex<HeapState>,
    // Weak observers keep binding-set lifetimes explicit: a dropped
    // observer is skipped, never dangles
    callbacks: Mutex<Vec<Weak<dyn DescriptorHeapCallback>>>,
}

impl DescriptorHeap {
    pub fn new(device: &dyn NativeDevice, settings: DescriptorHeapSettings) -> Result<Self> {
        let store = device.create_descriptor_store(&settings)?;
        let mut free_ranges = RangeSet::new();
        if settings.size > 0 {
            free_ranges.add(Range::new(0, settings.size));
        }
        let heap = Self {
            heap_type: settings.heap_type,
            shader_visible: settings.shader_visible,
            state: Mutex::new(HeapState {
                store,
                free_ranges,
                resources: Vec::new(),
                allocated_size: 0,
                deferred_size: settings.size,
                deferred_allocation: settings.deferred_allocation,
            }),
            callbacks: Mutex::new(Vec::new()),
        };
        if settings.size > 0 {
            heap.allocate()?;
        }
        Ok(heap)
    }

    pub fn heap_type(&self) -> DescriptorHeapType {
        self.heap_type
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    /// Slots in the materialized native store
    pub fn allocated_size(&self) -> u32 {
        self.lock().allocated_size
    }

    /// Logical capacity including not-yet-materialized growth
    pub fn deferred_size(&self) -> u32 {
        self.lock().deferred_size
    }

    pub fn set_deferred_allocation(&self, deferred_allocation: bool) {
        self.lock().deferred_allocation = deferred_allocation;
    }

    /// Register an observer for backing-store reallocations
    pub fn register_callback(&self, callback: Weak<dyn DescriptorHeapCallback>) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    /// Add a single resource descriptor, growing the heap when deferred
    /// allocation is enabled
    ///
    /// Returns the assigned slot index.
    pub fn add_resource(&self, resource: Arc<Resource>) -> Result<u32> {
        // Growth, store materialization and slot assignment happen under
        // one lock acquisition: a concurrent reserve_range in between
        // could claim the just-grown slot
        let (index, reallocated) = {
            let mut state = self.lock();
            let index = state.resources.len() as u32;
            if index >= state.deferred_size {
                if !state.deferred_allocation {
                    return Err(Error::OutOfCapacity(format!(
                        "{:?} descriptor heap is full, no free space to add a resource",
                        self.heap_type
                    )));
                }
                state.deferred_size += 1;
            }
            state.free_ranges.remove(Range::new(index, index + 1));
            let reallocated = if state.allocated_size <= index {
                let new_size = state.deferred_size;
                state.store.reallocate(new_size)?;
                state.allocated_size = new_size;
                true
            } else {
                false
            };
            state.store.write_slot(index, &resource)?;
            state.resources.push(Some(resource));
            (index, reallocated)
        };
        if reallocated {
            self.notify_allocated();
        }
        Ok(index)
    }

    /// Replace the resource at an existing slot
    pub fn replace_resource(&self, resource: Arc<Resource>, at_index: u32) -> Result<u32> {
        let mut state = self.lock();
        let slot = state
            .resources
            .get_mut(at_index as usize)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "descriptor index {} is out of range",
                    at_index
                ))
            })?;
        *slot = Some(Arc::clone(&resource));
        state.store.write_slot(at_index, &resource)?;
        Ok(at_index)
    }

    /// Remove the resource at a slot, returning its capacity to the free set
    pub fn remove_resource(&self, at_index: u32) -> Result<()> {
        let mut state = self.lock();
        let slot = state
            .resources
            .get_mut(at_index as usize)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "descriptor index {} is out of range",
                    at_index
                ))
            })?;
        *slot = None;
        state.store.clear_slot(at_index);
        state.free_ranges.add(Range::new(at_index, at_index + 1));
        Ok(())
    }

    /// Reserve a contiguous slot range of the given length
    ///
    /// Takes the lowest-address free range able to fit. When nothing fits
    /// and deferred allocation is enabled, grows the logical capacity and
    /// returns a range inside the not-yet-materialized space; `allocate`
    /// must run before those slots are written.
    pub fn reserve_range(&self, length: u32) -> Result<Range> {
        if length == 0 {
            return Err(Error::InvalidArgument(
                "unable to reserve an empty descriptor range".to_string(),
            ));
        }
        let mut state = self.lock();
        if let Some(reserved) = state.free_ranges.reserve(length) {
            return Ok(reserved);
        }
        if !state.deferred_allocation {
            return Err(Error::OutOfCapacity(format!(
                "{:?} descriptor heap has no free range of {} slot(s)",
                self.heap_type, length
            )));
        }
        let deferred = Range::with_length(state.deferred_size, length);
        state.deferred_size += length;
        gpu_trace!(
            "nebula::DescriptorHeap",
            "{:?} heap deferred range {} reserved, capacity grown to {}",
            self.heap_type,
            deferred,
            state.deferred_size
        );
        Ok(deferred)
    }

    /// Return a reserved range to the free set, re-merging neighbours
    pub fn release_range(&self, range: Range) {
        self.lock().free_ranges.add(range);
    }

    /// Write the descriptor for `resource` into an already reserved slot
    pub fn write_descriptor(&self, index: u32, resource: &Resource) -> Result<()> {
        let mut state = self.lock();
        if index >= state.allocated_size {
            return Err(Error::StateViolation(format!(
                "descriptor slot {} is beyond the allocated size {}; call allocate() first",
                index, state.allocated_size
            )));
        }
        state.store.write_slot(index, resource)
    }

    /// Materialize deferred capacity: reallocate the native store to
    /// `deferred_size` slots
    ///
    /// No-op when nothing is deferred. CPU-visible stores copy existing
    /// descriptors; shader-visible stores come back empty and observers
    /// are expected to re-apply live bindings.
    pub fn allocate(&self) -> Result<()> {
        {
            let mut state = self.lock();
            if state.allocated_size == state.deferred_size {
                return Ok(());
            }
            let new_size = state.deferred_size;
            state.store.reallocate(new_size)?;
            state.allocated_size = new_size;
            gpu_debug!(
                "nebula::DescriptorHeap",
                "{:?} heap reallocated to {} slot(s)",
                self.heap_type,
                new_size
            );
        }

        self.notify_allocated();
        Ok(())
    }

    /// Observers run outside the state lock: re-applying bindings calls
    /// back into write_descriptor
    fn notify_allocated(&self) {
        let callbacks = {
            let mut slot = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
            slot.retain(|weak| weak.strong_count() > 0);
            slot.clone()
        };
        for weak in callbacks {
            if let Some(callback) = weak.upgrade() {
                callback.on_heap_allocated(self);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HeapState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for DescriptorHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("DescriptorHeap")
            .field("type", &self.heap_type)
            .field("allocated_size", &state.allocated_size)
            .field("deferred_size", &state.deferred_size)
            .field("free", &state.free_ranges.total_length())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "descriptor_heap_tests.rs"]
mod tests;
