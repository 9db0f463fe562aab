//! Resource binding sets - per-argument views, descriptor slots and
//! transition barriers
//!
//! A `Program` declares named arguments with an access kind and the
//! resource state each bound resource must be in. A `BindingSet` binds
//! one resource view per argument and computes the transition barriers a
//! command list must record before draw or dispatch. Barrier elision is
//! mandatory: a resource already in its required state produces no
//! barrier.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rustc_hash::FxHashMap;

use crate::data::range_set::Range;
use crate::error::{Error, Result};
use crate::gpu::descriptor_heap::{DescriptorHeap, DescriptorHeapCallback, DescriptorHeapType};
use crate::gpu::resource::{Resource, ResourceBarrierSet, ResourceState, ResourceView};
use crate::{gpu_bail, gpu_trace};

// ============================================================================
// Argument declarations
// ============================================================================

/// How often an argument's bound resource is expected to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentAccess {
    /// Bound once, immutable through the program's life
    Constant,
    /// One physical binding per in-flight frame, constant within a frame
    FrameConstant,
    /// May be rebound per draw
    Mutable,
}

bitflags::bitflags! {
    /// Selection mask over argument access kinds
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArgumentAccessMask: u32 {
        const CONSTANT       = 1 << 0;
        const FRAME_CONSTANT = 1 << 1;
        const MUTABLE        = 1 << 2;
    }
}

impl ArgumentAccess {
    pub fn as_mask(self) -> ArgumentAccessMask {
        match self {
            ArgumentAccess::Constant => ArgumentAccessMask::CONSTANT,
            ArgumentAccess::FrameConstant => ArgumentAccessMask::FRAME_CONSTANT,
            ArgumentAccess::Mutable => ArgumentAccessMask::MUTABLE,
        }
    }
}

/// One named shader argument, as produced by the reflection layer
#[derive(Debug, Clone)]
pub struct ArgumentDesc {
    pub name: String,
    pub access: ArgumentAccess,
    /// State the bound resource must be in when the argument is used
    pub required_state: ResourceState,
}

impl ArgumentDesc {
    pub fn new(
        name: impl Into<String>,
        access: ArgumentAccess,
        required_state: ResourceState,
    ) -> Self {
        Self {
            name: name.into(),
            access,
            required_state,
        }
    }
}

// ============================================================================
// Program
// ============================================================================

/// Shader program argument declarations shared by all of its binding sets
pub struct Program {
    name: String,
    arguments: Vec<ArgumentDesc>,
    // Constant arguments share one descriptor range across every binding
    // set of the program; the first set to initialize reserves it, the
    // mutex serializes that race
    constant_ranges: Mutex<FxHashMap<DescriptorHeapType, Range>>,
}

impl Program {
    pub fn new(name: impl Into<String>, arguments: Vec<ArgumentDesc>) -> Result<Arc<Self>> {
        let name = name.into();
        for (position, argument) in arguments.iter().enumerate() {
            if arguments[..position]
                .iter()
                .any(|prior| prior.name == argument.name)
            {
                return Err(Error::InvalidArgument(format!(
                    "program '{}' declares argument '{}' more than once",
                    name, argument.name
                )));
            }
        }
        Ok(Arc::new(Self {
            name,
            arguments,
            constant_ranges: Mutex::new(FxHashMap::default()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[ArgumentDesc] {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentDesc> {
        self.arguments.iter().find(|desc| desc.name == name)
    }

    fn constant_argument_count(&self) -> u32 {
        self.arguments
            .iter()
            .filter(|desc| desc.access == ArgumentAccess::Constant)
            .count() as u32
    }

    /// Shared constant descriptor range on the given heap, reserved the
    /// first time any binding set of this program initializes there
    fn constant_range(&self, heap: &DescriptorHeap) -> Result<Option<Range>> {
        let length = self.constant_argument_count();
        if length == 0 {
            return Ok(None);
        }
        let mut cache = self
            .constant_ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(range) = cache.get(&heap.heap_type()) {
            return Ok(Some(*range));
        }
        let range = heap.reserve_range(length)?;
        gpu_trace!(
            "nebula::Program",
            "program '{}' reserved constant range {} on {:?} heap",
            self.name,
            range,
            heap.heap_type()
        );
        cache.insert(heap.heap_type(), range);
        Ok(Some(range))
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Binding set
// ============================================================================

struct ArgumentBinding {
    desc: ArgumentDesc,
    view: ResourceView,
    /// Descriptor slot assigned by complete_initialization
    slot: Option<u32>,
}

struct BindingState {
    bindings: FxHashMap<String, ArgumentBinding>,
    /// Heap the set was initialized against, plus the per-instance range
    /// covering its non-constant arguments
    heap: Option<Arc<DescriptorHeap>>,
    mutable_range: Option<Range>,
    registered: bool,
}

/// One resource view bound per program argument
pub struct BindingSet {
    program: Arc<Program>,
    frame_index: Option<u32>,
    state: Mutex<BindingState>,
}

impl BindingSet {
    /// Bind every argument of `program`
    ///
    /// All declared arguments must appear in `views` exactly, and no
    /// undeclared name may appear.
    pub fn new(
        program: Arc<Program>,
        views: Vec<(&str, ResourceView)>,
        frame_index: Option<u32>,
    ) -> Result<Arc<Self>> {
        let mut bindings = FxHashMap::default();
        for (name, view) in views {
            let desc = program.argument(name).ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "program '{}' does not declare argument '{}'",
                    program.name(),
                    name
                ))
            })?;
            bindings.insert(
                name.to_string(),
                ArgumentBinding {
                    desc: desc.clone(),
                    view,
                    slot: None,
                },
            );
        }
        for desc in program.arguments() {
            if !bindings.contains_key(&desc.name) {
                return Err(Error::InvalidArgument(format!(
                    "argument '{}' of program '{}' is not bound",
                    desc.name,
                    program.name()
                )));
            }
        }
        Ok(Arc::new(Self {
            program,
            frame_index,
            state: Mutex::new(BindingState {
                bindings,
                heap: None,
                mutable_range: None,
                registered: false,
            }),
        }))
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn frame_index(&self) -> Option<u32> {
        self.frame_index
    }

    pub fn view(&self, name: &str) -> Option<ResourceView> {
        self.lock().bindings.get(name).map(|b| b.view.clone())
    }

    /// Rebind an argument to a new resource view
    ///
    /// Rebinding to the currently bound view is a no-op. Constant
    /// arguments must not change views through the program's life.
    pub fn set_view(&self, name: &str, view: ResourceView) -> Result<()> {
        let mut state = self.lock();
        let binding = state.bindings.get_mut(name).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "program '{}' does not declare argument '{}'",
                self.program.name(),
                name
            ))
        })?;
        if binding.view.same_as(&view) {
            return Ok(());
        }
        if binding.desc.access == ArgumentAccess::Constant {
            gpu_bail!(
                "nebula::BindingSet",
                StateViolation,
                "constant argument '{}' of program '{}' can not be rebound",
                name,
                self.program.name()
            );
        }
        binding.view = view;
        let slot = state.bindings[name].slot;
        if let (Some(slot), Some(heap)) = (slot, state.heap.clone()) {
            let resource = state.bindings[name].view.resource.clone();
            drop(state);
            heap.write_descriptor(slot, &resource)?;
        }
        Ok(())
    }

    /// Compute the transition barriers needed before using the selected
    /// arguments, updating each resource's tracked state
    ///
    /// Resources already in their required state produce no barrier.
    pub fn apply_transition_barriers(&self, access_mask: ArgumentAccessMask) -> ResourceBarrierSet {
        let state = self.lock();
        let mut barriers = ResourceBarrierSet::new();
        for binding in state.bindings.values() {
            if !access_mask.contains(binding.desc.access.as_mask()) {
                continue;
            }
            if let Some(barrier) = binding
                .view
                .resource
                .transition_to(binding.desc.required_state)
            {
                barriers.push(barrier);
            }
        }
        barriers
    }

    /// Resources a command list must retain while this set is bound
    pub fn bound_resources(&self) -> Vec<Arc<Resource>> {
        self.lock()
            .bindings
            .values()
            .map(|binding| binding.view.resource.clone())
            .collect()
    }

    /// Duplicate the set, replacing only the named subset of bindings
    ///
    /// Unreplaced bindings keep their views; tracked resource state is
    /// shared, not reset. Constant arguments may not be replaced with a
    /// different view.
    pub fn create_copy(
        &self,
        replacements: Vec<(&str, ResourceView)>,
        frame_index: Option<u32>,
    ) -> Result<Arc<Self>> {
        let state = self.lock();
        let mut views: Vec<(&str, ResourceView)> = Vec::new();
        for desc in self.program.arguments() {
            let current = &state.bindings[&desc.name];
            let replacement = replacements
                .iter()
                .find(|(name, _)| *name == desc.name)
                .map(|(_, view)| view.clone());
            match replacement {
                Some(view) => {
                    if desc.access == ArgumentAccess::Constant && !current.view.same_as(&view) {
                        gpu_bail!(
                            "nebula::BindingSet",
                            StateViolation,
                            "constant argument '{}' of program '{}' can not be rebound",
                            desc.name,
                            self.program.name()
                        );
                    }
                    views.push((desc.name.as_str(), view));
                }
                None => views.push((desc.name.as_str(), current.view.clone())),
            }
        }
        for (name, _) in &replacements {
            if self.program.argument(name).is_none() {
                return Err(Error::InvalidArgument(format!(
                    "program '{}' does not declare argument '{}'",
                    self.program.name(),
                    name
                )));
            }
        }
        drop(state);
        Self::new(Arc::clone(&self.program), views, frame_index)
    }

    /// Reserve descriptor slots on `heap` and write all descriptors
    ///
    /// Constant arguments share the program's cached range; the rest get
    /// a per-instance range released when the set drops. Must run again
    /// only through the heap callback after shader-visible reallocation.
    pub fn complete_initialization(self: &Arc<Self>, heap: &Arc<DescriptorHeap>) -> Result<()> {
        let constant_range = self.program.constant_range(heap)?;
        let mutable_count = self
            .program
            .arguments()
            .iter()
            .filter(|desc| desc.access != ArgumentAccess::Constant)
            .count() as u32;
        let mutable_range = if mutable_count > 0 {
            Some(heap.reserve_range(mutable_count)?)
        } else {
            None
        };

        {
            let mut state = self.lock();
            if let (Some(old_heap), Some(old_range)) =
                (state.heap.as_ref(), state.mutable_range)
            {
                old_heap.release_range(old_range);
            }
            state.heap = Some(Arc::clone(heap));
            state.mutable_range = mutable_range;

            let mut constant_next = constant_range.map(|range| range.start());
            let mut mutable_next = mutable_range.map(|range| range.start());
            for desc in self.program.arguments() {
                let next = if desc.access == ArgumentAccess::Constant {
                    &mut constant_next
                } else {
                    &mut mutable_next
                };
                let slot = next.as_mut().map(|index| {
                    let assigned = *index;
                    *index += 1;
                    assigned
                });
                if let Some(binding) = state.bindings.get_mut(&desc.name) {
                    binding.slot = slot;
                }
            }
        }

        // Deferred ranges may point past the materialized store
        heap.allocate()?;
        self.write_descriptors(heap)?;

        let already_registered = {
            let mut state = self.lock();
            std::mem::replace(&mut state.registered, true)
        };
        if !already_registered {
            let observer: Arc<dyn DescriptorHeapCallback> = self.clone();
            heap.register_callback(Arc::downgrade(&observer));
        }
        Ok(())
    }

    fn write_descriptors(&self, heap: &DescriptorHeap) -> Result<()> {
        let writes: Vec<(u32, Arc<Resource>)> = {
            let state = self.lock();
            state
                .bindings
                .values()
                .filter_map(|binding| {
                    binding
                        .slot
                        .map(|slot| (slot, binding.view.resource.clone()))
                })
                .collect()
        };
        for (slot, resource) in writes {
            heap.write_descriptor(slot, &resource)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("program", &self.program.name)
            .field("frame_index", &self.frame_index)
            .finish_non_exhaustive()
    }
}

impl DescriptorHeapCallback for BindingSet {
    /// Shader-visible stores lose their contents on reallocation; rewrite
    /// every descriptor this set owns
    fn on_heap_allocated(&self, heap: &DescriptorHeap) {
        if let Err(error) = self.write_descriptors(heap) {
            crate::gpu_warn!(
                "nebula::BindingSet",
                "failed to restore descriptors of program '{}' after heap reallocation: {}",
                self.program.name(),
                error
            );
        }
    }
}

impl Drop for BindingSet {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let (Some(heap), Some(range)) = (state.heap.as_ref(), state.mutable_range) {
            heap.release_range(range);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "bindings_tests.rs"]
mod tests;
