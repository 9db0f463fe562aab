//! Resource state tracking and transition barriers
//!
//! A resource has exactly one GPU-visible access state at any
//! synchronization point. Transition barriers are computed by comparing
//! the tracked state against the state a binding requires; a barrier is
//! emitted only on mismatch (redundant barriers stall the GPU pipeline
//! without correctness benefit).

use bitflags::bitflags;
use std::sync::{Arc, Mutex};

/// GPU-visible access mode a resource is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Initial state of a freshly created resource
    Undefined,
    /// Generic read state usable by any queue type
    Common,
    /// Sampled or read in a shader
    ShaderResource,
    /// Read/write access from a shader
    UnorderedAccess,
    /// Color attachment output
    RenderTarget,
    /// Depth/stencil write
    DepthWrite,
    /// Depth/stencil read
    DepthRead,
    /// Source of a copy command
    CopySource,
    /// Destination of a copy command
    CopyDest,
    /// Ready for presentation
    Present,
}

bitflags! {
    /// Declared usages of a resource, fixed at creation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceUsage: u32 {
        const SHADER_READ   = 1 << 0;
        const SHADER_WRITE  = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const DEPTH_STENCIL = 1 << 3;
        const COPY_SOURCE   = 1 << 4;
        const COPY_DEST     = 1 << 5;
    }
}

/// GPU resource with a tracked access state
///
/// The memory behind the resource is owned by the resource layer; this
/// core only tracks its synchronization state and keeps it alive while
/// command lists referencing it are in flight.
#[derive(Debug)]
pub struct Resource {
    name: String,
    usage: ResourceUsage,
    state: Mutex<ResourceState>,
}

impl Resource {
    pub fn new(name: impl Into<String>, usage: ResourceUsage) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            usage,
            state: Mutex::new(ResourceState::Undefined),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    /// Current tracked state
    pub fn state(&self) -> ResourceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Force the tracked state without emitting a barrier
    ///
    /// Used when the state change is established externally, e.g. by a
    /// native render pass attachment transition.
    pub fn set_state(&self, state: ResourceState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Transition the tracked state to `target`
    ///
    /// Returns the barrier to record when the state differs, or `None`
    /// when the resource is already in the target state (barrier elision).
    pub fn transition_to(self: &Arc<Self>, target: ResourceState) -> Option<ResourceBarrier> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == target {
            return None;
        }
        let barrier = ResourceBarrier {
            resource: Arc::clone(self),
            state_before: *state,
            state_after: target,
        };
        *state = target;
        Some(barrier)
    }
}

/// View into a resource, the unit bound to a shader argument
#[derive(Debug, Clone)]
pub struct ResourceView {
    pub resource: Arc<Resource>,
    pub offset: u64,
    pub size: u64,
}

impl ResourceView {
    pub fn new(resource: Arc<Resource>) -> Self {
        Self {
            resource,
            offset: 0,
            size: 0,
        }
    }

    pub fn with_range(resource: Arc<Resource>, offset: u64, size: u64) -> Self {
        Self {
            resource,
            offset,
            size,
        }
    }

    /// Identity comparison used for binding change detection
    pub fn same_as(&self, other: &ResourceView) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
            && self.offset == other.offset
            && self.size == other.size
    }
}

/// Single resource state transition
#[derive(Debug, Clone)]
pub struct ResourceBarrier {
    pub resource: Arc<Resource>,
    pub state_before: ResourceState,
    pub state_after: ResourceState,
}

impl std::fmt::Display for ResourceBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' {:?} -> {:?}",
            self.resource.name(),
            self.state_before,
            self.state_after
        )
    }
}

/// Ordered set of transition barriers recorded as one native command
#[derive(Debug, Clone, Default)]
pub struct ResourceBarrierSet {
    barriers: Vec<ResourceBarrier>,
}

impl ResourceBarrierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, barrier: ResourceBarrier) {
        self.barriers.push(barrier);
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceBarrier> {
        self.barriers.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
