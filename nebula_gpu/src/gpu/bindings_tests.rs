use std::sync::Arc;

use super::*;
use crate::gpu::descriptor_heap::{DescriptorHeap, DescriptorHeapSettings, DescriptorHeapType};
use crate::gpu::mock_backend::MockDevice;
use crate::gpu::resource::{Resource, ResourceState, ResourceUsage, ResourceView};

fn test_program() -> Arc<Program> {
    Program::new(
        "TestProgram",
        vec![
            ArgumentDesc::new(
                "g_constants",
                ArgumentAccess::Constant,
                ResourceState::ShaderResource,
            ),
            ArgumentDesc::new(
                "g_frame_uniforms",
                ArgumentAccess::FrameConstant,
                ResourceState::ShaderResource,
            ),
            ArgumentDesc::new(
                "g_texture",
                ArgumentAccess::Mutable,
                ResourceState::ShaderResource,
            ),
        ],
    )
    .unwrap()
}

fn buffer(name: &str) -> ResourceView {
    ResourceView::new(Resource::new(name, ResourceUsage::SHADER_READ))
}

fn full_bindings() -> Vec<(&'static str, ResourceView)> {
    vec![
        ("g_constants", buffer("constants")),
        ("g_frame_uniforms", buffer("uniforms")),
        ("g_texture", buffer("texture")),
    ]
}

// ============================================================================
// Program
// ============================================================================

#[test]
fn test_program_rejects_duplicate_argument_names() {
    let error = Program::new(
        "Broken",
        vec![
            ArgumentDesc::new("g_a", ArgumentAccess::Mutable, ResourceState::ShaderResource),
            ArgumentDesc::new("g_a", ArgumentAccess::Constant, ResourceState::ShaderResource),
        ],
    )
    .unwrap_err();
    assert!(matches!(error, crate::error::Error::InvalidArgument(_)));
}

#[test]
fn test_program_looks_up_arguments_by_name() {
    let program = test_program();
    assert_eq!(
        program.argument("g_texture").unwrap().access,
        ArgumentAccess::Mutable
    );
    assert!(program.argument("g_missing").is_none());
}

// ============================================================================
// Binding-set construction
// ============================================================================

#[test]
fn test_all_declared_arguments_must_be_bound() {
    let program = test_program();
    let error = BindingSet::new(
        Arc::clone(&program),
        vec![("g_texture", buffer("texture"))],
        None,
    )
    .unwrap_err();
    assert!(matches!(error, crate::error::Error::InvalidArgument(_)));
}

#[test]
fn test_undeclared_argument_names_are_rejected() {
    let program = test_program();
    let mut views = full_bindings();
    views.push(("g_unknown", buffer("stray")));
    let error = BindingSet::new(program, views, None).unwrap_err();
    assert!(matches!(error, crate::error::Error::InvalidArgument(_)));
}

// ============================================================================
// Rebinding
// ============================================================================

#[test]
fn test_mutable_arguments_can_be_rebound() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    let replacement = buffer("other_texture");
    set.set_view("g_texture", replacement.clone()).unwrap();
    assert!(set.view("g_texture").unwrap().same_as(&replacement));
}

#[test]
fn test_constant_arguments_can_not_change_views() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    let error = set
        .set_view("g_constants", buffer("other_constants"))
        .unwrap_err();
    assert!(matches!(error, crate::error::Error::StateViolation(_)));
}

#[test]
fn test_rebinding_the_same_view_is_a_noop() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    let current = set.view("g_constants").unwrap();
    set.set_view("g_constants", current).unwrap();
}

// ============================================================================
// Transition barriers
// ============================================================================

#[test]
fn test_mismatched_resource_produces_exactly_one_barrier() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();

    let texture = set.view("g_texture").unwrap().resource;
    texture.set_state(ResourceState::CopyDest);

    let barriers = set.apply_transition_barriers(ArgumentAccessMask::MUTABLE);
    assert_eq!(barriers.len(), 1);
    assert_eq!(texture.state(), ResourceState::ShaderResource);

    // Already in the required state now: elided
    let barriers = set.apply_transition_barriers(ArgumentAccessMask::MUTABLE);
    assert!(barriers.is_empty());
}

#[test]
fn test_resources_already_in_required_state_produce_no_barriers() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    for resource in set.bound_resources() {
        resource.set_state(ResourceState::ShaderResource);
    }
    assert!(set
        .apply_transition_barriers(ArgumentAccessMask::all())
        .is_empty());
}

#[test]
fn test_access_mask_filters_considered_bindings() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    // All resources start Undefined, so every considered binding yields
    // one barrier
    let barriers = set.apply_transition_barriers(ArgumentAccessMask::CONSTANT);
    assert_eq!(barriers.len(), 1);
    let barriers = set.apply_transition_barriers(
        ArgumentAccessMask::FRAME_CONSTANT | ArgumentAccessMask::MUTABLE,
    );
    assert_eq!(barriers.len(), 2);
}

// ============================================================================
// Copying
// ============================================================================

#[test]
fn test_create_copy_replaces_only_the_named_subset() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    let replacement = buffer("next_texture");

    let copy = set
        .create_copy(vec![("g_texture", replacement.clone())], Some(1))
        .unwrap();
    assert!(copy.view("g_texture").unwrap().same_as(&replacement));
    assert!(copy
        .view("g_constants")
        .unwrap()
        .same_as(&set.view("g_constants").unwrap()));
    assert_eq!(copy.frame_index(), Some(1));
}

#[test]
fn test_create_copy_preserves_tracked_state_of_kept_bindings() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    set.apply_transition_barriers(ArgumentAccessMask::all());

    let copy = set
        .create_copy(vec![("g_texture", buffer("next_texture"))], None)
        .unwrap();
    // Kept resources are shared and already transitioned: only the fresh
    // replacement needs a barrier
    let barriers = copy.apply_transition_barriers(ArgumentAccessMask::all());
    assert_eq!(barriers.len(), 1);
}

#[test]
fn test_create_copy_rejects_unknown_replacement_names() {
    let program = test_program();
    let set = BindingSet::new(program, full_bindings(), None).unwrap();
    let error = set
        .create_copy(vec![("g_unknown", buffer("stray"))], None)
        .unwrap_err();
    assert!(matches!(error, crate::error::Error::InvalidArgument(_)));
}

// ============================================================================
// Descriptor heap integration
// ============================================================================

fn shader_heap(device: &MockDevice, size: u32) -> Arc<DescriptorHeap> {
    Arc::new(
        DescriptorHeap::new(
            device,
            DescriptorHeapSettings {
                heap_type: DescriptorHeapType::ShaderResources,
                size,
                deferred_allocation: true,
                shader_visible: true,
            },
        )
        .unwrap(),
    )
}

#[test]
fn test_binding_sets_of_one_program_share_the_constant_range() {
    let device = MockDevice::new();
    let heap = shader_heap(&device, 16);
    let program = test_program();

    let first = BindingSet::new(Arc::clone(&program), full_bindings(), None).unwrap();
    let second = BindingSet::new(Arc::clone(&program), full_bindings(), None).unwrap();
    first.complete_initialization(&heap).unwrap();
    second.complete_initialization(&heap).unwrap();

    // 1 shared constant slot + 2 non-constant slots per set
    let slots = device.store_slots(0);
    let written = slots
        .lock()
        .unwrap()
        .iter()
        .filter(|slot| slot.is_some())
        .count();
    assert_eq!(written, 5);
}

#[test]
fn test_dropping_a_binding_set_releases_its_mutable_range() {
    let device = MockDevice::new();
    let heap = shader_heap(&device, 4);
    let program = test_program();

    let set = BindingSet::new(Arc::clone(&program), full_bindings(), None).unwrap();
    set.complete_initialization(&heap).unwrap();
    drop(set);

    // 1 constant slot stays reserved, the 2 non-constant slots and the
    // single untouched slot are free again
    assert_eq!(heap.reserve_range(3).unwrap().length(), 3);
}

#[test]
fn test_descriptors_are_restored_after_shader_visible_reallocation() {
    let device = MockDevice::new();
    let heap = shader_heap(&device, 3);
    let program = test_program();

    let set = BindingSet::new(Arc::clone(&program), full_bindings(), None).unwrap();
    set.complete_initialization(&heap).unwrap();

    // Force growth: shader-visible reallocation wipes the store, the
    // heap callback re-writes this set's descriptors
    heap.reserve_range(8).unwrap();
    heap.allocate().unwrap();

    let slots = device.store_slots(0);
    let written = slots
        .lock()
        .unwrap()
        .iter()
        .filter(|slot| slot.is_some())
        .count();
    assert_eq!(written, 3);
}
