//! Software descriptor store - resource names in plain slots

use nebula_gpu::error::{Error, Result};
use nebula_gpu::gpu::backend::NativeDescriptorStore;
use nebula_gpu::gpu::resource::Resource;

pub struct SoftDescriptorStore {
    slots: Vec<Option<String>>,
    shader_visible: bool,
}

impl SoftDescriptorStore {
    pub fn new(size: u32, shader_visible: bool) -> Self {
        Self {
            slots: vec![None; size as usize],
            shader_visible,
        }
    }

    pub fn slot(&self, index: u32) -> Option<&str> {
        self.slots
            .get(index as usize)
            .and_then(|slot| slot.as_deref())
    }
}

impl NativeDescriptorStore for SoftDescriptorStore {
    fn allocated_size(&self) -> u32 {
        self.slots.len() as u32
    }

    fn reallocate(&mut self, new_size: u32) -> Result<()> {
        if self.shader_visible {
            // Shader-visible memory changes addresses: contents must be
            // re-populated by the owning binding sets
            self.slots = vec![None; new_size as usize];
        } else {
            self.slots.resize(new_size as usize, None);
        }
        Ok(())
    }

    fn write_slot(&mut self, index: u32, resource: &Resource) -> Result<()> {
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            Error::InvalidArgument(format!("descriptor slot {} is out of range", index))
        })?;
        *slot = Some(resource.name().to_string());
        Ok(())
    }

    fn clear_slot(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = None;
        }
    }
}
