//! Software device - factory for the software backend objects

use std::sync::Arc;

use nebula_gpu::error::Result;
use nebula_gpu::gpu::backend::{
    NativeCommandList, NativeCommandQueue, NativeDescriptorStore, NativeDevice, NativeFence,
};
use nebula_gpu::gpu::command_list::CommandListType;
use nebula_gpu::gpu::descriptor_heap::DescriptorHeapSettings;

use crate::soft_command_list::SoftCommandList;
use crate::soft_command_queue::SoftCommandQueue;
use crate::soft_descriptor_store::SoftDescriptorStore;
use crate::soft_fence::SoftFence;

pub struct SoftDevice;

impl SoftDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl NativeDevice for SoftDevice {
    fn create_command_queue(
        &self,
        _list_type: CommandListType,
        name: &str,
    ) -> Result<Arc<dyn NativeCommandQueue>> {
        Ok(Arc::new(SoftCommandQueue::new(name)?))
    }

    fn create_command_list(
        &self,
        _queue: &Arc<dyn NativeCommandQueue>,
    ) -> Result<Box<dyn NativeCommandList>> {
        Ok(Box::new(SoftCommandList::new()))
    }

    fn create_fence(&self, _queue: &Arc<dyn NativeCommandQueue>) -> Result<Arc<dyn NativeFence>> {
        Ok(Arc::new(SoftFence::new()))
    }

    fn create_descriptor_store(
        &self,
        settings: &DescriptorHeapSettings,
    ) -> Result<Box<dyn NativeDescriptorStore>> {
        Ok(Box::new(SoftDescriptorStore::new(
            settings.size,
            settings.shader_visible,
        )))
    }
}
