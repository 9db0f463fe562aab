/*!
# Nebula GPU - Software Backend

Software implementation of the nebula_gpu backend traits.

Each queue owns an execution thread consuming an in-order stream of
submitted work, fence signals and fence waits, so the backend reproduces
real queue semantics: fence signals fire only after prior submissions
finish, and device-side waits stall the stream. Command lists record
plain closures (`record_task`) instead of GPU commands, which makes the
backend suitable for integration-testing the synchronization protocol
end to end without a GPU.
*/

// Software implementation modules
mod soft_command_list;
mod soft_command_queue;
mod soft_descriptor_store;
mod soft_device;
mod soft_fence;

pub use soft_command_list::SoftCommandList;
pub use soft_command_queue::SoftCommandQueue;
pub use soft_descriptor_store::SoftDescriptorStore;
pub use soft_device::SoftDevice;
pub use soft_fence::SoftFence;
