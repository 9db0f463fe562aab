/// GPU module - command submission and synchronization types

// Module declarations
pub mod backend;
pub mod bindings;
pub mod command_list;
pub mod command_queue;
pub mod context;
pub mod descriptor_heap;
pub mod fence;
pub mod resource;

#[cfg(test)]
pub mod mock_backend;

// Re-export the core types
pub use backend::*;
pub use bindings::*;
pub use command_list::*;
pub use command_queue::*;
pub use context::*;
pub use descriptor_heap::*;
pub use fence::*;
pub use resource::*;
