/*!
# Nebula GPU

Cross-backend GPU command submission and resource synchronization core.

This crate provides the platform-agnostic command execution model using
trait-based dynamic polymorphism. Backend implementations (Direct3D 12,
Vulkan, Metal, or the software backend used for testing) plug in behind
the narrow `Native*` traits and are selected when the device is created.

## Architecture

- **CommandList**: recorded command sequence with a strict lifecycle
  (Pending, Encoding, Committed, Executing)
- **CommandQueue**: native execution lane tracking in-flight sets with a
  background waiting thread
- **Fence**: monotonic counter for CPU- and GPU-side synchronization
- **DescriptorHeap**: slot allocator with deferred growth
- **BindingSet**: per-argument resource views and transition barriers
- **Context**: cross-queue upload synchronization and deferred actions

Backend crates provide concrete types implementing the `gpu::backend`
traits.

## Example

```no_run
use nebula_gpu::nebula::gpu::{CommandListSet, CommandListType, CommandQueue};
use nebula_gpu_backend_soft::SoftDevice;

// Create a queue on the software backend
let device = SoftDevice::new();
let queue = CommandQueue::new(device, CommandListType::Render, "Render Queue")?;

// Record, commit and submit a command list
let list = queue.create_command_list("")?;
list.reset(None)?;
list.commit()?;
queue.execute(CommandListSet::new(vec![list.clone()], None)?, None)?;

// Block until the GPU finished the set
list.wait_until_completed(0)?;
# Ok::<(), nebula_gpu::nebula::Error>(())
```
*/

// Internal modules
pub mod error;
pub mod data;
pub mod gpu;
pub mod log;

// Main nebula namespace module
pub mod nebula {
    // Error types
    pub use crate::error::{Error, Result};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
        // Note: gpu_* macros are NOT re-exported here - they are internal only
    }

    // Data sub-module with the range primitives
    pub mod data {
        pub use crate::data::*;
    }

    // GPU sub-module with all command submission types
    pub mod gpu {
        pub use crate::gpu::*;
    }
}
