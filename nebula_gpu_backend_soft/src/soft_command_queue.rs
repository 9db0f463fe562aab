//! Software command queue - one execution thread per queue
//!
//! Submissions, fence signals and fence waits enter one in-order stream
//! consumed by the queue's execution thread. Signals therefore fire only
//! after every prior submission has run, and a device-side wait stalls
//! all later stream items, which is exactly how hardware queues order
//! their work.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use nebula_gpu::error::{Error, Result};
use nebula_gpu::gpu::backend::{NativeCommandList, NativeCommandQueue, NativeFence};

use crate::soft_command_list::{SoftCommandList, SoftTask};
use crate::soft_fence::{SoftFence, Timeline};

enum StreamItem {
    /// Run the tasks of one submitted command list set
    Execute(Vec<SoftTask>),
    /// Advance the fence timeline to the given value
    SignalFence(Arc<Timeline>, u64),
    /// Stall the stream until the timeline reaches the given value
    WaitFence(Arc<Timeline>, u64),
    Stop,
}

struct Stream {
    items: Mutex<VecDeque<StreamItem>>,
    pushed: Condvar,
}

impl Stream {
    fn push(&self, item: StreamItem) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
        self.pushed.notify_one();
    }

    fn pop(&self) -> StreamItem {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.pushed.wait(items).unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn execution_thread_main(stream: Arc<Stream>) {
    loop {
        match stream.pop() {
            StreamItem::Execute(tasks) => {
                for task in tasks {
                    task();
                }
            }
            StreamItem::SignalFence(timeline, value) => timeline.complete_to(value),
            StreamItem::WaitFence(timeline, value) => {
                // Infinite wait: the signaling queue is responsible for
                // making progress
                let _ = timeline.wait_for(value, 0);
            }
            StreamItem::Stop => return,
        }
    }
}

pub struct SoftCommandQueue {
    name: String,
    stream: Arc<Stream>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SoftCommandQueue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let stream = Arc::new(Stream {
            items: Mutex::new(VecDeque::new()),
            pushed: Condvar::new(),
        });
        let worker_stream = Arc::clone(&stream);
        let worker = std::thread::Builder::new()
            .name(format!("{} Execution Thread", name))
            .spawn(move || execution_thread_main(worker_stream))
            .map_err(|err| {
                Error::InitializationFailed(format!(
                    "failed to start execution thread for queue '{}': {}",
                    name, err
                ))
            })?;
        Ok(Self {
            name,
            stream,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn timeline_of(fence: &dyn NativeFence) -> Result<Arc<Timeline>> {
        fence
            .as_any()
            .downcast_ref::<SoftFence>()
            .map(SoftFence::timeline)
            .ok_or_else(|| {
                Error::InvalidArgument("fence does not belong to the software backend".to_string())
            })
    }
}

impl NativeCommandQueue for SoftCommandQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, lists: &[&dyn NativeCommandList]) -> Result<()> {
        let mut tasks = Vec::new();
        for list in lists {
            let soft = list
                .as_any()
                .downcast_ref::<SoftCommandList>()
                .ok_or_else(|| {
                    Error::InvalidArgument(
                        "command list does not belong to the software backend".to_string(),
                    )
                })?;
            tasks.append(&mut soft.take_tasks());
        }
        self.stream.push(StreamItem::Execute(tasks));
        Ok(())
    }

    fn signal_fence(&self, fence: &dyn NativeFence, value: u64) -> Result<()> {
        self.stream
            .push(StreamItem::SignalFence(Self::timeline_of(fence)?, value));
        Ok(())
    }

    fn wait_fence(&self, fence: &dyn NativeFence, value: u64) -> Result<()> {
        self.stream
            .push(StreamItem::WaitFence(Self::timeline_of(fence)?, value));
        Ok(())
    }
}

impl Drop for SoftCommandQueue {
    fn drop(&mut self) {
        self.stream.push(StreamItem::Stop);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
