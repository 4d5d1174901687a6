//! Concurrency primitives shared by the server, transport, and client:
//! a priority-ordered worker pool and a multi-producer message queue.

pub mod message_queue;
pub mod scheduler;

pub use message_queue::MessageQueue;
pub use scheduler::{
    SchedulerError, SchedulerStats, TaskError, TaskHandle, TaskPriority, TaskScheduler,
};
