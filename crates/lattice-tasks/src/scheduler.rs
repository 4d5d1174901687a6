//! Priority-ordered worker pool.
//!
//! Work is submitted with a [`TaskPriority`] and a debug name. A fixed set of
//! named worker threads repeatedly pops the highest-priority pending task;
//! equal priorities run in submission order. A task that panics is caught at
//! the worker boundary, logged by name, and counted as failed; the worker keeps
//! running.
//!
//! ```text
//! submit_priority ──► BinaryHeap<(priority, -seq)> ──► worker 0..N ──► TaskHandle
//!                          (mutex + condvar)            catch_unwind
//! ```

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::{Condvar, Mutex};

/// Scheduling priority. Higher variants are popped first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Errors returned by the scheduler itself.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The pool no longer accepts work.
    #[error("task scheduler has been shut down")]
    ShutDown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Errors delivered through a [`TaskHandle`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task body panicked.
    #[error("task '{name}' panicked: {message}")]
    Panicked {
        /// Debug name given at submission.
        name: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// The task was dropped without producing a result.
    #[error("task was dropped before completing")]
    Cancelled,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    /// Worker threads that have not exited yet.
    pub active_threads: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently executing.
    pub running: usize,
    /// Tasks that returned normally.
    pub completed: u64,
    /// Tasks that panicked.
    pub failed: u64,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedTask {
    priority: TaskPriority,
    sequence: u64,
    name: String,
    job: Job,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (older) first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct QueueState {
    queue: BinaryHeap<QueuedTask>,
    accepting: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
    next_sequence: AtomicU64,
    active_threads: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    /// Pushes a task unless the pool is shut down. Returns `false` if rejected.
    fn enqueue(&self, priority: TaskPriority, name: String, job: Job) -> bool {
        let mut state = self.state.lock();
        if !state.accepting {
            return false;
        }
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        state.queue.push(QueuedTask {
            priority,
            sequence,
            name,
            job,
        });
        drop(state);
        self.available.notify_one();
        true
    }

    fn worker_loop(&self) {
        loop {
            let task = {
                let mut state = self.state.lock();
                loop {
                    if let Some(task) = state.queue.pop() {
                        break Some(task);
                    }
                    if !state.accepting {
                        break None;
                    }
                    self.available.wait(&mut state);
                }
            };
            let Some(task) = task else {
                break;
            };
            self.execute(task);
        }
        self.active_threads.fetch_sub(1, Ordering::SeqCst);
    }

    fn execute(&self, task: QueuedTask) {
        let QueuedTask { name, job, .. } = task;
        self.running.fetch_add(1, Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        self.running.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                tracing::trace!(task = %name, "task completed");
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(task = %name, "task panicked: {}", panic_message(payload.as_ref()));
            }
        }
    }
}

/// Renders a panic payload as text.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to the eventual result of a submitted task.
pub struct TaskHandle<T> {
    name: String,
    receiver: Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    /// Debug name given at submission.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the task finishes.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().unwrap_or(Err(TaskError::Cancelled))
    }

    /// Blocks for at most `timeout`. Returns `None` if the task is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, TaskError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::Cancelled)),
        }
    }

    /// Returns the result if the task already finished.
    pub fn try_get(&self) -> Option<Result<T, TaskError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Cancelled)),
        }
    }

    /// Returns `true` once a result is waiting to be collected.
    pub fn is_finished(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// Fixed-size pool of worker threads executing prioritized tasks.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_count: usize,
}

impl TaskScheduler {
    /// Spawns `thread_count` workers. `0` means one per hardware thread.
    pub fn new(thread_count: usize) -> Result<Self, SchedulerError> {
        let thread_count = if thread_count == 0 {
            num_cpus::get().max(1)
        } else {
            thread_count
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                queue: BinaryHeap::new(),
                accepting: true,
            }),
            available: Condvar::new(),
            next_sequence: AtomicU64::new(0),
            active_threads: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let scheduler = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(thread_count)),
            thread_count,
        };

        for index in 0..thread_count {
            let shared = Arc::clone(&scheduler.shared);
            scheduler.shared.active_threads.fetch_add(1, Ordering::SeqCst);
            let spawned = std::thread::Builder::new()
                .name(format!("lattice-worker-{index}"))
                .spawn(move || shared.worker_loop());
            match spawned {
                Ok(handle) => scheduler.workers.lock().push(handle),
                Err(e) => {
                    scheduler.shared.active_threads.fetch_sub(1, Ordering::SeqCst);
                    scheduler.shutdown();
                    return Err(SchedulerError::WorkerSpawn(e));
                }
            }
        }

        tracing::info!(threads = thread_count, "task scheduler started");
        Ok(scheduler)
    }

    /// Spawns one worker per hardware thread.
    pub fn with_default_threads() -> Result<Self, SchedulerError> {
        Self::new(0)
    }

    /// Number of workers the pool was created with.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Submits work at [`TaskPriority::Normal`].
    pub fn submit<T, F>(&self, work: F) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_priority(TaskPriority::Normal, "task", work)
    }

    /// Submits work with an explicit priority and debug name.
    ///
    /// Fails with [`SchedulerError::ShutDown`] once [`shutdown`](Self::shutdown)
    /// has been called.
    pub fn submit_priority<T, F>(
        &self,
        priority: TaskPriority,
        name: impl Into<String>,
        work: F,
    ) -> Result<TaskHandle<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let task_name = name.clone();
        let job: Job = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(value) => {
                    let _ = tx.send(Ok(value));
                }
                Err(payload) => {
                    let _ = tx.send(Err(TaskError::Panicked {
                        name: task_name,
                        message: panic_message(payload.as_ref()),
                    }));
                    // Re-raise so the worker boundary records the failure.
                    panic::resume_unwind(payload);
                }
            }
        });

        if self.shared.enqueue(priority, name.clone(), job) {
            Ok(TaskHandle { name, receiver: rx })
        } else {
            Err(SchedulerError::ShutDown)
        }
    }

    /// Submits fire-and-forget work. Silently dropped after shutdown.
    pub fn submit_detached<F>(&self, work: F, priority: TaskPriority, name: impl Into<String>)
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        if !self.shared.enqueue(priority, name.clone(), Box::new(work)) {
            tracing::debug!(task = %name, "detached task dropped: scheduler shut down");
        }
    }

    /// Current pool counters.
    pub fn stats(&self) -> SchedulerStats {
        let queued = self.shared.state.lock().queue.len();
        SchedulerStats {
            active_threads: self.shared.active_threads.load(Ordering::SeqCst),
            queued,
            running: self.shared.running.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Returns `true` while new work is accepted.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().accepting
    }

    /// Stops accepting work, lets workers drain the queue, and joins them.
    ///
    /// Idempotent. When called from inside a task, the calling worker is not
    /// joined; it exits on its own once its current task returns.
    pub fn shutdown(&self) {
        let was_accepting = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut state.accepting, false)
        };
        self.shared.available.notify_all();

        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        if was_accepting {
            tracing::info!("task scheduler shutting down");
        }

        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread exited abnormally");
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    /// Blocks the single worker until the returned sender is dropped or sent to.
    fn occupy_worker(scheduler: &TaskScheduler) -> crossbeam_channel::Sender<()> {
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        scheduler.submit_detached(
            move || {
                let _ = started_tx.send(());
                let _ = gate_rx.recv();
            },
            TaskPriority::Critical,
            "gate",
        );
        started_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("gate task should start");
        gate_tx
    }

    #[test]
    fn test_submit_returns_result() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let handle = scheduler.submit(|| 21 * 2).unwrap();
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_higher_priority_runs_first() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let gate = occupy_worker(&scheduler);

        let order = Arc::new(Mutex::new(Vec::new()));
        for (priority, label) in [
            (TaskPriority::Low, "low"),
            (TaskPriority::Normal, "normal"),
            (TaskPriority::Critical, "critical"),
            (TaskPriority::High, "high"),
        ] {
            let order = Arc::clone(&order);
            scheduler.submit_detached(move || order.lock().push(label), priority, label);
        }

        drop(gate);
        scheduler.shutdown();
        assert_eq!(*order.lock(), vec!["critical", "high", "normal", "low"]);
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let gate = occupy_worker(&scheduler);

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = Arc::clone(&order);
            scheduler.submit_detached(move || order.lock().push(i), TaskPriority::Normal, "n");
        }

        drop(gate);
        scheduler.shutdown();
        assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_is_counted_and_pool_survives() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let failing = scheduler
            .submit_priority(TaskPriority::High, "boom", || -> u32 { panic!("boom") })
            .unwrap();
        let result = failing.wait();
        assert!(matches!(result, Err(TaskError::Panicked { ref name, .. }) if name == "boom"));

        // The single worker must still be alive.
        let ok = scheduler.submit(|| "still alive").unwrap();
        assert_eq!(ok.wait(), Ok("still alive"));

        scheduler.shutdown();
        let stats = scheduler.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_thousand_detached_tasks_complete_after_shutdown() {
        let scheduler = TaskScheduler::new(4).unwrap();
        let priorities = [
            TaskPriority::Low,
            TaskPriority::Normal,
            TaskPriority::High,
            TaskPriority::Critical,
        ];
        let ran = Arc::new(AtomicUsize::new(0));

        for i in 0..1_000 {
            let ran = Arc::clone(&ran);
            let fail = i % 100 == 0;
            scheduler.submit_detached(
                move || {
                    if fail {
                        panic!("designed failure {i}");
                    }
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                priorities[i % priorities.len()],
                format!("task-{i}"),
            );
        }

        scheduler.shutdown();
        let stats = scheduler.stats();
        assert_eq!(stats.completed, 990);
        assert_eq!(stats.failed, 10);
        assert_eq!(ran.load(Ordering::SeqCst), 990);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.active_threads, 0);
    }

    #[test]
    fn test_submit_after_shutdown_fails_loudly() {
        let scheduler = TaskScheduler::new(2).unwrap();
        scheduler.shutdown();
        assert!(!scheduler.is_running());
        assert!(matches!(
            scheduler.submit(|| 1),
            Err(SchedulerError::ShutDown)
        ));
    }

    #[test]
    fn test_detached_after_shutdown_is_silent_noop() {
        let scheduler = TaskScheduler::new(2).unwrap();
        scheduler.shutdown();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        scheduler.submit_detached(move || flag.store(true, Ordering::SeqCst), TaskPriority::High, "late");
        std::thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(scheduler.stats().completed, 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = TaskScheduler::new(3).unwrap();
        scheduler.shutdown();
        scheduler.shutdown();
        assert_eq!(scheduler.stats().active_threads, 0);
    }

    #[test]
    fn test_shutdown_from_inside_task_does_not_deadlock() {
        let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
        let inner = Arc::clone(&scheduler);
        let handle = scheduler
            .submit_priority(TaskPriority::High, "self-shutdown", move || {
                inner.shutdown();
                "done"
            })
            .unwrap();

        let start = Instant::now();
        let result = handle.wait_timeout(Duration::from_secs(5));
        assert_eq!(result, Some(Ok("done")));
        assert!(start.elapsed() < Duration::from_secs(5));

        scheduler.shutdown();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let scheduler = TaskScheduler::new(1).unwrap();
        let gate = occupy_worker(&scheduler);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..25 {
            let ran = Arc::clone(&ran);
            scheduler.submit_detached(
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                TaskPriority::Low,
                "queued",
            );
        }
        assert!(scheduler.stats().queued >= 25);

        drop(gate);
        scheduler.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn test_zero_threads_means_hardware_parallelism() {
        let scheduler = TaskScheduler::new(0).unwrap();
        assert_eq!(scheduler.thread_count(), num_cpus::get().max(1));
    }
}
