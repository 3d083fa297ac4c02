//! Worker pool, safe executor and system profiler.
//!
//! The pool owns dedicated OS threads; it is never shared with any global
//! work pool. The safe executor inlines work on the submitting thread when
//! the queue is saturated or when the caller is the main thread and the item
//! is short.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use crossbeam::queue::SegQueue;
use crossbeam::sync::WaitGroup;

use crate::system::SystemId;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// How many queued items per worker before submissions inline.
const SATURATION_PER_WORKER: usize = 4;

/// Fixed-size pool of dedicated worker threads.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
    saturation_threshold: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = channel::unbounded::<Task>();
        let pending = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = receiver.clone();
            let pending = Arc::clone(&pending);
            workers.push(
                thread::Builder::new()
                    .name(format!("ecs-worker-{index}"))
                    .spawn(move || {
                        while let Ok(task) = receiver.recv() {
                            task();
                            pending.fetch_sub(1, Ordering::AcqRel);
                        }
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        Self {
            sender: Some(sender),
            workers,
            pending,
            saturation_threshold: worker_count * SATURATION_PER_WORKER,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of submitted-but-unfinished items.
    pub fn queue_depth(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_saturated(&self) -> bool {
        self.queue_depth() >= self.saturation_threshold
    }

    /// Submit a fire-and-forget task.
    pub fn submit(&self, task: Task) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        match &self.sender {
            Some(sender) if sender.send(task).is_ok() => {}
            _ => {
                // Pool is shutting down; undo the accounting and drop the task.
                self.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Fan borrowed tasks across the workers and block until all complete.
    ///
    /// The calling thread drains the scope's own queue alongside the
    /// workers, so a scope opened from inside a pool task cannot deadlock
    /// behind itself.
    pub fn scope<'scope>(&self, tasks: Vec<Box<dyn FnOnce() + Send + 'scope>>) {
        if tasks.is_empty() {
            return;
        }

        let wg = WaitGroup::new();
        let queue = Arc::new(SegQueue::new());
        for task in tasks {
            // SAFETY: `wg.wait()` below blocks until every queued task has
            // run and dropped its guard, so no task outlives the 'scope
            // borrows it captures despite the lifetime extension.
            let task: Task = unsafe {
                std::mem::transmute::<Box<dyn FnOnce() + Send + 'scope>, Task>(task)
            };
            queue.push((task, wg.clone()));
        }

        let drain = |queue: &SegQueue<(Task, WaitGroup)>| {
            while let Some((task, guard)) = queue.pop() {
                task();
                drop(guard);
            }
        };

        let helpers = self.worker_count().min(queue.len()).saturating_sub(1);
        for _ in 0..helpers {
            let queue = Arc::clone(&queue);
            self.submit(Box::new(move || {
                while let Some((task, guard)) = queue.pop() {
                    task();
                    drop(guard);
                }
            }));
        }

        drain(&queue);
        wg.wait();
    }

    /// Stop accepting submissions and join workers, bounded by `timeout`.
    /// Workers still running at the deadline are detached.
    pub fn shutdown(&mut self, timeout: Duration) {
        self.sender.take();

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.workers.iter().all(|w| w.is_finished()) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        for worker in self.workers.drain(..) {
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                tracing::warn!("worker still busy at shutdown deadline; detaching");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown(Duration::from_millis(250));
        }
    }
}

/// Pool wrapper that degrades to inline execution.
#[derive(Clone)]
pub struct SafeExecutor {
    pool: Option<Arc<WorkerPool>>,
    main_thread: ThreadId,
}

impl SafeExecutor {
    /// `pool` may be `None` (worker_count 0 or the `parallel` feature off);
    /// everything then runs inline on the submitting thread.
    pub fn new(pool: Option<Arc<WorkerPool>>) -> Self {
        Self {
            pool,
            main_thread: thread::current().id(),
        }
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    pub fn has_workers(&self) -> bool {
        self.pool.is_some()
    }

    /// Run a batch of borrowed tasks to completion. Falls back to inline
    /// sequential execution when the pool is absent or saturated.
    pub fn run_scoped<'scope>(&self, tasks: Vec<Box<dyn FnOnce() + Send + 'scope>>) {
        match &self.pool {
            Some(pool) if !pool.is_saturated() => pool.scope(tasks),
            _ => {
                for task in tasks {
                    task();
                }
            }
        }
    }

    /// Submit one task; `short` items from the main thread are inlined
    /// rather than paying the queue round-trip.
    pub fn execute(&self, short: bool, task: Task) {
        let inline = match &self.pool {
            None => true,
            Some(pool) => {
                pool.is_saturated() || (short && thread::current().id() == self.main_thread)
            }
        };

        match (&self.pool, inline) {
            (_, true) => task(),
            (Some(pool), false) => pool.submit(task),
            (None, false) => unreachable!(),
        }
    }
}

/// Aggregated timing for one system.
#[derive(Debug, Clone)]
pub struct SystemStats {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub call_count: u64,
}

#[derive(Debug, Default)]
struct ProfileAccumulator {
    total: Duration,
    min: Duration,
    max: Duration,
    calls: u64,
}

/// Collects per-system timing; the scheduler's frame-budget gate reads the
/// recorded averages.
#[derive(Default)]
pub struct SystemProfiler {
    accumulators: HashMap<SystemId, ProfileAccumulator>,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(&mut self, id: SystemId, duration: Duration) {
        let acc = self.accumulators.entry(id).or_default();
        if acc.calls == 0 {
            acc.min = duration;
            acc.max = duration;
        } else {
            acc.min = acc.min.min(duration);
            acc.max = acc.max.max(duration);
        }
        acc.total += duration;
        acc.calls += 1;
    }

    pub fn get_stats(&self, id: SystemId) -> Option<SystemStats> {
        let acc = self.accumulators.get(&id)?;
        if acc.calls == 0 {
            return None;
        }
        Some(SystemStats {
            min: acc.min,
            max: acc.max,
            avg: acc.total / acc.calls as u32,
            call_count: acc.calls,
        })
    }

    /// Recorded average in nanoseconds, if the system has run.
    pub fn average_nanos(&self, id: SystemId) -> Option<u64> {
        let acc = self.accumulators.get(&id)?;
        if acc.calls == 0 {
            return None;
        }
        Some((acc.total.as_nanos() / acc.calls as u128) as u64)
    }

    pub fn clear(&mut self) {
        self.accumulators.clear();
    }
}
