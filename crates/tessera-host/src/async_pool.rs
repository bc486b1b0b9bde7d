//! Off-main worker pool
//!
//! A timer thread holds delayed work in a min-heap and waits on a condvar
//! until the earliest deadline (or until new work arrives). Due work is sent
//! over a channel to a fixed set of workers.

use crate::error::HostError;
use crate::task::{Executor, Work};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

struct Timed {
    at: Instant,
    seq: u64,
    work: Work,
}

// Reverse ordering for min-heap (earliest deadline first)
impl Ord for Timed {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timed {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Timed {}

struct TimerState {
    sleeping: BinaryHeap<Timed>,
    next_seq: u64,
}

/// Timer thread plus workers
pub struct AsyncPool {
    name: String,
    state: Mutex<TimerState>,
    notify: Condvar,
    sender: Mutex<Option<Sender<Work>>>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<ThreadId>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncPool {
    /// Spawn the timer thread and `workers` worker threads (at least one)
    pub fn spawn(name: impl Into<String>, workers: usize) -> Result<Arc<Self>, HostError> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Work>();
        let pool = Arc::new(Self {
            name: name.clone(),
            state: Mutex::new(TimerState {
                sleeping: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Condvar::new(),
            sender: Mutex::new(Some(sender)),
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        });

        let workers = workers.max(1);
        for id in 0..workers {
            let receiver = receiver.clone();
            let shutdown = Arc::clone(&pool.shutdown);
            if let Err(err) = pool.start_thread(format!("{}-worker-{}", name, id), move || {
                Self::worker_loop(receiver, shutdown)
            }) {
                pool.stop();
                return Err(err);
            }
        }

        let timer = Arc::clone(&pool);
        if let Err(err) = pool.start_thread(format!("{}-timer", name), move || timer.timer_loop()) {
            pool.stop();
            return Err(err);
        }

        info!(name = %name, workers, "async pool started");
        Ok(pool)
    }

    fn start_thread(
        &self,
        name: String,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<(), HostError> {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|source| HostError::Spawn { name, source })?;
        self.workers.lock().push(handle.thread().id());
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Whether the calling thread belongs to this pool
    pub fn is_pool_thread(&self) -> bool {
        let current = thread::current().id();
        self.workers.lock().contains(&current)
    }

    /// Delayed entries waiting on the timer
    pub fn sleeping(&self) -> usize {
        self.state.lock().sleeping.len()
    }

    /// Whether the pool has been stopped
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(AtomicOrdering::Acquire)
    }

    /// Run `work` on a worker after `delay`
    pub fn submit(&self, delay: Duration, work: Work) {
        if self.is_stopped() {
            debug!(name = %self.name, "work dropped by stopped async pool");
            return;
        }
        if delay.is_zero() {
            self.dispatch(work);
            return;
        }
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.sleeping.push(Timed {
            at: Instant::now() + delay,
            seq,
            work,
        });
        // The new entry may be earlier than the one the timer waits for
        self.notify.notify_one();
    }

    fn dispatch(&self, work: Work) {
        if let Some(sender) = self.sender.lock().as_ref() {
            // Fails only once every worker has exited
            let _ = sender.send(work);
        }
    }

    /// Stop every thread and drop all pending work
    pub fn stop(&self) {
        if self.shutdown.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        {
            let _state = self.state.lock();
            self.notify.notify_all();
        }
        self.sender.lock().take();

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        let dropped = std::mem::take(&mut self.state.lock().sleeping);
        info!(name = %self.name, dropped = dropped.len(), "async pool stopped");
    }

    fn timer_loop(&self) {
        loop {
            let mut state = self.state.lock();
            if self.is_stopped() {
                break;
            }

            let now = Instant::now();
            let mut due = Vec::new();
            while state.sleeping.peek().is_some_and(|entry| entry.at <= now) {
                if let Some(entry) = state.sleeping.pop() {
                    due.push(entry.work);
                }
            }
            if !due.is_empty() {
                drop(state);
                for work in due {
                    self.dispatch(work);
                }
                continue;
            }

            match state.sleeping.peek().map(|entry| entry.at) {
                Some(at) => {
                    self.notify.wait_until(&mut state, at);
                }
                None => self.notify.wait(&mut state),
            }
        }
    }

    fn worker_loop(receiver: Receiver<Work>, shutdown: Arc<AtomicBool>) {
        for work in receiver.iter() {
            if shutdown.load(AtomicOrdering::Acquire) {
                break;
            }
            if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                error!("async work panicked");
            }
        }
    }
}

impl Executor for AsyncPool {
    type Delay = Duration;

    fn schedule(&self, delay: Duration, work: Work) {
        self.submit(delay, work);
    }
}

impl Drop for AsyncPool {
    fn drop(&mut self) {
        self.stop();
    }
}
