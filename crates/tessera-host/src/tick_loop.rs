//! A thread that ticks
//!
//! Each loop owns one OS thread. Every `interval` it advances its tick
//! counter and runs the work due at that tick, in submission order. Work
//! scheduled with delay `d` runs at tick `now + max(d, 1)`, so even a zero
//! delay means "next tick" and a job never runs inside the call that
//! scheduled it.

use crate::error::HostError;
use crate::task::{Executor, Work};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Work waiting for its tick
struct Entry {
    due: u64,
    seq: u64,
    work: Work,
}

// Reverse ordering for min-heap (earliest tick, then earliest submission)
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

struct LoopState {
    pending: BinaryHeap<Entry>,
    next_seq: u64,
}

/// One ticking thread
pub struct TickLoop {
    name: String,
    interval: Duration,
    tick: AtomicU64,
    state: Mutex<LoopState>,
    /// Wakes the thread early for shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    thread: Mutex<Option<ThreadId>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TickLoop {
    /// Spawn a loop thread named `name`
    pub fn spawn(name: impl Into<String>, interval: Duration) -> Result<Arc<Self>, HostError> {
        let name = name.into();
        let tick_loop = Arc::new(Self {
            name: name.clone(),
            interval,
            tick: AtomicU64::new(0),
            state: Mutex::new(LoopState {
                pending: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
            handle: Mutex::new(None),
        });

        let runner = Arc::clone(&tick_loop);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || runner.run_loop())
            .map_err(|source| HostError::Spawn {
                name: name.clone(),
                source,
            })?;
        *tick_loop.thread.lock() = Some(handle.thread().id());
        *tick_loop.handle.lock() = Some(handle);

        info!(name = %name, interval_ms = interval.as_millis() as u64, "tick loop started");
        Ok(tick_loop)
    }

    /// Name of the loop thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticks completed so far
    pub fn current_tick(&self) -> u64 {
        self.tick.load(AtomicOrdering::Acquire)
    }

    /// Whether the calling thread is this loop's thread
    pub fn is_current(&self) -> bool {
        *self.thread.lock() == Some(thread::current().id())
    }

    /// Number of scheduled entries not yet run
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether the loop has been stopped
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(AtomicOrdering::Acquire)
    }

    /// Run `work` after `delay` ticks (at least one)
    pub fn schedule_in(&self, delay: u64, work: Work) {
        if self.is_stopped() {
            debug!(name = %self.name, "work dropped by stopped tick loop");
            return;
        }
        let mut state = self.state.lock();
        let due = self.current_tick().saturating_add(delay.max(1));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(Entry { due, seq, work });
    }

    /// Stop the thread and drop all pending work
    pub fn stop(&self) {
        if self.shutdown.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        {
            let _state = self.state.lock();
            self.notify.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        let dropped = std::mem::take(&mut self.state.lock().pending);
        info!(name = %self.name, dropped = dropped.len(), "tick loop stopped");
    }

    fn run_loop(&self) {
        let mut next_tick = Instant::now() + self.interval;
        loop {
            let due = {
                let mut state = self.state.lock();
                while !self.is_stopped() && Instant::now() < next_tick {
                    self.notify.wait_until(&mut state, next_tick);
                }
                if self.is_stopped() {
                    break;
                }

                let tick = self.tick.fetch_add(1, AtomicOrdering::AcqRel) + 1;
                let mut due = Vec::new();
                while state.pending.peek().is_some_and(|entry| entry.due <= tick) {
                    if let Some(entry) = state.pending.pop() {
                        due.push(entry.work);
                    }
                }
                due
            };

            for work in due {
                if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                    error!(name = %self.name, "tick work panicked");
                }
            }

            next_tick += self.interval;
            let now = Instant::now();
            if next_tick < now {
                // Overran; do not try to catch up
                next_tick = now;
            }
        }
    }
}

impl Executor for TickLoop {
    type Delay = u64;

    fn schedule(&self, delay: u64, work: Work) {
        self.schedule_in(delay, work);
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn spawn() -> Arc<TickLoop> {
        TickLoop::spawn("test-loop", Duration::from_millis(2)).unwrap()
    }

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_runs_scheduled_work() {
        let tick_loop = spawn();
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        tick_loop.schedule_in(0, Box::new(move || flag.store(true, AtomicOrdering::SeqCst)));
        wait_for(|| done.load(AtomicOrdering::SeqCst));
        assert!(done.load(AtomicOrdering::SeqCst));
        tick_loop.stop();
    }

    #[test]
    fn test_runs_on_loop_thread() {
        let tick_loop = spawn();
        assert!(!tick_loop.is_current());
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let inner = Arc::clone(&tick_loop);
        tick_loop.schedule_in(
            1,
            Box::new(move || flag.store(inner.is_current(), AtomicOrdering::SeqCst)),
        );
        wait_for(|| seen.load(AtomicOrdering::SeqCst));
        assert!(seen.load(AtomicOrdering::SeqCst));
        tick_loop.stop();
    }

    #[test]
    fn test_submission_order_within_tick() {
        let tick_loop = spawn();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            tick_loop.schedule_in(3, Box::new(move || order.lock().push(i)));
        }
        wait_for(|| order.lock().len() == 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        tick_loop.stop();
    }

    #[test]
    fn test_delay_in_ticks() {
        let tick_loop = spawn();
        let ran_at = Arc::new(AtomicU64::new(0));
        let start = tick_loop.current_tick();
        let slot = Arc::clone(&ran_at);
        let inner = Arc::clone(&tick_loop);
        tick_loop.schedule_in(
            5,
            Box::new(move || slot.store(inner.current_tick(), AtomicOrdering::SeqCst)),
        );
        wait_for(|| ran_at.load(AtomicOrdering::SeqCst) > 0);
        assert!(ran_at.load(AtomicOrdering::SeqCst) >= start + 5);
        tick_loop.stop();
    }

    #[test]
    fn test_panicking_work_does_not_kill_loop() {
        let tick_loop = spawn();
        let runs = Arc::new(AtomicUsize::new(0));
        tick_loop.schedule_in(1, Box::new(|| panic!("bad work")));
        let counter = Arc::clone(&runs);
        tick_loop.schedule_in(2, Box::new(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        wait_for(|| runs.load(AtomicOrdering::SeqCst) == 1);
        assert_eq!(runs.load(AtomicOrdering::SeqCst), 1);
        tick_loop.stop();
    }

    #[test]
    fn test_stop_drops_pending_work() {
        let tick_loop = spawn();
        tick_loop.schedule_in(1_000_000, Box::new(|| {}));
        assert_eq!(tick_loop.pending(), 1);
        tick_loop.stop();
        assert!(tick_loop.is_stopped());
        assert_eq!(tick_loop.pending(), 0);

        tick_loop.schedule_in(1, Box::new(|| {}));
        assert_eq!(tick_loop.pending(), 0);
    }
}
