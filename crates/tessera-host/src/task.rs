//! Host-side tasks
//!
//! A [`SimTask`] is the host's unit of work. Its state is a single atomic
//! byte advanced by compare-and-swap, so cancellation from any thread races
//! cleanly with the executing thread:
//!
//! ```text
//! Idle ──begin──▶ Running ──end──▶ Idle (repeating) / Finished
//!  │                 │
//! cancel           cancel
//!  ▼                 ▼
//! Cancelled ◀─end── CancelledRunning
//! ```
//!
//! Jobs are owned by the executor queues, never by the task, so a handle that
//! keeps its task alive never keeps its job alive.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tessera::{ExecutionState, Owner, Schedule, ScheduledTask};
use tracing::{debug, error};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED_RUNNING: u8 = 2;
const CANCELLED: u8 = 3;
const FINISHED: u8 = 4;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of work scheduled on a reference host
#[derive(Debug)]
pub struct SimTask {
    id: u64,
    owner: Owner,
    repeating: bool,
    state: AtomicU8,
}

impl SimTask {
    /// Create an idle task with a fresh identifier
    pub fn new(owner: Owner, repeating: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            owner,
            repeating,
            state: AtomicU8::new(IDLE),
        })
    }

    /// Start a run. Fails unless the task is idle.
    pub fn begin(&self) -> bool {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Finish a run, honoring a cancellation that arrived mid-run
    pub fn end(&self) -> ExecutionState {
        let after = if self.repeating { IDLE } else { FINISHED };
        match self
            .state
            .compare_exchange(RUNNING, after, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => decode(after),
            Err(CANCELLED_RUNNING) => {
                self.state.store(CANCELLED, Ordering::Release);
                ExecutionState::Cancelled
            }
            Err(other) => decode(other),
        }
    }

    /// Whether another run should be scheduled
    pub fn should_repeat(&self) -> bool {
        self.repeating && self.state.load(Ordering::Acquire) == IDLE
    }
}

fn decode(state: u8) -> ExecutionState {
    match state {
        IDLE => ExecutionState::Idle,
        RUNNING => ExecutionState::Running,
        CANCELLED_RUNNING => ExecutionState::CancelledRunning,
        CANCELLED => ExecutionState::Cancelled,
        _ => ExecutionState::Finished,
    }
}

impl ScheduledTask for SimTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn cancel(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => CANCELLED,
                RUNNING => CANCELLED_RUNNING,
                _ => return,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    debug!(task = self.id, owner = %self.owner, "task cancelled");
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn execution_state(&self) -> ExecutionState {
        decode(self.state.load(Ordering::Acquire))
    }

    fn is_repeating(&self) -> bool {
        self.repeating
    }
}

/// Owner-indexed weak references to live tasks
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<FxHashMap<Owner, Vec<Weak<SimTask>>>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `task` under its owner, dropping entries that are gone
    pub fn register(&self, task: &Arc<SimTask>) {
        let mut tasks = self.tasks.lock();
        let owned = tasks.entry(task.owner.clone()).or_default();
        owned.retain(|weak| weak.upgrade().is_some_and(|task| is_live(&task)));
        owned.push(Arc::downgrade(task));
    }

    /// Cancel every live task of `owner`. Returns how many were cancelled.
    pub fn cancel_owner(&self, owner: &Owner) -> usize {
        let owned = self.tasks.lock().remove(owner).unwrap_or_default();
        let mut cancelled = 0;
        for task in owned.iter().filter_map(Weak::upgrade) {
            if is_live(&task) {
                task.cancel();
                cancelled += 1;
            }
        }
        debug!(owner = %owner, cancelled, "owner tasks cancelled");
        cancelled
    }

    /// Number of live tasks tracked for `owner`
    pub fn live_count(&self, owner: &Owner) -> usize {
        self.tasks.lock().get(owner).map_or(0, |owned| {
            owned
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|task| is_live(task))
                .count()
        })
    }
}

fn is_live(task: &SimTask) -> bool {
    !matches!(
        task.execution_state(),
        ExecutionState::Cancelled | ExecutionState::Finished
    )
}

/// Host job invoked once per run
pub type HostJob = Box<dyn FnMut() + Send>;

/// One-shot unit an executor runs
pub type Work = Box<dyn FnOnce() + Send>;

/// Something that runs work after a delay
pub trait Executor: Send + Sync + 'static {
    /// Delay unit: ticks or wall-clock time
    type Delay: Copy + Send + 'static;

    /// Run `work` after `delay`
    fn schedule(&self, delay: Self::Delay, work: Work);
}

/// First delay and optional period of `schedule`; `now` stands in for an
/// immediate run
pub fn timing<D>(schedule: Schedule<D>, now: D) -> (D, Option<D>) {
    match schedule {
        Schedule::Now => (now, None),
        Schedule::Delayed(delay) => (delay, None),
        Schedule::FixedRate { delay, period } => (delay, Some(period)),
    }
}

/// Run `job` for `task` once. Returns whether the task wants another run.
///
/// A panicking job is logged and counted as a finished run.
pub fn run_once(task: &SimTask, job: &mut (dyn FnMut() + Send)) -> bool {
    if !task.begin() {
        return false;
    }
    if panic::catch_unwind(AssertUnwindSafe(|| job())).is_err() {
        error!(task = task.id, owner = %task.owner, "host job panicked");
    }
    task.end();
    task.should_repeat()
}

/// Drive `task` on `executor`: first after `delay`, then every `period`
/// until it is cancelled
pub fn drive<E: Executor>(
    executor: Arc<E>,
    task: Arc<SimTask>,
    mut job: HostJob,
    delay: E::Delay,
    period: Option<E::Delay>,
) {
    let next = Arc::clone(&executor);
    executor.schedule(
        delay,
        Box::new(move || {
            if run_once(&task, job.as_mut()) {
                if let Some(period) = period {
                    drive(next, task, job, period, Some(period));
                }
            }
        }),
    );
}
