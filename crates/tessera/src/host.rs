//! Host collaborator interfaces
//!
//! A host is the game server process that owns the real executors. Two
//! families exist:
//!
//! - [`TickHost`]: every in-world task runs on one primary thread, plus an
//!   async lane for off-main work. Submissions return a [`TaskRef`] the caller
//!   binds after the fact; bodies are not told which task they belong to.
//! - [`RegionizedHost`]: the world is split into regions ticked by independent
//!   threads. Submissions return a [`TaskRef`] *and* hand the same reference
//!   to the job on every run, so a body can observe its own task even when it
//!   fires before the submitting call has returned.
//!
//! [`Host`] exposes the feature probe the backend selector consumes once at
//! startup.

use crate::task::Completion;
use crate::world::{Chunk, EntityRef, Location, Owner, OwnershipTarget, TeleportCause};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Execution state of a host-scheduled unit of work
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    /// Waiting for its next run
    Idle,
    /// The body is executing
    Running,
    /// Cancelled while the body was executing; the current run completes
    CancelledRunning,
    /// Cancelled; will not run again
    Cancelled,
    /// A one-shot task that has run
    Finished,
}

impl ExecutionState {
    /// Running, or honoring a cancellation mid-execution
    pub fn is_running(self) -> bool {
        matches!(self, ExecutionState::Running | ExecutionState::CancelledRunning)
    }

    /// Cancelled, whether or not a run is still in flight
    pub fn is_cancelled(self) -> bool {
        matches!(
            self,
            ExecutionState::Cancelled | ExecutionState::CancelledRunning
        )
    }
}

/// An opaque, cancellable reference to a unit of work owned by the host
pub trait ScheduledTask: Send + Sync + fmt::Debug {
    /// Host-assigned identifier
    fn id(&self) -> u64;

    /// Owner the task was submitted for
    fn owner(&self) -> &Owner;

    /// Request cancellation. Idempotent; a run already in flight completes.
    fn cancel(&self);

    /// Whether cancellation has been requested and honored
    fn is_cancelled(&self) -> bool {
        self.execution_state().is_cancelled()
    }

    /// Current execution state
    fn execution_state(&self) -> ExecutionState;

    /// Whether the task repeats at a fixed rate
    fn is_repeating(&self) -> bool;
}

/// Shared reference to a host task
pub type TaskRef = Arc<dyn ScheduledTask>;

/// When a submitted task first runs and whether it repeats.
///
/// `D` is ticks (`u64`) for in-world schedulers and [`Duration`] for async ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Schedule<D> {
    /// At the next opportunity
    Now,
    /// Once, after a delay
    Delayed(D),
    /// First after `delay`, then every `period` until cancelled
    FixedRate {
        /// Initial delay
        delay: D,
        /// Interval between runs
        period: D,
    },
}

impl<D> Schedule<D> {
    /// Whether this schedule repeats
    pub fn is_repeating(&self) -> bool {
        matches!(self, Schedule::FixedRate { .. })
    }

    /// Convert the delay/period unit
    pub fn map<E>(self, mut f: impl FnMut(D) -> E) -> Schedule<E> {
        match self {
            Schedule::Now => Schedule::Now,
            Schedule::Delayed(delay) => Schedule::Delayed(f(delay)),
            Schedule::FixedRate { delay, period } => Schedule::FixedRate {
                delay: f(delay),
                period: f(period),
            },
        }
    }
}

/// Fire-and-forget work
pub type Runnable = Box<dyn FnOnce() + Send>;

/// Work submitted to a [`TickHost`]; invoked once per run
pub type TickJob = Box<dyn FnMut() + Send>;

/// Work submitted to a [`RegionizedHost`]; receives its own task on every run
pub type RegionJob = Box<dyn FnMut(&TaskRef) + Send>;

/// At-most-once callback for a scheduling target that became invalid.
///
/// All clones share one slot: whichever clone fires first runs the callback,
/// every later [`fire`](Retired::fire) is a no-op. Best effort only: callers
/// must not rely on it for correctness, only for cleanup.
#[derive(Clone, Default)]
pub struct Retired {
    hook: Option<Arc<Mutex<Option<Runnable>>>>,
}

impl Retired {
    /// Wrap a callback
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            hook: Some(Arc::new(Mutex::new(Some(Box::new(callback))))),
        }
    }

    /// No callback
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether a callback was supplied
    pub fn is_set(&self) -> bool {
        self.hook.is_some()
    }

    /// Run the callback if it has not run yet. Returns whether it ran.
    pub fn fire(&self) -> bool {
        let callback = match &self.hook {
            Some(hook) => hook.lock().take(),
            None => None,
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Retired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retired").field("set", &self.is_set()).finish()
    }
}

/// Execution lane of a [`TickHost`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Lane {
    /// The primary game thread
    Main,
    /// The host's off-main worker pool
    Async,
}

/// A host that runs all world logic on a single primary thread
pub trait TickHost: Send + Sync {
    /// Submit `job` on `lane`. A delay of zero means the next tick.
    fn run_task(&self, owner: &Owner, lane: Lane, job: TickJob, schedule: Schedule<u64>)
        -> TaskRef;

    /// Cancel every task `owner` has submitted, on every lane
    fn cancel_tasks(&self, owner: &Owner);

    /// Whether the calling thread is the primary game thread
    fn is_primary_thread(&self) -> bool;

    /// Length of one tick in milliseconds, when the host paces its own ticks
    fn tick_millis(&self) -> Option<u64> {
        None
    }

    /// Native asynchronous teleport, if the host has one
    fn teleport_async(
        &self,
        _entity: &EntityRef,
        _location: &Location,
        _cause: TeleportCause,
    ) -> Option<Completion<bool>> {
        None
    }
}

/// A host that ticks spatial regions on independent threads.
///
/// Delays are in ticks and must be at least one.
pub trait RegionizedHost: Send + Sync {
    /// Run on the global region at the next tick
    fn global_execute(&self, owner: &Owner, run: Runnable);

    /// Submit to the global region
    fn global_run(&self, owner: &Owner, job: RegionJob, schedule: Schedule<u64>) -> TaskRef;

    /// Cancel the owner's global-region tasks
    fn global_cancel_tasks(&self, owner: &Owner);

    /// Run on the region owning `chunk` at the next tick
    fn region_execute(&self, owner: &Owner, chunk: &Chunk, run: Runnable);

    /// Submit to the region owning `chunk`
    fn region_run(
        &self,
        owner: &Owner,
        chunk: &Chunk,
        job: RegionJob,
        schedule: Schedule<u64>,
    ) -> TaskRef;

    /// Run on the entity's region after `delay` ticks, or fire `retired` if the
    /// entity is removed first. Returns `false` if the entity is already invalid.
    fn entity_execute(
        &self,
        owner: &Owner,
        entity: &EntityRef,
        run: Runnable,
        retired: Retired,
        delay: u64,
    ) -> bool;

    /// Submit to whichever region owns the entity at each run. Returns `None`
    /// if the entity is already invalid. If it becomes invalid later the host
    /// skips the body, fires `retired`, and stops the task.
    fn entity_run(
        &self,
        owner: &Owner,
        entity: &EntityRef,
        job: RegionJob,
        retired: Retired,
        schedule: Schedule<u64>,
    ) -> Option<TaskRef>;

    /// Submit off the region threads
    fn async_run(&self, owner: &Owner, job: RegionJob, schedule: Schedule<Duration>) -> TaskRef;

    /// Cancel the owner's async tasks
    fn async_cancel_tasks(&self, owner: &Owner);

    /// Whether the calling thread ticks the region(s) covering `target`
    fn is_owned_by_current_region(&self, target: OwnershipTarget<'_>) -> bool;

    /// Teleport with chunk loading off the region thread
    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool>;
}

/// Capability markers a host can be probed for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Regions are ticked by independent threads
    RegionThreading,
}

/// Entry point a [`Server`](crate::Server) is constructed against
pub trait Host: Send + Sync {
    /// Probe for a capability marker
    fn has_feature(&self, feature: Feature) -> bool;

    /// The single-thread family, if this host provides it
    fn tick_host(&self) -> Option<Arc<dyn TickHost>>;

    /// The per-region family, if this host provides it
    fn regionized_host(&self) -> Option<Arc<dyn RegionizedHost>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_execution_state_predicates() {
        assert!(ExecutionState::Running.is_running());
        assert!(ExecutionState::CancelledRunning.is_running());
        assert!(!ExecutionState::Idle.is_running());

        assert!(ExecutionState::Cancelled.is_cancelled());
        assert!(ExecutionState::CancelledRunning.is_cancelled());
        assert!(!ExecutionState::Finished.is_cancelled());
    }

    #[test]
    fn test_schedule_map() {
        let schedule = Schedule::FixedRate {
            delay: Duration::from_secs(1),
            period: Duration::from_millis(500),
        };
        assert!(schedule.is_repeating());
        let ticks = schedule.map(|d| d.as_millis() as u64 / 50);
        assert_eq!(ticks, Schedule::FixedRate { delay: 20, period: 10 });

        assert!(!Schedule::Delayed(3u64).is_repeating());
        assert_eq!(Schedule::<u64>::Now.map(|d| d + 1), Schedule::Now);
    }

    #[test]
    fn test_retired_fires_once_across_clones() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let retired = Retired::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let clone = retired.clone();

        assert!(retired.is_set());
        assert!(clone.fire());
        assert!(!retired.fire());
        assert!(!clone.fire());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retired_none() {
        let retired = Retired::none();
        assert!(!retired.is_set());
        assert!(!retired.fire());
    }
}
