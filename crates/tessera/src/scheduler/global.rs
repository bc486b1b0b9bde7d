use super::submit_to;
use crate::backend::{ContextBinding, ServerBackend};
use crate::host::Schedule;
use crate::task::TaskHandle;
use crate::world::Owner;
use std::fmt;
use std::sync::Arc;

/// Schedules work on the host's global context.
///
/// On a single-thread host this is the primary thread; on a region-threaded
/// host it is the global region, which owns no chunks.
#[derive(Clone)]
pub struct GlobalScheduler {
    owner: Owner,
    binding: Arc<dyn ContextBinding>,
    backend: Arc<dyn ServerBackend>,
}

impl GlobalScheduler {
    pub(crate) fn new(owner: Owner, backend: Arc<dyn ServerBackend>) -> Self {
        Self {
            owner,
            binding: backend.global(),
            backend,
        }
    }

    /// Run `run` at the next tick, without a handle
    pub fn execute(&self, run: impl FnOnce() + Send + 'static) {
        self.binding.execute(Box::new(run));
    }

    /// Run `body` at the next tick
    pub fn run<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, Schedule::Now)
    }

    /// Run `body` once after `delay` ticks
    pub fn run_delayed<T, F>(&self, body: F, delay: u64) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, Schedule::Delayed(delay))
    }

    /// Run `body` after `delay` ticks, then every `period` ticks until cancelled
    pub fn run_at_fixed_rate<T, F>(&self, body: F, delay: u64, period: u64) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, Schedule::FixedRate { delay, period })
    }

    /// Cancel the owner's global tasks.
    ///
    /// A single-thread host cannot tell global tasks apart from the owner's
    /// other tasks and cancels all of them.
    pub fn cancel_tasks(&self) {
        self.backend.cancel_global_tasks();
    }

    fn schedule<T, F>(&self, body: F, schedule: Schedule<u64>) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        submit_to(&self.owner, self.binding.as_ref(), "global", body, schedule)
    }
}

impl fmt::Debug for GlobalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalScheduler")
            .field("owner", &self.owner)
            .field("backend", &self.backend.kind())
            .finish()
    }
}
