use super::job;
use crate::backend::AsyncBinding;
use crate::host::Schedule;
use crate::task::TaskHandle;
use crate::world::Owner;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Schedules work off the world threads, with wall-clock delays.
///
/// Bodies must not touch world state directly; hand results back through a
/// region or entity scheduler.
#[derive(Clone)]
pub struct AsyncScheduler {
    owner: Owner,
    binding: Arc<dyn AsyncBinding>,
}

impl AsyncScheduler {
    pub(crate) fn new(owner: Owner, binding: Arc<dyn AsyncBinding>) -> Self {
        Self { owner, binding }
    }

    /// Run `run` as soon as a worker is free, without a handle
    pub fn execute(&self, run: impl FnOnce() + Send + 'static) {
        self.binding.execute(Box::new(run));
    }

    /// Run `body` as soon as a worker is free
    pub fn run<T, F>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, Schedule::Now)
    }

    /// Run `body` once after `delay`
    pub fn run_delayed<T, F>(&self, body: F, delay: Duration) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, Schedule::Delayed(delay))
    }

    /// Run `body` after `delay`, then every `period` until cancelled
    pub fn run_at_fixed_rate<T, F>(&self, body: F, delay: Duration, period: Duration) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, Schedule::FixedRate { delay, period })
    }

    /// Cancel the owner's async tasks.
    ///
    /// A single-thread host cancels every task of the owner.
    pub fn cancel_tasks(&self) {
        self.binding.cancel_tasks();
    }

    fn schedule<T, F>(&self, body: F, schedule: Schedule<Duration>) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        let handle = TaskHandle::new(self.owner.clone(), schedule.is_repeating());
        let task = self.binding.submit(job(&handle, body), schedule);
        handle.bind(&task);
        debug!(owner = %self.owner, context = "async", task = task.id(), ?schedule, "task submitted");
        handle
    }
}

impl fmt::Debug for AsyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncScheduler")
            .field("owner", &self.owner)
            .finish()
    }
}
