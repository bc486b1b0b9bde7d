use super::job;
use crate::backend::EntityBinding;
use crate::host::{Retired, Schedule};
use crate::task::TaskHandle;
use crate::world::{EntityRef, Owner};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default delay of [`EntityScheduler::execute`], in ticks
pub const DEFAULT_EXECUTE_DELAY: u64 = 1;

/// Schedules work on whichever context currently owns one entity.
///
/// The entity may be removed at any time. A removal observed when work is
/// submitted yields no handle; a removal observed when the work comes due
/// skips the body and stops the task. Either way the optional [`Retired`]
/// hook is fired, at most once. The hook is a cleanup courtesy: depending on
/// timing it may not run at all.
#[derive(Clone)]
pub struct EntityScheduler {
    owner: Owner,
    entity: EntityRef,
    binding: Arc<dyn EntityBinding>,
}

impl EntityScheduler {
    pub(crate) fn new(owner: Owner, entity: EntityRef, binding: Arc<dyn EntityBinding>) -> Self {
        Self {
            owner,
            entity,
            binding,
        }
    }

    /// The entity this scheduler follows
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Run `run` after `delay` ticks, without a handle.
    ///
    /// Returns `false` if the entity is already removed, in which case
    /// `retired` has been fired.
    pub fn execute(
        &self,
        run: impl FnOnce() + Send + 'static,
        retired: Option<Retired>,
        delay: u64,
    ) -> bool {
        let retired = retired.unwrap_or_default();
        if !self.entity.is_valid() {
            self.retire(&retired);
            return false;
        }
        let accepted = self.binding.execute(Box::new(run), retired.clone(), delay);
        if !accepted {
            self.retire(&retired);
        }
        accepted
    }

    /// Run `body` at the entity's next tick
    pub fn run<T, F>(&self, body: F, retired: Option<Retired>) -> Option<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, retired, Schedule::Now)
    }

    /// Run `body` once after `delay` ticks
    pub fn run_delayed<T, F>(
        &self,
        body: F,
        retired: Option<Retired>,
        delay: u64,
    ) -> Option<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, retired, Schedule::Delayed(delay))
    }

    /// Run `body` after `delay` ticks, then every `period` ticks until
    /// cancelled or the entity is removed
    pub fn run_at_fixed_rate<T, F>(
        &self,
        body: F,
        retired: Option<Retired>,
        delay: u64,
        period: u64,
    ) -> Option<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        self.schedule(body, retired, Schedule::FixedRate { delay, period })
    }

    fn schedule<T, F>(
        &self,
        body: F,
        retired: Option<Retired>,
        schedule: Schedule<u64>,
    ) -> Option<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        let retired = retired.unwrap_or_default();
        if !self.entity.is_valid() {
            self.retire(&retired);
            return None;
        }

        let handle = TaskHandle::new(self.owner.clone(), schedule.is_repeating());
        match self
            .binding
            .submit(job(&handle, body), retired.clone(), schedule)
        {
            Some(task) => {
                handle.bind(&task);
                debug!(
                    owner = %self.owner,
                    context = "entity",
                    entity = self.entity.id().0,
                    task = task.id(),
                    ?schedule,
                    "task submitted"
                );
                Some(handle)
            }
            None => {
                self.retire(&retired);
                None
            }
        }
    }

    fn retire(&self, retired: &Retired) {
        warn!(
            owner = %self.owner,
            entity = self.entity.id().0,
            "scheduling target already removed"
        );
        retired.fire();
    }
}

impl fmt::Debug for EntityScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityScheduler")
            .field("owner", &self.owner)
            .field("entity", &self.entity.id())
            .finish()
    }
}
