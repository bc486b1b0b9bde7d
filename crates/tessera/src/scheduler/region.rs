use super::submit_to;
use crate::backend::ContextBinding;
use crate::host::Schedule;
use crate::task::TaskHandle;
use crate::world::{Chunk, Owner};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Schedules work on the region that owns one chunk.
///
/// Two schedulers compare equal when they belong to the same owner and are
/// keyed by the same chunk, however they were obtained.
#[derive(Clone)]
pub struct RegionScheduler {
    owner: Owner,
    key: Chunk,
    binding: Arc<dyn ContextBinding>,
}

impl RegionScheduler {
    pub(crate) fn new(owner: Owner, key: Chunk, binding: Arc<dyn ContextBinding>) -> Self {
        Self {
            owner,
            key,
            binding,
        }
    }

    /// The chunk this scheduler is bound to
    pub fn key(&self) -> &Chunk {
        &self.key
    }

    /// Run `run` at the next tick of the region, without a handle
    pub fn execute(&self, run: impl FnOnce() + Send + 'static) {
        self.binding.execute(Box::new(run));
    }

    /// Run `body` at the next tick of the region
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

    fn schedule<T, F>(&self, body: F, schedule: Schedule<u64>) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
    {
        submit_to(&self.owner, self.binding.as_ref(), "region", body, schedule)
    }
}

impl PartialEq for RegionScheduler {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.key == other.key
    }
}

impl Eq for RegionScheduler {}

impl Hash for RegionScheduler {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Debug for RegionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionScheduler")
            .field("owner", &self.owner)
            .field("world", &self.key.world.name())
            .field("x", &self.key.x)
            .field("z", &self.key.z)
            .finish()
    }
}
