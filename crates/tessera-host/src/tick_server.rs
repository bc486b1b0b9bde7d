//! Single-thread reference server
//!
//! World logic runs on one ticking primary thread. The async lane runs on a
//! worker pool, with tick delays converted to wall-clock time at the
//! configured tick length.

use crate::async_pool::AsyncPool;
use crate::config::HostConfig;
use crate::entity::SimEntity;
use crate::error::HostError;
use crate::task::{drive, timing, SimTask, TaskRegistry};
use crate::tick_loop::TickLoop;
use std::sync::Arc;
use std::time::Duration;
use tessera::host::TickJob;
use tessera::{
    Completion, Entity, EntityRef, Feature, Host, Lane, Location, Owner, RegionizedHost,
    Schedule, TaskRef, TeleportCause, TickHost,
};
use tracing::{debug, info};

struct TickInner {
    config: HostConfig,
    main: Arc<TickLoop>,
    pool: Arc<AsyncPool>,
    tasks: TaskRegistry,
}

impl TickInner {
    fn ticks(&self, ticks: u64) -> Duration {
        Duration::from_millis(ticks.saturating_mul(self.config.tick_interval_ms))
    }
}

impl TickHost for TickInner {
    fn run_task(
        &self,
        owner: &Owner,
        lane: Lane,
        job: TickJob,
        schedule: Schedule<u64>,
    ) -> TaskRef {
        let task = SimTask::new(owner.clone(), schedule.is_repeating());
        self.tasks.register(&task);
        let (delay, period) = timing(schedule, 0);
        match lane {
            Lane::Main => drive(Arc::clone(&self.main), Arc::clone(&task), job, delay, period),
            Lane::Async => drive(
                Arc::clone(&self.pool),
                Arc::clone(&task),
                job,
                self.ticks(delay),
                // A zero period would spin a worker
                period.map(|period| self.ticks(period.max(1))),
            ),
        }
        debug!(owner = %owner, ?lane, ?schedule, "tick task submitted");
        task
    }

    fn cancel_tasks(&self, owner: &Owner) {
        self.tasks.cancel_owner(owner);
    }

    fn is_primary_thread(&self) -> bool {
        self.main.is_current()
    }

    fn tick_millis(&self) -> Option<u64> {
        Some(self.config.tick_interval_ms)
    }

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Option<Completion<bool>> {
        if !self.config.native_teleport {
            return None;
        }
        Some(teleport_on(&self.main, entity, location, cause))
    }
}

/// Teleport `entity` on `tick_loop` at its next tick
pub(crate) fn teleport_on(
    tick_loop: &TickLoop,
    entity: &EntityRef,
    location: &Location,
    cause: TeleportCause,
) -> Completion<bool> {
    if !entity.is_valid() {
        return Completion::resolved(false);
    }
    let completion = Completion::new();
    let done = completion.clone();
    let target = Arc::clone(entity);
    let destination = location.clone();
    tick_loop.schedule_in(
        1,
        Box::new(move || {
            let moved = match target.teleport(&destination, cause) {
                Ok(()) => true,
                Err(err) => {
                    debug!(entity = target.id().0, %err, "teleport refused");
                    false
                }
            };
            done.complete(moved);
        }),
    );
    completion
}

/// A running single-thread host
///
/// Stops its threads when dropped.
pub struct TickServer {
    inner: Arc<TickInner>,
}

impl TickServer {
    /// Start the primary thread and the async pool
    pub fn start(config: HostConfig) -> Result<Self, HostError> {
        config.validate()?;
        let main = TickLoop::spawn("tessera-main", config.tick_interval())?;
        let pool = match AsyncPool::spawn("tessera-async", config.worker_count()) {
            Ok(pool) => pool,
            Err(err) => {
                main.stop();
                return Err(err);
            }
        };
        info!(tick_ms = config.tick_interval_ms, "tick server started");
        Ok(Self {
            inner: Arc::new(TickInner {
                config,
                main,
                pool,
                tasks: TaskRegistry::new(),
            }),
        })
    }

    /// Configuration the server was started with
    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// Ticks completed by the primary thread
    pub fn current_tick(&self) -> u64 {
        self.inner.main.current_tick()
    }

    /// Whether the calling thread is the primary thread
    pub fn is_primary_thread(&self) -> bool {
        self.inner.main.is_current()
    }

    /// Live tasks `owner` has on either lane
    pub fn live_tasks(&self, owner: &Owner) -> usize {
        self.inner.tasks.live_count(owner)
    }

    /// Spawn an entity in this server's world
    pub fn spawn_entity(&self, location: Location) -> Arc<SimEntity> {
        SimEntity::spawn(location)
    }

    /// Stop every thread and drop pending work. Idempotent.
    pub fn shutdown(&self) {
        self.inner.main.stop();
        self.inner.pool.stop();
    }
}

impl Host for TickServer {
    fn has_feature(&self, _feature: Feature) -> bool {
        false
    }

    fn tick_host(&self) -> Option<Arc<dyn TickHost>> {
        Some(Arc::clone(&self.inner) as Arc<dyn TickHost>)
    }

    fn regionized_host(&self) -> Option<Arc<dyn RegionizedHost>> {
        None
    }
}

impl Drop for TickServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
