//! Per-region reference server
//!
//! Chunks are grouped into square regions of `2^region_shift` chunks per
//! side, each ticked by its own thread. Region threads start lazily the first
//! time work is addressed to them and live until shutdown, unless
//! [`RegionServer::reap_idle_regions`] stops the ones with nothing queued. A
//! separate global thread runs work that belongs to no region, and an async
//! pool runs everything off the region threads.
//!
//! Entity tasks follow their entity: each run is queued on whichever region
//! holds the entity at that moment, and a run that finds the entity has moved
//! on is forwarded to the new region one tick later.

use crate::async_pool::AsyncPool;
use crate::config::HostConfig;
use crate::entity::SimEntity;
use crate::error::HostError;
use crate::task::{drive, run_once, timing, HostJob, SimTask, TaskRegistry};
use crate::tick_loop::TickLoop;
use crate::tick_server::teleport_on;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera::host::{RegionJob, Runnable};
use tessera::{
    Chunk, Completion, Entity, EntityRef, Feature, Host, Location, Owner, OwnershipTarget,
    RegionizedHost, Retired, Schedule, ScheduledTask, TaskRef, TeleportCause, TickHost, World,
};
use tracing::{debug, error, info};

/// Shortest period an async task may repeat at
const MIN_ASYNC_PERIOD: Duration = Duration::from_millis(1);

/// References an idle region loop has: the region map and its own thread
const IDLE_LOOP_REFS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegionKey {
    world: World,
    x: i32,
    z: i32,
}

/// A repeating or one-shot run bound to an entity
struct EntityRun {
    task: Arc<SimTask>,
    entity: EntityRef,
    job: RegionJob,
    retired: Retired,
    period: Option<u64>,
}

struct RegionInner {
    config: HostConfig,
    global: Arc<TickLoop>,
    regions: Mutex<FxHashMap<RegionKey, Arc<TickLoop>>>,
    pool: Arc<AsyncPool>,
    global_tasks: TaskRegistry,
    async_tasks: TaskRegistry,
    stopped: AtomicBool,
}

impl RegionInner {
    fn key(&self, world: &World, chunk_x: i32, chunk_z: i32) -> RegionKey {
        RegionKey {
            world: world.clone(),
            x: chunk_x >> self.config.region_shift,
            z: chunk_z >> self.config.region_shift,
        }
    }

    /// Loop ticking the region that holds `chunk`, started on first use
    fn region_loop(&self, chunk: &Chunk) -> Arc<TickLoop> {
        if self.stopped.load(Ordering::Acquire) {
            return Arc::clone(&self.global);
        }
        let key = self.key(&chunk.world, chunk.x, chunk.z);
        let mut regions = self.regions.lock();
        if let Some(region) = regions.get(&key) {
            return Arc::clone(region);
        }
        let name = format!("tessera-region-{}-{}-{}", key.world.name(), key.x, key.z);
        match TickLoop::spawn(name, self.config.tick_interval()) {
            Ok(region) => {
                debug!(world = key.world.name(), x = key.x, z = key.z, "region started");
                regions.insert(key, Arc::clone(&region));
                region
            }
            Err(err) => {
                error!(%err, "region thread unavailable, running on the global region");
                Arc::clone(&self.global)
            }
        }
    }

    fn entity_loop(&self, entity: &dyn Entity) -> Arc<TickLoop> {
        self.region_loop(&entity.location().chunk())
    }

    /// Whether the calling thread ticks every region overlapping the square
    fn owns(&self, world: &World, x: i32, z: i32, radius: u32) -> bool {
        let radius = i32::try_from(radius).unwrap_or(i32::MAX);
        let low = self.key(world, x.saturating_sub(radius), z.saturating_sub(radius));
        let high = self.key(world, x.saturating_add(radius), z.saturating_add(radius));
        let regions = self.regions.lock();
        for region_x in low.x..=high.x {
            for region_z in low.z..=high.z {
                let key = RegionKey {
                    world: world.clone(),
                    x: region_x,
                    z: region_z,
                };
                match regions.get(&key) {
                    Some(region) if region.is_current() => {}
                    _ => return false,
                }
            }
        }
        true
    }

    fn schedule_entity(self: &Arc<Self>, run: EntityRun, delay: u64) {
        let home = self.entity_loop(run.entity.as_ref());
        let next = Arc::clone(self);
        home.schedule_in(delay, Box::new(move || next.run_entity(run)));
    }

    fn run_entity(self: &Arc<Self>, mut run: EntityRun) {
        if run.task.is_cancelled() {
            return;
        }
        if !run.entity.is_valid() {
            debug!(task = run.task.id(), entity = run.entity.id().0, "entity task retired");
            run.task.cancel();
            run.retired.fire();
            return;
        }
        let home = self.entity_loop(run.entity.as_ref());
        if !home.is_current() {
            // Moved to another region since this run was queued
            let next = Arc::clone(self);
            home.schedule_in(1, Box::new(move || next.run_entity(run)));
            return;
        }

        let task: TaskRef = Arc::clone(&run.task) as TaskRef;
        let job = &mut run.job;
        if run_once(&run.task, &mut || job(&task)) {
            if let Some(period) = run.period {
                self.schedule_entity(run, period);
            }
        }
    }

    /// Stop region loops that have no queued work and that no caller is
    /// about to schedule on. A later submission to the region starts a fresh
    /// loop.
    fn reap_idle(&self) -> usize {
        let mut idle = Vec::new();
        self.regions.lock().retain(|key, region| {
            // Holders schedule before releasing, so count first, queue second
            let unheld = Arc::strong_count(region) <= IDLE_LOOP_REFS;
            if unheld && region.pending() == 0 && !region.is_current() {
                debug!(world = key.world.name(), x = key.x, z = key.z, "region reaped");
                idle.push(Arc::clone(region));
                false
            } else {
                true
            }
        });
        // Outside the map lock: a draining region may still look up others
        for region in &idle {
            region.stop();
        }
        idle.len()
    }

    fn submit(&self, owner: &Owner, registry: &TaskRegistry, repeating: bool) -> Arc<SimTask> {
        let task = SimTask::new(owner.clone(), repeating);
        registry.register(&task);
        task
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let regions: Vec<_> = self.regions.lock().drain().map(|(_, region)| region).collect();
        for region in &regions {
            region.stop();
        }
        self.global.stop();
        self.pool.stop();
        info!(regions = regions.len(), "region server stopped");
    }
}

/// Hand the job its own task on every run
fn with_task(task: &Arc<SimTask>, mut job: RegionJob) -> HostJob {
    let task: TaskRef = Arc::clone(task) as TaskRef;
    Box::new(move || job(&task))
}

fn once(run: Runnable) -> RegionJob {
    let mut run = Some(run);
    Box::new(move |_task: &TaskRef| {
        if let Some(run) = run.take() {
            run();
        }
    })
}

/// The [`RegionizedHost`] face of a running [`RegionServer`]
struct RegionHandle(Arc<RegionInner>);

impl RegionizedHost for RegionHandle {
    fn global_execute(&self, owner: &Owner, run: Runnable) {
        debug!(owner = %owner, "global execute");
        self.0.global.schedule_in(1, run);
    }

    fn global_run(&self, owner: &Owner, job: RegionJob, schedule: Schedule<u64>) -> TaskRef {
        let task = self.0.submit(owner, &self.0.global_tasks, schedule.is_repeating());
        let (delay, period) = timing(schedule, 1);
        drive(
            Arc::clone(&self.0.global),
            Arc::clone(&task),
            with_task(&task, job),
            delay,
            period,
        );
        task
    }

    fn global_cancel_tasks(&self, owner: &Owner) {
        self.0.global_tasks.cancel_owner(owner);
    }

    fn region_execute(&self, owner: &Owner, chunk: &Chunk, run: Runnable) {
        debug!(owner = %owner, x = chunk.x, z = chunk.z, "region execute");
        self.0.region_loop(chunk).schedule_in(1, run);
    }

    fn region_run(
        &self,
        owner: &Owner,
        chunk: &Chunk,
        job: RegionJob,
        schedule: Schedule<u64>,
    ) -> TaskRef {
        // Not registered: cancel_tasks leaves region tasks alone
        let task = SimTask::new(owner.clone(), schedule.is_repeating());
        let (delay, period) = timing(schedule, 1);
        drive(
            self.0.region_loop(chunk),
            Arc::clone(&task),
            with_task(&task, job),
            delay,
            period,
        );
        task
    }

    fn entity_execute(
        &self,
        owner: &Owner,
        entity: &EntityRef,
        run: Runnable,
        retired: Retired,
        delay: u64,
    ) -> bool {
        if !entity.is_valid() {
            return false;
        }
        let run = EntityRun {
            task: SimTask::new(owner.clone(), false),
            entity: Arc::clone(entity),
            job: once(run),
            retired,
            period: None,
        };
        self.0.schedule_entity(run, delay);
        true
    }

    fn entity_run(
        &self,
        owner: &Owner,
        entity: &EntityRef,
        job: RegionJob,
        retired: Retired,
        schedule: Schedule<u64>,
    ) -> Option<TaskRef> {
        if !entity.is_valid() {
            return None;
        }
        // Not registered, like region tasks
        let task = SimTask::new(owner.clone(), schedule.is_repeating());
        let (delay, period) = timing(schedule, 1);
        let run = EntityRun {
            task: Arc::clone(&task),
            entity: Arc::clone(entity),
            job,
            retired,
            period,
        };
        self.0.schedule_entity(run, delay);
        Some(task)
    }

    fn async_run(&self, owner: &Owner, job: RegionJob, schedule: Schedule<Duration>) -> TaskRef {
        let task = self.0.submit(owner, &self.0.async_tasks, schedule.is_repeating());
        let (delay, period) = timing(schedule, Duration::ZERO);
        drive(
            Arc::clone(&self.0.pool),
            Arc::clone(&task),
            with_task(&task, job),
            delay,
            period.map(|period| period.max(MIN_ASYNC_PERIOD)),
        );
        task
    }

    fn async_cancel_tasks(&self, owner: &Owner) {
        self.0.async_tasks.cancel_owner(owner);
    }

    fn is_owned_by_current_region(&self, target: OwnershipTarget<'_>) -> bool {
        let (chunk, radius) = match target {
            OwnershipTarget::Location { location, radius } => (location.chunk(), radius),
            OwnershipTarget::Chunk {
                world,
                x,
                z,
                radius,
            } => (Chunk::new(world.clone(), x, z), radius),
            OwnershipTarget::Entity(entity) => (entity.location().chunk(), 0),
        };
        self.0.owns(&chunk.world, chunk.x, chunk.z, radius)
    }

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool> {
        teleport_on(&self.0.entity_loop(entity.as_ref()), entity, location, cause)
    }
}

/// A running per-region host
///
/// Stops every region thread when dropped.
pub struct RegionServer {
    handle: Arc<RegionHandle>,
}

impl RegionServer {
    /// Start the global region and the async pool. Region threads start on
    /// demand.
    pub fn start(config: HostConfig) -> Result<Self, HostError> {
        config.validate()?;
        let global = TickLoop::spawn("tessera-global", config.tick_interval())?;
        let pool = match AsyncPool::spawn("tessera-async", config.worker_count()) {
            Ok(pool) => pool,
            Err(err) => {
                global.stop();
                return Err(err);
            }
        };
        info!(
            tick_ms = config.tick_interval_ms,
            region_shift = config.region_shift,
            "region server started"
        );
        let inner = RegionInner {
            config,
            global,
            regions: Mutex::new(FxHashMap::default()),
            pool,
            global_tasks: TaskRegistry::new(),
            async_tasks: TaskRegistry::new(),
            stopped: AtomicBool::new(false),
        };
        Ok(Self {
            handle: Arc::new(RegionHandle(Arc::new(inner))),
        })
    }

    /// Configuration the server was started with
    pub fn config(&self) -> &HostConfig {
        &self.handle.0.config
    }

    /// Region threads started so far
    pub fn region_count(&self) -> usize {
        self.handle.0.regions.lock().len()
    }

    /// Stop region threads that have nothing queued. Returns how many were
    /// stopped; their regions start again on the next submission.
    pub fn reap_idle_regions(&self) -> usize {
        let reaped = self.handle.0.reap_idle();
        if reaped > 0 {
            info!(reaped, remaining = self.region_count(), "idle regions reaped");
        }
        reaped
    }

    /// Whether the calling thread is the global region thread
    pub fn is_global_thread(&self) -> bool {
        self.handle.0.global.is_current()
    }

    /// Whether two chunks fall in the same region
    pub fn same_region(&self, a: &Chunk, b: &Chunk) -> bool {
        let inner = &self.handle.0;
        inner.key(&a.world, a.x, a.z) == inner.key(&b.world, b.x, b.z)
    }

    /// Live global and async tasks of `owner`
    pub fn live_tasks(&self, owner: &Owner) -> usize {
        self.handle.0.global_tasks.live_count(owner) + self.handle.0.async_tasks.live_count(owner)
    }

    /// Spawn an entity in this server's world
    pub fn spawn_entity(&self, location: Location) -> Arc<SimEntity> {
        SimEntity::spawn(location)
    }

    /// Stop every thread and drop pending work. Idempotent.
    pub fn shutdown(&self) {
        self.handle.0.shutdown();
    }
}

impl Host for RegionServer {
    fn has_feature(&self, feature: Feature) -> bool {
        matches!(feature, Feature::RegionThreading)
    }

    fn tick_host(&self) -> Option<Arc<dyn TickHost>> {
        None
    }

    fn regionized_host(&self) -> Option<Arc<dyn RegionizedHost>> {
        Some(Arc::clone(&self.handle) as Arc<dyn RegionizedHost>)
    }
}

impl Drop for RegionServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
