//! Deterministic hosts for unit tests
//!
//! Nothing runs until [`ManualTickHost::advance`] or
//! [`ManualRegionHost::advance`] is called, and everything runs on the
//! calling thread.

use crate::error::TeleportError;
use crate::host::{
    ExecutionState, Feature, Host, Lane, RegionJob, RegionizedHost, Retired, Runnable, Schedule,
    ScheduledTask, TaskRef, TickHost, TickJob,
};
use crate::task::Completion;
use crate::world::{
    Chunk, Entity, EntityId, EntityRef, Location, Owner, OwnershipTarget, TeleportCause, World,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct FakeTask {
    id: u64,
    owner: Owner,
    repeating: bool,
    state: Mutex<ExecutionState>,
}

impl FakeTask {
    fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ExecutionState::Idle {
            *state = ExecutionState::Running;
            true
        } else {
            false
        }
    }

    fn end(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            ExecutionState::CancelledRunning => ExecutionState::Cancelled,
            ExecutionState::Running if self.repeating => ExecutionState::Idle,
            ExecutionState::Running => ExecutionState::Finished,
            other => other,
        };
    }
}

impl ScheduledTask for FakeTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn owner(&self) -> &Owner {
        &self.owner
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            ExecutionState::Idle => ExecutionState::Cancelled,
            ExecutionState::Running => ExecutionState::CancelledRunning,
            other => other,
        };
    }

    fn execution_state(&self) -> ExecutionState {
        *self.state.lock()
    }

    fn is_repeating(&self) -> bool {
        self.repeating
    }
}

enum Work {
    Tick(TickJob),
    Region(RegionJob),
    Entity {
        entity: EntityRef,
        job: RegionJob,
        retired: Retired,
    },
    Once(Runnable),
    EntityOnce {
        entity: EntityRef,
        run: Runnable,
        retired: Retired,
    },
}

struct Entry {
    task: Option<Arc<FakeTask>>,
    due: u64,
    period: Option<u64>,
    work: Work,
}

#[derive(Default)]
struct Queue {
    tick: u64,
    entries: Vec<Entry>,
    tasks: Vec<Arc<FakeTask>>,
    next_id: AtomicU64,
}

impl Queue {
    fn due_in(&self, delay: u64) -> u64 {
        self.tick + delay.max(1)
    }

    fn push(
        &mut self,
        owner: &Owner,
        work: Work,
        schedule: Schedule<u64>,
    ) -> Arc<FakeTask> {
        let task = Arc::new(FakeTask {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner: owner.clone(),
            repeating: schedule.is_repeating(),
            state: Mutex::new(ExecutionState::Idle),
        });
        let (delay, period) = match schedule {
            Schedule::Now => (0, None),
            Schedule::Delayed(delay) => (delay, None),
            Schedule::FixedRate { delay, period } => (delay, Some(period)),
        };
        let due = self.due_in(delay);
        self.entries.push(Entry {
            task: Some(Arc::clone(&task)),
            due,
            period,
            work,
        });
        self.tasks.push(Arc::clone(&task));
        task
    }

    fn push_once(&mut self, work: Work, delay: u64) {
        let due = self.due_in(delay);
        self.entries.push(Entry {
            task: None,
            due,
            period: None,
            work,
        });
    }

    fn cancel_owned(&self, owner: &Owner) {
        for task in self.tasks.iter().filter(|task| &task.owner == owner) {
            task.cancel();
        }
    }
}

/// Run every entry due at the next tick, outside the queue lock
fn advance(queue: &Mutex<Queue>) {
    let (tick, due) = {
        let mut queue = queue.lock();
        queue.tick += 1;
        let tick = queue.tick;
        let (due, pending): (Vec<Entry>, Vec<Entry>) =
            queue.entries.drain(..).partition(|entry| entry.due <= tick);
        queue.entries = pending;
        (tick, due)
    };

    for mut entry in due {
        let Some(task) = entry.task.clone() else {
            match entry.work {
                Work::Once(run) => run(),
                Work::EntityOnce {
                    entity,
                    run,
                    retired,
                } => {
                    if entity.is_valid() {
                        run();
                    } else {
                        retired.fire();
                    }
                }
                _ => {}
            }
            continue;
        };

        if !task.begin() {
            continue;
        }
        let task_ref: TaskRef = task.clone();
        match &mut entry.work {
            Work::Tick(job) => job(),
            Work::Region(job) => job(&task_ref),
            Work::Entity {
                entity,
                job,
                retired,
            } => {
                if entity.is_valid() {
                    job(&task_ref);
                } else {
                    retired.fire();
                    task.cancel();
                }
            }
            Work::Once(_) | Work::EntityOnce { .. } => {}
        }
        task.end();

        if let Some(period) = entry.period {
            if !task.is_cancelled() {
                entry.due = tick + period.max(1);
                queue.lock().entries.push(entry);
            }
        }
    }
}

/// Single-thread host driven by hand
pub(crate) struct ManualTickHost {
    queue: Mutex<Queue>,
    primary: AtomicBool,
    native_teleport: bool,
    tick_millis: Option<u64>,
    submissions: Mutex<Vec<(Lane, Schedule<u64>)>>,
}

impl ManualTickHost {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            primary: AtomicBool::new(false),
            native_teleport: false,
            tick_millis: None,
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_tick_millis(tick_millis: u64) -> Self {
        Self {
            tick_millis: Some(tick_millis),
            ..Self::new()
        }
    }

    pub(crate) fn with_native_teleport() -> Self {
        Self {
            native_teleport: true,
            ..Self::new()
        }
    }

    pub(crate) fn advance(&self) {
        advance(&self.queue);
    }

    pub(crate) fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::SeqCst);
    }

    pub(crate) fn submissions(&self) -> Vec<(Lane, Schedule<u64>)> {
        self.submissions.lock().clone()
    }
}

impl TickHost for ManualTickHost {
    fn run_task(&self, owner: &Owner, lane: Lane, job: TickJob, schedule: Schedule<u64>) -> TaskRef {
        self.submissions.lock().push((lane, schedule));
        self.queue.lock().push(owner, Work::Tick(job), schedule)
    }

    fn cancel_tasks(&self, owner: &Owner) {
        self.queue.lock().cancel_owned(owner);
    }

    fn is_primary_thread(&self) -> bool {
        self.primary.load(Ordering::SeqCst)
    }

    fn tick_millis(&self) -> Option<u64> {
        self.tick_millis
    }

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Option<Completion<bool>> {
        self.native_teleport
            .then(|| Completion::resolved(entity.teleport(location, cause).is_ok()))
    }
}

/// What a [`ManualRegionHost`] was asked to do
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Submitted {
    Global(Schedule<u64>),
    Region(Chunk, Schedule<u64>),
    Entity(Schedule<u64>),
    EntityExecute(u64),
    Async(Schedule<Duration>),
}

/// Region-threaded host driven by hand; every region shares one queue
pub(crate) struct ManualRegionHost {
    queue: Mutex<Queue>,
    global_tasks: Mutex<Vec<TaskRef>>,
    async_tasks: Mutex<Vec<TaskRef>>,
    submissions: Mutex<Vec<Submitted>>,
    cancellations: Mutex<Vec<&'static str>>,
    current: Mutex<Option<Chunk>>,
    causes: Mutex<Vec<TeleportCause>>,
}

impl ManualRegionHost {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            global_tasks: Mutex::new(Vec::new()),
            async_tasks: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
            cancellations: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            causes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn advance(&self) {
        advance(&self.queue);
    }

    pub(crate) fn submissions(&self) -> Vec<Submitted> {
        self.submissions.lock().clone()
    }

    pub(crate) fn cancellations(&self) -> Vec<&'static str> {
        self.cancellations.lock().clone()
    }

    pub(crate) fn teleport_causes(&self) -> Vec<TeleportCause> {
        self.causes.lock().clone()
    }

    /// Pretend the calling thread ticks the region of `chunk`
    pub(crate) fn set_current(&self, chunk: Option<Chunk>) {
        *self.current.lock() = chunk;
    }

    fn owns(&self, chunk: Chunk, radius: u32) -> bool {
        radius == 0 && self.current.lock().as_ref() == Some(&chunk)
    }
}

impl RegionizedHost for ManualRegionHost {
    fn global_execute(&self, _owner: &Owner, run: Runnable) {
        self.queue.lock().push_once(Work::Once(run), 1);
    }

    fn global_run(&self, owner: &Owner, job: RegionJob, schedule: Schedule<u64>) -> TaskRef {
        self.submissions.lock().push(Submitted::Global(schedule));
        let task: TaskRef = self.queue.lock().push(owner, Work::Region(job), schedule);
        self.global_tasks.lock().push(Arc::clone(&task));
        task
    }

    fn global_cancel_tasks(&self, _owner: &Owner) {
        self.cancellations.lock().push("global");
        for task in self.global_tasks.lock().iter() {
            task.cancel();
        }
    }

    fn region_execute(&self, _owner: &Owner, _chunk: &Chunk, run: Runnable) {
        self.queue.lock().push_once(Work::Once(run), 1);
    }

    fn region_run(
        &self,
        owner: &Owner,
        chunk: &Chunk,
        job: RegionJob,
        schedule: Schedule<u64>,
    ) -> TaskRef {
        self.submissions
            .lock()
            .push(Submitted::Region(chunk.clone(), schedule));
        self.queue.lock().push(owner, Work::Region(job), schedule)
    }

    fn entity_execute(
        &self,
        _owner: &Owner,
        entity: &EntityRef,
        run: Runnable,
        retired: Retired,
        delay: u64,
    ) -> bool {
        self.submissions.lock().push(Submitted::EntityExecute(delay));
        if !entity.is_valid() {
            return false;
        }
        self.queue.lock().push_once(
            Work::EntityOnce {
                entity: Arc::clone(entity),
                run,
                retired,
            },
            delay,
        );
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
        self.submissions.lock().push(Submitted::Entity(schedule));
        if !entity.is_valid() {
            return None;
        }
        let work = Work::Entity {
            entity: Arc::clone(entity),
            job,
            retired,
        };
        let task: TaskRef = self.queue.lock().push(owner, work, schedule);
        Some(task)
    }

    fn async_run(&self, owner: &Owner, job: RegionJob, schedule: Schedule<Duration>) -> TaskRef {
        self.submissions.lock().push(Submitted::Async(schedule));
        let ticks = schedule.map(|d| u64::try_from(d.as_millis().div_ceil(50)).unwrap_or(u64::MAX));
        let task: TaskRef = self.queue.lock().push(owner, Work::Region(job), ticks);
        self.async_tasks.lock().push(Arc::clone(&task));
        task
    }

    fn async_cancel_tasks(&self, _owner: &Owner) {
        self.cancellations.lock().push("async");
        for task in self.async_tasks.lock().iter() {
            task.cancel();
        }
    }

    fn is_owned_by_current_region(&self, target: OwnershipTarget<'_>) -> bool {
        match target {
            OwnershipTarget::Location { location, radius } => self.owns(location.chunk(), radius),
            OwnershipTarget::Chunk {
                world,
                x,
                z,
                radius,
            } => self.owns(Chunk::new(world.clone(), x, z), radius),
            OwnershipTarget::Entity(entity) => self.owns(entity.location().chunk(), 0),
        }
    }

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool> {
        self.causes.lock().push(cause);
        Completion::resolved(entity.teleport(location, cause).is_ok())
    }
}

/// A host with configurable families and feature probe
pub(crate) struct StubHost {
    pub(crate) region_threading: bool,
    pub(crate) tick: Option<Arc<ManualTickHost>>,
    pub(crate) regionized: Option<Arc<ManualRegionHost>>,
}

impl StubHost {
    pub(crate) fn tick() -> Self {
        Self {
            region_threading: false,
            tick: Some(Arc::new(ManualTickHost::new())),
            regionized: None,
        }
    }

    pub(crate) fn regionized() -> Self {
        Self {
            region_threading: true,
            tick: None,
            regionized: Some(Arc::new(ManualRegionHost::new())),
        }
    }

    pub(crate) fn both() -> Self {
        Self {
            tick: Some(Arc::new(ManualTickHost::new())),
            ..Self::regionized()
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            region_threading: false,
            tick: None,
            regionized: None,
        }
    }
}

impl Host for StubHost {
    fn has_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::RegionThreading => self.region_threading,
        }
    }

    fn tick_host(&self) -> Option<Arc<dyn TickHost>> {
        self.tick.clone().map(|host| host as Arc<dyn TickHost>)
    }

    fn regionized_host(&self) -> Option<Arc<dyn RegionizedHost>> {
        self.regionized
            .clone()
            .map(|host| host as Arc<dyn RegionizedHost>)
    }
}

#[derive(Debug)]
pub(crate) struct TestEntity {
    id: EntityId,
    valid: AtomicBool,
    fail: AtomicBool,
    location: Mutex<Location>,
}

impl TestEntity {
    pub(crate) fn spawn(id: u64) -> Arc<Self> {
        Self::spawn_at(id, Location::new(World::new("w"), 0.0, 64.0, 0.0))
    }

    pub(crate) fn spawn_at(id: u64, location: Location) -> Arc<Self> {
        Arc::new(Self {
            id: EntityId(id),
            valid: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            location: Mutex::new(location),
        })
    }

    pub(crate) fn remove(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }

    pub(crate) fn fail_teleports(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Entity for TestEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn location(&self) -> Location {
        self.location.lock().clone()
    }

    fn teleport(&self, location: &Location, _cause: TeleportCause) -> Result<(), TeleportError> {
        if !self.is_valid() {
            return Err(TeleportError::EntityRemoved);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(TeleportError::Rejected("blocked".to_string()));
        }
        *self.location.lock() = location.clone();
        Ok(())
    }
}
