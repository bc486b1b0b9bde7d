//! Single-global-thread family
//!
//! Global, region, and entity work all lands on the host's primary thread.
//! The host returns the task only after submission, so the job learns its
//! task through a slot filled by the submitting call; a run that starts
//! before that point simply sees no task yet.

use super::{AsyncBinding, BackendKind, ContextBinding, EntityBinding, Job, ServerBackend};
use crate::config::SchedulerConfig;
use crate::host::{Lane, Retired, Runnable, Schedule, TaskRef, TickHost, TickJob};
use crate::scheduler::DEFAULT_EXECUTE_DELAY;
use crate::task::Completion;
use crate::world::{Chunk, EntityRef, Location, Owner, OwnershipTarget, TeleportCause};
use once_cell::sync::OnceCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

fn submit_on(
    host: &dyn TickHost,
    owner: &Owner,
    lane: Lane,
    mut job: impl FnMut(Option<&TaskRef>) + Send + 'static,
    schedule: Schedule<u64>,
) -> TaskRef {
    let slot: Arc<OnceCell<TaskRef>> = Arc::new(OnceCell::new());
    let published = Arc::clone(&slot);
    let tick_job: TickJob = Box::new(move || job(published.get()));
    let task = host.run_task(owner, lane, tick_job, schedule);
    // Nothing else writes the slot
    let _ = slot.set(Arc::clone(&task));
    task
}

fn once(run: Runnable) -> impl FnMut(Option<&TaskRef>) + Send + 'static {
    let mut run = Some(run);
    move |_| {
        if let Some(run) = run.take() {
            run();
        }
    }
}

pub(crate) struct TickBackend {
    host: Arc<dyn TickHost>,
    owner: Owner,
    config: SchedulerConfig,
}

impl TickBackend {
    /// A host that paces its own ticks decides the tick length used for
    /// async durations; `config.tick_millis` only applies otherwise.
    pub(crate) fn new(host: Arc<dyn TickHost>, owner: Owner, mut config: SchedulerConfig) -> Self {
        if let Some(tick_millis) = host.tick_millis().filter(|&millis| millis > 0) {
            if tick_millis != config.tick_millis {
                warn!(
                    configured = config.tick_millis,
                    host = tick_millis,
                    "host tick length overrides tick_millis"
                );
                config.tick_millis = tick_millis;
            }
        }
        Self {
            host,
            owner,
            config,
        }
    }

    fn main(&self) -> Arc<dyn ContextBinding> {
        Arc::new(MainContext {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
        })
    }
}

impl ServerBackend for TickBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Tick
    }

    fn global(&self) -> Arc<dyn ContextBinding> {
        self.main()
    }

    /// The host cannot separate lanes, so this cancels every task of the owner
    fn cancel_global_tasks(&self) {
        self.host.cancel_tasks(&self.owner);
    }

    fn region(&self, _chunk: Chunk) -> Arc<dyn ContextBinding> {
        self.main()
    }

    fn entity(&self, entity: EntityRef) -> Arc<dyn EntityBinding> {
        Arc::new(TickEntity {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
            entity,
        })
    }

    fn async_binding(&self) -> Arc<dyn AsyncBinding> {
        Arc::new(TickAsync {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
            config: self.config.clone(),
        })
    }

    fn cancel_tasks(&self) {
        self.host.cancel_tasks(&self.owner);
    }

    fn is_owned_by_current_region(&self, _target: OwnershipTarget<'_>) -> bool {
        self.host.is_primary_thread()
    }

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool> {
        if let Some(native) = self.host.teleport_async(entity, location, cause) {
            return native;
        }
        fallback_teleport(self.entity(Arc::clone(entity)).as_ref(), entity, location, cause)
    }
}

/// Teleport synchronously on the entity's own context one tick from now.
/// Every failure resolves `false`; nothing propagates to the caller.
fn fallback_teleport(
    binding: &dyn EntityBinding,
    entity: &EntityRef,
    location: &Location,
    cause: TeleportCause,
) -> Completion<bool> {
    let completion = Completion::new();
    if !entity.is_valid() {
        warn!(entity = entity.id().0, "teleport target already removed");
        completion.complete(false);
        return completion;
    }

    let on_retired = completion.clone();
    let retired_id = entity.id();
    let retired = Retired::new(move || {
        warn!(entity = retired_id.0, "teleport target removed before the teleport ran");
        on_retired.complete(false);
    });

    let on_run = completion.clone();
    let target = Arc::clone(entity);
    let destination = location.clone();
    let run: Runnable = Box::new(move || {
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| target.teleport(&destination, cause)));
        let moved = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                error!(entity = target.id().0, "fallback teleport failed: {}", err);
                false
            }
            Err(_) => {
                error!(entity = target.id().0, "fallback teleport panicked");
                false
            }
        };
        on_run.complete(moved);
    });

    if !binding.execute(run, retired, DEFAULT_EXECUTE_DELAY) {
        completion.complete(false);
    }
    completion
}

struct MainContext {
    host: Arc<dyn TickHost>,
    owner: Owner,
}

impl ContextBinding for MainContext {
    fn execute(&self, run: Runnable) {
        submit_on(
            self.host.as_ref(),
            &self.owner,
            Lane::Main,
            once(run),
            Schedule::Now,
        );
    }

    fn submit(&self, job: Job, schedule: Schedule<u64>) -> TaskRef {
        submit_on(self.host.as_ref(), &self.owner, Lane::Main, job, schedule)
    }
}

struct TickEntity {
    host: Arc<dyn TickHost>,
    owner: Owner,
    entity: EntityRef,
}

impl EntityBinding for TickEntity {
    fn execute(&self, run: Runnable, retired: Retired, delay: u64) -> bool {
        let entity = Arc::clone(&self.entity);
        let mut run = Some(run);
        submit_on(
            self.host.as_ref(),
            &self.owner,
            Lane::Main,
            move |_| {
                if !entity.is_valid() {
                    warn!(entity = entity.id().0, "entity removed before execution");
                    retired.fire();
                } else if let Some(run) = run.take() {
                    run();
                }
            },
            Schedule::Delayed(delay),
        );
        true
    }

    fn submit(&self, mut job: Job, retired: Retired, schedule: Schedule<u64>) -> Option<TaskRef> {
        let entity = Arc::clone(&self.entity);
        let task = submit_on(
            self.host.as_ref(),
            &self.owner,
            Lane::Main,
            move |task| {
                if entity.is_valid() {
                    job(task);
                    return;
                }
                warn!(entity = entity.id().0, "entity removed, retiring task");
                retired.fire();
                if let Some(task) = task {
                    task.cancel();
                }
            },
            schedule,
        );
        Some(task)
    }
}

struct TickAsync {
    host: Arc<dyn TickHost>,
    owner: Owner,
    config: SchedulerConfig,
}

impl AsyncBinding for TickAsync {
    fn execute(&self, run: Runnable) {
        submit_on(
            self.host.as_ref(),
            &self.owner,
            Lane::Async,
            once(run),
            Schedule::Now,
        );
    }

    fn submit(&self, job: Job, schedule: Schedule<Duration>) -> TaskRef {
        let ticks = schedule.map(|d| self.config.ticks_for(d));
        submit_on(self.host.as_ref(), &self.owner, Lane::Async, job, ticks)
    }

    fn cancel_tasks(&self) {
        self.host.cancel_tasks(&self.owner);
    }
}
