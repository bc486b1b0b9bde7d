//! Per-region-thread family
//!
//! The host hands every job its own task on each run, so handles bind from
//! inside the callback as well as after submission. Delays below one tick
//! are clamped to one.

use super::{AsyncBinding, BackendKind, ContextBinding, EntityBinding, Job, ServerBackend};
use crate::host::{RegionJob, RegionizedHost, Retired, Runnable, Schedule, TaskRef};
use crate::task::Completion;
use crate::world::{Chunk, EntityRef, Location, Owner, OwnershipTarget, TeleportCause};
use std::sync::Arc;
use std::time::Duration;

/// Smallest delay or period the host accepts, in ticks
const MIN_TICKS: u64 = 1;

fn clamp(schedule: Schedule<u64>) -> Schedule<u64> {
    schedule.map(|ticks| ticks.max(MIN_TICKS))
}

fn adapt(mut job: Job) -> RegionJob {
    Box::new(move |task: &TaskRef| job(Some(task)))
}

pub(crate) struct RegionizedBackend {
    host: Arc<dyn RegionizedHost>,
    owner: Owner,
}

impl RegionizedBackend {
    pub(crate) fn new(host: Arc<dyn RegionizedHost>, owner: Owner) -> Self {
        Self { host, owner }
    }
}

impl ServerBackend for RegionizedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Regionized
    }

    fn global(&self) -> Arc<dyn ContextBinding> {
        Arc::new(GlobalRegion {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
        })
    }

    fn cancel_global_tasks(&self) {
        self.host.global_cancel_tasks(&self.owner);
    }

    fn region(&self, chunk: Chunk) -> Arc<dyn ContextBinding> {
        Arc::new(ChunkRegion {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
            chunk,
        })
    }

    fn entity(&self, entity: EntityRef) -> Arc<dyn EntityBinding> {
        Arc::new(FollowEntity {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
            entity,
        })
    }

    fn async_binding(&self) -> Arc<dyn AsyncBinding> {
        Arc::new(OffRegion {
            host: Arc::clone(&self.host),
            owner: self.owner.clone(),
        })
    }

    /// Region and entity tasks are not enumerable by owner on this family
    fn cancel_tasks(&self) {
        self.host.global_cancel_tasks(&self.owner);
        self.host.async_cancel_tasks(&self.owner);
    }

    fn is_owned_by_current_region(&self, target: OwnershipTarget<'_>) -> bool {
        self.host.is_owned_by_current_region(target)
    }

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool> {
        self.host.teleport_async(entity, location, cause)
    }
}

struct GlobalRegion {
    host: Arc<dyn RegionizedHost>,
    owner: Owner,
}

impl ContextBinding for GlobalRegion {
    fn execute(&self, run: Runnable) {
        self.host.global_execute(&self.owner, run);
    }

    fn submit(&self, job: Job, schedule: Schedule<u64>) -> TaskRef {
        self.host.global_run(&self.owner, adapt(job), clamp(schedule))
    }
}

struct ChunkRegion {
    host: Arc<dyn RegionizedHost>,
    owner: Owner,
    chunk: Chunk,
}

impl ContextBinding for ChunkRegion {
    fn execute(&self, run: Runnable) {
        self.host.region_execute(&self.owner, &self.chunk, run);
    }

    fn submit(&self, job: Job, schedule: Schedule<u64>) -> TaskRef {
        self.host
            .region_run(&self.owner, &self.chunk, adapt(job), clamp(schedule))
    }
}

struct FollowEntity {
    host: Arc<dyn RegionizedHost>,
    owner: Owner,
    entity: EntityRef,
}

impl EntityBinding for FollowEntity {
    fn execute(&self, run: Runnable, retired: Retired, delay: u64) -> bool {
        self.host.entity_execute(
            &self.owner,
            &self.entity,
            run,
            retired,
            delay.max(MIN_TICKS),
        )
    }

    fn submit(&self, job: Job, retired: Retired, schedule: Schedule<u64>) -> Option<TaskRef> {
        self.host
            .entity_run(&self.owner, &self.entity, adapt(job), retired, clamp(schedule))
    }
}

struct OffRegion {
    host: Arc<dyn RegionizedHost>,
    owner: Owner,
}

impl AsyncBinding for OffRegion {
    fn execute(&self, run: Runnable) {
        let mut run = Some(run);
        self.host.async_run(
            &self.owner,
            Box::new(move |_: &TaskRef| {
                if let Some(run) = run.take() {
                    run();
                }
            }),
            Schedule::Now,
        );
    }

    fn submit(&self, job: Job, schedule: Schedule<Duration>) -> TaskRef {
        self.host.async_run(&self.owner, adapt(job), schedule)
    }

    fn cancel_tasks(&self) {
        self.host.async_cancel_tasks(&self.owner);
    }
}
