//! Backend bindings
//!
//! The schedulers never inspect which host family they run on. They talk to
//! the object-safe bindings below, and the selector decides once, at server
//! construction, which family implements them.

pub(crate) mod regionized;
pub(crate) mod select;
pub(crate) mod tick;

use crate::host::{Retired, Runnable, Schedule, TaskRef};
use crate::task::Completion;
use crate::world::{Chunk, EntityRef, Location, OwnershipTarget, TeleportCause};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Work handed to a binding. Receives the host task when the host passes it
/// to the job (or once the submission path has recorded it).
pub(crate) type Job = Box<dyn FnMut(Option<&TaskRef>) + Send>;

/// Which host family a [`Server`](crate::Server) is bound to
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// All world logic runs on one primary thread
    Tick,
    /// Regions are ticked by independent threads
    Regionized,
}

impl BackendKind {
    /// Short name used in logs and configuration
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Tick => "tick",
            BackendKind::Regionized => "regionized",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An in-world execution context with no validity precondition
pub(crate) trait ContextBinding: Send + Sync {
    fn execute(&self, run: Runnable);

    fn submit(&self, job: Job, schedule: Schedule<u64>) -> TaskRef;
}

/// Execution context following one entity
pub(crate) trait EntityBinding: Send + Sync {
    /// `false` if the host refused the work because the entity is gone
    fn execute(&self, run: Runnable, retired: Retired, delay: u64) -> bool;

    /// `None` if the host refused the work because the entity is gone
    fn submit(&self, job: Job, retired: Retired, schedule: Schedule<u64>) -> Option<TaskRef>;
}

/// Off-main execution context
pub(crate) trait AsyncBinding: Send + Sync {
    fn execute(&self, run: Runnable);

    fn submit(&self, job: Job, schedule: Schedule<Duration>) -> TaskRef;

    fn cancel_tasks(&self);
}

/// One backend family, bound to one owner
pub(crate) trait ServerBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn global(&self) -> Arc<dyn ContextBinding>;

    fn cancel_global_tasks(&self);

    fn region(&self, chunk: Chunk) -> Arc<dyn ContextBinding>;

    fn entity(&self, entity: EntityRef) -> Arc<dyn EntityBinding>;

    fn async_binding(&self) -> Arc<dyn AsyncBinding>;

    /// Cancel global and async tasks of the owner
    fn cancel_tasks(&self);

    fn is_owned_by_current_region(&self, target: OwnershipTarget<'_>) -> bool;

    fn teleport_async(
        &self,
        entity: &EntityRef,
        location: &Location,
        cause: TeleportCause,
    ) -> Completion<bool>;
}
