//! The four scheduler variants
//!
//! Every variant offers `run`, `run_delayed`, `run_at_fixed_rate`, and
//! `execute`. Bodies receive their own [`TaskHandle`] and return the value
//! stored as the handle's result, so a periodic body can inspect or cancel
//! itself:
//!
//! ```ignore
//! let counter = server.global().run_at_fixed_rate(
//!     move |task| {
//!         let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
//!         if n == 3 {
//!             task.cancel();
//!         }
//!         n
//!     },
//!     0,
//!     5,
//! );
//! ```

mod asynchronous;
mod entity;
mod global;
mod region;

pub use asynchronous::AsyncScheduler;
pub use entity::{EntityScheduler, DEFAULT_EXECUTE_DELAY};
pub use global::GlobalScheduler;
pub use region::RegionScheduler;

pub use crate::host::Retired;

use crate::backend::{ContextBinding, Job};
use crate::host::{Schedule, TaskRef};
use crate::task::TaskHandle;
use crate::world::Owner;
use tracing::debug;

/// Wrap `body` into the job a binding submits.
///
/// The job binds the handle when it is given the host task. A body that
/// cancelled itself before the handle was bound is skipped on later runs.
pub(crate) fn job<T, F>(handle: &TaskHandle<T>, mut body: F) -> Job
where
    T: Send + 'static,
    F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
{
    let handle = handle.clone();
    Box::new(move |task: Option<&TaskRef>| {
        if let Some(task) = task {
            handle.bind(task);
        }
        if handle.is_cancelled_unbound() {
            debug!(owner = %handle.owner(), "skipping run of cancelled task");
            return;
        }
        handle.run_body(&mut body);
    })
}

/// Submit to a context that always accepts work
pub(crate) fn submit_to<T, F>(
    owner: &Owner,
    binding: &dyn ContextBinding,
    context: &'static str,
    body: F,
    schedule: Schedule<u64>,
) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnMut(&TaskHandle<T>) -> T + Send + 'static,
{
    let handle = TaskHandle::new(owner.clone(), schedule.is_repeating());
    let task = binding.submit(job(&handle, body), schedule);
    handle.bind(&task);
    debug!(owner = %owner, context, task = task.id(), ?schedule, "task submitted");
    handle
}
