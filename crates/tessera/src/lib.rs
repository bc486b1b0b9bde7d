//! Tessera: uniform task scheduling over game hosts
//!
//! Application code submits immediate, delayed, and periodic work to four
//! contexts (global, region, entity, and async) without knowing whether the
//! host runs all world logic on one thread or ticks regions on independent
//! threads. A [`Server`] picks the host family once at construction and
//! routes every submission to it.
//!
//! # Architecture
//!
//! - [`world`]: coordinates, region keys, owners, and the host entity interface
//! - [`host`]: the collaborator traits a host implements
//! - [`task`]: task handles and their completion futures
//! - [`scheduler`]: the four scheduler variants
//! - [`server`]: the facade
//! - [`config`]: scheduler configuration
//!
//! Every `run*` call returns immediately. Bodies run on host threads and
//! receive their own [`TaskHandle`], whose future resolves after the first
//! run with the body's result readable through it.
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera::{Owner, Server};
//!
//! let server = Server::new(&host, Owner::new("weather"))?;
//!
//! let task = server.global().run(|_| 42);
//! let done = task.as_future().wait()?;
//! assert_eq!(done.result(), Some(42));
//!
//! if let Some(task) = server.entity(&player).run_at_fixed_rate(
//!     |task| task.run_count(),
//!     None,
//!     0,
//!     20,
//! ) {
//!     task.cancel();
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod backend;
pub mod config;
pub mod error;
pub mod host;
pub mod scheduler;
pub mod server;
pub mod task;
pub mod world;

#[cfg(test)]
mod test_support;

pub use backend::BackendKind;
pub use config::{BackendPreference, SchedulerConfig};
pub use error::{ConfigError, SchedulerError, TaskFailure, TeleportError};
pub use host::{
    ExecutionState, Feature, Host, Lane, RegionizedHost, Retired, Schedule, ScheduledTask,
    TaskRef, TickHost,
};
pub use scheduler::{AsyncScheduler, EntityScheduler, GlobalScheduler, RegionScheduler};
pub use server::Server;
pub use task::{Completion, TaskFuture, TaskHandle};
pub use world::{
    Block, Chunk, Entity, EntityId, EntityRef, Location, Owner, OwnershipTarget, TeleportCause,
    World,
};
