//! Reference hosts for tessera
//!
//! Two in-process game servers, one per host family, built from real
//! threads:
//!
//! - [`TickServer`]: one ticking primary thread plus an async worker pool
//! - [`RegionServer`]: independent ticking threads per region of chunks, a
//!   global region thread and an async worker pool
//!
//! Both implement [`tessera::Host`], so a [`tessera::Server`] built against
//! either selects the matching backend. They exist to exercise the facade
//! end to end and to measure it; [`SimEntity`] stands in for game entities.
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera::{Owner, Server};
//! use tessera_host::{HostConfig, RegionServer};
//!
//! let host = RegionServer::start(HostConfig::default())?;
//! let server = Server::new(&host, Owner::new("demo"))?;
//! let answer = server.global().run(|_task| 42).as_future().wait();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod async_pool;
pub mod config;
pub mod entity;
pub mod error;
pub mod region_server;
pub mod task;
pub mod tick_loop;
pub mod tick_server;

pub use async_pool::AsyncPool;
pub use config::HostConfig;
pub use entity::SimEntity;
pub use error::HostError;
pub use region_server::RegionServer;
pub use task::{SimTask, TaskRegistry};
pub use tick_loop::TickLoop;
pub use tick_server::TickServer;
