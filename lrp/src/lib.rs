//! Reconcile long-running processes and tasks with Kubernetes workload objects
//!
//! A platform API hands the engine workload descriptors: an [`Lrp`] is a
//! replicated, routable application process and is managed as a
//! StatefulSet, a [`Task`] runs to completion once and is managed as a Job.
//! The engine creates, updates, stops and reads back those objects along
//! with the secrets and disruption budgets that go with them, and migrates
//! objects left behind by earlier releases.
//!
//! The crate is split in three:
//!
//! - [`core`] with the descriptors, well-known labels and the pure conversions
//!   between descriptors and objects
//! - [`client`] with the [`Store`](client::Store) seam over the API server
//! - [`runtime`] with the components driving each operation
//!
//! # Wiring an engine
//!
//! ```no_run
//! use lrp::{Config, Engine, LrpIdentifier, Stores};
//!
//! # async fn wrapper(client: kube::Client) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let engine = Engine::new(&config, Stores::kube(client, config.store_timeout()))?;
//!
//! let id = LrpIdentifier::new("process-guid", "v1");
//! for instance in engine.lrp_getter.get_instances(&id).await? {
//!     println!("{} {:?}", instance.index, instance.state);
//! }
//! engine.lrp_stopper.stop(&id).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every component takes its stores at construction. With the `testing`
//! feature, `Stores::fake` puts the whole engine on an in-memory cluster.
#![forbid(unsafe_code)]

pub use lrp_client as client;
pub use lrp_core as core;
pub use lrp_runtime as runtime;

pub use lrp_core::{Lrp, LrpIdentifier, Task};
pub use lrp_runtime::{
    migrations, Config, ConflictBackoff, Engine, Error, Instance, InstanceState, Result, Stores, TaskStatus,
};

#[cfg(test)] mod scenario_tests;
