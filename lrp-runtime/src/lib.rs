//! Components reconciling workload descriptors with the object store
//!
//! Each component drives one operation against a set of [`Store`]s:
//!
//! - [`LrpDesirer`] and [`TaskDesirer`] create a workload, its private
//!   registry secret and, for LRPs, its disruption budget
//! - [`LrpUpdater`] applies the mutable fields of an LRP with conflict retry
//! - [`LrpStopper`] and [`TaskStopper`] tear workloads down
//! - [`LrpGetter`] and [`TaskGetter`] read workloads back, including per
//!   instance state
//! - [`migrations::Executor`] brings objects created by earlier releases
//!   forward
//!
//! [`Engine`] wires all of them onto one [`Stores`] from a [`Config`].
//!
//! [`Store`]: lrp_client::Store
#![forbid(unsafe_code)]

pub mod budget;
pub use budget::DisruptionBudgets;

pub mod config;
pub use config::{Config, EventReasons};

pub mod desire;
pub use desire::{Desirer, LrpDesirer, TaskDesirer};

mod engine;
pub use engine::{Engine, Stores};

pub mod error;
pub use error::{Error, Result};

pub mod get;
pub use get::{LrpGetter, TaskGetter, TaskStatus};

mod lookup;
pub mod migrations;

pub mod retry;
pub use retry::{retry_on_conflict, ConflictBackoff};

mod secret;

pub mod state;
pub use state::{Instance, InstanceState};

pub mod stop;
pub use stop::{LrpStopper, TaskStopper};

pub mod update;
pub use update::LrpUpdater;

pub mod workload;
pub use workload::{LrpWorkload, TaskWorkload, Workload};
