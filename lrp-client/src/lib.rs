//! Object store access for the lrp workload engine
//!
//! Every component of the engine reaches the cluster through the [`Store`]
//! trait, one handle per resource kind, passed in at construction. The
//! production implementation is [`KubeStore`], a thin wrapper over
//! [`kube::Api`] that bounds every call with a timeout. With the `testing`
//! feature, [`fake::FakeCluster`] provides an in-memory substitute with the
//! same optimistic concurrency and garbage collection semantics.
#![forbid(unsafe_code)]

pub mod error;
pub use error::{Error, Result};

mod store;
pub use store::{KubeStore, Store, Verb};

#[cfg(any(test, feature = "testing"))]
pub mod fake;


pub use kube::api::{DeleteParams, ListParams, Patch, PropagationPolicy};
