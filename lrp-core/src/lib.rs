//! Core types for the lrp workload engine
//!
//! This crate contains the descriptor types handed to the engine by the
//! platform's API layer, the well-known labels and annotations persisted on
//! every managed object, and the pure conversions between descriptors and
//! Kubernetes workload objects.
//!
//! Nothing in here performs I/O. See `lrp-client` for the object store seam
//! and `lrp-runtime` for the components that talk to it.
#![forbid(unsafe_code)]

pub mod convert;
pub use convert::{Converter, LivenessProbeStrategy, LrpConverter, ReadinessProbeStrategy, TaskConverter};

pub mod descriptor;
pub use descriptor::{
    HealthCheck, HealthCheckKind, Lrp, LrpIdentifier, PrivateRegistry, Route, Sidecar, Task, VolumeMount,
};

pub mod labels;
pub mod names;
pub mod quantity;
pub mod registry;
