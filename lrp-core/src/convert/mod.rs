//! Conversions between descriptors and workload objects
//!
//! The forward direction renders a complete object template from a
//! descriptor and is what the desirer submits to the store. The reverse
//! direction reads a stored object back into a descriptor for the getter.
//! Both are deterministic and do no I/O.
use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, ResourceRequirements};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::quantity::{megabytes, millicores, Quantity};

pub mod job;
pub use job::{job_to_task, TaskConverter};
pub mod probe;
pub use probe::{DefaultLivenessProbe, DefaultReadinessProbe, LivenessProbeStrategy, ReadinessProbeStrategy};
pub mod statefulset;
pub use statefulset::{statefulset_to_lrp, LrpConverter};

/// Name of the workload container in every LRP pod
pub const LRP_CONTAINER_NAME: &str = "opi";
/// Name of the workload container in every task pod
pub const TASK_CONTAINER_NAME: &str = "opi-task";

pub const ENV_POD_NAME: &str = "POD_NAME";
pub const ENV_INSTANCE_GUID: &str = "CF_INSTANCE_GUID";
pub const ENV_INSTANCE_IP: &str = "CF_INSTANCE_IP";
pub const ENV_INSTANCE_INTERNAL_IP: &str = "CF_INSTANCE_INTERNAL_IP";
pub const ENV_INSTANCE_ADDR: &str = "CF_INSTANCE_ADDR";
pub const ENV_INSTANCE_PORT: &str = "CF_INSTANCE_PORT";
pub const ENV_INSTANCE_PORTS: &str = "CF_INSTANCE_PORTS";

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to encode routes: {0}")]
    Encoding(#[source] serde_json::Error),
    #[error("failed to decode annotation {annotation}: {source}")]
    Decoding {
        annotation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render registry credentials: {0}")]
    RegistryCredentials(#[source] serde_json::Error),
    #[error("object has no {0} container")]
    MissingContainer(&'static str),
    #[error("object has no spec")]
    MissingSpec,
    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Renders the workload object for a descriptor
///
/// `private_registry_secret` names the pull secret holding the descriptor's
/// registry credentials, when it has any.
pub trait Converter<D>: Send + Sync {
    /// The workload object kind rendered
    type Object;

    /// Render the object template for `descriptor`
    fn convert(&self, descriptor: &D, private_registry_secret: Option<&str>) -> Result<Self::Object>;
}

/// Settings shared by the LRP and task converters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    /// Cluster-wide pull secret every pod references
    pub registry_secret_name: String,
    /// Service account application pods run as
    pub application_service_account: String,
    /// Mount the service account token into application pods
    pub allow_automount_service_account_token: bool,
    /// Do not force `runAsNonRoot` on LRP pods
    pub allow_run_image_as_root: bool,
    /// Stamped on every rendered object as the latest applied migration
    pub latest_migration: u32,
}

/// User env sorted by name, followed by values resolved by the kubelet at runtime
fn environment(env: &BTreeMap<String, String>) -> Vec<EnvVar> {
    let mut vars: Vec<EnvVar> = env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..EnvVar::default()
        })
        .collect();
    vars.extend([
        field_ref(ENV_POD_NAME, "metadata.name"),
        field_ref(ENV_INSTANCE_GUID, "metadata.uid"),
        field_ref(ENV_INSTANCE_IP, "status.hostIP"),
        field_ref(ENV_INSTANCE_INTERNAL_IP, "status.podIP"),
    ]);
    vars
}

fn field_ref(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_owned(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }
}

fn static_env(env: &BTreeMap<String, String>) -> Option<Vec<EnvVar>> {
    if env.is_empty() {
        return None;
    }
    Some(
        env.iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..EnvVar::default()
            })
            .collect(),
    )
}

fn resources(cpu_weight: u8, memory_mb: i64, disk_mb: i64) -> ResourceRequirements {
    let memory = megabytes(memory_mb);
    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("memory".to_owned(), memory.clone()),
            ("ephemeral-storage".to_owned(), megabytes(disk_mb)),
        ])),
        requests: Some(BTreeMap::from([
            ("memory".to_owned(), memory),
            ("cpu".to_owned(), millicores(cpu_weight)),
        ])),
        ..ResourceRequirements::default()
    }
}

fn read_megabytes(list: Option<&BTreeMap<String, Quantity>>, resource: &str) -> Result<i64> {
    match list.and_then(|list| list.get(resource)) {
        None => Ok(0),
        Some(quantity) => {
            crate::quantity::to_megabytes(quantity).ok_or_else(|| Error::InvalidQuantity(quantity.0.clone()))
        }
    }
}
