//! Descriptors handed to the engine by the platform's API layer
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Identity of a long-running process
///
/// The `(guid, version)` pair is immutable once the process is desired and
/// names exactly one managed object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LrpIdentifier {
    /// Process guid
    pub guid: String,
    /// Process version
    pub version: String,
}

impl LrpIdentifier {
    /// Create an identifier from its parts
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for LrpIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.guid, self.version)
    }
}

/// A routable hostname bound to a container port
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Fully qualified hostname
    pub hostname: String,
    /// Container port the route forwards to
    pub port: u32,
}

/// Credentials for pulling the image from a private registry
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateRegistry {
    /// Registry host, e.g. `registry.example.com`
    pub server: String,
    /// Registry user
    pub username: String,
    /// Registry password
    pub password: String,
}

impl fmt::Debug for PrivateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateRegistry")
            .field("server", &self.server)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A persistent volume claim mounted into the workload container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of the claim, also used as the volume name
    pub claim_name: String,
    /// Where the volume is mounted
    pub mount_path: String,
}

/// An extra container running next to the workload container
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    /// Container name
    pub name: String,
    /// Command to run
    pub command: Vec<String>,
    /// Static environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Memory request and limit in megabytes
    #[serde(rename = "memoryMB")]
    pub memory_mb: i64,
}

/// How the platform decides an instance is alive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    /// HTTP GET against `endpoint` on `port`
    Http,
    /// TCP connect to `port`
    Port,
    /// The process being up is enough
    Process,
    /// No health checking
    #[default]
    None,
}

/// Health check declared for an LRP
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// Check kind
    #[serde(rename = "type")]
    pub kind: HealthCheckKind,
    /// Port probed by `http` and `port` checks
    pub port: i32,
    /// Path probed by `http` checks
    #[serde(default)]
    pub endpoint: String,
    /// Time the instance has to become healthy
    #[serde(rename = "timeoutMs")]
    pub timeout_ms: u32,
}

/// A long-running process: an application with a target replica count and routes
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lrp {
    /// Immutable identity
    #[serde(flatten)]
    pub id: LrpIdentifier,
    pub process_type: String,
    pub app_guid: String,
    pub app_name: String,
    pub space_guid: String,
    pub space_name: String,
    pub org_guid: String,
    pub org_name: String,
    /// Image of the workload container. Empty on update means "leave as is".
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<i32>,
    pub routes: Vec<Route>,
    pub target_instances: i32,
    /// Read back from the object status; ignored when desiring
    pub running_instances: i32,
    /// Relative CPU share, rendered as `cpu_weight * 10` millicores
    pub cpu_weight: u8,
    #[serde(rename = "memoryMB")]
    pub memory_mb: i64,
    #[serde(rename = "diskMB")]
    pub disk_mb: i64,
    pub health_check: HealthCheck,
    pub private_registry: Option<PrivateRegistry>,
    pub sidecars: Vec<Sidecar>,
    pub volume_mounts: Vec<VolumeMount>,
    /// Passed through to the object annotations untouched
    pub user_defined_annotations: BTreeMap<String, String>,
    /// The request the platform received, preserved verbatim
    pub original_request: String,
    /// Caller supplied, monotonic
    pub last_updated: String,
}

impl Lrp {
    /// The platform's process guid, `<app guid>-<version>`
    pub fn process_guid(&self) -> String {
        format!("{}-{}", self.app_guid, self.id.version)
    }
}

/// A one-shot workload with a single terminal outcome
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub guid: String,
    /// Optional human readable name, appended to the job name
    pub name: String,
    pub app_guid: String,
    pub app_name: String,
    pub space_guid: String,
    pub space_name: String,
    pub org_guid: String,
    pub org_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cpu_weight: u8,
    #[serde(rename = "memoryMB")]
    pub memory_mb: i64,
    #[serde(rename = "diskMB")]
    pub disk_mb: i64,
    pub private_registry: Option<PrivateRegistry>,
    /// Called by the platform once the task reaches its terminal state
    pub completion_callback: String,
}
