//! Deterministic object names
//!
//! Object names must be valid DNS-1123 labels and stable across restarts,
//! since instance pods, registry secrets and disruption budgets are all found
//! by name derived from the workload object's name.
use crate::descriptor::{Lrp, Task};
use sha2::{Digest, Sha256};

const LRP_PREFIX_MAX_LEN: usize = 40;
const TASK_PREFIX_MAX_LEN: usize = 50;
const SUFFIX_LEN: usize = 10;

/// Prefix used with `generateName` for task registry secrets
pub const TASK_REGISTRY_SECRET_PREFIX: &str = "private-registry-";

/// Name of the StatefulSet managing `lrp`
pub fn statefulset_name(lrp: &Lrp) -> String {
    let prefix = sanitize(
        &format!("{}-{}", lrp.app_name, lrp.space_name),
        &lrp.id.guid,
        LRP_PREFIX_MAX_LEN,
    );
    format!("{prefix}-{}", digest(&format!("{}-{}", lrp.id.guid, lrp.id.version)))
}

/// Name of the Job running `task`
pub fn job_name(task: &Task) -> String {
    let mut name = format!("{}-{}", task.app_name, task.space_name);
    if !task.name.is_empty() {
        name = format!("{name}-{}", task.name);
    }
    let prefix = sanitize(&name, &task.guid, TASK_PREFIX_MAX_LEN);
    format!("{prefix}-{}", digest(&task.guid))
}

/// Name of the private registry secret owned by the StatefulSet `statefulset_name`
pub fn registry_secret_name(statefulset_name: &str) -> String {
    format!("{statefulset_name}-registry-credentials")
}

/// Name of the pod running instance `index` of the StatefulSet `statefulset_name`
pub fn instance_pod_name(statefulset_name: &str, index: u32) -> String {
    format!("{statefulset_name}-{index}")
}

/// Instance index encoded in a StatefulSet pod name
pub fn instance_index(pod_name: &str) -> Option<u32> {
    pod_name.rsplit_once('-').and_then(|(_, index)| index.parse().ok())
}

/// `value` made acceptable as a label value
///
/// Label values are at most 63 characters of `[A-Za-z0-9_.-]`, starting and
/// ending with an alphanumeric.
pub fn label_value(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .take(63)
        .collect();
    replaced.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_owned()
}

/// `name` as a DNS label prefix, or `fallback` when `name` has non-ASCII characters
fn sanitize(name: &str, fallback: &str, max_len: usize) -> String {
    if name.is_ascii() {
        let sanitized = dns_label(name, max_len);
        if !sanitized.is_empty() {
            return sanitized;
        }
    }
    dns_label(fallback, max_len)
}

/// Lowercase alphanumerics and `-`, starting and ending with an alphanumeric
fn dns_label(name: &str, max_len: usize) -> String {
    let replaced: String = name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .take(max_len)
        .collect();
    replaced.trim_matches('-').to_owned()
}

fn digest(input: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(input.as_bytes()));
    hex.truncate(SUFFIX_LEN);
    hex
}
