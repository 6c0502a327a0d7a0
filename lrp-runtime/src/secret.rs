//! Ownership of registry secrets
use k8s_openapi::{
    api::{apps::v1::StatefulSet, batch::v1::Job, core::v1::Secret},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{api::Patch, ResourceExt};
use lrp_client::Store;
use lrp_core::names;
use serde_json::json;

/// Make `owner` the controller of the secret `name`, for garbage collection
///
/// The owner's uid only exists once it has been created, so secrets are
/// created unowned and adopted afterwards.
pub(crate) async fn adopt(
    secrets: &dyn Store<Secret>,
    namespace: &str,
    name: &str,
    owner: OwnerReference,
) -> lrp_client::Result<Secret> {
    let patch = json!({
        "metadata": {
            "ownerReferences": [owner]
        }
    });
    secrets.patch(namespace, name, &Patch::Merge(patch)).await
}

/// Whether anything owns `secret` yet
pub(crate) fn is_owned(secret: &Secret) -> bool {
    secret
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| !owners.is_empty())
}

/// Pull secrets of `statefulset` holding its private registry credentials
pub(crate) fn lrp_registry_secrets(statefulset: &StatefulSet) -> Vec<String> {
    let own = names::registry_secret_name(&statefulset.name_any());
    let referenced = statefulset
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.image_pull_secrets.as_ref());
    referenced
        .into_iter()
        .flatten()
        .filter(|secret| secret.name == own)
        .map(|secret| secret.name.clone())
        .collect()
}

/// Pull secrets of `job` created for the task's private registry
pub(crate) fn task_registry_secrets(job: &Job) -> Vec<String> {
    job.spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.image_pull_secrets.as_ref())
        .into_iter()
        .flatten()
        .map(|secret| secret.name.clone())
        .filter(|name| name.starts_with(names::TASK_REGISTRY_SECRET_PREFIX))
        .collect()
}
