//! Teardown of workloads and their side resources
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    batch::v1::Job,
    core::v1::{Pod, Secret},
};
use kube::{api::DeleteParams, ResourceExt};
use lrp_client::Store;
use lrp_core::{
    labels::{lrp_selector, task_selector, ANNOTATION_COMPLETION_CALLBACK},
    names, LrpIdentifier,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::{
    budget::DisruptionBudgets,
    lookup::{find_one, get_one, ignore},
    retry::{retry_on_conflict, ConflictBackoff},
    secret, Error, Result,
};

/// Stops LRPs and single LRP instances
#[derive(Clone)]
pub struct LrpStopper {
    statefulsets: Arc<dyn Store<StatefulSet>>,
    secrets: Arc<dyn Store<Secret>>,
    pods: Arc<dyn Store<Pod>>,
    budgets: DisruptionBudgets,
    backoff: ConflictBackoff,
}

impl LrpStopper {
    pub fn new(
        statefulsets: Arc<dyn Store<StatefulSet>>,
        secrets: Arc<dyn Store<Secret>>,
        pods: Arc<dyn Store<Pod>>,
        budgets: DisruptionBudgets,
        backoff: ConflictBackoff,
    ) -> Self {
        Self {
            statefulsets,
            secrets,
            pods,
            budgets,
            backoff,
        }
    }

    /// Delete the StatefulSet of `id` along with its budget and registry secret
    ///
    /// Stopping an LRP that does not exist succeeds.
    #[instrument(skip_all, fields(guid = %id.guid, version = %id.version))]
    pub async fn stop(&self, id: &LrpIdentifier) -> Result<()> {
        let selector = lrp_selector(id);
        let selector = &selector;
        retry_on_conflict(&self.backoff, move || async move {
            let Some(statefulset) = find_one(self.statefulsets.as_ref(), selector, id).await? else {
                debug!("statefulset already gone");
                return Ok(());
            };
            let name = statefulset.name_any();
            let namespace = statefulset.namespace().unwrap_or_default();

            self.budgets.delete(&namespace, &name).await?;

            let secret = names::registry_secret_name(&name);
            let deleted = self
                .secrets
                .delete(&namespace, &secret, &DeleteParams::default())
                .await;
            ignore(deleted, lrp_client::Error::is_not_found)
                .map_err(Error::store("delete registry secret", id))?;

            let deleted = self
                .statefulsets
                .delete(&namespace, &name, &DeleteParams::background())
                .await;
            ignore(deleted, lrp_client::Error::is_not_found).map_err(Error::store("delete statefulset", id))?;
            info!(%name, "stopped");
            Ok(())
        })
        .await
    }

    /// Delete the pod running instance `index` of `id`
    ///
    /// The StatefulSet replaces the pod, which is how an instance is
    /// restarted. `index` must be below the target instance count.
    #[instrument(skip_all, fields(guid = %id.guid, version = %id.version, index))]
    pub async fn stop_instance(&self, id: &LrpIdentifier, index: u32) -> Result<()> {
        let Some(statefulset) = find_one(self.statefulsets.as_ref(), &lrp_selector(id), id).await? else {
            debug!("statefulset already gone");
            return Ok(());
        };
        let instances = statefulset
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(0);
        if i64::from(index) >= i64::from(instances) {
            return Err(Error::InvalidInstanceIndex {
                identity: id.to_string(),
                index,
                instances,
            });
        }

        let namespace = statefulset.namespace().unwrap_or_default();
        let pod = names::instance_pod_name(&statefulset.name_any(), index);
        let deleted = self.pods.delete(&namespace, &pod, &DeleteParams::default()).await;
        ignore(deleted, lrp_client::Error::is_not_found).map_err(Error::store("delete instance pod", id))?;
        info!(%pod, "stopped instance");
        Ok(())
    }
}

/// Deletes tasks once they have finished or were cancelled
#[derive(Clone)]
pub struct TaskStopper {
    jobs: Arc<dyn Store<Job>>,
    secrets: Arc<dyn Store<Secret>>,
}

impl TaskStopper {
    pub fn new(jobs: Arc<dyn Store<Job>>, secrets: Arc<dyn Store<Secret>>) -> Self {
        Self { jobs, secrets }
    }

    /// Delete the job of task `guid` and its registry secrets
    ///
    /// Returns the task's completion callback so the caller can report the
    /// outcome. Unlike stopping an LRP, the task must exist.
    #[instrument(skip(self))]
    pub async fn delete(&self, guid: &str) -> Result<String> {
        let job = get_one(self.jobs.as_ref(), &task_selector(guid), &guid).await?;
        let name = job.name_any();
        let namespace = job.namespace().unwrap_or_default();

        for secret_name in secret::task_registry_secrets(&job) {
            let deleted = self
                .secrets
                .delete(&namespace, &secret_name, &DeleteParams::default())
                .await;
            ignore(deleted, lrp_client::Error::is_not_found)
                .map_err(Error::store("delete registry secret", guid))?;
        }

        let deleted = self.jobs.delete(&namespace, &name, &DeleteParams::background()).await;
        ignore(deleted, lrp_client::Error::is_not_found).map_err(Error::store("delete job", guid))?;
        info!(%name, "deleted task");

        Ok(job
            .annotations()
            .get(ANNOTATION_COMPLETION_CALLBACK)
            .cloned()
            .unwrap_or_default())
    }
}
