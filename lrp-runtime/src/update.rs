//! Updates of running LRPs
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use lrp_client::Store;
use lrp_core::{
    convert::{statefulset::selector, Error as ConvertError, LRP_CONTAINER_NAME},
    labels::{lrp_selector, ANNOTATION_LAST_UPDATED, ANNOTATION_ROUTES},
    Lrp,
};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    budget::DisruptionBudgets,
    lookup::get_one,
    retry::{retry_on_conflict, ConflictBackoff},
    Error, Result,
};

/// Applies the mutable part of an LRP descriptor to its StatefulSet
#[derive(Clone)]
pub struct LrpUpdater {
    statefulsets: Arc<dyn Store<StatefulSet>>,
    budgets: DisruptionBudgets,
    backoff: ConflictBackoff,
}

impl LrpUpdater {
    pub fn new(
        statefulsets: Arc<dyn Store<StatefulSet>>,
        budgets: DisruptionBudgets,
        backoff: ConflictBackoff,
    ) -> Self {
        Self {
            statefulsets,
            budgets,
            backoff,
        }
    }

    /// Update instance count, routes, last-updated marker and image of `lrp`
    ///
    /// Only these fields change; everything else on the stored object is
    /// kept, including edits made by others. An empty image leaves the
    /// current one in place. The whole read-merge-replace cycle is retried on
    /// conflicts.
    #[instrument(skip_all, fields(guid = %lrp.id.guid, version = %lrp.id.version))]
    pub async fn update(&self, lrp: &Lrp) -> Result<()> {
        let statefulsets = self.statefulsets.as_ref();
        let selector_str = lrp_selector(&lrp.id);
        let (selector_str, id) = (&selector_str, &lrp.id);

        let updated = retry_on_conflict(&self.backoff, move || async move {
            let current = get_one(statefulsets, selector_str, id).await?;
            let namespace = current.namespace().unwrap_or_default();
            let desired = merge(current, lrp).map_err(Error::conversion(id))?;
            statefulsets
                .replace(&namespace, &desired)
                .await
                .map_err(Error::store("update statefulset", id))
        })
        .await?;

        let namespace = updated.namespace().unwrap_or_default();
        self.budgets
            .reconcile(&namespace, &updated, &selector(&lrp.id), lrp.target_instances)
            .await?;
        info!(instances = lrp.target_instances, "updated");
        Ok(())
    }
}

/// `current` with the updatable fields taken from `lrp`
fn merge(mut current: StatefulSet, lrp: &Lrp) -> Result<StatefulSet, ConvertError> {
    let routes = serde_json::to_string(&lrp.routes).map_err(ConvertError::Encoding)?;
    let annotations = current.annotations_mut();
    annotations.insert(ANNOTATION_ROUTES.to_owned(), routes);
    annotations.insert(ANNOTATION_LAST_UPDATED.to_owned(), lrp.last_updated.clone());

    let spec = current.spec.as_mut().ok_or(ConvertError::MissingSpec)?;
    spec.replicas = Some(lrp.target_instances);
    if !lrp.image.is_empty() {
        let container = spec
            .template
            .spec
            .as_mut()
            .and_then(|pod| pod.containers.iter_mut().find(|c| c.name == LRP_CONTAINER_NAME))
            .ok_or(ConvertError::MissingContainer(LRP_CONTAINER_NAME))?;
        container.image = Some(lrp.image.clone());
    }
    Ok(current)
}
