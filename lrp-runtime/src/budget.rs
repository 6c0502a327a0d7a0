//! Pod disruption budgets of LRPs
//!
//! An LRP with more than one instance gets a budget keeping part of its
//! instances up during voluntary disruptions such as node drains. The budget
//! shares the StatefulSet's name and selector and is owned by it.
use k8s_openapi::{
    api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec},
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta},
        util::intstr::IntOrString,
    },
};
use kube::{api::DeleteParams, Resource, ResourceExt};
use lrp_client::Store;
use std::sync::Arc;
use tracing::debug;

use crate::{lookup::ignore, Error, Result};

/// Creates and removes disruption budgets so they exist exactly for LRPs with
/// more than one instance
#[derive(Clone)]
pub struct DisruptionBudgets {
    store: Arc<dyn Store<PodDisruptionBudget>>,
    min_available: IntOrString,
}

impl DisruptionBudgets {
    /// `min_available` is a count such as `"1"` or a percentage such as `"50%"`
    pub fn new(store: Arc<dyn Store<PodDisruptionBudget>>, min_available: &str) -> Self {
        let min_available = match min_available.parse::<i32>() {
            Ok(count) => IntOrString::Int(count),
            Err(_) => IntOrString::String(min_available.to_owned()),
        };
        Self { store, min_available }
    }

    /// Bring the budget of `owner` in line with `target_instances`
    ///
    /// The budget protects the pods matching `selector`. Creating a budget
    /// that exists and deleting one that does not are both success.
    pub async fn reconcile<K>(
        &self,
        namespace: &str,
        owner: &K,
        selector: &LabelSelector,
        target_instances: i32,
    ) -> Result<()>
    where
        K: Resource<DynamicType = ()>,
    {
        let name = owner.name_any();
        if target_instances > 1 {
            debug!(%name, target_instances, "ensuring disruption budget");
            let created = self.store.create(namespace, &self.budget_for(owner, selector)).await;
            ignore(created.map(|_| ()), lrp_client::Error::is_already_exists)
                .map_err(Error::store("create disruption budget", &name))
        } else {
            self.delete(namespace, &name).await
        }
    }

    /// Delete the budget named `name`, if there is one
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let deleted = self.store.delete(namespace, name, &DeleteParams::default()).await;
        ignore(deleted, lrp_client::Error::is_not_found).map_err(Error::store("delete disruption budget", name))
    }

    fn budget_for<K>(&self, owner: &K, selector: &LabelSelector) -> PodDisruptionBudget
    where
        K: Resource<DynamicType = ()>,
    {
        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(owner.name_any()),
                owner_references: owner.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..ObjectMeta::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                min_available: Some(self.min_available.clone()),
                selector: Some(selector.clone()),
                ..PodDisruptionBudgetSpec::default()
            }),
            ..PodDisruptionBudget::default()
        }
    }
}
