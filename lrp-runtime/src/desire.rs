//! Creation of new workloads
use k8s_openapi::api::core::v1::Secret;
use kube::{api::DeleteParams, Resource, ResourceExt};
use lrp_client::Store;
use lrp_core::{
    convert::{self, Converter},
    registry::{registry_secret, SecretName},
    LrpConverter, PrivateRegistry, TaskConverter,
};
use std::{marker::PhantomData, sync::Arc};
use tracing::{debug, info, instrument, warn};

use crate::{
    budget::DisruptionBudgets,
    secret,
    workload::{LrpWorkload, TaskWorkload, Workload},
    Error, Result,
};

/// Creates the object, registry secret and disruption budget of a new workload
///
/// Desiring an identity that already has an object is a no-op, so callers
/// may repeat a desire whose outcome they did not see.
pub struct Desirer<W: Workload> {
    objects: Arc<dyn Store<W::Object>>,
    secrets: Arc<dyn Store<Secret>>,
    converter: Arc<dyn Converter<W::Descriptor, Object = W::Object>>,
    budgets: Option<DisruptionBudgets>,
    _kind: PhantomData<fn() -> W>,
}

pub type LrpDesirer = Desirer<LrpWorkload>;
pub type TaskDesirer = Desirer<TaskWorkload>;

impl<W: Workload> Clone for Desirer<W> {
    fn clone(&self) -> Self {
        Self {
            objects: self.objects.clone(),
            secrets: self.secrets.clone(),
            converter: self.converter.clone(),
            budgets: self.budgets.clone(),
            _kind: PhantomData,
        }
    }
}

impl Desirer<LrpWorkload> {
    pub fn new(
        statefulsets: Arc<dyn Store<k8s_openapi::api::apps::v1::StatefulSet>>,
        secrets: Arc<dyn Store<Secret>>,
        converter: LrpConverter,
        budgets: DisruptionBudgets,
    ) -> Self {
        Self {
            objects: statefulsets,
            secrets,
            converter: Arc::new(converter),
            budgets: Some(budgets),
            _kind: PhantomData,
        }
    }
}

impl Desirer<TaskWorkload> {
    pub fn new(
        jobs: Arc<dyn Store<k8s_openapi::api::batch::v1::Job>>,
        secrets: Arc<dyn Store<Secret>>,
        converter: TaskConverter,
    ) -> Self {
        Self {
            objects: jobs,
            secrets,
            converter: Arc::new(converter),
            budgets: None,
            _kind: PhantomData,
        }
    }
}

/// A registry secret this desire depends on
struct RegistrySecret {
    name: String,
    /// Created by this call, rather than left behind by an earlier one
    created: bool,
    /// Named by the API server, so no existing object can reference it
    generated: bool,
}

impl<W: Workload> Desirer<W> {
    /// Create the workload described by `descriptor` in `namespace`
    ///
    /// Private registry credentials go into a secret created before the
    /// object and adopted by it afterwards. If creating the object fails, the
    /// secret is deleted again on a best-effort basis.
    #[instrument(skip_all, fields(id = %W::identity(descriptor), %namespace))]
    pub async fn desire(&self, namespace: &str, descriptor: &W::Descriptor) -> Result<()> {
        let identity = W::identity(descriptor).to_string();

        let secret = match W::private_registry(descriptor) {
            Some(registry) => Some(
                self.create_registry_secret(namespace, &identity, W::registry_secret_name(descriptor), registry)
                    .await?,
            ),
            None => None,
        };

        let object = match self
            .converter
            .convert(descriptor, secret.as_ref().map(|s| s.name.as_str()))
        {
            Ok(object) => object,
            Err(err) => {
                let err = Error::conversion(&identity)(err);
                return Err(self.compensate(namespace, secret, err).await);
            }
        };

        let created = match self.objects.create(namespace, &object).await {
            Ok(created) => created,
            Err(err) if err.is_already_exists() => {
                debug!(error = %err, "object already exists");
                let unused = secret.as_ref().filter(|secret| secret.generated);
                if let Err(cleanup) = self.discard_secret(namespace, unused).await {
                    warn!(error = %cleanup, "failed to delete unused registry secret");
                }
                return Ok(());
            }
            Err(err) => {
                let err = Error::store("create object", &identity)(err);
                return Err(self.compensate(namespace, secret, err).await);
            }
        };

        if let Some(secret) = secret {
            if let Some(owner) = created.controller_owner_ref(&()) {
                secret::adopt(self.secrets.as_ref(), namespace, &secret.name, owner)
                    .await
                    .map_err(Error::store("adopt registry secret", &identity))?;
            }
        }

        if let (Some(budgets), Some((target_instances, selector))) =
            (&self.budgets, W::disruption_budget(descriptor))
        {
            budgets
                .reconcile(namespace, &created, &selector, target_instances)
                .await?;
        }

        info!(name = %created.name_any(), "desired");
        Ok(())
    }

    async fn create_registry_secret(
        &self,
        namespace: &str,
        identity: &str,
        name: SecretName,
        registry: &PrivateRegistry,
    ) -> Result<RegistrySecret> {
        let fixed_name = match &name {
            SecretName::Fixed(name) => Some(name.clone()),
            SecretName::Generated(_) => None,
        };
        let secret = registry_secret(name, registry)
            .map_err(|source| Error::conversion(identity)(convert::Error::RegistryCredentials(source)))?;

        match self.secrets.create(namespace, &secret).await {
            Ok(created) => Ok(RegistrySecret {
                name: created.name_any(),
                created: true,
                generated: fixed_name.is_none(),
            }),
            // left behind by an earlier attempt that did not get to create the object
            Err(err) if err.is_already_exists() => match fixed_name {
                Some(name) => {
                    debug!(%name, "registry secret already exists");
                    Ok(RegistrySecret {
                        name,
                        created: false,
                        generated: false,
                    })
                }
                None => Err(Error::store("create registry secret", identity)(err)),
            },
            Err(err) => Err(Error::store("create registry secret", identity)(err)),
        }
    }

    /// Remove the secret created for a workload that could not be created
    async fn compensate(&self, namespace: &str, secret: Option<RegistrySecret>, err: Error) -> Error {
        match self.discard_secret(namespace, secret.as_ref()).await {
            Ok(()) => err,
            Err(cleanup) => {
                warn!(error = %cleanup, "failed to delete registry secret");
                Error::SecretCleanup {
                    create: Box::new(err),
                    cleanup,
                }
            }
        }
    }

    /// Delete `secret` if this call created it
    async fn discard_secret(
        &self,
        namespace: &str,
        secret: Option<&RegistrySecret>,
    ) -> std::result::Result<(), lrp_client::Error> {
        let Some(secret) = secret.filter(|secret| secret.created) else {
            return Ok(());
        };
        match self
            .secrets
            .delete(namespace, &secret.name, &DeleteParams::default())
            .await
        {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::{apps::v1::StatefulSet, batch::v1::Job, policy::v1::PodDisruptionBudget};
    use lrp_client::{
        fake::{Failure, FakeCluster},
        Verb,
    };
    use lrp_core::{convert::Settings, names, Lrp, LrpIdentifier, Task};

    fn lrp(instances: i32) -> Lrp {
        Lrp {
            id: LrpIdentifier::new("g1", "v1"),
            app_name: "dora".into(),
            space_name: "space".into(),
            image: "busybox".into(),
            target_instances: instances,
            ..Lrp::default()
        }
    }

    fn registry() -> PrivateRegistry {
        PrivateRegistry {
            server: "registry.example.com".into(),
            username: "user".into(),
            password: "pass".into(),
        }
    }

    fn desirer(cluster: &FakeCluster) -> LrpDesirer {
        LrpDesirer::new(
            Arc::new(cluster.store::<StatefulSet>()),
            Arc::new(cluster.store::<Secret>()),
            LrpConverter::new(Settings::default()),
            DisruptionBudgets::new(Arc::new(cluster.store::<PodDisruptionBudget>()), "50%"),
        )
    }

    #[tokio::test]
    async fn desire_creates_the_statefulset() {
        let cluster = FakeCluster::new();
        desirer(&cluster).desire("ns", &lrp(1)).await.unwrap();

        let sets = cluster.objects::<StatefulSet>("ns");
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].spec.as_ref().unwrap().replicas, Some(1));
        assert!(cluster.objects::<PodDisruptionBudget>("ns").is_empty());
        assert!(cluster.objects::<Secret>("ns").is_empty());
    }

    #[tokio::test]
    async fn desire_twice_is_a_noop() {
        let cluster = FakeCluster::new();
        let desirer = desirer(&cluster);
        desirer.desire("ns", &lrp(3)).await.unwrap();
        desirer.desire("ns", &lrp(3)).await.unwrap();

        assert_eq!(cluster.objects::<StatefulSet>("ns").len(), 1);
        assert_eq!(cluster.objects::<PodDisruptionBudget>("ns").len(), 1);
    }

    #[tokio::test]
    async fn registry_secret_is_adopted_by_the_statefulset() {
        let cluster = FakeCluster::new();
        let lrp = Lrp {
            private_registry: Some(registry()),
            ..lrp(1)
        };
        desirer(&cluster).desire("ns", &lrp).await.unwrap();

        let sts = cluster.objects::<StatefulSet>("ns").remove(0);
        let secret_name = names::registry_secret_name(&sts.name_any());
        let secret = cluster.get::<Secret>("ns", &secret_name).expect("secret created");
        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners[0].uid, sts.uid().unwrap());
        assert_eq!(owners[0].kind, "StatefulSet");

        let pull_secrets: Vec<String> = sts.spec.clone().unwrap().template.spec.unwrap().image_pull_secrets.unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert!(pull_secrets.contains(&secret_name));

        // deleting the owner collects the secret
        cluster
            .store::<StatefulSet>()
            .delete("ns", &sts.name_any(), &DeleteParams::background())
            .await
            .unwrap();
        assert!(cluster.get::<Secret>("ns", &secret_name).is_none());
    }

    #[tokio::test]
    async fn failed_create_removes_the_secret() {
        let cluster = FakeCluster::new();
        cluster.fail::<StatefulSet>(Verb::Create, Failure::Internal("boom".into()));
        let lrp = Lrp {
            private_registry: Some(registry()),
            ..lrp(1)
        };
        let err = desirer(&cluster).desire("ns", &lrp).await.unwrap_err();
        assert!(matches!(err, Error::Store { phase: "create object", .. }));
        assert!(cluster.objects::<Secret>("ns").is_empty());
    }

    #[tokio::test]
    async fn failed_cleanup_is_reported_with_the_cause() {
        let cluster = FakeCluster::new();
        cluster.fail::<StatefulSet>(Verb::Create, Failure::Internal("boom".into()));
        cluster.fail::<Secret>(Verb::Delete, Failure::Internal("still boom".into()));
        let lrp = Lrp {
            private_registry: Some(registry()),
            ..lrp(1)
        };
        let err = desirer(&cluster).desire("ns", &lrp).await.unwrap_err();
        let Error::SecretCleanup { create, cleanup } = err else {
            panic!("expected a combined error, got {err}");
        };
        assert!(matches!(*create, Error::Store { phase: "create object", .. }));
        assert_eq!(cleanup.response().unwrap().message, "still boom");
    }

    #[tokio::test]
    async fn leftover_secret_from_an_earlier_attempt_is_reused() {
        let cluster = FakeCluster::new();
        let lrp = Lrp {
            private_registry: Some(registry()),
            ..lrp(1)
        };
        let secret_name = names::registry_secret_name(&names::statefulset_name(&lrp));
        cluster.insert(
            "ns",
            registry_secret(SecretName::Fixed(secret_name.clone()), &registry()).unwrap(),
        );

        desirer(&cluster).desire("ns", &lrp).await.unwrap();
        let secret = cluster.get::<Secret>("ns", &secret_name).unwrap();
        assert!(secret.metadata.owner_references.is_some());
    }

    #[tokio::test]
    async fn tasks_get_a_generated_secret_and_no_budget() {
        let cluster = FakeCluster::new();
        let desirer = TaskDesirer::new(
            Arc::new(cluster.store::<Job>()),
            Arc::new(cluster.store::<Secret>()),
            TaskConverter::new(Settings::default()),
        );
        let task = Task {
            guid: "task-1".into(),
            app_name: "dora".into(),
            space_name: "space".into(),
            image: "busybox".into(),
            private_registry: Some(registry()),
            ..Task::default()
        };
        desirer.desire("ns", &task).await.unwrap();

        let job = cluster.objects::<Job>("ns").remove(0);
        let secret = cluster.objects::<Secret>("ns").remove(0);
        assert!(secret.name_any().starts_with(names::TASK_REGISTRY_SECRET_PREFIX));
        assert_eq!(secret.metadata.owner_references.unwrap()[0].uid, job.uid().unwrap());
        assert_eq!(cluster.count::<PodDisruptionBudget>(Verb::Create), 0);
    }

    #[tokio::test]
    async fn repeated_task_desire_keeps_a_single_secret() {
        let cluster = FakeCluster::new();
        let desirer = TaskDesirer::new(
            Arc::new(cluster.store::<Job>()),
            Arc::new(cluster.store::<Secret>()),
            TaskConverter::new(Settings::default()),
        );
        let task = Task {
            guid: "task-1".into(),
            app_name: "dora".into(),
            space_name: "space".into(),
            image: "busybox".into(),
            private_registry: Some(registry()),
            ..Task::default()
        };
        for _ in 0..3 {
            desirer.desire("ns", &task).await.unwrap();
        }

        let job = cluster.objects::<Job>("ns").remove(0);
        let secrets = cluster.objects::<Secret>("ns");
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].metadata.owner_references.as_ref().unwrap()[0].uid, job.uid().unwrap());
    }

    #[tokio::test]
    async fn repeated_lrp_desire_keeps_the_adopted_secret() {
        let cluster = FakeCluster::new();
        let desirer = desirer(&cluster);
        let lrp = Lrp {
            private_registry: Some(registry()),
            ..lrp(1)
        };
        desirer.desire("ns", &lrp).await.unwrap();
        desirer.desire("ns", &lrp).await.unwrap();

        let secret_name = names::registry_secret_name(&names::statefulset_name(&lrp));
        let secret = cluster.get::<Secret>("ns", &secret_name).expect("secret kept");
        assert!(secret.metadata.owner_references.is_some());
        assert_eq!(cluster.objects::<Secret>("ns").len(), 1);
    }
}
