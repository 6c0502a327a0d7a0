//! Wiring of the engine components onto one set of stores
use k8s_openapi::api::{
    apps::v1::StatefulSet,
    batch::v1::Job,
    core::v1::{Event, Pod, Secret},
    policy::v1::PodDisruptionBudget,
};
use kube::Client;
use lrp_client::{KubeStore, Store};
use lrp_core::{LrpConverter, TaskConverter};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    budget::DisruptionBudgets,
    config::Config,
    desire::{LrpDesirer, TaskDesirer},
    get::{LrpGetter, TaskGetter},
    migrations::{self, Executor, MigrationStep},
    stop::{LrpStopper, TaskStopper},
    update::LrpUpdater,
};

/// One store per object kind the engine touches
#[derive(Clone)]
pub struct Stores {
    pub statefulsets: Arc<dyn Store<StatefulSet>>,
    pub jobs: Arc<dyn Store<Job>>,
    pub secrets: Arc<dyn Store<Secret>>,
    pub pods: Arc<dyn Store<Pod>>,
    pub events: Arc<dyn Store<Event>>,
    pub disruption_budgets: Arc<dyn Store<PodDisruptionBudget>>,
}

impl Stores {
    /// Stores talking to the API server through `client`
    pub fn kube(client: Client, timeout: Duration) -> Self {
        Self {
            statefulsets: Arc::new(KubeStore::<StatefulSet>::new(client.clone(), timeout)),
            jobs: Arc::new(KubeStore::<Job>::new(client.clone(), timeout)),
            secrets: Arc::new(KubeStore::<Secret>::new(client.clone(), timeout)),
            pods: Arc::new(KubeStore::<Pod>::new(client.clone(), timeout)),
            events: Arc::new(KubeStore::<Event>::new(client.clone(), timeout)),
            disruption_budgets: Arc::new(KubeStore::<PodDisruptionBudget>::new(client, timeout)),
        }
    }

    /// Stores backed by an in-memory cluster
    #[cfg(any(test, feature = "testing"))]
    pub fn fake(cluster: &lrp_client::fake::FakeCluster) -> Self {
        Self {
            statefulsets: Arc::new(cluster.store::<StatefulSet>()),
            jobs: Arc::new(cluster.store::<Job>()),
            secrets: Arc::new(cluster.store::<Secret>()),
            pods: Arc::new(cluster.store::<Pod>()),
            events: Arc::new(cluster.store::<Event>()),
            disruption_budgets: Arc::new(cluster.store::<PodDisruptionBudget>()),
        }
    }
}

/// Every component of the engine, configured from one [`Config`]
///
/// Objects rendered by the desirers are stamped with the newest id of the
/// migration table, so they are never migrated by this release.
#[derive(Clone)]
pub struct Engine {
    pub lrp_desirer: LrpDesirer,
    pub lrp_updater: LrpUpdater,
    pub lrp_stopper: LrpStopper,
    pub lrp_getter: LrpGetter,
    pub task_desirer: TaskDesirer,
    pub task_stopper: TaskStopper,
    pub task_getter: TaskGetter,
    pub migrations: Arc<Executor>,
}

impl Engine {
    /// Engine running the migration table shipped with this release
    pub fn new(config: &Config, stores: Stores) -> Result<Self, migrations::Error> {
        let steps = migrations::default_steps(stores.secrets.clone());
        Self::with_migrations(config, stores, steps)
    }

    /// Engine running a custom migration table
    ///
    /// Fails when `steps` is not ordered by strictly increasing ids.
    pub fn with_migrations(
        config: &Config,
        stores: Stores,
        steps: Vec<Arc<dyn MigrationStep>>,
    ) -> Result<Self, migrations::Error> {
        let executor = Executor::new(steps, stores.statefulsets.clone(), stores.jobs.clone())?;
        let settings = config.converter_settings(executor.latest_sequence_id());
        let budgets = DisruptionBudgets::new(stores.disruption_budgets.clone(), &config.default_min_available);
        let backoff = config.conflict_retry.clone();
        info!(
            latest_migration = executor.latest_sequence_id(),
            min_available = %config.default_min_available,
            "engine configured"
        );

        Ok(Self {
            lrp_desirer: LrpDesirer::new(
                stores.statefulsets.clone(),
                stores.secrets.clone(),
                LrpConverter::new(settings.clone()),
                budgets.clone(),
            ),
            lrp_updater: LrpUpdater::new(stores.statefulsets.clone(), budgets.clone(), backoff.clone()),
            lrp_stopper: LrpStopper::new(
                stores.statefulsets.clone(),
                stores.secrets.clone(),
                stores.pods.clone(),
                budgets,
                backoff,
            ),
            lrp_getter: LrpGetter::new(
                stores.statefulsets.clone(),
                stores.pods,
                stores.events,
                config.events.clone(),
            ),
            task_desirer: TaskDesirer::new(stores.jobs.clone(), stores.secrets.clone(), TaskConverter::new(settings)),
            task_stopper: TaskStopper::new(stores.jobs.clone(), stores.secrets),
            task_getter: TaskGetter::new(stores.jobs),
            migrations: Arc::new(executor),
        })
    }
}
