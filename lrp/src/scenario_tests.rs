// End to end behaviour of the engine on an in-memory cluster
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::StatefulSet,
        batch::v1::Job,
        core::v1::Secret,
        policy::v1::PodDisruptionBudget,
    },
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference},
};
use kube::ResourceExt;
use lrp_client::fake::FakeCluster;
use lrp_core::{
    descriptor::PrivateRegistry,
    labels::{ANNOTATION_LATEST_MIGRATION, LABEL_GUID, LABEL_SOURCE_TYPE, LABEL_VERSION, SOURCE_TYPE_APP},
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{
    migrations::{ManagedObject, MigrationStep, ObjectType},
    Config, Engine, Error, Lrp, LrpIdentifier, Stores, Task,
};

fn engine(cluster: &FakeCluster) -> Engine {
    let config = Config {
        conflict_retry: crate::ConflictBackoff::immediate(5),
        ..Config::default()
    };
    Engine::new(&config, Stores::fake(cluster)).unwrap()
}

fn id() -> LrpIdentifier {
    LrpIdentifier::new("g1", "v1")
}

fn lrp(instances: i32, image: &str) -> Lrp {
    Lrp {
        id: id(),
        app_name: "dora".into(),
        space_name: "space".into(),
        image: image.into(),
        target_instances: instances,
        ..Lrp::default()
    }
}

fn budgets(cluster: &FakeCluster) -> usize {
    cluster.objects::<PodDisruptionBudget>("ns").len()
}

#[tokio::test]
async fn single_instance_lrps_have_no_budget() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    engine.lrp_desirer.desire("ns", &lrp(1, "busybox")).await.unwrap();

    let stored = engine.lrp_getter.get(&id()).await.unwrap();
    assert_eq!(stored.target_instances, 1);
    assert_eq!(stored.image, "busybox");
    assert_eq!(budgets(&cluster), 0);
}

#[tokio::test]
async fn replicated_lrps_get_a_budget() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    engine.lrp_desirer.desire("ns", &lrp(5, "busybox")).await.unwrap();
    assert_eq!(budgets(&cluster), 1);
}

#[tokio::test]
async fn budget_follows_scaling() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    engine.lrp_desirer.desire("ns", &lrp(1, "busybox")).await.unwrap();
    assert_eq!(budgets(&cluster), 0);

    engine.lrp_updater.update(&lrp(2, "busybox")).await.unwrap();
    assert_eq!(budgets(&cluster), 1);

    engine.lrp_updater.update(&lrp(1, "busybox")).await.unwrap();
    assert_eq!(budgets(&cluster), 0);
}

#[tokio::test]
async fn empty_image_on_update_keeps_the_stored_one() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    engine.lrp_desirer.desire("ns", &lrp(1, "X")).await.unwrap();
    engine.lrp_updater.update(&lrp(3, "")).await.unwrap();

    let stored = engine.lrp_getter.get(&id()).await.unwrap();
    assert_eq!(stored.image, "X");
    assert_eq!(stored.target_instances, 3);
}

#[tokio::test]
async fn instance_index_must_be_below_the_instance_count() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    engine.lrp_desirer.desire("ns", &lrp(2, "busybox")).await.unwrap();

    let err = engine.lrp_stopper.stop_instance(&id(), 9).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInstanceIndex { index: 9, instances: 2, .. }));
    engine.lrp_stopper.stop_instance(&id(), 1).await.unwrap();
}

#[tokio::test]
async fn desire_is_idempotent_and_stop_cleans_up() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    let mut desired = lrp(3, "busybox");
    desired.private_registry = Some(PrivateRegistry {
        server: "registry.example.com".into(),
        username: "user".into(),
        password: "pass".into(),
    });
    engine.lrp_desirer.desire("ns", &desired).await.unwrap();
    engine.lrp_desirer.desire("ns", &desired).await.unwrap();
    assert_eq!(cluster.objects::<StatefulSet>("ns").len(), 1);
    assert_eq!(cluster.objects::<Secret>("ns").len(), 1);
    assert_eq!(budgets(&cluster), 1);

    engine.lrp_stopper.stop(&id()).await.unwrap();
    assert!(cluster.objects::<StatefulSet>("ns").is_empty());
    assert!(cluster.objects::<Secret>("ns").is_empty());
    assert_eq!(budgets(&cluster), 0);

    // stopping what is gone is fine, reading it is not
    engine.lrp_stopper.stop(&id()).await.unwrap();
    assert!(engine.lrp_getter.get(&id()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn duplicate_objects_are_reported_not_resolved() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    engine.lrp_desirer.desire("ns", &lrp(1, "busybox")).await.unwrap();
    engine.lrp_desirer.desire("other", &lrp(1, "busybox")).await.unwrap();

    let err = engine.lrp_getter.get(&id()).await.unwrap_err();
    assert!(matches!(err, Error::MultipleObjects { count: 2, .. }));
    let err = engine.lrp_updater.update(&lrp(2, "busybox")).await.unwrap_err();
    assert!(matches!(err, Error::MultipleObjects { .. }));
}

#[tokio::test]
async fn tasks_run_and_are_deleted_with_their_secret() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    let task = Task {
        guid: "t1".into(),
        name: "migrate".into(),
        app_name: "dora".into(),
        space_name: "space".into(),
        image: "busybox".into(),
        completion_callback: "http://cc/t1".into(),
        private_registry: Some(PrivateRegistry {
            server: "registry.example.com".into(),
            username: "user".into(),
            password: "pass".into(),
        }),
        ..Task::default()
    };
    engine.task_desirer.desire("ns", &task).await.unwrap();

    let secrets = cluster.objects::<Secret>("ns");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].owner_references()[0].kind, "Job");
    assert_eq!(engine.task_getter.get("t1").await.unwrap().image, "busybox");
    assert_eq!(engine.task_getter.status("t1").await.unwrap(), crate::TaskStatus::Starting);

    assert_eq!(engine.task_stopper.delete("t1").await.unwrap(), "http://cc/t1");
    assert!(cluster.objects::<Job>("ns").is_empty());
    assert!(cluster.objects::<Secret>("ns").is_empty());
    assert!(engine.task_stopper.delete("t1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn repeated_task_desire_leaves_one_owned_secret() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    let task = Task {
        guid: "t1".into(),
        app_name: "dora".into(),
        space_name: "space".into(),
        image: "busybox".into(),
        private_registry: Some(PrivateRegistry {
            server: "registry.example.com".into(),
            username: "user".into(),
            password: "pass".into(),
        }),
        ..Task::default()
    };
    for _ in 0..3 {
        engine.task_desirer.desire("ns", &task).await.unwrap();
    }

    assert_eq!(cluster.objects::<Job>("ns").len(), 1);
    let secrets = cluster.objects::<Secret>("ns");
    assert_eq!(secrets.len(), 1);
    assert_eq!(secrets[0].owner_references()[0].kind, "Job");
}

#[tokio::test]
async fn unsupported_app_names_are_named_after_the_guid() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    let lrp = Lrp {
        app_name: "Балдър".into(),
        space_name: "_space".into(),
        ..lrp(1, "busybox")
    };
    engine.lrp_desirer.desire("ns", &lrp).await.unwrap();

    let name = cluster.objects::<StatefulSet>("ns")[0].name_any();
    assert!(name.starts_with("g1-"), "{name}");
    assert_eq!(engine.lrp_getter.get(&id()).await.unwrap().app_name, "Балдър");

    let task = Task {
        guid: "t1".into(),
        app_name: "-dora".into(),
        space_name: "space".into(),
        image: "busybox".into(),
        ..Task::default()
    };
    engine.task_desirer.desire("ns", &task).await.unwrap();
    let name = cluster.objects::<Job>("ns")[0].name_any();
    assert!(name.starts_with("dora-space-"), "{name}");
}

/// Counts how often it ran, optionally only against unowned objects
struct Recorded {
    id: u32,
    only_unowned: bool,
    applied: AtomicUsize,
}

#[async_trait]
impl MigrationStep for Recorded {
    fn sequence_id(&self) -> u32 {
        self.id
    }

    fn applies_to(&self) -> ObjectType {
        ObjectType::StatefulSet
    }

    async fn matches(&self, object: &ManagedObject) -> lrp_runtime::Result<bool> {
        Ok(!self.only_unowned || object.meta().owner_references.as_ref().map_or(true, Vec::is_empty))
    }

    async fn apply(&self, _: &ManagedObject) -> lrp_runtime::Result<()> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn old_objects_are_migrated_exactly_once() {
    let cluster = FakeCluster::new();
    cluster.insert(
        "ns",
        StatefulSet {
            metadata: ObjectMeta {
                name: Some("dora-space-0123456789".into()),
                labels: Some(BTreeMap::from([
                    (LABEL_GUID.to_owned(), "g1".to_owned()),
                    (LABEL_VERSION.to_owned(), "v1".to_owned()),
                    (LABEL_SOURCE_TYPE.to_owned(), SOURCE_TYPE_APP.to_owned()),
                ])),
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_LATEST_MIGRATION.to_owned(),
                    "0".to_owned(),
                )])),
                ..ObjectMeta::default()
            },
            ..StatefulSet::default()
        },
    );
    let unconditional = Arc::new(Recorded {
        id: 1,
        only_unowned: false,
        applied: AtomicUsize::new(0),
    });
    let conditional = Arc::new(Recorded {
        id: 2,
        only_unowned: true,
        applied: AtomicUsize::new(0),
    });
    let steps = vec![
        unconditional.clone() as Arc<dyn MigrationStep>,
        conditional.clone() as Arc<dyn MigrationStep>,
    ];
    let engine = Engine::with_migrations(&Config::default(), Stores::fake(&cluster), steps).unwrap();

    let report = engine.migrations.migrate("ns").await.unwrap();
    assert!(report.is_success());
    let stored = &cluster.objects::<StatefulSet>("ns")[0];
    assert_eq!(stored.annotations()[ANNOTATION_LATEST_MIGRATION], "2");
    assert_eq!(unconditional.applied.load(Ordering::SeqCst), 1);
    assert_eq!(conditional.applied.load(Ordering::SeqCst), 1);

    let report = engine.migrations.migrate("ns").await.unwrap();
    assert!(report.migrated.is_empty());
    assert_eq!(unconditional.applied.load(Ordering::SeqCst), 1);
    assert_eq!(conditional.applied.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shipped_migrations_adopt_orphaned_registry_secrets() {
    let cluster = FakeCluster::new();
    let engine = engine(&cluster);
    let mut desired = lrp(1, "busybox");
    desired.private_registry = Some(PrivateRegistry::default());
    engine.lrp_desirer.desire("ns", &desired).await.unwrap();

    // what an earlier release left behind: an unowned secret and no stamp
    let mut secret = cluster.objects::<Secret>("ns").remove(0);
    secret.metadata.owner_references = None;
    cluster.insert("ns", secret.clone());
    let mut old = cluster.objects::<StatefulSet>("ns").remove(0);
    old.annotations_mut().remove(ANNOTATION_LATEST_MIGRATION);
    cluster.insert("ns", old);

    let report = engine.migrations.migrate("ns").await.unwrap();
    assert_eq!(report.migrated.len(), 1);
    let adopted = cluster.get::<Secret>("ns", &secret.name_any()).unwrap();
    let owners: &[OwnerReference] = adopted.owner_references();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "StatefulSet");
}
