use k8s_openapi::api::{apps::v1::StatefulSet, batch::v1::Job};
use kube::api::{ListParams, Patch};
use lrp_client::Store;
use lrp_core::labels::{source_type_selector, ANNOTATION_LATEST_MIGRATION, SOURCE_TYPE_APP, SOURCE_TYPE_TASK};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

use super::{validate, Error, ManagedObject, MigrationStep, ObjectType};

/// Outcome of a migration run
#[derive(Debug, Default)]
pub struct Report {
    /// Objects that got at least a new stamp
    pub migrated: Vec<String>,
    /// Objects already at the newest migration
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Outcome {
    Migrated,
    Skipped,
}

/// Runs the migration table over every managed object of a namespace
pub struct Executor {
    steps: Vec<Arc<dyn MigrationStep>>,
    latest: u32,
    statefulsets: Arc<dyn Store<StatefulSet>>,
    jobs: Arc<dyn Store<Job>>,
}

impl Executor {
    /// Fails with [`Error::InvalidSequence`] unless `steps` is properly ordered
    pub fn new(
        steps: Vec<Arc<dyn MigrationStep>>,
        statefulsets: Arc<dyn Store<StatefulSet>>,
        jobs: Arc<dyn Store<Job>>,
    ) -> Result<Self, Error> {
        let latest = validate(&steps)?;
        Ok(Self {
            steps,
            latest,
            statefulsets,
            jobs,
        })
    }

    /// Sequence id every object ends up stamped with
    pub fn latest_sequence_id(&self) -> u32 {
        self.latest
    }

    /// Migrate the LRP StatefulSets and task Jobs in `namespace`
    ///
    /// Failing to list objects aborts the run. A failure on a single object
    /// is recorded in the report and the run moves on to the next object.
    pub async fn migrate(&self, namespace: &str) -> Result<Report, Error> {
        info!(%namespace, latest = self.latest, steps = self.steps.len(), "migration start");
        let mut report = Report::default();

        let statefulsets = self
            .statefulsets
            .list(Some(namespace), &ListParams::default().labels(&source_type_selector(SOURCE_TYPE_APP)))
            .await
            .map_err(|source| Error::Store {
                phase: "list statefulsets",
                source,
            })?;
        self.migrate_all(statefulsets.into_iter().map(ManagedObject::StatefulSet), &mut report)
            .await;

        let jobs = self
            .jobs
            .list(Some(namespace), &ListParams::default().labels(&source_type_selector(SOURCE_TYPE_TASK)))
            .await
            .map_err(|source| Error::Store {
                phase: "list jobs",
                source,
            })?;
        self.migrate_all(jobs.into_iter().map(ManagedObject::Job), &mut report).await;

        info!(
            migrated = report.migrated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "migration end"
        );
        Ok(report)
    }

    async fn migrate_all(&self, objects: impl Iterator<Item = ManagedObject>, report: &mut Report) {
        for object in objects {
            let span = info_span!("migrate", object = %object);
            match self.migrate_object(&object).instrument(span).await {
                Ok(Outcome::Migrated) => report.migrated.push(object.to_string()),
                Ok(Outcome::Skipped) => report.skipped.push(object.to_string()),
                Err(err) => {
                    error!(%object, error = %err, "migration failed");
                    report.failed.push((object.to_string(), err));
                }
            }
        }
    }

    async fn migrate_object(&self, object: &ManagedObject) -> Result<Outcome, Error> {
        let stamped = object.latest_migration()?;
        if stamped >= self.latest {
            debug!(stamped, "up to date");
            return Ok(Outcome::Skipped);
        }

        let pending = self
            .steps
            .iter()
            .filter(|step| step.sequence_id() > stamped && step.applies_to() == object.object_type());
        for step in pending {
            let sequence_id = step.sequence_id();
            let step_failed = |source| Error::Step { sequence_id, source };
            if step.matches(object).await.map_err(step_failed)? {
                step.apply(object).await.map_err(step_failed)?;
                info!(sequence_id, "applied migration");
            } else {
                debug!(sequence_id, "migration does not match");
            }
        }

        self.stamp(object).await?;
        Ok(Outcome::Migrated)
    }

    async fn stamp(&self, object: &ManagedObject) -> Result<(), Error> {
        let patch = Patch::Merge(json!({
            "metadata": {
                "annotations": {
                    ANNOTATION_LATEST_MIGRATION: self.latest.to_string()
                }
            }
        }));
        let (namespace, name) = (object.namespace(), object.name());
        let stamped = match object.object_type() {
            ObjectType::StatefulSet => self.statefulsets.patch(namespace, name, &patch).await.map(drop),
            ObjectType::Job => self.jobs.patch(namespace, name, &patch).await.map(drop),
        };
        stamped.map_err(|source| Error::Store {
            phase: "stamp latest migration",
            source,
        })
    }
}
