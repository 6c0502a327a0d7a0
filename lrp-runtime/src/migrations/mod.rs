//! Forward migration of objects created by earlier releases
//!
//! Every managed object carries the sequence id of the newest migration
//! applied to it in [`ANNOTATION_LATEST_MIGRATION`]. Objects rendered by the
//! current release are stamped with the newest id known to it, so only
//! objects created before an upgrade are ever migrated.
//!
//! Migrations are an ordered table of [`MigrationStep`]s. The [`Executor`]
//! applies to each object the steps newer than its stamp whose predicate
//! matches, then stamps it with the newest id so it is not scanned again.
//! Steps must be safe to repeat: a run interrupted half way is simply run
//! again.
use async_trait::async_trait;
use k8s_openapi::{
    api::{apps::v1::StatefulSet, batch::v1::Job, core::v1::Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::Resource;
use lrp_client::Store;
use lrp_core::labels::ANNOTATION_LATEST_MIGRATION;
use std::{fmt, num::ParseIntError, sync::Arc};
use thiserror::Error;

mod adopt_secret;
pub use adopt_secret::{AdoptJobRegistrySecret, AdoptStatefulSetRegistrySecret};
mod executor;
pub use executor::{Executor, Report};

#[derive(Debug, Error)]
pub enum Error {
    #[error("migration sequence ids must start at 1 and strictly increase, found {found} after {previous}")]
    InvalidSequence { previous: u32, found: u32 },

    #[error("invalid latest migration annotation {value:?}: {source}")]
    Annotation {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("migration {sequence_id} failed: {source}")]
    Step {
        sequence_id: u32,
        #[source]
        source: crate::Error,
    },

    #[error("failed to {phase}: {source}")]
    Store {
        phase: &'static str,
        #[source]
        source: lrp_client::Error,
    },
}

/// Kinds of objects migrations apply to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    StatefulSet,
    Job,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectType::StatefulSet => "StatefulSet",
            ObjectType::Job => "Job",
        })
    }
}

/// An object under migration
#[derive(Clone, Debug)]
pub enum ManagedObject {
    StatefulSet(StatefulSet),
    Job(Job),
}

impl ManagedObject {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ManagedObject::StatefulSet(_) => ObjectType::StatefulSet,
            ManagedObject::Job(_) => ObjectType::Job,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::StatefulSet(sts) => sts.meta(),
            ManagedObject::Job(job) => job.meta(),
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// Sequence id of the newest migration applied, 0 when never migrated
    pub fn latest_migration(&self) -> Result<u32, Error> {
        match self
            .meta()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(ANNOTATION_LATEST_MIGRATION))
        {
            None => Ok(0),
            Some(value) if value.is_empty() => Ok(0),
            Some(value) => value.parse().map_err(|source| Error::Annotation {
                value: value.clone(),
                source,
            }),
        }
    }
}

impl fmt::Display for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.object_type(), self.namespace(), self.name())
    }
}

/// One idempotent transform in the migration table
#[async_trait]
pub trait MigrationStep: Send + Sync {
    /// Position in the table, at least 1 and unique
    fn sequence_id(&self) -> u32;

    fn applies_to(&self) -> ObjectType;

    /// Whether `object` still needs this step
    async fn matches(&self, object: &ManagedObject) -> crate::Result<bool>;

    async fn apply(&self, object: &ManagedObject) -> crate::Result<()>;
}

/// The migration table of this release
pub fn default_steps(secrets: Arc<dyn Store<Secret>>) -> Vec<Arc<dyn MigrationStep>> {
    let adopt_statefulset: Arc<dyn MigrationStep> = Arc::new(AdoptStatefulSetRegistrySecret::new(secrets.clone()));
    let adopt_job: Arc<dyn MigrationStep> = Arc::new(AdoptJobRegistrySecret::new(secrets));
    vec![adopt_statefulset, adopt_job]
}

/// Check that `steps` is ordered by strictly increasing ids starting from 1,
/// returning the newest id
pub fn validate(steps: &[Arc<dyn MigrationStep>]) -> Result<u32, Error> {
    steps.iter().try_fold(0, |previous, step| {
        let found = step.sequence_id();
        if found > previous {
            Ok(found)
        } else {
            Err(Error::InvalidSequence { previous, found })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Noop(u32);

    #[async_trait]
    impl MigrationStep for Noop {
        fn sequence_id(&self) -> u32 {
            self.0
        }

        fn applies_to(&self) -> ObjectType {
            ObjectType::StatefulSet
        }

        async fn matches(&self, _: &ManagedObject) -> crate::Result<bool> {
            Ok(true)
        }

        async fn apply(&self, _: &ManagedObject) -> crate::Result<()> {
            Ok(())
        }
    }

    fn table(ids: &[u32]) -> Vec<Arc<dyn MigrationStep>> {
        ids.iter().map(|&id| Arc::new(Noop(id)) as Arc<dyn MigrationStep>).collect()
    }

    #[test]
    fn tables_must_be_strictly_increasing() {
        assert_eq!(validate(&table(&[])).unwrap(), 0);
        assert_eq!(validate(&table(&[1, 2, 5])).unwrap(), 5);
        assert!(matches!(
            validate(&table(&[1, 3, 2])),
            Err(Error::InvalidSequence { previous: 3, found: 2 })
        ));
        assert!(matches!(
            validate(&table(&[1, 1])),
            Err(Error::InvalidSequence { previous: 1, found: 1 })
        ));
        assert!(matches!(
            validate(&table(&[0])),
            Err(Error::InvalidSequence { previous: 0, found: 0 })
        ));
    }

    #[test]
    fn shipped_table_is_valid() {
        let secrets: Arc<dyn Store<Secret>> = Arc::new(lrp_client::fake::FakeCluster::new().store::<Secret>());
        assert_eq!(validate(&default_steps(secrets)).unwrap(), 2);
    }

    fn annotated(value: Option<&str>) -> ManagedObject {
        let mut sts = StatefulSet::default();
        if let Some(value) = value {
            sts.metadata.annotations = Some(BTreeMap::from([(
                ANNOTATION_LATEST_MIGRATION.to_owned(),
                value.to_owned(),
            )]));
        }
        ManagedObject::StatefulSet(sts)
    }

    #[test]
    fn missing_marker_means_never_migrated() {
        assert_eq!(annotated(None).latest_migration().unwrap(), 0);
        assert_eq!(annotated(Some("")).latest_migration().unwrap(), 0);
        assert_eq!(annotated(Some("3")).latest_migration().unwrap(), 3);
        assert!(matches!(
            annotated(Some("three")).latest_migration(),
            Err(Error::Annotation { .. })
        ));
    }
}
