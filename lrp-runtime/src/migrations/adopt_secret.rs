//! Registry secrets created before secrets were owned by their workload
use async_trait::async_trait;
use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::OwnerReference};
use kube::Resource;
use lrp_client::Store;
use std::sync::Arc;
use tracing::info;

use super::{ManagedObject, MigrationStep, ObjectType};
use crate::{secret, Error, Result};

/// Makes each StatefulSet the owner of its private registry secret
pub struct AdoptStatefulSetRegistrySecret {
    secrets: Arc<dyn Store<Secret>>,
}

impl AdoptStatefulSetRegistrySecret {
    pub const SEQUENCE_ID: u32 = 1;

    pub fn new(secrets: Arc<dyn Store<Secret>>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl MigrationStep for AdoptStatefulSetRegistrySecret {
    fn sequence_id(&self) -> u32 {
        Self::SEQUENCE_ID
    }

    fn applies_to(&self) -> ObjectType {
        ObjectType::StatefulSet
    }

    async fn matches(&self, object: &ManagedObject) -> Result<bool> {
        Ok(!orphans(self.secrets.as_ref(), object).await?.is_empty())
    }

    async fn apply(&self, object: &ManagedObject) -> Result<()> {
        adopt_orphans(self.secrets.as_ref(), object).await
    }
}

/// Makes each Job the owner of the secret generated for its private registry
pub struct AdoptJobRegistrySecret {
    secrets: Arc<dyn Store<Secret>>,
}

impl AdoptJobRegistrySecret {
    pub const SEQUENCE_ID: u32 = 2;

    pub fn new(secrets: Arc<dyn Store<Secret>>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl MigrationStep for AdoptJobRegistrySecret {
    fn sequence_id(&self) -> u32 {
        Self::SEQUENCE_ID
    }

    fn applies_to(&self) -> ObjectType {
        ObjectType::Job
    }

    async fn matches(&self, object: &ManagedObject) -> Result<bool> {
        Ok(!orphans(self.secrets.as_ref(), object).await?.is_empty())
    }

    async fn apply(&self, object: &ManagedObject) -> Result<()> {
        adopt_orphans(self.secrets.as_ref(), object).await
    }
}

fn registry_secrets(object: &ManagedObject) -> Vec<String> {
    match object {
        ManagedObject::StatefulSet(sts) => secret::lrp_registry_secrets(sts),
        ManagedObject::Job(job) => secret::task_registry_secrets(job),
    }
}

fn owner_ref(object: &ManagedObject) -> Option<OwnerReference> {
    match object {
        ManagedObject::StatefulSet(sts) => sts.controller_owner_ref(&()),
        ManagedObject::Job(job) => job.controller_owner_ref(&()),
    }
}

/// Registry secrets of `object` that exist and have no owner
async fn orphans(secrets: &dyn Store<Secret>, object: &ManagedObject) -> Result<Vec<String>> {
    let mut orphans = vec![];
    for name in registry_secrets(object) {
        match secrets.get(object.namespace(), &name).await {
            Ok(found) if !secret::is_owned(&found) => orphans.push(name),
            Ok(_) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(Error::store("get registry secret", object)(err)),
        }
    }
    Ok(orphans)
}

async fn adopt_orphans(secrets: &dyn Store<Secret>, object: &ManagedObject) -> Result<()> {
    let Some(owner) = owner_ref(object) else {
        return Ok(());
    };
    for name in orphans(secrets, object).await? {
        secret::adopt(secrets, object.namespace(), &name, owner.clone())
            .await
            .map_err(Error::store("adopt registry secret", object))?;
        info!(secret = %name, "adopted registry secret");
    }
    Ok(())
}
