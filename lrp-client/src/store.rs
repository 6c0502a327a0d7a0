use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, future::Future, marker::PhantomData, time::Duration};

use crate::{Error, Result};

/// The store operations the engine issues
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Replace,
    Patch,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Replace => "replace",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        })
    }
}

/// Namespaced access to objects of kind `K`
///
/// `replace` carries the `resourceVersion` of `obj` and fails with a
/// conflict when the stored object has moved on. `delete` cascades to owned
/// objects unless `params` asks to orphan them.
#[async_trait]
pub trait Store<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    /// List objects matching the label and field selectors of `params`
    ///
    /// `None` lists across every namespace.
    async fn list(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn replace(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn patch(&self, namespace: &str, name: &str, patch: &Patch<serde_json::Value>) -> Result<K>;

    async fn delete(&self, namespace: &str, name: &str, params: &DeleteParams) -> Result<()>;
}

/// [`Store`] backed by the API server
pub struct KubeStore<K> {
    client: Client,
    timeout: Duration,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            timeout: self.timeout,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    /// Every call on the store fails with [`Error::Timeout`] after `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn timed<T>(&self, verb: Verb, call: impl Future<Output = kube::Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::Kube),
            Err(_elapsed) => {
                let kind = K::kind(&()).into_owned();
                tracing::warn!(%verb, %kind, timeout = ?self.timeout, "store call timed out");
                Err(Error::Timeout {
                    verb,
                    kind,
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl<K> Store<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + fmt::Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let api = self.api(namespace);
        self.timed(Verb::Get, api.get(name)).await
    }

    async fn list(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>> {
        let api = match namespace {
            Some(namespace) => self.api(namespace),
            None => Api::all(self.client.clone()),
        };
        let list = self.timed(Verb::List, api.list(params)).await?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let api = self.api(namespace);
        let pp = PostParams::default();
        self.timed(Verb::Create, api.create(&pp, obj)).await
    }

    async fn replace(&self, namespace: &str, obj: &K) -> Result<K> {
        let api = self.api(namespace);
        let pp = PostParams::default();
        let name = obj.name_any();
        self.timed(Verb::Replace, api.replace(&name, &pp, obj)).await
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Patch<serde_json::Value>) -> Result<K> {
        let api = self.api(namespace);
        let pp = PatchParams::default();
        self.timed(Verb::Patch, api.patch(name, &pp, patch)).await
    }

    async fn delete(&self, namespace: &str, name: &str, params: &DeleteParams) -> Result<()> {
        let api = self.api(namespace);
        self.timed(Verb::Delete, api.delete(name, params)).await?;
        Ok(())
    }
}
