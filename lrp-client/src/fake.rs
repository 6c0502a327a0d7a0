//! In-memory object store for tests
//!
//! [`FakeCluster`] holds every object as JSON keyed by kind, namespace and
//! name. It assigns uids and resource versions, rejects stale replaces and
//! patches with a conflict, resolves `generateName`, filters lists by
//! equality label and field selectors, and garbage collects dependents on
//! delete by following owner references. Failures can be queued per verb
//! and kind to drive error paths.
use async_trait::async_trait;
use kube::{
    api::{DeleteParams, ListParams, Patch, PropagationPolicy},
    Resource,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

use crate::{error::api_error, Error, Result, Store, Verb};

/// A failure to answer the next matching call with
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    Conflict,
    NotFound,
    AlreadyExists,
    Timeout,
    Internal(String),
}

/// A call received by the cluster, in order of arrival
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    revision: u64,
    uids: u64,
    generated: u64,
    failures: Vec<(Verb, String, Failure)>,
    calls: Vec<Call>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uids += 1;
        format!("uid-{}", self.uids)
    }

    fn record(&mut self, verb: Verb, kind: &str, namespace: Option<&str>, name: Option<&str>) -> Result<()> {
        self.calls.push(Call {
            verb,
            kind: kind.to_owned(),
            namespace: namespace.map(str::to_owned),
            name: name.map(str::to_owned),
        });
        let Some(pos) = self.failures.iter().position(|(v, k, _)| *v == verb && k == kind) else {
            return Ok(());
        };
        let (_, _, failure) = self.failures.remove(pos);
        Err(match failure {
            Failure::Conflict => api_error(409, "Conflict", format!("injected conflict on {verb} {kind}")),
            Failure::NotFound => api_error(404, "NotFound", format!("injected not found on {verb} {kind}")),
            Failure::AlreadyExists => api_error(409, "AlreadyExists", format!("injected duplicate on {verb} {kind}")),
            Failure::Internal(message) => api_error(500, "InternalError", message),
            Failure::Timeout => Error::Timeout {
                verb,
                kind: kind.to_owned(),
                timeout: Duration::ZERO,
            },
        })
    }

    /// Remove `key` and everything transitively owned by it
    fn remove_cascading(&mut self, key: &Key) {
        let Some(removed) = self.objects.remove(key) else {
            return;
        };
        let mut owners: Vec<String> = uid(&removed).into_iter().collect();
        let mut seen = BTreeSet::new();
        while let Some(owner) = owners.pop() {
            if !seen.insert(owner.clone()) {
                continue;
            }
            let dependents: Vec<Key> = self
                .objects
                .iter()
                .filter(|(_, obj)| owner_uids(obj).any(|uid| uid == owner))
                .map(|(key, _)| key.clone())
                .collect();
            for key in dependents {
                if let Some(obj) = self.objects.remove(&key) {
                    owners.extend(uid(&obj));
                }
            }
        }
    }
}

fn uid(obj: &Value) -> Option<String> {
    obj.pointer("/metadata/uid").and_then(Value::as_str).map(str::to_owned)
}

fn resource_version(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion").and_then(Value::as_str)
}

fn owner_uids(obj: &Value) -> impl Iterator<Item = &str> {
    obj.pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|owner| owner.get("uid").and_then(Value::as_str))
}

/// Shared in-memory cluster, cheap to clone
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`Store`] view of the objects of kind `K`
    pub fn store<K>(&self) -> FakeStore<K> {
        FakeStore {
            cluster: self.clone(),
            _kind: PhantomData,
        }
    }

    /// Put `obj` in place without going through a store call
    ///
    /// Fills in namespace, uid and resource version like a create would,
    /// and overwrites whatever was stored under the same name.
    pub fn insert<K>(&self, namespace: &str, mut obj: K) -> K
    where
        K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    {
        let mut state = self.state.lock();
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.to_owned());
        if meta.uid.is_none() {
            meta.uid = Some(state.next_uid());
        }
        meta.resource_version = Some(state.next_revision());
        let key = Key {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_owned(),
            name: meta.name.clone().unwrap_or_default(),
        };
        let value = serde_json::to_value(&obj).expect("objects serialize");
        state.objects.insert(key, value);
        obj
    }

    /// The stored object, if any
    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let key = Key {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        let state = self.state.lock();
        state
            .objects
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).expect("stored objects deserialize"))
    }

    /// Every stored object of kind `K` in `namespace`, ordered by name
    pub fn objects<K>(&self, namespace: &str) -> Vec<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let kind = K::kind(&());
        let state = self.state.lock();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .map(|(_, value)| serde_json::from_value(value.clone()).expect("stored objects deserialize"))
            .collect()
    }

    /// Fail the next `verb` on kind `K` with `failure`
    ///
    /// Failures queue up, each one is consumed by a single call.
    pub fn fail<K>(&self, verb: Verb, failure: Failure)
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&()).into_owned();
        self.state.lock().failures.push((verb, kind, failure));
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// How many times `verb` was called on kind `K`
    pub fn count<K>(&self, verb: Verb) -> usize
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&());
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.verb == verb && call.kind == kind)
            .count()
    }
}

/// [`Store`] over the objects of kind `K` in a [`FakeCluster`]
pub struct FakeStore<K> {
    cluster: FakeCluster,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for FakeStore<K> {
    fn clone(&self) -> Self {
        Self {
            cluster: self.cluster.clone(),
            _kind: PhantomData,
        }
    }
}

fn not_found(kind: &str, name: &str) -> Error {
    api_error(404, "NotFound", format!("{kind} \"{name}\" not found"))
}

fn decode<K: DeserializeOwned>(value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(|err| api_error(500, "InternalError", err.to_string()))
}

fn encode<K: Serialize>(obj: &K) -> Result<Value> {
    serde_json::to_value(obj).map_err(|err| api_error(400, "BadRequest", err.to_string()))
}

#[async_trait]
impl<K> Store<K> for FakeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        let kind = K::kind(&()).into_owned();
        let mut state = self.cluster.state.lock();
        state.record(Verb::Get, &kind, Some(namespace), Some(name))?;
        let key = Key {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        let value = state.objects.get(&key).cloned().ok_or_else(|| not_found(&key.kind, name))?;
        decode(value)
    }

    async fn list(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<K>> {
        let kind = K::kind(&()).into_owned();
        let mut state = self.cluster.state.lock();
        state.record(Verb::List, &kind, namespace, None)?;
        let labels = params.label_selector.as_deref().map(parse_selector).unwrap_or_default();
        let fields = params.field_selector.as_deref().map(parse_selector).unwrap_or_default();
        state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && namespace.is_none_or(|ns| key.namespace == ns))
            .filter(|(_, obj)| labels.iter().all(|req| req.matches_label(obj)))
            .filter(|(_, obj)| fields.iter().all(|req| req.matches_field(obj)))
            .map(|(_, obj)| decode(obj.clone()))
            .collect()
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let kind = K::kind(&()).into_owned();
        let mut state = self.cluster.state.lock();
        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        state.record(Verb::Create, &kind, Some(namespace), meta.name.as_deref())?;
        if meta.name.is_none() {
            let Some(prefix) = meta.generate_name.clone() else {
                return Err(api_error(422, "Invalid", "name or generateName is required"));
            };
            state.generated += 1;
            meta.name = Some(format!("{prefix}{:05x}", state.generated));
        }
        let key = Key {
            kind,
            namespace: namespace.to_owned(),
            name: meta.name.clone().unwrap_or_default(),
        };
        if state.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", key.kind, key.name),
            ));
        }
        meta.namespace = Some(namespace.to_owned());
        meta.uid = Some(state.next_uid());
        meta.resource_version = Some(state.next_revision());
        state.objects.insert(key, encode(&obj)?);
        Ok(obj)
    }

    async fn replace(&self, namespace: &str, obj: &K) -> Result<K> {
        let kind = K::kind(&()).into_owned();
        let name = obj.meta().name.clone().unwrap_or_default();
        let mut state = self.cluster.state.lock();
        state.record(Verb::Replace, &kind, Some(namespace), Some(&name))?;
        let key = Key {
            kind,
            namespace: namespace.to_owned(),
            name,
        };
        let stored = state.objects.get(&key).ok_or_else(|| not_found(&key.kind, &key.name))?;
        if let Some(expected) = obj.meta().resource_version.as_deref() {
            if resource_version(stored) != Some(expected) {
                return Err(api_error(409, "Conflict", "the object has been modified"));
            }
        }
        let uid = uid(stored);
        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.namespace = Some(namespace.to_owned());
        meta.uid = uid;
        meta.resource_version = Some(state.next_revision());
        state.objects.insert(key, encode(&obj)?);
        Ok(obj)
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &Patch<Value>) -> Result<K> {
        let kind = K::kind(&()).into_owned();
        let mut state = self.cluster.state.lock();
        state.record(Verb::Patch, &kind, Some(namespace), Some(name))?;
        let patch = match patch {
            Patch::Merge(patch) | Patch::Strategic(patch) => patch,
            _ => return Err(api_error(415, "UnsupportedMediaType", "only merge patches are supported")),
        };
        let key = Key {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        let revision = state.next_revision();
        let stored = state
            .objects
            .get_mut(&key)
            .ok_or_else(|| not_found(&key.kind, name))?;
        if let Some(expected) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
            if resource_version(stored) != Some(expected) {
                return Err(api_error(409, "Conflict", "the object has been modified"));
            }
        }
        json_patch::merge(stored, patch);
        stored["metadata"]["resourceVersion"] = Value::String(revision);
        decode(stored.clone())
    }

    async fn delete(&self, namespace: &str, name: &str, params: &DeleteParams) -> Result<()> {
        let kind = K::kind(&()).into_owned();
        let mut state = self.cluster.state.lock();
        state.record(Verb::Delete, &kind, Some(namespace), Some(name))?;
        let key = Key {
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        };
        if !state.objects.contains_key(&key) {
            return Err(not_found(&key.kind, name));
        }
        if matches!(params.propagation_policy, Some(PropagationPolicy::Orphan)) {
            state.objects.remove(&key);
        } else {
            state.remove_cascading(&key);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

fn parse_selector(selector: &str) -> Vec<Requirement> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(key.trim().to_owned(), value.trim().to_owned())
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                Requirement::Equals(key.trim().to_owned(), value.trim().to_owned())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::DoesNotExist(key.trim().to_owned())
            } else {
                Requirement::Exists(term.to_owned())
            }
        })
        .collect()
}

impl Requirement {
    fn check(&self, lookup: impl Fn(&str) -> Option<String>) -> bool {
        match self {
            Requirement::Equals(key, value) => lookup(key).as_deref() == Some(value.as_str()),
            Requirement::NotEquals(key, value) => lookup(key).as_deref() != Some(value.as_str()),
            Requirement::Exists(key) => lookup(key).is_some(),
            Requirement::DoesNotExist(key) => lookup(key).is_none(),
        }
    }

    fn matches_label(&self, obj: &Value) -> bool {
        self.check(|key| {
            obj.pointer("/metadata/labels")
                .and_then(|labels| labels.get(key))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
    }

    fn matches_field(&self, obj: &Value) -> bool {
        self.check(|path| {
            let pointer = format!("/{}", path.replace('.', "/"));
            obj.pointer(&pointer).and_then(|value| match value {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
        })
    }
}
