//! The two kinds of workload the engine manages
//!
//! LRPs and tasks go through the same desire path with different strategies:
//! the descriptor type, the object kind it renders to, how its registry
//! secret is named and whether it gets a disruption budget.
use k8s_openapi::{
    api::{apps::v1::StatefulSet, batch::v1::Job},
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::Resource;
use lrp_core::{
    convert::{self, job_to_task, statefulset, statefulset_to_lrp},
    labels,
    names,
    registry::SecretName,
    Lrp, LrpIdentifier, PrivateRegistry, Task,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{Debug, Display};

/// A kind of workload, from descriptor to stored object and back
pub trait Workload: Send + Sync + 'static {
    type Identity: Display + Send + Sync + ?Sized;
    type Descriptor: Debug + Send + Sync;
    type Object: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// `source_type` label value of every object of this kind
    const SOURCE_TYPE: &'static str;

    fn identity(descriptor: &Self::Descriptor) -> &Self::Identity;

    /// Label selector matching the object managing `identity`
    fn selector(identity: &Self::Identity) -> String;

    fn to_descriptor(object: &Self::Object) -> convert::Result<Self::Descriptor>;

    fn private_registry(descriptor: &Self::Descriptor) -> Option<&PrivateRegistry>;

    fn registry_secret_name(descriptor: &Self::Descriptor) -> SecretName;

    /// Instance count and pod selector of the disruption budget to keep in
    /// line, `None` for run-once workloads
    fn disruption_budget(descriptor: &Self::Descriptor) -> Option<(i32, LabelSelector)>;
}

/// Long-running processes, as StatefulSets
#[derive(Clone, Copy, Debug)]
pub enum LrpWorkload {}

impl Workload for LrpWorkload {
    type Descriptor = Lrp;
    type Identity = LrpIdentifier;
    type Object = StatefulSet;

    const SOURCE_TYPE: &'static str = labels::SOURCE_TYPE_APP;

    fn identity(lrp: &Lrp) -> &LrpIdentifier {
        &lrp.id
    }

    fn selector(id: &LrpIdentifier) -> String {
        labels::lrp_selector(id)
    }

    fn to_descriptor(statefulset: &StatefulSet) -> convert::Result<Lrp> {
        statefulset_to_lrp(statefulset)
    }

    fn private_registry(lrp: &Lrp) -> Option<&PrivateRegistry> {
        lrp.private_registry.as_ref()
    }

    fn registry_secret_name(lrp: &Lrp) -> SecretName {
        SecretName::Fixed(names::registry_secret_name(&names::statefulset_name(lrp)))
    }

    fn disruption_budget(lrp: &Lrp) -> Option<(i32, LabelSelector)> {
        Some((lrp.target_instances, statefulset::selector(&lrp.id)))
    }
}

/// Run-once tasks, as Jobs
#[derive(Clone, Copy, Debug)]
pub enum TaskWorkload {}

impl Workload for TaskWorkload {
    type Descriptor = Task;
    type Identity = str;
    type Object = Job;

    const SOURCE_TYPE: &'static str = labels::SOURCE_TYPE_TASK;

    fn identity(task: &Task) -> &str {
        &task.guid
    }

    fn selector(guid: &str) -> String {
        labels::task_selector(guid)
    }

    fn to_descriptor(job: &Job) -> convert::Result<Task> {
        job_to_task(job)
    }

    fn private_registry(task: &Task) -> Option<&PrivateRegistry> {
        task.private_registry.as_ref()
    }

    fn registry_secret_name(_task: &Task) -> SecretName {
        SecretName::Generated(names::TASK_REGISTRY_SECRET_PREFIX.to_owned())
    }

    fn disruption_budget(_task: &Task) -> Option<(i32, LabelSelector)> {
        None
    }
}
