//! Reading workloads back
use futures::future::try_join_all;
use k8s_openapi::{
    api::{
        apps::v1::StatefulSet,
        batch::v1::Job,
        core::v1::{Event, Pod},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
use kube::{api::ListParams, ResourceExt};
use lrp_client::Store;
use lrp_core::{
    labels::{lrp_selector, source_type_selector, task_selector},
    names, Lrp, LrpIdentifier, Task,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::{
    config::EventReasons,
    lookup::get_one,
    state::{classify, pod_state, EventVerdict, Instance, InstanceState, INSUFFICIENT_MEMORY_ERROR},
    workload::{LrpWorkload, TaskWorkload, Workload},
    Error, Result,
};

/// Every object of kind `W`, converted back to descriptors
///
/// One object that fails to convert fails the whole listing.
async fn list_all<W: Workload>(store: &dyn Store<W::Object>) -> Result<Vec<W::Descriptor>> {
    let params = ListParams::default().labels(&source_type_selector(W::SOURCE_TYPE));
    let objects = store
        .list(None, &params)
        .await
        .map_err(Error::store("list objects", W::SOURCE_TYPE))?;
    objects
        .iter()
        .map(|object| W::to_descriptor(object).map_err(Error::conversion(object.name_any())))
        .collect()
}

/// Reads LRPs and their instances
#[derive(Clone)]
pub struct LrpGetter {
    statefulsets: Arc<dyn Store<StatefulSet>>,
    pods: Arc<dyn Store<Pod>>,
    events: Arc<dyn Store<Event>>,
    reasons: EventReasons,
}

impl LrpGetter {
    pub fn new(
        statefulsets: Arc<dyn Store<StatefulSet>>,
        pods: Arc<dyn Store<Pod>>,
        events: Arc<dyn Store<Event>>,
        reasons: EventReasons,
    ) -> Self {
        Self {
            statefulsets,
            pods,
            events,
            reasons,
        }
    }

    #[instrument(skip_all, fields(guid = %id.guid, version = %id.version))]
    pub async fn get(&self, id: &LrpIdentifier) -> Result<Lrp> {
        let statefulset = get_one(self.statefulsets.as_ref(), &lrp_selector(id), id).await?;
        LrpWorkload::to_descriptor(&statefulset).map_err(Error::conversion(id))
    }

    /// The instances of `id`, minus those being shut down
    #[instrument(skip_all, fields(guid = %id.guid, version = %id.version))]
    pub async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<Instance>> {
        get_one(self.statefulsets.as_ref(), &lrp_selector(id), id).await?;

        let params = ListParams::default().labels(&lrp_selector(id));
        let pods = self
            .pods
            .list(None, &params)
            .await
            .map_err(Error::store("list pods", id))?;
        let instances = try_join_all(pods.iter().map(|pod| self.instance(id, pod))).await?;
        Ok(instances.into_iter().flatten().collect())
    }

    #[instrument(skip_all)]
    pub async fn list(&self) -> Result<Vec<Lrp>> {
        list_all::<LrpWorkload>(self.statefulsets.as_ref()).await
    }

    async fn instance(&self, id: &LrpIdentifier, pod: &Pod) -> Result<Option<Instance>> {
        let name = pod.name_any();
        let Some(index) = names::instance_index(&name) else {
            warn!(pod = %name, "pod name carries no instance index");
            return Ok(None);
        };
        let namespace = pod.namespace().unwrap_or_default();
        let params = ListParams::default().fields(&format!("involvedObject.name={name}"));
        let events = self
            .events
            .list(Some(&namespace), &params)
            .await
            .map_err(Error::store("list pod events", id))?;

        let (state, placement_error) = match classify(&events, &self.reasons) {
            EventVerdict::Stopping => {
                debug!(pod = %name, "instance is being stopped");
                return Ok(None);
            }
            EventVerdict::InsufficientMemory => (InstanceState::Error, Some(INSUFFICIENT_MEMORY_ERROR.to_owned())),
            EventVerdict::None => (pod_state(pod), None),
        };
        let since = pod
            .status
            .as_ref()
            .and_then(|status| status.start_time.as_ref())
            .and_then(|start| start.0.timestamp_nanos_opt())
            .unwrap_or(0);

        Ok(Some(Instance {
            index,
            since,
            state,
            placement_error,
        }))
    }
}

/// Progress of a task
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum TaskStatus {
    /// Not picked up by the job controller yet
    Starting,
    Running { started_at: Time },
    Succeeded { started_at: Time, ended_at: Option<Time> },
    Failed {
        started_at: Time,
        ended_at: Option<Time>,
        reason: String,
    },
}

/// Reads tasks and their progress
#[derive(Clone)]
pub struct TaskGetter {
    jobs: Arc<dyn Store<Job>>,
}

impl TaskGetter {
    pub fn new(jobs: Arc<dyn Store<Job>>) -> Self {
        Self { jobs }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, guid: &str) -> Result<Task> {
        let job = get_one(self.jobs.as_ref(), &task_selector(guid), &guid).await?;
        TaskWorkload::to_descriptor(&job).map_err(Error::conversion(guid))
    }

    #[instrument(skip_all)]
    pub async fn list(&self) -> Result<Vec<Task>> {
        list_all::<TaskWorkload>(self.jobs.as_ref()).await
    }

    #[instrument(skip(self))]
    pub async fn status(&self, guid: &str) -> Result<TaskStatus> {
        let job = get_one(self.jobs.as_ref(), &task_selector(guid), &guid).await?;
        Ok(task_status(&job))
    }
}

fn task_status(job: &Job) -> TaskStatus {
    let Some(status) = &job.status else {
        return TaskStatus::Starting;
    };
    let Some(started_at) = status.start_time.clone() else {
        return TaskStatus::Starting;
    };
    let conditions = status.conditions.as_deref().unwrap_or_default();

    if status.succeeded.unwrap_or(0) > 0 {
        return TaskStatus::Succeeded {
            started_at,
            ended_at: status.completion_time.clone(),
        };
    }
    let failed = conditions
        .iter()
        .filter(|c| c.type_ == "Failed" && c.status == "True")
        .max_by_key(|c| c.last_transition_time.as_ref().map(|t| t.0));
    if let Some(failed) = failed {
        return TaskStatus::Failed {
            started_at,
            ended_at: failed.last_transition_time.clone(),
            reason: failed.reason.clone().unwrap_or_default(),
        };
    }
    if status.failed.unwrap_or(0) > 0 {
        return TaskStatus::Failed {
            started_at,
            ended_at: None,
            reason: String::new(),
        };
    }
    TaskStatus::Running { started_at }
}
