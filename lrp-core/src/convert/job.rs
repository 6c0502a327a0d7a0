//! Task <-> Job
use k8s_openapi::{
    api::{
        batch::v1::{Job, JobSpec},
        core::v1::{Container, EnvVar, LocalObjectReference, PodSecurityContext, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use std::collections::BTreeMap;

use super::{
    environment, read_megabytes, resources, Converter, Error, Result, Settings, ENV_INSTANCE_ADDR,
    ENV_INSTANCE_PORT, ENV_INSTANCE_PORTS, TASK_CONTAINER_NAME,
};
use crate::{descriptor::Task, labels::*, names};

/// Renders tasks as run-once Jobs
#[derive(Clone, Debug)]
pub struct TaskConverter {
    settings: Settings,
}

impl TaskConverter {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl Converter<Task> for TaskConverter {
    type Object = Job;

    fn convert(&self, task: &Task, private_registry_secret: Option<&str>) -> Result<Job> {
        let mut labels = BTreeMap::from([
            (LABEL_GUID.to_owned(), task.guid.clone()),
            (LABEL_APP_GUID.to_owned(), task.app_guid.clone()),
            (LABEL_SOURCE_TYPE.to_owned(), SOURCE_TYPE_TASK.to_owned()),
            (LABEL_ORG_GUID.to_owned(), task.org_guid.clone()),
            (LABEL_SPACE_GUID.to_owned(), task.space_guid.clone()),
        ]);
        if !task.name.is_empty() {
            labels.insert(LABEL_TASK_NAME.to_owned(), names::label_value(&task.name));
        }
        let annotations = BTreeMap::from([
            (ANNOTATION_APP_NAME.to_owned(), task.app_name.clone()),
            (ANNOTATION_APP_ID.to_owned(), task.app_guid.clone()),
            (ANNOTATION_ORG_NAME.to_owned(), task.org_name.clone()),
            (ANNOTATION_ORG_GUID.to_owned(), task.org_guid.clone()),
            (ANNOTATION_SPACE_NAME.to_owned(), task.space_name.clone()),
            (ANNOTATION_SPACE_GUID.to_owned(), task.space_guid.clone()),
            (ANNOTATION_COMPLETION_CALLBACK.to_owned(), task.completion_callback.clone()),
            (ANNOTATION_SECCOMP.to_owned(), SECCOMP_RUNTIME_DEFAULT.to_owned()),
            (
                ANNOTATION_LATEST_MIGRATION.to_owned(),
                self.settings.latest_migration.to_string(),
            ),
        ]);

        let mut env = environment(&task.env);
        env.extend([
            plain_env(ENV_INSTANCE_ADDR, ""),
            plain_env(ENV_INSTANCE_PORT, ""),
            plain_env(ENV_INSTANCE_PORTS, "[]"),
        ]);

        let image_pull_secrets = std::iter::once(self.settings.registry_secret_name.as_str())
            .chain(private_registry_secret)
            .map(|name| LocalObjectReference { name: name.to_owned() })
            .collect();

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(names::job_name(task)),
                labels: Some(labels.clone()),
                annotations: Some(annotations.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                parallelism: Some(1),
                completions: Some(1),
                backoff_limit: Some(0),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        annotations: Some(annotations),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_owned()),
                        security_context: Some(PodSecurityContext {
                            run_as_non_root: Some(true),
                            ..PodSecurityContext::default()
                        }),
                        service_account_name: Some(self.settings.application_service_account.clone()),
                        automount_service_account_token: (!self.settings.allow_automount_service_account_token)
                            .then_some(false),
                        image_pull_secrets: Some(image_pull_secrets),
                        containers: vec![Container {
                            name: TASK_CONTAINER_NAME.to_owned(),
                            image: Some(task.image.clone()),
                            image_pull_policy: Some("Always".to_owned()),
                            command: Some(task.command.clone()),
                            env: Some(env),
                            resources: Some(resources(task.cpu_weight, task.memory_mb, task.disk_mb)),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            ..Job::default()
        })
    }
}

fn plain_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value.to_owned()),
        ..EnvVar::default()
    }
}

/// Read a stored Job back into the task it was rendered from
pub fn job_to_task(job: &Job) -> Result<Task> {
    let meta = &job.metadata;
    let empty = BTreeMap::new();
    let labels = meta.labels.as_ref().unwrap_or(&empty);
    let annotations = meta.annotations.as_ref().unwrap_or(&empty);
    let annotation = |key: &str| annotations.get(key).cloned().unwrap_or_default();

    let pod = job
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .ok_or(Error::MissingSpec)?;
    let container = pod
        .containers
        .iter()
        .find(|c| c.name == TASK_CONTAINER_NAME)
        .ok_or(Error::MissingContainer(TASK_CONTAINER_NAME))?;
    let resources = container.resources.as_ref();

    Ok(Task {
        guid: labels.get(LABEL_GUID).cloned().unwrap_or_default(),
        name: labels.get(LABEL_TASK_NAME).cloned().unwrap_or_default(),
        app_guid: annotation(ANNOTATION_APP_ID),
        app_name: annotation(ANNOTATION_APP_NAME),
        space_guid: annotation(ANNOTATION_SPACE_GUID),
        space_name: annotation(ANNOTATION_SPACE_NAME),
        org_guid: annotation(ANNOTATION_ORG_GUID),
        org_name: annotation(ANNOTATION_ORG_NAME),
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone().unwrap_or_default(),
        memory_mb: read_megabytes(resources.and_then(|r| r.requests.as_ref()), "memory")?,
        disk_mb: read_megabytes(resources.and_then(|r| r.limits.as_ref()), "ephemeral-storage")?,
        completion_callback: annotation(ANNOTATION_COMPLETION_CALLBACK),
        ..Task::default()
    })
}
