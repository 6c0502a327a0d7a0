//! LRP <-> StatefulSet
use k8s_openapi::{
    api::{
        apps::v1::{StatefulSet, StatefulSetSpec},
        core::v1::{
            Affinity, Container, ContainerPort, LocalObjectReference, PersistentVolumeClaimVolumeSource,
            PodAntiAffinity, PodAffinityTerm, PodSecurityContext, PodSpec, PodTemplateSpec, SecurityContext,
            Volume, VolumeMount as KubeVolumeMount, WeightedPodAffinityTerm,
        },
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta},
};
use std::{collections::BTreeMap, sync::Arc};

use super::{
    environment, read_megabytes, resources, static_env, Converter, DefaultLivenessProbe, DefaultReadinessProbe,
    Error, LivenessProbeStrategy, ReadinessProbeStrategy, Result, Settings, LRP_CONTAINER_NAME,
};
use crate::{
    descriptor::{Lrp, LrpIdentifier, Route, VolumeMount},
    labels::*,
    names,
};

/// Weight of the soft anti-affinity spreading instances across nodes
pub const POD_AFFINITY_TERM_WEIGHT: i32 = 100;
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Renders LRPs as StatefulSets
#[derive(Clone)]
pub struct LrpConverter {
    settings: Settings,
    liveness: Arc<dyn LivenessProbeStrategy>,
    readiness: Arc<dyn ReadinessProbeStrategy>,
}

impl LrpConverter {
    /// Converter probing each LRP's declared health check
    pub fn new(settings: Settings) -> Self {
        Self::with_probes(settings, DefaultLivenessProbe, DefaultReadinessProbe)
    }

    /// Converter with custom probe strategies
    pub fn with_probes(
        settings: Settings,
        liveness: impl LivenessProbeStrategy + 'static,
        readiness: impl ReadinessProbeStrategy + 'static,
    ) -> Self {
        Self {
            settings,
            liveness: Arc::new(liveness),
            readiness: Arc::new(readiness),
        }
    }

    fn image_pull_secrets(&self, private_registry_secret: Option<&str>) -> Vec<LocalObjectReference> {
        std::iter::once(self.settings.registry_secret_name.as_str())
            .chain(private_registry_secret)
            .map(|name| LocalObjectReference {
                name: name.to_owned(),
            })
            .collect()
    }

    fn pod_security_context(&self) -> Option<PodSecurityContext> {
        if self.settings.allow_run_image_as_root {
            return None;
        }
        Some(PodSecurityContext {
            run_as_non_root: Some(true),
            ..PodSecurityContext::default()
        })
    }
}

impl std::fmt::Debug for LrpConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LrpConverter").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl Converter<Lrp> for LrpConverter {
    type Object = StatefulSet;

    fn convert(&self, lrp: &Lrp, private_registry_secret: Option<&str>) -> Result<StatefulSet> {
        let routes = serde_json::to_string(&lrp.routes).map_err(Error::Encoding)?;
        let (volumes, volume_mounts) = volume_specs(&lrp.volume_mounts);

        let mut containers = vec![Container {
            name: LRP_CONTAINER_NAME.to_owned(),
            image: Some(lrp.image.clone()),
            image_pull_policy: Some("Always".to_owned()),
            command: Some(lrp.command.clone()),
            env: Some(environment(&lrp.env)),
            ports: Some(
                lrp.ports
                    .iter()
                    .map(|&container_port| ContainerPort {
                        container_port,
                        ..ContainerPort::default()
                    })
                    .collect(),
            ),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                ..SecurityContext::default()
            }),
            resources: Some(resources(lrp.cpu_weight, lrp.memory_mb, lrp.disk_mb)),
            liveness_probe: self.liveness.liveness_probe(lrp),
            readiness_probe: self.readiness.readiness_probe(lrp),
            volume_mounts: Some(volume_mounts),
            ..Container::default()
        }];
        containers.extend(lrp.sidecars.iter().map(|sidecar| Container {
            name: sidecar.name.clone(),
            image: Some(lrp.image.clone()),
            command: Some(sidecar.command.clone()),
            env: static_env(&sidecar.env),
            resources: Some(resources(lrp.cpu_weight, sidecar.memory_mb, lrp.disk_mb)),
            ..Container::default()
        }));

        let selector = selector(&lrp.id);
        let labels = BTreeMap::from([
            (LABEL_GUID.to_owned(), lrp.id.guid.clone()),
            (LABEL_VERSION.to_owned(), lrp.id.version.clone()),
            (LABEL_SOURCE_TYPE.to_owned(), SOURCE_TYPE_APP.to_owned()),
            (LABEL_APP_GUID.to_owned(), lrp.app_guid.clone()),
            (LABEL_PROCESS_TYPE.to_owned(), lrp.process_type.clone()),
            (LABEL_ORG_GUID.to_owned(), lrp.org_guid.clone()),
            (LABEL_SPACE_GUID.to_owned(), lrp.space_guid.clone()),
        ]);

        let mut annotations = lrp.user_defined_annotations.clone();
        annotations.extend([
            (ANNOTATION_APP_NAME.to_owned(), lrp.app_name.clone()),
            (ANNOTATION_APP_ID.to_owned(), lrp.app_guid.clone()),
            (ANNOTATION_VERSION.to_owned(), lrp.id.version.clone()),
            (ANNOTATION_ORG_NAME.to_owned(), lrp.org_name.clone()),
            (ANNOTATION_ORG_GUID.to_owned(), lrp.org_guid.clone()),
            (ANNOTATION_SPACE_NAME.to_owned(), lrp.space_name.clone()),
            (ANNOTATION_SPACE_GUID.to_owned(), lrp.space_guid.clone()),
            (ANNOTATION_ROUTES.to_owned(), routes),
            (ANNOTATION_ORIGINAL_REQUEST.to_owned(), lrp.original_request.clone()),
            (ANNOTATION_LAST_UPDATED.to_owned(), lrp.last_updated.clone()),
            (ANNOTATION_PROCESS_GUID.to_owned(), lrp.process_guid()),
            (
                ANNOTATION_LATEST_MIGRATION.to_owned(),
                self.settings.latest_migration.to_string(),
            ),
        ]);
        let mut pod_annotations = annotations.clone();
        pod_annotations.insert(ANNOTATION_SECCOMP.to_owned(), SECCOMP_RUNTIME_DEFAULT.to_owned());

        Ok(StatefulSet {
            metadata: ObjectMeta {
                name: Some(names::statefulset_name(lrp)),
                labels: Some(labels.clone()),
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            spec: Some(StatefulSetSpec {
                pod_management_policy: Some("Parallel".to_owned()),
                replicas: Some(lrp.target_instances),
                selector: selector.clone(),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        annotations: Some(pod_annotations),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers,
                        image_pull_secrets: Some(self.image_pull_secrets(private_registry_secret)),
                        security_context: self.pod_security_context(),
                        service_account_name: Some(self.settings.application_service_account.clone()),
                        automount_service_account_token: (!self.settings.allow_automount_service_account_token)
                            .then_some(false),
                        volumes: Some(volumes),
                        affinity: Some(anti_affinity(&selector)),
                        ..PodSpec::default()
                    }),
                },
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        })
    }
}

/// Selector the StatefulSet, its pods and its disruption budget share
pub fn selector(id: &LrpIdentifier) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([
            (LABEL_GUID.to_owned(), id.guid.clone()),
            (LABEL_VERSION.to_owned(), id.version.clone()),
            (LABEL_SOURCE_TYPE.to_owned(), SOURCE_TYPE_APP.to_owned()),
        ])),
        ..LabelSelector::default()
    }
}

/// Prefer spreading instances of one identity across nodes, never require it
fn anti_affinity(selector: &LabelSelector) -> Affinity {
    let match_expressions = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| LabelSelectorRequirement {
            key: key.clone(),
            operator: "In".to_owned(),
            values: Some(vec![value.clone()]),
        })
        .collect();
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                weight: POD_AFFINITY_TERM_WEIGHT,
                pod_affinity_term: PodAffinityTerm {
                    topology_key: HOSTNAME_TOPOLOGY_KEY.to_owned(),
                    label_selector: Some(LabelSelector {
                        match_expressions: Some(match_expressions),
                        ..LabelSelector::default()
                    }),
                    ..PodAffinityTerm::default()
                },
            }]),
            ..PodAntiAffinity::default()
        }),
        ..Affinity::default()
    }
}

fn volume_specs(mounts: &[VolumeMount]) -> (Vec<Volume>, Vec<KubeVolumeMount>) {
    mounts
        .iter()
        .map(|mount| {
            (
                Volume {
                    name: mount.claim_name.clone(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: mount.claim_name.clone(),
                        ..PersistentVolumeClaimVolumeSource::default()
                    }),
                    ..Volume::default()
                },
                KubeVolumeMount {
                    name: mount.claim_name.clone(),
                    mount_path: mount.mount_path.clone(),
                    ..KubeVolumeMount::default()
                },
            )
        })
        .unzip()
}

/// Read a stored StatefulSet back into the LRP it was rendered from
///
/// The workload container is found by name, so sidecars may come in any order.
pub fn statefulset_to_lrp(statefulset: &StatefulSet) -> Result<Lrp> {
    let meta = &statefulset.metadata;
    let empty = BTreeMap::new();
    let labels = meta.labels.as_ref().unwrap_or(&empty);
    let annotations = meta.annotations.as_ref().unwrap_or(&empty);
    let label = |key: &str| labels.get(key).cloned().unwrap_or_default();
    let annotation = |key: &str| annotations.get(key).cloned().unwrap_or_default();

    let spec = statefulset.spec.as_ref().ok_or(Error::MissingSpec)?;
    let pod = spec.template.spec.as_ref().ok_or(Error::MissingSpec)?;
    let container = pod
        .containers
        .iter()
        .find(|c| c.name == LRP_CONTAINER_NAME)
        .ok_or(Error::MissingContainer(LRP_CONTAINER_NAME))?;

    let routes: Vec<Route> = match annotations.get(ANNOTATION_ROUTES) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|source| Error::Decoding {
            annotation: ANNOTATION_ROUTES,
            source,
        })?,
        _ => Vec::new(),
    };

    let resources = container.resources.as_ref();
    let volume_mounts = container
        .volume_mounts
        .iter()
        .flatten()
        .map(|mount| VolumeMount {
            claim_name: mount.name.clone(),
            mount_path: mount.mount_path.clone(),
        })
        .collect();

    Ok(Lrp {
        id: LrpIdentifier::new(label(LABEL_GUID), label(LABEL_VERSION)),
        process_type: label(LABEL_PROCESS_TYPE),
        app_guid: annotation(ANNOTATION_APP_ID),
        app_name: annotation(ANNOTATION_APP_NAME),
        space_guid: annotation(ANNOTATION_SPACE_GUID),
        space_name: annotation(ANNOTATION_SPACE_NAME),
        org_guid: annotation(ANNOTATION_ORG_GUID),
        org_name: annotation(ANNOTATION_ORG_NAME),
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone().unwrap_or_default(),
        ports: container
            .ports
            .iter()
            .flatten()
            .map(|port| port.container_port)
            .collect(),
        routes,
        target_instances: spec.replicas.unwrap_or(1),
        running_instances: statefulset
            .status
            .as_ref()
            .and_then(|status| status.ready_replicas)
            .unwrap_or(0),
        memory_mb: read_megabytes(resources.and_then(|r| r.requests.as_ref()), "memory")?,
        disk_mb: read_megabytes(resources.and_then(|r| r.limits.as_ref()), "ephemeral-storage")?,
        volume_mounts,
        original_request: annotation(ANNOTATION_ORIGINAL_REQUEST),
        last_updated: annotation(ANNOTATION_LAST_UPDATED),
        ..Lrp::default()
    })
}
