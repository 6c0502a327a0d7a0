//! Liveness and readiness probe strategies
use k8s_openapi::{
    api::core::v1::{HTTPGetAction, Probe, TCPSocketAction},
    apimachinery::pkg::util::intstr::IntOrString,
};

use crate::descriptor::{HealthCheck, HealthCheckKind, Lrp};

/// Decides the liveness probe of the workload container
pub trait LivenessProbeStrategy: Send + Sync {
    /// Probe for `lrp`, or `None` to run without one
    fn liveness_probe(&self, lrp: &Lrp) -> Option<Probe>;
}

/// Decides the readiness probe of the workload container
pub trait ReadinessProbeStrategy: Send + Sync {
    /// Probe for `lrp`, or `None` to run without one
    fn readiness_probe(&self, lrp: &Lrp) -> Option<Probe>;
}

/// Probes the declared health check, giving the instance `timeoutMs` to come up
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLivenessProbe;

impl LivenessProbeStrategy for DefaultLivenessProbe {
    fn liveness_probe(&self, lrp: &Lrp) -> Option<Probe> {
        let threshold = i32::try_from(lrp.health_check.timeout_ms / 1000).unwrap_or(i32::MAX).max(1);
        probe(&lrp.health_check, threshold)
    }
}

/// Probes the declared health check, failing readiness on the first miss
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReadinessProbe;

impl ReadinessProbeStrategy for DefaultReadinessProbe {
    fn readiness_probe(&self, lrp: &Lrp) -> Option<Probe> {
        probe(&lrp.health_check, 1)
    }
}

fn probe(check: &HealthCheck, failure_threshold: i32) -> Option<Probe> {
    let port = IntOrString::Int(check.port);
    let mut probe = Probe {
        failure_threshold: Some(failure_threshold),
        timeout_seconds: Some(1),
        ..Probe::default()
    };
    match check.kind {
        HealthCheckKind::Http => {
            probe.http_get = Some(HTTPGetAction {
                path: Some(check.endpoint.clone()),
                port,
                ..HTTPGetAction::default()
            });
        }
        HealthCheckKind::Port => {
            probe.tcp_socket = Some(TCPSocketAction {
                port,
                ..TCPSocketAction::default()
            });
        }
        HealthCheckKind::Process | HealthCheckKind::None => return None,
    }
    Some(probe)
}
