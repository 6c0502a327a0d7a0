//! State of LRP instances
use k8s_openapi::api::core::v1::{Event, Pod};
use serde::{Deserialize, Serialize};

use crate::config::EventReasons;

/// Placement error reported for instances the scheduler found no memory for
pub const INSUFFICIENT_MEMORY_ERROR: &str = "insufficient resources: memory";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Running,
    Pending,
    Crashed,
    /// Could not be placed, see [`Instance::placement_error`]
    Error,
    Unknown,
}

/// One running copy of an LRP
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub index: u32,
    /// Start time in nanoseconds since the epoch, 0 before the pod started
    pub since: i64,
    pub state: InstanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_error: Option<String>,
}

const CRASH_REASONS: [&str; 3] = ["ErrImagePull", "ImagePullBackOff", "CrashLoopBackOff"];

/// State of an instance as far as its pod status tells
pub fn pod_state(pod: &Pod) -> InstanceState {
    let Some(status) = &pod.status else {
        return InstanceState::Unknown;
    };
    let statuses = status.container_statuses.as_deref().unwrap_or_default();
    let crashing = || {
        statuses.iter().any(|cs| {
            cs.state
                .as_ref()
                .and_then(|state| state.waiting.as_ref())
                .and_then(|waiting| waiting.reason.as_deref())
                .is_some_and(|reason| CRASH_REASONS.contains(&reason))
        })
    };

    match status.phase.as_deref() {
        Some("Failed") => InstanceState::Crashed,
        _ if crashing() => InstanceState::Crashed,
        Some("Pending") => InstanceState::Pending,
        Some("Running") if statuses.is_empty() => InstanceState::Unknown,
        Some("Running") if statuses.iter().all(|cs| cs.ready) => InstanceState::Running,
        Some("Running") => InstanceState::Pending,
        _ => InstanceState::Unknown,
    }
}

/// What the most recent event of a pod says about it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventVerdict {
    /// Being shut down, not reported at all
    Stopping,
    /// Could not be scheduled for lack of memory
    InsufficientMemory,
    /// Nothing that overrides the pod's own status
    None,
}

/// Classify a pod by its latest event
pub(crate) fn classify(events: &[Event], reasons: &EventReasons) -> EventVerdict {
    let Some(latest) = events.iter().max_by_key(|event| {
        event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0))
            .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
    }) else {
        return EventVerdict::None;
    };
    let reason = latest.reason.as_deref().unwrap_or_default();
    let message = latest.message.as_deref().unwrap_or_default();

    if reason == reasons.killing {
        EventVerdict::Stopping
    } else if (reason == reasons.failed_scheduling || reason == reasons.failed_scale_up)
        && message.contains(reasons.insufficient_memory.as_str())
    {
        EventVerdict::InsufficientMemory
    } else {
        EventVerdict::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{
        api::core::v1::{ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus},
        apimachinery::pkg::apis::meta::v1::Time,
        chrono::{TimeZone, Utc},
    };

    fn pod(phase: &str, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.into()),
                container_statuses: Some(statuses),
                ..PodStatus::default()
            }),
            ..Pod::default()
        }
    }

    fn ready(ready: bool) -> ContainerStatus {
        ContainerStatus {
            name: "opi".into(),
            ready,
            ..ContainerStatus::default()
        }
    }

    fn waiting(reason: &str) -> ContainerStatus {
        ContainerStatus {
            name: "opi".into(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.into()),
                    ..ContainerStateWaiting::default()
                }),
                ..ContainerState::default()
            }),
            ..ContainerStatus::default()
        }
    }

    #[test]
    fn pod_states() {
        assert_eq!(pod_state(&pod("Running", vec![ready(true), ready(true)])), InstanceState::Running);
        assert_eq!(pod_state(&pod("Running", vec![ready(true), ready(false)])), InstanceState::Pending);
        assert_eq!(pod_state(&pod("Running", vec![])), InstanceState::Unknown);
        assert_eq!(pod_state(&pod("Pending", vec![])), InstanceState::Pending);
        assert_eq!(pod_state(&pod("Pending", vec![waiting("ErrImagePull")])), InstanceState::Crashed);
        assert_eq!(pod_state(&pod("Running", vec![waiting("CrashLoopBackOff")])), InstanceState::Crashed);
        assert_eq!(pod_state(&pod("Failed", vec![])), InstanceState::Crashed);
        assert_eq!(pod_state(&pod("Unknown", vec![ready(true)])), InstanceState::Unknown);
        assert_eq!(pod_state(&Pod::default()), InstanceState::Unknown);
    }

    fn event(reason: &str, message: &str, secs: i64) -> Event {
        Event {
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_timestamp: Some(Time(Utc.timestamp_opt(secs, 0).unwrap())),
            ..Event::default()
        }
    }

    #[test]
    fn latest_event_decides() {
        let reasons = EventReasons::default();
        assert_eq!(classify(&[], &reasons), EventVerdict::None);

        let killed = [event("Killing", "Stopping container opi", 20), event("Started", "", 10)];
        assert_eq!(classify(&killed, &reasons), EventVerdict::Stopping);

        let restarted = [event("Killing", "Stopping container opi", 10), event("Started", "", 20)];
        assert_eq!(classify(&restarted, &reasons), EventVerdict::None);

        let unschedulable = [event(
            "FailedScheduling",
            "0/3 nodes are available: 3 Insufficient memory.",
            5,
        )];
        assert_eq!(classify(&unschedulable, &reasons), EventVerdict::InsufficientMemory);

        let no_scale_up = [event("NotTriggerScaleUp", "pod didn't trigger scale-up: Insufficient memory", 5)];
        assert_eq!(classify(&no_scale_up, &reasons), EventVerdict::InsufficientMemory);

        let no_cpu = [event("FailedScheduling", "0/3 nodes are available: 3 Insufficient cpu.", 5)];
        assert_eq!(classify(&no_cpu, &reasons), EventVerdict::None);
    }
}
