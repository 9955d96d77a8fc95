//! Projections of data plane pods and events

use k8s_openapi::api::core::v1::{Event as K8sEvent, Pod};
use kube::ResourceExt;
use rpaas_models::info::{Event, PodError, PodInfo, PodPort};
use rpaas_models::PodStatus;

use crate::names::NGINX_CONTAINER;

pub fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

pub fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty())
}

pub fn phase(pod: &Pod) -> String {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

pub fn restarts(pod: &Pod) -> i32 {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
        .unwrap_or(0)
}

fn ports(pod: &Pod) -> Vec<PodPort> {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .filter(|c| c.name == NGINX_CONTAINER)
                .flat_map(|c| c.ports.iter().flatten())
                .map(|p| PodPort {
                    name: p.name.clone().unwrap_or_default(),
                    port: p.container_port,
                    protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn status(pod: &Pod) -> PodStatus {
    PodStatus {
        name: pod.name_any(),
        address: pod_ip(pod).unwrap_or_default(),
        ready: is_ready(pod),
    }
}

/// Builds the info projection; `events` are the warnings about this pod.
pub fn info(pod: &Pod, events: &[K8sEvent]) -> PodInfo {
    let errors = events
        .iter()
        .filter(|e| e.type_.as_deref() == Some("Warning"))
        .filter_map(|e| {
            Some(PodError {
                first: e.first_timestamp.as_ref()?.0,
                last: e.last_timestamp.as_ref()?.0,
                count: e.count.unwrap_or(1),
                message: e.message.clone().unwrap_or_default(),
            })
        })
        .collect();

    PodInfo {
        name: pod.name_any(),
        ip: pod_ip(pod).unwrap_or_default(),
        host_ip: pod
            .status
            .as_ref()
            .and_then(|s| s.host_ip.clone())
            .unwrap_or_default(),
        ready: is_ready(pod),
        status: phase(pod),
        restarts: restarts(pod),
        created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        ports: ports(pod),
        metrics: None,
        errors,
    }
}

pub fn event(event: &K8sEvent) -> Event {
    Event {
        first: event.first_timestamp.as_ref().map(|t| t.0),
        last: event.last_timestamp.as_ref().map(|t| t.0),
        event_type: event.type_.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        count: event.count.unwrap_or(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus as K8sPodStatus};

    fn pod(ready: &str, ip: Option<&str>) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = Some("my-instance-abc".to_string());
        pod.status = Some(K8sPodStatus {
            phase: Some("Running".to_string()),
            pod_ip: ip.map(String::from),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: ready.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        pod
    }

    #[test]
    fn readiness_follows_condition() {
        assert!(is_ready(&pod("True", Some("10.0.0.1"))));
        assert!(!is_ready(&pod("False", Some("10.0.0.1"))));
        assert!(!is_ready(&Pod::default()));
    }

    #[test]
    fn status_projection() {
        let status = status(&pod("True", Some("10.0.0.1")));
        assert_eq!(status.name, "my-instance-abc");
        assert_eq!(status.address, "10.0.0.1");
        assert!(status.ready);
    }

    #[test]
    fn empty_ip_is_absent() {
        assert_eq!(pod_ip(&pod("True", Some(""))), None);
    }
}
