use k8s_openapi::api::apps::v1::Deployment;
use tracing::warn;

/// Immutable snapshot of a single Deployment as served by the query layer.
///
/// Built once from a watch event and never mutated afterwards; updates
/// replace the whole value in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSummary {
    pub name: String,
    pub namespace: String,
    /// Replicas requested by the spec.
    pub replicas_desired: i32,
    /// Replicas currently reported by the status.
    pub replicas_current: i32,
    pub replicas_ready: i32,
    pub replicas_available: i32,
    /// Container image references, in container order.
    pub images: Vec<String>,
}

impl DeploymentSummary {
    /// Builds a summary from a raw Deployment object.
    ///
    /// Returns `None` for malformed objects (no name); the caller drops
    /// those without crashing the watch loop.
    pub fn from_deployment(deployment: &Deployment) -> Option<Self> {
        let Some(name) = deployment.metadata.name.clone() else {
            warn!("dropping deployment event without a name");
            return None;
        };
        let namespace = deployment.metadata.namespace.clone().unwrap_or_default();

        let spec = deployment.spec.as_ref();
        let status = deployment.status.as_ref();

        let images = spec
            .and_then(|s| s.template.spec.as_ref())
            .map(|pod| {
                pod.containers
                    .iter()
                    .filter_map(|c| c.image.clone())
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            name,
            namespace,
            replicas_desired: spec.and_then(|s| s.replicas).unwrap_or(0),
            replicas_current: status.and_then(|s| s.replicas).unwrap_or(0),
            replicas_ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            replicas_available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            images,
        })
    }
}

/// Diagnostic classification of an update, checked in a fixed priority order.
/// Used only for log output, never for correctness.
pub fn change_kind(prior: &DeploymentSummary, current: &DeploymentSummary) -> &'static str {
    if prior.replicas_desired != current.replicas_desired {
        "spec_replicas"
    } else if prior.replicas_current != current.replicas_current {
        "status_replicas"
    } else if prior.replicas_ready != current.replicas_ready {
        "ready_replicas"
    } else if prior.replicas_available != current.replicas_available {
        "available_replicas"
    } else {
        "status_only"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(name: Option<&str>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: name.map(str::to_string),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(3),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![
                            Container {
                                name: "app".to_string(),
                                image: Some("nginx:1.27".to_string()),
                                ..Default::default()
                            },
                            Container {
                                name: "sidecar".to_string(),
                                image: Some("envoy:v1.30".to_string()),
                                ..Default::default()
                            },
                        ],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(3),
                ready_replicas: Some(2),
                available_replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn builds_summary_from_deployment() {
        let summary = DeploymentSummary::from_deployment(&deployment(Some("web"))).unwrap();
        assert_eq!(summary.name, "web");
        assert_eq!(summary.namespace, "team-a");
        assert_eq!(summary.replicas_desired, 3);
        assert_eq!(summary.replicas_ready, 2);
        assert_eq!(summary.replicas_available, 2);
        assert_eq!(summary.images, vec!["nginx:1.27", "envoy:v1.30"]);
    }

    #[test]
    fn object_without_name_is_dropped() {
        assert!(DeploymentSummary::from_deployment(&deployment(None)).is_none());
    }

    #[test]
    fn missing_spec_and_status_default_to_zero() {
        let bare = Deployment {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let summary = DeploymentSummary::from_deployment(&bare).unwrap();
        assert_eq!(summary.replicas_desired, 0);
        assert_eq!(summary.replicas_ready, 0);
        assert!(summary.images.is_empty());
    }
}
