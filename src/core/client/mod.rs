// Kube-rs based Kubernetes access
pub mod deployments;
pub mod kube_client;
pub mod watch;

#[cfg(test)]
pub mod mock;
