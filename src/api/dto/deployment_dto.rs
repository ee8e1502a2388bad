use serde::Serialize;

/// Deployments of one namespace, as returned by `/deployments/{namespace}`
/// and nested inside the aggregate response.
#[derive(Debug, Serialize)]
pub struct NamespaceDeployments {
    pub namespace: String,
    pub deployments: Vec<String>,
    pub count: usize,
}

/// Aggregate over every watched namespace, returned by `/deployments`.
#[derive(Debug, Serialize)]
pub struct AllDeploymentsResponse {
    pub namespaces: Vec<NamespaceDeployments>,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct NamespaceListResponse {
    pub namespaces: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub endpoints: ApiEndpoints,
}

#[derive(Debug, Serialize)]
pub struct ApiEndpoints {
    pub deployments: &'static str,
    pub namespaces: &'static str,
}
