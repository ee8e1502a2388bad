use axum::extract::State;
use axum::http::Uri;
use axum::Json;

use crate::api::dto::deployment_dto::{AllDeploymentsResponse, NamespaceDeployments};
use crate::app_state::AppState;
use crate::errors::AppError;

pub struct DeploymentController;

impl DeploymentController {
    /// GET /deployments - deployments from every watched namespace.
    pub async fn list_all(
        State(state): State<AppState>,
    ) -> Result<Json<AllDeploymentsResponse>, AppError> {
        let (snapshots, total_count) = state.informers.snapshot_all().await;
        let namespaces = snapshots
            .into_iter()
            .map(|snapshot| NamespaceDeployments {
                namespace: snapshot.namespace,
                count: snapshot.deployments.len(),
                deployments: snapshot
                    .deployments
                    .into_iter()
                    .map(|d| d.name)
                    .collect(),
            })
            .collect();
        Ok(Json(AllDeploymentsResponse {
            namespaces,
            total_count,
        }))
    }

    /// GET /deployments/{namespace} - deployments of one watched namespace.
    ///
    /// The namespace is taken from the raw request path, not a decoded route
    /// parameter, so an encoded separator stays inside a single segment and
    /// only literal extra segments reject the request shape.
    pub async fn list_namespace(
        State(state): State<AppState>,
        uri: Uri,
    ) -> Result<Json<NamespaceDeployments>, AppError> {
        let namespace = decode_namespace_path(uri.path())?;
        let deployments = state
            .informers
            .snapshot(&namespace)
            .await
            .map_err(|_| AppError::NamespaceNotWatched(namespace.clone()))?;
        Ok(Json(NamespaceDeployments {
            namespace,
            count: deployments.len(),
            deployments: deployments.into_iter().map(|d| d.name).collect(),
        }))
    }
}

fn decode_namespace_path(path: &str) -> Result<String, AppError> {
    let rest = path
        .strip_prefix("/deployments/")
        .ok_or(AppError::InvalidPathFormat)?;
    if rest.is_empty() || rest.contains('/') {
        return Err(AppError::InvalidPathFormat);
    }
    // urlencoding::decode passes malformed sequences like "%zz" through
    // verbatim and only errors on invalid UTF-8, so check the escapes first.
    if !valid_percent_encoding(rest) {
        return Err(AppError::InvalidNamespaceEncoding);
    }
    let decoded = urlencoding::decode(rest).map_err(|_| AppError::InvalidNamespaceEncoding)?;
    Ok(decoded.into_owned())
}

/// Every `%` must start a two-digit hex escape.
fn valid_percent_encoding(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}
