use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use tower_http::cors::CorsLayer;

use crate::api::controller::deployment::DeploymentController;
use crate::api::controller::namespace::NamespaceController;
use crate::api::dto::deployment_dto::{ApiEndpoints, ApiInfoResponse};
use crate::api::util::request_id::request_id;
use crate::app_state::AppState;
use crate::errors::AppError;

pub fn app_router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/namespaces", get(NamespaceController::list))
        .route("/deployments", get(DeploymentController::list_all))
        .route(
            "/deployments/{*namespace}",
            get(DeploymentController::list_namespace),
        )
        .fallback(endpoint_not_found)
        .layer(middleware::from_fn(request_id))
        .layer(CorsLayer::very_permissive())
}

async fn root(State(state): State<AppState>) -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        message: "Kubernetes Deployment watch API",
        version: state.version,
        endpoints: ApiEndpoints {
            deployments: "/deployments",
            namespaces: "/namespaces",
        },
    })
}

async fn endpoint_not_found() -> AppError {
    AppError::EndpointNotFound
}
