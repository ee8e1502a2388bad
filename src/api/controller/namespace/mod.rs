use axum::extract::State;
use axum::Json;

use crate::api::dto::deployment_dto::NamespaceListResponse;
use crate::app_state::AppState;

pub struct NamespaceController;

impl NamespaceController {
    /// GET /namespaces - the currently watched namespaces, sorted by name.
    pub async fn list(State(state): State<AppState>) -> Json<NamespaceListResponse> {
        let namespaces = state.informers.watched_namespaces().await;
        Json(NamespaceListResponse {
            count: namespaces.len(),
            namespaces,
        })
    }
}
