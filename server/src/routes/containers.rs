//! Read-only container inspection routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use store::container::ContainerId;

use crate::services::container::{self, ContainerError, ContainerSummary, Snapshot};
use crate::state::AppState;

pub async fn list_containers(State(state): State<AppState>) -> Json<Vec<ContainerSummary>> {
    Json(container::list_containers(&state).await)
}

pub async fn get_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Snapshot>, StatusCode> {
    let id: ContainerId = id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    container::snapshot(&state, &id)
        .await
        .map(Json)
        .map_err(container_error_to_status)
}

fn container_error_to_status(err: ContainerError) -> StatusCode {
    match err {
        ContainerError::NotFound(_) => StatusCode::NOT_FOUND,
        ContainerError::NotAttached | ContainerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ContainerError::ValueTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
    }
}

#[cfg(test)]
#[path = "containers_test.rs"]
mod tests;
