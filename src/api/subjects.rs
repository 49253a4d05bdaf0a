use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::error::FlowError;
use crate::flows;
use crate::AppState;

/// GET /api/subjects
pub async fn get_subjects(State(state): State<AppState>) -> Result<impl IntoResponse, FlowError> {
    let subjects = flows::list_subjects(state.store.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "data": subjects,
    })))
}

/// GET /api/subjects/:id/clusters
pub async fn get_subject_clusters(
    State(state): State<AppState>,
    Path(subject_id): Path<String>,
) -> Result<impl IntoResponse, FlowError> {
    let clusters = flows::list_subject_clusters(state.store.as_ref(), &subject_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": clusters,
    })))
}
