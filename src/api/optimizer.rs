use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::FlowError;
use crate::flows::{OptimizerOutcome, OptimizerRequest};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OptimizerQuery {
    pub subject_id: Option<String>,
    /// Target exam date, `YYYY-MM-DD`.
    pub date: Option<String>,
    /// `all` (default), `internal` or `end_semester`.
    pub exam_type: Option<String>,
}

/// GET /api/optimizer?subject_id=..&date=..&exam_type=..
pub async fn get_study_plan(
    State(state): State<AppState>,
    Query(query): Query<OptimizerQuery>,
) -> Result<Json<OptimizerOutcome>, FlowError> {
    let subject_id = query
        .subject_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| FlowError::invalid("Subject ID is required"))?;
    let date = query
        .date
        .filter(|date| !date.trim().is_empty())
        .ok_or_else(|| FlowError::invalid("Target date is required"))?;

    let request = OptimizerRequest::parse(subject_id, &date, query.exam_type.as_deref())?;
    let outcome = state.optimizer.optimize(request).await?;
    Ok(Json(outcome))
}
