use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::error::FlowError;

impl FlowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FlowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FlowError::SubjectNotFound(_) => StatusCode::NOT_FOUND,
            FlowError::ExtractionParse(_) | FlowError::Oracle(_) => StatusCode::BAD_GATEWAY,
            FlowError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = ?self, %status, "Request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
