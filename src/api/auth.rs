//! Bearer-token guard for write routes.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::AppState;

/// Rejects requests whose `Authorization: Bearer` token does not match the
/// configured upload token. No configured token means the guard is off.
pub async fn upload_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.upload_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            warn!("Upload rejected: bearer token mismatch");
            Err(AuthError::InvalidToken)
        }
        None => Err(AuthError::MissingToken),
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingToken => "Missing bearer token",
            AuthError::InvalidToken => "Invalid bearer token",
        };

        let body = Json(json!({
            "success": false,
            "error": message,
        }));

        (StatusCode::UNAUTHORIZED, body).into_response()
    }
}
