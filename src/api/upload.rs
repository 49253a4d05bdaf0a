use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::{info, instrument};

use crate::error::FlowError;
use crate::flows::UploadRequest;
use crate::llm_client::Document;
use crate::AppState;

/// POST /api/exams/upload
///
/// Multipart form with the exam paper in the `file` field.
#[instrument(skip_all, name = "upload_exam")]
pub async fn upload_exam(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, FlowError> {
    let mut document: Option<Document> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FlowError::invalid(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .filter(|mime| mime != "application/octet-stream")
            .unwrap_or_else(|| {
                Document::guess_mime_type(file_name.as_deref().unwrap_or_default()).to_string()
            });
        let bytes = field
            .bytes()
            .await
            .map_err(|e| FlowError::invalid(format!("Read error: {e}")))?;

        let mut doc = Document::new(bytes.to_vec(), mime_type);
        if let Some(name) = file_name {
            doc = doc.with_file_name(name);
        }
        document = Some(doc);
    }

    let document = document.ok_or_else(|| FlowError::invalid("No file uploaded"))?;
    info!(
        file_name = document.file_name.as_deref().unwrap_or("<unnamed>"),
        bytes = document.bytes.len(),
        "Received exam upload"
    );

    let outcome = state.upload.upload(UploadRequest::from(document)).await?;

    Ok(Json(json!({
        "success": true,
        "data": outcome,
    })))
}
