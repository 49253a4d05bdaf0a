//! Exam-paper ingestion and study-plan service.
//!
//! Uploaded exam papers are turned into questions by a multimodal model,
//! stored with embeddings and grouped into topic clusters per subject. The
//! optimizer ranks a subject's past questions into a study plan.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod embed;
pub mod error;
pub mod flows;
pub mod gemini;
pub mod llm_client;
pub mod oracle;
pub mod store;

use config::ServerConfig;
use embed::SharedEmbeddingsProvider;
use flows::{OptimizerFlow, UploadFlow};
use llm_client::SharedLlmClient;
use store::SharedExamStore;

/// State shared across HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedExamStore,
    pub upload: Arc<UploadFlow>,
    pub optimizer: Arc<OptimizerFlow>,
    /// Bearer token required for uploads; `None` leaves uploads open.
    pub upload_token: Option<String>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        store: SharedExamStore,
        llm: SharedLlmClient,
        embedder: SharedEmbeddingsProvider,
        server: &ServerConfig,
    ) -> Self {
        Self {
            upload: Arc::new(UploadFlow::new(store.clone(), llm.clone(), embedder)),
            optimizer: Arc::new(OptimizerFlow::new(store.clone(), llm)),
            store,
            upload_token: server.upload_token.clone(),
            max_upload_bytes: server.max_upload_bytes,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let uploads = Router::new()
        .route("/api/exams/upload", post(api::upload_exam))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::upload_auth,
        ));

    let reads = Router::new()
        .route("/api/subjects", get(api::get_subjects))
        .route("/api/subjects/:id/clusters", get(api::get_subject_clusters))
        .route("/api/optimizer", get(api::get_study_plan))
        .merge(api::health_routes());

    Router::new()
        .merge(uploads)
        .merge(reads)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
