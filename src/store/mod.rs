pub mod client;
pub mod memory;
pub mod postgrest;
pub mod types;

use std::sync::Arc;

use tracing::warn;

use crate::config::{StoreBackend, StoreConfig};

pub use client::{ExamStore, SharedExamStore};
pub use memory::MemoryExamStore;
pub use postgrest::PostgrestExamStore;
pub use types::{
    Cluster, Exam, NewCluster, NewExam, NewQuestion, Question, QuestionCluster, Subject,
    SubjectInsert,
};

pub fn build_store(config: StoreConfig) -> anyhow::Result<SharedExamStore> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory exam store; data is lost on exit");
            Ok(Arc::new(MemoryExamStore::new()))
        }
        StoreBackend::PostgRest => Ok(Arc::new(PostgrestExamStore::new(config)?)),
    }
}
