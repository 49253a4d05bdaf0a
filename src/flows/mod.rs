//! Request flows that tie the store, the oracles and the embedder together.

pub mod optimizer;
pub mod subjects;
pub mod upload;

pub use optimizer::{
    ExamTypeFilter, OptimizerFlow, OptimizerOutcome, OptimizerReport, OptimizerRequest,
};
pub use subjects::{list_subject_clusters, list_subjects};
pub use upload::{UploadFlow, UploadOutcome, UploadRequest};
