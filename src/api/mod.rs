//! HTTP handlers for the exam-yield service.

pub mod auth;
pub mod error;
pub mod health;
pub mod optimizer;
pub mod subjects;
pub mod upload;

pub use auth::upload_auth;
pub use health::health_routes;
pub use optimizer::get_study_plan;
pub use subjects::{get_subject_clusters, get_subjects};
pub use upload::upload_exam;
