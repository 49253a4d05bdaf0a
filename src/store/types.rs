use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: String,
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Denormalized subject name kept for older readers.
    #[serde(default)]
    pub subject: String,
    pub year: i32,
    pub exam_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewExam {
    pub subject_id: String,
    pub subject: String,
    pub year: i32,
    pub exam_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub exam_id: String,
    pub question_text: String,
    pub marks: f64,
    pub question_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Year of the owning exam, when the read joined it in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam_year: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewQuestion {
    pub exam_id: String,
    pub question_text: String,
    pub marks: f64,
    pub question_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub subject_id: String,
    pub topic_summary: String,
    pub risk_level: String,
    pub frequency: i64,
    pub avg_marks: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewCluster {
    pub subject_id: String,
    pub topic_summary: String,
    pub risk_level: String,
    pub frequency: i64,
    pub avg_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCluster {
    pub question_id: String,
    pub cluster_id: String,
}

/// Result of inserting a subject whose name may already be taken.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectInsert {
    Created(Subject),
    /// Another writer holds the name (unique violation).
    Conflict,
}
