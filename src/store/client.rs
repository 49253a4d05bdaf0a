use std::sync::Arc;

use async_trait::async_trait;

use super::types::{
    Cluster, Exam, NewCluster, NewExam, NewQuestion, Question, QuestionCluster, Subject,
    SubjectInsert,
};

/// CRUD surface over subjects, exams, questions and clusters.
#[async_trait]
pub trait ExamStore: Send + Sync {
    /// All subjects ordered by name.
    async fn list_subjects(&self) -> anyhow::Result<Vec<Subject>>;
    async fn get_subject(&self, id: &str) -> anyhow::Result<Option<Subject>>;
    async fn find_subject_by_name(&self, name: &str) -> anyhow::Result<Option<Subject>>;
    async fn insert_subject(&self, name: &str) -> anyhow::Result<SubjectInsert>;

    async fn insert_exam(&self, exam: NewExam) -> anyhow::Result<Exam>;
    async fn list_exams(&self, subject_id: &str) -> anyhow::Result<Vec<Exam>>;

    async fn insert_questions(&self, questions: Vec<NewQuestion>) -> anyhow::Result<Vec<Question>>;
    /// Every question recorded under any exam of the subject.
    async fn list_subject_questions(&self, subject_id: &str) -> anyhow::Result<Vec<Question>>;
    /// Questions of the given exams, each carrying its exam's year.
    async fn list_exam_questions(&self, exam_ids: &[String]) -> anyhow::Result<Vec<Question>>;

    /// Removes the subject's clusters along with their junction rows.
    async fn delete_clusters(&self, subject_id: &str) -> anyhow::Result<()>;
    async fn insert_cluster(&self, cluster: NewCluster) -> anyhow::Result<Cluster>;
    async fn insert_question_clusters(&self, rows: Vec<QuestionCluster>) -> anyhow::Result<()>;
    /// Clusters of the subject, highest frequency first.
    async fn list_clusters(&self, subject_id: &str) -> anyhow::Result<Vec<Cluster>>;
}

pub type SharedExamStore = Arc<dyn ExamStore>;
