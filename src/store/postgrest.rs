use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::client::ExamStore;
use super::types::{
    Cluster, Exam, NewCluster, NewExam, NewQuestion, Question, QuestionCluster, Subject,
    SubjectInsert,
};
use crate::config::StoreConfig;

const SUBJECTS: &str = "subjects";
const EXAMS: &str = "exams";
const QUESTIONS: &str = "questions";
const CLUSTERS: &str = "clusters";
const QUESTION_CLUSTERS: &str = "question_clusters";

const EXAM_COLUMNS: &str = "id,subject_id,subject,year,exam_type,created_at";
const CLUSTER_COLUMNS: &str = "id,subject_id,topic_summary,risk_level,frequency,avg_marks";

type QueryParams<'a> = Vec<(&'a str, String)>;

/// HTTP client for a PostgREST (Supabase) endpoint.
pub struct PostgrestExamStore {
    http: reqwest::Client,
    config: StoreConfig,
}

impl PostgrestExamStore {
    pub fn new(config: StoreConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build PostgREST HTTP client")?;

        Ok(Self { http, config })
    }

    fn endpoint(&self, table: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        format!("{base}/rest/v1/{table}")
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(key) = &self.config.api_key {
            builder.header("apikey", key).bearer_auth(key)
        } else {
            builder
        }
    }

    async fn select<R: DeserializeOwned>(
        &self,
        table: &str,
        params: &QueryParams<'_>,
    ) -> anyhow::Result<Vec<R>> {
        let response = self
            .apply_auth(self.http.get(self.endpoint(table)))
            .query(params)
            .send()
            .await
            .with_context(|| format!("Select from '{table}' failed"))?
            .error_for_status()
            .with_context(|| format!("Select from '{table}' returned error status"))?;

        response
            .json::<Vec<R>>()
            .await
            .with_context(|| format!("Failed to deserialize '{table}' rows"))
    }

    async fn send_insert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        rows: &T,
        prefer: &str,
    ) -> anyhow::Result<reqwest::Response> {
        self.apply_auth(self.http.post(self.endpoint(table)))
            .header("Prefer", prefer)
            .json(rows)
            .send()
            .await
            .with_context(|| format!("Insert into '{table}' failed"))
    }

    async fn insert<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        table: &str,
        rows: &T,
    ) -> anyhow::Result<Vec<R>> {
        self.send_insert(table, rows, "return=representation")
            .await?
            .error_for_status()
            .with_context(|| format!("Insert into '{table}' returned error status"))?
            .json::<Vec<R>>()
            .await
            .with_context(|| format!("Failed to deserialize inserted '{table}' rows"))
    }

    async fn insert_one<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
    ) -> anyhow::Result<R> {
        self.insert::<_, R>(table, row)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Insert into '{table}' returned no row"))
    }

    fn eq(value: &str) -> String {
        format!("eq.{value}")
    }

    fn in_list(values: &[String]) -> String {
        let quoted: Vec<String> = values
            .iter()
            .map(|value| format!("\"{}\"", value.replace('"', "\\\"")))
            .collect();
        format!("in.({})", quoted.join(","))
    }
}

#[derive(Deserialize)]
struct QuestionRow {
    id: String,
    exam_id: String,
    question_text: String,
    #[serde(default)]
    marks: Option<f64>,
    #[serde(default)]
    question_number: Option<String>,
    #[serde(default)]
    exams: Option<ExamEmbed>,
}

#[derive(Deserialize)]
struct ExamEmbed {
    #[serde(default)]
    year: Option<i32>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            exam_id: row.exam_id,
            question_text: row.question_text,
            marks: row.marks.unwrap_or(0.0),
            question_number: row.question_number.unwrap_or_default(),
            embedding: None,
            exam_year: row.exams.and_then(|exam| exam.year),
        }
    }
}

#[async_trait]
impl ExamStore for PostgrestExamStore {
    async fn list_subjects(&self) -> anyhow::Result<Vec<Subject>> {
        self.select(
            SUBJECTS,
            &vec![("select", "id,name".to_string()), ("order", "name.asc".to_string())],
        )
        .await
    }

    async fn get_subject(&self, id: &str) -> anyhow::Result<Option<Subject>> {
        let rows: Vec<Subject> = self
            .select(
                SUBJECTS,
                &vec![("select", "id,name".to_string()), ("id", Self::eq(id))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_subject_by_name(&self, name: &str) -> anyhow::Result<Option<Subject>> {
        let rows: Vec<Subject> = self
            .select(
                SUBJECTS,
                &vec![("select", "id,name".to_string()), ("name", Self::eq(name))],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(level = "debug", skip(self))]
    async fn insert_subject(&self, name: &str) -> anyhow::Result<SubjectInsert> {
        let response = self
            .send_insert(SUBJECTS, &json!({ "name": name }), "return=representation")
            .await?;

        if response.status() == StatusCode::CONFLICT {
            debug!(name, "Subject insert hit unique constraint");
            return Ok(SubjectInsert::Conflict);
        }

        let rows = response
            .error_for_status()
            .context("Insert into 'subjects' returned error status")?
            .json::<Vec<Subject>>()
            .await
            .context("Failed to deserialize inserted subject")?;

        rows.into_iter()
            .next()
            .map(SubjectInsert::Created)
            .ok_or_else(|| anyhow!("Insert into 'subjects' returned no row"))
    }

    async fn insert_exam(&self, exam: NewExam) -> anyhow::Result<Exam> {
        self.insert_one(EXAMS, &exam).await
    }

    async fn list_exams(&self, subject_id: &str) -> anyhow::Result<Vec<Exam>> {
        self.select(
            EXAMS,
            &vec![
                ("select", EXAM_COLUMNS.to_string()),
                ("subject_id", Self::eq(subject_id)),
            ],
        )
        .await
    }

    #[instrument(level = "debug", skip_all, fields(count = questions.len()))]
    async fn insert_questions(&self, questions: Vec<NewQuestion>) -> anyhow::Result<Vec<Question>> {
        if questions.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<QuestionRow> = self.insert(QUESTIONS, &questions).await?;
        Ok(rows.into_iter().map(Question::from).collect())
    }

    async fn list_subject_questions(&self, subject_id: &str) -> anyhow::Result<Vec<Question>> {
        let rows: Vec<QuestionRow> = self
            .select(
                QUESTIONS,
                &vec![
                    (
                        "select",
                        "id,exam_id,question_text,marks,question_number,exams!inner(subject_id,year)"
                            .to_string(),
                    ),
                    ("exams.subject_id", Self::eq(subject_id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Question::from).collect())
    }

    async fn list_exam_questions(&self, exam_ids: &[String]) -> anyhow::Result<Vec<Question>> {
        if exam_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<QuestionRow> = self
            .select(
                QUESTIONS,
                &vec![
                    (
                        "select",
                        "id,exam_id,question_text,marks,question_number,exams(year)".to_string(),
                    ),
                    ("exam_id", Self::in_list(exam_ids)),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Question::from).collect())
    }

    async fn delete_clusters(&self, subject_id: &str) -> anyhow::Result<()> {
        self.apply_auth(self.http.delete(self.endpoint(CLUSTERS)))
            .query(&[("subject_id", Self::eq(subject_id))])
            .send()
            .await
            .context("Delete from 'clusters' failed")?
            .error_for_status()
            .context("Delete from 'clusters' returned error status")?;

        Ok(())
    }

    async fn insert_cluster(&self, cluster: NewCluster) -> anyhow::Result<Cluster> {
        self.insert_one(CLUSTERS, &cluster).await
    }

    async fn insert_question_clusters(&self, rows: Vec<QuestionCluster>) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        self.send_insert(QUESTION_CLUSTERS, &rows, "return=minimal")
            .await?
            .error_for_status()
            .context("Insert into 'question_clusters' returned error status")?;

        Ok(())
    }

    async fn list_clusters(&self, subject_id: &str) -> anyhow::Result<Vec<Cluster>> {
        self.select(
            CLUSTERS,
            &vec![
                ("select", CLUSTER_COLUMNS.to_string()),
                ("subject_id", Self::eq(subject_id)),
                ("order", "frequency.desc".to_string()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use serde_json::json;

    fn store(base_url: &str) -> PostgrestExamStore {
        PostgrestExamStore::new(StoreConfig {
            backend: StoreBackend::PostgRest,
            base_url: base_url.to_string(),
            api_key: Some("anon".to_string()),
            http_timeout_ms: 1_000,
        })
        .expect("build store")
    }

    #[test]
    fn endpoint_joins_rest_prefix() {
        assert_eq!(
            store("https://db.example.co/").endpoint("questions"),
            "https://db.example.co/rest/v1/questions"
        );
    }

    #[test]
    fn in_list_quotes_values() {
        let ids = vec!["a1".to_string(), "b\"2".to_string()];
        assert_eq!(PostgrestExamStore::in_list(&ids), r#"in.("a1","b\"2")"#);
    }

    #[test]
    fn question_rows_default_missing_fields_and_lift_exam_year() {
        let row: QuestionRow = serde_json::from_value(json!({
            "id": "q1",
            "exam_id": "e1",
            "question_text": "Define entropy.",
            "marks": null,
            "exams": { "subject_id": "s1", "year": 2022 }
        }))
        .unwrap();

        let question = Question::from(row);
        assert_eq!(question.marks, 0.0);
        assert_eq!(question.question_number, "");
        assert_eq!(question.exam_year, Some(2022));
    }

    /// Local PostgREST stand-in: `subjects` rejects "Calculus" as a duplicate.
    async fn spawn_subjects_endpoint() -> String {
        use axum::{http::StatusCode as HttpStatus, routing::post, Json, Router};

        let app = Router::new().route(
            "/rest/v1/subjects",
            post(|Json(body): Json<serde_json::Value>| async move {
                let name = body["name"].as_str().unwrap_or_default().to_string();
                if name == "Calculus" {
                    (HttpStatus::CONFLICT, Json(json!({ "code": "23505" })))
                } else {
                    (HttpStatus::CREATED, Json(json!([{ "id": "uuid-7", "name": name }])))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn subject_insert_maps_conflict_and_created() {
        let store = store(&spawn_subjects_endpoint().await);

        let duplicate = store.insert_subject("Calculus").await.unwrap();
        assert!(matches!(duplicate, SubjectInsert::Conflict));

        let created = store.insert_subject("Statics").await.unwrap();
        let SubjectInsert::Created(subject) = created else {
            panic!("expected a created subject");
        };
        assert_eq!(subject.id, "uuid-7");
        assert_eq!(subject.name, "Statics");
    }
}
