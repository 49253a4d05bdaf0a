use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::{Datelike, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::embed::SharedEmbeddingsProvider;
use crate::error::FlowError;
use crate::llm_client::{Document, SharedLlmClient};
use crate::oracle::{ClusteringOracle, ExtractedExam, ExtractedQuestion, ExtractionOracle};
use crate::store::{
    NewCluster, NewExam, NewQuestion, Question, QuestionCluster, SharedExamStore, Subject,
    SubjectInsert,
};

pub const UNKNOWN_SUBJECT: &str = "Unknown Subject";
pub const UNKNOWN_EXAM_TYPE: &str = "Unknown Type";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub document: Document,
}

impl From<Document> for UploadRequest {
    fn from(document: Document) -> Self {
        Self { document }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub exam_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub questions_count: usize,
    pub clusters_created: usize,
    /// Set when re-clustering failed; the upload itself still succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clustering_error: Option<String>,
    pub extracted: ExtractedExam,
}

/// Ingests one exam document and refreshes its subject's topic clusters.
pub struct UploadFlow {
    store: SharedExamStore,
    extraction: ExtractionOracle,
    clustering: ClusteringOracle,
    embedder: SharedEmbeddingsProvider,
}

impl UploadFlow {
    pub fn new(
        store: SharedExamStore,
        llm: SharedLlmClient,
        embedder: SharedEmbeddingsProvider,
    ) -> Self {
        Self {
            store,
            extraction: ExtractionOracle::new(llm.clone()),
            clustering: ClusteringOracle::new(llm),
            embedder,
        }
    }

    #[instrument(skip_all, name = "upload_flow", fields(mime_type = %request.document.mime_type))]
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, FlowError> {
        let document = request.document;
        if document.is_empty() {
            return Err(FlowError::invalid("No file uploaded"));
        }
        if !self.extraction.accepts(&document) {
            return Err(FlowError::invalid(format!(
                "Unsupported file type for the configured model: {}",
                document.mime_type
            )));
        }

        let extracted = self.extraction.extract(&document).await.map_err(|err| {
            error!(error = ?err, "Exam extraction failed");
            FlowError::from(err)
        })?;

        let subject_name = extracted
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_SUBJECT)
            .to_string();
        let subject = self.resolve_subject(&subject_name).await?;

        let exam = self
            .store
            .insert_exam(NewExam {
                subject_id: subject.id.clone(),
                subject: subject.name.clone(),
                year: extracted
                    .year
                    .filter(|year| *year > 0)
                    .unwrap_or_else(|| Utc::now().year()),
                exam_type: extracted
                    .exam_type
                    .clone()
                    .filter(|kind| !kind.trim().is_empty())
                    .unwrap_or_else(|| UNKNOWN_EXAM_TYPE.to_string()),
            })
            .await
            .map_err(|err| {
                error!(error = ?err, subject_id = %subject.id, "Saving exam failed");
                FlowError::persistence("Failed to save exam metadata")(err)
            })?;

        let embeddings = self.embed_questions(&extracted.questions).await?;
        let rows: Vec<NewQuestion> = extracted
            .questions
            .iter()
            .zip(embeddings)
            .map(|(question, embedding)| NewQuestion {
                exam_id: exam.id.clone(),
                question_text: question.question_text.clone(),
                marks: question.marks.unwrap_or(0.0),
                question_number: question.question_number.clone().unwrap_or_default(),
                embedding: Some(embedding),
            })
            .collect();

        let questions_count = if rows.is_empty() {
            0
        } else {
            self.store
                .insert_questions(rows)
                .await
                .map_err(|err| {
                    error!(error = ?err, exam_id = %exam.id, "Saving questions failed");
                    FlowError::persistence("Failed to save questions")(err)
                })?
                .len()
        };
        info!(
            exam_id = %exam.id,
            subject = %subject.name,
            questions = questions_count,
            "Exam stored"
        );

        let (clusters_created, clustering_error) = match self.recluster(&subject.id).await {
            Ok(created) => (created, None),
            Err(err) => {
                warn!(error = ?err, subject_id = %subject.id, "Re-clustering failed");
                (0, Some(format!("{err:#}")))
            }
        };

        Ok(UploadOutcome {
            exam_id: exam.id,
            subject_id: subject.id,
            subject_name: subject.name,
            questions_count,
            clusters_created,
            clustering_error,
            extracted,
        })
    }

    /// Find the subject by name, creating it when absent. A lost insert race
    /// is resolved by reading back the winner's row.
    async fn resolve_subject(&self, name: &str) -> Result<Subject, FlowError> {
        let failed = FlowError::persistence("Failed to create subject");

        let existing = match self.store.find_subject_by_name(name).await {
            Ok(existing) => existing,
            Err(err) => return Err(failed(err)),
        };
        if let Some(subject) = existing {
            return Ok(subject);
        }

        let inserted = match self.store.insert_subject(name).await {
            Ok(inserted) => inserted,
            Err(err) => return Err(failed(err)),
        };
        match inserted {
            SubjectInsert::Created(subject) => {
                info!(subject_id = %subject.id, name, "Created subject");
                Ok(subject)
            }
            SubjectInsert::Conflict => {
                debug!(name, "Subject created concurrently; re-reading");
                match self.store.find_subject_by_name(name).await {
                    Ok(Some(subject)) => Ok(subject),
                    Ok(None) => Err(failed(anyhow::anyhow!(
                        "subject '{name}' conflicted on insert but was not found"
                    ))),
                    Err(err) => Err(failed(err)),
                }
            }
        }
    }

    async fn embed_questions(
        &self,
        questions: &[ExtractedQuestion],
    ) -> Result<Vec<Vec<f32>>, FlowError> {
        try_join_all(
            questions
                .iter()
                .map(|question| self.embedder.embed(&question.question_text)),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, "Embedding questions failed");
            FlowError::Oracle(err)
        })
    }

    /// Replace the subject's clusters with a fresh grouping of all its
    /// questions. Returns how many clusters were stored.
    #[instrument(skip(self))]
    pub async fn recluster(&self, subject_id: &str) -> anyhow::Result<usize> {
        let questions = self
            .store
            .list_subject_questions(subject_id)
            .await
            .context("loading subject questions")?;
        if questions.is_empty() {
            return Ok(0);
        }

        let grouping = self
            .clustering
            .cluster(&questions)
            .await
            .context("clustering request failed")?;

        self.store
            .delete_clusters(subject_id)
            .await
            .context("clearing previous clusters")?;

        let by_id: HashMap<&str, &Question> =
            questions.iter().map(|q| (q.id.as_str(), q)).collect();
        let mut created = 0;

        for topic in &grouping.clusters {
            let mut seen = HashSet::new();
            let members: Vec<&Question> = topic
                .question_ids
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .filter_map(|id| by_id.get(id.as_str()).copied())
                .collect();
            if members.is_empty() {
                debug!(topic = %topic.topic_name, "Skipping cluster without known questions");
                continue;
            }

            let total_marks: f64 = members.iter().map(|q| q.marks).sum();
            let cluster = match self
                .store
                .insert_cluster(NewCluster {
                    subject_id: subject_id.to_string(),
                    topic_summary: topic.topic_summary(),
                    risk_level: topic.risk_level.clone(),
                    frequency: members.len() as i64,
                    avg_marks: total_marks / members.len() as f64,
                })
                .await
            {
                Ok(cluster) => cluster,
                Err(err) => {
                    warn!(error = ?err, topic = %topic.topic_name, "Saving cluster failed");
                    continue;
                }
            };
            created += 1;

            let rows = members
                .iter()
                .map(|q| QuestionCluster {
                    question_id: q.id.clone(),
                    cluster_id: cluster.id.clone(),
                })
                .collect();
            if let Err(err) = self.store.insert_question_clusters(rows).await {
                warn!(error = ?err, cluster_id = %cluster.id, "Linking cluster questions failed");
            }
        }

        info!(subject_id, clusters = created, "Re-clustered subject");
        Ok(created)
    }
}
