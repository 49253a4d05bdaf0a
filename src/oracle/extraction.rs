use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::{
    lenient_opt_f64, lenient_opt_i32, lenient_opt_string, lenient_string, parse_json_envelope,
};
use crate::llm_client::{Document, SharedLlmClient};

const EXTRACTION_DIRECTIVE: &str = r#"You are reading a scanned university exam paper. Extract:
- the subject name;
- the year (null when it is neither printed nor inferable);
- the exam type, classified strictly as "Internal" or "End Semester" (tests and quizzes are "Internal"; finals and external papers are "End Semester");
- every question, keeping sub-parts that belong to the same question together, with its marks when printed and its number as printed (e.g. "1a", "2").

Respond with JSON only, in exactly this shape:
{
  "subject": string,
  "year": number | null,
  "exam_type": string,
  "questions": [
    { "question_number": string, "question_text": string, "marks": number | null }
  ]
}"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedExam {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub subject: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_i32")]
    pub year: Option<i32>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub exam_type: Option<String>,
    #[serde(default)]
    pub questions: Vec<ExtractedQuestion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedQuestion {
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub question_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub question_text: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub marks: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction request failed")]
    Request(#[source] anyhow::Error),
    #[error("Failed to parse exam content")]
    Parse(#[source] serde_json::Error),
}

/// Turns an exam document into structured question records.
pub struct ExtractionOracle {
    llm: SharedLlmClient,
}

impl ExtractionOracle {
    pub fn new(llm: SharedLlmClient) -> Self {
        Self { llm }
    }

    pub fn accepts(&self, document: &Document) -> bool {
        self.llm.accepts_document(&document.mime_type)
    }

    #[instrument(skip_all, fields(mime_type = %document.mime_type, bytes = document.bytes.len()))]
    pub async fn extract(&self, document: &Document) -> Result<ExtractedExam, ExtractionError> {
        let raw = self
            .llm
            .complete_with_document(EXTRACTION_DIRECTIVE, document)
            .await
            .map_err(ExtractionError::Request)?;

        parse_json_envelope::<ExtractedExam>(&raw).map_err(|err| {
            warn!(%err, response = %raw, "Extraction response was not valid JSON");
            ExtractionError::Parse(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ScriptedLlmClient;
    use std::sync::Arc;

    fn doc() -> Document {
        Document::new(b"%PDF-1.4".to_vec(), "application/pdf")
    }

    #[tokio::test]
    async fn fenced_extraction_is_parsed() {
        let llm = ScriptedLlmClient::new().on(
            "scanned university exam paper",
            "```json\n{\"subject\":\"Thermodynamics\",\"year\":\"2023\",\"exam_type\":\"Internal Test\",\
             \"questions\":[{\"question_number\":\"1a\",\"question_text\":\"Define entropy.\",\"marks\":\"5\"},\
             {\"question_text\":\"State the second law.\"}]}\n```",
        );
        let oracle = ExtractionOracle::new(Arc::new(llm));

        let exam = oracle.extract(&doc()).await.unwrap();
        assert_eq!(exam.subject.as_deref(), Some("Thermodynamics"));
        assert_eq!(exam.year, Some(2023));
        assert_eq!(exam.exam_type.as_deref(), Some("Internal Test"));
        assert_eq!(exam.questions.len(), 2);
        assert_eq!(exam.questions[0].marks, Some(5.0));
        assert_eq!(exam.questions[1].question_number, None);
        assert_eq!(exam.questions[1].marks, None);
    }

    #[tokio::test]
    async fn prose_response_is_a_parse_error() {
        let llm = ScriptedLlmClient::new().on(
            "scanned university exam paper",
            "Sorry, I cannot read this scan.",
        );
        let oracle = ExtractionOracle::new(Arc::new(llm));

        let err = oracle.extract(&doc()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
        assert_eq!(err.to_string(), "Failed to parse exam content");
    }

    #[tokio::test]
    async fn transport_failure_is_a_request_error() {
        let llm = ScriptedLlmClient::new().fail_on("scanned university exam paper", "timeout");
        let oracle = ExtractionOracle::new(Arc::new(llm));

        let err = oracle.extract(&doc()).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Request(_)));
    }
}
