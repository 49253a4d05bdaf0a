use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::{lenient_string, lenient_string_list, parse_json_envelope};
use crate::llm_client::SharedLlmClient;
use crate::store::Question;

const CLUSTERING_DIRECTIVE: &str = "You are an academic curator grouping past exam questions into distinct academic topics.";

const CLUSTERING_INSTRUCTIONS: &str = r#"Instructions:
1. Identify recurring topics (for example "Thermodynamics", "Matrices", "Java Classes").
2. Assign every question ID to its single most relevant topic.
3. Summarise each topic briefly.
4. Rate the risk of skipping each topic as "Low", "Medium" or "High" from its complexity and frequency.

Respond with JSON only:
{
  "clusters": [
    { "topic_name": string, "summary": string, "risk_level": "Low" | "Medium" | "High", "question_ids": string[] }
  ]
}"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicCluster {
    #[serde(default, deserialize_with = "lenient_string")]
    pub topic_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub risk_level: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub question_ids: Vec<String>,
}

impl TopicCluster {
    pub fn topic_summary(&self) -> String {
        format!("{}: {}", self.topic_name, self.summary)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusteringResult {
    #[serde(default)]
    pub clusters: Vec<TopicCluster>,
}

/// Groups a subject's questions into topics.
pub struct ClusteringOracle {
    llm: SharedLlmClient,
}

impl ClusteringOracle {
    pub fn new(llm: SharedLlmClient) -> Self {
        Self { llm }
    }

    pub fn compose_prompt(questions: &[Question]) -> String {
        let mut prompt = String::from(CLUSTERING_DIRECTIVE);
        prompt.push_str("\n\nQuestions:\n");
        for question in questions {
            prompt.push_str(&format!(
                "[ID: {}] {}\n",
                question.id,
                question.question_text.trim()
            ));
        }
        prompt.push('\n');
        prompt.push_str(CLUSTERING_INSTRUCTIONS);
        prompt
    }

    /// Request failures propagate; an unparseable reply yields no clusters.
    #[instrument(skip_all, fields(questions = questions.len()))]
    pub async fn cluster(&self, questions: &[Question]) -> anyhow::Result<ClusteringResult> {
        let raw = self.llm.complete(&Self::compose_prompt(questions)).await?;

        Ok(parse_json_envelope(&raw).unwrap_or_else(|err| {
            warn!(%err, response = %raw, "Cluster response was not valid JSON; using no clusters");
            ClusteringResult::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ScriptedLlmClient;
    use std::sync::Arc;

    fn question(id: &str, text: &str) -> Question {
        Question {
            id: id.to_string(),
            exam_id: "exam-1".to_string(),
            question_text: text.to_string(),
            marks: 5.0,
            question_number: "1".to_string(),
            embedding: None,
            exam_year: None,
        }
    }

    #[test]
    fn prompt_lists_every_question_with_its_id() {
        let prompt = ClusteringOracle::compose_prompt(&[
            question("q-1", "Define entropy."),
            question("q-2", " Derive Bernoulli's equation. "),
        ]);
        assert!(prompt.contains("[ID: q-1] Define entropy.\n"));
        assert!(prompt.contains("[ID: q-2] Derive Bernoulli's equation.\n"));
        assert!(prompt.starts_with(CLUSTERING_DIRECTIVE));
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_no_clusters() {
        let llm = ScriptedLlmClient::new().on("academic curator", "clusters: none");
        let oracle = ClusteringOracle::new(Arc::new(llm));
        let result = oracle.cluster(&[question("q-1", "x")]).await.unwrap();
        assert!(result.clusters.is_empty());
    }

    #[tokio::test]
    async fn request_failure_propagates() {
        let llm = ScriptedLlmClient::new().fail_on("academic curator", "quota exceeded");
        let oracle = ClusteringOracle::new(Arc::new(llm));
        assert!(oracle.cluster(&[question("q-1", "x")]).await.is_err());
    }

    #[test]
    fn topic_summary_joins_name_and_summary() {
        let cluster = TopicCluster {
            topic_name: "Entropy".to_string(),
            summary: "Second-law reasoning".to_string(),
            ..TopicCluster::default()
        };
        assert_eq!(cluster.topic_summary(), "Entropy: Second-law reasoning");
    }
}
