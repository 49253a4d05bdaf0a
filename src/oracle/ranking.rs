use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::{lenient_f64, lenient_string, lenient_string_list, lenient_u32, parse_json_envelope};
use crate::llm_client::SharedLlmClient;
use crate::store::Question;

/// Questions beyond this many are left out of the ranking prompt.
pub const MAX_RANKED_QUESTIONS: usize = 100;

pub const FALLBACK_DISCLAIMER: &str = "Analysis failed.";

const RANKING_INSTRUCTIONS: &str = r#"Instructions:
1. Group the questions into topic clusters (for example "Thermodynamics Laws", "Beam Deflection").
2. For every cluster report how many questions fall into it, their average marks, a yield score (frequency multiplied by marks) and the risk of skipping it ("Low", "Medium" or "High").
3. Produce a survival guide of the three topics that must be studied to pass, each with a reason.

Respond with JSON only:
{
  "clusters": [
    {
      "topic": string,
      "summary": string,
      "frequency": number,
      "avg_marks": number,
      "yield_score": number,
      "risk_of_skipping": "High" | "Medium" | "Low",
      "example_questions": string[]
    }
  ],
  "survival_guide": [ { "topic": string, "reason": string } ],
  "disclaimer": "Probabilistic model based on past data. Not a guarantee."
}"#;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedCluster {
    #[serde(default, deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub frequency: u32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub avg_marks: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub yield_score: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub risk_of_skipping: String,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub example_questions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurvivalItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub topic: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingResult {
    #[serde(default)]
    pub clusters: Vec<RankedCluster>,
    #[serde(default)]
    pub survival_guide: Vec<SurvivalItem>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub disclaimer: String,
}

impl RankingResult {
    pub fn fallback() -> Self {
        Self {
            disclaimer: FALLBACK_DISCLAIMER.to_string(),
            ..Self::default()
        }
    }
}

/// Ranks a subject's topics by how much exam value they carry.
pub struct RankingOracle {
    llm: SharedLlmClient,
}

impl RankingOracle {
    pub fn new(llm: SharedLlmClient) -> Self {
        Self { llm }
    }

    pub fn compose_prompt(questions: &[Question], subject: &str, target_date: NaiveDate) -> String {
        let mut prompt = String::from("You are an expert exam strategist.\n");
        prompt.push_str(&format!(
            "Analyse these past exam questions for the subject \"{subject}\".\n"
        ));
        prompt.push_str(&format!("The student's exam is on {target_date}.\n\n"));
        prompt.push_str("Past questions:\n");
        for question in questions.iter().take(MAX_RANKED_QUESTIONS) {
            prompt.push_str(&format_question_line(question));
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(RANKING_INSTRUCTIONS);
        prompt
    }

    /// Request failures propagate; an unparseable reply yields [`RankingResult::fallback`].
    #[instrument(skip_all, fields(subject = %subject, questions = questions.len()))]
    pub async fn rank(
        &self,
        questions: &[Question],
        subject: &str,
        target_date: NaiveDate,
    ) -> anyhow::Result<RankingResult> {
        let prompt = Self::compose_prompt(questions, subject, target_date);
        let raw = self.llm.complete(&prompt).await?;

        Ok(parse_json_envelope(&raw).unwrap_or_else(|err| {
            warn!(%err, response = %raw, "Ranking response was not valid JSON");
            RankingResult::fallback()
        }))
    }
}

fn format_question_line(question: &Question) -> String {
    let year = question
        .exam_year
        .map(|year| year.to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    format!(
        "- Q: \"{}\" ({} marks) [Year: {}]",
        question.question_text, question.marks, year
    )
}
