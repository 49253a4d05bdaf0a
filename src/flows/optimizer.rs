use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::error::FlowError;
use crate::llm_client::SharedLlmClient;
use crate::oracle::ranking::MAX_RANKED_QUESTIONS;
use crate::oracle::{RankedCluster, RankingOracle, SurvivalItem};
use crate::store::{Exam, SharedExamStore, Subject};

/// How many top-ranked clusters are flagged as high yield.
pub const HIGH_YIELD_COUNT: usize = 3;

const INTERNAL_KEYWORDS: &[&str] = &["internal", "mid", "quiz", "test"];
const END_SEMESTER_KEYWORDS: &[&str] = &["end", "final", "sem", "external"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamTypeFilter {
    #[default]
    All,
    Internal,
    EndSemester,
}

impl ExamTypeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Internal => "internal",
            Self::EndSemester => "end_semester",
        }
    }

    /// Case-insensitive keyword match on the free-text exam type.
    pub fn matches(&self, exam_type: &str) -> bool {
        let keywords = match self {
            Self::All => return true,
            Self::Internal => INTERNAL_KEYWORDS,
            Self::EndSemester => END_SEMESTER_KEYWORDS,
        };
        let lowered = exam_type.to_lowercase();
        keywords.iter().any(|keyword| lowered.contains(keyword))
    }
}

impl FromStr for ExamTypeFilter {
    type Err = FlowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "internal" => Ok(Self::Internal),
            "end_semester" => Ok(Self::EndSemester),
            other => Err(FlowError::invalid(format!(
                "Unknown exam type filter '{other}' (expected all, internal or end_semester)"
            ))),
        }
    }
}

impl fmt::Display for ExamTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerRequest {
    pub subject_id: String,
    pub target_date: NaiveDate,
    pub filter: ExamTypeFilter,
}

impl OptimizerRequest {
    /// Parse a `YYYY-MM-DD` date and an optional filter name.
    pub fn parse(
        subject_id: impl Into<String>,
        date: &str,
        exam_type: Option<&str>,
    ) -> Result<Self, FlowError> {
        let target_date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| {
            FlowError::invalid(format!("Invalid date '{date}' (expected YYYY-MM-DD)"))
        })?;
        let filter = exam_type.map(str::parse::<ExamTypeFilter>).transpose()?.unwrap_or_default();
        Ok(Self {
            subject_id: subject_id.into(),
            target_date,
            filter,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OptimizerOutcome {
    Ready { report: OptimizerReport },
    NoExams { subject: Subject },
    NoQuestions { subject: Subject, exams_matched: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizerReport {
    pub subject: Subject,
    pub target_date: NaiveDate,
    pub filter: ExamTypeFilter,
    pub exams_analyzed: usize,
    /// Questions found for the matching exams.
    pub questions_found: usize,
    /// Questions actually sent for ranking.
    pub questions_analyzed: usize,
    /// Highest yield first.
    pub clusters: Vec<RankedCluster>,
    pub survival_guide: Vec<SurvivalItem>,
    pub disclaimer: String,
}

impl OptimizerReport {
    pub fn render_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OptimizerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Study plan for {} (exam on {}, {} papers)",
            self.subject.name, self.target_date, self.filter
        )?;
        writeln!(
            f,
            "Analyzed {} questions from {} exams",
            self.questions_analyzed, self.exams_analyzed
        )?;

        if self.clusters.is_empty() {
            writeln!(f, "\nNo topics were ranked.")?;
        }
        for (idx, cluster) in self.clusters.iter().enumerate() {
            let flag = if idx < HIGH_YIELD_COUNT { " [HIGH YIELD]" } else { "" };
            writeln!(f, "\n{}. {}{}", idx + 1, cluster.topic, flag)?;
            if !cluster.summary.is_empty() {
                writeln!(f, "   {}", cluster.summary)?;
            }
            writeln!(
                f,
                "   Frequency: {} | Avg marks: {}m | Yield: {} | Skip risk: {}",
                cluster.frequency,
                cluster.avg_marks.round(),
                cluster.yield_score,
                cluster.risk_of_skipping.to_uppercase()
            )?;
            for example in &cluster.example_questions {
                writeln!(f, "   - {example}")?;
            }
        }

        if !self.survival_guide.is_empty() {
            writeln!(f, "\nSurvival guide:")?;
            for item in &self.survival_guide {
                writeln!(f, "- {}: {}", item.topic, item.reason)?;
            }
        }

        if !self.disclaimer.is_empty() {
            writeln!(f, "\n{}", self.disclaimer)?;
        }
        Ok(())
    }
}

/// Ranks a subject's past questions into a prioritised study plan.
pub struct OptimizerFlow {
    store: SharedExamStore,
    ranking: RankingOracle,
}

impl OptimizerFlow {
    pub fn new(store: SharedExamStore, llm: SharedLlmClient) -> Self {
        Self {
            store,
            ranking: RankingOracle::new(llm),
        }
    }

    #[instrument(
        skip_all,
        name = "optimizer_flow",
        fields(subject_id = %request.subject_id, filter = %request.filter)
    )]
    pub async fn optimize(&self, request: OptimizerRequest) -> Result<OptimizerOutcome, FlowError> {
        let subject_id = request.subject_id.trim();
        if subject_id.is_empty() {
            return Err(FlowError::invalid("Subject ID is required"));
        }

        let subject = self
            .store
            .get_subject(subject_id)
            .await
            .unwrap_or_else(|err| {
                warn!(error = ?err, "Subject lookup failed");
                None
            })
            .ok_or_else(|| FlowError::SubjectNotFound(subject_id.to_string()))?;

        let exams: Vec<Exam> = self
            .store
            .list_exams(&subject.id)
            .await
            .map_err(FlowError::persistence("Failed to fetch exams"))?
            .into_iter()
            .filter(|exam| request.filter.matches(&exam.exam_type))
            .collect();
        if exams.is_empty() {
            info!(subject = %subject.name, "No exams match the filter");
            return Ok(OptimizerOutcome::NoExams { subject });
        }

        let exam_ids: Vec<String> = exams.iter().map(|exam| exam.id.clone()).collect();
        let questions = self
            .store
            .list_exam_questions(&exam_ids)
            .await
            .map_err(FlowError::persistence("Failed to fetch questions"))?;
        if questions.is_empty() {
            info!(subject = %subject.name, exams = exams.len(), "Matching exams have no questions");
            return Ok(OptimizerOutcome::NoQuestions {
                subject,
                exams_matched: exams.len(),
            });
        }

        let mut analysis = self
            .ranking
            .rank(&questions, &subject.name, request.target_date)
            .await
            .map_err(|err| {
                error!(error = ?err, "Ranking request failed");
                FlowError::Oracle(err)
            })?;
        analysis.clusters.sort_by(by_yield_desc);

        info!(
            subject = %subject.name,
            exams = exams.len(),
            questions = questions.len(),
            clusters = analysis.clusters.len(),
            "Built study plan"
        );

        Ok(OptimizerOutcome::Ready {
            report: OptimizerReport {
                subject,
                target_date: request.target_date,
                filter: request.filter,
                exams_analyzed: exams.len(),
                questions_found: questions.len(),
                questions_analyzed: questions.len().min(MAX_RANKED_QUESTIONS),
                clusters: analysis.clusters,
                survival_guide: analysis.survival_guide,
                disclaimer: analysis.disclaimer,
            },
        })
    }
}

/// Descending by yield score, NaN scores last.
fn by_yield_desc(a: &RankedCluster, b: &RankedCluster) -> Ordering {
    match (a.yield_score.is_nan(), b.yield_score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b
            .yield_score
            .partial_cmp(&a.yield_score)
            .unwrap_or(Ordering::Equal),
    }
}
