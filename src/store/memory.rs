use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use super::client::ExamStore;
use super::types::{
    Cluster, Exam, NewCluster, NewExam, NewQuestion, Question, QuestionCluster, Subject,
    SubjectInsert,
};

#[derive(Default)]
struct Tables {
    subjects: Vec<Subject>,
    exams: Vec<Exam>,
    questions: Vec<Question>,
    clusters: Vec<Cluster>,
    question_clusters: Vec<QuestionCluster>,
}

/// Process-local store with the same unique-name and cascade rules as the
/// hosted schema. Every operation yields to the runtime first so concurrent
/// callers interleave the way they would against a remote database.
#[derive(Default)]
pub struct MemoryExamStore {
    tables: Mutex<Tables>,
    id_counter: AtomicU64,
    failing: Mutex<HashSet<&'static str>>,
}

impl MemoryExamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of the named trait method fail.
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{id}")
    }

    async fn enter(&self, operation: &'static str) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        let failing = self
            .failing
            .lock()
            .map_err(|_| anyhow!("memory store failure set poisoned"))?;
        if failing.contains(operation) {
            return Err(anyhow!("memory store: {operation} failed"));
        }
        Ok(())
    }

    fn tables(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    pub fn subjects(&self) -> Vec<Subject> {
        self.tables
            .lock()
            .map(|t| t.subjects.clone())
            .unwrap_or_default()
    }

    pub fn exams(&self) -> Vec<Exam> {
        self.tables
            .lock()
            .map(|t| t.exams.clone())
            .unwrap_or_default()
    }

    pub fn questions(&self) -> Vec<Question> {
        self.tables
            .lock()
            .map(|t| t.questions.clone())
            .unwrap_or_default()
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.tables
            .lock()
            .map(|t| t.clusters.clone())
            .unwrap_or_default()
    }

    pub fn question_clusters(&self) -> Vec<QuestionCluster> {
        self.tables
            .lock()
            .map(|t| t.question_clusters.clone())
            .unwrap_or_default()
    }

    fn with_exam_years(tables: &Tables, questions: Vec<Question>) -> Vec<Question> {
        let years: HashMap<&str, i32> = tables
            .exams
            .iter()
            .map(|exam| (exam.id.as_str(), exam.year))
            .collect();

        questions
            .into_iter()
            .map(|mut question| {
                question.exam_year = years.get(question.exam_id.as_str()).copied();
                question.embedding = None;
                question
            })
            .collect()
    }
}

#[async_trait]
impl ExamStore for MemoryExamStore {
    async fn list_subjects(&self) -> anyhow::Result<Vec<Subject>> {
        self.enter("list_subjects").await?;
        let mut subjects = self.tables()?.subjects.clone();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subjects)
    }

    async fn get_subject(&self, id: &str) -> anyhow::Result<Option<Subject>> {
        self.enter("get_subject").await?;
        Ok(self.tables()?.subjects.iter().find(|s| s.id == id).cloned())
    }

    async fn find_subject_by_name(&self, name: &str) -> anyhow::Result<Option<Subject>> {
        self.enter("find_subject_by_name").await?;
        Ok(self
            .tables()?
            .subjects
            .iter()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn insert_subject(&self, name: &str) -> anyhow::Result<SubjectInsert> {
        self.enter("insert_subject").await?;
        let mut tables = self.tables()?;
        if tables.subjects.iter().any(|s| s.name == name) {
            return Ok(SubjectInsert::Conflict);
        }

        let subject = Subject {
            id: self.next_id("subject"),
            name: name.to_string(),
        };
        tables.subjects.push(subject.clone());
        Ok(SubjectInsert::Created(subject))
    }

    async fn insert_exam(&self, exam: NewExam) -> anyhow::Result<Exam> {
        self.enter("insert_exam").await?;
        let mut tables = self.tables()?;
        if !tables.subjects.iter().any(|s| s.id == exam.subject_id) {
            return Err(anyhow!("subject {} does not exist", exam.subject_id));
        }

        let exam = Exam {
            id: self.next_id("exam"),
            subject_id: Some(exam.subject_id),
            subject: exam.subject,
            year: exam.year,
            exam_type: exam.exam_type,
            created_at: Some(Utc::now()),
        };
        tables.exams.push(exam.clone());
        Ok(exam)
    }

    async fn list_exams(&self, subject_id: &str) -> anyhow::Result<Vec<Exam>> {
        self.enter("list_exams").await?;
        Ok(self
            .tables()?
            .exams
            .iter()
            .filter(|exam| exam.subject_id.as_deref() == Some(subject_id))
            .cloned()
            .collect())
    }

    async fn insert_questions(&self, questions: Vec<NewQuestion>) -> anyhow::Result<Vec<Question>> {
        self.enter("insert_questions").await?;
        let mut tables = self.tables()?;
        if let Some(orphan) = questions
            .iter()
            .find(|q| !tables.exams.iter().any(|exam| exam.id == q.exam_id))
        {
            return Err(anyhow!("exam {} does not exist", orphan.exam_id));
        }

        let inserted: Vec<Question> = questions
            .into_iter()
            .map(|q| Question {
                id: self.next_id("question"),
                exam_id: q.exam_id,
                question_text: q.question_text,
                marks: q.marks,
                question_number: q.question_number,
                embedding: q.embedding,
                exam_year: None,
            })
            .collect();
        tables.questions.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn list_subject_questions(&self, subject_id: &str) -> anyhow::Result<Vec<Question>> {
        self.enter("list_subject_questions").await?;
        let tables = self.tables()?;
        let exam_ids: HashSet<&str> = tables
            .exams
            .iter()
            .filter(|exam| exam.subject_id.as_deref() == Some(subject_id))
            .map(|exam| exam.id.as_str())
            .collect();

        let questions = tables
            .questions
            .iter()
            .filter(|q| exam_ids.contains(q.exam_id.as_str()))
            .cloned()
            .collect();
        Ok(Self::with_exam_years(&tables, questions))
    }

    async fn list_exam_questions(&self, exam_ids: &[String]) -> anyhow::Result<Vec<Question>> {
        self.enter("list_exam_questions").await?;
        let tables = self.tables()?;
        let questions = tables
            .questions
            .iter()
            .filter(|q| exam_ids.contains(&q.exam_id))
            .cloned()
            .collect();
        Ok(Self::with_exam_years(&tables, questions))
    }

    async fn delete_clusters(&self, subject_id: &str) -> anyhow::Result<()> {
        self.enter("delete_clusters").await?;
        let mut tables = self.tables()?;
        let removed: HashSet<String> = tables
            .clusters
            .iter()
            .filter(|c| c.subject_id == subject_id)
            .map(|c| c.id.clone())
            .collect();

        tables.clusters.retain(|c| c.subject_id != subject_id);
        tables
            .question_clusters
            .retain(|row| !removed.contains(&row.cluster_id));
        Ok(())
    }

    async fn insert_cluster(&self, cluster: NewCluster) -> anyhow::Result<Cluster> {
        self.enter("insert_cluster").await?;
        let cluster = Cluster {
            id: self.next_id("cluster"),
            subject_id: cluster.subject_id,
            topic_summary: cluster.topic_summary,
            risk_level: cluster.risk_level,
            frequency: cluster.frequency,
            avg_marks: cluster.avg_marks,
        };
        self.tables()?.clusters.push(cluster.clone());
        Ok(cluster)
    }

    async fn insert_question_clusters(&self, rows: Vec<QuestionCluster>) -> anyhow::Result<()> {
        self.enter("insert_question_clusters").await?;
        self.tables()?.question_clusters.extend(rows);
        Ok(())
    }

    async fn list_clusters(&self, subject_id: &str) -> anyhow::Result<Vec<Cluster>> {
        self.enter("list_clusters").await?;
        let mut clusters: Vec<Cluster> = self
            .tables()?
            .clusters
            .iter()
            .filter(|c| c.subject_id == subject_id)
            .cloned()
            .collect();
        clusters.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        Ok(clusters)
    }
}
