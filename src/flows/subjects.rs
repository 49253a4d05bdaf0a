use tracing::{error, warn};

use crate::error::FlowError;
use crate::store::{Cluster, ExamStore, Subject};

/// All subjects, ordered by name.
pub async fn list_subjects(store: &dyn ExamStore) -> Result<Vec<Subject>, FlowError> {
    store.list_subjects().await.map_err(|err| {
        error!(error = ?err, "Listing subjects failed");
        FlowError::persistence("Failed to fetch subjects")(err)
    })
}

/// Persisted topic clusters of one subject, most frequent first.
pub async fn list_subject_clusters(
    store: &dyn ExamStore,
    subject_id: &str,
) -> Result<Vec<Cluster>, FlowError> {
    let subject_id = subject_id.trim();
    if subject_id.is_empty() {
        return Err(FlowError::invalid("Subject ID is required"));
    }

    store
        .get_subject(subject_id)
        .await
        .unwrap_or_else(|err| {
            warn!(error = ?err, "Subject lookup failed");
            None
        })
        .ok_or_else(|| FlowError::SubjectNotFound(subject_id.to_string()))?;

    let mut clusters = store
        .list_clusters(subject_id)
        .await
        .map_err(FlowError::persistence("Failed to fetch clusters"))?;
    clusters.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryExamStore, NewCluster, SubjectInsert};

    #[tokio::test]
    async fn subjects_come_back_sorted_by_name() {
        let store = MemoryExamStore::new();
        for name in ["Zoology", "Algebra", "Mechanics"] {
            store.insert_subject(name).await.unwrap();
        }

        let names: Vec<_> = list_subjects(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["Algebra", "Mechanics", "Zoology"]);
    }

    #[tokio::test]
    async fn listing_failure_is_a_persistence_error() {
        let store = MemoryExamStore::new();
        store.fail_operation("list_subjects");
        let err = list_subjects(&store).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch subjects");
    }

    #[tokio::test]
    async fn clusters_are_ordered_by_frequency() {
        let store = MemoryExamStore::new();
        let SubjectInsert::Created(subject) = store.insert_subject("Optics").await.unwrap() else {
            panic!("fresh store should accept the subject");
        };
        for (topic, frequency) in [("Lenses", 2), ("Mirrors", 5), ("Prisms", 1)] {
            store
                .insert_cluster(NewCluster {
                    subject_id: subject.id.clone(),
                    topic_summary: format!("{topic}: summary"),
                    risk_level: "Medium".to_string(),
                    frequency,
                    avg_marks: 4.0,
                })
                .await
                .unwrap();
        }

        let clusters = list_subject_clusters(&store, &subject.id).await.unwrap();
        let frequencies: Vec<_> = clusters.iter().map(|c| c.frequency).collect();
        assert_eq!(frequencies, [5, 2, 1]);

        assert!(matches!(
            list_subject_clusters(&store, "subject-404").await,
            Err(FlowError::SubjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_subject_lookup_reads_as_not_found() {
        let store = MemoryExamStore::new();
        store.fail_operation("get_subject");

        let err = list_subject_clusters(&store, "not-a-uuid").await.unwrap_err();
        assert!(matches!(err, FlowError::SubjectNotFound(ref id) if id == "not-a-uuid"));
    }
}
