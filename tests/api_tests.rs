//! Integration tests for the exam-yield HTTP API, run against the in-memory
//! store with scripted model replies.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use exam_yield::config::ServerConfig;
use exam_yield::embed::HashEmbeddingsProvider;
use exam_yield::llm_client::ScriptedLlmClient;
use exam_yield::store::{ExamStore, MemoryExamStore, NewExam, NewQuestion, SubjectInsert};
use exam_yield::{build_router, AppState};
use serde_json::Value;
use tower::util::ServiceExt; // for `oneshot`

const EXTRACT: &str = "scanned university exam paper";
const CLUSTER: &str = "academic curator";
const RANK: &str = "exam strategist";
const BOUNDARY: &str = "exam-yield-test-boundary";

const FLUIDS_PAPER: &str = r#"{"subject": "Fluid Mechanics", "year": 2022, "exam_type": "End Semester",
  "questions": [
    {"question_number": "1", "question_text": "Derive Bernoulli's equation.", "marks": 10},
    {"question_number": "2", "question_text": "Define viscosity.", "marks": 2}
  ]}"#;

fn server_config(upload_token: Option<&str>) -> ServerConfig {
    ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        upload_token: upload_token.map(str::to_string),
        max_upload_bytes: ServerConfig::DEFAULT_MAX_UPLOAD_BYTES,
    }
}

fn setup_app(
    store: Arc<MemoryExamStore>,
    llm: Arc<ScriptedLlmClient>,
    upload_token: Option<&str>,
) -> axum::Router {
    let state = AppState::new(
        store,
        llm,
        Arc::new(HashEmbeddingsProvider::new(16)),
        &server_config(upload_token),
    );
    build_router(state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn upload_request(field: &str, bytes: &[u8], token: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"paper.pdf\"\r\n\
             Content-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/exams/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn seed_subject(store: &MemoryExamStore, name: &str, exam_type: &str) -> String {
    let SubjectInsert::Created(subject) = store.insert_subject(name).await.unwrap() else {
        panic!("subject {name} should be new");
    };
    let exam = store
        .insert_exam(NewExam {
            subject_id: subject.id.clone(),
            subject: subject.name.clone(),
            year: 2023,
            exam_type: exam_type.to_string(),
        })
        .await
        .unwrap();
    store
        .insert_questions(vec![NewQuestion {
            exam_id: exam.id,
            question_text: "Explain Le Chatelier's principle.".to_string(),
            marks: 6.0,
            question_number: "1".to_string(),
            embedding: None,
        }])
        .await
        .unwrap();
    subject.id
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app(
        Arc::new(MemoryExamStore::new()),
        Arc::new(ScriptedLlmClient::new()),
        None,
    );

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "exam-yield");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_upload_stores_exam_and_lists_subject() {
    let store = Arc::new(MemoryExamStore::new());
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(EXTRACT, FLUIDS_PAPER)
            .on(CLUSTER, r#"{"clusters": []}"#),
    );
    let app = setup_app(store.clone(), llm, None);

    let response = app
        .clone()
        .oneshot(upload_request("file", b"%PDF-1.7 fluids", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["subject_name"], "Fluid Mechanics");
    assert_eq!(body["data"]["questions_count"], 2);
    assert_eq!(body["data"]["extracted"]["exam_type"], "End Semester");
    assert_eq!(store.questions().len(), 2);

    let response = app.oneshot(get("/api/subjects")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["data"][0]["name"], "Fluid Mechanics");
}

#[tokio::test]
async fn test_upload_without_file_field_is_bad_request() {
    let llm = Arc::new(ScriptedLlmClient::new());
    let app = setup_app(Arc::new(MemoryExamStore::new()), llm.clone(), None);

    let response = app
        .oneshot(upload_request("attachment", b"%PDF", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No file uploaded");
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn test_unparseable_extraction_is_bad_gateway() {
    let llm = Arc::new(ScriptedLlmClient::new().on(EXTRACT, "The scan is blurry."));
    let app = setup_app(Arc::new(MemoryExamStore::new()), llm, None);

    let response = app
        .oneshot(upload_request("file", b"%PDF", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"], "Failed to parse exam content");
}

#[tokio::test]
async fn test_upload_requires_token_when_configured() {
    let store = Arc::new(MemoryExamStore::new());
    let llm = Arc::new(
        ScriptedLlmClient::new()
            .on(EXTRACT, FLUIDS_PAPER)
            .on(CLUSTER, r#"{"clusters": []}"#),
    );
    let app = setup_app(store.clone(), llm, Some("s3cret"));

    let response = app
        .clone()
        .oneshot(upload_request("file", b"%PDF", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(upload_request("file", b"%PDF", Some("wrong")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.exams().is_empty());

    let response = app
        .clone()
        .oneshot(upload_request("file", b"%PDF", Some("s3cret")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Reads stay open.
    let response = app.oneshot(get("/api/subjects")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_optimizer_reports_empty_state_without_ranking() {
    let store = Arc::new(MemoryExamStore::new());
    let subject_id = seed_subject(&store, "Chemistry", "Internal Quiz").await;
    let llm = Arc::new(ScriptedLlmClient::new().on(RANK, "{}"));
    let app = setup_app(store, llm.clone(), None);

    let uri = format!(
        "/api/optimizer?subject_id={subject_id}&date=2025-06-01&exam_type=end_semester"
    );
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "no_exams");
    assert_eq!(body["subject"]["name"], "Chemistry");
    assert_eq!(llm.calls_matching(RANK), 0);
}

#[tokio::test]
async fn test_optimizer_returns_sorted_report() {
    let store = Arc::new(MemoryExamStore::new());
    let subject_id = seed_subject(&store, "Chemistry", "Internal Test").await;
    let llm = Arc::new(ScriptedLlmClient::new().on(
        RANK,
        r#"{"clusters": [
             {"topic": "Kinetics", "frequency": 1, "avg_marks": 4, "yield_score": 4},
             {"topic": "Equilibrium", "frequency": 1, "avg_marks": 6, "yield_score": 6}
           ],
           "survival_guide": [{"topic": "Equilibrium", "reason": "Asked every year"}],
           "disclaimer": "Probabilistic model based on past data. Not a guarantee."}"#,
    ));
    let app = setup_app(store, llm, None);

    let uri = format!("/api/optimizer?subject_id={subject_id}&date=2025-06-01&exam_type=internal");
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["report"]["filter"], "internal");
    assert_eq!(body["report"]["target_date"], "2025-06-01");
    assert_eq!(body["report"]["clusters"][0]["topic"], "Equilibrium");
    assert_eq!(body["report"]["clusters"][1]["topic"], "Kinetics");
    assert_eq!(body["report"]["questions_analyzed"], 1);
}

#[tokio::test]
async fn test_optimizer_ranking_failure_is_bad_gateway() {
    let store = Arc::new(MemoryExamStore::new());
    let subject_id = seed_subject(&store, "Chemistry", "Final").await;
    let llm = Arc::new(ScriptedLlmClient::new().fail_on(RANK, "upstream timeout"));
    let app = setup_app(store, llm, None);

    let uri = format!("/api/optimizer?subject_id={subject_id}&date=2025-06-01");
    let response = app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Model request failed");
}

#[tokio::test]
async fn test_optimizer_validates_input() {
    let store = Arc::new(MemoryExamStore::new());
    let subject_id = seed_subject(&store, "Physics", "Final").await;
    let app = setup_app(store, Arc::new(ScriptedLlmClient::new()), None);

    let cases = [
        ("/api/optimizer?date=2025-06-01".to_string(), StatusCode::BAD_REQUEST),
        (
            format!("/api/optimizer?subject_id={subject_id}&date=June"),
            StatusCode::BAD_REQUEST,
        ),
        (
            format!("/api/optimizer?subject_id={subject_id}&date=2025-06-01&exam_type=weekly"),
            StatusCode::BAD_REQUEST,
        ),
        (
            "/api/optimizer?subject_id=subject-404&date=2025-06-01".to_string(),
            StatusCode::NOT_FOUND,
        ),
    ];

    for (uri, expected) in cases {
        let response = app.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), expected, "{uri}");
        let body = extract_json(response.into_body()).await;
        assert_eq!(body["success"], false, "{uri}");
    }
}

#[tokio::test]
async fn test_subject_clusters_unknown_subject_is_not_found() {
    let app = setup_app(
        Arc::new(MemoryExamStore::new()),
        Arc::new(ScriptedLlmClient::new()),
        None,
    );

    let response = app
        .oneshot(get("/api/subjects/subject-404/clusters"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
