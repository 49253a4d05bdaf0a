use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use exam_yield::config::{EmbeddingConfig, LlmConfig, ServerConfig, StoreConfig};
use exam_yield::embed::build_embeddings_provider;
use exam_yield::flows::{
    self, OptimizerFlow, OptimizerOutcome, OptimizerRequest, UploadFlow, UploadRequest,
};
use exam_yield::llm_client::{build_llm_client, Document, SharedLlmClient};
use exam_yield::store::{build_store, SharedExamStore};
use exam_yield::{build_router, AppState};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "exam-yield",
    about = "Turn past exam papers into topic clusters and high-yield study plans"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API.
    Serve {
        /// Overrides EXAM_YIELD_BIND.
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Extract, store and re-cluster one exam paper.
    Upload {
        /// PDF or image of the exam paper.
        path: PathBuf,
        /// Media type; guessed from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
    },
    /// List known subjects.
    Subjects,
    /// Show the stored topic clusters of a subject.
    Clusters {
        subject_id: String,
    },
    /// Rank a subject's past questions into a study plan.
    Optimize {
        #[arg(long)]
        subject_id: String,
        /// Exam date, YYYY-MM-DD.
        #[arg(long)]
        date: String,
        /// all, internal or end_semester.
        #[arg(long)]
        exam_type: Option<String>,
        /// Print the raw outcome as JSON instead of the text report.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => run_serve(bind).await,
        Commands::Upload { path, mime } => run_upload(path, mime).await,
        Commands::Subjects => {
            let store = store_from_env()?;
            print_json(&flows::list_subjects(store.as_ref()).await?)
        }
        Commands::Clusters { subject_id } => {
            let store = store_from_env()?;
            print_json(&flows::list_subject_clusters(store.as_ref(), &subject_id).await?)
        }
        Commands::Optimize {
            subject_id,
            date,
            exam_type,
            json,
        } => run_optimize(subject_id, date, exam_type, json).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn store_from_env() -> anyhow::Result<SharedExamStore> {
    build_store(StoreConfig::from_env()?).context("Exam store initialization failed")
}

fn llm_from_env() -> anyhow::Result<SharedLlmClient> {
    build_llm_client(&LlmConfig::from_env()?).context("LLM client initialization failed")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_serve(bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    let server = ServerConfig::from_env()?;
    let store = store_from_env()?;
    let llm = llm_from_env()?;
    let embedder = build_embeddings_provider(&EmbeddingConfig::from_env()?)
        .context("Embeddings provider initialization failed")?;

    if server.upload_token.is_none() {
        info!("EXAM_YIELD_UPLOAD_TOKEN not set; uploads are unauthenticated");
    }

    let addr = bind.unwrap_or(server.bind);
    let app = build_router(AppState::new(store, llm, embedder, &server));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "exam-yield listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}

async fn run_upload(path: PathBuf, mime: Option<String>) -> anyhow::Result<()> {
    let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = mime.unwrap_or_else(|| Document::guess_mime_type(&file_name).to_string());

    let store = store_from_env()?;
    let llm = llm_from_env()?;
    let embedder = build_embeddings_provider(&EmbeddingConfig::from_env()?)
        .context("Embeddings provider initialization failed")?;

    let flow = UploadFlow::new(store, llm, embedder);
    let document = Document::new(bytes, mime_type).with_file_name(file_name);
    let outcome = flow.upload(UploadRequest::from(document)).await?;
    print_json(&outcome)
}

async fn run_optimize(
    subject_id: String,
    date: String,
    exam_type: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let request = OptimizerRequest::parse(subject_id, &date, exam_type.as_deref())?;
    let flow = OptimizerFlow::new(store_from_env()?, llm_from_env()?);
    let outcome = flow.optimize(request).await?;

    if json {
        return print_json(&outcome);
    }

    match outcome {
        OptimizerOutcome::Ready { report } => print!("{}", report.render_text()),
        OptimizerOutcome::NoExams { subject } => {
            println!("No exams of the requested type found for {}.", subject.name)
        }
        OptimizerOutcome::NoQuestions {
            subject,
            exams_matched,
        } => println!(
            "Found {exams_matched} exams for {} but no questions extracted.",
            subject.name
        ),
    }
    Ok(())
}
