use std::env;
use std::net::SocketAddr;

use anyhow::Context;

pub(crate) fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAi,
}

impl LlmProvider {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => anyhow::bail!("Unknown LLM provider '{other}' (expected gemini or openai)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub http_timeout_ms: u64,
}

impl LlmConfig {
    const PROVIDER_VARS: [&'static str; 1] = ["EXAM_YIELD_LLM_PROVIDER"];
    const GEMINI_KEY_VARS: [&'static str; 3] = [
        "GEMINI_API_KEY",
        "GOOGLE_API_KEY",
        "NEXT_PUBLIC_GEMINI_API_KEY",
    ];
    const OPENAI_KEY_VARS: [&'static str; 1] = ["OPENAI_API_KEY"];
    const GEMINI_BASE_URL_VARS: [&'static str; 1] = ["EXAM_YIELD_GEMINI_BASE_URL"];
    const OPENAI_BASE_URL_VARS: [&'static str; 1] = ["OPENAI_BASE_URL"];
    const MODEL_VARS: [&'static str; 1] = ["EXAM_YIELD_LLM_MODEL"];
    const TIMEOUT_VARS: [&'static str; 1] = ["EXAM_YIELD_LLM_TIMEOUT_MS"];

    pub const DEFAULT_GEMINI_MODEL: &'static str = "gemini-2.5-flash";
    pub const DEFAULT_OPENAI_MODEL: &'static str = "gpt-4o-mini";

    pub fn from_env() -> anyhow::Result<Self> {
        let provider = match read_env(&Self::PROVIDER_VARS) {
            Some(raw) => LlmProvider::parse(&raw)?,
            None => LlmProvider::Gemini,
        };

        let (api_key, base_url, default_model) = match provider {
            LlmProvider::Gemini => (
                read_env(&Self::GEMINI_KEY_VARS),
                read_env(&Self::GEMINI_BASE_URL_VARS),
                Self::DEFAULT_GEMINI_MODEL,
            ),
            LlmProvider::OpenAi => (
                read_env(&Self::OPENAI_KEY_VARS),
                read_env(&Self::OPENAI_BASE_URL_VARS),
                Self::DEFAULT_OPENAI_MODEL,
            ),
        };

        let http_timeout_ms = read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(120_000);

        Ok(Self {
            provider,
            api_key,
            base_url,
            model: read_env(&Self::MODEL_VARS).unwrap_or_else(|| default_model.to_string()),
            http_timeout_ms,
        })
    }

    pub fn require_api_key(&self) -> anyhow::Result<&str> {
        self.api_key.as_deref().with_context(|| match self.provider {
            LlmProvider::Gemini => "Set GEMINI_API_KEY (or GOOGLE_API_KEY) to use the Gemini client",
            LlmProvider::OpenAi => "Set OPENAI_API_KEY to use the OpenAI client",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Gemini,
    OpenAi,
    /// Deterministic local vectors; no network.
    Hash,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub vector_dim: usize,
}

impl EmbeddingConfig {
    const PROVIDER_VARS: [&'static str; 2] =
        ["EXAM_YIELD_EMBEDDING_PROVIDER", "EXAM_YIELD_LLM_PROVIDER"];
    const MODEL_VARS: [&'static str; 1] = ["EXAM_YIELD_EMBEDDING_MODEL"];
    const DIM_VARS: [&'static str; 1] = ["EXAM_YIELD_EMBEDDING_DIM"];
    const GEMINI_BASE_URL_VARS: [&'static str; 2] =
        ["EXAM_YIELD_EMBEDDING_BASE_URL", "EXAM_YIELD_GEMINI_BASE_URL"];
    const OPENAI_BASE_URL_VARS: [&'static str; 2] =
        ["EXAM_YIELD_EMBEDDING_BASE_URL", "OPENAI_BASE_URL"];

    pub fn from_env() -> anyhow::Result<Self> {
        let provider = match read_env(&Self::PROVIDER_VARS)
            .map(|raw| raw.trim().to_ascii_lowercase())
            .as_deref()
        {
            None | Some("gemini") | Some("google") => EmbeddingProvider::Gemini,
            Some("openai") => EmbeddingProvider::OpenAi,
            Some("hash") | Some("local") => EmbeddingProvider::Hash,
            Some(other) => anyhow::bail!("Unknown embedding provider '{other}'"),
        };

        let (api_key, base_url, default_model) = match provider {
            EmbeddingProvider::Gemini => (
                read_env(&LlmConfig::GEMINI_KEY_VARS),
                read_env(&Self::GEMINI_BASE_URL_VARS),
                "text-embedding-004",
            ),
            EmbeddingProvider::OpenAi => (
                read_env(&LlmConfig::OPENAI_KEY_VARS),
                read_env(&Self::OPENAI_BASE_URL_VARS),
                "text-embedding-3-small",
            ),
            EmbeddingProvider::Hash => (None, None, "blake3-hash"),
        };

        let vector_dim = read_env(&Self::DIM_VARS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(768);

        Ok(Self {
            provider,
            api_key,
            base_url,
            model: read_env(&Self::MODEL_VARS).unwrap_or_else(|| default_model.to_string()),
            vector_dim,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    PostgRest,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub base_url: String,
    pub api_key: Option<String>,
    pub http_timeout_ms: u64,
}

impl StoreConfig {
    const BACKEND_VARS: [&'static str; 1] = ["EXAM_YIELD_STORE"];
    const BASE_URL_VARS: [&'static str; 3] = [
        "EXAM_YIELD_STORE_URL",
        "SUPABASE_URL",
        "NEXT_PUBLIC_SUPABASE_URL",
    ];
    const API_KEY_VARS: [&'static str; 4] = [
        "EXAM_YIELD_STORE_KEY",
        "SUPABASE_KEY",
        "SUPABASE_ANON_KEY",
        "NEXT_PUBLIC_SUPABASE_ANON_KEY",
    ];
    const TIMEOUT_VARS: [&'static str; 1] = ["EXAM_YIELD_STORE_TIMEOUT_MS"];

    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match read_env(&Self::BACKEND_VARS).as_deref() {
            Some("memory") => StoreBackend::Memory,
            Some("postgrest") | Some("supabase") | None => StoreBackend::PostgRest,
            Some(other) => anyhow::bail!("Unknown store backend '{other}'"),
        };

        let base_url = match backend {
            StoreBackend::Memory => read_env(&Self::BASE_URL_VARS).unwrap_or_default(),
            StoreBackend::PostgRest => read_env(&Self::BASE_URL_VARS)
                .context("Set SUPABASE_URL (or EXAM_YIELD_STORE_URL), or EXAM_YIELD_STORE=memory")?,
        };

        let http_timeout_ms = read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10_000);

        Ok(Self {
            backend,
            base_url,
            api_key: read_env(&Self::API_KEY_VARS),
            http_timeout_ms,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub upload_token: Option<String>,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    const BIND_VARS: [&'static str; 1] = ["EXAM_YIELD_BIND"];
    const TOKEN_VARS: [&'static str; 1] = ["EXAM_YIELD_UPLOAD_TOKEN"];
    const MAX_UPLOAD_VARS: [&'static str; 1] = ["EXAM_YIELD_MAX_UPLOAD_BYTES"];

    pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

    pub fn from_env() -> anyhow::Result<Self> {
        let bind = read_env(&Self::BIND_VARS)
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()
            .context("EXAM_YIELD_BIND must be a socket address such as 127.0.0.1:8080")?;

        let max_upload_bytes = read_env(&Self::MAX_UPLOAD_VARS)
            .and_then(|value| value.parse().ok())
            .unwrap_or(Self::DEFAULT_MAX_UPLOAD_BYTES);

        Ok(Self {
            bind,
            upload_token: read_env(&Self::TOKEN_VARS),
            max_upload_bytes,
        })
    }
}
