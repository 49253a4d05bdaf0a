use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::embed::EmbeddingsProvider;
use crate::llm_client::{Document, LlmClient};

/// Minimal HTTP client for the Generative Language REST surface.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    const DEFAULT_TIMEOUT_MS: u64 = 120_000;

    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: Option<String>,
        http_timeout_ms: u64,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(http_timeout_ms.max(1)))
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn from_llm_config(config: &LlmConfig) -> anyhow::Result<Self> {
        Self::new(
            config.require_api_key()?,
            config.model.clone(),
            config.base_url.clone(),
            config.http_timeout_ms,
        )
    }

    pub fn from_embedding_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("Set GEMINI_API_KEY (or GOOGLE_API_KEY) to use Gemini embeddings")?;
        Self::new(
            api_key,
            config.model.clone(),
            config.base_url.clone(),
            Self::DEFAULT_TIMEOUT_MS,
        )
    }

    fn endpoint(&self, method: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model = self.model.trim_start_matches("models/");
        format!("{base}/v1beta/models/{model}:{method}")
    }

    async fn post<T: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        payload: &T,
    ) -> anyhow::Result<R> {
        let response = self
            .http
            .post(self.endpoint(method))
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("Gemini '{method}' request failed"))?;

        let response = response
            .error_for_status()
            .with_context(|| format!("Gemini '{method}' returned error status"))?;

        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to deserialize Gemini '{method}' response"))
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn generate(&self, parts: Vec<Part>) -> anyhow::Result<String> {
        let request = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig { temperature: 0.2 },
        };

        let response: GenerateContentResponse = self.post("generateContent", &request).await?;
        response.text()
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.generate(vec![Part::text(prompt)]).await
    }

    async fn complete_with_document(
        &self,
        prompt: &str,
        document: &Document,
    ) -> anyhow::Result<String> {
        self.generate(vec![Part::text(prompt), Part::inline(document)])
            .await
    }
}

#[async_trait]
impl EmbeddingsProvider for GeminiClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let model = self.model.trim_start_matches("models/");
        let request = EmbedContentRequest {
            model: format!("models/{model}"),
            content: Content {
                parts: vec![Part::text(text)],
            },
        };

        let response: EmbedContentResponse = self.post("embedContent", &request).await?;
        Ok(response.embedding.values)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline(document: &Document) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: document.mime_type.clone(),
                data: document.to_base64(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

impl GenerateContentResponse {
    fn text(self) -> anyhow::Result<String> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Gemini response did not contain any candidates"))?;

        let text: String = candidate
            .content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();

        if text.is_empty() {
            Err(anyhow!("Gemini candidate had no text parts"))
        } else {
            Ok(text)
        }
    }
}

#[derive(Serialize)]
struct EmbedContentRequest {
    model: String,
    content: Content,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}
