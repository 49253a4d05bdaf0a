use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_openai::{
    config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAiClient,
};
use async_trait::async_trait;
use tracing::instrument;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::gemini::GeminiClient;

pub type SharedEmbeddingsProvider = Arc<dyn EmbeddingsProvider>;

#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Embeddings keyed by blake3 digest of the input text. Cleared wholesale
/// once full.
struct EmbeddingCache {
    entries: Mutex<HashMap<blake3::Hash, Vec<f32>>>,
    capacity: usize,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn get(&self, key: &blake3::Hash) -> anyhow::Result<Option<Vec<f32>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("embedding cache poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: blake3::Hash, embedding: Vec<f32>) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("embedding cache poisoned"))?;
        if entries.len() >= self.capacity {
            entries.clear();
        }
        entries.insert(key, embedding);
        Ok(())
    }
}

/// OpenAI-compatible `/embeddings` client. Re-uploads of the same paper hit
/// the cache instead of the API.
pub struct OpenAiEmbeddingsClient {
    client: OpenAiClient<OpenAIConfig>,
    model: String,
    cache: EmbeddingCache,
}

impl OpenAiEmbeddingsClient {
    const CACHE_CAPACITY: usize = 512;

    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("Set OPENAI_API_KEY to use OpenAI embeddings")?;
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Ok(Self {
            client: OpenAiClient::with_config(openai_config),
            model: config.model.clone(),
            cache: EmbeddingCache::new(Self::CACHE_CAPACITY),
        })
    }
}

#[async_trait]
impl EmbeddingsProvider for OpenAiEmbeddingsClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let key = blake3::hash(text.as_bytes());
        if let Some(hit) = self.cache.get(&key)? {
            return Ok(hit);
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(text)
            .build()
            .context("Failed to build embeddings request")?;

        let embedding = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("Embeddings request failed")?
            .data
            .into_iter()
            .next()
            .context("Embedding response missing data")?
            .embedding;

        self.cache.put(key, embedding.clone())?;
        Ok(embedding)
    }
}

/// Unit-length vectors derived from a blake3 XOF of the text. Same text, same vector.
#[derive(Debug, Clone)]
pub struct HashEmbeddingsProvider {
    dim: usize,
}

impl HashEmbeddingsProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

#[async_trait]
impl EmbeddingsProvider for HashEmbeddingsProvider {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut bytes = vec![0u8; self.dim * 2];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);

        let mut vector: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|pair| {
                let raw = u16::from_le_bytes([pair[0], pair[1]]) as f32;
                raw / u16::MAX as f32 * 2.0 - 1.0
            })
            .collect();

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }

        Ok(vector)
    }
}

pub fn build_embeddings_provider(
    config: &EmbeddingConfig,
) -> anyhow::Result<SharedEmbeddingsProvider> {
    match config.provider {
        EmbeddingProvider::Gemini => Ok(Arc::new(GeminiClient::from_embedding_config(config)?)),
        EmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiEmbeddingsClient::from_config(config)?)),
        EmbeddingProvider::Hash => Ok(Arc::new(HashEmbeddingsProvider::new(config.vector_dim))),
    }
}
