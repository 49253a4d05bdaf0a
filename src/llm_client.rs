use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::instrument;

use crate::config::{LlmConfig, LlmProvider};
use crate::gemini::GeminiClient;

pub type SharedLlmClient = Arc<dyn LlmClient>;

/// A binary document handed to a multimodal model alongside a prompt.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: Option<String>,
}

impl Document {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Media type implied by a file extension, for uploads that do not declare one.
    pub fn guess_mime_type(file_name: &str) -> &'static str {
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "pdf" => "application/pdf",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            "heic" => "image/heic",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;

    async fn complete_with_document(
        &self,
        prompt: &str,
        document: &Document,
    ) -> anyhow::Result<String>;

    /// Whether `complete_with_document` can take this media type.
    fn accepts_document(&self, _mime_type: &str) -> bool {
        true
    }
}

/// OpenAI-compatible client that can point at OpenAI, vLLM, or any HTTP-compatible backend.
///
/// Documents travel as `image_url` data URLs, so only `image/*` media types are
/// accepted; PDFs need the Gemini provider.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAiLlmClient {
    const DEFAULT_SYSTEM_PROMPT: &'static str =
        "You are an academic exam analyst. When asked for JSON, respond with JSON only.";

    pub fn shared_from_config(config: &LlmConfig) -> anyhow::Result<SharedLlmClient> {
        Ok(Arc::new(Self::from_config(config)?))
    }

    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.require_api_key()?);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Ok(Self {
            client: AsyncOpenAiClient::with_config(openai_config),
            model: config.model.clone(),
            system_prompt: Self::DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    #[instrument(level = "debug", skip_all)]
    async fn chat(
        &self,
        content: ChatCompletionRequestUserMessageContent,
    ) -> anyhow::Result<String> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(&self.system_prompt)
            .build()?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.2)
            .messages(vec![system_message.into(), user_message.into()])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .context("LLM response did not contain any choices")?;

        choice
            .message
            .content
            .clone()
            .context("LLM response choice had no content")
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.chat(ChatCompletionRequestUserMessageContent::Text(
            prompt.to_string(),
        ))
        .await
    }

    async fn complete_with_document(
        &self,
        prompt: &str,
        document: &Document,
    ) -> anyhow::Result<String> {
        let text = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(prompt)
            .build()?;
        let image = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(ImageUrlArgs::default().url(document.data_url()).build()?)
            .build()?;

        self.chat(ChatCompletionRequestUserMessageContent::Array(vec![
            text.into(),
            image.into(),
        ]))
        .await
    }

    fn accepts_document(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/")
    }
}

/// Build the configured provider's client.
pub fn build_llm_client(config: &LlmConfig) -> anyhow::Result<SharedLlmClient> {
    match config.provider {
        LlmProvider::Gemini => Ok(Arc::new(GeminiClient::from_llm_config(config)?)),
        LlmProvider::OpenAi => OpenAiLlmClient::shared_from_config(config),
    }
}

type ScriptedReply = Result<String, String>;

struct ScriptedRule {
    needle: String,
    replies: VecDeque<ScriptedReply>,
}

/// Canned responses keyed by a substring of the prompt. The last reply queued
/// for a rule is repeated once the earlier ones are used up.
#[derive(Default)]
pub struct ScriptedLlmClient {
    rules: Mutex<Vec<ScriptedRule>>,
    prompts: Mutex<Vec<String>>,
    images_only: bool,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.push(needle.into(), Ok(reply.into()));
        self
    }

    pub fn fail_on(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.push(needle.into(), Err(message.into()));
        self
    }

    /// Accept only `image/*` documents, like the OpenAI-compatible client.
    pub fn images_only(mut self) -> Self {
        self.images_only = true;
        self
    }

    fn push(&self, needle: String, reply: ScriptedReply) {
        let Ok(mut rules) = self.rules.lock() else {
            return;
        };
        match rules.iter_mut().find(|rule| rule.needle == needle) {
            Some(rule) => rule.replies.push_back(reply),
            None => rules.push(ScriptedRule {
                needle,
                replies: VecDeque::from([reply]),
            }),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }

    pub fn calls_matching(&self, needle: &str) -> usize {
        self.prompts()
            .iter()
            .filter(|prompt| prompt.contains(needle))
            .count()
    }

    fn reply(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("scripted prompts poisoned"))?
            .push(prompt.to_string());

        let mut rules = self
            .rules
            .lock()
            .map_err(|_| anyhow!("scripted rules poisoned"))?;
        let rule = rules
            .iter_mut()
            .find(|rule| prompt.contains(&rule.needle))
            .ok_or_else(|| anyhow!("no scripted reply for prompt"))?;

        let reply = if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        };

        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted rule '{}' has no replies", rule.needle)),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.reply(prompt)
    }

    async fn complete_with_document(
        &self,
        prompt: &str,
        _document: &Document,
    ) -> anyhow::Result<String> {
        self.reply(prompt)
    }

    fn accepts_document(&self, mime_type: &str) -> bool {
        !self.images_only || mime_type.starts_with("image/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_carries_mime_type_and_base64_payload() {
        let doc = Document::new(b"hi".to_vec(), "image/png");
        assert_eq!(doc.data_url(), "data:image/png;base64,aGk=");
    }

    #[test]
    fn mime_type_is_guessed_from_extension() {
        assert_eq!(Document::guess_mime_type("paper.PDF"), "application/pdf");
        assert_eq!(Document::guess_mime_type("scan.jpeg"), "image/jpeg");
        assert_eq!(Document::guess_mime_type("notes"), "application/octet-stream");
    }

    #[tokio::test]
    async fn scripted_client_repeats_last_reply_and_records_prompts() {
        let client = ScriptedLlmClient::new()
            .on("alpha", "first")
            .on("alpha", "second")
            .fail_on("beta", "boom");

        assert_eq!(client.complete("alpha one").await.unwrap(), "first");
        assert_eq!(client.complete("alpha two").await.unwrap(), "second");
        assert_eq!(client.complete("alpha three").await.unwrap(), "second");
        assert!(client.complete("beta").await.is_err());
        assert!(client.complete("gamma").await.is_err());

        assert_eq!(client.calls_matching("alpha"), 3);
        assert_eq!(client.prompts().len(), 5);
    }
}
