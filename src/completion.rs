//! Upstream chat-completion collaborator used by the bot.

use anyhow::anyhow;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// What the bot says when the upstream cannot answer.
pub const FALLBACK_REPLY: &str = "API is down";

#[async_trait]
pub trait Completion: Send + Sync {
    /// Never fails; upstream trouble comes back as [`FALLBACK_REPLY`].
    async fn complete(&self, prompt: &str) -> String;
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> anyhow::Result<String>;
    fn get_obj_field(&self, field: &str) -> anyhow::Result<&Value>;
}

impl GetField for Value {
    fn get_str_field(&self, field: &str) -> anyhow::Result<String> {
        Ok(self
            .get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))?
            .as_str()
            .ok_or_else(|| anyhow!("expected {field} in {self} to be string"))?
            .to_owned())
    }

    fn get_obj_field(&self, field: &str) -> anyhow::Result<&Value> {
        self.get(field)
            .ok_or_else(|| anyhow!("expected {field} in {self}"))
    }
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

pub struct OpenRouterClient {
    http: reqwest::Client,
    config: CompletionConfig,
}

impl OpenRouterClient {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn request(&self, prompt: &str) -> anyhow::Result<String> {
        let mut request = self.http.post(&self.config.api_url).json(&ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let body: Value = request.send().await?.json().await?;
        body.get_obj_field("choices")?
            .get(0)
            .ok_or_else(|| anyhow!("no choices in {body}"))?
            .get_obj_field("message")?
            .get_str_field("content")
    }
}

#[async_trait]
impl Completion for OpenRouterClient {
    async fn complete(&self, prompt: &str) -> String {
        match self.request(prompt).await {
            Ok(reply) => {
                debug!(model = %self.config.model, "completion received");
                reply
            }
            Err(e) => {
                warn!(model = %self.config.model, "completion failed: {e:#}");
                FALLBACK_REPLY.to_owned()
            }
        }
    }
}
