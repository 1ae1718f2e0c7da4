// src/pipeline/llm.rs
//! Chat-completions provider abstraction. The HTTP provider talks to any
//! OpenAI-compatible endpoint; the mock provider drives tests and local
//! runs without keys or network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::RewriteError;

const TEMPERATURE: f32 = 0.2;

/// Rough token estimate used when the provider omits usage accounting:
/// four characters per token.
pub fn approx_tokens(s: &str) -> u64 {
    (s.chars().count() as u64 + 3) / 4
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One chat call: system prompt + user payload. Implementations carry
    /// their own hard deadline.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<ChatOutcome, RewriteError>;

    fn model_id(&self) -> &str;
}

// ---- HTTP provider ----

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

pub struct HttpChatProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl HttpChatProvider {
    pub fn new(cfg: &LlmConfig, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("wirebrief/0.3 (+https://github.com/wirebrief/wirebrief)")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: cfg.model.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<ChatOutcome, RewriteError> {
        if self.api_key.is_empty() {
            return Err(RewriteError::LlmUnavailable("missing api key".into()));
        }
        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens,
        };

        debug!(model = %self.model, max_tokens, "chat completion request");
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| RewriteError::LlmUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(RewriteError::LlmUnavailable(format!(
                "status {status}: {preview}"
            )));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RewriteError::LlmUnavailable(format!("bad response body: {e}")))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(RewriteError::LlmUnavailable("empty completion".into()));
        }

        let usage = body.usage.unwrap_or(Usage {
            prompt_tokens: None,
            completion_tokens: None,
        });
        Ok(ChatOutcome {
            input_tokens: usage
                .prompt_tokens
                .unwrap_or_else(|| approx_tokens(system) + approx_tokens(user)),
            output_tokens: usage
                .completion_tokens
                .unwrap_or_else(|| approx_tokens(&content)),
            content,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ---- Mock provider ----

/// Scripted provider for tests and keyless local runs. Responses are
/// consumed in order; an exhausted script reports the LLM as unavailable,
/// which exercises the fallback path.
pub struct MockChatProvider {
    script: Mutex<VecDeque<String>>,
    repeat_last: bool,
    model: String,
}

impl MockChatProvider {
    pub fn scripted(responses: Vec<String>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            repeat_last: false,
            model: "mock".to_string(),
        }
    }

    /// Always answer with the same completion.
    pub fn fixed(response: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::from([response.to_string()])),
            repeat_last: true,
            model: "mock".to_string(),
        }
    }

    /// Never answers; every call reports the provider unavailable.
    pub fn unavailable() -> Self {
        Self::scripted(Vec::new())
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        _max_tokens: u32,
    ) -> Result<ChatOutcome, RewriteError> {
        let mut script = self.script.lock().expect("mock script poisoned");
        let content = if self.repeat_last {
            script.front().cloned()
        } else {
            script.pop_front()
        };
        match content {
            Some(content) => Ok(ChatOutcome {
                input_tokens: approx_tokens(system) + approx_tokens(user),
                output_tokens: approx_tokens(&content),
                content,
            }),
            None => Err(RewriteError::LlmUnavailable("mock script exhausted".into())),
        }
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
