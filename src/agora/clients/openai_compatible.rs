//! Client for any service exposing the OpenAI `/chat/completions` API.
//!
//! Defaults to OpenRouter, which routes one API key to many model vendors; point it at
//! another base URL (OpenAI, a local llama.cpp / vLLM server, ...) with
//! [`OpenAICompatibleClient::new_with_base_url`].
//!
//! ```rust,no_run
//! use agora::clients::openai_compatible::OpenAICompatibleClient;
//! use agora::client_wrapper::{ClientWrapper, Message};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let key = std::env::var("OPENROUTER_API_KEY")?;
//!     let client = OpenAICompatibleClient::new(&key, "openai/gpt-4o-mini")
//!         .with_timeout(Duration::from_secs(60));
//!
//!     let reply = client
//!         .send_message(&[Message::user("Say hi in five words.")])
//!         .await?;
//!     println!("{}", reply.content);
//!     println!("{:?}", client.get_last_usage().await);
//!     Ok(())
//! }
//! ```

use crate::agora::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use async_trait::async_trait;
use log::error;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

pub struct OpenAICompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    pub model: String,
    temperature: Option<f32>,
    timeout: Option<Duration>,
    token_usage: Mutex<Option<TokenUsage>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

impl OpenAICompatibleClient {
    /// Client for OpenRouter.
    pub fn new(api_key: &str, model_name: &str) -> Self {
        Self::new_with_base_url(api_key, model_name, OPENROUTER_BASE_URL)
    }

    /// This function is used to create a client with a custom base URL, e.g.
    /// `"https://api.openai.com/v1"` or `"http://localhost:8080/v1"`.
    pub fn new_with_base_url(api_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAICompatibleClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model_name.to_string(),
            temperature: None,
            timeout: None,
            token_usage: Mutex::new(None),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Deadline applied to every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ClientWrapper for OpenAICompatibleClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let body = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: self.temperature,
        };

        let mut request = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            error!("OpenAICompatibleClient::send_message request error: {}", e);
            e
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(
                "OpenAICompatibleClient::send_message {} returned {}: {}",
                self.endpoint(),
                status,
                text
            );
            return Err(format!("chat completion failed with status {}: {}", status, text).into());
        }

        let parsed: ChatResponse = response.json().await?;
        if let Some(usage) = parsed.usage {
            *self.token_usage.lock().await = Some(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or("chat completion returned no choices")?;
        Ok(Message {
            role: Role::Assistant,
            content: choice.message.content,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
