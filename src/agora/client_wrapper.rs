//! A ClientWrapper is a wrapper around a specific chat-completion service.
//! It provides a common interface to send a conversation and get the next message back.
//! It does not keep track of the conversation; [`ChatBackend`](crate::chat_backend::ChatBackend)
//! builds a fresh one for every reasoning call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use tokio::sync::Mutex;

/// Represents the possible roles for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    // set by the developer to steer the model's responses
    System,
    User,
    // lets the model know the content was generated as a response to a user message
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Trait defining the interface to interact with chat-completion services.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the conversation and get the assistant's reply.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Model identifier sent with each request.
    fn model_name(&self) -> &str;

    /// Usage reported by the *last* `send_message()` call.
    /// Default impl reads `usage_slot()`, so wrappers without tracking return None.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        match self.usage_slot() {
            Some(slot) => *slot.lock().await,
            None => None,
        }
    }

    /// Wrappers that track usage return their slot here.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
