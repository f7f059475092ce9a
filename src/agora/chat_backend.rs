//! [`ReasoningBackend`] implemented over any chat-completion [`ClientWrapper`].
//!
//! Every call builds a short conversation (a system message carrying persona and topic,
//! a user message carrying the call-specific fields) and asks the model to answer with a
//! small JSON object. Replies are scanned with brace counting, so models that wrap the
//! JSON in prose or code fences still parse.
//!
//! # Tool calls
//!
//! While responding, the model may ask for a tool instead of answering:
//!
//! ```json
//! {"tool_call": {"name": "web_search", "query": "congestion pricing results Stockholm"}}
//! ```
//!
//! The tool runs through the agent's [`ToolSet`], its output is appended to the
//! conversation and the model is asked again, at most
//! [`DEFAULT_MAX_TOOL_ITERATIONS`] times per response.
//!
//! # Example
//!
//! ```rust,no_run
//! use agora::chat_backend::ChatBackend;
//! use agora::clients::openai_compatible::OpenAICompatibleClient;
//! use agora::ReasoningBackend;
//! use std::sync::Arc;
//!
//! let key = std::env::var("OPENROUTER_API_KEY").unwrap_or_default();
//! let backend: Arc<dyn ReasoningBackend> = Arc::new(ChatBackend::new(Arc::new(
//!     OpenAICompatibleClient::new(&key, "openai/gpt-4o-mini"),
//! )));
//! ```

use crate::agora::client_wrapper::{ClientWrapper, Message};
use crate::agora::reasoning::{
    BackendResult, Confidence, CritiqueOutput, CritiqueRequest, IntentDecision, IntentRequest,
    ReasoningBackend, RespondOutput, RespondRequest, SummarizeRequest, SummaryOutput,
    VoteDecision, VoteRequest,
};
use crate::agora::tool_protocol::ToolSet;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatBackendError {
    /// The model's reply did not contain the expected JSON fields.
    MalformedReply(String),
    /// The underlying client failed.
    Client(String),
}

impl fmt::Display for ChatBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatBackendError::MalformedReply(msg) => write!(f, "Malformed model reply: {}", msg),
            ChatBackendError::Client(msg) => write!(f, "Chat client error: {}", msg),
        }
    }
}

impl Error for ChatBackendError {}

/// A tool request found in a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub query: String,
    /// Byte range of the JSON fragment inside the reply.
    pub span: (usize, usize),
}

pub struct ChatBackend {
    client: Arc<dyn ClientWrapper>,
    max_tool_iterations: usize,
}

impl ChatBackend {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        ChatBackend {
            client,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn with_max_tool_iterations(mut self, iterations: usize) -> Self {
        self.max_tool_iterations = iterations;
        self
    }

    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    async fn send(&self, messages: &[Message]) -> BackendResult<String> {
        let reply = self
            .client
            .send_message(messages)
            .await
            .map_err(|e| ChatBackendError::Client(e.to_string()))?;
        if let Some(usage) = self.client.get_last_usage().await {
            debug!(
                "agora::chat_backend: {} used {} tokens",
                self.client.model_name(),
                usage.total_tokens
            );
        }
        Ok(reply.content)
    }
}

fn persona_prompt(agent_name: &str, persona: &str, topic: &str) -> String {
    format!(
        "You are {}, taking part in a structured debate.\nYour background: {}\nDebate topic: {}\nStay in character and answer only in the JSON format you are asked for.",
        agent_name, persona, topic
    )
}

fn or_placeholder(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none yet)"
    } else {
        text
    }
}

/// Find the first JSON object in `text` that has `key` at its top level.
///
/// Braces inside JSON strings are ignored while counting.
pub fn extract_json_object(text: &str, key: &str) -> Option<(Value, usize, usize)> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(text, start) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..end]) {
                if value.get(key).is_some() {
                    return Some((value, start, end));
                }
            }
        }
        search_from = start + 1;
    }
    None
}

/// Byte index just past the brace that closes the one at `start`.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse `{"tool_call": {"name": ..., "query": ...}}` out of a reply.
pub fn parse_tool_call(reply: &str) -> Option<ToolCall> {
    let (value, start, end) = extract_json_object(reply, "tool_call")?;
    let call = value.get("tool_call")?;
    let name = call.get("name")?.as_str()?.to_string();
    let query = match call.get("query") {
        Some(Value::String(q)) => q.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Some(ToolCall {
        name,
        query,
        span: (start, end),
    })
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "yea" => Some(true),
            "false" | "no" | "nay" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn optional_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn malformed(what: &str, reply: &str) -> Box<dyn Error + Send + Sync> {
    let preview: String = reply.chars().take(160).collect();
    Box::new(ChatBackendError::MalformedReply(format!(
        "{} in '{}'",
        what, preview
    )))
}

/// Interpret the final (non tool-call) reply of a respond conversation.
///
/// An empty contribution is an error.
fn parse_respond(reply: &str) -> BackendResult<RespondOutput> {
    match extract_json_object(reply, "response") {
        Some((value, _, _)) => Ok(RespondOutput {
            response: optional_string(&value, "response")
                .ok_or_else(|| malformed("response is empty", reply))?,
            tone: optional_string(&value, "tone"),
            justification: optional_string(&value, "justification"),
        }),
        None if reply.trim().is_empty() => Err(malformed("empty reply", reply)),
        None => Ok(RespondOutput {
            response: reply.trim().to_string(),
            tone: None,
            justification: None,
        }),
    }
}

#[async_trait]
impl ReasoningBackend for ChatBackend {
    async fn assess_intent(&self, request: &IntentRequest) -> BackendResult<IntentDecision> {
        let messages = [
            Message::system(persona_prompt(
                &request.agent_name,
                &request.persona,
                &request.topic,
            )),
            Message::user(format!(
                "What you remember recently:\n{}\n\n{} just said:\n{}\n\nYou have {}.\nDo you want to speak next? Reply with JSON: {{\"raise_hand\": true|false, \"desire_to_speak\": <number between 0 and 1>}}",
                or_placeholder(&request.context),
                or_placeholder(&request.last_speaker),
                or_placeholder(&request.last_opinion),
                request.remaining
            )),
        ];
        let reply = self.send(&messages).await?;
        let (value, _, _) = extract_json_object(&reply, "raise_hand")
            .ok_or_else(|| malformed("missing raise_hand", &reply))?;
        let wants_to_speak = value
            .get("raise_hand")
            .and_then(as_bool)
            .ok_or_else(|| malformed("raise_hand is not a boolean", &reply))?;
        let eagerness = value
            .get("desire_to_speak")
            .and_then(as_f64)
            .unwrap_or(if wants_to_speak { 0.5 } else { 0.0 });
        Ok(IntentDecision {
            wants_to_speak,
            eagerness,
        })
    }

    async fn respond(
        &self,
        request: &RespondRequest,
        tools: &ToolSet,
    ) -> BackendResult<RespondOutput> {
        let mut system = persona_prompt(&request.agent_name, &request.persona, &request.topic);
        if !tools.is_empty() {
            system.push_str("\n\nYou may consult these tools before answering:\n");
            for tool in tools.descriptors() {
                system.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            }
            system.push_str(
                "To use one, reply with only {\"tool_call\": {\"name\": \"<tool>\", \"query\": \"<query>\"}} and wait for the result.",
            );
        }

        let mut messages = vec![
            Message::system(system),
            Message::user(format!(
                "What you remember:\n{}\n\nLast speaker: {}\nWhat they said:\n{}\n\nYou have {}.\nGive your contribution to the debate. Reply with JSON: {{\"response\": \"...\", \"tone\": \"...\", \"justification\": \"...\"}}",
                or_placeholder(&request.context),
                or_placeholder(&request.last_speaker),
                or_placeholder(&request.last_opinion),
                request.remaining
            )),
        ];

        let mut tool_iterations = 0;
        loop {
            let reply = self.send(&messages).await?;
            let call = match parse_tool_call(&reply) {
                Some(call) => call,
                None => return parse_respond(&reply),
            };

            if tool_iterations >= self.max_tool_iterations {
                warn!(
                    "agora::chat_backend: {} hit the tool iteration limit ({})",
                    request.agent_name, self.max_tool_iterations
                );
                let mut remainder = reply.clone();
                remainder.replace_range(call.span.0..call.span.1, "");
                if remainder.trim().is_empty() {
                    return Err(malformed("tool iteration limit reached without an answer", &reply));
                }
                return parse_respond(&remainder);
            }
            tool_iterations += 1;

            let outcome = match tools.invoke(&call.name, &call.query).await {
                Ok(output) => format!("Tool '{}' returned:\n{}", call.name, output),
                Err(e) => format!("Tool '{}' failed: {}", call.name, e),
            };
            messages.push(Message::assistant(reply));
            messages.push(Message::user(outcome));
        }
    }

    async fn critique(&self, request: &CritiqueRequest) -> BackendResult<CritiqueOutput> {
        let messages = [
            Message::system(persona_prompt(
                &request.agent_name,
                &request.persona,
                &request.topic,
            )),
            Message::user(format!(
                "Here is a draft of your next contribution:\n{}\n\nRewrite it so it sounds like you and stays consistent with your background. Keep the argument. Reply with JSON: {{\"corrected\": \"...\"}}",
                request.draft
            )),
        ];
        let reply = self.send(&messages).await?;
        let corrected = match extract_json_object(&reply, "corrected") {
            Some((value, _, _)) => optional_string(&value, "corrected")
                .ok_or_else(|| malformed("corrected is empty", &reply))?,
            None => reply.trim().to_string(),
        };
        Ok(CritiqueOutput { corrected })
    }

    async fn vote(&self, request: &VoteRequest) -> BackendResult<VoteDecision> {
        let messages = [
            Message::system(persona_prompt(
                &request.agent_name,
                &request.persona,
                &request.topic,
            )),
            Message::user(format!(
                "The debate is over.\nWhat you remember:\n{}\n\nYour last opinion:\n{}\n\nDo you agree with the proposition? Reply with JSON: {{\"vote\": true|false, \"reasoning\": \"...\", \"confidence\": \"low\"|\"medium\"|\"high\"}}",
                or_placeholder(&request.context),
                or_placeholder(&request.last_opinion)
            )),
        ];
        let reply = self.send(&messages).await?;
        let (value, _, _) = extract_json_object(&reply, "vote")
            .ok_or_else(|| malformed("missing vote", &reply))?;
        let agrees = value
            .get("vote")
            .and_then(as_bool)
            .ok_or_else(|| malformed("vote is not a boolean", &reply))?;
        Ok(VoteDecision {
            agrees,
            reasoning: optional_string(&value, "reasoning").unwrap_or_default(),
            confidence: value
                .get("confidence")
                .and_then(Value::as_str)
                .map(Confidence::parse_lenient)
                .unwrap_or(Confidence::Medium),
        })
    }

    async fn summarize(&self, request: &SummarizeRequest) -> BackendResult<SummaryOutput> {
        let messages = [
            Message::system(persona_prompt(
                &request.agent_name,
                &request.persona,
                &request.topic,
            )),
            Message::user(format!(
                "Summarize what you remember of the debate so far in a few sentences, from your point of view:\n{}\n\nReply with JSON: {{\"summary\": \"...\"}}",
                request.context
            )),
        ];
        let reply = self.send(&messages).await?;
        let summary = match extract_json_object(&reply, "summary") {
            Some((value, _, _)) => optional_string(&value, "summary").unwrap_or_default(),
            None => reply.trim().to_string(),
        };
        Ok(SummaryOutput { summary })
    }
}
