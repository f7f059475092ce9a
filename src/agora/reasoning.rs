//! Contract between debate agents and whatever produces their words.
//!
//! Every call shape an [`Agent`](crate::Agent) needs is modelled as a plain request struct
//! and a plain response struct, so a backend can be a remote LLM (see
//! [`ChatBackend`](crate::chat_backend::ChatBackend)), a rules engine, or a scripted mock in
//! tests.
//!
//! | call | request | response |
//! |------|---------|----------|
//! | intent | [`IntentRequest`] | [`IntentDecision`] |
//! | respond | [`RespondRequest`] + [`ToolSet`] | [`RespondOutput`] |
//! | critique | [`CritiqueRequest`] | [`CritiqueOutput`] |
//! | vote | [`VoteRequest`] | [`VoteDecision`] |
//! | summarize | [`SummarizeRequest`] | [`SummaryOutput`] |

use crate::agora::tool_protocol::{ToolSet, ToolUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Result alias shared by every backend call.
pub type BackendResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Describes how many more times an agent may speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "remaining")]
pub enum RemainingInterventions {
    Unlimited,
    Limited(usize),
}

impl fmt::Display for RemainingInterventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemainingInterventions::Unlimited => write!(f, "unlimited interventions remaining"),
            RemainingInterventions::Limited(1) => write!(f, "1 intervention remaining"),
            RemainingInterventions::Limited(n) => write!(f, "{} interventions remaining", n),
        }
    }
}

/// Cheap "do you want to speak next?" question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRequest {
    pub agent_name: String,
    pub topic: String,
    /// Short context: only the most recent memory items.
    pub context: String,
    pub persona: String,
    pub last_speaker: String,
    pub last_opinion: String,
    pub remaining: RemainingInterventions,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub wants_to_speak: bool,
    /// Self-reported eagerness in `[0, 1]`.
    pub eagerness: f64,
}

impl IntentDecision {
    pub fn not_interested() -> Self {
        IntentDecision {
            wants_to_speak: false,
            eagerness: 0.0,
        }
    }
}

/// Full "produce your contribution" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RespondRequest {
    pub agent_name: String,
    pub topic: String,
    /// Full memory context.
    pub context: String,
    pub persona: String,
    pub last_speaker: String,
    pub last_opinion: String,
    pub remaining: RemainingInterventions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RespondOutput {
    pub response: String,
    pub tone: Option<String>,
    pub justification: Option<String>,
}

/// Rewrite a draft so it stays faithful to the persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueRequest {
    pub agent_name: String,
    pub topic: String,
    pub persona: String,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueOutput {
    pub corrected: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub agent_name: String,
    pub topic: String,
    pub context: String,
    pub persona: String,
    pub last_opinion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Lenient parse used for free-form backend replies; unknown strings map to `Medium`.
    pub fn parse_lenient(raw: &str) -> Confidence {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Confidence::Low,
            "high" => Confidence::High,
            _ => Confidence::Medium,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteDecision {
    pub agrees: bool,
    pub reasoning: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub agent_name: String,
    pub topic: String,
    pub context: String,
    pub persona: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutput {
    pub summary: String,
}

/// The final content an agent contributed in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub tone: Option<String>,
    pub justification: Option<String>,
    pub tool_usage: Vec<ToolUsage>,
}

/// Produces structured decisions and text for debate agents.
///
/// Implementations must be safe to call concurrently: intent checks for several agents
/// run in parallel against the same backend.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    async fn assess_intent(&self, request: &IntentRequest) -> BackendResult<IntentDecision>;

    /// Generate a contribution. The backend may call any tool in `tools`.
    async fn respond(&self, request: &RespondRequest, tools: &ToolSet)
        -> BackendResult<RespondOutput>;

    async fn critique(&self, request: &CritiqueRequest) -> BackendResult<CritiqueOutput>;

    async fn vote(&self, request: &VoteRequest) -> BackendResult<VoteDecision>;

    async fn summarize(&self, request: &SummarizeRequest) -> BackendResult<SummaryOutput>;
}
