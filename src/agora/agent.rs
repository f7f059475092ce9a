//! Debate participants.
//!
//! An [`Agent`] couples a persona with bounded [`Memory`], an optional intervention budget
//! and a [`ReasoningBackend`]. It exposes the operations the round loop needs:
//!
//! * [`assess_intent`](Agent::assess_intent): cheap "do I want to speak next?" check using
//!   only the most recent memory items. Skips the backend entirely when the agent has no
//!   budget left.
//! * [`respond`](Agent::respond): expensive contribution using the full memory, the
//!   agent's tools and an optional self-critique rewrite.
//! * [`vote`](Agent::vote): final yes/no ballot with reasoning and confidence.
//! * [`remember`](Agent::remember): store another agent's opinion the agent engaged with.
//! * [`compress_memory`](Agent::compress_memory): replace memory with a single summary.
//!
//! Agents are created by [`Simulation::start`](crate::Simulation::start) from the
//! configured [`AgentSpec`](crate::config::AgentSpec)s, but can also be built directly:
//!
//! ```rust,no_run
//! use agora::{Agent, ReasoningBackend};
//! use std::sync::Arc;
//!
//! fn build(backend: Arc<dyn ReasoningBackend>) -> Agent {
//!     Agent::new(0, "Ana", "Urban planner focused on transit", "Car-free downtowns", backend)
//!         .with_max_interventions(Some(3))
//!         .with_memory_size(5)
//! }
//! ```

use crate::agora::config::{DEFAULT_INTENT_CONTEXT_ITEMS, DEFAULT_VOTE_CONTEXT_ITEMS};
use crate::agora::event::{AgentEvent, EventHandler};
use crate::agora::memory::Memory;
use crate::agora::reasoning::{
    AgentResponse, CritiqueRequest, IntentDecision, IntentRequest, ReasoningBackend,
    RemainingInterventions, RespondRequest, SummarizeRequest, VoteDecision, VoteRequest,
};
use crate::agora::tool_protocol::ToolSet;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Errors returned by agent operations.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentError {
    /// The agent was asked to speak after using its whole budget.
    BudgetExhausted { agent: String, cap: usize },
    /// The reasoning backend failed.
    Backend { agent: String, message: String },
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::BudgetExhausted { agent, cap } => {
                write!(f, "Agent {} has used all {} interventions", agent, cap)
            }
            AgentError::Backend { agent, message } => {
                write!(f, "Reasoning backend failed for {}: {}", agent, message)
            }
        }
    }
}

impl Error for AgentError {}

/// Read-only view of an agent, used in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: usize,
    pub name: String,
    pub persona: String,
    pub last_opinion: String,
    pub memory: Vec<String>,
    pub interventions_used: usize,
    pub max_interventions: Option<usize>,
    pub can_speak: bool,
}

pub struct Agent {
    /// Index of the agent inside its simulation.
    pub id: usize,
    pub name: String,
    pub persona: String,
    pub topic: String,
    memory: Memory,
    interventions_used: usize,
    max_interventions: Option<usize>,
    last_opinion: String,
    backend: Arc<dyn ReasoningBackend>,
    tools: ToolSet,
    self_critique: bool,
    intent_context_items: usize,
    vote_context_items: usize,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Agent {
    pub fn new(
        id: usize,
        name: impl Into<String>,
        persona: impl Into<String>,
        topic: impl Into<String>,
        backend: Arc<dyn ReasoningBackend>,
    ) -> Self {
        Agent {
            id,
            name: name.into(),
            persona: persona.into(),
            topic: topic.into(),
            memory: Memory::default(),
            interventions_used: 0,
            max_interventions: None,
            last_opinion: String::new(),
            backend,
            tools: ToolSet::new(),
            self_critique: true,
            intent_context_items: DEFAULT_INTENT_CONTEXT_ITEMS,
            vote_context_items: DEFAULT_VOTE_CONTEXT_ITEMS,
            event_handler: None,
        }
    }

    pub fn with_memory_size(mut self, capacity: usize) -> Self {
        self.memory = Memory::new(capacity);
        self
    }

    pub fn with_max_interventions(mut self, cap: Option<usize>) -> Self {
        self.max_interventions = cap;
        self
    }

    /// Tools are detached from `tools` so usage is tracked per agent.
    pub fn with_tools(mut self, tools: &ToolSet) -> Self {
        self.tools = tools.detached();
        self
    }

    pub fn with_self_critique(mut self, enabled: bool) -> Self {
        self.self_critique = enabled;
        self
    }

    pub fn with_intent_context_items(mut self, items: usize) -> Self {
        self.intent_context_items = items;
        self
    }

    pub fn with_vote_context_items(mut self, items: usize) -> Self {
        self.vote_context_items = items;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn interventions_used(&self) -> usize {
        self.interventions_used
    }

    pub fn max_interventions(&self) -> Option<usize> {
        self.max_interventions
    }

    /// Content of the agent's latest contribution, empty until it speaks.
    pub fn last_opinion(&self) -> &str {
        &self.last_opinion
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// True iff no cap is set or the cap has not been reached.
    pub fn can_speak(&self) -> bool {
        match self.max_interventions {
            Some(cap) => self.interventions_used < cap,
            None => true,
        }
    }

    pub fn remaining(&self) -> RemainingInterventions {
        match self.max_interventions {
            Some(cap) => {
                RemainingInterventions::Limited(cap.saturating_sub(self.interventions_used))
            }
            None => RemainingInterventions::Unlimited,
        }
    }

    /// Owned, `'static` form of an intent check so it can run on a spawned task.
    pub fn intent_probe(&self, last_speaker: &str, last_opinion: &str) -> IntentProbe {
        IntentProbe {
            agent_id: self.id,
            can_speak: self.can_speak(),
            request: IntentRequest {
                agent_name: self.name.clone(),
                topic: self.topic.clone(),
                context: self.memory.render(Some(self.intent_context_items)),
                persona: self.persona.clone(),
                last_speaker: last_speaker.to_string(),
                last_opinion: last_opinion.to_string(),
                remaining: self.remaining(),
            },
            backend: Arc::clone(&self.backend),
            event_handler: self.event_handler.clone(),
        }
    }

    /// Ask whether the agent wants to speak next.
    ///
    /// Returns "not interested" without calling the backend when the agent cannot speak.
    pub async fn assess_intent(
        &self,
        last_speaker: &str,
        last_opinion: &str,
    ) -> Result<IntentDecision, AgentError> {
        self.intent_probe(last_speaker, last_opinion).run().await
    }

    /// Produce this round's contribution.
    ///
    /// On success the final text is pushed to memory, becomes `last_opinion`, and the
    /// intervention counter grows by one. On error nothing changes.
    pub async fn respond(
        &mut self,
        last_speaker: &str,
        last_opinion: &str,
    ) -> Result<AgentResponse, AgentError> {
        if !self.can_speak() {
            return Err(AgentError::BudgetExhausted {
                agent: self.name.clone(),
                cap: self.max_interventions.unwrap_or(0),
            });
        }

        let request = RespondRequest {
            agent_name: self.name.clone(),
            topic: self.topic.clone(),
            context: self.memory.render(None),
            persona: self.persona.clone(),
            last_speaker: last_speaker.to_string(),
            last_opinion: last_opinion.to_string(),
            remaining: self.remaining(),
        };

        let drafted = self.backend.respond(&request, &self.tools).await;
        let tool_usage = self.tools.take_usage().await;
        for usage in &tool_usage {
            self.emit(AgentEvent::ToolInvoked {
                agent_id: self.id,
                agent_name: self.name.clone(),
                tool_name: usage.tool.clone(),
                success: usage.success,
            })
            .await;
        }
        let draft = drafted.map_err(|e| self.backend_error(e))?;

        self.emit(AgentEvent::ResponseDrafted {
            agent_id: self.id,
            agent_name: self.name.clone(),
            response_length: draft.response.len(),
        })
        .await;

        let content = if self.self_critique {
            self.critique(&draft.response).await
        } else {
            draft.response
        };

        self.memory.push(content.clone());
        self.last_opinion = content.clone();
        self.interventions_used += 1;
        debug!(
            "agora::agent: {} spoke ({} of {:?})",
            self.name, self.interventions_used, self.max_interventions
        );

        Ok(AgentResponse {
            content,
            tone: draft.tone,
            justification: draft.justification,
            tool_usage,
        })
    }

    async fn critique(&self, draft: &str) -> String {
        let request = CritiqueRequest {
            agent_name: self.name.clone(),
            topic: self.topic.clone(),
            persona: self.persona.clone(),
            draft: draft.to_string(),
        };
        match self.backend.critique(&request).await {
            Ok(out) if !out.corrected.trim().is_empty() => {
                self.emit(AgentEvent::CritiqueApplied {
                    agent_id: self.id,
                    agent_name: self.name.clone(),
                    changed: out.corrected != draft,
                })
                .await;
                out.corrected
            }
            Ok(_) => {
                self.emit(AgentEvent::CritiqueApplied {
                    agent_id: self.id,
                    agent_name: self.name.clone(),
                    changed: false,
                })
                .await;
                draft.to_string()
            }
            Err(e) => {
                warn!(
                    "agora::agent: critique failed for {}, keeping draft: {}",
                    self.name, e
                );
                self.emit(AgentEvent::CritiqueFailed {
                    agent_id: self.id,
                    agent_name: self.name.clone(),
                    error: e.to_string(),
                })
                .await;
                draft.to_string()
            }
        }
    }

    /// Store an opinion the agent heard and engaged with.
    pub fn remember(&mut self, opinion: &str) {
        if !opinion.trim().is_empty() {
            self.memory.push(opinion);
        }
    }

    /// Cast the final ballot. Does not touch memory or counters.
    pub async fn vote(&self) -> Result<VoteDecision, AgentError> {
        let request = VoteRequest {
            agent_name: self.name.clone(),
            topic: self.topic.clone(),
            context: self.memory.render(Some(self.vote_context_items)),
            persona: self.persona.clone(),
            last_opinion: self.last_opinion.clone(),
        };
        let decision = self
            .backend
            .vote(&request)
            .await
            .map_err(|e| self.backend_error(e))?;

        self.emit(AgentEvent::VoteCast {
            agent_id: self.id,
            agent_name: self.name.clone(),
            agrees: decision.agrees,
            confidence: decision.confidence,
        })
        .await;
        Ok(decision)
    }

    /// Replace memory with one generated summary. Memory is untouched on failure.
    pub async fn compress_memory(&mut self) -> Result<(), AgentError> {
        if self.memory.is_empty() {
            return Ok(());
        }
        let request = SummarizeRequest {
            agent_name: self.name.clone(),
            topic: self.topic.clone(),
            context: self.memory.render(None),
            persona: self.persona.clone(),
        };
        let summary = self
            .backend
            .summarize(&request)
            .await
            .map_err(|e| self.backend_error(e))?
            .summary;
        if summary.trim().is_empty() {
            return Err(AgentError::Backend {
                agent: self.name.clone(),
                message: "empty summary".to_string(),
            });
        }

        let items_before = self.memory.len();
        self.memory.replace_with(summary);
        self.emit(AgentEvent::MemoryCompressed {
            agent_id: self.id,
            agent_name: self.name.clone(),
            items_before,
        })
        .await;
        Ok(())
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            name: self.name.clone(),
            persona: self.persona.clone(),
            last_opinion: self.last_opinion.clone(),
            memory: self.memory.items(),
            interventions_used: self.interventions_used,
            max_interventions: self.max_interventions,
            can_speak: self.can_speak(),
        }
    }

    fn backend_error(&self, e: Box<dyn Error + Send + Sync>) -> AgentError {
        AgentError::Backend {
            agent: self.name.clone(),
            message: e.to_string(),
        }
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("interventions_used", &self.interventions_used)
            .field("max_interventions", &self.max_interventions)
            .field("memory", &self.memory)
            .finish()
    }
}

/// A detached intent check.
///
/// Built by [`Agent::intent_probe`]; owns everything it needs so the round loop can run
/// many probes concurrently on a `JoinSet` while the agents themselves stay put.
pub struct IntentProbe {
    agent_id: usize,
    can_speak: bool,
    request: IntentRequest,
    backend: Arc<dyn ReasoningBackend>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl IntentProbe {
    pub fn agent_id(&self) -> usize {
        self.agent_id
    }

    pub fn agent_name(&self) -> &str {
        &self.request.agent_name
    }

    pub async fn run(self) -> Result<IntentDecision, AgentError> {
        if !self.can_speak {
            return Ok(IntentDecision::not_interested());
        }

        let raw = self
            .backend
            .assess_intent(&self.request)
            .await
            .map_err(|e| AgentError::Backend {
                agent: self.request.agent_name.clone(),
                message: e.to_string(),
            })?;

        let eagerness = if raw.eagerness.is_nan() {
            0.0
        } else {
            raw.eagerness.clamp(0.0, 1.0)
        };
        let decision = IntentDecision {
            wants_to_speak: raw.wants_to_speak,
            eagerness,
        };

        if let Some(handler) = &self.event_handler {
            handler
                .on_agent_event(&AgentEvent::IntentAssessed {
                    agent_id: self.agent_id,
                    agent_name: self.request.agent_name.clone(),
                    wants_to_speak: decision.wants_to_speak,
                    eagerness: decision.eagerness,
                })
                .await;
        }
        Ok(decision)
    }
}
