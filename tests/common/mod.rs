#![allow(dead_code)]

use agora::event::{AgentEvent, EventHandler, SimulationEvent};
use agora::reasoning::*;
use agora::similarity::{OracleResult, SimilarityOracle};
use agora::tool_protocol::{FunctionTool, ToolSet};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a scripted agent answers when asked whether it wants to speak.
#[derive(Clone, Copy, Debug)]
pub enum Intent {
    Raise(f64),
    Decline,
    Fail,
    Panic,
}

/// Scripted reasoning backend keyed by agent name.
pub struct MockBackend {
    default_intent: Intent,
    intents: HashMap<String, Intent>,
    votes: HashMap<String, bool>,
    failing_responders: HashSet<String>,
    failing_voters: HashSet<String>,
    critique_prefix: Option<String>,
    critique_fails: bool,
    summarize_fails: bool,
    tool_call: Option<(String, String)>,
    respond_count: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
    pub intent_requests: Mutex<Vec<IntentRequest>>,
    pub respond_requests: Mutex<Vec<RespondRequest>>,
    pub vote_requests: Mutex<Vec<VoteRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            default_intent: Intent::Raise(0.8),
            intents: HashMap::new(),
            votes: HashMap::new(),
            failing_responders: HashSet::new(),
            failing_voters: HashSet::new(),
            critique_prefix: None,
            critique_fails: false,
            summarize_fails: false,
            tool_call: None,
            respond_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            intent_requests: Mutex::new(Vec::new()),
            respond_requests: Mutex::new(Vec::new()),
            vote_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default_intent(mut self, intent: Intent) -> Self {
        self.default_intent = intent;
        self
    }

    pub fn with_intent(mut self, agent: &str, intent: Intent) -> Self {
        self.intents.insert(agent.to_string(), intent);
        self
    }

    pub fn with_vote(mut self, agent: &str, agrees: bool) -> Self {
        self.votes.insert(agent.to_string(), agrees);
        self
    }

    pub fn with_failing_responder(mut self, agent: &str) -> Self {
        self.failing_responders.insert(agent.to_string());
        self
    }

    pub fn with_failing_voter(mut self, agent: &str) -> Self {
        self.failing_voters.insert(agent.to_string());
        self
    }

    pub fn with_critique_prefix(mut self, prefix: &str) -> Self {
        self.critique_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_failing_critique(mut self) -> Self {
        self.critique_fails = true;
        self
    }

    pub fn with_failing_summaries(mut self) -> Self {
        self.summarize_fails = true;
        self
    }

    /// Every respond call first invokes this tool with this query.
    pub fn with_tool_call(mut self, tool: &str, query: &str) -> Self {
        self.tool_call = Some((tool.to_string(), query.to_string()));
        self
    }

    pub async fn calls_of(&self, kind: &str) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.starts_with(kind))
            .cloned()
            .collect()
    }

    async fn record(&self, kind: &str, agent: &str) {
        self.calls.lock().await.push(format!("{}:{}", kind, agent));
    }
}

#[async_trait]
impl ReasoningBackend for MockBackend {
    async fn assess_intent(&self, request: &IntentRequest) -> BackendResult<IntentDecision> {
        self.record("intent", &request.agent_name).await;
        self.intent_requests.lock().await.push(request.clone());
        let intent = self
            .intents
            .get(&request.agent_name)
            .copied()
            .unwrap_or(self.default_intent);
        match intent {
            Intent::Raise(eagerness) => Ok(IntentDecision {
                wants_to_speak: true,
                eagerness,
            }),
            Intent::Decline => Ok(IntentDecision {
                wants_to_speak: false,
                eagerness: 0.0,
            }),
            Intent::Fail => {
                Err(format!("{} intent backend unavailable", request.agent_name).into())
            }
            Intent::Panic => panic!("{} intent backend crashed", request.agent_name),
        }
    }

    async fn respond(
        &self,
        request: &RespondRequest,
        tools: &ToolSet,
    ) -> BackendResult<RespondOutput> {
        self.record("respond", &request.agent_name).await;
        self.respond_requests.lock().await.push(request.clone());
        if self.failing_responders.contains(&request.agent_name) {
            return Err("respond backend unavailable".into());
        }
        let mut response = format!(
            "{} makes point #{}",
            request.agent_name,
            self.respond_count.fetch_add(1, Ordering::SeqCst) + 1
        );
        if let Some((tool, query)) = &self.tool_call {
            if let Ok(found) = tools.invoke(tool, query).await {
                response.push_str(&format!(" citing {}", found));
            }
        }
        Ok(RespondOutput {
            response,
            tone: Some("measured".to_string()),
            justification: Some("scripted".to_string()),
        })
    }

    async fn critique(&self, request: &CritiqueRequest) -> BackendResult<CritiqueOutput> {
        self.record("critique", &request.agent_name).await;
        if self.critique_fails {
            return Err("critique backend unavailable".into());
        }
        let corrected = match &self.critique_prefix {
            Some(prefix) => format!("{}{}", prefix, request.draft),
            None => request.draft.clone(),
        };
        Ok(CritiqueOutput { corrected })
    }

    async fn vote(&self, request: &VoteRequest) -> BackendResult<VoteDecision> {
        self.record("vote", &request.agent_name).await;
        self.vote_requests.lock().await.push(request.clone());
        if self.failing_voters.contains(&request.agent_name) {
            return Err("vote backend unavailable".into());
        }
        Ok(VoteDecision {
            agrees: self.votes.get(&request.agent_name).copied().unwrap_or(true),
            reasoning: format!("{} has reasons", request.agent_name),
            confidence: Confidence::High,
        })
    }

    async fn summarize(&self, request: &SummarizeRequest) -> BackendResult<SummaryOutput> {
        self.record("summarize", &request.agent_name).await;
        if self.summarize_fails {
            return Err("summarize backend unavailable".into());
        }
        Ok(SummaryOutput {
            summary: format!("summary by {}", request.agent_name),
        })
    }
}

/// Oracle whose similarity is a fixed number.
pub struct ConstantOracle {
    score: f32,
    pub embeds: AtomicUsize,
}

impl ConstantOracle {
    pub fn new(score: f32) -> Self {
        ConstantOracle {
            score,
            embeds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SimilarityOracle for ConstantOracle {
    async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
        self.embeds.fetch_add(1, Ordering::SeqCst);
        Ok(vec![text.len() as f32, 1.0])
    }

    fn similarity(&self, _a: &[f32], _b: &[f32]) -> f32 {
        self.score
    }
}

/// Oracle that always errors.
pub struct FailingOracle;

#[async_trait]
impl SimilarityOracle for FailingOracle {
    async fn embed(&self, _text: &str) -> OracleResult<Vec<f32>> {
        Err("embedding service down".into())
    }
}

/// Records every event it receives.
#[derive(Default)]
pub struct RecordingHandler {
    pub agent_events: Mutex<Vec<AgentEvent>>,
    pub simulation_events: Mutex<Vec<SimulationEvent>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        self.agent_events.lock().await.push(event.clone());
    }

    async fn on_simulation_event(&self, event: &SimulationEvent) {
        self.simulation_events.lock().await.push(event.clone());
    }
}

pub fn lookup_tools() -> ToolSet {
    ToolSet::new().with_tool(Arc::new(FunctionTool::new(
        "lookup",
        "Returns a canned fact",
        Arc::new(|query: &str| Ok(format!("fact about {}", query))),
    )))
}
