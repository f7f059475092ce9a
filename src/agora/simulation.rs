//! The debate round loop.
//!
//! A [`Simulation`] exclusively owns its [`Agent`]s and its [`Moderator`]. Each call to
//! [`step`](Simulation::step) runs exactly one round:
//!
//! ```text
//! speaker.respond()                       (sequential, hard failure)
//!   └─ record speaker + content
//! eligible = others that can still speak
//!   ├─ empty and a global cap is set → "budget exhausted"
//!   └─ else intent fan-out on a JoinSet   (parallel, soft failures)
//!        └─ hand raises registered in agent-id order;
//!           each engaged agent remembers the speaker's content
//! moderator.recompute_weights(); next = moderator.select_next_speaker()
//! stop precedence: budget exhausted → no one wants to continue
//!                  → opinions converged → iteration budget reached
//! every N completed rounds: compress every agent's memory
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use agora::{Simulation, SimulationConfig, ReasoningBackend, SimilarityOracle};
//! use std::sync::Arc;
//!
//! async fn debate(
//!     backend: Arc<dyn ReasoningBackend>,
//!     oracle: Arc<dyn SimilarityOracle>,
//! ) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SimulationConfig::new("Should homework be abolished?")
//!         .with_agent("Mr. Okafor", "Veteran high-school chemistry instructor")
//!         .with_agent("Student", "Overworked senior student")
//!         .with_agent("Parent", "Parent of two primary-school kids")
//!         .with_max_iters(9);
//!
//!     let mut simulation = Simulation::new(config, backend, oracle);
//!     simulation.run().await?;
//!     println!("stopped: {:?}", simulation.stop_reason());
//!
//!     let tally = simulation.vote().await?;
//!     println!("{} yea / {} nay", tally.yea, tally.nay);
//!     Ok(())
//! }
//! ```

use crate::agora::agent::{Agent, AgentError, AgentSnapshot};
use crate::agora::config::{ConfigError, SimulationConfig};
use crate::agora::event::{EventHandler, SimulationEvent};
use crate::agora::moderator::{Moderator, ModeratorSnapshot};
use crate::agora::reasoning::{Confidence, IntentDecision, ReasoningBackend};
use crate::agora::similarity::SimilarityOracle;
use crate::agora::tool_protocol::{ToolSet, ToolUsage};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    NotStarted,
    Running,
    Finished,
}

/// Why a simulation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A [`StopHandle`] asked the simulation to stop.
    UserRequested,
    /// A global intervention cap left nobody eligible to speak.
    BudgetExhausted,
    /// Nobody raised a hand.
    NoOneWantsToContinue,
    /// The agents' latest opinions became too similar.
    OpinionsConverged,
    /// `max_iters` rounds completed.
    IterationBudgetReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::UserRequested => "user requested",
            StopReason::BudgetExhausted => "budget exhausted",
            StopReason::NoOneWantsToContinue => "no one wants to continue",
            StopReason::OpinionsConverged => "opinions converged",
            StopReason::IterationBudgetReached => "iteration budget reached",
        };
        write!(f, "{}", text)
    }
}

/// Outcome of one [`Simulation::step`] call.
///
/// `speaker` and `content` are `None` when the call did no round work (the simulation
/// was already finished or a stop was requested).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    /// Number of completed rounds after this call.
    pub iteration: usize,
    pub speaker: Option<String>,
    pub content: Option<String>,
    pub tone: Option<String>,
    pub justification: Option<String>,
    /// Agents that raised a hand, in agent-id order.
    pub engaged: Vec<String>,
    pub finished: bool,
    pub stop_reason: Option<StopReason>,
    pub tool_usage: Vec<ToolUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub agent: String,
    pub agrees: bool,
    pub reasoning: String,
    pub confidence: Confidence,
}

/// Result of [`Simulation::vote`]. `yea + nay` always equals the number of agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub yea: usize,
    pub nay: usize,
    /// `"{name}: {reasoning} (confidence: {level})"`, in agent-id order.
    pub reasons: Vec<String>,
    pub ballots: Vec<Ballot>,
}

/// Serializable read-only projection of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub id: Uuid,
    pub topic: String,
    pub max_iters: usize,
    pub max_interventions_per_agent: Option<usize>,
    pub status: SimulationStatus,
    pub iteration_count: usize,
    pub stop_reason: Option<StopReason>,
    pub active_speaker: Option<String>,
    pub agents: Vec<AgentSnapshot>,
    pub speaker_history: Vec<String>,
    pub content_history: Vec<String>,
    pub engagement_history: Vec<Vec<String>>,
    pub moderator: Option<ModeratorSnapshot>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Cooperative cancellation for a running simulation.
///
/// The flag is checked once at the top of every [`Simulation::step`]; a round already in
/// flight runs to completion.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Errors surfaced by the round loop and the voting pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    Config(ConfigError),
    /// `vote()` was called before the simulation was started.
    NotStarted,
    /// The active speaker failed to respond; the round was not recorded.
    SpeakerFailed { agent: String, source: AgentError },
    VoteFailed { agent: String, source: AgentError },
}

impl fmt::Display for SimulationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimulationError::Config(e) => write!(f, "Configuration error: {}", e),
            SimulationError::NotStarted => write!(f, "Simulation has not been started"),
            SimulationError::SpeakerFailed { agent, source } => {
                write!(f, "Speaker {} failed to respond: {}", agent, source)
            }
            SimulationError::VoteFailed { agent, source } => {
                write!(f, "Agent {} failed to vote: {}", agent, source)
            }
        }
    }
}

impl Error for SimulationError {}

impl From<ConfigError> for SimulationError {
    fn from(e: ConfigError) -> Self {
        SimulationError::Config(e)
    }
}

pub struct Simulation {
    id: Uuid,
    config: SimulationConfig,
    backend: Arc<dyn ReasoningBackend>,
    oracle: Arc<dyn SimilarityOracle>,
    agent_backends: HashMap<String, Arc<dyn ReasoningBackend>>,
    default_tools: ToolSet,
    agent_tools: HashMap<String, ToolSet>,
    agents: Vec<Agent>,
    moderator: Option<Moderator>,
    active_speaker: Option<usize>,
    status: SimulationStatus,
    iteration_count: usize,
    speaker_history: Vec<String>,
    content_history: Vec<String>,
    engagement_history: Vec<Vec<String>>,
    stop_reason: Option<StopReason>,
    stop: StopHandle,
    event_handler: Option<Arc<dyn EventHandler>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Simulation {
    /// Create a simulation. Nothing is validated until [`start`](Simulation::start).
    pub fn new(
        config: SimulationConfig,
        backend: Arc<dyn ReasoningBackend>,
        oracle: Arc<dyn SimilarityOracle>,
    ) -> Self {
        Simulation {
            id: Uuid::new_v4(),
            config,
            backend,
            oracle,
            agent_backends: HashMap::new(),
            default_tools: ToolSet::new(),
            agent_tools: HashMap::new(),
            agents: Vec::new(),
            moderator: None,
            active_speaker: None,
            status: SimulationStatus::NotStarted,
            iteration_count: 0,
            speaker_history: Vec::new(),
            content_history: Vec::new(),
            engagement_history: Vec::new(),
            stop_reason: None,
            stop: StopHandle::default(),
            event_handler: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Shared by the simulation and every agent it builds.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Use a different backend (e.g. another model) for the named agent.
    pub fn with_agent_backend(
        mut self,
        agent_name: impl Into<String>,
        backend: Arc<dyn ReasoningBackend>,
    ) -> Self {
        self.agent_backends.insert(agent_name.into(), backend);
        self
    }

    /// Tools given to every agent without its own tool set.
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.default_tools = tools;
        self
    }

    pub fn with_agent_tools(mut self, agent_name: impl Into<String>, tools: ToolSet) -> Self {
        self.agent_tools.insert(agent_name.into(), tools);
        self
    }

    /// Build agents and moderator and pick the opening speaker. Calling it again is a no-op.
    pub async fn start(&mut self) -> Result<(), SimulationError> {
        if self.status != SimulationStatus::NotStarted {
            return Ok(());
        }
        self.config.validate()?;
        for name in self.agent_backends.keys().chain(self.agent_tools.keys()) {
            if !self.config.agents.iter().any(|a| &a.name == name) {
                return Err(ConfigError::UnknownAgent(name.clone()).into());
            }
        }

        self.agents = self
            .config
            .agents
            .iter()
            .enumerate()
            .map(|(id, spec)| {
                let backend = self
                    .agent_backends
                    .get(&spec.name)
                    .cloned()
                    .unwrap_or_else(|| Arc::clone(&self.backend));
                let tools = self
                    .agent_tools
                    .get(&spec.name)
                    .unwrap_or(&self.default_tools);
                let agent = Agent::new(
                    id,
                    spec.name.clone(),
                    spec.persona.clone(),
                    self.config.topic.clone(),
                    backend,
                )
                .with_memory_size(self.config.memory_size)
                .with_max_interventions(self.config.cap_for(id))
                .with_tools(tools)
                .with_self_critique(self.config.self_critique)
                .with_intent_context_items(self.config.intent_context_items)
                .with_vote_context_items(self.config.vote_context_items);
                match &self.event_handler {
                    Some(handler) => agent.with_event_handler(Arc::clone(handler)),
                    None => agent,
                }
            })
            .collect();

        let mut moderator = Moderator::new(
            self.agents.len(),
            self.config.resolved_bias(),
            Arc::clone(&self.oracle),
            self.config.seed,
        );
        let candidates: Vec<usize> = self
            .agents
            .iter()
            .filter(|a| a.can_speak())
            .map(|a| a.id)
            .collect();
        self.active_speaker = moderator.open_turn_selector(&candidates);
        self.moderator = Some(moderator);

        self.iteration_count = 0;
        self.speaker_history.clear();
        self.content_history.clear();
        self.engagement_history.clear();
        self.stop_reason = None;
        self.status = SimulationStatus::Running;
        self.started_at = Some(Utc::now());

        let opening_speaker = self.active_speaker.map(|id| self.agents[id].name.clone());
        info!(
            "agora::simulation {}: started '{}' with {} agents, opening speaker {:?}",
            self.id,
            self.config.topic,
            self.agents.len(),
            opening_speaker
        );
        self.emit(SimulationEvent::Started {
            simulation_id: self.id.to_string(),
            topic: self.config.topic.clone(),
            agent_count: self.agents.len(),
            opening_speaker,
        })
        .await;
        Ok(())
    }

    /// Run one round. Auto-starts; returns an idle result once finished.
    pub async fn step(&mut self) -> Result<RoundResult, SimulationError> {
        if self.status == SimulationStatus::NotStarted {
            self.start().await?;
        }
        if self.status == SimulationStatus::Finished {
            return Ok(self.idle_result());
        }
        if self.stop.is_stop_requested() {
            self.finish(StopReason::UserRequested).await;
            return Ok(self.idle_result());
        }
        let speaker_id = match self.active_speaker {
            Some(id) => id,
            None => {
                // only reachable when every agent started with a zero budget
                self.finish(StopReason::BudgetExhausted).await;
                return Ok(self.idle_result());
            }
        };

        if let Some(moderator) = self.moderator.as_mut() {
            moderator.reset();
        }

        let last_speaker = self.speaker_history.last().cloned().unwrap_or_default();
        let last_opinion = self.content_history.last().cloned().unwrap_or_default();
        let speaker_name = self.agents[speaker_id].name.clone();
        self.emit(SimulationEvent::RoundStarted {
            simulation_id: self.id.to_string(),
            iteration: self.iteration_count,
            speaker: speaker_name.clone(),
        })
        .await;

        let response = self.agents[speaker_id]
            .respond(&last_speaker, &last_opinion)
            .await
            .map_err(|source| SimulationError::SpeakerFailed {
                agent: speaker_name.clone(),
                source,
            })?;

        self.speaker_history.push(speaker_name.clone());
        self.content_history.push(response.content.clone());
        self.emit(SimulationEvent::SpeakerResponded {
            simulation_id: self.id.to_string(),
            iteration: self.iteration_count,
            speaker: speaker_name.clone(),
            response_length: response.content.len(),
        })
        .await;

        let eligible: Vec<usize> = self
            .agents
            .iter()
            .filter(|a| a.id != speaker_id && a.can_speak())
            .map(|a| a.id)
            .collect();

        let mut stop_reason = None;
        let mut engaged = Vec::new();
        if self.config.max_interventions_per_agent.is_some() && eligible.is_empty() {
            stop_reason = Some(StopReason::BudgetExhausted);
        } else {
            let decisions = self
                .collect_intents(&eligible, &speaker_name, &response.content)
                .await;
            for (id, decision) in decisions {
                if !decision.wants_to_speak {
                    continue;
                }
                if let Some(moderator) = self.moderator.as_mut() {
                    moderator.register(id, decision.eagerness);
                }
                self.agents[id].remember(&response.content);
                let name = self.agents[id].name.clone();
                self.emit(SimulationEvent::HandRaised {
                    simulation_id: self.id.to_string(),
                    agent_name: name.clone(),
                    eagerness: decision.eagerness,
                })
                .await;
                engaged.push(name);
            }
        }
        self.engagement_history.push(engaged.clone());

        let mut next = None;
        if stop_reason.is_none() {
            next = self.select_next().await;
            if next.is_none() {
                stop_reason = Some(StopReason::NoOneWantsToContinue);
            } else if self.check_convergence().await {
                stop_reason = Some(StopReason::OpinionsConverged);
            } else if self.iteration_count + 1 >= self.config.max_iters {
                stop_reason = Some(StopReason::IterationBudgetReached);
            }
        }

        self.iteration_count += 1;
        info!(
            "agora::simulation {}: round {} speaker={} engaged={:?} next={:?}",
            self.id,
            self.iteration_count,
            speaker_name,
            engaged,
            next.map(|id| self.agents[id].name.as_str())
        );

        match stop_reason {
            Some(reason) => self.finish(reason).await,
            None => {
                self.active_speaker = next;
                if let Some(interval) = self.config.compression_interval {
                    if interval > 0 && self.iteration_count % interval == 0 {
                        self.compress_all_memories().await;
                    }
                }
            }
        }

        Ok(RoundResult {
            iteration: self.iteration_count,
            speaker: Some(speaker_name),
            content: Some(response.content),
            tone: response.tone,
            justification: response.justification,
            engaged,
            finished: self.status == SimulationStatus::Finished,
            stop_reason,
            tool_usage: response.tool_usage,
        })
    }

    /// Step until finished, returning every round result.
    pub async fn run(&mut self) -> Result<Vec<RoundResult>, SimulationError> {
        let mut rounds = Vec::new();
        while self.status != SimulationStatus::Finished {
            rounds.push(self.step().await?);
        }
        Ok(rounds)
    }

    /// Ask every agent for a final ballot, in agent-id order.
    ///
    /// Callers decide whether voting on an unfinished debate makes sense; only a
    /// never-started simulation is rejected.
    pub async fn vote(&self) -> Result<VoteTally, SimulationError> {
        if self.status == SimulationStatus::NotStarted {
            return Err(SimulationError::NotStarted);
        }

        let mut tally = VoteTally {
            yea: 0,
            nay: 0,
            reasons: Vec::with_capacity(self.agents.len()),
            ballots: Vec::with_capacity(self.agents.len()),
        };
        for agent in &self.agents {
            let decision = agent
                .vote()
                .await
                .map_err(|source| SimulationError::VoteFailed {
                    agent: agent.name.clone(),
                    source,
                })?;
            if decision.agrees {
                tally.yea += 1;
            } else {
                tally.nay += 1;
            }
            tally.reasons.push(format!(
                "{}: {} (confidence: {})",
                agent.name, decision.reasoning, decision.confidence
            ));
            tally.ballots.push(Ballot {
                agent: agent.name.clone(),
                agrees: decision.agrees,
                reasoning: decision.reasoning,
                confidence: decision.confidence,
            });
        }

        info!(
            "agora::simulation {}: vote {} yea / {} nay",
            self.id, tally.yea, tally.nay
        );
        self.emit(SimulationEvent::VotingCompleted {
            simulation_id: self.id.to_string(),
            yea: tally.yea,
            nay: tally.nay,
        })
        .await;
        Ok(tally)
    }

    pub fn snapshot(&self) -> SimulationSnapshot {
        SimulationSnapshot {
            id: self.id,
            topic: self.config.topic.clone(),
            max_iters: self.config.max_iters,
            max_interventions_per_agent: self.config.max_interventions_per_agent,
            status: self.status,
            iteration_count: self.iteration_count,
            stop_reason: self.stop_reason,
            active_speaker: self
                .active_speaker
                .and_then(|id| self.agents.get(id))
                .map(|a| a.name.clone()),
            agents: self.agents.iter().map(Agent::snapshot).collect(),
            speaker_history: self.speaker_history.clone(),
            content_history: self.content_history.clone(),
            engagement_history: self.engagement_history.clone(),
            moderator: self.moderator.as_ref().map(Moderator::snapshot),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn status(&self) -> SimulationStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status == SimulationStatus::Finished
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn moderator(&self) -> Option<&Moderator> {
        self.moderator.as_ref()
    }

    pub fn speaker_history(&self) -> &[String] {
        &self.speaker_history
    }

    pub fn content_history(&self) -> &[String] {
        &self.content_history
    }

    pub fn engagement_history(&self) -> &[Vec<String>] {
        &self.engagement_history
    }

    /// Run intent checks for `eligible` concurrently; results come back sorted by agent id.
    async fn collect_intents(
        &self,
        eligible: &[usize],
        last_speaker: &str,
        last_opinion: &str,
    ) -> Vec<(usize, IntentDecision)> {
        let mut join_set = JoinSet::new();
        for &id in eligible {
            let probe = self.agents[id].intent_probe(last_speaker, last_opinion);
            join_set.spawn(async move {
                let name = probe.agent_name().to_string();
                (id, name, probe.run().await)
            });
        }

        let mut decisions = Vec::with_capacity(eligible.len());
        let mut failures = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((id, _, Ok(decision))) => decisions.push((id, decision)),
                Ok((_, name, Err(e))) => {
                    warn!("agora::simulation {}: intent check failed for {}: {}", self.id, name, e);
                    failures.push((name, e.to_string()));
                }
                Err(e) => {
                    warn!("agora::simulation {}: intent task join error: {}", self.id, e);
                }
            }
        }

        for (agent_name, error) in failures {
            self.emit(SimulationEvent::IntentFailed {
                simulation_id: self.id.to_string(),
                agent_name,
                error,
            })
            .await;
        }

        decisions.sort_by_key(|(id, _)| *id);
        decisions
    }

    async fn select_next(&mut self) -> Option<usize> {
        let moderator = self.moderator.as_mut()?;
        moderator.recompute_weights();
        let weights = moderator.weights().to_vec();
        let next = moderator.select_next_speaker();
        if let Some(id) = next {
            debug!(
                "agora::simulation {}: selected {} with weights {:?}",
                self.id, self.agents[id].name, weights
            );
            self.emit(SimulationEvent::SpeakerSelected {
                simulation_id: self.id.to_string(),
                agent_name: self.agents[id].name.clone(),
                weights,
            })
            .await;
        }
        next
    }

    async fn check_convergence(&mut self) -> bool {
        let min_iters = self
            .config
            .convergence
            .effective_min_iters(self.agents.len());
        let threshold = self.config.convergence.threshold;
        let moderator = match self.moderator.as_mut() {
            Some(m) => m,
            None => return false,
        };
        let converged = moderator
            .is_converged(&self.agents, min_iters, self.iteration_count, threshold)
            .await;
        let score = moderator.last_convergence_score();
        self.emit(SimulationEvent::ConvergenceChecked {
            simulation_id: self.id.to_string(),
            score,
            converged,
        })
        .await;
        converged
    }

    async fn compress_all_memories(&mut self) {
        let mut failures = Vec::new();
        for agent in self.agents.iter_mut() {
            if let Err(e) = agent.compress_memory().await {
                warn!("agora::simulation: memory compression failed for {}: {}", agent.name, e);
                failures.push((agent.name.clone(), e.to_string()));
            }
        }
        for (agent_name, error) in failures {
            self.emit(SimulationEvent::MemoryCompressionFailed {
                simulation_id: self.id.to_string(),
                agent_name,
                error,
            })
            .await;
        }
    }

    async fn finish(&mut self, reason: StopReason) {
        self.status = SimulationStatus::Finished;
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
        info!(
            "agora::simulation {}: finished after {} rounds ({})",
            self.id, self.iteration_count, reason
        );
        self.emit(SimulationEvent::Finished {
            simulation_id: self.id.to_string(),
            iterations: self.iteration_count,
            reason,
        })
        .await;
    }

    fn idle_result(&self) -> RoundResult {
        RoundResult {
            iteration: self.iteration_count,
            speaker: None,
            content: None,
            tone: None,
            justification: None,
            engaged: Vec::new(),
            finished: self.status == SimulationStatus::Finished,
            stop_reason: self.stop_reason,
            tool_usage: Vec::new(),
        }
    }

    async fn emit(&self, event: SimulationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_simulation_event(&event).await;
        }
    }
}
