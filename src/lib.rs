//! # Agora
//!
//! Agora runs multi-party, turn-based debates among autonomous agents driven by a
//! language-generation backend. Its core is the turn-taking and stopping-condition engine:
//!
//! * **Voluntary participation**: after every contribution each eligible agent is asked,
//!   cheaply and in parallel, whether it wants to speak next and how eagerly.
//! * **Fair selection**: the [`Moderator`] samples the next speaker among raised hands,
//!   weighting short-term eagerness against long-term fairness
//!   (`exp(hands_raised - interventions / bias) * eagerness`).
//! * **Budgets**: optional per-agent intervention caps.
//! * **Early stopping**: the debate ends when nobody wants to continue, when opinions
//!   converge semantically, when budgets run out, or after `max_iters` rounds.
//! * **Final vote**: every agent casts a ballot with reasoning and confidence.
//!
//! The engine consumes two capabilities it does not implement itself: a
//! [`ReasoningBackend`] that produces decisions and text for a persona, and a
//! [`SimilarityOracle`] that embeds and compares text. [`chat_backend::ChatBackend`]
//! provides a ready-made backend over any OpenAI-compatible chat endpoint.
//!
//! ## A complete debate with scripted collaborators
//!
//! ```rust
//! use agora::reasoning::*;
//! use agora::similarity::OracleResult;
//! use agora::tool_protocol::ToolSet;
//! use agora::{SimilarityOracle, Simulation, SimulationConfig, StopReason};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Scripted;
//!
//! #[async_trait]
//! impl ReasoningBackend for Scripted {
//!     async fn assess_intent(&self, _r: &IntentRequest) -> BackendResult<IntentDecision> {
//!         Ok(IntentDecision { wants_to_speak: true, eagerness: 0.7 })
//!     }
//!     async fn respond(&self, r: &RespondRequest, _t: &ToolSet) -> BackendResult<RespondOutput> {
//!         Ok(RespondOutput { response: format!("{} weighs in", r.agent_name), ..Default::default() })
//!     }
//!     async fn critique(&self, r: &CritiqueRequest) -> BackendResult<CritiqueOutput> {
//!         Ok(CritiqueOutput { corrected: r.draft.clone() })
//!     }
//!     async fn vote(&self, r: &VoteRequest) -> BackendResult<VoteDecision> {
//!         Ok(VoteDecision { agrees: r.agent_name != "Bruno", reasoning: "gut feeling".into(), confidence: Confidence::Low })
//!     }
//!     async fn summarize(&self, r: &SummarizeRequest) -> BackendResult<SummaryOutput> {
//!         Ok(SummaryOutput { summary: format!("summary of {} chars", r.context.len()) })
//!     }
//! }
//!
//! struct Orthogonal;
//!
//! #[async_trait]
//! impl SimilarityOracle for Orthogonal {
//!     async fn embed(&self, text: &str) -> OracleResult<Vec<f32>> {
//!         Ok(vec![text.len() as f32, -(text.len() as f32)])
//!     }
//!     fn similarity(&self, _a: &[f32], _b: &[f32]) -> f32 {
//!         0.0
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let config = SimulationConfig::new("Should the town build a tram line?")
//!     .with_agent("Ana", "Transit advocate")
//!     .with_agent("Bruno", "Shop owner on the main street")
//!     .with_agent("Carla", "Retired engineer")
//!     .with_max_iters(5)
//!     .with_seed(1);
//!
//! let mut simulation = Simulation::new(config, Arc::new(Scripted), Arc::new(Orthogonal));
//! let rounds = simulation.run().await.unwrap();
//!
//! assert_eq!(rounds.len(), 5);
//! assert_eq!(simulation.stop_reason(), Some(StopReason::IterationBudgetReached));
//!
//! let tally = simulation.vote().await.unwrap();
//! assert_eq!((tally.yea, tally.nay), (2, 1));
//! # });
//! ```
//!
//! ## Talking to a real model
//!
//! ```rust,no_run
//! use agora::chat_backend::ChatBackend;
//! use agora::clients::openai_compatible::OpenAICompatibleClient;
//! use agora::similarity::{CachingOracle, SimilarityOracle};
//! use agora::{Simulation, SimulationConfig};
//! use std::sync::Arc;
//!
//! async fn debate(oracle: Arc<dyn SimilarityOracle>) -> Result<(), Box<dyn std::error::Error>> {
//!     agora::init_logger();
//!
//!     let key = std::env::var("OPENROUTER_API_KEY")?;
//!     let backend = Arc::new(ChatBackend::new(Arc::new(OpenAICompatibleClient::new(
//!         &key,
//!         "openai/gpt-4o-mini",
//!     ))));
//!     let oracle = Arc::new(CachingOracle::new(oracle));
//!
//!     let config = SimulationConfig::from_json_file("debate.json")?;
//!     let mut simulation = Simulation::new(config, backend, oracle);
//!     for round in simulation.run().await? {
//!         println!("{:?}: {:?}", round.speaker, round.content);
//!     }
//!     println!("{}", serde_json::to_string_pretty(&simulation.snapshot())?);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding Agora can opt in to simple `RUST_LOG` driven diagnostics
/// without choosing a logging backend upfront.
///
/// ```rust
/// agora::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `agora` module.
pub mod agora;

// Re-exporting key items for easier external access.
pub use agora::agent;
pub use agora::agent::{Agent, AgentError, AgentSnapshot, IntentProbe};
pub use agora::chat_backend;
pub use agora::client_wrapper;
pub use agora::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
pub use agora::clients;
pub use agora::config;
pub use agora::config::{AgentSpec, ConfigError, ConvergenceConfig, SimulationConfig};
pub use agora::event;
pub use agora::event::{AgentEvent, EventHandler, SimulationEvent};
pub use agora::memory;
pub use agora::memory::Memory;
pub use agora::moderator;
pub use agora::moderator::{Moderator, ModeratorSnapshot};
pub use agora::reasoning;
pub use agora::reasoning::ReasoningBackend;
pub use agora::similarity;
pub use agora::similarity::SimilarityOracle;
pub use agora::simulation;
pub use agora::simulation::{
    Ballot, RoundResult, Simulation, SimulationError, SimulationSnapshot, SimulationStatus,
    StopHandle, StopReason, VoteTally,
};
pub use agora::tool_protocol;
pub use agora::tool_protocol::{Tool, ToolSet, ToolUsage};
