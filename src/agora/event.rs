//! Agent and simulation event system.
//!
//! Provides a callback-based observability layer for debates. Implement [`EventHandler`]
//! to receive real-time notifications about:
//!
//! - **Intent checks**: which agents raised a hand and how eagerly
//! - **Responses**: drafts, self-critique rewrites, tool invocations
//! - **Scheduling**: speaker selection and the weights behind it
//! - **Stopping**: convergence checks and the final stop reason
//! - **Voting**: individual ballots and the tally
//!
//! # Architecture
//!
//! Events flow through a single [`EventHandler`] trait with two methods:
//! - [`on_agent_event`](EventHandler::on_agent_event) receives [`AgentEvent`]s from individual agents
//! - [`on_simulation_event`](EventHandler::on_simulation_event) receives [`SimulationEvent`]s from the round loop
//!
//! Both methods have default no-op implementations, so you only override what you care
//! about. A handler registered on a [`Simulation`](crate::Simulation) via
//! [`with_event_handler`](crate::Simulation::with_event_handler) is propagated to every
//! agent the simulation builds.
//!
//! # Example
//!
//! ```rust,no_run
//! use agora::event::{AgentEvent, EventHandler, SimulationEvent};
//! use async_trait::async_trait;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_agent_event(&self, event: &AgentEvent) {
//!         if let AgentEvent::IntentAssessed { agent_name, wants_to_speak: true, eagerness, .. } = event {
//!             println!("{} raised a hand ({:.2})", agent_name, eagerness);
//!         }
//!     }
//!     async fn on_simulation_event(&self, event: &SimulationEvent) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

use crate::agora::reasoning::Confidence;
use crate::agora::simulation::StopReason;
use async_trait::async_trait;

/// Events emitted by an [`Agent`](crate::Agent).
///
/// Every variant carries `agent_id` and `agent_name` so handlers can identify the source
/// agent without external state.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// An intent check finished. Not emitted for agents skipped because their budget is spent.
    IntentAssessed {
        agent_id: usize,
        agent_name: String,
        wants_to_speak: bool,
        /// Eagerness after clamping into `[0, 1]`.
        eagerness: f64,
    },

    /// The backend produced a draft response (before self-critique).
    ResponseDrafted {
        agent_id: usize,
        agent_name: String,
        response_length: usize,
    },

    /// Self-critique replaced the draft. `changed` is false when the critique echoed it.
    CritiqueApplied {
        agent_id: usize,
        agent_name: String,
        changed: bool,
    },

    /// Self-critique failed; the draft was kept.
    CritiqueFailed {
        agent_id: usize,
        agent_name: String,
        error: String,
    },

    /// A tool was called while drafting.
    ToolInvoked {
        agent_id: usize,
        agent_name: String,
        tool_name: String,
        success: bool,
    },

    /// Memory was replaced by a summary.
    MemoryCompressed {
        agent_id: usize,
        agent_name: String,
        items_before: usize,
    },

    VoteCast {
        agent_id: usize,
        agent_name: String,
        agrees: bool,
        confidence: Confidence,
    },
}

/// Events emitted by a [`Simulation`](crate::Simulation).
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    /// `start()` built the agents and picked the opening speaker.
    Started {
        simulation_id: String,
        topic: String,
        agent_count: usize,
        opening_speaker: Option<String>,
    },

    /// A round is about to run. `iteration` is the 0-based round index.
    RoundStarted {
        simulation_id: String,
        iteration: usize,
        speaker: String,
    },

    SpeakerResponded {
        simulation_id: String,
        iteration: usize,
        speaker: String,
        response_length: usize,
    },

    /// An agent's intent check failed and was treated as "not interested".
    IntentFailed {
        simulation_id: String,
        agent_name: String,
        error: String,
    },

    HandRaised {
        simulation_id: String,
        agent_name: String,
        eagerness: f64,
    },

    /// The moderator sampled the next speaker. `weights` align with the hand raises of the round.
    SpeakerSelected {
        simulation_id: String,
        agent_name: String,
        weights: Vec<f64>,
    },

    ConvergenceChecked {
        simulation_id: String,
        /// Average pairwise similarity, `None` when fewer than two opinions existed.
        score: Option<f32>,
        converged: bool,
    },

    MemoryCompressionFailed {
        simulation_id: String,
        agent_name: String,
        error: String,
    },

    Finished {
        simulation_id: String,
        iterations: usize,
        reason: StopReason,
    },

    VotingCompleted {
        simulation_id: String,
        yea: usize,
        nay: usize,
    },
}

/// Trait for receiving agent and simulation events.
///
/// The `Send + Sync` bound allows the handler to be shared across agents and tokio tasks
/// via `Arc<dyn EventHandler>`; keep internal state behind appropriate synchronization.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when an agent emits an event. Default is a no-op.
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    /// Called when a simulation emits an event. Default is a no-op.
    async fn on_simulation_event(&self, _event: &SimulationEvent) {}
}
