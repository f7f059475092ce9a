//! Simulation configuration.
//!
//! [`SimulationConfig`] is a plain struct with sensible defaults. Build it in code with the
//! `with_*` helpers or load it from JSON; either way call [`SimulationConfig::validate`]
//! (done automatically by [`Simulation::start`](crate::Simulation::start)) before use.
//!
//! # Example
//!
//! ```rust
//! use agora::SimulationConfig;
//!
//! let config = SimulationConfig::new("Should cities ban private cars downtown?")
//!     .with_agent("Ana", "Urban planner focused on public transit")
//!     .with_agent("Bruno", "Small business owner worried about deliveries")
//!     .with_max_iters(8)
//!     .with_seed(7);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.memory_size, 3);
//! ```
//!
//! The same configuration as JSON (omitted fields take their defaults):
//!
//! ```rust
//! use agora::SimulationConfig;
//!
//! let config = SimulationConfig::from_json_str(r#"{
//!     "topic": "Four-day work week",
//!     "agents": [
//!         {"name": "Ana", "persona": "Labour economist"},
//!         {"name": "Bruno", "persona": "Factory owner", "max_interventions": 2}
//!     ],
//!     "max_iters": 10,
//!     "convergence": {"threshold": 0.8}
//! }"#).unwrap();
//!
//! assert_eq!(config.agents[1].max_interventions, Some(2));
//! assert_eq!(config.convergence.min_iters, None);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::path::Path;

pub const DEFAULT_MAX_ITERS: usize = 21;
pub const DEFAULT_CONVERGENCE_THRESHOLD: f32 = 0.75;
pub const DEFAULT_COMPRESSION_INTERVAL: usize = 3;
pub const DEFAULT_INTENT_CONTEXT_ITEMS: usize = 2;
pub const DEFAULT_VOTE_CONTEXT_ITEMS: usize = 4;

/// One debate participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub persona: String,
    /// Overrides `SimulationConfig::max_interventions_per_agent` for this agent.
    #[serde(default)]
    pub max_interventions: Option<usize>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, persona: impl Into<String>) -> Self {
        AgentSpec {
            name: name.into(),
            persona: persona.into(),
            max_interventions: None,
        }
    }

    pub fn with_max_interventions(mut self, cap: usize) -> Self {
        self.max_interventions = Some(cap);
        self
    }
}

/// When to consider the debate stalled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Average pairwise similarity that must be exceeded.
    pub threshold: f32,
    /// Rounds that must complete before convergence may end the debate.
    /// `None` means `agent_count - 1`.
    pub min_iters: Option<usize>,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        ConvergenceConfig {
            threshold: DEFAULT_CONVERGENCE_THRESHOLD,
            min_iters: None,
        }
    }
}

impl ConvergenceConfig {
    pub fn effective_min_iters(&self, agent_count: usize) -> usize {
        self.min_iters
            .unwrap_or_else(|| agent_count.saturating_sub(1))
    }
}

/// Everything needed to build a [`Simulation`](crate::Simulation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub topic: String,
    pub agents: Vec<AgentSpec>,
    /// Hard ceiling on completed rounds.
    pub max_iters: usize,
    /// Cap applied to every agent without its own `max_interventions`.
    pub max_interventions_per_agent: Option<usize>,
    /// Per-agent fairness multiplier; all ones when absent.
    pub bias: Option<Vec<f64>>,
    pub convergence: ConvergenceConfig,
    /// Memory capacity of every agent.
    pub memory_size: usize,
    /// Memory items used as context for intent checks.
    pub intent_context_items: usize,
    /// Memory items used as context for voting.
    pub vote_context_items: usize,
    /// Compress every agent's memory after this many completed rounds. `None` disables it.
    pub compression_interval: Option<usize>,
    /// Run a persona-fit rewrite over every drafted response.
    pub self_critique: bool,
    /// Seed for speaker sampling; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            topic: String::new(),
            agents: Vec::new(),
            max_iters: DEFAULT_MAX_ITERS,
            max_interventions_per_agent: None,
            bias: None,
            convergence: ConvergenceConfig::default(),
            memory_size: crate::agora::memory::DEFAULT_MEMORY_SIZE,
            intent_context_items: DEFAULT_INTENT_CONTEXT_ITEMS,
            vote_context_items: DEFAULT_VOTE_CONTEXT_ITEMS,
            compression_interval: Some(DEFAULT_COMPRESSION_INTERVAL),
            self_critique: true,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        SimulationConfig {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, name: impl Into<String>, persona: impl Into<String>) -> Self {
        self.agents.push(AgentSpec::new(name, persona));
        self
    }

    pub fn with_agent_spec(mut self, spec: AgentSpec) -> Self {
        self.agents.push(spec);
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_max_interventions_per_agent(mut self, cap: usize) -> Self {
        self.max_interventions_per_agent = Some(cap);
        self
    }

    pub fn with_bias(mut self, bias: Vec<f64>) -> Self {
        self.bias = Some(bias);
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f32) -> Self {
        self.convergence.threshold = threshold;
        self
    }

    pub fn with_convergence_min_iters(mut self, min_iters: usize) -> Self {
        self.convergence.min_iters = Some(min_iters);
        self
    }

    pub fn with_memory_size(mut self, memory_size: usize) -> Self {
        self.memory_size = memory_size;
        self
    }

    pub fn with_compression_interval(mut self, interval: Option<usize>) -> Self {
        self.compression_interval = interval;
        self
    }

    pub fn with_self_critique(mut self, enabled: bool) -> Self {
        self.self_critique = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Effective cap for the agent at `index`.
    pub fn cap_for(&self, index: usize) -> Option<usize> {
        self.agents
            .get(index)
            .and_then(|a| a.max_interventions)
            .or(self.max_interventions_per_agent)
    }

    /// Bias vector with the all-ones default applied.
    pub fn resolved_bias(&self) -> Vec<f64> {
        match &self.bias {
            Some(bias) => bias.clone(),
            None => vec![1.0; self.agents.len()],
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Check the configuration for shapes the engine cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::DuplicateAgentName(agent.name.clone()));
            }
        }

        if let Some(bias) = &self.bias {
            if bias.len() != self.agents.len() {
                return Err(ConfigError::BiasLengthMismatch {
                    expected: self.agents.len(),
                    found: bias.len(),
                });
            }
            if let Some(bad) = bias.iter().find(|b| !b.is_finite() || **b < 0.0) {
                return Err(ConfigError::InvalidBias(*bad));
            }
        }

        if self.max_iters == 0 {
            return Err(ConfigError::InvalidMaxIters);
        }
        if self.memory_size == 0 {
            return Err(ConfigError::InvalidMemorySize);
        }

        let threshold = self.convergence.threshold;
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(threshold));
        }

        if self.compression_interval == Some(0) {
            return Err(ConfigError::InvalidCompressionInterval);
        }

        Ok(())
    }
}

/// Errors produced while loading or validating a [`SimulationConfig`].
///
/// ```rust
/// use agora::config::{ConfigError, SimulationConfig};
///
/// let err = SimulationConfig::new("empty debate").validate().unwrap_err();
/// assert!(matches!(err, ConfigError::NoAgents));
/// assert_eq!(err.to_string(), "Simulation needs at least one agent");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NoAgents,
    DuplicateAgentName(String),
    BiasLengthMismatch { expected: usize, found: usize },
    InvalidBias(f64),
    InvalidMaxIters,
    InvalidMemorySize,
    InvalidThreshold(f32),
    InvalidCompressionInterval,
    /// A per-agent override names an agent that is not configured.
    UnknownAgent(String),
    Parse(String),
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoAgents => write!(f, "Simulation needs at least one agent"),
            ConfigError::DuplicateAgentName(name) => write!(f, "Duplicate agent name: {}", name),
            ConfigError::BiasLengthMismatch { expected, found } => write!(
                f,
                "Bias has {} entries but there are {} agents",
                found, expected
            ),
            ConfigError::InvalidBias(value) => {
                write!(f, "Bias values must be finite and non-negative, got {}", value)
            }
            ConfigError::InvalidMaxIters => write!(f, "max_iters must be at least 1"),
            ConfigError::InvalidMemorySize => write!(f, "memory_size must be at least 1"),
            ConfigError::InvalidThreshold(value) => {
                write!(f, "Convergence threshold must be within [-1, 1], got {}", value)
            }
            ConfigError::InvalidCompressionInterval => {
                write!(f, "compression_interval must be at least 1 when set")
            }
            ConfigError::UnknownAgent(name) => write!(f, "Unknown agent: {}", name),
            ConfigError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::Io(msg) => write!(f, "Could not read configuration: {}", msg),
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_agents() -> SimulationConfig {
        SimulationConfig::new("topic")
            .with_agent("a", "persona a")
            .with_agent("b", "persona b")
    }

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.max_iters, 21);
        assert_eq!(config.memory_size, 3);
        assert_eq!(config.compression_interval, Some(3));
        assert_eq!(config.convergence.threshold, 0.75);
        assert!(config.self_critique);
        assert_eq!(config.convergence.effective_min_iters(4), 3);
        assert_eq!(config.convergence.effective_min_iters(0), 0);
    }

    #[test]
    fn test_cap_resolution_prefers_agent_override() {
        let config = SimulationConfig::new("t")
            .with_agent_spec(AgentSpec::new("a", "p").with_max_interventions(1))
            .with_agent("b", "p")
            .with_max_interventions_per_agent(4);
        assert_eq!(config.cap_for(0), Some(1));
        assert_eq!(config.cap_for(1), Some(4));
        assert_eq!(two_agents().cap_for(0), None);
    }

    #[test]
    fn test_validation_failures() {
        assert_eq!(
            SimulationConfig::new("t").validate(),
            Err(ConfigError::NoAgents)
        );
        assert_eq!(
            two_agents().with_agent("a", "again").validate(),
            Err(ConfigError::DuplicateAgentName("a".into()))
        );
        assert_eq!(
            two_agents().with_bias(vec![1.0]).validate(),
            Err(ConfigError::BiasLengthMismatch {
                expected: 2,
                found: 1
            })
        );
        assert!(matches!(
            two_agents().with_bias(vec![1.0, f64::NAN]).validate(),
            Err(ConfigError::InvalidBias(_))
        ));
        assert_eq!(
            two_agents().with_max_iters(0).validate(),
            Err(ConfigError::InvalidMaxIters)
        );
        assert_eq!(
            two_agents().with_memory_size(0).validate(),
            Err(ConfigError::InvalidMemorySize)
        );
        assert_eq!(
            two_agents().with_convergence_threshold(1.5).validate(),
            Err(ConfigError::InvalidThreshold(1.5))
        );
        assert_eq!(
            two_agents().with_compression_interval(Some(0)).validate(),
            Err(ConfigError::InvalidCompressionInterval)
        );
        assert!(two_agents()
            .with_compression_interval(None)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_resolved_bias_defaults_to_ones() {
        assert_eq!(two_agents().resolved_bias(), vec![1.0, 1.0]);
        assert_eq!(
            two_agents().with_bias(vec![0.5, 2.0]).resolved_bias(),
            vec![0.5, 2.0]
        );
    }
}
