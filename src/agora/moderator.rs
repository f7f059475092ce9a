//! Turn-taking scheduler.
//!
//! The [`Moderator`] decides who speaks next among the agents that raised a hand this
//! round, and whether the debate has converged. It refers to agents only by their index
//! inside the owning [`Simulation`](crate::Simulation); it never holds agents itself.
//!
//! # Speaker selection
//!
//! For every requester `i` the moderator computes
//!
//! ```text
//! bias_term  = 1 / max(bias[i], ε)
//! exponent   = clip(hands_raised[i] - bias_term * interventions[i], -500, 500)
//! desire     = clip(eagerness[i], 0.01, 1.0)
//! weight[i]  = exp(exponent) * desire          (normalized to sum 1)
//! ```
//!
//! Agents that keep asking to speak but are rarely picked accumulate fairness pressure;
//! a lower `bias` amplifies that pressure for a given agent. Degenerate weight vectors
//! (non-finite or non-positive sum) fall back to uniform weights.
//!
//! # Convergence
//!
//! The latest opinion of every agent that has spoken is embedded through the
//! [`SimilarityOracle`]; the debate is converged when the average off-diagonal cosine
//! similarity exceeds a threshold and enough rounds have run.

use crate::agora::agent::Agent;
use crate::agora::similarity::{OracleResult, SimilarityOracle};
use log::{debug, warn};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Floor applied to bias values before inversion.
pub const BIAS_EPSILON: f64 = 1e-6;
/// Exponents are clipped into `[-EXPONENT_LIMIT, EXPONENT_LIMIT]` before `exp`.
pub const EXPONENT_LIMIT: f64 = 500.0;
pub const MIN_DESIRE: f64 = 0.01;
pub const MAX_DESIRE: f64 = 1.0;

/// Serializable view of the moderator's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorSnapshot {
    pub interventions: Vec<usize>,
    pub hands_raised: Vec<usize>,
    pub bias: Vec<f64>,
    pub weights: Vec<f64>,
    pub last_convergence_score: Option<f32>,
}

pub struct Moderator {
    interventions: Vec<usize>,
    hands_raised: Vec<usize>,
    requests: Vec<usize>,
    desire_weights: Vec<f64>,
    bias: Vec<f64>,
    weights: Vec<f64>,
    last_convergence_score: Option<f32>,
    oracle: Arc<dyn SimilarityOracle>,
    rng: StdRng,
}

impl Moderator {
    /// Create a moderator for `agent_count` agents.
    ///
    /// `bias` is resized to `agent_count`, new entries defaulting to 1.0. A `seed` makes
    /// every random choice reproducible.
    pub fn new(
        agent_count: usize,
        mut bias: Vec<f64>,
        oracle: Arc<dyn SimilarityOracle>,
        seed: Option<u64>,
    ) -> Self {
        bias.resize(agent_count, 1.0);
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Moderator {
            interventions: vec![0; agent_count],
            hands_raised: vec![0; agent_count],
            requests: Vec::new(),
            desire_weights: Vec::new(),
            bias,
            weights: Vec::new(),
            last_convergence_score: None,
            oracle,
            rng,
        }
    }

    /// Uniformly pick the opening speaker among `candidates`.
    pub fn open_turn_selector(&mut self, candidates: &[usize]) -> Option<usize> {
        candidates.choose(&mut self.rng).copied()
    }

    /// Record that agent `id` wants to speak with the given eagerness.
    pub fn register(&mut self, id: usize, eagerness: f64) {
        match self.hands_raised.get_mut(id) {
            Some(hands) => *hands += 1,
            None => {
                warn!("agora::moderator: ignoring hand raise from unknown agent {}", id);
                return;
            }
        }
        self.requests.push(id);
        self.desire_weights.push(eagerness);
    }

    /// Forget this round's hand raises. Cumulative counters are kept.
    pub fn reset(&mut self) {
        self.requests.clear();
        self.desire_weights.clear();
    }

    /// Recompute normalized selection weights for the current requesters.
    pub fn recompute_weights(&mut self) {
        if self.requests.is_empty() {
            self.weights.clear();
            return;
        }

        let combined: Vec<f64> = self
            .requests
            .iter()
            .zip(self.desire_weights.iter())
            .map(|(&id, &eagerness)| {
                let bias_term = 1.0 / self.bias[id].max(BIAS_EPSILON);
                let exponent = (self.hands_raised[id] as f64
                    - bias_term * self.interventions[id] as f64)
                    .clamp(-EXPONENT_LIMIT, EXPONENT_LIMIT);
                let desire = eagerness.clamp(MIN_DESIRE, MAX_DESIRE);
                exponent.exp() * desire
            })
            .collect();

        let total: f64 = combined.iter().sum();
        let combined = if total.is_finite() && total > 0.0 && combined.iter().all(|w| w.is_finite())
        {
            combined
        } else {
            debug!("agora::moderator: degenerate weights {:?}, using uniform", combined);
            vec![1.0; self.requests.len()]
        };

        let total: f64 = combined.iter().sum();
        self.weights = combined.into_iter().map(|w| w / total).collect();
    }

    /// Sample the next speaker among this round's requesters.
    ///
    /// Returns `None` iff nobody raised a hand. Falls back to a uniform draw when the
    /// weights are stale or unusable.
    pub fn select_next_speaker(&mut self) -> Option<usize> {
        if self.requests.is_empty() {
            return None;
        }

        let n = self.requests.len();
        let position = if self.weights.len() == n {
            match WeightedIndex::new(&self.weights) {
                Ok(dist) => dist.sample(&mut self.rng),
                Err(e) => {
                    debug!("agora::moderator: weighted sampling failed ({}), using uniform", e);
                    self.rng.gen_range(0..n)
                }
            }
        } else {
            self.rng.gen_range(0..n)
        };

        let chosen = self.requests[position];
        self.interventions[chosen] += 1;
        Some(chosen)
    }

    /// Average off-diagonal similarity of the agents' latest opinions.
    ///
    /// `Ok(None)` when fewer than two agents have spoken.
    pub async fn convergence_score(&self, agents: &[Agent]) -> OracleResult<Option<f32>> {
        let opinions: Vec<String> = agents
            .iter()
            .map(|a| a.last_opinion())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if opinions.len() < 2 {
            return Ok(None);
        }

        let embeddings = self.oracle.embed_batch(&opinions).await?;
        let n = embeddings.len();
        if n < 2 {
            return Ok(None);
        }
        let mut total = 0.0f64;
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    total += self.oracle.similarity(&embeddings[i], &embeddings[j]) as f64;
                }
            }
        }
        let pairs = (n * (n - 1)) as f64;
        Ok(Some((total / pairs) as f32))
    }

    /// True iff the average similarity exceeds `threshold` and `current_iter >= min_iters`.
    ///
    /// Oracle failures count as "not converged".
    pub async fn is_converged(
        &mut self,
        agents: &[Agent],
        min_iters: usize,
        current_iter: usize,
        threshold: f32,
    ) -> bool {
        if current_iter < min_iters {
            return false;
        }
        match self.convergence_score(agents).await {
            Ok(score) => {
                self.last_convergence_score = score;
                matches!(score, Some(avg) if avg > threshold)
            }
            Err(e) => {
                warn!("agora::moderator: similarity oracle failed: {}", e);
                false
            }
        }
    }

    pub fn interventions(&self) -> &[usize] {
        &self.interventions
    }

    pub fn hands_raised(&self) -> &[usize] {
        &self.hands_raised
    }

    pub fn requests(&self) -> &[usize] {
        &self.requests
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> &[f64] {
        &self.bias
    }

    pub fn last_convergence_score(&self) -> Option<f32> {
        self.last_convergence_score
    }

    pub fn snapshot(&self) -> ModeratorSnapshot {
        ModeratorSnapshot {
            interventions: self.interventions.clone(),
            hands_raised: self.hands_raised.clone(),
            bias: self.bias.clone(),
            weights: self.weights.clone(),
            last_convergence_score: self.last_convergence_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NullOracle;

    #[async_trait]
    impl SimilarityOracle for NullOracle {
        async fn embed(&self, _text: &str) -> OracleResult<Vec<f32>> {
            Ok(vec![1.0])
        }
    }

    fn moderator(agents: usize, seed: u64) -> Moderator {
        Moderator::new(agents, vec![1.0; agents], Arc::new(NullOracle), Some(seed))
    }

    fn assert_normalized(weights: &[f64]) {
        let sum: f64 = weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "weights {:?} sum to {}", weights, sum);
    }

    #[test]
    fn test_no_requests_means_no_speaker() {
        let mut m = moderator(3, 1);
        m.recompute_weights();
        assert!(m.weights().is_empty());
        assert_eq!(m.select_next_speaker(), None);
        assert_eq!(m.interventions(), &[0, 0, 0]);
    }

    #[test]
    fn test_register_tracks_hands_and_reset_keeps_them() {
        let mut m = moderator(3, 1);
        m.register(1, 0.5);
        m.register(2, 0.9);
        m.register(7, 0.9);
        assert_eq!(m.requests(), &[1, 2]);
        assert_eq!(m.hands_raised(), &[0, 1, 1]);

        m.reset();
        assert!(m.requests().is_empty());
        assert_eq!(m.hands_raised(), &[0, 1, 1]);
    }

    #[test]
    fn test_weights_follow_formula() {
        let mut m = moderator(2, 1);
        m.register(0, 1.0);
        m.register(1, 0.5);
        m.recompute_weights();
        // both have hands=1, interventions=0: exp(1)*1.0 vs exp(1)*0.5
        assert_normalized(m.weights());
        assert!((m.weights()[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.weights()[1] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_desire_floor_prevents_starvation() {
        let mut m = moderator(2, 1);
        m.register(0, 1.0);
        m.register(1, 0.0);
        m.recompute_weights();
        assert_normalized(m.weights());
        assert!(m.weights()[1] > 0.0);
        assert!((m.weights()[1] - 0.01 / 1.01).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs_still_normalize() {
        let mut m = Moderator::new(3, vec![0.0, f64::MAX, 1.0], Arc::new(NullOracle), Some(3));
        m.register(0, f64::NAN);
        m.register(1, f64::INFINITY);
        m.register(2, -4.0);
        m.recompute_weights();
        assert_eq!(m.weights().len(), 3);
        assert_normalized(m.weights());
        assert!(m.weights().iter().all(|w| w.is_finite()));
        assert!(m.select_next_speaker().is_some());
    }

    #[test]
    fn test_stale_weights_fall_back_to_uniform() {
        let mut m = moderator(3, 9);
        m.register(0, 1.0);
        m.register(1, 1.0);
        // weights never recomputed
        let chosen = m.select_next_speaker().unwrap();
        assert!(chosen == 0 || chosen == 1);
        assert_eq!(m.interventions().iter().sum::<usize>(), 1);
    }

    #[test]
    fn test_lower_bias_gets_more_fairness_pressure() {
        let mut m = Moderator::new(2, vec![0.5, 1.0], Arc::new(NullOracle), Some(1));
        m.interventions = vec![1, 1];
        m.hands_raised = vec![3, 3];
        m.register(0, 1.0);
        m.register(1, 1.0);
        m.recompute_weights();
        // exponents: 4 - 2*1 = 2 versus 4 - 1 = 3
        assert!(m.weights()[1] > m.weights()[0]);
    }

    #[test]
    fn test_open_turn_selector_stays_in_candidates() {
        let mut m = moderator(4, 11);
        for _ in 0..50 {
            let id = m.open_turn_selector(&[1, 3]).unwrap();
            assert!(id == 1 || id == 3);
        }
        assert_eq!(m.open_turn_selector(&[]), None);
    }

    #[test]
    fn test_uniform_participation_balances_interventions() {
        let agents = 3;
        let mut m = moderator(agents, 42);
        let mut speaker = 0usize;
        for _ in 0..300 {
            m.reset();
            for id in (0..agents).filter(|id| *id != speaker) {
                m.register(id, 1.0);
            }
            m.recompute_weights();
            speaker = m.select_next_speaker().unwrap();
        }

        let counts = m.interventions();
        assert_eq!(counts.iter().sum::<usize>(), 300);
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(max - min <= 10, "unbalanced interventions: {:?}", counts);
    }
}
