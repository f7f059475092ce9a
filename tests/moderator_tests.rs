mod common;

use agora::agent::Agent;
use agora::moderator::Moderator;
use common::{ConstantOracle, MockBackend};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn panel(backend: &Arc<MockBackend>) -> Vec<Agent> {
    vec![
        Agent::new(0, "Ana", "Transit advocate", "Build a tram line?", backend.clone()),
        Agent::new(1, "Bruno", "Shop owner", "Build a tram line?", backend.clone()),
    ]
}

#[tokio::test]
async fn test_one_opinion_has_no_convergence_score() {
    let backend = Arc::new(MockBackend::new());
    let mut agents = panel(&backend);
    let oracle = Arc::new(ConstantOracle::new(0.99));
    let mut moderator = Moderator::new(2, vec![1.0; 2], oracle.clone(), Some(1));

    assert_eq!(moderator.convergence_score(&agents).await.unwrap(), None);

    agents[0].respond("", "").await.unwrap();
    assert_eq!(moderator.convergence_score(&agents).await.unwrap(), None);
    assert!(!moderator.is_converged(&agents, 0, 5, 0.5).await);
    assert_eq!(moderator.last_convergence_score(), None);
    assert_eq!(oracle.embeds.load(Ordering::SeqCst), 0);

    agents[1].respond("Ana", "Ana makes point #1").await.unwrap();
    let score = moderator.convergence_score(&agents).await.unwrap().unwrap();
    assert!((score - 0.99).abs() < 1e-6);
    assert!(moderator.is_converged(&agents, 0, 5, 0.5).await);
}

#[tokio::test]
async fn test_min_iters_gates_convergence() {
    let backend = Arc::new(MockBackend::new());
    let mut agents = panel(&backend);
    let oracle = Arc::new(ConstantOracle::new(0.99));
    let mut moderator = Moderator::new(2, vec![1.0; 2], oracle, None);
    for agent in agents.iter_mut() {
        agent.respond("", "").await.unwrap();
    }

    assert!(!moderator.is_converged(&agents, 3, 2, 0.5).await);
    assert!(moderator.is_converged(&agents, 3, 3, 0.5).await);
}
