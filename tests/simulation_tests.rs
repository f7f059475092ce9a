mod common;

use agora::config::{AgentSpec, ConfigError, SimulationConfig};
use agora::event::SimulationEvent;
use agora::similarity::SimilarityOracle;
use agora::simulation::{Simulation, SimulationError, SimulationStatus, StopReason};
use common::{lookup_tools, ConstantOracle, FailingOracle, Intent, MockBackend, RecordingHandler};
use std::sync::Arc;

fn three_agents(max_iters: usize) -> SimulationConfig {
    SimulationConfig::new("Should the town build a tram line?")
        .with_agent("Ana", "Transit advocate")
        .with_agent("Bruno", "Shop owner on the main street")
        .with_agent("Carla", "Retired civil engineer")
        .with_max_iters(max_iters)
        .with_seed(7)
}

fn simulation(
    config: SimulationConfig,
    backend: &Arc<MockBackend>,
    oracle: Arc<dyn SimilarityOracle>,
) -> Simulation {
    Simulation::new(config, backend.clone(), oracle)
}

fn assert_histories_aligned(sim: &Simulation) {
    assert_eq!(sim.speaker_history().len(), sim.iteration_count());
    assert_eq!(sim.content_history().len(), sim.iteration_count());
    assert_eq!(sim.engagement_history().len(), sim.iteration_count());
}

#[tokio::test]
async fn test_three_agents_finish_within_max_iters() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(5), &backend, Arc::new(ConstantOracle::new(0.1)));

    let mut rounds = Vec::new();
    while !sim.is_finished() {
        rounds.push(sim.step().await.unwrap());
        assert_histories_aligned(&sim);
    }

    assert!(rounds.len() <= 5);
    assert!(matches!(
        sim.stop_reason(),
        Some(StopReason::IterationBudgetReached) | Some(StopReason::OpinionsConverged)
    ));
    let last = rounds.last().unwrap();
    assert!(last.finished);
    assert_eq!(last.stop_reason, sim.stop_reason());
    assert_eq!(last.iteration, sim.iteration_count());

    // the speaker never raises a hand for the next round
    for (speaker, engaged) in sim.speaker_history().iter().zip(sim.engagement_history()) {
        assert!(!engaged.contains(speaker));
    }
}

#[tokio::test]
async fn test_global_cap_ends_with_budget_exhausted() {
    let backend = Arc::new(MockBackend::new());
    let config = three_agents(21).with_max_interventions_per_agent(2);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.0)));

    while !sim.is_finished() {
        sim.step().await.unwrap();
        assert_histories_aligned(&sim);
        for agent in sim.agents() {
            assert!(agent.interventions_used() <= 2);
        }
    }

    assert_eq!(sim.stop_reason(), Some(StopReason::BudgetExhausted));
    assert!(sim.iteration_count() <= 6);
    for name in ["Ana", "Bruno", "Carla"] {
        let spoke = sim.speaker_history().iter().filter(|s| *s == name).count();
        assert!(spoke <= 2, "{} spoke {} times", name, spoke);
    }
}

#[tokio::test]
async fn test_nobody_wants_to_continue() {
    let backend = Arc::new(MockBackend::new().with_intent("Bruno", Intent::Decline));
    let config = SimulationConfig::new("Four-day work week?")
        .with_agent_spec(AgentSpec::new("Ana", "Union organizer").with_max_interventions(1))
        .with_agent("Bruno", "Factory owner");
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.0)));

    let rounds = sim.run().await.unwrap();
    assert!(rounds.len() <= 2);
    assert_eq!(sim.stop_reason(), Some(StopReason::NoOneWantsToContinue));
    assert_eq!(sim.agents()[0].interventions_used(), 1);
    assert_histories_aligned(&sim);
}

#[tokio::test]
async fn test_per_agent_zero_caps_finish_on_first_step() {
    let backend = Arc::new(MockBackend::new());
    let config = SimulationConfig::new("Silence?")
        .with_agent_spec(AgentSpec::new("Ana", "Mute").with_max_interventions(0))
        .with_agent_spec(AgentSpec::new("Bruno", "Mute").with_max_interventions(0));
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.0)));

    let round = sim.step().await.unwrap();
    assert!(round.finished);
    assert!(round.speaker.is_none());
    assert_eq!(round.stop_reason, Some(StopReason::BudgetExhausted));
    assert_eq!(sim.iteration_count(), 0);
    assert!(backend.calls.lock().await.is_empty());
}

async fn assert_failed_intent_counts_as_declined(intent: Intent) {
    let backend = Arc::new(MockBackend::new().with_intent("Carla", intent));
    let handler = Arc::new(RecordingHandler::default());
    let mut sim = simulation(three_agents(6), &backend, Arc::new(ConstantOracle::new(0.0)))
        .with_event_handler(handler.clone());

    let rounds = sim.run().await.unwrap();
    assert!(!rounds.is_empty());
    for round in &rounds {
        let speaker = round.speaker.as_deref().unwrap();
        let expected: Vec<String> = ["Ana", "Bruno"]
            .iter()
            .filter(|name| **name != speaker)
            .map(|name| name.to_string())
            .collect();
        assert_eq!(round.engaged, expected);
    }
    assert_histories_aligned(&sim);
    assert_eq!(sim.iteration_count(), 6);
}

#[tokio::test]
async fn test_intent_error_is_treated_as_not_interested() {
    assert_failed_intent_counts_as_declined(Intent::Fail).await;
}

#[tokio::test]
async fn test_intent_panic_is_treated_as_not_interested() {
    assert_failed_intent_counts_as_declined(Intent::Panic).await;
}

#[tokio::test]
async fn test_similar_opinions_converge_after_min_iters() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(21), &backend, Arc::new(ConstantOracle::new(0.9)));

    sim.run().await.unwrap();
    assert_eq!(sim.stop_reason(), Some(StopReason::OpinionsConverged));
    assert_eq!(sim.iteration_count(), 3);
    let score = sim.moderator().unwrap().last_convergence_score().unwrap();
    assert!((score - 0.9).abs() < 1e-6);
}

#[tokio::test]
async fn test_convergence_threshold_is_strict() {
    let backend = Arc::new(MockBackend::new());
    let config = three_agents(6).with_convergence_threshold(0.95);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.9)));

    sim.run().await.unwrap();
    assert_eq!(sim.stop_reason(), Some(StopReason::IterationBudgetReached));
    assert_eq!(sim.iteration_count(), 6);
}

#[tokio::test]
async fn test_convergence_min_iters_is_configurable() {
    let backend = Arc::new(MockBackend::new());
    let config = three_agents(21).with_convergence_min_iters(4);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.9)));

    sim.run().await.unwrap();
    assert_eq!(sim.stop_reason(), Some(StopReason::OpinionsConverged));
    assert_eq!(sim.iteration_count(), 5);
}

#[tokio::test]
async fn test_single_opinion_never_converges() {
    let backend = Arc::new(MockBackend::new());
    let config = three_agents(21).with_convergence_min_iters(0);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.99)));

    let first = sim.step().await.unwrap();
    assert!(!first.finished);
    assert_eq!(first.stop_reason, None);
    assert_eq!(sim.moderator().unwrap().last_convergence_score(), None);

    sim.run().await.unwrap();
    assert_eq!(sim.stop_reason(), Some(StopReason::OpinionsConverged));
    assert_eq!(sim.iteration_count(), 2);
}

#[tokio::test]
async fn test_oracle_failure_never_converges() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(4), &backend, Arc::new(FailingOracle));

    sim.run().await.unwrap();
    assert_eq!(sim.stop_reason(), Some(StopReason::IterationBudgetReached));
    assert_eq!(sim.iteration_count(), 4);
}

#[tokio::test]
async fn test_stop_handle_ends_the_debate() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(21), &backend, Arc::new(ConstantOracle::new(0.0)));
    let stop = sim.stop_handle();

    sim.step().await.unwrap();
    stop.request_stop();
    let round = sim.step().await.unwrap();

    assert!(round.finished);
    assert!(round.speaker.is_none());
    assert_eq!(round.stop_reason, Some(StopReason::UserRequested));
    assert_eq!(sim.iteration_count(), 1);
    assert_histories_aligned(&sim);
}

#[tokio::test]
async fn test_step_after_finish_is_idle() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(2), &backend, Arc::new(ConstantOracle::new(0.0)));
    sim.run().await.unwrap();
    let calls_before = backend.calls.lock().await.len();

    let round = sim.step().await.unwrap();
    assert!(round.finished);
    assert!(round.speaker.is_none());
    assert_eq!(round.iteration, 2);
    assert_eq!(round.stop_reason, Some(StopReason::IterationBudgetReached));
    assert_eq!(backend.calls.lock().await.len(), calls_before);
}

#[tokio::test]
async fn test_speaker_failure_records_nothing() {
    let backend = Arc::new(
        MockBackend::new()
            .with_failing_responder("Ana")
            .with_failing_responder("Bruno")
            .with_failing_responder("Carla"),
    );
    let mut sim = simulation(three_agents(5), &backend, Arc::new(ConstantOracle::new(0.0)));

    let err = sim.step().await.unwrap_err();
    assert!(matches!(err, SimulationError::SpeakerFailed { .. }));
    assert_eq!(sim.iteration_count(), 0);
    assert_eq!(sim.status(), SimulationStatus::Running);
    assert_histories_aligned(&sim);
    assert!(backend.calls_of("intent").await.is_empty());
}

#[tokio::test]
async fn test_vote_tallies_every_agent() {
    let backend = Arc::new(MockBackend::new().with_vote("Bruno", false));
    let mut sim = simulation(three_agents(3), &backend, Arc::new(ConstantOracle::new(0.0)));
    sim.run().await.unwrap();

    let tally = sim.vote().await.unwrap();
    assert_eq!(tally.yea + tally.nay, 3);
    assert_eq!((tally.yea, tally.nay), (2, 1));
    assert_eq!(
        tally.reasons,
        vec![
            "Ana: Ana has reasons (confidence: high)".to_string(),
            "Bruno: Bruno has reasons (confidence: high)".to_string(),
            "Carla: Carla has reasons (confidence: high)".to_string(),
        ]
    );
    assert!(!tally.ballots[1].agrees);
}

#[tokio::test]
async fn test_vote_before_start_is_rejected() {
    let backend = Arc::new(MockBackend::new());
    let sim = simulation(three_agents(3), &backend, Arc::new(ConstantOracle::new(0.0)));
    assert_eq!(sim.vote().await.unwrap_err(), SimulationError::NotStarted);
}

#[tokio::test]
async fn test_vote_failure_names_the_agent() {
    let backend = Arc::new(MockBackend::new().with_failing_voter("Carla"));
    let mut sim = simulation(three_agents(2), &backend, Arc::new(ConstantOracle::new(0.0)));
    sim.run().await.unwrap();

    match sim.vote().await.unwrap_err() {
        SimulationError::VoteFailed { agent, .. } => assert_eq!(agent, "Carla"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let backend = Arc::new(MockBackend::new());
    let handler = Arc::new(RecordingHandler::default());
    let mut sim = simulation(three_agents(5), &backend, Arc::new(ConstantOracle::new(0.0)))
        .with_event_handler(handler.clone());

    sim.start().await.unwrap();
    let opening = sim.snapshot().active_speaker;
    assert!(opening.is_some());
    sim.start().await.unwrap();
    assert_eq!(sim.snapshot().active_speaker, opening);

    let started = handler
        .simulation_events
        .lock()
        .await
        .iter()
        .filter(|e| matches!(e, SimulationEvent::Started { .. }))
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let backend = Arc::new(MockBackend::new());
    let mut empty = simulation(
        SimulationConfig::new("Nobody here"),
        &backend,
        Arc::new(ConstantOracle::new(0.0)),
    );
    assert_eq!(
        empty.step().await.unwrap_err(),
        SimulationError::Config(ConfigError::NoAgents)
    );
    assert_eq!(empty.status(), SimulationStatus::NotStarted);

    let mut unknown = simulation(three_agents(5), &backend, Arc::new(ConstantOracle::new(0.0)))
        .with_agent_backend("Zed", Arc::new(MockBackend::new()));
    assert_eq!(
        unknown.start().await.unwrap_err(),
        SimulationError::Config(ConfigError::UnknownAgent("Zed".to_string()))
    );
}

#[tokio::test]
async fn test_memories_are_compressed_every_interval() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(7), &backend, Arc::new(ConstantOracle::new(0.0)));

    sim.step().await.unwrap();
    sim.step().await.unwrap();
    assert!(backend.calls_of("summarize").await.is_empty());

    sim.step().await.unwrap();
    assert!(!backend.calls_of("summarize").await.is_empty());
    // everyone engaged in the first round, so nobody's memory was empty
    for agent in sim.agents() {
        assert_eq!(agent.memory().items(), vec![format!("summary by {}", agent.name)]);
    }
}

#[tokio::test]
async fn test_engaged_agents_remember_what_they_heard() {
    let backend = Arc::new(MockBackend::new());
    let config = three_agents(2).with_compression_interval(None);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.0)));

    sim.run().await.unwrap();
    assert_eq!(sim.iteration_count(), 2);
    for (content, engaged) in sim.content_history().iter().zip(sim.engagement_history()) {
        for name in engaged {
            let agent = sim.agents().iter().find(|a| &a.name == name).unwrap();
            assert!(agent.memory().items().contains(content));
        }
    }

    // two distinct speakers, so one agent only ever listened
    let listener = sim
        .agents()
        .iter()
        .find(|a| a.interventions_used() == 0)
        .unwrap();
    assert_eq!(listener.memory().items(), sim.content_history().to_vec());

    let listener_name = listener.name.clone();
    let heard = sim.content_history().to_vec();
    sim.vote().await.unwrap();
    let votes = backend.vote_requests.lock().await;
    let ballot = votes.iter().find(|v| v.agent_name == listener_name).unwrap();
    for content in &heard {
        assert!(ballot.context.contains(content.as_str()));
    }
}

#[tokio::test]
async fn test_declined_agents_do_not_remember() {
    let backend = Arc::new(
        MockBackend::new()
            .with_default_intent(Intent::Decline)
            .with_intent("Ana", Intent::Raise(0.9))
            .with_intent("Bruno", Intent::Raise(0.9)),
    );
    let config = three_agents(3).with_compression_interval(None);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.0)));

    sim.run().await.unwrap();
    let carla = &sim.agents()[2];
    assert!(carla.memory().items().iter().all(|item| item.starts_with("Carla makes point")));
    assert_eq!(carla.memory().len(), carla.interventions_used());
    assert!(sim.engagement_history().iter().flatten().all(|name| name != "Carla"));
}

#[tokio::test]
async fn test_compression_can_be_disabled() {
    let backend = Arc::new(MockBackend::new());
    let config = three_agents(7).with_compression_interval(None);
    let mut sim = simulation(config, &backend, Arc::new(ConstantOracle::new(0.0)));

    sim.run().await.unwrap();
    assert_eq!(sim.iteration_count(), 7);
    assert!(backend.calls_of("summarize").await.is_empty());
}

#[tokio::test]
async fn test_compression_failure_does_not_stop_the_debate() {
    let backend = Arc::new(MockBackend::new().with_failing_summaries());
    let handler = Arc::new(RecordingHandler::default());
    let mut sim = simulation(three_agents(5), &backend, Arc::new(ConstantOracle::new(0.0)))
        .with_event_handler(handler.clone());

    sim.run().await.unwrap();
    assert_eq!(sim.stop_reason(), Some(StopReason::IterationBudgetReached));
    assert!(handler
        .simulation_events
        .lock()
        .await
        .iter()
        .any(|e| matches!(e, SimulationEvent::MemoryCompressionFailed { .. })));
}

#[tokio::test]
async fn test_same_seed_same_speakers() {
    let mut histories = Vec::new();
    for _ in 0..2 {
        let backend = Arc::new(MockBackend::new());
        let mut sim = simulation(
            three_agents(12).with_seed(99),
            &backend,
            Arc::new(ConstantOracle::new(0.0)),
        );
        sim.run().await.unwrap();
        histories.push(sim.speaker_history().to_vec());
    }
    assert_eq!(histories[0], histories[1]);
    assert_eq!(histories[0].len(), 12);
}

#[tokio::test]
async fn test_snapshot_serializes() {
    let backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(3), &backend, Arc::new(ConstantOracle::new(0.0)));
    sim.run().await.unwrap();

    let snapshot = sim.snapshot();
    assert_eq!(snapshot.iteration_count, 3);
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.finished_at.is_some());

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["status"], "finished");
    assert_eq!(json["stop_reason"], "iteration_budget_reached");
    assert_eq!(json["agents"].as_array().unwrap().len(), 3);
    assert_eq!(json["speaker_history"].as_array().unwrap().len(), 3);
    assert_eq!(json["id"], sim.id().to_string());
}

#[tokio::test]
async fn test_events_follow_the_round_loop() {
    let backend = Arc::new(MockBackend::new());
    let handler = Arc::new(RecordingHandler::default());
    let mut sim = simulation(three_agents(4), &backend, Arc::new(ConstantOracle::new(0.0)))
        .with_event_handler(handler.clone());
    sim.run().await.unwrap();
    sim.vote().await.unwrap();

    let events = handler.simulation_events.lock().await;
    assert!(matches!(events.first(), Some(SimulationEvent::Started { agent_count: 3, .. })));
    let rounds = events
        .iter()
        .filter(|e| matches!(e, SimulationEvent::RoundStarted { .. }))
        .count();
    assert_eq!(rounds, 4);
    assert!(events.iter().any(|e| matches!(
        e,
        SimulationEvent::Finished {
            iterations: 4,
            reason: StopReason::IterationBudgetReached,
            ..
        }
    )));
    assert!(matches!(
        events.last(),
        Some(SimulationEvent::VotingCompleted { yea: 3, nay: 0, .. })
    ));

    // agents share the simulation's handler
    assert!(!handler.agent_events.lock().await.is_empty());
}

#[tokio::test]
async fn test_agent_backend_override() {
    let shared = Arc::new(MockBackend::new());
    let bruno_backend = Arc::new(MockBackend::new());
    let mut sim = simulation(three_agents(6), &shared, Arc::new(ConstantOracle::new(0.0)))
        .with_agent_backend("Bruno", bruno_backend.clone());
    sim.run().await.unwrap();

    assert!(shared
        .calls
        .lock()
        .await
        .iter()
        .all(|c| !c.ends_with(":Bruno")));
    assert!(bruno_backend
        .calls
        .lock()
        .await
        .iter()
        .all(|c| c.ends_with(":Bruno")));
    assert!(!bruno_backend.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_tool_usage_surfaces_in_round_results() {
    let backend = Arc::new(MockBackend::new().with_tool_call("lookup", "ridership"));
    let mut sim = simulation(three_agents(6), &backend, Arc::new(ConstantOracle::new(0.0)))
        .with_agent_tools("Ana", lookup_tools());
    let rounds = sim.run().await.unwrap();

    for round in &rounds {
        assert_eq!(round.tool_usage.len(), 1);
        let usage = &round.tool_usage[0];
        if round.speaker.as_deref() == Some("Ana") {
            assert!(usage.success);
            assert!(round.content.as_deref().unwrap().contains("fact about ridership"));
        } else {
            assert!(!usage.success);
            assert!(usage.error.is_some());
        }
    }
}
