//! End-to-end session scenarios against the in-memory backends.
//!
//! Every test runs on a paused tokio clock with the test configuration
//! (`suzerain-config.test.yaml`, one-second ticks), so a full session plays
//! out instantly and deterministically.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::too_many_lines
)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use suzerain_core::sync::projection_key;
use suzerain_core::{
    ActionExecutionFailure, GameRules, MemoryBackends, RulesFn, SessionError, SessionManager,
    StubRules, SuzerainConfig, TurnReplenisher,
};
use suzerain_types::{
    Action, ActionOutcome, ActionParameters, ActionStatus, LifecycleEvent, Phase, PlayerId,
    ResourceKind, SessionId, SessionStatus,
};

fn test_config() -> SuzerainConfig {
    SuzerainConfig::parse(include_str!("../../../suzerain-config.test.yaml"))
        .expect("test config should parse")
}

fn engine_with(
    rules: Arc<dyn GameRules>,
    config: SuzerainConfig,
) -> (MemoryBackends, SessionManager) {
    let backends = MemoryBackends::new(rules, config);
    let manager = SessionManager::new(backends.context.clone());
    (backends, manager)
}

fn engine() -> (MemoryBackends, SessionManager) {
    engine_with(Arc::new(StubRules::new()), test_config())
}

fn interval(backends: &MemoryBackends) -> Duration {
    backends.context.config.cycle.interval()
}

/// Sleep until `ticks` scheduler ticks have fired, landing half an
/// interval after the last one.
async fn run_ticks(backends: &MemoryBackends, ticks: u32) {
    let interval = interval(backends);
    tokio::time::sleep(interval * ticks + interval / 2).await;
}

async fn start_two(manager: &SessionManager) -> (SessionId, PlayerId, PlayerId) {
    let (a, b) = (PlayerId::new(), PlayerId::new());
    let id = manager
        .start_session(&[a, b])
        .await
        .expect("two players should start a session");
    (id, a, b)
}

async fn submit(backends: &MemoryBackends, action: &Action) {
    backends
        .context
        .durable
        .insert_action(action)
        .await
        .expect("action insert");
}

async fn cycle_completions(backends: &MemoryBackends, id: SessionId) -> Vec<u64> {
    backends
        .events
        .events_for(id)
        .await
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::CycleComplete { cycle_number, .. } => Some(cycle_number),
            _ => None,
        })
        .collect()
}

async fn session_completions(backends: &MemoryBackends, id: SessionId) -> usize {
    backends
        .events
        .events_for(id)
        .await
        .into_iter()
        .filter(|e| matches!(e, LifecycleEvent::SessionComplete { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn new_session_starts_at_cycle_zero_with_seeded_players() {
    let (backends, manager) = engine();
    let (id, a, b) = start_two(&manager).await;

    let session = manager.session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.current_cycle, 0);
    assert_eq!(session.current_phase, Phase::Preparation);
    assert_eq!(session.players, vec![a, b]);

    let config = &backends.context.config;
    let players = backends.context.durable.get_players(id).await.unwrap();
    assert_eq!(players.len(), 2);
    for player in &players {
        assert_eq!(player.resources, config.starting.resources);
        assert_eq!(player.remaining_turns, config.turns.max_turns);
    }

    let projection = manager.projection(id).await.unwrap();
    assert_eq!(projection.cycle, 0);
    assert_eq!(projection.phase, Phase::Preparation);
    assert_eq!(projection.players.len(), 2);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn one_tick_resolves_queued_action_and_advances_cycle() {
    let (backends, manager) = engine();
    let (id, a, _) = start_two(&manager).await;

    let action = Action::new(
        id,
        a,
        0,
        Phase::Action,
        ActionParameters::Gather {
            resource: ResourceKind::Wood,
            amount: 25,
        },
    );
    submit(&backends, &action).await;

    run_ticks(&backends, 1).await;

    let stored = backends
        .context
        .durable
        .get_action(action.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ActionStatus::Completed);
    assert!(stored.completed_at.is_some());

    let session = manager.session(id).await.unwrap();
    assert_eq!(session.current_cycle, 1);
    assert_eq!(cycle_completions(&backends, id).await, vec![1]);

    let projection = manager.projection(id).await.unwrap();
    assert_eq!(projection.cycle, 1);
    assert_eq!(projection.players[&a].resources.wood, 525);
    assert_eq!(projection.players[&a].remaining_turns, 74);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn budget_of_one_completes_after_a_single_tick() {
    let mut config = test_config();
    config.cycle.total_cycles = 1;
    let (backends, manager) = engine_with(Arc::new(StubRules::new()), config);
    let (id, _, _) = start_two(&manager).await;

    run_ticks(&backends, 1).await;

    let session = manager.session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_cycle, 1);
    assert!(!backends.ephemeral.contains_key(&projection_key(id)).await);
    assert!(!manager.registry().is_running(id).await);
    assert_eq!(session_completions(&backends, id).await, 1);

    // Nothing more happens once the session is over.
    run_ticks(&backends, 3).await;
    assert_eq!(cycle_completions(&backends, id).await, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn replenishment_clamps_at_the_cap() {
    let (backends, manager) = engine();
    let (id, a, _) = start_two(&manager).await;

    let mut players = backends.context.durable.get_players(id).await.unwrap();
    let player = players.iter_mut().find(|p| p.player_id == a).unwrap();
    player.remaining_turns = 40;
    backends.context.durable.save_player(id, player).await.unwrap();

    let replenisher = TurnReplenisher::new(
        backends.context.clone(),
        Arc::clone(manager.registry()),
    );
    let report = replenisher.run_once().await.unwrap();
    assert_eq!(report.sessions, 1);

    let players = backends.context.durable.get_players(id).await.unwrap();
    assert!(players.iter().all(|p| p.remaining_turns == 75));

    let projection = manager.projection(id).await.unwrap();
    assert_eq!(projection.players[&a].remaining_turns, 75);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_action_is_recorded_and_leaves_projection_alone() {
    let rules = RulesFn::new(|action: &Action| {
        if matches!(action.parameters, ActionParameters::Trade { .. }) {
            Err(ActionExecutionFailure::new("not enough iron to trade"))
        } else {
            Ok(ActionOutcome::default())
        }
    });
    let (backends, manager) = engine_with(Arc::new(rules), test_config());
    let (id, a, _) = start_two(&manager).await;
    let before = manager.projection(id).await.unwrap().players[&a].clone();

    let action = Action::new(
        id,
        a,
        0,
        Phase::Action,
        ActionParameters::Trade {
            give: ResourceKind::Iron,
            give_amount: 500,
            receive: ResourceKind::Gold,
            receive_amount: 10,
        },
    );
    submit(&backends, &action).await;

    run_ticks(&backends, 1).await;

    let stored = backends
        .context
        .durable
        .get_action(action.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ActionStatus::Failed);
    assert!(!stored.error.unwrap_or_default().is_empty());

    let after = manager.projection(id).await.unwrap().players[&a].clone();
    assert_eq!(after.resources, before.resources);
    assert_eq!(after.remaining_turns, before.remaining_turns);

    let action_phase_done = backends.events.events_for(id).await.into_iter().any(|e| {
        matches!(
            e,
            LifecycleEvent::PhaseComplete {
                cycle: 0,
                phase: Phase::Action,
                ..
            }
        )
    });
    assert!(action_phase_done);

    manager.shutdown().await;
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn phases_repeat_in_cyclic_order() {
    let (backends, manager) = engine();
    let (id, _, _) = start_two(&manager).await;

    run_ticks(&backends, 3).await;
    manager.shutdown().await;

    let phases: Vec<(u64, Phase)> = backends
        .events
        .events_for(id)
        .await
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::PhaseComplete { cycle, phase, .. } => Some((cycle, phase)),
            _ => None,
        })
        .collect();
    let expected: Vec<(u64, Phase)> = (0..3)
        .flat_map(|c| Phase::ALL.into_iter().map(move |p| (c, p)))
        .collect();
    assert_eq!(phases, expected);

    let mut log = backends.durable.progress_log(id).await;
    log.dedup();
    for pair in log.windows(2) {
        let ((c0, p0), (c1, p1)) = (pair[0], pair[1]);
        let in_cycle = c1 == c0 && p0.next() == p1 && !p0.is_last();
        let rollover = c1 == c0 + 1 && p0.is_last() && p1 == Phase::Preparation;
        assert!(in_cycle || rollover, "{pair:?} breaks the phase cycle");
    }
}

#[tokio::test(start_paused = true)]
async fn action_statuses_only_move_forward() {
    let rules = RulesFn::new(|action: &Action| match action.parameters {
        ActionParameters::Pass => Err(ActionExecutionFailure::new("passing is not allowed")),
        _ => Ok(ActionOutcome::default()),
    });
    let (backends, manager) = engine_with(Arc::new(rules), test_config());
    let (id, a, b) = start_two(&manager).await;

    let mut actions = Vec::new();
    for (player, phase) in [(a, Phase::Preparation), (b, Phase::Action), (a, Phase::Resolution)] {
        actions.push(Action::new(
            id,
            player,
            0,
            phase,
            ActionParameters::Gather {
                resource: ResourceKind::Food,
                amount: 1,
            },
        ));
    }
    actions.push(Action::new(id, b, 0, Phase::AiResponse, ActionParameters::Pass));
    for action in &actions {
        submit(&backends, action).await;
    }

    run_ticks(&backends, 2).await;
    manager.shutdown().await;

    for action in &actions {
        let history = backends.durable.status_history(action.id).await;
        assert_eq!(history.len(), 3, "{history:?}");
        assert_eq!(history[0], ActionStatus::Pending);
        assert_eq!(history[1], ActionStatus::Processing);
        assert!(matches!(
            history[2],
            ActionStatus::Completed | ActionStatus::Failed
        ));
    }
}

#[tokio::test(start_paused = true)]
async fn ending_twice_matches_ending_once() {
    let (backends, manager) = engine();
    let (id, _, _) = start_two(&manager).await;
    run_ticks(&backends, 1).await;

    manager.end_session(id).await.unwrap();
    let first = manager.session(id).await.unwrap();
    manager.end_session(id).await.unwrap();
    let second = manager.session(id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.status, SessionStatus::Completed);
    assert!(!manager.registry().is_running(id).await);
    assert!(!backends.ephemeral.contains_key(&projection_key(id)).await);
    assert_eq!(session_completions(&backends, id).await, 1);

    run_ticks(&backends, 2).await;
    assert_eq!(cycle_completions(&backends, id).await, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn ending_waits_for_the_in_flight_tick() {
    struct Slow;

    #[async_trait]
    impl GameRules for Slow {
        async fn resolve(&self, _action: &Action) -> Result<ActionOutcome, ActionExecutionFailure> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ActionOutcome::default())
        }
    }

    let (backends, manager) = engine_with(Arc::new(Slow), test_config());
    let (id, a, _) = start_two(&manager).await;
    let action = Action::new(id, a, 0, Phase::Action, ActionParameters::Pass);
    submit(&backends, &action).await;

    // Land inside the rules call of the first tick.
    tokio::time::sleep(interval(&backends) + Duration::from_millis(50)).await;
    manager.end_session(id).await.unwrap();

    let stored = backends
        .context
        .durable
        .get_action(action.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ActionStatus::Completed);

    let session = manager.session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_cycle, 1);
    assert_eq!(cycle_completions(&backends, id).await, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn durable_outage_retries_the_same_cycle() {
    let (backends, manager) = engine();
    let (id, _, _) = start_two(&manager).await;

    backends.durable.set_available(false);
    run_ticks(&backends, 1).await;
    backends.durable.set_available(true);

    assert_eq!(manager.session(id).await.unwrap().current_cycle, 0);
    assert!(cycle_completions(&backends, id).await.is_empty());

    // Next tick lands at 2 intervals; we are at 1.5.
    tokio::time::sleep(interval(&backends)).await;
    assert_eq!(manager.session(id).await.unwrap().current_cycle, 1);
    assert_eq!(cycle_completions(&backends, id).await, vec![1]);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cache_outage_degrades_to_durable_and_recovers() {
    let (backends, manager) = engine();
    let (id, _, _) = start_two(&manager).await;

    backends.ephemeral.set_available(false);
    run_ticks(&backends, 1).await;
    assert_eq!(manager.session(id).await.unwrap().current_cycle, 1);

    // Readers fall back to the durable store while the cache is down.
    assert_eq!(manager.projection(id).await.unwrap().cycle, 1);

    backends.ephemeral.set_available(true);
    tokio::time::sleep(interval(&backends)).await;

    assert_eq!(manager.session(id).await.unwrap().current_cycle, 2);
    assert!(backends.ephemeral.contains_key(&projection_key(id)).await);
    assert_eq!(manager.projection(id).await.unwrap().cycle, 2);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn turns_stay_within_bounds() {
    let (backends, manager) = engine();
    let (id, a, _) = start_two(&manager).await;
    let max_turns = backends.context.config.turns.max_turns;

    let mut players = backends.context.durable.get_players(id).await.unwrap();
    let player = players.iter_mut().find(|p| p.player_id == a).unwrap();
    player.remaining_turns = 1;
    backends.context.durable.save_player(id, player).await.unwrap();
    // Out-of-band durable edit: drop the projection so the tick rebuilds it.
    backends
        .context
        .ephemeral
        .delete_key(&projection_key(id))
        .await
        .unwrap();

    // Three actions against one remaining turn.
    for _ in 0..3 {
        submit(&backends, &Action::new(id, a, 0, Phase::Action, ActionParameters::Pass)).await;
    }
    run_ticks(&backends, 1).await;

    let drained = backends.context.durable.get_players(id).await.unwrap();
    assert_eq!(
        drained.iter().find(|p| p.player_id == a).map(|p| p.remaining_turns),
        Some(0)
    );

    let replenisher = TurnReplenisher::new(
        backends.context.clone(),
        Arc::clone(manager.registry()),
    );
    for _ in 0..5 {
        replenisher.run_once().await.unwrap();
        let players = backends.context.durable.get_players(id).await.unwrap();
        assert!(players.iter().all(|p| p.remaining_turns <= max_turns));
    }

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn restarted_manager_resumes_from_durable_progress() {
    let (backends, manager) = engine();
    let (id, _, _) = start_two(&manager).await;
    run_ticks(&backends, 2).await;
    manager.shutdown().await;
    assert_eq!(manager.session(id).await.unwrap().current_cycle, 2);

    // Simulate a lost cache across the restart.
    backends
        .context
        .ephemeral
        .delete_key(&projection_key(id))
        .await
        .unwrap();

    let restarted = SessionManager::new(backends.context.clone());
    assert_eq!(restarted.resume_in_progress().await.unwrap(), 1);
    run_ticks(&backends, 1).await;

    assert_eq!(restarted.session(id).await.unwrap().current_cycle, 3);
    assert_eq!(cycle_completions(&backends, id).await, vec![1, 2, 3]);
    restarted.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn full_budget_runs_to_completion() {
    let (backends, manager) = engine();
    let (id, _, _) = start_two(&manager).await;
    let budget = backends.context.config.cycle.total_cycles;

    run_ticks(&backends, u32::try_from(budget).unwrap()).await;

    let session = manager.session(id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_cycle, budget);
    assert_eq!(
        cycle_completions(&backends, id).await,
        (1..=budget).collect::<Vec<_>>()
    );
    assert_eq!(session_completions(&backends, id).await, 1);
}

#[tokio::test]
async fn participant_bounds_are_enforced() {
    let (_backends, manager) = engine();

    let too_many: Vec<PlayerId> = (0..5).map(|_| PlayerId::new()).collect();
    assert!(matches!(
        manager.start_session(&too_many).await,
        Err(SessionError::InvalidParticipantCount { count: 5, min: 2, max: 4 })
    ));
    assert!(matches!(
        manager.start_session(&[]).await,
        Err(SessionError::InvalidParticipantCount { count: 0, .. })
    ));
    assert!(matches!(
        manager.end_session(SessionId::new()).await,
        Err(SessionError::SessionNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn unrecorded_completion_fails_the_action_on_the_next_tick() {
    let (backends, manager) = engine();
    let (id, a, _) = start_two(&manager).await;
    let action = Action::new(
        id,
        a,
        0,
        Phase::Action,
        ActionParameters::Gather {
            resource: ResourceKind::Gold,
            amount: 40,
        },
    );
    submit(&backends, &action).await;
    backends.durable.fail_next("complete_action", 1).await;

    run_ticks(&backends, 1).await;
    assert_eq!(manager.session(id).await.unwrap().current_cycle, 0);
    let stored = backends.context.durable.get_action(action.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ActionStatus::Processing);

    tokio::time::sleep(interval(&backends)).await;
    assert_eq!(manager.session(id).await.unwrap().current_cycle, 1);

    let stored = backends.context.durable.get_action(action.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ActionStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some(suzerain_core::phase::INTERRUPTED));
    assert_eq!(stored.result, None);
    assert_eq!(
        backends.durable.status_history(action.id).await,
        vec![ActionStatus::Pending, ActionStatus::Processing, ActionStatus::Failed]
    );

    // Neither store shows an effect for an action that did not complete.
    let starting = backends.context.config.starting.resources.gold;
    let max_turns = backends.context.config.turns.max_turns;
    let durable = backends.context.durable.get_players(id).await.unwrap();
    let player = durable.iter().find(|p| p.player_id == a).unwrap();
    assert_eq!(player.resources.gold, starting);
    assert_eq!(player.remaining_turns, max_turns);
    let projection = manager.projection(id).await.unwrap();
    assert_eq!(projection.players[&a].resources.gold, starting);
    assert_eq!(projection.players[&a].remaining_turns, max_turns);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replenishment_racing_session_end_leaves_no_projection() {
    struct Slow;

    #[async_trait]
    impl GameRules for Slow {
        async fn resolve(&self, _action: &Action) -> Result<ActionOutcome, ActionExecutionFailure> {
            tokio::time::sleep(Duration::from_millis(400)).await;
            Ok(ActionOutcome::default())
        }
    }

    let (backends, manager) = engine_with(Arc::new(Slow), test_config());
    let manager = Arc::new(manager);
    let (id, a, _) = start_two(&manager).await;
    submit(&backends, &Action::new(id, a, 0, Phase::Action, ActionParameters::Pass)).await;
    backends
        .durable
        .stall("replenish_turns", Duration::from_millis(900))
        .await;
    let replenisher =
        TurnReplenisher::new(backends.context.clone(), Arc::clone(manager.registry()));

    // Land inside the rules call of the first tick, then end the session
    // and replenish while that tick is still running.
    tokio::time::sleep(interval(&backends) + Duration::from_millis(100)).await;
    let ending = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.end_session(id).await })
    };
    tokio::task::yield_now().await;
    let report = replenisher.run_once().await.unwrap();
    ending.await.unwrap().unwrap();

    assert_eq!(report.sessions, 1);
    assert_eq!(report.players, 2);
    assert_eq!(manager.session(id).await.unwrap().status, SessionStatus::Completed);
    assert!(!backends.ephemeral.contains_key(&projection_key(id)).await);
    assert_eq!(session_completions(&backends, id).await, 1);

    // A later run finds nothing to credit and writes nothing.
    let report = replenisher.run_once().await.unwrap();
    assert_eq!(report.sessions, 0);
    assert!(!backends.ephemeral.contains_key(&projection_key(id)).await);
}
