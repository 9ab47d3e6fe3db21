//! In-process store and bus implementations.
//!
//! These back the engine in tests and local runs without infrastructure.
//! Each one carries a fault toggle so callers can simulate an outage. The
//! durable store can also fail or stall individual operations, and keeps a
//! log of every action status and session progress write so ordering
//! properties can be checked after the fact.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suzerain_types::{
    Action, ActionId, ActionOutcome, ActionStatus, LifecycleEvent, Phase, PlayerId, PlayerState,
    Session, SessionId, SessionStatus, replenished_turns,
};
use tokio::sync::Mutex;

use crate::store::{DurableStore, EphemeralStore, EventBus, StoreError};

#[derive(Debug, Default)]
struct DurableState {
    sessions: BTreeMap<SessionId, Session>,
    players: HashMap<SessionId, BTreeMap<PlayerId, PlayerState>>,
    actions: HashMap<ActionId, Action>,
    status_log: Vec<(ActionId, ActionStatus)>,
    progress_log: Vec<(SessionId, u64, Phase)>,
}

impl DurableState {
    fn record_status(&mut self, action_id: ActionId, status: ActionStatus) {
        self.status_log.push((action_id, status));
    }

    /// Apply a forward status transition if the action is currently `from`.
    fn transition(
        &mut self,
        action_id: ActionId,
        from: ActionStatus,
        apply: impl FnOnce(&mut Action),
    ) -> bool {
        let Some(action) = self.actions.get_mut(&action_id) else {
            return false;
        };
        if action.status != from {
            return false;
        }
        apply(action);
        let status = action.status;
        self.record_status(action_id, status);
        true
    }
}

/// Injected misbehavior, keyed by [`DurableStore`] method name.
#[derive(Debug, Default)]
struct Faults {
    failures: HashMap<&'static str, u32>,
    stalls: HashMap<&'static str, Duration>,
}

/// A [`DurableStore`] held in memory.
#[derive(Debug)]
pub struct MemoryDurableStore {
    state: Mutex<DurableState>,
    faults: Mutex<Faults>,
    available: AtomicBool,
}

impl Default for MemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDurableStore {
    /// An empty, available store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DurableState::default()),
            faults: Mutex::new(Faults::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While unavailable every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the next `times` calls to `operation` fail as if the store were
    /// down. `operation` is the [`DurableStore`] method name.
    pub async fn fail_next(&self, operation: &'static str, times: u32) {
        self.faults.lock().await.failures.insert(operation, times);
    }

    /// Delay every reply from `operation` by `delay`. The call's effect
    /// lands straight away; only the caller is kept waiting.
    pub async fn stall(&self, operation: &'static str, delay: Duration) {
        self.faults.lock().await.stalls.insert(operation, delay);
    }

    async fn enter(&self, operation: &'static str) -> Result<(), StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::durable("memory store switched off"));
        }
        let mut faults = self.faults.lock().await;
        match faults.failures.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                Err(StoreError::durable(format!("injected {operation} failure")))
            }
            _ => Ok(()),
        }
    }

    /// Run one store call through the availability toggle and any
    /// injected faults.
    async fn guarded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        self.enter(operation).await?;
        let result = call.await;
        let stall = self.faults.lock().await.stalls.get(operation).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        result
    }

    /// Every status an action has been stamped with, in order, starting
    /// with the status it was inserted with.
    pub async fn status_history(&self, action_id: ActionId) -> Vec<ActionStatus> {
        self.state
            .lock()
            .await
            .status_log
            .iter()
            .filter(|(id, _)| *id == action_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Action IDs in the order they were claimed.
    pub async fn claim_order(&self) -> Vec<ActionId> {
        self.state
            .lock()
            .await
            .status_log
            .iter()
            .filter(|(_, status)| *status == ActionStatus::Processing)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every `(cycle, phase)` progress write for a session, in order.
    pub async fn progress_log(&self, session_id: SessionId) -> Vec<(u64, Phase)> {
        self.state
            .lock()
            .await
            .progress_log
            .iter()
            .filter(|(id, _, _)| *id == session_id)
            .map(|(_, cycle, phase)| (*cycle, *phase))
            .collect()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn insert_session(
        &self,
        session: &Session,
        players: &[PlayerState],
    ) -> Result<(), StoreError> {
        self.guarded("insert_session", async {
            let mut state = self.state.lock().await;
            if state.sessions.contains_key(&session.id) {
                return Err(StoreError::durable(format!(
                    "session {} already exists",
                    session.id
                )));
            }
            state.sessions.insert(session.id, session.clone());
            state.players.insert(
                session.id,
                players.iter().map(|p| (p.player_id, p.clone())).collect(),
            );
            Ok(())
        })
        .await
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        self.guarded("get_session", async {
            Ok(self.state.lock().await.sessions.get(&session_id).cloned())
        })
        .await
    }

    async fn update_session_progress(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.guarded("update_session_progress", async {
            let mut state = self.state.lock().await;
            let Some(session) = state.sessions.get_mut(&session_id) else {
                return Ok(false);
            };
            if session.status != SessionStatus::InProgress {
                return Ok(false);
            }
            session.current_cycle = cycle;
            session.current_phase = phase;
            session.updated_at = at;
            state.progress_log.push((session_id, cycle, phase));
            Ok(true)
        })
        .await
    }

    async fn complete_session(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.guarded("complete_session", async {
            let mut state = self.state.lock().await;
            let Some(session) = state.sessions.get_mut(&session_id) else {
                return Ok(false);
            };
            if session.status == SessionStatus::Completed {
                return Ok(false);
            }
            session.status = SessionStatus::Completed;
            session.updated_at = at;
            Ok(true)
        })
        .await
    }

    async fn list_in_progress(
        &self,
        after: Option<SessionId>,
        limit: u32,
    ) -> Result<Vec<SessionId>, StoreError> {
        self.guarded("list_in_progress", async {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            let state = self.state.lock().await;
            Ok(state
                .sessions
                .values()
                .filter(|s| s.status == SessionStatus::InProgress)
                .filter(|s| after.is_none_or(|a| s.id > a))
                .map(|s| s.id)
                .take(limit)
                .collect())
        })
        .await
    }

    async fn get_players(&self, session_id: SessionId) -> Result<Vec<PlayerState>, StoreError> {
        self.guarded("get_players", async {
            Ok(self
                .state
                .lock()
                .await
                .players
                .get(&session_id)
                .map(|players| players.values().cloned().collect())
                .unwrap_or_default())
        })
        .await
    }

    async fn save_player(
        &self,
        session_id: SessionId,
        player: &PlayerState,
    ) -> Result<(), StoreError> {
        self.guarded("save_player", async {
            self.state
                .lock()
                .await
                .players
                .entry(session_id)
                .or_default()
                .insert(player.player_id, player.clone());
            Ok(())
        })
        .await
    }

    async fn replenish_turns(
        &self,
        session_id: SessionId,
        allotment: u32,
        max_turns: u32,
    ) -> Result<Vec<PlayerState>, StoreError> {
        self.guarded("replenish_turns", async {
            let mut state = self.state.lock().await;
            let live = state
                .sessions
                .get(&session_id)
                .is_some_and(|s| s.status == SessionStatus::InProgress);
            if !live {
                return Ok(Vec::new());
            }
            let Some(players) = state.players.get_mut(&session_id) else {
                return Ok(Vec::new());
            };
            for player in players.values_mut() {
                player.remaining_turns =
                    replenished_turns(player.remaining_turns, allotment, max_turns);
            }
            Ok(players.values().cloned().collect())
        })
        .await
    }

    async fn insert_action(&self, action: &Action) -> Result<(), StoreError> {
        self.guarded("insert_action", async {
            let mut state = self.state.lock().await;
            if state.actions.contains_key(&action.id) {
                return Err(StoreError::durable(format!(
                    "action {} already exists",
                    action.id
                )));
            }
            state.actions.insert(action.id, action.clone());
            state.record_status(action.id, action.status);
            Ok(())
        })
        .await
    }

    async fn pending_actions(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
    ) -> Result<Vec<Action>, StoreError> {
        self.guarded("pending_actions", async {
            let state = self.state.lock().await;
            let mut pending: Vec<Action> = state
                .actions
                .values()
                .filter(|a| {
                    a.session_id == session_id
                        && a.cycle == cycle
                        && a.phase == phase
                        && a.status == ActionStatus::Pending
                })
                .cloned()
                .collect();
            pending.sort_by_key(Action::dispatch_key);
            Ok(pending)
        })
        .await
    }

    async fn claim_action(&self, action_id: ActionId) -> Result<bool, StoreError> {
        self.guarded("claim_action", async {
            let mut state = self.state.lock().await;
            Ok(state.transition(action_id, ActionStatus::Pending, |action| {
                action.status = ActionStatus::Processing;
            }))
        })
        .await
    }

    async fn complete_action(
        &self,
        action_id: ActionId,
        outcome: &ActionOutcome,
        player: Option<&PlayerState>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.guarded("complete_action", async {
            let mut state = self.state.lock().await;
            let mut session_id = None;
            let stamped = state.transition(action_id, ActionStatus::Processing, |action| {
                action.status = ActionStatus::Completed;
                action.result = Some(outcome.clone());
                action.completed_at = Some(at);
                session_id = Some(action.session_id);
            });
            if let (Some(session_id), Some(player)) = (session_id, player) {
                state
                    .players
                    .entry(session_id)
                    .or_default()
                    .insert(player.player_id, player.clone());
            }
            Ok(stamped)
        })
        .await
    }

    async fn fail_action(
        &self,
        action_id: ActionId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.guarded("fail_action", async {
            let mut state = self.state.lock().await;
            Ok(state.transition(action_id, ActionStatus::Processing, |action| {
                action.status = ActionStatus::Failed;
                action.error = Some(error.to_owned());
                action.completed_at = Some(at);
            }))
        })
        .await
    }

    async fn fail_interrupted(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActionId>, StoreError> {
        self.guarded("fail_interrupted", async {
            let mut state = self.state.lock().await;
            let mut stuck: Vec<(DateTime<Utc>, ActionId)> = state
                .actions
                .values()
                .filter(|a| {
                    a.session_id == session_id
                        && a.cycle == cycle
                        && a.phase == phase
                        && a.status == ActionStatus::Processing
                })
                .map(Action::dispatch_key)
                .collect();
            stuck.sort_unstable();

            let mut failed = Vec::with_capacity(stuck.len());
            for (_, action_id) in stuck {
                let moved = state.transition(action_id, ActionStatus::Processing, |action| {
                    action.status = ActionStatus::Failed;
                    action.error = Some(error.to_owned());
                    action.completed_at = Some(at);
                });
                if moved {
                    failed.push(action_id);
                }
            }
            Ok(failed)
        })
        .await
    }

    async fn get_action(&self, action_id: ActionId) -> Result<Option<Action>, StoreError> {
        self.guarded("get_action", async {
            Ok(self.state.lock().await.actions.get(&action_id).cloned())
        })
        .await
    }
}

/// An [`EphemeralStore`] held in memory.
#[derive(Debug)]
pub struct MemoryEphemeralStore {
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    available: AtomicBool,
}

impl Default for MemoryEphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEphemeralStore {
    /// An empty, available store.
    pub fn new() -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle availability. While unavailable every call fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::ephemeral("memory cache switched off"))
        }
    }

    /// Whether `key` currently exists, regardless of availability.
    pub async fn contains_key(&self, key: &str) -> bool {
        self.hashes.lock().await.contains_key(key)
    }

    /// Overwrite one field directly, bypassing the availability toggle.
    pub async fn poke(&self, key: &str, field: &str, value: &str) {
        self.hashes
            .lock()
            .await
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        Ok(self
            .hashes
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn write_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.poke(key, field, value).await;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.hashes.lock().await.remove(key);
        Ok(())
    }
}

/// An [`EventBus`] that keeps every published event.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingEventBus {
    /// An empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub async fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().await.clone()
    }

    /// Events concerning one session, in order.
    pub async fn events_for(&self, session_id: SessionId) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.session_id() == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: &LifecycleEvent) {
        self.events.lock().await.push(event.clone());
    }
}
