//! Core entity structs: sessions, player state, cycles, and the ephemeral
//! projection.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::actions::PlayerDelta;
use crate::enums::{Phase, ResourceKind, SessionStatus};
use crate::ids::{ActionId, PlayerId, SessionId};

// ---------------------------------------------------------------------------
// Resource ledger
// ---------------------------------------------------------------------------

/// Fixed-schema ledger of the five resources a player holds.
///
/// Balances never go negative; applying a delta that would overdraw a
/// balance saturates at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResourceLedger {
    /// Gold balance.
    pub gold: u64,
    /// Food balance.
    pub food: u64,
    /// Wood balance.
    pub wood: u64,
    /// Stone balance.
    pub stone: u64,
    /// Iron balance.
    pub iron: u64,
}

impl ResourceLedger {
    /// Balance for one resource.
    pub const fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Gold => self.gold,
            ResourceKind::Food => self.food,
            ResourceKind::Wood => self.wood,
            ResourceKind::Stone => self.stone,
            ResourceKind::Iron => self.iron,
        }
    }

    const fn slot_mut(&mut self, kind: ResourceKind) -> &mut u64 {
        match kind {
            ResourceKind::Gold => &mut self.gold,
            ResourceKind::Food => &mut self.food,
            ResourceKind::Wood => &mut self.wood,
            ResourceKind::Stone => &mut self.stone,
            ResourceKind::Iron => &mut self.iron,
        }
    }

    /// Apply a signed adjustment to one balance, saturating at both ends.
    pub const fn adjust(&mut self, kind: ResourceKind, delta: i64) {
        let slot = self.slot_mut(kind);
        *slot = slot.saturating_add_signed(delta);
    }
}

// ---------------------------------------------------------------------------
// Player state
// ---------------------------------------------------------------------------

/// Per-player, per-session mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlayerState {
    /// The player this state belongs to.
    pub player_id: PlayerId,
    /// Turns the player may still spend. Always within `[0, max_turns]`.
    pub remaining_turns: u32,
    /// Resource balances.
    pub resources: ResourceLedger,
    /// Territories the player controls.
    pub territories: BTreeSet<String>,
    /// Unit type to unit count.
    pub units: BTreeMap<String, u64>,
    /// Achievements unlocked during the session.
    pub achievements: BTreeSet<String>,
    /// When the player's last action completed.
    pub last_action_at: Option<DateTime<Utc>>,
}

impl PlayerState {
    /// Initial state for a player joining a new session.
    pub const fn new(player_id: PlayerId, resources: ResourceLedger, turns: u32) -> Self {
        Self {
            player_id,
            remaining_turns: turns,
            resources,
            territories: BTreeSet::new(),
            units: BTreeMap::new(),
            achievements: BTreeSet::new(),
            last_action_at: None,
        }
    }

    /// Shallow-merge a completed action's delta into this state.
    ///
    /// Only the fields the delta mentions change. Resource and unit counts
    /// saturate at zero; turns consumed never push `remaining_turns` below
    /// zero.
    pub fn apply(&mut self, delta: &PlayerDelta, at: DateTime<Utc>) {
        for (&kind, &amount) in &delta.resources {
            self.resources.adjust(kind, amount);
        }

        self.remaining_turns = self.remaining_turns.saturating_sub(delta.turns_consumed);

        for territory in &delta.territories_lost {
            self.territories.remove(territory);
        }
        self.territories
            .extend(delta.territories_gained.iter().cloned());

        for (unit, &change) in &delta.units {
            let count = self.units.get(unit).copied().unwrap_or(0);
            let updated = count.saturating_add_signed(change);
            if updated == 0 {
                self.units.remove(unit);
            } else {
                self.units.insert(unit.clone(), updated);
            }
        }

        self.achievements
            .extend(delta.achievements.iter().cloned());

        self.last_action_at = Some(at);
    }
}

/// Turn count after crediting `allotment` to `current`, capped at
/// `max_turns`. A `current` already above the cap is pulled down to it.
pub const fn replenished_turns(current: u32, allotment: u32, max_turns: u32) -> u32 {
    let credited = current.saturating_add(allotment);
    if credited > max_turns {
        max_turns
    } else {
        credited
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The durable record of one playthrough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
    /// Index of the cycle that runs next (0-based).
    pub current_cycle: u64,
    /// Number of cycles after which the session completes.
    pub total_cycles: u64,
    /// Participants, in join order, without duplicates.
    pub players: Vec<PlayerId>,
    /// Phase the session is in (or will start the next cycle in).
    pub current_phase: Phase,
    /// Last time the cycle or phase changed.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A freshly started session at cycle 0, phase `Preparation`.
    pub fn start(players: Vec<PlayerId>, total_cycles: u64, at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::InProgress,
            started_at: at,
            current_cycle: 0,
            total_cycles,
            players,
            current_phase: Phase::Preparation,
            updated_at: at,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

/// Working record of one cycle while it runs.
///
/// Cycles are not persisted on their own; only the session's counter and
/// phase marker are. The scheduler returns this record from each tick so
/// callers and tests can see what ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Cycle {
    /// Cycle number (0-based).
    pub number: u64,
    /// When processing of the cycle began.
    pub started_at: DateTime<Utc>,
    /// Phase currently (or most recently) being processed.
    pub phase: Phase,
    /// Actions picked up but not yet finished.
    pub pending: Vec<ActionId>,
    /// Actions that completed successfully.
    pub completed: Vec<ActionId>,
    /// Actions whose resolution failed.
    pub failed: Vec<ActionId>,
}

impl Cycle {
    /// Begin cycle `number` in the `Preparation` phase.
    pub const fn begin(number: u64, at: DateTime<Utc>) -> Self {
        Self {
            number,
            started_at: at,
            phase: Phase::Preparation,
            pending: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Record that an action was picked up for dispatch.
    pub fn queue(&mut self, action_id: ActionId) {
        self.pending.push(action_id);
    }

    /// Move an action out of `pending` into `completed` or `failed`.
    pub fn finish(&mut self, action_id: ActionId, succeeded: bool) {
        self.pending.retain(|id| *id != action_id);
        if succeeded {
            self.completed.push(action_id);
        } else {
            self.failed.push(action_id);
        }
    }

    /// Drop an action from `pending` without recording an outcome (it was
    /// claimed elsewhere).
    pub fn release(&mut self, action_id: ActionId) {
        self.pending.retain(|id| *id != action_id);
    }
}

// ---------------------------------------------------------------------------
// Ephemeral projection
// ---------------------------------------------------------------------------

/// The low-latency view of a session held in the ephemeral store.
///
/// Rebuildable at any time from the durable session and player records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SessionProjection {
    /// Cycle index (never ahead of the durable record).
    pub cycle: u64,
    /// Current phase.
    pub phase: Phase,
    /// Player states keyed by player.
    pub players: BTreeMap<PlayerId, PlayerState>,
    /// Last time any field was written.
    pub updated_at: DateTime<Utc>,
}

impl SessionProjection {
    /// Build a projection from durable records.
    pub fn from_durable(session: &Session, players: Vec<PlayerState>) -> Self {
        Self {
            cycle: session.current_cycle,
            phase: session.current_phase,
            players: players.into_iter().map(|p| (p.player_id, p)).collect(),
            updated_at: session.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_player() -> PlayerState {
        PlayerState::new(
            PlayerId::new(),
            ResourceLedger {
                gold: 100,
                food: 50,
                wood: 0,
                stone: 10,
                iron: 0,
            },
            10,
        )
    }

    #[test]
    fn ledger_adjust_saturates_at_zero() {
        let mut ledger = ResourceLedger {
            gold: 5,
            ..ResourceLedger::default()
        };
        ledger.adjust(ResourceKind::Gold, -20);
        assert_eq!(ledger.gold, 0);
        ledger.adjust(ResourceKind::Iron, 7);
        assert_eq!(ledger.get(ResourceKind::Iron), 7);
    }

    #[test]
    fn apply_merges_only_mentioned_fields() {
        let mut player = sample_player();
        player.territories.insert(String::from("north-march"));
        player.units.insert(String::from("archer"), 4);

        let mut delta = PlayerDelta::default();
        delta.resources.insert(ResourceKind::Gold, -30);
        delta.resources.insert(ResourceKind::Wood, 12);
        delta.turns_consumed = 1;
        delta.territories_gained.insert(String::from("river-ford"));
        delta.units.insert(String::from("archer"), -4);
        delta.units.insert(String::from("pikeman"), 3);

        let now = Utc::now();
        player.apply(&delta, now);

        assert_eq!(player.resources.gold, 70);
        assert_eq!(player.resources.wood, 12);
        assert_eq!(player.resources.food, 50);
        assert_eq!(player.remaining_turns, 9);
        assert!(player.territories.contains("north-march"));
        assert!(player.territories.contains("river-ford"));
        assert!(!player.units.contains_key("archer"));
        assert_eq!(player.units.get("pikeman"), Some(&3));
        assert_eq!(player.last_action_at, Some(now));
    }

    #[test]
    fn turns_never_go_negative() {
        let mut player = sample_player();
        let delta = PlayerDelta {
            turns_consumed: 50,
            ..PlayerDelta::default()
        };
        player.apply(&delta, Utc::now());
        assert_eq!(player.remaining_turns, 0);
    }

    #[test]
    fn replenish_clamps_at_cap() {
        assert_eq!(replenished_turns(40, 50, 75), 75);
        assert_eq!(replenished_turns(10, 50, 75), 60);
        assert_eq!(replenished_turns(90, 50, 75), 75);
        assert_eq!(replenished_turns(u32::MAX, 50, 75), 75);
        assert_eq!(replenished_turns(replenished_turns(40, 50, 75), 50, 75), 75);
    }

    #[test]
    fn new_session_starts_at_cycle_zero() {
        let players = vec![PlayerId::new(), PlayerId::new()];
        let session = Session::start(players.clone(), 3, Utc::now());
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.current_cycle, 0);
        assert_eq!(session.current_phase, Phase::Preparation);
        assert_eq!(session.players, players);
    }

    #[test]
    fn cycle_tracks_action_references() {
        let mut cycle = Cycle::begin(2, Utc::now());
        let a = ActionId::new();
        let b = ActionId::new();
        let c = ActionId::new();
        cycle.queue(a);
        cycle.queue(b);
        cycle.queue(c);
        cycle.finish(a, true);
        cycle.finish(b, false);
        cycle.release(c);
        assert!(cycle.pending.is_empty());
        assert_eq!(cycle.completed, vec![a]);
        assert_eq!(cycle.failed, vec![b]);
    }
}
