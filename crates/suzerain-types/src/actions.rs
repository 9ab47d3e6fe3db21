//! Queued actions, their typed parameters, and resolution outcomes.
//!
//! Actions are inserted by an external submission service and consumed by
//! the cycle engine. The engine treats [`ActionParameters`] and the
//! `details` of an [`ActionOutcome`] as opaque; only the game-rules
//! collaborator interprets them. The [`PlayerDelta`] inside an outcome is
//! the one part the engine reads, to merge into the player's state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ActionStatus, ActionType, Phase, ResourceKind};
use crate::ids::{ActionId, PlayerId, SessionId};

/// Action-specific parameters.
///
/// Each variant corresponds to one [`ActionType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub enum ActionParameters {
    /// Parameters for [`ActionType::Gather`].
    Gather {
        /// Resource to collect.
        resource: ResourceKind,
        /// Amount requested.
        amount: u32,
    },
    /// Parameters for [`ActionType::Trade`].
    Trade {
        /// Resource paid.
        give: ResourceKind,
        /// Amount paid.
        give_amount: u32,
        /// Resource received.
        receive: ResourceKind,
        /// Amount received.
        receive_amount: u32,
    },
    /// Parameters for [`ActionType::Build`].
    Build {
        /// Territory to build in.
        territory: String,
        /// Structure to build.
        structure: String,
    },
    /// Parameters for [`ActionType::Recruit`].
    Recruit {
        /// Unit type to train.
        unit: String,
        /// Number of units.
        count: u32,
    },
    /// Parameters for [`ActionType::Move`].
    Move {
        /// Unit type to move.
        unit: String,
        /// Number of units.
        count: u32,
        /// Origin territory.
        from: String,
        /// Destination territory.
        to: String,
    },
    /// Parameters for [`ActionType::Attack`].
    Attack {
        /// Territory under attack.
        territory: String,
        /// Current owner, if any.
        defender: Option<PlayerId>,
    },
    /// Parameters for [`ActionType::Research`].
    Research {
        /// Research topic.
        topic: String,
    },
    /// Parameters for [`ActionType::Diplomacy`].
    Diplomacy {
        /// Player receiving the proposal.
        target: PlayerId,
        /// Proposal text.
        proposal: String,
    },
    /// Parameters for [`ActionType::Pass`].
    Pass,
}

impl ActionParameters {
    /// The tag matching this parameter variant.
    pub const fn action_type(&self) -> ActionType {
        match self {
            Self::Gather { .. } => ActionType::Gather,
            Self::Trade { .. } => ActionType::Trade,
            Self::Build { .. } => ActionType::Build,
            Self::Recruit { .. } => ActionType::Recruit,
            Self::Move { .. } => ActionType::Move,
            Self::Attack { .. } => ActionType::Attack,
            Self::Research { .. } => ActionType::Research,
            Self::Diplomacy { .. } => ActionType::Diplomacy,
            Self::Pass => ActionType::Pass,
        }
    }
}

/// Changes to apply to the acting player's state when an action completes.
///
/// Every field defaults to "no change"; merging is shallow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlayerDelta {
    /// Signed resource adjustments.
    #[serde(default)]
    pub resources: BTreeMap<ResourceKind, i64>,
    /// Turns spent by the action.
    #[serde(default)]
    pub turns_consumed: u32,
    /// Territories gained.
    #[serde(default)]
    pub territories_gained: BTreeSet<String>,
    /// Territories lost.
    #[serde(default)]
    pub territories_lost: BTreeSet<String>,
    /// Signed unit count adjustments by unit type.
    #[serde(default)]
    pub units: BTreeMap<String, i64>,
    /// Achievements unlocked.
    #[serde(default)]
    pub achievements: BTreeSet<String>,
}

impl PlayerDelta {
    /// Whether applying this delta would change nothing but the
    /// last-action timestamp.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
            && self.turns_consumed == 0
            && self.territories_gained.is_empty()
            && self.territories_lost.is_empty()
            && self.units.is_empty()
            && self.achievements.is_empty()
    }
}

/// Result payload attached to a completed action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActionOutcome {
    /// State changes for the acting player.
    #[serde(default)]
    pub delta: PlayerDelta,
    /// Short human-readable description.
    #[serde(default)]
    pub summary: String,
    /// Rules-specific detail, opaque to the engine.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A queued action targeted at one cycle and phase of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Action {
    /// Action identifier.
    pub id: ActionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Acting player.
    pub player_id: PlayerId,
    /// Cycle the action resolves in.
    pub cycle: u64,
    /// Phase the action resolves in.
    pub phase: Phase,
    /// Type tag.
    pub action_type: ActionType,
    /// Typed parameters.
    pub parameters: ActionParameters,
    /// Processing status.
    pub status: ActionStatus,
    /// Submission time; the primary dispatch ordering key.
    pub created_at: DateTime<Utc>,
    /// When the action reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload, present once completed.
    pub result: Option<ActionOutcome>,
    /// Failure description, present once failed.
    pub error: Option<String>,
}

impl Action {
    /// A new pending action submitted now.
    pub fn new(
        session_id: SessionId,
        player_id: PlayerId,
        cycle: u64,
        phase: Phase,
        parameters: ActionParameters,
    ) -> Self {
        Self {
            id: ActionId::new(),
            session_id,
            player_id,
            cycle,
            phase,
            action_type: parameters.action_type(),
            parameters,
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Override the submission time (for backfills and deterministic tests).
    #[must_use]
    pub const fn submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// The key actions within a phase are dispatched by: submission time,
    /// then identifier.
    pub const fn dispatch_key(&self) -> (DateTime<Utc>, ActionId) {
        (self.created_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_action_is_pending_and_tagged() {
        let action = Action::new(
            SessionId::new(),
            PlayerId::new(),
            0,
            Phase::Action,
            ActionParameters::Research {
                topic: String::from("masonry"),
            },
        );
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.action_type, ActionType::Research);
        assert!(action.result.is_none());
        assert!(action.error.is_none());
    }

    #[test]
    fn outcome_fields_default_when_absent() {
        let outcome: ActionOutcome =
            serde_json::from_str(r#"{"summary":"ok"}"#).unwrap_or_default();
        assert_eq!(outcome.summary, "ok");
        assert!(outcome.delta.is_empty());
        assert_eq!(outcome.details, serde_json::Value::Null);
    }

    #[test]
    fn dispatch_key_orders_by_time_then_id() {
        let session = SessionId::new();
        let player = PlayerId::new();
        let at = Utc::now();
        let a = Action::new(session, player, 0, Phase::Action, ActionParameters::Pass)
            .submitted_at(at);
        let b = Action::new(session, player, 0, Phase::Action, ActionParameters::Pass)
            .submitted_at(at);
        assert!(a.dispatch_key() < b.dispatch_key());
    }
}
