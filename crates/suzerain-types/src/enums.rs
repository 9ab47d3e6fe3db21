//! Enumeration types for the Suzerain cycle engine.
//!
//! Every enum here is persisted as text (in `PostgreSQL` columns and in the
//! `Dragonfly` projection hash), so each one carries an `as_str` form and a
//! matching [`FromStr`] implementation. The text forms are identical to the
//! serde representation.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Error returned when a stored enum value does not match any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending text.
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Lifecycle status of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum SessionStatus {
    /// Created but not yet scheduled.
    Pending,
    /// A scheduler is (or should be) driving the session.
    InProgress,
    /// The cycle budget was exhausted or the session was ended explicitly.
    Completed,
}

impl SessionStatus {
    /// Stored text form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(ParseEnumError::new("session status", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// One of the four phases every cycle runs through, in this exact order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum Phase {
    /// Upkeep before anyone acts.
    Preparation,
    /// Player-submitted actions resolve.
    Action,
    /// AI-controlled players respond to what happened.
    AiResponse,
    /// End-of-cycle resolution.
    Resolution,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 4] = [
        Self::Preparation,
        Self::Action,
        Self::AiResponse,
        Self::Resolution,
    ];

    /// The phase that follows this one, wrapping from `Resolution` back to
    /// `Preparation`.
    pub const fn next(self) -> Self {
        match self {
            Self::Preparation => Self::Action,
            Self::Action => Self::AiResponse,
            Self::AiResponse => Self::Resolution,
            Self::Resolution => Self::Preparation,
        }
    }

    /// Whether this is the final phase of a cycle.
    pub const fn is_last(self) -> bool {
        matches!(self, Self::Resolution)
    }

    /// Stored text form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparation => "PREPARATION",
            Self::Action => "ACTION",
            Self::AiResponse => "AI_RESPONSE",
            Self::Resolution => "RESOLUTION",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PREPARATION" => Ok(Self::Preparation),
            "ACTION" => Ok(Self::Action),
            "AI_RESPONSE" => Ok(Self::AiResponse),
            "RESOLUTION" => Ok(Self::Resolution),
            other => Err(ParseEnumError::new("phase", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Action status
// ---------------------------------------------------------------------------

/// Processing status of a queued action.
///
/// Transitions only move forward: `pending -> processing -> completed` or
/// `pending -> processing -> failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionStatus {
    /// Waiting for its cycle and phase.
    Pending,
    /// Claimed by an executor; the rules call is in flight.
    Processing,
    /// Resolved successfully; a result payload is attached.
    Completed,
    /// Resolution failed; an error description is attached.
    Failed,
}

impl ActionStatus {
    /// Whether moving from `self` to `next` is a legal single step.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed)
        )
    }

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stored text form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ParseEnumError::new("action status", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// The five resources tracked in every player's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ResourceKind {
    /// Currency.
    Gold,
    /// Feeds units and population.
    Food,
    /// Basic construction material.
    Wood,
    /// Fortification material.
    Stone,
    /// Weapons and advanced construction.
    Iron,
}

impl ResourceKind {
    /// All resource kinds in ledger order.
    pub const ALL: [Self; 5] = [Self::Gold, Self::Food, Self::Wood, Self::Stone, Self::Iron];
}

// ---------------------------------------------------------------------------
// Action types
// ---------------------------------------------------------------------------

/// Tag identifying what kind of action was submitted.
///
/// The scheduler never branches on this; it is stored alongside the action
/// for querying and handed through to the game-rules collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ActionType {
    /// Collect resources from owned territory.
    Gather,
    /// Exchange one resource for another.
    Trade,
    /// Construct a building in a territory.
    Build,
    /// Train units.
    Recruit,
    /// Move units between territories.
    Move,
    /// Attack a territory.
    Attack,
    /// Invest in a research topic.
    Research,
    /// Send a diplomatic proposal to another player.
    Diplomacy,
    /// Forfeit the action slot.
    Pass,
}

impl ActionType {
    /// Stored text form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "gather",
            Self::Trade => "trade",
            Self::Build => "build",
            Self::Recruit => "recruit",
            Self::Move => "move",
            Self::Attack => "attack",
            Self::Research => "research",
            Self::Diplomacy => "diplomacy",
            Self::Pass => "pass",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gather" => Ok(Self::Gather),
            "trade" => Ok(Self::Trade),
            "build" => Ok(Self::Build),
            "recruit" => Ok(Self::Recruit),
            "move" => Ok(Self::Move),
            "attack" => Ok(Self::Attack),
            "research" => Ok(Self::Research),
            "diplomacy" => Ok(Self::Diplomacy),
            "pass" => Ok(Self::Pass),
            other => Err(ParseEnumError::new("action type", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_cyclic() {
        let mut phase = Phase::Preparation;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(phase);
            phase = phase.next();
        }
        assert_eq!(
            seen,
            vec![
                Phase::Preparation,
                Phase::Action,
                Phase::AiResponse,
                Phase::Resolution,
                Phase::Preparation,
                Phase::Action,
                Phase::AiResponse,
                Phase::Resolution,
            ]
        );
        assert!(Phase::Resolution.is_last());
        assert!(!Phase::Action.is_last());
    }

    #[test]
    fn phase_all_matches_next_chain() {
        for pair in Phase::ALL.windows(2) {
            if let [a, b] = pair {
                assert_eq!(a.next(), *b);
            }
        }
    }

    #[test]
    fn action_status_only_moves_forward() {
        use ActionStatus::{Completed, Failed, Pending, Processing};

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
    }

    #[test]
    fn text_forms_match_serde() {
        for phase in Phase::ALL {
            let json = serde_json::to_string(&phase).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
            assert_eq!(phase.as_str().parse::<Phase>(), Ok(phase));
        }
        let json = serde_json::to_string(&SessionStatus::InProgress).unwrap_or_default();
        assert_eq!(json, "\"IN_PROGRESS\"");
        let json = serde_json::to_string(&ActionType::Diplomacy).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", ActionType::Diplomacy.as_str()));
    }

    #[test]
    fn unknown_text_is_rejected() {
        let err = "DAWN".parse::<Phase>();
        assert!(err.is_err());
        let err = "archived".parse::<ActionStatus>();
        assert_eq!(
            err,
            Err(ParseEnumError {
                kind: "action status",
                value: String::from("archived"),
            })
        );
    }
}
