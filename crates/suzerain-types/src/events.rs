//! Lifecycle notifications published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::Phase;
use crate::ids::SessionId;

/// A phase, cycle, or session lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum LifecycleEvent {
    /// A phase finished dispatching all of its actions.
    PhaseComplete {
        /// Session the phase belongs to.
        session_id: SessionId,
        /// Cycle the phase belongs to.
        cycle: u64,
        /// The phase that finished.
        phase: Phase,
        /// When it finished.
        timestamp: DateTime<Utc>,
    },
    /// All four phases ran and the cycle counter advanced.
    CycleComplete {
        /// Session that advanced.
        session_id: SessionId,
        /// The new cycle index after the increment.
        cycle_number: u64,
        /// When the advancement was persisted.
        timestamp: DateTime<Utc>,
    },
    /// The session reached `COMPLETED`.
    SessionComplete {
        /// Session that completed.
        session_id: SessionId,
        /// When it completed.
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// The session this event concerns.
    pub const fn session_id(&self) -> SessionId {
        match self {
            Self::PhaseComplete { session_id, .. }
            | Self::CycleComplete { session_id, .. }
            | Self::SessionComplete { session_id, .. } => *session_id,
        }
    }

    /// Short name used as the final subject token on the bus.
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::PhaseComplete { .. } => "phase",
            Self::CycleComplete { .. } => "cycle",
            Self::SessionComplete { .. } => "complete",
        }
    }
}
