//! Shared type definitions for the Suzerain cycle engine.
//!
//! Every crate in the workspace speaks these types: the data layer maps
//! them to rows and hash fields, the core engine schedules them, and
//! `ts-rs` exports them to `TypeScript` for client dashboards.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for sessions, players, and actions
//! - [`enums`] -- Session status, phases, action status, resources, action tags
//! - [`structs`] -- Sessions, player state, cycles, and the cached projection
//! - [`actions`] -- Queued actions, typed parameters, and outcomes
//! - [`events`] -- Lifecycle notifications for the event bus

pub mod actions;
pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use actions::{Action, ActionOutcome, ActionParameters, PlayerDelta};
pub use enums::{ActionStatus, ActionType, ParseEnumError, Phase, ResourceKind, SessionStatus};
pub use events::LifecycleEvent;
pub use ids::{ActionId, PlayerId, SessionId};
pub use structs::{
    Cycle, PlayerState, ResourceLedger, Session, SessionProjection, replenished_turns,
};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        use ts_rs::TS;

        let _ = crate::ids::SessionId::export_all();
        let _ = crate::ids::PlayerId::export_all();
        let _ = crate::ids::ActionId::export_all();

        let _ = crate::enums::SessionStatus::export_all();
        let _ = crate::enums::Phase::export_all();
        let _ = crate::enums::ActionStatus::export_all();
        let _ = crate::enums::ResourceKind::export_all();
        let _ = crate::enums::ActionType::export_all();

        let _ = crate::structs::ResourceLedger::export_all();
        let _ = crate::structs::PlayerState::export_all();
        let _ = crate::structs::Session::export_all();
        let _ = crate::structs::Cycle::export_all();
        let _ = crate::structs::SessionProjection::export_all();

        let _ = crate::actions::ActionParameters::export_all();
        let _ = crate::actions::PlayerDelta::export_all();
        let _ = crate::actions::ActionOutcome::export_all();
        let _ = crate::actions::Action::export_all();

        let _ = crate::events::LifecycleEvent::export_all();
    }
}
