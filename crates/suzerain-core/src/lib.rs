//! Cycle scheduling and dual-store synchronization for Suzerain sessions.
//!
//! Every active session is driven by its own [`CycleScheduler`]. Each tick
//! runs the four phases of the current cycle (Preparation, Action,
//! AI Response, Resolution) and then advances the cycle counter. Actions
//! queued for a phase are resolved one at a time by the [`GameRules`]
//! collaborator.
//!
//! State lives in two places: a durable store that is always right, and an
//! ephemeral projection that is fast and may be missing or behind. See
//! [`sync`] for the rules that keep them consistent.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `suzerain-config.yaml`.
//! - [`store`] -- [`DurableStore`], [`EphemeralStore`], and [`EventBus`]
//!   traits plus [`StoreError`].
//! - [`memory`] -- In-memory backends with fault toggles.
//! - [`rules`] -- [`GameRules`] trait, [`StubRules`], and [`RulesFn`].
//! - [`context`] -- The shared handle bundle.
//! - [`sync`] -- Projection layout, per-session slots, bounded store calls.
//! - [`executor`] -- One action from `pending` to terminal.
//! - [`phase`] -- One phase of one cycle.
//! - [`scheduler`] -- Tick logic, the periodic loop, and the registry.
//! - [`session`] -- [`SessionManager`]: start, end, resume.
//! - [`replenish`] -- [`TurnReplenisher`]: the daily turn top-up.
//!
//! [`CycleScheduler`]: scheduler::CycleScheduler
//! [`GameRules`]: rules::GameRules
//! [`StubRules`]: rules::StubRules
//! [`RulesFn`]: rules::RulesFn
//! [`DurableStore`]: store::DurableStore
//! [`EphemeralStore`]: store::EphemeralStore
//! [`EventBus`]: store::EventBus
//! [`StoreError`]: store::StoreError
//! [`SessionManager`]: session::SessionManager
//! [`TurnReplenisher`]: replenish::TurnReplenisher

pub mod config;
pub mod context;
pub mod executor;
pub mod memory;
pub mod phase;
pub mod replenish;
pub mod rules;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod sync;

pub use config::SuzerainConfig;
pub use context::{Context, MemoryBackends};
pub use replenish::{ReplenishReport, TurnReplenisher};
pub use rules::{ActionExecutionFailure, GameRules, RulesFn, StubRules};
pub use scheduler::{CycleScheduler, SchedulerRegistry, SchedulerState, TickError, TickOutcome};
pub use session::{SessionError, SessionManager};
pub use store::{DurableStore, EphemeralStore, EventBus, StoreError, StoreKind};
