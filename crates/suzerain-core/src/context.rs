//! Shared handles every engine component works through.

use std::sync::Arc;

use crate::config::SuzerainConfig;
use crate::memory::{MemoryDurableStore, MemoryEphemeralStore, RecordingEventBus};
use crate::rules::GameRules;
use crate::store::{DurableStore, EphemeralStore, EventBus};

/// Backends, rules, and configuration, bundled for cheap cloning into each
/// session's scheduler task.
#[derive(Clone)]
pub struct Context {
    /// Authoritative store.
    pub durable: Arc<dyn DurableStore>,
    /// Projection cache.
    pub ephemeral: Arc<dyn EphemeralStore>,
    /// Lifecycle notifications.
    pub events: Arc<dyn EventBus>,
    /// Action resolution.
    pub rules: Arc<dyn GameRules>,
    /// Engine configuration.
    pub config: Arc<SuzerainConfig>,
}

impl Context {
    /// Bundle the given collaborators.
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        events: Arc<dyn EventBus>,
        rules: Arc<dyn GameRules>,
        config: SuzerainConfig,
    ) -> Self {
        Self {
            durable,
            ephemeral,
            events,
            rules,
            config: Arc::new(config),
        }
    }
}

/// A [`Context`] wired to in-memory backends, with typed handles kept for
/// inspection.
pub struct MemoryBackends {
    /// The durable store behind `context.durable`.
    pub durable: Arc<MemoryDurableStore>,
    /// The cache behind `context.ephemeral`.
    pub ephemeral: Arc<MemoryEphemeralStore>,
    /// The bus behind `context.events`.
    pub events: Arc<RecordingEventBus>,
    /// The assembled context.
    pub context: Context,
}

impl MemoryBackends {
    /// Build in-memory backends around the given rules and configuration.
    pub fn new(rules: Arc<dyn GameRules>, config: SuzerainConfig) -> Self {
        let durable = Arc::new(MemoryDurableStore::new());
        let ephemeral = Arc::new(MemoryEphemeralStore::new());
        let events = Arc::new(RecordingEventBus::new());
        let context = Context::new(
            Arc::clone(&durable) as Arc<dyn DurableStore>,
            Arc::clone(&ephemeral) as Arc<dyn EphemeralStore>,
            Arc::clone(&events) as Arc<dyn EventBus>,
            rules,
            config,
        );
        Self {
            durable,
            ephemeral,
            events,
            context,
        }
    }
}
