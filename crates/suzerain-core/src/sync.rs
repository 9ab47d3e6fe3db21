//! Dual-store synchronization.
//!
//! The durable store is authoritative; the ephemeral store holds a
//! projection of each session that readers can use without touching the
//! durable store. The helpers here enforce the discipline every writer
//! follows:
//!
//! 1. Write the durable store first. A failure there is returned to the
//!    caller and aborts whatever it was doing.
//! 2. Mirror into the projection afterwards, best effort. A failure there
//!    is logged and marks the session's projection stale.
//! 3. Never trust a stale, missing, or undecodable projection: rebuild it
//!    from the durable store instead.
//!
//! Because the cache is only ever written after the durable store, the
//! projection's cycle index can lag the durable one but never lead it.
//!
//! # Projection layout
//!
//! One hash per session at `session:{id}:projection`:
//!
//! | Field | Encoding |
//! |-------|----------|
//! | `cycle` | decimal `u64` |
//! | `phase` | `PREPARATION`, `ACTION`, `AI_RESPONSE`, `RESOLUTION` |
//! | `players` | JSON array of player states |
//! | `updated_at` | RFC 3339 timestamp |

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use chrono::{DateTime, Utc};
use suzerain_types::{
    Phase, PlayerId, PlayerState, Session, SessionId, SessionProjection, SessionStatus,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::context::Context;
use crate::store::{StoreError, StoreKind};

/// Hash field holding the cycle index.
pub const FIELD_CYCLE: &str = "cycle";
/// Hash field holding the current phase.
pub const FIELD_PHASE: &str = "phase";
/// Hash field holding the serialized player states.
pub const FIELD_PLAYERS: &str = "players";
/// Hash field holding the last write time.
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// The ephemeral-store key of a session's projection.
pub fn projection_key(session_id: SessionId) -> String {
    format!("session:{session_id}:projection")
}

/// Errors decoding a projection hash.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// A required field is absent (partial write or eviction).
    #[error("projection field `{0}` is missing")]
    MissingField(&'static str),

    /// A field is present but does not decode.
    #[error("projection field `{field}` is malformed: {reason}")]
    Malformed {
        /// The offending field.
        field: &'static str,
        /// Decoder message.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Per-session slot
// ---------------------------------------------------------------------------

/// Mutable bookkeeping guarded by a [`SessionSlot`].
#[derive(Debug, Default)]
pub struct SlotState {
    /// Set when a projection write failed; the next reader must rebuild.
    pub projection_stale: bool,
}

/// Serializes every writer of one session's projection.
///
/// The scheduler holds the slot for a whole tick; the replenisher holds it
/// while it updates the session's players; termination holds it across the
/// durable completion and the projection delete. Nothing else writes the
/// projection. A default slot trusts the cached projection.
#[derive(Debug, Default)]
pub struct SessionSlot {
    guard: Mutex<SlotState>,
}

impl SessionSlot {
    /// A slot whose projection must be rebuilt before it is trusted.
    pub fn stale() -> Self {
        Self {
            guard: Mutex::new(SlotState {
                projection_stale: true,
            }),
        }
    }

    /// Wait for exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.guard.lock().await
    }
}

// ---------------------------------------------------------------------------
// Bounded store calls
// ---------------------------------------------------------------------------

async fn bounded<T>(
    ctx: &Context,
    store: StoreKind,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let infra = &ctx.config.infrastructure;
    tokio::time::timeout(infra.store_timeout(), call)
        .await
        .unwrap_or(Err(StoreError::Timeout {
            store,
            ms: infra.store_timeout_ms,
        }))
}

/// Run a durable-store call under the configured store timeout.
///
/// # Errors
///
/// Returns the call's own error, or [`StoreError::Timeout`].
pub async fn durable<T>(
    ctx: &Context,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    bounded(ctx, StoreKind::Durable, call).await
}

/// Run an ephemeral-store call under the configured store timeout.
///
/// # Errors
///
/// Returns the call's own error, or [`StoreError::Timeout`].
pub async fn ephemeral<T>(
    ctx: &Context,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    bounded(ctx, StoreKind::Ephemeral, call).await
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize player states for the `players` field.
///
/// # Errors
///
/// Returns the serializer error (not expected for well-formed states).
pub fn encode_players(
    players: &BTreeMap<PlayerId, PlayerState>,
) -> Result<String, serde_json::Error> {
    let ordered: Vec<&PlayerState> = players.values().collect();
    serde_json::to_string(&ordered)
}

/// Encode every field of a projection.
///
/// # Errors
///
/// Returns the serializer error from the `players` field.
pub fn encode_projection(
    projection: &SessionProjection,
) -> Result<[(&'static str, String); 4], serde_json::Error> {
    Ok([
        (FIELD_CYCLE, projection.cycle.to_string()),
        (FIELD_PHASE, projection.phase.as_str().to_owned()),
        (FIELD_PLAYERS, encode_players(&projection.players)?),
        (FIELD_UPDATED_AT, projection.updated_at.to_rfc3339()),
    ])
}

fn field<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> Result<&'a str, ProjectionError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(ProjectionError::MissingField(name))
}

fn malformed(field: &'static str, reason: impl ToString) -> ProjectionError {
    ProjectionError::Malformed {
        field,
        reason: reason.to_string(),
    }
}

/// Decode a projection hash.
///
/// # Errors
///
/// Returns [`ProjectionError`] if any field is missing or malformed.
pub fn decode_projection(
    fields: &HashMap<String, String>,
) -> Result<SessionProjection, ProjectionError> {
    let cycle = field(fields, FIELD_CYCLE)?
        .parse::<u64>()
        .map_err(|e| malformed(FIELD_CYCLE, e))?;
    let phase = field(fields, FIELD_PHASE)?
        .parse::<Phase>()
        .map_err(|e| malformed(FIELD_PHASE, e))?;
    let players: Vec<PlayerState> = serde_json::from_str(field(fields, FIELD_PLAYERS)?)
        .map_err(|e| malformed(FIELD_PLAYERS, e))?;
    let updated_at = DateTime::parse_from_rfc3339(field(fields, FIELD_UPDATED_AT)?)
        .map_err(|e| malformed(FIELD_UPDATED_AT, e))?
        .with_timezone(&Utc);

    Ok(SessionProjection {
        cycle,
        phase,
        players: players.into_iter().map(|p| (p.player_id, p)).collect(),
        updated_at,
    })
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Read a session's projection from the cache.
///
/// Returns `None` on a miss, a cache error, or an undecodable hash; all
/// three mean "rebuild from the durable store".
pub async fn read_projection(ctx: &Context, session_id: SessionId) -> Option<SessionProjection> {
    let key = projection_key(session_id);
    let fields = match ephemeral(ctx, ctx.ephemeral.read_fields(&key)).await {
        Ok(fields) => fields,
        Err(e) => {
            warn!(
                session_id = %session_id,
                error = %e,
                "Projection read failed; using durable store"
            );
            return None;
        }
    };
    if fields.is_empty() {
        debug!(session_id = %session_id, "Projection miss");
        return None;
    }
    match decode_projection(&fields) {
        Ok(projection) => Some(projection),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Discarding corrupt projection");
            None
        }
    }
}

/// A session and its projection, freshly built from the durable store.
#[derive(Debug, Clone)]
pub struct Rebuilt {
    /// The durable session record.
    pub session: Session,
    /// The projection derived from it.
    pub projection: SessionProjection,
}

/// Rebuild a session's projection from the durable store.
///
/// The durable reads are critical and their errors are returned. If the
/// session is still in progress the rebuilt projection is written back to
/// the cache (best effort); a fully successful write clears the stale flag.
/// Returns `Ok(None)` for an unknown session.
///
/// # Errors
///
/// Returns [`StoreError`] if either durable read fails.
pub async fn rebuild_projection(
    ctx: &Context,
    slot: &mut SlotState,
    session_id: SessionId,
) -> Result<Option<Rebuilt>, StoreError> {
    let Some(session) = durable(ctx, ctx.durable.get_session(session_id)).await? else {
        return Ok(None);
    };
    let players = durable(ctx, ctx.durable.get_players(session_id)).await?;
    let projection = SessionProjection::from_durable(&session, players);

    if session.status == SessionStatus::InProgress
        && write_projection(ctx, slot, session_id, &projection).await
    {
        slot.projection_stale = false;
    }

    debug!(
        session_id = %session_id,
        cycle = projection.cycle,
        phase = %projection.phase,
        "Rebuilt projection from durable store"
    );
    Ok(Some(Rebuilt {
        session,
        projection,
    }))
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Write one projection field, best effort.
///
/// Returns whether the write landed. A failure is logged at `warn` and
/// marks the projection stale.
pub async fn write_field(
    ctx: &Context,
    slot: &mut SlotState,
    session_id: SessionId,
    field: &'static str,
    value: &str,
) -> bool {
    let key = projection_key(session_id);
    match ephemeral(ctx, ctx.ephemeral.write_field(&key, field, value)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                session_id = %session_id,
                field,
                error = %e,
                "Projection write failed; marking stale"
            );
            slot.projection_stale = true;
            false
        }
    }
}

/// Write every field of a projection, stopping at the first failure.
pub async fn write_projection(
    ctx: &Context,
    slot: &mut SlotState,
    session_id: SessionId,
    projection: &SessionProjection,
) -> bool {
    let fields = match encode_projection(projection) {
        Ok(fields) => fields,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Projection encode failed; marking stale");
            slot.projection_stale = true;
            return false;
        }
    };
    for (name, value) in fields {
        if !write_field(ctx, slot, session_id, name, &value).await {
            return false;
        }
    }
    true
}

/// Mirror the player map (and the write time) into the projection.
pub async fn write_players(
    ctx: &Context,
    slot: &mut SlotState,
    session_id: SessionId,
    projection: &SessionProjection,
) -> bool {
    let encoded = match encode_players(&projection.players) {
        Ok(encoded) => encoded,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Player encode failed; marking stale");
            slot.projection_stale = true;
            return false;
        }
    };
    write_field(ctx, slot, session_id, FIELD_PLAYERS, &encoded).await
        && write_field(
            ctx,
            slot,
            session_id,
            FIELD_UPDATED_AT,
            &projection.updated_at.to_rfc3339(),
        )
        .await
}

/// Delete a session's projection, best effort.
pub async fn drop_projection(ctx: &Context, session_id: SessionId) -> bool {
    let key = projection_key(session_id);
    match ephemeral(ctx, ctx.ephemeral.delete_key(&key)).await {
        Ok(()) => true,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Projection delete failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SuzerainConfig;
    use crate::context::MemoryBackends;
    use crate::rules::StubRules;
    use suzerain_types::ResourceLedger;

    fn backends() -> MemoryBackends {
        MemoryBackends::new(Arc::new(StubRules::new()), SuzerainConfig::default())
    }

    fn sample_projection() -> SessionProjection {
        let player = PlayerState::new(PlayerId::new(), ResourceLedger::default(), 75);
        SessionProjection {
            cycle: 12,
            phase: Phase::AiResponse,
            players: BTreeMap::from([(player.player_id, player)]),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn key_follows_session_pattern() {
        let id = SessionId::new();
        assert_eq!(projection_key(id), format!("session:{id}:projection"));
    }

    #[test]
    fn projection_decodes_what_it_encodes() {
        let projection = sample_projection();
        let Ok(fields) = encode_projection(&projection) else {
            panic!("projection should encode");
        };
        let map: HashMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v))
            .collect();
        let Ok(decoded) = decode_projection(&map) else {
            panic!("projection should decode");
        };
        assert_eq!(decoded.cycle, 12);
        assert_eq!(decoded.phase, Phase::AiResponse);
        assert_eq!(decoded.players, projection.players);
    }

    #[test]
    fn partial_hash_is_reported_missing() {
        let map = HashMap::from([(FIELD_CYCLE.to_owned(), "3".to_owned())]);
        assert!(matches!(
            decode_projection(&map),
            Err(ProjectionError::MissingField(FIELD_PHASE))
        ));
    }

    #[tokio::test]
    async fn corrupt_projection_reads_as_miss() {
        let backends = backends();
        let id = SessionId::new();
        backends
            .ephemeral
            .poke(&projection_key(id), FIELD_CYCLE, "not-a-number")
            .await;
        assert!(read_projection(&backends.context, id).await.is_none());
    }

    #[tokio::test]
    async fn failed_write_marks_slot_stale() {
        let backends = backends();
        let mut slot = SlotState::default();
        backends.ephemeral.set_available(false);
        let landed = write_projection(
            &backends.context,
            &mut slot,
            SessionId::new(),
            &sample_projection(),
        )
        .await;
        assert!(!landed);
        assert!(slot.projection_stale);
    }

    #[tokio::test]
    async fn rebuild_restores_cache_and_clears_stale_flag() {
        let backends = backends();
        let player = PlayerState::new(PlayerId::new(), ResourceLedger::default(), 75);
        let session = Session::start(vec![player.player_id], 10, Utc::now());
        backends
            .context
            .durable
            .insert_session(&session, std::slice::from_ref(&player))
            .await
            .ok();

        let mut slot = SlotState {
            projection_stale: true,
        };
        let rebuilt = rebuild_projection(&backends.context, &mut slot, session.id).await;
        let Ok(Some(rebuilt)) = rebuilt else {
            panic!("session should rebuild");
        };
        assert_eq!(rebuilt.projection.cycle, 0);
        assert!(!slot.projection_stale);

        let cached = read_projection(&backends.context, session.id).await;
        assert_eq!(cached.map(|p| p.players.len()), Some(1));
    }

    #[tokio::test]
    async fn rebuild_of_unknown_session_is_none() {
        let backends = backends();
        let mut slot = SlotState::default();
        let rebuilt = rebuild_projection(&backends.context, &mut slot, SessionId::new()).await;
        assert!(matches!(rebuilt, Ok(None)));
    }
}
