mod claim;
mod csv;
pub mod export;
mod participant;
mod room;
mod summary;

pub use csv::CSV_HEADERS;
pub use participant::{hash_token, normalize_display_name, JoinedParticipant};
pub use room::{generate_join_code, join_code_matches, NewRoom, RoomPatch};
pub use summary::objective_progress;

use crate::config::Rules;
use crate::error::{AppError, AppResult};
use crate::types::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared application state
///
/// Locks are always taken in field order (rooms, participants, claims,
/// claim_request_ids, participant_tokens) so multi-collection writes cannot
/// deadlock.
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
    pub participants: Arc<RwLock<HashMap<ParticipantId, Participant>>>,
    pub claims: Arc<RwLock<HashMap<ClaimId, Claim>>>,
    /// Idempotency index (client_request_id -> claim id)
    pub claim_request_ids: Arc<RwLock<HashMap<String, ClaimId>>>,
    /// Token lookup index (token hash -> participant id)
    pub participant_tokens: Arc<RwLock<HashMap<String, ParticipantId>>>,
    pub rules: Rules,
    snapshot_path: Option<PathBuf>,
    /// Serializes snapshot writes
    persist_lock: Arc<Mutex<()>>,
    /// Snapshot writes failed since the last successful one
    snapshot_failures: Arc<AtomicU64>,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_rules(Rules::default())
    }

    pub fn with_rules(rules: Rules) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            participants: Arc::new(RwLock::new(HashMap::new())),
            claims: Arc::new(RwLock::new(HashMap::new())),
            claim_request_ids: Arc::new(RwLock::new(HashMap::new())),
            participant_tokens: Arc::new(RwLock::new(HashMap::new())),
            rules,
            snapshot_path: None,
            persist_lock: Arc::new(Mutex::new(())),
            snapshot_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Persist every mutation to this file
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn snapshot_path(&self) -> Option<&PathBuf> {
        self.snapshot_path.as_ref()
    }

    /// Consecutive failed snapshot writes (0 when healthy or memory-only)
    pub fn snapshot_failures(&self) -> u64 {
        self.snapshot_failures.load(Ordering::Relaxed)
    }

    /// Get a room or fail with NotFound
    pub async fn require_room(&self, room_id: &str) -> AppResult<Room> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("Room not found".to_string()))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Create a room and open it
    pub async fn open_room(state: &AppState, join_code: &str) -> Room {
        let room = state
            .create_room(NewRoom {
                name: "Salon Lyon".to_string(),
                join_code: Some(join_code.to_string()),
                objective_total: 20,
                rdv_value_cents: 15_000,
                signatures_goal: 5,
            })
            .await
            .unwrap();
        state.open_room(&room.id).await.unwrap()
    }

    /// Push a participant's last claim into the past so the cooldown is over
    pub async fn expire_cooldown(state: &AppState, participant_id: &str) {
        let mut participants = state.participants.write().await;
        let p = participants.get_mut(participant_id).unwrap();
        p.last_claim_at = p
            .last_claim_at
            .map(|t| t - state.rules.claim_cooldown - chrono::TimeDelta::seconds(1));
    }
}
