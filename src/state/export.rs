//! State export/import and snapshot-file persistence.
//!
//! The same serializable snapshot backs the admin export/import endpoints and
//! the optional on-disk file that is rewritten after every mutation.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::Ordering;

/// Schema version for export format compatibility
/// Version 1: rooms, participants, claims
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// A serializable snapshot of the whole ledger.
///
/// The idempotency index is not stored; it is rebuilt from the claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// Export timestamp (ISO8601)
    pub exported_at: String,
    #[serde(default)]
    pub rooms: HashMap<RoomId, Room>,
    #[serde(default)]
    pub participants: HashMap<ParticipantId, Participant>,
    #[serde(default)]
    pub claims: HashMap<ClaimId, Claim>,
}

impl LedgerSnapshot {
    pub fn new(
        rooms: HashMap<RoomId, Room>,
        participants: HashMap<ParticipantId, Participant>,
        claims: HashMap<ClaimId, Claim>,
    ) -> Self {
        Self {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            rooms,
            participants,
            claims,
        }
    }

    /// Validate the snapshot before import
    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > EXPORT_SCHEMA_VERSION {
            return Err(format!(
                "Export schema version {} is newer than supported version {}. \
                 Please update the server.",
                self.schema_version, EXPORT_SCHEMA_VERSION
            ));
        }

        for (id, room) in &self.rooms {
            if *id != room.id {
                return Err(format!("Room keyed '{}' has id '{}'", id, room.id));
            }
        }

        let mut name_keys = HashSet::new();
        let mut token_hashes = HashSet::new();
        for (id, p) in &self.participants {
            if *id != p.id {
                return Err(format!("Participant keyed '{}' has id '{}'", id, p.id));
            }
            if !self.rooms.contains_key(&p.room_id) {
                return Err(format!(
                    "Participant '{}' references room '{}' which doesn't exist",
                    id, p.room_id
                ));
            }
            if !name_keys.insert((p.room_id.as_str(), p.display_name_key.as_str())) {
                return Err(format!(
                    "Duplicate display name key '{}' in room '{}'",
                    p.display_name_key, p.room_id
                ));
            }
            if !token_hashes.insert(p.token_hash.as_str()) {
                return Err(format!("Participant '{}' reuses a token hash", id));
            }
        }

        let mut request_ids = HashSet::new();
        for (id, claim) in &self.claims {
            if *id != claim.id {
                return Err(format!("Claim keyed '{}' has id '{}'", id, claim.id));
            }
            let Some(participant) = self.participants.get(&claim.participant_id) else {
                return Err(format!(
                    "Claim '{}' references participant '{}' which doesn't exist",
                    id, claim.participant_id
                ));
            };
            if participant.room_id != claim.room_id {
                return Err(format!(
                    "Claim '{}' is in room '{}' but its participant is in room '{}'",
                    id, claim.room_id, participant.room_id
                ));
            }
            if !request_ids.insert(claim.client_request_id.as_str()) {
                return Err(format!(
                    "Duplicate client request id '{}'",
                    claim.client_request_id
                ));
            }
            if claim.status == ClaimStatus::Cancelled && claim.cancelled_by.is_none() {
                return Err(format!("Cancelled claim '{}' has no author", id));
            }
        }

        Ok(())
    }
}

impl AppState {
    /// Take a consistent snapshot of the whole ledger
    pub async fn export_state(&self) -> LedgerSnapshot {
        let rooms = self.rooms.read().await;
        let participants = self.participants.read().await;
        let claims = self.claims.read().await;

        LedgerSnapshot::new(rooms.clone(), participants.clone(), claims.clone())
    }

    /// Replace all state with a validated snapshot
    pub async fn import_state(&self, snapshot: LedgerSnapshot) -> AppResult<()> {
        self.replace_state(snapshot).await?;
        self.persist().await;
        Ok(())
    }

    /// Swap in a snapshot without persisting it again
    async fn replace_state(&self, snapshot: LedgerSnapshot) -> AppResult<()> {
        snapshot.validate().map_err(AppError::BadRequest)?;

        let request_ids: HashMap<String, ClaimId> = snapshot
            .claims
            .values()
            .map(|c| (c.client_request_id.clone(), c.id.clone()))
            .collect();
        let tokens: HashMap<String, ParticipantId> = snapshot
            .participants
            .values()
            .map(|p| (p.token_hash.clone(), p.id.clone()))
            .collect();

        let (room_count, participant_count, claim_count) = (
            snapshot.rooms.len(),
            snapshot.participants.len(),
            snapshot.claims.len(),
        );

        let mut rooms = self.rooms.write().await;
        let mut participants = self.participants.write().await;
        let mut claims = self.claims.write().await;
        let mut claim_request_ids = self.claim_request_ids.write().await;
        let mut participant_tokens = self.participant_tokens.write().await;

        *rooms = snapshot.rooms;
        *participants = snapshot.participants;
        *claims = snapshot.claims;
        *claim_request_ids = request_ids;
        *participant_tokens = tokens;

        tracing::info!(
            rooms = room_count,
            participants = participant_count,
            claims = claim_count,
            "State imported"
        );
        Ok(())
    }

    /// Build state from the snapshot file if it exists
    pub async fn load_snapshot(&self) -> AppResult<bool> {
        let Some(path) = self.snapshot_path() else {
            return Ok(false);
        };
        if !tokio::fs::try_exists(path).await? {
            tracing::info!(path = %path.display(), "No snapshot file yet, starting empty");
            return Ok(false);
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: LedgerSnapshot = serde_json::from_str(&raw)?;
        self.replace_state(snapshot).await?;
        tracing::info!(path = %path.display(), "Snapshot loaded");
        Ok(true)
    }

    /// Rewrite the snapshot file if one is configured.
    ///
    /// The in-memory state stays authoritative: a failed write does not fail
    /// the mutation. Failures are logged and counted until the next good write
    /// and `/healthz` reports the count.
    pub async fn persist(&self) {
        let Some(path) = self.snapshot_path() else {
            return;
        };

        let _guard = self.persist_lock.lock().await;
        let snapshot = self.export_state().await;
        match write_snapshot(path, &snapshot).await {
            Ok(()) => {
                let previous = self.snapshot_failures.swap(0, Ordering::Relaxed);
                if previous > 0 {
                    tracing::info!(path = %path.display(), previous, "Snapshot writes recovered");
                }
            }
            Err(e) => {
                let failures = self.snapshot_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(
                    path = %path.display(),
                    failures,
                    "Failed to write snapshot: {}",
                    e
                );
            }
        }
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_snapshot(path: &Path, snapshot: &LedgerSnapshot) -> AppResult<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
