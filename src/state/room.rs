use super::AppState;
use crate::error::{AppError, AppResult};
use crate::types::*;
use rand::Rng;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Safe character set for join codes (excludes 0/O, 1/I/L to avoid confusion)
const JOIN_CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const JOIN_CODE_LENGTH: usize = 4;

/// Room ids end up in URLs, keep them lowercase
const ROOM_ID_CHARS: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";
const ROOM_ID_LENGTH: usize = 6;

const MAX_ROOM_NAME_CHARS: usize = 80;

fn generate_code(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// Generate a random join code (4 characters)
pub fn generate_join_code() -> String {
    generate_code(JOIN_CODE_CHARS, JOIN_CODE_LENGTH)
}

/// Read a count from a number or a numeric string ("20", "20 RDV").
/// Anything else, negatives included, counts as 0.
fn lenient_count<T: TryFrom<u64> + Default>(value: &Value) -> T {
    let n = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64)),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().ok()
        }
        _ => None,
    };
    n.and_then(|n| T::try_from(n).ok()).unwrap_or_default()
}

fn deserialize_count<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    Ok(lenient_count(&Value::deserialize(deserializer)?))
}

fn deserialize_count_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + Default,
{
    Ok(Some(lenient_count(&Value::deserialize(deserializer)?)))
}

/// Parameters for a new room
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    pub name: String,
    #[serde(default)]
    pub join_code: Option<String>,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub objective_total: u32,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub rdv_value_cents: u64,
    #[serde(default, deserialize_with = "deserialize_count")]
    pub signatures_goal: u32,
}

/// Partial room update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_count_opt")]
    pub objective_total: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_count_opt")]
    pub rdv_value_cents: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_count_opt")]
    pub signatures_goal: Option<u32>,
    pub join_code: Option<String>,
    pub status: Option<RoomStatus>,
}

impl RoomPatch {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.objective_total.is_none()
            && self.rdv_value_cents.is_none()
            && self.signatures_goal.is_none()
            && self.join_code.is_none()
            && self.status.is_none()
    }
}

fn clean_room_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Room name is required".to_string()));
    }
    if name.chars().count() > MAX_ROOM_NAME_CHARS {
        return Err(AppError::BadRequest(format!(
            "Room name must be at most {} characters",
            MAX_ROOM_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

fn clean_join_code(code: &str) -> AppResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::BadRequest("Join code cannot be empty".to_string()));
    }
    Ok(code.to_uppercase())
}

/// Join codes are typed on phones, compare them loosely
pub fn join_code_matches(expected: &str, given: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(given.trim())
}

impl AppState {
    /// Check if a room status transition is valid
    pub fn is_valid_room_transition(from: RoomStatus, to: RoomStatus) -> bool {
        use RoomStatus::*;

        match (from, to) {
            (Draft, Open) => true,
            (Open, Closed) => true,
            (Closed, Open) => true,
            // Archive from anywhere except itself
            (Draft | Open | Closed, Archived) => true,
            _ => false,
        }
    }

    /// Apply a status change to a room in place, stamping the matching timestamp
    fn apply_transition(room: &mut Room, to: RoomStatus) -> AppResult<()> {
        if !Self::is_valid_room_transition(room.status, to) {
            return Err(AppError::InvalidState(format!(
                "Cannot move room from {:?} to {:?}",
                room.status, to
            )));
        }

        let now = chrono::Utc::now();
        match to {
            RoomStatus::Open => room.opened_at = Some(now),
            RoomStatus::Closed => room.closed_at = Some(now),
            RoomStatus::Archived => room.archived_at = Some(now),
            RoomStatus::Draft => {}
        }
        room.status = to;
        Ok(())
    }

    /// Create a new room in DRAFT
    pub async fn create_room(&self, new_room: NewRoom) -> AppResult<Room> {
        let name = clean_room_name(&new_room.name)?;
        let join_code = match new_room.join_code.as_deref() {
            Some(code) if !code.trim().is_empty() => clean_join_code(code)?,
            _ => generate_join_code(),
        };

        let room = {
            let mut rooms = self.rooms.write().await;

            // Generate a unique room id (check for collisions)
            let id = loop {
                let id = generate_code(ROOM_ID_CHARS, ROOM_ID_LENGTH);
                if !rooms.contains_key(&id) {
                    break id;
                }
            };

            let room = Room {
                id,
                name,
                status: RoomStatus::Draft,
                join_code,
                objective_total: new_room.objective_total,
                rdv_value_cents: new_room.rdv_value_cents,
                signatures_goal: new_room.signatures_goal,
                created_at: chrono::Utc::now(),
                opened_at: None,
                closed_at: None,
                archived_at: None,
            };
            rooms.insert(room.id.clone(), room.clone());
            room
        };

        tracing::info!(room_id = %room.id, name = %room.name, "Room created");
        self.persist().await;
        Ok(room)
    }

    /// All rooms with participant and valid claim counts, newest first
    pub async fn list_rooms(&self) -> Vec<RoomOverview> {
        let rooms = self.rooms.read().await;
        let participants = self.participants.read().await;
        let claims = self.claims.read().await;

        let mut overviews: Vec<RoomOverview> = rooms
            .values()
            .map(|room| RoomOverview {
                room: room.clone(),
                participant_count: participants
                    .values()
                    .filter(|p| p.room_id == room.id)
                    .count(),
                valid_claims: claims
                    .values()
                    .filter(|c| c.room_id == room.id && c.is_valid())
                    .count() as u64,
            })
            .collect();

        overviews.sort_by(|a, b| b.room.created_at.cmp(&a.room.created_at));
        overviews
    }

    /// Update editable room fields
    pub async fn update_room(&self, room_id: &str, patch: RoomPatch) -> AppResult<Room> {
        if patch.is_empty() {
            return Err(AppError::BadRequest(
                "No valid fields to update".to_string(),
            ));
        }

        let name = patch.name.as_deref().map(clean_room_name).transpose()?;
        let join_code = patch.join_code.as_deref().map(clean_join_code).transpose()?;

        let room = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

            // Validate the status change before touching anything else
            if let Some(status) = patch.status {
                if status != room.status {
                    Self::apply_transition(room, status)?;
                }
            }
            if let Some(name) = name {
                room.name = name;
            }
            if let Some(join_code) = join_code {
                room.join_code = join_code;
            }
            if let Some(v) = patch.objective_total {
                room.objective_total = v;
            }
            if let Some(v) = patch.rdv_value_cents {
                room.rdv_value_cents = v;
            }
            if let Some(v) = patch.signatures_goal {
                room.signatures_goal = v;
            }
            room.clone()
        };

        tracing::info!(room_id, status = ?room.status, "Room updated");
        self.persist().await;
        Ok(room)
    }

    /// Move a room to a new status through the lifecycle rules
    pub async fn transition_room(&self, room_id: &str, to: RoomStatus) -> AppResult<Room> {
        let room = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;
            Self::apply_transition(room, to)?;
            room.clone()
        };

        tracing::info!(room_id, status = ?room.status, "Room status changed");
        self.persist().await;
        Ok(room)
    }

    pub async fn open_room(&self, room_id: &str) -> AppResult<Room> {
        self.transition_room(room_id, RoomStatus::Open).await
    }

    pub async fn close_room(&self, room_id: &str) -> AppResult<Room> {
        self.transition_room(room_id, RoomStatus::Closed).await
    }

    pub async fn archive_room(&self, room_id: &str) -> AppResult<Room> {
        self.transition_room(room_id, RoomStatus::Archived).await
    }

    /// Permanently remove a room with its participants and claims
    pub async fn delete_room(&self, room_id: &str) -> AppResult<Room> {
        let (room, removed_participants, removed_claims) = {
            let mut rooms = self.rooms.write().await;
            let mut participants = self.participants.write().await;
            let mut claims = self.claims.write().await;
            let mut request_ids = self.claim_request_ids.write().await;
            let mut tokens = self.participant_tokens.write().await;

            let room = rooms
                .remove(room_id)
                .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

            let before = participants.len();
            participants.retain(|_, p| {
                let keep = p.room_id != room_id;
                if !keep {
                    tokens.remove(&p.token_hash);
                }
                keep
            });
            let removed_participants = before - participants.len();

            let removed: Vec<Claim> = claims
                .values()
                .filter(|c| c.room_id == room_id)
                .cloned()
                .collect();
            for claim in &removed {
                claims.remove(&claim.id);
                request_ids.remove(&claim.client_request_id);
            }

            (room, removed_participants, removed.len())
        };

        tracing::info!(
            room_id,
            removed_participants,
            removed_claims,
            "Room permanently deleted"
        );
        self.persist().await;
        Ok(room)
    }
}
