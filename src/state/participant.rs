use super::room::join_code_matches;
use super::AppState;
use crate::error::{AppError, AppResult};
use crate::types::*;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

const MAX_DISPLAY_NAME_CHARS: usize = 40;
const TOKEN_BYTES: usize = 32;

/// Result of a successful join. The token is only ever returned here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedParticipant {
    pub participant_id: ParticipantId,
    pub participant_token: String,
    pub display_name: String,
    pub room_id: RoomId,
}

/// Lowercase and strip all whitespace ("Jean Luc" and "jeanluc" collide)
pub fn normalize_display_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Hex SHA-256 of a participant token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn clean_display_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Display name is required".to_string()));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(AppError::BadRequest(format!(
            "Display name must be at most {} characters",
            MAX_DISPLAY_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

/// First free (name, key) pair, suffixing " (2)", " (3)", ... on collision
fn resolve_name_collision(
    name: &str,
    key: &str,
    taken: impl Fn(&str) -> bool,
) -> (String, String) {
    if !taken(key) {
        return (name.to_string(), key.to_string());
    }

    let mut counter = 2u32;
    loop {
        let candidate_key = format!("{}{}", key, counter);
        if !taken(&candidate_key) {
            return (format!("{} ({})", name, counter), candidate_key);
        }
        counter += 1;
    }
}

impl AppState {
    /// Join an OPEN room with its join code
    pub async fn join_room(
        &self,
        room_id: &str,
        display_name: &str,
        join_code: &str,
    ) -> AppResult<JoinedParticipant> {
        let name = clean_display_name(display_name)?;
        if join_code.trim().is_empty() {
            return Err(AppError::BadRequest("Join code is required".to_string()));
        }
        let key = normalize_display_name(&name);

        let token = generate_token();
        let participant = {
            let rooms = self.rooms.read().await;
            let room = rooms
                .get(room_id)
                .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;
            if room.status != RoomStatus::Open {
                return Err(AppError::InvalidState("Room is not open".to_string()));
            }
            if !join_code_matches(&room.join_code, join_code) {
                return Err(AppError::Forbidden("Invalid join code".to_string()));
            }

            let mut participants = self.participants.write().await;
            let (final_name, final_key) = resolve_name_collision(&name, &key, |candidate| {
                participants
                    .values()
                    .any(|p| p.room_id == room_id && p.display_name_key == candidate)
            });

            let participant = Participant {
                id: ulid::Ulid::new().to_string(),
                room_id: room_id.to_string(),
                display_name: final_name,
                display_name_key: final_key,
                token_hash: hash_token(&token),
                last_claim_at: None,
                created_at: chrono::Utc::now(),
            };
            participants.insert(participant.id.clone(), participant.clone());
            self.participant_tokens
                .write()
                .await
                .insert(participant.token_hash.clone(), participant.id.clone());
            participant
        };

        tracing::info!(
            room_id,
            participant_id = %participant.id,
            display_name = %participant.display_name,
            "Participant joined"
        );
        self.persist().await;

        Ok(JoinedParticipant {
            participant_id: participant.id,
            participant_token: token,
            display_name: participant.display_name,
            room_id: participant.room_id,
        })
    }

    /// Resolve a secret token to its participant
    pub async fn get_participant_by_token(&self, token: &str) -> Option<Participant> {
        // Index guard is released before touching participants (lock order)
        let participant_id = self
            .participant_tokens
            .read()
            .await
            .get(&hash_token(token))
            .cloned()?;
        self.participants.read().await.get(&participant_id).cloned()
    }

    /// Resolve a token and check it belongs to the given room
    pub async fn authenticate_participant(
        &self,
        room_id: &str,
        token: &str,
    ) -> AppResult<Participant> {
        if token.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Participant token is required".to_string(),
            ));
        }
        match self.get_participant_by_token(token).await {
            Some(p) if p.room_id == room_id => Ok(p),
            _ => Err(AppError::Unauthorized(
                "Invalid participant token".to_string(),
            )),
        }
    }

    /// Rename a participant (admin). The new name must not collide in the room.
    pub async fn rename_participant(
        &self,
        room_id: &str,
        participant_id: &str,
        display_name: &str,
    ) -> AppResult<ParticipantInfo> {
        let name = clean_display_name(display_name)?;
        let key = normalize_display_name(&name);

        let (info, old_name) = {
            let mut participants = self.participants.write().await;

            let collision = participants.values().any(|p| {
                p.room_id == room_id && p.id != participant_id && p.display_name_key == key
            });

            let participant = participants
                .get_mut(participant_id)
                .filter(|p| p.room_id == room_id)
                .ok_or_else(|| AppError::NotFound("Participant not found".to_string()))?;

            if collision {
                return Err(AppError::Conflict(format!(
                    "Another participant is already called \"{}\"",
                    name
                )));
            }

            let old_name = std::mem::replace(&mut participant.display_name, name);
            participant.display_name_key = key;
            (ParticipantInfo::from(&*participant), old_name)
        };

        tracing::info!(
            room_id,
            participant_id,
            old_name = %old_name,
            new_name = %info.display_name,
            "Participant renamed"
        );
        self.persist().await;
        Ok(info)
    }

    /// A participant's profile and their own claims, newest first
    pub async fn participant_overview(
        &self,
        room_id: &str,
        token: &str,
    ) -> AppResult<ParticipantOverview> {
        let participant = self.authenticate_participant(room_id, token).await?;
        let now = chrono::Utc::now();

        let mut claims: Vec<OwnClaim> = self
            .claims
            .read()
            .await
            .values()
            .filter(|c| c.participant_id == participant.id)
            .map(|c| OwnClaim {
                self_cancellable: c.is_valid()
                    && now - c.created_at <= self.rules.self_cancel_window,
                claim: c.clone(),
            })
            .collect();
        claims.sort_by(|a, b| b.claim.created_at.cmp(&a.claim.created_at));

        let valid_claims = claims.iter().filter(|c| c.claim.is_valid()).count() as u64;

        Ok(ParticipantOverview {
            participant: ParticipantInfo::from(&participant),
            valid_claims,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::NewRoom;
    use crate::state::test_support::open_room;

    #[test]
    fn test_normalize_display_name() {
        assert_eq!(normalize_display_name("Jean Luc"), "jeanluc");
        assert_eq!(normalize_display_name("  MARIE\tclaire "), "marieclaire");
        assert_eq!(normalize_display_name("Élodie"), "élodie");
    }

    #[test]
    fn test_hash_token_is_stable_hex() {
        let h = hash_token("secret");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("secret"));
        assert_ne!(h, hash_token("Secret"));
    }

    #[test]
    fn test_resolve_name_collision() {
        let taken = ["alice", "alice2"];
        let (name, key) = resolve_name_collision("Alice", "alice", |k| taken.contains(&k));
        assert_eq!(name, "Alice (3)");
        assert_eq!(key, "alice3");

        let (name, key) = resolve_name_collision("Bob", "bob", |k| taken.contains(&k));
        assert_eq!(name, "Bob");
        assert_eq!(key, "bob");
    }

    #[tokio::test]
    async fn test_join_room() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;

        let joined = state.join_room(&room.id, " Alice ", "holi").await.unwrap();
        assert_eq!(joined.display_name, "Alice");
        assert_eq!(joined.room_id, room.id);
        assert_eq!(joined.participant_token.len(), TOKEN_BYTES * 2);

        let stored = state
            .get_participant_by_token(&joined.participant_token)
            .await
            .unwrap();
        assert_eq!(stored.id, joined.participant_id);
        assert_eq!(stored.display_name_key, "alice");
        // Plaintext token is never stored
        assert_ne!(stored.token_hash, joined.participant_token);
        assert_eq!(stored.token_hash, hash_token(&joined.participant_token));
    }

    #[tokio::test]
    async fn test_join_name_collision_gets_suffix() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;

        let first = state.join_room(&room.id, "Jean Luc", "HOLI").await.unwrap();
        let second = state.join_room(&room.id, "jeanluc", "HOLI").await.unwrap();
        let third = state.join_room(&room.id, "JEAN LUC", "HOLI").await.unwrap();

        assert_eq!(first.display_name, "Jean Luc");
        assert_eq!(second.display_name, "jeanluc (2)");
        assert_eq!(third.display_name, "JEAN LUC (3)");
        assert_ne!(first.participant_token, second.participant_token);
    }

    #[tokio::test]
    async fn test_same_name_in_different_rooms() {
        let state = AppState::new();
        let room_a = open_room(&state, "AAAA").await;
        let room_b = open_room(&state, "BBBB").await;

        let a = state.join_room(&room_a.id, "Alice", "AAAA").await.unwrap();
        let b = state.join_room(&room_b.id, "Alice", "BBBB").await.unwrap();
        assert_eq!(a.display_name, "Alice");
        assert_eq!(b.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_join_rejections() {
        let state = AppState::new();
        let draft = state
            .create_room(NewRoom {
                name: "Draft".to_string(),
                join_code: Some("DRFT".to_string()),
                objective_total: 0,
                rdv_value_cents: 0,
                signatures_goal: 0,
            })
            .await
            .unwrap();
        let open = open_room(&state, "HOLI").await;

        let result = state.join_room(&draft.id, "Alice", "DRFT").await;
        assert!(matches!(result, Err(AppError::InvalidState(_))));

        let result = state.join_room(&open.id, "Alice", "WRONG").await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let result = state.join_room("missing", "Alice", "HOLI").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let result = state.join_room(&open.id, "   ", "HOLI").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        let long_name = "x".repeat(MAX_DISPLAY_NAME_CHARS + 1);
        let result = state.join_room(&open.id, &long_name, "HOLI").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));

        assert!(state.participants.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_authenticate_participant_wrong_room() {
        let state = AppState::new();
        let room_a = open_room(&state, "AAAA").await;
        let room_b = open_room(&state, "BBBB").await;
        let joined = state.join_room(&room_a.id, "Alice", "AAAA").await.unwrap();

        assert!(state
            .authenticate_participant(&room_a.id, &joined.participant_token)
            .await
            .is_ok());
        let result = state
            .authenticate_participant(&room_b.id, &joined.participant_token)
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        let result = state.authenticate_participant(&room_a.id, "bogus").await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_rename_participant() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;
        let alice = state.join_room(&room.id, "Alice", "HOLI").await.unwrap();
        let bob = state.join_room(&room.id, "Bob", "HOLI").await.unwrap();

        let renamed = state
            .rename_participant(&room.id, &alice.participant_id, "Alice M.")
            .await
            .unwrap();
        assert_eq!(renamed.display_name, "Alice M.");

        // Collides with Bob
        let result = state
            .rename_participant(&room.id, &alice.participant_id, " b o b ")
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        // Renaming to own key with different casing is fine
        let renamed = state
            .rename_participant(&room.id, &bob.participant_id, "BOB")
            .await
            .unwrap();
        assert_eq!(renamed.display_name, "BOB");

        // Old key is free again for newcomers
        let newcomer = state.join_room(&room.id, "Alice", "HOLI").await.unwrap();
        assert_eq!(newcomer.display_name, "Alice");
    }

    #[tokio::test]
    async fn test_rename_participant_wrong_room() {
        let state = AppState::new();
        let room_a = open_room(&state, "AAAA").await;
        let room_b = open_room(&state, "BBBB").await;
        let alice = state.join_room(&room_a.id, "Alice", "AAAA").await.unwrap();

        let result = state
            .rename_participant(&room_b.id, &alice.participant_id, "Mallory")
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
