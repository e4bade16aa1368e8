use super::AppState;
use crate::error::{AppError, AppResult};
use crate::types::*;

const DEFAULT_SELF_CANCEL_REASON: &str = "Self cancellation";

impl AppState {
    /// Record a claim for the participant behind `token`.
    ///
    /// Retrying with an already recorded `client_request_id` returns the
    /// original claim with `duplicated: true`. The cooldown check, the insert
    /// and the `last_claim_at` update happen under the same write guards.
    pub async fn submit_claim(
        &self,
        room_id: &str,
        token: &str,
        client_request_id: &str,
    ) -> AppResult<ClaimReceipt> {
        let client_request_id = client_request_id.trim();
        if token.trim().is_empty() || client_request_id.is_empty() {
            return Err(AppError::BadRequest(
                "Token and request ID are required".to_string(),
            ));
        }
        let participant = self.authenticate_participant(room_id, token).await?;

        let claim = {
            let rooms = self.rooms.read().await;
            let room_open = rooms
                .get(room_id)
                .is_some_and(|r| r.status == RoomStatus::Open);
            if !room_open {
                return Err(AppError::InvalidState("Room is not open".to_string()));
            }

            let mut participants = self.participants.write().await;
            let mut claims = self.claims.write().await;
            let mut request_ids = self.claim_request_ids.write().await;

            if let Some(existing_id) = request_ids.get(client_request_id) {
                let owned_by_caller = claims
                    .get(existing_id)
                    .is_some_and(|c| c.participant_id == participant.id);
                if !owned_by_caller {
                    return Err(AppError::Conflict(
                        "Request ID already used by another participant".to_string(),
                    ));
                }
                tracing::debug!(
                    participant_id = %participant.id,
                    client_request_id,
                    "Duplicate claim request collapsed"
                );
                return Ok(ClaimReceipt {
                    success: true,
                    claim_id: existing_id.clone(),
                    duplicated: true,
                });
            }

            // Re-read under the write guard; the participant may have been removed
            let participant = participants
                .get_mut(&participant.id)
                .ok_or_else(|| AppError::Unauthorized("Invalid participant token".to_string()))?;

            let now = chrono::Utc::now();
            if let Some(last) = participant.last_claim_at {
                let elapsed = now - last;
                if elapsed < self.rules.claim_cooldown {
                    let retry_after = (self.rules.claim_cooldown - elapsed)
                        .to_std()
                        .unwrap_or_default();
                    return Err(AppError::RateLimited { retry_after });
                }
            }

            let claim = Claim {
                id: ulid::Ulid::new().to_string(),
                room_id: room_id.to_string(),
                participant_id: participant.id.clone(),
                client_request_id: client_request_id.to_string(),
                status: ClaimStatus::Valid,
                created_at: now,
                cancelled_at: None,
                cancelled_by: None,
                cancel_reason: None,
            };

            participant.last_claim_at = Some(now);
            request_ids.insert(claim.client_request_id.clone(), claim.id.clone());
            claims.insert(claim.id.clone(), claim.clone());
            claim
        };

        tracing::info!(
            room_id,
            participant_id = %claim.participant_id,
            claim_id = %claim.id,
            "Claim recorded"
        );
        self.persist().await;

        Ok(ClaimReceipt {
            success: true,
            claim_id: claim.id,
            duplicated: false,
        })
    }

    /// Admin cancellation: no time limit, reason required
    pub async fn cancel_claim_as_admin(
        &self,
        room_id: &str,
        claim_id: &str,
        reason: &str,
    ) -> AppResult<Claim> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::BadRequest(
                "A cancellation reason is required".to_string(),
            ));
        }

        let claim = {
            let mut claims = self.claims.write().await;
            let claim = claims
                .get_mut(claim_id)
                .filter(|c| c.room_id == room_id)
                .ok_or_else(|| AppError::NotFound("Claim not found".to_string()))?;
            Self::mark_cancelled(claim, CancelledBy::Admin, reason)?;
            claim.clone()
        };

        tracing::info!(room_id, claim_id, reason, "Claim cancelled by admin");
        self.persist().await;
        Ok(claim)
    }

    /// Self-service cancellation by the claim's author within the window
    pub async fn cancel_claim_as_participant(
        &self,
        room_id: &str,
        claim_id: &str,
        token: &str,
        reason: Option<&str>,
    ) -> AppResult<Claim> {
        let participant = self.authenticate_participant(room_id, token).await?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_SELF_CANCEL_REASON);

        let claim = {
            let mut claims = self.claims.write().await;
            let claim = claims
                .get_mut(claim_id)
                .filter(|c| c.room_id == room_id)
                .ok_or_else(|| AppError::NotFound("Claim not found".to_string()))?;

            if claim.participant_id != participant.id {
                return Err(AppError::Forbidden(
                    "You can only cancel your own claims".to_string(),
                ));
            }
            if claim.is_valid()
                && chrono::Utc::now() - claim.created_at > self.rules.self_cancel_window
            {
                return Err(AppError::Forbidden(format!(
                    "Claims can only be cancelled within {} minutes",
                    self.rules.self_cancel_window.num_minutes()
                )));
            }
            Self::mark_cancelled(claim, CancelledBy::Participant, reason)?;
            claim.clone()
        };

        tracing::info!(
            room_id,
            claim_id,
            participant_id = %participant.id,
            "Claim cancelled by its author"
        );
        self.persist().await;
        Ok(claim)
    }

    /// One-way VALID -> CANCELLED flip
    fn mark_cancelled(claim: &mut Claim, by: CancelledBy, reason: &str) -> AppResult<()> {
        if !claim.is_valid() {
            return Err(AppError::InvalidState(
                "Claim is already cancelled".to_string(),
            ));
        }
        claim.status = ClaimStatus::Cancelled;
        claim.cancelled_at = Some(chrono::Utc::now());
        claim.cancelled_by = Some(by);
        claim.cancel_reason = Some(reason.to_string());
        Ok(())
    }

    /// All claims of a room joined with participant names, newest first
    pub async fn room_claim_events(&self, room_id: &str) -> Vec<ClaimEvent> {
        let participants = self.participants.read().await;
        let claims = self.claims.read().await;

        let mut events: Vec<ClaimEvent> = claims
            .values()
            .filter(|c| c.room_id == room_id)
            .map(|c| ClaimEvent {
                claim: c.clone(),
                participant: EventParticipant {
                    id: c.participant_id.clone(),
                    display_name: participants
                        .get(&c.participant_id)
                        .map(|p| p.display_name.clone())
                        .unwrap_or_default(),
                },
            })
            .collect();

        // ULIDs break ties between claims created in the same instant
        events.sort_by(|a, b| {
            b.claim
                .created_at
                .cmp(&a.claim.created_at)
                .then_with(|| b.claim.id.cmp(&a.claim.id))
        });
        events
    }

    /// The latest claim events of a room (admin feed)
    pub async fn recent_events(&self, room_id: &str) -> AppResult<Vec<ClaimEvent>> {
        self.require_room(room_id).await?;
        let mut events = self.room_claim_events(room_id).await;
        events.truncate(self.rules.events_limit);
        Ok(events)
    }
}
