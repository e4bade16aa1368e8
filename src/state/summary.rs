use crate::error::AppResult;
use crate::state::AppState;
use crate::types::*;
use std::collections::HashMap;

/// Objective progress in percent, 0 when no objective is set
pub fn objective_progress(totals: u64, objective_total: u32) -> f64 {
    if objective_total == 0 {
        0.0
    } else {
        totals as f64 / f64::from(objective_total) * 100.0
    }
}

impl AppState {
    /// Count VALID claims per participant of a room
    pub async fn count_valid_claims(&self, room_id: &str) -> HashMap<ParticipantId, u64> {
        let claims = self.claims.read().await;

        let mut counts: HashMap<ParticipantId, u64> = HashMap::new();
        for claim in claims.values() {
            if claim.room_id == room_id && claim.is_valid() {
                *counts.entry(claim.participant_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Recompute the live summary of a room from the claim ledger
    pub async fn room_summary(&self, room_id: &str) -> AppResult<RoomSummary> {
        let room = self.require_room(room_id).await?;

        let mut participants: Vec<Participant> = self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.room_id == room_id)
            .cloned()
            .collect();
        // Join order decides ties; ULIDs sort by creation time
        participants.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let counts = self.count_valid_claims(room_id).await;
        let totals: u64 = counts.values().sum();

        let last_event_at = self
            .claims
            .read()
            .await
            .values()
            .filter(|c| c.room_id == room_id)
            .map(Claim::last_event_at)
            .max();

        let mut leaderboard: Vec<LeaderboardEntry> = participants
            .into_iter()
            .map(|p| {
                let score = counts.get(&p.id).copied().unwrap_or(0);
                LeaderboardEntry {
                    id: p.id,
                    display_name: p.display_name,
                    score,
                    business_cents: score.saturating_mul(room.rdv_value_cents),
                }
            })
            .collect();

        // Stable sort keeps join order among equal scores
        leaderboard.sort_by(|a, b| b.score.cmp(&a.score));
        leaderboard.truncate(self.rules.leaderboard_size);

        Ok(RoomSummary {
            room_id: room.id,
            room_name: room.name,
            status: room.status,
            totals,
            business_total_cents: totals.saturating_mul(room.rdv_value_cents),
            objective_total: room.objective_total,
            objective_progress: objective_progress(totals, room.objective_total),
            leaderboard,
            signatures_goal: room.signatures_goal,
            rdv_value_cents: room.rdv_value_cents,
            last_event_at,
            server_now: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Rules;
    use crate::error::AppError;
    use crate::state::test_support::{expire_cooldown, open_room};

    #[test]
    fn test_objective_progress() {
        assert_eq!(objective_progress(5, 0), 0.0);
        assert_eq!(objective_progress(5, 20), 25.0);
        assert_eq!(objective_progress(30, 20), 150.0);
    }

    #[tokio::test]
    async fn test_summary_empty_room() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;

        let summary = state.room_summary(&room.id).await.unwrap();
        assert_eq!(summary.room_name, "Salon Lyon");
        assert_eq!(summary.status, RoomStatus::Open);
        assert_eq!(summary.totals, 0);
        assert_eq!(summary.business_total_cents, 0);
        assert_eq!(summary.objective_progress, 0.0);
        assert!(summary.leaderboard.is_empty());
        assert!(summary.last_event_at.is_none());
    }

    #[tokio::test]
    async fn test_summary_unknown_room() {
        let state = AppState::new();
        let result = state.room_summary("missing").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_summary_totals_and_leaderboard() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;
        let alice = state.join_room(&room.id, "Alice", "HOLI").await.unwrap();
        let bob = state.join_room(&room.id, "Bob", "HOLI").await.unwrap();
        let carol = state.join_room(&room.id, "Carol", "HOLI").await.unwrap();

        for i in 0..3 {
            state
                .submit_claim(&room.id, &bob.participant_token, &format!("b-{}", i))
                .await
                .unwrap();
            expire_cooldown(&state, &bob.participant_id).await;
        }
        state
            .submit_claim(&room.id, &alice.participant_token, "a-0")
            .await
            .unwrap();

        let summary = state.room_summary(&room.id).await.unwrap();
        assert_eq!(summary.totals, 4);
        assert_eq!(summary.business_total_cents, 4 * 15_000);
        assert_eq!(summary.objective_progress, 20.0);

        let names: Vec<_> = summary
            .leaderboard
            .iter()
            .map(|e| e.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Bob", "Alice", "Carol"]);
        assert_eq!(summary.leaderboard[0].score, 3);
        assert_eq!(summary.leaderboard[0].business_cents, 45_000);
        assert_eq!(summary.leaderboard[2].id, carol.participant_id);
        assert_eq!(summary.leaderboard[2].score, 0);
        assert!(summary.last_event_at.is_some());
    }

    #[tokio::test]
    async fn test_summary_ties_follow_join_order() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;
        let mut joined = Vec::new();
        for name in ["Zoe", "Yann", "Xavier"] {
            joined.push(state.join_room(&room.id, name, "HOLI").await.unwrap());
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let summary = state.room_summary(&room.id).await.unwrap();
        let names: Vec<_> = summary
            .leaderboard
            .iter()
            .map(|e| e.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["Zoe", "Yann", "Xavier"]);
    }

    #[tokio::test]
    async fn test_cancel_decrements_totals() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;
        let alice = state.join_room(&room.id, "Alice", "HOLI").await.unwrap();

        let first = state
            .submit_claim(&room.id, &alice.participant_token, "a-0")
            .await
            .unwrap();
        expire_cooldown(&state, &alice.participant_id).await;
        state
            .submit_claim(&room.id, &alice.participant_token, "a-1")
            .await
            .unwrap();
        assert_eq!(state.room_summary(&room.id).await.unwrap().totals, 2);

        state
            .cancel_claim_as_admin(&room.id, &first.claim_id, "Wrong tap")
            .await
            .unwrap();

        let summary = state.room_summary(&room.id).await.unwrap();
        assert_eq!(summary.totals, 1);
        assert_eq!(summary.leaderboard[0].score, 1);
        assert_eq!(summary.business_total_cents, 15_000);
    }

    #[tokio::test]
    async fn test_summary_ignores_other_rooms() {
        let state = AppState::new();
        let room_a = open_room(&state, "AAAA").await;
        let room_b = open_room(&state, "BBBB").await;
        let alice = state.join_room(&room_a.id, "Alice", "AAAA").await.unwrap();
        state
            .submit_claim(&room_a.id, &alice.participant_token, "a-0")
            .await
            .unwrap();

        let summary_b = state.room_summary(&room_b.id).await.unwrap();
        assert_eq!(summary_b.totals, 0);
        assert!(summary_b.leaderboard.is_empty());
    }

    #[tokio::test]
    async fn test_leaderboard_truncated() {
        let state = AppState::with_rules(Rules {
            leaderboard_size: 2,
            ..Rules::default()
        });
        let room = open_room(&state, "HOLI").await;
        for name in ["A", "B", "C", "D"] {
            state.join_room(&room.id, name, "HOLI").await.unwrap();
        }

        let summary = state.room_summary(&room.id).await.unwrap();
        assert_eq!(summary.leaderboard.len(), 2);
    }
}
