//! Flat CSV dump of a room's claim ledger.

use crate::error::AppResult;
use crate::state::AppState;
use crate::types::*;
use chrono::SecondsFormat;

pub const CSV_HEADERS: &[&str] = &[
    "claim_id",
    "created_at",
    "status",
    "participant_id",
    "display_name",
    "cancelled_at",
    "cancelled_by",
    "cancel_reason",
    "room_id",
    "rdv_value_cents",
    "computed_business_cents",
];

/// Quote a field, doubling embedded quotes
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn status_label(status: ClaimStatus) -> &'static str {
    match status {
        ClaimStatus::Valid => "VALID",
        ClaimStatus::Cancelled => "CANCELLED",
    }
}

fn timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Render one CSV row for a claim event
fn claim_row(event: &ClaimEvent, rdv_value_cents: u64) -> String {
    let claim = &event.claim;
    let business = if claim.is_valid() { rdv_value_cents } else { 0 };

    let fields = [
        claim.id.clone(),
        timestamp(claim.created_at),
        status_label(claim.status).to_string(),
        claim.participant_id.clone(),
        event.participant.display_name.clone(),
        claim.cancelled_at.map(timestamp).unwrap_or_default(),
        claim
            .cancelled_by
            .map(|by| by.as_str().to_string())
            .unwrap_or_default(),
        claim.cancel_reason.clone().unwrap_or_default(),
        claim.room_id.clone(),
        rdv_value_cents.to_string(),
        business.to_string(),
    ];

    fields
        .iter()
        .map(|f| quote(f))
        .collect::<Vec<_>>()
        .join(",")
}

impl AppState {
    /// Export every claim of a room as CSV, newest first
    pub async fn export_claims_csv(&self, room_id: &str) -> AppResult<String> {
        let room = self.require_room(room_id).await?;
        let events = self.room_claim_events(room_id).await;

        let mut lines = Vec::with_capacity(events.len() + 1);
        lines.push(CSV_HEADERS.join(","));
        lines.extend(
            events
                .iter()
                .map(|event| claim_row(event, room.rdv_value_cents)),
        );

        tracing::info!(room_id, rows = events.len(), "Claims exported as CSV");
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::state::test_support::{expire_cooldown, open_room};

    #[test]
    fn test_quote_escapes_quotes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(quote(""), "\"\"");
    }

    #[tokio::test]
    async fn test_export_empty_room_has_header_only() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;

        let csv = state.export_claims_csv(&room.id).await.unwrap();
        assert_eq!(csv, CSV_HEADERS.join(","));
    }

    #[tokio::test]
    async fn test_export_rows() {
        let state = AppState::new();
        let room = open_room(&state, "HOLI").await;
        let alice = state
            .join_room(&room.id, "Alice \"Ace\"", "HOLI")
            .await
            .unwrap();

        let first = state
            .submit_claim(&room.id, &alice.participant_token, "a-0")
            .await
            .unwrap();
        expire_cooldown(&state, &alice.participant_id).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = state
            .submit_claim(&room.id, &alice.participant_token, "a-1")
            .await
            .unwrap();
        state
            .cancel_claim_as_admin(&room.id, &first.claim_id, "Doublon, pas un RDV")
            .await
            .unwrap();

        let csv = state.export_claims_csv(&room.id).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("claim_id,created_at,status"));

        // Newest first: the valid claim, then the cancelled one
        assert!(lines[1].starts_with(&format!("\"{}\"", second.claim_id)));
        assert!(lines[1].contains("\"VALID\""));
        assert!(lines[1].ends_with("\"15000\",\"15000\""));
        assert!(lines[1].contains("\"Alice \"\"Ace\"\"\""));

        assert!(lines[2].starts_with(&format!("\"{}\"", first.claim_id)));
        assert!(lines[2].contains("\"CANCELLED\""));
        assert!(lines[2].contains("\"admin\""));
        assert!(lines[2].contains("\"Doublon, pas un RDV\""));
        assert!(lines[2].ends_with("\"15000\",\"0\""));
    }

    #[tokio::test]
    async fn test_export_unknown_room() {
        let state = AppState::new();
        let result = state.export_claims_csv("missing").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
