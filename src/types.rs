use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type RoomId = String;
pub type ParticipantId = String;
pub type ClaimId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Draft,
    Open,
    Closed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub status: RoomStatus,
    pub join_code: String,
    pub objective_total: u32,
    pub rdv_value_cents: u64,
    pub signatures_goal: u32,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
}

/// A joined participant. Only the SHA-256 of the secret token is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub display_name: String,
    /// Normalized name, unique per room
    pub display_name_key: String,
    pub token_hash: String,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Public view of a participant (never exposes the token hash)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub display_name: String,
    pub last_claim_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Participant> for ParticipantInfo {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            room_id: p.room_id.clone(),
            display_name: p.display_name.clone(),
            last_claim_at: p.last_claim_at,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Valid,
    Cancelled,
}

/// Who retracted a claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CancelledBy {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "self")]
    Participant,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Admin => "admin",
            CancelledBy::Participant => "self",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: ClaimId,
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
    /// Client-generated idempotency key
    pub client_request_id: String,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancel_reason: Option<String>,
}

impl Claim {
    pub fn is_valid(&self) -> bool {
        self.status == ClaimStatus::Valid
    }

    /// Latest moment anything happened to this claim
    pub fn last_event_at(&self) -> DateTime<Utc> {
        self.cancelled_at.unwrap_or(self.created_at)
    }
}

/// Outcome of a claim submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub success: bool,
    pub claim_id: ClaimId,
    /// True when the idempotency key was already recorded
    pub duplicated: bool,
}

/// Claim author as shown in the event feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventParticipant {
    pub id: ParticipantId,
    pub display_name: String,
}

/// A claim joined with its author (admin event feed)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimEvent {
    #[serde(flatten)]
    pub claim: Claim,
    pub participant: EventParticipant,
}

/// Room row for the admin console
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomOverview {
    #[serde(flatten)]
    pub room: Room,
    pub participant_count: usize,
    pub valid_claims: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: ParticipantId,
    pub display_name: String,
    pub score: u64,
    pub business_cents: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub room_name: String,
    pub status: RoomStatus,
    /// Count of VALID claims in the room
    pub totals: u64,
    pub business_total_cents: u64,
    pub objective_total: u32,
    /// Percentage of the objective reached (not clamped at 100)
    pub objective_progress: f64,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub signatures_goal: u32,
    pub rdv_value_cents: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub server_now: DateTime<Utc>,
}

/// A participant's own claim, as shown on their device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnClaim {
    #[serde(flatten)]
    pub claim: Claim,
    pub self_cancellable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantOverview {
    pub participant: ParticipantInfo,
    pub valid_claims: u64,
    pub claims: Vec<OwnClaim>,
}
