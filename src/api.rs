//! HTTP API endpoints.
//!
//! Participant routes authenticate with the bearer token returned at join time
//! (sent in the JSON body). Admin routes sit behind the session cookie middleware.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::abuse::{self, AbuseConfig};
use crate::auth::{self, AdminAuth};
use crate::error::{AppError, AppResult};
use crate::state::export::LedgerSnapshot;
use crate::state::{AppState, JoinedParticipant, NewRoom, RoomPatch};
use crate::types::*;

/// `Json` body extractor whose failures go through `AppError`, so a bad
/// body is a 400 with the usual `{"error": ...}` shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub join_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    #[serde(default)]
    pub participant_token: String,
    #[serde(default)]
    pub client_request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfCancelRequest {
    #[serde(default)]
    pub participant_token: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default)]
    pub participant_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub permanent: bool,
}

/// Liveness plus snapshot health.
///
/// GET /healthz
///
/// Answers 503 while snapshot writes are failing, so monitors notice before a
/// restart loses the unsaved ledger.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let failures = state.snapshot_failures();
    if failures > 0 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "snapshotWriteFailures": failures })),
        )
    } else {
        (
            StatusCode::OK,
            Json(json!({ "status": "ok", "snapshotWriteFailures": 0 })),
        )
    }
}

/// Join an open room with the room's join code.
///
/// POST /api/rooms/{room_id}/join
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ApiJson(req): ApiJson<JoinRequest>,
) -> AppResult<Json<JoinedParticipant>> {
    let joined = state
        .join_room(&room_id, &req.display_name, &req.join_code)
        .await?;
    Ok(Json(joined))
}

/// Record one appointment for the caller.
///
/// POST /api/rooms/{room_id}/claim
///
/// Resubmitting with the same `clientRequestId` returns the original claim
/// with `duplicated: true`.
pub async fn submit_claim(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ApiJson(req): ApiJson<ClaimRequest>,
) -> AppResult<Json<ClaimReceipt>> {
    let receipt = state
        .submit_claim(&room_id, &req.participant_token, &req.client_request_id)
        .await?;
    Ok(Json(receipt))
}

/// POST /api/rooms/{room_id}/claims/{claim_id}/self-cancel
pub async fn self_cancel_claim(
    State(state): State<Arc<AppState>>,
    Path((room_id, claim_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<SelfCancelRequest>,
) -> AppResult<Json<Claim>> {
    let claim = state
        .cancel_claim_as_participant(
            &room_id,
            &claim_id,
            &req.participant_token,
            req.reason.as_deref(),
        )
        .await?;
    Ok(Json(claim))
}

/// POST /api/rooms/{room_id}/me
pub async fn participant_overview(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ApiJson(req): ApiJson<TokenRequest>,
) -> AppResult<Json<ParticipantOverview>> {
    let overview = state
        .participant_overview(&room_id, &req.participant_token)
        .await?;
    Ok(Json(overview))
}

/// Live totals and leaderboard, polled by the big screen and the phones.
///
/// GET /api/rooms/{room_id}/summary
pub async fn room_summary(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomSummary>> {
    Ok(Json(state.room_summary(&room_id).await?))
}

/// GET /api/rooms
pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomOverview>> {
    Json(state.list_rooms().await)
}

/// POST /api/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<NewRoom>,
) -> AppResult<(StatusCode, Json<Room>)> {
    let room = state.create_room(req).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// PATCH /api/rooms/{room_id}
pub async fn update_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ApiJson(changes): ApiJson<RoomPatch>,
) -> AppResult<Json<Room>> {
    Ok(Json(state.update_room(&room_id, changes).await?))
}

/// Archive a room, or remove it with everything in it.
///
/// DELETE /api/rooms/{room_id}[?permanent=true]
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> AppResult<Json<Value>> {
    let room = if params.permanent {
        state.delete_room(&room_id).await?
    } else {
        state.archive_room(&room_id).await?
    };
    Ok(Json(json!({
        "success": true,
        "permanent": params.permanent,
        "room": room,
    })))
}

/// POST /api/rooms/{room_id}/open
pub async fn open_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(state.open_room(&room_id).await?))
}

/// POST /api/rooms/{room_id}/close
pub async fn close_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(state.close_room(&room_id).await?))
}

/// GET /api/rooms/{room_id}/events
pub async fn room_events(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Vec<ClaimEvent>>> {
    Ok(Json(state.recent_events(&room_id).await?))
}

/// POST /api/rooms/{room_id}/claims/{claim_id}/cancel
pub async fn cancel_claim(
    State(state): State<Arc<AppState>>,
    Path((room_id, claim_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> AppResult<Json<Claim>> {
    let claim = state
        .cancel_claim_as_admin(&room_id, &claim_id, &req.reason)
        .await?;
    Ok(Json(claim))
}

/// POST /api/rooms/{room_id}/participants/{participant_id}/rename
pub async fn rename_participant(
    State(state): State<Arc<AppState>>,
    Path((room_id, participant_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<RenameRequest>,
) -> AppResult<Json<ParticipantInfo>> {
    let participant = state
        .rename_participant(&room_id, &participant_id, &req.display_name)
        .await?;
    Ok(Json(participant))
}

/// Download the claim ledger of a room as CSV.
///
/// GET /api/rooms/{room_id}/export
pub async fn export_claims_csv(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Response> {
    let csv = state.export_claims_csv(&room_id).await?;
    let disposition = format!("attachment; filename=claims-log-{}.csv", room_id);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

/// Export the entire ledger as JSON.
///
/// GET /api/state/export
pub async fn export_state(State(state): State<Arc<AppState>>) -> Json<LedgerSnapshot> {
    Json(state.export_state().await)
}

/// Import a ledger snapshot.
///
/// POST /api/state/import
///
/// Replaces all current state with the imported data.
pub async fn import_state(
    State(state): State<Arc<AppState>>,
    ApiJson(snapshot): ApiJson<LedgerSnapshot>,
) -> AppResult<Json<Value>> {
    if let Err(e) = state.import_state(snapshot).await {
        tracing::error!("State import failed: {}", e);
        return Err(e);
    }
    Ok(Json(json!({ "success": true })))
}

/// Build the full API router
pub fn router(state: Arc<AppState>, auth: Arc<AdminAuth>, abuse: Arc<AbuseConfig>) -> Router {
    let session_routes = Router::new()
        .route(
            "/api/admin/login",
            post(auth::login).layer(middleware::from_fn_with_state(
                abuse,
                abuse::rate_limit_middleware,
            )),
        )
        .route("/api/admin/logout", post(auth::logout))
        .with_state(auth.clone());

    let participant_routes = Router::new()
        // Not rate limited: phones on the venue WiFi share one public IP
        .route("/api/rooms/{room_id}/join", post(join_room))
        .route("/api/rooms/{room_id}/claim", post(submit_claim))
        .route(
            "/api/rooms/{room_id}/claims/{claim_id}/self-cancel",
            post(self_cancel_claim),
        )
        .route("/api/rooms/{room_id}/me", post(participant_overview))
        .route("/api/rooms/{room_id}/summary", get(room_summary))
        .route("/healthz", get(health));

    let admin_routes = Router::new()
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route(
            "/api/rooms/{room_id}",
            patch(update_room).delete(delete_room),
        )
        .route("/api/rooms/{room_id}/open", post(open_room))
        .route("/api/rooms/{room_id}/close", post(close_room))
        .route("/api/rooms/{room_id}/events", get(room_events))
        .route(
            "/api/rooms/{room_id}/claims/{claim_id}/cancel",
            post(cancel_claim),
        )
        .route(
            "/api/rooms/{room_id}/participants/{participant_id}/rename",
            post(rename_participant),
        )
        .route("/api/rooms/{room_id}/export", get(export_claims_csv))
        .route("/api/state/export", get(export_state))
        .route("/api/state/import", post(import_state))
        .route_layer(middleware::from_fn_with_state(
            auth,
            auth::admin_auth_middleware,
        ));

    Router::new()
        .merge(participant_routes)
        .merge(admin_routes)
        .with_state(state)
        .merge(session_routes)
}
