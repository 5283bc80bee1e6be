use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{
    middleware::jwt_auth,
    token::client_fingerprint,
    types::{
        ActiveSession, CreateSessionRequest, SessionClaims, SessionResponse, SessionStats,
        SessionView, TokenResponse,
    },
};
use crate::shared::{AppError, AppState};

/// Builds the session routes over the shared manager
pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/session", get(current_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), jwt_auth));

    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:session_id", get(get_session).delete(revoke_session))
        .route("/sessions/:session_id/token", get(get_token))
        .route("/sessions/:session_id/refresh", post(refresh_session))
        .route("/clients/:client_id/sessions", get(list_client_sessions))
        .route("/banks/:bank_id/sessions", get(list_bank_sessions))
        .route("/stats", get(session_stats))
        .route("/health", get(health))
        .merge(authenticated)
        .with_state(state)
}

/// POST /sessions
#[instrument(name = "create_session", skip(state, request), fields(bank_id = %request.bank_id))]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let session = state
        .session_manager
        .authenticate(&request.client_id, &request.bank_id)?;

    info!(session_id = %session.session_id, "Session created successfully");
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /sessions/:session_id
#[instrument(name = "get_session", skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.session_manager.session(&session_id)?))
}

/// GET /sessions/:session_id/token
#[instrument(name = "get_token", skip(state))]
pub async fn get_token(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TokenResponse>, AppError> {
    Ok(Json(state.session_manager.get_active_token(&session_id)?))
}

/// POST /sessions/:session_id/refresh
#[instrument(name = "refresh_session", skip(state))]
pub async fn refresh_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, AppError> {
    Ok(Json(state.session_manager.refresh(&session_id)?))
}

/// DELETE /sessions/:session_id
#[instrument(name = "revoke_session", skip(state))]
pub async fn revoke_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.session_manager.revoke(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /clients/:client_id/sessions
///
/// Sorted by bank id so responses are stable.
#[instrument(name = "list_client_sessions", skip(state, client_id), fields(client = %client_fingerprint(&client_id)))]
pub async fn list_client_sessions(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<Vec<ActiveSession>>, AppError> {
    let mut sessions: Vec<ActiveSession> =
        state.session_manager.list_active(&client_id)?.collect();
    sessions.sort_by(|a, b| a.bank_id.cmp(&b.bank_id));

    info!(count = sessions.len(), "Listed active sessions");
    Ok(Json(sessions))
}

#[derive(Debug, Default, Deserialize)]
pub struct BankSessionsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// GET /banks/:bank_id/sessions?include_inactive=true
#[instrument(name = "list_bank_sessions", skip(state))]
pub async fn list_bank_sessions(
    State(state): State<AppState>,
    Path(bank_id): Path<String>,
    Query(query): Query<BankSessionsQuery>,
) -> Result<Json<Vec<SessionView>>, AppError> {
    let sessions = state
        .session_manager
        .list_by_bank(&bank_id, query.include_inactive)?;

    info!(count = sessions.len(), "Listed bank sessions");
    Ok(Json(sessions))
}

/// GET /session, behind `jwt_auth`
#[instrument(name = "current_session", skip(claims), fields(session_id = %claims.session_id))]
pub async fn current_session(Extension(claims): Extension<SessionClaims>) -> Json<SessionClaims> {
    Json(claims)
}

/// GET /stats
#[instrument(name = "session_stats", skip(state))]
pub async fn session_stats(State(state): State<AppState>) -> Result<Json<SessionStats>, AppError> {
    Ok(Json(state.session_manager.stats()?))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
