//! Admin routes: voting-window control and credential issuance.
//!
//! Every handler resolves the caller first and requires the configured
//! administrator id before touching anything.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::auth;
use super::server::{error_response, AppState};
use crate::error::{PlusError, Result};
use crate::models::{PlusRegion, PlusServer, User};

/// Create admin router
pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/voting/start", post(start_voting))
        .route("/voting/end", post(end_voting))
        .route("/tokens", post(issue_token))
        .route("/users", post(register_user))
        .with_state(state)
}

/// Resolve the caller and require the configured administrator.
async fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<User> {
    let caller = auth::resolve_caller(headers, &state.db).await?;
    if !state.config.is_admin(&caller.discord_id) {
        return Err(PlusError::access_denied("Not admin."));
    }
    Ok(caller)
}

#[derive(Deserialize)]
struct StartVotingRequest {
    ends: DateTime<Utc>,
}

/// POST /admin/voting/start - open the voting window
async fn start_voting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StartVotingRequest>,
) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.voting_manager.start_voting(&caller, body.ends).await {
        Ok(()) => Json(serde_json::json!({ "voting_ends": body.ends })).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /admin/voting/end - close the window and settle the cycle
async fn end_voting(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.voting_manager.end_voting(&caller).await {
        Ok(settled) => Json(serde_json::json!({ "settled": settled })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct IssueTokenRequest {
    discord_id: String,
}

/// POST /admin/tokens - issue an API token for a registered user
async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<IssueTokenRequest>,
) -> Response {
    if let Err(e) = require_admin(&headers, &state).await {
        return error_response(e);
    }
    match auth::issue_token(&state.db, &state.config.database_path(), &body.discord_id).await {
        Ok(token) => Json(serde_json::json!({ "token": token })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct RegisterUserRequest {
    discord_id: String,
    username: String,
    plus_region: Option<PlusRegion>,
    membership_status: Option<PlusServer>,
}

/// POST /admin/users - register a user, or update their profile fields
async fn register_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterUserRequest>,
) -> Response {
    if let Err(e) = require_admin(&headers, &state).await {
        return error_response(e);
    }

    let mut db = state.db.write().await;
    let mut user = db
        .find_user(&body.discord_id)
        .cloned()
        .unwrap_or_else(|| User::new(body.discord_id.clone(), body.username.clone()));
    user.username = body.username;
    if let Some(region) = body.plus_region {
        user.plus.plus_region = Some(region);
    }
    if let Some(server) = body.membership_status {
        user.plus.membership_status = Some(server);
    }
    db.upsert_user(user.clone());
    if let Err(e) = db.save(&state.config.database_path()).await {
        return error_response(e);
    }

    (StatusCode::CREATED, Json(user)).into_response()
}
