//! Router and member-facing handlers for the JSON API.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::admin::admin_router;
use super::auth;
use crate::config::AppConfig;
use crate::error::PlusError;
use crate::managers::{BallotEntry, NewSuggestion, SharedSuggestionManager, SharedVotingManager};
use crate::models::PlusServer;
use crate::state::SharedPlusDatabase;

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SharedPlusDatabase,
    pub config: AppConfig,
    pub suggestion_manager: SharedSuggestionManager,
    pub voting_manager: SharedVotingManager,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Map a domain error onto a status code and JSON body.
pub(super) fn error_response(err: PlusError) -> Response {
    let status = match err {
        PlusError::AccessDenied { .. } => StatusCode::FORBIDDEN,
        PlusError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        PlusError::Operation { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Start the API server.
pub async fn start_web_server(state: AppState) -> anyhow::Result<()> {
    let port = state.config.bind_port;

    let app = Router::new()
        .route("/", get(health))
        .route("/plus/access", get(has_access))
        .route("/plus/info", get(voting_info))
        .route("/plus/voting", get(candidates_for_voting))
        .route("/plus/votes", post(submit_votes))
        .route(
            "/plus/suggestions",
            get(list_suggestions).post(add_suggestion),
        )
        .route("/plus/summaries", get(list_summaries))
        .with_state(state.clone())
        .nest("/admin", admin_router(state))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Plus server API listening on http://{}", addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> &'static str {
    "Plus Server API Running"
}

#[derive(Deserialize)]
struct AccessQuery {
    discord_id: String,
    server: PlusServer,
}

/// GET /plus/access - whether a user may enter a server
async fn has_access(
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Json<bool> {
    Json(
        state
            .voting_manager
            .has_access(&query.discord_id, query.server)
            .await,
    )
}

/// GET /plus/info - voting window and invite overview
async fn voting_info(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.voting_manager.voting_info(&caller).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /plus/voting - the caller's ballot sheet
async fn candidates_for_voting(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.voting_manager.candidates_for_voting(&caller).await {
        Ok(sheet) => Json(sheet).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct SubmitVotesRequest {
    votes: Vec<BallotEntry>,
}

/// POST /plus/votes - submit or replace the caller's ballot
async fn submit_votes(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitVotesRequest>,
) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.voting_manager.submit_votes(&caller, body.votes).await {
        Ok(recorded) => Json(serde_json::json!({ "recorded": recorded })).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /plus/suggestions - pending nominations visible to the caller
async fn list_suggestions(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.suggestion_manager.list_suggestions(&caller).await {
        Ok(suggestions) => Json(suggestions).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /plus/suggestions - nominate a user for membership
async fn add_suggestion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewSuggestion>,
) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.suggestion_manager.add_suggestion(&caller, body).await {
        Ok(suggestion) => (StatusCode::CREATED, Json(suggestion)).into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /plus/summaries - archived voting results
async fn list_summaries(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match auth::resolve_caller(&headers, &state.db).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    match state.voting_manager.summaries(&caller).await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => error_response(e),
    }
}
