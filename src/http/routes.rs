//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::debug;
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::require_hit_resolver;
use crate::game::{DamageRequest, MatchHandle, MatchInput, MatchPhase, WeaponId};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::MatchSnapshot;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Comma-separated CLIENT_ORIGIN, any origin when unset
    let allow_origin = match &state.config.client_origin {
        Some(origins) => AllowOrigin::list(
            origins
                .split(',')
                .filter_map(|s| s.trim().parse::<HeaderValue>().ok()),
        ),
        None => AllowOrigin::any(),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let match_routes = Router::new()
        .route("/matches", get(list_matches_handler))
        .route("/matches/:id", get(match_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(10)));

    // Hit reports mutate server-owned state; resolver only
    let hit_routes = Router::new()
        .route("/matches/:id/damage", post(damage_handler))
        .route("/matches/:id/overlap", post(overlap_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_hit_resolver,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .merge(match_routes)
        .merge(hit_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Debug, Serialize)]
struct MatchSummary {
    match_id: Uuid,
    phase: MatchPhase,
    countdown: u32,
    players: usize,
    max_players: usize,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&MatchHandle> for MatchSummary {
    fn from(handle: &MatchHandle) -> Self {
        let snapshot = handle.snapshot_rx.borrow();
        Self {
            match_id: handle.id,
            phase: snapshot.phase,
            countdown: snapshot.countdown,
            players: handle.player_count(),
            max_players: handle.max_players,
            created_at: handle.created_at,
        }
    }
}

async fn list_matches_handler(State(state): State<AppState>) -> Json<Vec<MatchSummary>> {
    let mut matches: Vec<MatchSummary> = state
        .match_registry
        .handles()
        .iter()
        .map(MatchSummary::from)
        .collect();
    matches.sort_by_key(|m| m.created_at);
    Json(matches)
}

async fn match_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchSnapshot>, AppError> {
    let handle = find_match(&state, id)?;
    Ok(Json(handle.latest_snapshot()))
}

async fn damage_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DamageRequest>,
) -> Result<StatusCode, AppError> {
    let Some(amount) = req.kind.amount() else {
        return Err(AppError::BadRequest(
            "damage must be a non-negative number from a valid source".to_string(),
        ));
    };
    let handle = find_match(&state, id)?;
    debug!(match_id = %id, target = %req.target, amount, "Damage reported");
    submit(&handle, MatchInput::Damage(req)).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct OverlapRequest {
    combatant: Uuid,
    /// Absent when the overlap ended
    #[serde(default)]
    weapon: Option<WeaponId>,
}

async fn overlap_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OverlapRequest>,
) -> Result<StatusCode, AppError> {
    let handle = find_match(&state, id)?;
    submit(
        &handle,
        MatchInput::Overlap {
            combatant: req.combatant,
            weapon: req.weapon,
        },
    )
    .await?;
    Ok(StatusCode::ACCEPTED)
}

fn find_match(state: &AppState, id: Uuid) -> Result<MatchHandle, AppError> {
    state
        .match_registry
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("match {id}")))
}

async fn submit(handle: &MatchHandle, input: MatchInput) -> Result<(), AppError> {
    handle
        .input_tx
        .send(input)
        .await
        .map_err(|_| AppError::Gone(format!("match {} has ended", handle.id)))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Gone(msg) => (StatusCode::GONE, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
