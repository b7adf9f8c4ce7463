//! HTTP route definitions

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::presence::handler::ws_handler;
use crate::presence::{PlayerSnapshot, PresenceChannel, RosterSync};
use crate::store::{SeatRow, StoreError};
use crate::util::time::{unix_millis, uptime_secs};
use crate::world::session::SceneView;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/roster", get(roster_handler))
        .route("/admin/online", get(online_handler))
        .route("/venues/:venue_instance_id/seats", get(seats_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/:player_id/scene", get(scene_handler));

    // CORS only matters for browser clients on another origin
    let router = match cors_layer(state.config.client_origin.as_deref()) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Support multiple origins (comma-separated in CLIENT_ORIGIN)
fn cors_layer(client_origin: Option<&str>) -> Option<CorsLayer> {
    let allowed_origins: Vec<header::HeaderValue> = client_origin?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();
    if allowed_origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(allowed_origins)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]),
    )
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    live_players: usize,
    local_sessions: usize,
    store: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        live_players: state.hub.live_count(unix_millis()),
        local_sessions: state.sessions.len(),
        store: state.store.backend(),
    })
}

// ============================================================================
// Presence endpoints
// ============================================================================

async fn roster_handler(State(state): State<AppState>) -> Json<RosterSync> {
    Json(state.hub.roster(unix_millis()))
}

#[derive(Serialize)]
struct OnlineResponse {
    count: usize,
    players: Vec<PlayerSnapshot>,
}

async fn online_handler(State(state): State<AppState>) -> Json<OnlineResponse> {
    let players = state.hub.online_now(unix_millis());
    Json(OnlineResponse {
        count: players.len(),
        players,
    })
}

// ============================================================================
// Venue endpoints
// ============================================================================

#[derive(Serialize)]
struct SeatsResponse {
    venue_instance_id: String,
    occupied: usize,
    seats: Vec<SeatRow>,
}

async fn seats_handler(
    State(state): State<AppState>,
    Path(venue_instance_id): Path<String>,
) -> Result<Json<SeatsResponse>, AppError> {
    let seats = state.store.seats(&venue_instance_id).await?;
    if seats.is_empty() {
        return Err(AppError::NotFound(format!(
            "no open seating for {venue_instance_id}"
        )));
    }

    Ok(Json(SeatsResponse {
        occupied: seats.iter().filter(|s| s.occupant_id.is_some()).count(),
        venue_instance_id,
        seats,
    }))
}

// ============================================================================
// Local session endpoints
// ============================================================================

#[derive(Serialize)]
struct SessionSummary {
    player_id: Uuid,
    room: String,
    seated: bool,
}

async fn sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let mut sessions: Vec<SessionSummary> = state
        .sessions
        .handles()
        .iter()
        .filter(|handle| !handle.is_closed())
        .map(|handle| {
            let scene = handle.scene();
            SessionSummary {
                player_id: handle.player_id,
                room: scene.local.room.to_string(),
                seated: scene.local.seat.is_some(),
            }
        })
        .collect();
    sessions.sort_by_key(|s| s.player_id);
    Json(sessions)
}

async fn scene_handler(
    State(state): State<AppState>,
    Path(player_id): Path<Uuid>,
) -> Result<Json<SceneView>, AppError> {
    let handle = state
        .sessions
        .get(&player_id)
        .ok_or_else(|| AppError::NotFound(format!("no local session {player_id}")))?;
    Ok(Json(handle.scene()))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Store(e) => {
                tracing::error!(error = %e, "Store request failed");
                (StatusCode::BAD_GATEWAY, "store unavailable".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
