//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::app::AppState;
use crate::game::schema::GameSnapshot;
use crate::game::{GameError, GameHandle, LoadDepth};
use crate::store::{AccountId, RecordId, Replica};
use crate::util::time::{uptime_secs, INSPECTION_WAIT};
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origins
        .iter()
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let cors = if allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(allowed_origins)
    };

    // The socket route stays outside the timeout; sessions are long-lived.
    let http_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/games/:id", get(game_handler))
        .layer(TimeoutLayer::new(Duration::from_secs(10)));

    Router::new()
        .merge(http_routes)
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_games: usize,
    active_participants: usize,
    replicas: usize,
    records: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_games: state.participants.games(),
        active_participants: state.participants.count(),
        replicas: state.hub.peer_count(),
        records: state.hub.record_count(),
    })
}

// ============================================================================
// Game inspection
// ============================================================================

#[derive(Serialize)]
struct GameResponse {
    #[serde(flatten)]
    snapshot: GameSnapshot,
    /// Participants connected to this game on this server
    connected: usize,
}

/// Deep snapshot of a game. 202 while some players are still stubs.
async fn game_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id: RecordId = id
        .parse()
        .map_err(|e: crate::store::StoreError| AppError::BadRequest(e.to_string()))?;

    let snapshot = inspect(&state, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("game {} has not replicated", id)))?;

    let status = if snapshot.players_loaded() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let connected = state.participants.in_game(id);
    Ok((status, Json(GameResponse { snapshot, connected })).into_response())
}

/// Read `id` through a replica that lives only for this request, waiting
/// up to `INSPECTION_WAIT` for its players to resolve
async fn inspect(state: &AppState, id: RecordId) -> Result<Option<GameSnapshot>, GameError> {
    let replica = Replica::connect(&state.hub, AccountId::new());
    let game = GameHandle::attach(&replica, id);
    let mut snapshots = Box::pin(game.snapshots());

    let mut latest = None;
    let _ = tokio::time::timeout(INSPECTION_WAIT, async {
        while let Some(snapshot) = snapshots.next().await {
            let complete = snapshot.players_loaded();
            latest = Some(snapshot);
            if complete {
                break;
            }
        }
    })
    .await;

    match latest {
        Some(snapshot) => Ok(Some(snapshot)),
        // Records that replicated but are not games fail here
        None => game.load(LoadDepth::Deep),
    }
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

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GameError> for AppError {
    fn from(e: GameError) -> Self {
        match e {
            GameError::Store(crate::store::StoreError::WrongKind { record, .. }) => {
                AppError::NotFound(format!("{} is not a game", record))
            }
            other => {
                warn!(error = %other, "Game inspection failed");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::bootstrap;
    use crate::store::{Member, Role};
    use crate::util::time::HUB_DELIVERY_PERIOD;

    fn state() -> AppState {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.replication_latency = Duration::ZERO;
        let state = AppState::new(config);
        tokio::spawn(state.hub.clone().run(HUB_DELIVERY_PERIOD));
        state
    }

    async fn json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn malformed_game_ids_are_bad_requests() {
        let Err(err) = game_handler(State(state()), Path("game-1".into())).await else {
            panic!("malformed id was accepted");
        };
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn games_load_through_a_short_lived_replica() {
        let state = state();
        let replica = Replica::connect(&state.hub, AccountId::new());
        let game = bootstrap(&replica, None).unwrap().into_handle();

        let response = game_handler(State(state.clone()), Path(game.id().to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json(response).await;
        assert_eq!(body["id"], game.id().to_string());
        assert_eq!(body["status"], "waiting");
        assert_eq!(body["connected"], 0);

        // Only the creator stays attached; inspections leave no interest behind.
        assert_eq!(state.hub.peer_count(), 1);
    }

    #[tokio::test]
    async fn unknown_games_are_not_found_and_release_their_replica() {
        let state = state();
        let Err(err) = game_handler(State(state.clone()), Path(RecordId::new().to_string())).await
        else {
            panic!("unknown game was found");
        };
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(state.hub.peer_count(), 0);
    }

    #[tokio::test]
    async fn records_that_are_not_games_are_not_found() {
        let state = state();
        let replica = Replica::connect(&state.hub, AccountId::new());
        let group = replica.create_group();
        replica
            .grant(group, Member::Everyone, Role::Reader)
            .unwrap();
        let list = replica.create_list(group, Vec::new()).unwrap();

        let Err(err) = game_handler(State(state.clone()), Path(list.to_string())).await else {
            panic!("a list was served as a game");
        };
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn health_reports_hub_size() {
        let state = state();
        let Json(health) = health_handler(State(state.clone())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.replicas, 0);
        assert_eq!(health.active_participants, 0);
    }
}
