//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{Extension, Path, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::error;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedUser};
use crate::session::SessionError;
use crate::store::{CueItem, PurchaseError, RoomId, UserId};
use crate::util::time::uptime_secs;
use crate::ws::ws_handler;

/// Upper bound for request-style calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/rooms", post(create_room_handler))
        .route("/rooms/:room_id/join", post(join_room_handler))
        .route("/profile", get(profile_handler))
        .route("/market", get(market_handler))
        .route("/market/buy", post(buy_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    live_connections: usize,
    storage: &'static str,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        live_connections: state.connections.len(),
        storage: state.config.storage_backend(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct CreateRoomResponse {
    room_id: RoomId,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), AppError> {
    let room_id = state.sessions.create_room(auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(CreateRoomResponse { room_id })))
}

#[derive(Debug, Serialize, Deserialize)]
struct JoinRoomResponse {
    room_id: RoomId,
    player1_id: UserId,
    player2_id: UserId,
}

async fn join_room_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    let room = state.sessions.join_room(auth.user_id, room_id).await?;
    Ok(Json(JoinRoomResponse {
        room_id: room.room_id,
        player1_id: room.player1_id,
        player2_id: auth.user_id,
    }))
}

// ============================================================================
// Profile and market endpoints
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ProfileResponse {
    user_id: UserId,
    user_name: String,
    coins: i64,
    total_games: i64,
    win_games: i64,
    /// Absent until the first finished game
    win_rate: Option<f64>,
    cues_owned: i64,
}

async fn profile_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = state
        .profiles
        .get_profile(auth.user_id)
        .await
        .map_err(|e| AppError::internal(&e))?
        .ok_or_else(|| AppError::NotFound("unknown_user".to_string()))?;

    Ok(Json(ProfileResponse {
        win_rate: profile.win_rate(),
        user_id: profile.user_id,
        user_name: profile.user_name,
        coins: profile.coins,
        total_games: profile.total_games,
        win_games: profile.win_games,
        cues_owned: profile.cues_owned,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
struct MarketResponse {
    cues_owned: i64,
    cues: Vec<CueItem>,
}

async fn market_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<MarketResponse>, AppError> {
    let profile = state
        .profiles
        .get_profile(auth.user_id)
        .await
        .map_err(|e| AppError::internal(&e))?
        .ok_or_else(|| AppError::NotFound("unknown_user".to_string()))?;

    let cues = state
        .profiles
        .list_cues()
        .await
        .map_err(|e| AppError::internal(&e))?;

    Ok(Json(MarketResponse {
        cues_owned: profile.cues_owned,
        cues,
    }))
}

#[derive(Debug, Deserialize)]
struct BuyRequest {
    cue_id: u8,
}

#[derive(Debug, Serialize, Deserialize)]
struct BuyResponse {
    coins: i64,
    cues_owned: i64,
}

async fn buy_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<BuyRequest>,
) -> Result<Json<BuyResponse>, AppError> {
    let wallet = state.profiles.purchase_cue(auth.user_id, req.cue_id).await?;
    Ok(Json(BuyResponse {
        coins: wallet.coins,
        cues_owned: wallet.cues_owned,
    }))
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

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Details are logged where the error is created, never returned
    #[error("Internal error")]
    Internal,
}

impl AppError {
    fn internal(err: &dyn std::error::Error) -> Self {
        error!(error = %err, "Request failed");
        AppError::Internal
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let code = err.code().to_string();
        match err {
            SessionError::Validation(_) | SessionError::InvalidWinner(_) => {
                AppError::BadRequest(code)
            }
            SessionError::AlreadyInRoom(_) => AppError::Conflict(code),
            SessionError::UnknownUser(_)
            | SessionError::RoomNotFound(_)
            | SessionError::NotParticipant(_)
            | SessionError::RelayTargetMissing { .. } => AppError::NotFound(code),
            SessionError::Storage(_) => AppError::internal(&err),
        }
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::UnknownUser(_) => AppError::NotFound("unknown_user".to_string()),
            PurchaseError::UnknownCue(_) => AppError::NotFound("unknown_cue".to_string()),
            PurchaseError::AlreadyOwned(_) => AppError::Conflict("already_owned".to_string()),
            PurchaseError::InsufficientCoins { .. } => {
                AppError::BadRequest("insufficient_coins".to_string())
            }
            PurchaseError::Store(_) => AppError::internal(&err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error".to_string(),
            ),
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
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::http::middleware::sign_token;
    use crate::session::ConnectionHandle;
    use crate::store::{MemoryProfileStore, MemoryRoomStore, UserProfile};
    use crate::util::time::unix_secs;
    use crate::ws::protocol::ServerMsg;

    const SECRET: &str = "route-secret";

    fn test_state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "AUTH_JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();

        let profiles = Arc::new(MemoryProfileStore::new());
        profiles.insert(UserProfile::new(1, "alice").with_coins(250));
        profiles.insert(UserProfile::new(2, "bob"));
        profiles.insert(UserProfile::new(3, "carol"));

        AppState::with_stores(config, Arc::new(MemoryRoomStore::new()), profiles)
    }

    fn token(user_id: UserId) -> String {
        sign_token(&json!({"sub": user_id, "exp": unix_secs() + 300}), SECRET)
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        user_id: Option<UserId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user_id {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_is_public() {
        let router = build_router(test_state());
        let (status, body) = call(&router, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
    }

    #[tokio::test]
    async fn room_routes_require_token() {
        let router = build_router(test_state());
        let (status, _) = call(&router, Method::POST, "/rooms", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_then_join_room() {
        let router = build_router(test_state());

        let (status, body) = call(&router, Method::POST, "/rooms", Some(1), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let room_id = body["room_id"].as_i64().unwrap();

        let (status, body) = call(&router, Method::POST, "/rooms", Some(1), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_in_room");

        let join = format!("/rooms/{}/join", room_id);
        let (status, body) = call(&router, Method::POST, &join, Some(2), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"room_id": room_id, "player1_id": 1, "player2_id": 2})
        );

        let (status, body) = call(&router, Method::POST, &join, Some(3), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "room_not_found");
    }

    #[tokio::test]
    async fn default_backend_registers_token_subjects() {
        let config = Config::from_lookup(|key| match key {
            "AUTH_JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        let state = AppState::new(config);
        let router = build_router(state.clone());

        let (status, body) = call(&router, Method::POST, "/rooms", Some(11), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let room_id = body["room_id"].as_i64().unwrap();

        let join = format!("/rooms/{}/join", room_id);
        let (status, _) = call(&router, Method::POST, &join, Some(12), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&router, Method::GET, "/profile", Some(12), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_name"], "player12");
        assert_eq!(body["cues_owned"], 1);

        let (first, mut first_rx) = ConnectionHandle::channel(11, 8);
        let (second, mut second_rx) = ConnectionHandle::channel(12, 8);
        state.sessions.confirm_presence(&first, room_id).await.unwrap();
        state.sessions.confirm_presence(&second, room_id).await.unwrap();

        let start = ServerMsg::GameStart {
            player1_id: 11,
            player2_id: 12,
            room_id,
        };
        assert_eq!(first_rx.try_recv().unwrap(), ServerMsg::PresenceConfirmed { room_id });
        assert_eq!(first_rx.try_recv().unwrap(), start);
        assert_eq!(second_rx.try_recv().unwrap(), start);
    }

    #[tokio::test]
    async fn unknown_user_cannot_create_room() {
        let router = build_router(test_state());
        let (status, body) = call(&router, Method::POST, "/rooms", Some(99), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_user");
    }

    #[tokio::test]
    async fn profile_reports_missing_win_rate() {
        let router = build_router(test_state());
        let (status, body) = call(&router, Method::GET, "/profile", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_name"], "alice");
        assert_eq!(body["coins"], 250);
        assert_eq!(body["win_rate"], Value::Null);
    }

    #[tokio::test]
    async fn market_purchase_flow() {
        let router = build_router(test_state());

        let (status, body) = call(&router, Method::GET, "/market", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cues_owned"], 1);
        assert!(!body["cues"].as_array().unwrap().is_empty());

        let (status, body) = call(
            &router,
            Method::POST,
            "/market/buy",
            Some(1),
            Some(json!({"cue_id": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"coins": 50, "cues_owned": 3}));

        let (status, body) = call(
            &router,
            Method::POST,
            "/market/buy",
            Some(1),
            Some(json!({"cue_id": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "already_owned");

        let (status, body) = call(
            &router,
            Method::POST,
            "/market/buy",
            Some(1),
            Some(json!({"cue_id": 3})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "insufficient_coins");
    }
}
