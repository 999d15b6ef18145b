use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use application::services::{LoginRequest, MatchOutcome, SignupRequest};
use domain::{ChatEntry, UserProfile};

use crate::{auth::AuthResponse, error::ApiError, state::AppState, ws_connection::WsConnection};

#[derive(Debug, Deserialize)]
struct SignupPayload {
    username: String,
    email: String,
    password: String,
    gender: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    /// 邮箱或用户名
    identifier: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    user: UserProfile,
    matched_with: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FindMatchResponse {
    match_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    match_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partner: Option<UserProfile>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    sender_id: Uuid,
    message: Option<String>,
    image: Option<String>,
    timestamp: DateTime<Utc>,
}

impl From<&ChatEntry> for HistoryEntry {
    fn from(entry: &ChatEntry) -> Self {
        Self {
            sender_id: entry.sender_id.into(),
            message: entry.payload.message().map(str::to_owned),
            image: entry.payload.image().map(str::to_owned),
            timestamp: entry.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    chat_history: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SatisfiedPayload {
    match_id: Uuid,
}

#[derive(Debug, Serialize)]
struct SatisfiedResponse {
    closed: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/find-match", post(find_match))
        .route("/match/{match_id}/history", get(match_history))
        .route("/satisfied", post(satisfied))
        .route("/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupPayload>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let user = state
        .user_service
        .signup(SignupRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
            gender: payload.gender,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id.into())?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserProfile::from(&user),
            token,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .user_service
        .login(LoginRequest {
            identifier: payload.identifier,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id.into())?;
    Ok(Json(AuthResponse {
        user: UserProfile::from(&user),
        token,
    }))
}

async fn me(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state.user_service.get_user(user_id).await?;

    Ok(Json(MeResponse {
        matched_with: user.matched_with.map(Uuid::from),
        user: UserProfile::from(&user),
    }))
}

/// 查找或创建配对；没有候选不是错误，返回 matchFound: false
async fn find_match(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<FindMatchResponse>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;

    let response = match state
        .matchmaking_service
        .find_or_create_match(user_id)
        .await?
    {
        MatchOutcome::Found { match_id, partner } => FindMatchResponse {
            match_found: true,
            match_id: Some(match_id.into()),
            partner: Some(partner),
        },
        MatchOutcome::NoCandidate => FindMatchResponse {
            match_found: false,
            match_id: None,
            partner: None,
        },
    };

    Ok(Json(response))
}

async fn match_history(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let entries = state
        .chat_session_service
        .fetch_history(match_id, user_id)
        .await?;

    Ok(Json(HistoryResponse {
        chat_history: entries.iter().map(HistoryEntry::from).collect(),
    }))
}

/// HTTP 版满意投票，与 WebSocket 的 satisfied 帧等价
async fn satisfied(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SatisfiedPayload>,
) -> Result<Json<SatisfiedResponse>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    let outcome = state
        .chat_session_service
        .record_satisfaction(payload.match_id, user_id)
        .await?;

    Ok(Json(SatisfiedResponse {
        closed: outcome == domain::SatisfactionOutcome::Closed,
    }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    // 升级前完成认证，无效 token 直接拒绝握手
    let claims = state.jwt_service.verify_token(&query.token)?;
    let user_id = claims.user_id;

    Ok(ws.on_upgrade(move |socket| async move {
        WsConnection::new(state, user_id).run(socket).await;
    }))
}
