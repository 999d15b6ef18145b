use std::sync::Arc;

use application::{
    services::{ChatSessionService, MatchmakingService, UserService},
    LocalMatchBroadcaster, PresenceRegistry,
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub matchmaking_service: Arc<MatchmakingService>,
    pub chat_session_service: Arc<ChatSessionService>,
    /// WebSocket 连接从这里订阅配对频道的事件流
    pub broadcaster: LocalMatchBroadcaster,
    pub presence: Arc<dyn PresenceRegistry>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        user_service: Arc<UserService>,
        matchmaking_service: Arc<MatchmakingService>,
        chat_session_service: Arc<ChatSessionService>,
        broadcaster: LocalMatchBroadcaster,
        presence: Arc<dyn PresenceRegistry>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            user_service,
            matchmaking_service,
            chat_session_service,
            broadcaster,
            presence,
            jwt_service,
        }
    }
}
