use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    services::{
        ChatSessionDependencies, ChatSessionService, MatchmakingDependencies, MatchmakingService,
        UserService, UserServiceDependencies,
    },
    LocalMatchBroadcaster, MemoryPresenceRegistry, SystemClock,
};
use axum::Router;
use infrastructure::{BcryptPasswordHasher, MemoryStorage};
use reqwest::Client;
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use web_api::{router as build_router_fn, AppState, JwtConfig, JwtService};

/// 使用内存存储组装完整的路由，测试无需外部依赖
pub fn build_router() -> Router {
    let storage = MemoryStorage::new();
    let user_repository: Arc<dyn application::UserRepository> = Arc::new(storage.clone());
    let match_repository: Arc<dyn application::MatchRepository> = Arc::new(storage);

    // 测试用低 cost，加速注册
    let password_hasher: Arc<dyn application::PasswordHasher> =
        Arc::new(BcryptPasswordHasher::new(Some(4)));
    let clock: Arc<dyn application::Clock> = Arc::new(SystemClock);
    let broadcaster = LocalMatchBroadcaster::default();
    let presence: Arc<dyn application::PresenceRegistry> = Arc::new(MemoryPresenceRegistry::new());

    let user_service = UserService::new(UserServiceDependencies {
        user_repository: user_repository.clone(),
        password_hasher,
        clock: clock.clone(),
    });

    let matchmaking_service = MatchmakingService::new(MatchmakingDependencies {
        user_repository: user_repository.clone(),
        match_repository: match_repository.clone(),
        clock: clock.clone(),
    });

    let chat_session_service = ChatSessionService::new(ChatSessionDependencies {
        match_repository,
        user_repository,
        presence: presence.clone(),
        broadcaster: Arc::new(broadcaster.clone()),
        clock,
    });

    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: "test-secret-key-with-at-least-32-characters".to_string(),
        expiration_hours: 24,
    }));

    let state = AppState::new(
        Arc::new(user_service),
        Arc::new(matchmaking_service),
        Arc::new(chat_session_service),
        broadcaster,
        presence,
        jwt_service,
    );

    build_router_fn(state)
}

/// 启动测试服务器，返回地址和关闭句柄
pub async fn start_server() -> (SocketAddr, oneshot::Sender<()>) {
    let router = build_router();
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    // allow server to start
    sleep(Duration::from_millis(100)).await;
    (addr, shutdown_tx)
}

/// 注册用户并返回 (token, user json)
pub async fn signup(
    client: &Client,
    base: &str,
    username: &str,
    gender: &str,
) -> (String, serde_json::Value) {
    let response = client
        .post(format!("{base}/api/signup"))
        .json(&json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "secret",
            "gender": gender,
        }))
        .send()
        .await
        .expect("signup request")
        .json::<serde_json::Value>()
        .await
        .expect("signup json");

    let token = response["token"]
        .as_str()
        .unwrap_or_else(|| panic!("signup failed: {response:?}"))
        .to_owned();
    (token, response["user"].clone())
}
