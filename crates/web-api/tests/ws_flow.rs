//! WebSocket 集成测试：join、消息转发、满意投票与关闭广播

mod support;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::json;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

use support::{signup, start_server};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 注册一男一女直到撮合成功，返回 (token_a, token_b, match_id)
async fn paired_users(client: &Client, base: &str) -> (String, String, String) {
    let (token_a, _) = signup(client, base, "ann", "female").await;
    for i in 0..30 {
        let (token_b, _) = signup(client, base, &format!("beau{i}"), "male").await;
        let outcome = client
            .post(format!("{base}/api/find-match"))
            .header("authorization", format!("Bearer {token_b}"))
            .send()
            .await
            .expect("find match")
            .json::<serde_json::Value>()
            .await
            .expect("find match json");
        if outcome["matchFound"] == true {
            let match_id = outcome["matchId"].as_str().expect("matchId").to_owned();
            return (token_a, token_b, match_id);
        }
    }
    panic!("no candidate landed in ann's bucket");
}

async fn connect_ws(addr: &std::net::SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/api/ws?token={token}");
    let (socket, _) = connect_async(url.as_str()).await.expect("websocket connect");
    socket
}

async fn send_frame(socket: &mut WsClient, frame: serde_json::Value) {
    socket
        .send(WsMessage::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// 读取下一个文本帧并解析为 JSON，忽略 ping/pong
async fn recv_frame(socket: &mut WsClient) -> serde_json::Value {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        match message {
            WsMessage::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("json frame")
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// 连接并完成 join，返回已就绪的客户端
async fn join_match(addr: &std::net::SocketAddr, token: &str, match_id: &str) -> WsClient {
    let mut socket = connect_ws(addr, token).await;
    send_frame(&mut socket, json!({"type": "join", "matchId": match_id})).await;
    let joined = recv_frame(&mut socket).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["matchId"].as_str(), Some(match_id));
    socket
}

#[tokio::test]
async fn invalid_token_is_rejected_before_upgrade() {
    let (addr, shutdown_tx) = start_server().await;

    let url = format!("ws://{addr}/api/ws?token=not-a-valid-token");
    let result = connect_async(url.as_str()).await;
    assert!(result.is_err(), "handshake should be rejected");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn join_reports_partner_presence() {
    let (addr, shutdown_tx) = start_server().await;
    let base = format!("http://{addr}");
    let client = Client::new();

    let (token_a, token_b, match_id) = paired_users(&client, &base).await;

    // 对方尚未上线
    let mut socket_a = connect_ws(&addr, &token_a).await;
    send_frame(&mut socket_a, json!({"type": "join", "matchId": match_id})).await;
    let joined = recv_frame(&mut socket_a).await;
    assert_eq!(joined["type"], "joined");
    assert_eq!(joined["partnerOnline"], false);

    // 第二个连接能看到对方在线
    let mut socket_b = connect_ws(&addr, &token_b).await;
    send_frame(&mut socket_b, json!({"type": "join", "matchId": match_id})).await;
    let joined = recv_frame(&mut socket_b).await;
    assert_eq!(joined["partnerOnline"], true);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn outsider_cannot_join_someone_elses_match() {
    let (addr, shutdown_tx) = start_server().await;
    let base = format!("http://{addr}");
    let client = Client::new();

    let (_, _, match_id) = paired_users(&client, &base).await;
    let (outsider_token, _) = signup(&client, &base, "outsider", "female").await;

    let mut socket = connect_ws(&addr, &outsider_token).await;
    send_frame(&mut socket, json!({"type": "join", "matchId": match_id})).await;
    let frame = recv_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["code"], "NOT_PARTICIPANT");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn message_is_echoed_and_delivered_to_partner() {
    let (addr, shutdown_tx) = start_server().await;
    let base = format!("http://{addr}");
    let client = Client::new();

    let (token_a, token_b, match_id) = paired_users(&client, &base).await;
    let mut socket_a = join_match(&addr, &token_a, &match_id).await;
    let mut socket_b = join_match(&addr, &token_b, &match_id).await;

    send_frame(
        &mut socket_a,
        json!({"type": "sendMessage", "message": "hello there"}),
    )
    .await;

    // 发送方收到服务端定稿的回显
    let echo = recv_frame(&mut socket_a).await;
    assert_eq!(echo["type"], "receiveMessage");
    assert_eq!(echo["message"], "hello there");
    assert!(echo["timestamp"].as_str().is_some());

    // 对方收到同一条消息
    let delivered = recv_frame(&mut socket_b).await;
    assert_eq!(delivered["type"], "receiveMessage");
    assert_eq!(delivered["message"], "hello there");
    assert_eq!(delivered["senderId"], echo["senderId"]);

    // 图片消息同样转发
    send_frame(
        &mut socket_b,
        json!({"type": "sendMessage", "image": "data:image/png;base64,iVBORw0KGgo="}),
    )
    .await;
    let delivered = recv_frame(&mut socket_a).await;
    assert_eq!(delivered["type"], "receiveMessage");
    assert!(delivered["message"].is_null());
    assert_eq!(delivered["image"], "data:image/png;base64,iVBORw0KGgo=");

    // 空消息被拒绝，只有发送方收到错误
    send_frame(&mut socket_a, json!({"type": "sendMessage", "message": "   "})).await;
    let error = recv_frame(&mut socket_a).await;
    assert_eq!(error["type"], "error");

    // 消息进入了持久历史
    let history = client
        .get(format!("{base}/api/match/{match_id}/history"))
        .header("authorization", format!("Bearer {token_a}"))
        .send()
        .await
        .expect("history")
        .json::<serde_json::Value>()
        .await
        .expect("history json");
    let entries = history["chatHistory"].as_array().expect("chatHistory");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["message"], "hello there");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn mutual_satisfaction_broadcasts_closure_to_both() {
    let (addr, shutdown_tx) = start_server().await;
    let base = format!("http://{addr}");
    let client = Client::new();

    let (token_a, token_b, match_id) = paired_users(&client, &base).await;
    let mut socket_a = join_match(&addr, &token_a, &match_id).await;
    let mut socket_b = join_match(&addr, &token_b, &match_id).await;

    // 单方投票不产生任何帧，再发一条消息确认通道畅通
    send_frame(&mut socket_a, json!({"type": "satisfied"})).await;
    send_frame(&mut socket_a, json!({"type": "sendMessage", "message": "still here"})).await;
    let echo = recv_frame(&mut socket_a).await;
    assert_eq!(echo["type"], "receiveMessage");
    let delivered = recv_frame(&mut socket_b).await;
    assert_eq!(delivered["message"], "still here");

    // 第二票触发关闭，双方都收到 matchClosed
    send_frame(&mut socket_b, json!({"type": "satisfied"})).await;
    let closed_a = recv_frame(&mut socket_a).await;
    assert_eq!(closed_a["type"], "matchClosed");
    assert_eq!(closed_a["matchId"].as_str(), Some(match_id.as_str()));
    let closed_b = recv_frame(&mut socket_b).await;
    assert_eq!(closed_b["type"], "matchClosed");

    // 关闭后继续发消息被拒绝
    send_frame(&mut socket_a, json!({"type": "sendMessage", "message": "too late"})).await;
    let error = recv_frame(&mut socket_a).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "MATCH_CLOSED");

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn frames_before_join_are_rejected() {
    let (addr, shutdown_tx) = start_server().await;
    let base = format!("http://{addr}");
    let client = Client::new();

    let (token, _) = signup(&client, &base, "early", "male").await;
    let mut socket = connect_ws(&addr, &token).await;

    send_frame(&mut socket, json!({"type": "sendMessage", "message": "hi"})).await;
    let frame = recv_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");

    let _ = shutdown_tx.send(());
}
