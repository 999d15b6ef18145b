//! WebSocket 连接管理
//!
//! 每个连接的生命周期：认证（升级前）→ 注册在线状态 → 等待 join 帧
//! → 订阅配对频道 → 双向转发，直到任一侧断开，最后注销在线状态。

use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConnectionId, MatchId, UserId};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use application::MatchEvent;

use crate::{
    error::ApiError,
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
enum WsCommand {
    SendFrame(ServerMessage),
    SendPong(Vec<u8>),
}

pub struct WsConnection {
    state: AppState,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl WsConnection {
    pub fn new(state: AppState, user_id: Uuid) -> Self {
        Self {
            state,
            user_id: UserId::from(user_id),
            connection_id: ConnectionId::generate(),
        }
    }

    /// 运行 WebSocket 连接的主循环
    pub async fn run(self, socket: WebSocket) {
        self.state
            .presence
            .register(self.user_id, self.connection_id)
            .await;
        tracing::info!(user_id = %self.user_id, connection = %self.connection_id, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();

        // join 阶段：第一有效帧必须是 join，此前的写操作直接走 sender
        let match_id = match self.join_phase(&mut sender, &mut incoming).await {
            Some(match_id) => match_id,
            None => {
                self.cleanup().await;
                return;
            }
        };

        let mut stream = self.state.broadcaster.subscribe(match_id);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理写命令和频道事件
        let self_id = self.user_id;
        let send_task = {
            let cmd_tx = cmd_tx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(cmd) = cmd_rx.recv() => {
                            let ok = match cmd {
                                WsCommand::SendFrame(frame) => send_frame(&mut sender, &frame).await,
                                WsCommand::SendPong(data) => {
                                    sender.send(WsMessage::Pong(data.into())).await.is_ok()
                                }
                            };
                            if !ok {
                                break;
                            }
                        }
                        Some(broadcast) = stream.recv() => {
                            let frame = match broadcast.event {
                                // 发送方已经通过回显拿到自己的消息
                                MatchEvent::Message(entry) if entry.sender_id == self_id => continue,
                                MatchEvent::Message(entry) => ServerMessage::from_entry(&entry),
                                MatchEvent::Closed => ServerMessage::MatchClosed {
                                    match_id: broadcast.match_id.into(),
                                },
                            };
                            if cmd_tx.send(WsCommand::SendFrame(frame)).await.is_err() {
                                break;
                            }
                        }
                        else => break,
                    }
                }
            })
        };

        // 接收任务：解析客户端帧并分发到应用服务
        let recv_task = {
            let state = self.state.clone();
            let user_id = self.user_id;
            tokio::spawn(async move {
                while let Some(Ok(message)) = incoming.next().await {
                    if handle_incoming(message, &state, user_id, match_id, &cmd_tx)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        // 任一任务结束即视为连接断开，另一个任务随之停止
        let mut send_task = send_task;
        let mut recv_task = recv_task;
        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        self.cleanup().await;
    }

    /// 等待 join 帧并校验参与资格；连接断开返回 None
    async fn join_phase(
        &self,
        sender: &mut SplitSink<WebSocket, WsMessage>,
        incoming: &mut SplitStream<WebSocket>,
    ) -> Option<MatchId> {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                WsMessage::Text(text) => {
                    let frame = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(frame) => frame,
                        Err(err) => {
                            let error = ApiError::bad_request(format!("invalid frame: {err}"));
                            send_frame(sender, &ServerMessage::from_error(&error)).await;
                            continue;
                        }
                    };
                    match frame {
                        ClientMessage::Join { match_id } => {
                            match self
                                .state
                                .chat_session_service
                                .join(match_id, self.user_id.into())
                                .await
                            {
                                Ok(joined) => {
                                    let frame = ServerMessage::Joined {
                                        match_id,
                                        partner_online: joined.partner_online,
                                    };
                                    if !send_frame(sender, &frame).await {
                                        return None;
                                    }
                                    return Some(joined.session.id);
                                }
                                Err(err) => {
                                    let error = ApiError::from(err);
                                    if !send_frame(sender, &ServerMessage::from_error(&error)).await
                                    {
                                        return None;
                                    }
                                }
                            }
                        }
                        other => {
                            tracing::debug!(frame = ?other, "join 之前收到其他帧，忽略");
                            let error = ApiError::bad_request("join required first");
                            send_frame(sender, &ServerMessage::from_error(&error)).await;
                        }
                    }
                }
                WsMessage::Ping(data) => {
                    if sender.send(WsMessage::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                WsMessage::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    /// 连接断开时清理在线状态
    async fn cleanup(&self) {
        self.state
            .presence
            .unregister_connection(self.connection_id)
            .await;
        tracing::info!(user_id = %self.user_id, connection = %self.connection_id, "WebSocket 连接已断开，在线状态已清理");
    }
}

async fn send_frame(sender: &mut SplitSink<WebSocket, WsMessage>, frame: &ServerMessage) -> bool {
    let payload = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return true;
        }
    };
    sender.send(WsMessage::Text(payload.into())).await.is_ok()
}

/// 处理来自客户端的消息
async fn handle_incoming(
    message: WsMessage,
    state: &AppState,
    user_id: UserId,
    match_id: MatchId,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Close(_) => {
            tracing::debug!(user_id = %user_id, "WebSocket 收到关闭消息");
            return Err(());
        }
        WsMessage::Ping(data) => {
            if cmd_tx
                .send(WsCommand::SendPong(data.to_vec()))
                .await
                .is_err()
            {
                return Err(());
            }
        }
        WsMessage::Pong(_) => {}
        WsMessage::Text(text) => {
            let frame = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(frame) => frame,
                Err(err) => {
                    let error = ApiError::bad_request(format!("invalid frame: {err}"));
                    return reply(cmd_tx, ServerMessage::from_error(&error)).await;
                }
            };
            match frame {
                ClientMessage::SendMessage { message, image } => {
                    let request = application::services::RelayMessageRequest {
                        match_id: match_id.into(),
                        sender_id: user_id.into(),
                        message,
                        image,
                    };
                    match state.chat_session_service.relay_message(request).await {
                        // 回显服务端定稿的记录，发送方与历史保持一致
                        Ok(entry) => {
                            return reply(cmd_tx, ServerMessage::from_entry(&entry)).await
                        }
                        Err(err) => {
                            let error = ApiError::from(err);
                            return reply(cmd_tx, ServerMessage::from_error(&error)).await;
                        }
                    }
                }
                ClientMessage::Satisfied => {
                    // 关闭事件经由频道广播送达双方，这里只报告失败
                    if let Err(err) = state
                        .chat_session_service
                        .record_satisfaction(match_id.into(), user_id.into())
                        .await
                    {
                        let error = ApiError::from(err);
                        return reply(cmd_tx, ServerMessage::from_error(&error)).await;
                    }
                }
                ClientMessage::Join { .. } => {
                    let error = ApiError::bad_request("already joined");
                    return reply(cmd_tx, ServerMessage::from_error(&error)).await;
                }
            }
        }
        WsMessage::Binary(_) => {
            tracing::debug!("忽略二进制帧");
        }
    }
    Ok(())
}

async fn reply(cmd_tx: &mpsc::Sender<WsCommand>, frame: ServerMessage) -> Result<(), ()> {
    cmd_tx
        .send(WsCommand::SendFrame(frame))
        .await
        .map_err(|_| ())
}
