//! WebSocket 线上协议
//!
//! 帧为 JSON 文本，`type` 字段区分种类。字段名统一 camelCase，
//! 与 Web 客户端保持一致。

use chrono::{DateTime, Utc};
use domain::ChatEntry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// 客户端发来的帧
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// 进入配对频道；必须是连接后的第一帧
    #[serde(rename = "join", rename_all = "camelCase")]
    Join { match_id: Uuid },
    /// 转发一条消息，正文和图片至少要有一项
    #[serde(rename = "sendMessage")]
    SendMessage {
        message: Option<String>,
        image: Option<String>,
    },
    /// 对当前配对投满意票
    #[serde(rename = "satisfied")]
    Satisfied,
}

/// 服务端推送的帧
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined", rename_all = "camelCase")]
    Joined { match_id: Uuid, partner_online: bool },
    #[serde(rename = "receiveMessage", rename_all = "camelCase")]
    ReceiveMessage {
        sender_id: Uuid,
        message: Option<String>,
        image: Option<String>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "matchClosed", rename_all = "camelCase")]
    MatchClosed { match_id: Uuid },
    #[serde(rename = "error", rename_all = "camelCase")]
    Error { code: &'static str, message: String },
}

impl ServerMessage {
    pub fn from_entry(entry: &ChatEntry) -> Self {
        ServerMessage::ReceiveMessage {
            sender_id: entry.sender_id.into(),
            message: entry.payload.message().map(str::to_owned),
            image: entry.payload.image().map(str::to_owned),
            timestamp: entry.timestamp,
        }
    }

    pub fn from_error(error: &ApiError) -> Self {
        ServerMessage::Error {
            code: error.code(),
            message: error.message().to_owned(),
        }
    }
}
