use async_trait::async_trait;
use domain::{ChatEntry, MatchId};
use thiserror::Error;

/// 一次面向配对频道的广播
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MatchBroadcast {
    pub match_id: MatchId,
    pub event: MatchEvent,
}

/// 配对频道内的事件
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum MatchEvent {
    /// 一条新的聊天记录（已持久化后才广播）
    Message(ChatEntry),
    /// 双方满意，配对已关闭；每个配对最多广播一次
    Closed,
}

impl MatchBroadcast {
    pub fn message(match_id: MatchId, entry: ChatEntry) -> Self {
        Self {
            match_id,
            event: MatchEvent::Message(entry),
        }
    }

    pub fn closed(match_id: MatchId) -> Self {
        Self {
            match_id,
            event: MatchEvent::Closed,
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[async_trait]
pub trait MatchBroadcaster: Send + Sync {
    async fn broadcast(&self, payload: MatchBroadcast) -> Result<(), BroadcastError>;
}
