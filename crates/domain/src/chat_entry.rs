//! 聊天记录实体
//!
//! 一条已转发的消息，追加后不可变；顺序即追加顺序，
//! 时间戳相同的记录由存储层的插入序号决定先后。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChatEntryId, ChatPayload, MatchId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub id: ChatEntryId,
    pub match_id: MatchId,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub payload: ChatPayload,
    /// 追加时刻分配的时间戳
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(
        id: ChatEntryId,
        match_id: MatchId,
        sender_id: UserId,
        payload: ChatPayload,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            match_id,
            sender_id,
            payload,
            timestamp,
        }
    }
}
