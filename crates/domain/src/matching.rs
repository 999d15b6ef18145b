//! 配对会话实体与状态机
//!
//! 一个 Match 是两个用户之间的一次配对会话，
//! 生命周期为 active → closed，单向不可逆。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{MatchId, UserId};

/// 配对状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Active,
    Closed,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Active => write!(f, "active"),
            MatchStatus::Closed => write!(f, "closed"),
        }
    }
}

impl MatchStatus {
    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "active" => Ok(MatchStatus::Active),
            "closed" => Ok(MatchStatus::Closed),
            _ => Err(DomainError::invalid_argument(
                "status",
                "must be 'active' or 'closed'",
            )),
        }
    }
}

/// 满意投票的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatisfactionOutcome {
    /// 重复投票，无任何变化
    AlreadyRecorded,
    /// 第一票已记录，等待另一方
    Recorded,
    /// 双方都已投票，配对在本次调用中关闭
    Closed,
}

/// 配对会话实体
///
/// 不变量：
/// - 同一用户同一时刻最多参与一个 active 配对（由存储层的条件更新保证）
/// - `satisfied_users` 只增不减，且只包含两个参与者
/// - 状态只能从 active 变为 closed，且该转换只发生一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub user1: UserId,
    pub user2: UserId,
    pub status: MatchStatus,
    /// 已投满意票的参与者集合（至多 2 个元素）
    pub satisfied_users: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    /// 创建新的配对会话
    pub fn open(id: MatchId, user1: UserId, user2: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user1,
            user2,
            status: MatchStatus::Active,
            satisfied_users: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MatchStatus::Active
    }

    /// 用户是否是该配对的参与者
    pub fn contains(&self, user_id: UserId) -> bool {
        self.user1 == user_id || self.user2 == user_id
    }

    /// 返回参与者的配对对象
    pub fn partner_of(&self, user_id: UserId) -> Option<UserId> {
        if self.user1 == user_id {
            Some(self.user2)
        } else if self.user2 == user_id {
            Some(self.user1)
        } else {
            None
        }
    }

    /// 记录一方的满意投票
    ///
    /// 幂等：重复投票返回 `AlreadyRecorded`。
    /// 当两位参与者都已投票时状态翻转为 closed 并返回 `Closed`，
    /// 该返回值在整个生命周期内只会出现一次。
    pub fn record_satisfaction(
        &mut self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> DomainResult<SatisfactionOutcome> {
        if !self.contains(user_id) {
            return Err(DomainError::NotParticipant);
        }
        if self.status == MatchStatus::Closed {
            // 关闭后的重复投票视为无效果的幂等调用
            return Ok(SatisfactionOutcome::AlreadyRecorded);
        }
        if self.satisfied_users.contains(&user_id) {
            return Ok(SatisfactionOutcome::AlreadyRecorded);
        }

        self.satisfied_users.push(user_id);
        self.updated_at = now;

        if self.satisfied_users.contains(&self.user1) && self.satisfied_users.contains(&self.user2)
        {
            self.status = MatchStatus::Closed;
            return Ok(SatisfactionOutcome::Closed);
        }
        Ok(SatisfactionOutcome::Recorded)
    }
}
