use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 用户唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<UserId> for Uuid {
    fn from(value: UserId) -> Self {
        value.0
    }
}

/// 配对会话唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchId(pub Uuid);

impl MatchId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MatchId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<MatchId> for Uuid {
    fn from(value: MatchId) -> Self {
        value.0
    }
}

/// 聊天记录唯一标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatEntryId(pub Uuid);

impl fmt::Display for ChatEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ChatEntryId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<ChatEntryId> for Uuid {
    fn from(value: ChatEntryId) -> Self {
        value.0
    }
}

/// 实时连接句柄标识。
///
/// 每个 WebSocket 连接在建立时分配一个，仅在进程内有意义，不持久化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 用户性别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// 配对谓词使用的异性性别
    pub fn opposite(self) -> Self {
        match self {
            Gender::Male => Gender::Female,
            Gender::Female => Gender::Male,
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            _ => Err(DomainError::invalid_argument(
                "gender",
                "must be 'male' or 'female'",
            )),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
        }
    }
}

/// 配对分桶索引
///
/// 注册时从固定大小的池中分配，配对只在同一分桶、异性之间进行。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairIndex(i16);

/// 每个分桶对应一对心形标记（男/女各一个）
const HEART_PAIRS: [(&str, &str); PairIndex::POOL_SIZE as usize] = [
    ("❤️‍🕺(M1)", "❤️‍💃(F1)"),
    ("❤️‍🕺(M2)", "❤️‍💃(F2)"),
    ("❤️‍🕺(M3)", "❤️‍💃(F3)"),
    ("❤️‍🕺(M4)", "❤️‍💃(F4)"),
    ("❤️‍🕺(M5)", "❤️‍💃(F5)"),
];

impl PairIndex {
    /// 分桶池大小
    pub const POOL_SIZE: i16 = 5;

    pub fn new(value: i16) -> Result<Self, DomainError> {
        if !(0..Self::POOL_SIZE).contains(&value) {
            return Err(DomainError::invalid_argument(
                "pair_index",
                format!("must be in 0..{}", Self::POOL_SIZE),
            ));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> i16 {
        self.0
    }

    /// 该分桶内对应性别的心形标记
    pub fn heart_for(self, gender: Gender) -> &'static str {
        let (male, female) = HEART_PAIRS[self.0 as usize];
        match gender {
            Gender::Male => male,
            Gender::Female => female,
        }
    }
}

impl fmt::Display for PairIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 经过验证的用户名。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("username", "cannot be empty"));
        }
        if value.len() > 30 {
            return Err(DomainError::invalid_argument("username", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 经过验证的邮箱。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("email", "cannot be empty"));
        }
        if !value.contains('@') {
            return Err(DomainError::invalid_argument("email", "must contain '@'"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserEmail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 经过外部服务生成的密码哈希。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let hash = value.into();
        if hash.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "password_hash",
                "cannot be empty",
            ));
        }
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 聊天消息载荷：正文和图片至少要有一项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    message: Option<String>,
    image: Option<String>,
}

impl ChatPayload {
    pub fn new(message: Option<String>, image: Option<String>) -> Result<Self, DomainError> {
        let message = message.filter(|m| !m.trim().is_empty());
        let image = image.filter(|i| !i.trim().is_empty());
        if message.is_none() && image.is_none() {
            return Err(DomainError::EmptyPayload);
        }
        Ok(Self { message, image })
    }

    pub fn text(message: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(Some(message.into()), None)
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn image(&self) -> Option<&str> {
        self.image.as_deref()
    }
}
