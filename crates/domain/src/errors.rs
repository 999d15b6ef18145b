//! 领域模型错误定义

use thiserror::Error;

/// 领域模型错误类型
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数验证失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 用户名或邮箱已被占用
    #[error("user already exists")]
    UserAlreadyExists,

    /// 用户不存在
    #[error("user not found")]
    UserNotFound,

    /// 配对不存在
    #[error("match not found")]
    MatchNotFound,

    /// 用户不是该配对的参与者
    #[error("user is not a participant of this match")]
    NotParticipant,

    /// 配对已关闭，不再接受消息或投票
    #[error("match is closed")]
    MatchClosed,

    /// 消息正文和图片至少要有一项
    #[error("chat entry requires a message or an image")]
    EmptyPayload,
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 存储层错误类型
///
/// Conflict 表示条件更新失败（乐观并发下输掉了竞争），
/// 调用方据此决定重试还是放弃。
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("resource not found")]
    NotFound,
    #[error("conditional update lost the race")]
    Conflict,
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
