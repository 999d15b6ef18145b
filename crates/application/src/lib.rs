//! 应用层：撮合、聊天会话协调与用户注册登录
//!
//! 所有对外部资源的依赖（存储、广播、密码哈希、时钟）都通过 trait 注入，
//! 便于替换实现和测试。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod local_broadcast;
pub mod password;
pub mod presence;
pub mod repository;
pub mod services;

pub use broadcaster::{BroadcastError, MatchBroadcast, MatchBroadcaster, MatchEvent};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use local_broadcast::{LocalMatchBroadcaster, MatchStream};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::{MemoryPresenceRegistry, PresenceRegistry};
pub use repository::{MatchRepository, SatisfactionRecord, UserRepository};
