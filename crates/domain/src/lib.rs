//! 配对聊天系统核心领域模型
//!
//! 包含用户、配对会话、聊天记录等核心实体，以及相关的业务规则。

pub mod chat_entry;
pub mod errors;
pub mod matching;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use chat_entry::*;
pub use errors::*;
pub use matching::*;
pub use user::*;
pub use value_objects::*;
