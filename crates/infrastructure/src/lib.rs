//! 基础设施层实现。
//!
//! 提供数据库仓储、内存仓储和密码哈希适配器，实现应用层定义的接口。

pub mod db;
pub mod memory;
pub mod password;

pub use db::{create_pg_pool, PgMatchRepository, PgStorage, PgUserRepository};
pub use memory::MemoryStorage;
pub use password::BcryptPasswordHasher;
