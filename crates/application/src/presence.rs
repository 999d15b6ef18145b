//! 在线状态注册表
//!
//! 用户身份到当前活跃连接句柄的临时映射。只存在于进程内，
//! 不持久化，重启后由客户端重连时重新注册。

use async_trait::async_trait;
use domain::{ConnectionId, UserId};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// 连接建立时注册。同一用户重连时新句柄覆盖旧句柄。
    async fn register(&self, user_id: UserId, connection: ConnectionId);

    /// 连接断开时注销。断开事件只携带连接句柄，
    /// 因此这里按句柄反查并移除对应的用户条目。
    async fn unregister_connection(&self, connection: ConnectionId);

    /// 解析用户当前的活跃连接句柄。
    async fn resolve(&self, user_id: UserId) -> Option<ConnectionId>;

    /// 用户当前是否在线。
    async fn is_online(&self, user_id: UserId) -> bool;
}

/// 内存实现
#[derive(Default)]
pub struct MemoryPresenceRegistry {
    inner: RwLock<PresenceMaps>,
}

#[derive(Default)]
struct PresenceMaps {
    by_user: HashMap<UserId, ConnectionId>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl MemoryPresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceRegistry for MemoryPresenceRegistry {
    async fn register(&self, user_id: UserId, connection: ConnectionId) {
        let mut maps = self.inner.write().await;
        if let Some(previous) = maps.by_user.insert(user_id, connection) {
            maps.by_connection.remove(&previous);
        }
        maps.by_connection.insert(connection, user_id);
        tracing::debug!(user_id = %user_id, connection = %connection, "在线状态已注册");
    }

    async fn unregister_connection(&self, connection: ConnectionId) {
        let mut maps = self.inner.write().await;
        if let Some(user_id) = maps.by_connection.remove(&connection) {
            // 只移除仍指向该句柄的条目，避免覆盖重连后的新句柄
            if maps.by_user.get(&user_id) == Some(&connection) {
                maps.by_user.remove(&user_id);
            }
            tracing::debug!(user_id = %user_id, connection = %connection, "在线状态已注销");
        }
    }

    async fn resolve(&self, user_id: UserId) -> Option<ConnectionId> {
        self.inner.read().await.by_user.get(&user_id).copied()
    }

    async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_register_resolve_unregister() {
        let registry = MemoryPresenceRegistry::new();
        let user = UserId::from(Uuid::new_v4());
        let conn = ConnectionId::generate();

        assert!(!registry.is_online(user).await);

        registry.register(user, conn).await;
        assert_eq!(registry.resolve(user).await, Some(conn));
        assert!(registry.is_online(user).await);

        registry.unregister_connection(conn).await;
        assert_eq!(registry.resolve(user).await, None);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_handle() {
        let registry = MemoryPresenceRegistry::new();
        let user = UserId::from(Uuid::new_v4());
        let old_conn = ConnectionId::generate();
        let new_conn = ConnectionId::generate();

        registry.register(user, old_conn).await;
        registry.register(user, new_conn).await;
        assert_eq!(registry.resolve(user).await, Some(new_conn));

        // 旧连接迟到的断开通知不能抹掉新连接
        registry.unregister_connection(old_conn).await;
        assert_eq!(registry.resolve(user).await, Some(new_conn));

        registry.unregister_connection(new_conn).await;
        assert!(!registry.is_online(user).await);
    }
}
