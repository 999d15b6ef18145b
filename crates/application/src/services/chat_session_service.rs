//! 聊天会话协调器
//!
//! 管理 active 配对频道内的消息转发、满意投票与关闭广播。
//! 转发顺序保证：先持久化，写入成功后才广播；
//! 持久化失败时错误只报告给发送方，不会影响对端连接。

use std::sync::Arc;

use domain::{
    ChatEntry, ChatEntryId, ChatPayload, Match, MatchId, SatisfactionOutcome, UserId,
};
use uuid::Uuid;

use crate::{
    broadcaster::{MatchBroadcast, MatchBroadcaster},
    clock::Clock,
    error::ApplicationError,
    presence::PresenceRegistry,
    repository::{MatchRepository, UserRepository},
};

#[derive(Debug, Clone)]
pub struct RelayMessageRequest {
    pub match_id: Uuid,
    pub sender_id: Uuid,
    pub message: Option<String>,
    pub image: Option<String>,
}

/// join 的结果：会话本身加上对端在线状态
#[derive(Debug, Clone)]
pub struct JoinedSession {
    pub session: Match,
    pub partner_id: UserId,
    pub partner_online: bool,
}

pub struct ChatSessionDependencies {
    pub match_repository: Arc<dyn MatchRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub broadcaster: Arc<dyn MatchBroadcaster>,
    pub clock: Arc<dyn Clock>,
}

pub struct ChatSessionService {
    deps: ChatSessionDependencies,
}

impl ChatSessionService {
    pub fn new(deps: ChatSessionDependencies) -> Self {
        Self { deps }
    }

    /// 加入配对频道前的校验；天然幂等
    pub async fn join(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<JoinedSession, ApplicationError> {
        let user_id = UserId::from(user_id);
        let session = self.load_active(MatchId::from(match_id), user_id).await?;
        let partner_id = session
            .partner_of(user_id)
            .ok_or(ApplicationError::Domain(domain::DomainError::NotParticipant))?;
        let partner_online = self.deps.presence.is_online(partner_id).await;

        Ok(JoinedSession {
            session,
            partner_id,
            partner_online,
        })
    }

    /// 转发一条消息：校验、持久化、然后广播给频道内的其他连接
    pub async fn relay_message(
        &self,
        request: RelayMessageRequest,
    ) -> Result<ChatEntry, ApplicationError> {
        let payload = ChatPayload::new(request.message, request.image)?;
        let sender_id = UserId::from(request.sender_id);
        let session = self
            .load_active(MatchId::from(request.match_id), sender_id)
            .await?;

        let entry = ChatEntry::new(
            ChatEntryId::from(Uuid::new_v4()),
            session.id,
            sender_id,
            payload,
            self.deps.clock.now(),
        );

        // 先持久化；写入失败则不广播，避免对端看到与历史不一致的消息
        let stored = self.deps.match_repository.append_entry(entry).await?;

        if let Err(broadcast_error) = self
            .deps
            .broadcaster
            .broadcast(MatchBroadcast::message(session.id, stored.clone()))
            .await
        {
            tracing::error!(
                match_id = %session.id,
                entry_id = %stored.id,
                error = %broadcast_error,
                "消息已持久化，但广播失败"
            );
            return Err(ApplicationError::infrastructure("消息广播失败"));
        }

        Ok(stored)
    }

    /// 记录满意投票；双方都投票后配对关闭并广播一次 Closed
    pub async fn record_satisfaction(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<SatisfactionOutcome, ApplicationError> {
        let match_id = MatchId::from(match_id);
        let user_id = UserId::from(user_id);

        let session = self
            .deps
            .match_repository
            .find_by_id(match_id)
            .await?
            .ok_or(ApplicationError::Domain(domain::DomainError::MatchNotFound))?;
        if !session.contains(user_id) {
            return Err(ApplicationError::Domain(
                domain::DomainError::NotParticipant,
            ));
        }

        let record = self
            .deps
            .match_repository
            .record_satisfaction(match_id, user_id)
            .await?;

        if record.outcome == SatisfactionOutcome::Closed {
            tracing::info!(match_id = %match_id, "双方满意，配对关闭");

            // 双方重新进入候选池
            self.deps
                .user_repository
                .release_pair(record.updated.user1, record.updated.user2)
                .await?;

            // 关闭事件是尽力投递：投票已持久化，离线方重连后从状态得知关闭
            if let Err(broadcast_error) = self
                .deps
                .broadcaster
                .broadcast(MatchBroadcast::closed(match_id))
                .await
            {
                tracing::error!(
                    match_id = %match_id,
                    error = %broadcast_error,
                    "配对已关闭，但关闭广播失败"
                );
            }
        }

        Ok(record.outcome)
    }

    /// 返回配对的完整聊天历史（追加顺序）；配对关闭后依然可读
    pub async fn fetch_history(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ChatEntry>, ApplicationError> {
        let match_id = MatchId::from(match_id);
        let session = self
            .deps
            .match_repository
            .find_by_id(match_id)
            .await?
            .ok_or(ApplicationError::Domain(domain::DomainError::MatchNotFound))?;
        if !session.contains(UserId::from(user_id)) {
            return Err(ApplicationError::Domain(
                domain::DomainError::NotParticipant,
            ));
        }

        Ok(self.deps.match_repository.list_entries(match_id).await?)
    }

    async fn load_active(
        &self,
        match_id: MatchId,
        user_id: UserId,
    ) -> Result<Match, ApplicationError> {
        let session = self
            .deps
            .match_repository
            .find_by_id(match_id)
            .await?
            .ok_or(ApplicationError::Domain(domain::DomainError::MatchNotFound))?;

        if !session.contains(user_id) {
            return Err(ApplicationError::Domain(
                domain::DomainError::NotParticipant,
            ));
        }
        if !session.is_active() {
            return Err(ApplicationError::Domain(domain::DomainError::MatchClosed));
        }
        Ok(session)
    }
}
