//! 存储层抽象
//!
//! 撮合的不变量（一个用户同时最多一个 active 配对、关闭只发生一次）
//! 依赖这里声明的条件更新语义，实现方必须保证其原子性。

use async_trait::async_trait;
use domain::{
    ChatEntry, Gender, Match, MatchId, PairIndex, RepositoryError, SatisfactionOutcome, User,
    UserEmail, UserId, Username,
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;

    /// 按配对谓词查找候选：指定性别、同一分桶、未配对，排除请求者自己。
    async fn find_candidate(
        &self,
        gender: Gender,
        pair_index: PairIndex,
        exclude: UserId,
    ) -> Result<Option<User>, RepositoryError>;

    /// 清除两位用户的 matched_with 回引（配对关闭后重新进入候选池）。
    async fn release_pair(&self, user1: UserId, user2: UserId) -> Result<(), RepositoryError>;
}

/// 满意投票的原子记录结果
#[derive(Debug, Clone)]
pub struct SatisfactionRecord {
    pub updated: Match,
    /// 本次调用产生的状态变化；`Closed` 在整个配对生命周期内
    /// 只会返回给恰好完成关闭转换的那一次调用
    pub outcome: SatisfactionOutcome,
}

#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// 原子地认领双方并创建配对：
    /// 仅当两位参与者的 matched_with 都为空时写入回引并插入配对记录，
    /// 两者要么同时生效要么都不生效。输掉竞争返回 `RepositoryError::Conflict`。
    async fn create_claiming(&self, m: Match) -> Result<Match, RepositoryError>;

    async fn find_by_id(&self, id: MatchId) -> Result<Option<Match>, RepositoryError>;

    /// 查找用户当前参与的 active 配对（不变量保证至多一个）。
    async fn find_active_by_user(&self, user_id: UserId)
        -> Result<Option<Match>, RepositoryError>;

    /// 原子地记录满意投票；幂等，重复投票返回 `AlreadyRecorded`。
    /// 并发投票时只有一个调用者会得到 `Closed`。
    async fn record_satisfaction(
        &self,
        match_id: MatchId,
        user_id: UserId,
    ) -> Result<SatisfactionRecord, RepositoryError>;

    /// 追加一条聊天记录（追加后不可变）。
    async fn append_entry(&self, entry: ChatEntry) -> Result<ChatEntry, RepositoryError>;

    /// 按追加顺序返回配对的全部聊天记录。
    async fn list_entries(&self, match_id: MatchId) -> Result<Vec<ChatEntry>, RepositoryError>;
}
