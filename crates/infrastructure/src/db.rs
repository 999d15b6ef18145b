//! Postgres 仓储实现
//!
//! 撮合相关的不变量全部落在这里的条件更新上：
//! - 认领候选：`UPDATE ... WHERE matched_with IS NULL`，受影响行数为 0 即输掉竞争
//! - 关闭配对：`UPDATE ... WHERE status = 'active'`，同一配对只会翻转一次

use std::sync::Arc;

use application::repository::{MatchRepository, SatisfactionRecord, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatEntry, ChatEntryId, ChatPayload, Gender, Match, MatchId, MatchStatus, PairIndex,
    PasswordHash, RepositoryError, SatisfactionOutcome, User, UserEmail, UserId, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict;
        }
        if db_err.is_foreign_key_violation() {
            return RepositoryError::NotFound;
        }
    }
    RepositoryError::storage_with_source("database error", err)
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    password_hash: Option<String>,
    gender: String,
    pair_index: i16,
    matched_with: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, gender, pair_index, matched_with, created_at, updated_at";

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password_hash = value
            .password_hash
            .map(PasswordHash::new)
            .transpose()
            .map_err(|err| invalid_data(err.to_string()))?;
        let gender = Gender::parse(&value.gender).map_err(|err| invalid_data(err.to_string()))?;
        let pair_index =
            PairIndex::new(value.pair_index).map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            username,
            email,
            password_hash,
            gender,
            pair_index,
            matched_with: value.matched_with.map(UserId::from),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MatchRecord {
    id: Uuid,
    user1: Uuid,
    user2: Uuid,
    status: String,
    satisfied_users: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const MATCH_COLUMNS: &str = "id, user1, user2, status, satisfied_users, created_at, updated_at";

impl TryFrom<MatchRecord> for Match {
    type Error = RepositoryError;

    fn try_from(value: MatchRecord) -> Result<Self, Self::Error> {
        let status =
            MatchStatus::parse(&value.status).map_err(|err| invalid_data(err.to_string()))?;

        Ok(Match {
            id: MatchId::from(value.id),
            user1: UserId::from(value.user1),
            user2: UserId::from(value.user2),
            status,
            satisfied_users: value.satisfied_users.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChatEntryRecord {
    id: Uuid,
    match_id: Uuid,
    sender_id: Uuid,
    message: Option<String>,
    image: Option<String>,
    created_at: DateTime<Utc>,
}

const ENTRY_COLUMNS: &str = "id, match_id, sender_id, message, image, created_at";

impl TryFrom<ChatEntryRecord> for ChatEntry {
    type Error = RepositoryError;

    fn try_from(value: ChatEntryRecord) -> Result<Self, Self::Error> {
        let payload = ChatPayload::new(value.message, value.image)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(ChatEntry {
            id: ChatEntryId::from(value.id),
            match_id: MatchId::from(value.match_id),
            sender_id: UserId::from(value.sender_id),
            payload,
            timestamp: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, username, email, password_hash, gender, pair_index, matched_with, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, username, email, password_hash, gender, pair_index, matched_with, created_at, updated_at
            "#,
        )
        .bind(Uuid::from(user.id))
        .bind(user.username.as_str())
        .bind(user.email.as_str())
        .bind(user.password_hash.as_ref().map(|hash| hash.as_str().to_owned()))
        .bind(user.gender.to_string())
        .bind(user.pair_index.value())
        .bind(user.matched_with.map(Uuid::from))
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_candidate(
        &self,
        gender: Gender,
        pair_index: PairIndex,
        exclude: UserId,
    ) -> Result<Option<User>, RepositoryError> {
        // 先到先得：同条件下取最早注册的候选
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE gender = $1 AND pair_index = $2 AND matched_with IS NULL AND id != $3
            ORDER BY created_at
            LIMIT 1
            "#
        ))
        .bind(gender.to_string())
        .bind(pair_index.value())
        .bind(Uuid::from(exclude))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn release_pair(&self, user1: UserId, user2: UserId) -> Result<(), RepositoryError> {
        // 只清除仍互相指向对方的回引，已被新配对覆盖的回引保持不动
        for (id, partner) in [(user1, user2), (user2, user1)] {
            sqlx::query(
                "UPDATE users SET matched_with = NULL, updated_at = NOW() WHERE id = $1 AND matched_with = $2",
            )
            .bind(Uuid::from(id))
            .bind(Uuid::from(partner))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMatchRepository {
    pool: PgPool,
}

impl PgMatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MatchRepository for PgMatchRepository {
    async fn create_claiming(&self, m: Match) -> Result<Match, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 按 id 顺序加锁，避免交错认领时互相等待
        let mut claims = [(m.user1, m.user2), (m.user2, m.user1)];
        claims.sort_by_key(|(id, _)| Uuid::from(*id));

        for (id, partner) in claims {
            let claimed = sqlx::query(
                "UPDATE users SET matched_with = $2, updated_at = NOW() WHERE id = $1 AND matched_with IS NULL",
            )
            .bind(Uuid::from(id))
            .bind(Uuid::from(partner))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            if claimed.rows_affected() != 1 {
                // 其中一方已被并发请求认领，整个事务回滚
                return Err(RepositoryError::Conflict);
            }
        }

        let record = sqlx::query_as::<_, MatchRecord>(
            r#"
            INSERT INTO matches (id, user1, user2, status, satisfied_users, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user1, user2, status, satisfied_users, created_at, updated_at
            "#,
        )
        .bind(Uuid::from(m.id))
        .bind(Uuid::from(m.user1))
        .bind(Uuid::from(m.user2))
        .bind(m.status.to_string())
        .bind(
            m.satisfied_users
                .iter()
                .copied()
                .map(Uuid::from)
                .collect::<Vec<_>>(),
        )
        .bind(m.created_at)
        .bind(m.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Match::try_from(record)
    }

    async fn find_by_id(&self, id: MatchId) -> Result<Option<Match>, RepositoryError> {
        let record = sqlx::query_as::<_, MatchRecord>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Match::try_from).transpose()
    }

    async fn find_active_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Match>, RepositoryError> {
        let record = sqlx::query_as::<_, MatchRecord>(&format!(
            r#"
            SELECT {MATCH_COLUMNS} FROM matches
            WHERE status = 'active' AND (user1 = $1 OR user2 = $1)
            "#
        ))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Match::try_from).transpose()
    }

    async fn record_satisfaction(
        &self,
        match_id: MatchId,
        user_id: UserId,
    ) -> Result<SatisfactionRecord, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 第一步：追加投票。行锁串行化并发投票，
        // 已投过票或配对已关闭时受影响行数为 0。
        let voted = sqlx::query(
            r#"
            UPDATE matches
            SET satisfied_users = array_append(satisfied_users, $2), updated_at = NOW()
            WHERE id = $1 AND status = 'active' AND NOT (satisfied_users @> ARRAY[$2]::uuid[])
            "#,
        )
        .bind(Uuid::from(match_id))
        .bind(Uuid::from(user_id))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected()
            == 1;

        // 第二步：双方都已投票则翻转状态；该更新在配对生命周期内最多成功一次
        let closed = if voted {
            sqlx::query(
                r#"
                UPDATE matches
                SET status = 'closed', updated_at = NOW()
                WHERE id = $1 AND status = 'active' AND satisfied_users @> ARRAY[user1, user2]
                "#,
            )
            .bind(Uuid::from(match_id))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected()
                == 1
        } else {
            false
        };

        let record = sqlx::query_as::<_, MatchRecord>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1"
        ))
        .bind(Uuid::from(match_id))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        let outcome = if closed {
            SatisfactionOutcome::Closed
        } else if voted {
            SatisfactionOutcome::Recorded
        } else {
            SatisfactionOutcome::AlreadyRecorded
        };

        Ok(SatisfactionRecord {
            updated: Match::try_from(record)?,
            outcome,
        })
    }

    async fn append_entry(&self, entry: ChatEntry) -> Result<ChatEntry, RepositoryError> {
        let record = sqlx::query_as::<_, ChatEntryRecord>(
            r#"
            INSERT INTO chat_entries (id, match_id, sender_id, message, image, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, match_id, sender_id, message, image, created_at
            "#,
        )
        .bind(Uuid::from(entry.id))
        .bind(Uuid::from(entry.match_id))
        .bind(Uuid::from(entry.sender_id))
        .bind(entry.payload.message())
        .bind(entry.payload.image())
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        ChatEntry::try_from(record)
    }

    async fn list_entries(&self, match_id: MatchId) -> Result<Vec<ChatEntry>, RepositoryError> {
        // seq 是插入序号，时间戳相同的记录也能保持追加顺序
        let records = sqlx::query_as::<_, ChatEntryRecord>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM chat_entries WHERE match_id = $1 ORDER BY seq"
        ))
        .bind(Uuid::from(match_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(ChatEntry::try_from).collect()
    }
}

/// 打包好的 Postgres 存储，方便在装配处一次性构建
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub match_repository: Arc<PgMatchRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            match_repository: Arc::new(PgMatchRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
