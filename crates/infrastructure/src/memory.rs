//! 内存存储实现
//!
//! 单进程部署和集成测试用。条件更新的原子性由一把写锁保证，
//! 语义与 Postgres 实现对齐。

use std::collections::HashMap;
use std::sync::Arc;

use application::repository::{MatchRepository, SatisfactionRecord, UserRepository};
use async_trait::async_trait;
use chrono::Utc;
use domain::{
    ChatEntry, Gender, Match, MatchId, PairIndex, RepositoryError, User, UserEmail, UserId,
    Username,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    matches: HashMap<MatchId, Match>,
    entries: Vec<ChatEntry>,
}

/// 同时实现用户仓储和配对仓储的内存存储
#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn is_unmatched(&self, id: UserId) -> bool {
        self.users
            .get(&id)
            .map(User::is_unmatched)
            .unwrap_or(false)
    }

    fn points_back(&self, id: UserId, partner: UserId) -> bool {
        self.users
            .get(&id)
            .map(|user| user.matched_with == Some(partner))
            .unwrap_or(false)
    }
}

#[async_trait]
impl UserRepository for MemoryStorage {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut state = self.state.write().await;
        let duplicate = state.users.values().any(|existing| {
            existing.id == user.id
                || existing.username == user.username
                || existing.email == user.email
        });
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|user| user.username == *username)
            .cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|user| user.email == *email)
            .cloned())
    }

    async fn find_candidate(
        &self,
        gender: Gender,
        pair_index: PairIndex,
        exclude: UserId,
    ) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        // 先到先得：同条件下取最早注册的候选
        let mut candidates: Vec<&User> = state
            .users
            .values()
            .filter(|user| {
                user.gender == gender
                    && user.pair_index == pair_index
                    && user.is_unmatched()
                    && user.id != exclude
            })
            .collect();
        candidates.sort_by_key(|user| user.created_at);
        Ok(candidates.first().map(|user| (*user).clone()))
    }

    async fn release_pair(&self, user1: UserId, user2: UserId) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        // 只清除仍互相指向对方的回引
        if state.points_back(user1, user2) {
            if let Some(user) = state.users.get_mut(&user1) {
                user.clear_matched(now);
            }
        }
        if state.points_back(user2, user1) {
            if let Some(user) = state.users.get_mut(&user2) {
                user.clear_matched(now);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MatchRepository for MemoryStorage {
    async fn create_claiming(&self, m: Match) -> Result<Match, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.is_unmatched(m.user1) || !state.is_unmatched(m.user2) {
            return Err(RepositoryError::Conflict);
        }
        let now = Utc::now();
        let (user1, user2) = (m.user1, m.user2);
        if let Some(user) = state.users.get_mut(&user1) {
            user.mark_matched(user2, now);
        }
        if let Some(user) = state.users.get_mut(&user2) {
            user.mark_matched(user1, now);
        }
        state.matches.insert(m.id, m.clone());
        Ok(m)
    }

    async fn find_by_id(&self, id: MatchId) -> Result<Option<Match>, RepositoryError> {
        Ok(self.state.read().await.matches.get(&id).cloned())
    }

    async fn find_active_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Match>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .matches
            .values()
            .find(|m| m.is_active() && m.contains(user_id))
            .cloned())
    }

    async fn record_satisfaction(
        &self,
        match_id: MatchId,
        user_id: UserId,
    ) -> Result<SatisfactionRecord, RepositoryError> {
        let mut state = self.state.write().await;
        let m = state
            .matches
            .get_mut(&match_id)
            .ok_or(RepositoryError::NotFound)?;
        let outcome = m
            .record_satisfaction(user_id, Utc::now())
            .map_err(|err| RepositoryError::storage(err.to_string()))?;
        Ok(SatisfactionRecord {
            updated: m.clone(),
            outcome,
        })
    }

    async fn append_entry(&self, entry: ChatEntry) -> Result<ChatEntry, RepositoryError> {
        let mut state = self.state.write().await;
        if !state.matches.contains_key(&entry.match_id) {
            return Err(RepositoryError::NotFound);
        }
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_entries(&self, match_id: MatchId) -> Result<Vec<ChatEntry>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .entries
            .iter()
            .filter(|entry| entry.match_id == match_id)
            .cloned()
            .collect())
    }
}
