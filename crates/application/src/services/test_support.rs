//! 服务层单元测试用的内存存储
//!
//! 与生产实现保证同样的原子语义：所有条件更新都在同一把锁内完成。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use domain::{
    ChatEntry, Gender, Match, MatchId, PairIndex, PasswordHash, RepositoryError, User, UserEmail,
    UserId, Username,
};
use uuid::Uuid;

use crate::repository::{MatchRepository, SatisfactionRecord, UserRepository};
use async_trait::async_trait;

#[derive(Default)]
struct StoreState {
    users: HashMap<UserId, User>,
    matches: HashMap<MatchId, Match>,
    entries: Vec<ChatEntry>,
}

/// 同时实现两个仓储 trait 的内存存储
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_user(&self, user: User) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(user.id, user);
    }

    pub fn user(&self, id: UserId) -> Option<User> {
        self.state.lock().unwrap().users.get(&id).cloned()
    }

    pub fn match_record(&self, id: MatchId) -> Option<Match> {
        self.state.lock().unwrap().matches.get(&id).cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(&user.id) {
            return Err(RepositoryError::Conflict);
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.lock().unwrap().users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &Username) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .find(|user| user.username == *username)
            .cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
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
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .find(|user| {
                user.gender == gender
                    && user.pair_index == pair_index
                    && user.is_unmatched()
                    && user.id != exclude
            })
            .cloned())
    }

    async fn release_pair(&self, user1: UserId, user2: UserId) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        // 只清除仍互相指向对方的回引
        let points_back = |state: &StoreState, id: UserId, other: UserId| {
            state
                .users
                .get(&id)
                .map(|u| u.matched_with == Some(other))
                .unwrap_or(false)
        };
        if points_back(&state, user1, user2) {
            if let Some(user) = state.users.get_mut(&user1) {
                user.clear_matched(now);
            }
        }
        if points_back(&state, user2, user1) {
            if let Some(user) = state.users.get_mut(&user2) {
                user.clear_matched(now);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MatchRepository for InMemoryStore {
    async fn create_claiming(&self, m: Match) -> Result<Match, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let free = |state: &StoreState, id: UserId| {
            state
                .users
                .get(&id)
                .map(|u| u.is_unmatched())
                .unwrap_or(false)
        };
        if !free(&state, m.user1) || !free(&state, m.user2) {
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
        Ok(self.state.lock().unwrap().matches.get(&id).cloned())
    }

    async fn find_active_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Option<Match>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
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
        let mut state = self.state.lock().unwrap();
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
        let mut state = self.state.lock().unwrap();
        if !state.matches.contains_key(&entry.match_id) {
            return Err(RepositoryError::NotFound);
        }
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_entries(&self, match_id: MatchId) -> Result<Vec<ChatEntry>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|entry| entry.match_id == match_id)
            .cloned()
            .collect())
    }
}

/// 构造指定性别和分桶的测试用户
pub fn sample_user(name: &str, gender: Gender, bucket: i16) -> User {
    User::register(
        UserId::from(Uuid::new_v4()),
        Username::parse(name).unwrap(),
        UserEmail::parse(format!("{name}@example.com")).unwrap(),
        PasswordHash::new("$2b$12$testhash").unwrap(),
        gender,
        PairIndex::new(bucket).unwrap(),
        Utc::now(),
    )
}
