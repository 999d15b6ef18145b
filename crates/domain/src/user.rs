//! 用户实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{Gender, PairIndex, PasswordHash, UserEmail, UserId, Username};

/// 用户实体
///
/// `matched_with` 是指向当前配对对象的弱引用（只存 id），
/// 只由撮合逻辑写入和清除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub email: UserEmail,
    /// 密码哈希（敏感信息，不参与序列化）
    #[serde(skip_serializing)]
    pub password_hash: Option<PasswordHash>,
    pub gender: Gender,
    /// 配对分桶，注册时随机分配
    pub pair_index: PairIndex,
    /// 当前配对对象，未配对时为 None
    pub matched_with: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// 注册新用户
    pub fn register(
        id: UserId,
        username: Username,
        email: UserEmail,
        password_hash: PasswordHash,
        gender: Gender,
        pair_index: PairIndex,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            email,
            password_hash: Some(password_hash),
            gender,
            pair_index,
            matched_with: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 用户当前是否处于未配对状态（可作为撮合候选）
    pub fn is_unmatched(&self) -> bool {
        self.matched_with.is_none()
    }

    /// 该用户的心形标记（由分桶和性别决定）
    pub fn heart(&self) -> &'static str {
        self.pair_index.heart_for(self.gender)
    }

    /// 记录配对对象
    pub fn mark_matched(&mut self, partner: UserId, now: DateTime<Utc>) {
        self.matched_with = Some(partner);
        self.updated_at = now;
    }

    /// 清除配对对象（配对关闭后重新进入候选池）
    pub fn clear_matched(&mut self, now: DateTime<Utc>) {
        self.matched_with = None;
        self.updated_at = now;
    }
}

/// 对外公开的用户信息（不含凭证相关字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub gender: Gender,
    pub heart: String,
    pub pair_index: i16,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.as_str().to_owned(),
            gender: user.gender,
            heart: user.heart().to_owned(),
            pair_index: user.pair_index.value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_user(gender: Gender, bucket: i16) -> User {
        User::register(
            UserId::from(Uuid::new_v4()),
            Username::parse("alice").unwrap(),
            UserEmail::parse("alice@example.com").unwrap(),
            PasswordHash::new("$2b$12$hash").unwrap(),
            gender,
            PairIndex::new(bucket).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_register_starts_unmatched() {
        let user = sample_user(Gender::Female, 2);
        assert!(user.is_unmatched());
        assert_eq!(user.heart(), "❤️‍💃(F3)");
    }

    #[test]
    fn test_match_back_reference_lifecycle() {
        let mut user = sample_user(Gender::Male, 0);
        let partner = UserId::from(Uuid::new_v4());

        user.mark_matched(partner, Utc::now());
        assert!(!user.is_unmatched());
        assert_eq!(user.matched_with, Some(partner));

        user.clear_matched(Utc::now());
        assert!(user.is_unmatched());
    }

    #[test]
    fn test_profile_omits_credentials() {
        let user = sample_user(Gender::Male, 1);
        let profile = UserProfile::from(&user);
        assert_eq!(profile.username, "alice");
        assert_eq!(profile.heart, "❤️‍🕺(M2)");

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
