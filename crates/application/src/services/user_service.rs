use std::sync::Arc;

use domain::{Gender, PairIndex, PasswordHash, User, UserEmail, UserId, Username};
use rand::Rng;
use uuid::Uuid;

use crate::{
    clock::Clock, error::ApplicationError, password::PasswordHasher, repository::UserRepository,
};

#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub gender: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// 邮箱或用户名均可
    pub identifier: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    /// 注册新用户并随机分配配对分桶
    pub async fn signup(&self, request: SignupRequest) -> Result<User, ApplicationError> {
        let username = Username::parse(request.username)?;
        let email = UserEmail::parse(request.email)?;
        let gender = Gender::parse(&request.gender)?;

        if self
            .deps
            .user_repository
            .find_by_username(&username)
            .await?
            .is_some()
            || self
                .deps
                .user_repository
                .find_by_email(&email)
                .await?
                .is_some()
        {
            return Err(ApplicationError::Domain(
                domain::DomainError::UserAlreadyExists,
            ));
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;

        let bucket = rand::rng().random_range(0..PairIndex::POOL_SIZE);
        let pair_index = PairIndex::new(bucket)?;

        let user = User::register(
            UserId::from(Uuid::new_v4()),
            username,
            email,
            password_hash,
            gender,
            pair_index,
            self.deps.clock.now(),
        );

        let stored = self.deps.user_repository.create(user).await?;
        tracing::info!(user_id = %stored.id, pair_index = %stored.pair_index, "新用户注册");
        Ok(stored)
    }

    /// 按邮箱或用户名登录
    pub async fn login(&self, request: LoginRequest) -> Result<User, ApplicationError> {
        let user = self.find_by_identifier(&request.identifier).await?;
        let user = user.ok_or(ApplicationError::Authentication)?;

        let hashed = user
            .password_hash
            .clone()
            .ok_or(ApplicationError::Authentication)?;
        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &hashed)
            .await?;
        if !password_ok {
            return Err(ApplicationError::Authentication);
        }

        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(UserId::from(user_id))
            .await?
            .ok_or(ApplicationError::Domain(domain::DomainError::UserNotFound))
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, ApplicationError> {
        if let Ok(email) = UserEmail::parse(identifier) {
            if let Some(user) = self.deps.user_repository.find_by_email(&email).await? {
                return Ok(Some(user));
            }
        }
        if let Ok(username) = Username::parse(identifier) {
            return Ok(self.deps.user_repository.find_by_username(&username).await?);
        }
        Ok(None)
    }
}
