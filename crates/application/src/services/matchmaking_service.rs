//! 撮合服务
//!
//! 配对谓词（权威规则）：异性、同一配对分桶、双方均未配对。
//! 仅按性别的宽松变体是被否决的备选方案。

use std::sync::Arc;

use domain::{Match, MatchId, RepositoryError, User, UserId, UserProfile};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::ApplicationError,
    repository::{MatchRepository, UserRepository},
};

/// 认领竞争失败后重新搜索的次数
const CLAIM_RETRIES: usize = 1;

/// 撮合结果
///
/// "没有候选"是正常业务结果而非错误，基础设施故障才返回 Err。
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Found {
        match_id: MatchId,
        partner: UserProfile,
    },
    NoCandidate,
}

pub struct MatchmakingDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub match_repository: Arc<dyn MatchRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct MatchmakingService {
    deps: MatchmakingDependencies,
}

impl MatchmakingService {
    pub fn new(deps: MatchmakingDependencies) -> Self {
        Self { deps }
    }

    /// 为用户查找或创建配对
    ///
    /// 幂等：配对保持 active 期间重复调用返回同一个配对。
    pub async fn find_or_create_match(
        &self,
        user_id: Uuid,
    ) -> Result<MatchOutcome, ApplicationError> {
        let user_id = UserId::from(user_id);
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::Domain(domain::DomainError::UserNotFound))?;

        for attempt in 0..=CLAIM_RETRIES {
            // 已有 active 配对则直接返回（对方先发起的情况也走这里）
            if let Some(existing) = self
                .deps
                .match_repository
                .find_active_by_user(user.id)
                .await?
            {
                return self.outcome_for_existing(&user, existing).await;
            }

            // 回引指向某个已关闭的配对时先清理，让用户回到候选池
            if let Some(stale_partner) = user.matched_with {
                self.deps
                    .user_repository
                    .release_pair(user.id, stale_partner)
                    .await?;
            }

            let candidate = self
                .deps
                .user_repository
                .find_candidate(user.gender.opposite(), user.pair_index, user.id)
                .await?;

            let Some(candidate) = candidate else {
                return Ok(MatchOutcome::NoCandidate);
            };

            let now = self.deps.clock.now();
            let m = Match::open(MatchId::from(Uuid::new_v4()), user.id, candidate.id, now);

            match self.deps.match_repository.create_claiming(m).await {
                Ok(stored) => {
                    tracing::info!(
                        match_id = %stored.id,
                        user_id = %user.id,
                        partner_id = %candidate.id,
                        pair_index = %user.pair_index,
                        "配对成功"
                    );
                    return Ok(MatchOutcome::Found {
                        match_id: stored.id,
                        partner: UserProfile::from(&candidate),
                    });
                }
                Err(RepositoryError::Conflict) => {
                    // 候选已被并发请求认领（或请求者自己被认领），重新搜索
                    tracing::debug!(
                        user_id = %user.id,
                        candidate_id = %candidate.id,
                        attempt,
                        "认领竞争失败"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(MatchOutcome::NoCandidate)
    }

    async fn outcome_for_existing(
        &self,
        user: &User,
        existing: Match,
    ) -> Result<MatchOutcome, ApplicationError> {
        let partner_id = existing
            .partner_of(user.id)
            .ok_or(ApplicationError::Domain(domain::DomainError::NotParticipant))?;
        let partner = self
            .deps
            .user_repository
            .find_by_id(partner_id)
            .await?
            .ok_or(ApplicationError::Domain(domain::DomainError::UserNotFound))?;

        Ok(MatchOutcome::Found {
            match_id: existing.id,
            partner: UserProfile::from(&partner),
        })
    }
}
