//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层和同步 worker 依赖抽象而非具体实现，
//! 支持 mock 测试。事务内静态方法（`*_in_tx`）不在接口范围内，
//! 属于具体 Postgres 实现的细节。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    DiscountToken, Member, PointsLedgerEntry, SyncRecord, SyncState, TenantConfig,
};

/// 租户配置仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantConfigRepositoryTrait: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantConfig>>;
    async fn list_active(&self) -> Result<Vec<TenantConfig>>;
}

/// 会员仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MemberRepositoryTrait: Send + Sync {
    async fn get(&self, tenant_id: &str, member_id: &str) -> Result<Option<Member>>;
    async fn set_external_id(
        &self,
        tenant_id: &str,
        member_id: &str,
        external_id: &str,
    ) -> Result<()>;
}

/// 贴纸仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenRepositoryTrait: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<DiscountToken>>;
    async fn get_by_code(&self, tenant_id: &str, code: &str) -> Result<Option<DiscountToken>>;
    async fn list_by_member(&self, tenant_id: &str, member_id: &str)
    -> Result<Vec<DiscountToken>>;
    /// issued -> expired 条件转移，false 表示竞争失败
    async fn mark_expired(&self, id: i64) -> Result<bool>;
    async fn set_external_id(&self, id: i64, external_id: &str) -> Result<()>;
}

/// 积分流水仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PointsLedgerRepositoryTrait: Send + Sync {
    async fn get_by_idempotency_key(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<PointsLedgerEntry>>;
    async fn sum_points(&self, tenant_id: &str, member_id: &str) -> Result<i64>;
    async fn list_recent(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>>;
}

/// 同步记录仓储接口（SyncLogStore）
///
/// 纯持久化 + 查询，不含业务判断；由同步 worker 独占消费
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncRecordRepositoryTrait: Send + Sync {
    async fn create(&self, record: &SyncRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>>;
    /// 捞取可认领记录：pending，以及 next_attempt_at 已到期的 retry
    async fn list_claimable(
        &self,
        tenant_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncRecord>>;
    /// pending|retry -> syncing 条件转移；false 表示已被其他实例认领
    async fn claim(&self, id: Uuid) -> Result<bool>;
    async fn complete(&self, id: Uuid, external_id: &str) -> Result<()>;
    /// 落库 record_failure 的 Retry 决定（state/retry_count/next_attempt_at/last_error）
    async fn schedule_retry(&self, record: &SyncRecord) -> Result<()>;
    /// 落库 record_failure 的 Dead 决定
    async fn mark_dead(&self, record: &SyncRecord) -> Result<()>;
    async fn list_by_state(
        &self,
        tenant_id: &str,
        state: SyncState,
        limit: i64,
    ) -> Result<Vec<SyncRecord>>;
    async fn count_by_state(&self, tenant_id: &str) -> Result<Vec<(SyncState, i64)>>;
}
