//! 积分账本服务
//!
//! 处理积分入账与余额查询：
//! - 拒绝负数积分
//! - 幂等入账（同一幂等键不重复计分）
//! - 事务内追加流水、更新余额缓存并入队会员同步记录
//! - 入账成功后发出领域事件（fire-and-forget）

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};

use sticker_shared::events::{self, DomainEvent, EventKind, NotificationSink};

use crate::error::{LedgerError, Result};
use crate::models::{PointsLedgerEntry, SyncEntityType, SyncOperation, SyncRecord};
use crate::repository::{
    MemberRepository, PointsLedgerRepository, SyncRecordRepository, TenantConfigStore,
};

/// 余额审计结果
///
/// cached 为会员行上的缓存值，computed 为流水求和；两者不一致时
/// 缓存已被重写为 computed，repaired 置位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceAudit {
    pub cached: i64,
    pub computed: i64,
    pub repaired: bool,
}

/// 积分账本服务
pub struct PointsService {
    pool: PgPool,
    ledger_repo: Arc<PointsLedgerRepository>,
    member_repo: Arc<MemberRepository>,
    tenants: Arc<TenantConfigStore>,
    sink: Arc<dyn NotificationSink>,
}

impl PointsService {
    pub fn new(
        pool: PgPool,
        ledger_repo: Arc<PointsLedgerRepository>,
        member_repo: Arc<MemberRepository>,
        tenants: Arc<TenantConfigStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            pool,
            ledger_repo,
            member_repo,
            tenants,
            sink,
        }
    }

    /// 积分入账
    ///
    /// 幂等键已存在时直接返回当初的流水条目，不重复计分；
    /// 会员行不存在时在同一事务内按需创建（首次入账即开户）。
    /// 余额变化需要推到外部 CRM，故同事务入队一条会员同步记录。
    #[instrument(skip(self), fields(tenant_id = %tenant_id, member_id = %member_id))]
    pub async fn award(
        &self,
        tenant_id: &str,
        member_id: &str,
        reason: &str,
        points: i32,
        idempotency_key: Option<&str>,
    ) -> Result<PointsLedgerEntry> {
        if points < 0 {
            return Err(LedgerError::NegativePoints(points));
        }

        // 租户必须存在且激活
        let tenant = self.tenants.get_active(tenant_id).await?;

        // 幂等检查
        if let Some(key) = idempotency_key
            && let Some(existing) = self.ledger_repo.get_by_idempotency_key(tenant_id, key).await?
        {
            info!(idempotency_key = key, "幂等入账请求，返回已存在的流水");
            return Ok(existing);
        }

        let mut entry = PointsLedgerEntry {
            id: 0,
            tenant_id: tenant_id.to_string(),
            member_id: member_id.to_string(),
            points_delta: points,
            reason: reason.to_string(),
            idempotency_key: idempotency_key.map(str::to_string),
            external_ref: None,
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        MemberRepository::ensure_exists_in_tx(&mut tx, tenant_id, member_id).await?;
        // 行锁顺带拿到 external_id，决定同步操作意图
        let member = MemberRepository::get_for_update(&mut tx, tenant_id, member_id)
            .await?
            .ok_or_else(|| LedgerError::MemberNotFound {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            })?;
        entry.id = PointsLedgerRepository::insert_in_tx(&mut tx, &entry).await?;
        MemberRepository::add_points_in_tx(&mut tx, tenant_id, member_id, i64::from(points))
            .await?;

        let operation = if member.external_id.is_some() {
            SyncOperation::Update
        } else {
            SyncOperation::Create
        };
        let sync_record = SyncRecord::new(
            tenant_id,
            SyncEntityType::Member,
            member_id,
            operation,
            tenant.max_retries,
        );
        SyncRecordRepository::create_in_tx(&mut tx, &sync_record).await?;

        tx.commit().await?;

        info!(points, reason, "积分入账成功");

        events::emit(
            self.sink.as_ref(),
            DomainEvent::new(
                tenant_id,
                member_id,
                EventKind::PointsAwarded,
                serde_json::json!({ "points": points, "reason": reason }),
            ),
        )
        .await;

        Ok(entry)
    }

    /// 按租户配置的动作积分值入账
    ///
    /// 动作未在 points_per_action 中配置时拒绝，防止拼写错误的动作名
    /// 静默入账 0 分。
    pub async fn award_for_action(
        &self,
        tenant_id: &str,
        member_id: &str,
        action: &str,
        idempotency_key: Option<&str>,
    ) -> Result<PointsLedgerEntry> {
        let tenant = self.tenants.get_active(tenant_id).await?;
        let points = tenant
            .points_for(action)
            .ok_or_else(|| LedgerError::UnknownAction {
                tenant_id: tenant_id.to_string(),
                action: action.to_string(),
            })?;

        self.award(tenant_id, member_id, action, points, idempotency_key)
            .await
    }

    /// 查询缓存余额
    pub async fn balance(&self, tenant_id: &str, member_id: &str) -> Result<i64> {
        let member = self
            .member_repo
            .get(tenant_id, member_id)
            .await?
            .ok_or_else(|| LedgerError::MemberNotFound {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            })?;

        Ok(member.points_balance)
    }

    /// 审计并修复余额缓存
    ///
    /// 以流水求和为真实值；缓存漂移时重写缓存并返回两个值供对账。
    #[instrument(skip(self))]
    pub async fn recompute_balance(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<BalanceAudit> {
        let cached = self.balance(tenant_id, member_id).await?;
        let computed = self.ledger_repo.sum_points(tenant_id, member_id).await?;

        let repaired = cached != computed;
        if repaired {
            self.member_repo
                .set_points_balance(tenant_id, member_id, computed)
                .await?;
            info!(cached, computed, "余额缓存漂移，已按流水修复");
        }

        Ok(BalanceAudit {
            cached,
            computed,
            repaired,
        })
    }

    /// 查询最近流水
    pub async fn history(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        self.ledger_repo.list_recent(tenant_id, member_id, limit).await
    }
}
