//! 外部同步 worker
//!
//! 单条记录的处理算法：
//! 1. 认领（pending|retry -> syncing 条件更新；失败说明另一实例已
//!    抢先，跳过——这就是单写者保证）
//! 2. 重新读取本地实体的当前状态（绝不使用入队时的快照），映射载荷
//! 3. 实体已有 external_id -> 幂等 update；否则 create 并把返回的
//!    external_id 写回实体与记录
//! 4. 成功 -> completed；失败 -> retry_count+1，未到上限按指数退避
//!    进入 retry，到上限进入 dead 并以 error 日志暴露给运维
//!
//! 整个流程不持有任何进程内锁跨越网络调用；排他性全部来自存储层
//! 条件更新，多 worker 实例并行安全。

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use sticker_ledger::repository::traits::{
    MemberRepositoryTrait, SyncRecordRepositoryTrait, TokenRepositoryTrait,
};
use sticker_ledger::{FailureDisposition, SyncEntityType, SyncRecord, TenantConfig};
use sticker_shared::retry::RetryPolicy;

use crate::crm::ExternalCrmClient;
use crate::error::{Result, SyncError};
use crate::mapper;
use crate::session::CrmSessionPool;

/// 一轮同步的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunReport {
    /// 成功认领的记录数
    pub claimed: u32,
    /// 同步完成
    pub completed: u32,
    /// 进入退避重试
    pub retried: u32,
    /// 进入死信
    pub dead: u32,
    /// 认领竞争失败而跳过
    pub skipped: u32,
}

/// 外部同步 worker
///
/// 对仓储与 CRM 客户端均依赖抽象，便于 mock 测试和多实例部署。
pub struct OutboundSyncWorker<R, M, T>
where
    R: SyncRecordRepositoryTrait,
    M: MemberRepositoryTrait,
    T: TokenRepositoryTrait,
{
    records: Arc<R>,
    members: Arc<M>,
    tokens: Arc<T>,
    sessions: Arc<CrmSessionPool>,
    policy: RetryPolicy,
    batch_size: i64,
}

impl<R, M, T> OutboundSyncWorker<R, M, T>
where
    R: SyncRecordRepositoryTrait,
    M: MemberRepositoryTrait,
    T: TokenRepositoryTrait,
{
    pub fn new(
        records: Arc<R>,
        members: Arc<M>,
        tokens: Arc<T>,
        sessions: Arc<CrmSessionPool>,
        policy: RetryPolicy,
        batch_size: i64,
    ) -> Self {
        Self {
            records,
            members,
            tokens,
            sessions,
            policy,
            batch_size,
        }
    }

    /// 对单个租户执行一轮同步
    ///
    /// 租户会话在本轮内复用；会话开启失败（连不上 CRM）时整轮放弃，
    /// 记录保持可认领，下一轮重试。
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.tenant_id))]
    pub async fn run_once(&self, tenant: &TenantConfig) -> Result<SyncRunReport> {
        let policy = self
            .policy
            .clone()
            .with_max_retries(tenant.max_retries.max(0) as u32);
        let session = self.sessions.acquire(&tenant.tenant_id).await?;

        let claimable = self
            .records
            .list_claimable(&tenant.tenant_id, self.batch_size, Utc::now())
            .await
            .map_err(SyncError::Ledger)?;

        let mut report = SyncRunReport::default();

        for mut record in claimable {
            // 认领：条件更新落败说明另一实例已处理，跳过
            if !self.records.claim(record.id).await.map_err(SyncError::Ledger)? {
                report.skipped += 1;
                continue;
            }
            report.claimed += 1;

            match self.push_record(&record, session.as_ref()).await {
                Ok(external_id) => {
                    self.records
                        .complete(record.id, &external_id)
                        .await
                        .map_err(SyncError::Ledger)?;
                    report.completed += 1;
                    info!(record_id = %record.id, external_id, "同步记录完成");
                }
                Err(e) if e.is_retryable() => {
                    match record.record_failure(&e.to_string(), &policy, Utc::now()) {
                        FailureDisposition::Retry => {
                            self.records
                                .schedule_retry(&record)
                                .await
                                .map_err(SyncError::Ledger)?;
                            report.retried += 1;
                            warn!(
                                record_id = %record.id,
                                retry_count = record.retry_count,
                                max_retries = record.max_retries,
                                next_attempt_at = ?record.next_attempt_at,
                                error = %e,
                                "同步失败，已安排退避重试"
                            );
                        }
                        FailureDisposition::Dead => {
                            self.records
                                .mark_dead(&record)
                                .await
                                .map_err(SyncError::Ledger)?;
                            report.dead += 1;
                            error!(
                                record_id = %record.id,
                                entity_type = ?record.entity_type,
                                entity_id = %record.entity_id,
                                retry_count = record.retry_count,
                                last_error = %e,
                                "同步记录重试耗尽进入死信，需人工介入"
                            );
                        }
                    }
                }
                Err(e) => {
                    // 本地缺陷：重试不可能成功，直接死信
                    record.fail_permanently(&e.to_string(), Utc::now());
                    self.records
                        .mark_dead(&record)
                        .await
                        .map_err(SyncError::Ledger)?;
                    report.dead += 1;
                    error!(
                        record_id = %record.id,
                        entity_type = ?record.entity_type,
                        entity_id = %record.entity_id,
                        error = %e,
                        "同步记录遇到不可重试缺陷，进入死信"
                    );
                }
            }
        }

        Ok(report)
    }

    /// 推送单条记录，返回外部记录 ID
    ///
    /// 实体状态在这里重新读取：核销可能与发放状态的同步赛跑，
    /// 同步必须下发实体的最新状态而不是入队时的快照。
    async fn push_record(
        &self,
        record: &SyncRecord,
        session: &dyn ExternalCrmClient,
    ) -> Result<String> {
        match record.entity_type {
            SyncEntityType::Member => {
                let member = self
                    .members
                    .get(&record.tenant_id, &record.entity_id)
                    .await?
                    .ok_or_else(|| SyncError::EntityMissing {
                        entity_type: "MEMBER".to_string(),
                        entity_id: record.entity_id.clone(),
                    })?;

                let payload = mapper::member_payload(&member);
                match &member.external_id {
                    Some(external_id) => {
                        session.update(external_id, &payload).await?;
                        Ok(external_id.clone())
                    }
                    None => {
                        let external_id =
                            session.create(mapper::CRM_MEMBER_TYPE, &payload).await?;
                        self.members
                            .set_external_id(&record.tenant_id, &record.entity_id, &external_id)
                            .await?;
                        Ok(external_id)
                    }
                }
            }
            SyncEntityType::Token => {
                let token_id: i64 =
                    record
                        .entity_id
                        .parse()
                        .map_err(|_| SyncError::EntityMissing {
                            entity_type: "TOKEN".to_string(),
                            entity_id: record.entity_id.clone(),
                        })?;
                let token = self
                    .tokens
                    .get_by_id(token_id)
                    .await?
                    .ok_or_else(|| SyncError::EntityMissing {
                        entity_type: "TOKEN".to_string(),
                        entity_id: record.entity_id.clone(),
                    })?;

                let payload = mapper::token_payload(&token);
                match &token.external_id {
                    Some(external_id) => {
                        session.update(external_id, &payload).await?;
                        Ok(external_id.clone())
                    }
                    None => {
                        let external_id = session.create(mapper::CRM_TOKEN_TYPE, &payload).await?;
                        self.tokens.set_external_id(token_id, &external_id).await?;
                        Ok(external_id)
                    }
                }
            }
        }
    }
}
