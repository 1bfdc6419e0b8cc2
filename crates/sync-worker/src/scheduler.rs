//! 同步调度器
//!
//! 每个激活租户一个独立的周期任务，间隔取租户配置的
//! sync_interval_seconds；force_sync 绕过间隔立即执行一轮，但不绕过
//! 记录级的重试退避状态机（未到 next_attempt_at 的 retry 记录仍然
//! 不可认领）。所有任务监听同一个 watch 关闭信号，优雅退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use sticker_ledger::TenantConfig;
use sticker_ledger::repository::TenantConfigStore;
use sticker_ledger::repository::traits::{
    MemberRepositoryTrait, SyncRecordRepositoryTrait, TokenRepositoryTrait,
};

use crate::error::{Result, SyncError};
use crate::worker::{OutboundSyncWorker, SyncRunReport};

/// 同步调度器
pub struct SyncScheduler<R, M, T>
where
    R: SyncRecordRepositoryTrait + 'static,
    M: MemberRepositoryTrait + 'static,
    T: TokenRepositoryTrait + 'static,
{
    worker: Arc<OutboundSyncWorker<R, M, T>>,
    tenants: Arc<TenantConfigStore>,
}

impl<R, M, T> SyncScheduler<R, M, T>
where
    R: SyncRecordRepositoryTrait + 'static,
    M: MemberRepositoryTrait + 'static,
    T: TokenRepositoryTrait + 'static,
{
    pub fn new(worker: Arc<OutboundSyncWorker<R, M, T>>, tenants: Arc<TenantConfigStore>) -> Self {
        Self { worker, tenants }
    }

    /// 为所有激活租户启动周期同步任务
    ///
    /// 返回各租户任务的句柄；任务在收到关闭信号后退出。
    pub async fn spawn_all(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let tenants = self
            .tenants
            .list_active()
            .await
            .map_err(SyncError::Ledger)?;

        info!(count = tenants.len(), "为激活租户启动同步任务");

        let handles = tenants
            .into_iter()
            .map(|tenant| self.spawn_tenant_loop(tenant, shutdown.clone()))
            .collect();

        Ok(handles)
    }

    /// 启动单个租户的周期同步任务
    pub fn spawn_tenant_loop(
        &self,
        tenant: TenantConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let worker = self.worker.clone();

        tokio::spawn(async move {
            let interval_secs = tenant.sync_interval_seconds.max(1) as u64;
            // 首个 tick 立即触发，启动时先清一轮积压的 pending 记录；
            // 错过的 tick 顺延而不是补发，避免长时间停顿后的同步风暴
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                tenant_id = %tenant.tenant_id,
                interval_secs,
                "租户同步任务已启动"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match worker.run_once(&tenant).await {
                            Ok(report) => {
                                if report != SyncRunReport::default() {
                                    info!(
                                        tenant_id = %tenant.tenant_id,
                                        claimed = report.claimed,
                                        completed = report.completed,
                                        retried = report.retried,
                                        dead = report.dead,
                                        skipped = report.skipped,
                                        "同步轮次完成"
                                    );
                                }
                            }
                            Err(e) => {
                                warn!(
                                    tenant_id = %tenant.tenant_id,
                                    error = %e,
                                    "同步轮次失败，等待下一周期"
                                );
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(tenant_id = %tenant.tenant_id, "租户同步任务退出");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// 按需触发一轮同步
    ///
    /// 绕过周期间隔，不绕过记录级退避：退避中的 retry 记录依旧要等
    /// next_attempt_at 到期。
    #[instrument(skip(self))]
    pub async fn force_sync(&self, tenant_id: &str) -> Result<SyncRunReport> {
        let tenant = self
            .tenants
            .get_active(tenant_id)
            .await
            .map_err(SyncError::Ledger)?;

        info!(tenant_id, "按需触发同步");
        self.worker.run_once(&tenant).await
    }
}
