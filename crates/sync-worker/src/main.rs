//! 外部同步 worker 入口
//!
//! 周期性将各租户的账本变更推送到外部 CRM。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use sticker_ledger::repository::{
    MemberRepository, SyncRecordRepository, TenantConfigStore, TokenRepository,
};
use sticker_shared::{config::AppConfig, database::Database, observability, retry::RetryPolicy};
use sticker_sync::{CrmSessionPool, OutboundSyncWorker, SyncScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置并初始化日志
    let config = AppConfig::load("sync-worker").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });
    observability::init(&config.observability)?;

    info!("Starting sticker-sync worker...");
    info!(environment = %config.environment, "Configuration loaded");

    // 2. 数据库连接与迁移
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    // 3. 仓储与会话池
    let records = Arc::new(SyncRecordRepository::new(pool.clone()));
    let members = Arc::new(MemberRepository::new(pool.clone()));
    let tokens = Arc::new(TokenRepository::new(pool.clone()));
    let tenants = Arc::new(TenantConfigStore::new(pool.clone()));
    let sessions = Arc::new(CrmSessionPool::new(config.crm.clone()));
    info!("Repositories initialized");

    // 4. worker 与调度器
    let worker = Arc::new(OutboundSyncWorker::new(
        records,
        members,
        tokens,
        sessions,
        RetryPolicy::from_sync_config(&config.sync),
        config.sync.batch_size,
    ));
    let scheduler = SyncScheduler::new(worker, tenants);

    // 5. 启动各租户周期任务
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = scheduler.spawn_all(shutdown_rx).await?;
    info!(tasks = handles.len(), "Sync scheduler started");

    // 6. 等待关闭信号后优雅退出
    shutdown_signal().await;
    shutdown_tx.send(true)?;
    for handle in handles {
        let _ = handle.await;
    }

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
