//! PointsService 集成测试
//!
//! 使用真实 PostgreSQL 验证积分入账的幂等性、余额缓存与审计修复。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test points_service_test -- --ignored
//! ```

use std::sync::Arc;

use sqlx::PgPool;

use sticker_ledger::repository::{
    MemberRepository, PointsLedgerRepository, SyncRecordRepository, TenantConfigStore,
};
use sticker_ledger::{LedgerError, PointsService, SyncEntityType, SyncState};
use sticker_shared::events::LogSink;

// ==================== 辅助函数 ====================

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    PgPool::connect(&url).await.expect("数据库连接失败")
}

fn service(pool: &PgPool) -> PointsService {
    PointsService::new(
        pool.clone(),
        Arc::new(PointsLedgerRepository::new(pool.clone())),
        Arc::new(MemberRepository::new(pool.clone())),
        Arc::new(TenantConfigStore::new(pool.clone())),
        Arc::new(LogSink),
    )
}

async fn seed_tenant(pool: &PgPool, tenant_id: &str) {
    sqlx::query(
        r#"
        INSERT INTO tenant_config
            (tenant_id, name, max_discount_percent, discount_per_action, points_per_action,
             token_expiration_days, sync_interval_seconds, max_retries, active)
        VALUES ($1, $2, 20, '{}', '{"video_watched": 10, "review_posted": 20}', 30, 300, 3, TRUE)
        ON CONFLICT (tenant_id) DO UPDATE SET active = TRUE
        "#,
    )
    .bind(tenant_id)
    .bind(format!("IntegTest {tenant_id}"))
    .execute(pool)
    .await
    .expect("插入测试租户失败");
}

// ==================== 测试 ====================

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_award_rejects_negative_points() {
    let pool = pool().await;
    seed_tenant(&pool, "it-pts-neg").await;

    let svc = service(&pool);
    let err = svc
        .award("it-pts-neg", "m-001", "manual", -5, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NegativePoints(-5)));
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_award_creates_member_and_updates_balance() {
    let pool = pool().await;
    let tenant = "it-pts-first";
    seed_tenant(&pool, tenant).await;
    // 会员不预先存在：首次入账即开户
    let member = format!("m-{}", uuid::Uuid::now_v7());

    let svc = service(&pool);
    let entry = svc
        .award(tenant, &member, "video_watched", 10, None)
        .await
        .unwrap();
    assert!(entry.id > 0);
    assert_eq!(svc.balance(tenant, &member).await.unwrap(), 10);

    svc.award(tenant, &member, "review_posted", 20, None)
        .await
        .unwrap();
    assert_eq!(svc.balance(tenant, &member).await.unwrap(), 30);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_award_is_idempotent_per_key() {
    let pool = pool().await;
    let tenant = "it-pts-idem";
    seed_tenant(&pool, tenant).await;
    let member = format!("m-{}", uuid::Uuid::now_v7());
    let key = format!("like:{}:{member}", uuid::Uuid::now_v7());

    let svc = service(&pool);
    let first = svc
        .award(tenant, &member, "video_watched", 10, Some(&key))
        .await
        .unwrap();
    // 同一幂等键重放：返回同一条流水，不重复计分
    let replay = svc
        .award(tenant, &member, "video_watched", 10, Some(&key))
        .await
        .unwrap();

    assert_eq!(first.id, replay.id);
    assert_eq!(svc.balance(tenant, &member).await.unwrap(), 10);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_award_for_action_uses_tenant_config() {
    let pool = pool().await;
    let tenant = "it-pts-action";
    seed_tenant(&pool, tenant).await;
    let member = format!("m-{}", uuid::Uuid::now_v7());

    let svc = service(&pool);
    let entry = svc
        .award_for_action(tenant, &member, "review_posted", None)
        .await
        .unwrap();
    assert_eq!(entry.points_delta, 20);

    // 未配置的动作名拒绝
    let err = svc
        .award_for_action(tenant, &member, "unknown_action", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAction { .. }));
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_recompute_balance_repairs_drift() {
    let pool = pool().await;
    let tenant = "it-pts-audit";
    seed_tenant(&pool, tenant).await;
    let member = format!("m-{}", uuid::Uuid::now_v7());

    let svc = service(&pool);
    svc.award(tenant, &member, "video_watched", 10, None)
        .await
        .unwrap();

    // 人为制造缓存漂移
    sqlx::query("UPDATE member SET points_balance = 999 WHERE tenant_id = $1 AND member_id = $2")
        .bind(tenant)
        .bind(&member)
        .execute(&pool)
        .await
        .unwrap();

    let audit = svc.recompute_balance(tenant, &member).await.unwrap();
    assert_eq!(audit.cached, 999);
    assert_eq!(audit.computed, 10);
    assert!(audit.repaired);

    // 修复后缓存与流水一致
    assert_eq!(svc.balance(tenant, &member).await.unwrap(), 10);
    let audit = svc.recompute_balance(tenant, &member).await.unwrap();
    assert!(!audit.repaired);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_award_enqueues_member_sync_record() {
    let pool = pool().await;
    let tenant = format!("it-pts-sync-{}", uuid::Uuid::now_v7());
    seed_tenant(&pool, &tenant).await;
    let member = format!("m-{}", uuid::Uuid::now_v7());

    let svc = service(&pool);
    svc.award(&tenant, &member, "video_watched", 10, None)
        .await
        .unwrap();

    let records = SyncRecordRepository::new(pool.clone());
    let pending = records
        .list_by_state(&tenant, SyncState::Pending, 100)
        .await
        .unwrap();
    assert!(
        pending
            .iter()
            .any(|r| r.entity_type == SyncEntityType::Member && r.entity_id == member),
        "入账必须同事务入队会员同步记录"
    );
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_history_returns_recent_entries() {
    let pool = pool().await;
    let tenant = "it-pts-history";
    seed_tenant(&pool, tenant).await;
    let member = format!("m-{}", uuid::Uuid::now_v7());

    let svc = service(&pool);
    for _ in 0..3 {
        svc.award(tenant, &member, "video_watched", 10, None)
            .await
            .unwrap();
    }

    let history = svc.history(tenant, &member, 2).await.unwrap();
    assert_eq!(history.len(), 2);
}
