//! TokenService 集成测试
//!
//! 使用真实 PostgreSQL 验证贴纸引擎的完整流程：发放上限、并发安全、
//! at-most-once 核销与惰性过期。引擎内部通过行锁与条件更新直接操作
//! 数据库，无法通过纯 mock 覆盖，因此需要集成测试。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test token_service_test -- --ignored
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;

use sticker_ledger::repository::{SyncRecordRepository, TenantConfigStore, TokenRepository};
use sticker_ledger::{
    CodeGenerator, LedgerError, SyncState, TokenKind, TokenService, ValidationResult,
};
use sticker_shared::events::LogSink;

// ==================== 辅助函数 ====================

/// 从环境变量读取数据库 URL，未设置则 panic
async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    PgPool::connect(&url).await.expect("数据库连接失败")
}

fn service(pool: &PgPool) -> TokenService {
    TokenService::new(
        pool.clone(),
        Arc::new(TokenRepository::new(pool.clone())),
        Arc::new(TenantConfigStore::new(pool.clone())),
        CodeGenerator::new(),
        Arc::new(LogSink),
    )
}

/// 插入测试租户（幂等，已存在则重置配置）
async fn seed_tenant(pool: &PgPool, tenant_id: &str, max_discount_percent: i32) {
    sqlx::query(
        r#"
        INSERT INTO tenant_config
            (tenant_id, name, max_discount_percent, discount_per_action, points_per_action,
             token_expiration_days, sync_interval_seconds, max_retries, active)
        VALUES ($1, $2, $3, '{"REVIEW": 5}', '{"video_watched": 10}', 30, 300, 3, TRUE)
        ON CONFLICT (tenant_id) DO UPDATE SET
            max_discount_percent = EXCLUDED.max_discount_percent,
            active = TRUE
        "#,
    )
    .bind(tenant_id)
    .bind(format!("IntegTest {tenant_id}"))
    .bind(max_discount_percent)
    .execute(pool)
    .await
    .expect("插入测试租户失败");
}

/// 插入测试会员并重置累计折扣
async fn seed_member(pool: &PgPool, tenant_id: &str, member_id: &str, total_discount: i32) {
    sqlx::query(
        r#"
        INSERT INTO member (tenant_id, member_id, points_balance, total_discount_percent)
        VALUES ($1, $2, 0, $3)
        ON CONFLICT (tenant_id, member_id) DO UPDATE SET
            total_discount_percent = EXCLUDED.total_discount_percent
        "#,
    )
    .bind(tenant_id)
    .bind(member_id)
    .bind(total_discount)
    .execute(pool)
    .await
    .expect("插入测试会员失败");
}

async fn member_total_discount(pool: &PgPool, tenant_id: &str, member_id: &str) -> i32 {
    sqlx::query_scalar(
        "SELECT total_discount_percent FROM member WHERE tenant_id = $1 AND member_id = $2",
    )
    .bind(tenant_id)
    .bind(member_id)
    .fetch_one(pool)
    .await
    .expect("查询会员失败")
}

// ==================== 发放与上限 ====================

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_issue_cap_scenario() {
    let pool = pool().await;
    let tenant = "it-cap-tenant";
    let member = "it-cap-member";
    seed_tenant(&pool, tenant, 20).await;
    seed_member(&pool, tenant, member, 15).await;

    let svc = service(&pool);

    // 已累计 15%，申请 10% 超出上限 20%，拒绝而非钳制
    let err = svc
        .issue(tenant, member, TokenKind::Review, 10, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CapExceeded { .. }));
    assert_eq!(member_total_discount(&pool, tenant, member).await, 15);

    // 申请 5% 恰好到上限，成功
    let token = svc
        .issue(tenant, member, TokenKind::Review, 5, None)
        .await
        .unwrap();
    assert_eq!(token.discount_percent, 5);
    assert_eq!(member_total_discount(&pool, tenant, member).await, 20);

    // 到达上限后再申请 1% 被拒绝
    let err = svc
        .issue(tenant, member, TokenKind::Review, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CapExceeded { .. }));
    assert_eq!(member_total_discount(&pool, tenant, member).await, 20);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_concurrent_issues_never_exceed_cap() {
    let pool = pool().await;
    let tenant = "it-race-tenant";
    let member = "it-race-member";
    seed_tenant(&pool, tenant, 20).await;
    seed_member(&pool, tenant, member, 0).await;

    let svc = Arc::new(service(&pool));

    // 10 个并发发放各 5%：行锁保证最多 4 个成功
    let mut handles = Vec::new();
    for _ in 0..10 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.issue("it-race-tenant", "it-race-member", TokenKind::Video, 5, None)
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 4);
    assert_eq!(member_total_discount(&pool, tenant, member).await, 20);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_issue_enqueues_pending_sync_record() {
    let pool = pool().await;
    let tenant = "it-sync-tenant";
    let member = "it-sync-member";
    seed_tenant(&pool, tenant, 50).await;
    seed_member(&pool, tenant, member, 0).await;

    let svc = service(&pool);
    let token = svc
        .issue(tenant, member, TokenKind::Signup, 5, None)
        .await
        .unwrap();

    let records = SyncRecordRepository::new(pool.clone());
    let pending = records
        .list_by_state(tenant, SyncState::Pending, 100)
        .await
        .unwrap();
    assert!(
        pending.iter().any(|r| r.entity_id == token.id.to_string()),
        "发放必须同事务入队 pending 同步记录"
    );
}

// ==================== 校验与核销 ====================

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_redeem_is_at_most_once() {
    let pool = pool().await;
    let tenant = "it-redeem-tenant";
    let member = "it-redeem-member";
    seed_tenant(&pool, tenant, 50).await;
    seed_member(&pool, tenant, member, 0).await;

    let svc = Arc::new(service(&pool));
    let token = svc
        .issue(tenant, member, TokenKind::Review, 5, None)
        .await
        .unwrap();

    // 并发核销同一个码：恰好一个成功
    let mut handles = Vec::new();
    for _ in 0..5 {
        let svc = svc.clone();
        let code = token.code.clone();
        handles.push(tokio::spawn(async move {
            svc.redeem(&code, "it-redeem-tenant", None).await
        }));
    }

    let mut succeeded = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::TokenAlreadyRedeemed(_)) => conflicts += 1,
            Err(other) => panic!("意外错误: {other:?}"),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(conflicts, 4);

    // 核销后校验必须报告已使用
    let result = svc.validate(&token.code, tenant).await.unwrap();
    assert_eq!(result, ValidationResult::Used);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_owner_mismatch_rejected() {
    let pool = pool().await;
    let tenant = "it-owner-tenant";
    seed_tenant(&pool, tenant, 50).await;
    seed_member(&pool, tenant, "it-owner-a", 0).await;
    seed_member(&pool, tenant, "it-owner-b", 0).await;

    let svc = service(&pool);
    let token = svc
        .issue(tenant, "it-owner-a", TokenKind::Social, 5, None)
        .await
        .unwrap();

    let err = svc
        .redeem(&token.code, tenant, Some("it-owner-b"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::TokenOwnerMismatch { .. }));

    // 正确的会员可以核销
    assert!(svc.redeem(&token.code, tenant, Some("it-owner-a")).await.is_ok());
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_expired_token_cannot_be_redeemed() {
    let pool = pool().await;
    let tenant = "it-expire-tenant";
    let member = "it-expire-member";
    seed_tenant(&pool, tenant, 50).await;
    seed_member(&pool, tenant, member, 0).await;

    let svc = service(&pool);
    // 有效期设为过去
    let token = svc
        .issue(
            tenant,
            member,
            TokenKind::Video,
            3,
            Some(Utc::now() - Duration::hours(1)),
        )
        .await
        .unwrap();

    // 校验报告过期（并惰性转移状态）
    let result = svc.validate(&token.code, tenant).await.unwrap();
    assert_eq!(result, ValidationResult::Expired);

    // 一旦报告过期，之后的核销永远失败
    let err = svc.redeem(&token.code, tenant, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::TokenExpired(_)));

    // 再次校验仍然过期
    let result = svc.validate(&token.code, tenant).await.unwrap();
    assert_eq!(result, ValidationResult::Expired);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_validate_unknown_code_is_invalid() {
    let pool = pool().await;
    let tenant = "it-unknown-tenant";
    seed_tenant(&pool, tenant, 50).await;

    let svc = service(&pool);
    let result = svc.validate("ZZZZZZZZZ", tenant).await.unwrap();
    assert_eq!(result, ValidationResult::Invalid);
}

#[tokio::test]
#[ignore] // 需要数据库连接
async fn test_codes_are_pairwise_distinct() {
    let pool = pool().await;
    let tenant = "it-codes-tenant";
    let member = "it-codes-member";
    seed_tenant(&pool, tenant, 1000).await;
    seed_member(&pool, tenant, member, 0).await;

    let svc = service(&pool);
    let mut codes = std::collections::HashSet::new();
    for _ in 0..50 {
        let token = svc
            .issue(tenant, member, TokenKind::Special, 1, None)
            .await
            .unwrap();
        // 唯一索引兜底下生成的码不可能重复
        assert!(codes.insert(token.code));
    }
}
