//! 贴纸引擎
//!
//! 折扣贴纸的发放 / 校验 / 核销核心业务逻辑：
//! - 发放：行锁下的上限检查 + 全局唯一兑换码 + 同事务入队同步记录
//! - 校验：惰性过期转移（校验时触发，无后台扫描）
//! - 核销：条件状态转移保证 at-most-once
//!
//! ## 发放流程
//!
//! 1. 参数与租户校验 -> 2. 行锁读会员 -> 3. 上限检查（拒绝不钳制）
//!    -> 4. 候选码冲突重试插入 -> 5. 更新累计折扣 -> 6. 入队同步记录
//!    -> 7. 提交 -> 8. 发领域事件

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use sticker_shared::events::{self, DomainEvent, EventKind, NotificationSink};

use crate::error::{LedgerError, Result};
use crate::models::{
    DiscountToken, SyncEntityType, SyncOperation, SyncRecord, TokenKind, TokenState,
};
use crate::repository::{MemberRepository, SyncRecordRepository, TenantConfigStore, TokenRepository};
use crate::service::codegen::{CodeGenerator, MAX_CODE_ATTEMPTS};

/// 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// 本租户不存在该兑换码
    Invalid,
    /// 已被核销
    Used,
    /// 已过有效期
    Expired,
    /// 可用，携带折扣百分比
    Valid { discount_percent: i32 },
}

/// 贴纸引擎
pub struct TokenService {
    pool: PgPool,
    token_repo: Arc<TokenRepository>,
    tenants: Arc<TenantConfigStore>,
    codegen: CodeGenerator,
    sink: Arc<dyn NotificationSink>,
}

impl TokenService {
    pub fn new(
        pool: PgPool,
        token_repo: Arc<TokenRepository>,
        tenants: Arc<TenantConfigStore>,
        codegen: CodeGenerator,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            pool,
            token_repo,
            tenants,
            codegen,
            sink,
        }
    }

    /// 发放贴纸
    ///
    /// 上限检查与累计更新在会员行锁内完成，两个并发发放不可能合计
    /// 超出租户上限；超限直接拒绝（CapExceeded），不做静默钳制——
    /// 钳制会让调用方以为拿到了申请的折扣。成功后同事务入队同步记录。
    #[instrument(skip(self), fields(tenant_id = %tenant_id, member_id = %member_id, kind = %kind))]
    pub async fn issue(
        &self,
        tenant_id: &str,
        member_id: &str,
        kind: TokenKind,
        requested_percent: i32,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DiscountToken> {
        if requested_percent <= 0 {
            return Err(LedgerError::InvalidPercent(requested_percent));
        }

        let tenant = self.tenants.get_active(tenant_id).await?;
        let now = Utc::now();
        let expires_at = expires_at.unwrap_or_else(|| tenant.token_expires_at(now));

        let mut tx = self.pool.begin().await?;

        // 行锁读取会员，使上限检查 + 累计更新构成原子操作
        let member = MemberRepository::get_for_update(&mut tx, tenant_id, member_id)
            .await?
            .ok_or_else(|| LedgerError::MemberNotFound {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            })?;

        let new_total = check_cap(
            member.total_discount_percent,
            requested_percent,
            tenant.max_discount_percent,
        )?;

        // 候选码冲突重试，耗尽后退化到时间戳兜底码
        let (token_id, code) = self
            .insert_with_unique_code(
                &mut tx,
                tenant_id,
                member_id,
                kind,
                requested_percent,
                now,
                expires_at,
            )
            .await?;

        MemberRepository::set_total_discount_in_tx(&mut tx, tenant_id, member_id, new_total)
            .await?;

        // 同步记录与发放同事务：账本变更必然带出一条 pending 记录
        let sync_record = SyncRecord::new(
            tenant_id,
            SyncEntityType::Token,
            token_id.to_string(),
            SyncOperation::Create,
            tenant.max_retries,
        );
        SyncRecordRepository::create_in_tx(&mut tx, &sync_record).await?;

        tx.commit().await?;

        info!(code = %code, discount = requested_percent, new_total, "贴纸发放成功");

        events::emit(
            self.sink.as_ref(),
            DomainEvent::new(
                tenant_id,
                member_id,
                EventKind::TokenIssued,
                serde_json::json!({
                    "code": code,
                    "kind": kind,
                    "discountPercent": requested_percent,
                }),
            ),
        )
        .await;

        Ok(DiscountToken {
            id: token_id,
            tenant_id: tenant_id.to_string(),
            member_id: member_id.to_string(),
            code,
            discount_percent: requested_percent,
            kind,
            state: TokenState::Issued,
            issued_at: now,
            expires_at,
            redeemed_at: None,
            external_id: None,
        })
    }

    /// 按租户配置的种类默认折扣发放
    pub async fn issue_for_action(
        &self,
        tenant_id: &str,
        member_id: &str,
        kind: TokenKind,
    ) -> Result<DiscountToken> {
        let tenant = self.tenants.get_active(tenant_id).await?;
        let percent = tenant
            .discount_for(kind)
            .ok_or_else(|| LedgerError::UnknownAction {
                tenant_id: tenant_id.to_string(),
                action: kind.to_string(),
            })?;

        self.issue(tenant_id, member_id, kind, percent, None).await
    }

    /// 校验兑换码
    ///
    /// 过期是惰性判定的：读到 issued 但时间已过时，顺带做一次
    /// issued -> expired 条件转移；转移竞争失败不影响返回结果，
    /// 时间判定本身是单调的。
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn validate(&self, code: &str, tenant_id: &str) -> Result<ValidationResult> {
        let Some(token) = self.token_repo.get_by_code(tenant_id, code).await? else {
            return Ok(ValidationResult::Invalid);
        };

        let now = Utc::now();
        let result = classify(&token, now);

        // 惰性过期转移
        if result == ValidationResult::Expired && token.state == TokenState::Issued {
            let transitioned = self.token_repo.mark_expired(token.id).await?;
            if !transitioned {
                warn!(code, "过期转移竞争失败，状态已被并发修改");
            }
        }

        Ok(result)
    }

    /// 核销兑换码
    ///
    /// at-most-once：issued -> redeemed 为条件更新，并发核销只有一个
    /// 成功，落败方收到 TokenAlreadyRedeemed。传入 member_id 时必须与
    /// 发放对象一致。成功后同事务入队同步记录。
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub async fn redeem(
        &self,
        code: &str,
        tenant_id: &str,
        member_id: Option<&str>,
    ) -> Result<DiscountToken> {
        let tenant = self.tenants.get_active(tenant_id).await?;

        let mut token = self
            .token_repo
            .get_by_code(tenant_id, code)
            .await?
            .ok_or_else(|| LedgerError::TokenNotFound(code.to_string()))?;

        if let Some(member_id) = member_id
            && member_id != token.member_id
        {
            return Err(LedgerError::TokenOwnerMismatch {
                code: code.to_string(),
            });
        }

        let now = Utc::now();
        match classify(&token, now) {
            ValidationResult::Used => {
                return Err(LedgerError::TokenAlreadyRedeemed(code.to_string()));
            }
            ValidationResult::Expired => {
                // 惰性过期转移后拒绝；一旦校验报告过期，核销永远不会成功
                if token.state == TokenState::Issued {
                    let _ = self.token_repo.mark_expired(token.id).await?;
                }
                return Err(LedgerError::TokenExpired(code.to_string()));
            }
            ValidationResult::Invalid | ValidationResult::Valid { .. } => {}
        }

        let mut tx = self.pool.begin().await?;

        let transitioned = TokenRepository::mark_redeemed_in_tx(&mut tx, token.id, now).await?;
        if !transitioned {
            // 条件更新竞争失败：另一次核销（或过期转移）抢先
            return Err(LedgerError::TokenAlreadyRedeemed(code.to_string()));
        }

        // 已同步过的贴纸走幂等 update，否则仍是首次 create
        let operation = if token.external_id.is_some() {
            SyncOperation::Update
        } else {
            SyncOperation::Create
        };
        let sync_record = SyncRecord::new(
            tenant_id,
            SyncEntityType::Token,
            token.id.to_string(),
            operation,
            tenant.max_retries,
        );
        SyncRecordRepository::create_in_tx(&mut tx, &sync_record).await?;

        tx.commit().await?;

        token.state = TokenState::Redeemed;
        token.redeemed_at = Some(now);

        info!(code, member_id = %token.member_id, "贴纸核销成功");

        events::emit(
            self.sink.as_ref(),
            DomainEvent::new(
                tenant_id,
                token.member_id.clone(),
                EventKind::TokenRedeemed,
                serde_json::json!({
                    "code": code,
                    "discountPercent": token.discount_percent,
                }),
            ),
        )
        .await;

        Ok(token)
    }

    /// 列出会员的贴纸
    pub async fn member_tokens(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Vec<DiscountToken>> {
        self.token_repo.list_by_member(tenant_id, member_id).await
    }

    /// 在事务内以唯一兑换码插入贴纸
    ///
    /// 每次冲突换一个候选码；连续 MAX_CODE_ATTEMPTS 次冲突后改用
    /// 时间戳兜底码，兜底码仍冲突则放弃（CodeExhausted）。
    #[allow(clippy::too_many_arguments)]
    async fn insert_with_unique_code(
        &self,
        tx: &mut sqlx::PgConnection,
        tenant_id: &str,
        member_id: &str,
        kind: TokenKind,
        discount_percent: i32,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<(i64, String)> {
        for attempt in 0..MAX_CODE_ATTEMPTS {
            let code = self.codegen.candidate(tenant_id, kind);
            if let Some(id) = TokenRepository::insert_if_code_free_in_tx(
                tx,
                tenant_id,
                member_id,
                &code,
                discount_percent,
                kind,
                issued_at,
                expires_at,
            )
            .await?
            {
                return Ok((id, code));
            }
            warn!(attempt, code = %code, "兑换码冲突，更换候选重试");
        }

        let code = self.codegen.fallback(tenant_id, kind, issued_at);
        if let Some(id) = TokenRepository::insert_if_code_free_in_tx(
            tx,
            tenant_id,
            member_id,
            &code,
            discount_percent,
            kind,
            issued_at,
            expires_at,
        )
        .await?
        {
            return Ok((id, code));
        }

        Err(LedgerError::CodeExhausted(tenant_id.to_string()))
    }
}

/// 上限检查（拒绝不钳制）
///
/// 返回新的累计折扣；超出上限返回 CapExceeded。
fn check_cap(current: i32, requested: i32, max: i32) -> Result<i32> {
    let new_total = current + requested;
    if new_total > max {
        return Err(LedgerError::CapExceeded {
            requested,
            current,
            max,
        });
    }
    Ok(new_total)
}

/// 按状态与时间对贴纸分类（纯函数，无副作用）
///
/// 已核销优先于过期：redeemed 是终态，时间再久也报告 Used。
fn classify(token: &DiscountToken, now: DateTime<Utc>) -> ValidationResult {
    match token.state {
        TokenState::Redeemed => ValidationResult::Used,
        TokenState::Expired => ValidationResult::Expired,
        TokenState::Issued => {
            if token.is_past_expiry(now) {
                ValidationResult::Expired
            } else {
                ValidationResult::Valid {
                    discount_percent: token.discount_percent,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    // ==================== 上限检查 ====================

    #[test]
    fn test_check_cap_rejects_over_limit() {
        // 租户上限 20%，会员已累计 15%：申请 10% 被拒绝
        let err = check_cap(15, 10, 20).unwrap_err();
        match err {
            LedgerError::CapExceeded {
                requested,
                current,
                max,
            } => {
                assert_eq!(requested, 10);
                assert_eq!(current, 15);
                assert_eq!(max, 20);
            }
            other => panic!("期望 CapExceeded，实际 {other:?}"),
        }
    }

    #[test]
    fn test_check_cap_allows_exact_limit() {
        // 申请 5% 恰好达到上限 20%，允许
        assert_eq!(check_cap(15, 5, 20).unwrap(), 20);
    }

    #[test]
    fn test_check_cap_rejects_after_limit_reached() {
        // 已到上限后再申请 1% 被拒绝
        assert!(matches!(
            check_cap(20, 1, 20),
            Err(LedgerError::CapExceeded { .. })
        ));
    }

    // ==================== 分类 ====================

    fn sample_token(state: TokenState, expires_at: DateTime<Utc>) -> DiscountToken {
        DiscountToken {
            id: 1,
            tenant_id: "tenant-a".to_string(),
            member_id: "m-001".to_string(),
            code: "AB7RK2M9Q".to_string(),
            discount_percent: 5,
            kind: TokenKind::Review,
            state,
            issued_at: Utc::now() - Duration::days(1),
            expires_at,
            redeemed_at: None,
            external_id: None,
        }
    }

    #[test]
    fn test_classify_valid_token() {
        let token = sample_token(TokenState::Issued, Utc::now() + Duration::days(30));
        assert_eq!(
            classify(&token, Utc::now()),
            ValidationResult::Valid {
                discount_percent: 5
            }
        );
    }

    #[test]
    fn test_classify_redeemed_reports_used() {
        let token = sample_token(TokenState::Redeemed, Utc::now() + Duration::days(30));
        assert_eq!(classify(&token, Utc::now()), ValidationResult::Used);
    }

    #[test]
    fn test_classify_redeemed_wins_over_expiry() {
        // 已核销且时间已过：报告 Used 而非 Expired，终态不回退
        let token = sample_token(TokenState::Redeemed, Utc::now() - Duration::days(1));
        assert_eq!(classify(&token, Utc::now()), ValidationResult::Used);
    }

    #[test]
    fn test_classify_issued_past_expiry_reports_expired() {
        let token = sample_token(TokenState::Issued, Utc::now() - Duration::hours(1));
        assert_eq!(classify(&token, Utc::now()), ValidationResult::Expired);
    }

    #[test]
    fn test_classify_expired_state_is_sticky() {
        // 状态已是 expired 的贴纸永远报告 Expired（过期单调性）
        let token = sample_token(TokenState::Expired, Utc::now() + Duration::days(30));
        assert_eq!(classify(&token, Utc::now()), ValidationResult::Expired);
    }

    #[test]
    fn test_classify_expiry_monotonic_over_time() {
        // 一旦某时刻判定过期，之后任何时刻都过期
        let token = sample_token(TokenState::Issued, Utc::now());
        let t1 = Utc::now() + Duration::seconds(1);
        let t2 = t1 + Duration::days(1);
        assert_eq!(classify(&token, t1), ValidationResult::Expired);
        assert_eq!(classify(&token, t2), ValidationResult::Expired);
    }
}
