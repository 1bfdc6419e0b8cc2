//! 贴纸仓储
//!
//! code 的全局唯一性由唯一索引兜底，插入使用 ON CONFLICT DO NOTHING
//! 实现原子的"不存在才插入"；状态转移一律为条件更新，零行受影响
//! 即表示竞争失败，由调用方映射为业务冲突错误。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use super::traits::TokenRepositoryTrait;
use crate::error::Result;
use crate::models::{DiscountToken, TokenKind, TokenState};

const TOKEN_COLUMNS: &str = r#"
    id, tenant_id, member_id, code, discount_percent, kind, state,
    issued_at, expires_at, redeemed_at, external_id
"#;

/// 贴纸仓储
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 事务内原子插入：code 空闲则插入并返回新 id，被占用返回 None
    ///
    /// DO NOTHING 不会中止事务，调用方可以换一个候选 code 继续重试
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_if_code_free_in_tx(
        tx: &mut PgConnection,
        tenant_id: &str,
        member_id: &str,
        code: &str,
        discount_percent: i32,
        kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            INSERT INTO discount_token
                (tenant_id, member_id, code, discount_percent, kind, state, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, 'issued', $6, $7)
            ON CONFLICT (code) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(code)
        .bind(discount_percent)
        .bind(kind)
        .bind(issued_at)
        .bind(expires_at)
        .fetch_optional(tx)
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<DiscountToken>> {
        let token = sqlx::query_as::<_, DiscountToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM discount_token WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// 按租户 + 兑换码查询
    ///
    /// code 虽然全局唯一，查询仍带 tenant_id：跨租户的码对本租户而言
    /// 等同于不存在
    pub async fn get_by_code(&self, tenant_id: &str, code: &str) -> Result<Option<DiscountToken>> {
        let token = sqlx::query_as::<_, DiscountToken>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM discount_token WHERE tenant_id = $1 AND code = $2"
        ))
        .bind(tenant_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    /// 列出会员的贴纸（按发放时间倒序）
    pub async fn list_by_member(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Vec<DiscountToken>> {
        let tokens = sqlx::query_as::<_, DiscountToken>(&format!(
            r#"
            SELECT {TOKEN_COLUMNS} FROM discount_token
            WHERE tenant_id = $1 AND member_id = $2
            ORDER BY issued_at DESC
            "#
        ))
        .bind(tenant_id)
        .bind(member_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    /// 事务内 issued -> redeemed 条件转移
    ///
    /// 这是核销的 at-most-once 保证：state 已不是 issued 时零行受影响，
    /// 并发的第二次核销在这里失败。与同步记录入队同事务提交
    pub async fn mark_redeemed_in_tx(
        tx: &mut PgConnection,
        id: i64,
        redeemed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE discount_token
            SET state = 'redeemed', redeemed_at = $2
            WHERE id = $1 AND state = 'issued'
            "#,
        )
        .bind(id)
        .bind(redeemed_at)
        .execute(tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// issued -> expired 条件转移（校验时惰性触发）
    pub async fn mark_expired(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE discount_token
            SET state = 'expired'
            WHERE id = $1 AND state = 'issued'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 写回外部 CRM 记录 ID（只写一次）
    pub async fn set_external_id(&self, id: i64, external_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE discount_token
            SET external_id = $2
            WHERE id = $1 AND external_id IS NULL
            "#,
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 统计某状态的贴纸数量（审计用）
    pub async fn count_by_state(&self, tenant_id: &str, state: TokenState) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM discount_token WHERE tenant_id = $1 AND state = $2",
        )
        .bind(tenant_id)
        .bind(state)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("cnt"))
    }
}

#[async_trait]
impl TokenRepositoryTrait for TokenRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<DiscountToken>> {
        self.get_by_id(id).await
    }

    async fn get_by_code(&self, tenant_id: &str, code: &str) -> Result<Option<DiscountToken>> {
        self.get_by_code(tenant_id, code).await
    }

    async fn list_by_member(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Vec<DiscountToken>> {
        self.list_by_member(tenant_id, member_id).await
    }

    async fn mark_expired(&self, id: i64) -> Result<bool> {
        self.mark_expired(id).await
    }

    async fn set_external_id(&self, id: i64, external_id: &str) -> Result<()> {
        self.set_external_id(id, external_id).await
    }
}
