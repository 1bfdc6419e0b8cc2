//! 积分流水仓储
//!
//! 只追加流水：insert 之外没有任何修改入口。余额审计通过求和完成，
//! 与会员行上的缓存余额比对。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row};

use super::traits::PointsLedgerRepositoryTrait;
use crate::error::Result;
use crate::models::PointsLedgerEntry;

const LEDGER_COLUMNS: &str = r#"
    id, tenant_id, member_id, points_delta, reason, idempotency_key, external_ref, created_at
"#;

/// 积分流水仓储
pub struct PointsLedgerRepository {
    pool: PgPool,
}

impl PointsLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 事务内追加流水
    ///
    /// 幂等键冲突由部分唯一索引兜底；调用方先查重（get_by_idempotency_key），
    /// 真正竞争到索引冲突时事务回滚，重放方在重试时拿到已存在的条目
    pub async fn insert_in_tx(
        tx: &mut PgConnection,
        entry: &PointsLedgerEntry,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO points_ledger_entry
                (tenant_id, member_id, points_delta, reason, idempotency_key, external_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&entry.tenant_id)
        .bind(&entry.member_id)
        .bind(entry.points_delta)
        .bind(&entry.reason)
        .bind(&entry.idempotency_key)
        .bind(&entry.external_ref)
        .bind(entry.created_at)
        .fetch_one(tx)
        .await?;

        Ok(row.get("id"))
    }

    /// 按幂等键查询已存在的流水
    pub async fn get_by_idempotency_key(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<PointsLedgerEntry>> {
        let entry = sqlx::query_as::<_, PointsLedgerEntry>(&format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM points_ledger_entry
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#
        ))
        .bind(tenant_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// 流水求和（审计/修复真实余额）
    pub async fn sum_points(&self, tenant_id: &str, member_id: &str) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(points_delta), 0)::BIGINT AS total
            FROM points_ledger_entry
            WHERE tenant_id = $1 AND member_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    /// 最近流水（按时间倒序）
    pub async fn list_recent(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        let entries = sqlx::query_as::<_, PointsLedgerEntry>(&format!(
            r#"
            SELECT {LEDGER_COLUMNS} FROM points_ledger_entry
            WHERE tenant_id = $1 AND member_id = $2
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(tenant_id)
        .bind(member_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl PointsLedgerRepositoryTrait for PointsLedgerRepository {
    async fn get_by_idempotency_key(
        &self,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<PointsLedgerEntry>> {
        self.get_by_idempotency_key(tenant_id, idempotency_key)
            .await
    }

    async fn sum_points(&self, tenant_id: &str, member_id: &str) -> Result<i64> {
        self.sum_points(tenant_id, member_id).await
    }

    async fn list_recent(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<PointsLedgerEntry>> {
        self.list_recent(tenant_id, member_id, limit).await
    }
}
