//! 同步记录仓储（SyncLogStore）
//!
//! 纯持久化 + 查询，不含业务判断。记录的认领（pending|retry -> syncing）
//! 是条件更新：多个 worker 实例并发认领同一条记录时只有一个成功，
//! 落败方跳过即可，无需分布式锁。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::traits::SyncRecordRepositoryTrait;
use crate::error::Result;
use crate::models::{SyncRecord, SyncState};

const SYNC_COLUMNS: &str = r#"
    id, tenant_id, entity_type, entity_id, operation, state, retry_count,
    max_retries, last_error, external_id, next_attempt_at, created_at, updated_at
"#;

/// 同步记录仓储
pub struct SyncRecordRepository {
    pool: PgPool,
}

impl SyncRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 事务内创建（与账本变更同事务，保证变更必有同步记录）
    pub async fn create_in_tx(tx: &mut PgConnection, record: &SyncRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_record
                (id, tenant_id, entity_type, entity_id, operation, state, retry_count,
                 max_retries, last_error, external_id, next_attempt_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(record.entity_type)
        .bind(&record.entity_id)
        .bind(record.operation)
        .bind(record.state)
        .bind(record.retry_count)
        .bind(record.max_retries)
        .bind(&record.last_error)
        .bind(&record.external_id)
        .bind(record.next_attempt_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(tx)
        .await?;

        Ok(())
    }

    pub async fn create(&self, record: &SyncRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::create_in_tx(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>> {
        let record = sqlx::query_as::<_, SyncRecord>(&format!(
            "SELECT {SYNC_COLUMNS} FROM sync_record WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// 捞取可认领记录
    ///
    /// pending 一律可认领；retry 需 next_attempt_at 已到期（退避结束）。
    /// 按创建时间排序，先入先出
    pub async fn list_claimable(
        &self,
        tenant_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncRecord>> {
        let records = sqlx::query_as::<_, SyncRecord>(&format!(
            r#"
            SELECT {SYNC_COLUMNS} FROM sync_record
            WHERE tenant_id = $1
              AND (state = 'pending'
                   OR (state = 'retry' AND next_attempt_at IS NOT NULL AND next_attempt_at <= $2))
            ORDER BY created_at
            LIMIT $3
            "#
        ))
        .bind(tenant_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// 认领记录：pending|retry -> syncing 条件转移
    ///
    /// false 表示另一个 worker 实例已抢先认领（或记录已进入终态），
    /// 调用方直接跳过
    pub async fn claim(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_record
            SET state = 'syncing', updated_at = NOW()
            WHERE id = $1 AND state IN ('pending', 'retry')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 标记完成并写回 external_id，清空 last_error
    pub async fn complete(&self, id: Uuid, external_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_record
            SET state = 'completed', external_id = $2, last_error = NULL,
                next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 落库重试调度（record_failure 的 Retry 决定）
    pub async fn schedule_retry(&self, record: &SyncRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_record
            SET state = 'retry', retry_count = $2, last_error = $3,
                next_attempt_at = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.retry_count)
        .bind(&record.last_error)
        .bind(record.next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 落库死信（record_failure 的 Dead 决定）
    pub async fn mark_dead(&self, record: &SyncRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_record
            SET state = 'dead', retry_count = $2, last_error = $3,
                next_attempt_at = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.retry_count)
        .bind(&record.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 按状态查询（运维排查 dead 记录等）
    pub async fn list_by_state(
        &self,
        tenant_id: &str,
        state: SyncState,
        limit: i64,
    ) -> Result<Vec<SyncRecord>> {
        let records = sqlx::query_as::<_, SyncRecord>(&format!(
            r#"
            SELECT {SYNC_COLUMNS} FROM sync_record
            WHERE tenant_id = $1 AND state = $2
            ORDER BY updated_at DESC
            LIMIT $3
            "#
        ))
        .bind(tenant_id)
        .bind(state)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// 各状态记录数统计（运维面板）
    pub async fn count_by_state(&self, tenant_id: &str) -> Result<Vec<(SyncState, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT state, COUNT(*) AS cnt
            FROM sync_record
            WHERE tenant_id = $1
            GROUP BY state
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let counts = rows
            .iter()
            .map(|row| (row.get("state"), row.get("cnt")))
            .collect();

        Ok(counts)
    }
}

#[async_trait]
impl SyncRecordRepositoryTrait for SyncRecordRepository {
    async fn create(&self, record: &SyncRecord) -> Result<()> {
        self.create(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<SyncRecord>> {
        self.get(id).await
    }

    async fn list_claimable(
        &self,
        tenant_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<SyncRecord>> {
        self.list_claimable(tenant_id, limit, now).await
    }

    async fn claim(&self, id: Uuid) -> Result<bool> {
        self.claim(id).await
    }

    async fn complete(&self, id: Uuid, external_id: &str) -> Result<()> {
        self.complete(id, external_id).await
    }

    async fn schedule_retry(&self, record: &SyncRecord) -> Result<()> {
        self.schedule_retry(record).await
    }

    async fn mark_dead(&self, record: &SyncRecord) -> Result<()> {
        self.mark_dead(record).await
    }

    async fn list_by_state(
        &self,
        tenant_id: &str,
        state: SyncState,
        limit: i64,
    ) -> Result<Vec<SyncRecord>> {
        self.list_by_state(tenant_id, state, limit).await
    }

    async fn count_by_state(&self, tenant_id: &str) -> Result<Vec<(SyncState, i64)>> {
        self.count_by_state(tenant_id).await
    }
}
