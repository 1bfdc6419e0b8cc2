//! 会员仓储
//!
//! 会员行上的两个派生缓存列（points_balance、total_discount_percent）
//! 的读-改-写都必须经过行锁或单语句原子更新，见 get_for_update 与
//! add_points_in_tx。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::traits::MemberRepositoryTrait;
use crate::error::Result;
use crate::models::Member;

const MEMBER_COLUMNS: &str = r#"
    tenant_id, member_id, points_balance, total_discount_percent, external_id,
    created_at, updated_at
"#;

/// 会员仓储
pub struct MemberRepository {
    pool: PgPool,
}

impl MemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, tenant_id: &str, member_id: &str) -> Result<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member WHERE tenant_id = $1 AND member_id = $2"
        ))
        .bind(tenant_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(member)
    }

    /// 事务内行锁读取（FOR UPDATE）
    ///
    /// 发放贴纸前必须经此锁定会员行，使上限检查与累计更新构成
    /// 单个原子操作，两个并发发放不可能同时通过检查
    pub async fn get_for_update(
        tx: &mut PgConnection,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Option<Member>> {
        let member = sqlx::query_as::<_, Member>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member WHERE tenant_id = $1 AND member_id = $2 FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(member_id)
        .fetch_optional(tx)
        .await?;

        Ok(member)
    }

    /// 事务内按需创建会员行（首次积分入账时）
    ///
    /// ON CONFLICT DO NOTHING 后再读取，保证并发首次入账只有一行
    pub async fn ensure_exists_in_tx(
        tx: &mut PgConnection,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO member (tenant_id, member_id, points_balance, total_discount_percent, created_at, updated_at)
            VALUES ($1, $2, 0, 0, NOW(), NOW())
            ON CONFLICT (tenant_id, member_id) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 事务内累加积分余额缓存
    pub async fn add_points_in_tx(
        tx: &mut PgConnection,
        tenant_id: &str,
        member_id: &str,
        delta: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE member
            SET points_balance = points_balance + $3, updated_at = NOW()
            WHERE tenant_id = $1 AND member_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(delta)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 事务内写入新的累计折扣（调用方持有行锁并已完成上限检查）
    pub async fn set_total_discount_in_tx(
        tx: &mut PgConnection,
        tenant_id: &str,
        member_id: &str,
        new_total: i32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE member
            SET total_discount_percent = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND member_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(new_total)
        .execute(tx)
        .await?;

        Ok(())
    }

    /// 修复积分余额缓存（审计发现漂移时）
    pub async fn set_points_balance(
        &self,
        tenant_id: &str,
        member_id: &str,
        balance: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE member
            SET points_balance = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND member_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(balance)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 写回外部 CRM 记录 ID（首次同步成功后，只写一次）
    pub async fn set_external_id(
        &self,
        tenant_id: &str,
        member_id: &str,
        external_id: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE member
            SET external_id = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND member_id = $2 AND external_id IS NULL
            "#,
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MemberRepositoryTrait for MemberRepository {
    async fn get(&self, tenant_id: &str, member_id: &str) -> Result<Option<Member>> {
        self.get(tenant_id, member_id).await
    }

    async fn set_external_id(
        &self,
        tenant_id: &str,
        member_id: &str,
        external_id: &str,
    ) -> Result<()> {
        self.set_external_id(tenant_id, member_id, external_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_member_crud() {
        let pool = PgPool::connect(&std::env::var("DATABASE_URL").unwrap())
            .await
            .unwrap();
        let repo = MemberRepository::new(pool.clone());

        let mut tx = pool.begin().await.unwrap();
        MemberRepository::ensure_exists_in_tx(&mut tx, "it-tenant", "it-member")
            .await
            .unwrap();
        MemberRepository::add_points_in_tx(&mut tx, "it-tenant", "it-member", 10)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let member = repo.get("it-tenant", "it-member").await.unwrap().unwrap();
        assert!(member.points_balance >= 10);
    }
}
