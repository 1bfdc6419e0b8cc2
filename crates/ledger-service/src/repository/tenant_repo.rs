//! 租户配置仓储与进程内缓存
//!
//! 租户配置是只读数据（运营后台维护），每个租户加载一次后缓存在
//! 进程内，供账本操作和同步调度复用。

use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::debug;

use super::traits::TenantConfigRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::TenantConfig;

const TENANT_COLUMNS: &str = r#"
    tenant_id, name, max_discount_percent, discount_per_action, points_per_action,
    token_expiration_days, sync_interval_seconds, max_retries, active,
    created_at, updated_at
"#;

/// 租户配置仓储
pub struct TenantConfigRepository {
    pool: PgPool,
}

impl TenantConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按租户 ID 加载配置
    pub async fn get(&self, tenant_id: &str) -> Result<Option<TenantConfig>> {
        let tenant = sqlx::query_as::<_, TenantConfig>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenant_config WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    /// 列出所有激活租户（同步调度用）
    pub async fn list_active(&self) -> Result<Vec<TenantConfig>> {
        let tenants = sqlx::query_as::<_, TenantConfig>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenant_config WHERE active = TRUE ORDER BY tenant_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }
}

#[async_trait]
impl TenantConfigRepositoryTrait for TenantConfigRepository {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantConfig>> {
        self.get(tenant_id).await
    }

    async fn list_active(&self) -> Result<Vec<TenantConfig>> {
        self.list_active().await
    }
}

// ---------------------------------------------------------------------------
// TenantConfigStore — 读穿透缓存
// ---------------------------------------------------------------------------

/// 租户配置读穿透缓存
///
/// 首次访问某租户时从数据库加载并缓存；配置变更后由运营侧调用
/// invalidate 失效。缓存键是租户 ID，数量与已接入租户同量级，有界。
pub struct TenantConfigStore {
    repo: TenantConfigRepository,
    cache: DashMap<String, Arc<TenantConfig>>,
}

impl TenantConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repo: TenantConfigRepository::new(pool),
            cache: DashMap::new(),
        }
    }

    /// 获取租户配置，未找到时返回 TenantNotFound
    pub async fn get(&self, tenant_id: &str) -> Result<Arc<TenantConfig>> {
        if let Some(cached) = self.cache.get(tenant_id) {
            return Ok(cached.clone());
        }

        let tenant = self
            .repo
            .get(tenant_id)
            .await?
            .ok_or_else(|| LedgerError::TenantNotFound(tenant_id.to_string()))?;

        let tenant = Arc::new(tenant);
        self.cache.insert(tenant_id.to_string(), tenant.clone());
        debug!(tenant_id, "租户配置已缓存");

        Ok(tenant)
    }

    /// 获取激活状态的租户配置，停用租户返回 TenantInactive
    pub async fn get_active(&self, tenant_id: &str) -> Result<Arc<TenantConfig>> {
        let tenant = self.get(tenant_id).await?;
        if !tenant.active {
            return Err(LedgerError::TenantInactive(tenant_id.to_string()));
        }
        Ok(tenant)
    }

    /// 失效某租户的缓存（配置变更或租户停用时调用）
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(tenant_id);
    }

    /// 列出所有激活租户（绕过缓存，调度器低频调用）
    pub async fn list_active(&self) -> Result<Vec<TenantConfig>> {
        self.repo.list_active().await
    }
}
