//! 租户 CRM 会话池
//!
//! 每个租户一个会话（客户端实例），首次使用时开启并做连通性检查，
//! 同一轮同步内复用；租户停用时显式关闭移除。键空间与已接入租户
//! 同量级，生命周期明确，不是无界缓存。
//!
//! 会话之间互不共享可变状态：并发的多租户同步各自持有自己的
//! Arc 句柄，跨租户并发安全。

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use sticker_shared::config::CrmConfig;

use crate::crm::{ConnectionStatus, ExternalCrmClient, HttpCrmClient};
use crate::error::{Result, SyncError};

/// 会话工厂：按租户构建客户端
type SessionFactory =
    Box<dyn Fn(&CrmConfig, &str) -> Result<Arc<dyn ExternalCrmClient>> + Send + Sync>;

/// 租户 CRM 会话池
pub struct CrmSessionPool {
    config: CrmConfig,
    sessions: DashMap<String, Arc<dyn ExternalCrmClient>>,
    factory: SessionFactory,
}

impl CrmSessionPool {
    /// 以缺省 HTTP 客户端工厂构建会话池
    pub fn new(config: CrmConfig) -> Self {
        Self::with_factory(
            config,
            Box::new(|config, tenant_id| {
                Ok(Arc::new(HttpCrmClient::new(config, tenant_id)?) as Arc<dyn ExternalCrmClient>)
            }),
        )
    }

    /// 注入自定义会话工厂（测试或接入非 HTTP 协议的 CRM）
    pub fn with_factory(config: CrmConfig, factory: SessionFactory) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            factory,
        }
    }

    /// 获取租户会话，首次使用时开启并做连通性检查
    ///
    /// 连通性检查失败视为可重试失败向上传播——本轮同步的记录保持
    /// 可认领状态，下一轮重试。
    pub async fn acquire(&self, tenant_id: &str) -> Result<Arc<dyn ExternalCrmClient>> {
        if let Some(session) = self.sessions.get(tenant_id) {
            return Ok(session.clone());
        }

        let session = (self.factory)(&self.config, tenant_id)?;

        let status = session.test_connection().await?;
        if !status.ok {
            return Err(SyncError::ExternalService {
                message: status
                    .message
                    .unwrap_or_else(|| "连通性检查失败".to_string()),
            });
        }

        info!(tenant_id, "CRM 会话已开启");
        self.sessions.insert(tenant_id.to_string(), session.clone());

        Ok(session)
    }

    /// 巡检所有已开启会话
    ///
    /// 返回每个租户的连通状态；检查失败的会话被移除，下次使用时
    /// 重新开启。
    pub async fn health_check_all(&self) -> Vec<(String, ConnectionStatus)> {
        let tenants: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut results = Vec::with_capacity(tenants.len());

        for tenant_id in tenants {
            let Some(session) = self.sessions.get(&tenant_id).map(|e| e.value().clone()) else {
                continue;
            };

            let status = match session.test_connection().await {
                Ok(status) => status,
                Err(e) => ConnectionStatus {
                    ok: false,
                    message: Some(e.to_string()),
                },
            };

            if !status.ok {
                warn!(tenant_id, status = ?status.message, "CRM 会话失活，移除待重建");
                self.sessions.remove(&tenant_id);
            }

            results.push((tenant_id, status));
        }

        results
    }

    /// 关闭并移除租户会话（租户停用时调用）
    pub fn deactivate(&self, tenant_id: &str) {
        if self.sessions.remove(tenant_id).is_some() {
            info!(tenant_id, "CRM 会话已关闭");
        }
    }

    /// 当前开启的会话数
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
