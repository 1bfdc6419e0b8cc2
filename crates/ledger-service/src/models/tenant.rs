//! 租户配置模型

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use super::enums::TokenKind;

/// 租户配置
///
/// 每请求不可变：按租户加载一次后缓存，所有账本操作显式接收该值，
/// 不存在进程级全局配置。discount_per_action / points_per_action 为
/// JSONB 映射（动作名 -> 数值），运营后台维护。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub name: String,
    /// 单个会员的累计折扣上限（百分比）
    pub max_discount_percent: i32,
    /// 贴纸种类 -> 默认折扣百分比
    pub discount_per_action: Json<HashMap<String, i32>>,
    /// 动作名 -> 积分值
    pub points_per_action: Json<HashMap<String, i32>>,
    /// 贴纸有效期（天）
    pub token_expiration_days: i32,
    /// 外部同步间隔（秒）
    pub sync_interval_seconds: i64,
    /// 同步失败最大重试次数
    pub max_retries: i32,
    /// 停用的租户不参与同步调度
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantConfig {
    /// 查询某动作的积分值
    pub fn points_for(&self, action: &str) -> Option<i32> {
        self.points_per_action.get(action).copied()
    }

    /// 查询某贴纸种类的默认折扣百分比
    pub fn discount_for(&self, kind: TokenKind) -> Option<i32> {
        self.discount_per_action.get(kind.config_key()).copied()
    }

    /// 以当前时间计算新贴纸的过期时间
    pub fn token_expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::days(i64::from(self.token_expiration_days))
    }
}
