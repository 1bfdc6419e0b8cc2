//! 会员模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会员
///
/// 复合主键 (tenant_id, member_id)。points_balance 与
/// total_discount_percent 是派生缓存列：积分真实来源是流水表，
/// 折扣累计来源是贴纸发放记录，两者都可重新计算修复。
/// external_id 在首次同步到外部 CRM 成功后写入，此后同步走幂等 update。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub tenant_id: String,
    pub member_id: String,
    /// 积分余额缓存（真实来源：points_ledger_entry 求和）
    pub points_balance: i64,
    /// 累计折扣百分比，0 <= v <= 租户 max_discount_percent
    pub total_discount_percent: i32,
    /// 外部 CRM 记录 ID，首次同步成功后写入
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
