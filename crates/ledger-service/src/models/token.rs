//! 折扣贴纸模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{TokenKind, TokenState};

/// 折扣贴纸
///
/// code 全局唯一（跨租户），生成后不可变。状态机只有两条路径：
/// issued -> redeemed（核销成功）、issued -> expired（过期，校验时惰性
/// 触发），均通过条件更新完成，保证并发下不会回退或重复转移。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DiscountToken {
    pub id: i64,
    pub tenant_id: String,
    pub member_id: String,
    /// 全局唯一兑换码
    pub code: String,
    pub discount_percent: i32,
    pub kind: TokenKind,
    pub state: TokenState,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    /// 外部 CRM 记录 ID
    pub external_id: Option<String>,
}

impl DiscountToken {
    /// 按给定时间判断是否已过有效期
    ///
    /// 只看时间，不看 state：一张 issued 但时间已过的贴纸也返回 true，
    /// 调用方据此触发惰性过期转移。
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
