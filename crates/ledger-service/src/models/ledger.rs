//! 积分流水模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 积分流水条目
///
/// 只追加，不物理删除。points_delta 非负（本系统只记录赚取，扣减类
/// 场景不在账本核心范围内）。idempotency_key 在租户内唯一，保证同一
/// 触发动作（如同一会员对同一内容的点赞）不会重复入账。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PointsLedgerEntry {
    pub id: i64,
    pub tenant_id: String,
    pub member_id: String,
    /// 本次入账积分，>= 0
    pub points_delta: i32,
    /// 入账原因（动作名或运营备注）
    pub reason: String,
    /// 幂等键，租户内唯一；None 表示调用方不要求幂等
    pub idempotency_key: Option<String>,
    /// 关联引用（贴纸 code 或互动记录 ID）
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_entry_serialization() {
        let entry = PointsLedgerEntry {
            id: 7,
            tenant_id: "tenant-a".to_string(),
            member_id: "m-001".to_string(),
            points_delta: 10,
            reason: "video_watched".to_string(),
            idempotency_key: Some("video:42:m-001".to_string()),
            external_ref: None,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: PointsLedgerEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.points_delta, 10);
        assert_eq!(parsed.idempotency_key.as_deref(), Some("video:42:m-001"));
    }
}
