//! 外部 CRM 载荷映射
//!
//! 将本地实体的**当前状态**映射为外部系统的扁平 JSON。worker 在
//! 认领记录后重新读取实体，因此这里拿到的总是最新快照，而不是
//! 入队时的旧数据。

use serde_json::json;

use sticker_ledger::{DiscountToken, Member, SyncEntityType};

/// 外部系统中会员对应的资源类型
pub const CRM_MEMBER_TYPE: &str = "res.partner";
/// 外部系统中贴纸对应的资源类型
pub const CRM_TOKEN_TYPE: &str = "loyalty.card";

/// 同步实体类型对应的外部资源类型
pub fn crm_entity_type(entity_type: SyncEntityType) -> &'static str {
    match entity_type {
        SyncEntityType::Member => CRM_MEMBER_TYPE,
        SyncEntityType::Token => CRM_TOKEN_TYPE,
    }
}

/// 会员 -> CRM 载荷
///
/// ref 由租户 + 会员 ID 组成，在外部系统内可反查本地记录
pub fn member_payload(member: &Member) -> serde_json::Value {
    json!({
        "ref": format!("{}:{}", member.tenant_id, member.member_id),
        "tenant_id": member.tenant_id,
        "member_id": member.member_id,
        "loyalty_points": member.points_balance,
        "discount_percent": member.total_discount_percent,
    })
}

/// 贴纸 -> CRM 载荷
///
/// state 一并下发：核销 / 过期后的 update 会把终态同步过去
pub fn token_payload(token: &DiscountToken) -> serde_json::Value {
    json!({
        "ref": token.code,
        "tenant_id": token.tenant_id,
        "member_id": token.member_id,
        "code": token.code,
        "kind": token.kind,
        "state": token.state,
        "discount_percent": token.discount_percent,
        "issued_at": token.issued_at.to_rfc3339(),
        "expires_at": token.expires_at.to_rfc3339(),
        "redeemed_at": token.redeemed_at.map(|t| t.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sticker_ledger::{TokenKind, TokenState};

    #[test]
    fn test_crm_entity_type_mapping() {
        assert_eq!(crm_entity_type(SyncEntityType::Member), "res.partner");
        assert_eq!(crm_entity_type(SyncEntityType::Token), "loyalty.card");
    }

    #[test]
    fn test_member_payload_fields() {
        let member = Member {
            tenant_id: "tenant-a".to_string(),
            member_id: "m-001".to_string(),
            points_balance: 120,
            total_discount_percent: 15,
            external_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let payload = member_payload(&member);
        assert_eq!(payload["ref"], "tenant-a:m-001");
        assert_eq!(payload["loyalty_points"], 120);
        assert_eq!(payload["discount_percent"], 15);
    }

    #[test]
    fn test_token_payload_carries_state() {
        let now = Utc::now();
        let token = DiscountToken {
            id: 7,
            tenant_id: "tenant-a".to_string(),
            member_id: "m-001".to_string(),
            code: "AB7RK2M9Q".to_string(),
            discount_percent: 5,
            kind: TokenKind::Review,
            state: TokenState::Redeemed,
            issued_at: now,
            expires_at: now,
            redeemed_at: Some(now),
            external_id: None,
        };

        let payload = token_payload(&token);
        assert_eq!(payload["code"], "AB7RK2M9Q");
        // 核销后的同步下发终态
        assert_eq!(payload["state"], "REDEEMED");
        assert_eq!(payload["kind"], "REVIEW");
        assert!(payload["redeemed_at"].is_string());
    }

    #[test]
    fn test_token_payload_null_redeemed_at_when_issued() {
        let now = Utc::now();
        let token = DiscountToken {
            id: 8,
            tenant_id: "tenant-a".to_string(),
            member_id: "m-001".to_string(),
            code: "AB7VQ3T8W".to_string(),
            discount_percent: 3,
            kind: TokenKind::Video,
            state: TokenState::Issued,
            issued_at: now,
            expires_at: now,
            redeemed_at: None,
            external_id: None,
        };

        assert!(token_payload(&token)["redeemed_at"].is_null());
    }
}
