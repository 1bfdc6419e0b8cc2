//! 领域事件与通知抽象
//!
//! 账本操作成功后（积分入账、贴纸发放、贴纸核销）会产生领域事件，
//! 通过 `NotificationSink` trait 交给通知子系统消费。对账本核心而言
//! 投递是 fire-and-forget 的：sink 失败只记录日志，绝不影响已提交的
//! 账本事务，也不向调用方传播。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventKind — 领域事件类型
// ---------------------------------------------------------------------------

/// 领域事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// 积分入账
    PointsAwarded,
    /// 贴纸发放
    TokenIssued,
    /// 贴纸核销
    TokenRedeemed,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PointsAwarded => "POINTS_AWARDED",
            Self::TokenIssued => "TOKEN_ISSUED",
            Self::TokenRedeemed => "TOKEN_REDEEMED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// DomainEvent — 事件信封
// ---------------------------------------------------------------------------

/// 领域事件信封
///
/// event_id 使用 UUID v7，时间有序便于下游按序消费；payload 以 JSON
/// 承载各事件类型的业务数据（贴纸 code、积分数等），避免为每种事件
/// 定义独立消息结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// 事件唯一标识（UUID v7）
    pub event_id: String,
    /// 租户 ID
    pub tenant_id: String,
    /// 会员 ID
    pub member_id: String,
    /// 事件类型
    pub kind: EventKind,
    /// 事件业务数据
    pub payload: serde_json::Value,
    /// 事件发生时间
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// 构建新事件，自动生成 UUID v7 并记录当前时间
    pub fn new(
        tenant_id: impl Into<String>,
        member_id: impl Into<String>,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            member_id: member_id.into(),
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// NotificationSink — 通知投递抽象
// ---------------------------------------------------------------------------

/// 通知投递接口
///
/// 具体投递通道（推送、短信、站内信）由通知子系统实现；
/// 账本核心只依赖这个 trait。
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// 投递一个领域事件
    async fn publish(&self, event: &DomainEvent) -> Result<(), crate::error::StickerError>;
}

/// 日志投递实现
///
/// 将事件以结构化日志输出，用于开发环境和没有接入通知系统的部署。
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), crate::error::StickerError> {
        info!(
            event_id = %event.event_id,
            tenant_id = %event.tenant_id,
            member_id = %event.member_id,
            kind = %event.kind,
            "领域事件"
        );
        Ok(())
    }
}

/// fire-and-forget 投递
///
/// 供服务层调用：sink 失败只记录 warn，不向调用方传播。
pub async fn emit(sink: &dyn NotificationSink, event: DomainEvent) {
    if let Err(e) = sink.publish(&event).await {
        warn!(
            event_id = %event.event_id,
            kind = %event.kind,
            error = %e,
            "领域事件投递失败，忽略"
        );
    }
}
