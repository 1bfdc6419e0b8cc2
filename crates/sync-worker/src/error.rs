//! 同步 worker 错误类型
//!
//! 区分可重试（外部系统瞬时故障、本地存储抖动）与不可重试
//! （实体丢失、载荷缺陷）两类：前者计入同步记录的 retry_count 并
//! 按退避调度，后者直接进入死信。

use thiserror::Error;

use sticker_ledger::LedgerError;

/// 同步 worker 错误类型
#[derive(Debug, Error)]
pub enum SyncError {
    // === 外部系统错误（可重试） ===
    #[error("外部 CRM 错误: {message}")]
    ExternalService { message: String },

    #[error("外部 CRM 请求超时")]
    ExternalServiceTimeout,

    // === 本地缺陷（不可重试） ===
    #[error("同步目标实体不存在: {entity_type} id={entity_id}")]
    EntityMissing {
        entity_type: String,
        entity_id: String,
    },

    #[error("外部 CRM 响应无法解析: {0}")]
    InvalidResponse(String),

    // === 基础设施错误 ===
    #[error("账本存储错误: {0}")]
    Ledger(#[from] LedgerError),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP 客户端构建失败: {0}")]
    ClientBuild(String),
}

/// 同步 worker Result 类型别名
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// 是否为可重试错误
    ///
    /// 可重试失败计入 retry_count 并按退避重新调度；
    /// 不可重试失败直接进入死信。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExternalService { .. } | Self::ExternalServiceTimeout => true,
            Self::Ledger(e) => e.is_retryable(),
            Self::EntityMissing { .. }
            | Self::InvalidResponse(_)
            | Self::Serialization(_)
            | Self::ClientBuild(_) => false,
        }
    }

    /// 获取错误码（日志与运维面板用）
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout => "EXTERNAL_SERVICE_TIMEOUT",
            Self::EntityMissing { .. } => "ENTITY_MISSING",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::Ledger(_) => "LEDGER_STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::ClientBuild(_) => "CLIENT_BUILD_ERROR",
        }
    }
}
