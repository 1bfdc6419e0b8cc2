//! 账本服务错误类型
//!
//! 定义服务层的业务错误和系统错误。所有业务错误是确定性的、同步返回给
//! 调用方的，绝不自动重试；只有基础设施类错误可重试。

use thiserror::Error;

/// 账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 租户/会员相关错误 ===
    #[error("租户不存在: {0}")]
    TenantNotFound(String),

    #[error("租户已停用: {0}")]
    TenantInactive(String),

    #[error("会员不存在: tenant_id={tenant_id}, member_id={member_id}")]
    MemberNotFound {
        tenant_id: String,
        member_id: String,
    },

    // === 贴纸相关错误 ===
    #[error("兑换码不存在: {0}")]
    TokenNotFound(String),

    #[error("折扣超出租户上限: 申请 {requested}%, 当前 {current}%, 上限 {max}%")]
    CapExceeded {
        requested: i32,
        current: i32,
        max: i32,
    },

    #[error("兑换码已被使用: {0}")]
    TokenAlreadyRedeemed(String),

    #[error("兑换码已过期: {0}")]
    TokenExpired(String),

    #[error("兑换码不属于该会员: code={code}")]
    TokenOwnerMismatch { code: String },

    #[error("兑换码生成冲突次数过多: tenant_id={0}")]
    CodeExhausted(String),

    // === 积分相关错误 ===
    #[error("积分不能为负: {0}")]
    NegativePoints(i32),

    #[error("折扣百分比必须为正: {0}")]
    InvalidPercent(i32),

    #[error("未配置的动作: tenant_id={tenant_id}, action={action}")]
    UnknownAction { tenant_id: String, action: String },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 检查是否为可重试的错误
    ///
    /// 业务错误（上限超出、重复核销等）重试没有意义，只有数据库类
    /// 瞬时故障值得调用方重试。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_)
        )
    }

    /// 获取错误码（用于上层 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::TenantInactive(_) => "TENANT_INACTIVE",
            Self::MemberNotFound { .. } => "MEMBER_NOT_FOUND",
            Self::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            Self::CapExceeded { .. } => "CAP_EXCEEDED",
            Self::TokenAlreadyRedeemed(_) => "TOKEN_ALREADY_REDEEMED",
            Self::TokenExpired(_) => "TOKEN_EXPIRED",
            Self::TokenOwnerMismatch { .. } => "TOKEN_OWNER_MISMATCH",
            Self::CodeExhausted(_) => "CODE_EXHAUSTED",
            Self::NegativePoints(_) => "NEGATIVE_POINTS",
            Self::InvalidPercent(_) => "INVALID_PERCENT",
            Self::UnknownAction { .. } => "UNKNOWN_ACTION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
