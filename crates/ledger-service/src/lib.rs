//! 贴纸账本服务
//!
//! 租户维度的折扣贴纸账本核心：积分流水（PointsService）、贴纸的发放 /
//! 校验 / 核销（TokenService）、全局唯一兑换码生成（CodeGenerator），
//! 以及同步记录的持久化（SyncRecordRepository，由 sync-worker 独占消费）。
//!
//! HTTP / RPC 接入层不在本 crate 内；所有操作以 (tenant_id, member_id)
//! 参数显式传入调用方身份，本层信任该上下文，不做鉴权。

pub mod error;
pub mod models;
pub mod repository;
pub mod service;

pub use error::{LedgerError, Result};
pub use models::{
    DiscountToken, FailureDisposition, Member, PointsLedgerEntry, SyncEntityType, SyncOperation,
    SyncRecord, SyncState, TenantConfig, TokenKind, TokenState,
};
pub use service::{CodeGenerator, PointsService, TokenService, ValidationResult};
