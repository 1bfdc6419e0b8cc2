//! 服务层
//!
//! 积分账本（PointsService）、贴纸引擎（TokenService）和兑换码
//! 生成器（CodeGenerator）。事务边界在这一层：跨仓储的写操作统一
//! begin/commit，仓储只提供数据访问。

mod codegen;
mod points_service;
mod token_service;

pub use codegen::{CODE_ALPHABET, CodeGenerator, MAX_CODE_ATTEMPTS};
pub use points_service::{BalanceAudit, PointsService};
pub use token_service::{TokenService, ValidationResult};
