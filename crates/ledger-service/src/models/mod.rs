//! 数据模型
//!
//! 与五张逻辑表对应的行结构和闭合枚举。枚举在此处统一定义，
//! 贴纸引擎与同步 worker 共用同一份类型，新增种类只改一处。

mod enums;
mod ledger;
mod member;
mod sync_record;
mod tenant;
mod token;

pub use enums::{SyncEntityType, SyncOperation, SyncState, TokenKind, TokenState};
pub use ledger::PointsLedgerEntry;
pub use member::Member;
pub use sync_record::{FailureDisposition, SyncRecord};
pub use tenant::TenantConfig;
pub use token::DiscountToken;
