//! 仓储层
//!
//! 每个聚合一个仓储结构体，持有连接池；需要参与跨仓储事务的写操作
//! 以静态 `*_in_tx` 方法提供，由服务层统一 begin/commit。

mod ledger_repo;
mod member_repo;
mod sync_record_repo;
mod tenant_repo;
mod token_repo;
pub mod traits;

pub use ledger_repo::PointsLedgerRepository;
pub use member_repo::MemberRepository;
pub use sync_record_repo::SyncRecordRepository;
pub use tenant_repo::{TenantConfigRepository, TenantConfigStore};
pub use token_repo::TokenRepository;
pub use traits::{
    MemberRepositoryTrait, PointsLedgerRepositoryTrait, SyncRecordRepositoryTrait,
    TenantConfigRepositoryTrait, TokenRepositoryTrait,
};
