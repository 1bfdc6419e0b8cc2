//! 外部同步 worker
//!
//! 周期性（或按需）drain 各租户的待同步记录，映射为外部 CRM 的
//! 载荷并执行幂等的 create/update。重试有界：失败按指数退避重试，
//! 耗尽后进入死信状态等待人工介入。
//!
//! 正确性依赖存储层的条件更新（认领、状态转移），不依赖进程内锁，
//! 多实例水平扩展安全。

pub mod crm;
pub mod error;
pub mod mapper;
pub mod scheduler;
pub mod session;
pub mod worker;

pub use crm::{ConnectionStatus, ExternalCrmClient, HttpCrmClient};
pub use error::{Result, SyncError};
pub use scheduler::SyncScheduler;
pub use session::CrmSessionPool;
pub use worker::{OutboundSyncWorker, SyncRunReport};
