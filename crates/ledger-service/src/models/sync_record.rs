//! 同步记录模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sticker_shared::retry::RetryPolicy;
use uuid::Uuid;

use super::enums::{SyncEntityType, SyncOperation, SyncState};

/// 同步记录
///
/// 随账本变更（发放、核销、入账后的会员档案变化）在同一事务内创建，
/// 此后由同步子系统独占，直到进入 completed 或 dead 终态。
/// worker 的认领通过条件更新完成，天然支持多实例并发。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SyncRecord {
    /// UUID v7，时间有序
    pub id: Uuid,
    pub tenant_id: String,
    pub entity_type: SyncEntityType,
    /// 本地实体标识：会员为 member_id，贴纸为数据库 id 的字符串形式
    pub entity_id: String,
    /// 入队时的操作意图；实际 create/update 以实体当前 external_id 为准
    pub operation: SyncOperation,
    pub state: SyncState,
    /// 已失败次数
    pub retry_count: i32,
    /// 重试上限（入队时从租户配置快照）
    pub max_retries: i32,
    pub last_error: Option<String>,
    /// 完成时写回的外部 CRM 记录 ID
    pub external_id: Option<String>,
    /// retry 状态下重新可认领的时间点
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 失败处理决定
///
/// worker 对失败记录调用 [`SyncRecord::record_failure`] 后据此落库：
/// Retry 更新为 retry 状态并带上退避时间，Dead 进入死信等待人工介入。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry,
    Dead,
}

impl SyncRecord {
    /// 创建一条待同步记录
    pub fn new(
        tenant_id: impl Into<String>,
        entity_type: SyncEntityType,
        entity_id: impl Into<String>,
        operation: SyncOperation,
        max_retries: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            tenant_id: tenant_id.into(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            state: SyncState::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            external_id: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 是否还有重试机会
    pub fn should_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 记录一次失败并推进状态机
    ///
    /// retry_count 加一后：
    /// - 仍小于 max_retries -> retry，按策略计算 next_attempt_at；
    /// - 达到 max_retries -> dead，next_attempt_at 清空，不再自动重试。
    ///
    /// 恰好失败 max_retries 次即进入死信；成功于第 k 次尝试的记录
    /// 最终 retry_count == k-1。
    pub fn record_failure(
        &mut self,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureDisposition {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = now;

        if self.should_retry() {
            self.state = SyncState::Retry;
            self.next_attempt_at = Some(policy.next_attempt_at(now, self.retry_count as u32));
            FailureDisposition::Retry
        } else {
            self.state = SyncState::Dead;
            self.next_attempt_at = None;
            FailureDisposition::Dead
        }
    }

    /// 记录不可重试的失败，直接进入死信
    ///
    /// 用于本地缺陷（实体丢失、载荷无法构造）：重试不可能成功，
    /// 不消耗也不依赖 retry_count。
    pub fn fail_permanently(&mut self, error: &str, now: DateTime<Utc>) {
        self.state = SyncState::Dead;
        self.last_error = Some(error.to_string());
        self.next_attempt_at = None;
        self.updated_at = now;
    }

    /// 标记完成
    pub fn mark_completed(&mut self, external_id: impl Into<String>, now: DateTime<Utc>) {
        self.state = SyncState::Completed;
        self.external_id = Some(external_id.into());
        self.last_error = None;
        self.next_attempt_at = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(600),
        }
    }

    fn new_record(max_retries: i32) -> SyncRecord {
        SyncRecord::new(
            "tenant-a",
            SyncEntityType::Token,
            "42",
            SyncOperation::Create,
            max_retries,
        )
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = new_record(3);
        assert_eq!(record.state, SyncState::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.next_attempt_at.is_none());
        assert!(record.external_id.is_none());
    }

    #[test]
    fn test_record_failure_schedules_retry_with_backoff() {
        let mut record = new_record(3);
        let policy = test_policy(3);
        let now = Utc::now();

        let disposition = record.record_failure("连接超时", &policy, now);
        assert_eq!(disposition, FailureDisposition::Retry);
        assert_eq!(record.state, SyncState::Retry);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("连接超时"));
        // 第一次失败：base 2s * 2^1 = 4s 之后可重新认领
        assert_eq!(
            record.next_attempt_at.unwrap() - now,
            chrono::Duration::seconds(4)
        );
    }

    #[test]
    fn test_record_failure_exactly_max_retries_goes_dead() {
        let mut record = new_record(3);
        let policy = test_policy(3);
        let now = Utc::now();

        assert_eq!(
            record.record_failure("err-1", &policy, now),
            FailureDisposition::Retry
        );
        assert_eq!(
            record.record_failure("err-2", &policy, now),
            FailureDisposition::Retry
        );
        // 第 3 次失败 == max_retries，进入死信
        assert_eq!(
            record.record_failure("err-3", &policy, now),
            FailureDisposition::Dead
        );
        assert_eq!(record.state, SyncState::Dead);
        assert_eq!(record.retry_count, 3);
        assert!(record.next_attempt_at.is_none());
        assert_eq!(record.last_error.as_deref(), Some("err-3"));
    }

    #[test]
    fn test_mark_completed_clears_error() {
        let mut record = new_record(3);
        let policy = test_policy(3);
        let now = Utc::now();

        record.record_failure("瞬时故障", &policy, now);
        record.mark_completed("crm-889", now);

        assert_eq!(record.state, SyncState::Completed);
        assert_eq!(record.external_id.as_deref(), Some("crm-889"));
        assert!(record.last_error.is_none());
        assert!(record.next_attempt_at.is_none());
        // 成功于第 2 次尝试，retry_count 保持 1
        assert_eq!(record.retry_count, 1);
    }

    #[test]
    fn test_fail_permanently_skips_retry_budget() {
        let mut record = new_record(3);
        let now = Utc::now();

        record.fail_permanently("实体已不存在", now);

        assert_eq!(record.state, SyncState::Dead);
        assert_eq!(record.retry_count, 0);
        assert!(record.next_attempt_at.is_none());
    }

    #[test]
    fn test_backoff_grows_per_failure() {
        let mut record = new_record(5);
        let policy = test_policy(5);
        let now = Utc::now();

        record.record_failure("e", &policy, now);
        let first = record.next_attempt_at.unwrap() - now;
        record.record_failure("e", &policy, now);
        let second = record.next_attempt_at.unwrap() - now;

        assert!(second > first);
        assert_eq!(second, first * 2);
    }
}
