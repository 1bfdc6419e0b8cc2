//! 重试策略
//!
//! 为外部同步提供指数退避计算。与就地 sleep 重试不同，同步记录的重试
//! 通过 next_attempt_at 时间戳调度：失败后记录何时重新变为可认领，
//! worker 在后续轮次中按时间条件捞取，进程重启不会丢失退避状态。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;

/// 重试策略配置
///
/// 退避公式: backoff_base * 2^retry_count，结果不超过 backoff_max。
/// 首次失败（retry_count=1）等 base*2 秒，第二次等 base*4 秒，依此类推。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数，达到后记录进入 dead 状态，不再自动重试
    pub max_retries: u32,
    /// 退避基数
    pub backoff_base: Duration,
    /// 退避时间上限，防止等待过长
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    /// 从同步配置构造进程级默认策略
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.default_max_retries,
            backoff_base: Duration::from_secs(config.backoff_base_seconds),
            backoff_max: Duration::from_secs(config.backoff_max_seconds),
        }
    }

    /// 租户级覆盖最大重试次数
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 计算第 N 次失败后的退避时长（retry_count 从 1 开始）
    ///
    /// 使用 checked_shl 防止大 retry_count 时移位溢出，
    /// 溢出一律视为达到上限。
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let base_secs = self.backoff_base.as_secs();
        let delay_secs = 1u64
            .checked_shl(retry_count)
            .and_then(|factor| base_secs.checked_mul(factor))
            .unwrap_or(u64::MAX);
        Duration::from_secs(delay_secs.min(self.backoff_max.as_secs()))
    }

    /// 计算下一次可认领的时间点
    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(retry_count);
        now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(
            self.backoff_max.as_secs() as i64,
        ))
    }

    /// 失败 retry_count 次后是否还有重试机会
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}
