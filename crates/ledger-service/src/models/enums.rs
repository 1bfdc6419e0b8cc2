//! 账本枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化。
//! 贴纸种类与同步状态机在这里闭合定义，编译器保证穷尽处理。

use serde::{Deserialize, Serialize};

/// 贴纸（折扣码）种类
///
/// 对应会员获得折扣的触发动作，决定兑换码前缀和通知文案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    /// 注册礼 - 新会员注册发放
    Signup,
    /// 社交绑定 - 关联社交账号发放
    Social,
    /// 评价奖励 - 留下商品/服务评价发放
    Review,
    /// 视频奖励 - 观看完指定视频发放
    Video,
    /// 特殊活动 - 运营手动或活动规则发放
    Special,
}

impl TokenKind {
    /// 兑换码中的种类标识字符（取自安全字母表，避免易混淆字符）
    pub fn code_tag(&self) -> char {
        match self {
            Self::Signup => 'N',
            Self::Social => 'S',
            Self::Review => 'R',
            Self::Video => 'V',
            Self::Special => 'X',
        }
    }

    /// 租户配置 JSONB 中该种类对应的键名
    pub fn config_key(&self) -> &'static str {
        match self {
            Self::Signup => "SIGNUP",
            Self::Social => "SOCIAL",
            Self::Review => "REVIEW",
            Self::Video => "VIDEO",
            Self::Special => "SPECIAL",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_key())
    }
}

/// 贴纸状态
///
/// 状态只能沿 issued -> redeemed 或 issued -> expired 前进，
/// 两个终态互斥且不可回退
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum TokenState {
    /// 已发放 - 可校验、可核销
    #[default]
    Issued,
    /// 已核销 - 终态，折扣已被使用
    Redeemed,
    /// 已过期 - 终态，校验时惰性触发
    Expired,
}

impl TokenState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Issued)
    }
}

/// 同步记录状态
///
/// pending/retry 可被 worker 认领进入 syncing；completed 和 dead 为终态。
/// failed 仅作为过渡语义保留在状态集中：失败后要么进入 retry（还有重试
/// 机会）要么进入 dead（重试耗尽），不会停留在 failed。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum SyncState {
    /// 待同步 - 随账本变更创建
    #[default]
    Pending,
    /// 同步中 - 已被某个 worker 实例认领
    Syncing,
    /// 已完成 - 终态，external_id 已写回
    Completed,
    /// 失败 - 过渡状态
    Failed,
    /// 等待重试 - next_attempt_at 到达后重新可认领
    Retry,
    /// 死信 - 终态，重试耗尽，需人工介入
    Dead,
}

impl SyncState {
    /// 是否为终态（不再被 worker 处理）
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    /// 是否可被 worker 认领
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retry)
    }
}

/// 同步实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEntityType {
    /// 会员档案
    Member,
    /// 折扣贴纸
    Token,
}

/// 同步操作类型
///
/// 实际执行时以实体当前是否携带 external_id 为准：已有外部 ID 的实体
/// 总是走幂等 update，这里记录的是入队时的意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncOperation {
    Create,
    Update,
}
