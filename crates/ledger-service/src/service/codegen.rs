//! 兑换码生成器
//!
//! 生成 9 位候选码：2 位租户标签 + 1 位种类标签 + 6 位密码学随机后缀，
//! 字母表剔除了易混淆字符（0/O、1/I/L）。唯一性不在这里保证——
//! 生成器只产出候选，贴纸引擎用 ON CONFLICT (code) DO NOTHING 原子
//! 插入，冲突则换候选重试，连续冲突耗尽后退化到时间戳后缀码。
//! 进程内不保留任何已用码集合，多实例部署下依然正确。

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::models::TokenKind;

/// 兑换码安全字母表（31 字符，无 0/O/1/I/L）
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// 随机后缀长度
const SUFFIX_LEN: usize = 6;

/// 候选码连续冲突的重试上限，超过后使用时间戳后缀
pub const MAX_CODE_ATTEMPTS: u32 = 5;

/// 兑换码生成器
#[derive(Debug, Clone, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 生成一个候选兑换码（9 字符）
    ///
    /// 同一租户 + 种类的前缀固定，便于人工辨认归属；后缀来自
    /// 线程级 CSPRNG
    pub fn candidate(&self, tenant_id: &str, kind: TokenKind) -> String {
        let mut code = String::with_capacity(3 + SUFFIX_LEN);
        code.push_str(&tenant_tag(tenant_id));
        code.push(kind.code_tag());

        let mut rng = rand::rng();
        for _ in 0..SUFFIX_LEN {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            code.push(CODE_ALPHABET[idx] as char);
        }

        code
    }

    /// 时间戳后缀兜底码（≤ 11 字符）
    ///
    /// 随机候选连续冲突耗尽时使用。秒级时间戳以 31 进制编码，
    /// 同一租户同一秒内至多发一张兜底码，实际冲突概率可忽略
    pub fn fallback(&self, tenant_id: &str, kind: TokenKind, now: DateTime<Utc>) -> String {
        let mut code = String::with_capacity(11);
        code.push_str(&tenant_tag(tenant_id));
        code.push(kind.code_tag());
        code.push_str(&encode_base31(now.timestamp().max(0) as u64));
        code
    }
}

/// 从租户 ID 派生 2 位标签
///
/// FNV-1a 哈希后映射进安全字母表，同一租户的标签稳定不变
fn tenant_tag(tenant_id: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in tenant_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }

    let n = CODE_ALPHABET.len() as u64;
    let first = CODE_ALPHABET[(hash % n) as usize] as char;
    let second = CODE_ALPHABET[((hash / n) % n) as usize] as char;
    let mut tag = String::with_capacity(2);
    tag.push(first);
    tag.push(second);
    tag
}

/// 以安全字母表做 31 进制编码
fn encode_base31(mut value: u64) -> String {
    if value == 0 {
        return (CODE_ALPHABET[0] as char).to_string();
    }

    let n = CODE_ALPHABET.len() as u64;
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(CODE_ALPHABET[(value % n) as usize] as char);
        value /= n;
    }
    digits.iter().rev().collect()
}
