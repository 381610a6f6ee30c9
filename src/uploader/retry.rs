// 分片重试策略
//
// 每个分片最多尝试 max_attempts 次，两次尝试之间的等待时间随失败次数递增：
// - Linear:      base × n          (1s, 2s, 3s, ...)
// - Exponential: base × 2^(n-1)    (1s, 2s, 4s, ...)
// 两种策略都受 max_delay 限制

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认最大尝试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 默认基础退避延迟（毫秒）
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// 默认最大退避延迟（毫秒）
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 30_000;

/// 退避方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Linear,
    Exponential,
}

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 基础延迟
    pub base_delay: Duration,
    /// 退避方式
    pub backoff: Backoff,
    /// 延迟上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            backoff: Backoff::Linear,
            max_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// 第 `failures` 次失败之后、下一次尝试之前的等待时间
    ///
    /// `failures` 从 1 开始计数
    pub fn delay_after(&self, failures: u32) -> Duration {
        let failures = failures.max(1);
        let delay = match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(failures),
            Backoff::Exponential => {
                let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    /// 最大尝试次数（至少 1 次）
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3));
    }

    #[test]
    fn test_exponential_delays_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            max_delay: Duration::from_millis(5000),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.delay_after(10), Duration::from_millis(5000));
        assert_eq!(policy.delay_after(64), Duration::from_millis(5000));
    }

    #[test]
    fn test_attempts_at_least_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }
}
