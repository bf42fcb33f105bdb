//! 重试策略值对象
//!
//! 构造时校验，之后不可变。两种形态：
//! - 只在配置的状态码上重试，其余 HTTP 错误立即停止
//! - 任何失败都重试，直到次数上限

use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{ConfigError, ProviderError};

/// 默认可重试状态码
pub const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// 哪些失败需要重试
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOn {
    /// HTTP 错误只在这些状态码上重试；无状态码的网络错误和空响应照常重试
    StatusCodes(BTreeSet<u16>),
    /// 任何失败都重试
    AnyFailure,
}

/// 重试策略
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawRetryPolicy")]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    retry_on: RetryOn,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
        retry_on: RetryOn,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "max_attempts 必须大于 0".to_string(),
            ));
        }
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "backoff_factor 必须是不小于 1 的有限数，实际为 {}",
                backoff_factor
            )));
        }
        if initial_delay > max_delay {
            return Err(ConfigError::InvalidRetryPolicy(format!(
                "initial_delay ({:?}) 不能大于 max_delay ({:?})",
                initial_delay, max_delay
            )));
        }
        if let RetryOn::StatusCodes(codes) = &retry_on {
            if let Some(bad) = codes.iter().find(|c| !(100..=599).contains(*c)) {
                return Err(ConfigError::InvalidRetryPolicy(format!(
                    "非法的 HTTP 状态码: {}",
                    bad
                )));
            }
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
            retry_on,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_on(&self) -> &RetryOn {
        &self.retry_on
    }

    /// 计算下一轮的退避时长（已截断到上限）
    pub fn next_delay(&self, current: Duration) -> Duration {
        let nanos = (current.as_nanos() as f64 * self.backoff_factor).round();
        if nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// 第 `n` 次失败之后（从 0 开始）需要休眠的时长
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        (0..retry_index).fold(self.initial_delay.min(self.max_delay), |delay, _| {
            self.next_delay(delay)
        })
    }

    /// 该错误是否值得再试一次
    pub fn should_retry(&self, err: &ProviderError) -> bool {
        match (&self.retry_on, err) {
            (RetryOn::AnyFailure, _) => true,
            (_, ProviderError::InvalidRequest { .. }) | (_, ProviderError::Exhausted { .. }) => {
                false
            }
            (RetryOn::StatusCodes(codes), ProviderError::Http { status, .. }) => {
                codes.contains(status)
            }
            (RetryOn::StatusCodes(_), ProviderError::Transport { .. })
            | (RetryOn::StatusCodes(_), ProviderError::NoContent { .. }) => true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            retry_on: RetryOn::StatusCodes(DEFAULT_RETRYABLE_STATUS.into_iter().collect()),
        }
    }
}

// ========== 配置文件格式 ==========

/// ```toml
/// [provider_retry]
/// max_attempts = 5
/// initial_delay_ms = 1000
/// backoff_factor = 2.0
/// max_delay_ms = 30000
/// retry_on = [429, 500, 503]   # 或者 retry_on = "any"
/// ```
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawRetryPolicy {
    max_attempts: u32,
    initial_delay_ms: u64,
    backoff_factor: f64,
    max_delay_ms: u64,
    retry_on: RawRetryOn,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRetryOn {
    Keyword(String),
    Codes(Vec<u16>),
}

impl Default for RawRetryPolicy {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            backoff_factor: policy.backoff_factor,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            retry_on: RawRetryOn::Codes(DEFAULT_RETRYABLE_STATUS.to_vec()),
        }
    }
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = ConfigError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        let retry_on = match raw.retry_on {
            RawRetryOn::Keyword(word) if word.eq_ignore_ascii_case("any") => RetryOn::AnyFailure,
            RawRetryOn::Keyword(word) => {
                return Err(ConfigError::InvalidRetryPolicy(format!(
                    "retry_on 只接受状态码列表或 \"any\"，实际为 \"{}\"",
                    word
                )))
            }
            RawRetryOn::Codes(codes) => RetryOn::StatusCodes(codes.into_iter().collect()),
        };

        RetryPolicy::new(
            raw.max_attempts,
            Duration::from_millis(raw.initial_delay_ms),
            raw.backoff_factor,
            Duration::from_millis(raw.max_delay_ms),
            retry_on,
        )
    }
}
