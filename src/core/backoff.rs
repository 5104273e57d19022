//! 重试退避策略
//!
//! 纯函数：按错误文本判定可重试性，指数增长延迟 + 可选抖动；
//! retry_async 封装通用重试循环，总尝试次数恒为 max_retries + 1。

use std::future::Future;
use std::time::Duration;

/// 退避配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// 延迟乘以 [0.5, 1.5) 的均匀随机因子，避免重试风暴同步
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

/// 可重试错误的文本标记：限流/配额、过载/不可用、超时、连接类
///
/// 线上错误没有结构化分类，message 文本是唯一信号
const RETRYABLE_MARKERS: &[&str] = &[
    "429",
    "resource_exhausted",
    "rate limit",
    "quota",
    "too many requests",
    "503",
    "service unavailable",
    "overloaded",
    "timeout",
    "timed out",
    "connection",
    "network",
];

/// 错误是否值得重试；其余错误必须立即向上传播
pub fn is_retryable_error(error_text: &str) -> bool {
    let lower = error_text.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}

/// 第 attempt 次失败（0 起）后的等待时长：min(initial * base^attempt, max)，可选抖动
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let mut delay = (config.initial_delay.as_secs_f64()
        * config.exponential_base.powi(attempt as i32))
    .min(config.max_delay.as_secs_f64());

    if config.jitter {
        delay *= 0.5 + rand::random::<f64>();
    }

    Duration::from_secs_f64(delay)
}

/// 带退避的异步重试
///
/// - 不可重试错误立即返回，不等待
/// - 重试耗尽后返回最后一次错误
pub async fn retry_async<T, E, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !is_retryable_error(&e.to_string()) {
                    return Err(e);
                }

                if attempt < config.max_retries {
                    let delay = backoff_delay(attempt, config);
                    tracing::warn!(
                        op = op_name,
                        attempt = attempt + 1,
                        max_retries = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    tracing::warn!(op = op_name, max_retries = config.max_retries, "Max retries exceeded");
                }

                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}
