//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient；RetryingLlmClient 为任意客户端加上指数退避重试。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// LLM 调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// 网络、超时、限流可重试；API 拒绝不重试
    pub fn is_transient(&self) -> bool {
        !matches!(self, LlmError::Api(_))
    }

    /// 按错误文本归类（后端错误类型不统一时使用）
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            LlmError::RateLimited {
                retry_after_ms: None,
            }
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else if lower.contains("connect") || lower.contains("dns") || lower.contains("reqwest") {
            LlmError::Network(message)
        } else {
            LlmError::Api(message)
        }
    }
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `model_hint` 为 Some 时覆盖默认模型
    async fn complete(&self, messages: &[Message], model_hint: Option<&str>) -> Result<String, LlmError>;

    /// 累计 token 使用：(prompt, completion, total)；默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 重试配置
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试（从 0 开始）前的等待时间：base * 2^attempt，上限 max
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        if let LlmError::RateLimited {
            retry_after_ms: Some(ms),
        } = error
        {
            return Duration::from_millis((*ms).min(self.max_delay_ms));
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

/// 带重试的客户端包装
pub struct RetryingLlmClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    async fn complete(&self, messages: &[Message], model_hint: Option<&str>) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(messages, model_hint).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.delay_for(attempt, &e);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: LlmError,
    }

    #[async_trait]
    impl LlmClient for Flaky {
        async fn complete(&self, _messages: &[Message], _hint: Option<&str>) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok("ok".into())
            }
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let client = RetryingLlmClient::new(
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
                error: LlmError::Timeout,
            },
            fast(),
        );
        assert_eq!(client.complete(&[], None).await.unwrap(), "ok");
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let client = RetryingLlmClient::new(
            Flaky {
                failures: 10,
                calls: AtomicU32::new(0),
                error: LlmError::Network("down".into()),
            },
            fast(),
        );
        assert!(client.complete(&[], None).await.is_err());
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_api_errors_not_retried() {
        let client = RetryingLlmClient::new(
            Flaky {
                failures: 10,
                calls: AtomicU32::new(0),
                error: LlmError::Api("bad request".into()),
            },
            fast(),
        );
        assert!(client.complete(&[], None).await.is_err());
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0, &LlmError::Timeout), Duration::from_millis(500));
        assert_eq!(config.delay_for(2, &LlmError::Timeout), Duration::from_millis(2000));
        assert_eq!(config.delay_for(10, &LlmError::Timeout), Duration::from_millis(8000));
        let limited = LlmError::RateLimited {
            retry_after_ms: Some(1200),
        };
        assert_eq!(config.delay_for(0, &limited), Duration::from_millis(1200));
    }

    #[test]
    fn test_classify() {
        assert!(matches!(LlmError::classify("HTTP 429 Too Many"), LlmError::RateLimited { .. }));
        assert_eq!(LlmError::classify("operation timed out"), LlmError::Timeout);
        assert!(matches!(LlmError::classify("invalid model"), LlmError::Api(_)));
    }
}
