//! 带退避的外部调用执行器
//!
//! 对一次外部调用（聊天 / 语音合成）做有上限的重试：可重试错误按
//! `base_delay × multiplier^(attempt-1)` 退避；终止错误或次数耗尽时返回 CallFailure。
//! 执行器本身无副作用，只是控制流装饰，聊天与语音共用同一实例。

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// 错误分类：可重试 / 终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// 重试配置（默认 3 次，1s 起步，倍数 2，即 1s、2s、4s）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次（从 1 开始）失败后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(self.multiplier.max(1).saturating_pow(exponent))
    }
}

/// 执行失败：终止错误，或可重试错误耗尽次数
#[derive(Error, Debug)]
pub enum CallFailure<E> {
    #[error("{service} call failed permanently after {attempts} attempt(s): {error}")]
    Terminal {
        service: &'static str,
        attempts: u32,
        error: E,
    },

    #[error("{service} call still failing after {attempts} attempt(s): {error}")]
    Exhausted {
        service: &'static str,
        attempts: u32,
        error: E,
    },
}

impl<E> CallFailure<E> {
    pub fn service(&self) -> &'static str {
        match self {
            CallFailure::Terminal { service, .. } | CallFailure::Exhausted { service, .. } => {
                service
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CallFailure::Terminal { attempts, .. } | CallFailure::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// 最后一次尝试的原始错误
    pub fn last_error(&self) -> &E {
        match self {
            CallFailure::Terminal { error, .. } | CallFailure::Exhausted { error, .. } => error,
        }
    }
}

/// 重试执行器
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 执行 `call`，失败时用 `classify` 决定是否退避重试
    ///
    /// 调用在任何 I/O 之前就返回的错误（如缺少凭据）同样经过分类。
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        service: &'static str,
        mut call: F,
        classify: C,
    ) -> Result<T, CallFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: fmt::Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(service, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if classify(&error) == ErrorClass::Terminal {
                        tracing::warn!(service, attempt, error = %error, "terminal failure, not retrying");
                        return Err(CallFailure::Terminal {
                            service,
                            attempts: attempt,
                            error,
                        });
                    }
                    if attempt >= max_attempts {
                        tracing::warn!(service, attempt, error = %error, "retries exhausted");
                        return Err(CallFailure::Exhausted {
                            service,
                            attempts: attempt,
                            error,
                        });
                    }

                    let delay = self.config.delay_for(attempt);
                    tracing::warn!(
                        service,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum FakeError {
        Flaky,
        Fatal,
    }

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn classify(e: &FakeError) -> ErrorClass {
        match e {
            FakeError::Flaky => ErrorClass::Retryable,
            FakeError::Fatal => ErrorClass::Terminal,
        }
    }

    /// 前 `failures` 次返回 Flaky，之后成功；记录每次调用的时刻
    async fn run_with_failures(failures: u32) -> (Result<u32, CallFailure<FakeError>>, Vec<Instant>) {
        let executor = RetryExecutor::default();
        let calls = Arc::new(AtomicU32::new(0));
        let times = Arc::new(Mutex::new(Vec::new()));

        let result = executor
            .execute(
                "test",
                || {
                    let calls = Arc::clone(&calls);
                    let times = Arc::clone(&times);
                    async move {
                        times.lock().unwrap().push(Instant::now());
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n <= failures {
                            Err(FakeError::Flaky)
                        } else {
                            Ok(n)
                        }
                    }
                },
                classify,
            )
            .await;

        let times = times.lock().unwrap().clone();
        (result, times)
    }

    #[test]
    fn test_delay_for_is_exponential() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retries_uses_min_attempts() {
        let (result, times) = run_with_failures(2).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let (result, times) = run_with_failures(10).await;
        let failure = result.unwrap_err();
        assert!(matches!(failure, CallFailure::Exhausted { attempts: 3, .. }));
        assert_eq!(failure.last_error(), &FakeError::Flaky);
        assert_eq!(times.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_makes_one_attempt() {
        let (result, times) = run_with_failures(0).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(times.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_makes_exactly_one_attempt() {
        let executor = RetryExecutor::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = executor
            .execute(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(FakeError::Fatal) }
                },
                classify,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CallFailure::Terminal { attempts: 1, .. })));
        assert_eq!(Instant::now() - started, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_attempts_still_calls_once() {
        let executor = RetryExecutor::new(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = executor
            .execute(
                "test",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(FakeError::Flaky) }
                },
                classify,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().service(), "test");
    }
}
