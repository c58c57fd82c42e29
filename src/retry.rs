use anyhow::Result;
use log::warn;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
        }
    }
}

// 带退避的重试：op 收到的是从1开始的尝试序号
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: fn(&anyhow::Error) -> bool,
    mut op: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts || !is_retryable(&e) {
                    return Err(e);
                }
                warn!("{}失败，尝试重试 {}/{}...: {:#}", label, attempt, max_attempts, e);
                sleep(policy.backoff).await;
            }
        }
    }
}

// 有界轮询，直到 probe 返回 Some
pub async fn poll_until<T, F, Fut>(attempts: u32, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for i in 1..=attempts {
        if let Some(value) = probe(i).await {
            return Some(value);
        }
        if i < attempts {
            sleep(interval).await;
        }
    }
    None
}
