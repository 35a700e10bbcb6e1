//! Retry with exponential backoff around external-call wrappers.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Fixed backoff schedule. The default matches the OCR contract:
/// 250 ms, 1 s, 4 s, then give up.
#[derive(Debug, Clone)]
pub struct Backoff {
    delays: Vec<Duration>,
}

impl Backoff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// 3 retries at 250 ms, 1 s, 4 s.
    pub fn external_call() -> Self {
        Self::new(vec![
            Duration::from_millis(250),
            Duration::from_secs(1),
            Duration::from_secs(4),
        ])
    }

    /// No waiting, for tests.
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts])
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `op`, retrying on errors `is_transient` accepts. The final
    /// error is returned once the schedule is exhausted; non-transient
    /// errors return immediately.
    pub async fn retry<T, E, F, Fut>(
        &self,
        label: &str,
        is_transient: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt < self.delays.len() => {
                    let delay = self.delays[attempt];
                    attempt += 1;
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = Backoff::immediate(3)
            .retry("test", |_| true, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = Backoff::immediate(3)
            .retry("test", |_| false, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("fatal".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schedule_exhaustion_returns_last_error() {
        let result: Result<u32, String> = Backoff::immediate(2)
            .retry("test", |_| true, || async { Err("still down".to_string()) })
            .await;
        assert_eq!(result.unwrap_err(), "still down");
    }
}
