use std::fmt::Display;
use std::future::Future;

use crate::runtime::retry::RetryPolicy;

/// The last error of a retried operation and how many attempts were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Runs `call` until it succeeds, fails with an error `is_transient` rejects,
/// or the policy runs out of attempts. `call` receives the 1-based attempt.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    is_transient: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, RetryFailure<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if is_transient(&error) && policy.allows_another(attempt) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    component = "retry",
                    event = "attempt_failed",
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryFailure {
                    attempts: attempt,
                    error,
                })
            }
        }
    }
}
