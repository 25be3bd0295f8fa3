//! HTTP collaborators: the CDN and the payment catalog.
//!
//! Both are blocking `ureq` clients sharing one retry policy: transport
//! failures, 429 and 5xx responses are retried with exponential backoff;
//! every other failure is returned on the first attempt.

pub mod cdn;
pub mod payments;

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::RemoteError;

pub use cdn::HttpMediaStore;
pub use payments::HttpPaymentCatalog;

/// Attempt budget and backoff base for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each one after.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(200),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `call` until it succeeds, fails permanently, or the budget runs out.
    pub fn run<T>(
        &self,
        what: &str,
        mut call: impl FnMut() -> Result<T, RemoteError>,
    ) -> Result<T, RemoteError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        "{what} failed (attempt {attempt}/{}): {e}, retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::warn!("{what} failed after {attempt} attempts: {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}

pub(crate) fn agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// Map a `ureq` outcome onto [`RemoteError`]; 404 becomes `NotFound`.
pub(crate) fn check(
    url: &str,
    result: Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response, RemoteError> {
    match result {
        Ok(response) => Ok(response),
        Err(ureq::Error::Status(404, _)) => Err(RemoteError::NotFound(url.to_string())),
        Err(ureq::Error::Status(status, response)) => Err(RemoteError::Status {
            status,
            url: url.to_string(),
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(transport)) => Err(RemoteError::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        }),
    }
}

pub(crate) fn decode<T: DeserializeOwned>(
    url: &str,
    response: ureq::Response,
) -> Result<T, RemoteError> {
    response.into_json().map_err(|e| RemoteError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn bearer(key: &str) -> String {
    format!("Bearer {key}")
}

pub(crate) fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    fn unavailable() -> RemoteError {
        RemoteError::Status {
            status: 503,
            url: "https://cdn.test".into(),
            body: String::new(),
        }
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let calls = Cell::new(0);
        let value = instant(3)
            .run("upload", || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(unavailable())
                } else {
                    Ok(42)
                }
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant(2).run("upload", || {
            calls.set(calls.get() + 1);
            Err(unavailable())
        });
        assert!(matches!(result, Err(RemoteError::Status { status: 503, .. })));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = instant(5).run("delete", || {
            calls.set(calls.get() + 1);
            Err(RemoteError::NotFound("x".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
