//! Retry wrapper around a single HTTP round trip.
//!
//! Transient failures (transport errors and 5xx) are retried with linearly
//! increasing backoff. A 429 is surfaced immediately as
//! [`HttpError::RateLimitExceeded`] so callers can stop dispatching instead of
//! hammering a throttled upstream.

use std::sync::Arc;
use std::time::Duration;

use log::debug;

use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::cancellation::CancellationSignal;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_STEP: Duration = Duration::from_millis(500);
const STATUS_TOO_MANY_REQUESTS: u16 = 429;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream rate limit exceeded")]
    RateLimitExceeded,
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request cancelled")]
    Cancelled,
}

/// Retry bound and backoff step; attempt `n` waits `n * backoff_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

/// Shared, thread-safe client used by every network source.
#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Executes `request`, returning only 2xx responses as `Ok`.
    pub fn execute(
        &self,
        request: &HttpRequest,
        cancel: &CancellationSignal,
    ) -> Result<HttpResponse, HttpError> {
        let mut attempt = 0u32;
        loop {
            let failure = match self.transport.get(request) {
                Ok(response) if response.status == STATUS_TOO_MANY_REQUESTS => {
                    return Err(HttpError::RateLimitExceeded);
                }
                Ok(response) if (200..300).contains(&response.status) => return Ok(response),
                Ok(response) if response.status >= 500 => HttpError::Status {
                    url: request.endpoint().to_string(),
                    status: response.status,
                },
                Ok(response) => {
                    return Err(HttpError::Status {
                        url: request.endpoint().to_string(),
                        status: response.status,
                    });
                }
                Err(error) => HttpError::Transport(error),
            };

            if attempt >= self.policy.max_retries {
                return Err(failure);
            }
            attempt += 1;
            let backoff = self.policy.backoff_for(attempt);
            debug!(
                "HTTP {}: transient failure ({}), retry {}/{} in {:?}",
                request.endpoint(), failure, attempt, self.policy.max_retries, backoff
            );
            if cancel.wait_timeout(backoff) {
                return Err(HttpError::Cancelled);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{HttpError, RetryPolicy, RetryingClient};
    use crate::cancellation::CancellationSignal;
    use crate::http::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    /// Replays scripted results in order and records every requested URL.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        pub(crate) urls: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                urls: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls
                .lock()
                .expect("urls lock")
                .push(request.url.clone());
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".into())))
        }
    }

    pub(crate) fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            body: body.to_string(),
        })
    }

    pub(crate) fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::from_millis(1),
        }
    }

    fn client(transport: &Arc<ScriptedTransport>, policy: RetryPolicy) -> RetryingClient {
        RetryingClient::new(transport.clone(), policy)
    }

    #[test]
    fn test_default_policy_matches_retry_bound_and_step() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_server_error_is_retried_until_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(503, ""),
            status(200, "ok"),
        ]));
        let response = client(&transport, fast_policy())
            .execute(&HttpRequest::get("http://t/a"), &CancellationSignal::new())
            .expect("second attempt succeeds");
        assert_eq!(response.body, "ok");
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(500, ""),
            status(502, ""),
            status(500, ""),
            status(200, "never reached"),
        ]));
        let result = client(&transport, fast_policy())
            .execute(&HttpRequest::get("http://t/a"), &CancellationSignal::new());
        assert!(matches!(
            result,
            Err(HttpError::Status { status: 500, .. })
        ));
        assert_eq!(transport.calls(), 3);
    }

    #[test]
    fn test_rate_limit_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(429, ""),
            status(200, "ok"),
        ]));
        let result = client(&transport, fast_policy())
            .execute(&HttpRequest::get("http://t/a"), &CancellationSignal::new());
        assert!(matches!(result, Err(HttpError::RateLimitExceeded)));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_transport_error_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connection("reset".into())),
            status(200, "ok"),
        ]));
        let response = client(&transport, fast_policy())
            .execute(&HttpRequest::get("http://t/a"), &CancellationSignal::new())
            .expect("retry succeeds");
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_client_error_fails_without_retry() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(404, ""),
            status(200, "ok"),
        ]));
        let result = client(&transport, fast_policy())
            .execute(&HttpRequest::get("http://t/a"), &CancellationSignal::new());
        assert!(matches!(
            result,
            Err(HttpError::Status { status: 404, .. })
        ));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(500, ""),
            status(500, ""),
            status(200, "ok"),
        ]));
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::from_millis(20),
        };
        let started = Instant::now();
        client(&transport, policy)
            .execute(&HttpRequest::get("http://t/a"), &CancellationSignal::new())
            .expect("third attempt succeeds");
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_backoff_observes_cancellation() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(500, ""),
            status(200, "ok"),
        ]));
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_step: Duration::from_secs(30),
        };
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let started = Instant::now();
        let result = client(&transport, policy).execute(&HttpRequest::get("http://t/a"), &cancel);
        assert!(matches!(result, Err(HttpError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.calls(), 1);
    }
}
