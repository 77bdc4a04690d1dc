//! Rate-limit handling for embedding requests.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::LlmError;

/// How often, and how patiently, a rate-limited embedding request is resent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Wait before the first resend; doubles on each further attempt.
    pub base_delay: Duration,
    /// Upper bound for any single wait, `Retry-After` included.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Wait before resend number `attempt + 1`. A server-supplied `Retry-After`
    /// wins over the computed backoff.
    #[must_use]
    pub fn delay(&self, retry_after: Option<Duration>, attempt: u32) -> Duration {
        retry_after
            .unwrap_or_else(|| self.base_delay.saturating_mul(1 << attempt.min(16)))
            .min(self.max_delay)
    }
}

/// `Retry-After` in whole seconds. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Send a request built by `send`, resending on 429 as `policy` allows.
///
/// Other statuses are handed back for the caller to interpret.
///
/// # Errors
///
/// Returns `LlmError::RateLimited` once every attempt was rate limited, or
/// `LlmError::Http` for transport failures.
pub(crate) async fn send_with_retry<F, Fut>(
    provider: &str,
    policy: RetryPolicy,
    mut send: F,
) -> Result<reqwest::Response, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = send().await.map_err(LlmError::Http)?;
        if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        if attempt >= policy.max_retries {
            tracing::error!(provider, attempts = attempt + 1, "embedding rate limit persisted");
            return Err(LlmError::RateLimited);
        }
        let delay = policy.delay(retry_after(response.headers()), attempt);
        tracing::warn!(
            provider,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt = attempt + 1,
            max_retries = policy.max_retries,
            "embedding request rate limited"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    /// Local HTTP server answering the n-th connection with the n-th canned response.
    pub(crate) struct MockServer {
        received: Arc<Mutex<Vec<String>>>,
        _handle: tokio::task::JoinHandle<()>,
    }

    impl MockServer {
        /// Raw request heads received so far, in arrival order.
        pub(crate) async fn requests(&self) -> Vec<String> {
            self.received.lock().await.clone()
        }
    }

    pub(crate) async fn spawn_mock_server(responses: Vec<&'static str>) -> (u16, MockServer) {
        use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);

        let handle = tokio::spawn(async move {
            for resp in responses {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let (reader, mut writer) = stream.split();
                let mut reader = BufReader::new(reader);
                let mut head = String::new();
                let mut content_length = 0usize;
                let mut line = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 || line.trim().is_empty()
                    {
                        break;
                    }
                    if let Some(v) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap_or(0);
                    }
                    head.push_str(&line);
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).await.ok();
                log.lock().await.push(head);
                writer.write_all(resp.as_bytes()).await.ok();
            }
        });

        (
            port,
            MockServer {
                received,
                _handle: handle,
            },
        )
    }

    const RATE_LIMITED: &str =
        "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0\r\nContent-Length: 0\r\n\r\n";
    const EMBEDDED: &str = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}";

    fn impatient() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_millis(5),
        }
    }

    async fn post_embeddings(port: u16, policy: RetryPolicy) -> Result<reqwest::Response, LlmError> {
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/v1/embeddings");
        send_with_retry("test", policy, || client.post(&url).body("{}").send()).await
    }

    #[test]
    fn delay_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(None, 0), Duration::from_secs(1));
        assert_eq!(policy.delay(None, 1), Duration::from_secs(2));
        assert_eq!(policy.delay(None, 3), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped_even_for_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(None, 30), Duration::from_secs(60));
        assert_eq!(
            policy.delay(Some(Duration::from_secs(3600)), 0),
            Duration::from_secs(60)
        );
        assert_eq!(policy.delay(Some(Duration::ZERO), 5), Duration::ZERO);
    }

    #[test]
    fn retry_after_accepts_only_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
    }

    #[tokio::test]
    async fn first_success_sends_once() {
        let (port, server) = spawn_mock_server(vec![EMBEDDED]).await;
        let response = post_embeddings(port, impatient()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(server.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn resends_after_rate_limit() {
        let (port, server) = spawn_mock_server(vec![RATE_LIMITED, RATE_LIMITED, EMBEDDED]).await;
        let response = post_embeddings(port, impatient()).await.unwrap();
        assert_eq!(response.status(), 200);
        let requests = server.requests().await;
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|r| r.starts_with("POST /v1/embeddings")));
    }

    #[tokio::test]
    async fn persistent_rate_limit_is_an_error() {
        let (port, server) = spawn_mock_server(vec![RATE_LIMITED; 3]).await;
        let result = post_embeddings(port, impatient()).await;
        assert!(matches!(result, Err(LlmError::RateLimited)), "{result:?}");
        assert_eq!(server.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_resent() {
        let unavailable = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n";
        let (port, server) = spawn_mock_server(vec![unavailable, EMBEDDED]).await;
        let response = post_embeddings(port, impatient()).await.unwrap();
        assert_eq!(response.status(), 503);
        assert_eq!(server.requests().await.len(), 1);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn delay_never_exceeds_cap(attempt in 0u32..64, after in proptest::option::of(0u64..10_000)) {
            let policy = RetryPolicy::default();
            let delay = policy.delay(after.map(Duration::from_secs), attempt);
            prop_assert!(delay <= policy.max_delay);
        }
    }
}
