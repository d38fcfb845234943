//! Client for the upstream AI service.
//!
//! [`UpstreamClient`] owns a [`RetryPolicy`] and a [`Transport`]. It returns
//! either the upstream's answer or an [`UpstreamError`] describing the last
//! failure once the retry budget is spent. Production traffic goes through
//! [`HttpTransport`]; tests substitute scripted transports.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::Method;

use crate::metrics::{UPSTREAM_ATTEMPTS_TOTAL, UPSTREAM_LATENCY, UPSTREAM_RETRIES_TOTAL};

/// Header identifying the gateway itself to the upstream.
pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Longest upstream body kept as error details.
const MAX_ERROR_BODY_CHARS: usize = 2048;

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: &'static str,
    pub body: Option<serde_json::Value>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// An attempt that produced no response at all (connect error, timeout, reset).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportFailure {
    pub message: String,
}

impl TransportFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Final failure surfaced after retries are exhausted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    /// Last status seen, if any attempt got a response.
    pub status: Option<u16>,
    pub message: String,
    /// The upstream's own error body, JSON when it parses.
    pub body: Option<serde_json::Value>,
}

impl UpstreamError {
    fn from_last(outcome: Result<UpstreamResponse, TransportFailure>) -> Self {
        match outcome {
            Ok(resp) => Self {
                status: Some(resp.status),
                message: format!("upstream responded with status {}", resp.status),
                body: error_body(&resp.body),
            },
            Err(failure) => Self {
                status: None,
                message: failure.message,
                body: None,
            },
        }
    }

    fn from_last_failure(failure: TransportFailure) -> Self {
        Self::from_last(Err(failure))
    }
}

fn error_body(raw: &Bytes) -> Option<serde_json::Value> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(raw) {
        return Some(json);
    }
    let text: String = String::from_utf8_lossy(raw)
        .chars()
        .take(MAX_ERROR_BODY_CHARS)
        .collect();
    Some(serde_json::Value::String(text))
}

/// One round trip to the upstream. Implementations must be cheap to share.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a UpstreamRequest,
    ) -> BoxFuture<'a, Result<UpstreamResponse, TransportFailure>>;
}

/// When to retry and how long to wait in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// No response, or a 5xx. Anything below 500 is the upstream's final word.
    pub fn should_retry(&self, outcome: &Result<UpstreamResponse, TransportFailure>) -> bool {
        match outcome {
            Ok(resp) => resp.status >= 500,
            Err(_) => true,
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn backoff(&self, retry: u32) -> Duration {
        let delay = self.delay_for(retry);
        if self.jitter {
            delay + jitter(delay)
        } else {
            delay
        }
    }
}

/// Up to 20% extra on top of `delay`.
fn jitter(delay: Duration) -> Duration {
    let span = delay.as_millis() as u64 / 5;
    if span == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(simple_random() % (span + 1))
}

/// Timestamp-derived pseudo-random value; only used to spread retries.
fn simple_random() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0)
}

/// Upstream client: one transport, one retry policy, shared by every handler.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `request`, retrying per the policy.
    ///
    /// Returns the first non-retryable response verbatim, or the last failure
    /// once `max_retries` retries have been spent.
    pub async fn call(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let timer = UPSTREAM_LATENCY
            .with_label_values(&[request.path])
            .start_timer();
        let mut retry = 0u32;

        loop {
            let outcome = self.transport.send(request).await;
            let outcome_label = match &outcome {
                Ok(resp) if resp.status >= 500 => "server_error",
                Ok(_) => "response",
                Err(_) => "transport_error",
            };
            UPSTREAM_ATTEMPTS_TOTAL
                .with_label_values(&[request.path, outcome_label])
                .inc();

            if !self.policy.should_retry(&outcome) {
                timer.observe_duration();
                return outcome.map_err(UpstreamError::from_last_failure);
            }

            if retry >= self.policy.max_retries {
                timer.observe_duration();
                let err = UpstreamError::from_last(outcome);
                tracing::error!(
                    path = request.path,
                    status = ?err.status,
                    attempts = retry + 1,
                    error = %err,
                    "upstream call failed after retries"
                );
                return Err(err);
            }

            retry += 1;
            let delay = self.policy.backoff(retry);
            UPSTREAM_RETRIES_TOTAL.inc();
            tracing::warn!(
                path = request.path,
                retry,
                delay_ms = delay.as_millis() as u64,
                outcome = outcome_label,
                "retrying upstream call"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// reqwest-backed transport bound to one base URL.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpTransport {
    /// The client-level timeout bounds each attempt separately.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none()) // Prevent SSRF via redirects
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    fn describe(&self, e: &reqwest::Error) -> String {
        if e.is_timeout() {
            format!("timeout of {}ms exceeded", self.timeout.as_millis())
        } else if e.is_connect() {
            format!("upstream connection failed: {e}")
        } else {
            format!("upstream request failed: {e}")
        }
    }

    async fn round_trip(
        &self,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, TransportFailure> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(API_KEY_HEADER, &self.api_key);

        if let Some(ref id) = request.request_id {
            builder = builder.header("x-request-id", id);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportFailure::new(self.describe(&e)))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::new(self.describe(&e)))?;

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a UpstreamRequest,
    ) -> BoxFuture<'a, Result<UpstreamResponse, TransportFailure>> {
        Box::pin(self.round_trip(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Outcome = Result<UpstreamResponse, TransportFailure>;

    /// Replays a fixed list of outcomes and records when each attempt happened.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Outcome>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send<'a>(&'a self, _request: &'a UpstreamRequest) -> BoxFuture<'a, Outcome> {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::new("script exhausted")));
            Box::pin(async move { next })
        }
    }

    fn status(code: u16, body: &str) -> Outcome {
        Ok(UpstreamResponse {
            status: code,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(body.to_string()),
        })
    }

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            method: Method::POST,
            path: "/ai/categorize",
            body: Some(serde_json::json!({"text": "coffee"})),
            request_id: Some("req-1".to_string()),
        }
    }

    #[test]
    fn test_retry_predicate() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&status(500, "")));
        assert!(policy.should_retry(&status(503, "")));
        assert!(policy.should_retry(&Err(TransportFailure::new("reset"))));
        assert!(!policy.should_retry(&status(200, "")));
        assert!(!policy.should_retry(&status(404, "")));
        assert!(!policy.should_retry(&status(499, "")));
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy::new(10).without_jitter();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(20), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::new(2);
        for retry in 1..=2 {
            let base = policy.delay_for(retry);
            let d = policy.backoff(retry);
            assert!(d >= base && d <= base + base / 5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_retried_with_increasing_backoff() {
        let transport = ScriptedTransport::new(vec![
            status(503, r#"{"error":"busy"}"#),
            status(502, ""),
            status(200, r#"{"category":"food"}"#),
        ]);
        let client = UpstreamClient::new(transport.clone(), RetryPolicy::new(2));

        let resp = client.call(&request()).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(&resp.body[..], br#"{"category":"food"}"#);

        let times = transport.attempt_times();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_millis(200));
        assert!(second_gap >= Duration::from_millis(400));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_never_retried() {
        let transport = ScriptedTransport::new(vec![
            status(404, r#"{"error":"unknown model"}"#),
            status(200, "{}"),
        ]);
        let client = UpstreamClient::new(transport.clone(), RetryPolicy::new(2));

        let resp = client.call(&request()).await.unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(transport.attempt_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_server_errors_carry_last_status_and_body() {
        let transport = ScriptedTransport::new(vec![
            status(500, r#"{"error":"first"}"#),
            status(500, r#"{"error":"second"}"#),
            status(503, r#"{"error":"last"}"#),
        ]);
        let client = UpstreamClient::new(transport.clone(), RetryPolicy::new(2));

        let err = client.call(&request()).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(err.body, Some(serde_json::json!({"error": "last"})));
        assert!(err.message.contains("503"));
        assert_eq!(transport.attempt_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transport_failures_have_no_status() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportFailure::new("connection refused")),
            Err(TransportFailure::new("connection refused")),
            Err(TransportFailure::new("timeout of 5000ms exceeded")),
        ]);
        let client = UpstreamClient::new(transport.clone(), RetryPolicy::new(2));

        let err = client.call(&request()).await.unwrap_err();
        assert_eq!(err.status, None);
        assert_eq!(err.message, "timeout of 5000ms exceeded");
        assert!(err.body.is_none());
        assert_eq!(transport.attempt_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_then_success() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportFailure::new("reset")),
            status(201, r#"{"ok":true}"#),
        ]);
        let client = UpstreamClient::new(transport.clone(), RetryPolicy::new(2));

        let resp = client.call(&request()).await.unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(transport.attempt_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let transport = ScriptedTransport::new(vec![status(500, "oops"), status(200, "{}")]);
        let client = UpstreamClient::new(transport.clone(), RetryPolicy::new(0));

        let err = client.call(&request()).await.unwrap_err();
        assert_eq!(err.status, Some(500));
        assert_eq!(err.body, Some(serde_json::Value::String("oops".to_string())));
        assert_eq!(transport.attempt_times().len(), 1);
    }

    #[tokio::test]
    async fn test_http_transport_reports_connect_failure() {
        // Port 1 on loopback is not listening in any sane test environment.
        let transport =
            HttpTransport::new("http://127.0.0.1:1/", "key", Duration::from_millis(500)).unwrap();
        let err = transport.send(&request()).await.unwrap_err();
        assert!(!err.message.is_empty());
    }
}
