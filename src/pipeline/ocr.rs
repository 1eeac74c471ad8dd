//! OCR request/response cycle for one page.
//!
//! ## Retry Strategy
//!
//! Only HTTP 429 is treated as transient. Each 429 is followed by a wait of
//! `initial_delay * multiplier^(n-1)`; with the defaults (5 s, ×2, 5 attempts)
//! the waits are 5 s → 10 s → 20 s → 40 s. Any other non-200 status and any
//! transport failure end the page immediately: retrying a 403 or a broken
//! connection only burns quota.
//!
//! Both the request and the backoff wait race against the run's
//! [`CancellationToken`], so Ctrl-C never waits out a 40 s backoff.
//!
//! ## Transport seam
//!
//! HTTP goes through the [`OcrTransport`] trait. [`HttpTransport`] is the
//! reqwest-backed implementation; tests script replies without a network.

use crate::config::{OcrConfig, RetryPolicy, TextFeature};
use crate::error::{OcrError, PageError};
use crate::output::{PageOutcome, PageResult};
use crate::pipeline::extract::extract_text;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest slice of an error body kept in a [`PageError::ServiceError`].
const ERROR_BODY_LIMIT: usize = 200;

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Sends one OCR request. `Err` means no HTTP response was received.
#[async_trait]
pub trait OcrTransport: Send + Sync {
    async fn send(&self, auth_header: &str, body: &Value) -> Result<HttpReply, String>;
}

/// reqwest-backed transport posting JSON to the batch-analyze endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, OcrError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OcrError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &OcrConfig) -> Result<Self, OcrError> {
        Self::new(config.endpoint.clone(), config.request_timeout)
    }
}

#[async_trait]
impl OcrTransport for HttpTransport {
    async fn send(&self, auth_header: &str, body: &Value) -> Result<HttpReply, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(HttpReply { status, body })
    }
}

/// Build the batch-analyze request body for one JPEG.
pub fn build_request(
    folder_id: &str,
    jpeg: &[u8],
    feature: TextFeature,
    language_codes: &[String],
) -> Value {
    json!({
        "folderId": folder_id,
        "analyze_specs": [{
            "content": STANDARD.encode(jpeg),
            "features": [{
                "type": feature.api_name(),
                "text_detection_config": { "language_codes": language_codes }
            }]
        }]
    })
}

/// Recognises pages with one set of credentials and one retry policy.
#[derive(Clone)]
pub struct OcrClient {
    transport: Arc<dyn OcrTransport>,
    auth_header: String,
    folder_id: String,
    feature: TextFeature,
    language_codes: Vec<String>,
    retry: RetryPolicy,
}

impl OcrClient {
    pub fn new(config: &OcrConfig, transport: Arc<dyn OcrTransport>) -> Result<Self, OcrError> {
        Ok(Self {
            transport,
            auth_header: config.credentials()?.header_value(),
            folder_id: config.folder_id()?.to_string(),
            feature: config.feature,
            language_codes: config.language_codes.clone(),
            retry: config.retry,
        })
    }

    /// Recognise one page. Never fails outright: errors land in the outcome.
    pub async fn recognize(
        &self,
        page_num: usize,
        jpeg: &[u8],
        cancel: &CancellationToken,
    ) -> PageResult {
        let start = Instant::now();
        let body = build_request(&self.folder_id, jpeg, self.feature, &self.language_codes);
        let (outcome, attempts) = self.send_with_retry(page_num, &body, cancel).await;
        PageResult {
            page_num,
            outcome,
            attempts,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn send_with_retry(
        &self,
        page: usize,
        body: &Value,
        cancel: &CancellationToken,
    ) -> (PageOutcome, u32) {
        let max = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return (PageOutcome::Failed(PageError::Cancelled { page }), attempts);
            }
            attempts += 1;

            let reply = tokio::select! {
                _ = cancel.cancelled() => {
                    return (PageOutcome::Failed(PageError::Cancelled { page }), attempts);
                }
                r = self.transport.send(&self.auth_header, body) => r,
            };

            let reply = match reply {
                Ok(r) => r,
                Err(detail) => {
                    warn!("Page {}: request failed: {}", page, detail);
                    return (
                        PageOutcome::Failed(PageError::Transport { page, detail }),
                        attempts,
                    );
                }
            };

            match reply.status {
                200 => {
                    debug!("Page {}: HTTP 200 after {} attempt(s)", page, attempts);
                    let outcome = extract_text(&reply.body, page).unwrap_or_else(|e| {
                        warn!("{}", e);
                        PageOutcome::Failed(e)
                    });
                    return (outcome, attempts);
                }
                429 if attempts < max => {
                    let delay = self.retry.delay_for(attempts);
                    warn!(
                        "Page {}: rate limited (429), retry {}/{} in {:?}",
                        page,
                        attempts,
                        max - 1,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return (PageOutcome::Failed(PageError::Cancelled { page }), attempts);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                429 => {
                    warn!("Page {}: still rate limited after {} attempts", page, attempts);
                    return (
                        PageOutcome::Failed(PageError::RateLimited { page, attempts }),
                        attempts,
                    );
                }
                status => {
                    let detail: String = reply.body.trim().chars().take(ERROR_BODY_LIMIT).collect();
                    warn!("Page {}: HTTP {}: {}", page, status, detail);
                    return (
                        PageOutcome::Failed(PageError::ServiceError {
                            page,
                            status,
                            detail,
                        }),
                        attempts,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::config::MAX_RETRY_DELAY;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const OK_BODY: &str = r#"{"results":[{"results":[{"textDetection":{"pages":[{"blocks":[{"lines":[{"words":[{"text":"INVOICE"},{"text":"2024"}]}]}]}]}}]}]}"#;

    /// Replays a fixed script of replies and records when each call happened.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpReply, String>>>,
        calls: Mutex<Vec<tokio::time::Instant>>,
        seen: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpReply, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<tokio::time::Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OcrTransport for ScriptedTransport {
        async fn send(&self, auth_header: &str, body: &Value) -> Result<HttpReply, String> {
            self.calls.lock().unwrap().push(tokio::time::Instant::now());
            self.seen
                .lock()
                .unwrap()
                .push((auth_header.to_string(), body.clone()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err("script exhausted".into()))
        }
    }

    fn reply(status: u16, body: &str) -> Result<HttpReply, String> {
        Ok(HttpReply {
            status,
            body: body.to_string(),
        })
    }

    fn client(transport: Arc<ScriptedTransport>) -> OcrClient {
        let config = OcrConfig::builder()
            .credentials(Credentials::ApiKey("AQVNkey".into()))
            .folder_id("b1gfolder")
            .build()
            .unwrap();
        OcrClient::new(&config, transport).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let body = build_request("b1g", b"\xff\xd8", TextFeature::Document, &["*".to_string()]);
        assert_eq!(body["folderId"], "b1g");
        let spec = &body["analyze_specs"][0];
        assert_eq!(spec["content"], "/9g=");
        assert_eq!(spec["features"][0]["type"], "DOCUMENT_TEXT_DETECTION");
        assert_eq!(
            spec["features"][0]["text_detection_config"]["language_codes"],
            json!(["*"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let t = ScriptedTransport::new(vec![reply(200, OK_BODY)]);
        let r = client(t.clone())
            .recognize(1, b"jpeg", &CancellationToken::new())
            .await;
        assert_eq!(r.outcome, PageOutcome::Text("INVOICE 2024".into()));
        assert_eq!(r.attempts, 1);
        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0].0, "Api-Key AQVNkey");
        assert_eq!(seen[0].1["folderId"], "b1gfolder");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success_backs_off() {
        let t = ScriptedTransport::new(vec![reply(429, ""), reply(429, ""), reply(200, OK_BODY)]);
        let r = client(t.clone())
            .recognize(2, b"jpeg", &CancellationToken::new())
            .await;
        assert_eq!(r.attempts, 3);
        assert_eq!(r.outcome, PageOutcome::Text("INVOICE 2024".into()));

        let calls = t.calls();
        assert!(calls[1] - calls[0] >= Duration::from_secs(5));
        assert!(calls[2] - calls[1] >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_gives_up_after_max_attempts() {
        let t = ScriptedTransport::new((0..5).map(|_| reply(429, "slow down")).collect());
        let r = client(t.clone())
            .recognize(3, b"jpeg", &CancellationToken::new())
            .await;
        assert_eq!(r.attempts, 5);
        assert_eq!(
            r.outcome,
            PageOutcome::Failed(PageError::RateLimited {
                page: 3,
                attempts: 5
            })
        );
        assert_eq!(r.outcome.display_text(), "[error 429]");

        let calls = t.calls();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 4);
        assert!(gaps.windows(2).all(|g| g[1] >= g[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn steep_backoff_is_capped() {
        let t = ScriptedTransport::new((0..3).map(|_| reply(429, "")).collect());
        let config = OcrConfig::builder()
            .credentials(Credentials::ApiKey("AQVNkey".into()))
            .folder_id("b1gfolder")
            .retry(RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_secs(5),
                multiplier: 1e300,
            })
            .build()
            .unwrap();
        let r = OcrClient::new(&config, t.clone())
            .unwrap()
            .recognize(1, b"jpeg", &CancellationToken::new())
            .await;
        assert_eq!(r.attempts, 3);
        let calls = t.calls();
        let gap = calls[2] - calls[1];
        assert!(gap >= MAX_RETRY_DELAY && gap < MAX_RETRY_DELAY + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn other_statuses_are_not_retried() {
        let t = ScriptedTransport::new(vec![reply(500, "boom"), reply(200, OK_BODY)]);
        let r = client(t.clone())
            .recognize(1, b"jpeg", &CancellationToken::new())
            .await;
        assert_eq!(r.attempts, 1);
        assert_eq!(t.calls().len(), 1);
        assert_eq!(r.outcome.display_text(), "[error 500]");
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_not_retried() {
        let t = ScriptedTransport::new(vec![Err("connection reset".into()), reply(200, OK_BODY)]);
        let r = client(t.clone())
            .recognize(1, b"jpeg", &CancellationToken::new())
            .await;
        assert_eq!(r.attempts, 1);
        assert!(matches!(
            r.outcome,
            PageOutcome::Failed(PageError::Transport { page: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_structure_is_no_text() {
        let t = ScriptedTransport::new(vec![reply(200, r#"{"results":[]}"#)]);
        let r = client(t).recognize(1, b"jpeg", &CancellationToken::new()).await;
        assert_eq!(r.outcome, PageOutcome::NoText);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_is_extraction_error() {
        let t = ScriptedTransport::new(vec![reply(200, "not json")]);
        let r = client(t).recognize(1, b"jpeg", &CancellationToken::new()).await;
        assert_eq!(r.outcome.display_text(), "[text extraction error]");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_sends_nothing() {
        let t = ScriptedTransport::new(vec![reply(200, OK_BODY)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let r = client(t.clone()).recognize(4, b"jpeg", &cancel).await;
        assert_eq!(r.attempts, 0);
        assert_eq!(r.outcome, PageOutcome::Failed(PageError::Cancelled { page: 4 }));
        assert!(t.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let t = ScriptedTransport::new((0..5).map(|_| reply(429, "")).collect());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let r = client(t.clone()).recognize(1, b"jpeg", &cancel).await;
        assert_eq!(r.outcome, PageOutcome::Failed(PageError::Cancelled { page: 1 }));
        assert_eq!(t.calls().len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
