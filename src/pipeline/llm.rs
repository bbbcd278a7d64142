//! Extraction Client: send one window to the model and recover questions.
//!
//! The HTTP layer sits behind [`CompletionTransport`] so the retry and
//! recovery logic here can be driven by scripted transports in tests.
//!
//! ## Retry Strategy
//!
//! A network error, timeout, non-2xx status, or a response the
//! [`RecoveryChain`] cannot parse all retry the *whole* request. Backoff
//! doubles from `retry_backoff_ms` (1 s → 2 s → 4 s with defaults). Retries
//! run at `min(temperature, retry_temperature)` to favour strictly formatted
//! output. After the last attempt the window degrades to a placeholder
//! instead of failing:
//!
//! | Last failure kind | Returned |
//! |-------------------|----------|
//! | at least one response arrived but none parsed | parse-failure sentinel |
//! | every attempt failed in transport | canned example question |
//! | no endpoint/credential configured | canned example question, no call |

use crate::config::{ExtractionConfig, ENV_API_KEY, ENV_API_URL};
use crate::error::{HarvestError, TransportError, WindowError};
use crate::output::ExtractionOutcome;
use crate::pipeline::envelope::{extract_payload, EnvelopeShape};
use crate::pipeline::recover::RecoveryChain;
use crate::prompts::build_request_text;
use crate::question::CandidateQuestion;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

// ── Transport ────────────────────────────────────────────────────────────────

/// One chat message in the request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request body: `{ model, messages: [{role, content}], temperature, max_tokens }`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Sends a completion request and returns the raw response body.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError>;
}

/// Bearer-authenticated HTTP POST transport.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout_secs: u64,
}

impl HttpTransport {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HarvestError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout_secs))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout_secs))?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: snippet(&body, 200),
            });
        }
        Ok(body)
    }
}

fn map_reqwest_error(e: reqwest::Error, timeout_secs: u64) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout { secs: timeout_secs }
    } else {
        TransportError::Network(e.to_string())
    }
}

/// Resolve the transport, from most-specific to least-specific:
///
/// 1. **Pre-built transport** (`config.transport`)
/// 2. **Config endpoint** (`config.api_url` + `config.api_key`)
/// 3. **Environment** (`EXAM_HARVEST_API_URL` + `EXAM_HARVEST_API_KEY`)
///
/// `Ok(None)` means nothing is configured; windows then degrade to the
/// canned example instead of failing.
pub fn resolve_transport(
    config: &ExtractionConfig,
) -> Result<Option<Arc<dyn CompletionTransport>>, HarvestError> {
    if let Some(ref transport) = config.transport {
        return Ok(Some(Arc::clone(transport)));
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let url = non_empty(config.api_url.clone()).or_else(|| non_empty(std::env::var(ENV_API_URL).ok()));
    let key = non_empty(config.api_key.clone()).or_else(|| non_empty(std::env::var(ENV_API_KEY).ok()));

    match (url, key) {
        (Some(url), Some(key)) => {
            debug!("Using HTTP transport: {}", url);
            let transport = HttpTransport::new(url, key, config.api_timeout_secs)?;
            Ok(Some(Arc::new(transport)))
        }
        _ => {
            warn!(
                "Extraction service not configured (set {} and {}); using example output",
                ENV_API_URL, ENV_API_KEY
            );
            Ok(None)
        }
    }
}

// ── Extraction client ────────────────────────────────────────────────────────

/// Everything known about one window's extraction.
#[derive(Debug, Clone)]
pub struct WindowExtraction {
    /// Never empty unless `outcome` is `Parsed` or `Skipped`.
    pub candidates: Vec<CandidateQuestion>,
    pub outcome: ExtractionOutcome,
    pub attempts: u32,
    pub strategy: Option<&'static str>,
    pub envelope: Option<EnvelopeShape>,
    pub last_error: Option<String>,
}

impl WindowExtraction {
    /// Non-fatal error describing a degraded window.
    pub fn window_error(&self, window: usize) -> Option<WindowError> {
        match self.outcome {
            ExtractionOutcome::TransportFailure => Some(WindowError::TransportFailed {
                window,
                attempts: self.attempts,
                detail: self.last_error.clone().unwrap_or_default(),
            }),
            ExtractionOutcome::ParseFailure => Some(WindowError::ParseFailed {
                window,
                attempts: self.attempts,
            }),
            ExtractionOutcome::Unconfigured => Some(WindowError::NotConfigured { window }),
            ExtractionOutcome::Parsed | ExtractionOutcome::Skipped => None,
        }
    }
}

/// Drives the request/retry/recovery loop for single windows.
pub struct ExtractionClient {
    transport: Option<Arc<dyn CompletionTransport>>,
    chain: RecoveryChain,
    model: String,
    prompt: Option<String>,
    temperature: f32,
    retry_temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl ExtractionClient {
    pub fn new(transport: Option<Arc<dyn CompletionTransport>>, config: &ExtractionConfig) -> Self {
        Self {
            transport,
            chain: RecoveryChain::default(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            temperature: config.temperature,
            retry_temperature: config.retry_temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Client with the transport resolved from `config` and the environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, HarvestError> {
        Ok(Self::new(resolve_transport(config)?, config))
    }

    /// Candidates for one window. Never fails; see [`Self::extract_detailed`].
    pub async fn extract(
        &self,
        window_text: &str,
        temperature: Option<f32>,
        attempt: u32,
    ) -> Vec<CandidateQuestion> {
        self.extract_detailed(window_text, temperature, attempt)
            .await
            .candidates
    }

    /// Run attempts `attempt..=max_retries` until one response recovers.
    ///
    /// `temperature` overrides the first attempt's temperature; later
    /// attempts never run hotter than `retry_temperature`.
    pub async fn extract_detailed(
        &self,
        window_text: &str,
        temperature: Option<f32>,
        attempt: u32,
    ) -> WindowExtraction {
        if window_text.trim().is_empty() {
            return WindowExtraction {
                candidates: Vec::new(),
                outcome: ExtractionOutcome::Skipped,
                attempts: 0,
                strategy: None,
                envelope: None,
                last_error: None,
            };
        }

        let Some(transport) = self.transport.as_ref() else {
            return WindowExtraction {
                candidates: vec![CandidateQuestion::example()],
                outcome: ExtractionOutcome::Unconfigured,
                attempts: 0,
                strategy: None,
                envelope: None,
                last_error: None,
            };
        };

        let start = Instant::now();
        let first = attempt.min(self.max_retries);
        let base_temperature = temperature.unwrap_or(if first == 0 {
            self.temperature
        } else {
            self.temperature.min(self.retry_temperature)
        });
        let content = build_request_text(self.prompt.as_deref(), window_text);

        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;
        let mut got_response = false;
        let mut envelope = None;

        for n in first..=self.max_retries {
            let temperature = if n == first {
                base_temperature
            } else {
                base_temperature.min(self.retry_temperature)
            };
            if n > first {
                let backoff = self
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(n - first - 1));
                warn!(
                    "retry {}/{} after {}ms (temperature {})",
                    n, self.max_retries, backoff, temperature
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let request = CompletionRequest {
                model: self.model.clone(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: content.clone(),
                }],
                temperature,
                max_tokens: self.max_tokens,
            };

            attempts += 1;
            let result = match timeout(
                Duration::from_secs(self.api_timeout_secs),
                transport.complete(&request),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout {
                    secs: self.api_timeout_secs,
                }),
            };

            match result {
                Ok(body) => {
                    got_response = true;
                    let (payload, shape) = extract_payload(&body);
                    envelope = Some(shape);
                    if let Some(recovered) = self.chain.recover(&payload) {
                        debug!(
                            "{} candidates via {:?} envelope, '{}' strategy, {:?}",
                            recovered.candidates.len(),
                            shape,
                            recovered.strategy,
                            start.elapsed()
                        );
                        return WindowExtraction {
                            candidates: recovered.candidates,
                            outcome: ExtractionOutcome::Parsed,
                            attempts,
                            strategy: Some(recovered.strategy),
                            envelope,
                            last_error,
                        };
                    }
                    let msg = format!("unparseable response: {}", snippet(&payload, 80));
                    warn!("attempt {} failed — {}", n + 1, msg);
                    last_error = Some(msg);
                }
                Err(e) => {
                    warn!("attempt {} failed — {}", n + 1, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        // All retries exhausted
        let (candidates, outcome) = if got_response {
            (
                vec![CandidateQuestion::parse_failure()],
                ExtractionOutcome::ParseFailure,
            )
        } else {
            (
                vec![CandidateQuestion::example()],
                ExtractionOutcome::TransportFailure,
            )
        };
        WindowExtraction {
            candidates,
            outcome,
            attempts,
            strategy: None,
            envelope,
            last_error,
        }
    }
}

/// First `max` chars of `s` on one line, for log messages.
fn snippet(s: &str, max: usize) -> String {
    let flat: String = s.chars().take(max).map(|c| if c == '\n' { ' ' } else { c }).collect();
    if s.chars().count() > max {
        format!("{flat}…")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{Placeholder, PARSE_FAILURE_CATEGORY};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned results and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, TransportError>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn temperatures(&self) -> Vec<f32> {
            self.seen.lock().unwrap().iter().map(|r| r.temperature).collect()
        }
    }

    #[async_trait]
    impl CompletionTransport for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Network("script exhausted".into())))
        }
    }

    fn chat(content: &str) -> Result<String, TransportError> {
        Ok(json!({"choices": [{"message": {"content": content}}]}).to_string())
    }

    fn client(transport: Arc<Scripted>) -> ExtractionClient {
        let config = ExtractionConfig::builder().retry_backoff_ms(0).build().unwrap();
        ExtractionClient::new(Some(transport as Arc<dyn CompletionTransport>), &config)
    }

    #[tokio::test]
    async fn parses_first_response() {
        let t = Scripted::new(vec![chat(
            "```json\n[{\"type\":\"单选题\",\"content\":\"2022-7 下列说法中错误的是（ ）\"}]\n```",
        )]);
        let r = client(t.clone()).extract_detailed("2022-7 下列说法", None, 0).await;
        assert_eq!(r.outcome, ExtractionOutcome::Parsed);
        assert_eq!(r.attempts, 1);
        assert_eq!(r.envelope, Some(EnvelopeShape::ChatCompletion));
        assert_eq!(r.candidates[0].content, "2022-7 下列说法中错误的是（ ）");

        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0].model, "gemini-2.0-flash-exp");
        assert_eq!(seen[0].max_tokens, 4000);
        assert_eq!(seen[0].messages[0].role, "user");
        assert!(seen[0].messages[0].content.ends_with("2022-7 下列说法"));
    }

    #[tokio::test]
    async fn transport_failing_every_attempt_yields_one_example() {
        let t = Scripted::new(vec![
            Err(TransportError::Network("refused".into())),
            Err(TransportError::Status { status: 503, body: "busy".into() }),
            Err(TransportError::Network("refused".into())),
            Err(TransportError::Network("refused".into())),
        ]);
        let r = client(t.clone()).extract_detailed("some window text", None, 0).await;
        assert_eq!(r.outcome, ExtractionOutcome::TransportFailure);
        assert_eq!(r.attempts, 4);
        assert_eq!(r.candidates.len(), 1);
        assert_eq!(r.candidates[0].placeholder, Some(Placeholder::Example));
        assert!(matches!(
            r.window_error(3),
            Some(WindowError::TransportFailed { window: 3, attempts: 4, .. })
        ));
    }

    #[tokio::test]
    async fn malformed_prose_yields_parse_failure_sentinel() {
        let prose = "抱歉，我无法识别这段文本中的题目。";
        let t = Scripted::new(vec![chat(prose), chat(prose), chat(prose), chat(prose)]);
        let out = client(t).extract("some window text", None, 0).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].category.as_deref(), Some(PARSE_FAILURE_CATEGORY));
    }

    #[tokio::test]
    async fn recovers_on_retry_at_lower_temperature() {
        let t = Scripted::new(vec![
            Err(TransportError::Timeout { secs: 100 }),
            chat("not json"),
            chat("[{\"content\": \"练习1 以下哪项正确\"}]"),
        ]);
        let r = client(t.clone()).extract_detailed("window", None, 0).await;
        assert_eq!(r.outcome, ExtractionOutcome::Parsed);
        assert_eq!(r.attempts, 3);
        assert_eq!(t.temperatures(), vec![0.3, 0.2, 0.2]);
    }

    #[tokio::test]
    async fn retries_never_run_hotter_than_first_attempt() {
        let t = Scripted::new(vec![]);
        let config = ExtractionConfig::builder()
            .temperature(0.1)
            .retry_temperature(0.2)
            .max_retries(2)
            .retry_backoff_ms(0)
            .build()
            .unwrap();
        let c = ExtractionClient::new(Some(t.clone() as Arc<dyn CompletionTransport>), &config);
        c.extract_detailed("window", None, 0).await;
        assert_eq!(t.temperatures(), vec![0.1, 0.1, 0.1]);
    }

    #[tokio::test]
    async fn starting_attempt_limits_remaining_tries() {
        let t = Scripted::new(vec![]);
        let r = client(t.clone()).extract_detailed("window", Some(0.2), 2).await;
        assert_eq!(r.attempts, 2);
        assert_eq!(t.temperatures(), vec![0.2, 0.2]);
    }

    #[tokio::test]
    async fn unconfigured_returns_example_without_calling() {
        let c = ExtractionClient::new(None, &ExtractionConfig::default());
        let r = c.extract_detailed("window", None, 0).await;
        assert_eq!(r.outcome, ExtractionOutcome::Unconfigured);
        assert_eq!(r.attempts, 0);
        assert_eq!(r.candidates, vec![CandidateQuestion::example()]);
    }

    #[tokio::test]
    async fn blank_window_is_skipped() {
        let t = Scripted::new(vec![]);
        let r = client(t.clone()).extract_detailed(" \n\t ", None, 0).await;
        assert_eq!(r.outcome, ExtractionOutcome::Skipped);
        assert!(r.candidates.is_empty());
        assert!(t.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_transport_times_out() {
        struct Slow;
        #[async_trait]
        impl CompletionTransport for Slow {
            async fn complete(&self, _: &CompletionRequest) -> Result<String, TransportError> {
                sleep(Duration::from_secs(5)).await;
                Ok("[]".into())
            }
        }
        let config = ExtractionConfig::builder()
            .max_retries(0)
            .api_timeout_secs(1)
            .build()
            .unwrap();
        let c = ExtractionClient::new(Some(Arc::new(Slow)), &config);
        let r = c.extract_detailed("window", None, 0).await;
        assert_eq!(r.outcome, ExtractionOutcome::TransportFailure);
        assert!(r.last_error.unwrap().contains("timed out"));
    }

    #[test]
    fn request_body_shape() {
        let req = CompletionRequest {
            model: "m".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "c".into(),
            }],
            temperature: 0.5,
            max_tokens: 10,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({"model": "m", "messages": [{"role": "user", "content": "c"}], "temperature": 0.5, "max_tokens": 10})
        );
    }

    #[test]
    fn prebuilt_transport_wins() {
        let t = Scripted::new(vec![]);
        let config = ExtractionConfig::builder()
            .transport(t as Arc<dyn CompletionTransport>)
            .build()
            .unwrap();
        assert!(resolve_transport(&config).unwrap().is_some());
    }

    #[test]
    fn config_endpoint_builds_http_transport() {
        let config = ExtractionConfig::builder()
            .api_url("http://127.0.0.1:9/v1/chat/completions")
            .api_key("k")
            .build()
            .unwrap();
        assert!(resolve_transport(&config).unwrap().is_some());
    }

    #[test]
    fn snippet_truncates() {
        assert_eq!(snippet("a\nb", 10), "a b");
        assert_eq!(snippet("题目题目题目", 2), "题目…");
    }
}
