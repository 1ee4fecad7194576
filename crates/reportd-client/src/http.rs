//! Rate-limited, retrying HTTP client.
//!
//! Every request acquires the host's permit from the shared
//! [`RateLimiterRegistry`] before dispatch, so all plain-HTTP traffic in
//! the process respects the per-host pacing. Transient transport
//! failures are retried silently; HTTP-level failures are terminal for
//! the call.

use std::sync::Arc;
use std::time::Duration;

use reportd_core::{RateLimiterRegistry, ReportError, RetryDecision};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

type HeaderHook = Arc<dyn Fn(&mut Vec<(String, String)>) + Send + Sync>;
type ResponseCheck = Arc<dyn Fn(&PageResponse) -> bool + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ReportError) -> Option<RetryDecision> + Send + Sync>;

/// Per-request knobs. All optional; `RequestOptions::default()` is a
/// plain request.
#[derive(Clone, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    json: Option<serde_json::Value>,
    form: Option<Vec<(String, String)>>,
    before_send: Option<HeaderHook>,
    check: Option<ResponseCheck>,
    on_error: Option<ErrorHook>,
    max_attempts: Option<u32>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = Some(fields);
        self
    }

    /// Hook run against the header list right before every dispatch,
    /// including retries. For values that must be fresh per attempt,
    /// such as tokens and timestamps.
    pub fn before_send(mut self, hook: impl Fn(&mut Vec<(String, String)>) + Send + Sync + 'static) -> Self {
        self.before_send = Some(Arc::new(hook));
        self
    }

    /// Predicate over the successful response. A `false` return is
    /// treated like a transient failure and the request is retried.
    pub fn check(mut self, check: impl Fn(&PageResponse) -> bool + Send + Sync + 'static) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    /// Override the default failure classification. `Some(decision)`
    /// replaces the retry/log behaviour for that error; `None` falls
    /// back to the transient/terminal split.
    pub fn on_error(
        mut self,
        hook: impl Fn(&ReportError) -> Option<RetryDecision> + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Cap the attempt count. Unset means retry transient failures
    /// until cancelled.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }
}

/// A completed, successful HTTP exchange.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub body: String,
}

impl PageResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ReportError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

pub struct HttpClient {
    client: Client,
    registry: Arc<RateLimiterRegistry>,
    timeout_secs: u64,
    cancel: CancellationToken,
}

impl HttpClient {
    pub fn new(
        registry: Arc<RateLimiterRegistry>,
        cancel: CancellationToken,
    ) -> Result<Self, ReportError> {
        Self::with_timeout(registry, cancel, Duration::from_secs(30))
    }

    pub fn with_timeout(
        registry: Arc<RateLimiterRegistry>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<Self, ReportError> {
        let timeout_secs = timeout.as_secs();
        let client = Client::builder()
            .user_agent("reportd/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Http(e.to_string()))?;

        Ok(Self {
            client,
            registry,
            timeout_secs,
            cancel,
        })
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<PageResponse, ReportError> {
        self.send(Method::GET, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<PageResponse, ReportError> {
        self.send(Method::POST, url, options).await
    }

    /// Dispatch with per-host pacing and transient-failure retries.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<PageResponse, ReportError> {
        let parsed =
            Url::parse(url).map_err(|e| ReportError::Http(format!("Invalid URL {url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ReportError::Http(format!("URL has no host: {url}")))?
            .to_string();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return Err(ReportError::Cancelled);
            }

            // Dropping the permit after dispatch starts the host's delay,
            // so retries are paced like any other request.
            let permit = self.registry.acquire(&host).await;
            let result = self.dispatch(method.clone(), url, &options).await;
            drop(permit);

            let exhausted = options.max_attempts.is_some_and(|max| attempt >= max);
            match result {
                Ok(response) => {
                    if let Some(check) = &options.check
                        && !check(&response)
                    {
                        if exhausted {
                            return Err(ReportError::Http(format!(
                                "Response check failed after {attempt} attempts for {url}"
                            )));
                        }
                        tracing::debug!(attempt, %url, "Response check failed, retrying");
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if err.is_cancelled() {
                        return Err(err);
                    }
                    // Default: transient failures retry silently, the
                    // rest are terminal and logged. The hook overrides.
                    let (retry, log) = match options.on_error.as_ref().and_then(|h| h(&err)) {
                        Some(decision) => (decision.retry, decision.log),
                        None => (err.is_transient(), !err.is_transient()),
                    };
                    if log {
                        tracing::error!(attempt, %url, error = %err, "Request failed");
                    } else {
                        tracing::debug!(attempt, %url, error = %err, "Request attempt failed");
                    }
                    if !retry || exhausted {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn dispatch(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<PageResponse, ReportError> {
        let mut headers = options.headers.clone();
        if let Some(hook) = &options.before_send {
            hook(&mut headers);
        }

        let mut request = self.client.request(method, url);
        for (name, value) in &headers {
            request = request.header(name, value);
        }
        if let Some(json) = &options.json {
            request = request.json(json);
        }
        if let Some(form) = &options.form {
            request = request.form(form);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ReportError::Http(format!("Failed to read response body: {e}")))?;

        if status.is_server_error() {
            // Server-side failures are worth waiting out.
            return Err(ReportError::Network(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(ReportError::Http(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }

        Ok(PageResponse {
            status: status.as_u16(),
            url: final_url,
            body,
        })
    }

    fn classify(&self, e: reqwest::Error) -> ReportError {
        if e.is_timeout() {
            ReportError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            ReportError::Network(format!("Connection failed: {e}"))
        } else {
            let msg = e.to_string();
            if msg.contains("reset") || msg.contains("handshake") || msg.contains("incomplete") {
                ReportError::Network(msg)
            } else {
                ReportError::Http(msg)
            }
        }
    }
}
