//! Operator notifications over the PushPlus push service.

use reportd_core::traits::Notifier;

use crate::http::{HttpClient, RequestOptions};

const TITLE_PREFIX: &str = "Health Information Reporting: ";

/// Markdown notifications via `pushplus.plus`.
///
/// Delivery is best-effort: failures are logged and swallowed, a missed
/// push must never take a submission job down with it. The shared
/// [`HttpClient`] paces calls against the service's per-host limit.
pub struct PushPlusNotifier {
    http: HttpClient,
    token: String,
    endpoint: String,
    muted: bool,
}

impl PushPlusNotifier {
    pub fn new(http: HttpClient, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            endpoint: "https://www.pushplus.plus/send".to_string(),
            muted: false,
        }
    }

    /// Log instead of pushing. Used at debug verbosity so test runs do
    /// not spam the operator's phone.
    pub fn muted(mut self) -> Self {
        self.muted = true;
        self
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Notifier for PushPlusNotifier {
    async fn notify(&self, title: &str, content: &str) {
        if self.muted {
            tracing::debug!(title, content, "Notification muted");
            return;
        }

        let payload = serde_json::json!({
            "token": self.token,
            "title": format!("{TITLE_PREFIX}{title}"),
            "content": content,
            "template": "markdown",
        });
        let options = RequestOptions::new().json(payload).max_attempts(3);

        match self.http.post(&self.endpoint, options).await {
            Ok(_) => tracing::debug!(title, "Notification delivered"),
            Err(err) => tracing::error!(title, error = %err, "Notification failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use httpmock::prelude::*;
    use reportd_core::RateLimiterRegistry;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn http() -> HttpClient {
        HttpClient::new(
            Arc::new(RateLimiterRegistry::new()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn notify_posts_prefixed_markdown_payload() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/send").json_body(serde_json::json!({
                    "token": "tok",
                    "title": "Health Information Reporting: Login failed",
                    "content": "2023001",
                    "template": "markdown",
                }));
                then.status(200).body(r#"{"code":200}"#);
            })
            .await;

        let notifier =
            PushPlusNotifier::new(http(), "tok").with_endpoint(server.url("/send"));
        notifier.notify("Login failed", "2023001").await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/send");
                then.status(400);
            })
            .await;

        let notifier =
            PushPlusNotifier::new(http(), "tok").with_endpoint(server.url("/send"));
        // Must not panic or propagate.
        notifier.notify("Error", "details").await;
    }

    #[tokio::test]
    async fn muted_notifier_never_touches_the_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/send");
                then.status(200);
            })
            .await;

        let notifier = PushPlusNotifier::new(http(), "tok")
            .with_endpoint(server.url("/send"))
            .muted();
        notifier.notify("Page changed", "```diff\n-a\n+b\n```").await;

        assert_eq!(mock.hits_async().await, 0);
    }
}
