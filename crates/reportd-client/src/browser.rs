//! Headless-browser sessions over the Chrome DevTools Protocol.
//!
//! The portal renders its form and performs the save call with inline
//! JavaScript, so plain HTTP is not enough. A single Chromium process
//! is shared by the factory; each session is one tab, opened per job
//! and closed when the job finishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use reportd_core::ReportError;
use reportd_core::traits::{SessionFactory, WebSession};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// XPath click. Double-quoted placeholder so XPath literals can use
/// single quotes.
const CLICK_XPATH_JS: &str = r#"(function() {
  var node = document.evaluate("__XPATH__", document, null,
      XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
  if (!node) { return false; }
  node.click();
  return true;
})()"#;

const EXISTS_JS: &str = r#"(function() {
  var sel = "__SELECTOR__";
  if (sel.indexOf("//") === 0) {
    return document.evaluate(sel, document, null,
        XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue !== null;
  }
  return document.querySelector(sel) !== null;
})()"#;

/// Hooks `XMLHttpRequest` so the body of the next response whose URL
/// contains the fragment lands in `window.__reportd_ack`.
const ACK_HOOK_JS: &str = r#"(function() {
  window.__reportd_ack = undefined;
  var open = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function(method, url) {
    if (String(url).indexOf("__FRAGMENT__") !== -1) {
      this.addEventListener("load", function() {
        window.__reportd_ack = this.responseText;
      });
    }
    return open.apply(this, arguments);
  };
})()"#;

const READ_ACK_JS: &str =
    "window.__reportd_ack === undefined ? null : window.__reportd_ack";

fn cdp_err(context: &str, e: impl std::fmt::Display) -> ReportError {
    ReportError::Browser(format!("{context}: {e}"))
}

/// Launches and owns the shared Chromium process.
#[derive(Clone)]
pub struct BrowserSessionFactory {
    browser: Arc<Browser>,
    nav_timeout: Duration,
}

impl BrowserSessionFactory {
    /// Launches headless Chromium with a 30 s navigation timeout.
    pub async fn new() -> Result<Self, ReportError> {
        Self::with_timeout(Duration::from_secs(30)).await
    }

    pub async fn with_timeout(nav_timeout: Duration) -> Result<Self, ReportError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium ships a wrapper that rejects standard
        // Chrome CLI flags, so prefer a real binary when one is found
        // and let chromiumoxide do its own lookup otherwise.
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| ReportError::Browser(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| cdp_err("Failed to launch browser", e))?;

        // The CDP handler must be polled for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            nav_timeout,
        })
    }

    /// Locate a usable Chrome/Chromium binary, honouring `CHROME_BIN`
    /// first and skipping snap wrapper scripts.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];
        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }
}

impl SessionFactory for BrowserSessionFactory {
    type Session = BrowserSession;

    async fn open(&self) -> Result<BrowserSession, ReportError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_err("Failed to open tab", e))?;
        Ok(BrowserSession {
            page,
            nav_timeout: self.nav_timeout,
        })
    }
}

/// One tab of the shared browser.
pub struct BrowserSession {
    page: Page,
    nav_timeout: Duration,
}

impl BrowserSession {
    async fn eval(&self, script: String) -> Result<serde_json::Value, ReportError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| cdp_err("Script evaluation failed", e))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }
}

impl WebSession for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<(), ReportError> {
        let result = tokio::time::timeout(self.nav_timeout, async {
            self.page
                .goto(url)
                .await
                .map_err(|e| cdp_err(&format!("Failed to navigate to {url}"), e))?;
            // <body> present means the page rendered its main content.
            self.page
                .find_element("body")
                .await
                .map_err(|e| cdp_err("Page did not render body", e))?;
            Ok(())
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ReportError::Timeout(self.nav_timeout.as_secs())),
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), ReportError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|e| cdp_err(&format!("No element matches {selector}"), e))?;
        element
            .focus()
            .await
            .map_err(|e| cdp_err(&format!("Failed to focus {selector}"), e))?;
        element
            .type_str(value)
            .await
            .map_err(|e| cdp_err(&format!("Failed to type into {selector}"), e))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), ReportError> {
        if selector.starts_with("//") {
            let script = CLICK_XPATH_JS.replace("__XPATH__", selector);
            let clicked = self.eval(script).await?;
            if clicked.as_bool() != Some(true) {
                return Err(ReportError::Browser(format!(
                    "No element matches {selector}"
                )));
            }
            return Ok(());
        }
        self.page
            .find_element(selector)
            .await
            .map_err(|e| cdp_err(&format!("No element matches {selector}"), e))?
            .click()
            .await
            .map_err(|e| cdp_err(&format!("Failed to click {selector}"), e))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ReportError> {
        self.page
            .url()
            .await
            .map_err(|e| cdp_err("Failed to read page URL", e))?
            .ok_or_else(|| ReportError::Browser("Page has no URL".into()))
    }

    async fn content(&self) -> Result<String, ReportError> {
        self.page
            .content()
            .await
            .map_err(|e| cdp_err("Failed to read page content", e))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ReportError> {
        self.eval(script.to_string()).await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), ReportError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let script = EXISTS_JS.replace("__SELECTOR__", selector);
        loop {
            if self.eval(script.clone()).await?.as_bool() == Some(true) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ReportError::Timeout(timeout.as_secs()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click_and_capture(
        &self,
        selector: &str,
        ack_fragment: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, ReportError> {
        self.eval(ACK_HOOK_JS.replace("__FRAGMENT__", ack_fragment))
            .await?;
        self.click(selector).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let serde_json::Value::String(body) =
                self.eval(READ_ACK_JS.to_string()).await?
            {
                return serde_json::from_str(&body).map_err(|e| {
                    ReportError::Parse(format!("Acknowledgment is not JSON: {e}"))
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ReportError::Timeout(timeout.as_secs()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn close(&self) -> Result<(), ReportError> {
        if let Err(e) = self.page.clone().close().await {
            return Err(cdp_err("Failed to close tab", e));
        }
        Ok(())
    }
}
