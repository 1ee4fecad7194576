//! Handwritten test doubles for the trait seams. Public so the other
//! workspace crates can reuse them in their own tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ReportError;
use crate::pace::PaceDelay;
use crate::page::{BaselineStore, PageSnapshot};
use crate::submit::{JobTiming, PortalSpec};
use crate::traits::{Notifier, SessionFactory, SnapshotSource, WebSession};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`BaselineStore`]. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryBaseline {
    slot: Arc<Mutex<Option<PageSnapshot>>>,
}

impl MemoryBaseline {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: PageSnapshot) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(snapshot))),
        }
    }

    pub fn stored(&self) -> Option<PageSnapshot> {
        lock(&self.slot).clone()
    }
}

impl BaselineStore for MemoryBaseline {
    fn load(&self) -> Result<Option<PageSnapshot>, ReportError> {
        Ok(lock(&self.slot).clone())
    }

    fn store(&self, snapshot: &PageSnapshot) -> Result<(), ReportError> {
        *lock(&self.slot) = Some(snapshot.clone());
        Ok(())
    }
}

/// Scripted [`SnapshotSource`]: yields its snapshots in order, then
/// keeps repeating the last one.
pub struct MockSnapshotSource {
    snapshots: Vec<PageSnapshot>,
    cursor: Mutex<usize>,
}

impl MockSnapshotSource {
    pub fn returning(snapshots: Vec<PageSnapshot>) -> Self {
        assert!(!snapshots.is_empty(), "scripted source needs snapshots");
        Self {
            snapshots,
            cursor: Mutex::new(0),
        }
    }
}

impl SnapshotSource for MockSnapshotSource {
    async fn fetch(&self) -> Result<PageSnapshot, ReportError> {
        let mut cursor = lock(&self.cursor);
        let snapshot = self.snapshots[(*cursor).min(self.snapshots.len() - 1)].clone();
        *cursor += 1;
        Ok(snapshot)
    }
}

/// Records notifications instead of delivering them.
#[derive(Default)]
pub struct MockNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        lock(&self.messages).clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify(&self, title: &str, content: &str) {
        lock(&self.messages).push((title.to_string(), content.to_string()));
    }
}

/// Scripted portal: login outcome and submit acknowledgment are decided
/// by the account id last typed into the login field.
pub struct MockSessionFactory {
    html: String,
    failing_login: HashSet<String>,
    rejecting_submission: HashSet<String>,
}

impl MockSessionFactory {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            failing_login: HashSet::new(),
            rejecting_submission: HashSet::new(),
        }
    }

    /// Login with this account id never reaches the form page.
    pub fn failing_login(mut self, account_id: &str) -> Self {
        self.failing_login.insert(account_id.to_string());
        self
    }

    /// Submissions for this account id get a non-success acknowledgment.
    pub fn rejecting_submission(mut self, account_id: &str) -> Self {
        self.rejecting_submission.insert(account_id.to_string());
        self
    }
}

impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    async fn open(&self) -> Result<MockSession, ReportError> {
        Ok(MockSession {
            portal: PortalSpec::default(),
            html: self.html.clone(),
            failing_login: self.failing_login.clone(),
            rejecting_submission: self.rejecting_submission.clone(),
            current_account: Mutex::new(String::new()),
            filled: Mutex::new(Vec::new()),
            evaluated: Mutex::new(Vec::new()),
        })
    }
}

pub struct MockSession {
    portal: PortalSpec,
    html: String,
    failing_login: HashSet<String>,
    rejecting_submission: HashSet<String>,
    current_account: Mutex<String>,
    filled: Mutex<Vec<(String, String)>>,
    evaluated: Mutex<Vec<String>>,
}

impl MockSession {
    pub fn filled(&self) -> Vec<(String, String)> {
        lock(&self.filled).clone()
    }

    pub fn evaluated(&self) -> Vec<String> {
        lock(&self.evaluated).clone()
    }
}

impl WebSession for MockSession {
    async fn navigate(&self, _url: &str) -> Result<(), ReportError> {
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), ReportError> {
        if selector == self.portal.account_field {
            *lock(&self.current_account) = value.to_string();
        }
        lock(&self.filled).push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&self, _selector: &str) -> Result<(), ReportError> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String, ReportError> {
        let account = lock(&self.current_account).clone();
        if self.failing_login.contains(&account) {
            Ok("http://fresh.ahau.edu.cn/yxxt-v5/web/xsLogin/login.zf".to_string())
        } else {
            Ok(self.portal.form_url.clone())
        }
    }

    async fn content(&self) -> Result<String, ReportError> {
        Ok(self.html.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, ReportError> {
        lock(&self.evaluated).push(script.to_string());
        Ok(serde_json::Value::Null)
    }

    async fn wait_for_selector(
        &self,
        _selector: &str,
        _timeout: Duration,
    ) -> Result<(), ReportError> {
        Ok(())
    }

    async fn click_and_capture(
        &self,
        _selector: &str,
        _ack_fragment: &str,
        _timeout: Duration,
    ) -> Result<serde_json::Value, ReportError> {
        let account = lock(&self.current_account).clone();
        if self.rejecting_submission.contains(&account) {
            Ok(serde_json::json!({"status": "error", "msg": "校验失败"}))
        } else {
            Ok(serde_json::json!({"status": "success"}))
        }
    }

    async fn close(&self) -> Result<(), ReportError> {
        Ok(())
    }
}

/// Job timing shrunk to milliseconds so failure paths finish quickly.
pub fn fast_timing() -> JobTiming {
    JobTiming {
        start_jitter: PaceDelay::ZERO,
        settle: Duration::from_millis(1),
        login_retry_wait: Duration::from_millis(2),
        login_ceiling: Duration::from_millis(30),
        ack_timeout: Duration::from_millis(50),
    }
}

/// Minimal portal page: one external script, one inline script, and the
/// prefilled reporter name field.
pub fn portal_html(inline_script: &str, name: &str) -> String {
    format!(
        r#"<html><head>
<script src="/vendor/jquery.js"></script>
<script>
{inline_script}
</script>
</head><body>
<form><input id="xm" value="{name}"/><input id="zh"/><input id="mm"/></form>
</body></html>"#
    )
}
