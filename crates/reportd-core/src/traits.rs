//! Seams to the external collaborators: the browser session, the
//! notification channel, and the snapshot fetch used by the drift
//! monitor. Implementations live in `reportd-client`; tests use the
//! handwritten mocks in [`crate::testutil`].

use std::future::Future;
use std::time::Duration;

use crate::error::ReportError;
use crate::page::PageSnapshot;

/// One live browser page/session against the portal.
pub trait WebSession: Send + Sync {
    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), ReportError>> + Send;

    fn fill(
        &self,
        selector: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), ReportError>> + Send;

    /// Click an element. Selectors starting with `//` are XPath,
    /// everything else is CSS.
    fn click(&self, selector: &str) -> impl Future<Output = Result<(), ReportError>> + Send;

    fn current_url(&self) -> impl Future<Output = Result<String, ReportError>> + Send;

    /// Fully rendered HTML of the current page.
    fn content(&self) -> impl Future<Output = Result<String, ReportError>> + Send;

    /// Evaluate a script in the page, returning its JSON value
    /// (`null` for void scripts).
    fn evaluate(
        &self,
        script: &str,
    ) -> impl Future<Output = Result<serde_json::Value, ReportError>> + Send;

    fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ReportError>> + Send;

    /// Click an element and capture the JSON body of the next XHR
    /// response whose URL contains `ack_fragment`.
    fn click_and_capture(
        &self,
        selector: &str,
        ack_fragment: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<serde_json::Value, ReportError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), ReportError>> + Send;
}

/// Issues a fresh, isolated session per job.
pub trait SessionFactory: Send + Sync {
    type Session: WebSession;

    fn open(&self) -> impl Future<Output = Result<Self::Session, ReportError>> + Send;
}

/// Fire-and-forget operator notification. Delivery failures are the
/// implementation's problem (logged, never escalated).
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, content: &str) -> impl Future<Output = ()> + Send;
}

/// Produces the current live snapshot for the drift monitor. May perform
/// network/browser I/O.
pub trait SnapshotSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<PageSnapshot, ReportError>> + Send;
}
