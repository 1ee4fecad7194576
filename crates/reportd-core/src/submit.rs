//! Per-account submission workflow.
//!
//! One job per account: throttle the start time, open a fresh browser
//! session, authenticate, verify the page script still matches the
//! baseline, fill and submit the form, interpret the portal's JSON
//! acknowledgment. Login and submit failures are per-account and
//! non-fatal; a drifted page stops the whole process.

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::account::{Account, JobOutcome, Region};
use crate::error::ReportError;
use crate::pace::PaceDelay;
use crate::page::{PageSnapshot, unified_diff};
use crate::retry::{RetryDecision, run_with_retry};
use crate::shutdown::{ShutdownController, sleep_or_cancel};
use crate::traits::{Notifier, SessionFactory, SnapshotSource, WebSession};

/// Selectors and URLs of the studied portal.
#[derive(Debug, Clone)]
pub struct PortalSpec {
    pub form_url: String,
    pub account_field: String,
    pub password_field: String,
    pub login_button: String,
    pub name_field: String,
    pub region_name_field: String,
    pub region_code_field: String,
    pub submit_button: String,
    /// URL fragment of the save acknowledgment XHR.
    pub ack_fragment: String,
    pub saved_marker: String,
}

impl Default for PortalSpec {
    fn default() -> Self {
        Self {
            form_url: "http://fresh.ahau.edu.cn/yxxt-v5/web/jkxxtb/tbJkxx.zf".into(),
            account_field: "#zh".into(),
            password_field: "#mm".into(),
            login_button: "#dlan".into(),
            name_field: "input#xm".into(),
            region_name_field: "#dqszdmc".into(),
            region_code_field: "#dqszddm".into(),
            submit_button: "//button[text()='提交']".into(),
            ack_fragment: "tbBcJkxx.zf".into(),
            saved_marker: "//div[text()='保存数据成功']".into(),
        }
    }
}

impl PortalSpec {
    /// Script injecting the configured region into the form. The page
    /// ships jQuery, so `$` is available.
    pub fn region_fill_script(&self, region: &Region) -> String {
        format!(
            "$('{}').val('{}');\n$('{}').val('{}');",
            self.region_name_field, region.name, self.region_code_field, region.code
        )
    }
}

/// Pacing knobs of one submission job.
#[derive(Debug, Clone)]
pub struct JobTiming {
    /// Random start offset spreading accounts apart, skipped on
    /// immediate runs.
    pub start_jitter: PaceDelay,
    /// Settling pause between page interactions.
    pub settle: Duration,
    /// Wait before re-attempting a login that landed off the form page.
    pub login_retry_wait: Duration,
    /// Give up on login after this long.
    pub login_ceiling: Duration,
    /// Wait for the save acknowledgment XHR.
    pub ack_timeout: Duration,
}

impl Default for JobTiming {
    fn default() -> Self {
        Self {
            start_jitter: PaceDelay::range(Duration::ZERO, Duration::from_secs(30 * 60)),
            settle: Duration::from_secs(5),
            login_retry_wait: Duration::from_secs(10 * 60),
            login_ceiling: Duration::from_secs(3 * 60 * 60),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

/// Drive a session through the portal's login sequence.
///
/// Navigation errors are retried; landing anywhere but the form URL
/// means the credentials were rejected or the portal is misbehaving, so
/// wait and try again. Returns `false` once the ceiling is exceeded —
/// the caller treats that as a per-account login failure.
pub async fn login<S: WebSession, N: Notifier>(
    session: &S,
    account: &Account,
    portal: &PortalSpec,
    timing: &JobTiming,
    notifier: &N,
    cancel: &CancellationToken,
) -> Result<bool, ReportError> {
    let deadline = tokio::time::Instant::now() + timing.login_ceiling;
    loop {
        if cancel.is_cancelled() {
            return Err(ReportError::Cancelled);
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(account = %account.account_id, "Login ceiling exceeded");
            notifier.notify("Login failed", &account.account_id).await;
            return Ok(false);
        }
        if let Err(err) = session.navigate(&portal.form_url).await {
            if err.is_cancelled() {
                return Err(err);
            }
            tracing::error!(error = %err, "Navigation failed, retrying");
            sleep_or_cancel(timing.settle, cancel).await?;
            continue;
        }
        sleep_or_cancel(timing.settle, cancel).await?;
        session.fill(&portal.account_field, &account.account_id).await?;
        session.fill(&portal.password_field, &account.password).await?;
        sleep_or_cancel(timing.settle, cancel).await?;
        session.click(&portal.login_button).await?;
        sleep_or_cancel(timing.settle, cancel).await?;
        if session.current_url().await? != portal.form_url {
            sleep_or_cancel(timing.login_retry_wait, cancel).await?;
            continue;
        }
        sleep_or_cancel(timing.settle, cancel).await?;
        return Ok(true);
    }
}

/// Reporter name prefilled by the portal, for log and notification text.
fn reporter_name(html: &str, name_field: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(name_field).ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr("value")
        .map(str::to_string)
}

/// Runs submission jobs for configured accounts.
pub struct SubmissionRunner<F, N> {
    factory: Arc<F>,
    notifier: Arc<N>,
    portal: Arc<PortalSpec>,
    shutdown: Arc<ShutdownController>,
    /// Baseline loaded at startup. `None` until the monitor seeds it,
    /// in which case the drift check is skipped.
    baseline: Option<PageSnapshot>,
    timing: JobTiming,
    immediate: bool,
}

impl<F, N> Clone for SubmissionRunner<F, N> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            notifier: self.notifier.clone(),
            portal: self.portal.clone(),
            shutdown: self.shutdown.clone(),
            baseline: self.baseline.clone(),
            timing: self.timing.clone(),
            immediate: self.immediate,
        }
    }
}

impl<F, N> SubmissionRunner<F, N>
where
    F: SessionFactory + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        factory: Arc<F>,
        notifier: Arc<N>,
        portal: Arc<PortalSpec>,
        shutdown: Arc<ShutdownController>,
        baseline: Option<PageSnapshot>,
        timing: JobTiming,
        immediate: bool,
    ) -> Self {
        if baseline.is_none() {
            tracing::warn!("No baseline yet, drift check disabled until the monitor seeds one");
        }
        Self {
            factory,
            notifier,
            portal,
            shutdown,
            baseline,
            timing,
            immediate,
        }
    }

    /// Toggle the start jitter. Immediate runners skip it; scheduled
    /// runs keep it so accounts do not hammer the portal in lockstep.
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    /// Run one account's job to a terminal outcome.
    ///
    /// Unexpected errors are notified and retried indefinitely, matching
    /// the HTTP layer's stance that the portal eventually recovers;
    /// cancellation ends the job immediately.
    pub async fn run_account(&self, account: Account, cancel: CancellationToken) -> JobOutcome {
        let account_id = account.account_id.clone();
        let result = run_with_retry(
            || self.attempt(account.clone(), cancel.clone()),
            |err| {
                let content = format!("```\n{err}\n```");
                async move {
                    self.notifier.notify("Error", &content).await;
                    RetryDecision::retry_logged()
                }
            },
        )
        .await;

        match result {
            Ok(outcome) => {
                tracing::info!(account = %account_id, ?outcome, "Job finished");
                outcome
            }
            Err(err) => JobOutcome::Errored(err.to_string()),
        }
    }

    /// Run every account concurrently; outcomes are independent.
    pub async fn run_all(
        &self,
        accounts: &[Account],
        cancel: CancellationToken,
    ) -> Vec<(String, JobOutcome)> {
        let mut set = tokio::task::JoinSet::new();
        for account in accounts.iter().cloned() {
            let runner = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let id = account.account_id.clone();
                let outcome = runner.run_account(account, cancel).await;
                (id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(result) = set.join_next().await {
            match result {
                Ok(pair) => outcomes.push(pair),
                Err(err) => tracing::error!(error = %err, "Submission job panicked"),
            }
        }
        outcomes
    }

    async fn attempt(
        &self,
        account: Account,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, ReportError> {
        if !self.immediate {
            sleep_or_cancel(self.timing.start_jitter.resolve(), &cancel).await?;
        }
        let session = self.factory.open().await?;
        let outcome = self.drive(&session, &account, &cancel).await;
        if let Err(err) = session.close().await {
            tracing::debug!(error = %err, "Session close failed");
        }
        outcome
    }

    async fn drive(
        &self,
        session: &F::Session,
        account: &Account,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, ReportError> {
        if !login(
            session,
            account,
            &self.portal,
            &self.timing,
            self.notifier.as_ref(),
            cancel,
        )
        .await?
        {
            return Ok(JobOutcome::LoginFailed);
        }

        let html = session.content().await?;
        let current = PageSnapshot::from_html(&html)?;
        if let Some(baseline) = &self.baseline {
            let diff = unified_diff(baseline, &current);
            if !diff.is_empty() {
                let diff_text = diff.join("\n");
                tracing::warn!(account = %account.account_id, "Page changed:\n{diff_text}");
                self.notifier
                    .notify("Page changed", &format!("```diff\n{diff_text}\n```"))
                    .await;
                self.shutdown.request();
                return Ok(JobOutcome::PageChanged);
            }
        }

        let name = reporter_name(&html, &self.portal.name_field).unwrap_or_default();
        session
            .evaluate(&self.portal.region_fill_script(&account.region))
            .await?;
        sleep_or_cancel(self.timing.settle, cancel).await?;

        // The submit step is never auto-retried: the portal call is not
        // idempotent, and a duplicate report is worse than a missed one.
        let ack = session
            .click_and_capture(
                &self.portal.submit_button,
                &self.portal.ack_fragment,
                self.timing.ack_timeout,
            )
            .await?;
        if ack.get("status").and_then(|v| v.as_str()) == Some("success") {
            session
                .wait_for_selector(&self.portal.saved_marker, self.timing.ack_timeout)
                .await?;
            tracing::warn!(account = %account.account_id, %name, "Submission succeeded");
            Ok(JobOutcome::Succeeded)
        } else {
            tracing::warn!(account = %account.account_id, %name, ack = %ack, "Submission rejected");
            self.notifier
                .notify(
                    "Submit failed",
                    &format!("{} {}\n```\n{}\n```", account.account_id, name, ack),
                )
                .await;
            Ok(JobOutcome::SubmitFailed)
        }
    }
}

/// Snapshot source that logs into the portal with a designated account
/// and extracts the page's inline script, for the drift monitor.
pub struct PortalScriptSource<F, N> {
    factory: Arc<F>,
    notifier: Arc<N>,
    portal: Arc<PortalSpec>,
    timing: JobTiming,
    account: Account,
    cancel: CancellationToken,
}

impl<F, N> PortalScriptSource<F, N>
where
    F: SessionFactory,
    N: Notifier,
{
    pub fn new(
        factory: Arc<F>,
        notifier: Arc<N>,
        portal: Arc<PortalSpec>,
        timing: JobTiming,
        account: Account,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            factory,
            notifier,
            portal,
            timing,
            account,
            cancel,
        }
    }
}

impl<F, N> SnapshotSource for PortalScriptSource<F, N>
where
    F: SessionFactory,
    N: Notifier,
{
    async fn fetch(&self) -> Result<PageSnapshot, ReportError> {
        let session = self.factory.open().await?;
        let result = async {
            while !login(
                &session,
                &self.account,
                &self.portal,
                &self.timing,
                self.notifier.as_ref(),
                &self.cancel,
            )
            .await?
            {
                sleep_or_cancel(self.timing.login_retry_wait, &self.cancel).await?;
            }
            let html = session.content().await?;
            PageSnapshot::from_html(&html)
        }
        .await;
        if let Err(err) = session.close().await {
            tracing::debug!(error = %err, "Session close failed");
        }
        result
    }
}
