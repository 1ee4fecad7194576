//! Long-running drift detection against the portal page.
//!
//! Each cycle fetches the live inline-script snapshot, diffs it against
//! the previous one, and sleeps for a duration keyed by the current
//! wall-clock hour — polling less during night and maintenance windows
//! where a page under deployment would produce false positives.

use std::sync::Mutex;

use chrono::Timelike;
use tokio_util::sync::CancellationToken;

use crate::error::ReportError;
use crate::pace::HourlyPolicy;
use crate::page::{BaselineStore, PageSnapshot, unified_diff};
use crate::traits::SnapshotSource;

pub struct DiffMonitor<S, B> {
    source: S,
    baseline: B,
    policy: HourlyPolicy,
    /// `None` until the first ever fetch seeds the baseline.
    previous: Mutex<Option<PageSnapshot>>,
}

impl<S: SnapshotSource, B: BaselineStore> DiffMonitor<S, B> {
    /// Loads the persisted baseline; absent on the first ever run.
    pub fn new(source: S, baseline: B, policy: HourlyPolicy) -> Result<Self, ReportError> {
        let previous = baseline.load()?;
        if previous.is_none() {
            tracing::info!("No baseline yet, first fetch will seed it");
        }
        Ok(Self {
            source,
            baseline,
            policy,
            previous: Mutex::new(previous),
        })
    }

    /// One poll cycle: fetch, diff, persist on change.
    ///
    /// Returns the unified diff lines (empty when unchanged). The very
    /// first fetch with no prior baseline seeds the baseline file and
    /// reports no change — distinct from a baseline that happens to be
    /// an empty page.
    pub async fn step(&self) -> Result<Vec<String>, ReportError> {
        let current = self.source.fetch().await?;

        let mut previous = self.lock_previous();
        let diff = match previous.as_ref() {
            Some(prev) => unified_diff(prev, &current),
            None => {
                self.baseline.store(&current)?;
                tracing::info!(lines = current.lines().len(), "Seeded baseline");
                Vec::new()
            }
        };
        if !diff.is_empty() {
            // Confirmed change: the new snapshot becomes the baseline.
            self.baseline.store(&current)?;
        }
        *previous = Some(current);
        Ok(diff)
    }

    /// Poll until a change is observed or shutdown is requested.
    ///
    /// Returns the diff of the first observed change; the caller decides
    /// what to do with it (notify, shut down).
    pub async fn run(&self, cancel: CancellationToken) -> Result<Vec<String>, ReportError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ReportError::Cancelled);
            }
            let diff = self.step().await?;
            if !diff.is_empty() {
                return Ok(diff);
            }
            let hour = chrono::Local::now().hour();
            let sleep_for = self.policy.delay_for_hour(hour);
            tracing::debug!(hour, sleep_secs = sleep_for.as_secs(), "Monitor cycle clean");
            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                () = cancel.cancelled() => return Err(ReportError::Cancelled),
            }
        }
    }

    fn lock_previous(&self) -> std::sync::MutexGuard<'_, Option<PageSnapshot>> {
        self.previous.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned monitor state");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pace::PaceDelay;
    use crate::testutil::{MemoryBaseline, MockSnapshotSource};

    fn fast_policy() -> HourlyPolicy {
        HourlyPolicy::new(PaceDelay::fixed(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn unchanged_snapshot_yields_empty_diff() {
        let baseline = MemoryBaseline::with_snapshot(PageSnapshot::new(vec!["a".into(), "b".into()]));
        let source = MockSnapshotSource::returning(vec![PageSnapshot::new(vec![
            "a".into(),
            "b".into(),
        ])]);
        let monitor = DiffMonitor::new(source, baseline, fast_policy()).unwrap();

        assert!(monitor.step().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn changed_snapshot_yields_removal_and_addition() {
        let baseline = MemoryBaseline::with_snapshot(PageSnapshot::new(vec!["a".into(), "b".into()]));
        let source = MockSnapshotSource::returning(vec![PageSnapshot::new(vec![
            "a".into(),
            "c".into(),
        ])]);
        let monitor = DiffMonitor::new(source, baseline.clone(), fast_policy()).unwrap();

        let diff = monitor.step().await.unwrap();
        assert!(diff.iter().any(|l| l == "-b"));
        assert!(diff.iter().any(|l| l == "+c"));

        // The confirmed change became the new baseline.
        let stored = baseline.stored().unwrap();
        assert_eq!(stored.lines(), ["a", "c"]);
    }

    #[tokio::test]
    async fn first_fetch_without_baseline_seeds_and_reports_nothing() {
        let baseline = MemoryBaseline::empty();
        let source = MockSnapshotSource::returning(vec![PageSnapshot::new(vec!["x".into()])]);
        let monitor = DiffMonitor::new(source, baseline.clone(), fast_policy()).unwrap();

        let diff = monitor.step().await.unwrap();
        assert!(diff.is_empty());
        assert_eq!(baseline.stored().unwrap().lines(), ["x"]);
    }

    #[tokio::test]
    async fn empty_baseline_page_is_not_the_same_as_no_baseline() {
        // A persisted empty page diffs against new content.
        let baseline = MemoryBaseline::with_snapshot(PageSnapshot::default());
        let source = MockSnapshotSource::returning(vec![PageSnapshot::new(vec!["x".into()])]);
        let monitor = DiffMonitor::new(source, baseline, fast_policy()).unwrap();

        let diff = monitor.step().await.unwrap();
        assert!(diff.iter().any(|l| l == "+x"));
    }

    #[tokio::test]
    async fn run_returns_the_first_observed_change() {
        let baseline = MemoryBaseline::with_snapshot(PageSnapshot::new(vec!["a".into()]));
        let source = MockSnapshotSource::returning(vec![
            PageSnapshot::new(vec!["a".into()]),
            PageSnapshot::new(vec!["a".into()]),
            PageSnapshot::new(vec!["b".into()]),
        ]);
        let monitor = DiffMonitor::new(source, baseline, fast_policy()).unwrap();

        let diff = monitor.run(CancellationToken::new()).await.unwrap();
        assert!(diff.iter().any(|l| l == "+b"));
    }

    #[tokio::test]
    async fn run_observes_cancellation() {
        let baseline = MemoryBaseline::with_snapshot(PageSnapshot::new(vec!["a".into()]));
        let source = MockSnapshotSource::returning(vec![PageSnapshot::new(vec!["a".into()])]);
        let monitor = DiffMonitor::new(source, baseline, fast_policy()).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = monitor.run(cancel).await;
        assert!(matches!(result, Err(ReportError::Cancelled)));
    }
}
