//! Catch-and-decide retry loop for arbitrary units of work.
//!
//! The policy decides per failure whether to retry and whether to log;
//! the runner itself never backs off — pacing, if any, lives inside the
//! unit of work (e.g. the HTTP client's per-host spacing).

use std::future::Future;

use crate::error::ReportError;

/// Outcome of a retry policy for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub log: bool,
}

impl RetryDecision {
    /// Retry and record the failure — the default for unexpected errors.
    pub fn retry_logged() -> Self {
        Self {
            retry: true,
            log: true,
        }
    }

    /// Stop without recording anything.
    pub fn give_up_quietly() -> Self {
        Self {
            retry: false,
            log: false,
        }
    }

    /// Stop, but record the failure first.
    pub fn give_up_logged() -> Self {
        Self {
            retry: false,
            log: true,
        }
    }
}

/// Repeatedly invoke `work` until it succeeds or `decide` gives up.
///
/// `decide` is consulted on every failure and may suspend (policies fire
/// notifications). Cancellation always propagates immediately, unlogged
/// and unretried, regardless of the supplied policy — otherwise the
/// process could not shut down cleanly.
pub async fn run_with_retry<T, W, FutW, D, FutD>(
    mut work: W,
    mut decide: D,
) -> Result<T, ReportError>
where
    W: FnMut() -> FutW,
    FutW: Future<Output = Result<T, ReportError>>,
    D: FnMut(&ReportError) -> FutD,
    FutD: Future<Output = RetryDecision>,
{
    loop {
        match work().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if err.is_cancelled() {
                    return Err(err);
                }
                let decision = decide(&err).await;
                if decision.log {
                    tracing::error!(error = %err, "task failed");
                }
                if !decision.retry {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Fault injector that fails `failures` times before succeeding.
    fn flaky(
        failures: usize,
    ) -> (
        Arc<AtomicUsize>,
        impl FnMut() -> Pin<Box<dyn Future<Output = Result<u32, ReportError>>>>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let work = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(ReportError::Network("injected".into()))
                } else {
                    Ok(42u32)
                }
            }) as Pin<Box<dyn Future<Output = Result<u32, ReportError>>>>
        };
        (calls, work)
    }

    #[tokio::test]
    async fn retries_until_success_when_policy_always_retries() {
        let (calls, work) = flaky(3);
        let decisions = Arc::new(AtomicUsize::new(0));
        let decided = decisions.clone();

        let result = run_with_retry(work, move |_err| {
            decided.fetch_add(1, Ordering::SeqCst);
            async { RetryDecision::retry_logged() }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(decisions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_first_error_when_policy_says_stop() {
        let (calls, work) = flaky(10);
        let decisions = Arc::new(AtomicUsize::new(0));
        let decided = decisions.clone();

        let result = run_with_retry(work, move |_err| {
            decided.fetch_add(1, Ordering::SeqCst);
            async { RetryDecision::give_up_quietly() }
        })
        .await;

        assert!(matches!(result, Err(ReportError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(decisions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn immediate_success_never_consults_the_policy() {
        let (calls, work) = flaky(0);
        let decisions = Arc::new(AtomicUsize::new(0));
        let decided = decisions.clone();

        let result = run_with_retry(work, move |_err| {
            decided.fetch_add(1, Ordering::SeqCst);
            async { RetryDecision::retry_logged() }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(decisions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_bypasses_the_policy() {
        let decisions = Arc::new(AtomicUsize::new(0));
        let decided = decisions.clone();

        let result = run_with_retry(
            || async { Err::<u32, _>(ReportError::Cancelled) },
            move |_err| {
                decided.fetch_add(1, Ordering::SeqCst);
                async { RetryDecision::retry_logged() }
            },
        )
        .await;

        assert!(matches!(result, Err(ReportError::Cancelled)));
        assert_eq!(decisions.load(Ordering::SeqCst), 0);
    }
}
