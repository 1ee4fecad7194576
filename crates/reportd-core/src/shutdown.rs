//! Coordinated cancellation for the whole process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ReportError;

/// Idempotent, re-entrant-safe shutdown coordinator.
///
/// The first request cancels the shared token; outstanding jobs observe
/// it at their suspension points and drain. A second concurrent request
/// (operator hits interrupt twice) force-exits immediately so the
/// process never hangs on a stuck job.
#[derive(Debug, Default)]
pub struct ShutdownController {
    token: CancellationToken,
    killed: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by every suspended job.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            tracing::warn!("Repeated shutdown request, exiting immediately");
            std::process::exit(1);
        }
        tracing::warn!("Shutdown requested, draining outstanding jobs");
        self.token.cancel();
    }
}

/// Sleep that observes cancellation.
///
/// Returns `Err(Cancelled)` as soon as the token fires, so callers can
/// propagate shutdown with `?` from any suspension point.
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), ReportError> {
    tokio::select! {
        () = tokio::time::sleep(duration) => Ok(()),
        () = cancel.cancelled() => Err(ReportError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_request_cancels_the_token() {
        let controller = ShutdownController::new();
        let token = controller.token();

        assert!(!controller.is_shutting_down());
        controller.request();

        assert!(controller.is_shutting_down());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn sleep_or_cancel_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let result = sleep_or_cancel(Duration::from_millis(1), &token).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn sleep_or_cancel_returns_cancelled_immediately() {
        let token = CancellationToken::new();
        token.cancel();

        let start = std::time::Instant::now();
        let result = sleep_or_cancel(Duration::from_secs(60), &token).await;

        assert!(matches!(result, Err(ReportError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
