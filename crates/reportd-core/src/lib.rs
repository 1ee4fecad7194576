//! Core domain logic of the reporting daemon: pacing and rate limiting,
//! retry orchestration, page snapshots and drift detection, and the
//! per-account submission workflow. Everything touching a real browser,
//! the network, or the notification service sits behind the traits in
//! [`traits`] and is implemented in `reportd-client`.

pub mod account;
pub mod error;
pub mod limiter;
pub mod monitor;
pub mod pace;
pub mod page;
pub mod retry;
pub mod shutdown;
pub mod submit;
pub mod testutil;
pub mod traits;

pub use account::{Account, JobOutcome, Region};
pub use error::ReportError;
pub use limiter::{HostPermit, RateLimiterRegistry};
pub use monitor::DiffMonitor;
pub use pace::{HourlyPolicy, PaceDelay};
pub use page::{BaselineStore, FileBaseline, PageSnapshot, unified_diff};
pub use retry::{RetryDecision, run_with_retry};
pub use shutdown::{ShutdownController, sleep_or_cancel};
pub use submit::{JobTiming, PortalScriptSource, PortalSpec, SubmissionRunner};
pub use traits::{Notifier, SessionFactory, SnapshotSource, WebSession};
