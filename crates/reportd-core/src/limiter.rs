//! Per-host request rate limiting shared across concurrent jobs.
//!
//! Each host gets one mutual-exclusion slot. Releasing the slot is
//! deferred: after a holder drops its permit, the slot only becomes
//! available again once the host's configured [`PaceDelay`] has elapsed,
//! enforcing a minimum spacing between consecutive requests to the same
//! host rather than just preventing overlap.
//!
//! Limits are registered per dot-suffix: a limit registered for
//! `ahau.edu.cn` applies to `fresh.ahau.edu.cn` as well. The registry is
//! an explicit injectable object, not ambient global state; tests
//! substitute one with zero delays.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::pace::PaceDelay;

pub(crate) struct HostSlot {
    lock: Arc<Mutex<()>>,
    delay: PaceDelay,
}

impl HostSlot {
    fn new(delay: PaceDelay) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            delay,
        }
    }
}

/// Exclusive hold on a host's request slot.
///
/// Dropping the permit schedules the slot to free after the host's delay
/// elapses, as an independent task; the dropping caller never blocks.
pub struct HostPermit {
    guard: Option<OwnedMutexGuard<()>>,
    release_after: Duration,
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let delay = self.release_after;
        if delay.is_zero() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    drop(guard);
                });
            }
            // Runtime already gone: nothing left to pace against.
            Err(_) => drop(guard),
        }
    }
}

/// Registry of per-host rate limit slots.
pub struct RateLimiterRegistry {
    /// Registered suffix → spacing delay. Fixed after construction.
    limits: HashMap<String, PaceDelay>,
    /// Lazily created slots, keyed by resolved suffix and aliased under
    /// each full host seen. Lives for the registry's lifetime.
    entries: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self {
            limits: HashMap::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a spacing delay for a host suffix (e.g. `"pushplus.plus"`).
    pub fn with_limit(mut self, suffix: impl Into<String>, delay: PaceDelay) -> Self {
        self.limits.insert(suffix.into(), delay);
        self
    }

    /// Suspend until the slot for `host` is free, then hold it.
    ///
    /// The slot is shared by every host matching the same registered
    /// suffix; an unregistered host gets its own zero-delay slot.
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let slot = self.slot_for(host).await;
        let guard = slot.lock.clone().lock_owned().await;
        HostPermit {
            guard: Some(guard),
            release_after: slot.delay.resolve(),
        }
    }

    pub(crate) async fn slot_for(&self, host: &str) -> Arc<HostSlot> {
        let mut entries = self.entries.lock().await;
        if let Some(slot) = entries.get(host) {
            return slot.clone();
        }
        let (key, delay) = self.resolve_limit(host);
        let slot = entries
            .entry(key)
            .or_insert_with(|| Arc::new(HostSlot::new(delay)))
            .clone();
        entries.insert(host.to_string(), slot.clone());
        slot
    }

    /// Walk from the full host down one dot-separated label at a time; the
    /// first registered suffix wins. With no match, the last possible
    /// suffix gets a zero-delay limit.
    fn resolve_limit(&self, host: &str) -> (String, PaceDelay) {
        let mut suffix = host;
        loop {
            if let Some(delay) = self.limits.get(suffix) {
                return (suffix.to_string(), *delay);
            }
            match suffix.split_once('.') {
                Some((_, rest)) if rest.contains('.') => suffix = rest,
                _ => return (suffix.to_string(), PaceDelay::ZERO),
            }
        }
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
