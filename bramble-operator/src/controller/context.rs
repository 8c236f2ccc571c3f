//! Shared reconcile context and per-execution retry backoff

use bramble_client::ClusterClient;
use bramble_core::domain::meta::ObjectKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::ReconcileSettings;

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Handed to every reconcile and error policy call
pub struct Context {
    pub client: Arc<dyn ClusterClient>,
    pub settings: ReconcileSettings,
    /// Consecutive failed passes per execution
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Context {
    pub fn new(client: Arc<dyn ClusterClient>, settings: ReconcileSettings) -> Self {
        Self {
            client,
            settings,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<ObjectKey, u32>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Counts a failed pass and returns the delay before the retry
    pub fn record_failure(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures();
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        backoff(*count)
    }

    /// Forgets earlier failures after a successful pass
    pub fn reset(&self, key: &ObjectKey) {
        self.failures().remove(key);
    }

    pub fn failure_count(&self, key: &ObjectKey) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }
}

/// Exponential backoff: 500ms doubling per failure, capped at 30s
pub fn backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(1 << exponent);
    Duration::from_millis(delay_ms.min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bramble_client::InMemoryCluster;

    #[test]
    fn test_backoff_doubles_until_cap() {
        assert_eq!(backoff(1), Duration::from_millis(500));
        assert_eq!(backoff(2), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(2));
        assert_eq!(backoff(7), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_does_not_overflow() {
        assert_eq!(backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_failures_tracked_per_execution() {
        let ctx = Context::new(Arc::new(InMemoryCluster::new()), ReconcileSettings::default());
        let a = ObjectKey::new("ci", "a");
        let b = ObjectKey::new("ci", "b");

        assert_eq!(ctx.record_failure(&a), Duration::from_millis(500));
        assert_eq!(ctx.record_failure(&a), Duration::from_secs(1));
        assert_eq!(ctx.record_failure(&b), Duration::from_millis(500));

        ctx.reset(&a);
        assert_eq!(ctx.failure_count(&a), 0);
        assert_eq!(ctx.failure_count(&b), 1);
        assert_eq!(ctx.record_failure(&a), Duration::from_millis(500));
    }
}
