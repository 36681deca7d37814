use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Last-access bookkeeping, kept apart from the registry so that the
/// per-segment hot path never contends with start/stop.
///
/// Each key maps to an atomic epoch-millisecond stamp: `touch` takes the
/// table read lock plus one atomic store. The write lock is only taken on
/// the lifecycle edges (`register`/`forget`), which the session manager
/// drives.
pub struct AccessTracker {
    stamps: RwLock<HashMap<String, Arc<AtomicI64>>>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self {
            stamps: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking `id`, stamped as accessed now.
    pub fn register(&self, id: &str) {
        let stamp = Arc::new(AtomicI64::new(Utc::now().timestamp_millis()));
        self.stamps.write().insert(id.to_string(), stamp);
    }

    /// Drop the record for `id`. Forgetting an unknown id is a no-op.
    pub fn forget(&self, id: &str) {
        self.stamps.write().remove(id);
    }

    /// Record a consumer access. Unconditional for registered ids; a touch
    /// racing a stop may land after `forget` and is silently dropped, which
    /// never resurrects a terminated session's bookkeeping.
    pub fn touch(&self, id: &str) {
        if let Some(stamp) = self.stamps.read().get(id) {
            stamp.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }

    pub fn last_access(&self, id: &str) -> Option<DateTime<Utc>> {
        let millis = self
            .stamps
            .read()
            .get(id)
            .map(|stamp| stamp.load(Ordering::Relaxed))?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Time since the last access, measured against `now`. Clamped to zero
    /// when a touch lands between reading `now` and the stamp.
    pub fn idle_duration(&self, id: &str, now: DateTime<Utc>) -> Option<std::time::Duration> {
        let last = self.last_access(id)?;
        Some((now - last).to_std().unwrap_or_default())
    }
}

impl Default for AccessTracker {
    fn default() -> Self {
        Self::new()
    }
}
