//! Per-pool, per-kind alarm cooldown

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::AlarmKind;

/// Remembers when each (pool, kind) alarm last fired.
///
/// The admit decision and the timestamp update happen under the map entry
/// lock, so concurrent callers for the same key admit at most once per
/// cooldown window.
#[derive(Debug, Default)]
pub struct AlarmRateLimiter {
    last_fired: DashMap<(String, AlarmKind), Instant>,
}

impl AlarmRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit the alarm if it never fired or its cooldown has elapsed
    pub fn allow(&self, pool_id: &str, kind: AlarmKind, cooldown_minutes: u64) -> bool {
        self.allow_at(pool_id, kind, cooldown_minutes, Instant::now())
    }

    pub(crate) fn allow_at(
        &self,
        pool_id: &str,
        kind: AlarmKind,
        cooldown_minutes: u64,
        now: Instant,
    ) -> bool {
        let cooldown = Duration::from_secs(cooldown_minutes.saturating_mul(60));
        match self.last_fired.entry((pool_id.to_string(), kind)) {
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) >= cooldown {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Number of keys that have fired at least once
    pub fn tracked(&self) -> usize {
        self.last_fired.len()
    }
}
