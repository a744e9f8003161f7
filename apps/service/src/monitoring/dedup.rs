use std::collections::HashMap;
use std::sync::Mutex;

/// Ongoing failure streak of one logical check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Streak {
    /// Unix timestamp of the first failure
    pub since: i64,
    /// Number of consecutive failures
    pub failures: u64,
}

/// Alert lifecycle decision for a single outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    pub is_dedup: bool,
    pub recovered: bool,
}

/// Failure streaks keyed by result identity
#[derive(Debug, Default)]
pub struct DedupState {
    streaks: Mutex<HashMap<String, Streak>>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome for `identity` and decide how it should be reported.
    ///
    /// The lookup and the update happen under one lock.
    pub fn record(&self, identity: &str, passed: bool, now: i64) -> Verdict {
        let mut streaks = self.streaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if passed {
            return match streaks.remove(identity) {
                Some(_) => Verdict { is_dedup: false, recovered: true },
                None => Verdict::default(),
            };
        }

        if let Some(streak) = streaks.get_mut(identity) {
            streak.failures += 1;
            Verdict { is_dedup: true, recovered: false }
        } else {
            streaks.insert(identity.to_string(), Streak { since: now, failures: 1 });
            Verdict::default()
        }
    }

    /// Current streak for `identity`, if the check is failing
    pub fn streak(&self, identity: &str) -> Option<Streak> {
        let streaks = self.streaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        streaks.get(identity).cloned()
    }

    /// Number of checks currently in a failure streak
    pub fn failing(&self) -> usize {
        self.streaks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
