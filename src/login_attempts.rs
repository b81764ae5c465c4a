//! Brute-force login throttle.
//!
//! Counts consecutive failed logins per identity and derives a lockout
//! window from the count. Records live in a sharded concurrent map so
//! that updates for distinct identities never contend on one lock; the
//! map's entry API makes each increment an atomic read-modify-write
//! for its key. Lock expiry is computed on read and never stored.
//!
//! State is process-local: a restart clears every record.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::LockoutPolicy;

/// Failure history for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub failure_count: u32,
    pub last_failure: Instant,
}

/// Observable throttle state for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// No failures on record.
    Clear,
    /// Failures recorded, attempts still allowed.
    Warned { failures: u32 },
    /// Attempts refused until `until`.
    Locked { failures: u32, until: Instant },
}

pub struct LoginAttemptTracker {
    records: DashMap<String, AttemptRecord>,
    policy: LockoutPolicy,
}

impl LoginAttemptTracker {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            records: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Whether attempts for `identity` are currently refused.
    pub fn is_blocked(&self, identity: &str) -> bool {
        self.is_blocked_at(identity, Instant::now())
    }

    pub fn is_blocked_at(&self, identity: &str, now: Instant) -> bool {
        matches!(self.state_at(identity, now), AttemptState::Locked { .. })
    }

    pub fn state(&self, identity: &str) -> AttemptState {
        self.state_at(identity, Instant::now())
    }

    pub fn state_at(&self, identity: &str, now: Instant) -> AttemptState {
        // Copy out so the shard read guard is released immediately.
        let Some(record) = self.records.get(identity).map(|r| *r) else {
            return AttemptState::Clear;
        };

        if record.failure_count < self.policy.max_attempts {
            return AttemptState::Warned {
                failures: record.failure_count,
            };
        }

        let until = record.last_failure + self.window_for(record.failure_count);
        if now < until {
            AttemptState::Locked {
                failures: record.failure_count,
                until,
            }
        } else {
            AttemptState::Warned {
                failures: record.failure_count,
            }
        }
    }

    /// Record one failed attempt. Returns the new failure count.
    pub fn record_failure(&self, identity: &str) -> u32 {
        self.record_failure_at(identity, Instant::now())
    }

    pub fn record_failure_at(&self, identity: &str, now: Instant) -> u32 {
        // The shard write guard is held only for this statement.
        let count = self
            .records
            .entry(identity.to_string())
            .and_modify(|record| {
                record.failure_count = record.failure_count.saturating_add(1);
                record.last_failure = now;
            })
            .or_insert(AttemptRecord {
                failure_count: 1,
                last_failure: now,
            })
            .failure_count;

        if count >= self.policy.max_attempts {
            tracing::warn!(
                identity,
                failures = count,
                window_ms = self.window_for(count).as_millis() as u64,
                "Login identity locked out"
            );
        } else {
            tracing::debug!(identity, failures = count, "Failed login recorded");
        }
        count
    }

    /// Forget all failures for `identity` (successful authentication).
    pub fn reset(&self, identity: &str) {
        self.records.remove(identity);
    }

    /// Current failure count (0 for unknown identities).
    pub fn failure_count(&self, identity: &str) -> u32 {
        self.records
            .get(identity)
            .map(|r| r.failure_count)
            .unwrap_or(0)
    }

    /// Lockout window for a given failure count.
    ///
    /// Linear in the number of failures past the threshold, bounded by
    /// `max_backoff`. Zero below the threshold.
    pub fn window_for(&self, failure_count: u32) -> Duration {
        if failure_count < self.policy.max_attempts {
            return Duration::ZERO;
        }
        let steps = failure_count - self.policy.max_attempts + 1;
        self.policy
            .backoff_base
            .checked_mul(steps)
            .map_or(self.policy.max_backoff, |w| w.min(self.policy.max_backoff))
    }

    /// Drop records that are idle for at least `idle_for` and not locked.
    /// Returns the number of records removed.
    pub fn prune_idle(&self, idle_for: Duration) -> usize {
        self.prune_idle_at(idle_for, Instant::now())
    }

    pub fn prune_idle_at(&self, idle_for: Duration, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            let idle = now.saturating_duration_since(record.last_failure);
            let window = self.window_for(record.failure_count);
            idle < idle_for || idle < window
        });
        before.saturating_sub(self.records.len())
    }

    /// Number of identities with failures on record.
    pub fn tracked_identities(&self) -> usize {
        self.records.len()
    }
}

impl Default for LoginAttemptTracker {
    fn default() -> Self {
        Self::new(LockoutPolicy::default())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker() -> LoginAttemptTracker {
        LoginAttemptTracker::default()
    }

    fn fail_n(tracker: &LoginAttemptTracker, identity: &str, n: u32, at: Instant) {
        for _ in 0..n {
            tracker.record_failure_at(identity, at);
        }
    }

    #[test]
    fn unknown_identity_is_never_blocked() {
        let t = tracker();
        assert!(!t.is_blocked("nobody"));
        assert_eq!(t.state("nobody"), AttemptState::Clear);
        assert_eq!(t.failure_count("nobody"), 0);
    }

    #[test]
    fn four_failures_warn_but_do_not_block() {
        let t = tracker();
        let now = Instant::now();
        fail_n(&t, "alice", 4, now);
        assert!(!t.is_blocked_at("alice", now));
        assert_eq!(t.state_at("alice", now), AttemptState::Warned { failures: 4 });
    }

    #[test]
    fn fifth_failure_blocks_immediately() {
        let t = tracker();
        let now = Instant::now();
        fail_n(&t, "alice", 5, now);
        assert!(t.is_blocked_at("alice", now));
        assert!(matches!(
            t.state_at("alice", now),
            AttemptState::Locked { failures: 5, .. }
        ));
    }

    #[test]
    fn lock_lapses_after_window_without_reset() {
        let t = tracker();
        let start = Instant::now();
        fail_n(&t, "alice", 5, start);

        assert!(t.is_blocked_at("alice", start + Duration::from_millis(1999)));
        assert!(!t.is_blocked_at("alice", start + Duration::from_secs(2)));
        // Counter survives expiry
        assert_eq!(t.failure_count("alice"), 5);
    }

    #[test]
    fn window_grows_linearly_past_threshold() {
        let t = tracker();
        assert_eq!(t.window_for(4), Duration::ZERO);
        assert_eq!(t.window_for(5), Duration::from_secs(2));
        assert_eq!(t.window_for(6), Duration::from_secs(4));
        assert_eq!(t.window_for(10), Duration::from_secs(12));

        let start = Instant::now();
        fail_n(&t, "bob", 7, start);
        assert!(t.is_blocked_at("bob", start + Duration::from_secs(5)));
        assert!(!t.is_blocked_at("bob", start + Duration::from_secs(6)));
    }

    #[test]
    fn window_is_capped() {
        let t = LoginAttemptTracker::new(LockoutPolicy {
            max_backoff: Duration::from_secs(10),
            ..LockoutPolicy::default()
        });
        assert_eq!(t.window_for(1_000), Duration::from_secs(10));
        assert_eq!(t.window_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn reset_clears_block_and_restarts_count() {
        let t = tracker();
        let now = Instant::now();
        fail_n(&t, "alice", 6, now);
        assert!(t.is_blocked_at("alice", now));

        t.reset("alice");
        assert!(!t.is_blocked_at("alice", now));
        assert_eq!(t.state_at("alice", now), AttemptState::Clear);

        assert_eq!(t.record_failure_at("alice", now), 1);
    }

    #[test]
    fn identities_are_independent() {
        let t = tracker();
        let now = Instant::now();
        fail_n(&t, "alice", 5, now);
        fail_n(&t, "bob", 1, now);
        assert!(t.is_blocked_at("alice", now));
        assert!(!t.is_blocked_at("bob", now));
        assert_eq!(t.tracked_identities(), 2);
    }

    #[test]
    fn concurrent_failures_are_not_lost() {
        let t = Arc::new(tracker());
        let handles: Vec<_> = (0..100)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || {
                    t.record_failure("alice");
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.failure_count("alice"), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_failures_across_tasks() {
        let t = Arc::new(tracker());
        let mut tasks = Vec::new();
        for i in 0..400 {
            let t = Arc::clone(&t);
            tasks.push(tokio::spawn(async move {
                t.record_failure(&format!("user-{}", i % 4));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        for i in 0..4 {
            assert_eq!(t.failure_count(&format!("user-{i}")), 100);
        }
    }

    #[test]
    fn prune_keeps_locked_and_recent_records() {
        let t = tracker();
        let start = Instant::now();
        fail_n(&t, "stale", 1, start);
        fail_n(&t, "locked", 200, start);

        let later = start + Duration::from_secs(120);
        fail_n(&t, "recent", 1, later);

        let removed = t.prune_idle_at(Duration::from_secs(60), later);
        assert_eq!(removed, 1);
        assert_eq!(t.failure_count("stale"), 0);
        assert_eq!(t.failure_count("locked"), 200);
        assert_eq!(t.failure_count("recent"), 1);
    }
}
