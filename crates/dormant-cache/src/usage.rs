//! In-use / idle bookkeeping for idle-timeout passivation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::key::SessionKey;

#[derive(Debug, Clone, Copy)]
struct Usage {
    in_use: bool,
    idle_since: Instant,
}

/// Tracks which sessions are checked out and how long the rest have been idle.
#[derive(Debug)]
pub struct UsageTracker {
    usage: HashMap<SessionKey, Usage>,

    /// Idle duration after which a session becomes a sweep candidate.
    /// `None` disables time-based passivation.
    idle_timeout: Option<Duration>,
}

impl UsageTracker {
    /// Create a tracker with the given idle timeout.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            usage: HashMap::new(),
            idle_timeout,
        }
    }

    /// Record that a session has been checked out.
    pub fn mark_in_use(&mut self, key: &SessionKey) {
        self.usage
            .entry(*key)
            .and_modify(|u| u.in_use = true)
            .or_insert(Usage {
                in_use: true,
                idle_since: Instant::now(),
            });
    }

    /// Record that a session is idle as of now (resets its idle timer).
    pub fn mark_idle(&mut self, key: &SessionKey) {
        self.usage.insert(
            *key,
            Usage {
                in_use: false,
                idle_since: Instant::now(),
            },
        );
    }

    /// Stop tracking a session (passivated or removed).
    pub fn forget(&mut self, key: &SessionKey) {
        self.usage.remove(key);
    }

    /// Whether the session is currently checked out.
    pub fn is_in_use(&self, key: &SessionKey) -> bool {
        self.usage.get(key).is_some_and(|u| u.in_use)
    }

    /// Whether an idle session has exceeded the idle timeout at `now`.
    pub fn is_expired(&self, key: &SessionKey, now: Instant) -> bool {
        match (self.idle_timeout, self.usage.get(key)) {
            (Some(timeout), Some(u)) => {
                !u.in_use && now.saturating_duration_since(u.idle_since) > timeout
            }
            _ => false,
        }
    }

    /// Idle sessions whose idle time exceeds the timeout, longest idle first.
    pub fn sweep(&self, now: Instant) -> Vec<SessionKey> {
        let Some(timeout) = self.idle_timeout else {
            return Vec::new();
        };

        let mut expired: Vec<(SessionKey, Instant)> = self
            .usage
            .iter()
            .filter(|(_, u)| !u.in_use && now.saturating_duration_since(u.idle_since) > timeout)
            .map(|(key, u)| (*key, u.idle_since))
            .collect();
        expired.sort_by_key(|(_, since)| *since);
        expired.into_iter().map(|(key, _)| key).collect()
    }

    /// Number of tracked sessions that are idle.
    pub fn idle_count(&self) -> usize {
        self.usage.values().filter(|u| !u.in_use).count()
    }

    /// Number of tracked sessions that are checked out.
    pub fn in_use_count(&self) -> usize {
        self.usage.values().filter(|u| u.in_use).count()
    }

    /// Get the number of tracked sessions.
    pub fn len(&self) -> usize {
        self.usage.len()
    }

    /// Check if there are no tracked sessions.
    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }

    /// Get the configured idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }
}
