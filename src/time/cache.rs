//! Last-event bookkeeping.

use std::collections::HashMap;
use std::hash::Hash;

use super::duration::Duration;
use super::point::TimePoint;
use super::superdense::SuperdenseTime;
use super::TimeError;

/// Remembers when each retained key last had an event, so the elapsed
/// duration handed to its next event can be computed from the current time.
#[derive(Clone, Debug)]
pub struct TimeCache<K> {
    now: TimePoint,
    retained: HashMap<K, TimePoint>,
}

impl<K: Eq + Hash> TimeCache<K> {
    pub fn new(now: TimePoint) -> Self {
        Self {
            now,
            retained: HashMap::new(),
        }
    }

    pub fn now(&self) -> TimePoint {
        self.now
    }

    /// Moves the current time forward.
    pub fn advance_time(&mut self, now: TimePoint) -> Result<(), TimeError> {
        if now < self.now {
            return Err(TimeError::Regression {
                from: SuperdenseTime::at(self.now),
                to: SuperdenseTime::at(now),
            });
        }
        self.now = now;
        Ok(())
    }

    /// Records an event for `key` at the current time.
    pub fn retain_event(&mut self, key: K) {
        self.retained.insert(key, self.now);
    }

    /// Forgets `key`. Returns the time of its last event, if it was retained.
    pub fn release_event(&mut self, key: &K) -> Option<TimePoint> {
        self.retained.remove(key)
    }

    /// Time since the last retained event of `key`.
    pub fn duration_since(&self, key: &K) -> Option<Duration> {
        self.retained.get(key).map(|t| self.now.gap(*t))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.retained.contains_key(key)
    }
}
