//! Priority queue of planned events keyed by schedulable unit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;

use super::duration::Duration;
use super::superdense::SuperdenseTime;
use super::TimeError;

/// Maps keys to the superdense time of their next planned event.
///
/// Each key has at most one pending entry; planning a key again replaces the
/// old entry. Keys sharing the minimal time form the imminent group, which is
/// returned in ascending key order so callers can rely on a stable tie order.
///
/// # Example
///
/// ```rust
/// use devskit::time::{Duration, SuperdenseTime, TimeQueue};
///
/// let mut queue = TimeQueue::new(SuperdenseTime::default());
/// queue.plan(2, Duration::secs(1)).unwrap();
/// queue.plan(1, Duration::secs(1)).unwrap();
/// queue.plan(3, Duration::secs(4)).unwrap();
///
/// assert_eq!(queue.imminent_duration(), Duration::secs(1));
/// assert_eq!(queue.pop_imminent(), vec![1, 2]);
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct TimeQueue<K> {
    now: SuperdenseTime,
    by_time: BTreeMap<SuperdenseTime, BTreeSet<K>>,
    by_key: HashMap<K, SuperdenseTime>,
}

impl<K: Ord + Hash + Clone> TimeQueue<K> {
    /// Creates an empty queue whose current time is `now`.
    pub fn new(now: SuperdenseTime) -> Self {
        Self {
            now,
            by_time: BTreeMap::new(),
            by_key: HashMap::new(),
        }
    }

    /// The time planned durations are measured from.
    pub fn now(&self) -> SuperdenseTime {
        self.now
    }

    /// Moves the current time forward. Moving backwards is an error.
    pub fn advance_time(&mut self, now: SuperdenseTime) -> Result<(), TimeError> {
        if now < self.now {
            return Err(TimeError::Regression {
                from: self.now,
                to: now,
            });
        }
        self.now = now;
        Ok(())
    }

    /// Plans `key` to fire `dt` after the current time.
    ///
    /// A zero duration lands on the next micro-step of the current coordinate.
    /// An infinite duration cancels any pending entry and returns `None`.
    pub fn plan(&mut self, key: K, dt: Duration) -> Result<Option<SuperdenseTime>, TimeError> {
        if dt.is_infinite() {
            self.cancel(&key);
            return Ok(None);
        }
        let at = self.now.after(dt)?;
        self.plan_at(key, at);
        Ok(Some(at))
    }

    /// Plans `key` at an absolute superdense time.
    pub fn plan_at(&mut self, key: K, at: SuperdenseTime) {
        self.cancel(&key);
        self.by_time.entry(at).or_default().insert(key.clone());
        self.by_key.insert(key, at);
    }

    /// Removes the pending entry for `key`. Returns false if there was none.
    pub fn cancel(&mut self, key: &K) -> bool {
        let Some(at) = self.by_key.remove(key) else {
            return false;
        };
        if let Some(group) = self.by_time.get_mut(&at) {
            group.remove(key);
            if group.is_empty() {
                self.by_time.remove(&at);
            }
        }
        true
    }

    /// The minimal pending time, if any.
    pub fn imminent_time(&self) -> Option<SuperdenseTime> {
        self.by_time.keys().next().copied()
    }

    /// Keys planned at the minimal pending time, in ascending order.
    pub fn imminent_keys(&self) -> impl Iterator<Item = &K> {
        self.by_time.values().next().into_iter().flatten()
    }

    /// Removes and returns every key planned at the minimal pending time.
    pub fn pop_imminent(&mut self) -> Vec<K> {
        let Some((_, group)) = self.by_time.pop_first() else {
            return Vec::new();
        };
        for key in &group {
            self.by_key.remove(key);
        }
        group.into_iter().collect()
    }

    /// Removes and returns every key planned at or before `now`, in time order
    /// and ascending key order within a time.
    pub fn pop_due(&mut self, now: SuperdenseTime) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(first) = self.by_time.first_key_value().map(|(at, _)| *at) {
            if first > now {
                break;
            }
            due.extend(self.pop_imminent());
        }
        due
    }

    /// Coordinate distance from the current time to the imminent entry.
    ///
    /// Zero when the imminent entry shares the current coordinate, infinite
    /// when the queue is empty.
    pub fn imminent_duration(&self) -> Duration {
        match self.imminent_time() {
            Some(at) if at.t() > self.now.t() => at.t().gap(self.now.t()),
            Some(_) => Duration::ZERO,
            None => Duration::INFINITE,
        }
    }

    /// The pending time for `key`.
    pub fn planned_time(&self, key: &K) -> Option<SuperdenseTime> {
        self.by_key.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Drops every pending entry.
    pub fn clear(&mut self) {
        self.by_time.clear();
        self.by_key.clear();
    }
}
