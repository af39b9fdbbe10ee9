//! Key-ordered state store abstraction
//!
//! The pipeline only needs sorted sets (members ordered by a numeric
//! score, range queries by score or rank) plus per-key expiry. That
//! surface is the [`StateStore`] trait; a networked backend implements it
//! outside this crate. [`MemoryStore`] is the in-process implementation,
//! with expiry evaluated lazily against the injected clock.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use types::time::{duration_to_nanos, Clock};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage operation {op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("stored value could not be decoded: {0}")]
    Codec(String),
}

/// Inclusive score range, optionally exclusive at the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub max_exclusive: bool,
}

impl ScoreRange {
    pub fn all() -> Self {
        Self::inclusive(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn inclusive(min: f64, max: f64) -> Self {
        Self { min, max, max_exclusive: false }
    }

    /// Every score strictly below `max`.
    pub fn below(max: f64) -> Self {
        Self { min: f64::NEG_INFINITY, max, max_exclusive: true }
    }

    /// Exactly one score.
    pub fn at(score: f64) -> Self {
        Self::inclusive(score, score)
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.min && if self.max_exclusive { score < self.max } else { score <= self.max }
    }
}

/// Sorted-set store with per-key expiry.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Add or re-score a member. Returns true if the member is new.
    async fn zadd(&self, key: &str, score: f64, member: String) -> Result<bool, StorageError>;

    /// Members within `range`, ascending by score.
    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
    ) -> Result<Vec<(f64, String)>, StorageError>;

    async fn zrem_range_by_score(&self, key: &str, range: ScoreRange)
        -> Result<usize, StorageError>;

    /// Remove members by rank, both ends inclusive. Negative ranks count
    /// from the highest score (-1 is the last member).
    async fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64)
        -> Result<usize, StorageError>;

    async fn zcard(&self, key: &str) -> Result<usize, StorageError>;

    /// Set a time-to-live. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    async fn del(&self, key: &str) -> Result<bool, StorageError>;
}

#[derive(Debug, Default)]
struct SortedSet {
    /// Ascending by (score, member).
    members: Vec<(f64, String)>,
    expires_at: Option<i64>,
}

impl SortedSet {
    fn position(&self, score: f64, member: &str) -> usize {
        self.members
            .partition_point(|(s, m)| compare(*s, m, score, member) == Ordering::Less)
    }
}

fn compare(a_score: f64, a_member: &str, b_score: f64, b_member: &str) -> Ordering {
    a_score.total_cmp(&b_score).then_with(|| a_member.cmp(b_member))
}

/// In-process [`StateStore`].
pub struct MemoryStore {
    sets: Mutex<HashMap<String, SortedSet>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, SortedSet>>, StorageError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))?;
        let now = self.clock.now_nanos();
        sets.retain(|_, set| set.expires_at.map_or(true, |at| at > now));
        Ok(sets)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn zadd(&self, key: &str, score: f64, member: String) -> Result<bool, StorageError> {
        let mut sets = self.lock()?;
        let set = sets.entry(key.to_string()).or_default();
        let existing = set.members.iter().position(|(_, m)| *m == member);
        if let Some(idx) = existing {
            set.members.remove(idx);
        }
        let idx = set.position(score, &member);
        set.members.insert(idx, (score, member));
        Ok(existing.is_none())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
    ) -> Result<Vec<(f64, String)>, StorageError> {
        let sets = self.lock()?;
        Ok(sets
            .get(key)
            .map(|set| {
                set.members
                    .iter()
                    .filter(|(score, _)| range.contains(*score))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        range: ScoreRange,
    ) -> Result<usize, StorageError> {
        let mut sets = self.lock()?;
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.members.len();
        set.members.retain(|(score, _)| !range.contains(*score));
        let removed = before - set.members.len();
        if set.members.is_empty() {
            sets.remove(key);
        }
        Ok(removed)
    }

    async fn zrem_range_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<usize, StorageError> {
        let mut sets = self.lock()?;
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        let len = set.members.len() as i64;
        let resolve = |rank: i64| if rank < 0 { len + rank } else { rank };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(len - 1);
        if start > stop || start >= len {
            return Ok(0);
        }
        set.members.drain(start as usize..=stop as usize);
        let removed = (stop - start + 1) as usize;
        if set.members.is_empty() {
            sets.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StorageError> {
        let sets = self.lock()?;
        Ok(sets.get(key).map_or(0, |set| set.members.len()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError> {
        let now = self.clock.now_nanos();
        let mut sets = self.lock()?;
        match sets.get_mut(key) {
            Some(set) => {
                set.expires_at = Some(now.saturating_add(duration_to_nanos(ttl)));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, StorageError> {
        let mut sets = self.lock()?;
        Ok(sets.remove(key).is_some())
    }
}
