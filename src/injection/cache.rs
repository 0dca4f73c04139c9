use crate::error::RetrievalError;
use crate::query::Query;
use crate::services::retrieval::RetrievalResult;

/// What a finished fetch left behind for its query
#[derive(Debug, Clone, PartialEq)]
pub enum CachedOutcome {
    Context(RetrievalResult),
    /// Replayed as "no result" for the rest of the turn that produced it
    Failed(RetrievalError),
}

impl From<Result<RetrievalResult, RetrievalError>> for CachedOutcome {
    fn from(outcome: Result<RetrievalResult, RetrievalError>) -> Self {
        match outcome {
            Ok(result) => Self::Context(result),
            Err(error) => Self::Failed(error),
        }
    }
}

/// Identifies which settings generation, turn and fetch produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStamp {
    pub epoch: u64,
    pub turn: u64,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    query: Query,
    sequence: u64,
    outcome: CachedOutcome,
}

/// Single-slot cache holding the outcome for the most recent query
#[derive(Debug, Default)]
pub struct ResultCache {
    slot: Option<CacheEntry>,
    epoch: u64,
    turn: u64,
}

impl ResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, query: &Query) -> Option<&CachedOutcome> {
        self.slot
            .as_ref()
            .filter(|entry| &entry.query == query)
            .map(|entry| &entry.outcome)
    }

    /// Stores an outcome unless it was produced under older settings or a
    /// newer fetch already filled the slot. Failures are only kept when they
    /// land in the turn that started them. Returns whether it was stored.
    pub fn put(&mut self, query: Query, stamp: CacheStamp, outcome: CachedOutcome) -> bool {
        if stamp.epoch != self.epoch {
            tracing::debug!(query = %query, "discarding outcome fetched under stale settings");
            return false;
        }
        if matches!(outcome, CachedOutcome::Failed(_)) && stamp.turn != self.turn {
            tracing::debug!(query = %query, "discarding failure from an earlier turn");
            return false;
        }
        if let Some(entry) = &self.slot
            && entry.sequence > stamp.sequence
        {
            return false;
        }
        self.slot = Some(CacheEntry {
            query,
            sequence: stamp.sequence,
            outcome,
        });
        true
    }

    /// Drops a cached failure as soon as a different query comes along
    pub fn note_query(&mut self, query: &Query) {
        if let Some(entry) = &self.slot
            && &entry.query != query
            && matches!(entry.outcome, CachedOutcome::Failed(_))
        {
            self.slot = None;
        }
    }

    /// Ends the current turn; a cached failure does not outlive it
    pub fn begin_turn(&mut self) {
        self.turn = self.turn.wrapping_add(1);
        if self
            .slot
            .as_ref()
            .is_some_and(|entry| matches!(entry.outcome, CachedOutcome::Failed(_)))
        {
            self.slot = None;
        }
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
        self.epoch = self.epoch.wrapping_add(1);
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub fn turn(&self) -> u64 {
        self.turn
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(text: &str) -> Query {
        match Query::parse(text, 1) {
            Some(query) => query,
            None => panic!("test query must be non-empty"),
        }
    }

    fn stamp(cache: &ResultCache, sequence: u64) -> CacheStamp {
        CacheStamp {
            epoch: cache.epoch(),
            turn: cache.turn(),
            sequence,
        }
    }

    #[test]
    fn test_exact_query_key() {
        let mut cache = ResultCache::new();
        let outcome = CachedOutcome::Context(RetrievalResult::from_texts(["lore"]));
        assert!(cache.put(query("cats"), stamp(&cache, 1), outcome.clone()));
        assert_eq!(cache.get(&query("cats")), Some(&outcome));
        assert_eq!(cache.get(&query("Cats")), None);
    }

    #[test]
    fn test_single_slot_keeps_last_query_only() {
        let mut cache = ResultCache::new();
        cache.put(query("cats"), stamp(&cache, 1), CachedOutcome::Context(RetrievalResult::from_texts(["c"])));
        cache.put(query("dogs"), stamp(&cache, 2), CachedOutcome::Context(RetrievalResult::from_texts(["d"])));
        assert!(cache.get(&query("cats")).is_none());
        assert!(cache.get(&query("dogs")).is_some());
    }

    #[test]
    fn test_invalidate_rejects_stale_writers() {
        let mut cache = ResultCache::new();
        let old = stamp(&cache, 1);
        cache.invalidate();
        assert!(!cache.put(query("cats"), old, CachedOutcome::Failed(RetrievalError::EmptyResult)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_late_superseded_fetch_does_not_evict_newer() {
        let mut cache = ResultCache::new();
        assert!(cache.put(query("dogs"), stamp(&cache, 2), CachedOutcome::Context(RetrievalResult::from_texts(["d"]))));
        assert!(!cache.put(query("cats"), stamp(&cache, 1), CachedOutcome::Context(RetrievalResult::from_texts(["c"]))));
        assert!(cache.get(&query("dogs")).is_some());
    }

    #[test]
    fn test_failure_dropped_on_distinct_query() {
        let mut cache = ResultCache::new();
        let failure = CachedOutcome::Failed(RetrievalError::Timeout { timeout_ms: 10 });
        cache.put(query("cats"), stamp(&cache, 1), failure.clone());

        cache.note_query(&query("cats"));
        assert_eq!(cache.get(&query("cats")), Some(&failure));

        cache.note_query(&query("dogs"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failure_does_not_outlive_its_turn() {
        let mut cache = ResultCache::new();
        let failure = CachedOutcome::Failed(RetrievalError::HttpStatus {
            status: 500,
            body: "boom".to_string(),
        });
        cache.put(query("cats"), stamp(&cache, 1), failure.clone());
        assert_eq!(cache.get(&query("cats")), Some(&failure));

        cache.begin_turn();
        assert!(cache.get(&query("cats")).is_none());
    }

    #[test]
    fn test_result_survives_new_turn() {
        let mut cache = ResultCache::new();
        let outcome = CachedOutcome::Context(RetrievalResult::from_texts(["lore"]));
        cache.put(query("cats"), stamp(&cache, 1), outcome.clone());
        cache.begin_turn();
        assert_eq!(cache.get(&query("cats")), Some(&outcome));
    }

    #[test]
    fn test_late_failure_from_earlier_turn_is_dropped() {
        let mut cache = ResultCache::new();
        let started = stamp(&cache, 1);
        cache.begin_turn();
        assert!(!cache.put(
            query("cats"),
            started,
            CachedOutcome::Failed(RetrievalError::Timeout { timeout_ms: 10 })
        ));
        assert!(cache.put(query("cats"), started, CachedOutcome::Context(RetrievalResult::from_texts(["c"]))));
    }
}
