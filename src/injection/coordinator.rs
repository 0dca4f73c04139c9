//! In-flight fetch lifecycle for one generation cycle.
//!
//! `Idle → Fetching → {Resolved, Failed, Cancelled}`. Only the most recently
//! started fetch is authoritative; a superseded fetch keeps running until its
//! own timeout and may still fill the cache, but its result is never handed
//! out for injection.

use crate::config::Settings;
use crate::error::RetrievalError;
use crate::injection::cache::{CacheStamp, CachedOutcome, ResultCache};
use crate::query::Query;
use crate::services::retrieval::{RetrievalBackend, RetrievalResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

pub type FetchOutcome = Result<RetrievalResult, RetrievalError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FetchId(u64);

/// Who asked for the fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    Auto,
    Manual,
}

/// One in-flight retrieval
#[derive(Debug)]
pub struct FetchHandle {
    id: FetchId,
    query: Query,
    origin: FetchOrigin,
    task: JoinHandle<FetchOutcome>,
}

impl FetchHandle {
    #[must_use]
    pub fn id(&self) -> FetchId {
        self.id
    }

    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Aborts the request; the connection is dropped with the future.
    pub fn cancel(self) {
        self.task.abort();
    }
}

#[derive(Debug)]
pub enum FetchState {
    Idle,
    Fetching(FetchHandle),
    Resolved {
        id: FetchId,
        query: Query,
        result: RetrievalResult,
    },
    Failed {
        id: FetchId,
        query: Query,
        error: RetrievalError,
    },
    /// The cycle moved on before the fetch resolved
    Cancelled { id: FetchId, query: Query },
}

impl FetchState {
    #[must_use]
    pub fn query(&self) -> Option<&Query> {
        match self {
            Self::Idle => None,
            Self::Fetching(handle) => Some(handle.query()),
            Self::Resolved { query, .. }
            | Self::Failed { query, .. }
            | Self::Cancelled { query, .. } => Some(query),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<FetchId> {
        match self {
            Self::Idle => None,
            Self::Fetching(handle) => Some(handle.id()),
            Self::Resolved { id, .. } | Self::Failed { id, .. } | Self::Cancelled { id, .. } => {
                Some(*id)
            }
        }
    }

    #[must_use]
    pub fn is_fetching(&self) -> bool {
        matches!(self, Self::Fetching(_))
    }
}

/// What the ending cycle gets to use
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Idle,
    Context { query: Query, result: RetrievalResult },
    Failed { query: Query, error: RetrievalError },
    /// Still in flight when the prompt had to be built
    Pending { query: Query },
}

pub struct FetchCoordinator {
    backend: Arc<dyn RetrievalBackend>,
    cache: Arc<Mutex<ResultCache>>,
    state: FetchState,
    next_sequence: u64,
}

impl FetchCoordinator {
    pub fn new(backend: Arc<dyn RetrievalBackend>) -> Self {
        Self {
            backend,
            cache: Arc::new(Mutex::new(ResultCache::new())),
            state: FetchState::Idle,
            next_sequence: 1,
        }
    }

    #[must_use]
    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn invalidate_cache(&self) {
        lock(&self.cache).invalidate();
    }

    /// Starts (or reuses) the fetch for `query` and makes it authoritative.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_fetch(&mut self, query: Query, settings: &Settings, origin: FetchOrigin) -> FetchId {
        if let FetchState::Fetching(handle) = &self.state
            && handle.query == query
        {
            tracing::debug!(query = %query, "fetch already in flight");
            return handle.id;
        }

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        let id = FetchId(sequence);

        let cached = {
            let mut cache = lock(&self.cache);
            cache.note_query(&query);
            cache.get(&query).cloned()
        };

        let previous = std::mem::replace(&mut self.state, FetchState::Idle);
        if let FetchState::Fetching(stale) = previous {
            tracing::debug!(
                superseded = %stale.query,
                by = %query,
                "superseding in-flight fetch"
            );
            // Detached: it still finishes within its own timeout and may fill the cache.
            drop(stale);
        }

        if let Some(outcome) = cached {
            tracing::debug!(query = %query, "retrieval cache hit");
            self.state = match outcome {
                CachedOutcome::Context(result) => FetchState::Resolved { id, query, result },
                CachedOutcome::Failed(error) => FetchState::Failed { id, query, error },
            };
            return id;
        }

        let stamp = {
            let cache = lock(&self.cache);
            CacheStamp {
                epoch: cache.epoch(),
                turn: cache.turn(),
                sequence,
            }
        };
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let task_settings = settings.clone();
        let task_query = query.clone();
        let task = tokio::spawn(async move {
            let outcome = backend.retrieve(&task_query, &task_settings).await;
            lock(&cache).put(task_query, stamp, CachedOutcome::from(outcome.clone()));
            outcome
        });

        tracing::debug!(query = %query, ?origin, "fetch started");
        self.state = FetchState::Fetching(FetchHandle {
            id,
            query,
            origin,
            task,
        });
        id
    }

    /// Waits up to `deadline` for the authoritative fetch to settle.
    pub async fn await_result(&mut self, deadline: Duration) -> &FetchState {
        let settled = match &mut self.state {
            FetchState::Fetching(handle) => {
                match tokio::time::timeout(deadline, &mut handle.task).await {
                    Ok(joined) => Some((handle.id, handle.query.clone(), joined)),
                    Err(_elapsed) => None,
                }
            }
            _ => None,
        };

        if let Some((id, query, joined)) = settled {
            let outcome = joined.unwrap_or_else(|error| {
                Err(RetrievalError::Network(format!("fetch task ended abnormally: {}", error)))
            });
            self.state = match outcome {
                Ok(result) => FetchState::Resolved { id, query, result },
                Err(error) => FetchState::Failed { id, query, error },
            };
        }
        &self.state
    }

    /// Hands the authoritative outcome to the ending cycle and resets for the next one.
    pub fn finish_cycle(&mut self) -> CycleOutcome {
        lock(&self.cache).begin_turn();
        match std::mem::replace(&mut self.state, FetchState::Idle) {
            FetchState::Idle => CycleOutcome::Idle,
            FetchState::Cancelled { .. } => CycleOutcome::Idle,
            FetchState::Resolved { query, result, .. } => CycleOutcome::Context { query, result },
            FetchState::Failed { query, error, .. } => CycleOutcome::Failed { query, error },
            FetchState::Fetching(handle) => {
                tracing::debug!(
                    query = %handle.query,
                    origin = ?handle.origin,
                    "cycle ended before fetch resolved"
                );
                self.state = FetchState::Cancelled {
                    id: handle.id,
                    query: handle.query.clone(),
                };
                CycleOutcome::Pending {
                    query: handle.query,
                }
            }
        }
    }

    /// Drops whatever fetch is current; an in-flight one is left to finish detached.
    pub fn reset(&mut self) {
        if let FetchState::Fetching(handle) = &self.state {
            self.state = FetchState::Cancelled {
                id: handle.id,
                query: handle.query.clone(),
            };
        } else {
            self.state = FetchState::Idle;
        }
    }
}

impl Drop for FetchCoordinator {
    fn drop(&mut self) {
        if let FetchState::Fetching(handle) = std::mem::replace(&mut self.state, FetchState::Idle) {
            handle.cancel();
        }
    }
}

fn lock(cache: &Mutex<ResultCache>) -> MutexGuard<'_, ResultCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}
