use super::clock::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: String,
    pub args: String,
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    computed_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match (now - self.computed_at).to_std() {
            Ok(age) => age < self.ttl,
            // clock went backwards; the entry cannot be older than its ttl
            Err(_) => true,
        }
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<CacheEntry>>>;

/// What a cached call produced, and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T, E> {
    pub value: Result<T, E>,
    pub computed_at: DateTime<Utc>,
    pub from_cache: bool,
}

impl<T, E> Cached<T, E> {
    pub fn is_failure(&self) -> bool {
        self.value.is_err()
    }

    /// A failure that was computed earlier and is being replayed.
    pub fn is_cached_failure(&self) -> bool {
        self.from_cache && self.is_failure()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.value
    }
}

/// Memoizes operation results per `(operation, arguments)` for a bounded time.
///
/// Failures are stored like successes so a known-down source is not hammered
/// within the ttl; [`Cached::is_failure`] tells them apart. Calls for the same
/// key are serialized, so concurrent callers share one computation.
pub struct ResultCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    clock: Arc<dyn Clock>,
    max_ttl: Duration,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn Clock>, max_ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock,
            max_ttl,
        }
    }

    fn slot(&self, key: &CacheKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Returns the stored result for `(operation, args)` while it is younger
    /// than `ttl`, otherwise runs `compute` and stores what it returns.
    pub async fn cached<A, T, E, F, Fut>(
        &self,
        operation: &str,
        args: &A,
        ttl: Duration,
        compute: F,
    ) -> Cached<T, E>
    where
        A: Serialize + ?Sized,
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ttl = ttl.min(self.max_ttl);
        let key = match serde_json::to_string(args) {
            Ok(args) => CacheKey {
                operation: operation.to_string(),
                args,
            },
            Err(e) => {
                warn!(operation, error = %e, "Cannot build cache key, bypassing cache");
                let value = compute().await;
                return Cached {
                    value,
                    computed_at: self.clock.now(),
                    from_cache: false,
                };
            }
        };

        let slot = self.slot(&key);
        let mut entry = slot.lock().await;

        if let Some(existing) = entry.as_ref() {
            if existing.is_fresh(self.clock.now()) {
                if let Some(value) = existing.value.downcast_ref::<Result<T, E>>() {
                    debug!(operation, args = %key.args, "Cache HIT");
                    return Cached {
                        value: value.clone(),
                        computed_at: existing.computed_at,
                        from_cache: true,
                    };
                }
            } else {
                debug!(operation, args = %key.args, "Cache entry expired");
            }
        }

        debug!(operation, args = %key.args, "Cache MISS");
        let value = compute().await;
        let computed_at = self.clock.now();
        *entry = Some(CacheEntry {
            value: Arc::new(value.clone()),
            computed_at,
            ttl,
        });
        debug!(operation, args = %key.args, failed = value.is_err(), "Cache PUT");

        Cached {
            value,
            computed_at,
            from_cache: false,
        }
    }

    /// Drops every entry of `operation`. Returns how many were dropped.
    pub fn invalidate(&self, operation: &str) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|key, _| key.operation != operation);
        let removed = before - slots.len();
        debug!(operation, removed, "Cache INVALIDATE");
        removed
    }

    pub fn invalidate_all(&self) {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("Cache CLEAR");
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
