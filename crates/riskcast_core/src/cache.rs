//! Content-addressed result cache shared between engine instances.
//!
//! Each key owns a slot mutex. The first caller for a key holds the slot
//! while it simulates; concurrent callers for the same key wait on the slot
//! and then read the stored result instead of simulating again. Failed runs
//! leave the slot empty so a later call retries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::model::SimulationResult;

type Slot = Arc<Mutex<Option<Arc<SimulationResult>>>>;

#[derive(Debug, Default)]
pub struct SimulationCache {
    slots: Mutex<FxHashMap<u64, Slot>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking run leaves at worst an empty slot
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: u64) -> Slot {
        lock(&self.slots).entry(key).or_default().clone()
    }

    /// Cached result for `key`, or the result of `run` stored under `key`.
    ///
    /// `run` is invoked at most once at a time per key.
    pub fn get_or_run<F>(&self, key: u64, run: F) -> Result<Arc<SimulationResult>>
    where
        F: FnOnce() -> Result<Arc<SimulationResult>>,
    {
        let slot = self.slot(key);
        let mut entry = lock(&slot);
        if let Some(result) = entry.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "result cache hit");
            return Ok(Arc::clone(result));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key, "result cache miss");
        let result = run()?;
        *entry = Some(Arc::clone(&result));
        Ok(result)
    }

    /// Completed result for `key`, without waiting on an in-flight run
    #[must_use]
    pub fn get(&self, key: u64) -> Option<Arc<SimulationResult>> {
        let slot = lock(&self.slots).get(&key).cloned()?;
        let entry = slot.try_lock().ok()?;
        entry.clone()
    }

    /// Drop the entry for `key`. Returns whether a completed result was removed.
    pub fn invalidate(&self, key: u64) -> bool {
        let Some(slot) = lock(&self.slots).remove(&key) else {
            return false;
        };
        lock(&slot).is_some()
    }

    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    /// Number of completed results held
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.try_lock().is_ok_and(|entry| entry.is_some()))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, SimulationError};
    use crate::model::IterationSamples;

    fn dummy(seed: u64) -> Arc<SimulationResult> {
        Arc::new(SimulationResult {
            config_hash: seed,
            seed,
            iteration_count: 0,
            convergence_status: true,
            convergence: Vec::new(),
            cost: None,
            schedule: None,
            contributions: Vec::new(),
            warnings: Vec::new(),
            samples: IterationSamples::default(),
        })
    }

    #[test]
    fn test_second_lookup_hits() {
        let cache = SimulationCache::new();
        let first = cache.get_or_run(1, || Ok(dummy(1))).unwrap();
        let second = cache
            .get_or_run(1, || panic!("should not run twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_run_is_not_cached() {
        let cache = SimulationCache::new();
        let err = cache.get_or_run(9, || Err(SimulationError::Configuration(ConfigError::NoRisks)));
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert!(cache.get(9).is_none());
        assert!(cache.get_or_run(9, || Ok(dummy(9))).is_ok());
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = SimulationCache::new();
        cache.get_or_run(1, || Ok(dummy(1))).unwrap();
        cache.get_or_run(2, || Ok(dummy(2))).unwrap();
        assert!(cache.invalidate(1));
        assert!(!cache.invalidate(1));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_callers_share_one_run() {
        let cache = Arc::new(SimulationCache::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    cache
                        .get_or_run(42, || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(dummy(42))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
