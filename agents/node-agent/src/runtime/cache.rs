//! Cached Value
//!
//! Time-boxed memoization cell used to keep runtime lookups off the wire
//! between refresh intervals.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

struct Loaded<T> {
    value: T,
    at: Instant,
}

/// A value that is reloaded once it is older than its time-to-live.
///
/// The cell is owned by a single caller and mutated through `&mut self`.
/// A failed load leaves the previous value and its load time untouched, so
/// the next call retries the load from the same staleness basis.
pub struct CachedValue<T> {
    loaded: Option<Loaded<T>>,
    ttl: Duration,
}

impl<T> CachedValue<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { loaded: None, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when nothing has been loaded yet or the ttl has elapsed since the last load.
    pub fn is_stale(&self) -> bool {
        match &self.loaded {
            Some(loaded) => Instant::now() >= loaded.at + self.ttl,
            None => true,
        }
    }

    /// Last successfully loaded value, regardless of age.
    pub fn peek(&self) -> Option<&T> {
        self.loaded.as_ref().map(|loaded| &loaded.value)
    }

    /// Return the cached value, running `load` first if it is stale.
    ///
    /// Errors from `load` are returned to this caller only and never cached.
    pub async fn get<F, Fut, E>(&mut self, load: F) -> Result<&T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let loaded = match self.loaded.take() {
            Some(loaded) if Instant::now() < loaded.at + self.ttl => loaded,
            previous => {
                // put the old entry back before awaiting so a failed load leaves it intact
                self.loaded = previous;
                let value = load().await?;
                Loaded {
                    value,
                    at: Instant::now(),
                }
            }
        };

        Ok(&self.loaded.insert(loaded).value)
    }

    /// Drop the cached value so the next `get` reloads.
    pub fn invalidate(&mut self) {
        self.loaded = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const TTL: Duration = Duration::from_secs(600);

    async fn counted(calls: &Cell<u32>, value: u32) -> Result<u32, String> {
        calls.set(calls.get() + 1);
        Ok(value)
    }

    async fn failing(calls: &Cell<u32>) -> Result<u32, String> {
        calls.set(calls.get() + 1);
        Err("runtime unavailable".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_loads_once_within_ttl() {
        let calls = Cell::new(0);
        let mut cache = CachedValue::new(TTL);

        assert_eq!(*cache.get(|| counted(&calls, 1)).await.unwrap(), 1);
        tokio::time::advance(TTL - Duration::from_secs(1)).await;
        assert_eq!(*cache.get(|| counted(&calls, 2)).await.unwrap(), 1);

        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloads_once_ttl_elapsed() {
        let calls = Cell::new(0);
        let mut cache = CachedValue::new(TTL);

        cache.get(|| counted(&calls, 1)).await.unwrap();
        tokio::time::advance(TTL).await;
        assert!(cache.is_stale());

        assert_eq!(*cache.get(|| counted(&calls, 2)).await.unwrap(), 2);
        assert_eq!(*cache.get(|| counted(&calls, 3)).await.unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reload_keeps_previous_value() {
        let calls = Cell::new(0);
        let mut cache = CachedValue::new(TTL);

        cache.get(|| counted(&calls, 7)).await.unwrap();
        tokio::time::advance(TTL).await;

        let err = cache.get(|| failing(&calls)).await.unwrap_err();
        assert_eq!(err, "runtime unavailable");
        assert_eq!(cache.peek(), Some(&7));

        // still stale: the next call tries again
        assert!(cache.is_stale());
        assert_eq!(*cache.get(|| counted(&calls, 8)).await.unwrap(), 8);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_load_caches_nothing() {
        let calls = Cell::new(0);
        let mut cache: CachedValue<u32> = CachedValue::new(TTL);

        assert!(cache.get(|| failing(&calls)).await.is_err());
        assert!(cache.peek().is_none());
        assert!(cache.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_value_is_still_cached() {
        let calls = Cell::new(0);
        let mut cache: CachedValue<Vec<u32>> = CachedValue::new(TTL);

        let load = |calls: &Cell<u32>| {
            calls.set(calls.get() + 1);
            async { Ok::<_, String>(Vec::new()) }
        };

        assert!(cache.get(|| load(&calls)).await.unwrap().is_empty());
        assert!(cache.get(|| load(&calls)).await.unwrap().is_empty());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_reload() {
        let calls = Cell::new(0);
        let mut cache = CachedValue::new(TTL);

        cache.get(|| counted(&calls, 1)).await.unwrap();
        cache.invalidate();
        assert_eq!(*cache.get(|| counted(&calls, 2)).await.unwrap(), 2);
        assert_eq!(calls.get(), 2);
    }
}
