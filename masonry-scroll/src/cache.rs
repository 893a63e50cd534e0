//! Bounded, generation-checked cache of resident pages.
//!
//! The cache is owned by the domain context. Fetches run on the
//! [`FetchPool`] and their results are applied only when the domain context
//! drains the completion channel through [`PageCache::poll`], so the cache
//! itself needs no locking.
//!
//! Invariants:
//! - at most one fetch per page is in flight for the current generation;
//! - pinned pages are never evicted;
//! - a completion issued under an older generation never touches a page.
use std::{
    collections::{BTreeSet, HashMap},
    num::NonZeroUsize,
    sync::{Arc, mpsc},
    time::Duration,
};

use lru::LruCache;
use tracing::{debug, error, trace};

use crate::{
    config::MasonryConfig,
    error::{ConfigError, FetchError, ScrollError, StoreError},
    fetch_pool::{FetchCompletion, FetchJob, FetchPool},
    page::{Page, first_index},
    store::{PageStore, ViewQuery},
};

/// Something the domain context has to react to after a poll.
#[derive(Debug)]
pub enum CacheEvent {
    /// A pinned page became resident.
    PageReady(u64),
    /// A pinned page exhausted its fetch attempts.
    PageFailed {
        /// Page number.
        page: u64,
        /// Final error.
        error: FetchError,
    },
    /// The item count of the current view arrived.
    CountReady(u64),
    /// Counting the current view failed.
    CountFailed(StoreError),
}

/// Point-in-time counters of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Resident pages.
    pub resident: usize,
    /// Pinned pages.
    pub pinned: usize,
    /// Fetches awaiting completion.
    pub in_flight: usize,
    /// Pages marked failed.
    pub failed: usize,
    /// Current generation.
    pub generation: u64,
    /// Page fetches issued since creation.
    pub fetches_issued: u64,
    /// Completions dropped for carrying an old generation.
    pub stale_discards: u64,
    /// Pages evicted to respect capacity.
    pub evictions: u64,
}

/// LRU page cache with pinning.
pub struct PageCache {
    capacity: NonZeroUsize,
    page_size: usize,
    query: ViewQuery,
    generation: u64,
    pages: LruCache<u64, Arc<Page>>,
    pinned: BTreeSet<u64>,
    in_flight: HashMap<u64, u64>,
    failed: HashMap<u64, u32>,
    count_in_flight: Option<u64>,
    store: Arc<dyn PageStore>,
    completions: mpsc::Receiver<FetchCompletion>,
    pool: FetchPool,
    fetches_issued: u64,
    stale_discards: u64,
    evictions: u64,
}

impl PageCache {
    /// Creates an empty cache for `query` and starts its fetch pool.
    pub fn new(
        store: Arc<dyn PageStore>,
        config: &MasonryConfig,
        query: ViewQuery,
    ) -> Result<Self, ScrollError> {
        config.validate()?;
        let capacity =
            NonZeroUsize::new(config.cache_capacity).ok_or(ConfigError::ZeroCapacity)?;
        let (sender, completions) = mpsc::channel();
        let pool = FetchPool::spawn(Arc::clone(&store), config, sender)?;
        Ok(Self {
            capacity,
            page_size: config.page_size,
            query,
            generation: 0,
            pages: LruCache::unbounded(),
            pinned: BTreeSet::new(),
            in_flight: HashMap::new(),
            failed: HashMap::new(),
            count_in_flight: None,
            store,
            completions,
            pool,
            fetches_issued: 0,
            stale_discards: 0,
            evictions: 0,
        })
    }

    /// Pins `pages` and fetches the ones that are neither resident, in flight
    /// nor failed.
    pub fn ensure(&mut self, pages: impl IntoIterator<Item = u64>) {
        for page in pages {
            self.pinned.insert(page);
            if self.pages.contains(&page)
                || self.in_flight.contains_key(&page)
                || self.failed.contains_key(&page)
            {
                continue;
            }
            let job = FetchJob::Page {
                page,
                generation: self.generation,
                offset: first_index(page, self.page_size),
                count: self.page_size,
                query: self.query.clone(),
            };
            if self.pool.submit(job) {
                self.in_flight.insert(page, self.generation);
                self.fetches_issued += 1;
                debug!(page, generation = self.generation, "page fetch issued");
            } else {
                error!(page, "fetch pool is gone, page cannot be loaded");
            }
        }
        self.evict();
    }

    /// Unpins `pages`, making them eligible for eviction.
    ///
    /// A released page also forgets an earlier failure so that a later
    /// `ensure` tries it again.
    pub fn release(&mut self, pages: impl IntoIterator<Item = u64>) {
        for page in pages {
            self.pinned.remove(&page);
            self.failed.remove(&page);
        }
        self.evict();
    }

    /// Returns a resident page without blocking and marks it recently used.
    pub fn get(&mut self, page: u64) -> Option<Arc<Page>> {
        let found = self.pages.get(&page).cloned();
        self.evict();
        found
    }

    /// Whether `page` is resident.
    pub fn is_resident(&self, page: u64) -> bool {
        self.pages.contains(&page)
    }

    /// Whether `page` is pinned.
    pub fn is_pinned(&self, page: u64) -> bool {
        self.pinned.contains(&page)
    }

    /// Whether a fetch for `page` is outstanding.
    pub fn is_in_flight(&self, page: u64) -> bool {
        self.in_flight.contains_key(&page)
    }

    /// Whether `page` exhausted its fetch attempts.
    pub fn is_failed(&self, page: u64) -> bool {
        self.failed.contains_key(&page)
    }

    /// Resident page numbers in ascending order.
    pub fn resident_pages(&self) -> Vec<u64> {
        let mut pages: Vec<u64> = self.pages.iter().map(|(page, _)| *page).collect();
        pages.sort_unstable();
        pages
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Query pages are fetched under.
    pub fn query(&self) -> &ViewQuery {
        &self.query
    }

    /// Maximum number of resident pages.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Requests the item count of the current view on the worker pool.
    pub fn request_count(&mut self) {
        let job = FetchJob::Count {
            generation: self.generation,
            query: self.query.clone(),
        };
        if self.pool.submit(job) {
            self.count_in_flight = Some(self.generation);
        }
    }

    /// Drops every page, pin and outstanding request and moves to a new
    /// generation. Results of earlier requests are discarded on arrival.
    pub fn reset(&mut self, query: ViewQuery) {
        self.generation += 1;
        self.query = query;
        self.pages.clear();
        self.pinned.clear();
        self.in_flight.clear();
        self.failed.clear();
        self.count_in_flight = None;
        debug!(generation = self.generation, "page cache reset");
    }

    /// Applies every completion that has arrived so far.
    pub fn poll(&mut self) -> Vec<CacheEvent> {
        let mut events = Vec::new();
        while let Ok(completion) = self.completions.try_recv() {
            events.extend(self.apply_completion(completion));
        }
        events
    }

    /// Waits up to `timeout` for the first completion, then drains the rest.
    pub fn poll_blocking(&mut self, timeout: Duration) -> Vec<CacheEvent> {
        let mut events = Vec::new();
        if let Ok(completion) = self.completions.recv_timeout(timeout) {
            events.extend(self.apply_completion(completion));
        }
        events.extend(self.poll());
        events
    }

    /// Applies one completion and reports what changed, if anything.
    ///
    /// Completions from older generations, for pages that are no longer
    /// pinned, or for requests that were superseded are dropped.
    pub fn apply_completion(&mut self, completion: FetchCompletion) -> Option<CacheEvent> {
        match completion {
            FetchCompletion::PageLoaded {
                page,
                generation,
                items,
            } => {
                if !self.accept(page, generation) {
                    return None;
                }
                self.pages
                    .put(page, Arc::new(Page::new(page, generation, items)));
                debug!(page, generation, "page resident");
                self.evict();
                Some(CacheEvent::PageReady(page))
            }
            FetchCompletion::PageFailed {
                page,
                generation,
                error,
            } => {
                if !self.accept(page, generation) {
                    return None;
                }
                let attempts = match &error {
                    FetchError::Transient { attempts, .. } => *attempts,
                    FetchError::Stale { .. } => 0,
                };
                self.failed.insert(page, attempts);
                error!(page, generation, attempts, "page marked failed: {error}");
                Some(CacheEvent::PageFailed { page, error })
            }
            FetchCompletion::CountReady { generation, result } => {
                if generation != self.generation || self.count_in_flight != Some(generation) {
                    self.stale_discards += 1;
                    trace!(generation, current = self.generation, "stale count discarded");
                    return None;
                }
                self.count_in_flight = None;
                Some(match result {
                    Ok(total) => CacheEvent::CountReady(total),
                    Err(err) => CacheEvent::CountFailed(err),
                })
            }
        }
    }

    /// Loads `page` on the calling thread, bypassing the pool, and pins it.
    ///
    /// If the pin set is already full, the pinned pages farthest from `page`
    /// are released first. Used only for recovery.
    pub fn load_blocking(&mut self, page: u64) -> Result<Arc<Page>, StoreError> {
        let items = self
            .store
            .fetch(first_index(page, self.page_size), self.page_size, &self.query)?;
        let page_data = Arc::new(Page::new(page, self.generation, items));
        self.in_flight.remove(&page);
        self.failed.remove(&page);
        while !self.pinned.contains(&page) && self.pinned.len() >= self.capacity.get() {
            let Some(farthest) = self
                .pinned
                .iter()
                .copied()
                .max_by_key(|pinned| pinned.abs_diff(page))
            else {
                break;
            };
            debug!(page = farthest, "unpinned for blocking load");
            self.pinned.remove(&farthest);
            self.failed.remove(&farthest);
        }
        self.pinned.insert(page);
        self.pages.put(page, Arc::clone(&page_data));
        self.evict();
        Ok(page_data)
    }

    /// Counts the current view on the calling thread.
    pub fn count_blocking(&self) -> Result<u64, StoreError> {
        self.store.count(&self.query)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident: self.pages.len(),
            pinned: self.pinned.len(),
            in_flight: self.in_flight.len(),
            failed: self.failed.len(),
            generation: self.generation,
            fetches_issued: self.fetches_issued,
            stale_discards: self.stale_discards,
            evictions: self.evictions,
        }
    }

    fn accept(&mut self, page: u64, generation: u64) -> bool {
        if generation != self.generation {
            self.stale_discards += 1;
            let stale = FetchError::Stale {
                page,
                issued: generation,
                current: self.generation,
            };
            trace!("{stale}");
            return false;
        }
        if self.in_flight.get(&page) != Some(&generation) {
            trace!(page, generation, "completion without matching request dropped");
            return false;
        }
        self.in_flight.remove(&page);
        if !self.pinned.contains(&page) {
            trace!(page, "completion for released page dropped");
            return false;
        }
        true
    }

    fn evict(&mut self) {
        while self.pages.len() > self.capacity.get() {
            let victim = self
                .pages
                .iter()
                .rev()
                .map(|(page, _)| *page)
                .find(|page| !self.pinned.contains(page));
            let Some(victim) = victim else {
                break;
            };
            self.pages.pop(&victim);
            self.evictions += 1;
            debug!(page = victim, "page evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::{store::Item, store::PayloadId, testing::ScriptedStore};

    fn cache(store: &Arc<ScriptedStore>, capacity: usize) -> PageCache {
        let config = MasonryConfig::default()
            .page_size(10)
            .cache_capacity(capacity)
            .window_buffer(1)
            .retry_base_delay(Duration::from_millis(1));
        PageCache::new(store.clone(), &config, ViewQuery::default()).expect("cache")
    }

    fn drain_until(cache: &mut PageCache, mut done: impl FnMut(&PageCache) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(cache) && Instant::now() < deadline {
            cache.poll_blocking(Duration::from_millis(20));
        }
        assert!(done(cache), "cache did not reach expected state");
    }

    #[test]
    fn ensure_fetches_each_page_once() {
        let store = Arc::new(ScriptedStore::new(1_000, 10).with_latency(Duration::from_millis(20)));
        let mut cache = cache(&store, 5);
        cache.ensure([1, 2, 3]);
        cache.ensure([1, 2, 3]);
        assert_eq!(cache.stats().fetches_issued, 3);

        drain_until(&mut cache, |c| c.stats().resident == 3);
        assert_eq!(store.fetch_calls(), 3);
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn unpinned_pages_are_evicted_least_recent_first() {
        let store = Arc::new(ScriptedStore::new(1_000, 10));
        let mut cache = cache(&store, 3);
        cache.ensure([0, 1, 2]);
        drain_until(&mut cache, |c| c.stats().resident == 3);

        cache.release([0, 1, 2]);
        assert!(cache.get(2).is_some());
        assert!(cache.get(0).is_some());
        cache.ensure([5]);
        drain_until(&mut cache, |c| c.is_resident(5));

        // Page 1 is the least recently used unpinned page.
        assert!(!cache.is_resident(1));
        assert!(cache.is_resident(0));
        assert!(cache.is_resident(2));
        assert_eq!(cache.stats().resident, 3);
    }

    #[test]
    fn blocking_load_keeps_pins_within_capacity() {
        let store = Arc::new(ScriptedStore::new(1_000, 10));
        let mut cache = cache(&store, 3);
        cache.ensure([0, 1, 2]);
        drain_until(&mut cache, |c| c.stats().resident == 3);

        cache.load_blocking(7).expect("blocking load");
        let stats = cache.stats();
        assert_eq!(stats.pinned, 3);
        assert_eq!(stats.resident, 3);
        assert!(cache.is_pinned(7));
        assert!(cache.is_resident(7));
        // Page 0 is farthest from 7.
        assert!(!cache.is_pinned(0));
        assert!(!cache.is_resident(0));
        assert!(cache.is_pinned(1) && cache.is_pinned(2));
    }

    #[test]
    fn blocking_load_of_a_pinned_page_releases_nothing() {
        let store = Arc::new(ScriptedStore::new(1_000, 10));
        let mut cache = cache(&store, 3);
        cache.ensure([0, 1, 2]);
        drain_until(&mut cache, |c| c.stats().resident == 3);

        cache.load_blocking(1).expect("blocking load");
        assert_eq!(cache.stats().pinned, 3);
        assert!((0..=2).all(|page| cache.is_pinned(page) && cache.is_resident(page)));
    }

    #[test]
    fn stale_completion_is_discarded() {
        let store = Arc::new(ScriptedStore::new(1_000, 10));
        let mut cache = cache(&store, 3);
        let old = cache.generation();
        cache.ensure([4]);
        cache.reset(ViewQuery::default());
        cache.ensure([4]);

        let event = cache.apply_completion(FetchCompletion::PageLoaded {
            page: 4,
            generation: old,
            items: vec![Item::new(40, 1.0, PayloadId(40))],
        });
        assert!(event.is_none());
        assert!(!cache.is_resident(4));
        assert_eq!(cache.stats().stale_discards, 1);
    }

    #[test]
    fn completion_for_released_page_is_dropped() {
        let store = Arc::new(ScriptedStore::new(1_000, 10).with_latency(Duration::from_millis(30)));
        let mut cache = cache(&store, 3);
        cache.ensure([6]);
        cache.release([6]);
        drain_until(&mut cache, |c| !c.is_in_flight(6));
        assert!(!cache.is_resident(6));
    }

    #[test]
    fn failed_page_is_reported_and_not_refetched_while_pinned() {
        let store = Arc::new(ScriptedStore::new(1_000, 10));
        store.fail_page(3, 100);
        let mut cache = cache(&store, 3);
        cache.ensure([3]);
        drain_until(&mut cache, |c| c.is_failed(3));
        cache.ensure([3]);
        assert_eq!(cache.stats().fetches_issued, 1);

        cache.release([3]);
        assert!(!cache.is_failed(3));
    }
}
