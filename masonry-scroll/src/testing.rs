//! Deterministic in-memory store for tests.
use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    error::StoreError,
    store::{Item, PageStore, PayloadId, ViewQuery},
};

/// [`PageStore`] over a synthetic dataset with scripted failures.
///
/// Every item has a deterministic aspect ratio in `[0.5, 2.0]` derived from
/// its index. Calls are counted so tests can assert on fetch traffic.
pub struct ScriptedStore {
    page_size: usize,
    total: AtomicU64,
    latency: Duration,
    aspect_ratio: Option<f32>,
    failures: Mutex<HashMap<u64, usize>>,
    count_failures: AtomicUsize,
    fetch_calls: AtomicUsize,
    count_calls: AtomicUsize,
    fetch_log: Mutex<Vec<u64>>,
}

impl ScriptedStore {
    /// Store of `total` items; `page_size` maps offsets to pages for failure
    /// scripting and the fetch log.
    pub fn new(total: u64, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            total: AtomicU64::new(total),
            latency: Duration::ZERO,
            aspect_ratio: None,
            failures: Mutex::new(HashMap::new()),
            count_failures: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            count_calls: AtomicUsize::new(0),
            fetch_log: Mutex::new(Vec::new()),
        }
    }

    /// Sleeps this long in every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Gives every item the same aspect ratio.
    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = Some(aspect_ratio);
        self
    }

    /// Makes the next `times` fetches of `page` fail.
    pub fn fail_page(&self, page: u64, times: usize) {
        self.failures.lock().insert(page, times);
    }

    /// Makes every fetch of `page` fail.
    pub fn fail_page_always(&self, page: u64) {
        self.fail_page(page, usize::MAX);
    }

    /// Makes the next `times` count requests fail.
    pub fn fail_counts(&self, times: usize) {
        self.count_failures.store(times, Ordering::SeqCst);
    }

    /// Changes the item count, e.g. to simulate a filter.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Fetch calls so far, failed attempts included.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Count calls so far.
    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    /// Fetch calls for `page`.
    pub fn fetches_for(&self, page: u64) -> usize {
        self.fetch_log.lock().iter().filter(|p| **p == page).count()
    }

    /// Every page fetched at least once.
    pub fn fetched_pages(&self) -> BTreeSet<u64> {
        self.fetch_log.lock().iter().copied().collect()
    }

    /// Aspect ratio of the item at `index`.
    pub fn aspect_ratio_of(&self, index: u64) -> f32 {
        self.aspect_ratio
            .unwrap_or_else(|| 0.5 + (mix(index) % 1_501) as f32 / 1_000.0)
    }

    fn sleep(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

impl PageStore for ScriptedStore {
    fn fetch(
        &self,
        offset: u64,
        count: usize,
        _query: &ViewQuery,
    ) -> Result<Vec<Item>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let page = offset / self.page_size as u64;
        self.fetch_log.lock().push(page);
        self.sleep();

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&page)
                && *remaining > 0
            {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(StoreError::Unavailable(format!(
                    "scripted failure for page {page}"
                )));
            }
        }

        let total = self.total.load(Ordering::SeqCst);
        let end = offset.saturating_add(count as u64).min(total);
        Ok((offset..end)
            .map(|index| Item::new(index, self.aspect_ratio_of(index), PayloadId(index)))
            .collect())
    }

    fn count(&self, _query: &ViewQuery) -> Result<u64, StoreError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        self.sleep();
        let failed = self
            .count_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("scripted count failure".to_owned()));
        }
        Ok(self.total.load(Ordering::SeqCst))
    }
}

/// splitmix64 finaliser.
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
