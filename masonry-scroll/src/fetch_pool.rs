//! Bounded pool of named threads that talk to the store.
//!
//! Jobs go in through one queue shared by all workers and results come back
//! through a single-consumer channel drained by the domain context. Workers
//! never touch cache state; they only hand off owned results.
use std::{
    sync::{Arc, mpsc},
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    config::{MasonryConfig, backoff_delay},
    error::{FetchError, PoolError, StoreError},
    store::{Item, PageStore, ViewQuery},
};

/// Work item for a fetch worker.
#[derive(Debug, Clone)]
pub enum FetchJob {
    /// Load one page.
    Page {
        /// Page number.
        page: u64,
        /// Generation the request was issued under.
        generation: u64,
        /// Rank of the first item.
        offset: u64,
        /// Items requested.
        count: usize,
        /// View the page belongs to.
        query: ViewQuery,
    },
    /// Count the items of a view.
    Count {
        /// Generation the request was issued under.
        generation: u64,
        /// View to count.
        query: ViewQuery,
    },
}

/// Result handed back from a worker.
#[derive(Debug)]
pub enum FetchCompletion {
    /// A page was fetched.
    PageLoaded {
        /// Page number.
        page: u64,
        /// Generation the request was issued under.
        generation: u64,
        /// Fetched items.
        items: Vec<Item>,
    },
    /// Every attempt for a page failed.
    PageFailed {
        /// Page number.
        page: u64,
        /// Generation the request was issued under.
        generation: u64,
        /// Final error.
        error: FetchError,
    },
    /// A count request finished.
    CountReady {
        /// Generation the request was issued under.
        generation: u64,
        /// Count or the final error.
        result: Result<u64, StoreError>,
    },
}

#[derive(Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    base_delay: std::time::Duration,
}

impl RetryPolicy {
    fn from_config(config: &MasonryConfig) -> Self {
        Self {
            max_attempts: config.max_fetch_attempts.max(1),
            base_delay: config.retry_base_delay,
        }
    }

    fn delay(&self, attempt: u32) -> std::time::Duration {
        backoff_delay(self.base_delay, attempt)
    }
}

/// Worker threads plus the job queue feeding them.
pub struct FetchPool {
    jobs: Option<mpsc::Sender<FetchJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl FetchPool {
    /// Starts `config.effective_fetch_workers()` workers.
    ///
    /// Results are sent to `completions`; a worker exits once the pool is
    /// dropped or the completion receiver goes away.
    pub fn spawn(
        store: Arc<dyn PageStore>,
        config: &MasonryConfig,
        completions: mpsc::Sender<FetchCompletion>,
    ) -> Result<Self, PoolError> {
        let (jobs, receiver) = mpsc::channel::<FetchJob>();
        let receiver = Arc::new(Mutex::new(receiver));
        let policy = RetryPolicy::from_config(config);
        let count = config.effective_fetch_workers();

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let completions = completions.clone();
            let handle = thread::Builder::new()
                .name(format!("masonry-fetch-{index}"))
                .spawn(move || worker_loop(receiver, store, completions, policy))
                .map_err(|source| PoolError::Spawn { index, source })?;
            workers.push(handle);
        }
        debug!(workers = count, "fetch pool started");

        Ok(Self {
            jobs: Some(jobs),
            workers,
        })
    }

    /// Queues a job. Returns `false` when every worker has exited.
    pub fn submit(&self, job: FetchJob) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for FetchPool {
    fn drop(&mut self) {
        // Closing the queue makes every blocked `recv` return.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    jobs: Arc<Mutex<mpsc::Receiver<FetchJob>>>,
    store: Arc<dyn PageStore>,
    completions: mpsc::Sender<FetchCompletion>,
    policy: RetryPolicy,
) {
    loop {
        let job = jobs.lock().recv();
        let Ok(job) = job else {
            break;
        };
        let completion = match job {
            FetchJob::Page {
                page,
                generation,
                offset,
                count,
                query,
            } => fetch_page(store.as_ref(), policy, page, generation, offset, count, &query),
            FetchJob::Count { generation, query } => FetchCompletion::CountReady {
                generation,
                result: with_retries(policy, |attempt| {
                    trace!(generation, attempt, "counting items");
                    store.count(&query)
                })
                .map_err(|(_, err)| err),
            },
        };
        if completions.send(completion).is_err() {
            break;
        }
    }
}

fn fetch_page(
    store: &dyn PageStore,
    policy: RetryPolicy,
    page: u64,
    generation: u64,
    offset: u64,
    count: usize,
    query: &ViewQuery,
) -> FetchCompletion {
    let result = with_retries(policy, |attempt| {
        trace!(page, generation, attempt, "fetching page");
        store.fetch(offset, count, query)
    });
    match result {
        Ok(items) => FetchCompletion::PageLoaded {
            page,
            generation,
            items,
        },
        Err((attempts, source)) => FetchCompletion::PageFailed {
            page,
            generation,
            error: FetchError::Transient {
                page,
                attempts,
                source,
            },
        },
    }
}

/// Runs `op` until it succeeds or the attempt cap is hit, sleeping with
/// exponential backoff in between. On failure returns the attempt count and
/// the last error.
fn with_retries<T>(
    policy: RetryPolicy,
    mut op: impl FnMut(u32) -> Result<T, StoreError>,
) -> Result<T, (u32, StoreError)> {
    let mut attempt = 1;
    loop {
        let delay = policy.delay(attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts => return Err((attempt, err)),
            Err(err) => {
                warn!(attempt, max = policy.max_attempts, "store request failed, retrying: {err}");
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::ScriptedStore;

    fn pool(store: Arc<ScriptedStore>) -> (FetchPool, mpsc::Receiver<FetchCompletion>) {
        let config = MasonryConfig::default()
            .page_size(10)
            .retry_base_delay(Duration::from_millis(1));
        let (sender, receiver) = mpsc::channel();
        let pool = FetchPool::spawn(store, &config, sender).expect("pool should start");
        (pool, receiver)
    }

    fn page_job(page: u64) -> FetchJob {
        FetchJob::Page {
            page,
            generation: 1,
            offset: page * 10,
            count: 10,
            query: ViewQuery::default(),
        }
    }

    #[test]
    fn loads_page_on_worker() {
        let store = Arc::new(ScriptedStore::new(100, 10));
        let (pool, completions) = pool(Arc::clone(&store));
        assert_eq!(pool.worker_count(), 2);
        assert!(pool.submit(page_job(3)));

        match completions.recv_timeout(Duration::from_secs(5)) {
            Ok(FetchCompletion::PageLoaded { page, items, .. }) => {
                assert_eq!(page, 3);
                assert_eq!(items.len(), 10);
                assert_eq!(items[0].index, 30);
            }
            other => panic!("unexpected completion: {other:?}"),
        }
    }

    #[test]
    fn retries_then_gives_up() {
        let store = Arc::new(ScriptedStore::new(100, 10));
        store.fail_page(4, 10);
        let (pool, completions) = pool(Arc::clone(&store));
        pool.submit(page_job(4));

        match completions.recv_timeout(Duration::from_secs(5)) {
            Ok(FetchCompletion::PageFailed {
                error: FetchError::Transient { page, attempts, .. },
                ..
            }) => {
                assert_eq!(page, 4);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected completion: {other:?}"),
        }
        assert_eq!(store.fetches_for(4), 3);
    }

    #[test]
    fn transient_failure_recovers_within_budget() {
        let store = Arc::new(ScriptedStore::new(100, 10));
        store.fail_page(2, 2);
        let (pool, completions) = pool(Arc::clone(&store));
        pool.submit(page_job(2));

        assert!(matches!(
            completions.recv_timeout(Duration::from_secs(5)),
            Ok(FetchCompletion::PageLoaded { page: 2, .. })
        ));
        assert_eq!(store.fetches_for(2), 3);
    }

    #[test]
    fn dropping_pool_joins_workers() {
        let store = Arc::new(ScriptedStore::new(100, 10));
        let (pool, completions) = pool(store);
        drop(pool);
        assert!(completions.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
