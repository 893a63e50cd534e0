//! Error types for the scroll core.
//!
//! Transient and stale fetch conditions are absorbed inside the cache and
//! planner; only layout inconsistencies and exhausted fetches reach the
//! coordinator, which is the sole component allowed to force recovery.
use thiserror::Error;

/// Failure reported by a [`PageStore`](crate::store::PageStore) adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// An I/O operation inside the store failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The store refused the query.
    #[error("query rejected: {0}")]
    Rejected(String),
}

/// Outcome of a page fetch that did not produce a usable page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed; the page is marked failed.
    #[error("page {page} failed after {attempts} attempts: {source}")]
    Transient {
        /// Page number.
        page: u64,
        /// Attempts made, including the first.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: StoreError,
    },
    /// The result belongs to a superseded dataset view.
    #[error("page {page} issued under generation {issued}, cache is at {current}")]
    Stale {
        /// Page number.
        page: u64,
        /// Generation the fetch was issued under.
        issued: u64,
        /// Generation of the cache when the result arrived.
        current: u64,
    },
}

/// Layout and domain disagree about a page.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Column geometry or measured height contradict the domain.
    #[error("page {page} layout inconsistent with domain: {reason}")]
    Inconsistent {
        /// Page number.
        page: u64,
        /// Human-readable description of the mismatch.
        reason: String,
    },
}

/// Invalid [`MasonryConfig`](crate::MasonryConfig).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `page_size` was zero.
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    /// `cache_capacity` was zero.
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
    /// `max_fetch_attempts` was zero.
    #[error("at least one fetch attempt is required")]
    ZeroAttempts,
    /// The settled window would pin more pages than the cache can hold.
    #[error("window of {window} pages exceeds cache capacity {capacity}")]
    WindowExceedsCapacity {
        /// Pages in a full window.
        window: usize,
        /// Configured capacity.
        capacity: usize,
    },
    /// A geometric value was negative, zero or not finite.
    #[error("invalid geometry value for `{name}`")]
    InvalidGeometry {
        /// Field name.
        name: &'static str,
    },
}

/// Fetch worker threads could not be started.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Spawning a worker failed.
    #[error("failed to spawn fetch worker {index}: {source}")]
    Spawn {
        /// Worker index.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors returned by the public entry points of the scroll core.
#[derive(Debug, Error)]
pub enum ScrollError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Worker pool could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Store failure on a blocking path.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Layout and domain disagree.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}
