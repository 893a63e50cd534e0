//! The boundary to the external item store.
//!
//! The store owns persistence, sorting and filtering. The scroll core only
//! asks it for contiguous slices of the current order and for the size of
//! that order; both calls may be issued concurrently from fetch workers.
use std::{fmt, sync::Arc};

use crate::error::StoreError;

/// Smallest aspect ratio accepted by layout.
pub const MIN_ASPECT_RATIO: f32 = 0.01;
/// Largest aspect ratio accepted by layout.
pub const MAX_ASPECT_RATIO: f32 = 100.0;

/// Attribute the dataset is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKey {
    /// File modification time.
    #[default]
    ModifiedTime,
    /// File name.
    FileName,
    /// Intrinsic aspect ratio.
    AspectRatio,
    /// User rating.
    Rating,
}

/// Direction of the dataset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    #[default]
    Descending,
}

/// Opaque filter expression evaluated by the store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Filter(Arc<str>);

impl Filter {
    /// Wraps a filter expression.
    pub fn new(expression: impl Into<Arc<str>>) -> Self {
        Self(expression.into())
    }

    /// The raw expression.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({:?})", self.as_str())
    }
}

/// Sort and filter identity of a dataset view.
///
/// Two queries that compare equal describe the same ordering, so pages
/// fetched under one are valid under the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ViewQuery {
    /// Sort attribute.
    pub sort: SortKey,
    /// Sort direction.
    pub direction: SortDirection,
    /// Optional filter.
    pub filter: Option<Filter>,
}

impl ViewQuery {
    /// Query with the given order and no filter.
    pub fn sorted(sort: SortKey, direction: SortDirection) -> Self {
        Self {
            sort,
            direction,
            filter: None,
        }
    }

    /// Adds a filter to the query.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Opaque reference to whatever the renderer draws for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadId(pub u64);

/// One dataset entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Item {
    /// Rank of the item in the current sort/filter order.
    pub index: u64,
    /// Width divided by height, as reported by the store.
    pub aspect_ratio: f32,
    /// Render payload.
    pub payload: PayloadId,
}

impl Item {
    /// Creates an item.
    pub fn new(index: u64, aspect_ratio: f32, payload: PayloadId) -> Self {
        Self {
            index,
            aspect_ratio,
            payload,
        }
    }

    /// Aspect ratio safe to divide by.
    ///
    /// Non-finite and non-positive ratios fall back to square.
    pub fn sanitized_aspect_ratio(&self) -> f32 {
        if !self.aspect_ratio.is_finite() || self.aspect_ratio <= 0.0 {
            1.0
        } else {
            self.aspect_ratio.clamp(MIN_ASPECT_RATIO, MAX_ASPECT_RATIO)
        }
    }
}

/// Paginated access to the sorted and filtered dataset.
///
/// Implementations must be callable from several threads at once and must
/// not have side effects visible to the caller.
pub trait PageStore: Send + Sync {
    /// Returns up to `count` items starting at rank `offset`.
    ///
    /// A short (or empty) result means the end of the order was reached.
    fn fetch(&self, offset: u64, count: usize, query: &ViewQuery)
    -> Result<Vec<Item>, StoreError>;

    /// Returns the number of items matching `query`.
    fn count(&self, query: &ViewQuery) -> Result<u64, StoreError>;
}

impl<S: PageStore + ?Sized> PageStore for Arc<S> {
    fn fetch(
        &self,
        offset: u64,
        count: usize,
        query: &ViewQuery,
    ) -> Result<Vec<Item>, StoreError> {
        (**self).fetch(offset, count, query)
    }

    fn count(&self, query: &ViewQuery) -> Result<u64, StoreError> {
        (**self).count(query)
    }
}
