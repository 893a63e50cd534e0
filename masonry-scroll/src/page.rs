//! Fixed-size slices of the dataset order.
use std::sync::Arc;

use crate::store::Item;

/// A contiguous run of items starting at `number * page_size`.
///
/// Pages are immutable once fetched. The generation records the dataset view
/// the page was fetched under.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    number: u64,
    generation: u64,
    items: Arc<[Item]>,
}

impl Page {
    /// Creates a page from fetched items.
    pub fn new(number: u64, generation: u64, items: impl Into<Arc<[Item]>>) -> Self {
        Self {
            number,
            generation,
            items: items.into(),
        }
    }

    /// Page number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Generation the page was fetched under.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Items in dataset order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Number of items; shorter than the page size only for the last page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the page holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Number of pages needed to hold `total_items`.
pub fn page_count(total_items: u64, page_size: usize) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total_items.div_ceil(page_size as u64)
}

/// Page holding the item at `index`.
pub fn page_of(index: u64, page_size: usize) -> u64 {
    index / page_size.max(1) as u64
}

/// Rank of the first item of `page`.
pub fn first_index(page: u64, page_size: usize) -> u64 {
    page.saturating_mul(page_size as u64)
}

/// Number of items `page` holds when the dataset has `total_items` items.
pub fn expected_len(page: u64, page_size: usize, total_items: u64) -> usize {
    let start = first_index(page, page_size);
    if start >= total_items {
        return 0;
    }
    (total_items - start).min(page_size as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_is_short() {
        assert_eq!(page_count(2_500, 1_000), 3);
        assert_eq!(expected_len(2, 1_000, 2_500), 500);
        assert_eq!(expected_len(3, 1_000, 2_500), 0);
        assert_eq!(expected_len(0, 1_000, 2_500), 1_000);
    }

    #[test]
    fn empty_dataset_has_no_pages() {
        assert_eq!(page_count(0, 1_000), 0);
        assert_eq!(page_of(999, 1_000), 0);
        assert_eq!(page_of(1_000, 1_000), 1);
    }
}
