//! Deterministic stand-in for a photo library.
use std::{thread, time::Duration};

use masonry_scroll::{Item, PageStore, PayloadId, SortDirection, StoreError, ViewQuery};

/// Items whose aspect ratios are a pure function of their id.
///
/// Sorting by aspect ratio or rating is not modelled; every key orders by
/// id and only the direction is honoured.
pub struct SyntheticStore {
    total: u64,
    latency: Duration,
    failing_page: Option<(u64, usize)>,
}

impl SyntheticStore {
    pub fn new(total: u64, latency: Duration) -> Self {
        Self {
            total,
            latency,
            failing_page: None,
        }
    }

    /// Makes every fetch of `page` fail; `page_size` maps offsets to pages.
    pub fn failing_page(mut self, page: u64, page_size: usize) -> Self {
        self.failing_page = Some((page, page_size.max(1)));
        self
    }

    fn id_at(&self, rank: u64, query: &ViewQuery) -> u64 {
        match query.direction {
            SortDirection::Ascending => rank,
            SortDirection::Descending => self.total - 1 - rank,
        }
    }
}

impl PageStore for SyntheticStore {
    fn fetch(&self, offset: u64, count: usize, query: &ViewQuery) -> Result<Vec<Item>, StoreError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if let Some((page, page_size)) = self.failing_page
            && offset / page_size as u64 == page
        {
            return Err(StoreError::Unavailable(format!("page {page} is offline")));
        }
        if query.filter.is_some() {
            return Err(StoreError::Rejected("filters are not supported".to_owned()));
        }
        let end = offset.saturating_add(count as u64).min(self.total);
        Ok((offset..end)
            .map(|rank| {
                let id = self.id_at(rank, query);
                Item::new(rank, aspect_ratio(id), PayloadId(id))
            })
            .collect())
    }

    fn count(&self, query: &ViewQuery) -> Result<u64, StoreError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if query.filter.is_some() {
            return Err(StoreError::Rejected("filters are not supported".to_owned()));
        }
        Ok(self.total)
    }
}

/// Mostly landscape 3:2 and portrait 2:3 shots with the odd panorama.
fn aspect_ratio(id: u64) -> f32 {
    let hash = id.wrapping_mul(0x9e37_79b9_7f4a_7c15).rotate_left(17);
    match hash % 20 {
        0 => 3.0,
        1..=4 => 1.0,
        5..=11 => 1.5,
        _ => 2.0 / 3.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_order_starts_at_newest() {
        let store = SyntheticStore::new(10, Duration::ZERO);
        let items = store
            .fetch(0, 3, &ViewQuery::default())
            .expect("fetch");
        let ids: Vec<u64> = items.iter().map(|item| item.payload.0).collect();
        assert_eq!(ids, vec![9, 8, 7]);
        assert_eq!(items[0].index, 0);
    }

    #[test]
    fn short_page_at_the_end() {
        let store = SyntheticStore::new(10, Duration::ZERO);
        let items = store.fetch(8, 5, &ViewQuery::default()).expect("fetch");
        assert_eq!(items.len(), 2);
        assert!(store.fetch(10, 5, &ViewQuery::default()).expect("fetch").is_empty());
    }

    #[test]
    fn failing_page_reports_unavailable() {
        let store = SyntheticStore::new(100, Duration::ZERO).failing_page(2, 10);
        assert!(matches!(
            store.fetch(20, 10, &ViewQuery::default()),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.fetch(30, 10, &ViewQuery::default()).is_ok());
    }
}
