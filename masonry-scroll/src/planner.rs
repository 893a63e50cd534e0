//! Decides which pages must be resident around a target page.
use std::{collections::BTreeSet, ops::RangeInclusive};

use tracing::debug;

use crate::{
    cache::PageCache,
    domain::{DomainController, DomainPosition},
    page::first_index,
    window::{Spacer, SpacerReason},
};

/// Contiguous range of pages around a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    target: u64,
    first: u64,
    last: u64,
}

impl WindowPlan {
    /// Plan that covers no pages.
    pub const EMPTY: Self = Self {
        target: 0,
        first: 1,
        last: 0,
    };

    /// Target page.
    pub fn target(&self) -> u64 {
        self.target
    }

    /// First page of the plan.
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Last page of the plan.
    pub fn last(&self) -> u64 {
        self.last
    }

    /// Pages of the plan in ascending order.
    pub fn pages(&self) -> RangeInclusive<u64> {
        self.first..=self.last
    }

    /// Number of pages.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.last - self.first + 1) as usize
        }
    }

    /// Whether the plan covers no pages.
    pub fn is_empty(&self) -> bool {
        self.first > self.last
    }

    /// Whether `page` belongs to the plan.
    pub fn contains(&self, page: u64) -> bool {
        self.pages().contains(&page)
    }
}

impl Default for WindowPlan {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Tracks the applied plan and translates plan changes into pin changes.
#[derive(Debug, Default)]
pub struct WindowPlanner {
    current: WindowPlan,
    ensure_calls: u64,
}

impl WindowPlanner {
    /// Planner with nothing pinned.
    pub fn new() -> Self {
        Self::default()
    }

    /// `[target - buffer, target + buffer]` clipped to the dataset.
    ///
    /// A target past the end is clamped to the last page. An empty dataset
    /// yields [`WindowPlan::EMPTY`].
    pub fn plan(target: u64, buffer: usize, total_pages: u64) -> WindowPlan {
        if total_pages == 0 {
            return WindowPlan::EMPTY;
        }
        let target = target.min(total_pages - 1);
        let buffer = buffer as u64;
        WindowPlan {
            target,
            first: target.saturating_sub(buffer),
            last: target.saturating_add(buffer).min(total_pages - 1),
        }
    }

    /// Plan currently pinned in the cache.
    pub fn current(&self) -> WindowPlan {
        self.current
    }

    /// Number of `ensure` calls issued so far.
    pub fn ensure_calls(&self) -> u64 {
        self.ensure_calls
    }

    /// Releases pages that left the window and ensures the new window.
    ///
    /// Returns the released pages.
    pub fn apply(&mut self, plan: WindowPlan, cache: &mut PageCache) -> Vec<u64> {
        let released: Vec<u64> = self
            .current
            .pages()
            .filter(|page| !plan.contains(*page))
            .collect();
        if !released.is_empty() {
            cache.release(released.iter().copied());
        }
        if !plan.is_empty() {
            cache.ensure(plan.pages());
            self.ensure_calls += 1;
        }
        debug!(
            target_page = plan.target(),
            first = plan.first(),
            last = plan.last(),
            released = released.len(),
            "window plan applied"
        );
        self.current = plan;
        released
    }

    /// Unpins the whole window.
    pub fn release_all(&mut self, cache: &mut PageCache) {
        cache.release(self.current.pages());
        self.current = WindowPlan::EMPTY;
    }

    /// Forgets the window without touching the cache; used after a cache reset.
    pub fn reset(&mut self) {
        self.current = WindowPlan::EMPTY;
    }

    /// Applies half-page hysteresis to a resolved position.
    ///
    /// The previous target is kept until the position moves more than half a
    /// page beyond the previous page's boundaries.
    pub fn resolve_target(previous: Option<u64>, position: &DomainPosition, page_size: usize) -> u64 {
        let Some(previous) = previous else {
            return position.page;
        };
        let item = position.item_index(page_size);
        let half = page_size as u64 / 2;
        let lower = first_index(previous, page_size).saturating_sub(half);
        let upper = first_index(previous + 1, page_size).saturating_add(half);
        if item >= lower && item < upper {
            previous
        } else {
            position.page
        }
    }

    /// Stand-ins for every page of `plan` or of the viewport that has no
    /// measured layout yet.
    pub fn spacer_span(
        plan: &WindowPlan,
        domain: &DomainController,
        cache: &PageCache,
    ) -> Vec<Spacer> {
        window_pages(plan, domain)
            .into_iter()
            .filter(|page| domain.measured(*page).is_none())
            .map(|page| {
                let span = domain.page_span(page);
                let reason = if cache.is_failed(page) {
                    SpacerReason::Failed
                } else if cache.is_resident(page) {
                    SpacerReason::PendingLayout
                } else {
                    SpacerReason::NotLoaded
                };
                Spacer {
                    page,
                    y_start: span.top,
                    height: span.height,
                    reason,
                }
            })
            .collect()
    }
}

/// Pages of `plan` plus the pages under the viewport.
pub(crate) fn window_pages(plan: &WindowPlan, domain: &DomainController) -> BTreeSet<u64> {
    let total_pages = domain.snapshot().total_pages();
    let mut pages: BTreeSet<u64> = plan.pages().filter(|page| *page < total_pages).collect();
    if let Some(visible) = domain.visible_pages() {
        pages.extend(visible);
    }
    pages
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use proptest::prelude::*;

    use super::*;
    use crate::{MasonryConfig, store::ViewQuery, testing::ScriptedStore};

    fn cache(store: &Arc<ScriptedStore>) -> PageCache {
        let config = MasonryConfig::default()
            .page_size(10)
            .retry_base_delay(Duration::from_millis(1));
        PageCache::new(store.clone(), &config, ViewQuery::default()).expect("cache")
    }

    fn position(page: u64, item_offset: usize) -> DomainPosition {
        DomainPosition {
            page,
            item_offset,
            pixel_y: 0.0,
        }
    }

    #[test]
    fn plan_is_clipped_at_both_ends() {
        let plan = WindowPlanner::plan(0, 2, 100);
        assert_eq!(plan.pages(), 0..=2);
        let plan = WindowPlanner::plan(99, 2, 100);
        assert_eq!(plan.pages(), 97..=99);
        let plan = WindowPlanner::plan(500, 2, 100);
        assert_eq!(plan.target(), 99);
        assert_eq!(plan.pages(), 97..=99);
    }

    #[test]
    fn empty_dataset_yields_empty_plan() {
        let plan = WindowPlanner::plan(3, 2, 0);
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
        assert!(!plan.contains(0));
    }

    #[test]
    fn apply_releases_pages_that_left_the_window() {
        let store = Arc::new(ScriptedStore::new(1_000, 10));
        let mut cache = cache(&store);
        let mut planner = WindowPlanner::new();

        planner.apply(WindowPlanner::plan(5, 2, 100), &mut cache);
        let released = planner.apply(WindowPlanner::plan(7, 2, 100), &mut cache);
        assert_eq!(released, vec![3, 4]);
        assert!(!cache.is_pinned(3));
        assert!((5..=9).all(|page| cache.is_pinned(page)));
        assert_eq!(planner.ensure_calls(), 2);

        planner.release_all(&mut cache);
        assert_eq!(cache.stats().pinned, 0);
        assert!(planner.current().is_empty());
    }

    #[test]
    fn hysteresis_holds_target_within_half_a_page() {
        assert_eq!(WindowPlanner::resolve_target(None, &position(4, 0), 10), 4);
        assert_eq!(WindowPlanner::resolve_target(Some(3), &position(4, 4), 10), 3);
        assert_eq!(WindowPlanner::resolve_target(Some(3), &position(4, 5), 10), 4);
        assert_eq!(WindowPlanner::resolve_target(Some(3), &position(2, 5), 10), 3);
        assert_eq!(WindowPlanner::resolve_target(Some(3), &position(2, 4), 10), 2);
        assert_eq!(WindowPlanner::resolve_target(Some(3), &position(40, 0), 10), 40);
    }

    proptest! {
        #[test]
        fn plan_contains_target_and_fits_cache(
            target in 0u64..2_000,
            buffer in 0usize..=6,
            total_pages in 1u64..1_000,
        ) {
            let capacity = 2 * buffer + 1;
            let plan = WindowPlanner::plan(target, buffer, total_pages);
            prop_assert!(plan.contains(plan.target()));
            prop_assert!(plan.len() <= capacity);
            prop_assert!(plan.last() < total_pages);
            prop_assert_eq!(plan.target(), target.min(total_pages - 1));
            prop_assert_eq!(plan.len() as u64, plan.last() - plan.first() + 1);
        }
    }
}
