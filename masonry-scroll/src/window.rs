//! What the renderer receives: laid out pages plus spacers for everything
//! in the window that has no layout yet.
use crate::{
    cache::PageCache,
    domain::DomainController,
    layout::PageLayout,
    planner::{WindowPlan, WindowPlanner, window_pages},
};

/// Why a page is represented by a spacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpacerReason {
    /// The page has not been fetched.
    NotLoaded,
    /// The page exhausted its fetch attempts.
    Failed,
    /// The page is resident but its layout has not been folded in.
    PendingLayout,
}

/// Reserved empty space standing in for a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spacer {
    /// Page the spacer stands in for.
    pub page: u64,
    /// Virtual y of the top edge.
    pub y_start: f64,
    /// Height of the reserved space.
    pub height: f64,
    /// Why the page has no layout.
    pub reason: SpacerReason,
}

/// Pages and spacers covering the window, in virtual coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleWindow {
    /// Measured pages, translated to their place in the virtual space.
    pub pages: Vec<PageLayout>,
    /// Stand-ins for pages without a layout.
    pub spacers: Vec<Spacer>,
}

impl VisibleWindow {
    /// Builds the window for `plan` and the current viewport.
    pub fn compose(plan: &WindowPlan, domain: &DomainController, cache: &PageCache) -> Self {
        let pages = window_pages(plan, domain)
            .into_iter()
            .filter_map(|page| {
                let layout = domain.measured(page)?;
                Some(layout.translated(domain.page_span(page).top))
            })
            .collect();
        Self {
            pages,
            spacers: WindowPlanner::spacer_span(plan, domain, cache),
        }
    }

    /// Whether the window holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.spacers.is_empty()
    }

    /// Spacer standing in for `page`, if any.
    pub fn spacer_for(&self, page: u64) -> Option<&Spacer> {
        self.spacers.iter().find(|spacer| spacer.page == page)
    }

    /// Layout of `page`, if it is measured.
    pub fn page(&self, page: u64) -> Option<&PageLayout> {
        self.pages.iter().find(|layout| layout.page() == page)
    }

    /// Whether pages and spacers together cover `[top, bottom)` without gaps.
    pub fn covers(&self, top: f64, bottom: f64) -> bool {
        let mut spans: Vec<(f64, f64)> = self
            .pages
            .iter()
            .map(|layout| (layout.start_y(), layout.end_y()))
            .chain(
                self.spacers
                    .iter()
                    .map(|spacer| (spacer.y_start, spacer.y_start + spacer.height)),
            )
            .collect();
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut reached = top;
        for (start, end) in spans {
            if start > reached + 1e-6 {
                break;
            }
            reached = reached.max(end);
        }
        reached + 1e-6 >= bottom
    }
}
