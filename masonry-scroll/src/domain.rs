//! The canonical scroll domain and its single writer.
//!
//! [`DomainSnapshot`] is the estimate-only description of the virtual space
//! (`N`, `H_avg`, `C`). [`DomainController`] adds the measured *band*: a
//! contiguous run of pages whose real layouts have been stitched together
//! below a frozen base offset. Positions are mapped piecewise:
//!
//! - above the band, items are spread linearly over `[0, base)`;
//! - inside the band, each page covers its own measured (or placeholder) span;
//! - below the band, the remaining rows use the current `H_avg`.
//!
//! Growing `H_avg` therefore only stretches the region below the band, and
//! pages that were already measured keep their position. The controller is
//! the only place the scroll range (extent, viewport, offset) is written;
//! everything else submits a [`DomainRevision`].
use std::{collections::VecDeque, ops::RangeInclusive, sync::Arc};

use tracing::{debug, warn};

use crate::{
    config::MasonryConfig,
    error::LayoutError,
    layout::PageLayout,
    page::{expected_len, first_index, page_count},
};

/// Deltas smaller than this are treated as no movement.
const ANCHOR_NOISE: f64 = 1e-6;

/// Estimate-only view of the domain. Cheap to copy; used as the drag baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainSnapshot {
    /// Items in the current view (`N`).
    pub total_items: u64,
    /// Estimated height of one row, spacing included (`H_avg`).
    pub h_avg: f64,
    /// Column count (`C`).
    pub columns: usize,
    /// Items per page.
    pub page_size: usize,
}

/// A dataset position resolved from the virtual space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainPosition {
    /// Page holding the item.
    pub page: u64,
    /// Offset of the item within its page.
    pub item_offset: usize,
    /// Virtual y of the position.
    pub pixel_y: f64,
}

impl DomainPosition {
    const ORIGIN: Self = Self {
        page: 0,
        item_offset: 0,
        pixel_y: 0.0,
    };

    /// Dataset index of the position.
    pub fn item_index(&self, page_size: usize) -> u64 {
        first_index(self.page, page_size) + self.item_offset as u64
    }
}

impl DomainSnapshot {
    /// Number of pages.
    pub fn total_pages(&self) -> u64 {
        page_count(self.total_items, self.page_size)
    }

    /// Rows needed for `items` items.
    pub fn rows_for(&self, items: u64) -> u64 {
        items.div_ceil(self.columns.max(1) as u64)
    }

    /// `ceil(N / C) * H_avg`.
    pub fn virtual_height(&self) -> f64 {
        self.rows_for(self.total_items) as f64 * self.h_avg
    }

    /// Estimated height of `page`.
    pub fn estimated_page_height(&self, page: u64) -> f64 {
        let len = expected_len(page, self.page_size, self.total_items);
        self.rows_for(len as u64) as f64 * self.h_avg
    }

    /// Maps a scroll fraction onto the dataset.
    ///
    /// The fraction is clamped to `[0, 1]`; `1.0` resolves to the last item.
    pub fn position_for_fraction(&self, fraction: f64) -> DomainPosition {
        if self.total_items == 0 {
            return DomainPosition::ORIGIN;
        }
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        let item = ((fraction * self.total_items as f64).floor() as u64).min(self.total_items - 1);
        let page_size = self.page_size.max(1) as u64;
        DomainPosition {
            page: item / page_size,
            item_offset: (item % page_size) as usize,
            pixel_y: item as f64 / self.total_items as f64 * self.virtual_height(),
        }
    }

    /// Inverse of [`position_for_fraction`](Self::position_for_fraction).
    ///
    /// Out-of-range positions are clamped to the last item.
    pub fn fraction_for_position(&self, page: u64, item_offset: usize) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        let item = first_index(page, self.page_size)
            .saturating_add(item_offset as u64)
            .min(self.total_items - 1);
        item as f64 / self.total_items as f64
    }
}

/// UI-facing scroll range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollRange {
    /// Total virtual height.
    pub extent: f64,
    /// Visible height.
    pub viewport: f64,
    /// Top of the viewport.
    pub offset: f64,
}

impl ScrollRange {
    /// Largest valid offset.
    pub fn max_offset(&self) -> f64 {
        (self.extent - self.viewport).max(0.0)
    }

    /// Offset as a fraction of the scrollable distance.
    pub fn fraction(&self) -> f64 {
        let max = self.max_offset();
        if max <= 0.0 {
            0.0
        } else {
            (self.offset / max).clamp(0.0, 1.0)
        }
    }
}

/// Where a page sits in the virtual space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpan {
    /// Page number.
    pub page: u64,
    /// Virtual y of the top edge.
    pub top: f64,
    /// Height of the span.
    pub height: f64,
    /// Whether the span comes from a measured layout.
    pub measured: bool,
}

/// A change the controller is asked to fold in.
#[derive(Debug, Clone)]
pub enum DomainRevision {
    /// A page was laid out. `h_avg` is the engine's estimate afterwards.
    LayoutMeasured {
        /// Layout, computed at a start offset of zero.
        layout: Arc<PageLayout>,
        /// Current estimate of the layout engine.
        h_avg: f64,
    },
    /// The item count of the view changed.
    TotalCount {
        /// New `N`.
        total_items: u64,
    },
    /// The column count changed; every measured layout is void.
    Columns {
        /// New `C`.
        columns: usize,
        /// Estimate for the new column count.
        h_avg: f64,
    },
}

/// What a revision did to the scroll range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevisionOutcome {
    /// Extent before the revision.
    pub extent_before: f64,
    /// Extent after the revision.
    pub extent_after: f64,
    /// Offset change applied to keep the anchor item in place.
    pub anchor_delta: f64,
    /// `H_avg` after the revision.
    pub h_avg: f64,
}

#[derive(Debug, Clone)]
enum BandEntry {
    Measured(Arc<PageLayout>),
    Placeholder { height: f64 },
}

impl BandEntry {
    fn height(&self) -> f64 {
        match self {
            BandEntry::Measured(layout) => layout.height(),
            BandEntry::Placeholder { height } => *height,
        }
    }

    fn is_placeholder(&self) -> bool {
        matches!(self, BandEntry::Placeholder { .. })
    }
}

#[derive(Debug, Clone)]
struct Band {
    first_page: u64,
    base_y: f64,
    entries: VecDeque<BandEntry>,
}

impl Band {
    fn new(page: u64, base_y: f64, entry: BandEntry) -> Self {
        Self {
            first_page: page,
            base_y,
            entries: VecDeque::from([entry]),
        }
    }

    fn last_page(&self) -> u64 {
        self.first_page + self.entries.len().saturating_sub(1) as u64
    }

    fn contains(&self, page: u64) -> bool {
        page >= self.first_page && page <= self.last_page()
    }

    fn height(&self) -> f64 {
        self.entries.iter().map(BandEntry::height).sum()
    }

    fn end_y(&self) -> f64 {
        self.base_y + self.height()
    }

    fn get(&self, page: u64) -> Option<&BandEntry> {
        if !self.contains(page) {
            return None;
        }
        self.entries.get((page - self.first_page) as usize)
    }

    /// `(page, top, entry)` for every entry, top to bottom.
    fn spans(&self) -> impl Iterator<Item = (u64, f64, &BandEntry)> {
        let mut top = self.base_y;
        self.entries.iter().enumerate().map(move |(i, entry)| {
            let span = (self.first_page + i as u64, top, entry);
            top += entry.height();
            span
        })
    }

    fn push_back(&mut self, entry: BandEntry) {
        self.entries.push_back(entry);
    }

    fn push_front(&mut self, entry: BandEntry) {
        self.base_y -= entry.height();
        self.first_page -= 1;
        self.entries.push_front(entry);
    }

    fn pop_front(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            self.base_y += entry.height();
            self.first_page += 1;
        }
    }

    fn pop_back(&mut self) {
        self.entries.pop_back();
    }
}

/// Single writer of the scroll range.
#[derive(Debug, Clone)]
pub struct DomainController {
    snapshot: DomainSnapshot,
    band: Option<Band>,
    max_band_pages: usize,
    edge_snap: f64,
    layout_tolerance: f64,
    viewport_height: f64,
    offset: f64,
}

impl DomainController {
    /// Controller for `snapshot`, scrolled to the top.
    pub fn new(snapshot: DomainSnapshot, config: &MasonryConfig, viewport_height: f64) -> Self {
        Self {
            snapshot,
            band: None,
            max_band_pages: config.max_band_pages.max(1),
            edge_snap: config.edge_snap.max(0.0),
            layout_tolerance: config.layout_tolerance,
            viewport_height: viewport_height.max(0.0),
            offset: 0.0,
        }
    }

    /// Replaces the domain wholesale and scrolls to the top.
    pub fn reset(&mut self, snapshot: DomainSnapshot) {
        debug!(
            total_items = snapshot.total_items,
            columns = snapshot.columns,
            h_avg = snapshot.h_avg,
            "domain replaced"
        );
        self.snapshot = snapshot;
        self.band = None;
        self.offset = 0.0;
    }

    /// Current estimate-only snapshot.
    pub fn snapshot(&self) -> DomainSnapshot {
        self.snapshot
    }

    /// Current scroll range.
    pub fn scroll_range(&self) -> ScrollRange {
        ScrollRange {
            extent: self.extent(),
            viewport: self.viewport_height,
            offset: self.offset,
        }
    }

    /// Total virtual height.
    pub fn extent(&self) -> f64 {
        match &self.band {
            Some(band) => band.end_y() + self.suffix_height(band),
            None => self.snapshot.virtual_height(),
        }
    }

    /// Top of the viewport.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Largest valid offset.
    pub fn max_offset(&self) -> f64 {
        self.scroll_range().max_offset()
    }

    /// Offset as a fraction of the scrollable distance.
    pub fn scroll_fraction(&self) -> f64 {
        self.scroll_range().fraction()
    }

    /// Applies a new viewport height, keeping the offset in range.
    pub fn set_viewport_height(&mut self, height: f64) {
        self.viewport_height = height.max(0.0);
        self.offset = self.offset.clamp(0.0, self.max_offset());
    }

    /// Moves the viewport. Offsets near either edge snap to it.
    pub fn scroll_to(&mut self, offset: f64) -> f64 {
        let max = self.max_offset();
        let offset = if offset.is_nan() { 0.0 } else { offset };
        self.offset = if offset <= self.edge_snap {
            0.0
        } else if offset >= max - self.edge_snap {
            max
        } else {
            offset
        };
        self.offset
    }

    /// Moves the viewport to a fraction of the scrollable distance.
    pub fn scroll_to_fraction(&mut self, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.scroll_to(fraction * self.max_offset())
    }

    /// Pages currently stitched into the measured band.
    pub fn band_pages(&self) -> Option<RangeInclusive<u64>> {
        self.band
            .as_ref()
            .map(|band| band.first_page..=band.last_page())
    }

    /// Measured layout of `page`, positioned at zero.
    pub fn measured(&self, page: u64) -> Option<&Arc<PageLayout>> {
        match self.band.as_ref()?.get(page)? {
            BandEntry::Measured(layout) => Some(layout),
            BandEntry::Placeholder { .. } => None,
        }
    }

    /// Where `page` sits in the virtual space.
    pub fn page_span(&self, page: u64) -> PageSpan {
        if let Some(band) = &self.band
            && band.contains(page)
        {
            for (candidate, top, entry) in band.spans() {
                if candidate == page {
                    return PageSpan {
                        page,
                        top,
                        height: entry.height(),
                        measured: !entry.is_placeholder(),
                    };
                }
            }
        }
        let start = first_index(page, self.snapshot.page_size);
        let end = start.saturating_add(self.snapshot.page_size as u64);
        let top = self.y_of_item(start as f64);
        PageSpan {
            page,
            top,
            height: (self.y_of_item(end as f64) - top).max(0.0),
            measured: false,
        }
    }

    /// Pages intersecting the viewport.
    pub fn visible_pages(&self) -> Option<RangeInclusive<u64>> {
        if self.snapshot.total_items == 0 {
            return None;
        }
        let first = self.locate(self.offset).page;
        let bottom = (self.offset + self.viewport_height - ANCHOR_NOISE).max(self.offset);
        let last = self.locate(bottom).page;
        Some(first..=last.max(first))
    }

    /// Dataset position at virtual `y`.
    pub fn locate(&self, y: f64) -> DomainPosition {
        let total = self.snapshot.total_items;
        if total == 0 {
            return DomainPosition::ORIGIN;
        }
        let item = (self.item_at(y).floor() as u64).min(total - 1);
        let page_size = self.snapshot.page_size.max(1) as u64;
        DomainPosition {
            page: item / page_size,
            item_offset: (item % page_size) as usize,
            pixel_y: y,
        }
    }

    /// Target position for the current offset.
    ///
    /// Offsets near either edge resolve to the first or last item. Anything
    /// else resolves the point of the viewport that sits at the scroll
    /// fraction (`offset + fraction * viewport`) through the same piecewise
    /// map [`locate`](Self::locate) uses, so the target is always on screen.
    /// Without a measured band this lands on the same item as
    /// [`DomainSnapshot::position_for_fraction`].
    pub fn resolve_target(&self) -> Option<DomainPosition> {
        let total = self.snapshot.total_items;
        if total == 0 {
            return None;
        }
        let max = self.max_offset();
        if self.offset <= self.edge_snap || max <= 0.0 {
            return Some(DomainPosition::ORIGIN);
        }
        if self.offset >= max - self.edge_snap {
            let page_size = self.snapshot.page_size.max(1) as u64;
            let last = total - 1;
            return Some(DomainPosition {
                page: last / page_size,
                item_offset: (last % page_size) as usize,
                pixel_y: self.offset,
            });
        }
        let bottom = (self.offset + self.viewport_height - ANCHOR_NOISE).max(self.offset);
        let y = (self.offset + self.scroll_fraction() * self.viewport_height).min(bottom);
        Some(self.locate(y))
    }

    /// Folds a revision in and keeps the item at the top of the viewport in
    /// place.
    ///
    /// A rejected revision leaves the controller untouched.
    pub fn request(&mut self, revision: DomainRevision) -> Result<RevisionOutcome, LayoutError> {
        let extent_before = self.extent();
        let pinned_to_top = self.offset <= self.edge_snap;
        let anchor = self.item_at(self.offset);

        match revision {
            DomainRevision::LayoutMeasured { layout, h_avg } => self.fold_layout(layout, h_avg)?,
            DomainRevision::TotalCount { total_items } => self.set_total(total_items),
            DomainRevision::Columns { columns, h_avg } => {
                debug!(columns, h_avg, "column count changed, measured band dropped");
                self.snapshot.columns = columns.max(1);
                self.snapshot.h_avg = h_avg;
                self.band = None;
            }
        }

        let target = if pinned_to_top {
            0.0
        } else {
            self.y_of_item(anchor)
        };
        let target = target.clamp(0.0, self.max_offset());
        let mut anchor_delta = target - self.offset;
        if anchor_delta.abs() < ANCHOR_NOISE {
            anchor_delta = 0.0;
        } else {
            self.offset = target;
        }
        Ok(RevisionOutcome {
            extent_before,
            extent_after: self.extent(),
            anchor_delta,
            h_avg: self.snapshot.h_avg,
        })
    }

    /// Outcome `request` would produce, without applying it.
    pub fn preview(&self, revision: &DomainRevision) -> Result<RevisionOutcome, LayoutError> {
        self.clone().request(revision.clone())
    }

    fn fold_layout(&mut self, layout: Arc<PageLayout>, h_avg: f64) -> Result<(), LayoutError> {
        self.check_consistency(&layout)?;
        let page = layout.page();
        if page >= self.snapshot.total_pages() {
            return Ok(());
        }
        if h_avg.is_finite() && h_avg > self.snapshot.h_avg {
            self.snapshot.h_avg = h_avg;
        }

        let snapshot = self.snapshot;
        let max_band = self.max_band_pages as u64;
        let entry = BandEntry::Measured(layout);
        let Some(band) = self.band.as_mut() else {
            self.band = Some(Self::start_band(snapshot, page, entry));
            return Ok(());
        };

        if band.contains(page) {
            let index = (page - band.first_page) as usize;
            band.entries[index] = entry;
        } else if page > band.last_page() && page - band.first_page < max_band {
            for gap in band.last_page() + 1..page {
                band.push_back(BandEntry::Placeholder {
                    height: snapshot.estimated_page_height(gap),
                });
            }
            band.push_back(entry);
        } else if page < band.first_page && band.last_page() - page < max_band {
            let gaps: Vec<BandEntry> = (page + 1..band.first_page)
                .map(|gap| BandEntry::Placeholder {
                    height: snapshot.estimated_page_height(gap),
                })
                .collect();
            let added = entry.height() + gaps.iter().map(BandEntry::height).sum::<f64>();
            // Pages above the band need room in the prefix; page 0 is pinned
            // to the top below.
            if page > 0 && added >= band.base_y {
                let base_y = Self::prefix_height(snapshot, page);
                debug!(
                    page,
                    added,
                    base_y,
                    shift = base_y + added - band.base_y,
                    "prepended pages overflow the prefix, shifting band"
                );
                band.base_y = base_y + added;
            }
            for gap in gaps.into_iter().rev() {
                band.push_front(gap);
            }
            band.push_front(entry);
        } else {
            debug!(page, "page outside measured band, rebasing");
            *band = Self::start_band(snapshot, page, entry);
        }

        if band.first_page == 0 {
            band.base_y = 0.0;
        }
        while band.entries.len() > self.max_band_pages {
            if page - band.first_page >= band.last_page() - page {
                band.pop_front();
            } else {
                band.pop_back();
            }
        }
        while band.entries.len() > 1 && band.entries.front().is_some_and(BandEntry::is_placeholder)
        {
            band.pop_front();
        }
        while band.entries.len() > 1 && band.entries.back().is_some_and(BandEntry::is_placeholder)
        {
            band.pop_back();
        }
        Ok(())
    }

    fn start_band(snapshot: DomainSnapshot, page: u64, entry: BandEntry) -> Band {
        Band::new(page, Self::prefix_height(snapshot, page), entry)
    }

    /// Estimated height of every page above `page`.
    fn prefix_height(snapshot: DomainSnapshot, page: u64) -> f64 {
        snapshot.rows_for(first_index(page, snapshot.page_size)) as f64 * snapshot.h_avg
    }

    fn check_consistency(&self, layout: &PageLayout) -> Result<(), LayoutError> {
        if layout.columns() != self.snapshot.columns {
            return Err(LayoutError::Inconsistent {
                page: layout.page(),
                reason: format!(
                    "laid out for {} columns, domain has {}",
                    layout.columns(),
                    self.snapshot.columns
                ),
            });
        }
        if layout.is_empty() {
            return Ok(());
        }
        let estimated = self.snapshot.rows_for(layout.len() as u64) as f64 * self.snapshot.h_avg;
        let measured = layout.height();
        if estimated <= 0.0 || measured <= 0.0 {
            return Ok(());
        }
        let ratio = estimated.max(measured) / estimated.min(measured);
        if ratio > self.layout_tolerance {
            warn!(
                page = layout.page(),
                measured, estimated, "measured page height diverges from estimate"
            );
            return Err(LayoutError::Inconsistent {
                page: layout.page(),
                reason: format!("measured height {measured:.1} vs estimated {estimated:.1}"),
            });
        }
        Ok(())
    }

    fn set_total(&mut self, total_items: u64) {
        self.snapshot.total_items = total_items;
        let total_pages = self.snapshot.total_pages();
        if let Some(band) = &mut self.band {
            while band.last_page() >= total_pages && !band.entries.is_empty() {
                band.pop_back();
            }
            if band.entries.is_empty() {
                self.band = None;
            }
        }
    }

    /// Items of `page` as the band sees them.
    fn band_page_len(&self, page: u64, entry: &BandEntry) -> usize {
        match entry {
            BandEntry::Measured(layout) => layout.len(),
            BandEntry::Placeholder { .. } => {
                expected_len(page, self.snapshot.page_size, self.snapshot.total_items)
            }
        }
    }

    fn items_after(&self, band: &Band) -> (f64, f64) {
        let total = self.snapshot.total_items;
        let after = first_index(band.last_page() + 1, self.snapshot.page_size).min(total);
        (after as f64, (total - after) as f64)
    }

    fn suffix_height(&self, band: &Band) -> f64 {
        let (_, remaining) = self.items_after(band);
        self.snapshot.rows_for(remaining as u64) as f64 * self.snapshot.h_avg
    }

    /// Virtual y of a continuous item position in `[0, N]`.
    fn y_of_item(&self, position: f64) -> f64 {
        let total = self.snapshot.total_items as f64;
        if total <= 0.0 {
            return 0.0;
        }
        let position = position.clamp(0.0, total);
        let Some(band) = &self.band else {
            return position / total * self.snapshot.virtual_height();
        };
        let band_start = first_index(band.first_page, self.snapshot.page_size) as f64;
        if position < band_start {
            return band.base_y * position / band_start;
        }
        let mut bottom = band.base_y;
        for (page, top, entry) in band.spans() {
            let start = first_index(page, self.snapshot.page_size) as f64;
            let len = self.band_page_len(page, entry) as f64;
            bottom = top + entry.height();
            if len > 0.0 && position < start + len {
                return top + entry.height() * ((position - start) / len).clamp(0.0, 1.0);
            }
        }
        let (after, remaining) = self.items_after(band);
        if remaining <= 0.0 {
            return bottom;
        }
        bottom + (position - after).max(0.0) / remaining * self.suffix_height(band)
    }

    /// Continuous item position at virtual `y`; inverse of `y_of_item`.
    fn item_at(&self, y: f64) -> f64 {
        let total = self.snapshot.total_items as f64;
        if total <= 0.0 {
            return 0.0;
        }
        let y = if y.is_nan() { 0.0 } else { y.max(0.0) };
        let Some(band) = &self.band else {
            let height = self.snapshot.virtual_height();
            return if height > 0.0 {
                (y / height * total).min(total)
            } else {
                0.0
            };
        };
        if y < band.base_y {
            let band_start = first_index(band.first_page, self.snapshot.page_size) as f64;
            return band_start * y / band.base_y;
        }
        let mut bottom = band.base_y;
        for (page, top, entry) in band.spans() {
            let height = entry.height();
            bottom = top + height;
            if height > 0.0 && y < bottom {
                let start = first_index(page, self.snapshot.page_size) as f64;
                let len = self.band_page_len(page, entry) as f64;
                return start + len * (y - top) / height;
            }
        }
        let (after, remaining) = self.items_after(band);
        let suffix = self.suffix_height(band);
        if suffix <= 0.0 {
            return after.min(total);
        }
        (after + (y - bottom) / suffix * remaining).min(total)
    }
}
