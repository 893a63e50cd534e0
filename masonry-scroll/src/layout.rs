//! Masonry placement of a page and the running row-height estimate.
//!
//! Items are placed greedily into the shortest column. Layout is a pure
//! function of the page content, the column geometry and the starting
//! offset, which is what allows pages to be laid out independently (and in
//! parallel) and stitched together afterwards.
//!
//! The column count is derived in exactly one place, [`column_count`]. Every
//! other component obtains it through [`ColumnGeometry::for_viewport`].
use std::{collections::HashMap, sync::Arc};

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::{config::MasonryConfig, page::Page};

/// Narrowest column the engine lays out.
pub const MIN_COLUMN_WIDTH: f32 = 16.0;
/// Lower bound for the seeded row height.
pub const MIN_INITIAL_ROW_HEIGHT: f64 = 32.0;
/// Observed row heights outside `(MIN, MAX)` are treated as degenerate.
pub const MIN_OBSERVED_ROW_HEIGHT: f64 = 10.0;
/// See [`MIN_OBSERVED_ROW_HEIGHT`].
pub const MAX_OBSERVED_ROW_HEIGHT: f64 = 5000.0;

/// Number of columns that fit into `viewport_width`.
///
/// The scrollbar and the horizontal gutter are subtracted first; the rest is
/// divided by the column pitch. Never returns zero.
pub fn column_count(viewport_width: f32, config: &MasonryConfig) -> usize {
    let column_width = config.column_width.max(MIN_COLUMN_WIDTH);
    let pitch = column_width + config.spacing;
    let available = viewport_width - config.scrollbar_width - config.gutter;
    if !available.is_finite() || available < pitch {
        return 1;
    }
    ((available / pitch).floor() as usize).max(1)
}

/// Column layout for one viewport width.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnGeometry {
    /// Number of columns.
    pub columns: usize,
    /// Width of every column.
    pub column_width: f32,
    /// Gap between items, both directions.
    pub spacing: f32,
}

impl ColumnGeometry {
    /// Geometry for a viewport of the given width.
    pub fn for_viewport(viewport_width: f32, config: &MasonryConfig) -> Self {
        Self {
            columns: column_count(viewport_width, config),
            column_width: config.column_width.max(MIN_COLUMN_WIDTH),
            spacing: config.spacing,
        }
    }

    /// Height of an item of the given aspect ratio, in whole pixels.
    pub fn item_height(&self, aspect_ratio: f32) -> f64 {
        f64::from((self.column_width / aspect_ratio).floor()).max(1.0)
    }

    /// Horizontal offset of a column.
    pub fn column_x(&self, column: usize) -> f64 {
        column as f64 * f64::from(self.column_width + self.spacing)
    }

    /// Rows `items` occupy, rounded up.
    pub fn rows_for(&self, items: u64) -> u64 {
        items.div_ceil(self.columns.max(1) as u64)
    }
}

/// Placed rectangle of one item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemRect {
    /// Dataset index of the item.
    pub index: u64,
    /// Column the item was placed in.
    pub column: usize,
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width, equal to the column width.
    pub width: f64,
    /// Height derived from the aspect ratio.
    pub height: f64,
}

/// Layout of a single page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLayout {
    page: u64,
    generation: u64,
    columns: usize,
    start_y: f64,
    height: f64,
    rects: Vec<ItemRect>,
}

impl PageLayout {
    /// Page number.
    pub fn page(&self) -> u64 {
        self.page
    }

    /// Generation of the page this layout was computed from.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Column count the layout was computed for.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Top of the page.
    pub fn start_y(&self) -> f64 {
        self.start_y
    }

    /// Tallest column minus the start offset, trailing spacing included.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Bottom of the page.
    pub fn end_y(&self) -> f64 {
        self.start_y + self.height
    }

    /// Item rectangles in page order.
    pub fn rects(&self) -> &[ItemRect] {
        &self.rects
    }

    /// Number of laid out items.
    pub fn len(&self) -> usize {
        self.rects.len()
    }

    /// Whether the page had no items.
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Rows the page occupies at its column count.
    pub fn rows(&self) -> u64 {
        (self.rects.len() as u64).div_ceil(self.columns.max(1) as u64)
    }

    /// Same layout moved so that it starts at `start_y`.
    pub fn translated(&self, start_y: f64) -> PageLayout {
        let delta = start_y - self.start_y;
        PageLayout {
            start_y,
            rects: self
                .rects
                .iter()
                .map(|rect| ItemRect {
                    y: rect.y + delta,
                    ..*rect
                })
                .collect(),
            ..*self
        }
    }
}

/// Lays out `page` with every column starting at `start_y`.
pub fn layout_page(page: &Page, geometry: ColumnGeometry, start_y: f64) -> PageLayout {
    let columns = geometry.columns.max(1);
    let spacing = f64::from(geometry.spacing);
    let width = f64::from(geometry.column_width);
    let mut lane_offsets = vec![start_y; columns];
    let mut rects = Vec::with_capacity(page.len());

    for item in page.items() {
        let column = find_shortest_lane(&lane_offsets);
        let height = geometry.item_height(item.sanitized_aspect_ratio());
        rects.push(ItemRect {
            index: item.index,
            column,
            x: geometry.column_x(column),
            y: lane_offsets[column],
            width,
            height,
        });
        lane_offsets[column] += height + spacing;
    }

    let tallest = lane_offsets.iter().copied().fold(start_y, f64::max);
    PageLayout {
        page: page.number(),
        generation: page.generation(),
        columns,
        start_y,
        height: tallest - start_y,
        rects,
    }
}

fn find_shortest_lane(lane_offsets: &[f64]) -> usize {
    let mut index = 0;
    let mut best = lane_offsets.first().copied().unwrap_or(0.0);
    for (i, offset) in lane_offsets.iter().enumerate().skip(1) {
        if *offset < best {
            best = *offset;
            index = i;
        }
    }
    index
}

/// Running per-row height estimate (`H_avg`), tracked per column count.
///
/// Within one column count the estimate never decreases. Switching to a
/// column count seen before resumes its estimate; a new one starts from the
/// current estimate so unmeasured regions keep their size.
#[derive(Debug, Clone)]
pub struct HeightEstimator {
    by_columns: HashMap<usize, f64>,
    columns: usize,
}

impl HeightEstimator {
    /// Estimate seeded for `geometry`.
    pub fn new(geometry: ColumnGeometry) -> Self {
        let mut by_columns = HashMap::new();
        by_columns.insert(geometry.columns, Self::initial_row_height(geometry));
        Self {
            by_columns,
            columns: geometry.columns,
        }
    }

    /// Seed used before anything has been measured.
    pub fn initial_row_height(geometry: ColumnGeometry) -> f64 {
        f64::from(geometry.column_width + geometry.spacing).max(MIN_INITIAL_ROW_HEIGHT)
    }

    /// Current estimate.
    pub fn h_avg(&self) -> f64 {
        self.by_columns.get(&self.columns).copied().unwrap_or(MIN_INITIAL_ROW_HEIGHT)
    }

    /// Folds a measured page in. Returns the new estimate if it grew.
    pub fn observe(&mut self, layout: &PageLayout) -> Option<f64> {
        if layout.columns() != self.columns || layout.is_empty() {
            return None;
        }
        let observed = layout.height() / layout.rows() as f64;
        if !(observed > MIN_OBSERVED_ROW_HEIGHT && observed < MAX_OBSERVED_ROW_HEIGHT) {
            trace!(page = layout.page(), observed, "degenerate row height ignored");
            return None;
        }
        let current = self.h_avg();
        if observed <= current {
            return None;
        }
        self.by_columns.insert(self.columns, observed);
        debug!(
            page = layout.page(),
            columns = self.columns,
            h_avg = observed,
            "row height estimate grew"
        );
        Some(observed)
    }

    /// Moves to the column count of `geometry`.
    pub fn switch_columns(&mut self, geometry: ColumnGeometry) {
        if geometry.columns == self.columns {
            return;
        }
        let carried = self.h_avg().max(Self::initial_row_height(geometry));
        self.by_columns.entry(geometry.columns).or_insert(carried);
        self.columns = geometry.columns;
    }
}

/// Column geometry plus the row-height estimate for the current viewport.
#[derive(Debug, Clone)]
pub struct MasonryLayoutEngine {
    config: MasonryConfig,
    geometry: ColumnGeometry,
    estimator: HeightEstimator,
}

impl MasonryLayoutEngine {
    /// Engine for a viewport of the given width.
    pub fn new(config: &MasonryConfig, viewport_width: f32) -> Self {
        let geometry = ColumnGeometry::for_viewport(viewport_width, config);
        Self {
            config: config.clone(),
            geometry,
            estimator: HeightEstimator::new(geometry),
        }
    }

    /// Current geometry.
    pub fn geometry(&self) -> ColumnGeometry {
        self.geometry
    }

    /// Current row-height estimate.
    pub fn h_avg(&self) -> f64 {
        self.estimator.h_avg()
    }

    /// Applies a new viewport width. Returns `true` if the column count changed.
    pub fn set_viewport_width(&mut self, viewport_width: f32) -> bool {
        let geometry = ColumnGeometry::for_viewport(viewport_width, &self.config);
        if geometry == self.geometry {
            return false;
        }
        let changed = geometry.columns != self.geometry.columns;
        self.geometry = geometry;
        self.estimator.switch_columns(geometry);
        changed
    }

    /// Forgets everything measured; used when the dataset view changes.
    pub fn reset_estimate(&mut self) {
        self.estimator = HeightEstimator::new(self.geometry);
    }

    /// Lays out one page at `start_y`.
    pub fn layout_page(&self, page: &Page, start_y: f64) -> PageLayout {
        layout_page(page, self.geometry, start_y)
    }

    /// Lays out several pages in parallel, each starting at zero.
    pub fn layout_pages(&self, pages: &[Arc<Page>]) -> Vec<PageLayout> {
        let geometry = self.geometry;
        pages
            .par_iter()
            .map(|page| layout_page(page, geometry, 0.0))
            .collect()
    }

    /// Folds a measured page into the estimate.
    pub fn observe(&mut self, layout: &PageLayout) -> Option<f64> {
        self.estimator.observe(layout)
    }
}
