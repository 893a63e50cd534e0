//! Tunables for paging, layout and the scroll state machine.
//!
//! ## Usage
//!
//! Start from [`MasonryConfig::default`] and override individual fields with
//! the generated setters.
//!
//! ```
//! use std::time::Duration;
//! use masonry_scroll::MasonryConfig;
//!
//! let config = MasonryConfig::default()
//!     .page_size(500)
//!     .cache_capacity(7)
//!     .window_buffer(3)
//!     .settle_duration(Duration::from_millis(250));
//! assert!(config.validate().is_ok());
//! ```
use std::time::Duration;

use derive_setters::Setters;

use crate::error::ConfigError;

/// Largest settled buffer radius the planner accepts.
pub const MAX_WINDOW_BUFFER: usize = 6;
/// Largest number of fetch workers.
pub const MAX_FETCH_WORKERS: usize = 4;

/// Configuration shared by every component of the scroll core.
#[derive(Debug, Clone, PartialEq, Setters)]
pub struct MasonryConfig {
    /// Number of items per page.
    pub page_size: usize,
    /// Maximum number of resident pages (`K`).
    pub cache_capacity: usize,
    /// Buffer radius around the target page once scrolling has settled.
    pub window_buffer: usize,
    /// Buffer radius used while a drag gesture is in progress.
    pub drag_buffer: usize,
    /// Size of the background fetch pool.
    pub fetch_workers: usize,
    /// Attempts per page fetch before the page is marked failed.
    pub max_fetch_attempts: u32,
    /// Backoff before the second attempt; doubled for every further attempt.
    pub retry_base_delay: Duration,
    /// Target width of a single column.
    pub column_width: f32,
    /// Vertical and horizontal spacing between items.
    pub spacing: f32,
    /// Horizontal margins subtracted from the viewport width.
    pub gutter: f32,
    /// Width reserved for the vertical scrollbar.
    pub scrollbar_width: f32,
    /// Quiet period after a release before the domain may settle.
    pub settle_duration: Duration,
    /// Largest anchor movement, in pixels, applied while settling.
    pub settle_epsilon: f64,
    /// Time a window may stay unresolved before recovery is forced.
    pub window_timeout: Duration,
    /// Offsets within this many pixels of an edge snap to that edge.
    pub edge_snap: f64,
    /// Largest tolerated ratio between measured and estimated page height.
    pub layout_tolerance: f64,
    /// Maximum number of pages kept in the measured band.
    pub max_band_pages: usize,
}

impl Default for MasonryConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            cache_capacity: 5,
            window_buffer: 2,
            drag_buffer: 0,
            fetch_workers: 2,
            max_fetch_attempts: 3,
            retry_base_delay: Duration::from_millis(50),
            column_width: 200.0,
            spacing: 2.0,
            gutter: 24.0,
            scrollbar_width: 15.0,
            settle_duration: Duration::from_millis(400),
            settle_epsilon: 2.0,
            window_timeout: Duration::from_secs(8),
            edge_snap: 2.0,
            layout_tolerance: 64.0,
            max_band_pages: 20,
        }
    }
}

impl MasonryConfig {
    /// Checks the invariants the cache and planner rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let window = self.window_span(self.effective_window_buffer());
        if window > self.cache_capacity {
            return Err(ConfigError::WindowExceedsCapacity {
                window,
                capacity: self.cache_capacity,
            });
        }
        if self.max_fetch_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.column_width.is_finite() || self.column_width <= 0.0 {
            return Err(ConfigError::InvalidGeometry {
                name: "column_width",
            });
        }
        for (name, value) in [
            ("spacing", self.spacing),
            ("gutter", self.gutter),
            ("scrollbar_width", self.scrollbar_width),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidGeometry { name });
            }
        }
        if !self.layout_tolerance.is_finite() || self.layout_tolerance < 1.0 {
            return Err(ConfigError::InvalidGeometry {
                name: "layout_tolerance",
            });
        }
        Ok(())
    }

    /// Settled buffer radius clamped to the supported range.
    pub fn effective_window_buffer(&self) -> usize {
        self.window_buffer.clamp(1, MAX_WINDOW_BUFFER)
    }

    /// Drag buffer radius, never wider than the settled radius.
    pub fn effective_drag_buffer(&self) -> usize {
        self.drag_buffer.min(self.effective_window_buffer())
    }

    /// Worker count clamped to the supported range.
    pub fn effective_fetch_workers(&self) -> usize {
        self.fetch_workers.clamp(1, MAX_FETCH_WORKERS)
    }

    /// Backoff to wait before `attempt` (1-based). The first attempt never waits.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.retry_base_delay, attempt)
    }

    fn window_span(&self, buffer: usize) -> usize {
        buffer.saturating_mul(2).saturating_add(1)
    }
}

pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let shift = (attempt - 2).min(16);
    base.saturating_mul(1u32 << shift)
}
