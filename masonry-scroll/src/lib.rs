//! masonry-scroll keeps a scrollable masonry grid over millions of items
//! responsive while only a small window of pages is ever resident.
//!
//! # Overview
//!
//! The dataset lives in an external [`PageStore`]. The core pulls fixed-size
//! pages from it on a small worker pool, lays each page out independently,
//! and stitches the layouts into one virtual coordinate space whose
//! unmeasured regions are extrapolated from a running row-height estimate.
//!
//! - [`PageCache`] holds at most `K` pages, pins the current window and
//!   discards results that belong to a superseded dataset view.
//! - [`MasonryLayoutEngine`] places items into the shortest column and keeps
//!   the row-height estimate, which only ever grows.
//! - [`DomainController`] owns the scroll range and the mapping between
//!   scroll fraction and dataset position. Nothing else writes it.
//! - [`WindowPlanner`] turns a target page into pin and release requests and
//!   produces spacers for pages that have no layout yet.
//! - [`Coordinator`] sequences drag, release, settle and recovery.
//!
//! # Usage
//!
//! ```no_run
//! use std::{sync::Arc, time::Instant};
//! use masonry_scroll::{Coordinator, MasonryConfig, PageStore, ViewQuery};
//!
//! fn run(store: Arc<dyn PageStore>) -> Result<(), masonry_scroll::ScrollError> {
//!     let mut scroll = Coordinator::open(
//!         store,
//!         MasonryConfig::default(),
//!         ViewQuery::default(),
//!         1280.0,
//!         720.0,
//!     )?;
//!     scroll.on_scroll(0.5);
//!     scroll.pump(Instant::now());
//!     let window = scroll.visible_window();
//!     println!("{} pages, {} spacers", window.pages.len(), window.spacers.len());
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber.
#![deny(missing_docs, clippy::unwrap_used)]

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod fetch_pool;
pub mod layout;
pub mod page;
pub mod planner;
pub mod store;
pub mod window;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::{
    cache::{CacheEvent, CacheStats, PageCache},
    config::MasonryConfig,
    coordinator::{Coordinator, CoordinatorStats, Phase},
    domain::{
        DomainController, DomainPosition, DomainRevision, DomainSnapshot, PageSpan,
        RevisionOutcome, ScrollRange,
    },
    error::{ConfigError, FetchError, LayoutError, PoolError, ScrollError, StoreError},
    fetch_pool::{FetchCompletion, FetchJob, FetchPool},
    layout::{
        ColumnGeometry, HeightEstimator, ItemRect, MasonryLayoutEngine, PageLayout, column_count,
        layout_page,
    },
    page::Page,
    planner::{WindowPlan, WindowPlanner},
    store::{Filter, Item, PageStore, PayloadId, SortDirection, SortKey, ViewQuery},
    window::{Spacer, SpacerReason, VisibleWindow},
};
