use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use indicatif::HumanDuration;
use masonry_scroll::{Coordinator, Phase, SortDirection, ViewQuery};
use tracing::debug;

use crate::{
    output::{self, Tone},
    settings::DemoSettings,
    synthetic::SyntheticStore,
};

const FLICK_STEPS: usize = 12;
const FRAME: Duration = Duration::from_millis(16);

pub struct RunOptions {
    pub items: u64,
    pub viewport: (f32, f32),
    pub config: Option<PathBuf>,
    pub page_size: Option<usize>,
    pub scroll: Option<f64>,
    pub flick: Option<(f64, f64)>,
    pub fail_page: Option<u64>,
    pub ascending: bool,
}

pub fn execute(options: RunOptions) -> Result<()> {
    let settings = match &options.config {
        Some(path) => DemoSettings::load(path)?,
        None => DemoSettings::default(),
    };
    let mut config = settings.to_config();
    if let Some(page_size) = options.page_size {
        config.page_size = page_size;
    }
    config.validate().context("invalid configuration")?;

    let mut store = SyntheticStore::new(options.items, settings.store_latency());
    if let Some(page) = options.fail_page {
        store = store.failing_page(page, config.page_size);
        output::emit(Tone::Note, format_args!("page {page} will fail every fetch"));
    }
    let query = ViewQuery {
        direction: if options.ascending {
            SortDirection::Ascending
        } else {
            SortDirection::Descending
        },
        ..ViewQuery::default()
    };

    let (width, height) = options.viewport;
    let timeout = config.window_timeout + config.settle_duration;
    let started = Instant::now();
    let mut coordinator = Coordinator::open(Arc::new(store), config, query, width, height)
        .context("failed to open the scroll view")?;
    let stats = coordinator.stats();
    output::emit(
        Tone::Step("Opened"),
        format_args!(
            "{} items, {} columns, viewport {width}x{height}",
            stats.total_items, stats.columns
        ),
    );
    settle(&mut coordinator, timeout);

    if let Some((from, to)) = options.flick {
        output::emit(Tone::Step("Flicking"), format_args!("{from:.3} -> {to:.3}"));
        coordinator.on_gesture_start();
        for step in 0..=FLICK_STEPS {
            let fraction = from + (to - from) * step as f64 / FLICK_STEPS as f64;
            coordinator.on_gesture_move(fraction);
            coordinator.pump(Instant::now());
            thread::sleep(FRAME);
        }
        coordinator.on_gesture_end();
        settle(&mut coordinator, timeout);
    } else if let Some(fraction) = options.scroll {
        output::emit(Tone::Step("Scrolling"), format_args!("to {fraction:.3}"));
        coordinator.on_scroll(fraction);
        settle(&mut coordinator, timeout);
    }

    let window = coordinator.visible_window();
    println!("{}", output::window_table(&window));
    println!("{}", output::stats_table(&coordinator.stats()));
    let range = coordinator.scroll_range();
    output::emit(
        Tone::Step("Finished"),
        output::scroll_summary(&range, started.elapsed()),
    );
    if !window.covers(range.offset, range.offset + range.viewport) {
        output::emit(Tone::Warning, "the window does not cover the viewport");
    }
    Ok(())
}

/// Pumps until the window is laid out and the coordinator is idle.
fn settle(coordinator: &mut Coordinator, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        coordinator.pump(Instant::now());
        if coordinator.phase() == Phase::Idle {
            if coordinator.stats().deferred_revisions > 0 {
                // A nudge in place folds in what was held back while settling.
                coordinator.on_scroll(coordinator.scroll_range().fraction());
                continue;
            }
            if window_resolved(coordinator) {
                debug!(stats = ?coordinator.stats(), "window settled");
                return;
            }
        }
        thread::sleep(FRAME);
    }
    output::emit(
        Tone::Warning,
        format_args!("window did not settle within {}", HumanDuration(timeout)),
    );
}

fn window_resolved(coordinator: &Coordinator) -> bool {
    coordinator.plan().pages().all(|page| {
        coordinator.domain().measured(page).is_some() || coordinator.cache().is_failed(page)
    })
}
