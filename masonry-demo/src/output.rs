use std::{fmt::Display, time::Duration};

use comfy_table::{Cell, Color, ContentArrangement, Row, Table, presets::UTF8_FULL};
use console::style;
use indicatif::HumanDuration;
use masonry_scroll::{CoordinatorStats, ScrollRange, VisibleWindow};

const VERB_WIDTH: usize = 12;

/// Prefix of a line printed to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Right-aligned verb for a step of the run, e.g. `Scrolling`.
    Step(&'static str),
    Note,
    Warning,
    Error,
}

impl Tone {
    fn prefix(self) -> String {
        match self {
            Tone::Step(verb) => {
                format!("{:>width$}", style(verb).green().bold(), width = VERB_WIDTH)
            }
            Tone::Note => format!("{}:", style("note").cyan().bold()),
            Tone::Warning => format!("{}:", style("warning").yellow().bold()),
            Tone::Error => format!("{}:", style("error").red().bold()),
        }
    }
}

pub fn render(tone: Tone, message: impl Display) -> String {
    format!("{} {message}", tone.prefix())
}

pub fn emit(tone: Tone, message: impl Display) {
    eprintln!("{}", render(tone, message));
}

/// Where the viewport ended up and how long the run took.
pub fn scroll_summary(range: &ScrollRange, elapsed: Duration) -> String {
    format!(
        "offset {:.0} of {:.0} ({:.1}%) in {}",
        range.offset,
        range.max_offset(),
        range.fraction() * 100.0,
        HumanDuration(elapsed)
    )
}

/// One row per page or spacer, top to bottom.
pub fn window_table(window: &VisibleWindow) -> Table {
    let mut rows: Vec<(f64, Row)> = window
        .pages
        .iter()
        .map(|layout| {
            let row = Row::from(vec![
                Cell::new(layout.page()),
                Cell::new(format!("{:.1}", layout.start_y())),
                Cell::new(format!("{:.1}", layout.height())),
                Cell::new(format!("{} items", layout.len())).fg(Color::Green),
            ]);
            (layout.start_y(), row)
        })
        .chain(window.spacers.iter().map(|spacer| {
            let row = Row::from(vec![
                Cell::new(spacer.page),
                Cell::new(format!("{:.1}", spacer.y_start)),
                Cell::new(format!("{:.1}", spacer.height)),
                Cell::new(format!("spacer ({:?})", spacer.reason)).fg(Color::Yellow),
            ]);
            (spacer.y_start, row)
        }))
        .collect();
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Row::from(vec![
            Cell::new("Page").fg(Color::Cyan),
            Cell::new("Top").fg(Color::Cyan),
            Cell::new("Height").fg(Color::Cyan),
            Cell::new("Content").fg(Color::Cyan),
        ]));
    for (_, row) in rows {
        table.add_row(row);
    }
    table
}

pub fn stats_table(stats: &CoordinatorStats) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Row::from(vec![
            Cell::new("Metric").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]));
    let target = stats
        .target_page
        .map_or_else(|| "-".to_owned(), |page| page.to_string());
    let rows = [
        ("phase", format!("{:?}", stats.phase)),
        ("items", stats.total_items.to_string()),
        ("columns", stats.columns.to_string()),
        ("row height", format!("{:.2}", stats.h_avg)),
        ("extent", format!("{:.0}", stats.extent)),
        ("target page", target),
        ("resident", stats.cache.resident.to_string()),
        ("pinned", stats.cache.pinned.to_string()),
        ("in flight", stats.cache.in_flight.to_string()),
        ("failed", stats.cache.failed.to_string()),
        ("generation", stats.cache.generation.to_string()),
        ("fetches", stats.cache.fetches_issued.to_string()),
        ("stale discards", stats.cache.stale_discards.to_string()),
        ("evictions", stats.cache.evictions.to_string()),
        ("ensure calls", stats.ensure_calls.to_string()),
        ("recoveries", stats.recoveries.to_string()),
    ];
    for (metric, value) in rows {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_verbs_are_right_aligned() {
        let line = render(Tone::Step("Opened"), "1000 items");
        assert_eq!(console::strip_ansi_codes(&line), "      Opened 1000 items");
        let line = render(Tone::Warning, "late");
        assert_eq!(console::strip_ansi_codes(&line), "warning: late");
    }

    #[test]
    fn summary_reports_offset_and_fraction() {
        let range = ScrollRange {
            extent: 1_600.0,
            viewport: 600.0,
            offset: 250.0,
        };
        let summary = scroll_summary(&range, Duration::from_secs(2));
        assert!(summary.starts_with("offset 250 of 1000 (25.0%) in "), "{summary}");
    }
}
