use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};

mod commands;
mod output;
mod settings;
mod synthetic;

#[derive(Parser)]
#[command(name = "masonry-demo")]
#[command(version, about = "Drive masonry-scroll against a synthetic dataset", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a view, scroll or flick, settle and print the resulting window
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Number of items in the synthetic dataset
    #[arg(long, default_value_t = 1_000_000)]
    items: u64,
    /// Viewport size in pixels
    #[arg(long, value_parser = parse_viewport, default_value = "1280x720")]
    viewport: (f32, f32),
    /// TOML file with configuration overrides
    #[arg(long)]
    config: Option<PathBuf>,
    /// Items per page (overrides the config file)
    #[arg(long)]
    page_size: Option<usize>,
    /// Scroll fraction to jump to
    #[arg(long, conflicts_with = "flick")]
    scroll: Option<f64>,
    /// Drag from one scroll fraction to another and release
    #[arg(long, value_parser = parse_flick)]
    flick: Option<(f64, f64)>,
    /// Page that always fails to load
    #[arg(long)]
    fail_page: Option<u64>,
    /// Ascending order instead of newest first
    #[arg(long)]
    ascending: bool,
}

fn parse_viewport(value: &str) -> Result<(f32, f32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got `{value}`"))?;
    let width: f32 = width.trim().parse()?;
    let height: f32 = height.trim().parse()?;
    if !(width > 0.0 && height > 0.0) {
        return Err(anyhow!("viewport must be positive, got `{value}`"));
    }
    Ok((width, height))
}

fn parse_flick(value: &str) -> Result<(f64, f64)> {
    let (from, to) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("expected FROM:TO, got `{value}`"))?;
    let from: f64 = from.trim().parse()?;
    let to: f64 = to.trim().parse()?;
    for fraction in [from, to] {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(anyhow!("fractions must lie in [0, 1], got `{value}`"));
        }
    }
    Ok((from, to))
}

fn init_tracing() {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match tracing_subscriber::EnvFilter::try_new("error,masonry_scroll=info") {
            Ok(filter) => filter,
            Err(_) => tracing_subscriber::EnvFilter::new("error"),
        },
    };

    let _ = tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let Cli { command } = Cli::parse();

    match command {
        Commands::Run(args) => {
            let result = commands::run::execute(commands::run::RunOptions {
                items: args.items,
                viewport: args.viewport,
                config: args.config,
                page_size: args.page_size,
                scroll: args.scroll,
                flick: args.flick,
                fail_page: args.fail_page,
                ascending: args.ascending,
            });
            if let Err(err) = &result {
                output::emit(output::Tone::Error, format_args!("{err:#}"));
            }
            result?;
        }
    }

    Ok(())
}
