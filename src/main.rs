mod delay;
mod extract;
mod fetch;
mod pipeline;
mod runner;
mod settings;
mod table;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::extract::extract_page;
use crate::fetch::{parse_http_url, Fetch, FetchOutcome, Fetcher, ScrapeTarget};
use crate::runner::Runner;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "yp_scraper", about = "Append data scraped from a CSV column of URLs")]
struct Cli {
    /// INI configuration file
    #[arg(short, long, default_value = "config.cfg")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every URL and write the augmented table
    Run {
        /// Only scrape the first N data rows (the rest get empty cells)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Validate configuration and input without any network access
    Check,
    /// Fetch one URL and print what the configured extractor finds
    Preview { url: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;

    let result = match cli.command {
        Commands::Run { limit } => run(&settings, limit).await,
        Commands::Check => check(&settings),
        Commands::Preview { url } => preview(&settings, url).await,
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(settings: &Settings, limit: Option<usize>) -> anyhow::Result<()> {
    table::validate_source(&settings.input)
        .with_context(|| format!("Cannot use input {}", settings.input.display()))?;
    let fetcher = Fetcher::new(settings.request_timeout, &settings.user_agent)
        .context("Failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            on_interrupt.cancel();
        }
    });

    let summary = Runner::new(settings, fetcher)
        .with_limit(limit)
        .with_progress(true)
        .run(&cancel)
        .await
        .context("Run failed")?;

    let s = &summary.stats;
    println!(
        "Done: {} rows ({} fetched, {} failed, {} found, {} empty) -> {} ({} lines)",
        summary.rows,
        s.fetched,
        s.failures(),
        s.found,
        s.missed,
        settings.output.display(),
        summary.written
    );
    for (kind, count) in &s.failed {
        println!("  {:<14} {}", kind.to_string(), count);
    }

    if summary.cancelled {
        bail!(
            "run cancelled: {} of {} rows were not scraped (written with empty cells)",
            s.skipped,
            summary.rows
        );
    }
    Ok(())
}

fn check(settings: &Settings) -> anyhow::Result<()> {
    let urls = table::read_column(&settings.input, settings.column, settings.has_header)
        .with_context(|| format!("Cannot use input {}", settings.input.display()))?;
    let invalid = urls.iter().filter(|u| parse_http_url(u).is_err()).count();

    println!("Input:     {}", settings.input.display());
    println!("Output:    {}", settings.output.display());
    println!("Mode:      {} ({})", settings.mode, settings.selector);
    println!("Columns:   {}", settings.out_columns.join(", "));
    println!("Rows:      {}", urls.len());
    println!("Bad URLs:  {}", invalid);
    if settings.delay.enabled {
        println!("Delay:     {}-{} ms", settings.delay.min_ms, settings.delay.max_ms);
    } else {
        println!("Delay:     off");
    }
    Ok(())
}

async fn preview(settings: &Settings, url: String) -> anyhow::Result<()> {
    let fetcher = Fetcher::new(settings.request_timeout, &settings.user_agent)
        .context("Failed to build HTTP client")?;
    let extractor = settings.mode.extractor();

    let target = ScrapeTarget { row: 0, url };
    let body = match fetcher.fetch(&target, 1).await {
        FetchOutcome::Success { body } => body,
        FetchOutcome::Failure { kind, reason } => bail!("{}: {}", kind, reason),
    };

    let value = extract_page(&body, &settings.selector, extractor.as_ref());
    let fields: serde_json::Map<String, serde_json::Value> = settings
        .out_columns
        .iter()
        .cloned()
        .zip(value.cells().into_iter().map(serde_json::Value::String))
        .collect();
    println!("{}", serde_json::to_string_pretty(&fields)?);
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
