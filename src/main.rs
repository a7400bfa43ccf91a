//! CLI entry point for the BiciMAD usage reporter.
//!
//! Provides subcommands for the monthly summary, per-day and per-weekday
//! usage, station breakdowns, and popular-address queries.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use bicimad_report::{
    dataset::{Dataset, ParsePolicy},
    fetch::BasicClient,
    output::{append_record, print_json},
    resolver::UrlResolver,
};

#[derive(Parser)]
#[command(name = "bicimad-report")]
#[command(about = "Usage reports over monthly BiciMAD trip archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Period {
    /// Month to report on (1-12)
    #[arg(short, long)]
    month: u32,

    /// Two-digit year (e.g. 23 for 2023)
    #[arg(short, long)]
    year: u32,

    /// Fetch this archive URL directly instead of resolving the index page
    #[arg(long)]
    url: Option<String>,

    /// Fail on an unreadable trips table instead of continuing empty
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Monthly overview: totals and the most popular lock station
    Summary {
        #[command(flatten)]
        period: Period,

        /// CSV file to append the summary record to
        #[arg(long)]
        csv: Option<String>,
    },
    /// Trip hours (or counts) per calendar date
    Daily {
        #[command(flatten)]
        period: Period,

        /// Report trip counts instead of hours
        #[arg(long, default_value_t = false)]
        counts: bool,
    },
    /// Trip hours per weekday (L Monday through D Sunday)
    Weekday {
        #[command(flatten)]
        period: Period,
    },
    /// Trip counts per (date, unlock station) pair
    Stations {
        #[command(flatten)]
        period: Period,

        /// CSV file to append the rows to instead of printing them
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Unlock addresses tied for the highest trip count
    Popular {
        #[command(flatten)]
        period: Period,
    },
    /// Count of unlocks without a matching lock station
    Unmatched {
        #[command(flatten)]
        period: Period,
    },
}

fn main() -> Result<()> {
    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/bicimad_report.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("bicimad_report.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Summary { period, csv } => {
            let mut dataset = load_dataset(&period)?;
            dataset.clean();

            match dataset.summary() {
                Some(summary) => {
                    print_json(&summary)?;
                    if let Some(path) = csv {
                        append_record(&path, &summary)?;
                        info!(path, "summary appended");
                    }
                }
                None => warn!(
                    month = period.month,
                    year = period.year,
                    "no data for the requested period"
                ),
            }
        }
        Commands::Daily { period, counts } => {
            let mut dataset = load_dataset(&period)?;
            dataset.clean();

            if counts {
                print_json(&dataset.daily_trip_counts())?;
            } else {
                print_json(&dataset.daily_usage_hours())?;
            }
        }
        Commands::Weekday { period } => {
            let mut dataset = load_dataset(&period)?;
            dataset.clean();
            print_json(&dataset.weekday_usage_hours())?;
        }
        Commands::Stations { period, output } => {
            let mut dataset = load_dataset(&period)?;
            dataset.clean();

            let rows = dataset.usage_by_date_and_station();
            match output {
                Some(path) => {
                    for usage in &rows {
                        append_record(&path, usage)?;
                    }
                    info!(rows = rows.len(), path, "station usage written");
                }
                None => print_json(&rows)?,
            }
        }
        Commands::Popular { period } => {
            let mut dataset = load_dataset(&period)?;
            dataset.clean();

            let addresses = dataset.most_popular_unlock_addresses();
            let combined = dataset.usage_from_most_popular_unlock_address();
            info!(?addresses, combined, "most popular unlock addresses");
        }
        Commands::Unmatched { period } => {
            // Works on the raw table; no clean needed.
            let dataset = load_dataset(&period)?;
            let count = dataset.count_unlocked_without_lock();
            info!(count, "unlocks without a recorded lock station");
        }
    }

    Ok(())
}

/// Loads the month either through index discovery or from a direct URL.
fn load_dataset(period: &Period) -> Result<Dataset> {
    let policy = if period.strict {
        ParsePolicy::Fail
    } else {
        ParsePolicy::Empty
    };

    let dataset = match &period.url {
        Some(url) => {
            Dataset::from_archive_url(BasicClient::new(), period.month, period.year, url, policy)?
        }
        None => {
            let mut resolver = UrlResolver::new();
            Dataset::fetch_with_policy(&mut resolver, period.month, period.year, policy)?
        }
    };

    info!(
        rows = dataset.len(),
        month = period.month,
        year = period.year,
        "dataset loaded"
    );
    Ok(dataset)
}
