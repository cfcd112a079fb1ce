//! kqdl CLI: catalog, data requests, and cache inspection.
//!
//! Commands:
//! - `catalog` — list every fetchable field per source and family
//! - `get` — load fields over a date range and print or save the table
//! - `cache status` — report cached dates, row counts and sizes per family

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kqdl_core::data::{universe, SnapshotCache, SyntheticProvider};
use kqdl_core::{show_catalog, Family, FieldRequest, Loader, LoaderConfig, ResultTable};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kqdl", about = "kqdl — Korean stock-market data loader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every field the loader can fetch.
    Catalog,
    /// Load one or more fields over a date range.
    Get {
        /// Field names or KRX labels (e.g., close 종가 per).
        #[arg(required = true)]
        fields: Vec<String>,

        /// Data source: pykrx, fdr, opendartreader.
        #[arg(long, default_value = "pykrx")]
        source: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD). Defaults to the start date.
        #[arg(long)]
        end: Option<String>,

        /// Instrument codes to keep (e.g., 005930 000660). Defaults to all.
        #[arg(long, num_args = 1..)]
        universe: Vec<String>,

        /// Return the (date, instrument) × field shape even for one field.
        #[arg(long, default_value_t = false)]
        multi: bool,

        /// Offline mode: read the cache only.
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Serve deterministic synthetic data instead of the KRX portal.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Loader config TOML. Flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cache directory.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Skip non-trading days.
        #[arg(long, default_value_t = false)]
        trading_days_only: bool,

        /// Write the table as CSV instead of printing it.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached dates, row counts and sizes per family.
    Status {
        /// Cache directory. Defaults to ./data/cache.
        #[arg(long, default_value = "data/cache")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Catalog => {
            println!("{}", show_catalog());
            Ok(())
        }
        Commands::Get {
            fields,
            source,
            start,
            end,
            universe,
            multi,
            offline,
            synthetic,
            config,
            cache_dir,
            trading_days_only,
            output,
        } => {
            let mut loader_config = match config {
                Some(path) => LoaderConfig::from_file(&path)?,
                None => LoaderConfig::default(),
            };
            if cache_dir.is_some() {
                loader_config.cache_dir = cache_dir;
            }
            loader_config.trading_days_only |= trading_days_only;

            let request = if fields.len() == 1 && !multi {
                FieldRequest::Single(fields[0].clone())
            } else {
                FieldRequest::Multi(fields)
            };
            let universe = (!universe.is_empty()).then(|| universe_from_args(&universe));

            run_get(GetArgs {
                source,
                start,
                end,
                universe,
                request,
                download: !offline,
                synthetic,
                config: loader_config,
                output,
            })
        }
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
        },
    }
}

struct GetArgs {
    source: String,
    start: String,
    end: Option<String>,
    universe: Option<kqdl_core::Universe>,
    request: FieldRequest,
    download: bool,
    synthetic: bool,
    config: LoaderConfig,
    output: Option<PathBuf>,
}

/// Accepts space- or comma-separated codes.
fn universe_from_args(args: &[String]) -> kqdl_core::Universe {
    universe(
        args.iter()
            .flat_map(|a| a.split(','))
            .map(str::trim)
            .filter(|a| !a.is_empty()),
    )
}

fn run_get(args: GetArgs) -> Result<()> {
    let mut loader = Loader::new(&args.source, &args.start, args.end.as_deref(), args.universe)?
        .with_config(args.config)?;
    if args.synthetic {
        loader = loader.with_provider(Arc::new(SyntheticProvider::default()));
    }

    let (table, report) = loader.get_data_with_report(args.request, args.download)?;

    eprintln!(
        "{} date(s) from cache, {} downloaded",
        report.from_cache, report.downloaded
    );
    for gap in &report.gaps {
        eprintln!("Skipped {gap}");
    }

    match args.output {
        Some(path) => {
            table.write_csv(&path)?;
            println!("Saved to: {}", path.display());
        }
        None => print_table(&table)?,
    }

    if !report.is_complete() {
        bail!("{} date(s) could not be fetched", report.gaps.len());
    }
    Ok(())
}

fn print_table(table: &ResultTable) -> Result<()> {
    if table.is_empty() {
        println!("(no data)");
        return Ok(());
    }
    print!("{}", table.to_csv()?);
    Ok(())
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let cache = SnapshotCache::new(cache_dir);
    let families = [Family::Ohlcv, Family::MarketCap, Family::Fundamental];

    let mut total_size: u64 = 0;
    let mut rows: Vec<(Family, String, usize, usize, u64)> = Vec::new();

    for family in families {
        let dates = cache.cached_dates(family);
        if dates.is_empty() {
            continue;
        }
        let size = dir_size(&cache_dir.join(format!("family={family}")));
        total_size += size;

        let row_count = match cache.get_meta(family) {
            Some(meta) if meta.date_count == dates.len() => meta.row_count,
            _ => cache.refresh_meta(family)?.row_count,
        };
        let range = match (dates.first(), dates.last()) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => String::new(),
        };
        rows.push((family, range, dates.len(), row_count, size));
    }

    if rows.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }

    println!("Cache: {}", cache_dir.display());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!(
        "{:<12} {:<25} {:>6} {:>10} {:>10}",
        "Family", "Date Range", "Dates", "Rows", "Size"
    );
    println!("{}", "-".repeat(67));
    for (family, range, dates, row_count, size) in &rows {
        println!(
            "{:<12} {:<25} {:>6} {:>10} {:>10}",
            family.as_str(),
            range,
            dates,
            row_count,
            format_size(*size)
        );
    }

    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
