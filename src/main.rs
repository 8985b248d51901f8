use anyhow::Context;
use clap::{Parser, Subcommand};
use compute::{compute_timeline_families, FamilyTimeline};
use data::{AddressRecord, EmptyDatasetError};
use read::{flatten, read_records_file};
use rust_decimal::Decimal;
use stats::{compute_timeline, size_groups, Granularity, Metric, Summary, Thresholds};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};
use write::{write_family_timeline, write_period_timeline};

mod compute;
mod data;
mod display;
mod log;
mod read;
mod stats;
mod write;

/// Payment statistics over a dataset of ransomware extortion addresses.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// JSON dataset of addresses, either a bare array or a `{"result": [...]}` export
    dataset: PathBuf,

    /// Write the report to this file instead of stdout
    #[arg(long, short, global = true, env = "RANSOMSTATS_OUTPUT")]
    output: Option<PathBuf>,

    /// Field delimiter of CSV reports
    #[arg(long, global = true, default_value_t = ',', env = "RANSOMSTATS_DELIMITER")]
    delimiter: char,

    /// Log filter, e.g. `debug`; defaults to `RUST_LOG`, then `info`
    #[arg(long, global = true, env = "RANSOMSTATS_LOG")]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true, env = "RANSOMSTATS_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Monthly timeline per family with used and known address counts
    Families {
        /// Leave out the "Total" row of each family
        #[arg(long)]
        no_totals: bool,
    },
    /// Monthly timeline over all families
    Months,
    /// Yearly timeline over all families
    Years,
    /// Largest families by number of transactions, BTC or USD
    Top {
        #[arg(long, short = 'n', default_value_t = 15)]
        count: usize,
        /// Rank by a single metric instead of all three
        #[arg(long, value_enum)]
        by: Option<Metric>,
    },
    /// Families grouped by their largest monthly payment sum in USD
    Groups {
        #[arg(long, default_value = "1000")]
        small: Decimal,
        #[arg(long, default_value = "50000")]
        medium: Decimal,
    },
    /// General statistics
    Summary,
    /// Write every timeline into a directory and print the summary
    All {
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long)]
        no_totals: bool,
    },
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, anyhow::Error> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    })
}

fn family_timeline(records: &[AddressRecord]) -> Result<FamilyTimeline, anyhow::Error> {
    let timeline = compute_timeline_families(flatten(records))?;
    info!(
        families = timeline.totals.len(),
        buckets = timeline.buckets.len(),
        "computed family timeline"
    );
    Ok(timeline)
}

fn write_all(
    records: &[AddressRecord],
    dir: &Path,
    with_totals: bool,
    delimiter: u8,
) -> Result<(), anyhow::Error> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    // everything is computed before the first file is created
    let families = family_timeline(records)?.rows(with_totals);
    let months = compute_timeline(records, Granularity::Month)?;
    let years = compute_timeline(records, Granularity::Year)?;
    let summary = Summary::from_records(records)?;

    write_family_timeline(
        open_output(Some(dir.join("timeline_families.csv").as_path()))?,
        &families,
        delimiter,
    )?;
    write_period_timeline(
        open_output(Some(dir.join("timeline_months.csv").as_path()))?,
        &months,
        delimiter,
    )?;
    write_period_timeline(
        open_output(Some(dir.join("timeline_years.csv").as_path()))?,
        &years,
        delimiter,
    )?;
    info!(dir = %dir.display(), "wrote timelines");
    display::print_summary(std::io::stdout().lock(), &summary)?;
    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    log::init(cli.log_level.as_deref(), cli.log_json);

    if !cli.delimiter.is_ascii() {
        anyhow::bail!("delimiter must be a single ASCII character, got {:?}", cli.delimiter);
    }
    let delimiter = cli.delimiter as u8;

    let records = read_records_file(&cli.dataset)?;
    info!(records = records.len(), dataset = %cli.dataset.display(), "loaded dataset");
    if flatten(&records).next().is_none() {
        warn!("{}", EmptyDatasetError);
    }

    let output = cli.output.as_deref();
    match cli.command {
        Command::Families { no_totals } => {
            let rows = family_timeline(&records)?.rows(!no_totals);
            write_family_timeline(open_output(output)?, &rows, delimiter)?;
        }
        Command::Months => {
            let rows = compute_timeline(&records, Granularity::Month)?;
            write_period_timeline(open_output(output)?, &rows, delimiter)?;
        }
        Command::Years => {
            let rows = compute_timeline(&records, Granularity::Year)?;
            write_period_timeline(open_output(output)?, &rows, delimiter)?;
        }
        Command::Top { count, by } => {
            let timeline = family_timeline(&records)?;
            let metrics = by.map_or_else(|| Metric::ALL.to_vec(), |metric| vec![metric]);
            display::print_top_families(open_output(output)?, &timeline.totals, &metrics, count)?;
        }
        Command::Groups { small, medium } => {
            if small > medium {
                anyhow::bail!("--small ({small}) must not exceed --medium ({medium})");
            }
            let thresholds = Thresholds { small, medium };
            let timeline = family_timeline(&records)?;
            let groups = size_groups(&timeline.buckets, thresholds);
            display::print_size_groups(open_output(output)?, &groups, thresholds)?;
        }
        Command::Summary => {
            let summary = Summary::from_records(&records)?;
            display::print_summary(open_output(output)?, &summary)?;
        }
        Command::All {
            output_dir,
            no_totals,
        } => write_all(&records, &output_dir, !no_totals, delimiter)?,
    }
    Ok(())
}
