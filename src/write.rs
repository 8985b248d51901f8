use crate::data::{PeriodRow, TimelineRow};
use serde::Serialize;
use tracing::debug;

pub const FAMILY_TIMELINE_HEADER: [&str; 7] = [
    "Family",
    "Month",
    "Count",
    "SumBTC",
    "SumUSD",
    "UsedAddresses",
    "KnownAddresses",
];

pub const PERIOD_TIMELINE_HEADER: [&str; 6] =
    ["Period", "Count", "SumBTC", "SumUSD", "AvgBTC", "AvgUSD"];

/// Delimited exporter for report rows. The header is written up front so an
/// empty report still has one.
fn write_table<W: std::io::Write, T: Serialize>(
    writer: W,
    header: &[&str],
    rows: impl IntoIterator<Item = T>,
    delimiter: u8,
) -> Result<(), anyhow::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .from_writer(writer);
    wtr.write_record(header)?;
    let mut written = 0usize;
    for row in rows {
        wtr.serialize(row)?;
        written += 1;
    }
    wtr.flush()?;
    debug!(rows = written, "wrote report");
    Ok(())
}

/// Exporter for the per-family timeline, rows already in report order.
pub(crate) fn write_family_timeline<W: std::io::Write>(
    writer: W,
    rows: &[TimelineRow],
    delimiter: u8,
) -> Result<(), anyhow::Error> {
    write_table(writer, &FAMILY_TIMELINE_HEADER, rows, delimiter)
}

pub(crate) fn write_period_timeline<W: std::io::Write>(
    writer: W,
    rows: &[PeriodRow],
    delimiter: u8,
) -> Result<(), anyhow::Error> {
    write_table(writer, &PERIOD_TIMELINE_HEADER, rows, delimiter)
}
