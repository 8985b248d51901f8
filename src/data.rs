use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Scale of a Satoshi amount expressed in BTC (10^8 Satoshi = 1 BTC).
pub const BTC_DIGITS: u32 = 8;
/// Number of decimals printed for USD amounts.
pub const USD_DIGITS: u32 = 6;

/// One payment received by an extortion address, as found in the dataset.
/// `amount` is in Satoshi; `amount_usd` is the value at payment time and is
/// taken as given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct Transaction {
    pub time: i64,
    pub amount: i64,
    #[serde(rename = "amountUSD")]
    pub amount_usd: Decimal,
}

/// An extortion address and every payment it received. The same address
/// string may show up under several families; it is then counted once per
/// family.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct AddressRecord {
    pub address: String,
    pub family: String,
    pub transactions: Vec<Transaction>,
}

/// A single transaction projected out of its `AddressRecord`. Borrows the
/// labels from the loaded dataset, which outlives every aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlatTransaction<'a> {
    pub family: &'a str,
    pub address: &'a str,
    pub time: i64,
    pub amount: i64,
    pub amount_usd: Decimal,
}

impl FlatTransaction<'_> {
    /// Amount in BTC; exact, since a Satoshi count is just a scaled integer.
    pub fn btc(&self) -> Decimal {
        Decimal::new(self.amount, BTC_DIGITS)
    }

    pub fn timestamp(&self) -> Result<DateTime<Utc>, AggregationError> {
        DateTime::from_timestamp(self.time, 0).ok_or_else(|| AggregationError::InvalidTimestamp {
            address: self.address.to_string(),
            time: self.time,
        })
    }
}

/// A calendar month in UTC. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }
}

impl From<DateTime<Utc>> for YearMonth {
    fn from(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp.year(), timestamp.month())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Second column of the family timeline. `Total` is declared last so that the
/// derived ordering puts it right after the last month of its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Period {
    Month(YearMonth),
    Total,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Month(month) => fmt::Display::fmt(month, f),
            Period::Total => f.write_str("Total"),
        }
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Payments of one family within one calendar month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FamilyMonthBucket {
    pub family: String,
    pub month: YearMonth,
    pub count: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
    /// Distinct addresses paid during this month.
    pub used_addresses: usize,
    /// Distinct addresses paid during this month or any earlier one.
    pub known_addresses: usize,
}

/// Payments of one family over its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FamilyTotal {
    pub family: String,
    pub count: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
    pub addresses: usize,
}

/// A line of the family timeline report: either a month bucket or the
/// family's total. For totals, every known address has been used, so both
/// address columns carry the same number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "TimelineRowSerializer")]
pub(crate) struct TimelineRow {
    pub family: String,
    pub period: Period,
    pub count: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
    pub used_addresses: usize,
    pub known_addresses: usize,
}

impl From<&FamilyMonthBucket> for TimelineRow {
    fn from(bucket: &FamilyMonthBucket) -> Self {
        Self {
            family: bucket.family.clone(),
            period: Period::Month(bucket.month),
            count: bucket.count,
            sum_btc: bucket.sum_btc,
            sum_usd: bucket.sum_usd,
            used_addresses: bucket.used_addresses,
            known_addresses: bucket.known_addresses,
        }
    }
}

impl From<&FamilyTotal> for TimelineRow {
    fn from(total: &FamilyTotal) -> Self {
        Self {
            family: total.family.clone(),
            period: Period::Total,
            count: total.count,
            sum_btc: total.sum_btc,
            sum_usd: total.sum_usd,
            used_addresses: total.addresses,
            known_addresses: total.addresses,
        }
    }
}

/// Proxy for serializing `TimelineRow`: amounts get their fixed number of
/// decimals just before they are written.
#[derive(Serialize)]
pub(crate) struct TimelineRowSerializer {
    pub family: String,
    pub period: Period,
    pub count: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
    pub used_addresses: usize,
    pub known_addresses: usize,
}

impl From<TimelineRow> for TimelineRowSerializer {
    fn from(row: TimelineRow) -> Self {
        Self {
            family: row.family,
            period: row.period,
            count: row.count,
            sum_btc: rescaled(row.sum_btc, BTC_DIGITS),
            sum_usd: rescaled(row.sum_usd, USD_DIGITS),
            used_addresses: row.used_addresses,
            known_addresses: row.known_addresses,
        }
    }
}

/// All payments of one year (`2021`) or one month (`2021-06`), across
/// families. The averages are never stored: they are computed in
/// `PeriodRowSerializer` at serialization time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "PeriodRowSerializer")]
pub(crate) struct PeriodRow {
    pub period: String,
    pub count: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
}

impl PeriodRow {
    pub fn new(period: String) -> Self {
        Self {
            period,
            count: 0,
            sum_btc: Decimal::ZERO,
            sum_usd: Decimal::ZERO,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct PeriodRowSerializer {
    pub period: String,
    pub count: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
    pub avg_btc: Decimal,
    pub avg_usd: Decimal,
}

impl From<PeriodRow> for PeriodRowSerializer {
    fn from(row: PeriodRow) -> Self {
        // a period only exists once a transaction landed in it
        let count = Decimal::from(row.count.max(1));
        Self {
            period: row.period,
            count: row.count,
            avg_btc: rescaled(row.sum_btc / count, BTC_DIGITS),
            avg_usd: rescaled(row.sum_usd / count, USD_DIGITS),
            sum_btc: rescaled(row.sum_btc, BTC_DIGITS),
            sum_usd: rescaled(row.sum_usd, USD_DIGITS),
        }
    }
}

fn rescaled(mut amount: Decimal, digits: u32) -> Decimal {
    amount.rescale(digits);
    amount
}

/// The dataset could not be turned into `AddressRecord`s. Fatal.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cannot open dataset {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed dataset: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A transaction cannot be placed in a family timeline. Fatal as well: a
/// partial aggregate would under-count the cumulative address columns.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AggregationError {
    #[error("Transaction of address {address} has an out-of-range timestamp {time}")]
    InvalidTimestamp { address: String, time: i64 },
    #[error("Address {address} has an empty family label")]
    EmptyFamily { address: String },
}

/// Not fatal: the reports are still written, only with no rows.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("Dataset contains no transactions, reports will be empty")]
pub struct EmptyDatasetError;
