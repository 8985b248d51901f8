use crate::{
    data::{
        AddressRecord, AggregationError, FamilyMonthBucket, FamilyTotal, FlatTransaction,
        PeriodRow,
    },
    read::{feed_transactions, TransactionUser},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashSet};

/// Dataset-wide figures. Families and addresses without any payment still
/// count in `families` and `addresses`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Summary {
    pub families: usize,
    pub families_with_payments: usize,
    pub addresses: usize,
    pub addresses_with_payments: usize,
    pub transactions: u64,
    pub sum_btc: Decimal,
    pub sum_usd: Decimal,
    pub first_payment: Option<DateTime<Utc>>,
    pub last_payment: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct SummaryBuilder<'a> {
    summary: Summary,
    paying_families: HashSet<&'a str>,
    paying_addresses: HashSet<(&'a str, &'a str)>,
}

impl<'a> TransactionUser<'a> for SummaryBuilder<'a> {
    fn use_tx(&mut self, tx: FlatTransaction<'a>) -> Result<(), AggregationError> {
        let timestamp = tx.timestamp()?;
        let summary = &mut self.summary;
        summary.transactions += 1;
        summary.sum_btc += tx.btc();
        summary.sum_usd += tx.amount_usd;
        summary.first_payment = Some(summary.first_payment.map_or(timestamp, |t| t.min(timestamp)));
        summary.last_payment = Some(summary.last_payment.map_or(timestamp, |t| t.max(timestamp)));
        self.paying_families.insert(tx.family);
        self.paying_addresses.insert((tx.family, tx.address));
        Ok(())
    }
}

impl Summary {
    pub fn from_records(records: &[AddressRecord]) -> Result<Self, AggregationError> {
        let mut builder = SummaryBuilder::default();
        feed_transactions(records, &mut builder)?;
        let families: HashSet<&str> = records.iter().map(|r| r.family.as_str()).collect();
        let addresses: HashSet<(&str, &str)> = records
            .iter()
            .map(|r| (r.family.as_str(), r.address.as_str()))
            .collect();
        Ok(Summary {
            families: families.len(),
            families_with_payments: builder.paying_families.len(),
            addresses: addresses.len(),
            addresses_with_payments: builder.paying_addresses.len(),
            ..builder.summary
        })
    }
}

/// Width of the periods of a global timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Granularity {
    Year,
    Month,
}

impl Granularity {
    fn key(self, timestamp: DateTime<Utc>) -> String {
        match self {
            Granularity::Year => timestamp.format("%Y").to_string(),
            Granularity::Month => timestamp.format("%Y-%m").to_string(),
        }
    }
}

/// Payments of all families grouped by year or by month.
#[derive(Debug)]
pub(crate) struct PeriodTimeline {
    granularity: Granularity,
    periods: BTreeMap<String, PeriodRow>,
}

impl<'a> TransactionUser<'a> for PeriodTimeline {
    fn use_tx(&mut self, tx: FlatTransaction<'a>) -> Result<(), AggregationError> {
        let key = self.granularity.key(tx.timestamp()?);
        let row = self
            .periods
            .entry(key.clone())
            .or_insert_with(|| PeriodRow::new(key));
        row.count += 1;
        row.sum_btc += tx.btc();
        row.sum_usd += tx.amount_usd;
        Ok(())
    }
}

impl PeriodTimeline {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            periods: BTreeMap::new(),
        }
    }

    /// Rows sorted by period, oldest first.
    pub fn into_rows(self) -> Vec<PeriodRow> {
        self.periods.into_values().collect()
    }
}

pub(crate) fn compute_timeline(
    records: &[AddressRecord],
    granularity: Granularity,
) -> Result<Vec<PeriodRow>, AggregationError> {
    let mut timeline = PeriodTimeline::new(granularity);
    feed_transactions(records, &mut timeline)?;
    Ok(timeline.into_rows())
}

/// What families are ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Metric {
    Count,
    Btc,
    Usd,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Count, Metric::Btc, Metric::Usd];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Count => "number of transactions",
            Metric::Btc => "payment sum in BTC",
            Metric::Usd => "payment sum in USD",
        }
    }
}

/// The `n` largest families by `metric`, largest first; equal values are
/// ordered by family name.
pub(crate) fn top_families(totals: &[FamilyTotal], metric: Metric, n: usize) -> Vec<&FamilyTotal> {
    let mut ranked: Vec<&FamilyTotal> = totals.iter().collect();
    ranked.sort_by(|a, b| {
        let order = match metric {
            Metric::Count => b.count.cmp(&a.count),
            Metric::Btc => b.sum_btc.cmp(&a.sum_btc),
            Metric::Usd => b.sum_usd.cmp(&a.sum_usd),
        };
        order.then_with(|| a.family.cmp(&b.family))
    });
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SizeGroup {
    Small,
    Medium,
    Large,
}

/// Upper bounds (exclusive, in USD) of a family's best month for the small
/// and medium groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Thresholds {
    pub small: Decimal,
    pub medium: Decimal,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            small: dec!(1000),
            medium: dec!(50000),
        }
    }
}

/// Families grouped by their largest monthly USD sum, names sorted within a
/// group. Empty groups are left out.
pub(crate) fn size_groups(
    buckets: &[FamilyMonthBucket],
    thresholds: Thresholds,
) -> BTreeMap<SizeGroup, Vec<&str>> {
    let mut best_month: BTreeMap<&str, Decimal> = BTreeMap::new();
    for bucket in buckets {
        let best = best_month.entry(bucket.family.as_str()).or_insert(bucket.sum_usd);
        *best = (*best).max(bucket.sum_usd);
    }

    let mut groups: BTreeMap<SizeGroup, Vec<&str>> = BTreeMap::new();
    for (family, best) in best_month {
        let group = if best < thresholds.small {
            SizeGroup::Small
        } else if best < thresholds.medium {
            SizeGroup::Medium
        } else {
            SizeGroup::Large
        };
        groups.entry(group).or_default().push(family);
    }
    groups
}
