use crate::{
    data::{
        AggregationError, FamilyMonthBucket, FamilyTotal, FlatTransaction, TimelineRow, YearMonth,
    },
    read::TransactionUser,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Output of `compute_timeline_families`: month buckets and totals, both in
/// family order, buckets chronological within a family.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FamilyTimeline {
    pub buckets: Vec<FamilyMonthBucket>,
    pub totals: Vec<FamilyTotal>,
}

impl FamilyTimeline {
    /// Report rows sorted by family then month, each family's `Total` row
    /// (when asked for) right after its last month.
    pub fn rows(&self, with_totals: bool) -> Vec<TimelineRow> {
        let mut rows: Vec<TimelineRow> = self.buckets.iter().map(TimelineRow::from).collect();
        if with_totals {
            rows.extend(self.totals.iter().map(TimelineRow::from));
        }
        rows.sort_by(|a, b| (&a.family, a.period).cmp(&(&b.family, b.period)));
        rows
    }
}

/// A transaction that passed validation, with its month already derived.
#[derive(Debug)]
struct Entry<'a> {
    tx: FlatTransaction<'a>,
    month: YearMonth,
}

/// Running state of one family. `known` only ever grows.
#[derive(Debug, Default)]
struct FamilyState<'a> {
    count: u64,
    sum_btc: Decimal,
    sum_usd: Decimal,
    known: HashSet<&'a str>,
}

/// Running state of one (family, month) bucket. `used` only ever grows.
#[derive(Debug, Default)]
struct BucketState<'a> {
    count: u64,
    sum_btc: Decimal,
    sum_usd: Decimal,
    used: HashSet<&'a str>,
    known: usize,
}

/// Collects transactions, then folds them into a `FamilyTimeline`. Nothing
/// is aggregated while collecting: the known-address columns depend on the
/// order in which a family's payments happened, not on the order in which
/// they were read.
#[derive(Debug, Default)]
pub(crate) struct TimelineBuilder<'a> {
    entries: Vec<Entry<'a>>,
}

impl<'a> TransactionUser<'a> for TimelineBuilder<'a> {
    fn use_tx(&mut self, tx: FlatTransaction<'a>) -> Result<(), AggregationError> {
        if tx.family.is_empty() {
            return Err(AggregationError::EmptyFamily {
                address: tx.address.to_string(),
            });
        }
        let month = YearMonth::from(tx.timestamp()?);
        self.entries.push(Entry { tx, month });
        Ok(())
    }
}

impl<'a> TimelineBuilder<'a> {
    pub fn finish(mut self) -> FamilyTimeline {
        // stable: same-second payments of a family keep their reading order
        self.entries
            .sort_by(|a, b| (a.tx.family, a.tx.time).cmp(&(b.tx.family, b.tx.time)));

        let mut families: BTreeMap<&'a str, FamilyState<'a>> = BTreeMap::new();
        let mut buckets: BTreeMap<(&'a str, YearMonth), BucketState<'a>> = BTreeMap::new();
        for Entry { tx, month } in self.entries {
            let btc = tx.btc();

            let family = families.entry(tx.family).or_default();
            family.count += 1;
            family.sum_btc += btc;
            family.sum_usd += tx.amount_usd;
            family.known.insert(tx.address);

            let bucket = buckets.entry((tx.family, month)).or_default();
            bucket.count += 1;
            bucket.sum_btc += btc;
            bucket.sum_usd += tx.amount_usd;
            bucket.used.insert(tx.address);
            // a month without new addresses carries the family's count forward
            bucket.known = family.known.len();
        }

        debug!(
            families = families.len(),
            buckets = buckets.len(),
            "aggregated family timeline"
        );
        FamilyTimeline {
            buckets: buckets
                .into_iter()
                .map(|((family, month), bucket)| FamilyMonthBucket {
                    family: family.to_string(),
                    month,
                    count: bucket.count,
                    sum_btc: bucket.sum_btc,
                    sum_usd: bucket.sum_usd,
                    used_addresses: bucket.used.len(),
                    known_addresses: bucket.known,
                })
                .collect(),
            totals: families
                .into_iter()
                .map(|(family, state)| FamilyTotal {
                    family: family.to_string(),
                    count: state.count,
                    sum_btc: state.sum_btc,
                    sum_usd: state.sum_usd,
                    addresses: state.known.len(),
                })
                .collect(),
        }
    }
}

/// Per-family monthly timeline of a flattened dataset. Families without any
/// transaction do not appear. Fails on the first transaction with an empty
/// family label or an unrepresentable timestamp; no partial timeline is
/// returned.
pub(crate) fn compute_timeline_families<'a, I>(txs: I) -> Result<FamilyTimeline, AggregationError>
where
    I: IntoIterator<Item = FlatTransaction<'a>>,
{
    let mut builder = TimelineBuilder::default();
    for tx in txs {
        builder.use_tx(tx)?;
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use crate::{
        data::{
            AddressRecord, AggregationError, FamilyMonthBucket, FamilyTotal, Period, Transaction,
            YearMonth,
        },
        read::flatten,
    };
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    use super::{compute_timeline_families, FamilyTimeline};

    const JAN_15_2021: i64 = 1610668800;
    const JAN_20_2021: i64 = 1611100800;
    const JAN_31_2021_LAST_SECOND: i64 = 1612137599;
    const FEB_10_2021: i64 = 1612915200;
    const MAR_05_2021: i64 = 1614902400;
    const MAY_01_2021: i64 = 1619827200;
    const AUG_31_2021: i64 = 1630368000;
    const DEC_31_2020: i64 = 1609372800;

    fn record(family: &str, address: &str, txs: &[(i64, i64, Decimal)]) -> AddressRecord {
        AddressRecord {
            address: address.to_string(),
            family: family.to_string(),
            transactions: txs
                .iter()
                .map(|&(time, amount, amount_usd)| Transaction {
                    time,
                    amount,
                    amount_usd,
                })
                .collect(),
        }
    }

    fn timeline(records: &[AddressRecord]) -> FamilyTimeline {
        compute_timeline_families(flatten(records)).unwrap()
    }

    fn bucket(
        family: &str,
        month: (i32, u32),
        count: u64,
        sum_btc: Decimal,
        sum_usd: Decimal,
        used_addresses: usize,
        known_addresses: usize,
    ) -> FamilyMonthBucket {
        FamilyMonthBucket {
            family: family.to_string(),
            month: YearMonth::new(month.0, month.1),
            count,
            sum_btc,
            sum_usd,
            used_addresses,
            known_addresses,
        }
    }

    #[test]
    fn test_used_and_known_addresses() {
        let records = vec![
            record("X", "A1", &[(JAN_15_2021, 100_000_000, dec!(30000))]),
            record(
                "X",
                "A2",
                &[
                    (JAN_20_2021, 50_000_000, dec!(16000.5)),
                    (FEB_10_2021, 25_000_000, dec!(11000.25)),
                ],
            ),
        ];
        let timeline = timeline(&records);
        assert_eq!(
            timeline.buckets,
            [
                bucket("X", (2021, 1), 2, dec!(1.5), dec!(46000.5), 2, 2),
                bucket("X", (2021, 2), 1, dec!(0.25), dec!(11000.25), 1, 2),
            ]
        );
        assert_eq!(
            timeline.totals,
            [FamilyTotal {
                family: "X".to_string(),
                count: 3,
                sum_btc: dec!(1.75),
                sum_usd: dec!(57000.75),
                addresses: 2,
            }]
        );
    }

    #[test]
    fn test_family_without_transactions() {
        let records = vec![
            record("Empty", "E1", &[]),
            record("Empty", "E2", &[]),
            record("Paid", "P1", &[(JAN_15_2021, 1, dec!(0.01))]),
        ];
        let timeline = timeline(&records);
        assert!(timeline.buckets.iter().all(|b| b.family != "Empty"));
        assert!(timeline.totals.iter().all(|t| t.family != "Empty"));
        assert_eq!(timeline.totals.len(), 1);
    }

    #[test]
    fn test_families_are_independent() {
        let records = vec![
            record("Ryuk", "R1", &[(JAN_15_2021, 10, dec!(1))]),
            record("Conti", "C1", &[(JAN_20_2021, 20, dec!(2))]),
            record("Conti", "C2", &[(FEB_10_2021, 30, dec!(3))]),
            record("Ryuk", "R2", &[(MAR_05_2021, 40, dec!(4))]),
        ];
        let timeline = timeline(&records);
        assert_eq!(
            timeline.buckets,
            [
                bucket("Conti", (2021, 1), 1, dec!(0.0000002), dec!(2), 1, 1),
                bucket("Conti", (2021, 2), 1, dec!(0.0000003), dec!(3), 1, 2),
                bucket("Ryuk", (2021, 1), 1, dec!(0.0000001), dec!(1), 1, 1),
                bucket("Ryuk", (2021, 3), 1, dec!(0.0000004), dec!(4), 1, 2),
            ]
        );
    }

    #[test]
    fn test_address_reused_in_later_months() {
        let records = vec![record(
            "Locky",
            "L1",
            &[
                (JAN_15_2021, 1, dec!(1)),
                (MAY_01_2021, 1, dec!(1)),
                (AUG_31_2021, 1, dec!(1)),
            ],
        )];
        let timeline = timeline(&records);
        let known: Vec<usize> = timeline.buckets.iter().map(|b| b.known_addresses).collect();
        assert_eq!(known, [1, 1, 1]);
        let used: Vec<usize> = timeline.buckets.iter().map(|b| b.used_addresses).collect();
        assert_eq!(used, [1, 1, 1]);
        assert_eq!(timeline.totals[0].addresses, 1);
    }

    #[test]
    fn test_known_follows_payment_time_not_reading_order() {
        // A3 is read first but paid last; it must not be known in January
        let records = vec![
            record("Cerber", "A3", &[(MAR_05_2021, 1, dec!(1))]),
            record("Cerber", "A1", &[(JAN_15_2021, 1, dec!(1))]),
            record(
                "Cerber",
                "A2",
                &[(FEB_10_2021, 1, dec!(1)), (JAN_20_2021, 1, dec!(1))],
            ),
        ];
        let timeline = timeline(&records);
        let known: Vec<(YearMonth, usize)> = timeline
            .buckets
            .iter()
            .map(|b| (b.month, b.known_addresses))
            .collect();
        assert_eq!(
            known,
            [
                (YearMonth::new(2021, 1), 2),
                (YearMonth::new(2021, 2), 2),
                (YearMonth::new(2021, 3), 3),
            ]
        );
    }

    #[test]
    fn test_month_boundaries_are_utc() {
        let records = vec![record(
            "Maze",
            "M1",
            &[
                (DEC_31_2020, 1, dec!(1)),
                (JAN_31_2021_LAST_SECOND, 1, dec!(1)),
                (JAN_31_2021_LAST_SECOND + 1, 1, dec!(1)),
            ],
        )];
        let months: Vec<YearMonth> = timeline(&records).buckets.iter().map(|b| b.month).collect();
        assert_eq!(
            months,
            [
                YearMonth::new(2020, 12),
                YearMonth::new(2021, 1),
                YearMonth::new(2021, 2),
            ]
        );
    }

    #[test]
    fn test_address_shared_between_families() {
        let records = vec![
            record("Sodinokibi", "shared", &[(JAN_15_2021, 1, dec!(1))]),
            record("REvil", "shared", &[(FEB_10_2021, 1, dec!(1))]),
        ];
        let timeline = timeline(&records);
        assert_eq!(timeline.totals.len(), 2);
        assert!(timeline.totals.iter().all(|t| t.addresses == 1));
    }

    #[test]
    fn test_rows_with_and_without_totals() {
        let records = vec![
            record("B", "b1", &[(FEB_10_2021, 1, dec!(1)), (JAN_15_2021, 1, dec!(1))]),
            record("A", "a1", &[(MAR_05_2021, 1, dec!(1))]),
        ];
        let timeline = timeline(&records);
        let periods: Vec<(String, Period)> = timeline
            .rows(true)
            .into_iter()
            .map(|r| (r.family, r.period))
            .collect();
        assert_eq!(
            periods,
            [
                ("A".to_string(), Period::Month(YearMonth::new(2021, 3))),
                ("A".to_string(), Period::Total),
                ("B".to_string(), Period::Month(YearMonth::new(2021, 1))),
                ("B".to_string(), Period::Month(YearMonth::new(2021, 2))),
                ("B".to_string(), Period::Total),
            ]
        );
        let rows = timeline.rows(false);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.period != Period::Total));

        let rows = timeline.rows(true);
        let total = &rows[4];
        assert_eq!(total.used_addresses, 1);
        assert_eq!(total.known_addresses, 1);
    }

    #[test]
    fn test_timeline_invariants() {
        let mut records = Vec::new();
        let times = [
            DEC_31_2020,
            JAN_15_2021,
            JAN_20_2021,
            FEB_10_2021,
            MAR_05_2021,
            MAY_01_2021,
            AUG_31_2021,
        ];
        for (i, family) in ["Phobos", "Dharma", "Phobos", "Netwalker", "Dharma"]
            .iter()
            .enumerate()
        {
            for j in 0..4usize {
                let txs: Vec<(i64, i64, Decimal)> = (0..=j)
                    .map(|k| {
                        (
                            times[(i * 3 + j * 2 + k) % times.len()],
                            (i * 1000 + j * 100 + k) as i64,
                            Decimal::new((i * 7 + k) as i64, 2),
                        )
                    })
                    .collect();
                records.push(record(family, &format!("{family}-{}", j % 3), &txs));
            }
        }
        let timeline = timeline(&records);
        let dataset_count: usize = records.iter().map(|r| r.transactions.len()).sum();
        assert_eq!(
            timeline.totals.iter().map(|t| t.count).sum::<u64>(),
            dataset_count as u64
        );

        for total in &timeline.totals {
            let buckets: Vec<_> = timeline
                .buckets
                .iter()
                .filter(|b| b.family == total.family)
                .collect();
            assert!(buckets.windows(2).all(|w| w[0].month < w[1].month));
            assert!(buckets
                .windows(2)
                .all(|w| w[0].known_addresses <= w[1].known_addresses));
            assert!(buckets.iter().all(|b| b.used_addresses <= b.known_addresses));

            let distinct: HashSet<&str> = records
                .iter()
                .filter(|r| r.family == total.family && !r.transactions.is_empty())
                .map(|r| r.address.as_str())
                .collect();
            assert_eq!(buckets.last().unwrap().known_addresses, distinct.len());
            assert_eq!(total.addresses, distinct.len());

            assert_eq!(total.count, buckets.iter().map(|b| b.count).sum::<u64>());
            assert_eq!(total.sum_btc, buckets.iter().map(|b| b.sum_btc).sum::<Decimal>());
            assert_eq!(total.sum_usd, buckets.iter().map(|b| b.sum_usd).sum::<Decimal>());
        }

        assert_eq!(super::compute_timeline_families(flatten(&records)).unwrap(), timeline);
    }

    #[test]
    fn test_empty_family_label() {
        let records = vec![
            record("Ok", "o1", &[(JAN_15_2021, 1, dec!(1))]),
            record("", "nameless", &[(JAN_15_2021, 1, dec!(1))]),
        ];
        assert_eq!(
            compute_timeline_families(flatten(&records)),
            Err(AggregationError::EmptyFamily {
                address: "nameless".to_string()
            })
        );
    }

    #[test]
    fn test_invalid_timestamp() {
        let records = vec![record("Ok", "o1", &[(i64::MIN, 1, dec!(1))])];
        assert_eq!(
            compute_timeline_families(flatten(&records)),
            Err(AggregationError::InvalidTimestamp {
                address: "o1".to_string(),
                time: i64::MIN,
            })
        );
    }

    #[test]
    fn test_empty_dataset() {
        let timeline = timeline(&[]);
        assert!(timeline.buckets.is_empty());
        assert!(timeline.totals.is_empty());
        assert!(timeline.rows(true).is_empty());
    }
}
