use crate::data::{AddressRecord, AggregationError, FlatTransaction, LoadError};
use std::path::Path;
use tracing::debug;

/// Trait for doing something with each `FlatTransaction` of a dataset. The
/// family timeline and the global statistics are all built this way; tests
/// use it to check what the flattener hands out.
pub(crate) trait TransactionUser<'a> {
    fn use_tx(&mut self, tx: FlatTransaction<'a>) -> Result<(), AggregationError>;
}

/// JSON importer for `AddressRecord`s. Accepts either a bare array of records
/// or the tracker export, which wraps that array in a `result` field.
pub(crate) fn read_records<R: std::io::Read>(reader: R) -> Result<Vec<AddressRecord>, LoadError> {
    let mut value: serde_json::Value = serde_json::from_reader(std::io::BufReader::new(reader))?;
    let records = if value.get("result").is_some() {
        value["result"].take()
    } else {
        value
    };
    Ok(serde_json::from_value(records)?)
}

pub(crate) fn read_records_file(path: &Path) -> Result<Vec<AddressRecord>, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_records(file)
}

/// One `FlatTransaction` per transaction; records without any contribute
/// nothing.
pub(crate) fn flatten(records: &[AddressRecord]) -> impl Iterator<Item = FlatTransaction<'_>> {
    records.iter().flat_map(|record| {
        record.transactions.iter().map(move |tx| FlatTransaction {
            family: &record.family,
            address: &record.address,
            time: tx.time,
            amount: tx.amount,
            amount_usd: tx.amount_usd,
        })
    })
}

/// Hands every flattened transaction to `user`, stopping at the first
/// failure. Returns the number of transactions used.
pub(crate) fn feed_transactions<'a, U: TransactionUser<'a>>(
    records: &'a [AddressRecord],
    user: &mut U,
) -> Result<u64, AggregationError> {
    let mut count = 0;
    for tx in flatten(records) {
        user.use_tx(tx)?;
        count += 1;
    }
    debug!(transactions = count, "fed flattened transactions");
    Ok(count)
}
