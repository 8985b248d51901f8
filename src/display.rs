//! Human-readable console output. Colors are switched off by `console` when
//! the output is not a terminal.

use crate::{
    data::FamilyTotal,
    stats::{top_families, Metric, SizeGroup, Summary, Thresholds},
};
use console::style;
use std::{collections::BTreeMap, io::Write};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub(crate) fn print_summary<W: Write>(mut out: W, summary: &Summary) -> std::io::Result<()> {
    writeln!(out, "{}", style("General statistics").bold().underlined())?;
    let lines = [
        ("Families", summary.families.to_string()),
        (
            "Families with payments",
            summary.families_with_payments.to_string(),
        ),
        ("Addresses", summary.addresses.to_string()),
        (
            "Addresses with payments",
            summary.addresses_with_payments.to_string(),
        ),
        ("Transactions", summary.transactions.to_string()),
        ("Sum (BTC)", format!("{:.8}", summary.sum_btc.round_dp(8))),
        ("Sum (USD)", format!("{:.2}", summary.sum_usd.round_dp(2))),
        (
            "First payment",
            summary
                .first_payment
                .map_or_else(|| "-".to_string(), |t| t.format(DATE_FORMAT).to_string()),
        ),
        (
            "Last payment",
            summary
                .last_payment
                .map_or_else(|| "-".to_string(), |t| t.format(DATE_FORMAT).to_string()),
        ),
    ];
    for (label, value) in lines {
        writeln!(out, "  {:<24} {}", label, style(value).cyan())?;
    }
    Ok(())
}

pub(crate) fn print_top_families<W: Write>(
    mut out: W,
    totals: &[FamilyTotal],
    metrics: &[Metric],
    n: usize,
) -> std::io::Result<()> {
    for &metric in metrics {
        writeln!(
            out,
            "{}",
            style(format!("Top {n} families by {}", metric.label()))
                .bold()
                .underlined()
        )?;
        for (rank, total) in top_families(totals, metric, n).into_iter().enumerate() {
            let value = match metric {
                Metric::Count => total.count.to_string(),
                Metric::Btc => format!("{:.8}", total.sum_btc.round_dp(8)),
                Metric::Usd => format!("{:.2}", total.sum_usd.round_dp(2)),
            };
            writeln!(
                out,
                "  {:>3}. {:<24} {}",
                rank + 1,
                total.family,
                style(value).green()
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub(crate) fn print_size_groups<W: Write>(
    mut out: W,
    groups: &BTreeMap<SizeGroup, Vec<&str>>,
    thresholds: Thresholds,
) -> std::io::Result<()> {
    for group in [SizeGroup::Small, SizeGroup::Medium, SizeGroup::Large] {
        let title = match group {
            SizeGroup::Small => format!("Small (< {} USD)", thresholds.small),
            SizeGroup::Medium => format!("Medium (< {} USD)", thresholds.medium),
            SizeGroup::Large => format!("Large (>= {} USD)", thresholds.medium),
        };
        let families = groups.get(&group).map(Vec::as_slice).unwrap_or_default();
        writeln!(
            out,
            "{}: {}",
            style(title).bold(),
            style(families.len()).yellow()
        )?;
        if !families.is_empty() {
            writeln!(out, "  {}", families.join(", "))?;
        }
    }
    Ok(())
}
