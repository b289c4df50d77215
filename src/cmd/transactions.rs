//! Transactions command - list enriched transactions with totals

use super::{format_usd, read_transactions};
use crate::tax::transaction::{FiatDirection, TransactionKind};
use crate::tax::Transaction;
use clap::Args;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct TransactionsCommand {
    /// Transactions file (JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Filter by coin (e.g., BTC, ETH)
    #[arg(short, long)]
    asset: Option<String>,

    /// Only list transactions that belong to no annotation group
    #[arg(long)]
    no_group: bool,
}

impl TransactionsCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let transactions = read_transactions(&self.file)?;
        let asset = self.asset.as_deref().map(str::to_uppercase);
        let selected: Vec<&Transaction> = transactions
            .iter()
            .filter(|tx| asset.as_deref().is_none_or(|a| tx.affects(a)))
            .filter(|tx| !self.no_group || groups(tx).is_empty())
            .collect();

        if self.no_group {
            for tx in &selected {
                println!("{}", tx.description());
            }
        } else {
            for (group, txs) in group_transactions(&selected) {
                println!();
                println!("== {} ==", group);
                for tx in txs {
                    println!("{}", tx.description());
                }
            }
        }

        let totals = Totals::of(&selected);
        println!();
        println!("Transactions: {}", selected.len());
        println!("Invested: {}", format_usd(totals.invested));
        println!("Redeemed: {}", format_usd(totals.redeemed));
        println!("Net invested: {}", format_usd(totals.net_invested()));
        println!("Fees: {}", format_usd(totals.fees));
        if let Some(percent) = totals.fee_percent() {
            println!("Aggregate fee: {:.2}%", percent);
        }
        if totals.unvalued > 0 {
            log::warn!(
                "{} transactions are missing a fair market value; fees exclude them",
                totals.unvalued
            );
        }
        log::info!("Listed {} of {} transactions", selected.len(), transactions.len());
        Ok(())
    }
}

const UNGROUPED: &str = "Ungrouped";

fn groups(tx: &Transaction) -> &[String] {
    tx.annotation
        .as_ref()
        .map(|a| a.groups.as_slice())
        .unwrap_or_default()
}

/// Transactions keyed by annotation group; a transaction shows up once per group.
fn group_transactions<'a>(txs: &[&'a Transaction]) -> BTreeMap<String, Vec<&'a Transaction>> {
    let mut grouped: BTreeMap<String, Vec<&'a Transaction>> = BTreeMap::new();
    for tx in txs {
        match groups(tx) {
            [] => grouped.entry(UNGROUPED.to_string()).or_default().push(*tx),
            names => {
                for group in names {
                    grouped.entry(group.clone()).or_default().push(*tx);
                }
            }
        }
    }
    grouped
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Totals {
    invested: Decimal,
    redeemed: Decimal,
    fees: Decimal,
    unvalued: usize,
}

impl Totals {
    fn of(txs: &[&Transaction]) -> Self {
        let mut totals = Totals::default();
        for tx in txs {
            if let TransactionKind::FiatTrade(trade) = &tx.kind {
                match trade.direction {
                    FiatDirection::Investing => totals.invested += trade.usd,
                    FiatDirection::Redeeming => totals.redeemed += trade.usd,
                }
            }
            match tx.fee_usd() {
                Ok(fee) if tx.missing_fmv().is_none() => totals.fees += fee,
                _ => totals.unvalued += 1,
            }
        }
        totals
    }

    fn net_invested(&self) -> Decimal {
        self.invested - self.redeemed
    }

    /// Fees as a percentage of the USD still invested; none once more was
    /// redeemed than invested.
    fn fee_percent(&self) -> Option<Decimal> {
        let net = self.net_invested();
        (net > Decimal::ZERO).then(|| self.fees * Decimal::ONE_HUNDRED / net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::transaction::tests::{buy, earn, sell, transfer};
    use crate::tax::transaction::Annotation;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_sum_fiat_flows_and_fees() {
        let txs = vec![
            buy("b1", "2020-01-01", "BTC", dec!(1), dec!(5000)),
            sell("s1", "2020-02-01", "BTC", dec!(0.5), dec!(3000)),
            transfer("x1", "2020-03-01", "BTC", dec!(0.5), dec!(0.499), Some(dec!(6000))),
            earn("e1", "2020-03-02", "ETH", dec!(1), None),
        ];
        let refs: Vec<_> = txs.iter().collect();

        assert_eq!(
            Totals::of(&refs),
            Totals {
                invested: dec!(5000),
                redeemed: dec!(3000),
                fees: dec!(6),
                unvalued: 1,
            }
        );
    }

    #[test]
    fn fee_percent_of_net_invested() {
        let totals = Totals {
            invested: dec!(5000),
            redeemed: dec!(3000),
            fees: dec!(6),
            unvalued: 0,
        };
        assert_eq!(totals.net_invested(), dec!(2000));
        assert_eq!(totals.fee_percent(), Some(dec!(0.3)));

        let flat = Totals {
            invested: dec!(100),
            redeemed: dec!(100),
            ..Default::default()
        };
        assert_eq!(flat.fee_percent(), None);

        let cashed_out = Totals {
            invested: dec!(100),
            redeemed: dec!(150),
            fees: dec!(1),
            unvalued: 0,
        };
        assert_eq!(cashed_out.net_invested(), dec!(-50));
        assert_eq!(cashed_out.fee_percent(), None);
    }

    #[test]
    fn grouping_repeats_multi_group_transactions() {
        let mut a = buy("b1", "2020-01-01", "BTC", dec!(1), dec!(5000));
        a.annotation = Some(Annotation {
            groups: vec!["savings".to_string(), "coinbase".to_string()],
            notes: None,
        });
        let b = sell("s1", "2020-02-01", "BTC", dec!(1), dec!(6000));
        let txs = vec![&a, &b];

        let groups = group_transactions(&txs);
        let names: Vec<_> = groups.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Ungrouped", "coinbase", "savings"]);
        assert_eq!(groups["Ungrouped"][0].id, "s1");
        assert_eq!(groups["savings"][0].id, "b1");
    }
}
