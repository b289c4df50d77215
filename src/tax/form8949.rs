use super::error::BasisError;
use super::lots::{self, Lot, MatchedRow, Replay};
use super::report::{Form8949Line, ReportRow};
use super::term::TermFilter;
use super::transaction::Transaction;
use chrono::Datelike;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Only report disposals made in this calendar year
    pub year: Option<i32>,
    /// One line per disposal instead of one per lot fragment
    pub aggregated: bool,
    pub term: TermFilter,
}

/// Every transaction touching one coin, in time order.
#[derive(Debug)]
struct Asset<'a> {
    coin: String,
    transactions: Vec<&'a Transaction>,
}

impl<'a> Asset<'a> {
    fn new(coin: &str) -> Self {
        Asset {
            coin: coin.to_string(),
            transactions: Vec::new(),
        }
    }

    fn replay(&self, stop_after: Option<&str>) -> Result<Replay, BasisError> {
        lots::replay(&self.coin, self.transactions.iter().copied(), stop_after)
    }

    fn lines(&self, options: &ReportOptions) -> Result<Vec<Form8949Line>, BasisError> {
        let replay = self.replay(None)?;
        let mut lines = Vec::new();

        for disposal in &replay.disposals {
            if options.year.is_some_and(|year| disposal.time.year() != year) {
                continue;
            }
            log::debug!(
                "Asset {} disposal {}: {} matched across {} lots",
                self.coin,
                disposal.transaction,
                disposal.matched_quantity(),
                disposal.rows.len()
            );
            let rows: Vec<&MatchedRow> = disposal
                .rows
                .iter()
                .filter(|row| options.term.includes(row.term()))
                .collect();

            if options.aggregated {
                lines.extend(Form8949Line::merge(&self.coin, &rows));
            } else {
                lines.extend(rows.iter().map(|row| Form8949Line::single(&self.coin, row)));
            }
        }

        log::debug!(
            "Asset {}: {} disposals, {} report lines",
            self.coin,
            replay.disposals.len(),
            lines.len()
        );
        Ok(lines)
    }
}

/// Capital gains report over a complete transaction history.
#[derive(Debug)]
pub struct Form8949<'a> {
    assets: Vec<Asset<'a>>,
}

impl<'a> Form8949<'a> {
    /// Group transactions by coin, in the order coins first appear.
    ///
    /// Every transaction must be fully valued; the first one missing a fair
    /// market value is reported before anything is replayed.
    pub fn new(transactions: &'a [Transaction]) -> Result<Self, BasisError> {
        if let Some((tx, coin)) = transactions
            .iter()
            .find_map(|tx| tx.missing_fmv().map(|coin| (tx, coin)))
        {
            return Err(BasisError::MissingFairMarketValue {
                transaction: tx.id.clone(),
                coin: coin.to_string(),
            });
        }

        let mut assets: Vec<Asset<'a>> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for tx in transactions {
            for coin in tx.affected_coins() {
                let i = *index.entry(coin).or_insert_with(|| {
                    assets.push(Asset::new(coin));
                    assets.len() - 1
                });
                assets[i].transactions.push(tx);
            }
        }

        // stable, so equal timestamps keep their input order
        for asset in &mut assets {
            asset.transactions.sort_by_key(|tx| tx.datetime);
        }

        Ok(Form8949 { assets })
    }

    pub fn coins(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(|asset| asset.coin.as_str())
    }

    pub fn rows(&self, options: &ReportOptions) -> Result<Vec<ReportRow>, BasisError> {
        let mut rows = Vec::new();
        for asset in &self.assets {
            let lines = asset.lines(options)?;
            if lines.is_empty() {
                continue;
            }
            if !rows.is_empty() {
                rows.push(ReportRow::Separator);
            }
            rows.extend(lines.into_iter().map(ReportRow::Line));
        }
        Ok(rows)
    }

    /// Lots still held after replaying each coin's whole history.
    pub fn available_basis(&self) -> Result<BTreeMap<String, Vec<Lot>>, BasisError> {
        self.assets
            .iter()
            .map(|asset| Ok((asset.coin.clone(), asset.replay(None)?.remaining)))
            .collect()
    }

    /// Lots of `coin` held right after the transaction `transaction_id`.
    pub fn available_basis_as_of(
        &self,
        coin: &str,
        transaction_id: &str,
    ) -> Result<Vec<Lot>, BasisError> {
        let asset = self
            .assets
            .iter()
            .find(|asset| asset.coin == coin)
            .ok_or_else(|| BasisError::UnknownTransaction {
                transaction: transaction_id.to_string(),
                coin: coin.to_string(),
            })?;
        Ok(asset.replay(Some(transaction_id))?.remaining)
    }
}
