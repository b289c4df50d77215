use super::error::BasisError;
use super::term::{self, Term};
use super::transaction::{AmountRealized, BasisContribution, Transaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::VecDeque;

/// Disposed and matched quantities closer than this are treated as equal.
pub const QUANTITY_TOLERANCE: Decimal = dec!(0.00000001);

/// Coins acquired together at one time and unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lot {
    pub acquired: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl Lot {
    pub fn cost(&self) -> Decimal {
        self.quantity * self.unit_cost
    }
}

impl From<BasisContribution> for Lot {
    fn from(contribution: BasisContribution) -> Self {
        Lot {
            acquired: contribution.time,
            quantity: contribution.quantity,
            unit_cost: contribution.unit_cost,
        }
    }
}

/// The part of one lot consumed by one disposal, at full precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRow {
    pub acquired: DateTime<Utc>,
    pub quantity: Decimal,
    pub disposed: DateTime<Utc>,
    pub proceeds: Decimal,
    pub basis: Decimal,
}

impl MatchedRow {
    pub fn gain(&self) -> Decimal {
        self.proceeds - self.basis
    }

    pub fn term(&self) -> Term {
        term::classify(self.acquired.date_naive(), self.disposed.date_naive())
    }
}

/// A disposal together with the lot fragments that covered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposal {
    pub transaction: String,
    pub time: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit_proceeds: Decimal,
    pub rows: Vec<MatchedRow>,
}

impl Disposal {
    pub fn matched_quantity(&self) -> Decimal {
        self.rows.iter().map(|row| row.quantity).sum()
    }
}

/// FIFO queue of the open lots of a single coin.
#[derive(Debug, Clone)]
pub struct LotLedger {
    coin: String,
    lots: VecDeque<Lot>,
}

impl LotLedger {
    pub fn new(coin: &str) -> Self {
        LotLedger {
            coin: coin.to_string(),
            lots: VecDeque::new(),
        }
    }

    pub fn quantity(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.quantity).sum()
    }

    pub fn append(&mut self, contribution: BasisContribution) {
        log::debug!(
            "Lot {} ADD: qty={}, unit_cost={} at {}",
            self.coin,
            contribution.quantity,
            contribution.unit_cost,
            contribution.time
        );
        self.lots.push_back(contribution.into());
    }

    /// Consume lots from the head of the queue to cover a disposal.
    ///
    /// Fails without touching the queue when the open lots cannot cover the
    /// whole disposal.
    pub fn consume(
        &mut self,
        transaction: &str,
        realized: AmountRealized,
    ) -> Result<Disposal, BasisError> {
        let available = self.quantity();
        if realized.quantity - available > QUANTITY_TOLERANCE {
            return Err(BasisError::InsufficientBasis {
                coin: self.coin.clone(),
                transaction: transaction.to_string(),
                required: realized.quantity,
                available,
            });
        }

        let mut remaining = realized.quantity;
        let mut rows = Vec::new();
        while remaining > QUANTITY_TOLERANCE {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };
            let take = lot.quantity.min(remaining);
            rows.push(MatchedRow {
                acquired: lot.acquired,
                quantity: take,
                disposed: realized.time,
                proceeds: take * realized.unit_proceeds,
                basis: take * lot.unit_cost,
            });
            lot.quantity -= take;
            remaining -= take;
            log::debug!(
                "Lot {} REMOVE: qty={} from lot acquired {}. Left in lot: {}",
                self.coin,
                take,
                lot.acquired,
                lot.quantity
            );
            if lot.quantity.is_zero() {
                self.lots.pop_front();
            }
        }

        Ok(Disposal {
            transaction: transaction.to_string(),
            time: realized.time,
            quantity: realized.quantity,
            unit_proceeds: realized.unit_proceeds,
            rows,
        })
    }

    pub fn into_lots(self) -> Vec<Lot> {
        self.lots.into()
    }
}

/// Result of replaying a coin's history through a [`LotLedger`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replay {
    pub disposals: Vec<Disposal>,
    pub remaining: Vec<Lot>,
}

/// Replay time-ordered transactions for `coin`, stopping after the
/// transaction with id `stop_after` when given.
///
/// Both the gains report and the available-basis queries go through here.
pub fn replay<'a, I>(coin: &str, transactions: I, stop_after: Option<&str>) -> Result<Replay, BasisError>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut ledger = LotLedger::new(coin);
    let mut disposals = Vec::new();
    let mut stopped = false;

    for tx in transactions {
        if let Some(contribution) = tx.basis_contribution(coin)? {
            ledger.append(contribution);
        }
        if let Some(realized) = tx.amount_realized(coin)? {
            disposals.push(ledger.consume(&tx.id, realized)?);
        }
        if stop_after == Some(tx.id.as_str()) {
            stopped = true;
            break;
        }
    }

    if let (Some(id), false) = (stop_after, stopped) {
        return Err(BasisError::UnknownTransaction {
            transaction: id.to_string(),
            coin: coin.to_string(),
        });
    }

    Ok(Replay {
        disposals,
        remaining: ledger.into_lots(),
    })
}
