use super::error::BasisError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt::{self, Write};

pub const USD: &str = "USD";

pub fn is_usd(coin: &str) -> bool {
    coin == USD
}

/// A fully valued transaction, ready for lot accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub datetime: DateTime<Utc>,
    /// Where the transaction happened; the sending side for transfers and swaps
    pub location: String,
    pub kind: TransactionKind,
    pub annotation: Option<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransactionKind {
    /// Coin-to-coin exchange at a single location
    Trade(Swap),
    /// Coin bought with, or sold for, USD
    FiatTrade(FiatTrade),
    /// Coin moved between two locations of the same owner
    Transfer(Transfer),
    /// Coin disposed of without receiving another coin
    Spend(Movement),
    /// Coin received without giving anything up (income, airdrop)
    Earn(Movement),
    /// Coin sent from one service and a different coin received at another
    CrossServiceSwap { swap: Swap, destination: String },
}

/// An amount of a coin valued at its USD fair market value per unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub coin: String,
    pub amount: Decimal,
    pub fmv: Option<Decimal>,
}

impl Leg {
    pub fn new(coin: &str, amount: Decimal, fmv: Option<Decimal>) -> Self {
        Leg {
            coin: coin.to_string(),
            amount,
            fmv,
        }
    }

    fn fmv(&self, id: &str) -> Result<Decimal, BasisError> {
        self.fmv.ok_or_else(|| missing_fmv(id, &self.coin))
    }

    fn value(&self, id: &str) -> Result<Decimal, BasisError> {
        Ok(self.amount * self.fmv(id)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fee {
    pub coin: String,
    pub amount: Decimal,
    /// Only needed when the fee coin is neither USD nor a coin of the transaction
    pub fmv: Option<Decimal>,
}

impl Fee {
    fn value(&self, id: &str) -> Result<Decimal, BasisError> {
        if is_usd(&self.coin) {
            return Ok(self.amount);
        }
        let fmv = self.fmv.ok_or_else(|| missing_fmv(id, &self.coin))?;
        Ok(self.amount * fmv)
    }

    fn missing_fmv(&self, priced: &[&str]) -> Option<&str> {
        let priced = is_usd(&self.coin) || priced.contains(&self.coin.as_str());
        (!priced && self.fmv.is_none()).then_some(self.coin.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Swap {
    pub sold: Leg,
    pub bought: Leg,
    pub fee: Option<Fee>,
}

/// USD value of a fee, split by the side of the transaction it lands on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FeeSplit {
    proceeds: Decimal,
    basis: Decimal,
}

impl Swap {
    /// Value given up minus value received, both at fair market value.
    fn implied_fee_usd(&self, id: &str) -> Result<Decimal, BasisError> {
        Ok(self.sold.value(id)? - self.bought.value(id)?)
    }

    fn fee_split(&self, id: &str) -> Result<FeeSplit, BasisError> {
        let Some(fee) = &self.fee else {
            // A negative implied fee is valuation noise, not a rebate.
            let implied = self.implied_fee_usd(id)?.max(Decimal::ZERO);
            return Ok(FeeSplit {
                proceeds: implied,
                basis: Decimal::ZERO,
            });
        };

        let split = if fee.coin == self.sold.coin {
            FeeSplit {
                proceeds: fee.amount * self.sold.fmv(id)?,
                ..Default::default()
            }
        } else if is_usd(&fee.coin) {
            FeeSplit {
                proceeds: fee.amount,
                ..Default::default()
            }
        } else if fee.coin == self.bought.coin {
            FeeSplit {
                basis: fee.amount * self.bought.fmv(id)?,
                ..Default::default()
            }
        } else {
            FeeSplit {
                basis: fee.value(id)?,
                ..Default::default()
            }
        };
        Ok(split)
    }

    fn missing_fmv(&self) -> Option<&str> {
        if self.sold.fmv.is_none() {
            return Some(self.sold.coin.as_str());
        }
        if self.bought.fmv.is_none() {
            return Some(self.bought.coin.as_str());
        }
        self.fee
            .as_ref()
            .and_then(|fee| fee.missing_fmv(&[self.sold.coin.as_str(), self.bought.coin.as_str()]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiatDirection {
    /// USD in, coin out of the exchange to the owner
    Investing,
    /// Coin in, USD back to the owner
    Redeeming,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiatTrade {
    pub direction: FiatDirection,
    pub coin: String,
    pub quantity: Decimal,
    pub usd: Decimal,
    pub fee: Option<Fee>,
}

impl FiatTrade {
    /// USD per coin implied by the trade itself.
    pub fn rate(&self) -> Decimal {
        self.usd / self.quantity
    }

    fn fee_usd(&self, id: &str) -> Result<Decimal, BasisError> {
        match &self.fee {
            None => Ok(Decimal::ZERO),
            Some(fee) if fee.coin == self.coin => Ok(fee.amount * self.rate()),
            Some(fee) => fee.value(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub coin: String,
    pub sent: Decimal,
    pub received: Decimal,
    pub destination: String,
    pub fmv: Option<Decimal>,
}

impl Transfer {
    /// Coins lost in transit.
    pub fn implied_fee(&self) -> Decimal {
        self.sent - self.received
    }

    fn implied_fee_usd(&self, id: &str) -> Result<Decimal, BasisError> {
        let fee = self.implied_fee();
        if fee.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let fmv = self.fmv.ok_or_else(|| missing_fmv(id, &self.coin))?;
        Ok(fee * fmv)
    }

    /// Only coins lost in transit count as a fee; a gain is never priced.
    fn needs_fmv(&self) -> bool {
        self.implied_fee() > Decimal::ZERO
    }

    fn fee_usd(&self, id: &str) -> Result<Decimal, BasisError> {
        if !self.needs_fmv() {
            return Ok(Decimal::ZERO);
        }
        self.implied_fee_usd(id)
    }
}

/// A single coin amount entering or leaving the owner's holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub coin: String,
    pub amount: Decimal,
    pub fmv: Option<Decimal>,
    pub fee: Option<Fee>,
}

impl Movement {
    fn value(&self, id: &str) -> Result<Decimal, BasisError> {
        let fmv = self.fmv.ok_or_else(|| missing_fmv(id, &self.coin))?;
        Ok(self.amount * fmv)
    }

    fn fee_usd(&self, id: &str) -> Result<Decimal, BasisError> {
        match &self.fee {
            None => Ok(Decimal::ZERO),
            Some(fee) if fee.coin == self.coin => {
                let fmv = self.fmv.ok_or_else(|| missing_fmv(id, &self.coin))?;
                Ok(fee.amount * fmv)
            }
            Some(fee) => fee.value(id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub groups: Vec<String>,
    pub notes: Option<String>,
}

/// Coins added to holdings by a transaction: (time, quantity, USD cost per coin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasisContribution {
    pub time: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Coins disposed of by a transaction: (time, quantity, net USD proceeds per coin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountRealized {
    pub time: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit_proceeds: Decimal,
}

/// Signed change of a coin balance at a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub location: String,
    pub coin: String,
    pub amount: Decimal,
}

impl LedgerEntry {
    fn new(location: &str, coin: &str, amount: Decimal) -> Self {
        LedgerEntry {
            location: location.to_string(),
            coin: coin.to_string(),
            amount,
        }
    }
}

impl Transaction {
    /// Non-USD coins whose lots this transaction can touch, bought side first.
    pub fn affected_coins(&self) -> Vec<&str> {
        let coins = match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. } => {
                vec![swap.bought.coin.as_str(), swap.sold.coin.as_str()]
            }
            TransactionKind::FiatTrade(trade) => vec![trade.coin.as_str()],
            TransactionKind::Transfer(transfer) => vec![transfer.coin.as_str()],
            TransactionKind::Spend(movement) | TransactionKind::Earn(movement) => {
                vec![movement.coin.as_str()]
            }
        };
        coins.into_iter().filter(|coin| !is_usd(coin)).collect()
    }

    pub fn affects(&self, coin: &str) -> bool {
        self.affected_coins().contains(&coin)
    }

    /// First coin whose fair market value is needed but absent.
    pub fn missing_fmv(&self) -> Option<&str> {
        match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. } => {
                swap.missing_fmv()
            }
            TransactionKind::FiatTrade(trade) => trade
                .fee
                .as_ref()
                .and_then(|fee| fee.missing_fmv(&[trade.coin.as_str()])),
            TransactionKind::Transfer(transfer) => {
                (transfer.needs_fmv() && transfer.fmv.is_none()).then_some(transfer.coin.as_str())
            }
            TransactionKind::Spend(movement) | TransactionKind::Earn(movement) => {
                if movement.fmv.is_none() {
                    Some(movement.coin.as_str())
                } else {
                    movement
                        .fee
                        .as_ref()
                        .and_then(|fee| fee.missing_fmv(&[movement.coin.as_str()]))
                }
            }
        }
    }

    pub fn basis_contribution(&self, coin: &str) -> Result<Option<BasisContribution>, BasisError> {
        let id = self.id.as_str();
        let contribution = match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. }
                if coin == swap.bought.coin =>
            {
                let fee = swap.fee_split(id)?;
                let cost = swap.bought.value(id)? + fee.basis;
                Some((swap.bought.amount, cost / swap.bought.amount))
            }
            TransactionKind::FiatTrade(trade)
                if trade.direction == FiatDirection::Investing && coin == trade.coin =>
            {
                let cost = trade.usd + trade.fee_usd(id)?;
                Some((trade.quantity, cost / trade.quantity))
            }
            TransactionKind::Earn(earn) if coin == earn.coin => {
                let cost = earn.value(id)? + earn.fee_usd(id)?;
                Some((earn.amount, cost / earn.amount))
            }
            _ => None,
        };
        Ok(contribution.map(|(quantity, unit_cost)| BasisContribution {
            time: self.datetime,
            quantity,
            unit_cost,
        }))
    }

    pub fn amount_realized(&self, coin: &str) -> Result<Option<AmountRealized>, BasisError> {
        let id = self.id.as_str();
        let realized = match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. }
                if coin == swap.sold.coin =>
            {
                let fee = swap.fee_split(id)?;
                let proceeds = swap.sold.value(id)? - fee.proceeds;
                Some((swap.sold.amount, proceeds / swap.sold.amount))
            }
            TransactionKind::FiatTrade(trade)
                if trade.direction == FiatDirection::Redeeming && coin == trade.coin =>
            {
                let proceeds = trade.usd - trade.fee_usd(id)?;
                Some((trade.quantity, proceeds / trade.quantity))
            }
            TransactionKind::Spend(spend) if coin == spend.coin => {
                let proceeds = spend.value(id)? - spend.fee_usd(id)?;
                Some((spend.amount, proceeds / spend.amount))
            }
            _ => None,
        };
        Ok(realized.map(|(quantity, unit_proceeds)| AmountRealized {
            time: self.datetime,
            quantity,
            unit_proceeds,
        }))
    }

    /// USD value of the fee paid, for fee totals.
    pub fn fee_usd(&self) -> Result<Decimal, BasisError> {
        let id = self.id.as_str();
        match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. } => {
                let split = swap.fee_split(id)?;
                Ok(split.proceeds + split.basis)
            }
            TransactionKind::FiatTrade(trade) => trade.fee_usd(id),
            TransactionKind::Transfer(transfer) => transfer.fee_usd(id),
            TransactionKind::Spend(movement) | TransactionKind::Earn(movement) => {
                movement.fee_usd(id)
            }
        }
    }

    /// Difference between value sent and value received, where the
    /// transaction has two sides to compare.
    pub fn implied_fee_usd(&self) -> Option<Decimal> {
        match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. } => {
                swap.implied_fee_usd(&self.id).ok()
            }
            TransactionKind::Transfer(transfer) => transfer.implied_fee_usd(&self.id).ok(),
            _ => None,
        }
    }

    pub fn reported_fee(&self) -> Option<&Fee> {
        match &self.kind {
            TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. } => {
                swap.fee.as_ref()
            }
            TransactionKind::FiatTrade(trade) => trade.fee.as_ref(),
            TransactionKind::Spend(movement) | TransactionKind::Earn(movement) => {
                movement.fee.as_ref()
            }
            TransactionKind::Transfer(_) => None,
        }
    }

    /// Balance changes per location, USD included.
    ///
    /// Coin amounts are fee-inclusive: `sold` already covers a fee paid in
    /// the sold coin and `bought` is what arrived net of a fee in the bought
    /// coin, so only USD fees add an entry of their own. Lots are built from
    /// the same amounts, which keeps balances and lots in step.
    pub fn ledger_entries(&self) -> Vec<LedgerEntry> {
        let location = self.location.as_str();
        let mut entries = match &self.kind {
            TransactionKind::Trade(swap) => vec![
                LedgerEntry::new(location, &swap.bought.coin, swap.bought.amount),
                LedgerEntry::new(location, &swap.sold.coin, -swap.sold.amount),
            ],
            TransactionKind::CrossServiceSwap { swap, destination } => vec![
                LedgerEntry::new(destination, &swap.bought.coin, swap.bought.amount),
                LedgerEntry::new(location, &swap.sold.coin, -swap.sold.amount),
            ],
            TransactionKind::FiatTrade(trade) => match trade.direction {
                FiatDirection::Investing => vec![
                    LedgerEntry::new(location, &trade.coin, trade.quantity),
                    LedgerEntry::new(location, USD, -trade.usd),
                ],
                FiatDirection::Redeeming => vec![
                    LedgerEntry::new(location, USD, trade.usd),
                    LedgerEntry::new(location, &trade.coin, -trade.quantity),
                ],
            },
            TransactionKind::Transfer(transfer) => vec![
                LedgerEntry::new(location, &transfer.coin, -transfer.sent),
                LedgerEntry::new(&transfer.destination, &transfer.coin, transfer.received),
            ],
            TransactionKind::Spend(spend) => {
                vec![LedgerEntry::new(location, &spend.coin, -spend.amount)]
            }
            TransactionKind::Earn(earn) => {
                vec![LedgerEntry::new(location, &earn.coin, earn.amount)]
            }
        };
        if let Some(fee) = self.reported_fee().filter(|fee| is_usd(&fee.coin)) {
            entries.push(LedgerEntry::new(location, USD, -fee.amount));
        }
        entries
    }

    /// One-line summary followed by annotation and fee details.
    pub fn description(&self) -> String {
        let mut desc = self.to_string();
        if let Some(annotation) = &self.annotation {
            if let Some(notes) = &annotation.notes {
                let _ = write!(desc, "\n   |-> {}", notes);
            }
            let _ = write!(desc, "\n   |-> Groups: {}", annotation.groups.join(", "));
        }
        if let Some(implied) = self.implied_fee_usd() {
            let _ = write!(desc, "\n   |-> Implied Fee: USD {:.2}", implied);
        }
        if let Some(fee) = self.reported_fee() {
            let _ = write!(desc, "\n   |-> Reported Fee: {} {}", fee.amount.normalize(), fee.coin);
            if !is_usd(&fee.coin) {
                if let Ok(usd) = self.fee_usd() {
                    let _ = write!(desc, " ({:.2} USD)", usd);
                }
            }
        }
        desc
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) - ",
            self.datetime.format("%Y-%m-%d %H:%M:%S"),
            self.id
        )?;
        match &self.kind {
            TransactionKind::Trade(swap) => write!(
                f,
                "EXCH {} {} (USD {}) -> {} {} (USD {})",
                swap.sold.coin,
                swap.sold.amount.normalize(),
                display_value(&swap.sold),
                swap.bought.coin,
                swap.bought.amount.normalize(),
                display_value(&swap.bought),
            ),
            TransactionKind::CrossServiceSwap { swap, destination } => write!(
                f,
                "SHAPESHIFT {} {} (USD {}) on {} -> {} {} (USD {}) on {}",
                swap.sold.coin,
                swap.sold.amount.normalize(),
                display_value(&swap.sold),
                self.location,
                swap.bought.coin,
                swap.bought.amount.normalize(),
                display_value(&swap.bought),
                destination,
            ),
            TransactionKind::FiatTrade(trade) => match trade.direction {
                FiatDirection::Investing => write!(
                    f,
                    "FXCH USD {} -> {} {} (@ USD {:.2} per {})",
                    trade.usd.normalize(),
                    trade.coin,
                    trade.quantity.normalize(),
                    trade.rate(),
                    trade.coin,
                ),
                FiatDirection::Redeeming => write!(
                    f,
                    "FXCH {} {} -> USD {} (@ USD {:.2} per {})",
                    trade.coin,
                    trade.quantity.normalize(),
                    trade.usd.normalize(),
                    trade.rate(),
                    trade.coin,
                ),
            },
            TransactionKind::Transfer(transfer) => {
                let fee_usd = transfer
                    .fmv
                    .map(|fmv| format!("{:.2}", transfer.implied_fee() * fmv))
                    .unwrap_or_else(|| "?".to_string());
                write!(
                    f,
                    "SENDRECV {} {} (- {} {} / USD {} fee) from {} to {}",
                    transfer.coin,
                    transfer.sent.normalize(),
                    transfer.coin,
                    transfer.implied_fee().normalize(),
                    fee_usd,
                    self.location,
                    transfer.destination,
                )
            }
            TransactionKind::Spend(spend) => write!(
                f,
                "SPEND {} {} from {}",
                spend.coin,
                spend.amount.normalize(),
                self.location
            ),
            TransactionKind::Earn(earn) => write!(
                f,
                "EARN {} {} by {}",
                earn.coin,
                earn.amount.normalize(),
                self.location
            ),
        }
    }
}

fn display_value(leg: &Leg) -> String {
    leg.fmv
        .map(|fmv| format!("{:.2}", leg.amount * fmv))
        .unwrap_or_else(|| "?".to_string())
}

fn missing_fmv(id: &str, coin: &str) -> BasisError {
    BasisError::MissingFairMarketValue {
        transaction: id.to_string(),
        coin: coin.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    pub(crate) fn at(date: &str) -> DateTime<Utc> {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn tx(id: &str, date: &str, kind: TransactionKind) -> Transaction {
        Transaction {
            id: id.to_string(),
            datetime: at(date),
            location: "coinbase".to_string(),
            kind,
            annotation: None,
        }
    }

    pub(crate) fn buy(id: &str, date: &str, coin: &str, quantity: Decimal, usd: Decimal) -> Transaction {
        tx(
            id,
            date,
            TransactionKind::FiatTrade(FiatTrade {
                direction: FiatDirection::Investing,
                coin: coin.to_string(),
                quantity,
                usd,
                fee: None,
            }),
        )
    }

    pub(crate) fn sell(id: &str, date: &str, coin: &str, quantity: Decimal, usd: Decimal) -> Transaction {
        tx(
            id,
            date,
            TransactionKind::FiatTrade(FiatTrade {
                direction: FiatDirection::Redeeming,
                coin: coin.to_string(),
                quantity,
                usd,
                fee: None,
            }),
        )
    }

    pub(crate) fn trade(id: &str, date: &str, sold: Leg, bought: Leg, fee: Option<Fee>) -> Transaction {
        tx(id, date, TransactionKind::Trade(Swap { sold, bought, fee }))
    }

    pub(crate) fn earn(id: &str, date: &str, coin: &str, amount: Decimal, fmv: Option<Decimal>) -> Transaction {
        tx(
            id,
            date,
            TransactionKind::Earn(Movement {
                coin: coin.to_string(),
                amount,
                fmv,
                fee: None,
            }),
        )
    }

    pub(crate) fn transfer(id: &str, date: &str, coin: &str, sent: Decimal, received: Decimal, fmv: Option<Decimal>) -> Transaction {
        tx(
            id,
            date,
            TransactionKind::Transfer(Transfer {
                coin: coin.to_string(),
                sent,
                received,
                destination: "ledger".to_string(),
                fmv,
            }),
        )
    }

    fn spend(id: &str, coin: &str, amount: Decimal, fmv: Decimal, fee: Option<Fee>) -> Transaction {
        tx(
            id,
            "2020-01-01",
            TransactionKind::Spend(Movement {
                coin: coin.to_string(),
                amount,
                fmv: Some(fmv),
                fee,
            }),
        )
    }

    fn with_earn_fee(mut t: Transaction, with: Option<Fee>) -> Transaction {
        if let TransactionKind::Earn(movement) = &mut t.kind {
            movement.fee = with;
        }
        t
    }

    fn cross_service_swap(fee: Option<Fee>) -> Transaction {
        tx(
            "c1",
            "2020-01-01",
            TransactionKind::CrossServiceSwap {
                swap: Swap {
                    sold: Leg::new("BTC", dec!(1), Some(dec!(10000))),
                    bought: Leg::new("ETH", dec!(24), Some(dec!(415))),
                    fee,
                },
                destination: "binance".to_string(),
            },
        )
    }

    fn fee(coin: &str, amount: Decimal, fmv: Option<Decimal>) -> Option<Fee> {
        Some(Fee {
            coin: coin.to_string(),
            amount,
            fmv,
        })
    }

    #[test]
    fn fiat_investing_adds_fee_to_basis() {
        let mut t = buy("b1", "2020-01-01", "BTC", dec!(2), dec!(10000));
        if let TransactionKind::FiatTrade(trade) = &mut t.kind {
            trade.fee = fee("USD", dec!(50), None);
        }

        let basis = t.basis_contribution("BTC").unwrap().unwrap();
        assert_eq!(basis.quantity, dec!(2));
        assert_eq!(basis.unit_cost, dec!(5025));
        assert_eq!(t.amount_realized("BTC").unwrap(), None);
    }

    #[test]
    fn fiat_redeeming_nets_fee_from_proceeds() {
        let mut t = sell("s1", "2020-01-01", "BTC", dec!(2), dec!(10000));
        if let TransactionKind::FiatTrade(trade) = &mut t.kind {
            trade.fee = fee("USD", dec!(50), None);
        }

        let realized = t.amount_realized("BTC").unwrap().unwrap();
        assert_eq!(realized.quantity, dec!(2));
        assert_eq!(realized.unit_proceeds, dec!(4975));
        assert_eq!(t.basis_contribution("BTC").unwrap(), None);
    }

    #[test]
    fn trade_nets_positive_implied_fee_from_proceeds() {
        // 1 BTC worth 10000 for 24 ETH worth 9960: 40 USD lost to the exchange
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(24), Some(dec!(415))),
            None,
        );

        let realized = t.amount_realized("BTC").unwrap().unwrap();
        assert_eq!(realized.unit_proceeds, dec!(9960));
        let basis = t.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.unit_cost, dec!(415));
        assert_eq!(t.implied_fee_usd(), Some(dec!(40)));
    }

    #[test]
    fn trade_ignores_negative_implied_fee() {
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(25), Some(dec!(420))),
            None,
        );

        let realized = t.amount_realized("BTC").unwrap().unwrap();
        assert_eq!(realized.unit_proceeds, dec!(10000));
        assert_eq!(t.fee_usd().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn fee_in_sold_coin_reduces_proceeds() {
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(2), Some(dec!(10000))),
            Leg::new("ETH", dec!(50), Some(dec!(400))),
            fee("BTC", dec!(0.01), None),
        );

        let realized = t.amount_realized("BTC").unwrap().unwrap();
        assert_eq!(realized.unit_proceeds, dec!(9950));
        let basis = t.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.unit_cost, dec!(400));
    }

    #[test]
    fn fee_in_bought_coin_increases_basis() {
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(25), Some(dec!(400))),
            fee("ETH", dec!(0.5), None),
        );

        let basis = t.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.unit_cost, dec!(408));
        let realized = t.amount_realized("BTC").unwrap().unwrap();
        assert_eq!(realized.unit_proceeds, dec!(10000));
    }

    #[test]
    fn fee_in_third_coin_uses_its_own_fmv() {
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(25), Some(dec!(400))),
            fee("BNB", dec!(2), Some(dec!(25))),
        );

        let basis = t.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.unit_cost, dec!(402));
        assert_eq!(t.fee_usd().unwrap(), dec!(50));
    }

    #[test]
    fn fee_in_third_coin_without_fmv_is_missing() {
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(25), Some(dec!(400))),
            fee("BNB", dec!(2), None),
        );

        assert_eq!(t.missing_fmv(), Some("BNB"));
        assert_eq!(
            t.basis_contribution("ETH").unwrap_err(),
            BasisError::MissingFairMarketValue {
                transaction: "t1".to_string(),
                coin: "BNB".to_string(),
            }
        );
    }

    #[test]
    fn transfer_never_touches_lots() {
        let t = transfer("x1", "2020-01-01", "BTC", dec!(1), dec!(0.999), Some(dec!(10000)));

        assert_eq!(t.basis_contribution("BTC").unwrap(), None);
        assert_eq!(t.amount_realized("BTC").unwrap(), None);
        assert_eq!(t.fee_usd().unwrap(), dec!(10));
        assert_eq!(t.affected_coins(), vec!["BTC"]);
    }

    #[test]
    fn transfer_without_loss_needs_no_fmv() {
        let t = transfer("x1", "2020-01-01", "BTC", dec!(1), dec!(1), None);
        assert_eq!(t.missing_fmv(), None);
        assert_eq!(t.fee_usd().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn earn_contributes_basis_at_fmv() {
        let t = earn("e1", "2020-01-01", "ETH", dec!(0.5), Some(dec!(300)));

        let basis = t.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.quantity, dec!(0.5));
        assert_eq!(basis.unit_cost, dec!(300));
        assert_eq!(t.amount_realized("ETH").unwrap(), None);
    }

    #[test]
    fn earn_without_fmv_is_missing() {
        let t = earn("e1", "2020-01-01", "ETH", dec!(0.5), None);
        assert_eq!(t.missing_fmv(), Some("ETH"));
    }

    #[test]
    fn affected_coins_skip_usd() {
        let t = buy("b1", "2020-01-01", "BTC", dec!(1), dec!(100));
        assert_eq!(t.affected_coins(), vec!["BTC"]);

        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(25), Some(dec!(400))),
            None,
        );
        assert_eq!(t.affected_coins(), vec!["ETH", "BTC"]);
    }

    #[test]
    fn ledger_entries_treat_coin_amounts_as_fee_inclusive() {
        let t = trade(
            "t1",
            "2020-01-01",
            Leg::new("BTC", dec!(1), Some(dec!(10000))),
            Leg::new("ETH", dec!(25), Some(dec!(400))),
            fee("ETH", dec!(0.1), None),
        );
        assert_eq!(
            t.ledger_entries(),
            vec![
                LedgerEntry::new("coinbase", "ETH", dec!(25)),
                LedgerEntry::new("coinbase", "BTC", dec!(-1)),
            ]
        );
        // the lot carries the same 25 ETH the balance does
        assert_eq!(t.basis_contribution("ETH").unwrap().unwrap().quantity, dec!(25));
    }

    #[test]
    fn ledger_entries_include_usd_fee() {
        let mut t = buy("b1", "2020-01-01", "BTC", dec!(2), dec!(10000));
        if let TransactionKind::FiatTrade(trade) = &mut t.kind {
            trade.fee = fee("USD", dec!(50), None);
        }
        assert_eq!(
            t.ledger_entries(),
            vec![
                LedgerEntry::new("coinbase", "BTC", dec!(2)),
                LedgerEntry::new("coinbase", "USD", dec!(-10000)),
                LedgerEntry::new("coinbase", "USD", dec!(-50)),
            ]
        );
    }

    #[test]
    fn transfer_gaining_coins_needs_no_fmv() {
        let t = transfer("x1", "2020-01-01", "BTC", dec!(1), dec!(1.0001), None);
        assert_eq!(t.missing_fmv(), None);
        assert_eq!(t.fee_usd().unwrap(), Decimal::ZERO);
    }

    #[test]
    fn transfer_losing_coins_needs_fmv() {
        let t = transfer("x1", "2020-01-01", "BTC", dec!(1), dec!(0.999), None);
        assert_eq!(t.missing_fmv(), Some("BTC"));
    }

    #[test]
    fn cross_service_swap_realizes_sold_and_contributes_bought() {
        let t = cross_service_swap(None);

        // 10000 USD of BTC for 9960 USD of ETH
        let realized = t.amount_realized("BTC").unwrap().unwrap();
        assert_eq!(realized.quantity, dec!(1));
        assert_eq!(realized.unit_proceeds, dec!(9960));
        assert_eq!(t.basis_contribution("BTC").unwrap(), None);

        let basis = t.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.quantity, dec!(24));
        assert_eq!(basis.unit_cost, dec!(415));
        assert_eq!(t.amount_realized("ETH").unwrap(), None);
        assert_eq!(t.affected_coins(), vec!["ETH", "BTC"]);
    }

    #[test]
    fn cross_service_swap_lands_bought_coin_at_destination() {
        let t = cross_service_swap(fee("USD", dec!(20), None));
        assert_eq!(
            t.ledger_entries(),
            vec![
                LedgerEntry::new("binance", "ETH", dec!(24)),
                LedgerEntry::new("coinbase", "BTC", dec!(-1)),
                LedgerEntry::new("coinbase", "USD", dec!(-20)),
            ]
        );
        assert_eq!(t.amount_realized("BTC").unwrap().unwrap().unit_proceeds, dec!(9980));
    }

    #[test]
    fn spend_fee_reduces_proceeds() {
        let same_coin = spend("p1", "ETH", dec!(2), dec!(300), fee("ETH", dec!(0.1), None));
        assert_eq!(same_coin.fee_usd().unwrap(), dec!(30));
        assert_eq!(same_coin.amount_realized("ETH").unwrap().unwrap().unit_proceeds, dec!(285));

        let usd = spend("p2", "ETH", dec!(2), dec!(300), fee("USD", dec!(5), None));
        assert_eq!(usd.amount_realized("ETH").unwrap().unwrap().unit_proceeds, dec!(297.5));

        let third = spend("p3", "ETH", dec!(2), dec!(300), fee("BNB", dec!(2), Some(dec!(10))));
        assert_eq!(third.amount_realized("ETH").unwrap().unwrap().unit_proceeds, dec!(290));
        assert_eq!(third.basis_contribution("ETH").unwrap(), None);

        let unpriced = spend("p4", "ETH", dec!(2), dec!(300), fee("BNB", dec!(2), None));
        assert_eq!(unpriced.missing_fmv(), Some("BNB"));
    }

    #[test]
    fn earn_fee_adds_to_basis() {
        let earned = || earn("e1", "2020-01-01", "ETH", dec!(1), Some(dec!(300)));

        let same_coin = with_earn_fee(earned(), fee("ETH", dec!(0.01), None));
        assert_eq!(same_coin.basis_contribution("ETH").unwrap().unwrap().unit_cost, dec!(303));

        let usd = with_earn_fee(earned(), fee("USD", dec!(3), None));
        assert_eq!(usd.basis_contribution("ETH").unwrap().unwrap().unit_cost, dec!(303));

        let third = with_earn_fee(earned(), fee("BNB", dec!(1), Some(dec!(5))));
        let basis = third.basis_contribution("ETH").unwrap().unwrap();
        assert_eq!(basis.quantity, dec!(1));
        assert_eq!(basis.unit_cost, dec!(305));
        assert_eq!(third.fee_usd().unwrap(), dec!(5));
    }

    #[test]
    fn description_lists_annotation_and_fees() {
        let mut t = transfer("x1", "2020-01-01", "BTC", dec!(1), dec!(0.999), Some(dec!(10000)));
        t.annotation = Some(Annotation {
            groups: vec!["cold-storage".to_string()],
            notes: Some("move to hardware wallet".to_string()),
        });

        let desc = t.description();
        assert!(desc.starts_with("2020-01-01 12:00:00 (x1) - SENDRECV BTC 1"));
        assert!(desc.contains("|-> move to hardware wallet"));
        assert!(desc.contains("|-> Groups: cold-storage"));
        assert!(desc.contains("|-> Implied Fee: USD 10.00"));
    }
}
