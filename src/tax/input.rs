use super::transaction::{
    is_usd, Annotation, Fee, FiatDirection, FiatTrade, Leg, Movement, Swap, Transaction,
    TransactionKind, Transfer,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("duplicate transaction id: {0}")]
    DuplicateTransactionId(String),
    #[error("fair market value given for unknown transaction: {0}")]
    UnknownFmvTransaction(String),
    #[error("annotation refers to unknown transaction: {0}")]
    UnknownAnnotatedTransaction(String),
    #[error("trade has the same coin on both sides: {id} ({coin})")]
    SameCoinTrade { id: String, coin: String },
    #[error("USD is not allowed as the {side} of {id}")]
    UnexpectedUsd { id: String, side: &'static str },
    #[error("amount must be positive: {id} ({coin} {amount})")]
    NonPositiveAmount {
        id: String,
        coin: String,
        amount: Decimal,
    },
    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),
}

/// Input root for transaction JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct TransactionInput {
    pub transactions: Vec<TransactionRecord>,
    /// Fair market values in USD per coin, keyed by transaction id
    #[serde(default)]
    #[schemars(with = "BTreeMap<String, BTreeMap<String, f64>>")]
    pub fmv: BTreeMap<String, BTreeMap<String, Decimal>>,
    /// Notes and groups, keyed by transaction id
    #[serde(default)]
    pub annotations: BTreeMap<String, AnnotationRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransactionRecord {
    /// Unique identifier; generated from the record contents when absent
    #[serde(default)]
    pub id: Option<String>,
    /// When the transaction occurred (RFC3339; naive datetimes and dates assume UTC)
    #[serde(deserialize_with = "deserialize_datetime")]
    #[schemars(with = "String")]
    pub datetime: DateTime<Utc>,
    /// Exchange or wallet where this happened (e.g., "coinbase", "ledger")
    pub location: String,
    #[serde(flatten)]
    pub details: TransactionType,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum TransactionType {
    /// Exchange one asset for another at the same location; USD on either side
    /// makes it a purchase or a sale
    Trade {
        sold: AssetRecord,
        bought: AssetRecord,
        #[serde(default)]
        fee: Option<FeeRecord>,
    },

    /// Move an asset to another location owned by the same person
    Transfer {
        asset: AssetRecord,
        /// Quantity arriving at the destination, defaults to the quantity sent
        #[serde(default)]
        #[schemars(with = "Option<f64>")]
        received: Option<Decimal>,
        destination: String,
    },

    /// Pay for goods or services with an asset
    Spend {
        asset: AssetRecord,
        #[serde(default)]
        fee: Option<FeeRecord>,
    },

    /// Asset received as income, reward or airdrop
    Earn {
        asset: AssetRecord,
        #[serde(default)]
        fee: Option<FeeRecord>,
    },

    /// Send one asset from `location` and receive another at `destination`
    CrossServiceSwap {
        sold: AssetRecord,
        bought: AssetRecord,
        destination: String,
        #[serde(default)]
        fee: Option<FeeRecord>,
    },
}

impl TransactionType {
    fn name(&self) -> &'static str {
        match self {
            TransactionType::Trade { .. } => "Trade",
            TransactionType::Transfer { .. } => "Transfer",
            TransactionType::Spend { .. } => "Spend",
            TransactionType::Earn { .. } => "Earn",
            TransactionType::CrossServiceSwap { .. } => "CrossServiceSwap",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssetRecord {
    pub symbol: String,
    #[schemars(with = "f64")]
    pub quantity: Decimal,
    /// USD per unit at the time of the transaction
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub fmv: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FeeRecord {
    pub asset: String,
    #[schemars(with = "f64")]
    pub amount: Decimal,
    /// Only needed when the fee asset is not otherwise priced by the transaction
    #[serde(default)]
    #[schemars(with = "Option<f64>")]
    pub fmv: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AnnotationRecord {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Other transactions that share these notes and groups
    #[serde(default)]
    pub related: Vec<String>,
}

/// Read transaction JSON and build fully enriched transactions, sorted by time
pub fn read_transactions_json<R: Read>(reader: R) -> anyhow::Result<Vec<Transaction>> {
    let input: TransactionInput = serde_json::from_reader(reader)?;
    let transactions = enrich(input)?;
    Ok(transactions)
}

/// Turn raw records plus their side tables into immutable transactions.
pub fn enrich(input: TransactionInput) -> Result<Vec<Transaction>, InputError> {
    let TransactionInput {
        mut transactions,
        fmv,
        annotations,
    } = input;
    normalize_records(&mut transactions);

    let mut seen = HashSet::new();
    for id in transactions.iter().filter_map(|record| record.id.as_ref()) {
        if !seen.insert(id.clone()) {
            return Err(InputError::DuplicateTransactionId(id.clone()));
        }
    }
    let mut records = Vec::with_capacity(transactions.len());
    for record in transactions {
        let id = match &record.id {
            Some(id) => id.clone(),
            None => {
                let id = unused_id(&record, &seen);
                seen.insert(id.clone());
                id
            }
        };
        records.push((id, record));
    }

    if let Some(id) = fmv.keys().find(|id| !seen.contains(*id)) {
        return Err(InputError::UnknownFmvTransaction(id.clone()));
    }
    let mut annotations = expand_annotations(annotations, &seen)?;

    let mut result = Vec::with_capacity(records.len());
    for (id, record) in records {
        let prices = fmv.get(&id).map(normalize_prices).unwrap_or_default();
        let kind = build_kind(&id, record.details, &prices)?;
        let tx = Transaction {
            annotation: annotations.remove(&id),
            id,
            datetime: record.datetime,
            location: record.location,
            kind,
        };
        warn_on_implied_fee(&tx);
        result.push(tx);
    }

    // stable, so same-time transactions keep their file order
    result.sort_by_key(|tx| tx.datetime);
    log::debug!("Loaded {} transactions", result.len());
    Ok(result)
}

fn normalize_records(records: &mut [TransactionRecord]) {
    for record in records {
        record.location = record.location.trim().to_string();
        match &mut record.details {
            TransactionType::Trade { sold, bought, fee }
            | TransactionType::CrossServiceSwap {
                sold, bought, fee, ..
            } => {
                sold.symbol = normalize_symbol(&sold.symbol);
                bought.symbol = normalize_symbol(&bought.symbol);
                normalize_fee(fee);
            }
            TransactionType::Transfer { asset, .. } => {
                asset.symbol = normalize_symbol(&asset.symbol);
            }
            TransactionType::Spend { asset, fee } | TransactionType::Earn { asset, fee } => {
                asset.symbol = normalize_symbol(&asset.symbol);
                normalize_fee(fee);
            }
        }
    }
}

fn normalize_fee(fee: &mut Option<FeeRecord>) {
    if let Some(fee) = fee {
        fee.asset = normalize_symbol(&fee.asset);
    }
}

fn normalize_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

fn normalize_prices(prices: &BTreeMap<String, Decimal>) -> HashMap<String, Decimal> {
    prices
        .iter()
        .map(|(coin, price)| (normalize_symbol(coin), *price))
        .collect()
}

/// First generated id not taken yet. Identical records (two equal payouts
/// in the same second) get the occurrence number mixed into the hash.
fn unused_id(record: &TransactionRecord, taken: &HashSet<String>) -> String {
    let mut occurrence = 0u32;
    loop {
        let id = generate_id(record, occurrence);
        if !taken.contains(&id) {
            return id;
        }
        occurrence += 1;
    }
}

/// `<first 3 chars of location>-<last 5 hex chars of a content hash>`
fn generate_id(record: &TransactionRecord, occurrence: u32) -> String {
    let mut hasher = Sha256::new();
    if occurrence > 0 {
        hasher.update(occurrence.to_be_bytes());
    }
    hasher.update(record.location.as_bytes());
    hasher.update(record.datetime.to_rfc3339().as_bytes());
    hasher.update(record.details.name().as_bytes());
    match &record.details {
        TransactionType::Trade { sold, bought, .. }
        | TransactionType::CrossServiceSwap { sold, bought, .. } => {
            hasher.update(bought.symbol.as_bytes());
            hasher.update(sold.symbol.as_bytes());
            hasher.update(bought.quantity.normalize().to_string().as_bytes());
            hasher.update(sold.quantity.normalize().to_string().as_bytes());
        }
        TransactionType::Transfer { asset, destination, .. } => {
            hasher.update(asset.symbol.as_bytes());
            hasher.update(asset.quantity.normalize().to_string().as_bytes());
            hasher.update(destination.as_bytes());
        }
        TransactionType::Spend { asset, .. } | TransactionType::Earn { asset, .. } => {
            hasher.update(asset.symbol.as_bytes());
            hasher.update(asset.quantity.normalize().to_string().as_bytes());
        }
    }
    let digest = hex::encode(hasher.finalize());
    let prefix: String = record.location.chars().take(3).collect();
    format!("{}-{}", prefix, &digest[digest.len() - 5..])
}

/// Resolve `related` links so every annotated transaction gets its own entry.
fn expand_annotations(
    records: BTreeMap<String, AnnotationRecord>,
    ids: &HashSet<String>,
) -> Result<HashMap<String, Annotation>, InputError> {
    let mut annotations: HashMap<String, Annotation> = HashMap::new();
    for (id, record) in records {
        if let Some(unknown) = std::iter::once(&id)
            .chain(&record.related)
            .find(|target| !ids.contains(*target))
        {
            return Err(InputError::UnknownAnnotatedTransaction(unknown.clone()));
        }

        for target in std::iter::once(&id).chain(&record.related) {
            let annotation = annotations.entry(target.clone()).or_default();
            for group in &record.groups {
                if !annotation.groups.contains(group) {
                    annotation.groups.push(group.clone());
                }
            }
            if annotation.notes.is_none() {
                annotation.notes = record.notes.clone();
            }
        }
    }
    Ok(annotations)
}

fn build_kind(
    id: &str,
    details: TransactionType,
    prices: &HashMap<String, Decimal>,
) -> Result<TransactionKind, InputError> {
    let kind = match details {
        TransactionType::Trade { sold, bought, fee } => {
            let fee = build_fee(id, fee, prices)?;
            match (is_usd(&sold.symbol), is_usd(&bought.symbol)) {
                (true, true) => {
                    return Err(InputError::SameCoinTrade {
                        id: id.to_string(),
                        coin: sold.symbol,
                    })
                }
                (true, false) => TransactionKind::FiatTrade(FiatTrade {
                    direction: FiatDirection::Investing,
                    coin: bought.symbol.clone(),
                    quantity: positive(id, &bought.symbol, bought.quantity)?,
                    usd: positive(id, &sold.symbol, sold.quantity)?,
                    fee,
                }),
                (false, true) => TransactionKind::FiatTrade(FiatTrade {
                    direction: FiatDirection::Redeeming,
                    coin: sold.symbol.clone(),
                    quantity: positive(id, &sold.symbol, sold.quantity)?,
                    usd: positive(id, &bought.symbol, bought.quantity)?,
                    fee,
                }),
                (false, false) => TransactionKind::Trade(build_swap(id, sold, bought, fee, prices)?),
            }
        }
        TransactionType::CrossServiceSwap {
            sold,
            bought,
            destination,
            fee,
        } => {
            if is_usd(&sold.symbol) || is_usd(&bought.symbol) {
                return Err(InputError::UnexpectedUsd {
                    id: id.to_string(),
                    side: "asset of a cross-service swap",
                });
            }
            let fee = build_fee(id, fee, prices)?;
            TransactionKind::CrossServiceSwap {
                swap: build_swap(id, sold, bought, fee, prices)?,
                destination: destination.trim().to_string(),
            }
        }
        TransactionType::Transfer {
            asset,
            received,
            destination,
        } => {
            reject_usd(id, &asset.symbol, "asset of a transfer")?;
            let sent = positive(id, &asset.symbol, asset.quantity)?;
            let received = received.unwrap_or(sent);
            if received.is_sign_negative() {
                return Err(InputError::NonPositiveAmount {
                    id: id.to_string(),
                    coin: asset.symbol,
                    amount: received,
                });
            }
            TransactionKind::Transfer(Transfer {
                fmv: asset.fmv.or_else(|| prices.get(&asset.symbol).copied()),
                coin: asset.symbol,
                sent,
                received,
                destination: destination.trim().to_string(),
            })
        }
        TransactionType::Spend { asset, fee } => {
            reject_usd(id, &asset.symbol, "asset of a spend")?;
            TransactionKind::Spend(build_movement(id, asset, fee, prices)?)
        }
        TransactionType::Earn { asset, fee } => {
            reject_usd(id, &asset.symbol, "asset of an earn")?;
            TransactionKind::Earn(build_movement(id, asset, fee, prices)?)
        }
    };
    Ok(kind)
}

fn build_swap(
    id: &str,
    sold: AssetRecord,
    bought: AssetRecord,
    fee: Option<Fee>,
    prices: &HashMap<String, Decimal>,
) -> Result<Swap, InputError> {
    if sold.symbol == bought.symbol {
        return Err(InputError::SameCoinTrade {
            id: id.to_string(),
            coin: sold.symbol,
        });
    }
    Ok(Swap {
        sold: build_leg(id, sold, prices)?,
        bought: build_leg(id, bought, prices)?,
        fee,
    })
}

fn build_movement(
    id: &str,
    asset: AssetRecord,
    fee: Option<FeeRecord>,
    prices: &HashMap<String, Decimal>,
) -> Result<Movement, InputError> {
    let leg = build_leg(id, asset, prices)?;
    Ok(Movement {
        coin: leg.coin,
        amount: leg.amount,
        fmv: leg.fmv,
        fee: build_fee(id, fee, prices)?,
    })
}

fn build_leg(
    id: &str,
    asset: AssetRecord,
    prices: &HashMap<String, Decimal>,
) -> Result<Leg, InputError> {
    let amount = positive(id, &asset.symbol, asset.quantity)?;
    let fmv = asset.fmv.or_else(|| prices.get(&asset.symbol).copied());
    Ok(Leg::new(&asset.symbol, amount, fmv))
}

fn build_fee(
    id: &str,
    fee: Option<FeeRecord>,
    prices: &HashMap<String, Decimal>,
) -> Result<Option<Fee>, InputError> {
    let Some(fee) = fee else {
        return Ok(None);
    };
    if fee.amount.is_zero() {
        return Ok(None);
    }
    let amount = positive(id, &fee.asset, fee.amount)?;
    Ok(Some(Fee {
        fmv: fee.fmv.or_else(|| prices.get(&fee.asset).copied()),
        coin: fee.asset,
        amount,
    }))
}

fn positive(id: &str, coin: &str, amount: Decimal) -> Result<Decimal, InputError> {
    if amount > Decimal::ZERO {
        Ok(amount)
    } else {
        Err(InputError::NonPositiveAmount {
            id: id.to_string(),
            coin: coin.to_string(),
            amount,
        })
    }
}

fn reject_usd(id: &str, coin: &str, side: &'static str) -> Result<(), InputError> {
    if is_usd(coin) {
        return Err(InputError::UnexpectedUsd {
            id: id.to_string(),
            side,
        });
    }
    Ok(())
}

fn warn_on_implied_fee(tx: &Transaction) {
    match &tx.kind {
        TransactionKind::Trade(swap) | TransactionKind::CrossServiceSwap { swap, .. }
            if swap.fee.is_none() =>
        {
            if let Some(implied) = tx.implied_fee_usd().filter(|fee| fee.is_sign_negative()) {
                log::warn!(
                    "{}: received more value than sent (USD {:.2}), implied fee ignored",
                    tx.id,
                    implied
                );
            }
        }
        TransactionKind::Transfer(transfer) if transfer.implied_fee().is_sign_negative() => {
            log::warn!(
                "{}: received {} {} but only sent {}",
                tx.id,
                transfer.received,
                transfer.coin,
                transfer.sent
            );
        }
        _ => {}
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, InputError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc());
        }
    }
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc());
    }
    Err(InputError::InvalidDatetime(s.to_string()))
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_datetime(&s).map_err(|err| serde::de::Error::custom(err.to_string()))
}
