//! Holdings command - open lots per coin and balances per location

use super::{format_usd, read_transactions};
use crate::tax::report::format_quantity;
use crate::tax::term::{self, Term};
use crate::tax::{Form8949, Lot, Transaction};
use chrono::{NaiveDate, Utc};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct HoldingsCommand {
    /// Transactions file (JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Filter by coin (e.g., BTC, ETH)
    #[arg(short, long)]
    asset: Option<String>,

    /// Lots held right after this transaction instead of at the end
    #[arg(long, requires = "asset")]
    as_of: Option<String>,

    /// Spot price used for unrealized gains, e.g. BTC=42000 (repeatable)
    #[arg(short, long = "price", value_parser = parse_price)]
    prices: Vec<(String, Decimal)>,

    /// Coin balances per location instead of lots
    #[arg(long)]
    by_location: bool,

    /// Output as JSON instead of formatted table
    #[arg(long)]
    json: bool,
}

impl HoldingsCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let transactions = read_transactions(&self.file)?;
        let asset = self.asset.as_deref().map(str::to_uppercase);

        if self.by_location {
            let balances = location_balances(&transactions, asset.as_deref());
            if self.json {
                println!("{}", serde_json::to_string_pretty(&balances)?);
            } else {
                print_balances(&balances);
            }
            return Ok(());
        }

        let form = Form8949::new(&transactions)?;
        let holdings = match (&asset, &self.as_of) {
            (Some(coin), Some(id)) => {
                BTreeMap::from([(coin.clone(), form.available_basis_as_of(coin, id)?)])
            }
            _ => form
                .available_basis()?
                .into_iter()
                .filter(|(coin, _)| asset.as_ref().is_none_or(|a| a == coin))
                .collect(),
        };

        let prices: HashMap<String, Decimal> = self
            .prices
            .iter()
            .map(|(coin, price)| (coin.to_uppercase(), *price))
            .collect();
        let today = Utc::now().date_naive();
        let views = holdings_view(&holdings, &prices, today);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&views)?);
        } else {
            print_holdings(&views, !prices.is_empty());
        }
        Ok(())
    }
}

fn parse_price(s: &str) -> Result<(String, Decimal), String> {
    let (coin, price) = s
        .split_once('=')
        .ok_or_else(|| format!("expected COIN=PRICE, got '{}'", s))?;
    let price = Decimal::from_str(price.trim()).map_err(|e| e.to_string())?;
    Ok((coin.trim().to_uppercase(), price))
}

#[derive(Debug, Clone, Serialize)]
struct LotView {
    coin: String,
    #[serde(flatten)]
    lot: Lot,
    cost: Decimal,
    long_term_from: NaiveDate,
    days_held: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unrealized_gain: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    term_if_sold: Option<Term>,
}

fn holdings_view(
    holdings: &BTreeMap<String, Vec<Lot>>,
    prices: &HashMap<String, Decimal>,
    today: NaiveDate,
) -> Vec<LotView> {
    holdings
        .iter()
        .flat_map(|(coin, lots)| lots.iter().map(move |lot| (coin, lot)))
        .filter(|(_, lot)| !lot.quantity.is_zero())
        .map(|(coin, lot)| {
            let acquired = lot.acquired.date_naive();
            let value = prices.get(coin).map(|price| lot.quantity * price);
            LotView {
                coin: coin.clone(),
                lot: lot.clone(),
                cost: lot.cost(),
                long_term_from: term::long_term_date(acquired),
                days_held: term::holding_days(acquired, today),
                value,
                unrealized_gain: value.map(|value| value - lot.cost()),
                term_if_sold: value.map(|_| term::classify(acquired, today)),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Tabled)]
struct LotRow {
    #[tabled(rename = "Coin")]
    coin: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Unit Cost")]
    unit_cost: String,
    #[tabled(rename = "Cost Basis")]
    cost: String,
    #[tabled(rename = "Long-term From")]
    long_term_from: String,
}

#[derive(Debug, Clone, Tabled)]
struct PricedLotRow {
    #[tabled(rename = "Coin")]
    coin: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Cost Basis")]
    cost: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Unrealized")]
    unrealized: String,
    #[tabled(rename = "Days Held")]
    days_held: i64,
    #[tabled(rename = "Term")]
    term: String,
}

fn print_holdings(views: &[LotView], priced: bool) {
    if views.is_empty() {
        println!("No holdings found");
        return;
    }

    println!();
    println!("AVAILABLE BASIS");
    println!();

    let mut table = if priced {
        let rows: Vec<PricedLotRow> = views
            .iter()
            .map(|v| PricedLotRow {
                coin: v.coin.clone(),
                acquired: v.lot.acquired.format("%Y-%m-%d").to_string(),
                quantity: format_quantity(v.lot.quantity),
                cost: format_usd(v.cost),
                value: v.value.map_or("-".to_string(), format_usd),
                unrealized: v.unrealized_gain.map_or("-".to_string(), format_usd),
                days_held: v.days_held,
                term: v.term_if_sold.map_or("-".to_string(), |t| t.to_string()),
            })
            .collect();
        Table::new(rows)
    } else {
        let rows: Vec<LotRow> = views
            .iter()
            .map(|v| LotRow {
                coin: v.coin.clone(),
                acquired: v.lot.acquired.format("%Y-%m-%d").to_string(),
                quantity: format_quantity(v.lot.quantity),
                unit_cost: format_usd(v.lot.unit_cost),
                cost: format_usd(v.cost),
                long_term_from: v.long_term_from.format("%Y-%m-%d").to_string(),
            })
            .collect();
        Table::new(rows)
    };
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::new(1..)).with(Alignment::right()));
    println!("{}", table);

    let mut per_coin: BTreeMap<&str, (Decimal, Decimal)> = BTreeMap::new();
    for v in views {
        let entry = per_coin.entry(v.coin.as_str()).or_default();
        entry.0 += v.lot.quantity;
        entry.1 += v.cost;
    }
    for (coin, (quantity, cost)) in per_coin {
        println!("{}: {} held, cost basis {}", coin, format_quantity(quantity), format_usd(cost));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct LocationBalance {
    location: String,
    coin: String,
    quantity: Decimal,
}

/// Net of every ledger entry per (location, coin), zero balances dropped.
fn location_balances(transactions: &[Transaction], asset: Option<&str>) -> Vec<LocationBalance> {
    let mut totals: BTreeMap<(String, String), Decimal> = BTreeMap::new();
    for entry in transactions.iter().flat_map(Transaction::ledger_entries) {
        if asset.is_some_and(|a| a != entry.coin) {
            continue;
        }
        *totals.entry((entry.location, entry.coin)).or_default() += entry.amount;
    }
    totals
        .into_iter()
        .filter(|(_, quantity)| !quantity.is_zero())
        .map(|((location, coin), quantity)| LocationBalance {
            location,
            coin,
            quantity,
        })
        .collect()
}

#[derive(Debug, Clone, Tabled)]
struct BalanceRow {
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Coin")]
    coin: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
}

fn print_balances(balances: &[LocationBalance]) {
    if balances.is_empty() {
        println!("No balances found");
        return;
    }

    println!();
    println!("BALANCES BY LOCATION");
    println!();

    let rows: Vec<BalanceRow> = balances
        .iter()
        .map(|b| BalanceRow {
            location: b.location.clone(),
            coin: b.coin.clone(),
            quantity: format_quantity(b.quantity),
        })
        .collect();
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{}", table);
}
