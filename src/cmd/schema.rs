//! Schema command - print the expected input format

use crate::tax::input::{AnnotationRecord, AssetRecord, TransactionRecord, TransactionType};
use crate::tax::TransactionInput;
use chrono::{TimeZone, Utc};
use clap::Args;
use rust_decimal_macros::dec;
use schemars::schema_for;
use std::collections::BTreeMap;

#[derive(Args, Debug)]
pub struct SchemaCommand {
    /// Output format: json-schema or example
    #[arg(value_enum, default_value = "json-schema")]
    format: SchemaFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SchemaFormat {
    /// JSON Schema for the input format
    JsonSchema,
    /// A small input file to start from
    Example,
}

impl SchemaCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let json = match self.format {
            SchemaFormat::JsonSchema => serde_json::to_string_pretty(&schema_for!(TransactionInput))?,
            SchemaFormat::Example => serde_json::to_string_pretty(&example_input())?,
        };
        println!("{}", json);
        Ok(())
    }
}

fn example_input() -> TransactionInput {
    let datetime = |y, m, d| Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).single().unwrap_or_default();
    let asset = |symbol: &str, quantity| AssetRecord {
        symbol: symbol.to_string(),
        quantity,
        fmv: None,
    };

    let transactions = vec![
        TransactionRecord {
            id: Some("buy-1".to_string()),
            datetime: datetime(2020, 1, 1),
            location: "coinbase".to_string(),
            details: TransactionType::Trade {
                sold: asset("USD", dec!(7200)),
                bought: asset("BTC", dec!(1)),
                fee: None,
            },
        },
        TransactionRecord {
            id: Some("move-1".to_string()),
            datetime: datetime(2020, 2, 1),
            location: "coinbase".to_string(),
            details: TransactionType::Transfer {
                asset: asset("BTC", dec!(1)),
                received: Some(dec!(0.9995)),
                destination: "ledger".to_string(),
            },
        },
        TransactionRecord {
            id: None,
            datetime: datetime(2021, 3, 1),
            location: "ledger".to_string(),
            details: TransactionType::Spend {
                asset: asset("BTC", dec!(0.5)),
                fee: None,
            },
        },
    ];

    let fmv = BTreeMap::from([
        ("move-1".to_string(), BTreeMap::from([("BTC".to_string(), dec!(9400))])),
    ]);
    let annotations = BTreeMap::from([(
        "buy-1".to_string(),
        AnnotationRecord {
            groups: vec!["savings".to_string()],
            notes: Some("first purchase".to_string()),
            related: vec!["move-1".to_string()],
        },
    )]);

    TransactionInput {
        transactions,
        fmv,
        annotations,
    }
}
