pub mod holdings;
pub mod report;
pub mod schema;
pub mod transactions;

use crate::tax::{self, Transaction};
use rust_decimal::Decimal;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Read transactions (JSON) from a file, or from stdin with "-"
pub fn read_transactions(path: &Path) -> anyhow::Result<Vec<Transaction>> {
    if path.as_os_str() == "-" {
        read_from_stdin()
    } else {
        read_from_file(path)
    }
}

fn read_from_file(path: &Path) -> anyhow::Result<Vec<Transaction>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    tax::read_transactions_json(reader)
}

fn read_from_stdin() -> anyhow::Result<Vec<Transaction>> {
    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    if buffer.is_empty() {
        anyhow::bail!("No input received. Provide a file or pipe data to stdin.");
    }

    tax::read_transactions_json(io::Cursor::new(buffer))
}

pub(crate) fn format_usd(amount: Decimal) -> String {
    let rounded = tax::report::round_usd(amount);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-${:.2}", rounded.abs())
    } else {
        format!("${:.2}", rounded.abs())
    }
}
