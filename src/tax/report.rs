use super::lots::MatchedRow;
use super::term::Term;
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateAcquired {
    Date(NaiveDate),
    /// More than one lot went into the line
    Various,
}

impl fmt::Display for DateAcquired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateAcquired::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DateAcquired::Various => write!(f, "Various"),
        }
    }
}

impl Serialize for DateAcquired {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One line of Form 8949, USD amounts rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Form8949Line {
    pub description: String,
    pub date_acquired: DateAcquired,
    pub date_sold: NaiveDate,
    pub proceeds: Decimal,
    pub basis: Decimal,
    pub gain: Decimal,
    /// `None` when merged rows straddle both holding periods
    pub term: Option<Term>,
}

impl Form8949Line {
    /// Build a line from the matched rows of a single disposal.
    ///
    /// Amounts are summed at full precision and rounded once. Returns `None`
    /// when there are no rows.
    pub fn merge(coin: &str, rows: &[&MatchedRow]) -> Option<Self> {
        let first = rows.first()?;

        let quantity: Decimal = rows.iter().map(|row| row.quantity).sum();
        let proceeds: Decimal = rows.iter().map(|row| row.proceeds).sum();
        let basis: Decimal = rows.iter().map(|row| row.basis).sum();

        let date_acquired = if rows.len() == 1 {
            DateAcquired::Date(first.acquired.date_naive())
        } else {
            DateAcquired::Various
        };
        let term = first.term();
        let term = rows.iter().all(|row| row.term() == term).then_some(term);

        Some(Form8949Line {
            description: format!("{} {}", coin, format_quantity(quantity)),
            date_acquired,
            date_sold: first.disposed.date_naive(),
            proceeds: round_usd(proceeds),
            basis: round_usd(basis),
            gain: round_usd(proceeds - basis),
            term,
        })
    }

    pub fn single(coin: &str, row: &MatchedRow) -> Self {
        Form8949Line {
            description: format!("{} {}", coin, format_quantity(row.quantity)),
            date_acquired: DateAcquired::Date(row.acquired.date_naive()),
            date_sold: row.disposed.date_naive(),
            proceeds: round_usd(row.proceeds),
            basis: round_usd(row.basis),
            gain: round_usd(row.gain()),
            term: Some(row.term()),
        }
    }
}

/// Rows of the report, with blank separators between assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportRow {
    Line(Form8949Line),
    Separator,
}

impl ReportRow {
    pub fn line(&self) -> Option<&Form8949Line> {
        match self {
            ReportRow::Line(line) => Some(line),
            ReportRow::Separator => None,
        }
    }
}

/// Sum of proceeds, basis and gain over the lines of a report.
pub fn totals(rows: &[ReportRow]) -> (Decimal, Decimal, Decimal) {
    rows.iter()
        .filter_map(ReportRow::line)
        .fold((Decimal::ZERO, Decimal::ZERO, Decimal::ZERO), |(p, b, g), line| {
            (p + line.proceeds, b + line.basis, g + line.gain)
        })
}

pub fn round_usd(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn format_quantity(qty: Decimal) -> String {
    let s = format!("{:.8}", qty.round_dp(8));
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}
