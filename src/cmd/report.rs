//! Report command - Form 8949 capital gains rows

use super::{format_usd, read_transactions};
use crate::tax::report::totals;
use crate::tax::{Form8949, Form8949Line, ReportOptions, ReportRow, TermFilter};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct ReportCommand {
    /// Transactions file (JSON). Reads from stdin if not specified.
    #[arg(default_value = "-")]
    file: PathBuf,

    /// Only include disposals made in this calendar year
    #[arg(short, long)]
    year: Option<i32>,

    /// One row per disposal instead of one per lot
    #[arg(short, long)]
    aggregated: bool,

    /// Holding period to report
    #[arg(short, long, value_enum, default_value_t = TermArg::All)]
    term: TermArg,

    /// Output as CSV instead of formatted tables
    #[arg(long)]
    csv: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum TermArg {
    Short,
    Long,
    /// Separate short-term and long-term sections
    #[default]
    All,
    /// A single table with both holding periods mixed
    Unfiltered,
}

impl TermArg {
    fn sections(self) -> Vec<(&'static str, TermFilter)> {
        match self {
            TermArg::Short => vec![("SHORT-TERM CAPITAL GAINS", TermFilter::Short)],
            TermArg::Long => vec![("LONG-TERM CAPITAL GAINS", TermFilter::Long)],
            TermArg::All => vec![
                ("SHORT-TERM CAPITAL GAINS", TermFilter::Short),
                ("LONG-TERM CAPITAL GAINS", TermFilter::Long),
            ],
            TermArg::Unfiltered => vec![("CAPITAL GAINS", TermFilter::Unfiltered)],
        }
    }
}

impl ReportCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let transactions = read_transactions(&self.file)?;
        let form = Form8949::new(&transactions)?;
        log::info!("Assets: {}", form.coins().collect::<Vec<_>>().join(", "));

        let mut sections = Vec::new();
        for (title, term) in self.term.sections() {
            let options = ReportOptions {
                year: self.year,
                aggregated: self.aggregated,
                term,
            };
            sections.push((title, form.rows(&options)?));
        }

        if self.csv {
            let rows = sections.iter().flat_map(|(_, rows)| rows.iter());
            write_csv(rows, io::stdout())
        } else {
            for (title, rows) in &sections {
                self.print_section(title, rows);
            }
            Ok(())
        }
    }

    fn print_section(&self, title: &str, rows: &[ReportRow]) {
        let year_str = self.year.map_or("All Years".to_string(), |y| y.to_string());
        println!();
        println!("{} ({})", title, year_str);
        println!();

        if rows.is_empty() {
            println!("No disposals found");
            return;
        }

        let display_rows: Vec<LineRow> = rows.iter().map(LineRow::from).collect();
        let table = Table::new(display_rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);

        let (proceeds, basis, gain) = totals(rows);
        let count = rows.iter().filter_map(ReportRow::line).count();
        println!(
            "Totals: {} rows, proceeds {}, cost basis {}, gain {}",
            count,
            format_usd(proceeds),
            format_usd(basis),
            format_usd(gain)
        );
        log::info!("{}: {} rows, net gain {}", title, count, gain);
    }
}

#[derive(Debug, Clone, Tabled)]
struct LineRow {
    #[tabled(rename = "(a) Description")]
    description: String,
    #[tabled(rename = "(b) Date Acquired")]
    date_acquired: String,
    #[tabled(rename = "(c) Date Sold")]
    date_sold: String,
    #[tabled(rename = "(d) Proceeds")]
    proceeds: String,
    #[tabled(rename = "(e) Cost Basis")]
    basis: String,
    #[tabled(rename = "(h) Gain or (Loss)")]
    gain: String,
}

impl From<&ReportRow> for LineRow {
    fn from(row: &ReportRow) -> Self {
        match row {
            ReportRow::Line(line) => LineRow {
                description: line.description.clone(),
                date_acquired: line.date_acquired.to_string(),
                date_sold: line.date_sold.format("%Y-%m-%d").to_string(),
                proceeds: format_usd(line.proceeds),
                basis: format_usd(line.basis),
                gain: format_usd(line.gain),
            },
            ReportRow::Separator => LineRow {
                description: String::new(),
                date_acquired: String::new(),
                date_sold: String::new(),
                proceeds: String::new(),
                basis: String::new(),
                gain: String::new(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct LineRecord<'a> {
    description: &'a str,
    date_acquired: String,
    date_sold: String,
    proceeds: String,
    cost_basis: String,
    gain: String,
    term: &'static str,
}

impl<'a> From<&'a Form8949Line> for LineRecord<'a> {
    fn from(line: &'a Form8949Line) -> Self {
        LineRecord {
            description: &line.description,
            date_acquired: line.date_acquired.to_string(),
            date_sold: line.date_sold.format("%Y-%m-%d").to_string(),
            proceeds: format!("{:.2}", line.proceeds),
            cost_basis: format!("{:.2}", line.basis),
            gain: format!("{:.2}", line.gain),
            term: line.term.map_or("mixed", |term| term.display()),
        }
    }
}

/// Write report lines as CSV, dropping the blank separators.
fn write_csv<'a, R, W>(rows: R, writer: W) -> anyhow::Result<()>
where
    R: IntoIterator<Item = &'a ReportRow>,
    W: io::Write,
{
    let mut wtr = csv::Writer::from_writer(writer);
    for line in rows.into_iter().filter_map(ReportRow::line) {
        wtr.serialize(LineRecord::from(line))?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::report::DateAcquired;
    use crate::tax::term::Term;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn line(term: Option<Term>) -> Form8949Line {
        Form8949Line {
            description: "BTC 0.5".to_string(),
            date_acquired: DateAcquired::Various,
            date_sold: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            proceeds: dec!(5000),
            basis: dec!(4000.5),
            gain: dec!(999.5),
            term,
        }
    }

    #[test]
    fn csv_skips_separators() {
        let rows = vec![
            ReportRow::Line(line(Some(Term::Long))),
            ReportRow::Separator,
            ReportRow::Line(line(None)),
        ];
        let mut out = Vec::new();
        write_csv(&rows, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines[0],
            "description,date_acquired,date_sold,proceeds,cost_basis,gain,term"
        );
        assert_eq!(lines[1], "BTC 0.5,Various,2021-03-01,5000.00,4000.50,999.50,long");
        assert_eq!(lines[2], "BTC 0.5,Various,2021-03-01,5000.00,4000.50,999.50,mixed");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn all_terms_split_into_sections() {
        let titles: Vec<_> = TermArg::All.sections().into_iter().map(|(t, _)| t).collect();
        assert_eq!(titles, vec!["SHORT-TERM CAPITAL GAINS", "LONG-TERM CAPITAL GAINS"]);
        assert_eq!(TermArg::Unfiltered.sections()[0].1, TermFilter::Unfiltered);
    }

    #[test]
    fn separator_renders_blank() {
        let row = LineRow::from(&ReportRow::Separator);
        assert!(row.description.is_empty() && row.gain.is_empty());
    }
}
