mod cmd;
mod tax;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "US capital gains (Form 8949) from crypto transaction history")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Form 8949 rows for disposals, FIFO matched against earlier acquisitions
    Report(cmd::report::ReportCommand),
    /// Lots still held, their cost basis and balances per location
    Holdings(cmd::holdings::HoldingsCommand),
    /// List transactions with their fees and annotations
    Transactions(cmd::transactions::TransactionsCommand),
    /// Print the input format
    Schema(cmd::schema::SchemaCommand),
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Report(report) => report.exec(),
        Command::Holdings(holdings) => holdings.exec(),
        Command::Transactions(transactions) => transactions.exec(),
        Command::Schema(schema) => schema.exec(),
    }
}
