pub mod error;
pub mod form8949;
pub mod input;
pub mod lots;
pub mod report;
pub mod term;
pub mod transaction;

pub use form8949::{Form8949, ReportOptions};
pub use input::{read_transactions_json, TransactionInput};
pub use lots::Lot;
pub use report::{Form8949Line, ReportRow};
pub use term::TermFilter;
pub use transaction::Transaction;
