use rust_decimal::Decimal;

/// Fatal conditions raised while replaying transactions into lots.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BasisError {
    /// A disposal needs more of a coin than all earlier acquisitions provide.
    #[error(
        "insufficient basis for {coin} in {transaction}: disposed {required}, only {available} available"
    )]
    InsufficientBasis {
        coin: String,
        transaction: String,
        required: Decimal,
        available: Decimal,
    },
    #[error("missing fair market value for {coin}: {transaction}")]
    MissingFairMarketValue { transaction: String, coin: String },
    #[error("transaction {transaction} does not affect {coin}")]
    UnknownTransaction { transaction: String, coin: String },
}
