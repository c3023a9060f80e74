use thiserror::Error;

pub type Result<T> = std::result::Result<T, GarnerError>;

/// Crate-wide error type.
///
/// Transaction aborts are *not* errors: they surface as a `false` commit
/// decision from [`finish_txn`](crate::store::Store::finish_txn) (or from
/// the implicit per-operation transaction). Errors here are either
/// permanent (configuration, unsupported operations) or fatal (structural
/// corruption, after which the store state is undefined).
#[derive(Debug, Error)]
pub enum GarnerError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
