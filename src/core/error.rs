use std::path::PathBuf;
use thiserror::Error;

/// Failures the counting core can report to its caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopKError {
    /// A run parameter is out of range; raised before any pass starts.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The corpus could not be opened, or reopened for a later pass.
    #[error("cannot read corpus {}: {reason}", path.display())]
    UnreadableSource { path: PathBuf, reason: String },
    /// A byte outside A/C/G/T where a k-mer symbol was expected.
    #[error("invalid symbol {symbol:?} at position {position}")]
    InvalidSymbol { symbol: char, position: usize },
    /// The run was finished before every pass had completed.
    #[error("run incomplete: {done} of {total} passes completed")]
    IncompleteRun { done: u64, total: u64 },
}

impl TopKError {
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        TopKError::InvalidParameter(msg.into())
    }
}
