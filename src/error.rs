use serde::{Deserialize, Serialize};

/// Coarse failure class shared by every rejected operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller identity does not hold the role the operation requires.
    Authorization,
    /// Required prior state is missing (unknown token, missing approval, stale nonce).
    Precursor,
    /// Malformed or out-of-range input.
    Value,
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
