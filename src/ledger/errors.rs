// src/ledger/errors.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Node transport error: {0}")]
    Transport(String),

    /// The node answered the call with an error. Displays the node's message verbatim
    /// since that text is what ends up in the RPC reply.
    #[error("{0}")]
    Rejected(String),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("Invalid node response: {0}")]
    InvalidResponse(String),

    #[error("Invalid object id: {0}")]
    InvalidObjectId(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

// Custom Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// Whether the error means the node session itself is unusable and must be re-established.
    pub fn is_transport(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            LedgerError::InvalidResponse(error.to_string())
        } else {
            LedgerError::Transport(error.to_string())
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(error: serde_json::Error) -> Self {
        LedgerError::InvalidResponse(error.to_string())
    }
}

impl From<secp256k1::Error> for LedgerError {
    fn from(error: secp256k1::Error) -> Self {
        LedgerError::Signing(error.to_string())
    }
}
