use thiserror::Error;

use shroud_crypto::{Commitment, CryptoError};

use crate::types::TxHash;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed intent, rejected before anything is submitted.
    #[error("invalid action: {0}")]
    Validation(String),

    /// The external prover failed. Opaque and never retried.
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    /// Balance preflight failed; no nonce consumed, no ledger call made.
    #[error("insufficient balance (have {balance}, need at least {minimum})")]
    InsufficientBalance { balance: u128, minimum: u128 },

    /// The node refused the submission; the nonce was not advanced.
    #[error("submission rejected: {0}")]
    Submission(String),

    /// Mined but reverted.
    #[error("transaction {tx_hash} reverted")]
    Revert { tx_hash: TxHash },

    /// No stored plaintext for this commitment in the current namespace.
    #[error("unknown commitment {0}")]
    UnknownCommitment(Commitment),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("storage error: {0}")]
    Store(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cryptography error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transaction executor has shut down")]
    ExecutorClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
