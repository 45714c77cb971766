use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid field element: {0}")]
    InvalidFieldElement(String),

    #[error("invalid length: expected {expected} bytes, found {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("poseidon hash failed: {0}")]
    Hash(String),

    #[error("malformed proof: {0}")]
    MalformedProof(&'static str),
}
