pub mod commitment;
pub mod error;
pub mod field;
pub mod hashes;
pub mod proof;

pub use commitment::{commit, Commitment, Salt};
pub use error::CryptoError;
pub use field::FieldElement;
pub use proof::{NativeProof, ProofA, ProofArgs, ProofB, ProofC};
