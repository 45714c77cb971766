//! Location commitments for hidden units.
//!
//! A hidden unit's board position is published only as
//! `Poseidon(row, col, salt)` over BN254. The move circuit recomputes the same
//! hash internally, so [`commit`] must stay bit-identical to it: a divergence
//! does not raise an error anywhere, it just makes every committed move
//! unprovable.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;
use crate::field::{FieldElement, FIELD_BYTES};
use crate::hashes::poseidon_hash;

/// Random salt bytes; 31 bytes keeps a fresh salt strictly below the modulus.
const SALT_BYTES: usize = 31;

/// Public digest binding a location to a salt.
///
/// The decimal string form is both the key used by the secret store and the
/// argument sent to the ledger, so there is exactly one representation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment(FieldElement);

impl Commitment {
    pub fn as_field(&self) -> FieldElement {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        self.0.to_be_bytes()
    }

    /// Reads a commitment published on chain as a 32-byte word.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        FieldElement::from_be_bytes_canonical(bytes).map(Self)
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.0)
    }
}

impl FromStr for Commitment {
    type Err = CryptoError;

    /// Parses a published digest. Values must already be canonical.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CryptoError::InvalidFieldElement(trimmed.to_string()));
        }
        let value = BigUint::from_str(trimmed)
            .map_err(|_| CryptoError::InvalidFieldElement(trimmed.to_string()))?;
        if value >= FieldElement::modulus() {
            return Err(CryptoError::InvalidFieldElement(format!(
                "{trimmed} is not a canonical commitment"
            )));
        }
        Ok(Self(FieldElement::from_biguint(&value)))
    }
}

impl Serialize for Commitment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Commitment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Blinding value mixed into a commitment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Salt(FieldElement);

impl Salt {
    /// Draws an independent salt. Every hidden placement or move needs its own.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SALT_BYTES];
        rng.fill_bytes(&mut bytes);
        Self(FieldElement::from_be_bytes_reduced(&bytes))
    }

    pub fn from_u64(value: u64) -> Self {
        Self(FieldElement::from_u64(value))
    }

    pub fn as_field(&self) -> FieldElement {
        self.0
    }
}

impl From<FieldElement> for Salt {
    fn from(value: FieldElement) -> Self {
        Self(value)
    }
}

impl fmt::Display for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Salts are secrets; keep them out of logs.
impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Salt(..)")
    }
}

impl FromStr for Salt {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<FieldElement>().map(Self)
    }
}

/// Commits to `(row, col)` under `salt`.
///
/// Each input is reduced to its canonical field representative before
/// hashing, exactly as the circuit's input signals are.
pub fn commit(row: i64, col: i64, salt: &Salt) -> Result<Commitment, CryptoError> {
    let inputs = [
        FieldElement::from_i64(row),
        FieldElement::from_i64(col),
        salt.as_field(),
    ];
    poseidon_hash(&inputs).map(Commitment)
}
