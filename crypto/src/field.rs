//! BN254 scalar field elements.
//!
//! Every value that crosses into the proving circuit or onto the ledger is a
//! canonical representative in `[0, p)`. Signed integers wrap the way the
//! circuit expects (`-1` becomes `p - 1`), and the external representation is
//! always the base-10 string of that representative.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::{BigInt, BigUint, Sign};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// Width of a serialized field element in bytes.
pub const FIELD_BYTES: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldElement(Fr);

impl FieldElement {
    pub fn zero() -> Self {
        Self(Fr::from(0u64))
    }

    /// The field modulus `p`.
    pub fn modulus() -> BigUint {
        BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Fr::from(value))
    }

    /// Canonical representative of a signed integer: `((x mod p) + p) mod p`.
    pub fn from_i64(value: i64) -> Self {
        let magnitude = Fr::from(value.unsigned_abs());
        if value < 0 {
            Self(-magnitude)
        } else {
            Self(magnitude)
        }
    }

    pub fn from_biguint(value: &BigUint) -> Self {
        Self(Fr::from_be_bytes_mod_order(&value.to_bytes_be()))
    }

    pub fn from_bigint(value: &BigInt) -> Self {
        let (sign, magnitude) = value.to_bytes_be();
        let reduced = Fr::from_be_bytes_mod_order(&magnitude);
        match sign {
            Sign::Minus => Self(-reduced),
            _ => Self(reduced),
        }
    }

    /// Reduces an arbitrary big-endian byte string modulo `p`.
    pub fn from_be_bytes_reduced(bytes: &[u8]) -> Self {
        Self(Fr::from_be_bytes_mod_order(bytes))
    }

    /// Parses a big-endian 32-byte word, rejecting values outside `[0, p)`.
    pub fn from_be_bytes_canonical(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != FIELD_BYTES {
            return Err(CryptoError::InvalidLength {
                expected: FIELD_BYTES,
                actual: bytes.len(),
            });
        }
        let value = BigUint::from_bytes_be(bytes);
        if value >= Self::modulus() {
            return Err(CryptoError::InvalidFieldElement(format!(
                "0x{} is not below the field modulus",
                hex::encode(bytes)
            )));
        }
        Ok(Self::from_biguint(&value))
    }

    /// Inverse of [`from_i64`](Self::from_i64): the signed integer this
    /// element represents, if one fits. Representatives above `p / 2` are
    /// read as negatives.
    pub fn to_i64(&self) -> Option<i64> {
        if let Ok(value) = u64::try_from(&self.to_biguint()) {
            return i64::try_from(value).ok();
        }
        let magnitude = u64::try_from(&Self(-self.0).to_biguint()).ok()?;
        if magnitude <= i64::MAX as u64 + 1 {
            Some((magnitude as i64).wrapping_neg())
        } else {
            None
        }
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0.into_bigint().to_bytes_be())
    }

    pub fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        let bytes = self.0.into_bigint().to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        // into_bigint is exactly 32 bytes for BN254; left-pad regardless.
        let offset = FIELD_BYTES.saturating_sub(bytes.len());
        out[offset..].copy_from_slice(&bytes[bytes.len().saturating_sub(FIELD_BYTES)..]);
        out
    }

    pub fn inner(&self) -> Fr {
        self.0
    }
}

impl From<Fr> for FieldElement {
    fn from(value: Fr) -> Self {
        Self(value)
    }
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_biguint())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_biguint())
    }
}

impl FromStr for FieldElement {
    type Err = CryptoError;

    /// Parses a base-10 integer (optionally signed) and reduces it into the field.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CryptoError::InvalidFieldElement("empty string".into()));
        }
        let value = BigInt::from_str(trimmed)
            .map_err(|_| CryptoError::InvalidFieldElement(trimmed.to_string()))?;
        Ok(Self::from_bigint(&value))
    }
}

impl Serialize for FieldElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
