//! Groth16 proof values and their on-chain argument layout.
//!
//! Provers emit snarkjs-style JSON with projective coordinates. The verifier
//! contract takes `(a, b, c, input)` as positional arrays:
//!
//! ```text
//! [[A0, A1], [[B00, B01], [B10, B11]], [C0, C1], [pub0, pub1, ...]]
//! ```
//!
//! with the two rows of `B` swapped relative to the prover's output. The swap
//! happens in exactly one place, [`ProofB::from_native_rows`]; any other
//! reordering verifies as `false` on chain instead of failing loudly.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CryptoError;
use crate::field::FieldElement;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofA {
    pub x: FieldElement,
    pub y: FieldElement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofB {
    pub row0: [FieldElement; 2],
    pub row1: [FieldElement; 2],
}

impl ProofB {
    /// Builds the verifier-ordered `B` from the prover's native rows.
    pub fn from_native_rows(native0: [FieldElement; 2], native1: [FieldElement; 2]) -> Self {
        Self {
            row0: native1,
            row1: native0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofC {
    pub x: FieldElement,
    pub y: FieldElement,
}

/// Groth16 proof exactly as snarkjs writes `proof.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub curve: String,
}

/// Proof plus public signals, packed for a verifier call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArgs {
    pub a: ProofA,
    pub b: ProofB,
    pub c: ProofC,
    pub public_signals: Vec<FieldElement>,
}

impl ProofArgs {
    pub fn from_native(proof: &NativeProof, public_signals: &[String]) -> Result<Self, CryptoError> {
        let a = ProofA {
            x: coordinate(&proof.pi_a, 0, "pi_a")?,
            y: coordinate(&proof.pi_a, 1, "pi_a")?,
        };
        let native0 = proof
            .pi_b
            .first()
            .ok_or(CryptoError::MalformedProof("pi_b is missing row 0"))?;
        let native1 = proof
            .pi_b
            .get(1)
            .ok_or(CryptoError::MalformedProof("pi_b is missing row 1"))?;
        let b = ProofB::from_native_rows(
            [coordinate(native0, 0, "pi_b")?, coordinate(native0, 1, "pi_b")?],
            [coordinate(native1, 0, "pi_b")?, coordinate(native1, 1, "pi_b")?],
        );
        let c = ProofC {
            x: coordinate(&proof.pi_c, 0, "pi_c")?,
            y: coordinate(&proof.pi_c, 1, "pi_c")?,
        };
        let public_signals = public_signals
            .iter()
            .map(|signal| signal.parse())
            .collect::<Result<Vec<FieldElement>, _>>()?;
        Ok(Self {
            a,
            b,
            c,
            public_signals,
        })
    }

    /// Positional JSON form handed to the ledger binding.
    pub fn to_wire(&self) -> Value {
        json!([
            [self.a.x.to_string(), self.a.y.to_string()],
            [
                [self.b.row0[0].to_string(), self.b.row0[1].to_string()],
                [self.b.row1[0].to_string(), self.b.row1[1].to_string()],
            ],
            [self.c.x.to_string(), self.c.y.to_string()],
            self.public_signals
                .iter()
                .map(|signal| signal.to_string())
                .collect::<Vec<_>>(),
        ])
    }

    /// Every element in wire order, for fixed-size ABI encoding.
    pub fn flatten(&self) -> Vec<FieldElement> {
        let mut out = Vec::with_capacity(8 + self.public_signals.len());
        out.extend([self.a.x, self.a.y]);
        out.extend(self.b.row0);
        out.extend(self.b.row1);
        out.extend([self.c.x, self.c.y]);
        out.extend(self.public_signals.iter().copied());
        out
    }
}

fn coordinate(
    values: &[String],
    index: usize,
    label: &'static str,
) -> Result<FieldElement, CryptoError> {
    let raw = values
        .get(index)
        .ok_or(CryptoError::MalformedProof(label))?;
    raw.parse()
}
