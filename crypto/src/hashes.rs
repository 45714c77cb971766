use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};
use sha3::{Digest, Keccak256};

use crate::error::CryptoError;
use crate::field::FieldElement;

/// Largest arity supported by the circomlib Poseidon parameter sets.
pub const POSEIDON_MAX_INPUTS: usize = 12;

/// circomlib-compatible Poseidon over BN254.
///
/// Round counts and constants are the ones circomlib's `Poseidon(n)` template
/// uses, so the output matches the in-circuit hash for the same inputs.
pub fn poseidon_hash(inputs: &[FieldElement]) -> Result<FieldElement, CryptoError> {
    if inputs.is_empty() || inputs.len() > POSEIDON_MAX_INPUTS {
        return Err(CryptoError::Hash(format!(
            "unsupported poseidon arity {}",
            inputs.len()
        )));
    }
    let mut hasher = Poseidon::<Fr>::new_circom(inputs.len())
        .map_err(|err| CryptoError::Hash(err.to_string()))?;
    let elements: Vec<Fr> = inputs.iter().map(FieldElement::inner).collect();
    let digest = hasher
        .hash(&elements)
        .map_err(|err| CryptoError::Hash(err.to_string()))?;
    Ok(FieldElement::from(digest))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Four-byte Solidity function selector for a canonical signature such as
/// `joinGame(uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = keccak256(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poseidon_rejects_empty_input() {
        assert!(poseidon_hash(&[]).is_err());
    }

    #[test]
    fn keccak_of_empty_string() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn erc20_transfer_selector() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }
}
