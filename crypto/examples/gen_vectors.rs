//! Print commitment vectors for cross-checking against the move circuit.
//! Run with: cargo run -p shroud-crypto --example gen_vectors
//!
//! Feed the same (row, col, salt) triples to the circuit's witness generator;
//! the digests must match byte for byte.

use shroud_crypto::{commit, Salt};

const CASES: &[(i64, i64, u64)] = &[(0, 0, 0), (3, 3, 0), (4, 3, 7), (7, 7, 123456789)];

fn main() {
    println!("[");
    for (i, (row, col, salt)) in CASES.iter().enumerate() {
        let digest = match commit(*row, *col, &Salt::from_u64(*salt)) {
            Ok(digest) => digest,
            Err(err) => {
                eprintln!("commit({row}, {col}, {salt}) failed: {err}");
                std::process::exit(1);
            }
        };
        let sep = if i + 1 == CASES.len() { "" } else { "," };
        println!(
            "  {{\"row\": {row}, \"col\": {col}, \"salt\": \"{salt}\", \"commitment\": \"{digest}\"}}{sep}"
        );
    }
    println!("]");
}
