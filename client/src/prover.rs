//! Groth16 proof generation for hidden moves.
//!
//! The circuit itself is an external artifact. [`ProofPipeline`] builds the
//! witness inputs, hands them to a [`CircuitProver`], and repackages the
//! result as [`ProofArgs`] for the ledger call.
//!
//! ## Move circuit
//!
//! Private inputs are `oldRow, oldCol, oldSalt, newRow, newCol, newSalt`.
//! Public signals are `[oldCommitment, newCommitment]`, both computed inside
//! the circuit with the same Poseidon as [`shroud_crypto::commit`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shroud_crypto::{FieldElement, NativeProof, ProofArgs, Salt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::types::Location;

/// Compiled circuit and proving key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitArtifacts {
    pub wasm: PathBuf,
    pub zkey: PathBuf,
}

/// Named witness inputs, serialized as the prover's `input.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CircuitInputs(BTreeMap<String, FieldElement>);

impl CircuitInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: FieldElement) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<FieldElement> {
        self.0.get(name).copied()
    }

    pub fn move_inputs(old: Location, old_salt: &Salt, new: Location, new_salt: &Salt) -> Self {
        let mut inputs = Self::new();
        inputs.insert("oldRow", FieldElement::from_i64(old.row));
        inputs.insert("oldCol", FieldElement::from_i64(old.col));
        inputs.insert("oldSalt", old_salt.as_field());
        inputs.insert("newRow", FieldElement::from_i64(new.row));
        inputs.insert("newCol", FieldElement::from_i64(new.col));
        inputs.insert("newSalt", new_salt.as_field());
        inputs
    }
}

/// Prover output before repackaging.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProof {
    pub proof: NativeProof,
    pub public_signals: Vec<String>,
}

#[async_trait]
pub trait CircuitProver: Send + Sync {
    async fn prove(
        &self,
        inputs: &CircuitInputs,
        artifacts: &CircuitArtifacts,
    ) -> anyhow::Result<RawProof>;
}

/// Shells out to `snarkjs groth16 fullprove`.
#[derive(Clone, Debug)]
pub struct SnarkjsProver {
    binary: PathBuf,
}

impl SnarkjsProver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SnarkjsProver {
    fn default() -> Self {
        Self::new("snarkjs")
    }
}

#[async_trait]
impl CircuitProver for SnarkjsProver {
    async fn prove(
        &self,
        inputs: &CircuitInputs,
        artifacts: &CircuitArtifacts,
    ) -> anyhow::Result<RawProof> {
        let workdir = tempfile::tempdir().context("creating prover workdir")?;
        let input_path = workdir.path().join("input.json");
        let proof_path = workdir.path().join("proof.json");
        let public_path = workdir.path().join("public.json");

        tokio::fs::write(&input_path, serde_json::to_vec(inputs)?)
            .await
            .context("writing witness input")?;

        let output = Command::new(&self.binary)
            .arg("groth16")
            .arg("fullprove")
            .arg(&input_path)
            .arg(&artifacts.wasm)
            .arg(&artifacts.zkey)
            .arg(&proof_path)
            .arg(&public_path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("spawning {}", self.binary.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("snarkjs exited with {}: {}", output.status, stderr.trim());
        }

        let proof_bytes = tokio::fs::read(&proof_path)
            .await
            .context("reading proof.json")?;
        let proof: NativeProof =
            serde_json::from_slice(&proof_bytes).context("parsing proof.json")?;
        let public_bytes = tokio::fs::read(&public_path)
            .await
            .context("reading public.json")?;
        let public_signals: Vec<String> =
            serde_json::from_slice(&public_bytes).context("parsing public.json")?;
        if public_signals.is_empty() {
            return Err(anyhow!("prover returned no public signals"));
        }
        Ok(RawProof {
            proof,
            public_signals,
        })
    }
}

/// Turns hidden moves into verifier-ready arguments.
#[derive(Clone)]
pub struct ProofPipeline {
    prover: Arc<dyn CircuitProver>,
    move_circuit: CircuitArtifacts,
}

impl ProofPipeline {
    pub fn new(prover: Arc<dyn CircuitProver>, move_circuit: CircuitArtifacts) -> Self {
        Self {
            prover,
            move_circuit,
        }
    }

    /// Proves that the unit committed at `old` under `old_salt` moved to
    /// `new` under `new_salt`.
    ///
    /// Any prover failure, including output that does not parse as a proof,
    /// is reported as [`ClientError::ProofGeneration`]. Nothing is retried.
    pub async fn move_proof(
        &self,
        old: Location,
        old_salt: &Salt,
        new: Location,
        new_salt: &Salt,
    ) -> ClientResult<ProofArgs> {
        let inputs = CircuitInputs::move_inputs(old, old_salt, new, new_salt);
        let started = Instant::now();
        let raw = self
            .prover
            .prove(&inputs, &self.move_circuit)
            .await
            .map_err(|err| {
                warn!(error = %format!("{err:#}"), "move proof failed");
                ClientError::ProofGeneration(format!("{err:#}"))
            })?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "move proof generated");
        ProofArgs::from_native(&raw.proof, &raw.public_signals)
            .map_err(|err| ClientError::ProofGeneration(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedProver;
    use shroud_crypto::commit;

    fn artifacts() -> CircuitArtifacts {
        CircuitArtifacts {
            wasm: "move.wasm".into(),
            zkey: "move.zkey".into(),
        }
    }

    #[test]
    fn move_inputs_use_circuit_signal_names() {
        let inputs = CircuitInputs::move_inputs(
            Location::new(3, 3),
            &Salt::from_u64(0),
            Location::new(4, 3),
            &Salt::from_u64(7),
        );
        let json = serde_json::to_value(&inputs).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "oldRow": "3", "oldCol": "3", "oldSalt": "0",
                "newRow": "4", "newCol": "3", "newSalt": "7"
            })
        );
    }

    #[tokio::test]
    async fn pipeline_swaps_b_rows_and_keeps_signals() {
        let pipeline = ProofPipeline::new(Arc::new(ScriptedProver::new()), artifacts());
        let args = pipeline
            .move_proof(
                Location::new(3, 3),
                &Salt::from_u64(0),
                Location::new(4, 3),
                &Salt::from_u64(7),
            )
            .await
            .unwrap();
        let native = ScriptedProver::native_proof();
        assert_eq!(args.b.row0[0].to_string(), native.pi_b[1][0]);
        assert_eq!(args.b.row1[0].to_string(), native.pi_b[0][0]);
        assert_eq!(
            args.public_signals,
            vec![
                commit(3, 3, &Salt::from_u64(0)).unwrap().as_field(),
                commit(4, 3, &Salt::from_u64(7)).unwrap().as_field(),
            ]
        );
    }

    #[tokio::test]
    async fn prover_failure_is_opaque() {
        let pipeline = ProofPipeline::new(Arc::new(ScriptedProver::failing()), artifacts());
        let err = pipeline
            .move_proof(
                Location::new(0, 0),
                &Salt::from_u64(0),
                Location::new(0, 1),
                &Salt::from_u64(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ProofGeneration(_)));
    }

    #[tokio::test]
    async fn missing_snarkjs_binary_is_a_proof_error() {
        let prover = SnarkjsProver::new("/nonexistent/snarkjs-for-tests");
        let pipeline = ProofPipeline::new(Arc::new(prover), artifacts());
        let err = pipeline
            .move_proof(
                Location::new(0, 0),
                &Salt::from_u64(0),
                Location::new(0, 1),
                &Salt::from_u64(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ProofGeneration(_)));
    }
}
