//! Client configuration, loaded from a JSON file and overridden by CLI flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::error::{ClientError, ClientResult};
use crate::executor::{ExecutorConfig, DEFAULT_MIN_BALANCE_WEI};
use crate::ledger::GasOverrides;
use crate::prover::CircuitArtifacts;
use crate::rpc::RpcConfig;
use crate::types::Address;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    pub snarkjs_bin: PathBuf,
    pub move_wasm: PathBuf,
    pub move_zkey: PathBuf,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            snarkjs_bin: PathBuf::from("snarkjs"),
            move_wasm: PathBuf::from("circuits/move/move.wasm"),
            move_zkey: PathBuf::from("circuits/move/move_final.zkey"),
        }
    }
}

impl ProverConfig {
    pub fn move_artifacts(&self) -> CircuitArtifacts {
        CircuitArtifacts {
            wasm: self.move_wasm.clone(),
            zkey: self.move_zkey.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub rpc_endpoint: String,
    pub account: Option<Address>,
    pub contract: Option<Address>,
    pub store_path: PathBuf,
    /// Wei. Stored as a string so JSON readers keep full precision.
    #[serde(with = "u128_string")]
    pub min_balance_wei: u128,
    pub nonce_staleness_secs: u64,
    pub board_rows: i64,
    pub board_cols: i64,
    pub receipt_poll_millis: u64,
    pub gas: GasOverrides,
    pub prover: ProverConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "ws://127.0.0.1:8546".to_string(),
            account: None,
            contract: None,
            store_path: PathBuf::from("shroud-secrets"),
            min_balance_wei: DEFAULT_MIN_BALANCE_WEI,
            nonce_staleness_secs: 30,
            board_rows: 8,
            board_cols: 8,
            receipt_poll_millis: 1000,
            gas: GasOverrides::default(),
            prover: ProverConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Reads `path`, or returns the defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|err| ClientError::Config(format!("{}: {err}", path.display())))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ClientResult<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn account(&self) -> ClientResult<Address> {
        self.account
            .ok_or_else(|| ClientError::Config("no account configured".into()))
    }

    pub fn contract(&self) -> ClientResult<Address> {
        self.contract
            .ok_or_else(|| ClientError::Config("no contract configured".into()))
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.board_rows <= 0 || self.board_cols <= 0 {
            return Err(ClientError::Config(format!(
                "board must be non-empty, got {}x{}",
                self.board_rows, self.board_cols
            )));
        }
        if self.receipt_poll_millis == 0 {
            return Err(ClientError::Config("receipt_poll_millis must be positive".into()));
        }
        Ok(())
    }

    pub fn rpc(&self) -> RpcConfig {
        RpcConfig {
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_millis),
            ..RpcConfig::with_endpoint(self.rpc_endpoint.clone())
        }
    }

    pub fn executor(&self) -> ClientResult<ExecutorConfig> {
        Ok(ExecutorConfig {
            account: self.account()?,
            contract: self.contract()?,
            min_balance: self.min_balance_wei,
            nonce_staleness: Duration::from_secs(self.nonce_staleness_secs),
        })
    }

    pub fn coordinator(&self) -> ClientResult<CoordinatorConfig> {
        Ok(CoordinatorConfig {
            account: self.account()?,
            contract: self.contract()?,
            board_rows: self.board_rows,
            board_cols: self.board_cols,
            gas: self.gas,
        })
    }
}

mod u128_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
            Raw::Number(number) => Ok(u128::from(number)),
        }
    }
}
