//! In-process doubles for the ledger, prover and salt source.
//!
//! `InMemoryLedger` behaves like a tiny game contract: it enforces account
//! nonces, applies calls, keeps receipts and emits contract events, so the
//! coordinator can be driven end to end without a node.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use shroud_crypto::hashes::{keccak256, poseidon_hash};
use shroud_crypto::{commit, Commitment, NativeProof, Salt};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::coordinator::{ActionCoordinator, CoordinatorConfig, SaltSource};
use crate::error::{ClientError, ClientResult};
use crate::executor::{ExecutorConfig, TransactionExecutor};
use crate::ledger::{
    ChainPlacement, ChainSnapshot, ChainUnit, EventBatch, GameEvent, Ledger, LedgerCall,
    LedgerTransaction, Receipt, ReceiptStatus,
};
use crate::prover::{CircuitArtifacts, CircuitInputs, CircuitProver, ProofPipeline, RawProof};
use crate::store::SecretStore;
use crate::types::{Address, GameId, TxHash, UnitId};

/// One ether.
pub const DEFAULT_TEST_BALANCE: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Default)]
struct GameState {
    players: Vec<Address>,
    units: BTreeMap<UnitId, ChainUnit>,
}

#[derive(Debug, Default)]
struct Chain {
    balances: HashMap<Address, u128>,
    scripted_balances: VecDeque<u128>,
    nonces: HashMap<Address, u64>,
    reject_next: Option<String>,
    revert_methods: HashSet<&'static str>,
    submissions: Vec<LedgerTransaction>,
    receipts: HashMap<TxHash, Receipt>,
    games: BTreeMap<GameId, GameState>,
    next_game: GameId,
    events: Vec<(u64, GameEvent)>,
    block: u64,
    gate: Option<Arc<Semaphore>>,
}

impl Chain {
    fn game_mut(&mut self, game: GameId) -> Result<&mut GameState, String> {
        self.games
            .get_mut(&game)
            .ok_or_else(|| format!("no such game {game}"))
    }

    fn apply(&mut self, tx: &LedgerTransaction, block: u64) -> Result<(), String> {
        let from = tx.from;
        let event = match &tx.call {
            LedgerCall::CreateGame => {
                self.next_game += 1;
                let game = self.next_game;
                self.games.insert(
                    game,
                    GameState {
                        players: vec![from],
                        units: BTreeMap::new(),
                    },
                );
                GameEvent::CreatedGame {
                    game,
                    creator: from,
                }
            }
            LedgerCall::JoinGame { game } => {
                let state = self.game_mut(*game)?;
                if state.players.contains(&from) || state.players.len() >= 2 {
                    return Err("cannot join".into());
                }
                state.players.push(from);
                GameEvent::GameStart { game: *game }
            }
            LedgerCall::MoveUnit { game, unit, to } => {
                let state = self.game_mut(*game)?;
                if let Some(existing) = state.units.get(unit) {
                    if existing.owner != from {
                        return Err("not your unit".into());
                    }
                    if matches!(existing.placement, ChainPlacement::Hidden(_)) {
                        return Err("unit is hidden".into());
                    }
                }
                state.units.insert(
                    *unit,
                    ChainUnit {
                        id: *unit,
                        owner: from,
                        placement: ChainPlacement::Public(*to),
                    },
                );
                GameEvent::ActionMade {
                    game: *game,
                    player: from,
                }
            }
            LedgerCall::PlaceHidden {
                game,
                unit,
                commitment,
            } => {
                let state = self.game_mut(*game)?;
                if state.units.contains_key(unit) {
                    return Err("unit already placed".into());
                }
                state.units.insert(
                    *unit,
                    ChainUnit {
                        id: *unit,
                        owner: from,
                        placement: ChainPlacement::Hidden(*commitment),
                    },
                );
                GameEvent::ActionMade {
                    game: *game,
                    player: from,
                }
            }
            LedgerCall::MoveHidden { game, unit, proof } => {
                let state = self.game_mut(*game)?;
                let existing = state.units.get_mut(unit).ok_or("no such unit")?;
                let current = match existing.placement {
                    ChainPlacement::Hidden(commitment) if existing.owner == from => commitment,
                    _ => return Err("not a hidden unit you own".into()),
                };
                let [old, new] = proof.public_signals.as_slice() else {
                    return Err("expected two public signals".into());
                };
                if *old != current.as_field() {
                    return Err("proof is for a different commitment".into());
                }
                let next = Commitment::from_be_bytes(&new.to_be_bytes())
                    .map_err(|err| err.to_string())?;
                existing.placement = ChainPlacement::Hidden(next);
                GameEvent::ActionMade {
                    game: *game,
                    player: from,
                }
            }
            LedgerCall::RevealUnit {
                game,
                unit,
                location,
                salt,
            } => {
                let state = self.game_mut(*game)?;
                let existing = state.units.get_mut(unit).ok_or("no such unit")?;
                let current = match existing.placement {
                    ChainPlacement::Hidden(commitment) => commitment,
                    ChainPlacement::Public(_) => return Err("unit is not hidden".into()),
                };
                let opened =
                    commit(location.row, location.col, salt).map_err(|err| err.to_string())?;
                if opened != current {
                    return Err("opening does not match commitment".into());
                }
                existing.placement = ChainPlacement::Public(*location);
                GameEvent::ActionMade {
                    game: *game,
                    player: from,
                }
            }
        };
        self.events.push((block, event));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    chain: Mutex<Chain>,
    attempts: AtomicUsize,
    nonce_queries: AtomicUsize,
    balance_queries: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, account: &Address, balance: u128) {
        self.chain.lock().balances.insert(*account, balance);
    }

    /// Balances returned by the next `balance` calls, in order. Once the
    /// script runs out, the per-account balance applies again.
    pub fn script_balance(&self, balances: impl IntoIterator<Item = u128>) {
        self.chain.lock().scripted_balances.extend(balances);
    }

    pub fn set_nonce(&self, account: &Address, nonce: u64) {
        self.chain.lock().nonces.insert(*account, nonce);
    }

    /// The next submission is refused by the node.
    pub fn reject_next(&self, reason: &str) {
        self.chain.lock().reject_next = Some(reason.to_string());
    }

    /// Every transaction calling `method` is mined as reverted.
    pub fn revert_method(&self, method: &'static str) {
        self.chain.lock().revert_methods.insert(method);
    }

    /// Blocks submissions until [`release_submissions`](Self::release_submissions).
    pub fn hold_submissions(&self) {
        self.chain.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_submissions(&self, count: usize) {
        if let Some(gate) = self.chain.lock().gate.as_ref() {
            gate.add_permits(count);
        }
    }

    /// Submission attempts that reached the ledger, including held ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn nonce_queries(&self) -> usize {
        self.nonce_queries.load(Ordering::SeqCst)
    }

    pub fn balance_queries(&self) -> usize {
        self.balance_queries.load(Ordering::SeqCst)
    }

    /// Accepted transactions in acceptance order.
    pub fn submissions(&self) -> Vec<LedgerTransaction> {
        self.chain.lock().submissions.clone()
    }

    /// Puts a unit on the board directly, bypassing any transaction.
    pub fn insert_unit(&self, game: GameId, unit: ChainUnit) {
        let mut chain = self.chain.lock();
        chain.games.entry(game).or_default().units.insert(unit.id, unit);
    }

    pub fn block_number(&self) -> u64 {
        self.chain.lock().block
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn balance(&self, account: &Address) -> ClientResult<u128> {
        self.balance_queries.fetch_add(1, Ordering::SeqCst);
        let mut chain = self.chain.lock();
        if let Some(balance) = chain.scripted_balances.pop_front() {
            return Ok(balance);
        }
        Ok(chain
            .balances
            .get(account)
            .copied()
            .unwrap_or(DEFAULT_TEST_BALANCE))
    }

    async fn nonce(&self, account: &Address) -> ClientResult<u64> {
        self.nonce_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain.lock().nonces.get(account).copied().unwrap_or(0))
    }

    async fn submit(&self, tx: LedgerTransaction) -> ClientResult<TxHash> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let gate = self.chain.lock().gate.clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| ClientError::Ledger("submission gate closed".into()))?
                .forget();
        }

        let mut chain = self.chain.lock();
        if let Some(reason) = chain.reject_next.take() {
            return Err(ClientError::Submission(reason));
        }
        let expected = chain.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce != expected {
            return Err(ClientError::Submission(format!(
                "nonce mismatch: expected {expected}, got {}",
                tx.nonce
            )));
        }
        chain.nonces.insert(tx.from, expected + 1);
        chain.block += 1;
        let block = chain.block;

        let mut preimage = tx.from.as_bytes().to_vec();
        preimage.extend_from_slice(&tx.nonce.to_be_bytes());
        preimage.extend_from_slice(&tx.call.encode());
        let tx_hash = TxHash(keccak256(&preimage));

        let status = if chain.revert_methods.contains(tx.call.method()) {
            ReceiptStatus::Reverted
        } else {
            match chain.apply(&tx, block) {
                Ok(()) => ReceiptStatus::Success,
                Err(reason) => {
                    debug!(%tx_hash, reason = %reason, "in-memory contract reverted");
                    ReceiptStatus::Reverted
                }
            }
        };
        chain.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                block_number: block,
                status,
            },
        );
        chain.submissions.push(tx);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &TxHash) -> ClientResult<Receipt> {
        self.chain
            .lock()
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| ClientError::Ledger(format!("unknown transaction {tx_hash}")))
    }

    async fn game_snapshot(&self, _contract: &Address, game: GameId) -> ClientResult<ChainSnapshot> {
        let chain = self.chain.lock();
        let state = chain
            .games
            .get(&game)
            .ok_or_else(|| ClientError::Ledger(format!("no such game {game}")))?;
        Ok(ChainSnapshot {
            game,
            block_number: chain.block,
            units: state.units.values().cloned().collect(),
        })
    }

    async fn events_since(
        &self,
        _contract: &Address,
        game: GameId,
        from_block: u64,
    ) -> ClientResult<EventBatch> {
        let chain = self.chain.lock();
        let events = chain
            .events
            .iter()
            .filter(|(block, event)| *block >= from_block && event.game() == game)
            .map(|(_, event)| event.clone())
            .collect();
        Ok(EventBatch {
            events,
            next_block: chain.block + 1,
        })
    }
}

/// Prover that returns fixed curve points and the real commitment pair as
/// public signals.
#[derive(Debug, Default)]
pub struct ScriptedProver {
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedProver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn native_proof() -> NativeProof {
        let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        NativeProof {
            pi_a: strings(&["11", "12", "1"]),
            pi_b: vec![
                strings(&["21", "22"]),
                strings(&["23", "24"]),
                strings(&["1", "0"]),
            ],
            pi_c: strings(&["31", "32", "1"]),
            protocol: "groth16".into(),
            curve: "bn128".into(),
        }
    }
}

fn commitment_signal(inputs: &CircuitInputs, prefix: &str) -> anyhow::Result<String> {
    let mut values = Vec::with_capacity(3);
    for suffix in ["Row", "Col", "Salt"] {
        let name = format!("{prefix}{suffix}");
        values.push(
            inputs
                .get(&name)
                .ok_or_else(|| anyhow!("missing input {name}"))?,
        );
    }
    Ok(poseidon_hash(&values)?.to_string())
}

#[async_trait]
impl CircuitProver for ScriptedProver {
    async fn prove(
        &self,
        inputs: &CircuitInputs,
        _artifacts: &CircuitArtifacts,
    ) -> anyhow::Result<RawProof> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("scripted prover failure");
        }
        Ok(RawProof {
            proof: Self::native_proof(),
            public_signals: vec![
                commitment_signal(inputs, "old")?,
                commitment_signal(inputs, "new")?,
            ],
        })
    }
}

/// Hands out the given salts in order, then counts upwards from a large
/// offset.
#[derive(Debug)]
pub struct FixedSaltSource {
    salts: Mutex<VecDeque<Salt>>,
    fallback: AtomicU64,
}

impl FixedSaltSource {
    pub fn new(salts: impl IntoIterator<Item = u64>) -> Self {
        Self {
            salts: Mutex::new(salts.into_iter().map(Salt::from_u64).collect()),
            fallback: AtomicU64::new(1_000_000),
        }
    }
}

impl SaltSource for FixedSaltSource {
    fn draw(&self) -> Salt {
        match self.salts.lock().pop_front() {
            Some(salt) => salt,
            None => Salt::from_u64(self.fallback.fetch_add(1, Ordering::SeqCst)),
        }
    }
}

/// Fully wired coordinator over in-memory collaborators.
pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub prover: Arc<ScriptedProver>,
    pub coordinator: ActionCoordinator,
    pub account: Address,
    pub contract: Address,
}

pub const TEST_ACCOUNT: Address = Address([0x11; 20]);
pub const TEST_CONTRACT: Address = Address([0x22; 20]);

/// Must run inside a tokio runtime; the executor worker is spawned here.
pub fn harness() -> Harness {
    harness_with_prover(ScriptedProver::new())
}

pub fn harness_with_prover(prover: ScriptedProver) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let prover = Arc::new(prover);
    let executor = TransactionExecutor::spawn(
        ledger.clone(),
        ExecutorConfig::new(TEST_ACCOUNT, TEST_CONTRACT),
    );
    let pipeline = ProofPipeline::new(
        prover.clone(),
        CircuitArtifacts {
            wasm: "move.wasm".into(),
            zkey: "move_final.zkey".into(),
        },
    );
    let coordinator = ActionCoordinator::new(
        ledger.clone(),
        executor,
        pipeline,
        SecretStore::in_memory(),
        CoordinatorConfig::new(TEST_ACCOUNT, TEST_CONTRACT),
    );
    Harness {
        ledger,
        prover,
        coordinator,
        account: TEST_ACCOUNT,
        contract: TEST_CONTRACT,
    }
}
