//! End-to-end orchestration of user actions.
//!
//! Visible actions go straight to the executor. Hidden actions draw a fresh
//! salt, commit to the new location, persist the opening, prove the move and
//! only then submit. Chain snapshots are reconciled against the secret store
//! so hidden units the local account owns render at their real location.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use shroud_crypto::{commit, Commitment, Salt};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::{LifecycleBus, LifecycleEvent, LifecycleKind, Subscription};
use crate::executor::{QueueEntry, TransactionExecutor};
use crate::ledger::{
    ChainPlacement, ChainSnapshot, GameEvent, GasOverrides, Ledger, LedgerCall, Receipt,
    ReceiptStatus,
};
use crate::prover::ProofPipeline;
use crate::store::SecretStore;
use crate::types::{
    Action, ActionId, ActionIntent, Address, GameId, Location, SubmittedAction, TxHash, UnitId,
};

/// Source of commitment salts.
pub trait SaltSource: Send + Sync {
    fn draw(&self) -> Salt;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsSaltSource;

impl SaltSource for OsSaltSource {
    fn draw(&self) -> Salt {
        Salt::random(&mut OsRng)
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub account: Address,
    pub contract: Address,
    pub board_rows: i64,
    pub board_cols: i64,
    pub gas: GasOverrides,
}

impl CoordinatorConfig {
    pub fn new(account: Address, contract: Address) -> Self {
        Self {
            account,
            contract,
            board_rows: 8,
            board_cols: 8,
            gas: GasOverrides::default(),
        }
    }

    fn check_on_board(&self, location: Location) -> ClientResult<()> {
        if (0..self.board_rows).contains(&location.row) && (0..self.board_cols).contains(&location.col)
        {
            Ok(())
        } else {
            Err(ClientError::Validation(format!(
                "{location} is outside the {}x{} board",
                self.board_rows, self.board_cols
            )))
        }
    }
}

/// Where a unit is, as far as this client can tell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitPosition {
    Public {
        location: Location,
    },
    /// Hidden on chain, opened from the local secret store.
    Recovered {
        commitment: Commitment,
        location: Location,
        salt: Salt,
    },
    /// Hidden on chain with no local opening. Present, location unknown.
    Unknown {
        commitment: Commitment,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedUnit {
    pub id: UnitId,
    pub owner: Address,
    pub position: UnitPosition,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameView {
    pub game: GameId,
    pub block_number: u64,
    pub units: Vec<RenderedUnit>,
}

impl GameView {
    pub fn unit(&self, id: UnitId) -> Option<&RenderedUnit> {
        self.units.iter().find(|unit| unit.id == id)
    }
}

/// An action the node has accepted but that may not be mined yet.
#[derive(Debug)]
pub struct PendingAction {
    pub submitted: SubmittedAction,
    pub nonce: u64,
    confirmation: oneshot::Receiver<ClientResult<Receipt>>,
}

impl PendingAction {
    pub fn action_id(&self) -> &ActionId {
        &self.submitted.intent.id
    }

    pub fn tx_hash(&self) -> TxHash {
        self.submitted.tx_hash
    }

    /// Resolves once the transaction is mined. A revert is
    /// [`ClientError::Revert`].
    pub async fn confirmation(self) -> ClientResult<Receipt> {
        self.confirmation
            .await
            .map_err(|_| ClientError::Ledger("confirmation watcher stopped".into()))?
    }
}

/// Unconfirmed set plus the bus; shared with confirmation watchers.
#[derive(Clone, Default)]
struct Tracker {
    bus: LifecycleBus,
    unconfirmed: Arc<Mutex<BTreeMap<ActionId, ActionIntent>>>,
}

impl Tracker {
    fn begin(&self, action: Action) -> ActionIntent {
        let intent = ActionIntent::new(action);
        self.unconfirmed
            .lock()
            .insert(intent.id.clone(), intent.clone());
        info!(action_id = %intent.id, action = intent.action.name(), "action started");
        self.publish(&intent, LifecycleKind::Init);
        intent
    }

    fn publish(&self, intent: &ActionIntent, kind: LifecycleKind) {
        self.bus.publish(LifecycleEvent {
            action_id: intent.id.clone(),
            kind,
            payload: intent.clone(),
        });
    }

    /// Removes the action from the unconfirmed set, then announces the end.
    fn finish(&self, intent: &ActionIntent, kind: LifecycleKind) {
        self.unconfirmed.lock().remove(&intent.id);
        self.publish(intent, kind);
    }
}

#[derive(Clone)]
pub struct ActionCoordinator {
    ledger: Arc<dyn Ledger>,
    executor: TransactionExecutor,
    pipeline: ProofPipeline,
    store: SecretStore,
    salts: Arc<dyn SaltSource>,
    config: CoordinatorConfig,
    tracker: Tracker,
    views: Arc<Mutex<HashMap<GameId, GameView>>>,
}

impl ActionCoordinator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        executor: TransactionExecutor,
        pipeline: ProofPipeline,
        store: SecretStore,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            executor,
            pipeline,
            store,
            salts: Arc::new(OsSaltSource),
            config,
            tracker: Tracker::default(),
            views: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_salt_source(mut self, salts: Arc<dyn SaltSource>) -> Self {
        self.salts = salts;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    pub fn executor(&self) -> &TransactionExecutor {
        &self.executor
    }

    pub fn subscribe(&self) -> Subscription {
        self.tracker.bus.subscribe()
    }

    /// Actions started but not yet confirmed or failed, oldest first.
    pub fn unconfirmed_actions(&self) -> Vec<ActionIntent> {
        let mut actions: Vec<ActionIntent> =
            self.tracker.unconfirmed.lock().values().cloned().collect();
        actions.sort_by_key(|intent| intent.created_at);
        actions
    }

    /// Last reconciled view of `game`, if any.
    pub fn view(&self, game: GameId) -> Option<GameView> {
        self.views.lock().get(&game).cloned()
    }

    pub async fn create_game(&self) -> ClientResult<PendingAction> {
        let intent = self.tracker.begin(Action::CreateGame);
        self.submit(intent, LedgerCall::CreateGame).await
    }

    pub async fn join_game(&self, game: GameId) -> ClientResult<PendingAction> {
        let intent = self.tracker.begin(Action::JoinGame { game });
        self.submit(intent, LedgerCall::JoinGame { game }).await
    }

    /// Moves a visible unit.
    pub async fn move_unit(
        &self,
        game: GameId,
        unit: UnitId,
        to: Location,
    ) -> ClientResult<PendingAction> {
        self.config.check_on_board(to)?;
        let intent = self.tracker.begin(Action::MoveUnit { game, unit, to });
        self.submit(intent, LedgerCall::MoveUnit { game, unit, to })
            .await
    }

    /// Places a unit whose location is published only as a commitment.
    pub async fn place_hidden(
        &self,
        game: GameId,
        unit: UnitId,
        at: Location,
    ) -> ClientResult<PendingAction> {
        self.config.check_on_board(at)?;
        let intent = self.tracker.begin(Action::PlaceHidden { game, unit, at });
        let commitment = match self.commit_and_store(at) {
            Ok((commitment, _)) => commitment,
            Err(err) => return Err(self.fail_before_submit(&intent, err)),
        };
        self.submit(
            intent,
            LedgerCall::PlaceHidden {
                game,
                unit,
                commitment,
            },
        )
        .await
    }

    /// Moves a hidden unit to `to` without revealing either square.
    ///
    /// The new opening is persisted before the proof is requested, so it
    /// survives a crash at any later point.
    pub async fn move_hidden(
        &self,
        game: GameId,
        unit: UnitId,
        to: Location,
    ) -> ClientResult<PendingAction> {
        self.config.check_on_board(to)?;
        let (old_location, old_salt) = self.recovered_unit(game, unit).await?;

        let intent = self.tracker.begin(Action::MoveHidden { game, unit, to });
        let new_salt = match self.commit_and_store(to) {
            Ok((_, salt)) => salt,
            Err(err) => return Err(self.fail_before_submit(&intent, err)),
        };

        let proof = match self
            .pipeline
            .move_proof(old_location, &old_salt, to, &new_salt)
            .await
        {
            Ok(proof) => proof,
            Err(err) => return Err(self.fail_before_submit(&intent, err)),
        };
        self.submit(intent, LedgerCall::MoveHidden { game, unit, proof })
            .await
    }

    /// Publishes the stored opening of a hidden unit.
    pub async fn reveal(&self, game: GameId, unit: UnitId) -> ClientResult<PendingAction> {
        let (location, salt) = self.recovered_unit(game, unit).await?;
        let intent = self.tracker.begin(Action::Reveal { game, unit });
        self.submit(
            intent,
            LedgerCall::RevealUnit {
                game,
                unit,
                location,
                salt,
            },
        )
        .await
    }

    /// Fetches the current chain state of `game` and reconciles it.
    pub async fn refresh(&self, game: GameId) -> ClientResult<GameView> {
        let snapshot = self
            .ledger
            .game_snapshot(&self.config.contract, game)
            .await?;
        self.reconcile(&snapshot)
    }

    /// Merges locally held openings into a chain snapshot.
    ///
    /// A hidden unit with no stored opening is not an error; it renders as
    /// present with an unknown location.
    pub fn reconcile(&self, snapshot: &ChainSnapshot) -> ClientResult<GameView> {
        let mut units = Vec::with_capacity(snapshot.units.len());
        for unit in &snapshot.units {
            let position = match unit.placement {
                ChainPlacement::Public(location) => UnitPosition::Public { location },
                ChainPlacement::Hidden(commitment) => match self.store.get(
                    &commitment,
                    &self.config.account,
                    &self.config.contract,
                ) {
                    Ok(entry) => UnitPosition::Recovered {
                        commitment,
                        location: entry.location,
                        salt: entry.salt,
                    },
                    Err(ClientError::UnknownCommitment(_)) => UnitPosition::Unknown { commitment },
                    Err(err) => return Err(err),
                },
            };
            units.push(RenderedUnit {
                id: unit.id,
                owner: unit.owner,
                position,
            });
        }
        let view = GameView {
            game: snapshot.game,
            block_number: snapshot.block_number,
            units,
        };
        debug!(
            game = view.game,
            block = view.block_number,
            units = view.units.len(),
            "reconciled snapshot"
        );
        self.views.lock().insert(view.game, view.clone());
        Ok(view)
    }

    /// Keeps a reconciled view of `game` current by polling contract events.
    ///
    /// The returned receiver starts with a fresh view. Polling stops when the
    /// game finishes or the receiver is dropped.
    pub async fn watch_events(
        &self,
        game: GameId,
        poll_interval: Duration,
    ) -> ClientResult<watch::Receiver<GameView>> {
        let initial = self.refresh(game).await?;
        let mut next_block = initial.block_number + 1;
        let (sender, receiver) = watch::channel(initial);
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if sender.is_closed() {
                    break;
                }
                let batch = match coordinator
                    .ledger
                    .events_since(&coordinator.config.contract, game, next_block)
                    .await
                {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!(game, error = %err, "event poll failed");
                        continue;
                    }
                };
                next_block = batch.next_block.max(next_block);
                let relevant: Vec<&GameEvent> =
                    batch.events.iter().filter(|event| event.game() == game).collect();
                if relevant.is_empty() {
                    continue;
                }
                let finished = relevant
                    .iter()
                    .any(|event| matches!(event, GameEvent::GameFinished { .. }));
                match coordinator.refresh(game).await {
                    Ok(view) => {
                        if sender.send(view).is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(game, error = %err, "refresh after event failed"),
                }
                if finished {
                    info!(game, "game finished, stopping event watch");
                    break;
                }
            }
        });
        Ok(receiver)
    }

    async fn recovered_unit(
        &self,
        game: GameId,
        unit: UnitId,
    ) -> ClientResult<(Location, Salt)> {
        let view = self.refresh(game).await?;
        let rendered = view
            .unit(unit)
            .ok_or_else(|| ClientError::Validation(format!("unit {unit} not found in game {game}")))?;
        match &rendered.position {
            UnitPosition::Recovered { location, salt, .. } => Ok((*location, *salt)),
            UnitPosition::Public { .. } => Err(ClientError::Validation(format!(
                "unit {unit} is not hidden"
            ))),
            UnitPosition::Unknown { commitment } => Err(ClientError::Validation(format!(
                "no stored opening for unit {unit} (commitment {commitment})"
            ))),
        }
    }

    /// Draws a fresh salt, commits to `at` and persists the opening.
    fn commit_and_store(&self, at: Location) -> ClientResult<(Commitment, Salt)> {
        let salt = self.salts.draw();
        let commitment = commit(at.row, at.col, &salt)?;
        self.store.put(
            &commitment,
            at,
            salt,
            &self.config.account,
            &self.config.contract,
        )?;
        Ok((commitment, salt))
    }

    fn fail_before_submit(&self, intent: &ActionIntent, err: ClientError) -> ClientError {
        warn!(action_id = %intent.id, error = %err, "action failed before submission");
        self.tracker.finish(
            intent,
            LifecycleKind::Failed {
                reason: err.to_string(),
            },
        );
        err
    }

    async fn submit(&self, intent: ActionIntent, call: LedgerCall) -> ClientResult<PendingAction> {
        let entry = QueueEntry::new(intent.id.clone(), call).with_overrides(self.config.gas);
        let result = match self.executor.make_request(entry).await {
            Ok(result) => result,
            Err(err) => {
                let reason = err.to_string();
                self.tracker.publish(
                    &intent,
                    LifecycleKind::SubmitFailed {
                        reason: reason.clone(),
                    },
                );
                self.tracker.finish(&intent, LifecycleKind::Failed { reason });
                return Err(err);
            }
        };

        let submitted = SubmittedAction {
            intent,
            tx_hash: result.tx_hash,
            sent_at: Utc::now(),
        };
        self.tracker.publish(
            &submitted.intent,
            LifecycleKind::Submit {
                tx_hash: result.tx_hash,
            },
        );
        let confirmation = self.watch_confirmation(submitted.clone());
        Ok(PendingAction {
            submitted,
            nonce: result.nonce,
            confirmation,
        })
    }

    fn watch_confirmation(
        &self,
        submitted: SubmittedAction,
    ) -> oneshot::Receiver<ClientResult<Receipt>> {
        let (reply, receiver) = oneshot::channel();
        let ledger = self.ledger.clone();
        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            let intent = &submitted.intent;
            let outcome = match ledger.wait_for_receipt(&submitted.tx_hash).await {
                Ok(receipt) if receipt.status == ReceiptStatus::Success => {
                    info!(action_id = %intent.id, tx_hash = %receipt.tx_hash, block = receipt.block_number, "action confirmed");
                    tracker.finish(
                        intent,
                        LifecycleKind::Confirmed {
                            receipt: receipt.clone(),
                        },
                    );
                    Ok(receipt)
                }
                Ok(receipt) => {
                    let err = ClientError::Revert {
                        tx_hash: receipt.tx_hash,
                    };
                    warn!(action_id = %intent.id, tx_hash = %receipt.tx_hash, "action reverted");
                    tracker.finish(
                        intent,
                        LifecycleKind::Failed {
                            reason: err.to_string(),
                        },
                    );
                    Err(err)
                }
                Err(err) => {
                    warn!(action_id = %intent.id, error = %err, "lost track of submitted action");
                    tracker.finish(
                        intent,
                        LifecycleKind::Failed {
                            reason: err.to_string(),
                        },
                    );
                    Err(err)
                }
            };
            let _ = reply.send(outcome);
        });
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{harness, FixedSaltSource};

    #[test]
    fn board_bounds_are_half_open() {
        let config = CoordinatorConfig::new(Address([1; 20]), Address([2; 20]));
        assert!(config.check_on_board(Location::new(0, 0)).is_ok());
        assert!(config.check_on_board(Location::new(7, 7)).is_ok());
        assert!(config.check_on_board(Location::new(8, 0)).is_err());
        assert!(config.check_on_board(Location::new(0, -1)).is_err());
    }

    #[tokio::test]
    async fn off_board_move_emits_nothing() {
        let h = harness();
        let mut events = h.coordinator.subscribe();
        let err = h
            .coordinator
            .move_unit(1, 1, Location::new(9, 9))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(events.drain().is_empty());
        assert!(h.ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn unknown_hidden_unit_reconciles_as_unknown() {
        let h = harness();
        let foreign = commit(1, 1, &Salt::from_u64(99)).unwrap();
        let snapshot = ChainSnapshot {
            game: 1,
            block_number: 3,
            units: vec![crate::ledger::ChainUnit {
                id: 4,
                owner: Address([9; 20]),
                placement: ChainPlacement::Hidden(foreign),
            }],
        };
        let view = h.coordinator.reconcile(&snapshot).unwrap();
        assert_eq!(
            view.unit(4).unwrap().position,
            UnitPosition::Unknown {
                commitment: foreign
            }
        );
        assert_eq!(h.coordinator.view(1), Some(view));
    }

    #[tokio::test]
    async fn place_hidden_stores_before_submitting() {
        let h = harness();
        let coordinator = h
            .coordinator
            .clone()
            .with_salt_source(Arc::new(FixedSaltSource::new([5])));
        let created = coordinator.create_game().await.unwrap();
        created.confirmation().await.unwrap();
        let digest = commit(2, 2, &Salt::from_u64(5)).unwrap();

        h.ledger.hold_submissions();
        let placing = coordinator.clone();
        let task =
            tokio::spawn(async move { placing.place_hidden(1, 1, Location::new(2, 2)).await });
        for _ in 0..64 {
            if h.ledger.attempts() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(h.ledger.attempts(), 2, "placement reached the ledger");
        assert_eq!(h.ledger.submissions().len(), 1, "placement still held");
        assert!(coordinator
            .store()
            .contains(&digest, &h.account, &h.contract)
            .unwrap());

        h.ledger.release_submissions(1);
        let pending = task.await.unwrap().unwrap();
        pending.confirmation().await.unwrap();
    }
}
