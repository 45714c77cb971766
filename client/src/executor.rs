//! Per-account transaction queue.
//!
//! One worker task owns the account's submission path. Requests are handled
//! strictly in arrival order and only one is ever in flight, which is what
//! makes nonce assignment collision-free: the cached nonce is only touched
//! from inside the worker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::ledger::{GasOverrides, Ledger, LedgerCall, LedgerTransaction};
use crate::types::{ActionId, Address, TxHash};

/// Default age after which the cached nonce is re-read from the node.
pub const DEFAULT_NONCE_STALENESS: Duration = Duration::from_secs(30);
/// 0.01 ether.
pub const DEFAULT_MIN_BALANCE_WEI: u128 = 10_000_000_000_000_000;

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub account: Address,
    pub contract: Address,
    pub min_balance: u128,
    pub nonce_staleness: Duration,
}

impl ExecutorConfig {
    pub fn new(account: Address, contract: Address) -> Self {
        Self {
            account,
            contract,
            min_balance: DEFAULT_MIN_BALANCE_WEI,
            nonce_staleness: DEFAULT_NONCE_STALENESS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub action_id: ActionId,
    pub call: LedgerCall,
    pub overrides: GasOverrides,
}

impl QueueEntry {
    pub fn new(action_id: ActionId, call: LedgerCall) -> Self {
        Self {
            action_id,
            call,
            overrides: GasOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: GasOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn target_method(&self) -> &'static str {
        self.call.method()
    }
}

/// The node accepted the transaction. Mining is observed separately.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionResult {
    pub action_id: ActionId,
    pub tx_hash: TxHash,
    pub nonce: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Executing,
}

#[derive(Clone, Copy, Debug)]
struct CachedNonce {
    value: u64,
    refreshed_at: Instant,
}

#[derive(Debug, Default)]
struct Shared {
    nonce: Mutex<Option<CachedNonce>>,
    executing: AtomicBool,
    queued: AtomicUsize,
}

type Job = (QueueEntry, oneshot::Sender<ClientResult<SubmissionResult>>);

/// Handle to an account's queue. Cheap to clone; the worker stops once every
/// handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct TransactionExecutor {
    sender: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
    account: Address,
}

impl TransactionExecutor {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(ledger: Arc<dyn Ledger>, config: ExecutorConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let account = config.account;
        let worker = Worker {
            ledger,
            config,
            shared: shared.clone(),
            receiver,
        };
        tokio::spawn(worker.run());
        Self {
            sender,
            shared,
            account,
        }
    }

    /// Enqueues `entry` immediately and returns a future for its outcome.
    ///
    /// The position in the queue is fixed by this call, not by when the
    /// returned future is first polled. The future resolves once the node has
    /// accepted or rejected the submission.
    pub fn make_request(
        &self,
        entry: QueueEntry,
    ) -> impl Future<Output = ClientResult<SubmissionResult>> + Send + 'static {
        let (reply, response) = oneshot::channel();
        let action_id = entry.action_id.clone();
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let enqueued = self.sender.send((entry, reply)).is_ok();
        if enqueued {
            debug!(%action_id, account = %self.account, "request queued");
        } else {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
        }
        async move {
            if !enqueued {
                return Err(ClientError::ExecutorClosed);
            }
            response.await.map_err(|_| ClientError::ExecutorClosed)?
        }
    }

    pub fn state(&self) -> ExecutorState {
        if self.shared.executing.load(Ordering::SeqCst) {
            ExecutorState::Executing
        } else {
            ExecutorState::Idle
        }
    }

    /// Requests waiting behind the one currently executing.
    pub fn queue_depth(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    pub fn cached_nonce(&self) -> Option<u64> {
        self.shared.nonce.lock().as_ref().map(|cached| cached.value)
    }

    pub fn account(&self) -> Address {
        self.account
    }
}

struct Worker {
    ledger: Arc<dyn Ledger>,
    config: ExecutorConfig,
    shared: Arc<Shared>,
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl Worker {
    async fn run(mut self) {
        while let Some((entry, reply)) = self.receiver.recv().await {
            self.shared.executing.store(true, Ordering::SeqCst);
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            let result = self.execute(&entry).await;
            self.shared.executing.store(false, Ordering::SeqCst);
            // The caller may have stopped waiting; the outcome still stands.
            let _ = reply.send(result);
        }
        debug!(account = %self.config.account, "executor stopped");
    }

    async fn execute(&self, entry: &QueueEntry) -> ClientResult<SubmissionResult> {
        let account = self.config.account;
        let balance = self.ledger.balance(&account).await?;
        if balance < self.config.min_balance {
            warn!(
                action_id = %entry.action_id,
                balance,
                minimum = self.config.min_balance,
                "balance below threshold, not submitting"
            );
            return Err(ClientError::InsufficientBalance {
                balance,
                minimum: self.config.min_balance,
            });
        }

        let nonce = self.assign_nonce().await?;
        let tx = LedgerTransaction {
            from: account,
            to: self.config.contract,
            call: entry.call.clone(),
            nonce,
            gas: entry.overrides,
        };
        match self.ledger.submit(tx).await {
            Ok(tx_hash) => {
                *self.shared.nonce.lock() = Some(CachedNonce {
                    value: nonce + 1,
                    refreshed_at: Instant::now(),
                });
                info!(
                    action_id = %entry.action_id,
                    method = entry.target_method(),
                    nonce,
                    %tx_hash,
                    "transaction accepted"
                );
                Ok(SubmissionResult {
                    action_id: entry.action_id.clone(),
                    tx_hash,
                    nonce,
                })
            }
            Err(err) => {
                warn!(
                    action_id = %entry.action_id,
                    method = entry.target_method(),
                    nonce,
                    error = %err,
                    "transaction rejected"
                );
                Err(err)
            }
        }
    }

    async fn assign_nonce(&self) -> ClientResult<u64> {
        let cached = *self.shared.nonce.lock();
        if let Some(cached) = cached {
            if cached.refreshed_at.elapsed() < self.config.nonce_staleness {
                debug!(nonce = cached.value, "using cached nonce");
                return Ok(cached.value);
            }
        }

        let fetched = self.ledger.nonce(&self.config.account).await?;
        let value = match cached {
            Some(cached) if cached.value > fetched => {
                warn!(
                    node = fetched,
                    cached = cached.value,
                    "node nonce behind local cache, keeping cache"
                );
                cached.value
            }
            _ => fetched,
        };
        debug!(nonce = value, "refreshed nonce from node");
        *self.shared.nonce.lock() = Some(CachedNonce {
            value,
            refreshed_at: Instant::now(),
        });
        Ok(value)
    }
}
