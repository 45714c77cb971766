pub mod abi;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod executor;
pub mod kv;
pub mod ledger;
pub mod prover;
pub mod rpc;
pub mod store;
pub mod test_utils;
pub mod types;

pub use config::ClientConfig;
pub use coordinator::{
    ActionCoordinator, CoordinatorConfig, GameView, OsSaltSource, PendingAction, RenderedUnit,
    SaltSource, UnitPosition,
};
pub use error::{ClientError, ClientResult};
pub use events::{LifecycleBus, LifecycleEvent, LifecycleKind, Subscription};
pub use executor::{
    ExecutorConfig, ExecutorState, QueueEntry, SubmissionResult, TransactionExecutor,
};
pub use ledger::{GasOverrides, Ledger, LedgerCall, Receipt, ReceiptStatus};
pub use prover::{CircuitProver, ProofPipeline, SnarkjsProver};
pub use store::{SecretEntry, SecretStore};
pub use types::{Action, ActionId, ActionIntent, Address, Location, SubmittedAction, TxHash};
