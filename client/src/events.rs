//! Lifecycle notifications for submitted actions.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::ledger::Receipt;
use crate::types::{ActionId, ActionIntent, TxHash};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleKind {
    Init,
    Submit { tx_hash: TxHash },
    SubmitFailed { reason: String },
    Confirmed { receipt: Receipt },
    Failed { reason: String },
}

impl LifecycleKind {
    /// `Confirmed` and `Failed` end an action's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleKind::Confirmed { .. } | LifecycleKind::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub action_id: ActionId,
    pub kind: LifecycleKind,
    pub payload: ActionIntent,
}

/// Fan-out of lifecycle events to any number of subscribers.
#[derive(Clone, Default)]
pub struct LifecycleBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>,
}

impl LifecycleBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        Subscription { receiver }
    }

    /// Delivers `event` to every live subscriber and forgets dropped ones.
    pub fn publish(&self, event: LifecycleEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }
}

/// Receiving end of [`LifecycleBus::subscribe`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.receiver.recv().await
    }

    /// Next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Every event buffered so far.
    pub fn drain(&mut self) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.try_recv() {
            out.push(event);
        }
        out
    }
}
