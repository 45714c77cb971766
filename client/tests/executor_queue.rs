use std::sync::Arc;
use std::time::Duration;

use shroud_client::test_utils::{InMemoryLedger, TEST_ACCOUNT, TEST_CONTRACT};
use shroud_client::{
    ActionId, ClientError, ExecutorConfig, ExecutorState, LedgerCall, QueueEntry,
    TransactionExecutor,
};

fn spawn(ledger: &Arc<InMemoryLedger>) -> TransactionExecutor {
    TransactionExecutor::spawn(
        ledger.clone(),
        ExecutorConfig::new(TEST_ACCOUNT, TEST_CONTRACT),
    )
}

fn join(id: &str, game: u64) -> QueueEntry {
    QueueEntry::new(ActionId::from(id), LedgerCall::JoinGame { game })
}

/// Lets the worker task run until it blocks.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn queued_requests_execute_in_order_with_consecutive_nonces() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_nonce(&TEST_ACCOUNT, 3);
    let executor = spawn(&ledger);
    ledger.hold_submissions();

    let requests: Vec<_> = (0..5)
        .map(|i| executor.make_request(join(&format!("a{i}"), i)))
        .collect();
    settle().await;
    assert_eq!(executor.state(), ExecutorState::Executing);
    assert_eq!(executor.queue_depth(), 4);
    assert_eq!(ledger.attempts(), 1);

    ledger.release_submissions(5);
    let results = futures::future::join_all(requests).await;
    let nonces: Vec<u64> = results
        .into_iter()
        .map(|r| r.expect("accepted").nonce)
        .collect();
    assert_eq!(nonces, vec![3, 4, 5, 6, 7]);

    let games: Vec<Option<u64>> = ledger
        .submissions()
        .iter()
        .map(|tx| tx.call.game())
        .collect();
    assert_eq!(games, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
    assert_eq!(executor.cached_nonce(), Some(8));
    assert_eq!(executor.state(), ExecutorState::Idle);
}

#[tokio::test]
async fn second_request_waits_for_first_submission() {
    let ledger = Arc::new(InMemoryLedger::new());
    let executor = spawn(&ledger);
    ledger.hold_submissions();

    let first = executor.make_request(join("move1", 1));
    let second = executor.make_request(join("move2", 1));
    settle().await;
    assert_eq!(ledger.attempts(), 1);
    settle().await;
    assert_eq!(ledger.attempts(), 1, "move2 reached the ledger early");

    ledger.release_submissions(1);
    let first = first.await.expect("move1 accepted");
    settle().await;
    assert_eq!(ledger.attempts(), 2);

    ledger.release_submissions(1);
    let second = second.await.expect("move2 accepted");
    assert_eq!(second.nonce, first.nonce + 1);
    assert_eq!(second.action_id, ActionId::from("move2"));
}

#[tokio::test]
async fn low_balance_rejects_without_touching_nonce_or_ledger() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.set_balance(&TEST_ACCOUNT, 1);
    let executor = spawn(&ledger);

    let err = executor
        .make_request(join("a", 1))
        .await
        .expect_err("balance guard");
    match err {
        ClientError::InsufficientBalance { balance, minimum } => {
            assert_eq!(balance, 1);
            assert_eq!(minimum, 10_000_000_000_000_000);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ledger.attempts(), 0);
    assert_eq!(ledger.nonce_queries(), 0);
    assert_eq!(executor.cached_nonce(), None);
}

#[tokio::test]
async fn queue_continues_after_balance_rejection() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.script_balance([0]);
    let executor = spawn(&ledger);

    let first = executor.make_request(join("poor", 1));
    let second = executor.make_request(join("funded", 1));
    assert!(matches!(
        first.await,
        Err(ClientError::InsufficientBalance { .. })
    ));
    let accepted = second.await.expect("second request proceeds");
    assert_eq!(accepted.nonce, 0);
    assert_eq!(ledger.submissions().len(), 1);
}

#[tokio::test]
async fn failed_request_does_not_block_the_next() {
    let ledger = Arc::new(InMemoryLedger::new());
    let executor = spawn(&ledger);
    ledger.reject_next("underpriced");

    let first = executor.make_request(join("a", 1));
    let second = executor.make_request(join("b", 1));
    assert!(matches!(first.await, Err(ClientError::Submission(_))));
    assert_eq!(second.await.expect("accepted").nonce, 0);
}

#[tokio::test(start_paused = true)]
async fn nonce_is_cached_inside_window_and_refreshed_after() {
    let ledger = Arc::new(InMemoryLedger::new());
    let executor = spawn(&ledger);

    let first = executor.make_request(join("a", 1)).await.expect("a");
    assert_eq!(first.nonce, 0);
    assert_eq!(ledger.nonce_queries(), 1);

    tokio::time::advance(Duration::from_secs(29)).await;
    let second = executor.make_request(join("b", 1)).await.expect("b");
    assert_eq!(second.nonce, 1);
    assert_eq!(ledger.nonce_queries(), 1);

    // Another client spent from the same account in the meantime.
    ledger.set_nonce(&TEST_ACCOUNT, 10);
    tokio::time::advance(Duration::from_secs(31)).await;
    let third = executor.make_request(join("c", 1)).await.expect("c");
    assert_eq!(ledger.nonce_queries(), 2);
    assert_eq!(third.nonce, 10);
    assert_eq!(executor.cached_nonce(), Some(11));
}

#[tokio::test(start_paused = true)]
async fn cached_nonce_never_moves_backwards() {
    let ledger = Arc::new(InMemoryLedger::new());
    let executor = spawn(&ledger);
    executor.make_request(join("a", 1)).await.expect("a");
    executor.make_request(join("b", 1)).await.expect("b");
    assert_eq!(executor.cached_nonce(), Some(2));

    ledger.set_nonce(&TEST_ACCOUNT, 0);
    tokio::time::advance(Duration::from_secs(31)).await;
    let err = executor
        .make_request(join("c", 1))
        .await
        .expect_err("node disagrees with cache");
    assert!(matches!(err, ClientError::Submission(_)));
    assert_eq!(ledger.nonce_queries(), 2);
    assert_eq!(executor.cached_nonce(), Some(2));
}

#[tokio::test]
async fn cloned_handle_keeps_worker_alive() {
    let ledger = Arc::new(InMemoryLedger::new());
    let executor = spawn(&ledger);
    let clone = executor.clone();
    drop(executor);
    clone.make_request(join("a", 1)).await.expect("accepted");
    assert_eq!(clone.account(), TEST_ACCOUNT);
}
