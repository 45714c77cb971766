use std::sync::Arc;
use std::time::Duration;

use shroud_client::ledger::{ChainPlacement, ChainUnit};
use shroud_client::test_utils::{harness, harness_with_prover, FixedSaltSource, ScriptedProver};
use shroud_client::{
    ActionCoordinator, Address, ClientError, LedgerCall, LifecycleKind, Location, Subscription,
    UnitPosition,
};
use shroud_crypto::{commit, Salt};

const GAME: u64 = 1;

fn kinds(events: &mut Subscription) -> Vec<&'static str> {
    events
        .drain()
        .into_iter()
        .map(|event| match event.kind {
            LifecycleKind::Init => "init",
            LifecycleKind::Submit { .. } => "submit",
            LifecycleKind::SubmitFailed { .. } => "submit_failed",
            LifecycleKind::Confirmed { .. } => "confirmed",
            LifecycleKind::Failed { .. } => "failed",
        })
        .collect()
}

async fn started_game(coordinator: &ActionCoordinator) {
    coordinator
        .create_game()
        .await
        .expect("create")
        .confirmation()
        .await
        .expect("created");
}

async fn place(coordinator: &ActionCoordinator, unit: u64, at: Location) {
    coordinator
        .place_hidden(GAME, unit, at)
        .await
        .expect("place")
        .confirmation()
        .await
        .expect("placed");
}

#[tokio::test]
async fn hidden_move_is_stored_proved_and_reconciled() {
    let h = harness();
    let coordinator = h
        .coordinator
        .clone()
        .with_salt_source(Arc::new(FixedSaltSource::new([0, 7])));
    started_game(&coordinator).await;
    place(&coordinator, 1, Location::new(3, 3)).await;
    let d0 = commit(3, 3, &Salt::from_u64(0)).expect("d0");

    let pending = coordinator
        .move_hidden(GAME, 1, Location::new(4, 3))
        .await
        .expect("move");
    let d1 = commit(4, 3, &Salt::from_u64(7)).expect("d1");
    let entry = coordinator
        .store()
        .get(&d1, &h.account, &h.contract)
        .expect("new opening stored");
    assert_eq!(entry.location, Location::new(4, 3));
    assert_eq!(entry.salt, Salt::from_u64(7));
    pending.confirmation().await.expect("confirmed");

    let submissions = h.ledger.submissions();
    match &submissions.last().expect("move submitted").call {
        LedgerCall::MoveHidden { proof, .. } => {
            assert_eq!(proof.public_signals, vec![d0.as_field(), d1.as_field()]);
        }
        other => panic!("unexpected call {other:?}"),
    }

    let view = coordinator.refresh(GAME).await.expect("refresh");
    assert_eq!(
        view.unit(1).expect("unit 1").position,
        UnitPosition::Recovered {
            commitment: d1,
            location: Location::new(4, 3),
            salt: Salt::from_u64(7),
        }
    );
    assert_eq!(h.prover.calls(), 1);
}

#[tokio::test]
async fn hidden_moves_on_one_account_get_consecutive_nonces() {
    let h = harness();
    let coordinator = h.coordinator.clone();
    started_game(&coordinator).await;
    place(&coordinator, 1, Location::new(0, 0)).await;
    place(&coordinator, 2, Location::new(1, 1)).await;

    let (first, second) = tokio::join!(
        coordinator.move_hidden(GAME, 1, Location::new(0, 1)),
        coordinator.move_hidden(GAME, 2, Location::new(1, 2)),
    );
    let (first, second) = (first.expect("move1"), second.expect("move2"));
    let (low, high) = if first.nonce < second.nonce {
        (first.nonce, second.nonce)
    } else {
        (second.nonce, first.nonce)
    };
    assert_eq!(high, low + 1);
    assert_eq!(h.ledger.attempts(), h.ledger.submissions().len());
    first.confirmation().await.expect("move1 mined");
    second.confirmation().await.expect("move2 mined");

    let view = coordinator.refresh(GAME).await.expect("refresh");
    for (unit, location) in [(1, Location::new(0, 1)), (2, Location::new(1, 2))] {
        match &view.unit(unit).expect("unit").position {
            UnitPosition::Recovered { location: at, .. } => assert_eq!(*at, location),
            other => panic!("unit {unit} not recovered: {other:?}"),
        }
    }
}

#[tokio::test]
async fn lifecycle_of_a_confirmed_action() {
    let h = harness();
    let mut events = h.coordinator.subscribe();
    let pending = h.coordinator.create_game().await.expect("create");
    assert_eq!(h.coordinator.unconfirmed_actions().len(), 1);
    let action_id = pending.action_id().clone();
    pending.confirmation().await.expect("confirmed");

    let seen = events.drain();
    assert!(seen.iter().all(|event| event.action_id == action_id));
    assert!(seen.last().expect("terminal event").kind.is_terminal());
    let names: Vec<_> = seen
        .iter()
        .map(|event| serde_json::to_value(&event.kind).expect("json")["kind"].clone())
        .collect();
    assert_eq!(names, vec!["init", "submit", "confirmed"]);
    assert!(h.coordinator.unconfirmed_actions().is_empty());
}

#[tokio::test]
async fn revert_surfaces_as_failed_after_submit() {
    let h = harness();
    started_game(&h.coordinator).await;
    h.ledger.revert_method("joinGame");
    let mut events = h.coordinator.subscribe();

    let pending = h.coordinator.join_game(GAME).await.expect("accepted by node");
    let tx_hash = pending.tx_hash();
    match pending.confirmation().await {
        Err(ClientError::Revert { tx_hash: reverted }) => assert_eq!(reverted, tx_hash),
        other => panic!("expected revert, got {other:?}"),
    }
    assert_eq!(kinds(&mut events), vec!["init", "submit", "failed"]);
    assert!(h.coordinator.unconfirmed_actions().is_empty());
}

#[tokio::test]
async fn node_rejection_emits_submit_failed_then_failed() {
    let h = harness();
    let mut events = h.coordinator.subscribe();
    h.ledger.reject_next("nonce too low");
    let err = h.coordinator.create_game().await.expect_err("rejected");
    assert!(matches!(err, ClientError::Submission(_)));
    assert_eq!(kinds(&mut events), vec!["init", "submit_failed", "failed"]);
    assert!(h.coordinator.unconfirmed_actions().is_empty());
}

#[tokio::test]
async fn low_balance_fails_before_submission() {
    let h = harness();
    h.ledger.set_balance(&h.account, 0);
    let mut events = h.coordinator.subscribe();
    let err = h.coordinator.create_game().await.expect_err("guarded");
    assert!(matches!(err, ClientError::InsufficientBalance { .. }));
    assert_eq!(kinds(&mut events), vec!["init", "submit_failed", "failed"]);
    assert_eq!(h.ledger.attempts(), 0);
}

#[tokio::test]
async fn proof_failure_keeps_opening_and_skips_submission() {
    let h = harness_with_prover(ScriptedProver::failing());
    let coordinator = h
        .coordinator
        .clone()
        .with_salt_source(Arc::new(FixedSaltSource::new([1, 2])));
    started_game(&coordinator).await;
    place(&coordinator, 1, Location::new(2, 2)).await;
    let submitted = h.ledger.submissions().len();
    let mut events = coordinator.subscribe();

    let err = coordinator
        .move_hidden(GAME, 1, Location::new(2, 3))
        .await
        .expect_err("prover fails");
    assert!(matches!(err, ClientError::ProofGeneration(_)));
    assert_eq!(kinds(&mut events), vec!["init", "failed"]);
    assert_eq!(h.ledger.submissions().len(), submitted);

    let stored = coordinator
        .store()
        .list(&h.account, &h.contract)
        .expect("list");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].1.location, Location::new(2, 3));
}

#[tokio::test]
async fn reveal_opens_the_stored_commitment() {
    let h = harness();
    started_game(&h.coordinator).await;
    place(&h.coordinator, 1, Location::new(2, 5)).await;

    h.coordinator
        .reveal(GAME, 1)
        .await
        .expect("reveal")
        .confirmation()
        .await
        .expect("revealed");
    let view = h.coordinator.refresh(GAME).await.expect("refresh");
    assert_eq!(
        view.unit(1).expect("unit").position,
        UnitPosition::Public {
            location: Location::new(2, 5)
        }
    );
}

#[tokio::test]
async fn hidden_operations_validate_the_unit() {
    let h = harness();
    started_game(&h.coordinator).await;
    h.coordinator
        .move_unit(GAME, 3, Location::new(0, 0))
        .await
        .expect("visible move")
        .confirmation()
        .await
        .expect("mined");
    let foreign = commit(5, 5, &Salt::from_u64(42)).expect("foreign");
    h.ledger.insert_unit(
        GAME,
        ChainUnit {
            id: 9,
            owner: Address([0x33; 20]),
            placement: ChainPlacement::Hidden(foreign),
        },
    );
    let mut events = h.coordinator.subscribe();

    for (unit, to) in [
        (3, Location::new(1, 1)),
        (9, Location::new(1, 1)),
        (77, Location::new(1, 1)),
    ] {
        let err = h
            .coordinator
            .move_hidden(GAME, unit, to)
            .await
            .expect_err("invalid hidden move");
        assert!(matches!(err, ClientError::Validation(_)), "unit {unit}: {err}");
    }
    assert!(matches!(
        h.coordinator.reveal(GAME, 9).await,
        Err(ClientError::Validation(_))
    ));
    assert!(matches!(
        h.coordinator.place_hidden(GAME, 4, Location::new(8, 0)).await,
        Err(ClientError::Validation(_))
    ));
    assert!(kinds(&mut events).is_empty());

    let view = h.coordinator.view(GAME).expect("cached view");
    assert_eq!(
        view.unit(9).expect("foreign unit").position,
        UnitPosition::Unknown {
            commitment: foreign
        }
    );
}

#[tokio::test]
async fn unconfirmed_set_tracks_in_flight_actions() {
    let h = harness();
    h.ledger.hold_submissions();
    let coordinator = h.coordinator.clone();
    let task = tokio::spawn(async move { coordinator.create_game().await });
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
    let unconfirmed = h.coordinator.unconfirmed_actions();
    assert_eq!(unconfirmed.len(), 1);
    assert_eq!(unconfirmed[0].action.name(), "create_game");

    h.ledger.release_submissions(1);
    let pending = task.await.expect("join").expect("submitted");
    pending.confirmation().await.expect("confirmed");
    assert!(h.coordinator.unconfirmed_actions().is_empty());
}

#[tokio::test]
async fn event_watch_republishes_view_after_actions() {
    let h = harness();
    started_game(&h.coordinator).await;
    let mut views = h
        .coordinator
        .watch_events(GAME, Duration::from_millis(5))
        .await
        .expect("watch");
    assert!(views.borrow().units.is_empty());

    h.coordinator
        .move_unit(GAME, 5, Location::new(2, 2))
        .await
        .expect("move")
        .confirmation()
        .await
        .expect("mined");
    tokio::time::timeout(Duration::from_secs(5), views.changed())
        .await
        .expect("view update in time")
        .expect("watcher alive");
    let view = views.borrow().clone();
    assert_eq!(
        view.unit(5).expect("unit 5").position,
        UnitPosition::Public {
            location: Location::new(2, 2)
        }
    );
}
