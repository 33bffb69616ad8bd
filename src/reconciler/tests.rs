use super::*;
use crate::authority::{
    ActionAuthority, ActionCall, ActionError, AuthorityError, Fault, LocalAuthority, Signer,
    TransactionRef, TransactionStatus,
};
use crate::config::{AuthorityConfig, GameConfig, ReconcilerConfig, SettlePolicy};
use crate::model::{Attribute, AttributeValue, Direction, EntityId, Position, RpsKind, POSITION_OFFSET};
use crate::overrides::OverrideLayer;
use crate::state::StateStore;
use crate::sync::{run_sync_feed, SyncBatch, SyncUpdate};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn reconciler_config(settle_policy: SettlePolicy) -> ReconcilerConfig {
    ReconcilerConfig {
        grace_delay_ms: 1000,
        settle_policy,
        poll_interval_ms: 50,
        submit_timeout_ms: 5000,
        finality_timeout_ms: 2000,
        event_capacity: 64,
    }
}

struct Harness {
    store: Arc<StateStore>,
    layer: Arc<OverrideLayer>,
    authority: Arc<LocalAuthority>,
    reconciler: Arc<Reconciler>,
}

fn harness(settle_policy: SettlePolicy) -> Harness {
    let store = Arc::new(StateStore::new());
    store.set_live();
    let layer = Arc::new(OverrideLayer::new(store.clone()));

    let (authority, indexer_rx) = LocalAuthority::new(
        AuthorityConfig {
            finality_delay_ms: 100,
            index_lag_ms: 300,
            seed: 3,
        },
        GameConfig::default(),
    );
    let authority = Arc::new(authority);
    tokio::spawn(run_sync_feed(
        store.clone(),
        indexer_rx,
        Duration::from_millis(500),
    ));

    let reconciler = Arc::new(Reconciler::new(
        layer.clone(),
        authority.clone(),
        reconciler_config(settle_policy),
        GameConfig::default(),
    ));

    Harness {
        store,
        layer,
        authority,
        reconciler,
    }
}

/// Spawn a token for `signer` and wait until the store reflects it
async fn spawned(h: &Harness, signer: &Signer) -> EntityId {
    h.reconciler.spawn(signer, RpsKind::Rock).await.unwrap();
    h.reconciler
        .player_entity(signer)
        .expect("spawn should be indexed within the grace delay")
}

fn position(h: &Harness, entity: &EntityId) -> Position {
    h.layer
        .read(entity, Attribute::Position)
        .as_position()
        .unwrap()
}

/// Direction with room for two steps on the map
fn inward(p: Position) -> Direction {
    if p.x >= POSITION_OFFSET + 2 {
        Direction::Left
    } else {
        Direction::Right
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ActionEvent>) -> Vec<ActionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Accepts everything and finalizes after a few polls; the test plays the
/// indexer by writing the store itself
struct ScriptedChain {
    polls: AtomicUsize,
    calls: Mutex<Vec<ActionCall>>,
}

impl ScriptedChain {
    fn new() -> Self {
        Self {
            polls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ActionAuthority for ScriptedChain {
    async fn execute(
        &self,
        _signer: &Signer,
        call: &ActionCall,
    ) -> Result<TransactionRef, AuthorityError> {
        self.calls.lock().unwrap().push(call.clone());
        Ok(TransactionRef("0xfeed".to_string()))
    }

    async fn transaction_status(
        &self,
        _tx: &TransactionRef,
    ) -> Result<TransactionStatus, AuthorityError> {
        if self.polls.fetch_add(1, Ordering::SeqCst) < 2 {
            Ok(TransactionStatus::Pending)
        } else {
            Ok(TransactionStatus::Finalized { block: 1 })
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_move_up_confirmed_then_served_from_store() {
    let (store, layer, chain, reconciler) = scripted(SettlePolicy::FixedDelay);

    let signer = Signer::new("0xabc");
    let token = EntityId::from_key(42u64);
    store.set(&EntityId::from_key("0xabc"), AttributeValue::PlayerId(42));
    store.set(&token, AttributeValue::Position(Position::new(5, 5)));

    let action = {
        let reconciler = reconciler.clone();
        let signer = signer.clone();
        tokio::spawn(async move { reconciler.move_player(&signer, Direction::Up).await })
    };
    tokio::task::yield_now().await;

    // Speculative value visible immediately, authoritative state untouched
    assert_eq!(
        layer.read(&token, Attribute::Position),
        AttributeValue::Position(Position::new(5, 4))
    );
    assert_eq!(
        store.get(&token, Attribute::Position),
        Some(AttributeValue::Position(Position::new(5, 5)))
    );

    // Indexer catches up during the grace delay
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(layer.is_overridden(&token, Attribute::Position));
    store.set(&token, AttributeValue::Position(Position::new(5, 4)));

    let tx = action.await.unwrap().unwrap();
    assert_eq!(tx, TransactionRef("0xfeed".to_string()));
    assert!(!layer.is_overridden(&token, Attribute::Position));
    assert_eq!(
        layer.read(&token, Attribute::Position),
        AttributeValue::Position(Position::new(5, 4))
    );
    assert_eq!(
        chain.calls.lock().unwrap().as_slice(),
        &[ActionCall::movement(Direction::Up)]
    );
}

type Scripted = (
    Arc<StateStore>,
    Arc<OverrideLayer>,
    Arc<ScriptedChain>,
    Arc<Reconciler>,
);

fn scripted(settle_policy: SettlePolicy) -> Scripted {
    let store = Arc::new(StateStore::new());
    let layer = Arc::new(OverrideLayer::new(store.clone()));
    let chain = Arc::new(ScriptedChain::new());
    let reconciler = Arc::new(Reconciler::new(
        layer.clone(),
        chain.clone(),
        reconciler_config(settle_policy),
        GameConfig::default(),
    ));
    (store, layer, chain, reconciler)
}

#[tokio::test(start_paused = true)]
async fn test_sync_watermark_waits_for_the_whole_block() {
    let (store, layer, _chain, reconciler) = scripted(SettlePolicy::SyncWatermark);
    let signer = Signer::new("0xabc");
    let token = EntityId::from_key(42u64);
    let start = Position::new(POSITION_OFFSET + 5, POSITION_OFFSET + 5);
    store.set(&EntityId::from_key("0xabc"), AttributeValue::PlayerId(42));
    store.set(&token, AttributeValue::Position(start));
    store.set(&token, AttributeValue::Energy(10));

    let started = Instant::now();
    let action = {
        let reconciler = reconciler.clone();
        let signer = signer.clone();
        tokio::spawn(async move { reconciler.move_player(&signer, Direction::Up).await })
    };
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Block 1 is final; only its position update has been indexed so far
    let moved = start.step(Direction::Up).unwrap();
    store.apply(SyncUpdate::new(token.clone(), AttributeValue::Position(moved), 1));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(store.synced_block(), 0);
    assert_eq!(layer.active_count(), 2);
    assert_eq!(
        layer.read(&token, Attribute::Energy),
        AttributeValue::Energy(9)
    );

    store.apply_batch(SyncBatch::new(
        1,
        vec![
            SyncUpdate::new(token.clone(), AttributeValue::Position(moved), 1),
            SyncUpdate::new(token.clone(), AttributeValue::Energy(9), 1),
        ],
    ));
    action.await.unwrap().unwrap();

    // Settled on the watermark, not the 1s grace delay
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(layer.active_count(), 0);
    assert_eq!(
        layer.read(&token, Attribute::Energy),
        AttributeValue::Energy(9)
    );
    assert_eq!(
        layer.read(&token, Attribute::Position),
        AttributeValue::Position(moved)
    );
}

#[tokio::test(start_paused = true)]
async fn test_move_off_map_edge_refused_locally() {
    let (store, layer, chain, reconciler) = scripted(SettlePolicy::FixedDelay);
    let signer = Signer::new("0xabc");
    let token = EntityId::from_key(42u64);
    store.set(&EntityId::from_key("0xabc"), AttributeValue::PlayerId(42));
    store.set(
        &token,
        AttributeValue::Position(Position::new(POSITION_OFFSET, POSITION_OFFSET + 10)),
    );

    let err = reconciler
        .move_player(&signer, Direction::Left)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ActionError::InvalidAction(ref reason) if reason.contains("leaves the map")
    ));
    assert_eq!(layer.active_count(), 0);
    assert!(chain.calls.lock().unwrap().is_empty());

    let metrics = reconciler.metrics.get_snapshot();
    assert_eq!(metrics.invalid, 1);
    assert_eq!(metrics.rolled_back, 0);
}

#[tokio::test(start_paused = true)]
async fn test_successful_action_walks_every_state() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let start = position(&h, &token);

    let mut events = h.reconciler.subscribe();
    h.reconciler
        .move_player(&signer, inward(start))
        .await
        .unwrap();

    let states: Vec<ReconcilerState> = drain(&mut events).iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            ReconcilerState::Speculating,
            ReconcilerState::AwaitingFinality,
            ReconcilerState::Settling,
            ReconcilerState::Done,
        ]
    );
    assert_eq!(h.layer.active_count(), 0);
    assert_eq!(position(&h, &token), start.step(inward(start)).unwrap());
    assert_eq!(
        h.store.get(&token, Attribute::Energy),
        Some(AttributeValue::Energy(9))
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_move_restores_pre_action_value() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let before = h.layer.read(&token, Attribute::Position);
    let direction = inward(position(&h, &token));

    h.authority
        .inject_fault(Fault::Reject("insufficient energy".to_string()));
    let mut events = h.reconciler.subscribe();

    let err = h
        .reconciler
        .move_player(&signer, direction)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ActionError::SubmissionRejected("insufficient energy".to_string())
    );
    assert_eq!(h.layer.read(&token, Attribute::Position), before);
    assert_eq!(h.layer.active_count(), 0);

    let events = drain(&mut events);
    let states: Vec<ReconcilerState> = events.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            ReconcilerState::Speculating,
            ReconcilerState::RollingBack,
            ReconcilerState::Done,
        ]
    );
    assert!(events.last().unwrap().error.is_some());

    let metrics = h.reconciler.metrics.get_snapshot();
    assert_eq!(metrics.rolled_back, 1);
    assert_eq!(metrics.rejected, 1);
    assert_eq!(metrics.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_rolls_back() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let before = h.layer.read(&token, Attribute::Energy);
    let direction = inward(position(&h, &token));

    h.authority.inject_fault(Fault::Transport);
    let err = h
        .reconciler
        .move_player(&signer, direction)
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::TransportError(_)));
    assert_eq!(h.layer.read(&token, Attribute::Energy), before);
    assert_eq!(h.reconciler.metrics.get_snapshot().transport_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reverted_transaction_rolls_back() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let before = position(&h, &token);

    h.authority.inject_fault(Fault::Revert("out of gas".to_string()));
    let err = h
        .reconciler
        .move_player(&signer, inward(before))
        .await
        .unwrap_err();

    assert_eq!(err, ActionError::SubmissionRejected("out of gas".to_string()));
    assert_eq!(position(&h, &token), before);
    assert_eq!(h.layer.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_finality_timeout_rolls_back() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let before = position(&h, &token);

    h.authority.inject_fault(Fault::Stall);
    let started = Instant::now();
    let err = h
        .reconciler
        .move_player(&signer, inward(before))
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::FinalityTimeout(_)));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(h.layer.active_count(), 0);
    assert_eq!(h.reconciler.metrics.get_snapshot().timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_actions_fail_before_speculating() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");

    let err = h
        .reconciler
        .move_player(&signer, Direction::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::InvalidAction(_)));

    spawned(&h, &signer).await;
    let err = h
        .reconciler
        .move_player(&signer, Direction::Unknown)
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::InvalidAction(_)));

    assert_eq!(h.layer.active_count(), 0);
    let metrics = h.reconciler.metrics.get_snapshot();
    assert_eq!(metrics.invalid, 2);
    assert_eq!(metrics.rolled_back, 0);
}

#[tokio::test(start_paused = true)]
async fn test_dead_token_cannot_move() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;

    h.store.set(&token, AttributeValue::Energy(0));

    let err = h
        .reconciler
        .move_player(&signer, Direction::Up)
        .await
        .unwrap_err();
    assert_eq!(err, ActionError::InvalidAction("token is dead".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_chained_moves_compose_on_speculative_values() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let start = position(&h, &token);
    let direction = inward(start);

    let first = {
        let reconciler = h.reconciler.clone();
        let signer = signer.clone();
        tokio::spawn(async move { reconciler.move_player(&signer, direction).await })
    };
    // Second move lands while the first is still awaiting finality
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let reconciler = h.reconciler.clone();
        let signer = signer.clone();
        tokio::spawn(async move { reconciler.move_player(&signer, direction).await })
    };
    tokio::task::yield_now().await;

    let two_steps = start.step(direction).unwrap().step(direction).unwrap();
    assert_eq!(position(&h, &token), two_steps);
    assert_eq!(
        h.layer.read(&token, Attribute::Energy),
        AttributeValue::Energy(8)
    );
    assert_eq!(h.reconciler.metrics.in_flight(), 2);

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(h.layer.active_count(), 0);
    assert_eq!(
        h.store.get(&token, Attribute::Position),
        Some(AttributeValue::Position(two_steps))
    );
    assert_eq!(
        h.store.get(&token, Attribute::Energy),
        Some(AttributeValue::Energy(8))
    );
}

#[tokio::test(start_paused = true)]
async fn test_actions_on_distinct_entities_do_not_interfere() {
    let h = harness(SettlePolicy::FixedDelay);
    let alice = Signer::new("0xa11ce");
    let bob = Signer::new("0xb0b");
    let alice_token = spawned(&h, &alice).await;
    let bob_token = spawned(&h, &bob).await;
    assert_ne!(alice_token, bob_token);

    let alice_start = position(&h, &alice_token);
    let bob_start = position(&h, &bob_token);

    let alice_move = {
        let reconciler = h.reconciler.clone();
        let alice = alice.clone();
        let direction = inward(alice_start);
        tokio::spawn(async move { reconciler.move_player(&alice, direction).await })
    };
    tokio::task::yield_now().await;

    // Bob's failed move leaves Alice's pending override alone
    h.authority.inject_fault(Fault::Reject("nope".to_string()));
    assert!(h
        .reconciler
        .move_player(&bob, inward(bob_start))
        .await
        .is_err());

    assert!(h.layer.is_overridden(&alice_token, Attribute::Position));
    assert_eq!(
        position(&h, &alice_token),
        alice_start.step(inward(alice_start)).unwrap()
    );
    assert_eq!(position(&h, &bob_token), bob_start);

    alice_move.await.unwrap().unwrap();
    assert_eq!(h.layer.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_respawn_speculates_kind_and_energy() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");

    // First spawn: nothing to speculate on yet
    let mut events = h.reconciler.subscribe();
    let token = spawned(&h, &signer).await;
    assert_eq!(drain(&mut events).last().unwrap().target, None);

    h.store.set(&token, AttributeValue::Energy(2));

    let respawn = {
        let reconciler = h.reconciler.clone();
        let signer = signer.clone();
        tokio::spawn(async move { reconciler.spawn(&signer, RpsKind::Scissors).await })
    };
    tokio::task::yield_now().await;

    assert_eq!(
        h.layer.read(&token, Attribute::RpsType),
        AttributeValue::RpsType(RpsKind::Scissors)
    );
    assert_eq!(
        h.layer.read(&token, Attribute::Energy),
        AttributeValue::Energy(10)
    );

    respawn.await.unwrap().unwrap();
    assert_eq!(h.layer.active_count(), 0);
    assert_eq!(
        h.store.get(&token, Attribute::RpsType),
        Some(AttributeValue::RpsType(RpsKind::Scissors))
    );
}

#[tokio::test(start_paused = true)]
async fn test_sync_watermark_policy_settles_when_feed_catches_up() {
    let h = harness(SettlePolicy::SyncWatermark);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let start = position(&h, &token);

    let started = Instant::now();
    h.reconciler
        .move_player(&signer, inward(start))
        .await
        .unwrap();

    // finality (~100ms) + index lag (300ms), well short of the 1s grace delay
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(h.layer.active_count(), 0);
    assert_eq!(position(&h, &token), start.step(inward(start)).unwrap());
    assert!(h.store.synced_block() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_action_releases_overrides() {
    let h = harness(SettlePolicy::FixedDelay);
    let signer = Signer::new("0x1");
    let token = spawned(&h, &signer).await;
    let direction = inward(position(&h, &token));

    h.authority.inject_fault(Fault::Stall);
    let action = {
        let reconciler = h.reconciler.clone();
        let signer = signer.clone();
        tokio::spawn(async move { reconciler.move_player(&signer, direction).await })
    };
    tokio::task::yield_now().await;
    assert!(h.layer.is_overridden(&token, Attribute::Position));

    action.abort();
    assert!(action.await.unwrap_err().is_cancelled());

    assert_eq!(h.layer.active_count(), 0);
    assert_eq!(h.reconciler.metrics.in_flight(), 0);
}

#[test]
fn test_state_machine_edges() {
    use ReconcilerState::*;

    assert!(Idle.can_transition_to(Speculating));
    assert!(Speculating.can_transition_to(AwaitingFinality));
    assert!(AwaitingFinality.can_transition_to(Settling));
    assert!(Settling.can_transition_to(Done));
    assert!(RollingBack.can_transition_to(Done));

    for state in [Idle, Speculating, AwaitingFinality, Settling] {
        assert!(state.can_transition_to(RollingBack));
    }

    assert!(!Idle.can_transition_to(Done));
    assert!(!Speculating.can_transition_to(Settling));
    assert!(!RollingBack.can_transition_to(RollingBack));
    assert!(!Done.can_transition_to(RollingBack));
    assert!(Done.is_terminal());
}
