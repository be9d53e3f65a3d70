mod common;

use chain_state_sync::authority::AuthorityError;
use chain_state_sync::chain::Address;
use chain_state_sync::config::{NodeConfig, RetryConfig};
use chain_state_sync::storage::{
    AccountRepository, BlockchainStateRepository, BlockchainSyncStatusRepository,
    KvBlockchainSyncStatusRepository, Repositories, Store,
};
use chain_state_sync::sync::{EngineState, StreamingSyncManager, run_supervised};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config() -> NodeConfig {
    NodeConfig::new(std::env::temp_dir())
        .with_chain_id(CHAIN_ID)
        .with_gateway_timeout_backoff(Duration::from_secs(10))
        .with_restart_delay(Duration::from_secs(1))
        .with_retry(
            RetryConfig::default()
                .with_initial_interval(Duration::from_millis(100))
                .with_max_interval(Duration::from_secs(1)),
        )
}

fn latest_hash(store: &Store) -> Option<String> {
    Repositories::new(store)
        .blockchain_state()
        .get_by_chain_id(CHAIN_ID)
        .unwrap()
        .map(|s| s.latest_hash)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn notifications_are_ignored_without_local_state() {
    let a = addr(0xa);
    let authority = Arc::new(MockAuthority::new(genesis(vec![coin_tx(
        &Address::zero(),
        &a,
        100,
        0,
    )])));
    let store = Store::open_temporary().unwrap();
    let mut manager = StreamingSyncManager::new(authority.clone(), store.clone(), config());

    // genesis only; the loop exits before the first pass
    let cancel = CancellationToken::new();
    cancel.cancel();
    manager.run(cancel).await.unwrap();
    assert_eq!(manager.engine().state(), EngineState::GenesisSynced);

    authority.add_block(block("b1", GENESIS_HASH, 1, vec![]));
    authority.set_tip("b1", 1);
    manager.handle_notification("b1").await.unwrap();
    assert_eq!(authority.block_requests(), 0);
    assert_eq!(latest_hash(&store), None);
}

#[tokio::test]
async fn notifications_drive_new_passes() {
    let (a, b) = (addr(0xa), addr(0xb));
    let authority = Arc::new(MockAuthority::new(genesis(vec![coin_tx(
        &Address::zero(),
        &a,
        100,
        0,
    )])));
    authority.add_block(block("b1", GENESIS_HASH, 1, vec![coin_tx(&a, &b, 10, 1)]));
    authority.add_block(block("b2", "b1", 2, vec![coin_tx(&a, &b, 5, 2)]));

    let store = Store::open_temporary().unwrap();
    let mut manager = StreamingSyncManager::new(authority.clone(), store.clone(), config());
    let cancel = CancellationToken::new();
    cancel.cancel();
    manager.run(cancel).await.unwrap();

    authority.set_tip("b1", 1);
    manager.run_pass().await.unwrap();
    assert_eq!(latest_hash(&store).as_deref(), Some("b1"));

    authority.set_tip("b2", 2);
    manager.handle_notification("b2").await.unwrap();
    assert_eq!(latest_hash(&store).as_deref(), Some("b2"));
    assert_eq!(authority.block_requests(), 2);

    // repeated announcement of the current tip
    manager.handle_notification("b2").await.unwrap();
    assert_eq!(authority.block_requests(), 2);

    let balance = Repositories::new(&store)
        .accounts()
        .get_by_address(&b)
        .unwrap()
        .map(|acc| acc.balance);
    assert_eq!(balance, Some(15));
    assert_eq!(manager.engine().state(), EngineState::Steady);
}

#[tokio::test]
async fn tip_announced_after_subscribing_is_followed() {
    let (a, b) = (addr(0xa), addr(0xb));
    let authority = Arc::new(MockAuthority::new(genesis(vec![coin_tx(
        &Address::zero(),
        &a,
        100,
        0,
    )])));
    authority.add_block(block("b1", GENESIS_HASH, 1, vec![coin_tx(&a, &b, 10, 1)]));
    let feed = authority.push_live_stream();

    let store = Store::open_temporary().unwrap();
    let cancel = CancellationToken::new();
    let mut manager = StreamingSyncManager::new(authority.clone(), store.clone(), config());
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    // the catch-up pass found the authority still at genesis
    let calls = authority.clone();
    wait_until(move || calls.subscribe_calls() >= 1).await;
    assert_eq!(latest_hash(&store).as_deref(), Some(GENESIS_HASH));

    authority.set_tip("b1", 1);
    feed.send(Ok("b1".to_string())).unwrap();
    let synced = store.clone();
    wait_until(move || latest_hash(&synced).as_deref() == Some("b1")).await;
    assert_eq!(authority.block_requests(), 1);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn gateway_timeouts_wait_the_fixed_backoff() {
    let authority = Arc::new(MockAuthority::new(genesis(vec![])));
    authority.push_subscribe_error(AuthorityError::GatewayTimeout);
    authority.push_subscribe_error(AuthorityError::GatewayTimeout);

    let store = Store::open_temporary().unwrap();
    let cancel = CancellationToken::new();
    let mut manager = StreamingSyncManager::new(authority.clone(), store, config());
    let start = Instant::now();
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    let calls = authority.clone();
    wait_until(move || calls.subscribe_calls() >= 3).await;
    assert!(start.elapsed() >= Duration::from_secs(20));
    assert!(start.elapsed() < Duration::from_secs(21));

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn stream_errors_trigger_resubscription() {
    let authority = Arc::new(MockAuthority::new(genesis(vec![])));
    authority.push_stream(vec![Err(AuthorityError::StreamError("connection reset".into()))]);

    let store = Store::open_temporary().unwrap();
    let cancel = CancellationToken::new();
    let mut manager = StreamingSyncManager::new(authority.clone(), store, config());
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    let calls = authority.clone();
    wait_until(move || calls.subscribe_calls() >= 2).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancellation_stops_the_manager_and_clears_the_flag() {
    let authority = Arc::new(MockAuthority::new(genesis(vec![])));
    let store = Store::open_temporary().unwrap();
    let cancel = CancellationToken::new();
    let mut manager = StreamingSyncManager::new(authority.clone(), store.clone(), config());
    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { manager.run(cancel).await }
    });

    let calls = authority.clone();
    wait_until(move || calls.subscribe_calls() >= 1).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let status = KvBlockchainSyncStatusRepository::new(store.sync_status_keyspace())
        .get()
        .unwrap();
    assert!(!status.is_synching);
}

#[tokio::test]
async fn supervisor_returns_fatal_genesis_errors() {
    // no genesis available upstream
    let authority = Arc::new(MockAuthority::default());
    let store = Store::open_temporary().unwrap();
    let error = run_supervised(authority, store, config(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(error.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn supervisor_restarts_after_failed_pass() {
    let authority = Arc::new(MockAuthority::new(genesis(vec![])));
    // the authority answers b1 with another block, so every pass fails
    authority.add_block_as("b1", block("other", GENESIS_HASH, 1, vec![]));
    authority.set_tip("b1", 1);

    let store = Store::open_temporary().unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_supervised(
        authority.clone(),
        store.clone(),
        config(),
        cancel.clone(),
    ));

    let requests = authority.clone();
    wait_until(move || requests.block_requests() >= 3).await;
    assert_eq!(latest_hash(&store), None);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}
