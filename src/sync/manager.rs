use super::engine::BlockchainSyncEngine;
use super::types::{SyncError, SyncOutcome};
use crate::authority::{AuthorityClient, AuthorityError};
use crate::chain::BlockchainSyncStatus;
use crate::config::NodeConfig;
use crate::storage::{
    BlockchainStateRepository, BlockchainSyncStatusRepository, KvBlockchainSyncStatusRepository,
    Repositories, Store,
};
use backoff::backoff::Backoff;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Keeps the local replica current by following the authority's push feed.
///
/// Every (re)subscription is preceded by a catch-up pass, so tips announced
/// while the feed was down are still applied.
pub struct StreamingSyncManager<A: AuthorityClient> {
    engine: BlockchainSyncEngine<A>,
    authority: Arc<A>,
    store: Store,
    status: KvBlockchainSyncStatusRepository,
    config: NodeConfig,
}

impl<A: AuthorityClient> StreamingSyncManager<A> {
    pub fn new(authority: Arc<A>, store: Store, config: NodeConfig) -> Self {
        let engine = BlockchainSyncEngine::new(
            authority.clone(),
            store.clone(),
            config.chain_id,
            config.catch_up_limit,
        );
        let status = KvBlockchainSyncStatusRepository::new(store.sync_status_keyspace());
        Self {
            engine,
            authority,
            store,
            status,
            config,
        }
    }

    pub fn engine(&self) -> &BlockchainSyncEngine<A> {
        &self.engine
    }

    /// Run until `cancel` fires or a pass fails.
    ///
    /// Returns `Ok(())` only on cancellation.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), SyncError> {
        self.status.set(BlockchainSyncStatus::default())?;
        let genesis = self.engine.initialize_genesis().await?;
        info!(
            "Starting sync manager for chain {} from genesis {}",
            self.config.chain_id, genesis.hash
        );

        let mut backoff = self.config.retry.backoff();

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.run_pass().await {
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    let delay = self.delay_for(&e, &mut backoff);
                    warn!("Catch-up pass failed: {}, retrying in {:?}", e, delay);
                    if !sleep_or_cancel(delay, &cancel).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }

            let subscription = cancel.child_token();
            let mut stream = match self
                .authority
                .subscribe_to_blockchain_state_changes(self.config.chain_id, subscription.clone())
                .await
            {
                Ok(stream) => {
                    backoff.reset();
                    info!("Subscribed to blockchain state changes");
                    stream
                }
                Err(e) if e.is_transient() => {
                    let delay = self.delay_for_authority(&e, &mut backoff);
                    warn!("Subscription failed: {}, retrying in {:?}", e, delay);
                    if !sleep_or_cancel(delay, &cancel).await {
                        return Ok(());
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        subscription.cancel();
                        info!("Sync manager cancelled");
                        return Ok(());
                    }
                    item = stream.next() => match item {
                        Some(Ok(hash)) => {
                            if let Err(e) = self.handle_notification(&hash).await {
                                subscription.cancel();
                                return Err(e);
                            }
                        }
                        Some(Err(e)) => {
                            let delay = self.delay_for_authority(&e, &mut backoff);
                            warn!("Subscription stream failed: {}, resubscribing in {:?}", e, delay);
                            subscription.cancel();
                            if !sleep_or_cancel(delay, &cancel).await {
                                return Ok(());
                            }
                            break;
                        }
                        None => {
                            info!("Subscription stream closed, resubscribing");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// React to one announced tip.
    pub async fn handle_notification(&mut self, hash: &str) -> Result<(), SyncError> {
        let local = Repositories::new(&self.store)
            .blockchain_state()
            .get_by_chain_id(self.config.chain_id)?;
        match local {
            None => {
                debug!("Ignoring notification {}: no local blockchain state yet", hash);
                Ok(())
            }
            Some(state) if state.latest_hash == hash => {
                debug!("Ignoring notification {}: already at this tip", hash);
                Ok(())
            }
            Some(_) => {
                info!("Authority announced new tip {}", hash);
                self.run_pass().await.map(|_| ())
            }
        }
    }

    /// Run one pass in its own transaction, guarded by the sync-status flag.
    pub async fn run_pass(&mut self) -> Result<SyncOutcome, SyncError> {
        if self.status.get()?.is_synching {
            debug!("A sync pass is already running, skipping");
            return Ok(SyncOutcome::UpToDate);
        }
        self.status.set(BlockchainSyncStatus { is_synching: true })?;

        let tx = self.store.open_transaction().await;
        let result = match self.engine.sync_pass(&tx).await {
            Ok(outcome) => match tx.commit() {
                Ok(()) => Ok(outcome),
                Err(e) => {
                    error!("Failed to commit sync pass: {}", e);
                    tx.discard();
                    Err(SyncError::from(e))
                }
            },
            Err(e) => {
                error!("Sync pass failed: {}", e);
                tx.discard();
                Err(e)
            }
        };

        self.status.set(BlockchainSyncStatus::default())?;
        result
    }

    fn delay_for(&self, error: &SyncError, backoff: &mut backoff::ExponentialBackoff) -> Duration {
        match error {
            SyncError::AuthorityError(e) => self.delay_for_authority(e, backoff),
            _ => self.next_delay(backoff),
        }
    }

    fn delay_for_authority(
        &self,
        error: &AuthorityError,
        backoff: &mut backoff::ExponentialBackoff,
    ) -> Duration {
        if error.is_gateway_timeout() {
            self.config.gateway_timeout_backoff
        } else {
            self.next_delay(backoff)
        }
    }

    fn next_delay(&self, backoff: &mut backoff::ExponentialBackoff) -> Duration {
        backoff
            .next_backoff()
            .unwrap_or(self.config.retry.max_interval)
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run the sync manager under supervision until `cancel` fires.
///
/// Genesis failures are returned to the caller; any other failure is logged
/// and the manager is rebuilt after `restart_delay`.
pub async fn run_supervised<A: AuthorityClient>(
    authority: Arc<A>,
    store: Store,
    config: NodeConfig,
    cancel: CancellationToken,
) -> Result<(), SyncError> {
    let mut restarts: u64 = 0;
    loop {
        let mut manager =
            StreamingSyncManager::new(authority.clone(), store.clone(), config.clone());
        match manager.run(cancel.clone()).await {
            Ok(()) => {
                info!("Sync manager stopped");
                return Ok(());
            }
            Err(e) if e.is_fatal() => {
                error!("Sync manager failed fatally: {}", e);
                return Err(e);
            }
            Err(e) => {
                restarts += 1;
                error!(
                    "Sync manager failed: {}, restarting in {:?} (restart #{})",
                    e, config.restart_delay, restarts
                );
                if !sleep_or_cancel(config.restart_delay, &cancel).await {
                    return Ok(());
                }
            }
        }
    }
}
