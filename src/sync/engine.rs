//! Blockchain synchronization engine.
//!
//! The engine bootstraps genesis on first run, then runs repeatable passes
//! that compare the local tip with the authority's, walk back from the remote
//! tip to the first block already known locally, and apply the missing blocks
//! oldest-first to accounts, tokens and the pending pool. A pass writes only
//! through the caller's [`Transaction`], so a failure anywhere leaves
//! committed state untouched once the caller discards.

use super::progress_tracker::SyncProgressTracker;
use super::types::{EngineState, SyncError, SyncOutcome};
use crate::authority::AuthorityClient;
use crate::chain::{
    Account, BlockData, ChainId, GenesisBlockData, SignedTransaction, Token, TransactionKind,
};
use crate::storage::{
    AccountRepository, BlockDataRepository, BlockchainStateRepository,
    GenesisBlockDataRepository, KeyspaceProvider, PendingSignedTransactionRepository,
    Repositories, Store, TokenRepository, Transaction,
};
use crate::utils::format_timestamp;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives genesis bootstrap and sync passes for one chain.
pub struct BlockchainSyncEngine<A: AuthorityClient> {
    authority: Arc<A>,
    store: Store,
    chain_id: ChainId,
    catch_up_limit: usize,
    state: EngineState,
}

impl<A: AuthorityClient> BlockchainSyncEngine<A> {
    pub fn new(authority: Arc<A>, store: Store, chain_id: ChainId, catch_up_limit: usize) -> Self {
        Self {
            authority,
            store,
            chain_id,
            catch_up_limit,
            state: EngineState::Uninitialized,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// Ensure genesis is stored locally, fetching it on first run.
    ///
    /// Genesis transactions are applied as issuance: recipients are credited
    /// and minted tokens inserted, all in the same transaction that stores the
    /// genesis record.
    pub async fn initialize_genesis(&mut self) -> Result<GenesisBlockData, SyncError> {
        if let Some(genesis) = Repositories::new(&self.store)
            .genesis()
            .get_by_chain_id(self.chain_id)?
        {
            debug!("Genesis {} already stored", genesis.hash);
            self.state = self.state.max_with(EngineState::GenesisSynced);
            return Ok(genesis);
        }

        info!("Fetching genesis for chain {}", self.chain_id);
        let genesis = self
            .authority
            .get_genesis_block_data(self.chain_id)
            .await
            .map_err(|e| SyncError::GenesisError(format!("failed to fetch genesis: {}", e)))?;

        if genesis.header.chain_id != self.chain_id {
            return Err(SyncError::GenesisError(format!(
                "genesis {} belongs to chain {}, expected {}",
                genesis.hash, genesis.header.chain_id, self.chain_id
            )));
        }

        let tx = self.store.open_transaction().await;
        if let Err(e) = self.store_genesis(&tx, &genesis) {
            tx.discard();
            return Err(SyncError::GenesisError(format!(
                "failed to store genesis: {}",
                e
            )));
        }
        tx.commit()
            .map_err(|e| SyncError::GenesisError(format!("failed to commit genesis: {}", e)))?;

        info!(
            "Stored genesis {} with {} transactions",
            genesis.hash,
            genesis.transactions.len()
        );
        self.state = EngineState::GenesisSynced;
        Ok(genesis)
    }

    fn store_genesis(&self, tx: &Transaction, genesis: &GenesisBlockData) -> Result<(), SyncError> {
        let repos = Repositories::new(tx);
        repos.genesis().insert(genesis)?;
        for transaction in &genesis.transactions {
            self.apply_transaction(&repos, transaction, true)?;
        }
        Ok(())
    }

    /// Run one pass inside `tx`.
    ///
    /// Returns [`SyncOutcome::UpToDate`] when the local tip equals the remote
    /// tip; the only write then is the first state record of a fresh store.
    /// Any error leaves the staged writes in `tx` incomplete; the caller must
    /// discard it.
    pub async fn sync_pass(&mut self, tx: &Transaction) -> Result<SyncOutcome, SyncError> {
        let repos = Repositories::new(tx);
        let genesis = repos
            .genesis()
            .get_by_chain_id(self.chain_id)?
            .ok_or_else(|| {
                SyncError::NotInitialized(format!("no genesis for chain {}", self.chain_id))
            })?;

        let remote = self.authority.get_blockchain_state(self.chain_id).await?;
        if remote.chain_id != self.chain_id {
            return Err(SyncError::ConsistencyError(format!(
                "authority reported state for chain {}, expected {}",
                remote.chain_id, self.chain_id
            )));
        }

        let local = repos.blockchain_state().get_by_chain_id(self.chain_id)?;
        let (local_tip, local_number) = match &local {
            Some(state) => (state.latest_hash.clone(), state.latest_block_number),
            None => (genesis.hash.clone(), genesis.header.number),
        };

        if remote.latest_hash == local_tip {
            debug!("Local tip {} matches authority", local_tip);
            if local.is_none() {
                // record the genesis tip so announcements have something to compare against
                repos.blockchain_state().upsert(&remote)?;
            }
            self.state = EngineState::Steady;
            return Ok(SyncOutcome::UpToDate);
        }

        let blocks = self
            .fetch_missing_blocks(&repos, &remote.latest_hash, &local_tip, &genesis.hash)
            .await?;

        if blocks.is_empty() {
            // the remote tip is a block we already hold
            warn!(
                "Authority tip {} is behind local tip {}, keeping local state",
                remote.latest_hash, local_tip
            );
            self.state = EngineState::Steady;
            return Ok(SyncOutcome::UpToDate);
        }

        info!(
            "Applying {} blocks from {} to {}",
            blocks.len(),
            local_tip,
            remote.latest_hash
        );

        let mut tracker = SyncProgressTracker::new(local_number);
        for block in &blocks {
            self.apply_block(&repos, block, &mut tracker)?;
            tracker.log_progress(false);
        }

        // the tip advances only after every block has been applied
        repos.blockchain_state().upsert(&remote)?;
        self.compare_fingerprints(&repos, &remote.account_hash_state, &remote.token_hash_state)?;

        tracker.log_progress(true);
        tracker.validate_completion();
        let stats = tracker.get_stats();
        info!("{}", stats.summary());
        info!(
            "Local tip is now {} (#{}, stamped {})",
            remote.latest_hash,
            remote.latest_block_number,
            format_timestamp(remote.timestamp)
        );

        self.state = EngineState::Steady;
        Ok(SyncOutcome::Applied(stats))
    }

    /// Walk parent links from `remote_tip` back to known history.
    ///
    /// Returns the fetched blocks oldest-first.
    async fn fetch_missing_blocks<P: KeyspaceProvider>(
        &self,
        repos: &Repositories<'_, P>,
        remote_tip: &str,
        local_tip: &str,
        genesis_hash: &str,
    ) -> Result<Vec<BlockData>, SyncError> {
        let mut fetched: Vec<BlockData> = Vec::new();
        let mut cursor = remote_tip.to_string();

        loop {
            if cursor == local_tip || cursor == genesis_hash {
                break;
            }
            if repos.blocks().get_by_hash(&cursor)?.is_some() {
                if !fetched.is_empty() {
                    warn!(
                        "Catch-up walk joined local history at {} instead of tip {}",
                        cursor, local_tip
                    );
                }
                break;
            }
            if fetched.len() >= self.catch_up_limit {
                return Err(SyncError::ConsistencyError(format!(
                    "catch-up walk exceeded {} blocks without reaching local history",
                    self.catch_up_limit
                )));
            }

            let block = self.authority.get_block_data(&cursor).await?;
            if block.hash != cursor {
                return Err(SyncError::ConsistencyError(format!(
                    "requested block {} but authority returned {}",
                    cursor, block.hash
                )));
            }
            if block.header.chain_id != self.chain_id {
                return Err(SyncError::ConsistencyError(format!(
                    "block {} belongs to chain {}",
                    block.hash, block.header.chain_id
                )));
            }
            if !block.has_parent() {
                return Err(SyncError::ConsistencyError(format!(
                    "block {} has no parent and does not connect to local history",
                    block.hash
                )));
            }

            debug!(
                "Fetched block {} (#{}) parent {}",
                block.hash, block.header.number, block.header.previous_block_hash
            );
            cursor = block.header.previous_block_hash.clone();
            fetched.push(block);
        }

        fetched.reverse();
        Ok(fetched)
    }

    fn apply_block<P: KeyspaceProvider>(
        &self,
        repos: &Repositories<'_, P>,
        block: &BlockData,
        tracker: &mut SyncProgressTracker,
    ) -> Result<(), SyncError> {
        for transaction in &block.transactions {
            if !self.apply_transaction(repos, transaction, false)? {
                tracker.record_stale_token_update();
            }
            // confirmed supersedes pending
            if repos
                .pending()
                .delete_by_nonce(&transaction.from, &transaction.nonce)?
            {
                debug!(
                    "Reconciled pending transaction {}/{}",
                    transaction.from, transaction.nonce
                );
                tracker.record_reconciled();
            }
        }
        repos.blocks().insert(block)?;
        tracker.record_block(block.header.number, block.transactions.len());
        Ok(())
    }

    /// Apply one confirmed transaction. Returns `false` when a token update
    /// was dropped as stale.
    fn apply_transaction<P: KeyspaceProvider>(
        &self,
        repos: &Repositories<'_, P>,
        transaction: &SignedTransaction,
        issuance: bool,
    ) -> Result<bool, SyncError> {
        let accounts = repos.accounts();
        let debit_sender = !issuance && !transaction.from.is_zero();

        if debit_sender {
            let mut sender = accounts
                .get_by_address(&transaction.from)?
                .unwrap_or_else(|| Account::empty(self.chain_id, transaction.from.clone()));
            if transaction.kind == TransactionKind::Coin {
                if sender.balance < transaction.value {
                    warn!(
                        "Confirmed transaction {}/{} overdraws {}: balance {} value {}",
                        transaction.from,
                        transaction.nonce,
                        transaction.from,
                        sender.balance,
                        transaction.value
                    );
                }
                sender.balance = sender.balance.saturating_sub(transaction.value);
            }
            if transaction.nonce > sender.nonce {
                sender.nonce = transaction.nonce.clone();
            }
            accounts.upsert(&sender)?;
        }

        match transaction.kind {
            TransactionKind::Coin => {
                let mut recipient = accounts
                    .get_by_address(&transaction.to)?
                    .unwrap_or_else(|| Account::empty(self.chain_id, transaction.to.clone()));
                recipient.balance =
                    recipient.balance.checked_add(transaction.value).ok_or_else(|| {
                        SyncError::ConsistencyError(format!(
                            "balance of {} overflows",
                            transaction.to
                        ))
                    })?;
                accounts.upsert(&recipient)?;
                Ok(true)
            }
            TransactionKind::Token => self.apply_token_transaction(repos, transaction),
        }
    }

    fn apply_token_transaction<P: KeyspaceProvider>(
        &self,
        repos: &Repositories<'_, P>,
        transaction: &SignedTransaction,
    ) -> Result<bool, SyncError> {
        let token_id = transaction.token_id.ok_or_else(|| {
            SyncError::ConsistencyError(format!(
                "token transaction {}/{} carries no token id",
                transaction.from, transaction.nonce
            ))
        })?;
        let tokens = repos.tokens();
        let current = tokens.get_by_id(token_id)?;

        let nonce = match (&transaction.token_nonce, &current) {
            (Some(nonce), _) => nonce.clone(),
            (None, Some(current)) => current.nonce.next(),
            (None, None) => Default::default(),
        };
        let metadata_uri = transaction
            .token_metadata_uri
            .clone()
            .or_else(|| current.as_ref().map(|t| t.metadata_uri.clone()))
            .unwrap_or_default();

        let token = Token {
            id: token_id,
            chain_id: self.chain_id,
            owner: transaction.to.clone(),
            nonce,
            metadata_uri,
            timestamp: transaction.timestamp,
        };

        let written = tokens.upsert_if_newer(&token)?;
        if !written {
            debug!(
                "Dropped stale update for token {} with nonce {}",
                token.id, token.nonce
            );
        }
        Ok(written)
    }

    fn compare_fingerprints<P: KeyspaceProvider>(
        &self,
        repos: &Repositories<'_, P>,
        remote_account_hash: &str,
        remote_token_hash: &str,
    ) -> Result<(), SyncError> {
        if !remote_account_hash.is_empty() {
            let local = repos.accounts().hash_state_by_chain_id(self.chain_id)?;
            if local != remote_account_hash {
                warn!(
                    "Account state fingerprint {} differs from authority {}",
                    local, remote_account_hash
                );
            }
        }
        if !remote_token_hash.is_empty() {
            let local = repos.tokens().hash_state_by_chain_id(self.chain_id)?;
            if local != remote_token_hash {
                warn!(
                    "Token state fingerprint {} differs from authority {}",
                    local, remote_token_hash
                );
            }
        }
        Ok(())
    }
}

impl EngineState {
    fn max_with(self, other: EngineState) -> EngineState {
        match (self, other) {
            (EngineState::Steady, _) | (_, EngineState::Steady) => EngineState::Steady,
            (EngineState::GenesisSynced, _) | (_, EngineState::GenesisSynced) => {
                EngineState::GenesisSynced
            }
            _ => EngineState::Uninitialized,
        }
    }
}
