#![allow(dead_code)]

use chain_state_sync::authority::{AuthorityClient, AuthorityError, HashStream};
use chain_state_sync::chain::{
    Address, BlockData, BlockHeader, BlockchainState, ChainId, GenesisBlockData, Nonce,
    SignedTransaction, Transaction, TransactionKind,
};
use chain_state_sync::storage::{Keyspace, KeyValueStore, Store};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const CHAIN_ID: ChainId = 1;
pub const GENESIS_HASH: &str = "genesis";

/// In-memory authority with scripted subscription behavior.
#[derive(Default)]
pub struct MockAuthority {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    genesis: Option<GenesisBlockData>,
    state: Option<BlockchainState>,
    blocks: HashMap<String, BlockData>,
    block_requests: usize,
    subscribe_calls: usize,
    subscribe_errors: VecDeque<AuthorityError>,
    streams: VecDeque<HashStream>,
    submitted: Vec<SignedTransaction>,
    fail_submission: bool,
}

impl MockAuthority {
    pub fn new(genesis: GenesisBlockData) -> Self {
        let authority = Self::default();
        {
            let mut inner = authority.inner.lock();
            inner.state = Some(state(&genesis.hash, genesis.header.number));
            inner.genesis = Some(genesis);
        }
        authority
    }

    pub fn add_block(&self, block: BlockData) {
        self.inner.lock().blocks.insert(block.hash.clone(), block);
    }

    /// Serve `block` when `requested` is asked for, whatever its own hash.
    pub fn add_block_as(&self, requested: &str, block: BlockData) {
        self.inner.lock().blocks.insert(requested.to_string(), block);
    }

    /// Announce `hash` as the remote tip.
    pub fn set_tip(&self, hash: &str, number: u64) {
        self.inner.lock().state = Some(state(hash, number));
    }

    pub fn set_state(&self, state: BlockchainState) {
        self.inner.lock().state = Some(state);
    }

    pub fn push_subscribe_error(&self, error: AuthorityError) {
        self.inner.lock().subscribe_errors.push_back(error);
    }

    /// Items yielded by the next successful subscription before it idles.
    pub fn push_stream(&self, items: Vec<Result<String, AuthorityError>>) {
        let stream = stream::iter(items).chain(stream::pending()).boxed();
        self.inner.lock().streams.push_back(stream);
    }

    /// Next successful subscription yields whatever is sent on the returned channel.
    pub fn push_live_stream(&self) -> mpsc::UnboundedSender<Result<String, AuthorityError>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stream = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed();
        self.inner.lock().streams.push_back(stream);
        sender
    }

    pub fn fail_submission(&self, fail: bool) {
        self.inner.lock().fail_submission = fail;
    }

    pub fn block_requests(&self) -> usize {
        self.inner.lock().block_requests
    }

    pub fn subscribe_calls(&self) -> usize {
        self.inner.lock().subscribe_calls
    }

    pub fn submitted(&self) -> Vec<SignedTransaction> {
        self.inner.lock().submitted.clone()
    }
}

#[async_trait::async_trait]
impl AuthorityClient for MockAuthority {
    async fn get_genesis_block_data(
        &self,
        _chain_id: ChainId,
    ) -> Result<GenesisBlockData, AuthorityError> {
        self.inner
            .lock()
            .genesis
            .clone()
            .ok_or_else(|| AuthorityError::NotFound("genesis".into()))
    }

    async fn get_blockchain_state(
        &self,
        _chain_id: ChainId,
    ) -> Result<BlockchainState, AuthorityError> {
        self.inner
            .lock()
            .state
            .clone()
            .ok_or_else(|| AuthorityError::NotFound("state".into()))
    }

    async fn get_block_data(&self, hash: &str) -> Result<BlockData, AuthorityError> {
        let mut inner = self.inner.lock();
        inner.block_requests += 1;
        inner
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| AuthorityError::NotFound(format!("block {}", hash)))
    }

    async fn subscribe_to_blockchain_state_changes(
        &self,
        _chain_id: ChainId,
        _cancel: CancellationToken,
    ) -> Result<HashStream, AuthorityError> {
        let mut inner = self.inner.lock();
        inner.subscribe_calls += 1;
        if let Some(error) = inner.subscribe_errors.pop_front() {
            return Err(error);
        }
        Ok(inner
            .streams
            .pop_front()
            .unwrap_or_else(|| stream::pending().boxed()))
    }

    async fn submit_mempool_transaction(
        &self,
        transaction: &SignedTransaction,
    ) -> Result<(), AuthorityError> {
        let mut inner = self.inner.lock();
        if inner.fail_submission {
            return Err(AuthorityError::StatusError {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "mempool full".into(),
            });
        }
        inner.submitted.push(transaction.clone());
        Ok(())
    }
}

pub fn addr(byte: u8) -> Address {
    Address::from_bytes(&[byte; 20])
}

pub fn state(hash: &str, number: u64) -> BlockchainState {
    BlockchainState {
        chain_id: CHAIN_ID,
        latest_block_number: number,
        latest_hash: hash.to_string(),
        latest_token_id: None,
        account_hash_state: String::new(),
        token_hash_state: String::new(),
        timestamp: 1_700_000_000_000 + number as i64,
    }
}

fn signed(transaction: Transaction) -> SignedTransaction {
    SignedTransaction {
        transaction,
        public_key: "00".into(),
        signature: "00".into(),
    }
}

pub fn coin_tx(from: &Address, to: &Address, value: u64, nonce: u64) -> SignedTransaction {
    signed(Transaction {
        chain_id: CHAIN_ID,
        nonce: Nonce::from_u64(nonce),
        from: from.clone(),
        to: to.clone(),
        value,
        data: String::new(),
        kind: TransactionKind::Coin,
        token_id: None,
        token_metadata_uri: None,
        token_nonce: None,
        timestamp: 1_700_000_000_000 + nonce as i64,
    })
}

pub fn token_tx(
    from: &Address,
    to: &Address,
    token_id: u64,
    token_nonce: u64,
    nonce: u64,
) -> SignedTransaction {
    signed(Transaction {
        chain_id: CHAIN_ID,
        nonce: Nonce::from_u64(nonce),
        from: from.clone(),
        to: to.clone(),
        value: 0,
        data: String::new(),
        kind: TransactionKind::Token,
        token_id: Some(token_id),
        token_metadata_uri: Some(format!("ipfs://token-{}", token_id)),
        token_nonce: Some(Nonce::from_u64(token_nonce)),
        timestamp: 1_700_000_000_000 + nonce as i64,
    })
}

pub fn block(
    hash: &str,
    parent: &str,
    number: u64,
    transactions: Vec<SignedTransaction>,
) -> BlockData {
    BlockData {
        hash: hash.to_string(),
        header: BlockHeader {
            chain_id: CHAIN_ID,
            number,
            previous_block_hash: parent.to_string(),
            timestamp: 1_700_000_000_000 + number as i64,
            merkle_root: String::new(),
        },
        validator: None,
        transactions,
    }
}

pub fn genesis(transactions: Vec<SignedTransaction>) -> GenesisBlockData {
    GenesisBlockData(block(GENESIS_HASH, "", 0, transactions))
}

/// Raw contents of every keyspace, for byte-level comparisons.
pub fn snapshot(store: &Store) -> Vec<(Keyspace, Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    for keyspace in Keyspace::ALL {
        store
            .keyspace(keyspace)
            .iterate(&mut |key, value| {
                out.push((keyspace, key.to_vec(), value.to_vec()));
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
    }
    out
}
