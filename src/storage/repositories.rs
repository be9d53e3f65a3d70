//! Typed repositories over the key-value store.
//!
//! Each repository is a trait so that alternative storage engines can be
//! substituted, with a single implementation generic over any
//! [`KeyValueStore`]. The same code therefore runs against committed state and
//! inside an open [`Transaction`](super::Transaction).

use super::{Keyspace, KeyspaceProvider, KeyValueStore, KeyspaceStore, StoreError, decode, encode};
use crate::chain::{
    Account, Address, BlockData, BlockTransaction, BlockchainState, BlockchainSyncStatus, ChainId,
    GenesisBlockData, Nonce, NonFungibleToken, PendingSignedTransaction, Token, Wallet,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::ops::ControlFlow;

const SYNC_STATUS_KEY: &[u8] = b"blockchain_sync_status";

/// Repository for on-chain accounts
pub trait AccountRepository {
    fn get_by_address(&self, address: &Address) -> Result<Option<Account>, StoreError>;
    /// Full overwrite.
    fn upsert(&self, account: &Account) -> Result<(), StoreError>;
    fn list_by_chain_id(&self, chain_id: ChainId) -> Result<Vec<Account>, StoreError>;
    /// SHA-256 fingerprint over every account of the chain in address order.
    fn hash_state_by_chain_id(&self, chain_id: ChainId) -> Result<String, StoreError>;
}

/// Repository for local encrypted wallets
pub trait WalletRepository {
    fn get_by_address(&self, address: &Address) -> Result<Option<Wallet>, StoreError>;
    /// Fails with [`StoreError::AlreadyExists`] if the address is taken.
    fn insert(&self, wallet: &Wallet) -> Result<(), StoreError>;
    fn list_all(&self) -> Result<Vec<Wallet>, StoreError>;
}

/// Repository for the genesis block, written at most once per chain
pub trait GenesisBlockDataRepository {
    fn get_by_chain_id(&self, chain_id: ChainId) -> Result<Option<GenesisBlockData>, StoreError>;
    fn insert(&self, genesis: &GenesisBlockData) -> Result<(), StoreError>;
}

/// Repository for the chain tip descriptor
pub trait BlockchainStateRepository {
    fn get_by_chain_id(&self, chain_id: ChainId) -> Result<Option<BlockchainState>, StoreError>;
    fn upsert(&self, state: &BlockchainState) -> Result<(), StoreError>;
}

/// Repository for confirmed blocks
pub trait BlockDataRepository {
    fn get_by_hash(&self, hash: &str) -> Result<Option<BlockData>, StoreError>;
    /// Blocks are immutable; inserting an existing hash fails.
    fn insert(&self, block: &BlockData) -> Result<(), StoreError>;
    fn list_by_chain_id(&self, chain_id: ChainId) -> Result<Vec<BlockData>, StoreError>;
    /// Transactions sent or received by `address`, newest first.
    fn list_block_transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<BlockTransaction>, StoreError>;
    /// First block holding a transaction created at `timestamp`.
    fn get_by_block_transaction_timestamp(
        &self,
        timestamp: i64,
    ) -> Result<Option<BlockData>, StoreError>;
}

/// Repository for tokens
pub trait TokenRepository {
    fn get_by_id(&self, id: u64) -> Result<Option<Token>, StoreError>;
    fn upsert(&self, token: &Token) -> Result<(), StoreError>;
    /// Stores `token` only if it is new or its nonce is strictly greater than
    /// the stored one. Returns whether anything was written.
    fn upsert_if_newer(&self, token: &Token) -> Result<bool, StoreError>;
    fn list_by_owner(&self, owner: &str) -> Result<Vec<Token>, StoreError>;
    fn count_by_owner(&self, owner: &str) -> Result<usize, StoreError>;
    fn list_by_chain_id(&self, chain_id: ChainId) -> Result<Vec<Token>, StoreError>;
    fn hash_state_by_chain_id(&self, chain_id: ChainId) -> Result<String, StoreError>;
}

/// Repository for cached NFT metadata
pub trait NonFungibleTokenRepository {
    fn get_by_token_id(&self, token_id: u64) -> Result<Option<NonFungibleToken>, StoreError>;
    fn upsert(&self, nft: &NonFungibleToken) -> Result<(), StoreError>;
}

/// Repository for locally signed, unconfirmed transactions
pub trait PendingSignedTransactionRepository {
    fn upsert(&self, pending: &PendingSignedTransaction) -> Result<(), StoreError>;
    fn list_all(&self) -> Result<Vec<PendingSignedTransaction>, StoreError>;
    /// Pending transactions of one sender in ascending nonce order.
    fn list_by_sender(&self, sender: &Address)
    -> Result<Vec<PendingSignedTransaction>, StoreError>;
    /// Returns whether an entry was removed.
    fn delete_by_nonce(&self, sender: &Address, nonce: &Nonce) -> Result<bool, StoreError>;
}

/// Repository for the process-wide sync flag
pub trait BlockchainSyncStatusRepository {
    fn get(&self) -> Result<BlockchainSyncStatus, StoreError>;
    fn set(&self, status: BlockchainSyncStatus) -> Result<(), StoreError>;
}

fn get_decoded<S: KeyValueStore, T: DeserializeOwned>(
    store: &S,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    match store.get(key) {
        Ok(bytes) => Ok(Some(decode(&bytes)?)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn put_encoded<S: KeyValueStore, T: Serialize>(
    store: &S,
    key: &[u8],
    value: &T,
) -> Result<(), StoreError> {
    store.set(key, &encode(value)?)
}

fn exists<S: KeyValueStore>(store: &S, key: &[u8]) -> Result<bool, StoreError> {
    match store.get(key) {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode every record and keep those matching `filter`.
fn scan<S: KeyValueStore, T: DeserializeOwned>(
    store: &S,
    mut filter: impl FnMut(&T) -> bool,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    store.iterate(&mut |_, bytes| {
        let record: T = decode(bytes)?;
        if filter(&record) {
            out.push(record);
        }
        Ok(ControlFlow::Continue(()))
    })?;
    Ok(out)
}

/// Hex SHA-256 over the concatenated bincode encodings, in the given order.
fn fingerprint<T: Serialize>(records: &[T]) -> Result<String, StoreError> {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(encode(record)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn chain_key(chain_id: ChainId) -> [u8; 2] {
    chain_id.to_be_bytes()
}

fn pending_key(sender: &Address, nonce: &Nonce) -> Vec<u8> {
    format!("{}/{}", sender, nonce.to_hex()).into_bytes()
}

pub struct KvAccountRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvAccountRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AccountRepository for KvAccountRepository<S> {
    fn get_by_address(&self, address: &Address) -> Result<Option<Account>, StoreError> {
        get_decoded(&self.store, address.as_str().as_bytes())
    }

    fn upsert(&self, account: &Account) -> Result<(), StoreError> {
        put_encoded(&self.store, account.address.as_str().as_bytes(), account)
    }

    fn list_by_chain_id(&self, chain_id: ChainId) -> Result<Vec<Account>, StoreError> {
        scan(&self.store, |a: &Account| a.chain_id == chain_id)
    }

    fn hash_state_by_chain_id(&self, chain_id: ChainId) -> Result<String, StoreError> {
        let mut accounts = self.list_by_chain_id(chain_id)?;
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        fingerprint(&accounts)
    }
}

pub struct KvWalletRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvWalletRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> WalletRepository for KvWalletRepository<S> {
    fn get_by_address(&self, address: &Address) -> Result<Option<Wallet>, StoreError> {
        get_decoded(&self.store, address.as_str().as_bytes())
    }

    fn insert(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let key = wallet.address.as_str().as_bytes();
        if exists(&self.store, key)? {
            return Err(StoreError::AlreadyExists(format!("wallet {}", wallet.address)));
        }
        put_encoded(&self.store, key, wallet)
    }

    fn list_all(&self) -> Result<Vec<Wallet>, StoreError> {
        scan(&self.store, |_: &Wallet| true)
    }
}

pub struct KvGenesisBlockDataRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvGenesisBlockDataRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> GenesisBlockDataRepository for KvGenesisBlockDataRepository<S> {
    fn get_by_chain_id(&self, chain_id: ChainId) -> Result<Option<GenesisBlockData>, StoreError> {
        get_decoded(&self.store, &chain_key(chain_id))
    }

    fn insert(&self, genesis: &GenesisBlockData) -> Result<(), StoreError> {
        let key = chain_key(genesis.header.chain_id);
        if exists(&self.store, &key)? {
            return Err(StoreError::AlreadyExists(format!(
                "genesis for chain {}",
                genesis.header.chain_id
            )));
        }
        put_encoded(&self.store, &key, genesis)
    }
}

pub struct KvBlockchainStateRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvBlockchainStateRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> BlockchainStateRepository for KvBlockchainStateRepository<S> {
    fn get_by_chain_id(&self, chain_id: ChainId) -> Result<Option<BlockchainState>, StoreError> {
        get_decoded(&self.store, &chain_key(chain_id))
    }

    fn upsert(&self, state: &BlockchainState) -> Result<(), StoreError> {
        put_encoded(&self.store, &chain_key(state.chain_id), state)
    }
}

pub struct KvBlockDataRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvBlockDataRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> BlockDataRepository for KvBlockDataRepository<S> {
    fn get_by_hash(&self, hash: &str) -> Result<Option<BlockData>, StoreError> {
        get_decoded(&self.store, hash.as_bytes())
    }

    fn insert(&self, block: &BlockData) -> Result<(), StoreError> {
        if exists(&self.store, block.hash.as_bytes())? {
            return Err(StoreError::AlreadyExists(format!("block {}", block.hash)));
        }
        put_encoded(&self.store, block.hash.as_bytes(), block)
    }

    fn list_by_chain_id(&self, chain_id: ChainId) -> Result<Vec<BlockData>, StoreError> {
        let mut blocks = scan(&self.store, |b: &BlockData| b.header.chain_id == chain_id)?;
        blocks.sort_by_key(|b| b.header.number);
        Ok(blocks)
    }

    fn list_block_transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<BlockTransaction>, StoreError> {
        let blocks = scan(&self.store, |b: &BlockData| b.involves(address))?;
        let mut transactions: Vec<BlockTransaction> = blocks
            .into_iter()
            .flat_map(|b| b.transactions)
            .filter(|tx| tx.from.matches(address) || tx.to.matches(address))
            .collect();
        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(transactions)
    }

    fn get_by_block_transaction_timestamp(
        &self,
        timestamp: i64,
    ) -> Result<Option<BlockData>, StoreError> {
        let mut found = None;
        self.store.iterate(&mut |_, bytes| {
            let block: BlockData = decode(bytes)?;
            if block.transactions.iter().any(|tx| tx.timestamp == timestamp) {
                found = Some(block);
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(found)
    }
}

pub struct KvTokenRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvTokenRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TokenRepository for KvTokenRepository<S> {
    fn get_by_id(&self, id: u64) -> Result<Option<Token>, StoreError> {
        get_decoded(&self.store, &id.to_be_bytes())
    }

    fn upsert(&self, token: &Token) -> Result<(), StoreError> {
        put_encoded(&self.store, &token.id.to_be_bytes(), token)
    }

    fn upsert_if_newer(&self, token: &Token) -> Result<bool, StoreError> {
        if let Some(current) = self.get_by_id(token.id)? {
            if token.nonce <= current.nonce {
                return Ok(false);
            }
        }
        self.upsert(token)?;
        Ok(true)
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<Token>, StoreError> {
        scan(&self.store, |t: &Token| t.owner.matches(owner))
    }

    fn count_by_owner(&self, owner: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        self.store.iterate(&mut |_, bytes| {
            let token: Token = decode(bytes)?;
            if token.owner.matches(owner) {
                count += 1;
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(count)
    }

    fn list_by_chain_id(&self, chain_id: ChainId) -> Result<Vec<Token>, StoreError> {
        scan(&self.store, |t: &Token| t.chain_id == chain_id)
    }

    fn hash_state_by_chain_id(&self, chain_id: ChainId) -> Result<String, StoreError> {
        let mut tokens = self.list_by_chain_id(chain_id)?;
        tokens.sort_by_key(|t| t.id);
        fingerprint(&tokens)
    }
}

pub struct KvNonFungibleTokenRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvNonFungibleTokenRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> NonFungibleTokenRepository for KvNonFungibleTokenRepository<S> {
    fn get_by_token_id(&self, token_id: u64) -> Result<Option<NonFungibleToken>, StoreError> {
        get_decoded(&self.store, &token_id.to_be_bytes())
    }

    fn upsert(&self, nft: &NonFungibleToken) -> Result<(), StoreError> {
        put_encoded(&self.store, &nft.token_id.to_be_bytes(), nft)
    }
}

pub struct KvPendingSignedTransactionRepository<S> {
    store: S,
}

impl<S: KeyValueStore> KvPendingSignedTransactionRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> PendingSignedTransactionRepository
    for KvPendingSignedTransactionRepository<S>
{
    fn upsert(&self, pending: &PendingSignedTransaction) -> Result<(), StoreError> {
        put_encoded(
            &self.store,
            &pending_key(pending.sender(), pending.nonce()),
            pending,
        )
    }

    fn list_all(&self) -> Result<Vec<PendingSignedTransaction>, StoreError> {
        scan(&self.store, |_: &PendingSignedTransaction| true)
    }

    fn list_by_sender(
        &self,
        sender: &Address,
    ) -> Result<Vec<PendingSignedTransaction>, StoreError> {
        let mut pending = scan(&self.store, |p: &PendingSignedTransaction| {
            p.sender() == sender
        })?;
        pending.sort_by(|a, b| a.nonce().cmp(b.nonce()));
        Ok(pending)
    }

    fn delete_by_nonce(&self, sender: &Address, nonce: &Nonce) -> Result<bool, StoreError> {
        let key = pending_key(sender, nonce);
        if !exists(&self.store, &key)? {
            return Ok(false);
        }
        self.store.delete(&key)?;
        Ok(true)
    }
}

pub struct KvBlockchainSyncStatusRepository {
    store: KeyspaceStore,
}

impl KvBlockchainSyncStatusRepository {
    pub fn new(store: KeyspaceStore) -> Self {
        Self { store }
    }
}

impl BlockchainSyncStatusRepository for KvBlockchainSyncStatusRepository {
    fn get(&self) -> Result<BlockchainSyncStatus, StoreError> {
        Ok(get_decoded(&self.store, SYNC_STATUS_KEY)?.unwrap_or_default())
    }

    fn set(&self, status: BlockchainSyncStatus) -> Result<(), StoreError> {
        put_encoded(&self.store, SYNC_STATUS_KEY, &status)
    }
}

/// Repository set bound to one keyspace provider.
pub struct Repositories<'a, P: KeyspaceProvider> {
    provider: &'a P,
}

impl<'a, P: KeyspaceProvider> Repositories<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self { provider }
    }

    pub fn accounts(&self) -> KvAccountRepository<P::Store<'a>> {
        KvAccountRepository::new(self.provider.keyspace(Keyspace::Account))
    }

    pub fn wallets(&self) -> KvWalletRepository<P::Store<'a>> {
        KvWalletRepository::new(self.provider.keyspace(Keyspace::Wallet))
    }

    pub fn genesis(&self) -> KvGenesisBlockDataRepository<P::Store<'a>> {
        KvGenesisBlockDataRepository::new(self.provider.keyspace(Keyspace::GenesisBlockData))
    }

    pub fn blockchain_state(&self) -> KvBlockchainStateRepository<P::Store<'a>> {
        KvBlockchainStateRepository::new(self.provider.keyspace(Keyspace::BlockchainState))
    }

    pub fn blocks(&self) -> KvBlockDataRepository<P::Store<'a>> {
        KvBlockDataRepository::new(self.provider.keyspace(Keyspace::BlockData))
    }

    pub fn tokens(&self) -> KvTokenRepository<P::Store<'a>> {
        KvTokenRepository::new(self.provider.keyspace(Keyspace::Token))
    }

    pub fn nfts(&self) -> KvNonFungibleTokenRepository<P::Store<'a>> {
        KvNonFungibleTokenRepository::new(self.provider.keyspace(Keyspace::NonFungibleToken))
    }

    pub fn pending(&self) -> KvPendingSignedTransactionRepository<P::Store<'a>> {
        KvPendingSignedTransactionRepository::new(
            self.provider.keyspace(Keyspace::PendingSignedTransaction),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{SignedTransaction, Transaction, TransactionKind};
    use crate::storage::Store;
    use proptest::prelude::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes(&[n; 20])
    }

    fn account(n: u8, balance: u64) -> Account {
        Account {
            chain_id: 1,
            address: addr(n),
            nonce: Nonce::from_u64(n as u64),
            balance,
        }
    }

    fn token(id: u64, owner: u8, nonce: u64) -> Token {
        Token {
            id,
            chain_id: 1,
            owner: addr(owner),
            nonce: Nonce::from_u64(nonce),
            metadata_uri: format!("ipfs://token-{}", id),
            timestamp: 0,
        }
    }

    fn coin_tx(from: u8, to: u8, nonce: u64, timestamp: i64) -> SignedTransaction {
        SignedTransaction {
            transaction: Transaction {
                chain_id: 1,
                nonce: Nonce::from_u64(nonce),
                from: addr(from),
                to: addr(to),
                value: 1,
                data: String::new(),
                kind: TransactionKind::Coin,
                token_id: None,
                token_metadata_uri: None,
                token_nonce: None,
                timestamp,
            },
            public_key: String::new(),
            signature: String::new(),
        }
    }

    fn block(hash: &str, number: u64, transactions: Vec<SignedTransaction>) -> BlockData {
        BlockData {
            hash: hash.to_string(),
            header: crate::chain::BlockHeader {
                chain_id: 1,
                number,
                previous_block_hash: String::new(),
                timestamp: 0,
                merkle_root: String::new(),
            },
            validator: None,
            transactions,
        }
    }

    #[test]
    fn missing_records_are_none() {
        let store = Store::open_temporary().unwrap();
        let repos = Repositories::new(&store);
        assert!(repos.accounts().get_by_address(&addr(1)).unwrap().is_none());
        assert!(repos.genesis().get_by_chain_id(1).unwrap().is_none());
        assert!(repos.blocks().get_by_hash("nope").unwrap().is_none());
    }

    #[test]
    fn genesis_written_once() {
        let store = Store::open_temporary().unwrap();
        let repos = Repositories::new(&store);
        let genesis = GenesisBlockData(block("G", 0, vec![]));
        repos.genesis().insert(&genesis).unwrap();
        assert!(matches!(
            repos.genesis().insert(&genesis),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn block_transactions_filtered_and_newest_first() {
        let store = Store::open_temporary().unwrap();
        let repos = Repositories::new(&store);
        let blocks = repos.blocks();
        blocks
            .insert(&block("b1", 1, vec![coin_tx(0xab, 2, 1, 100), coin_tx(3, 4, 1, 150)]))
            .unwrap();
        blocks
            .insert(&block("b2", 2, vec![coin_tx(2, 0xab, 1, 200)]))
            .unwrap();

        let mixed_case = format!("0x{}", "AB".repeat(20));
        let txs = blocks.list_block_transactions_by_address(&mixed_case).unwrap();
        let stamps: Vec<i64> = txs.iter().map(|tx| tx.timestamp).collect();
        assert_eq!(stamps, vec![200, 100]);

        let found = blocks.get_by_block_transaction_timestamp(150).unwrap();
        assert_eq!(found.map(|b| b.hash), Some("b1".to_string()));
        assert!(blocks.get_by_block_transaction_timestamp(999).unwrap().is_none());
        assert!(matches!(
            blocks.insert(&block("b1", 1, vec![])),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn token_upsert_requires_strictly_greater_nonce() {
        let store = Store::open_temporary().unwrap();
        let tokens = Repositories::new(&store).tokens();

        assert!(tokens.upsert_if_newer(&token(7, 1, 2)).unwrap());
        assert!(!tokens.upsert_if_newer(&token(7, 2, 2)).unwrap());
        assert!(!tokens.upsert_if_newer(&token(7, 2, 1)).unwrap());
        assert_eq!(tokens.get_by_id(7).unwrap().unwrap().owner, addr(1));

        assert!(tokens.upsert_if_newer(&token(7, 3, 3)).unwrap());
        assert_eq!(tokens.get_by_id(7).unwrap().unwrap().owner, addr(3));
        assert_eq!(tokens.count_by_owner(addr(3).as_str()).unwrap(), 1);
    }

    #[test]
    fn pending_keys_are_per_sender() {
        let store = Store::open_temporary().unwrap();
        let pending = Repositories::new(&store).pending();
        for (sender, nonce) in [(1, 2), (1, 1), (2, 1)] {
            pending
                .upsert(&PendingSignedTransaction {
                    signed_transaction: coin_tx(sender, 9, nonce, 0),
                    submitted_at: 0,
                })
                .unwrap();
        }
        assert_eq!(pending.list_all().unwrap().len(), 3);

        let nonces: Vec<Nonce> = pending
            .list_by_sender(&addr(1))
            .unwrap()
            .iter()
            .map(|p| p.nonce().clone())
            .collect();
        assert_eq!(nonces, vec![Nonce::from_u64(1), Nonce::from_u64(2)]);

        assert!(pending.delete_by_nonce(&addr(1), &Nonce::from_u64(1)).unwrap());
        assert!(!pending.delete_by_nonce(&addr(1), &Nonce::from_u64(1)).unwrap());
        assert_eq!(pending.list_by_sender(&addr(2)).unwrap().len(), 1);
    }

    #[test]
    fn sync_status_defaults_to_idle() {
        let store = Store::open_temporary().unwrap();
        let status = KvBlockchainSyncStatusRepository::new(store.sync_status_keyspace());
        assert!(!status.get().unwrap().is_synching);
        status.set(BlockchainSyncStatus { is_synching: true }).unwrap();
        assert!(status.get().unwrap().is_synching);
    }

    #[test]
    fn hash_state_ignores_other_chains() {
        let store = Store::open_temporary().unwrap();
        let accounts = Repositories::new(&store).accounts();
        accounts.upsert(&account(1, 10)).unwrap();
        let before = accounts.hash_state_by_chain_id(1).unwrap();

        let mut foreign = account(2, 5);
        foreign.chain_id = 2;
        accounts.upsert(&foreign).unwrap();
        assert_eq!(accounts.hash_state_by_chain_id(1).unwrap(), before);

        accounts.upsert(&account(1, 11)).unwrap();
        assert_ne!(accounts.hash_state_by_chain_id(1).unwrap(), before);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn hash_state_independent_of_insert_order(
            balances in proptest::collection::btree_map(any::<u8>(), any::<u64>(), 1..20)
        ) {
            let forward = Store::open_temporary().unwrap();
            let backward = Store::open_temporary().unwrap();
            let entries: Vec<Account> = balances.iter().map(|(n, b)| account(*n, *b)).collect();

            for a in &entries {
                Repositories::new(&forward).accounts().upsert(a).unwrap();
            }
            for a in entries.iter().rev() {
                Repositories::new(&backward).accounts().upsert(a).unwrap();
            }

            let first = Repositories::new(&forward).accounts().hash_state_by_chain_id(1).unwrap();
            let second = Repositories::new(&backward).accounts().hash_state_by_chain_id(1).unwrap();
            let again = Repositories::new(&forward).accounts().hash_state_by_chain_id(1).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first, again);
        }
    }
}
