//! Durable key-value storage and the typed repositories built on it.
//!
//! The node keeps one keyspace per entity kind inside a single sled database
//! rooted at `<data_dir>/db`. Reads may go straight to a committed keyspace;
//! every multi-record mutation goes through a [`Transaction`], which holds the
//! store-wide writer lock until it is committed or discarded.

/// Typed repositories for each persisted entity
pub mod repositories;
/// sled-backed store, keyspaces and transactions
mod store;

pub use repositories::*;
pub use store::{KeyspaceStore, Store, Transaction, TransactionalKeyspace};

use std::ops::ControlFlow;

/// Logical keyspaces persisted by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    Account,
    Wallet,
    GenesisBlockData,
    BlockchainState,
    BlockData,
    Token,
    NonFungibleToken,
    PendingSignedTransaction,
}

impl Keyspace {
    pub const ALL: [Keyspace; 8] = [
        Keyspace::Account,
        Keyspace::Wallet,
        Keyspace::GenesisBlockData,
        Keyspace::BlockchainState,
        Keyspace::BlockData,
        Keyspace::Token,
        Keyspace::NonFungibleToken,
        Keyspace::PendingSignedTransaction,
    ];

    /// Name of the sled tree backing this keyspace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Keyspace::Account => "account",
            Keyspace::Wallet => "wallet",
            Keyspace::GenesisBlockData => "genesis_block_data",
            Keyspace::BlockchainState => "blockchain_state",
            Keyspace::BlockData => "block_data",
            Keyspace::Token => "token",
            Keyspace::NonFungibleToken => "non_fungible_token",
            Keyspace::PendingSignedTransaction => "pending_signed_transaction",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

/// Name of the memory-only keyspace holding the sync status flag.
pub const SYNC_STATUS_KEYSPACE: &str = "blockchain_sync_status";

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key is absent.
    #[error("Key not found")]
    NotFound,

    #[error("Storage engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Write attempted through a committed or discarded transaction.
    #[error("Transaction is no longer open")]
    TransactionClosed,

    #[error("Record already exists: {0}")]
    AlreadyExists(String),
}

/// Ordered byte-oriented store. Implemented by committed keyspaces and by
/// keyspaces viewed through an open transaction.
pub trait KeyValueStore {
    /// Returns [`StoreError::NotFound`] when the key is absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Visit every entry in key order. The callback stops the scan early by
    /// returning `ControlFlow::Break`; its errors are returned unchanged.
    fn iterate(
        &self,
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>, StoreError>,
    ) -> Result<(), StoreError>;
}

/// Source of keyspace handles, either committed state or an open transaction.
pub trait KeyspaceProvider {
    type Store<'a>: KeyValueStore
    where
        Self: 'a;

    fn keyspace(&self, keyspace: Keyspace) -> Self::Store<'_>;
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}
