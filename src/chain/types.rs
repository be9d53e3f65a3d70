//! Ledger entities replicated from the authority and owned by the local node.
//!
//! Every type here is persisted with bincode and exchanged with the authority
//! and RPC clients as JSON. Stored types must not use `skip_serializing_if` or
//! `flatten`: bincode is not self-describing and would fail to decode them.

use super::{Address, Nonce};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Chain identifier as carried in every header and state record.
pub type ChainId = u16;

/// On-chain account balance and nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub chain_id: ChainId,
    pub address: Address,
    /// Highest nonce confirmed for this account.
    pub nonce: Nonce,
    pub balance: u64,
}

impl Account {
    /// Zero-balance account, as created for new local wallets.
    pub fn empty(chain_id: ChainId, address: Address) -> Self {
        Self {
            chain_id,
            address,
            nonce: Nonce::zero(),
            balance: 0,
        }
    }
}

/// Encrypted key material for a local account.
///
/// The secret key is sealed with AES-256-GCM under a key derived from the
/// wallet password and `salt`. All binary fields are hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: Address,
    pub label: String,
    /// Derivation path used to derive the secret key from the mnemonic seed.
    pub derivation_path: String,
    pub salt: String,
    pub cipher_nonce: String,
    pub encrypted_secret_key: String,
    pub created_at: i64,
}

/// Kind of value moved by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Coin,
    Token,
}

/// Unsigned transaction body. The signature covers the SHA-256 digest of its
/// JSON encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub chain_id: ChainId,
    pub nonce: Nonce,
    pub from: Address,
    pub to: Address,
    /// Coin amount; zero for token transactions.
    pub value: u64,
    pub data: String,
    pub kind: TransactionKind,
    pub token_id: Option<u64>,
    pub token_metadata_uri: Option<String>,
    pub token_nonce: Option<Nonce>,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Transaction with its hex encoded public key and compact ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub public_key: String,
    pub signature: String,
}

impl Deref for SignedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Self::Target {
        &self.transaction
    }
}

/// A signed transaction as embedded in confirmed block data.
pub type BlockTransaction = SignedTransaction;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: ChainId,
    pub number: u64,
    /// Empty for the genesis block.
    pub previous_block_hash: String,
    pub timestamp: i64,
    pub merkle_root: String,
}

/// A confirmed block. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: String,
    pub header: BlockHeader,
    pub validator: Option<String>,
    pub transactions: Vec<BlockTransaction>,
}

impl BlockData {
    pub fn has_parent(&self) -> bool {
        !self.header.previous_block_hash.is_empty()
    }

    /// True when `address` is the sender or recipient of any transaction.
    pub fn involves(&self, address: &str) -> bool {
        self.transactions
            .iter()
            .any(|tx| tx.from.matches(address) || tx.to.matches(address))
    }
}

/// The chain's first block. Stored once per chain id and used as the trust
/// anchor for every later pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenesisBlockData(pub BlockData);

impl Deref for GenesisBlockData {
    type Target = BlockData;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Descriptor of the chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainState {
    pub chain_id: ChainId,
    pub latest_block_number: u64,
    pub latest_hash: String,
    pub latest_token_id: Option<u64>,
    /// Fingerprint of every account on the chain.
    pub account_hash_state: String,
    /// Fingerprint of every token on the chain.
    pub token_hash_state: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: u64,
    pub chain_id: ChainId,
    pub owner: Address,
    /// Bumped on every transfer or burn; stale updates are dropped.
    pub nonce: Nonce,
    pub metadata_uri: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: String,
}

/// Metadata document served by NFT storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub external_url: String,
    #[serde(default)]
    pub attributes: Vec<NftAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NftState {
    NotReady,
    Ready,
}

/// Cached NFT metadata for a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonFungibleToken {
    pub token_id: u64,
    pub metadata_uri: String,
    pub metadata: Option<NftMetadata>,
    pub state: NftState,
}

/// A locally signed transaction awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignedTransaction {
    pub signed_transaction: SignedTransaction,
    pub submitted_at: i64,
}

impl PendingSignedTransaction {
    pub fn sender(&self) -> &Address {
        &self.signed_transaction.from
    }

    pub fn nonce(&self) -> &Nonce {
        &self.signed_transaction.nonce
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainSyncStatus {
    pub is_synching: bool,
}
