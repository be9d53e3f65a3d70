//! Business operations behind the RPC surface.
//!
//! Queries read committed keyspaces directly; anything that writes goes
//! through a store transaction.

use crate::authority::AuthorityClient;
use crate::chain::{
    Account, Address, BlockData, BlockTransaction, ChainId, NftState, NonFungibleToken, Token,
};
use crate::config::NodeConfig;
use crate::nftstorage::NftStorageClient;
use crate::rpc::messages::*;
use crate::storage::{
    AccountRepository, BlockDataRepository, BlockchainStateRepository,
    BlockchainSyncStatusRepository, GenesisBlockDataRepository, KvBlockchainSyncStatusRepository,
    NonFungibleTokenRepository, Repositories, Store, StoreError, TokenRepository,
};
use crate::transaction::{CoinTransfer, TokenBurn, TokenTransfer, TransferError, TransferService};
use crate::wallet::{Credential, WalletError, WalletService};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Validation failed: {0:?}")]
    ValidationError(BTreeMap<String, String>),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error(transparent)]
    WalletError(#[from] WalletError),

    #[error(transparent)]
    TransferError(#[from] TransferError),
}

impl From<NodeError> for RpcFault {
    fn from(error: NodeError) -> Self {
        match error {
            NodeError::ValidationError(fields) => RpcFault::validation(fields),
            NodeError::NotFoundError(what) => {
                RpcFault::new(FaultKind::NotFound, format!("{} not found", what))
            }
            NodeError::StoreError(e) => RpcFault::new(FaultKind::Internal, e.to_string()),
            NodeError::WalletError(e) => {
                let message = e.to_string();
                match e {
                    WalletError::ValidationError(fields) => RpcFault::validation(fields),
                    WalletError::NotFoundError(_) => RpcFault::new(FaultKind::NotFound, message),
                    WalletError::AlreadyExistsError(_) => {
                        RpcFault::new(FaultKind::AlreadyExists, message)
                    }
                    WalletError::KeystoreError(k) if k.is_bad_credential() => {
                        RpcFault::new(FaultKind::BadCredential, message)
                    }
                    _ => RpcFault::new(FaultKind::Internal, message),
                }
            }
            NodeError::TransferError(e) => {
                let message = e.to_string();
                match e {
                    TransferError::ValidationError(fields) => RpcFault::validation(fields),
                    TransferError::BadCredentialError(_) => {
                        RpcFault::new(FaultKind::BadCredential, message)
                    }
                    TransferError::SubmissionError(_) => {
                        RpcFault::new(FaultKind::Unavailable, message)
                    }
                    TransferError::NotFoundError(_) => RpcFault::new(FaultKind::NotFound, message),
                    _ => RpcFault::new(FaultKind::Internal, message),
                }
            }
        }
    }
}

/// Every operation the daemon serves.
pub struct NodeServices<A: AuthorityClient> {
    store: Store,
    chain_id: ChainId,
    wallets: WalletService,
    transfers: TransferService<A>,
    nft_storage: NftStorageClient,
}

impl<A: AuthorityClient> NodeServices<A> {
    pub fn new(
        store: Store,
        authority: Arc<A>,
        nft_storage: NftStorageClient,
        config: &NodeConfig,
    ) -> Self {
        Self {
            wallets: WalletService::new(store.clone(), config.chain_id),
            transfers: TransferService::new(store.clone(), authority, config.chain_id),
            store,
            chain_id: config.chain_id,
            nft_storage,
        }
    }

    /// Route one request to its operation.
    pub async fn dispatch(&self, request: RpcRequest) -> Result<RpcReply, RpcFault> {
        let method = request.method();
        debug!("Dispatching {}", method);
        let result = match request {
            RpcRequest::GetAccount(args) => self
                .get_account(&args.address)
                .map(|account| RpcReply::GetAccount(AccountReply { account })),
            RpcRequest::CreateAccount(args) => self
                .create_account(&args.password, &args.label)
                .await
                .map(RpcReply::CreateAccount),
            RpcRequest::AccountListingByLocalWallets(_) => self
                .account_listing_by_local_wallets()
                .map(|accounts| {
                    RpcReply::AccountListingByLocalWallets(AccountListReply { accounts })
                }),
            RpcRequest::CoinTransfer(args) => {
                let credential = Credential::from(args.credential);
                self.transfers
                    .coin_transfer(
                        CoinTransfer {
                            from: args.from,
                            to: args.to,
                            value: args.value,
                            data: args.data,
                        },
                        &credential,
                    )
                    .await
                    .map_err(NodeError::from)
                    .map(|signed_transaction| {
                        RpcReply::CoinTransfer(TransferReply { signed_transaction })
                    })
            }
            RpcRequest::GetToken(args) => self
                .get_token(args.token_id)
                .map(|token| RpcReply::GetToken(TokenReply { token })),
            RpcRequest::TokenTransfer(args) => {
                let credential = Credential::from(args.credential);
                self.transfers
                    .token_transfer(
                        TokenTransfer {
                            from: args.from,
                            to: args.to,
                            token_id: args.token_id,
                            data: args.data,
                        },
                        &credential,
                    )
                    .await
                    .map_err(NodeError::from)
                    .map(|signed_transaction| {
                        RpcReply::TokenTransfer(TransferReply { signed_transaction })
                    })
            }
            RpcRequest::TokenBurn(args) => {
                let credential = Credential::from(args.credential);
                self.transfers
                    .token_burn(
                        TokenBurn {
                            from: args.from,
                            token_id: args.token_id,
                            data: args.data,
                        },
                        &credential,
                    )
                    .await
                    .map_err(NodeError::from)
                    .map(|signed_transaction| {
                        RpcReply::TokenBurn(TransferReply { signed_transaction })
                    })
            }
            RpcRequest::ListBlockTransactionsByAddress(args) => self
                .list_block_transactions_by_address(&args.address)
                .map(|transactions| {
                    RpcReply::ListBlockTransactionsByAddress(BlockTransactionListReply {
                        transactions,
                    })
                }),
            RpcRequest::GetBlockDataByHash(args) => self
                .get_block_data_by_hash(&args.hash)
                .map(|block_data| RpcReply::GetBlockDataByHash(BlockDataReply { block_data })),
            RpcRequest::GetBlockDataByTransactionTimestamp(args) => self
                .get_block_data_by_transaction_timestamp(args.timestamp)
                .map(|block_data| {
                    RpcReply::GetBlockDataByTransactionTimestamp(BlockDataReply { block_data })
                }),
            RpcRequest::ListTokensByOwnerAddress(args) => self
                .list_tokens_by_owner_address(&args.address)
                .map(|tokens| {
                    RpcReply::ListTokensByOwnerAddress(TokenListReply {
                        count: tokens.len(),
                        tokens,
                    })
                }),
            RpcRequest::ExportWallet(args) => parse_address("address", &args.address)
                .and_then(|address| Ok(self.wallets.export(&address)?))
                .map(|wallet| RpcReply::ExportWallet(WalletReply { wallet })),
            RpcRequest::ImportWallet(args) => self
                .wallets
                .import(args.wallet)
                .await
                .map_err(NodeError::from)
                .map(|wallet| RpcReply::ImportWallet(WalletReply { wallet })),
            RpcRequest::GetNonFungibleToken(args) => self
                .get_non_fungible_token(args.token_id)
                .await
                .map(|nft| RpcReply::GetNonFungibleToken(NonFungibleTokenReply { nft })),
            RpcRequest::GetSyncStatus(_) => self.get_sync_status().map(RpcReply::GetSyncStatus),
        };

        result.map_err(|e| {
            warn!("{} failed: {}", method, e);
            RpcFault::from(e)
        })
    }

    pub fn get_account(&self, address: &str) -> Result<Account, NodeError> {
        let address = parse_address("address", address)?;
        Repositories::new(&self.store)
            .accounts()
            .get_by_address(&address)?
            .ok_or_else(|| NodeError::NotFoundError(format!("account {}", address)))
    }

    pub async fn create_account(
        &self,
        password: &str,
        label: &str,
    ) -> Result<CreateAccountReply, NodeError> {
        let created = self.wallets.create(password, label).await?;
        Ok(CreateAccountReply {
            address: created.wallet.address.to_string(),
            mnemonic: created.mnemonic.as_str().to_string(),
        })
    }

    pub fn account_listing_by_local_wallets(&self) -> Result<Vec<Account>, NodeError> {
        Ok(self.wallets.list_accounts()?)
    }

    pub fn get_token(&self, token_id: u64) -> Result<Token, NodeError> {
        Repositories::new(&self.store)
            .tokens()
            .get_by_id(token_id)?
            .ok_or_else(|| NodeError::NotFoundError(format!("token {}", token_id)))
    }

    pub fn list_tokens_by_owner_address(&self, address: &str) -> Result<Vec<Token>, NodeError> {
        let address = parse_address("address", address)?;
        Ok(Repositories::new(&self.store)
            .tokens()
            .list_by_owner(address.as_str())?)
    }

    pub fn list_block_transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<BlockTransaction>, NodeError> {
        let address = parse_address("address", address)?;
        Ok(Repositories::new(&self.store)
            .blocks()
            .list_block_transactions_by_address(address.as_str())?)
    }

    /// Stored blocks first, then the genesis block.
    pub fn get_block_data_by_hash(&self, hash: &str) -> Result<BlockData, NodeError> {
        let repos = Repositories::new(&self.store);
        if let Some(block) = repos.blocks().get_by_hash(hash)? {
            return Ok(block);
        }
        match repos.genesis().get_by_chain_id(self.chain_id)? {
            Some(genesis) if genesis.hash == hash => Ok(genesis.0),
            _ => Err(NodeError::NotFoundError(format!("block {}", hash))),
        }
    }

    pub fn get_block_data_by_transaction_timestamp(
        &self,
        timestamp: i64,
    ) -> Result<BlockData, NodeError> {
        Repositories::new(&self.store)
            .blocks()
            .get_by_block_transaction_timestamp(timestamp)?
            .ok_or_else(|| {
                NodeError::NotFoundError(format!("block with transaction at {}", timestamp))
            })
    }

    /// Cached metadata when ready; otherwise fetch it from NFT storage.
    ///
    /// A failed fetch is stored as `not_ready` so a later call retries it.
    pub async fn get_non_fungible_token(
        &self,
        token_id: u64,
    ) -> Result<NonFungibleToken, NodeError> {
        if let Some(nft) = Repositories::new(&self.store)
            .nfts()
            .get_by_token_id(token_id)?
        {
            if nft.state == NftState::Ready {
                return Ok(nft);
            }
        }

        let token = self.get_token(token_id)?;
        let nft = match self.nft_storage.fetch_metadata(&token.metadata_uri).await {
            Ok(metadata) => NonFungibleToken {
                token_id,
                metadata_uri: token.metadata_uri,
                metadata: Some(metadata),
                state: NftState::Ready,
            },
            Err(e) => {
                warn!("Metadata for token {} is not available yet: {}", token_id, e);
                NonFungibleToken {
                    token_id,
                    metadata_uri: token.metadata_uri,
                    metadata: None,
                    state: NftState::NotReady,
                }
            }
        };

        let tx = self.store.open_transaction().await;
        let stored = Repositories::new(&tx).nfts().upsert(&nft);
        match stored {
            Ok(()) => tx.commit()?,
            Err(e) => {
                tx.discard();
                return Err(e.into());
            }
        }
        Ok(nft)
    }

    pub fn get_sync_status(&self) -> Result<SyncStatusReply, NodeError> {
        let status =
            KvBlockchainSyncStatusRepository::new(self.store.sync_status_keyspace()).get()?;
        let state = Repositories::new(&self.store)
            .blockchain_state()
            .get_by_chain_id(self.chain_id)?;
        Ok(SyncStatusReply {
            is_synching: status.is_synching,
            latest_hash: state.as_ref().map(|s| s.latest_hash.clone()),
            latest_block_number: state.map(|s| s.latest_block_number),
        })
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, NodeError> {
    Address::parse(value.trim()).map_err(|e| {
        NodeError::ValidationError(BTreeMap::from([(field.to_string(), e.to_string())]))
    })
}
