//! Typed request and reply messages for the local RPC surface.
//!
//! Each method has a flat argument struct and a flat reply struct. On the wire
//! a request is `{"method": "<Name>", "params": {...}}` and a successful reply
//! is `{"status": "success", "reply": {"method": "<Name>", "result": {...}}}`.

use crate::chain::{
    Account, BlockData, BlockTransaction, NonFungibleToken, SignedTransaction, Token, Wallet,
};
use crate::transaction::transfer::format_fields;
use crate::wallet::Credential;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Binds an argument struct to its reply type.
pub trait RpcMethod: Serialize + Into<RpcRequest> {
    type Reply: DeserializeOwned;
    const NAME: &'static str;

    /// Extract this method's reply, or `None` if `reply` belongs to another method.
    fn take_reply(reply: RpcReply) -> Option<Self::Reply>;
}

macro_rules! rpc_methods {
    ($($method:ident($args:ident) -> $reply:ident;)+) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "method", content = "params")]
        pub enum RpcRequest {
            $($method($args),)+
        }

        impl RpcRequest {
            pub fn method(&self) -> &'static str {
                match self {
                    $(RpcRequest::$method(_) => stringify!($method),)+
                }
            }
        }

        #[derive(Debug, Clone, Serialize, Deserialize)]
        #[serde(tag = "method", content = "result")]
        pub enum RpcReply {
            $($method($reply),)+
        }

        $(
            impl From<$args> for RpcRequest {
                fn from(args: $args) -> Self {
                    RpcRequest::$method(args)
                }
            }

            impl RpcMethod for $args {
                type Reply = $reply;
                const NAME: &'static str = stringify!($method);

                fn take_reply(reply: RpcReply) -> Option<$reply> {
                    match reply {
                        RpcReply::$method(reply) => Some(reply),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )+
    };
}

rpc_methods! {
    GetAccount(GetAccountArgs) -> AccountReply;
    CreateAccount(CreateAccountArgs) -> CreateAccountReply;
    AccountListingByLocalWallets(AccountListingByLocalWalletsArgs) -> AccountListReply;
    CoinTransfer(CoinTransferArgs) -> TransferReply;
    GetToken(GetTokenArgs) -> TokenReply;
    TokenTransfer(TokenTransferArgs) -> TransferReply;
    TokenBurn(TokenBurnArgs) -> TransferReply;
    ListBlockTransactionsByAddress(ListBlockTransactionsByAddressArgs) -> BlockTransactionListReply;
    GetBlockDataByHash(GetBlockDataByHashArgs) -> BlockDataReply;
    GetBlockDataByTransactionTimestamp(GetBlockDataByTransactionTimestampArgs) -> BlockDataReply;
    ListTokensByOwnerAddress(ListTokensByOwnerAddressArgs) -> TokenListReply;
    ExportWallet(ExportWalletArgs) -> WalletReply;
    ImportWallet(ImportWalletArgs) -> WalletReply;
    GetNonFungibleToken(GetNonFungibleTokenArgs) -> NonFungibleTokenReply;
    GetSyncStatus(GetSyncStatusArgs) -> SyncStatusReply;
}

/// Wallet credential as sent over the wire.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialArgs {
    Password {
        password: String,
    },
    Mnemonic {
        phrase: String,
        derivation_path: String,
    },
}

impl fmt::Debug for CredentialArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Credential::from(self.clone()), f)
    }
}

impl From<CredentialArgs> for Credential {
    fn from(args: CredentialArgs) -> Self {
        match args {
            CredentialArgs::Password { password } => Credential::Password(password),
            CredentialArgs::Mnemonic {
                phrase,
                derivation_path,
            } => Credential::Mnemonic {
                phrase,
                derivation_path,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAccountArgs {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountReply {
    pub account: Account,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CreateAccountArgs {
    pub password: String,
    #[serde(default)]
    pub label: String,
}

impl fmt::Debug for CreateAccountArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountArgs")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CreateAccountReply {
    pub address: String,
    /// Recovery phrase; shown once.
    pub mnemonic: String,
}

impl fmt::Debug for CreateAccountReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAccountReply")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountListingByLocalWalletsArgs {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountListReply {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinTransferArgs {
    pub from: String,
    pub to: String,
    pub value: u64,
    #[serde(default)]
    pub data: String,
    pub credential: CredentialArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReply {
    pub signed_transaction: SignedTransaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTokenArgs {
    pub token_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenReply {
    pub token: Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransferArgs {
    pub from: String,
    pub to: String,
    pub token_id: u64,
    #[serde(default)]
    pub data: String,
    pub credential: CredentialArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBurnArgs {
    pub from: String,
    pub token_id: u64,
    #[serde(default)]
    pub data: String,
    pub credential: CredentialArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBlockTransactionsByAddressArgs {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTransactionListReply {
    pub transactions: Vec<BlockTransaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockDataByHashArgs {
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockDataByTransactionTimestampArgs {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDataReply {
    pub block_data: BlockData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTokensByOwnerAddressArgs {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenListReply {
    pub tokens: Vec<Token>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportWalletArgs {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportWalletArgs {
    pub wallet: Wallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletReply {
    pub wallet: Wallet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNonFungibleTokenArgs {
    pub token_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonFungibleTokenReply {
    pub nft: NonFungibleToken,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetSyncStatusArgs {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusReply {
    pub is_synching: bool,
    pub latest_hash: Option<String>,
    pub latest_block_number: Option<u64>,
}

/// Category of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Bad input; `fields` says which.
    Validation,
    NotFound,
    AlreadyExists,
    BadCredential,
    /// The authority or NFT storage could not be reached; retry later.
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFault {
    pub kind: FaultKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl RpcFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn validation(fields: BTreeMap<String, String>) -> Self {
        Self {
            kind: FaultKind::Validation,
            message: format_fields(&fields),
            fields,
        }
    }
}

impl fmt::Display for RpcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Envelope written back for every request line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcResponse {
    Success { reply: RpcReply },
    Failure { fault: RpcFault },
}

impl From<Result<RpcReply, RpcFault>> for RpcResponse {
    fn from(result: Result<RpcReply, RpcFault>) -> Self {
        match result {
            Ok(reply) => RpcResponse::Success { reply },
            Err(fault) => RpcResponse::Failure { fault },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_format() {
        let request: RpcRequest = GetTokenArgs { token_id: 7 }.into();
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"method": "GetToken", "params": {"token_id": 7}})
        );
        assert_eq!(request.method(), GetTokenArgs::NAME);
    }

    #[test]
    fn empty_args_accept_empty_params() {
        let request: RpcRequest =
            serde_json::from_value(json!({"method": "GetSyncStatus", "params": {}})).unwrap();
        assert!(matches!(request, RpcRequest::GetSyncStatus(_)));
    }

    #[test]
    fn credential_wire_format() {
        let args: CredentialArgs =
            serde_json::from_value(json!({"type": "password", "password": "pw"})).unwrap();
        assert!(matches!(Credential::from(args.clone()), Credential::Password(p) if p == "pw"));
        assert!(!format!("{:?}", args).contains("pw"));
    }

    #[test]
    fn take_reply_rejects_other_methods() {
        let reply = RpcReply::GetSyncStatus(SyncStatusReply {
            is_synching: false,
            latest_hash: None,
            latest_block_number: None,
        });
        assert!(GetTokenArgs::take_reply(reply.clone()).is_none());
        assert!(GetSyncStatusArgs::take_reply(reply).is_some());
    }

    #[test]
    fn fault_envelope() {
        let response = RpcResponse::from(Err::<RpcReply, _>(RpcFault::validation(
            BTreeMap::from([("to".to_string(), "is required".to_string())]),
        )));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "failure");
        assert_eq!(value["fault"]["kind"], "validation");
        assert_eq!(value["fault"]["fields"]["to"], "is required");
    }
}
