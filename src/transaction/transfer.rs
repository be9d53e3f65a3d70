//! Coin transfer, token transfer and token burn.
//!
//! Every transfer runs inside one store transaction: the sender's nonce is
//! read, the transaction is signed and recorded as pending, and only then
//! submitted. A failed submission discards the transaction, so no orphaned
//! pending record survives. The store's writer lock is what keeps two
//! concurrent transfers from reserving the same nonce.

use super::builder::{TransactionBuilder, TransactionError};
use super::sender::{MempoolSender, SendError};
use crate::authority::{AuthorityClient, AuthorityError};
use crate::chain::{
    Account, Address, ChainId, Nonce, PendingSignedTransaction, SignedTransaction,
    TransactionKind,
};
use crate::storage::{
    AccountRepository, PendingSignedTransactionRepository, Repositories, Store, StoreError,
    TokenRepository, Transaction, WalletRepository,
};
use crate::utils::now_millis;
use crate::wallet::{Credential, KeystoreError, unlock};
use itertools::Itertools;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Bad input; never retried.
    #[error("Validation failed: {}", format_fields(.0))]
    ValidationError(BTreeMap<String, String>),

    #[error("Bad credential: {0}")]
    BadCredentialError(String),

    /// The authority could not be reached or refused the submission; retryable.
    #[error("Submission failed: {0}")]
    SubmissionError(#[from] AuthorityError),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Signing failed: {0}")]
    SigningError(String),
}

impl TransferError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::SubmissionError(_))
    }
}

impl From<TransactionError> for TransferError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::ValidationError(fields) => TransferError::ValidationError(fields),
        }
    }
}

impl From<KeystoreError> for TransferError {
    fn from(e: KeystoreError) -> Self {
        if e.is_bad_credential() {
            TransferError::BadCredentialError(e.to_string())
        } else {
            TransferError::SigningError(e.to_string())
        }
    }
}

impl From<SendError> for TransferError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::ValidationError(message) => TransferError::SigningError(message),
            SendError::AuthorityError(e) => TransferError::SubmissionError(e),
        }
    }
}

pub(crate) fn format_fields(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(field, message)| format!("{}: {}", field, message))
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinTransfer {
    pub from: String,
    pub to: String,
    pub value: u64,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: String,
    pub to: String,
    pub token_id: u64,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBurn {
    pub from: String,
    pub token_id: u64,
    pub data: String,
}

/// A validated transfer before nonces are resolved.
struct Draft {
    from: Address,
    to: Address,
    value: u64,
    data: String,
    token_id: Option<u64>,
}

pub struct TransferService<A: AuthorityClient> {
    store: Store,
    sender: MempoolSender<A>,
    chain_id: ChainId,
}

impl<A: AuthorityClient> TransferService<A> {
    pub fn new(store: Store, authority: Arc<A>, chain_id: ChainId) -> Self {
        Self {
            store,
            sender: MempoolSender::new(authority),
            chain_id,
        }
    }

    pub async fn coin_transfer(
        &self,
        request: CoinTransfer,
        credential: &Credential,
    ) -> Result<SignedTransaction, TransferError> {
        let mut errors = BTreeMap::new();
        let from = parse_field(&mut errors, "from", &request.from);
        let to = parse_field(&mut errors, "to", &request.to);
        if request.value == 0 {
            errors.insert("value".to_string(), "must be greater than zero".to_string());
        }
        let (Some(from), Some(to)) = (from, to) else {
            return Err(TransferError::ValidationError(errors));
        };
        if !errors.is_empty() {
            return Err(TransferError::ValidationError(errors));
        }

        self.execute(
            Draft {
                from,
                to,
                value: request.value,
                data: request.data,
                token_id: None,
            },
            credential,
        )
        .await
    }

    pub async fn token_transfer(
        &self,
        request: TokenTransfer,
        credential: &Credential,
    ) -> Result<SignedTransaction, TransferError> {
        let mut errors = BTreeMap::new();
        let from = parse_field(&mut errors, "from", &request.from);
        let to = parse_field(&mut errors, "to", &request.to);
        if let Some(to) = &to {
            if to.is_zero() {
                errors.insert(
                    "to".to_string(),
                    "use a token burn to send to the burn address".to_string(),
                );
            }
        }
        let (Some(from), Some(to)) = (from, to) else {
            return Err(TransferError::ValidationError(errors));
        };
        if !errors.is_empty() {
            return Err(TransferError::ValidationError(errors));
        }

        self.execute(
            Draft {
                from,
                to,
                value: 0,
                data: request.data,
                token_id: Some(request.token_id),
            },
            credential,
        )
        .await
    }

    /// Send the token to the burn address.
    pub async fn token_burn(
        &self,
        request: TokenBurn,
        credential: &Credential,
    ) -> Result<SignedTransaction, TransferError> {
        let mut errors = BTreeMap::new();
        let Some(from) = parse_field(&mut errors, "from", &request.from) else {
            return Err(TransferError::ValidationError(errors));
        };

        self.execute(
            Draft {
                from,
                to: Address::zero(),
                value: 0,
                data: request.data,
                token_id: Some(request.token_id),
            },
            credential,
        )
        .await
    }

    async fn execute(
        &self,
        draft: Draft,
        credential: &Credential,
    ) -> Result<SignedTransaction, TransferError> {
        let tx = self.store.open_transaction().await;
        match self.sign_and_submit(&tx, draft, credential).await {
            Ok(signed) => {
                tx.commit()?;
                info!(
                    "Transfer {}/{} committed as pending",
                    signed.from, signed.nonce
                );
                Ok(signed)
            }
            Err(e) => {
                warn!("Transfer failed, discarding: {}", e);
                tx.discard();
                Err(e)
            }
        }
    }

    async fn sign_and_submit(
        &self,
        tx: &Transaction,
        draft: Draft,
        credential: &Credential,
    ) -> Result<SignedTransaction, TransferError> {
        let repos = Repositories::new(tx);

        let wallet = repos
            .wallets()
            .get_by_address(&draft.from)?
            .ok_or_else(|| TransferError::NotFoundError(format!("wallet {}", draft.from)))?;
        let account = repos
            .accounts()
            .get_by_address(&draft.from)?
            .unwrap_or_else(|| Account::empty(self.chain_id, draft.from.clone()));
        let pending = repos.pending().list_by_sender(&draft.from)?;

        let nonce = pending
            .iter()
            .map(|p| p.nonce())
            .chain(std::iter::once(&account.nonce))
            .max()
            .map(Nonce::next)
            .unwrap_or_else(|| Nonce::from_u64(1));

        let mut builder = TransactionBuilder::new()
            .with_chain_id(self.chain_id)
            .with_nonce(nonce)
            .with_from(draft.from.clone())
            .with_to(draft.to.clone())
            .with_value(draft.value)
            .with_data(draft.data);

        match draft.token_id {
            None => {
                let outgoing = pending
                    .iter()
                    .filter(|p| p.signed_transaction.kind == TransactionKind::Coin)
                    .try_fold(draft.value, |total, p| {
                        total.checked_add(p.signed_transaction.value)
                    });
                match outgoing {
                    Some(total) if total <= account.balance => {}
                    _ => {
                        return Err(TransferError::ValidationError(BTreeMap::from([(
                            "value".to_string(),
                            format!(
                                "insufficient balance: {} available, {} requested including pending",
                                account.balance,
                                outgoing.map_or_else(|| "overflow".to_string(), |t| t.to_string())
                            ),
                        )])));
                    }
                }
            }
            Some(token_id) => {
                let token = repos
                    .tokens()
                    .get_by_id(token_id)?
                    .ok_or_else(|| TransferError::NotFoundError(format!("token {}", token_id)))?;
                if token.owner != draft.from {
                    return Err(TransferError::ValidationError(BTreeMap::from([(
                        "token_id".to_string(),
                        format!("token {} is not owned by {}", token_id, draft.from),
                    )])));
                }
                let token_nonce = pending
                    .iter()
                    .filter(|p| p.signed_transaction.token_id == Some(token_id))
                    .filter_map(|p| p.signed_transaction.token_nonce.as_ref())
                    .chain(std::iter::once(&token.nonce))
                    .max()
                    .map(Nonce::next)
                    .unwrap_or_else(|| token.nonce.next());
                builder = builder
                    .with_token(token_id, token_nonce)
                    .with_token_metadata_uri(token.metadata_uri);
            }
        }

        let key = unlock(&wallet, credential)?;
        let transaction = builder.build()?;
        let signed = key.sign_transaction(transaction)?;

        repos.pending().upsert(&PendingSignedTransaction {
            signed_transaction: signed.clone(),
            submitted_at: now_millis(),
        })?;

        self.sender.send_tx(&signed).await?;
        Ok(signed)
    }
}

fn parse_field(errors: &mut BTreeMap<String, String>, field: &str, value: &str) -> Option<Address> {
    if value.trim().is_empty() {
        errors.insert(field.to_string(), "is required".to_string());
        return None;
    }
    match Address::parse(value.trim()) {
        Ok(address) => Some(address),
        Err(e) => {
            errors.insert(field.to_string(), e.to_string());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_render_every_field() {
        let err = TransferError::ValidationError(BTreeMap::from([
            ("from".to_string(), "is required".to_string()),
            ("value".to_string(), "must be greater than zero".to_string()),
        ]));
        assert_eq!(
            err.to_string(),
            "Validation failed: from: is required, value: must be greater than zero"
        );
    }

    #[test]
    fn only_submission_failures_are_retryable() {
        assert!(TransferError::SubmissionError(AuthorityError::GatewayTimeout).is_retryable());
        assert!(!TransferError::BadCredentialError("x".into()).is_retryable());
    }

    #[test]
    fn parse_field_records_problems() {
        let mut errors = BTreeMap::new();
        assert!(parse_field(&mut errors, "to", "").is_none());
        assert!(parse_field(&mut errors, "from", "0x12").is_none());
        assert!(parse_field(&mut errors, "other", &format!("0x{}", "ab".repeat(20))).is_some());
        assert_eq!(errors.len(), 2);
    }
}
