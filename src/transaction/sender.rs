//!
//! Transaction sender for the authority mempool.
//!
//! Checks a signed transaction locally before handing it to the authority, so
//! a malformed signature never reaches the network.

use crate::authority::{AuthorityClient, AuthorityError};
use crate::chain::SignedTransaction;
use crate::wallet::verify_transaction;
use std::sync::Arc;
use tracing::{debug, error, info};

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Transaction validation failed: {0}")]
    ValidationError(String),

    #[error("Authority rejected transaction: {0}")]
    AuthorityError(#[from] AuthorityError),
}

/// Submits signed transactions to the authority's mempool
pub struct MempoolSender<A: AuthorityClient> {
    authority: Arc<A>,
}

impl<A: AuthorityClient> Clone for MempoolSender<A> {
    fn clone(&self) -> Self {
        Self {
            authority: self.authority.clone(),
        }
    }
}

impl<A: AuthorityClient> MempoolSender<A> {
    pub fn new(authority: Arc<A>) -> Self {
        Self { authority }
    }

    /// Validates the signature, then submits the transaction
    pub async fn send_tx(&self, signed: &SignedTransaction) -> Result<(), SendError> {
        match verify_transaction(signed) {
            Ok(true) => debug!("Transaction {}/{} validated", signed.from, signed.nonce),
            Ok(false) => {
                error!("Refusing to submit transaction with invalid signature");
                return Err(SendError::ValidationError(
                    "signature does not verify".into(),
                ));
            }
            Err(e) => {
                error!("Transaction validation failed: {}", e);
                return Err(SendError::ValidationError(e.to_string()));
            }
        }

        self.authority.submit_mempool_transaction(signed).await?;
        info!(
            "Submitted transaction {}/{} to mempool",
            signed.from, signed.nonce
        );
        Ok(())
    }
}
