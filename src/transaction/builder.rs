//! Transaction builder
//!
//! This module provides a builder pattern for constructing unsigned
//! transactions. `build` validates the assembled fields and reports every
//! problem at once as a field → message map.

use crate::chain::{Address, ChainId, Nonce, Transaction, TransactionKind};
use crate::utils::now_millis;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction validation error: {0:?}")]
    ValidationError(BTreeMap<String, String>),
}

/// Builder for constructing coin and token transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    chain_id: Option<ChainId>,
    nonce: Option<Nonce>,
    from: Option<Address>,
    to: Option<Address>,
    value: u64,
    data: String,
    kind: TransactionKind,
    token_id: Option<u64>,
    token_metadata_uri: Option<String>,
    token_nonce: Option<Nonce>,
    timestamp: Option<i64>,
}

impl TransactionBuilder {
    /// Creates a builder for a coin transfer
    pub fn new() -> Self {
        Self {
            chain_id: None,
            nonce: None,
            from: None,
            to: None,
            value: 0,
            data: String::new(),
            kind: TransactionKind::Coin,
            token_id: None,
            token_metadata_uri: None,
            token_nonce: None,
            timestamp: None,
        }
    }

    pub fn with_chain_id(mut self, chain_id: ChainId) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Sets the sender's account nonce
    pub fn with_nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Turns this into a token transaction for `token_id` at `token_nonce`
    pub fn with_token(mut self, token_id: u64, token_nonce: Nonce) -> Self {
        self.kind = TransactionKind::Token;
        self.token_id = Some(token_id);
        self.token_nonce = Some(token_nonce);
        self
    }

    pub fn with_token_metadata_uri(mut self, uri: impl Into<String>) -> Self {
        self.token_metadata_uri = Some(uri.into());
        self
    }

    /// Sets the timestamp; defaults to now
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the final transaction
    pub fn build(self) -> Result<Transaction, TransactionError> {
        let mut errors = BTreeMap::new();

        if self.chain_id.is_none() {
            errors.insert("chain_id".to_string(), "is required".to_string());
        }
        match &self.nonce {
            None => {
                errors.insert("nonce".to_string(), "is required".to_string());
            }
            Some(nonce) if nonce.is_zero() => {
                errors.insert("nonce".to_string(), "must be greater than zero".to_string());
            }
            _ => {}
        }
        if self.from.is_none() {
            errors.insert("from".to_string(), "is required".to_string());
        }
        if self.to.is_none() {
            errors.insert("to".to_string(), "is required".to_string());
        }
        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            if from == to {
                errors.insert("to".to_string(), "must differ from sender".to_string());
            }
        }
        match self.kind {
            TransactionKind::Coin => {
                if self.value == 0 {
                    errors.insert("value".to_string(), "must be greater than zero".to_string());
                }
            }
            TransactionKind::Token => {
                if self.token_id.is_none() {
                    errors.insert("token_id".to_string(), "is required".to_string());
                }
            }
        }

        match (self.chain_id, self.nonce, self.from, self.to) {
            (Some(chain_id), Some(nonce), Some(from), Some(to)) if errors.is_empty() => {
                Ok(Transaction {
                    chain_id,
                    nonce,
                    from,
                    to,
                    value: self.value,
                    data: self.data,
                    kind: self.kind,
                    token_id: self.token_id,
                    token_metadata_uri: self.token_metadata_uri,
                    token_nonce: self.token_nonce,
                    timestamp: self.timestamp.unwrap_or_else(now_millis),
                })
            }
            _ => Err(TransactionError::ValidationError(errors)),
        }
    }
}

impl Default for TransactionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
