//! Local wallets: key derivation, sealing at rest, signing, and the service
//! that stores wallets alongside their accounts.

/// Key derivation, sealing and signing
pub mod keystore;
/// Wallet creation, export and import
mod service;

pub use keystore::{Credential, KeystoreError, UnlockedKey, unlock, verify_transaction};
pub use service::{CreatedWallet, WalletError, WalletService};
