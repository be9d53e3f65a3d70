use super::keystore::{self, KeystoreError};
use crate::chain::{Account, Address, ChainId, Wallet};
use crate::config::DEFAULT_DERIVATION_PATH;
use crate::storage::{AccountRepository, Repositories, Store, StoreError, WalletRepository};
use crate::utils::now_millis;
use std::collections::BTreeMap;
use tracing::info;
use zeroize::Zeroizing;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Keystore error: {0}")]
    KeystoreError(#[from] KeystoreError),

    #[error("Validation error: {0:?}")]
    ValidationError(BTreeMap<String, String>),

    #[error("Wallet not found: {0}")]
    NotFoundError(String),

    #[error("Wallet already exists: {0}")]
    AlreadyExistsError(String),
}

/// A freshly created wallet and the mnemonic that recovers it.
pub struct CreatedWallet {
    pub wallet: Wallet,
    pub mnemonic: Zeroizing<String>,
}

/// Local wallet management: creation, export, import and listing.
#[derive(Clone)]
pub struct WalletService {
    store: Store,
    chain_id: ChainId,
}

impl WalletService {
    pub fn new(store: Store, chain_id: ChainId) -> Self {
        Self { store, chain_id }
    }

    /// Create a wallet sealed under `password` plus its zero-balance account.
    pub async fn create(&self, password: &str, label: &str) -> Result<CreatedWallet, WalletError> {
        if password.is_empty() {
            return Err(validation("password", "must not be empty"));
        }

        let mnemonic = keystore::generate_mnemonic()?;
        let key = keystore::derive_key(&mnemonic, DEFAULT_DERIVATION_PATH)?;
        let wallet = keystore::seal(&key, password, label, DEFAULT_DERIVATION_PATH, now_millis())?;

        self.store_wallet(&wallet).await?;
        info!("Created wallet {}", wallet.address);
        Ok(CreatedWallet { wallet, mnemonic })
    }

    /// The stored (still encrypted) wallet record.
    pub fn export(&self, address: &Address) -> Result<Wallet, WalletError> {
        Repositories::new(&self.store)
            .wallets()
            .get_by_address(address)?
            .ok_or_else(|| WalletError::NotFoundError(address.to_string()))
    }

    pub async fn import(&self, wallet: Wallet) -> Result<Wallet, WalletError> {
        keystore::validate_sealed(&wallet)
            .map_err(|e| validation("wallet", &e.to_string()))?;
        if wallet.derivation_path.is_empty() {
            return Err(validation("derivation_path", "must not be empty"));
        }

        self.store_wallet(&wallet).await?;
        info!("Imported wallet {}", wallet.address);
        Ok(wallet)
    }

    pub fn list(&self) -> Result<Vec<Wallet>, WalletError> {
        Ok(Repositories::new(&self.store).wallets().list_all()?)
    }

    /// Accounts of every local wallet; wallets not yet seen on chain get a
    /// zero account.
    pub fn list_accounts(&self) -> Result<Vec<Account>, WalletError> {
        let repos = Repositories::new(&self.store);
        let accounts = repos.accounts();
        repos
            .wallets()
            .list_all()?
            .into_iter()
            .map(|wallet| -> Result<Account, WalletError> {
                Ok(accounts
                    .get_by_address(&wallet.address)?
                    .unwrap_or_else(|| Account::empty(self.chain_id, wallet.address)))
            })
            .collect()
    }

    async fn store_wallet(&self, wallet: &Wallet) -> Result<(), WalletError> {
        let tx = self.store.open_transaction().await;
        let result = (|| {
            let repos = Repositories::new(&tx);
            repos.wallets().insert(wallet).map_err(|e| match e {
                StoreError::AlreadyExists(key) => WalletError::AlreadyExistsError(key),
                other => other.into(),
            })?;
            let accounts = repos.accounts();
            if accounts.get_by_address(&wallet.address)?.is_none() {
                accounts.upsert(&Account::empty(self.chain_id, wallet.address.clone()))?;
            }
            Ok::<(), WalletError>(())
        })();

        match result {
            Ok(()) => Ok(tx.commit()?),
            Err(e) => {
                tx.discard();
                Err(e)
            }
        }
    }
}

pub(crate) fn validation(field: &str, message: &str) -> WalletError {
    WalletError::ValidationError(BTreeMap::from([(field.to_string(), message.to_string())]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{Credential, unlock};

    fn service() -> WalletService {
        WalletService::new(Store::open_temporary().unwrap(), 1)
    }

    #[tokio::test]
    async fn create_stores_wallet_and_zero_account() {
        let service = service();
        let created = service.create("pw", "main").await.unwrap();
        let address = created.wallet.address.clone();

        assert_eq!(service.list().unwrap().len(), 1);
        let accounts = service.list_accounts().unwrap();
        assert_eq!(accounts, vec![Account::empty(1, address.clone())]);

        let exported = service.export(&address).unwrap();
        let key = unlock(&exported, &Credential::Password("pw".into())).unwrap();
        assert_eq!(key.address(), &address);
    }

    #[tokio::test]
    async fn import_rejects_duplicates() {
        let source = service();
        let created = source.create("pw", "main").await.unwrap();

        let target = service();
        target.import(created.wallet.clone()).await.unwrap();
        let err = target.import(created.wallet).await.err().unwrap();
        assert!(matches!(err, WalletError::AlreadyExistsError(_)));
        assert_eq!(target.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn import_rejects_malformed_records() {
        let service = service();
        let mut wallet = service.create("pw", "main").await.unwrap().wallet;
        wallet.salt = "zz".into();
        let err = service.import(wallet).await.err().unwrap();
        assert!(matches!(err, WalletError::ValidationError(_)));
    }

    #[tokio::test]
    async fn empty_password_is_a_validation_error() {
        let err = service().create("", "main").await.err().unwrap();
        match err {
            WalletError::ValidationError(fields) => assert!(fields.contains_key("password")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn export_of_unknown_wallet_is_not_found() {
        let err = service()
            .export(&Address::from_bytes(&[1; 20]))
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::NotFoundError(_)));
    }
}
