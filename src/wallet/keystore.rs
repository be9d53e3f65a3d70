//! Key derivation, sealing and signing for local wallets.
//!
//! A wallet's secret key is derived from a BIP-39 mnemonic seed with
//! HKDF-SHA256, using the derivation path as the expansion info. At rest the
//! key is sealed with AES-256-GCM under a key stretched from the password and
//! a random salt.

use crate::chain::{Address, AddressError, SignedTransaction, Transaction, Wallet};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce as CipherNonce};
use bip39::Mnemonic;
use hkdf::Hkdf;
use rand::RngCore;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

pub const SALT_LENGTH: usize = 16;
pub const CIPHER_NONCE_LENGTH: usize = 12;
/// 16 bytes of entropy give a 12-word mnemonic.
const ENTROPY_LENGTH: usize = 16;
const PASSWORD_KEY_INFO: &[u8] = b"chain-state-sync/wallet-key";

#[derive(Debug, thiserror::Error)]
pub enum KeystoreError {
    #[error("Invalid mnemonic: {0}")]
    MnemonicError(#[from] bip39::Error),

    #[error("Invalid key material: {0}")]
    KeyError(#[from] secp256k1::Error),

    #[error("Invalid hex: {0}")]
    HexError(#[from] hex::FromHexError),

    #[error("Invalid address: {0}")]
    AddressError(#[from] AddressError),

    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Key derivation failed: {0}")]
    DerivationError(String),

    #[error("Cipher error: {0}")]
    CipherError(String),

    /// The password or mnemonic does not open this wallet.
    #[error("Bad credential: {0}")]
    CredentialError(String),
}

impl KeystoreError {
    pub fn is_bad_credential(&self) -> bool {
        matches!(
            self,
            KeystoreError::CredentialError(_) | KeystoreError::MnemonicError(_)
        )
    }
}

/// What a caller presents to unlock a wallet.
#[derive(Clone)]
pub enum Credential {
    Password(String),
    Mnemonic {
        phrase: String,
        derivation_path: String,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Credential::Password(..)"),
            Credential::Mnemonic { derivation_path, .. } => {
                write!(f, "Credential::Mnemonic {{ derivation_path: {:?}, .. }}", derivation_path)
            }
        }
    }
}

/// A secret key in memory, ready to sign.
pub struct UnlockedKey {
    secret: SecretKey,
    public: PublicKey,
    address: Address,
}

impl UnlockedKey {
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeystoreError> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes)?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        let address = address_of(&public);
        Ok(Self {
            secret,
            public,
            address,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Compressed public key, hex encoded.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.secret_bytes())
    }

    pub fn sign_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<SignedTransaction, KeystoreError> {
        let digest = transaction_digest(&transaction)?;
        let secp = Secp256k1::new();
        let signature = secp.sign_ecdsa(&Message::from_digest(digest), &self.secret);
        Ok(SignedTransaction {
            transaction,
            public_key: self.public_key_hex(),
            signature: hex::encode(signature.serialize_compact()),
        })
    }
}

/// SHA-256 over the canonical JSON encoding of a transaction.
pub fn transaction_digest(transaction: &Transaction) -> Result<[u8; 32], KeystoreError> {
    let encoded = serde_json::to_vec(transaction)?;
    Ok(Sha256::digest(&encoded).into())
}

/// Check a signed transaction's signature and that the key matches `from`.
pub fn verify_transaction(signed: &SignedTransaction) -> Result<bool, KeystoreError> {
    let public = PublicKey::from_slice(&hex::decode(&signed.public_key)?)?;
    if address_of(&public) != signed.from {
        return Ok(false);
    }
    let signature = Signature::from_compact(&hex::decode(&signed.signature)?)?;
    let digest = transaction_digest(&signed.transaction)?;
    let secp = Secp256k1::verification_only();
    Ok(secp
        .verify_ecdsa(&Message::from_digest(digest), &signature, &public)
        .is_ok())
}

/// `0x` + last 20 bytes of SHA-256 over the uncompressed public key.
pub fn address_of(public: &PublicKey) -> Address {
    let hash = Sha256::digest(public.serialize_uncompressed());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(&bytes)
}

pub fn generate_mnemonic() -> Result<Zeroizing<String>, KeystoreError> {
    let mut entropy = Zeroizing::new([0u8; ENTROPY_LENGTH]);
    rand::thread_rng().fill_bytes(&mut entropy[..]);
    let mnemonic = Mnemonic::from_entropy(&entropy[..])?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Derive the signing key for `derivation_path` from a mnemonic phrase.
pub fn derive_key(phrase: &str, derivation_path: &str) -> Result<UnlockedKey, KeystoreError> {
    let mnemonic = Mnemonic::parse_normalized(phrase)?;
    let seed = Zeroizing::new(mnemonic.to_seed(""));
    let hk = Hkdf::<Sha256>::new(None, &seed[..]);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(derivation_path.as_bytes(), &mut okm[..])
        .map_err(|e| KeystoreError::DerivationError(e.to_string()))?;
    UnlockedKey::from_secret_bytes(&okm[..])
}

fn password_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, KeystoreError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), password.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(PASSWORD_KEY_INFO, &mut key[..])
        .map_err(|e| KeystoreError::DerivationError(e.to_string()))?;
    Ok(key)
}

/// Seal `key` under `password` into a storable wallet record.
pub fn seal(
    key: &UnlockedKey,
    password: &str,
    label: &str,
    derivation_path: &str,
    created_at: i64,
) -> Result<Wallet, KeystoreError> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; CIPHER_NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher_key = password_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&cipher_key[..])
        .map_err(|e| KeystoreError::CipherError(e.to_string()))?;
    let secret = key.secret_bytes();
    let ciphertext = cipher
        .encrypt(CipherNonce::from_slice(&nonce), &secret[..])
        .map_err(|e| KeystoreError::CipherError(e.to_string()))?;

    Ok(Wallet {
        address: key.address().clone(),
        label: label.to_string(),
        derivation_path: derivation_path.to_string(),
        salt: hex::encode(salt),
        cipher_nonce: hex::encode(nonce),
        encrypted_secret_key: hex::encode(ciphertext),
        created_at,
    })
}

/// Check that a wallet record is structurally usable without opening it.
pub fn validate_sealed(wallet: &Wallet) -> Result<(), KeystoreError> {
    if hex::decode(&wallet.salt)?.len() != SALT_LENGTH {
        return Err(KeystoreError::CipherError("salt has wrong length".into()));
    }
    if hex::decode(&wallet.cipher_nonce)?.len() != CIPHER_NONCE_LENGTH {
        return Err(KeystoreError::CipherError("cipher nonce has wrong length".into()));
    }
    if hex::decode(&wallet.encrypted_secret_key)?.is_empty() {
        return Err(KeystoreError::CipherError("encrypted secret key is empty".into()));
    }
    Ok(())
}

/// Open a wallet with a password or its mnemonic.
pub fn unlock(wallet: &Wallet, credential: &Credential) -> Result<UnlockedKey, KeystoreError> {
    let key = match credential {
        Credential::Password(password) => {
            let salt = hex::decode(&wallet.salt)?;
            let nonce = hex::decode(&wallet.cipher_nonce)?;
            if nonce.len() != CIPHER_NONCE_LENGTH {
                return Err(KeystoreError::CipherError("cipher nonce has wrong length".into()));
            }
            let ciphertext = hex::decode(&wallet.encrypted_secret_key)?;
            let cipher_key = password_key(password, &salt)?;
            let cipher = Aes256Gcm::new_from_slice(&cipher_key[..])
                .map_err(|e| KeystoreError::CipherError(e.to_string()))?;
            let secret = Zeroizing::new(
                cipher
                    .decrypt(CipherNonce::from_slice(&nonce), ciphertext.as_slice())
                    .map_err(|_| KeystoreError::CredentialError("wrong password".into()))?,
            );
            UnlockedKey::from_secret_bytes(&secret)?
        }
        Credential::Mnemonic {
            phrase,
            derivation_path,
        } => derive_key(phrase, derivation_path)?,
    };

    if key.address() != &wallet.address {
        debug!("Unlocked key {} does not match wallet {}", key.address(), wallet.address);
        return Err(KeystoreError::CredentialError(format!(
            "credential does not open wallet {}",
            wallet.address
        )));
    }
    Ok(key)
}
