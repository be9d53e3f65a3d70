//! Arbitrary-precision nonce stored as minimal big-endian bytes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Unsigned integer of arbitrary width used for account and token nonces.
///
/// The inner bytes are big-endian with leading zero bytes stripped, so the
/// zero nonce is the empty byte string and equal values always compare equal
/// byte-for-byte.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    pub fn zero() -> Self {
        Self(Vec::new())
    }

    /// Build a nonce from big-endian bytes, ignoring leading zeros.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        Self(bytes[first..].to_vec())
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_be_bytes(&value.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the value as `u128` when it fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0.len() > 16 {
            return None;
        }
        let mut buf = [0u8; 16];
        buf[16 - self.0.len()..].copy_from_slice(&self.0);
        Some(u128::from_be_bytes(buf))
    }

    /// Returns `self + 1`.
    pub fn next(&self) -> Self {
        let mut bytes = self.0.clone();
        for byte in bytes.iter_mut().rev() {
            if *byte == u8::MAX {
                *byte = 0;
            } else {
                *byte += 1;
                return Self(bytes);
            }
        }
        // every byte overflowed (or the value was zero)
        bytes.insert(0, 1);
        Self(bytes)
    }

    /// Lowercase hex with a `0x` prefix; zero renders as `0x0`.
    pub fn to_hex(&self) -> String {
        if self.0.is_empty() {
            return "0x0".to_string();
        }
        let encoded = hex::encode(&self.0);
        format!("0x{}", encoded.trim_start_matches('0'))
    }

    pub fn from_hex(value: &str) -> Result<Self, hex::FromHexError> {
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        if digits.is_empty() {
            return Ok(Self::zero());
        }
        let padded = if digits.len() % 2 == 1 {
            format!("0{}", digits)
        } else {
            digits.to_string()
        };
        Ok(Self::from_be_bytes(&hex::decode(padded)?))
    }
}

impl Ord for Nonce {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Nonce {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for Nonce {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u128() {
            Some(value) => write!(f, "{}", value),
            None => f.write_str(&self.to_hex()),
        }
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self)
    }
}

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Nonce::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
