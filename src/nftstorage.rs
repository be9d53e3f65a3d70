//! Client for the NFT metadata storage gateway.

use crate::chain::NftMetadata;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum NftStorageError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unexpected status {status} fetching {url}")]
    StatusError { status: StatusCode, url: String },

    #[error("Unsupported metadata URI: {0}")]
    UriError(String),
}

/// Fetches token metadata JSON by URI.
#[derive(Clone)]
pub struct NftStorageClient {
    client: Client,
    base_url: String,
}

impl NftStorageClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, NftStorageError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Map a metadata URI to a fetchable URL.
    ///
    /// `ipfs://<cid>` goes through the gateway; `http(s)://` is used as is.
    pub fn resolve(&self, uri: &str) -> Result<String, NftStorageError> {
        if let Some(cid) = uri.strip_prefix("ipfs://") {
            let cid = cid.trim_start_matches("ipfs/").trim_start_matches('/');
            if cid.is_empty() {
                return Err(NftStorageError::UriError(uri.to_string()));
            }
            return Ok(format!("{}/ipfs/{}", self.base_url, cid));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Ok(uri.to_string());
        }
        Err(NftStorageError::UriError(uri.to_string()))
    }

    pub async fn fetch_metadata(&self, uri: &str) -> Result<NftMetadata, NftStorageError> {
        let url = self.resolve(uri)?;
        debug!("Fetching NFT metadata from {}", url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NftStorageError::StatusError { status, url });
        }
        Ok(response.json::<NftMetadata>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> NftStorageClient {
        NftStorageClient::new("http://gateway:8080/", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn resolves_ipfs_uris_through_gateway() {
        assert_eq!(
            client().resolve("ipfs://bafy123/meta.json").unwrap(),
            "http://gateway:8080/ipfs/bafy123/meta.json"
        );
        assert_eq!(
            client().resolve("ipfs://ipfs/bafy123").unwrap(),
            "http://gateway:8080/ipfs/bafy123"
        );
    }

    #[test]
    fn passes_http_uris_through() {
        assert_eq!(
            client().resolve("https://example.org/1.json").unwrap(),
            "https://example.org/1.json"
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(matches!(
            client().resolve("ar://abc"),
            Err(NftStorageError::UriError(_))
        ));
        assert!(client().resolve("ipfs://").is_err());
    }
}
