//!
//! HTTP client for the remote chain authority.
//!
//! The authority serves genesis data, chain state snapshots and block data as
//! JSON, accepts signed transactions into its mempool, and pushes "latest hash
//! changed" notifications over a server-sent-events stream. All methods are
//! async and designed for use with Tokio.

use super::sse::SseDecoder;
use super::types::AuthorityError;
use crate::chain::{BlockData, BlockchainState, ChainId, GenesisBlockData, SignedTransaction};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stream of latest block hashes announced by the authority.
pub type HashStream = Pin<Box<dyn Stream<Item = Result<String, AuthorityError>> + Send>>;

/// Operations the node needs from the authority.
#[async_trait::async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn get_genesis_block_data(
        &self,
        chain_id: ChainId,
    ) -> Result<GenesisBlockData, AuthorityError>;

    async fn get_blockchain_state(&self, chain_id: ChainId)
    -> Result<BlockchainState, AuthorityError>;

    async fn get_block_data(&self, hash: &str) -> Result<BlockData, AuthorityError>;

    /// Open the state change feed.
    ///
    /// The stream ends when `cancel` fires or the connection drops; callers
    /// are expected to resubscribe rather than treat the end as completion.
    async fn subscribe_to_blockchain_state_changes(
        &self,
        chain_id: ChainId,
        cancel: CancellationToken,
    ) -> Result<HashStream, AuthorityError>;

    async fn submit_mempool_transaction(
        &self,
        transaction: &SignedTransaction,
    ) -> Result<(), AuthorityError>;
}

/// reqwest-based authority client
#[derive(Clone)]
pub struct HttpAuthorityClient {
    /// Client for one-shot requests, bounded by the request timeout.
    http_client: Client,
    /// Client for the long-lived event stream; no request timeout.
    stream_client: Client,
    /// Base URL of the authority; request paths are appended as segments.
    base_url: Url,
}

impl HttpAuthorityClient {
    /// Create a new authority client.
    ///
    /// # Arguments
    /// * `base_url` - Authority address, e.g. `http://127.0.0.1:8000`.
    /// * `request_timeout` - Timeout applied to every one-shot request.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, AuthorityError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| AuthorityError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(AuthorityError::InvalidUrl(base_url.to_string()));
        }
        let http_client = Client::builder().timeout(request_timeout).build()?;
        let stream_client = Client::builder().build()?;

        Ok(Self {
            http_client,
            stream_client,
            base_url: parsed,
        })
    }

    /// Base URL extended by `segments`, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, AuthorityError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AuthorityError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &[&str],
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, AuthorityError> {
        let url = self.url(path)?;
        debug!("GET {}", url);
        let response = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await?;
        let response = check_status(response, what).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Map non-success responses onto the error taxonomy.
async fn check_status(response: Response, what: &str) -> Result<Response, AuthorityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::GATEWAY_TIMEOUT => Err(AuthorityError::GatewayTimeout),
        StatusCode::NOT_FOUND => Err(AuthorityError::NotFound(what.to_string())),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(AuthorityError::StatusError { status, body })
        }
    }
}

#[async_trait::async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn get_genesis_block_data(
        &self,
        chain_id: ChainId,
    ) -> Result<GenesisBlockData, AuthorityError> {
        self.get_json(
            &["api", "v1", "genesis"],
            &[("chain_id", chain_id.to_string())],
            &format!("genesis for chain {}", chain_id),
        )
        .await
    }

    async fn get_blockchain_state(
        &self,
        chain_id: ChainId,
    ) -> Result<BlockchainState, AuthorityError> {
        self.get_json(
            &["api", "v1", "blockchain-state"],
            &[("chain_id", chain_id.to_string())],
            &format!("blockchain state for chain {}", chain_id),
        )
        .await
    }

    async fn get_block_data(&self, hash: &str) -> Result<BlockData, AuthorityError> {
        self.get_json(
            &["api", "v1", "block-data", hash],
            &[],
            &format!("block {}", hash),
        )
        .await
    }

    async fn subscribe_to_blockchain_state_changes(
        &self,
        chain_id: ChainId,
        cancel: CancellationToken,
    ) -> Result<HashStream, AuthorityError> {
        debug!("Subscribing to blockchain state changes for chain {}", chain_id);

        let response = self
            .stream_client
            .post(self.url(&["api", "v1", "blockchain-state", "sse"])?)
            .query(&[("chain_id", chain_id.to_string())])
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response, "blockchain state stream").await?;
        info!("Subscribed to blockchain state changes for chain {}", chain_id);

        let body = Box::pin(response.bytes_stream());
        let stream = futures_util::stream::unfold(
            Some((body, SseDecoder::new(), cancel)),
            |state| async move {
                let (mut body, mut decoder, cancel) = state?;
                loop {
                    if let Some(payload) = decoder.next_payload() {
                        let hash = payload.trim().to_string();
                        return Some((Ok(hash), Some((body, decoder, cancel))));
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("State change stream cancelled");
                            return None;
                        }
                        chunk = body.next() => match chunk {
                            Some(Ok(bytes)) => decoder.push(&bytes),
                            Some(Err(e)) => {
                                warn!("State change stream failed: {}", e);
                                // yield the error once, then end the stream
                                return Some((Err(AuthorityError::StreamError(e.to_string())), None));
                            }
                            None => {
                                debug!("State change stream closed by authority");
                                return None;
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn submit_mempool_transaction(
        &self,
        transaction: &SignedTransaction,
    ) -> Result<(), AuthorityError> {
        let response = self
            .http_client
            .post(self.url(&["api", "v1", "mempool-transactions"])?)
            .json(transaction)
            .send()
            .await?;
        check_status(response, "mempool").await?;
        info!(
            "Submitted transaction from {} with nonce {}",
            transaction.from, transaction.nonce
        );
        Ok(())
    }
}
