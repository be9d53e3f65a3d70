//! Authority integration module
//!
//! This module provides the client and types for talking to the remote
//! authority that holds the canonical chain: one-shot JSON fetches, mempool
//! submission and the server-sent-events feed of tip changes.

/// HTTP client and the client trait
mod client;
/// Server-sent-events frame decoding
mod sse;
/// Error types for authority operations
mod types;

pub use client::{AuthorityClient, HashStream, HttpAuthorityClient};
pub use sse::SseDecoder;
pub use types::*;
