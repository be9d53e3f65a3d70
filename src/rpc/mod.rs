//! Local RPC surface
//!
//! Newline-delimited JSON over TCP. Requests and replies are statically typed
//! enums, one variant per method; see [`messages`].

/// Client side
mod client;
/// Typed request/reply messages
pub mod messages;
/// TCP server
mod server;

pub use client::RpcClient;
pub use messages::{FaultKind, RpcFault, RpcMethod, RpcReply, RpcRequest, RpcResponse};
pub use server::{RpcServer, bind};

#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The daemon answered with a fault.
    #[error("{0}")]
    FaultError(RpcFault),

    #[error("Reply did not match method {0}")]
    UnexpectedReplyError(String),

    #[error("Connection closed by daemon")]
    ConnectionClosedError,
}
