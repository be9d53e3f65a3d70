//! Lightweight full node that replicates an authority-run chain.
//!
//! The node fetches genesis, follows the authority's push feed of tip changes,
//! applies new blocks to a local sled store inside one transaction per pass,
//! and serves queries and signed transfers over a local RPC socket.

pub mod authority;
pub mod chain;
pub mod config;
pub mod nftstorage;
pub mod node;
pub mod rpc;
pub mod storage;
pub mod sync;
pub mod transaction;
pub mod utils;
pub mod wallet;
