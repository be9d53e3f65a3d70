//! Chain domain types shared by storage, sync, transfers and RPC.

mod address;
mod nonce;
mod types;

pub use address::{Address, AddressError};
pub use nonce::Nonce;
pub use types::*;
