/// Transaction builder for coin and token transactions
pub mod builder;
/// Mempool submission
pub mod sender;
/// Coin transfer, token transfer and token burn services
pub mod transfer;

pub use builder::{TransactionBuilder, TransactionError};
pub use sender::{MempoolSender, SendError};
pub use transfer::{CoinTransfer, TokenBurn, TokenTransfer, TransferError, TransferService};
