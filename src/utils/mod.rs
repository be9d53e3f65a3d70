//!
//! Utility module for the node.
//!
//! Timestamp helpers shared by services and the CLI.
/// Timestamp helpers
pub mod time;

pub use time::{format_timestamp, now_millis};
