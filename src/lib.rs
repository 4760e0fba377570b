//! PRT inspector
//!
//! Facade over the workspace crates:
//! - [`prt_core`]: token decoding, decryption and HMAC verification
//! - [`prt_client`]: key material and domain list fetching
//! - [`prt_monitor`]: pipeline, per-tab statistics and the HTTP API

pub use prt_client;
pub use prt_core;
pub use prt_monitor;
