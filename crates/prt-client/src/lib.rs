//! prt-client: network collaborators of the PRT pipeline
//!
//! - Key material: per-epoch `{epochIdBase64}.json` documents fetched over
//!   HTTP, cached with one in-flight fetch per epoch and a per-fetch timeout
//! - Domain list: script-blocking classification table, refreshed in the
//!   background and swapped in atomically
//!
//! Both degrade gracefully: a failed key fetch fails only the tokens of that
//! epoch, and a missing domain list only disables classification.

pub mod domain_list;
pub mod error;
pub mod key_cache;
pub mod key_provider;

pub use domain_list::DomainClassifier;
pub use error::ClientError;
pub use key_cache::CachingKeyProvider;
pub use key_provider::{HttpKeyProvider, KeyMaterialProvider, KeyProviderBuilder};

/// Default per-fetch timeout for key documents
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
