//! prt-monitor: observation pipeline and its surfaces
//!
//! Every observed PRT header goes through [`PrtPipeline::process`]:
//!
//! ```text
//! header -> decode -> key (cached, de-duplicated) -> decrypt -> extract/verify
//!        -> per-tab store + statistics
//! ```
//!
//! State is owned by the pipeline instance, not held in globals:
//! - [`StatisticsAggregator`]: per-tab and global per-origin counters
//! - [`TabStore`]: decoded, decrypted and plaintext tokens per tab
//!
//! The HTTP API in [`routes`] and the `prt-monitor` binary are thin layers
//! over the same pipeline.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod routes;
pub mod stats;
pub mod tabs;

pub use config::MonitorConfig;
pub use error::{PipelineError, ServerError};
pub use crate::metrics::init_prometheus_recorder;
pub use pipeline::{PipelineBuilder, ProcessedToken, PrtPipeline};
pub use routes::{create_router, AppState};
pub use stats::{
    OriginStatistics, StatisticsAggregator, StatisticsSnapshot, TokenStatisticsEntry,
};
pub use tabs::{TabStore, TabTokens, TokenOutcome};

/// Browser tab identifier
pub type TabId = u64;
