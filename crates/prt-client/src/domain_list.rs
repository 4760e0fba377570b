//! Script-blocking domain list, refreshed out-of-band
//!
//! Lookups never touch the network: they read whatever table is currently
//! installed. The refresher swaps in a new table after each successful
//! fetch and keeps the old one when a fetch fails.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use reqwest::Client;
use tokio::task::JoinHandle;

use prt_core::{DomainClassification, DomainTable};

use crate::error::{ClientError, Result};

/// Hostname classifier backed by a periodically refreshed table
pub struct DomainClassifier {
    http: Client,
    source_url: Option<String>,
    table: ArcSwap<DomainTable>,
}

impl DomainClassifier {
    /// Classifier that fetches its table from `source_url`
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            source_url: Some(source_url.into()),
            table: ArcSwap::from_pointee(DomainTable::new()),
        }
    }

    /// Classifier that never fetches and classifies nothing
    pub fn disabled() -> Self {
        Self {
            http: Client::new(),
            source_url: None,
            table: ArcSwap::from_pointee(DomainTable::new()),
        }
    }

    /// Classifier with a fixed table
    pub fn with_table(table: DomainTable) -> Self {
        let classifier = Self::disabled();
        classifier.table.store(Arc::new(table));
        classifier
    }

    /// Look up a hostname or origin in the current table
    pub fn classify(&self, host_or_origin: &str) -> Option<DomainClassification> {
        self.table.load().classify(host_or_origin).cloned()
    }

    /// Number of domains in the current table
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// Fetch and install a fresh table, returning its size.
    ///
    /// On failure the current table stays in place.
    pub async fn refresh(&self) -> Result<usize> {
        let Some(url) = self.source_url.as_deref() else {
            return Ok(self.len());
        };

        let outcome = self.fetch_table(url).await;
        match outcome {
            Ok(table) => {
                let size = table.len();
                self.table.store(Arc::new(table));
                metrics::counter!("prt_domain_list_refresh_total", "outcome" => "ok").increment(1);
                tracing::info!(domains = size, "Domain list refreshed");
                Ok(size)
            }
            Err(e) => {
                metrics::counter!("prt_domain_list_refresh_total", "outcome" => e.kind())
                    .increment(1);
                tracing::warn!(error = %e, "Domain list refresh failed, keeping previous table");
                Err(e)
            }
        }
    }

    async fn fetch_table(&self, url: &str) -> Result<DomainTable> {
        let resp = self.http.get(url).send().await?;

        if !resp.status().is_success() {
            return Err(ClientError::Server {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let document = resp.text().await?;
        Ok(DomainTable::parse(&document))
    }

    /// Refresh now and then every `period` until the handle is aborted
    pub fn spawn_refresher(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                // Failures are logged inside refresh
                let _ = self.refresh().await;
            }
        })
    }
}
