//! Per-header processing pipeline
//!
//! decode -> key lookup -> decrypt -> extract/verify -> record
//!
//! Each call handles one header independently. The key lookup is the only
//! await point; everything else is synchronous. A failing token returns a
//! typed error and never affects other tokens or recorded statistics.

use std::sync::Arc;
use std::time::Duration;

use prt_client::{
    CachingKeyProvider, ClientError, DomainClassifier, HttpKeyProvider, KeyMaterialProvider,
    KeyProviderBuilder, DEFAULT_FETCH_TIMEOUT_MS,
};
use prt_core::{decode_header, decrypt, extract, DomainClassification, PlaintextToken};

use crate::config::MonitorConfig;
use crate::error::PipelineError;
use crate::metrics::{HMAC_INVALID, TOKENS_DECRYPTED, TOKENS_FAILED, TOKENS_OBSERVED};
use crate::stats::StatisticsAggregator;
use crate::tabs::TabStore;
use crate::TabId;

/// Outcome of one successfully processed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedToken {
    pub tab_id: TabId,
    pub origin: String,
    pub header: String,
    pub epoch_id_base64: String,
    pub plaintext: PlaintextToken,
    /// Hex of the decrypted plaintext bytes
    pub plaintext_hex: String,
    /// `false` when the same header was already stored for this tab
    pub first_seen: bool,
    pub classification: Option<DomainClassification>,
}

/// Owns the process-wide state the pipeline writes to
pub struct PrtPipeline<P> {
    keys: CachingKeyProvider<P>,
    classifier: Arc<DomainClassifier>,
    stats: StatisticsAggregator,
    tabs: TabStore,
}

impl<P: KeyMaterialProvider> PrtPipeline<P> {
    pub fn builder(provider: P) -> PipelineBuilder<P> {
        PipelineBuilder::new(provider)
    }

    /// Start tracking a tab
    pub fn init_tab(&self, tab_id: TabId) {
        self.stats.init_tab(tab_id);
        self.tabs.init_tab(tab_id);
        tracing::debug!(tab_id, "Tab initialised");
    }

    /// Drop everything held for a tab; global statistics are kept
    pub fn teardown_tab(&self, tab_id: TabId) -> bool {
        let had_stats = self.stats.teardown_tab(tab_id);
        let had_tokens = self.tabs.teardown_tab(tab_id);
        tracing::debug!(tab_id, "Tab torn down");
        had_stats || had_tokens
    }

    pub fn is_tracked(&self, tab_id: TabId) -> bool {
        self.stats.is_tracked(tab_id)
    }

    /// Run one observed header through every stage
    pub async fn process(
        &self,
        tab_id: TabId,
        origin: &str,
        header: &str,
    ) -> Result<ProcessedToken, PipelineError> {
        ::metrics::counter!(TOKENS_OBSERVED).increment(1);

        let result = self.run(tab_id, origin, header).await;
        match &result {
            Ok(processed) => {
                ::metrics::counter!(TOKENS_DECRYPTED).increment(1);
                if !processed.plaintext.hmac_valid {
                    ::metrics::counter!(HMAC_INVALID).increment(1);
                    tracing::warn!(
                        tab_id,
                        origin,
                        epoch = %processed.epoch_id_base64,
                        "Token HMAC mismatch, keeping it flagged"
                    );
                }
            }
            Err(e) => {
                ::metrics::counter!(TOKENS_FAILED, "stage" => e.stage()).increment(1);
                tracing::debug!(tab_id, origin, kind = e.kind(), error = %e, "Token dropped");
            }
        }
        result
    }

    async fn run(
        &self,
        tab_id: TabId,
        origin: &str,
        header: &str,
    ) -> Result<ProcessedToken, PipelineError> {
        let token = decode_header(header).map_err(PipelineError::Decode)?;

        if !self.stats.is_tracked(tab_id) {
            self.init_tab(tab_id);
        }

        // Table lookup only; a stale or missing table just yields None
        let classification = self.classifier.classify(origin);
        let first_seen = self
            .tabs
            .record_token(tab_id, origin, &token, classification.clone());

        let key = match self.keys.get(&token.epoch_id_base64).await {
            Ok(key) => key,
            Err(source) => {
                return Err(self.fail(
                    tab_id,
                    &token.header_text,
                    PipelineError::KeyUnavailable {
                        epoch: token.epoch_id_base64.clone(),
                        source,
                    },
                ))
            }
        };

        let payload = decrypt(&token, &key)
            .map_err(|e| self.fail(tab_id, &token.header_text, PipelineError::Decrypt(e)))?;
        let plaintext = extract(&payload)
            .map_err(|e| self.fail(tab_id, &token.header_text, PipelineError::Extract(e)))?;

        self.tabs
            .record_decrypted(tab_id, &token.header_text, &payload.plaintext_bytes, &plaintext);
        self.stats
            .record_if_tracked(tab_id, origin, plaintext.has_nonzero_signal());

        tracing::debug!(
            tab_id,
            origin,
            epoch = %token.epoch_id_base64,
            ordinal = plaintext.ordinal,
            "Token decrypted"
        );

        Ok(ProcessedToken {
            tab_id,
            origin: origin.to_string(),
            plaintext_hex: hex::encode(&payload.plaintext_bytes),
            header: token.header_text,
            epoch_id_base64: token.epoch_id_base64,
            plaintext,
            first_seen,
            classification,
        })
    }

    fn fail(&self, tab_id: TabId, header: &str, err: PipelineError) -> PipelineError {
        self.tabs.record_failure(tab_id, header, err.kind());
        err
    }

    pub fn stats(&self) -> &StatisticsAggregator {
        &self.stats
    }

    pub fn tabs(&self) -> &TabStore {
        &self.tabs
    }

    pub fn keys(&self) -> &CachingKeyProvider<P> {
        &self.keys
    }

    pub fn classifier(&self) -> &Arc<DomainClassifier> {
        &self.classifier
    }
}

impl PrtPipeline<HttpKeyProvider> {
    /// HTTP-backed pipeline from configuration
    pub fn from_config(config: &MonitorConfig) -> Result<Self, ClientError> {
        let provider = KeyProviderBuilder::new(&config.key_base_url)
            .user_agent(concat!("prt-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let classifier = match &config.domain_list_url {
            Some(url) => DomainClassifier::new(url),
            None => DomainClassifier::disabled(),
        };

        Ok(PipelineBuilder::new(provider)
            .fetch_timeout(config.key_fetch_timeout())
            .classifier(Arc::new(classifier))
            .build())
    }
}

/// Builder for PrtPipeline
pub struct PipelineBuilder<P> {
    provider: P,
    fetch_timeout: Duration,
    classifier: Option<Arc<DomainClassifier>>,
}

impl<P: KeyMaterialProvider> PipelineBuilder<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            classifier: None,
        }
    }

    /// Per-fetch timeout for key material
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn classifier(mut self, classifier: Arc<DomainClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn build(self) -> PrtPipeline<P> {
        PrtPipeline {
            keys: CachingKeyProvider::with_timeout(self.provider, self.fetch_timeout),
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(DomainClassifier::disabled())),
            stats: StatisticsAggregator::new(),
            tabs: TabStore::new(),
        }
    }
}
