//! Per-tab token store
//!
//! Holds what a consumer shows for one tab: the decoded tokens, the ones
//! that decrypted, their plaintext, per-header metadata and the
//! script-blocked origins seen. Everything for a tab goes away on teardown.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use prt_core::{
    DomainClassification, PlaintextToken, ProbabilisticRevealToken, ScriptBlockingScope,
};

use crate::TabId;

/// Decoded token as exposed to consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrtTokenView {
    pub header: String,
    pub version: u8,
    pub u: String,
    pub e: String,
    pub epoch_id_base64: String,
}

impl From<&ProbabilisticRevealToken> for PrtTokenView {
    fn from(token: &ProbabilisticRevealToken) -> Self {
        Self {
            header: token.header_text.clone(),
            version: token.version,
            u: hex::encode(token.u),
            e: hex::encode(token.e),
            epoch_id_base64: token.epoch_id_base64.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedTokenView {
    pub header: String,
    /// Hex of the recovered plaintext bytes
    pub plaintext: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainTextTokenView {
    pub header: String,
    pub version: u8,
    pub ordinal: u8,
    pub signal: String,
    pub hmac_valid: bool,
}

impl PlainTextTokenView {
    pub fn new(header: &str, plaintext: &PlaintextToken) -> Self {
        Self {
            header: header.to_string(),
            version: plaintext.version,
            ordinal: plaintext.ordinal,
            signal: hex::encode(plaintext.signal),
            hmac_valid: plaintext.hmac_valid,
        }
    }
}

/// Where a token got to in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TokenOutcome {
    Pending,
    Decrypted { hmac_valid: bool },
    Failed { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub origin: String,
    pub epoch_id_base64: String,
    /// Unix time in milliseconds of the first observation
    pub observed_at_ms: u64,
    /// Times this header was observed in the tab
    pub occurrences: u64,
    pub outcome: TokenOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<DomainClassification>,
}

/// Everything tracked for one tab
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabTokens {
    pub prt_tokens: Vec<PrtTokenView>,
    pub decrypted_tokens: Vec<DecryptedTokenView>,
    pub plain_text_tokens: Vec<PlainTextTokenView>,
    pub per_token_metadata: BTreeMap<String, TokenMetadata>,
    pub partially_blocked_origins: BTreeSet<String>,
    pub completely_blocked_origins: BTreeSet<String>,
}

/// Tab-keyed store
#[derive(Default)]
pub struct TabStore {
    tabs: Mutex<HashMap<TabId, TabTokens>>,
}

impl TabStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_tab(&self, tab_id: TabId) {
        self.lock().entry(tab_id).or_default();
    }

    pub fn teardown_tab(&self, tab_id: TabId) -> bool {
        self.lock().remove(&tab_id).is_some()
    }

    pub fn is_tracked(&self, tab_id: TabId) -> bool {
        self.lock().contains_key(&tab_id)
    }

    pub fn tab_count(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshot(&self, tab_id: TabId) -> Option<TabTokens> {
        self.lock().get(&tab_id).cloned()
    }

    /// Record a decoded token, creating the tab if needed.
    ///
    /// Returns `false` when the header was already seen in this tab; the
    /// occurrence is counted but the lists are not extended.
    pub fn record_token(
        &self,
        tab_id: TabId,
        origin: &str,
        token: &ProbabilisticRevealToken,
        classification: Option<DomainClassification>,
    ) -> bool {
        let mut tabs = self.lock();
        let tab = tabs.entry(tab_id).or_default();

        if let Some(classification) = &classification {
            match classification.script_blocking_scope {
                ScriptBlockingScope::Partial => {
                    tab.partially_blocked_origins.insert(origin.to_string());
                }
                ScriptBlockingScope::Complete => {
                    tab.completely_blocked_origins.insert(origin.to_string());
                }
                ScriptBlockingScope::None => {}
            }
        }

        if let Some(metadata) = tab.per_token_metadata.get_mut(&token.header_text) {
            metadata.occurrences += 1;
            return false;
        }

        tab.prt_tokens.push(PrtTokenView::from(token));
        tab.per_token_metadata.insert(
            token.header_text.clone(),
            TokenMetadata {
                origin: origin.to_string(),
                epoch_id_base64: token.epoch_id_base64.clone(),
                observed_at_ms: unix_millis(),
                occurrences: 1,
                outcome: TokenOutcome::Pending,
                classification,
            },
        );
        true
    }

    /// Record a successful decryption; ignored if the tab is gone
    pub fn record_decrypted(
        &self,
        tab_id: TabId,
        header: &str,
        plaintext_bytes: &[u8],
        plaintext: &PlaintextToken,
    ) {
        let mut tabs = self.lock();
        let Some(tab) = tabs.get_mut(&tab_id) else {
            return;
        };

        let outcome = TokenOutcome::Decrypted {
            hmac_valid: plaintext.hmac_valid,
        };
        if let Some(metadata) = tab.per_token_metadata.get_mut(header) {
            if metadata.outcome == outcome {
                return;
            }
            metadata.outcome = outcome;
        }

        tab.decrypted_tokens.push(DecryptedTokenView {
            header: header.to_string(),
            plaintext: hex::encode(plaintext_bytes),
        });
        tab.plain_text_tokens
            .push(PlainTextTokenView::new(header, plaintext));
    }

    /// Record a failure after decoding; ignored if the tab is gone
    pub fn record_failure(&self, tab_id: TabId, header: &str, kind: &str) {
        let mut tabs = self.lock();
        let Some(metadata) = tabs
            .get_mut(&tab_id)
            .and_then(|tab| tab.per_token_metadata.get_mut(header))
        else {
            return;
        };
        // A later failure must not mask an earlier success
        if matches!(metadata.outcome, TokenOutcome::Decrypted { .. }) {
            return;
        }
        metadata.outcome = TokenOutcome::Failed {
            kind: kind.to_string(),
        };
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TabId, TabTokens>> {
        self.tabs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
