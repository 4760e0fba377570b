//! Per-origin token statistics
//!
//! Two views are kept behind one mutex so that a token's local and global
//! increments land together:
//! - local: per tab, created by `init_tab`, dropped by `teardown_tab`
//! - global: all tabs, lives as long as the aggregator and only grows

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::TabId;

/// Counters for one origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatisticsEntry {
    pub total_tokens: u64,
    /// Tokens whose signal had at least one non-zero byte
    pub non_zero_signal: u64,
}

impl TokenStatisticsEntry {
    fn bump(&mut self, non_zero_signal: bool) {
        self.total_tokens += 1;
        if non_zero_signal {
            self.non_zero_signal += 1;
        }
    }
}

/// Origin-keyed statistics
pub type OriginStatistics = BTreeMap<String, TokenStatisticsEntry>;

/// Statistics as seen from one tab
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub global_view: OriginStatistics,
    /// `None` when the tab is not tracked
    pub local_view: Option<OriginStatistics>,
}

#[derive(Default)]
struct Views {
    local: HashMap<TabId, OriginStatistics>,
    global: OriginStatistics,
}

/// Owned aggregator, shared by reference between pipeline invocations
#[derive(Default)]
pub struct StatisticsAggregator {
    views: Mutex<Views>,
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a tab; an already tracked tab keeps its counters
    pub fn init_tab(&self, tab_id: TabId) {
        self.lock().local.entry(tab_id).or_default();
    }

    /// Forget a tab's local view; the global view is untouched
    pub fn teardown_tab(&self, tab_id: TabId) -> bool {
        self.lock().local.remove(&tab_id).is_some()
    }

    pub fn is_tracked(&self, tab_id: TabId) -> bool {
        self.lock().local.contains_key(&tab_id)
    }

    /// Count one token for `origin` in the tab's local view and the global view
    pub fn record(&self, tab_id: TabId, origin: &str, non_zero_signal: bool) {
        let mut views = self.lock();
        views
            .local
            .entry(tab_id)
            .or_default()
            .entry(origin.to_string())
            .or_default()
            .bump(non_zero_signal);
        views
            .global
            .entry(origin.to_string())
            .or_default()
            .bump(non_zero_signal);
    }

    /// Count one token globally, and locally only if the tab is still tracked.
    ///
    /// Returns whether the local view was updated.
    pub fn record_if_tracked(&self, tab_id: TabId, origin: &str, non_zero_signal: bool) -> bool {
        let mut views = self.lock();
        views
            .global
            .entry(origin.to_string())
            .or_default()
            .bump(non_zero_signal);
        match views.local.get_mut(&tab_id) {
            Some(local) => {
                local.entry(origin.to_string()).or_default().bump(non_zero_signal);
                true
            }
            None => false,
        }
    }

    pub fn global_view(&self) -> OriginStatistics {
        self.lock().global.clone()
    }

    pub fn local_view(&self, tab_id: TabId) -> Option<OriginStatistics> {
        self.lock().local.get(&tab_id).cloned()
    }

    /// Both views for one tab, taken under a single lock
    pub fn snapshot(&self, tab_id: TabId) -> StatisticsSnapshot {
        let views = self.lock();
        StatisticsSnapshot {
            global_view: views.global.clone(),
            local_view: views.local.get(&tab_id).cloned(),
        }
    }

    pub fn tracked_tabs(&self) -> usize {
        self.lock().local.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Views> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
