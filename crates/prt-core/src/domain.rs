//! Script-blocking domain classification
//!
//! The reference list is a table of `domain | owner | scope` rows, published
//! either as a markdown pipe table or as CSV. Parsing is lenient: malformed
//! rows are skipped and an empty table simply classifies nothing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How much of a domain's script traffic is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptBlockingScope {
    None,
    Partial,
    Complete,
}

impl ScriptBlockingScope {
    /// Map the free-text scope column; unknown text maps to `None`
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_ascii_lowercase();
        if text.starts_with("partial") || text.starts_with("some") {
            ScriptBlockingScope::Partial
        } else if text.starts_with("complete") || text.starts_with("entire") {
            ScriptBlockingScope::Complete
        } else {
            ScriptBlockingScope::None
        }
    }
}

impl std::fmt::Display for ScriptBlockingScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptBlockingScope::None => write!(f, "NONE"),
            ScriptBlockingScope::Partial => write!(f, "PARTIAL"),
            ScriptBlockingScope::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// One row of the reference list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainClassification {
    pub domain: String,
    pub owner: String,
    pub script_blocking_scope: ScriptBlockingScope,
}

/// Hostname-keyed classification lookup
#[derive(Debug, Clone, Default)]
pub struct DomainTable {
    entries: HashMap<String, DomainClassification>,
}

impl DomainTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a markdown pipe table or CSV document
    pub fn parse(document: &str) -> Self {
        let mut table = Self::new();

        for line in document.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let cells: Vec<&str> = if line.starts_with('|') {
                line.trim_matches('|').split('|').map(str::trim).collect()
            } else {
                line.split(',').map(str::trim).collect()
            };
            if cells.len() < 3 {
                continue;
            }

            let domain = normalize_host(cells[0]);
            // Header and markdown separator rows
            if domain.is_empty()
                || domain == "domain"
                || domain.chars().all(|c| c == '-' || c == ':')
            {
                continue;
            }

            table.insert(DomainClassification {
                domain,
                owner: cells[1].to_string(),
                script_blocking_scope: ScriptBlockingScope::parse(cells[2]),
            });
        }

        table
    }

    pub fn insert(&mut self, entry: DomainClassification) {
        self.entries.insert(entry.domain.clone(), entry);
    }

    /// Classify a hostname or origin.
    ///
    /// Falls back through parent domains: `a.b.example.com` is checked as
    /// itself, then `b.example.com`, then `example.com`.
    pub fn classify(&self, host_or_origin: &str) -> Option<&DomainClassification> {
        let host = normalize_host(host_or_origin);
        let mut candidate = host.as_str();
        loop {
            if let Some(entry) = self.entries.get(candidate) {
                return Some(entry);
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reduce an origin or hostname to a lower-case host without port or
/// trailing dot
pub fn normalize_host(input: &str) -> String {
    let input = input.trim();
    let without_scheme = match input.split_once("://") {
        Some((_, rest)) => rest,
        None => input,
    };
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let authority = authority.rsplit('@').next().unwrap_or_default();
    let host = if authority.starts_with('[') {
        authority.split_inclusive(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
