//! Consolidator policy configuration.
//!
//! Loaded from a TOML file at an operator-supplied path; a missing file
//! means defaults, a present-but-broken file is an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::history::HistoryPolicy;
use crate::recency::RecencyPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatorConfig {
    /// Same-editor edits closer together than this collapse into one
    /// version record.
    #[serde(default = "default_coalesce_window_secs")]
    pub coalesce_window_secs: u64,
    /// Maximum retained versions per document.
    #[serde(default = "default_retention_limit")]
    pub retention_limit: u32,
    /// Maximum live recent-visit entries per (user, scope) bucket.
    #[serde(default = "default_recency_capacity")]
    pub recency_capacity: u32,
    /// Repeat visits inside this window are dropped without touching the
    /// store.
    #[serde(default = "default_suppression_ttl_secs")]
    pub suppression_ttl_secs: u64,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            coalesce_window_secs: default_coalesce_window_secs(),
            retention_limit: default_retention_limit(),
            recency_capacity: default_recency_capacity(),
            suppression_ttl_secs: default_suppression_ttl_secs(),
        }
    }
}

impl ConsolidatorConfig {
    #[must_use]
    pub const fn history_policy(&self) -> HistoryPolicy {
        HistoryPolicy {
            coalesce_window: Duration::from_secs(self.coalesce_window_secs),
            retention_limit: self.retention_limit,
        }
    }

    #[must_use]
    pub const fn recency_policy(&self) -> RecencyPolicy {
        RecencyPolicy {
            capacity: self.recency_capacity,
            suppression_ttl: Duration::from_secs(self.suppression_ttl_secs),
        }
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<ConsolidatorConfig> {
    if !path.exists() {
        return Ok(ConsolidatorConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ConsolidatorConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_coalesce_window_secs() -> u64 {
    600
}

const fn default_retention_limit() -> u32 {
    20
}

const fn default_recency_capacity() -> u32 {
    20
}

const fn default_suppression_ttl_secs() -> u64 {
    600
}
