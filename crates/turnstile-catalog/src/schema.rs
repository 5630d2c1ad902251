//! Raw catalog schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw catalog as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawCatalog {
    /// Catalog schema version
    pub catalog_version: u32,

    /// Global service settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Per-tier settings, keyed by tier name. Tiers not listed keep the
    /// built-in defaults.
    #[serde(default)]
    pub tiers: BTreeMap<String, RawTier>,

    /// Per-component settings, keyed by component name. When the table is
    /// absent entirely, the built-in default price list applies.
    pub components: Option<BTreeMap<String, RawComponent>>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Sweeper interval in seconds
    pub sweep_interval_seconds: Option<u64>,

    /// Upper bound on how long an unlock may wait for its account's
    /// serialization slot before failing as retryable
    pub unlock_timeout_seconds: Option<u64>,
}

/// Per-tier settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawTier {
    /// Grant window in minutes
    pub window_minutes: Option<u64>,

    /// Tier bypasses the credit charge entirely (windows still apply)
    #[serde(default)]
    pub unmetered: bool,
}

/// Per-component settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawComponent {
    /// Credit cost per fresh grant
    pub cost: u32,

    /// Window in minutes applied regardless of tier
    pub window_override_minutes: Option<u64>,

    /// Lowest tier allowed to unlock this component
    pub min_tier: Option<String>,
}
