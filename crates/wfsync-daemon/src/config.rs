//! Configuration for wfsyncd

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use wfsync_syncer::{ArtifactLimits, HandlerConfig, SyncerConfig};
use wfsync_types::Don;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Reconciliation controller settings
    #[serde(default)]
    pub syncer: SyncerConfig,

    /// Event handler settings
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Where workflow artifacts are fetched from
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Development ledger
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// DON this node belongs to
    #[serde(default)]
    pub don: DonConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Artifact source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// `file://` directory or `http(s)://` base URL
    #[serde(default = "default_artifacts_url")]
    pub base_url: String,

    #[serde(default)]
    pub limits: ArtifactLimits,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            base_url: default_artifacts_url(),
            limits: ArtifactLimits::default(),
        }
    }
}

/// File-backed ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// JSON snapshot of the workflow registry, re-read on every query
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Local DON membership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonConfig {
    #[serde(default = "default_don_id")]
    pub id: u32,

    #[serde(default = "default_families")]
    pub families: Vec<String>,

    /// Peer ID reported by the local capability registry
    #[serde(default = "default_peer_id")]
    pub peer_id: String,
}

impl Default for DonConfig {
    fn default() -> Self {
        Self {
            id: default_don_id(),
            families: default_families(),
            peer_id: default_peer_id(),
        }
    }
}

impl DonConfig {
    pub fn to_don(&self) -> Don {
        Don {
            id: self.id,
            families: self.families.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_artifacts_url() -> String {
    "file:///var/lib/wfsync/artifacts".to_string()
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("wfsync-ledger.json")
}

fn default_don_id() -> u32 {
    1
}

fn default_families() -> Vec<String> {
    vec!["workflow".to_string()]
}

fn default_peer_id() -> String {
    "local-peer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `WFSYNC_` environment.
    ///
    /// Nested keys are separated by `__`, e.g. `WFSYNC_SYNCER__TICK_INTERVAL_MS`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("WFSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Configuration with fast ticks for local experiments
    pub fn development() -> Self {
        Self {
            syncer: SyncerConfig {
                tick_interval_ms: 2_000,
                retry_interval_ms: 1_000,
                allowlist_tick_interval_ms: 2_000,
                reader_init_interval_ms: 1_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
