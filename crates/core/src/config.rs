//! Configuration types shared across crates.

use crate::quota::QuotaPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum chunk size in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Maximum body size accepted by the direct upload endpoint.
    #[serde(default = "default_max_direct_upload_bytes")]
    pub max_direct_upload_bytes: u64,
    /// Timeout for `/upload-chunk` requests.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    /// Timeout for `/finalize-upload` requests.
    #[serde(default = "default_finalize_timeout_secs")]
    pub finalize_timeout_secs: u64,
    /// Timeout for every other route.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_direct_upload_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_chunk_timeout_secs() -> u64 {
    30
}

fn default_finalize_timeout_secs() -> u64 {
    600 // assembling and storing large artifacts
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            max_direct_upload_bytes: default_max_direct_upload_bytes(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            finalize_timeout_secs: default_finalize_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be greater than 0".to_string());
        }
        if self.max_chunk_size > self.max_direct_upload_bytes {
            return Err(format!(
                "server.max_chunk_size {} exceeds server.max_direct_upload_bytes {}",
                self.max_chunk_size, self.max_direct_upload_bytes
            ));
        }
        for (name, secs) in [
            ("chunk_timeout_secs", self.chunk_timeout_secs),
            ("finalize_timeout_secs", self.finalize_timeout_secs),
            ("request_timeout_secs", self.request_timeout_secs),
        ] {
            if secs == 0 {
                return Err(format!("server.{name} cannot be 0"));
            }
        }
        Ok(())
    }
}

/// Staging area configuration (chunks and assembled artifacts).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Root directory for staged upload data.
    #[serde(default = "default_staging_path")]
    pub path: PathBuf,
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("./data/staging")
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            path: default_staging_path(),
        }
    }
}

/// Content store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentConfig {
    /// Local content-addressed store.
    Local {
        /// Root directory for stored content.
        path: PathBuf,
    },
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self::Local {
            path: PathBuf::from("./data/content"),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
    /// How long a writer waits on a locked database.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/metadata.db")
}

fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

/// Quota configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Free tier allotment per identity in bytes (default: 1 GiB).
    #[serde(default = "default_free_tier_bytes")]
    pub free_tier_bytes: u64,
    /// Bytes credited per purchase (default: 10 GiB).
    #[serde(default = "default_plan_bytes")]
    pub plan_bytes: u64,
    /// Displayed plan price, informational only.
    #[serde(default = "default_plan_price")]
    pub plan_price: String,
}

fn default_free_tier_bytes() -> u64 {
    crate::DEFAULT_FREE_TIER_BYTES
}

fn default_plan_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_plan_price() -> String {
    "0.01".to_string()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_tier_bytes: default_free_tier_bytes(),
            plan_bytes: default_plan_bytes(),
            plan_price: default_plan_price(),
        }
    }
}

impl QuotaConfig {
    pub fn policy(&self) -> QuotaPolicy {
        QuotaPolicy {
            free_tier_bytes: self.free_tier_bytes,
            plan_bytes: self.plan_bytes,
        }
    }

    /// Counters are stored as SQLite INTEGER (i64).
    pub fn validate(&self) -> Result<(), String> {
        if self.free_tier_bytes > i64::MAX as u64 {
            return Err(format!(
                "quota.free_tier_bytes {} exceeds maximum value {}",
                self.free_tier_bytes,
                i64::MAX
            ));
        }
        if self.plan_bytes == 0 || self.plan_bytes > i64::MAX as u64 {
            return Err(format!(
                "quota.plan_bytes must be in 1..={}, got {}",
                i64::MAX,
                self.plan_bytes
            ));
        }
        Ok(())
    }
}

/// Listing cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the listing cache.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Listing time-to-live in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Minimum interval between quota recomputations per identity.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    10
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            ttl_secs: default_cache_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// How uploaded archives are handled.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Extract zip archives into a folder of stored entries.
    #[default]
    Zip,
    /// Store archives as plain files.
    Disabled,
}

/// Archive expansion configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub mode: ArchiveMode,
    /// Maximum number of entries extracted from one archive.
    #[serde(default = "default_archive_max_entries")]
    pub max_entries: usize,
    /// Maximum uncompressed size of a single extracted entry.
    #[serde(default = "default_archive_max_entry_bytes")]
    pub max_entry_bytes: u64,
}

fn default_archive_max_entries() -> usize {
    1000
}

fn default_archive_max_entry_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            mode: ArchiveMode::default(),
            max_entries: default_archive_max_entries(),
            max_entry_bytes: default_archive_max_entry_bytes(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.mode == ArchiveMode::Zip && self.max_entries == 0 {
            return Err("archive.max_entries cannot be 0 when zip expansion is enabled".to_string());
        }
        Ok(())
    }
}

/// Background sweep of abandoned upload state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Staging sessions with no write for this long are removed.
    #[serde(default = "default_staging_max_age_secs")]
    pub staging_max_age_secs: u64,
    /// Completed finalize claims are kept this long for replays.
    #[serde(default = "default_claim_retention_secs")]
    pub claim_retention_secs: u64,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_staging_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_claim_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval_secs(),
            staging_max_age_secs: default_staging_max_age_secs(),
            claim_retention_secs: default_claim_retention_secs(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn staging_max_age(&self) -> Duration {
        Duration::from_secs(self.staging_max_age_secs)
    }

    pub fn claim_retention(&self) -> Duration {
        Duration::from_secs(self.claim_retention_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval_secs == 0 {
            return Err("sweep.interval_secs cannot be 0".to_string());
        }
        if self.staging_max_age_secs == 0 {
            return Err("sweep.staging_max_age_secs cannot be 0".to_string());
        }
        if self.claim_retention_secs == 0 {
            return Err("sweep.claim_retention_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration rooted in `dir`.
    ///
    /// **For testing only.**
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            staging: StagingConfig {
                path: dir.join("staging"),
            },
            content: ContentConfig::Local {
                path: dir.join("content"),
            },
            metadata: MetadataConfig {
                path: dir.join("metadata.db"),
                busy_timeout_secs: 5,
            },
            quota: QuotaConfig {
                free_tier_bytes: 64 * 1024 * 1024,
                plan_bytes: 256 * 1024 * 1024,
                plan_price: default_plan_price(),
            },
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.quota.validate()?;
        self.archive.validate()?;
        self.sweep.validate()?;
        Ok(())
    }
}
