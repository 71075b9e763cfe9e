//! Gateway configuration.
//!
//! Loaded from a JSON file (`/etc/oxgate/oxgate.json` by default) whose
//! keys follow the deployment's conventions. Every field has a default so
//! tests and embedders can build a config programmatically. Reloading is a
//! fresh [`Config::load`] and a swap by the embedder; request-time knobs
//! pick up the new values, existing connections keep the old ones.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::GatewayError;
use oxgate_meta::CacheKind;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/oxgate/oxgate.json";

/// Gateway configuration file contents.
///
/// # Examples
///
/// ```
/// use oxgate_core::Config;
///
/// let config = Config::default();
/// assert_eq!(config.meta_timeout().as_secs(), 30);
/// assert_eq!(config.gc_thread, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Domain the gateway serves, e.g. `s3.example.com`.
    #[builder(default = String::from("s3.oxgate.local"))]
    pub s3_domain: String,

    /// Region name this instance belongs to.
    #[builder(default = String::from("cn-bj-1"))]
    pub region: String,

    /// Credential lookup service endpoint.
    #[builder(default)]
    pub iam_endpoint: String,

    /// API key for the credential service.
    #[builder(default)]
    pub iam_key: String,

    /// API secret for the credential service.
    #[builder(default)]
    pub iam_secret: String,

    /// Request log path.
    #[builder(default = String::from("/var/log/oxgate/oxgate.log"))]
    pub log_path: String,

    /// Panic log path.
    #[builder(default = String::from("/var/log/oxgate/panic.log"))]
    pub panic_log_path: String,

    /// Pid file path.
    #[builder(default = String::from("/var/run/oxgate/oxgate.pid"))]
    pub pid_file: String,

    /// Bind address of the API listener.
    #[builder(default = String::from("0.0.0.0:3000"))]
    pub bind_api_address: String,

    /// Bind address of the admin listener.
    #[builder(default = String::from("0.0.0.0:9000"))]
    pub bind_admin_address: String,

    /// TLS key path; empty disables TLS.
    #[serde(rename = "SSLKeyPath")]
    #[builder(default)]
    pub ssl_key_path: String,

    /// TLS certificate path; empty disables TLS.
    #[serde(rename = "SSLCertPath")]
    #[builder(default)]
    pub ssl_cert_path: String,

    /// Quorum address of the metadata store.
    #[builder(default = String::from("localhost:2181"))]
    pub zookeeper_address: String,

    /// Path pattern of per-cluster blob backend configs.
    #[builder(default = String::from("/etc/oxgate/conf/*.conf"))]
    pub ceph_config_pattern: String,

    /// Metadata store call deadline, in seconds.
    #[builder(default = 30)]
    pub hbase_timeout: u64,

    /// Bound of the in-process metadata cache.
    #[builder(default = 100_000)]
    pub in_memory_cache_max_entry_count: usize,

    /// Shared cache address.
    #[builder(default = String::from("localhost:6379"))]
    pub redis_address: String,

    /// Shared cache connection pool size.
    #[builder(default = 10)]
    pub redis_connection_number: usize,

    /// Shared cache password; empty disables auth.
    #[builder(default)]
    pub redis_password: String,

    /// Shared cache entry TTL, in seconds.
    #[builder(default = 300)]
    pub redis_ttl: u64,

    /// Number of collector workers.
    #[builder(default = 4)]
    pub gc_thread: usize,

    /// Log verbosity, e.g. `info` or `debug`.
    #[builder(default = String::from("info"))]
    pub log_level: String,

    /// Identity of this gateway instance.
    #[builder(default = String::from("oxgate-1"))]
    pub instance_id: String,

    /// Metadata cache mode: `layered` or `none`.
    #[builder(default = String::from("layered"))]
    pub cache_type: String,

    /// Pool used when placement is overridden; empty keeps size-based
    /// placement.
    #[builder(default)]
    pub plain_pool: String,

    /// Size threshold separating the small and big pools, in bytes.
    #[builder(default = 512 << 10)]
    pub big_file_threshold: i64,

    /// Hex-encoded 32-byte master key sealing per-object encryption keys.
    /// Deployments must override the default.
    #[builder(default = String::from(
        "0000000000000000000000000000000000000000000000000000000000000000"
    ))]
    pub sse_master_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!(
                "cannot read config {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!(
                "cannot parse config {}: {e}",
                path.display()
            ))
        })
    }

    /// Metadata store call deadline.
    #[must_use]
    pub fn meta_timeout(&self) -> Duration {
        Duration::from_secs(self.hbase_timeout)
    }

    /// Shared cache entry TTL.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.redis_ttl)
    }

    /// Parsed metadata cache mode. Unknown values fall back to layered.
    #[must_use]
    pub fn cache_kind(&self) -> CacheKind {
        match self.cache_type.as_str() {
            "none" | "nocache" => CacheKind::None,
            _ => CacheKind::Layered,
        }
    }

    /// The master key used to seal per-object encryption keys.
    pub fn sse_master_key(&self) -> Result<[u8; 32], GatewayError> {
        let raw = hex::decode(&self.sse_master_key).map_err(|e| {
            GatewayError::Internal(anyhow::anyhow!("SseMasterKey is not valid hex: {e}"))
        })?;
        raw.try_into().map_err(|_| {
            GatewayError::Internal(anyhow::anyhow!("SseMasterKey must be 32 bytes of hex"))
        })
    }

    /// Cache settings derived from this config.
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            kind: self.cache_kind(),
            max_entries: self.in_memory_cache_max_entry_count,
            ttl: self.cache_ttl(),
        }
    }
}

/// Metadata cache settings, grouped for handing to the meta layer.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache operating mode.
    pub kind: CacheKind,
    /// Bound of the process LRU tier.
    pub max_entries: usize,
    /// TTL of shared-cache entries.
    pub ttl: Duration,
}
