//! Agent configuration
//!
//! [`RelayConfig`] describes what to ship and how; [`RemoteConfig`] describes
//! where to. Both serialize to JSON (durations as humantime strings such as
//! `"5s"`), and both can be read from the sidecar's environment:
//!
//! | Variable                      | Meaning                                     | Default            |
//! |-------------------------------|---------------------------------------------|--------------------|
//! | `NC_DIAGNOSTIC_LOG_FOLDER`    | Log root; the GC log lives in its `gc` dir  | `/tmp/diagnostic`  |
//! | `NC_DIAGNOSTIC_AGENT_SERVICE` | Base URL of the diagnostic service          | (none)             |
//! | `CLOUD_NAMESPACE`             | Namespace segment of remote targets         | (none)             |
//! | `POD_NAME`                    | Pod segment of remote targets               | host name          |
//! | `DIAGNOSTIC_SCAN_INTERVAL`    | Time between poll cycles                    | `5s`               |
//! | `NC_DIAGNOSTIC_GC_DELIVERY`   | `append` or `overwrite`                     | `append`           |

use crate::error::{RelayError, Result};
use crate::fingerprint::{DEFAULT_FINGERPRINT_SIZE, MAX_FINGERPRINT_SIZE};
use crate::types::DeliveryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Name of the active GC log
pub const DEFAULT_FILE_NAME: &str = "gc.log";

/// Log root used when `NC_DIAGNOSTIC_LOG_FOLDER` is unset
pub const DEFAULT_LOG_ROOT: &str = "/tmp/diagnostic";

/// Subdirectory of the log root holding GC logs
pub const GC_LOG_SUBFOLDER: &str = "gc";

/// Time between poll cycles
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Per-request timeout for the remote store
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Log root variable
pub const ENV_LOG_FOLDER: &str = "NC_DIAGNOSTIC_LOG_FOLDER";
/// Diagnostic service URL variable
pub const ENV_AGENT_SERVICE: &str = "NC_DIAGNOSTIC_AGENT_SERVICE";
/// Namespace variable
pub const ENV_NAMESPACE: &str = "CLOUD_NAMESPACE";
/// Pod name variable
pub const ENV_POD_NAME: &str = "POD_NAME";
/// Scan interval variable
pub const ENV_SCAN_INTERVAL: &str = "DIAGNOSTIC_SCAN_INTERVAL";
/// Delivery mode variable
pub const ENV_DELIVERY: &str = "NC_DIAGNOSTIC_GC_DELIVERY";

/// Where shipped files go
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the diagnostic service
    pub service_url: String,
    /// Namespace the pod runs in
    pub namespace: String,
    /// Name of the pod
    pub pod_name: String,
}

impl RemoteConfig {
    /// Read remote settings from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read remote settings through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pod_name = lookup(ENV_POD_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(local_hostname);

        Self {
            service_url: lookup(ENV_AGENT_SERVICE).unwrap_or_default(),
            namespace: lookup(ENV_NAMESPACE).unwrap_or_default(),
            pod_name,
        }
    }
}

/// Everything the relay needs to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Directory holding the active log and its rotated siblings
    pub log_dir: PathBuf,
    /// Name of the active log
    pub file_name: String,
    /// Leading bytes kept as a fingerprint
    pub fingerprint_size: usize,
    /// How growth of the active log is shipped
    #[serde(default)]
    pub policy: DeliveryPolicy,
    /// Time between poll cycles
    #[serde(with = "duration_text")]
    pub scan_interval: Duration,
    /// Per-request timeout for the remote store
    #[serde(with = "duration_text")]
    pub request_timeout: Duration,
    /// Remote settings
    pub remote: RemoteConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_dir: Path::new(DEFAULT_LOG_ROOT).join(GC_LOG_SUBFOLDER),
            file_name: DEFAULT_FILE_NAME.to_string(),
            fingerprint_size: DEFAULT_FINGERPRINT_SIZE,
            policy: DeliveryPolicy::default(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            remote: RemoteConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfiguration`] when the scan interval or
    /// the delivery mode cannot be parsed. Missing variables fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(root) = lookup(ENV_LOG_FOLDER).filter(|v| !v.is_empty()) {
            config.log_dir = PathBuf::from(root).join(GC_LOG_SUBFOLDER);
        }
        if let Some(interval) = lookup(ENV_SCAN_INTERVAL).filter(|v| !v.is_empty()) {
            config.scan_interval = humantime::parse_duration(&interval).map_err(|e| {
                RelayError::config(format!("{}={:?}: {}", ENV_SCAN_INTERVAL, interval, e))
            })?;
        }
        if let Some(mode) = lookup(ENV_DELIVERY).filter(|v| !v.is_empty()) {
            config.policy = mode.parse()?;
        }
        config.remote = RemoteConfig::from_lookup(&lookup);

        debug!("Configuration from environment: {:?}", config);
        Ok(config)
    }

    /// Load a configuration file written by [`RelayConfig::to_json`]
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Pretty-printed JSON form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Path of the active log
    pub fn active_path(&self) -> PathBuf {
        self.log_dir.join(&self.file_name)
    }

    /// Check the configuration for values the relay cannot work with
    pub fn validate(&self) -> Result<()> {
        self.validate_local()?;
        if self.remote.service_url.trim().is_empty() {
            return Err(RelayError::config(format!("{} is not set", ENV_AGENT_SERVICE)));
        }
        if self.remote.namespace.trim().is_empty() {
            return Err(RelayError::config(format!("{} is not set", ENV_NAMESPACE)));
        }
        Ok(())
    }

    /// Like [`RelayConfig::validate`], but ignores the remote settings
    ///
    /// Used when the target resolver is supplied by the embedder.
    pub fn validate_local(&self) -> Result<()> {
        if self.file_name.is_empty() {
            return Err(RelayError::config("active file name is empty"));
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(RelayError::config(format!(
                "active file name {:?} must not contain path separators",
                self.file_name
            )));
        }
        if self.fingerprint_size == 0 || self.fingerprint_size > MAX_FINGERPRINT_SIZE {
            return Err(RelayError::config(format!(
                "fingerprint size must be between 1 and {} bytes, got {}",
                MAX_FINGERPRINT_SIZE, self.fingerprint_size
            )));
        }
        if self.scan_interval.is_zero() {
            return Err(RelayError::config("scan interval must be positive"));
        }
        Ok(())
    }
}

impl FromStr for DeliveryPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(DeliveryPolicy::Append),
            "overwrite" => Ok(DeliveryPolicy::overwrite_default()),
            other => Err(RelayError::config(format!(
                "unknown delivery mode {:?} (expected append or overwrite)",
                other
            ))),
        }
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Serde adapter writing durations as humantime strings
pub(crate) mod duration_text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
