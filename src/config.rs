//! Configuration types for usenet-rnews

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Peer connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Server hostname (default: "localhost")
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port (default: 119)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for AUTHINFO
    #[serde(default)]
    pub username: Option<String>,

    /// Password for AUTHINFO
    #[serde(default)]
    pub password: Option<String>,

    /// Read timeout for peer replies (None = block forever)
    #[serde(default, with = "optional_duration_serde")]
    pub read_timeout: Option<Duration>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            read_timeout: None,
        }
    }
}

/// Spool directory layout and limits
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Directory holding spooled batches (default: "./incoming")
    #[serde(default = "default_incoming_dir")]
    pub incoming_dir: PathBuf,

    /// Quarantine directory for unreplayable batches and rejected articles,
    /// relative to `incoming_dir` unless absolute (default: "bad")
    #[serde(default = "default_bad_news_dir")]
    pub bad_news_dir: PathBuf,

    /// Permission bits for spooled batch files (default: 0o660)
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Longest accepted `#!` command line in bytes (default: 256)
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            incoming_dir: default_incoming_dir(),
            bad_news_dir: default_bad_news_dir(),
            file_mode: default_file_mode(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl SpoolConfig {
    /// Absolute-or-incoming-relative quarantine directory
    pub fn bad_news_path(&self) -> PathBuf {
        self.incoming_dir.join(&self.bad_news_dir)
    }
}

/// Decompression and unpack helper programs
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Path to the gzip executable (auto-detected if None)
    #[serde(default)]
    pub gzip_path: Option<PathBuf>,

    /// Arguments passed to the decompressor (default: ["-d"])
    #[serde(default = "default_gzip_args")]
    pub gzip_args: Vec<String>,

    /// Allow `#! <program>` lines to run helpers from `programs_dir` (default: true)
    #[serde(default = "default_true")]
    pub unpack_programs: bool,

    /// Directory searched for `#! <program>` helpers (default: "./rnews.libexec")
    #[serde(default = "default_programs_dir")]
    pub programs_dir: PathBuf,

    /// Whether to search PATH for gzip if `gzip_path` is not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            gzip_path: None,
            gzip_args: default_gzip_args(),
            unpack_programs: true,
            programs_dir: default_programs_dir(),
            search_path: true,
        }
    }
}

impl HelperConfig {
    /// Resolve the decompressor binary
    ///
    /// An explicit `gzip_path` wins; otherwise PATH is searched when allowed.
    pub fn resolve_gzip(&self) -> Option<PathBuf> {
        if let Some(path) = &self.gzip_path {
            return Some(path.clone());
        }
        if self.search_path {
            return which::which("gzip").ok();
        }
        None
    }
}

/// Retry configuration for helper spawns
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of spawn attempts (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before the second attempt (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Where duplicate notices go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateLog {
    /// Emit a log event (default)
    #[default]
    Log,
    /// Append a line to `duplicate_log_path`
    File,
    /// Do not record duplicates
    None,
}

/// Per-article bookkeeping policy
///
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Keep a copy of each rejected article in the bad-news directory (default: false)
    #[serde(default)]
    pub save_rejected: bool,

    /// Duplicate recording mode
    #[serde(default)]
    pub duplicate_log: DuplicateLog,

    /// File used when `duplicate_log` is `file` (default: "./rnews.dups")
    #[serde(default = "default_duplicate_log_path")]
    pub duplicate_log_path: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            save_rejected: false,
            duplicate_log: DuplicateLog::default(),
            duplicate_log_path: default_duplicate_log_path(),
        }
    }
}

/// Main configuration
///
/// Sub-configs other than `peer` and `spawn_retry` are flattened, so the JSON
/// file keeps their keys at top level.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Peer to offer articles to
    #[serde(default)]
    pub peer: PeerConfig,

    /// Spool layout
    #[serde(flatten)]
    pub spool: SpoolConfig,

    /// Helper programs
    #[serde(flatten)]
    pub helpers: HelperConfig,

    /// Helper spawn retry budget
    #[serde(default)]
    pub spawn_retry: RetryConfig,

    /// Rejected/duplicate article policy
    #[serde(flatten)]
    pub policy: PolicyConfig,
}

impl Config {
    /// Load a configuration file (JSON)
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot rule out
    pub fn validate(&self) -> Result<()> {
        if self.peer.port == 0 {
            return Err(config_error("port must be non-zero", "peer.port"));
        }
        if self.spawn_retry.max_attempts == 0 {
            return Err(config_error(
                "at least one spawn attempt is required",
                "spawn_retry.max_attempts",
            ));
        }
        if self.spool.max_line_length < 16 {
            return Err(config_error(
                "max_line_length must be at least 16",
                "max_line_length",
            ));
        }
        if self.spool.file_mode == 0 || self.spool.file_mode > 0o7777 {
            return Err(config_error("file_mode must be a permission mask", "file_mode"));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    119
}

fn default_incoming_dir() -> PathBuf {
    PathBuf::from("./incoming")
}

fn default_bad_news_dir() -> PathBuf {
    PathBuf::from("bad")
}

fn default_file_mode() -> u32 {
    0o660
}

fn default_max_line_length() -> usize {
    256
}

fn default_gzip_args() -> Vec<String> {
    vec!["-d".to_string()]
}

fn default_programs_dir() -> PathBuf {
    PathBuf::from("./rnews.libexec")
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_duplicate_log_path() -> PathBuf {
    PathBuf::from("./rnews.dups")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
