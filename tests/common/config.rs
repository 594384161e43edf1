//! Test configuration helpers

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use usenet_rnews::{Config, RetryConfig};

/// Configuration rooted in `dir` with no helpers available
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.spool.incoming_dir = dir.join("incoming");
    config.policy.duplicate_log_path = dir.join("rnews.dups");
    config.helpers.search_path = false;
    config.helpers.unpack_programs = false;
    config.helpers.programs_dir = dir.join("rnews.libexec");
    config.spawn_retry = RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(1),
        backoff_multiplier: 1.0,
        jitter: false,
    };
    fs::create_dir_all(&config.spool.incoming_dir).unwrap();
    config
}

/// Configuration whose decompressor is the system gzip
pub fn config_with_gzip(dir: &Path) -> Option<Config> {
    let mut config = test_config(dir);
    config.helpers.gzip_path = Some(which::which("gzip").ok()?);
    Some(config)
}

/// Configuration whose "decompressor" is `cat`, so layers pass through unchanged
pub fn config_with_cat(dir: &Path) -> Option<Config> {
    let mut config = test_config(dir);
    config.helpers.gzip_path = Some(which::which("cat").ok()?);
    config.helpers.gzip_args = Vec::new();
    Some(config)
}

/// Install an executable unpack program in the configured helper directory
pub fn install_program(config: &mut Config, name: &str, script: &str) {
    config.helpers.unpack_programs = true;
    let dir = &config.helpers.programs_dir;
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}
