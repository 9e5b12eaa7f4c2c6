//! Environment configuration loader
//!
//! Loads environment variables from the canonical location: `/etc/hald/environment`
//! so the daemon, its probers and its callouts all see the same settings.
//!
//! ## Usage
//!
//! Call `load_environment()` early in main() before building a [`HotplugConfig`]:
//!
//! ```rust
//! use hal_core::config::{load_environment, HotplugConfig};
//!
//! fn main() {
//!     load_environment();
//!     let config = HotplugConfig::from_env();
//!     assert!(!config.udi_prefix.is_empty());
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/hald/environment";

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &[DEFAULT_ENV_FILE, "/etc/hald.env", ".env"];

/// Prefix every UDI starts with unless overridden
pub const DEFAULT_UDI_PREFIX: &str = "/org/freedesktop/Hal/devices";

/// Load environment variables from the canonical configuration file.
///
/// This function:
/// 1. Checks `$HALD_ENV_FILE` if set
/// 2. Checks `/etc/hald/environment` (system-wide), then `/etc/hald.env`
/// 3. Falls back to `.env` in current directory (development)
///
/// Existing environment variables are never overridden.
/// Returns the path that was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("HALD_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let content = match fs::read_to_string(Path::new(path)) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            return None;
        }
    };

    let (mut loaded, mut skipped) = (0usize, 0usize);
    for (key, value) in content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_env_line)
    {
        // The process environment always wins over the file
        if std::env::var_os(&key).is_some() {
            skipped += 1;
            continue;
        }
        debug!("Loaded {} from environment file", key);
        std::env::set_var(&key, &value);
        loaded += 1;
    }

    info!(
        "Loaded {} variables from {} ({} already set)",
        loaded, path, skipped
    );
    Some(path.to_string())
}

/// Parse a single environment line into key-value pair.
///
/// Handles `KEY=VALUE`, `KEY="VALUE"` and `KEY='VALUE'`.
pub fn parse_env_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim().trim_start_matches("export ").trim();
    let value = value.trim();
    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Read `key`, falling back to `default` when unset.
pub fn get_config(key: &str, default: &str) -> String {
    get_config_opt(key).unwrap_or_else(|| default.to_string())
}

/// Read `key`; unset and empty are both `None`.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a flag. Unrecognised values keep the default.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    match get_config_opt(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        Some(other) => {
            warn!("Ignoring {}={:?}: not a boolean", key, other);
            default
        }
        None => default,
    }
}

/// Read a deadline given in milliseconds.
pub fn get_config_millis(key: &str, default: Duration) -> Duration {
    let Some(raw) = get_config_opt(key) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a millisecond count", key, raw);
            default
        }
    }
}

/// Settings for the hotplug pipeline and its external helpers
#[derive(Debug, Clone)]
pub struct HotplugConfig {
    /// Root of the sysfs mount scanned during coldplug
    pub sysfs_root: PathBuf,
    /// Directories searched, in order, for callout programs
    pub callout_dirs: Vec<PathBuf>,
    /// Directory holding `*.toml` merge rule fragments
    pub rules_dir: PathBuf,
    /// Deadline for a prober helper
    pub probe_timeout: Duration,
    /// Deadline for each individual callout script
    pub callout_timeout: Duration,
    /// Unix socket accepting live events as JSON lines
    pub event_socket: PathBuf,
    pub udi_prefix: String,
    /// Enumerate devices already present at startup
    pub coldplug: bool,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            callout_dirs: vec![PathBuf::from("/usr/lib/hal/scripts")],
            rules_dir: PathBuf::from("/usr/share/hal/fdi"),
            probe_timeout: Duration::from_millis(10_000),
            callout_timeout: Duration::from_millis(10_000),
            event_socket: PathBuf::from("/run/hald/hotplug.sock"),
            udi_prefix: DEFAULT_UDI_PREFIX.to_string(),
            coldplug: true,
        }
    }
}

impl HotplugConfig {
    /// Build the configuration from `HALD_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let callout_dirs = get_config_opt("HALD_CALLOUT_DIRS")
            .map(|dirs| {
                dirs.split(':')
                    .filter(|d| !d.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or(defaults.callout_dirs);

        Self {
            sysfs_root: get_config_opt("HALD_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.sysfs_root),
            callout_dirs,
            rules_dir: get_config_opt("HALD_RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_dir),
            probe_timeout: get_config_millis("HALD_PROBE_TIMEOUT_MS", defaults.probe_timeout),
            callout_timeout: get_config_millis(
                "HALD_CALLOUT_TIMEOUT_MS",
                defaults.callout_timeout,
            ),
            event_socket: get_config_opt("HALD_EVENT_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(defaults.event_socket),
            udi_prefix: get_config("HALD_UDI_PREFIX", DEFAULT_UDI_PREFIX)
                .trim_end_matches('/')
                .to_string(),
            coldplug: get_config_bool("HALD_COLDPLUG", defaults.coldplug),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_quoted() {
        let (k, v) = parse_env_line("HALD_RULES_DIR=\"/etc/hal rules\"").unwrap();
        assert_eq!(k, "HALD_RULES_DIR");
        assert_eq!(v, "/etc/hal rules");
    }

    #[test]
    fn test_parse_env_line_single_quoted() {
        let (k, v) = parse_env_line("FOO='bar'").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn test_default_config() {
        let config = HotplugConfig::default();
        assert_eq!(config.sysfs_root, PathBuf::from("/sys"));
        assert_eq!(config.udi_prefix, DEFAULT_UDI_PREFIX);
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert!(config.coldplug);
    }

    #[test]
    fn test_env_file_does_not_override_process_env() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("environment");
        std::fs::write(
            &file,
            "# hald test\nHALD_TEST_FROM_FILE=\"file\"\n\nHALD_TEST_PRESET=file\nexport HALD_TEST_EXPORTED=yes\n",
        )
        .unwrap();
        std::env::set_var("HALD_TEST_PRESET", "process");

        let loaded = try_load_env_file(file.to_str().unwrap());
        assert_eq!(loaded.as_deref(), file.to_str());
        assert_eq!(std::env::var("HALD_TEST_FROM_FILE").unwrap(), "file");
        assert_eq!(std::env::var("HALD_TEST_PRESET").unwrap(), "process");
        assert!(get_config_bool("HALD_TEST_EXPORTED", false));
    }

    #[test]
    fn test_millis_and_flags_fall_back_on_garbage() {
        let default = Duration::from_millis(250);
        std::env::set_var("HALD_TEST_MILLIS_OK", "1500");
        std::env::set_var("HALD_TEST_MILLIS_NEGATIVE", "-5");
        std::env::set_var("HALD_TEST_MILLIS_HUGE", "99999999999999999999999");
        std::env::set_var("HALD_TEST_FLAG_OFF", "Off");
        std::env::set_var("HALD_TEST_FLAG_BAD", "maybe");

        assert_eq!(
            get_config_millis("HALD_TEST_MILLIS_OK", default),
            Duration::from_millis(1500)
        );
        assert_eq!(get_config_millis("HALD_TEST_MILLIS_NEGATIVE", default), default);
        assert_eq!(get_config_millis("HALD_TEST_MILLIS_HUGE", default), default);
        assert_eq!(get_config_millis("HALD_TEST_MILLIS_UNSET", default), default);
        assert!(!get_config_bool("HALD_TEST_FLAG_OFF", true));
        assert!(get_config_bool("HALD_TEST_FLAG_BAD", true));
    }

    #[test]
    fn test_missing_env_file() {
        assert!(try_load_env_file("/nonexistent/hald/environment").is_none());
    }
}
