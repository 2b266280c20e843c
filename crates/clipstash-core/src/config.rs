//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/clipstash/config.toml)
//! 3. Environment variables (CLIPSTASH_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::expiry::LocalTtl;

/// Environment variable prefix
const ENV_PREFIX: &str = "CLIPSTASH";

/// Default wait after a cloud write before local cleanup
pub const DEFAULT_CLOUD_SETTLE_MS: u64 = 400;

/// Keys accepted by [`Config::set_value`]
pub const CONFIG_KEYS: &[&str] = &[
    "data_dir",
    "backend",
    "local_item_limit",
    "local_ttl",
    "cloud_settle_ms",
    "log_file",
];

/// Which key-value backend holds the entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One JSON file per key
    #[default]
    File,
    /// Single SQLite database
    Sqlite,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::File => f.write_str("file"),
            Backend::Sqlite => f.write_str("sqlite"),
        }
    }
}

impl FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Backend::File),
            "sqlite" => Ok(Backend::Sqlite),
            other => bail!("Unknown backend '{}'. Use 'file' or 'sqlite'.", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for data storage
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Storage backend
    #[serde(default)]
    pub backend: Backend,

    /// Maximum number of local entries (unlimited if unset)
    #[serde(default)]
    pub local_item_limit: Option<usize>,

    /// Milliseconds to wait after copying an entry to the cloud
    #[serde(default = "default_cloud_settle_ms")]
    pub cloud_settle_ms: u64,

    /// Log file (stderr if unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// How long local entries are kept (forever if unset)
    #[serde(default)]
    pub local_ttl: Option<LocalTtl>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: Backend::default(),
            local_item_limit: None,
            local_ttl: None,
            cloud_settle_ms: DEFAULT_CLOUD_SETTLE_MS,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (CLIPSTASH_DATA_DIR, CLIPSTASH_BACKEND, ...)
    /// 2. Config file (~/.config/clipstash/config.toml or CLIPSTASH_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from an explicit path if given, otherwise the default location
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // CLIPSTASH_DATA_DIR
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        for key in ["backend", "local_item_limit", "local_ttl", "cloud_settle_ms"] {
            let var = format!("{}_{}", ENV_PREFIX, key.to_ascii_uppercase());
            if let Ok(val) = std::env::var(&var) {
                self.set_value(key, &val)
                    .with_context(|| format!("Invalid value in {}", var))?;
            }
        }

        // CLIPSTASH_LOG_FILE
        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        Ok(())
    }

    /// Set a single value from its textual form
    ///
    /// Optional values are cleared by an empty string or `none`.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let cleared = value.is_empty() || value.eq_ignore_ascii_case("none");

        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "backend" => self.backend = value.parse()?,
            "local_item_limit" => {
                self.local_item_limit = if cleared {
                    None
                } else {
                    Some(value.parse().with_context(|| {
                        format!("Invalid value for local_item_limit: '{}'", value)
                    })?)
                };
            }
            "local_ttl" => {
                self.local_ttl = if cleared {
                    None
                } else {
                    Some(value.parse::<LocalTtl>().map_err(anyhow::Error::msg)?)
                };
            }
            "cloud_settle_ms" => {
                self.cloud_settle_ms = value
                    .parse()
                    .with_context(|| format!("Invalid value for cloud_settle_ms: '{}'", value))?;
            }
            "log_file" => {
                self.log_file = if cleared {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            _ => bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                CONFIG_KEYS.join(", ")
            ),
        }
        Ok(())
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with CLIPSTASH_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clipstash")
            .join("config.toml")
    }

    /// Directory holding the per-key JSON files
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    /// Get the path to the SQLite database
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("clipstash.db")
    }

    pub fn cloud_settle_delay(&self) -> Duration {
        Duration::from_millis(self.cloud_settle_ms)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipstash")
}

fn default_cloud_settle_ms() -> u64 {
    DEFAULT_CLOUD_SETTLE_MS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::TtlUnit;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "CLIPSTASH_DATA_DIR",
        "CLIPSTASH_BACKEND",
        "CLIPSTASH_LOCAL_ITEM_LIMIT",
        "CLIPSTASH_LOCAL_TTL",
        "CLIPSTASH_CLOUD_SETTLE_MS",
        "CLIPSTASH_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.backend, Backend::File);
        assert!(config.local_item_limit.is_none());
        assert!(config.local_ttl.is_none());
        assert_eq!(config.cloud_settle_delay(), Duration::from_millis(400));
        assert!(config.data_dir.ends_with("clipstash"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.kv_dir().ends_with("kv"));
        assert!(config.sqlite_path().ends_with("clipstash.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("CLIPSTASH_DATA_DIR", "/tmp/clipstash-test");
        config.apply_env_overrides().unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/clipstash-test"));
    }

    #[test]
    fn test_env_override_limit_and_backend() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("CLIPSTASH_LOCAL_ITEM_LIMIT", "50");
        env::set_var("CLIPSTASH_BACKEND", "sqlite");
        config.apply_env_overrides().unwrap();
        assert_eq!(config.local_item_limit, Some(50));
        assert_eq!(config.backend, Backend::Sqlite);

        // Empty string clears the limit
        env::set_var("CLIPSTASH_LOCAL_ITEM_LIMIT", "");
        config.apply_env_overrides().unwrap();
        assert!(config.local_item_limit.is_none());
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("CLIPSTASH_CLOUD_SETTLE_MS", "soon");
        assert!(config.apply_env_overrides().is_err());
    }

    #[test]
    fn test_set_value() {
        let mut config = Config::default();

        config.set_value("local_ttl", "2 weeks").unwrap();
        assert_eq!(config.local_ttl, Some(LocalTtl::new(2, TtlUnit::Weeks)));

        config.set_value("local_ttl", "none").unwrap();
        assert!(config.local_ttl.is_none());

        config.set_value("log_file", "/tmp/clip.log").unwrap();
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/clip.log")));

        assert!(config.set_value("backend", "redis").is_err());
        assert!(config.set_value("sync_url", "x").is_err());
    }

    #[test]
    fn test_serialization() {
        let _guard = EnvGuard::new(ENV_VARS);

        let config = Config {
            data_dir: PathBuf::from("/data/clipstash"),
            backend: Backend::Sqlite,
            local_item_limit: Some(100),
            local_ttl: Some(LocalTtl::new(3, TtlUnit::Days)),
            cloud_settle_ms: 250,
            log_file: None,
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("backend = \"sqlite\""));
        assert!(toml_str.contains("local_item_limit"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.data_dir, config.data_dir);
        assert_eq!(parsed.backend, config.backend);
        assert_eq!(parsed.local_item_limit, config.local_item_limit);
        assert_eq!(parsed.local_ttl, config.local_ttl);
        assert_eq!(parsed.cloud_settle_ms, 250);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            backend = "sqlite"
            local_item_limit = 10

            [local_ttl]
            amount = 1
            unit = "hours"
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.backend, Backend::Sqlite);
        assert_eq!(config.local_item_limit, Some(10));
        assert_eq!(config.local_ttl, Some(LocalTtl::new(1, TtlUnit::Hours)));
        // Unset field keeps its default
        assert_eq!(config.cloud_settle_ms, DEFAULT_CLOUD_SETTLE_MS);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = TempDir::new().unwrap();
        let data_dir = temp.path().join("data");
        env::set_var("CLIPSTASH_DATA_DIR", &data_dir);

        let config = Config::load_from_path(&temp.path().join("missing.toml")).unwrap();

        // Defaults, with the data dir created
        assert!(config.local_item_limit.is_none());
        assert_eq!(config.data_dir, data_dir);
        assert!(data_dir.is_dir());
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.data_dir = temp.path().join("data");
        config.local_item_limit = Some(3);
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.local_item_limit, Some(3));
        assert_eq!(loaded.data_dir, temp.path().join("data"));
    }
}
