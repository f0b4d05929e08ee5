//! Configuration for the application sweeper

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Application name for directory paths
const APP_NAME: &str = "ruvector";

const CONFIG_FILE: &str = "appsweep.toml";

/// Errors from loading or saving configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Parse(e) => write!(f, "Invalid config: {}", e),
            ConfigError::Serialize(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Serialize(e)
    }
}

/// Staleness scoring parameters. Read-only to the scorer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub inactivity_weight: f64,
    pub memory_weight: f64,
    pub cpu_weight: f64,
    /// Score at or above which a process is flagged for cleanup (0-1)
    pub stale_threshold: f64,
    pub max_inactivity_minutes: f64,
    pub max_memory_gigabytes: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            inactivity_weight: 0.5,
            memory_weight: 0.4,
            cpu_weight: 0.1,
            stale_threshold: 0.6,
            max_inactivity_minutes: 60.0,
            max_memory_gigabytes: 4.0,
        }
    }
}

impl ScoringConfig {
    pub fn weight_sum(&self) -> f64 {
        self.inactivity_weight + self.memory_weight + self.cpu_weight
    }
}

/// Main sweeper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSweepConfig {
    pub scoring: ScoringConfig,

    /// Seconds between resource sampling passes
    pub polling_interval_secs: u64,

    /// Milliseconds between lifecycle observations (launch/focus/quit)
    pub lifecycle_poll_ms: u64,

    /// Applications the user never wants quit
    pub protected_apps: Vec<String>,

    /// Applications that are not tracked at all
    pub excluded_apps: Vec<String>,

    /// Track denylisted system applications (always scored 0)
    pub track_system_apps: bool,

    /// Report what would be quit without sending any request
    pub dry_run: bool,

    /// Maximum quit requests per cleanup run
    pub max_per_run: usize,
}

impl Default for AppSweepConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            polling_interval_secs: 30,
            lifecycle_poll_ms: 1000,
            protected_apps: Vec::new(),
            excluded_apps: Vec::new(),
            track_system_apps: false,
            dry_run: false,
            max_per_run: 20,
        }
    }
}

impl AppSweepConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from TOML file, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/ruvector/appsweep.toml` (platform equivalent elsewhere)
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            return config_dir.join(APP_NAME).join(CONFIG_FILE);
        }
        if let Some(home) = dirs::home_dir() {
            return home.join(".config").join(APP_NAME).join(CONFIG_FILE);
        }
        PathBuf::from(CONFIG_FILE)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn lifecycle_poll(&self) -> Duration {
        Duration::from_millis(self.lifecycle_poll_ms)
    }

    pub fn protected_set(&self) -> HashSet<String> {
        self.protected_apps.iter().map(|s| s.to_lowercase()).collect()
    }

    pub fn excluded_set(&self) -> HashSet<String> {
        self.excluded_apps.iter().map(|s| s.to_lowercase()).collect()
    }

    /// Human-readable warnings about suspicious values. Nothing here is fatal;
    /// the scorer clamps every term.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let s = &self.scoring;

        let sum = s.weight_sum();
        if !sum.is_finite() || (sum - 1.0).abs() > 0.01 {
            warnings.push(format!("scoring weights sum to {:.3}, expected 1.0", sum));
        }
        for (name, w) in [
            ("inactivity_weight", s.inactivity_weight),
            ("memory_weight", s.memory_weight),
            ("cpu_weight", s.cpu_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                warnings.push(format!("{} is {}, treated as 0", name, w));
            }
        }
        if !(0.0..=1.0).contains(&s.stale_threshold) {
            warnings.push(format!("stale_threshold {} is outside 0-1", s.stale_threshold));
        }
        if !(s.max_inactivity_minutes > 0.0) {
            warnings.push("max_inactivity_minutes should be positive".to_string());
        }
        if !(s.max_memory_gigabytes > 0.0) {
            warnings.push("max_memory_gigabytes should be positive".to_string());
        }
        if self.polling_interval_secs == 0 {
            warnings.push("polling_interval_secs is 0, the minimum interval is used".to_string());
        }
        warnings
    }
}

/// Source of live configuration. Values may change between reads.
pub trait ConfigProvider: Send + Sync {
    fn current(&self) -> AppSweepConfig;
}

/// Fixed in-memory configuration.
#[derive(Debug)]
pub struct StaticConfig {
    config: RwLock<AppSweepConfig>,
}

impl StaticConfig {
    pub fn new(config: AppSweepConfig) -> Self {
        Self { config: RwLock::new(config) }
    }

    /// Replace the configuration; subsequent reads see the new values.
    pub fn replace(&self, config: AppSweepConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }
}

impl ConfigProvider for StaticConfig {
    fn current(&self) -> AppSweepConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

struct CachedFile {
    modified: Option<SystemTime>,
    config: AppSweepConfig,
}

/// TOML-file backed configuration, reloaded when the file changes.
///
/// A file that fails to parse keeps the last good configuration.
pub struct FileConfigProvider {
    path: PathBuf,
    cached: RwLock<CachedFile>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = AppSweepConfig::load_or_default(&path)?;
        let modified = modified_time(&path);
        Ok(Self {
            path,
            cached: RwLock::new(CachedFile { modified, config }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file regardless of its modification time.
    pub fn reload(&self) -> Result<AppSweepConfig, ConfigError> {
        let config = AppSweepConfig::load_or_default(&self.path)?;
        let mut cached = self.cached.write().unwrap_or_else(|e| e.into_inner());
        cached.modified = modified_time(&self.path);
        cached.config = config.clone();
        Ok(config)
    }
}

impl ConfigProvider for FileConfigProvider {
    fn current(&self) -> AppSweepConfig {
        let modified = modified_time(&self.path);
        {
            let cached = self.cached.read().unwrap_or_else(|e| e.into_inner());
            if cached.modified == modified {
                return cached.config.clone();
            }
        }

        match AppSweepConfig::load_or_default(&self.path) {
            Ok(config) => {
                debug!("Reloaded configuration from {}", self.path.display());
                let mut cached = self.cached.write().unwrap_or_else(|e| e.into_inner());
                cached.modified = modified;
                cached.config = config.clone();
                config
            }
            Err(e) => {
                warn!("Keeping previous configuration, {} is invalid: {}", self.path.display(), e);
                let mut cached = self.cached.write().unwrap_or_else(|e| e.into_inner());
                // don't retry the same broken file on every read
                cached.modified = modified;
                cached.config.clone()
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = AppSweepConfig::default();
        assert_eq!(config.polling_interval_secs, 30);
        assert!((config.scoring.weight_sum() - 1.0).abs() < 1e-9);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_partial_toml() {
        let toml_content = r#"
polling_interval_secs = 10
protected_apps = ["Slack"]

[scoring]
stale_threshold = 0.5
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = AppSweepConfig::load(file.path()).unwrap();
        assert_eq!(config.polling_interval_secs, 10);
        assert_eq!(config.scoring.stale_threshold, 0.5);
        // unspecified fields fall back to defaults
        assert_eq!(config.scoring.memory_weight, 0.4);
        assert_eq!(config.lifecycle_poll_ms, 1000);
        assert!(config.protected_set().contains("slack"));
    }

    #[test]
    fn test_save_and_load() {
        let mut config = AppSweepConfig::default();
        config.excluded_apps = vec!["obs".into()];
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = AppSweepConfig::load(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_validate_reports_drift() {
        let mut config = AppSweepConfig::default();
        config.scoring.cpu_weight = 0.5;
        config.scoring.stale_threshold = 1.5;
        config.scoring.max_memory_gigabytes = 0.0;

        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn test_static_config_replace() {
        let provider = StaticConfig::new(AppSweepConfig::default());
        let mut next = AppSweepConfig::default();
        next.polling_interval_secs = 5;
        provider.replace(next);
        assert_eq!(provider.current().polling_interval_secs, 5);
    }

    #[test]
    fn test_file_provider_reload_keeps_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appsweep.toml");
        std::fs::write(&path, "polling_interval_secs = 12\n").unwrap();

        let provider = FileConfigProvider::new(&path).unwrap();
        assert_eq!(provider.current().polling_interval_secs, 12);

        std::fs::write(&path, "polling_interval_secs = 7\n").unwrap();
        assert_eq!(provider.reload().unwrap().polling_interval_secs, 7);
        assert_eq!(provider.current().polling_interval_secs, 7);

        std::fs::write(&path, "polling_interval_secs = [broken").unwrap();
        assert!(provider.reload().is_err());
        assert_eq!(provider.current().polling_interval_secs, 7);
    }

    #[test]
    fn test_file_provider_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileConfigProvider::new(dir.path().join("absent.toml")).unwrap();
        assert_eq!(provider.current(), AppSweepConfig::default());
    }
}
