//! Cache configuration with precedence handling
//!
//! Values are resolved from, lowest to highest precedence: built-in
//! defaults, the `[cache]` table of `$XDG_CONFIG_HOME/pathcache/config.toml`,
//! `PATHCACHE_*` environment variables, and finally command line arguments.

use crate::disk::DEFAULT_BUFFER_SIZE;
use crate::errors::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_ROOT: &str = "PATHCACHE_ROOT";
pub const ENV_BACKEND: &str = "PATHCACHE_BACKEND";
pub const ENV_BUFFER_SIZE: &str = "PATHCACHE_BUFFER_SIZE";
pub const ENV_RECLAIM_INTERVAL: &str = "PATHCACHE_RECLAIM_INTERVAL_SECS";

/// Which storage backend a cache uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Disk,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disk => f.write_str("disk"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(Self::Disk),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(CacheError::configuration(format!(
                "unknown backend '{other}', expected 'disk' or 'memory'"
            ))),
        }
    }
}

/// Resolved cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Root directory of the disk backend
    pub root: PathBuf,
    pub backend: BackendKind,
    /// Capacity of buffered write sinks in bytes
    pub buffer_size: usize,
    /// Run a background reclamation pass at this interval
    pub reclaim_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            backend: BackendKind::Disk,
            buffer_size: DEFAULT_BUFFER_SIZE,
            reclaim_interval: None,
        }
    }
}

/// `$XDG_CACHE_HOME/pathcache`, falling back to `~/.cache/pathcache`
pub fn default_cache_root() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".cache"))
                .unwrap_or_else(|| PathBuf::from(".cache"))
        })
        .join("pathcache")
}

/// Builder for creating cache configurations
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.config.reclaim_interval = Some(interval);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<CacheConfig> {
        validate(&self.config)?;
        Ok(self.config)
    }
}

fn validate(config: &CacheConfig) -> Result<()> {
    if config.buffer_size == 0 {
        return Err(CacheError::configuration("buffer_size must be at least 1 byte"));
    }
    if config.reclaim_interval == Some(Duration::ZERO) {
        return Err(CacheError::configuration(
            "reclaim interval must be greater than zero",
        ));
    }
    if config.root.as_os_str().is_empty() {
        return Err(CacheError::configuration("cache root must not be empty"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    cache: CacheSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    root: Option<PathBuf>,
    backend: Option<BackendKind>,
    buffer_size: Option<usize>,
    reclaim_interval_secs: Option<u64>,
}

/// Configuration loader that handles precedence
pub struct CacheConfigLoader;

impl CacheConfigLoader {
    /// Load from the user configuration file and the process environment
    pub fn load() -> Result<CacheConfig> {
        let path = Self::config_file_path();
        Self::load_with(&path, |name| std::env::var(name).ok())
    }

    /// Load from an explicit file and variable lookup
    pub fn load_with<F>(config_file: &Path, env: F) -> Result<CacheConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CacheConfig::default();

        if let Some(section) = Self::read_config_file(config_file)? {
            tracing::debug!(path = %config_file.display(), "applying cache config file");
            if let Some(root) = section.root {
                config.root = root;
            }
            if let Some(backend) = section.backend {
                config.backend = backend;
            }
            if let Some(buffer_size) = section.buffer_size {
                config.buffer_size = buffer_size;
            }
            if let Some(secs) = section.reclaim_interval_secs {
                config.reclaim_interval = Some(Duration::from_secs(secs));
            }
        }

        Self::apply_env(&mut config, env)?;
        validate(&config)?;
        Ok(config)
    }

    /// Apply command line arguments (highest precedence)
    pub fn apply_cli_args(
        mut config: CacheConfig,
        root: Option<PathBuf>,
        backend: Option<BackendKind>,
    ) -> Result<CacheConfig> {
        if let Some(root) = root {
            config.root = root;
        }
        if let Some(backend) = backend {
            config.backend = backend;
        }
        validate(&config)?;
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/pathcache/config.toml`
    pub fn config_file_path() -> PathBuf {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir)
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("pathcache")
            .join("config.toml")
    }

    fn read_config_file(path: &Path) -> Result<Option<CacheSection>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, "read config file", e)),
        };

        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Ok(Some(file.cache)),
            Err(e) => Err(CacheError::configuration(format!(
                "invalid config file '{}': {e}",
                path.display()
            ))),
        }
    }

    fn apply_env<F>(config: &mut CacheConfig, env: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = env(ENV_ROOT).filter(|v| !v.is_empty()) {
            config.root = PathBuf::from(root);
        }

        if let Some(backend) = env(ENV_BACKEND) {
            config.backend = backend.parse()?;
        }

        if let Some(raw) = env(ENV_BUFFER_SIZE) {
            config.buffer_size = raw.trim().parse().map_err(|_| {
                CacheError::configuration(format!("{ENV_BUFFER_SIZE}='{raw}' is not a byte count"))
            })?;
        }

        if let Some(raw) = env(ENV_RECLAIM_INTERVAL) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                CacheError::configuration(format!(
                    "{ENV_RECLAIM_INTERVAL}='{raw}' is not a number of seconds"
                ))
            })?;
            // 0 switches the background pass off
            config.reclaim_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        Ok(())
    }
}
