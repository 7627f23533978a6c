//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// Auto-saves kept per project when nothing else is configured
pub const DEFAULT_AUTO_SAVE_KEEP: usize = 5;

/// Default auto-save interval (one minute)
pub const DEFAULT_AUTO_SAVE_INTERVAL_MS: u64 = 60_000;

/// Shortest interval accepted for the auto-save timer
pub const MIN_AUTO_SAVE_INTERVAL_MS: u64 = 1_000;

/// hvacstore configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub auto_save: AutoSaveConfig,
}

/// Which storage backend a session uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Directory handle when one is granted, otherwise the filesystem
    #[default]
    Auto,
    Filesystem,
    Directory,
    Database,
}

impl StorageBackend {
    pub const ALL: [StorageBackend; 4] = [
        StorageBackend::Auto,
        StorageBackend::Filesystem,
        StorageBackend::Directory,
        StorageBackend::Database,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Filesystem => "filesystem",
            Self::Directory => "directory",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|b| b.as_str()).collect();
                anyhow!(
                    "Invalid storage backend: {}. Valid options: {}",
                    s,
                    valid.join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Projects root for the filesystem backend; documents dir when unset
    pub base_dir: Option<PathBuf>,
    /// SQLite file for the database backend; data dir when unset
    pub database_path: Option<PathBuf>,
    /// Local folder opened as a directory handle
    pub directory_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub keep_count: usize,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_AUTO_SAVE_INTERVAL_MS,
            keep_count: DEFAULT_AUTO_SAVE_KEEP,
        }
    }
}

impl AutoSaveConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_ms < MIN_AUTO_SAVE_INTERVAL_MS {
            return Err(anyhow!(
                "Auto-save interval must be at least {} ms",
                MIN_AUTO_SAVE_INTERVAL_MS
            ));
        }
        if self.keep_count == 0 {
            return Err(anyhow!("Auto-save keep_count must be at least 1"));
        }
        Ok(())
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(default)".to_string())
}

fn parse_path(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("HVACSTORE_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("hvacstore")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config = Self::from_toml(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.auto_save.validate()?;
        if self.storage.backend == StorageBackend::Directory
            && self.storage.directory_path.is_none()
        {
            return Err(anyhow!(
                "The directory backend needs storage.directory_path to be set"
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Storage settings
            "storage.backend" => Ok(self.storage.backend.to_string()),
            "storage.base_dir" => Ok(display_path(&self.storage.base_dir)),
            "storage.database_path" => Ok(display_path(&self.storage.database_path)),
            "storage.directory_path" => Ok(display_path(&self.storage.directory_path)),

            // Auto-save settings
            "auto_save.enabled" => Ok(self.auto_save.enabled.to_string()),
            "auto_save.interval_ms" => Ok(self.auto_save.interval_ms.to_string()),
            "auto_save.keep_count" => Ok(self.auto_save.keep_count.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `hvacstore config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key; an empty path value clears it
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "storage.backend" => {
                self.storage.backend = value.parse()?;
            }
            "storage.base_dir" => {
                self.storage.base_dir = parse_path(value);
            }
            "storage.database_path" => {
                self.storage.database_path = parse_path(value);
            }
            "storage.directory_path" => {
                self.storage.directory_path = parse_path(value);
            }

            "auto_save.enabled" => {
                self.auto_save.enabled = value
                    .parse()
                    .with_context(|| format!("Invalid enabled value: {} (use true or false)", value))?;
            }
            "auto_save.interval_ms" => {
                let interval: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid interval_ms value: {}", value))?;
                if interval < MIN_AUTO_SAVE_INTERVAL_MS {
                    return Err(anyhow!(
                        "Auto-save interval must be at least {} ms",
                        MIN_AUTO_SAVE_INTERVAL_MS
                    ));
                }
                self.auto_save.interval_ms = interval;
            }
            "auto_save.keep_count" => {
                let keep: usize = value
                    .parse()
                    .with_context(|| format!("Invalid keep_count value: {}", value))?;
                if keep == 0 {
                    return Err(anyhow!("Auto-save keep_count must be at least 1"));
                }
                self.auto_save.keep_count = keep;
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `hvacstore config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "storage.backend",
            "storage.base_dir",
            "storage.database_path",
            "storage.directory_path",
            "auto_save.enabled",
            "auto_save.interval_ms",
            "auto_save.keep_count",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
