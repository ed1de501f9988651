//! Configuration Management
//!
//! Handles persistent configuration storage for novaconverge.

use anyhow::{Context, Result};
use novaconverge::resource::pool::DEFAULT_WORKERS;
use novaconverge::format_cloud_error;
use novaconverge::resource::VolumeCapabilities;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the stored token
pub const TOKEN_ENV: &str = "NOVA_AUTH_TOKEN";

fn default_min_size() -> u64 {
    1
}

fn default_max_size() -> Option<u64> {
    Some(1024)
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

/// User configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Nova endpoint including the tenant path, e.g. `https://nova:8774/v2/<tenant>`
    #[serde(default)]
    pub compute_endpoint: Option<String>,
    /// Cinder endpoint including the tenant path
    #[serde(default)]
    pub volume_endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_min_size")]
    pub min_volume_size_gib: u64,
    #[serde(default = "default_max_size")]
    pub max_volume_size_gib: Option<u64>,
    /// Concurrent background listings
    #[serde(default = "default_workers")]
    pub listing_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compute_endpoint: None,
            volume_endpoint: None,
            region: None,
            tenant: None,
            token: None,
            min_volume_size_gib: default_min_size(),
            max_volume_size_gib: default_max_size(),
            listing_workers: default_workers(),
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("novaconverge").join("config.json"))
    }

    /// Load configuration from disk; a missing or unreadable file yields defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config at {:?}: {:#}", path, e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {:?}", path))
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective token (env > config)
    pub fn effective_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token.clone())
    }

    /// Volume size limits; a maximum below the minimum is a config error
    pub fn capabilities(&self) -> Result<VolumeCapabilities> {
        VolumeCapabilities::new(self.min_volume_size_gib, self.max_volume_size_gib)
            .map_err(|e| anyhow::anyhow!(format_cloud_error(&e)))
            .context("Invalid volume size limits in config")
    }
}
