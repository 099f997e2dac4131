//! Settings parsing and management.

use crate::entity::Attrs;
use provisio_types::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid setting {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Engine settings, matching the settings.yaml schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Memoize resolutions
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Load only entity stubs at startup, fetching full records on demand
    #[serde(default)]
    pub lazy_start: bool,

    #[serde(default)]
    pub allow_duplicate_macs: bool,

    #[serde(default)]
    pub allow_duplicate_ips: bool,

    #[serde(default)]
    pub allow_duplicate_hostnames: bool,

    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Root node of every resolution chain
    #[serde(default)]
    pub defaults: Attrs,

    // Internal: path to settings file (for relative path resolution)
    #[serde(skip)]
    settings_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_server() -> String {
    String::from("127.0.0.1")
}

fn default_http_port() -> u16 {
    80
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    #[serde(default = "default_true")]
    pub pretty_json: bool,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("collections")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            pretty_json: true,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            lazy_start: false,
            allow_duplicate_macs: false,
            allow_duplicate_ips: false,
            allow_duplicate_hostnames: false,
            server: default_server(),
            http_port: default_http_port(),
            storage: StorageConfig::default(),
            defaults: Attrs::new(),
            settings_path: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut settings = Self::from_yaml_str(&contents)?;

        // Store settings file path for relative path resolution
        settings.settings_path = Some(path.to_path_buf());

        tracing::info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Parse settings from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "server".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.http_port == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http_port".into(),
                reason: "must be between 1 and 65535".into(),
            });
        }
        if let Some(key) = self.defaults.keys().find(|k| k.is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: format!("defaults.{}", key),
                reason: "empty attribute name".into(),
            });
        }
        Ok(())
    }

    /// Directory holding the file-backed collections
    pub fn storage_root(&self) -> PathBuf {
        self.resolve_path(&self.storage.root)
    }

    /// Resolve a path relative to the settings file location
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(settings_path) = &self.settings_path {
            if let Some(parent) = settings_path.parent() {
                parent.join(path)
            } else {
                path.to_path_buf()
            }
        } else {
            path.to_path_buf()
        }
    }

    /// Whether the unique index over a system interface field is active
    pub fn interface_index_enabled(&self, field: &str) -> bool {
        match field {
            "mac_address" => !self.allow_duplicate_macs,
            "ip_address" | "ipv6_address" => !self.allow_duplicate_ips,
            "dns_name" => !self.allow_duplicate_hostnames,
            _ => true,
        }
    }

    /// The global node at the root of every resolution chain.
    ///
    /// `server` and `http_port` always come from the typed settings.
    pub fn resolution_node(&self) -> Attrs {
        let mut node = self.defaults.clone();
        node.insert("server".into(), Value::str(self.server.clone()));
        node.insert("http_port".into(), Value::Int(i64::from(self.http_port)));
        node
    }
}
