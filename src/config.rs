//! Client configuration
//!
//! ```toml
//! [connection]
//! replicas = [{ id = "node1", endpoint = "http://127.0.0.1:6001" }]
//!
//! [session]
//! user_id = "admin"
//! identity_path = "/home/admin/.bcdb/admin.key"
//! tx_timeout = "20s"
//! query_timeout = "5s"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::Timeouts;
use crate::crypto::{CryptoError, Identity};
use crate::transport::ReplicaSet;

/// Errors loading configuration or identity files
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid identity file {path}: {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: CryptoError,
    },

    #[error("no replicas configured")]
    NoReplicas,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub replicas: ReplicaSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub user_id: String,
    pub identity_path: PathBuf,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub tx_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub query_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_id: "admin".to_string(),
            identity_path: PathBuf::from("identity.key"),
            tx_timeout: default_timeout(),
            query_timeout: default_timeout(),
        }
    }
}

impl SessionConfig {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            tx: self.tx_timeout,
            query: self.query_timeout,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ClientConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml(contents: &str, path: &Path) -> ConfigResult<Self> {
        let config: ClientConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.connection.replicas.is_empty() {
            return Err(ConfigError::NoReplicas);
        }
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }

    /// Write the configuration, creating parent directories as needed
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;
        write_file(path, contents.as_bytes())
    }
}

/// Read an identity key file
pub fn load_identity(path: &Path) -> ConfigResult<Identity> {
    let bytes = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Identity::from_bytes(&bytes).map_err(|source| ConfigError::Identity {
        path: path.to_path_buf(),
        source,
    })
}

/// Write an identity key file
pub fn save_identity(identity: &Identity, path: &Path) -> ConfigResult<()> {
    write_file(path, &identity.to_bytes())
}

fn write_file(path: &Path, bytes: &[u8]) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, bytes).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
