//! Store configuration.
//!
//! Loaded from an optional TOML file layered with `KVTABLE_`-prefixed
//! environment variables:
//!
//! ```toml
//! backend = "log"
//! path = "./data"
//! name = "utxo"
//! compression = "zstd"
//! sync_writes = true
//! comparator = "numeric_aware"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::KeyComparator;
use crate::error::{Error, Result};
use crate::storage::CompressionAlgorithm;

/// Environment variable prefix (`KVTABLE_BACKEND=log`).
pub const ENV_PREFIX: &str = "KVTABLE";

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Volatile ordered map; contents vanish on close.
    #[default]
    Memory,
    /// Append-log on disk with an in-memory index.
    Log,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Log => write!(f, "log"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "log" | "disk" => Ok(BackendKind::Log),
            other => Err(Error::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Configuration of one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Parent directory of the store.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Store name; the store lives in `path/name`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Log payload compression.
    #[serde(default)]
    pub compression: CompressionAlgorithm,

    /// fsync after every write batch.
    #[serde(default = "default_sync_writes")]
    pub sync_writes: bool,

    /// Key order. Fixed for the life of a durable store.
    #[serde(default)]
    pub comparator: KeyComparator,
}

fn default_path() -> PathBuf {
    PathBuf::from("./data")
}

fn default_name() -> String {
    "default".to_string()
}

fn default_sync_writes() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: default_path(),
            name: default_name(),
            compression: CompressionAlgorithm::default(),
            sync_writes: default_sync_writes(),
            comparator: KeyComparator::default(),
        }
    }
}

impl StoreConfig {
    /// In-memory store named `name`.
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Durable log store at `path/name`.
    pub fn log(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Log,
            path: path.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load from an optional TOML file, then apply `KVTABLE_*` environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(config::File::from(file).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Directory holding this store's files.
    pub fn store_dir(&self) -> PathBuf {
        self.path.join(&self.name)
    }
}
