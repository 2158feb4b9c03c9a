use std::{error::Error, fmt, fs, io, path::Path};

use serde::Deserialize;

use crate::cache::{Cache, ConfigError};

#[derive(Debug, Deserialize)]
struct CacheConfig {
    name: String,
    size: usize,
    block_size: Option<usize>,
    assoc: usize,
}

/// Caches to instantiate, in lookup order.
#[derive(Debug, Deserialize)]
pub struct Config {
    block_size: Option<usize>,
    caches: Vec<CacheConfig>,
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Io(io::Error),
    Json(serde_json::Error),
    NoCaches,
    MissingBlockSize { name: String },
    Geometry { name: String, source: ConfigError },
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadError::Io(err) => write!(f, "could not read config: {err}"),
            ConfigLoadError::Json(err) => write!(f, "invalid config: {err}"),
            ConfigLoadError::NoCaches => write!(f, "config lists no caches"),
            ConfigLoadError::MissingBlockSize { name } => {
                write!(f, "cache {name} has no block_size and there is no default")
            }
            ConfigLoadError::Geometry { name, source } => write!(f, "cache {name}: {source}"),
        }
    }
}

impl Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigLoadError::Io(err) => Some(err),
            ConfigLoadError::Json(err) => Some(err),
            ConfigLoadError::Geometry { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for ConfigLoadError {
    fn from(err: io::Error) -> Self {
        ConfigLoadError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigLoadError {
    fn from(err: serde_json::Error) -> Self {
        ConfigLoadError::Json(err)
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigLoadError> {
        let config: Config = serde_json::from_str(json)?;
        if config.caches.is_empty() {
            return Err(ConfigLoadError::NoCaches);
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        Config::from_json(&fs::read_to_string(path)?)
    }

    /// A single 32 KiB, 8-way cache with 64 byte lines.
    pub fn single_l1() -> Self {
        Config {
            block_size: Some(64),
            caches: vec![CacheConfig {
                name: "L1".to_string(),
                size: 32 * 1024,
                block_size: None,
                assoc: 8,
            }],
        }
    }

    pub fn to_caches(self) -> Result<Vec<Cache>, ConfigLoadError> {
        let default_block_size = self.block_size;
        self.caches
            .into_iter()
            .map(|cc| {
                let block_size = cc
                    .block_size
                    .or(default_block_size)
                    .ok_or_else(|| ConfigLoadError::MissingBlockSize {
                        name: cc.name.clone(),
                    })?;
                Cache::with_name(cc.name.clone(), cc.size, block_size, cc.assoc).map_err(
                    |source| ConfigLoadError::Geometry {
                        name: cc.name,
                        source,
                    },
                )
            })
            .collect()
    }
}
