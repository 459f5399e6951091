use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 64;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_PLACEHOLDER_PATH: &str = "assets/thumbnail_broken.png";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub timings: bool,
    pub thumbnails: ThumbnailsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThumbnailsConfig {
    /// Edge of the square box previews are fitted into.
    pub size: u32,
    pub workers: usize,
    pub placeholder_path: Option<String>,
    /// Overrides `$XDG_CACHE_HOME` when looking up system thumbnails.
    pub cache_home: Option<String>,
    pub use_system_cache: bool,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_THUMBNAIL_SIZE,
            workers: DEFAULT_WORKERS,
            placeholder_path: Some(DEFAULT_PLACEHOLDER_PATH.into()),
            cache_home: None,
            use_system_cache: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display(path),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: display(path),
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(contents)?;
        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        self.thumbnails.normalize();
    }
}

impl ThumbnailsConfig {
    fn normalize(&mut self) {
        if self.size == 0 {
            self.size = DEFAULT_THUMBNAIL_SIZE;
        }
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if let Some(path) = &self.placeholder_path {
            if path.trim().is_empty() {
                self.placeholder_path = None;
            }
        }
        if let Some(home) = &self.cache_home {
            let trimmed = home.trim();
            if trimmed.is_empty() {
                self.cache_home = None;
            } else {
                self.cache_home = Some(trimmed.to_string());
            }
        }
    }

    pub fn cache_home(&self) -> Option<PathBuf> {
        self.cache_home.as_ref().map(PathBuf::from)
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub fn default_config_path(dir: &Path) -> PathBuf {
    dir.join("yoga-thumbnails.toml")
}
