//! Read-only lookup of thumbnails other applications already rendered.
//!
//! The freedesktop.org convention stores them under
//! `$XDG_CACHE_HOME/thumbnails/<tier>/<md5 of the file URI>.png`.

use std::env;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Where pre-rendered thumbnails for a source file may live, best first.
pub trait CacheLayout: Send + Sync {
    fn candidates(&self, source: &Path) -> Vec<PathBuf>;
}

/// Returns the first candidate that exists on disk. Freshness is not checked.
pub fn find_cached_thumbnail(layout: &dyn CacheLayout, source: &Path) -> Option<PathBuf> {
    layout
        .candidates(source)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Normal,
    Large,
}

impl CacheTier {
    pub const LOOKUP_ORDER: [CacheTier; 2] = [CacheTier::Normal, CacheTier::Large];

    pub fn directory_name(self) -> &'static str {
        match self {
            CacheTier::Normal => "normal",
            CacheTier::Large => "large",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FreedesktopLayout {
    cache_home: PathBuf,
}

impl FreedesktopLayout {
    pub fn new(cache_home: impl Into<PathBuf>) -> Self {
        Self {
            cache_home: cache_home.into(),
        }
    }

    /// Uses `$XDG_CACHE_HOME`, falling back to the platform cache directory.
    pub fn from_env() -> Option<Self> {
        env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .filter(|dir| dir.is_absolute())
            .or_else(dirs::cache_dir)
            .map(|dir| Self::new(dir))
    }

    pub fn cache_home(&self) -> &Path {
        &self.cache_home
    }

    pub fn thumbnail_path(&self, uri: &str, tier: CacheTier) -> PathBuf {
        self.cache_home
            .join("thumbnails")
            .join(tier.directory_name())
            .join(thumbnail_name(uri))
    }
}

impl CacheLayout for FreedesktopLayout {
    fn candidates(&self, source: &Path) -> Vec<PathBuf> {
        let Some(uri) = file_uri(source) else {
            return Vec::new();
        };
        CacheTier::LOOKUP_ORDER
            .iter()
            .map(|tier| self.thumbnail_path(&uri, *tier))
            .collect()
    }
}

/// Never finds anything; disables system cache lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheLayout for NoCache {
    fn candidates(&self, _source: &Path) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// `file://` URI of the absolute path, percent-encoded.
///
/// `.` and `..` are resolved lexically. Symlinks are kept, so a file reached
/// through a link is keyed by the link's own URI like other desktop tools do.
pub fn file_uri(path: &Path) -> Option<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().ok()?.join(path)
    };
    Url::from_file_path(normalize_lexically(&absolute))
        .ok()
        .map(String::from)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

pub fn thumbnail_name(uri: &str) -> String {
    format!("{:x}.png", md5::compute(uri.as_bytes()))
}
