// src/concretizer/cache.rs

//! Cache of concretization results
//!
//! Entries are keyed by the canonical request string. A persisted cache also
//! records the digest of the registry it was computed against; opening it
//! with a different registry starts from an empty cache.

use crate::error::{Error, Result};
use crate::spec::Spec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    digest: String,
    entries: BTreeMap<String, Spec>,
}

#[derive(Debug, Default)]
pub struct ConcreteCache {
    file: CacheFile,
    path: Option<PathBuf>,
}

impl ConcreteCache {
    /// In-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache persisted at `path` for a registry with `digest`
    pub fn open(path: &Path, digest: &str) -> Result<Self> {
        let mut file = CacheFile {
            digest: digest.to_string(),
            entries: BTreeMap::new(),
        };

        if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            let stored: CacheFile = serde_json::from_str(&content)
                .map_err(|e| Error::ParseError(format!("Invalid cache {}: {}", path.display(), e)))?;

            if stored.digest == digest {
                debug!("Loaded {} cached results from {}", stored.entries.len(), path.display());
                file = stored;
            } else {
                info!("Recipes changed since {} was written, ignoring cached results", path.display());
            }
        }

        Ok(Self {
            file,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get(&self, request: &str) -> Option<&Spec> {
        self.file.entries.get(request)
    }

    pub fn insert(&mut self, request: impl Into<String>, spec: Spec) {
        self.file.entries.insert(request.into(), spec);
    }

    pub fn len(&self) -> usize {
        self.file.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.file.entries.clear();
    }

    /// Write the cache to its file; a no-op for in-memory caches
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(&self.file)
            .map_err(|e| Error::ParseError(format!("Failed to serialize cache: {}", e)))?;
        fs::write(path, json).map_err(|e| Error::io(path, e))?;

        debug!("Saved {} cached results to {}", self.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::VariantMap;
    use crate::version::Version;

    fn spec() -> Spec {
        Spec::concrete("zlib", Version::parse("1.3").unwrap(), VariantMap::parse("+pic").unwrap())
    }

    #[test]
    fn test_in_memory() {
        let mut cache = ConcreteCache::new();
        assert!(cache.is_empty());
        cache.insert("zlib", spec());
        assert_eq!(cache.get("zlib"), Some(&spec()));
        assert!(cache.save().is_ok());
        cache.clear();
        assert!(cache.get("zlib").is_none());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/concrete.json");

        let mut cache = ConcreteCache::open(&path, "abc").unwrap();
        cache.insert("zlib+pic", spec());
        cache.save().unwrap();

        let reopened = ConcreteCache::open(&path, "abc").unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("zlib+pic"), Some(&spec()));
    }

    #[test]
    fn test_digest_mismatch_discards_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concrete.json");

        let mut cache = ConcreteCache::open(&path, "old").unwrap();
        cache.insert("zlib", spec());
        cache.save().unwrap();

        let reopened = ConcreteCache::open(&path, "new").unwrap();
        assert!(reopened.is_empty());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concrete.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ConcreteCache::open(&path, "abc"), Err(Error::ParseError(_))));
    }
}
