//! Local file cache.
//!
//! Maps a file name to the owner, version and last modifier the client last
//! saw. The last modifier is the IV source for offline decryption via
//! `unlock`. Persisted as JSON, flushed after every mutation and at exit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedFile {
    pub owner: String,
    pub version: i64,
    pub last_modifier: String,
}

pub struct FileCache {
    path: PathBuf,
    entries: HashMap<String, CachedFile>,
}

impl FileCache {
    /// Load the cache from disk; a missing file starts an empty cache.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("corrupt cache file '{}'", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).context("failed to read cache file"),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn get(&self, file_name: &str) -> Option<&CachedFile> {
        self.entries.get(file_name)
    }

    pub fn put(&mut self, file_name: &str, entry: CachedFile) {
        self.entries.insert(file_name.to_string(), entry);
    }

    /// Flush the cache to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let contents = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write cache file '{}'", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::load(&dir.path().join("cache.json")).unwrap();
        assert!(cache.get("anything").is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let mut cache = FileCache::load(&path).unwrap();
        cache.put(
            "report.txt",
            CachedFile {
                owner: "alice".to_string(),
                version: 3,
                last_modifier: "bob".to_string(),
            },
        );
        cache.save().unwrap();

        let reloaded = FileCache::load(&path).unwrap();
        let entry = reloaded.get("report.txt").unwrap();
        assert_eq!(entry.owner, "alice");
        assert_eq!(entry.version, 3);
        assert_eq!(entry.last_modifier, "bob");
    }

    #[test]
    fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = FileCache::load(&dir.path().join("cache.json")).unwrap();

        cache.put(
            "f",
            CachedFile {
                owner: "alice".to_string(),
                version: 1,
                last_modifier: "alice".to_string(),
            },
        );
        cache.put(
            "f",
            CachedFile {
                owner: "alice".to_string(),
                version: 2,
                last_modifier: "bob".to_string(),
            },
        );

        assert_eq!(cache.get("f").unwrap().version, 2);
    }
}
