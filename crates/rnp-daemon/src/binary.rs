//! Locating the frame-streaming server binary
//!
//! The stream server is built locally, so its path is not fixed. Unless the
//! configuration names the binary explicitly, the search root is scanned once
//! for files whose path ends with the configured suffix and the most recently
//! modified one wins.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use rnp_core::prelude::*;

/// How to find the stream binary
#[derive(Debug)]
pub struct StreamBinary {
    explicit: Option<PathBuf>,
    search_root: PathBuf,
    suffix: PathBuf,
    resolved: OnceLock<PathBuf>,
}

impl StreamBinary {
    /// Discover the binary under `search_root`
    pub fn discover(search_root: impl Into<PathBuf>, suffix: impl Into<PathBuf>) -> Self {
        Self {
            explicit: None,
            search_root: search_root.into(),
            suffix: suffix.into(),
            resolved: OnceLock::new(),
        }
    }

    /// Use `path` as is, skipping discovery
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            search_root: path.clone(),
            suffix: PathBuf::new(),
            explicit: Some(path),
            resolved: OnceLock::new(),
        }
    }

    /// Path of the binary, scanning on first use.
    ///
    /// A successful scan is cached for the lifetime of this value.
    pub fn resolve(&self) -> Result<PathBuf> {
        if let Some(path) = &self.explicit {
            return Ok(path.clone());
        }
        if let Some(path) = self.resolved.get() {
            return Ok(path.clone());
        }

        let found = find_newest_binary(&self.search_root, &self.suffix)?;
        info!("Using stream binary {}", found.display());
        Ok(self.resolved.get_or_init(|| found).clone())
    }
}

/// Newest file under `root` whose path ends with `suffix`
pub fn find_newest_binary(root: &Path, suffix: &Path) -> Result<PathBuf> {
    let mut candidates = Vec::new();
    collect_candidates(root, suffix, &mut candidates);

    candidates
        .into_iter()
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
        .ok_or_else(|| Error::BinaryNotFound {
            searched: root.to_path_buf(),
        })
}

fn collect_candidates(dir: &Path, suffix: &Path, out: &mut Vec<(PathBuf, SystemTime)>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            trace!("Skipping {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        // Symlinked directories are not followed, DerivedData is full of them
        if file_type.is_dir() {
            collect_candidates(&path, suffix, out);
        } else if path.ends_with(suffix) {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            out.push((path, modified));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const SUFFIX: &str = "Build/Products/Debug/StreamServer";

    fn make_binary(root: &Path, project: &str, age: Duration) -> PathBuf {
        let path = root.join(project).join(SUFFIX);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    #[test]
    fn test_picks_newest_candidate() {
        let temp = TempDir::new().unwrap();
        make_binary(temp.path(), "StreamServer-old", Duration::from_secs(3600));
        let newest = make_binary(temp.path(), "StreamServer-new", Duration::from_secs(10));
        make_binary(temp.path(), "StreamServer-mid", Duration::from_secs(600));

        let found = find_newest_binary(temp.path(), Path::new(SUFFIX)).unwrap();
        assert_eq!(found, newest);
    }

    #[test]
    fn test_ignores_paths_without_suffix() {
        let temp = TempDir::new().unwrap();
        let other = temp.path().join("Build/Products/Release/StreamServer");
        fs::create_dir_all(other.parent().unwrap()).unwrap();
        fs::write(&other, b"").unwrap();

        let err = find_newest_binary(temp.path(), Path::new(SUFFIX)).unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let err = find_newest_binary(Path::new("/nonexistent/rnp"), Path::new(SUFFIX)).unwrap_err();
        assert!(matches!(err, Error::BinaryNotFound { .. }));
    }

    #[test]
    fn test_resolution_is_cached() {
        let temp = TempDir::new().unwrap();
        let first = make_binary(temp.path(), "A", Duration::from_secs(100));
        let binary = StreamBinary::discover(temp.path(), SUFFIX);
        assert_eq!(binary.resolve().unwrap(), first);

        // A newer build appearing later does not change the answer
        make_binary(temp.path(), "B", Duration::from_secs(0));
        assert_eq!(binary.resolve().unwrap(), first);
    }

    #[test]
    fn test_explicit_path_bypasses_discovery() {
        let binary = StreamBinary::explicit("/opt/stream/server");
        assert_eq!(binary.resolve().unwrap(), PathBuf::from("/opt/stream/server"));
    }
}
