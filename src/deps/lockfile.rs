//! Lock-state file: `apm_modules/.apm-lock`.
//!
//! A deterministic JSON record of what is installed. Keys are sorted (the
//! maps are `BTreeMap`) and the file is pretty-printed with 2-space
//! indentation so diffs stay reviewable. Readers tolerate unknown keys.

use crate::error::ApmError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One installed package's record. Fields are declared in alphabetical
/// order so the serialized keys come out sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// ISO-8601 UTC timestamp of the install.
    pub installed_at: String,
    /// Ref as requested in the manifest; None means default branch.
    pub ref_requested: Option<String>,
    /// Commit SHA the ref resolved to at install time.
    pub resolved_sha: String,
}

/// The whole lock file: `owner/repo` -> record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    pub packages: BTreeMap<String, LockRecord>,
}

impl LockFile {
    /// Load the lock file, or an empty one when absent.
    pub fn load(path: &Path) -> Result<Self, ApmError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ApmError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ApmError::Config(format!(
            "unreadable lock file {}: {}",
            path.display(),
            e
        )))
    }

    /// Write the lock file with sorted keys and a trailing newline.
    pub fn save(&self, path: &Path) -> Result<(), ApmError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApmError::io(parent, e))?;
        }
        let mut text =
            serde_json::to_string_pretty(self).map_err(|e| ApmError::Config(e.to_string()))?;
        text.push('\n');
        std::fs::write(path, text).map_err(|e| ApmError::io(path, e))
    }

    /// Recorded SHA for a package key, if any.
    pub fn resolved_sha(&self, key: &str) -> Option<&str> {
        self.packages.get(key).map(|r| r.resolved_sha.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_with_sorted_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".apm-lock");

        let mut lock = LockFile::default();
        lock.packages.insert(
            "zeta/pack".to_string(),
            LockRecord {
                ref_requested: None,
                resolved_sha: "beef".to_string(),
                installed_at: "2026-01-01T00:00:00Z".to_string(),
            },
        );
        lock.packages.insert(
            "acme/ctx".to_string(),
            LockRecord {
                ref_requested: Some("v1".to_string()),
                resolved_sha: "abcd".to_string(),
                installed_at: "2026-01-01T00:00:00Z".to_string(),
            },
        );
        lock.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let acme = text.find("acme/ctx").unwrap();
        let zeta = text.find("zeta/pack").unwrap();
        assert!(acme < zeta, "keys must serialize sorted");
        assert!(text.ends_with('\n'));
        assert!(text.contains("  \"packages\""), "2-space indentation");

        let loaded = LockFile::load(&path).unwrap();
        assert_eq!(loaded, lock);
        assert_eq!(loaded.resolved_sha("acme/ctx"), Some("abcd"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let lock = LockFile::load(&temp.path().join(".apm-lock")).unwrap();
        assert!(lock.packages.is_empty());
    }

    #[test]
    fn readers_tolerate_unknown_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".apm-lock");
        std::fs::write(
            &path,
            r#"{"packages":{"a/b":{"ref_requested":null,"resolved_sha":"ff","installed_at":"t","future":1}},"future_top":true}"#,
        )
        .unwrap();
        let lock = LockFile::load(&path).unwrap();
        assert_eq!(lock.resolved_sha("a/b"), Some("ff"));
    }
}
