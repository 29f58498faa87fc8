//! In-memory bundle and the accessor checks read collected data through.

use crate::error::BundleError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read access to collected files.
///
/// Checks never touch the filesystem; whether a bundle came from a
/// directory, an archive or a remote store is invisible to them.
pub trait BundleAccessor: Send + Sync {
    fn get_file_contents(&self, path: &str) -> Result<Vec<u8>, BundleError>;

    /// Files matching `pattern` (`*`, `?`, `**`) and none of `excludes`.
    fn find_files(
        &self,
        pattern: &str,
        excludes: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>, BundleError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BundleMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub version: String,
    pub generated_by: String,
    pub labels: BTreeMap<String, String>,
}

/// A collected, read-only snapshot of diagnostic files keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    files: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub metadata: BundleMetadata,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(normalize(path), contents.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

impl BundleAccessor for Bundle {
    fn get_file_contents(&self, path: &str) -> Result<Vec<u8>, BundleError> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| BundleError::NotFound(path.to_string()))
    }

    fn find_files(
        &self,
        pattern: &str,
        excludes: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>, BundleError> {
        let include = glob_to_regex(pattern)?;
        let excludes = excludes
            .iter()
            .map(|e| glob_to_regex(e))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .files
            .iter()
            .filter(|(path, _)| include.is_match(path))
            .filter(|(path, _)| !excludes.iter().any(|e| e.is_match(path)))
            .map(|(path, contents)| (path.clone(), contents.clone()))
            .collect())
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    trimmed.replace('\\', "/")
}

/// Translate a glob into an anchored regex. `**` crosses directories,
/// `*` and `?` do not.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, BundleError> {
    let normalized = normalize(pattern);
    if normalized.is_empty() {
        return Err(BundleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "empty pattern".to_string(),
        });
    }

    let mut out = String::from("^");
    let mut chars = normalized.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                if chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("(?:.*/)?");
                } else {
                    out.push_str(".*");
                }
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');

    Regex::new(&out).map_err(|e| BundleError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Bundle {
        Bundle::new()
            .with_file("cluster-resources/nodes.json", "[]")
            .with_file("./host-collectors/run-host/disk.json", "{}")
            .with_file("host-collectors/run-host/cpu.json", "{}")
            .with_file("host-collectors/logs/disk.log", "boot")
    }

    #[test]
    fn test_get_file_contents() {
        let bundle = bundle();
        assert_eq!(
            bundle.get_file_contents("cluster-resources/nodes.json").unwrap(),
            b"[]".to_vec()
        );
        assert_eq!(
            bundle.get_file_contents("/host-collectors/run-host/disk.json").unwrap(),
            b"{}".to_vec()
        );
        assert_eq!(
            bundle.get_file_contents("missing.json"),
            Err(BundleError::NotFound("missing.json".to_string()))
        );
    }

    #[test]
    fn test_find_files_with_excludes() {
        let bundle = bundle();
        let found = bundle.find_files("host-collectors/*/*.json", &[]).unwrap();
        assert_eq!(found.len(), 2);

        let found = bundle
            .find_files("host-collectors/**", &["**/cpu.json".to_string()])
            .unwrap();
        let paths: Vec<&str> = found.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec!["host-collectors/logs/disk.log", "host-collectors/run-host/disk.json"]
        );
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("**/disk.?son").unwrap();
        assert!(re.is_match("disk.json"));
        assert!(re.is_match("a/b/disk.json"));
        assert!(!re.is_match("a/b/disk.js"));
        assert!(!glob_to_regex("*.json").unwrap().is_match("dir/a.json"));
        assert!(glob_to_regex("").is_err());
    }
}
