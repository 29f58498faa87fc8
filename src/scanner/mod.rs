//! Bundle directory loader.
//!
//! Walks an extracted support bundle and reads every file that passes the
//! exclude patterns and size limit into an in-memory [`Bundle`].

use crate::bundle::{glob_to_regex, Bundle};
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Configuration for bundle scanning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory names or glob patterns (relative to the bundle root) to skip
    pub excludes: Vec<String>,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    /// Maximum number of files to load
    pub max_files: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            excludes: vec![".git".to_string(), "**/*.tar.gz".to_string()],
            max_file_size: 10 * 1024 * 1024, // 10MB
            max_files: None,
        }
    }
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            excludes: config.excludes.clone(),
            max_file_size: config.max_file_size,
            max_files: (config.max_files > 0).then_some(config.max_files),
        }
    }
}

/// Loads a bundle directory from disk.
pub struct BundleScanner {
    config: ScanConfig,
    root: PathBuf,
}

impl BundleScanner {
    pub fn new(root: PathBuf, config: ScanConfig) -> Self {
        Self { config, root }
    }

    fn exclude_patterns(&self) -> Result<Vec<Regex>> {
        self.config
            .excludes
            .iter()
            .filter(|p| p.contains(['*', '?', '/']))
            .map(|p| glob_to_regex(p).with_context(|| format!("Invalid exclude pattern {}", p)))
            .collect()
    }

    /// Check if a single path component is excluded by name.
    fn is_excluded_name(&self, name: &str) -> bool {
        self.config.excludes.iter().any(|pattern| name == pattern)
    }

    /// Read the bundle into memory.
    pub fn load(&self) -> Result<Bundle> {
        if !self.root.is_dir() {
            anyhow::bail!("Bundle directory not found: {}", self.root.display());
        }

        let patterns = self.exclude_patterns()?;
        let mut bundle = Bundle::new();
        let mut skipped = 0usize;

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !self.is_excluded_name(&entry.file_name().to_string_lossy())
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Cannot read entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(max) = self.config.max_files {
                if bundle.len() >= max {
                    warn!("File limit of {} reached, remaining files skipped", max);
                    break;
                }
            }

            let relative = relative_path(&self.root, entry.path());
            if patterns.iter().any(|p| p.is_match(&relative)) {
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.config.max_file_size {
                debug!("Skipping {} ({} bytes)", relative, size);
                skipped += 1;
                continue;
            }

            match fs::read(entry.path()) {
                Ok(contents) => bundle.insert(&relative, contents),
                Err(e) => warn!("Failed to read {}: {}", relative, e),
            }
        }

        bundle.metadata.created_at = Some(Utc::now());
        bundle.metadata.generated_by = format!("bundlecheck {}", env!("CARGO_PKG_VERSION"));
        info!(
            "Loaded {} files from {} ({} over size limit)",
            bundle.len(),
            self.root.display(),
            skipped
        );
        Ok(bundle)
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleAccessor;
    use tempfile::TempDir;

    fn write(dir: &Path, path: &str, contents: &str) {
        let full = dir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, contents).unwrap();
    }

    #[test]
    fn test_load_bundle_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "host/memory.json", r#"{"available": "1Gi"}"#);
        write(dir.path(), "cluster-resources/nodes.json", "[]");
        write(dir.path(), ".git/HEAD", "ref");
        write(dir.path(), "logs/app.log.tar.gz", "binary");

        let scanner = BundleScanner::new(dir.path().to_path_buf(), ScanConfig::default());
        let bundle = scanner.load().unwrap();

        let paths: Vec<&str> = bundle.paths().collect();
        assert_eq!(paths, vec!["cluster-resources/nodes.json", "host/memory.json"]);
        assert_eq!(
            bundle.get_file_contents("host/memory.json").unwrap(),
            br#"{"available": "1Gi"}"#.to_vec()
        );
        assert!(bundle.metadata.created_at.is_some());
    }

    #[test]
    fn test_size_and_count_limits() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.json", "{}");
        write(dir.path(), "b.json", &"x".repeat(64));
        write(dir.path(), "c.json", "{}");

        let config = ScanConfig {
            excludes: vec![],
            max_file_size: 16,
            max_files: None,
        };
        let bundle = BundleScanner::new(dir.path().to_path_buf(), config.clone())
            .load()
            .unwrap();
        assert_eq!(bundle.paths().collect::<Vec<_>>(), vec!["a.json", "c.json"]);

        let limited = ScanConfig {
            max_files: Some(1),
            ..config
        };
        let bundle = BundleScanner::new(dir.path().to_path_buf(), limited)
            .load()
            .unwrap();
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let scanner = BundleScanner::new(dir.path().join("absent"), ScanConfig::default());
        assert!(scanner.load().is_err());
    }
}
