//! Filesystem discovery for an ingest root.
//!
//! Walks the root with `walkdir`, drops default and user exclude patterns
//! (globset, matched against the path relative to the root), skips editor
//! lock files and Finder metadata, and returns every remaining file in
//! deterministic order. Files with an unsupported extension are returned too,
//! flagged `supported = false`, so the indexer can count them.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::IndexError;
use crate::extract;

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/.venv/**",
    "**/__pycache__/**",
    "**/.pytest_cache/**",
    "**/.mypy_cache/**",
    "**/.ruff_cache/**",
    "**/.cache/**",
    "**/.Trash/**",
];

#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Canonical absolute path, used as the document id.
    pub doc_id: String,
    pub source_path: String,
    pub supported: bool,
}

pub fn discover(root: &Path, exclude_globs: &[String], follow_symlinks: bool) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        bail!(IndexError::config(format!(
            "ingest root does not exist or is not a directory: {}",
            root.display()
        )));
    }
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Failed to resolve ingest root: {}", root.display()))?;

    let exclude_set = exclude_set(exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(follow_symlinks) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable path during discovery");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if should_skip_filename(path) {
            continue;
        }

        let relative = path.strip_prefix(&root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        files.push(DiscoveredFile {
            doc_id: canonical.to_string_lossy().to_string(),
            source_path: path.to_string_lossy().to_string(),
            supported: extract::is_supported(path),
            path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    files.dedup_by(|a, b| a.doc_id == b.doc_id);
    Ok(files)
}

/// Office lock files (`~$report.docx`) and `.DS_Store`.
pub fn should_skip_filename(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.starts_with("~$") || name == ".DS_Store",
        None => false,
    }
}

/// Default excludes plus `exclude_globs`. A malformed pattern is a
/// configuration error.
pub fn exclude_set(exclude_globs: &[String]) -> Result<GlobSet> {
    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    patterns.extend(exclude_globs.iter().cloned());
    build_globset(&patterns)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::config(format!("invalid exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
