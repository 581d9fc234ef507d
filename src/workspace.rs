// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Workspace folder resolution.
//!
//! Decides which directories are advertised to the language server as
//! workspace folders. A configured `sources` path replaces the host's own
//! roots; a configured `testSources` path is appended unless it already lives
//! inside one of the resolved roots.

use anyhow::{Result, anyhow};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use url::Url;

/// Label given to the root created from the `sources` override.
pub const SOURCES_LABEL: &str = "NPL Sources";

/// Label given to the root created from the `testSources` override.
pub const TEST_SOURCES_LABEL: &str = "NPL Test Sources";

/// A directory the language server treats as a source scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceRoot {
    /// Filesystem location of the root.
    pub path: PathBuf,
    /// Human readable label.
    pub name: String,
    /// Position of the root in its list.
    pub index: usize,
}

impl WorkspaceRoot {
    /// Creates a root from its parts.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, index: usize) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            index,
        }
    }

    /// Creates a root named after the directory's last component.
    #[must_use]
    pub fn from_dir(path: impl Into<PathBuf>, index: usize) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| "workspace".to_string(), |s| s.to_string_lossy().to_string());
        Self { path, name, index }
    }

    /// Returns the `file://` URI of this root.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be expressed as a file URI.
    pub fn uri(&self) -> Result<Url> {
        Url::from_file_path(absolute_or_raw(&self.path))
            .map_err(|()| anyhow!("Invalid workspace path: {}", self.path.display()))
    }
}

/// Resolves the ordered list of roots to advertise to the language server.
///
/// `sources` and `test_sources` count as configured only when they contain
/// something other than whitespace. An empty result is valid; the caller
/// should carry on, but the server is unlikely to be useful.
#[must_use]
pub fn resolve(
    sources: Option<&str>,
    test_sources: Option<&str>,
    host_roots: &[WorkspaceRoot],
) -> Vec<WorkspaceRoot> {
    let mut roots = Vec::new();

    if let Some(sources) = configured(sources) {
        roots.push(WorkspaceRoot::new(sources, SOURCES_LABEL, 0));
        info!("Using custom workspace folder for sources: {}", sources);
    } else if !host_roots.is_empty() {
        roots.extend(host_roots.iter().cloned());
        info!(
            "Using host workspace folders: {}",
            roots
                .iter()
                .map(|r| r.path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if let Some(test_sources) = configured(test_sources) {
        let test_path = absolute_or_raw(Path::new(test_sources));

        if roots
            .iter()
            .any(|root| is_same_or_nested(&test_path, &absolute_or_raw(&root.path)))
        {
            info!(
                "Test sources folder ({}) is already included in the workspace folders",
                test_sources
            );
        } else {
            let index = roots.len();
            roots.push(WorkspaceRoot::new(test_path, TEST_SOURCES_LABEL, index));
            info!("Added test sources folder: {}", test_sources);
        }
    }

    if roots.is_empty() {
        warn!(
            "No workspace folders determined for the NPL Language Server. \
             The server might not function correctly."
        );
    }

    roots
}

/// Returns true if `candidate` equals `existing` or lies beneath it.
///
/// This is a plain string comparison bounded by a path separator (`/` or
/// `\`); symlinks and case-insensitive filesystems are not considered.
#[must_use]
pub fn is_same_or_nested(candidate: &Path, existing: &Path) -> bool {
    let candidate = candidate.to_string_lossy();
    let existing = existing.to_string_lossy();

    candidate == existing
        || candidate.starts_with(&format!("{existing}/"))
        || candidate.starts_with(&format!("{existing}\\"))
}

/// `path` made absolute against the working directory, or unchanged if that
/// is not possible.
fn absolute_or_raw(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn configured(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(path: &str, name: &str, index: usize) -> WorkspaceRoot {
        WorkspaceRoot::new(path, name, index)
    }

    #[test]
    fn test_sources_override_without_host_roots() {
        let roots = resolve(Some("/proj/src"), Some(""), &[]);
        assert_eq!(roots, vec![host("/proj/src", "NPL Sources", 0)]);
    }

    #[test]
    fn test_sources_override_replaces_host_roots() {
        let host_roots = [host("/a", "a", 0), host("/b", "b", 1)];
        let roots = resolve(Some("/proj/src"), None, &host_roots);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, PathBuf::from("/proj/src"));
        assert_eq!(roots[0].index, 0);
    }

    #[test]
    fn test_host_roots_are_mirrored() {
        let host_roots = [host("/b", "second", 0), host("/a", "first", 1)];
        let roots = resolve(Some("   "), None, &host_roots);
        assert_eq!(roots, host_roots.to_vec());
    }

    #[test]
    fn test_nested_test_sources_are_skipped() {
        let host_roots = [host("/proj/src", "root", 0)];
        let roots = resolve(None, Some("/proj/src/tests"), &host_roots);
        assert_eq!(roots, vec![host("/proj/src", "root", 0)]);
    }

    #[test]
    fn test_identical_test_sources_are_skipped() {
        let host_roots = [host("/proj", "root", 0)];
        let roots = resolve(None, Some("/proj"), &host_roots);
        assert_eq!(roots.len(), 1);
    }

    #[test]
    fn test_disjoint_test_sources_are_appended() {
        let host_roots = [host("/proj/src", "root", 0)];
        let roots = resolve(Some(""), Some("/proj/tests"), &host_roots);
        assert_eq!(
            roots,
            vec![
                host("/proj/src", "root", 0),
                host("/proj/tests", "NPL Test Sources", 1),
            ]
        );
    }

    #[test]
    fn test_sibling_with_shared_prefix_is_not_nested() {
        let host_roots = [host("/proj/src", "root", 0)];
        let roots = resolve(None, Some("/proj/src-test"), &host_roots);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[1].name, TEST_SOURCES_LABEL);
    }

    #[test]
    fn test_test_sources_follow_sources_override() {
        let roots = resolve(Some("/proj/main"), Some("/proj/test"), &[]);
        assert_eq!(roots[0].name, SOURCES_LABEL);
        assert_eq!(roots[1], host("/proj/test", TEST_SOURCES_LABEL, 1));
    }

    #[test]
    fn test_relative_test_sources_inside_relative_sources_are_skipped() {
        let roots = resolve(Some("src"), Some("src/tests"), &[]);
        assert_eq!(roots, vec![host("src", SOURCES_LABEL, 0)]);

        let roots = resolve(Some("src"), Some("tests"), &[]);
        assert_eq!(roots.len(), 2);
        assert!(roots[1].path.is_absolute());
    }

    #[test]
    fn test_nothing_configured_resolves_empty() {
        assert!(resolve(Some(""), Some(" "), &[]).is_empty());
        assert!(resolve(None, None, &[]).is_empty());
    }

    #[test]
    fn test_backslash_separator_counts_as_nested() {
        assert!(is_same_or_nested(
            Path::new(r"C:\proj\src\tests"),
            Path::new(r"C:\proj\src")
        ));
        assert!(!is_same_or_nested(
            Path::new(r"C:\proj\srcs"),
            Path::new(r"C:\proj\src")
        ));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(!is_same_or_nested(
            Path::new("/Proj/src/tests"),
            Path::new("/proj/src")
        ));
    }

    #[test]
    fn test_root_uri() -> Result<()> {
        let root = WorkspaceRoot::from_dir("/proj/src", 0);
        assert_eq!(root.name, "src");
        assert_eq!(root.uri()?.as_str(), "file:///proj/src");
        Ok(())
    }
}
