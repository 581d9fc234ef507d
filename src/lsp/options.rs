// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-start client configuration snapshot.

use anyhow::{Result, anyhow};
use lsp_types::{Uri, WorkspaceFolder};
use serde::Serialize;
use url::Url;

use crate::workspace::WorkspaceRoot;

/// Language id of NPL documents.
pub const LANGUAGE_ID: &str = "npl";

/// How many times a closed connection may be re-established before the
/// client gives up.
pub const MAX_RESTART_COUNT: u32 = 3;

/// Which documents the client is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSelector {
    /// URI scheme, e.g. `file`.
    pub scheme: String,
    /// Language id, e.g. `npl`.
    pub language: String,
}

impl DocumentSelector {
    /// On-disk NPL documents.
    #[must_use]
    pub fn npl_files() -> Self {
        Self {
            scheme: "file".to_string(),
            language: LANGUAGE_ID.to_string(),
        }
    }

    /// Returns true if a document with this URI and language id belongs to
    /// the client.
    #[must_use]
    pub fn matches(&self, uri: &Url, language_id: &str) -> bool {
        uri.scheme() == self.scheme && language_id == self.language
    }
}

/// Immutable snapshot built once per start.
///
/// A settings change never edits a snapshot; the controller builds a new one
/// on its next start.
#[derive(Debug, Clone)]
pub struct ClientConfiguration {
    roots: Vec<WorkspaceRoot>,
    debounce_ms: u64,
    contrib_libraries: Option<Vec<String>>,
    selector: DocumentSelector,
    max_restart_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializationOptions {
    effective_workspace_folders: Vec<EffectiveFolder>,
    npl_server_debouncing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    npl_contrib_libraries: Option<Vec<String>>,
}

#[derive(Serialize)]
struct EffectiveFolder {
    uri: String,
    name: String,
}

impl ClientConfiguration {
    /// Creates a snapshot for NPL files with the default restart ceiling.
    #[must_use]
    pub fn new(
        roots: Vec<WorkspaceRoot>,
        debounce_ms: u64,
        contrib_libraries: Option<Vec<String>>,
    ) -> Self {
        Self {
            roots,
            debounce_ms,
            contrib_libraries,
            selector: DocumentSelector::npl_files(),
            max_restart_count: MAX_RESTART_COUNT,
        }
    }

    /// Overrides the restart ceiling.
    #[must_use]
    pub const fn with_max_restart_count(mut self, max_restart_count: u32) -> Self {
        self.max_restart_count = max_restart_count;
        self
    }

    /// Resolved workspace roots.
    #[must_use]
    pub fn roots(&self) -> &[WorkspaceRoot] {
        &self.roots
    }

    /// Debounce interval passed to the server.
    #[must_use]
    pub const fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    /// Contributed library identifiers passed to the server.
    #[must_use]
    pub fn contrib_libraries(&self) -> Option<&[String]> {
        self.contrib_libraries.as_deref()
    }

    /// Documents this client handles.
    #[must_use]
    pub const fn selector(&self) -> &DocumentSelector {
        &self.selector
    }

    /// Restart ceiling for closed connections.
    #[must_use]
    pub const fn max_restart_count(&self) -> u32 {
        self.max_restart_count
    }

    /// Roots as LSP workspace folders.
    ///
    /// # Errors
    ///
    /// Returns an error if a root cannot be expressed as a URI.
    pub fn workspace_folders(&self) -> Result<Vec<WorkspaceFolder>> {
        self.roots
            .iter()
            .map(|root| {
                let url = root.uri()?;
                let uri: Uri = url
                    .as_str()
                    .parse()
                    .map_err(|e| anyhow!("Invalid root URI {url}: {e}"))?;
                Ok(WorkspaceFolder {
                    uri,
                    name: root.name.clone(),
                })
            })
            .collect()
    }

    /// The `initializationOptions` payload sent with `initialize`.
    ///
    /// # Errors
    ///
    /// Returns an error if a root cannot be expressed as a URI.
    pub fn initialization_options(&self) -> Result<serde_json::Value> {
        let folders = self
            .roots
            .iter()
            .map(|root| {
                Ok(EffectiveFolder {
                    uri: root.uri()?.to_string(),
                    name: root.name.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(serde_json::to_value(InitializationOptions {
            effective_workspace_folders: folders,
            npl_server_debouncing_time_ms: self.debounce_ms,
            npl_contrib_libraries: self.contrib_libraries.clone(),
        })?)
    }

    /// `name (path), ...` for log lines.
    #[must_use]
    pub fn describe_roots(&self) -> String {
        self.roots
            .iter()
            .map(|r| format!("{} ({})", r.name, r.path.display()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
