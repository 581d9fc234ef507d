// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Host collaborators.
//!
//! The lifecycle controller never talks to an editor directly. It asks a
//! [`Host`] for workspace roots and settings, listens to its configuration
//! change stream, and reports outcomes through it. [`LocalHost`] is the
//! implementation used by the `npl-client` binary: roots come from the
//! command line and settings from `.npl/settings.json` files.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::{SettingKey, Settings, write_setting};
use crate::workspace::WorkspaceRoot;

/// Capacity of the configuration change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification that one or more settings changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationChange {
    /// Fully qualified keys that changed (e.g. `NPL.sources`).
    pub keys: Vec<String>,
}

impl ConfigurationChange {
    /// Builds a change event from setting keys.
    #[must_use]
    pub fn of(keys: &[SettingKey]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.qualified()).collect(),
        }
    }

    /// Returns true if the change touches `key`, its parent section, or one
    /// of its children.
    #[must_use]
    pub fn affects(&self, key: SettingKey) -> bool {
        let wanted = key.qualified();
        self.keys.iter().any(|changed| {
            changed == &wanted
                || wanted.starts_with(&format!("{changed}."))
                || changed.starts_with(&format!("{wanted}."))
        })
    }
}

/// Everything the lifecycle code needs from the hosting editor.
#[async_trait]
pub trait Host: Send + Sync {
    /// The host's own workspace roots, in host order.
    fn workspace_roots(&self) -> Vec<WorkspaceRoot>;

    /// Settings visible from `scope` (a workspace folder), or the
    /// workspace-wide settings when `scope` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be read.
    fn settings(&self, scope: Option<&Path>) -> Result<Settings>;

    /// Subscribes to configuration changes. Only changes sent after the call
    /// are delivered.
    fn subscribe_configuration(&self) -> broadcast::Receiver<ConfigurationChange>;

    /// Persists `value` under `key` in the settings of the folder `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be written.
    async fn update_setting(
        &self,
        scope: &Path,
        key: SettingKey,
        value: serde_json::Value,
    ) -> Result<()>;

    /// Asks the user to pick a folder. `None` means the user cancelled.
    async fn pick_folder(&self, label: &str, default: &Path) -> Option<PathBuf>;

    /// Shows an informational message to the user.
    fn show_info(&self, message: &str);

    /// Shows an error message to the user.
    fn show_error(&self, message: &str);
}

/// File-backed host used by the command-line client.
pub struct LocalHost {
    roots: Vec<WorkspaceRoot>,
    user_file: Option<PathBuf>,
    changes: broadcast::Sender<ConfigurationChange>,
    snapshots: Mutex<HashMap<Option<PathBuf>, Settings>>,
    picks: Mutex<VecDeque<PathBuf>>,
}

impl LocalHost {
    /// Creates a host over the given root directories.
    ///
    /// Settings are read from `user_file` (if any) and each root's
    /// `.npl/settings.json`.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>, user_file: Option<PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .enumerate()
            .map(|(index, path)| WorkspaceRoot::from_dir(path, index))
            .collect();
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let host = Self {
            roots,
            user_file,
            changes,
            snapshots: Mutex::new(HashMap::new()),
            picks: Mutex::new(VecDeque::new()),
        };
        host.reload_quietly();
        host
    }

    fn scopes(&self) -> Vec<Option<PathBuf>> {
        std::iter::once(None)
            .chain(self.roots.iter().map(|r| Some(r.path.clone())))
            .collect()
    }

    fn reload_quietly(&self) {
        if let Ok(mut snapshots) = self.snapshots.lock() {
            for scope in self.scopes() {
                match Settings::load(self.user_file.as_deref(), scope.as_deref()) {
                    Ok(settings) => {
                        snapshots.insert(scope, settings);
                    }
                    Err(e) => warn!("Failed to load NPL settings: {e:#}"),
                }
            }
        }
    }

    /// Re-reads every settings file and broadcasts the keys that changed.
    ///
    /// Returns the changed keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file cannot be loaded; the previous
    /// snapshot is kept in that case.
    pub fn reload(&self) -> Result<Vec<SettingKey>> {
        let fresh_snapshots = self
            .scopes()
            .into_iter()
            .map(|scope| {
                Settings::load(self.user_file.as_deref(), scope.as_deref()).map(|s| (scope, s))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut changed: Vec<SettingKey> = Vec::new();
        {
            let mut snapshots = self
                .snapshots
                .lock()
                .map_err(|_| anyhow!("mutex poisoned"))?;

            for (scope, fresh) in fresh_snapshots {
                let previous = snapshots.get(&scope).cloned().unwrap_or_default();
                for key in previous.changed_keys(&fresh) {
                    if !changed.contains(&key) {
                        changed.push(key);
                    }
                }
                snapshots.insert(scope, fresh);
            }
        }

        if changed.is_empty() {
            debug!("Settings reloaded, nothing changed");
        } else {
            info!(
                "Settings changed: {}",
                changed
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            // No receivers simply means nobody is listening yet.
            let _ = self.changes.send(ConfigurationChange::of(&changed));
        }

        Ok(changed)
    }

    /// Queues the answer for the next [`Host::pick_folder`] call.
    pub fn queue_pick(&self, path: PathBuf) {
        if let Ok(mut picks) = self.picks.lock() {
            picks.push_back(path);
        }
    }
}

#[async_trait]
impl Host for LocalHost {
    fn workspace_roots(&self) -> Vec<WorkspaceRoot> {
        self.roots.clone()
    }

    fn settings(&self, scope: Option<&Path>) -> Result<Settings> {
        let key = scope.map(Path::to_path_buf);
        if let Some(settings) = self
            .snapshots
            .lock()
            .map_err(|_| anyhow!("mutex poisoned"))?
            .get(&key)
        {
            return Ok(settings.clone());
        }
        Settings::load(self.user_file.as_deref(), scope)
    }

    fn subscribe_configuration(&self) -> broadcast::Receiver<ConfigurationChange> {
        self.changes.subscribe()
    }

    async fn update_setting(
        &self,
        scope: &Path,
        key: SettingKey,
        value: serde_json::Value,
    ) -> Result<()> {
        write_setting(scope, key, value)?;
        self.reload()?;
        Ok(())
    }

    async fn pick_folder(&self, label: &str, default: &Path) -> Option<PathBuf> {
        let picked = self.picks.lock().ok().and_then(|mut picks| picks.pop_front());
        if picked.is_none() {
            debug!(
                "No folder queued for '{}' (default {})",
                label,
                default.display()
            );
        }
        picked
    }

    fn show_info(&self, message: &str) {
        info!(target: "npl_client::user", "{message}");
    }

    fn show_error(&self, message: &str) {
        error!(target: "npl_client::user", "{message}");
    }
}
