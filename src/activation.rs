// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Activation, deactivation and user commands.
//!
//! [`App`] is the explicit application context: it owns the controller, the
//! server manager and the host, and it is what a host integration calls
//! into when the editor activates the extension or the user runs a command.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SettingKey;
use crate::host::Host;
use crate::lsp::{ControllerOptions, LanguageClientController, ServerManager};
use crate::workspace::WorkspaceRoot;

/// What the host knows about this activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationContext {
    /// Directory for downloaded server files and other private state.
    pub storage_dir: PathBuf,
    /// Client name reported to the server.
    pub client_name: String,
    /// Client version reported to the server.
    pub client_version: String,
}

impl Default for ActivationContext {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::new(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("NPL_CLIENT_VERSION").to_string(),
        }
    }
}

/// Restores a previous cloud session.
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Restores the session if one was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if a saved session exists but cannot be restored.
    async fn initialize(&self) -> Result<()>;
}

/// Scaffolds AI assistant instruction files in workspace roots.
#[async_trait]
pub trait InstructionFiles: Send + Sync {
    /// Checks one root and offers to create or update its instruction files.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be inspected or written.
    async fn check_and_handle(&self, root: &WorkspaceRoot) -> Result<()>;
}

/// Detects a cloud migration descriptor among the workspace roots.
#[async_trait]
pub trait MigrationDetector: Send + Sync {
    /// Looks for a descriptor and records it in the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails.
    async fn detect(&self, roots: &[WorkspaceRoot]) -> Result<()>;
}

/// Optional activation steps. Absent steps are skipped.
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Cloud session restore.
    pub auth: Option<Arc<dyn AuthSession>>,
    /// Instruction file scaffolding.
    pub instruction_files: Option<Arc<dyn InstructionFiles>>,
    /// Migration descriptor detection.
    pub migration: Option<Arc<dyn MigrationDetector>>,
}

/// A user command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Stop and start the language server.
    RestartServer,
    /// Pick the main source folder.
    SelectSources,
    /// Pick the test source folder.
    SelectTestSources,
    /// Pick a contributed library folder.
    SelectContribLibraries,
    /// Pick the frontend source folder.
    SelectFrontendSources,
    /// Choose the server version to run.
    SelectServerVersion,
    /// Remove downloaded server files.
    CleanServerFiles,
}

impl Command {
    /// Every command.
    pub const ALL: [Self; 7] = [
        Self::RestartServer,
        Self::SelectSources,
        Self::SelectTestSources,
        Self::SelectContribLibraries,
        Self::SelectFrontendSources,
        Self::SelectServerVersion,
        Self::CleanServerFiles,
    ];

    /// Editor command id, e.g. `npl.restartServer`.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::RestartServer => "npl.restartServer",
            Self::SelectSources => "npl.selectSources",
            Self::SelectTestSources => "npl.selectTestSources",
            Self::SelectContribLibraries => "npl.contribLibraries",
            Self::SelectFrontendSources => "npl.selectFrontendSources",
            Self::SelectServerVersion => "npl.selectServerVersion",
            Self::CleanServerFiles => "npl.cleanServerFiles",
        }
    }

    /// Short name accepted on the command line, e.g. `restart`.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::RestartServer => "restart",
            Self::SelectSources => "select-sources",
            Self::SelectTestSources => "select-test-sources",
            Self::SelectContribLibraries => "contrib-libraries",
            Self::SelectFrontendSources => "select-frontend-sources",
            Self::SelectServerVersion => "select-server-version",
            Self::CleanServerFiles => "clean-server-files",
        }
    }

    /// The setting a folder-picking command writes.
    #[must_use]
    pub const fn setting(self) -> Option<SettingKey> {
        match self {
            Self::SelectSources => Some(SettingKey::Sources),
            Self::SelectTestSources => Some(SettingKey::TestSources),
            Self::SelectContribLibraries => Some(SettingKey::ContribLibraries),
            Self::SelectFrontendSources => Some(SettingKey::FrontendSources),
            Self::RestartServer | Self::SelectServerVersion | Self::CleanServerFiles => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.id() == s || c.short_name() == s)
            .ok_or_else(|| anyhow!("Unknown command '{s}'"))
    }
}

/// The activated client.
pub struct App {
    context: ActivationContext,
    host: Arc<dyn Host>,
    server_manager: Arc<dyn ServerManager>,
    controller: Arc<LanguageClientController>,
    collaborators: Collaborators,
}

impl App {
    /// Wires a controller to the host and server manager.
    #[must_use]
    pub fn new(
        context: ActivationContext,
        host: Arc<dyn Host>,
        server_manager: Arc<dyn ServerManager>,
    ) -> Self {
        let controller = Arc::new(LanguageClientController::new(
            host.clone(),
            server_manager.clone(),
        ));
        Self {
            context,
            host,
            server_manager,
            controller,
            collaborators: Collaborators::default(),
        }
    }

    /// Sets the optional activation steps.
    #[must_use]
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Rebuilds the controller with custom tunables.
    #[must_use]
    pub fn with_controller_options(mut self, options: ControllerOptions) -> Self {
        self.controller = Arc::new(
            LanguageClientController::new(self.host.clone(), self.server_manager.clone())
                .with_options(options),
        );
        self
    }

    /// The lifecycle controller.
    #[must_use]
    pub const fn controller(&self) -> &Arc<LanguageClientController> {
        &self.controller
    }

    /// The activation context.
    #[must_use]
    pub const fn context(&self) -> &ActivationContext {
        &self.context
    }

    /// Runs the activation steps and starts the language client.
    ///
    /// A failure to start the client is logged, not returned: the user can
    /// still fix the settings and restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the saved cloud session cannot be restored. The
    /// controller is stopped in that case.
    pub async fn activate(&self) -> Result<()> {
        info!(
            "Activating {} {}",
            self.context.client_name, self.context.client_version
        );

        if let Some(auth) = &self.collaborators.auth
            && let Err(e) = auth.initialize().await
        {
            error!("Failed to start NPL Language Server: {e:#}");
            if let Err(stop) = self.controller.stop().await {
                warn!("Failed to stop language client: {}", stop);
            }
            return Err(e);
        }

        let roots = self.host.workspace_roots();

        if let Some(files) = &self.collaborators.instruction_files {
            for root in &roots {
                if let Err(e) = files.check_and_handle(root).await {
                    error!("Error handling workspace instruction files: {e:#}");
                    break;
                }
            }
        }

        if let Some(migration) = &self.collaborators.migration
            && let Err(e) = migration.detect(&roots).await
        {
            error!("Failed to detect migration descriptor: {e:#}");
        }

        if let Err(e) = self.controller.start(&self.context).await {
            error!("Failed to start NPL Language Server: {}", e);
        }
        Ok(())
    }

    /// Stops the language client and the server.
    ///
    /// # Errors
    ///
    /// Returns the client's shutdown failure; everything is released anyway.
    pub async fn deactivate(&self) -> Result<()> {
        self.controller.stop().await?;
        Ok(())
    }

    /// Stops the client and starts it again with fresh settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the new client fails to start. The user is told
    /// about it as well.
    pub async fn restart_server(&self) -> Result<()> {
        if let Err(e) = self.controller.stop().await {
            warn!("Language client did not shut down cleanly: {}", e);
        }

        if let Err(e) = self.controller.start(&self.context).await {
            self.host
                .show_error(&format!("Failed to restart NPL Language Server: {e}"));
            return Err(e.into());
        }
        Ok(())
    }

    /// Runs a user command.
    ///
    /// # Errors
    ///
    /// Returns an error from restarting, selecting a server version, or
    /// cleaning server files. Folder selection failures are shown to the user
    /// instead.
    pub async fn execute(&self, command: Command) -> Result<()> {
        debug!("Executing {}", command);
        match command {
            Command::RestartServer => self.restart_server().await,
            Command::SelectServerVersion => self.server_manager.select_version(&self.context).await,
            Command::CleanServerFiles => {
                self.server_manager
                    .clean_server_files(&self.context)
                    .await
            }
            folder => {
                if let Some(key) = folder.setting() {
                    self.select_folder(key).await;
                }
                Ok(())
            }
        }
    }

    /// Lets the user pick a folder and stores it in the first root's
    /// settings.
    async fn select_folder(&self, key: SettingKey) {
        let Some(root) = self.host.workspace_roots().into_iter().next() else {
            self.host
                .show_error("No workspace folder open to save NPL settings.");
            return;
        };

        let label = format!("Select NPL {key}");
        let Some(selected) = self.host.pick_folder(&label, &root.path).await else {
            debug!("Folder selection for {} cancelled", key);
            return;
        };

        let path = selected.to_string_lossy().to_string();
        let value = if key == SettingKey::ContribLibraries {
            json!([path])
        } else {
            json!(path)
        };

        match self.host.update_setting(&root.path, key, value).await {
            Ok(()) => self.host.show_info(&format!(
                "NPL {key} path set to {path} for this workspace."
            )),
            Err(e) => {
                error!("Failed to select NPL {key} workspace: {e:#}");
                self.host
                    .show_error(&format!("Failed to select NPL {key} workspace: {e}"));
            }
        }
    }
}
