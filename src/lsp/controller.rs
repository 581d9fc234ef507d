/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Start, stop and restart of the NPL language client.
//!
//! The controller owns at most one [`LanguageClient`] at a time. Every
//! lifecycle operation runs under one async mutex, so overlapping triggers
//! (a settings change arriving while a manual restart is in flight) queue up
//! instead of interleaving, and two clients never coexist.

use lsp_types::ClientInfo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::LanguageClient;
use super::error::ClientError;
use super::error_handler::{DefaultErrorHandler, ErrorHandler};
use super::options::{ClientConfiguration, MAX_RESTART_COUNT};
use super::state::{LifecycleState, StateCell};
use super::transport::{ConnectionSupplier, ServerManager};
use crate::activation::ActivationContext;
use crate::config::SettingKey;
use crate::host::{ConfigurationChange, Host};
use crate::workspace;

/// Identifier of the client session.
pub const CLIENT_ID: &str = "nplLanguageServer";

/// Settings whose change rebuilds the client.
const RESTART_KEYS: [SettingKey; 3] = [
    SettingKey::Sources,
    SettingKey::TestSources,
    SettingKey::ContribLibraries,
];

/// Tunables for [`LanguageClientController`].
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    /// Pause between stopping and restarting after a settings change.
    pub settle_delay: Duration,
    /// Reconnect ceiling handed to each client.
    pub max_restart_count: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            max_restart_count: MAX_RESTART_COUNT,
        }
    }
}

#[derive(Default)]
struct Inner {
    client: Option<LanguageClient>,
    subscription: Option<Subscription>,
    context: Option<ActivationContext>,
    /// Bumped by every start and stop. A settings restart only proceeds if
    /// nothing else ran while it waited.
    generation: u64,
}

/// Listener task for configuration changes; stops listening when dropped.
struct Subscription(JoinHandle<()>);

impl Drop for Subscription {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns the language client and rebuilds it when source layout settings
/// change.
pub struct LanguageClientController {
    host: Arc<dyn Host>,
    server_manager: Arc<dyn ServerManager>,
    error_handler: Arc<dyn ErrorHandler>,
    options: ControllerOptions,
    inner: Mutex<Inner>,
    state: StateCell,
}

impl LanguageClientController {
    /// Creates an idle controller with the default error handler.
    #[must_use]
    pub fn new(host: Arc<dyn Host>, server_manager: Arc<dyn ServerManager>) -> Self {
        Self {
            host,
            server_manager,
            error_handler: Arc::new(DefaultErrorHandler),
            options: ControllerOptions::default(),
            inner: Mutex::new(Inner::default()),
            state: StateCell::default(),
        }
    }

    /// Replaces the error handler given to future clients.
    #[must_use]
    pub fn with_error_handler(mut self, error_handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Replaces the tunables.
    #[must_use]
    pub const fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// Returns true while a started client is held.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// The configuration snapshot of the current client, if any.
    pub async fn configuration(&self) -> Option<ClientConfiguration> {
        self.inner
            .lock()
            .await
            .client
            .as_ref()
            .map(|client| client.configuration().clone())
    }

    /// Builds a client from the current settings and connects it.
    ///
    /// An existing client is fully stopped first. The context is remembered
    /// for restarts triggered by settings changes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoWorkspace`] if the host has no workspace
    /// root, or the failure to read settings or connect. The controller is
    /// idle after any failure.
    pub async fn start(self: &Arc<Self>, context: &ActivationContext) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner, context).await
    }

    /// Stops the client, the subscription and the server.
    ///
    /// Safe to call at any time, including when nothing is running.
    ///
    /// # Errors
    ///
    /// Returns the client's shutdown failure. The controller is idle either
    /// way.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    /// Stops and starts again as one operation.
    ///
    /// # Errors
    ///
    /// Returns the start failure. A failed stop is logged and does not
    /// prevent the start.
    pub async fn restart(self: &Arc<Self>, context: &ActivationContext) -> Result<(), ClientError> {
        let mut inner = self.inner.lock().await;
        if let Err(e) = self.stop_locked(&mut inner).await {
            warn!("Language client did not shut down cleanly: {}", e);
        }
        self.start_locked(&mut inner, context).await
    }

    async fn start_locked(
        self: &Arc<Self>,
        inner: &mut Inner,
        context: &ActivationContext,
    ) -> Result<(), ClientError> {
        let roots = self.host.workspace_roots();
        let Some(first) = roots.first() else {
            return Err(ClientError::NoWorkspace);
        };
        let scope = first.path.clone();
        inner.context = Some(context.clone());
        inner.generation += 1;

        if inner.client.is_some() {
            info!("Client already exists, stopping it before restart");
            if let Err(e) = self.stop_locked(inner).await {
                warn!("Previous language client did not shut down cleanly: {}", e);
            }
        }

        self.state.set(LifecycleState::Starting);

        let scoped = self.host.settings(Some(&scope));
        let global = self.host.settings(None);
        let (scoped, global) = match (scoped, global) {
            (Ok(scoped), Ok(global)) => (scoped, global),
            (Err(e), _) | (_, Err(e)) => {
                self.state.set(LifecycleState::Idle);
                return Err(ClientError::Settings(e));
            }
        };

        let roots = workspace::resolve(
            scoped.sources.as_deref(),
            scoped.test_sources.as_deref(),
            &roots,
        );
        let config = Arc::new(
            ClientConfiguration::new(roots, global.debounce_ms(), scoped.contrib_libraries)
                .with_max_restart_count(self.options.max_restart_count),
        );
        info!(
            "Language client initialized with workspace folders: {}",
            config.describe_roots()
        );

        let mut client = LanguageClient::new(
            CLIENT_ID,
            ClientInfo {
                name: context.client_name.clone(),
                version: Some(context.client_version.clone()),
            },
            config,
            ConnectionSupplier::new(self.server_manager.clone(), context.clone()),
            self.error_handler.clone(),
        );
        let subscription = self.subscribe();

        if let Err(e) = client.start().await {
            drop(subscription);
            drop(client);
            self.server_manager.stop_server();
            self.state.set(LifecycleState::Idle);
            error!("Failed to start NPL Language Server client: {}", e);
            return Err(e);
        }

        inner.client = Some(client);
        inner.subscription = Some(subscription);
        self.state.set(LifecycleState::Running);
        info!("NPL Language Server started");
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<(), ClientError> {
        self.state.set(LifecycleState::Stopping);
        inner.generation += 1;

        inner.subscription = None;

        let result = match inner.client.take() {
            Some(mut client) => client.stop().await,
            None => Ok(()),
        };
        self.server_manager.stop_server();

        self.state.set(LifecycleState::Idle);
        result
    }

    fn subscribe(self: &Arc<Self>) -> Subscription {
        let mut changes = self.host.subscribe_configuration();
        let weak = Arc::downgrade(self);
        Subscription(tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} configuration changes, assuming sources changed", skipped);
                        ConfigurationChange::of(&RESTART_KEYS)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !RESTART_KEYS.iter().any(|key| change.affects(*key)) {
                    debug!("Ignoring configuration change: {:?}", change.keys);
                    continue;
                }
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                info!("NPL workspace settings have changed. Restarting the language server...");
                // The restart stops this listener; it must not run on it.
                tokio::spawn(controller.restart_after_change());
            }
        }))
    }

    async fn restart_after_change(self: Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock().await;
            if let Err(e) = self.stop_locked(&mut inner).await {
                error!("Failed to stop language server before restart: {}", e);
                return;
            }
            inner.generation
        };

        tokio::time::sleep(self.options.settle_delay).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!("Settings restart superseded by a later start or stop");
            return;
        }
        let Some(context) = inner.context.clone() else {
            error!("Cannot restart language server: activation context is missing");
            self.host
                .show_error("Failed to restart NPL Language Server. Please reload the window.");
            return;
        };

        match self.start_locked(&mut inner, &context).await {
            Ok(()) => self
                .host
                .show_info("NPL Language Server restarted with updated workspace settings."),
            Err(e) => {
                error!("Failed to restart language server after settings change: {}", e);
                self.host.show_error(
                    "Failed to restart NPL Language Server. You may need to reload the window.",
                );
            }
        }
    }
}
