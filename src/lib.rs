// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! `npl-client` drives the NPL language client inside a host editor.
//!
//! It resolves which source roots the language server should see, starts the
//! client connection, and tears it down and rebuilds it whenever the source
//! layout settings change. Everything host-specific (workspace roots, settings
//! storage, user notifications, the server process itself) sits behind traits
//! so the lifecycle logic can run in any host.

/// Activation orchestration and host commands.
pub mod activation;
/// Workspace settings model, loading and persistence.
pub mod config;
/// Host collaborator traits and a file-backed local host.
pub mod host;
/// Language client, connection supply and lifecycle control.
pub mod lsp;
/// Workspace folder resolution.
pub mod workspace;

pub use activation::{ActivationContext, App, Collaborators, Command};
pub use lsp::{ClientError, LanguageClientController};
pub use workspace::WorkspaceRoot;
