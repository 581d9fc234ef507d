// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Transport-driven language client session.
pub mod client;
/// Start/stop/restart control and settings-change restarts.
pub mod controller;
/// Error type for client and controller operations.
pub mod error;
/// Connection error and close classification.
pub mod error_handler;
/// Per-start client configuration.
pub mod options;
/// Language server child process management.
pub mod process;
/// LSP message protocol definitions.
pub mod protocol;
/// Lifecycle state tracking.
pub mod state;
/// Transports and connection supply.
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::LanguageClient;
pub use controller::{ControllerOptions, LanguageClientController};
pub use error::ClientError;
pub use error_handler::{ConnectionEvent, Decision, DefaultErrorHandler, ErrorHandler};
pub use options::{ClientConfiguration, DocumentSelector};
pub use process::ProcessServerManager;
pub use state::LifecycleState;
pub use transport::{ConnectionSupplier, ServerManager, Transport};
