// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the language client and its controller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The host has no workspace root, so there is nothing to serve.
    #[error("No workspace folder found")]
    NoWorkspace,

    /// The connection supplier could not produce a transport.
    #[error("Failed to connect to the language server")]
    Connection(#[source] anyhow::Error),

    /// The server rejected or never answered the `initialize` request.
    #[error("Language server initialization failed: {0}")]
    Initialize(String),

    /// The connection went away while a request was outstanding.
    #[error("Language server closed the connection")]
    ConnectionClosed,

    /// A request got no answer in time.
    #[error("Request '{method}' timed out after {timeout:?}")]
    RequestTimeout {
        /// The request method.
        method: String,
        /// How long we waited.
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error.
    #[error("Language server error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// Settings could not be read.
    #[error("Failed to read NPL settings")]
    Settings(#[source] anyhow::Error),

    /// Writing to the transport failed.
    #[error("Transport I/O failed")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded or decoded.
    #[error("Malformed message: {0}")]
    Protocol(String),
}
