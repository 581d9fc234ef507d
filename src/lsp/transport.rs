// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Duplex transports and the server manager that supplies them.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, warn};

use crate::activation::ActivationContext;

/// Read half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live byte stream to a running language server.
pub struct Transport {
    /// Bytes coming from the server.
    pub reader: BoxedReader,
    /// Bytes going to the server.
    pub writer: BoxedWriter,
}

impl Transport {
    /// Builds a transport from separate read and write halves, e.g. a child
    /// process's stdout and stdin.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Builds a transport from a single bidirectional stream such as a TCP
    /// socket.
    pub fn from_duplex<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Owns the language server process and hands out connections to it.
#[async_trait]
pub trait ServerManager: Send + Sync {
    /// Produces a transport to a running server, starting it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be started or reached.
    async fn get_server_connection(&self, context: &ActivationContext) -> Result<Transport>;

    /// Stops the server process. Best-effort; never fails.
    fn stop_server(&self);

    /// Lets the user choose which server version to run.
    ///
    /// # Errors
    ///
    /// Returns an error if the selection cannot be applied.
    async fn select_version(&self, _context: &ActivationContext) -> Result<()> {
        warn!("This server manager does not support selecting a server version");
        Ok(())
    }

    /// Removes downloaded server files.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be removed.
    async fn clean_server_files(&self, _context: &ActivationContext) -> Result<()> {
        warn!("This server manager does not manage server files");
        Ok(())
    }
}

/// Hands the client a fresh transport on demand.
///
/// Failures are logged and returned untouched. Retrying is the client's
/// business (its restart ceiling), not the supplier's.
#[derive(Clone)]
pub struct ConnectionSupplier {
    manager: Arc<dyn ServerManager>,
    context: ActivationContext,
}

impl ConnectionSupplier {
    /// Creates a supplier bound to one activation context.
    #[must_use]
    pub fn new(manager: Arc<dyn ServerManager>, context: ActivationContext) -> Self {
        Self { manager, context }
    }

    /// Asks the server manager for a transport.
    ///
    /// # Errors
    ///
    /// Returns the server manager's error unchanged.
    pub async fn supply(&self) -> Result<Transport> {
        self.manager
            .get_server_connection(&self.context)
            .await
            .inspect_err(|e| error!("Failed to start server: {e:#}"))
    }
}
