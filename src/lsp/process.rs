// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Server manager that runs the language server as a child process speaking
//! LSP over stdio.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::transport::{ServerManager, Transport};
use crate::activation::ActivationContext;

/// Spawns one server process per connection request.
///
/// Asking for a new connection replaces any process started earlier.
pub struct ProcessServerManager {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl ProcessServerManager {
    /// Creates a manager for `program args...`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }

    /// Builds a manager from a command line such as `npl-language-server --stdio`.
    ///
    /// # Errors
    ///
    /// Returns an error if the command line is empty.
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow!("Empty language server command"))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    fn kill_current(&self) {
        let Ok(mut slot) = self.child.lock() else {
            return;
        };
        if let Some(mut child) = slot.take() {
            debug!("Killing language server process {:?}", child.id());
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill language server: {}", e);
            }
        }
    }
}

#[async_trait]
impl ServerManager for ProcessServerManager {
    async fn get_server_connection(&self, context: &ActivationContext) -> Result<Transport> {
        self.kill_current();

        info!(
            "Spawning language server: {} {}",
            self.program,
            self.args.join(" ")
        );

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if context.storage_dir.is_dir() {
            command.current_dir(&context.storage_dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn language server: {}", self.program))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Language server stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Language server stdout not captured"))?;

        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }

        Ok(Transport::new(stdout, stdin))
    }

    fn stop_server(&self) {
        self.kill_current();
    }
}

impl Drop for ProcessServerManager {
    fn drop(&mut self) {
        self.kill_current();
    }
}
