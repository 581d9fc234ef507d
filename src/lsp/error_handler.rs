// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Classification of connection errors and closures.
//!
//! The client reports every transport error and every connection closure to
//! an [`ErrorHandler`] and does what the returned [`Decision`] says. The
//! default handler keeps sessions alive through bad messages and never
//! reconnects on its own: restarts are driven by configuration changes or an
//! explicit restart command, so a low-level reconnect cannot race them.

use tracing::{error, info};

/// Something that happened to an active connection.
#[derive(Debug)]
pub enum ConnectionEvent<'a> {
    /// A message could not be read or decoded.
    Error {
        /// What went wrong.
        error: &'a anyhow::Error,
        /// The offending message, when it could be extracted.
        message: Option<&'a str>,
        /// Number of errors seen on this connection so far, this one included.
        count: u32,
    },
    /// The server side of the transport went away.
    Closed,
}

/// What the client should do about a [`ConnectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// For errors: keep the session. For closures: reconnect (bounded by the
    /// client's restart ceiling).
    Continue,
    /// For errors: tear the session down. For closures: stay closed.
    Abort,
}

/// Maps connection events to decisions.
pub trait ErrorHandler: Send + Sync {
    /// Decides how to react to `event`. Must not block.
    fn classify(&self, event: &ConnectionEvent<'_>) -> Decision;
}

/// Keeps sessions alive through errors and never reconnects after a close.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn classify(&self, event: &ConnectionEvent<'_>) -> Decision {
        match event {
            ConnectionEvent::Error {
                error,
                message,
                count,
            } => {
                error!(
                    "Language client error #{}: {}: {:#}",
                    count,
                    message.unwrap_or("<no message>"),
                    error
                );
                Decision::Continue
            }
            ConnectionEvent::Closed => {
                info!("Language client connection closed.");
                Decision::Abort
            }
        }
    }
}
