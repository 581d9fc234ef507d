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

//! Lifecycle state of the language client controller.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where the controller is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No client exists.
    Idle,
    /// A client is being built and connected.
    Starting,
    /// The client finished its handshake.
    Running,
    /// The client and server are being torn down.
    Stopping,
}

impl LifecycleState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Lock-free cell holding a [`LifecycleState`], readable while a lifecycle
/// operation holds the controller lock.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Current state.
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Records a transition and returns the previous state.
    pub fn set(&self, state: LifecycleState) -> LifecycleState {
        LifecycleState::from_u8(self.0.swap(state.as_u8(), Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_conversion_is_lossless() {
        for state in [
            LifecycleState::Idle,
            LifecycleState::Starting,
            LifecycleState::Running,
            LifecycleState::Stopping,
        ] {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), state);
        }
        assert_eq!(LifecycleState::from_u8(200), LifecycleState::Idle);
    }

    #[test]
    fn test_cell_starts_idle_and_reports_previous() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), LifecycleState::Idle);
        assert_eq!(cell.set(LifecycleState::Starting), LifecycleState::Idle);
        assert_eq!(cell.get(), LifecycleState::Starting);
    }

    #[test]
    fn test_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&LifecycleState::Running)?, "\"running\"");
        Ok(())
    }
}
