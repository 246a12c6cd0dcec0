//! Command history.
//!
//! Bounded FIFO ring of the package-manager commands the parser chain has
//! recognized, exposed through the management API for operator visibility.

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::constants::COMMAND_HISTORY_CAPACITY;

/// Bounded ring of recently parsed full commands.
pub struct CommandHistory {
    commands: RwLock<VecDeque<String>>,
}

impl CommandHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(VecDeque::with_capacity(COMMAND_HISTORY_CAPACITY)),
        }
    }

    /// Appends a command, dropping the oldest entry once full.
    pub fn log(&self, command: &str) {
        if command.is_empty() {
            return;
        }

        let Ok(mut commands) = self.commands.write() else {
            return;
        };
        if commands.len() >= COMMAND_HISTORY_CAPACITY {
            commands.pop_front();
        }
        commands.push_back(command.to_string());
    }

    /// Snapshot of all recorded commands, oldest first.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .read()
            .map(|commands| commands.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}
