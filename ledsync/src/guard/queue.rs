/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-slot "latest wins" command queue.
//!
//! Equivalent of a FreeRTOS queue of length 1 written with
//! `xQueueOverwrite()`: sending never blocks and never fails, a pending
//! command is replaced by the newer one, and the single consumer task always
//! receives the most recent command.  Only the consumer writes the actuator,
//! so the actuator itself needs no lock.

use std::fmt;

use super::error::GuardError;
use crate::actuator::Level;
use crate::task::TaskId;

// ── Command ───────────────────────────────────────────────────────────────────

/// LED command carried by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
}

impl Command {
    /// Command that asks the driver for `level`.
    pub fn for_level(level: Level) -> Self {
        if level.is_high() {
            Command::On
        } else {
            Command::Off
        }
    }

    /// Pin level the driver task applies for this command.
    pub fn level(self) -> Level {
        match self {
            Command::On => Level::High,
            Command::Off => Level::Low,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::On => f.write_str("LED_CMD_ON"),
            Command::Off => f.write_str("LED_CMD_OFF"),
        }
    }
}

// ── QueueStats ────────────────────────────────────────────────────────────────

/// Counters kept by the queue.  `sent - received - pending` commands were
/// dropped by overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub sent: u64,
    pub overwritten: u64,
    pub received: u64,
}

// ── CommandQueue ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CommandQueue {
    slot: Option<Command>,
    /// Bound on the first receive.  Nobody else may drain the queue.
    consumer: Option<TaskId>,
    stats: QueueStats,
}

impl CommandQueue {
    /// Create a queue for overwrite use.
    ///
    /// # Errors
    /// [`GuardError::OverwriteNeedsSingleSlot`] unless `capacity == 1`.
    pub fn with_capacity(capacity: usize) -> Result<Self, GuardError> {
        if capacity != 1 {
            return Err(GuardError::OverwriteNeedsSingleSlot { capacity });
        }
        Ok(Self::default())
    }

    /// Store `cmd`, replacing any unconsumed command.  Returns the command
    /// that was dropped, if any.
    pub fn overwrite(&mut self, cmd: Command) -> Option<Command> {
        self.stats.sent += 1;
        let dropped = self.slot.replace(cmd);
        if dropped.is_some() {
            self.stats.overwritten += 1;
        }
        dropped
    }

    /// Take the pending command, binding `task` as the consumer on first use.
    ///
    /// # Errors
    /// [`GuardError::NotConsumer`] if another task is already the consumer.
    pub fn try_receive(&mut self, task: TaskId) -> Result<Option<Command>, GuardError> {
        self.check_consumer(task)?;
        let cmd = self.slot.take();
        if cmd.is_some() {
            self.stats.received += 1;
        }
        Ok(cmd)
    }

    /// Verify (and on first call, record) that `task` is the consumer.
    pub fn check_consumer(&mut self, task: TaskId) -> Result<(), GuardError> {
        match self.consumer {
            Some(owner) if owner != task => Err(GuardError::NotConsumer { task, owner }),
            Some(_) => Ok(()),
            None => {
                self.consumer = Some(task);
                Ok(())
            }
        }
    }

    /// Pending command without consuming it.
    pub fn peek(&self) -> Option<Command> {
        self.slot
    }

    pub fn consumer(&self) -> Option<TaskId> {
        self.consumer
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
