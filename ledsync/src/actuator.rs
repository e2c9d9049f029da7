/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The shared actuator: one GPIO output driving the LED.
//!
//! Register writes are atomic, so the pin itself never tears; what the guards
//! protect is the *protocol* that only the lock holder (or the queue's single
//! consumer) writes it.  The actuator enforces that protocol through its
//! [`AccessPolicy`] and keeps the most recent level transitions for analysis.

use std::collections::VecDeque;
use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::guard::{LockId, QueueId};
use crate::task::TaskId;
use crate::tick::Tick;

/// Default LED pin on the lab board (`LED_PIN`).
pub const DEFAULT_LED_PIN: u32 = 2;

/// Level transitions kept by [`Actuator::new`]; older ones are dropped and
/// only counted.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

// ── Level ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    #[default]
    Low,
    High,
}

impl Level {
    /// `gpio_get_level()` value.
    pub fn as_bit(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("OFF"),
            Level::High => f.write_str("ON"),
        }
    }
}

// ── Access policy ─────────────────────────────────────────────────────────────

/// Who may write the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Any task (no guard bound yet).
    #[default]
    Unguarded,
    /// Only the current holder of this lock.
    Locked(LockId),
    /// Only the consumer of this queue.
    SingleWriter(QueueId),
}

impl AccessPolicy {
    /// `guard_owner` is the lock holder / queue consumer resolved by the
    /// kernel at the time of the write.
    pub fn permits(self, writer: TaskId, guard_owner: Option<TaskId>) -> bool {
        match self {
            AccessPolicy::Unguarded => true,
            AccessPolicy::Locked(_) | AccessPolicy::SingleWriter(_) => {
                guard_owner == Some(writer)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuatorError {
    #[error("task {task} wrote pin {pin} without owning its guard ({policy:?})")]
    Unauthorized {
        task: TaskId,
        pin: u32,
        policy: AccessPolicy,
    },
}

// ── Actuator ──────────────────────────────────────────────────────────────────

/// One recorded level transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub tick: Tick,
    pub level: Level,
    pub writer: TaskId,
}

#[derive(Debug)]
pub struct Actuator {
    pin: u32,
    level: Level,
    policy: AccessPolicy,
    history: VecDeque<LevelChange>,
    history_capacity: usize,
    transitions: u64,
    writes: u64,
    violations: u64,
}

impl Actuator {
    /// Configure the pin as output and drive it low (`led_init`).
    pub fn new(pin: u32) -> Self {
        Self::with_history_capacity(pin, DEFAULT_HISTORY_CAPACITY)
    }

    /// Keep at most `capacity` transitions (at least one).
    pub fn with_history_capacity(pin: u32, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pin,
            level: Level::Low,
            policy: AccessPolicy::Unguarded,
            history: VecDeque::with_capacity(capacity),
            history_capacity: capacity,
            transitions: 0,
            writes: 0,
            violations: 0,
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    /// Bind the pin to the guard that must be owned to write it.
    pub fn set_policy(&mut self, policy: AccessPolicy) {
        self.policy = policy;
    }

    /// Drive the pin.  Returns `true` if the level changed.
    ///
    /// # Errors
    /// [`ActuatorError::Unauthorized`] if the policy rejects `writer`; the pin
    /// is left untouched and the violation is counted.
    pub fn set_level(
        &mut self,
        writer: TaskId,
        guard_owner: Option<TaskId>,
        level: Level,
        now: Tick,
    ) -> Result<bool, ActuatorError> {
        if !self.policy.permits(writer, guard_owner) {
            self.violations += 1;
            let err = ActuatorError::Unauthorized {
                task: writer,
                pin: self.pin,
                policy: self.policy,
            };
            error!(tick = now.0, "{err}");
            return Err(err);
        }

        self.writes += 1;
        if self.level == level {
            return Ok(false);
        }
        self.level = level;
        self.transitions += 1;
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(LevelChange {
            tick: now,
            level,
            writer,
        });
        Ok(true)
    }

    /// The most recent level transitions, oldest first.
    pub fn history(&self) -> &VecDeque<LevelChange> {
        &self.history
    }

    /// Every transition since start-up, including those no longer in
    /// [`history`](Self::history).
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Accepted writes, including those that did not change the level.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn violations(&self) -> u64 {
        self.violations
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_low_with_empty_history() {
        let pin = Actuator::new(DEFAULT_LED_PIN);
        assert_eq!(pin.level(), Level::Low);
        assert_eq!(pin.level().as_bit(), 0);
        assert!(pin.history().is_empty());
    }

    #[test]
    fn only_transitions_are_recorded() {
        let mut pin = Actuator::new(2);
        let t = TaskId(0);
        assert_eq!(pin.set_level(t, None, Level::High, Tick(0)), Ok(true));
        assert_eq!(pin.set_level(t, None, Level::High, Tick(5)), Ok(false));
        assert_eq!(pin.set_level(t, None, Level::Low, Tick(9)), Ok(true));

        assert_eq!(pin.writes(), 3);
        let ticks: Vec<u32> = pin.history().iter().map(|c| c.tick.0).collect();
        assert_eq!(ticks, vec![0, 9]);
    }

    #[test]
    fn history_keeps_only_the_latest_transitions() {
        let mut pin = Actuator::with_history_capacity(2, 3);
        let t = TaskId(0);
        for i in 0..10u32 {
            let level = if i % 2 == 0 { Level::High } else { Level::Low };
            pin.set_level(t, None, level, Tick(i)).unwrap();
        }

        assert_eq!(pin.transitions(), 10);
        let ticks: Vec<u32> = pin.history().iter().map(|c| c.tick.0).collect();
        assert_eq!(ticks, vec![7, 8, 9]);
        assert_eq!(pin.history().back().map(|c| c.level), Some(pin.level()));
    }

    #[test]
    fn locked_policy_rejects_non_holder() {
        let mut pin = Actuator::new(2);
        pin.set_policy(AccessPolicy::Locked(LockId(0)));
        let holder = TaskId(1);
        let intruder = TaskId(2);

        let err = pin
            .set_level(intruder, Some(holder), Level::High, Tick(3))
            .unwrap_err();
        assert!(matches!(err, ActuatorError::Unauthorized { task, .. } if task == intruder));
        assert_eq!(pin.level(), Level::Low, "rejected write leaves the pin");
        assert_eq!(pin.violations(), 1);

        assert_eq!(pin.set_level(holder, Some(holder), Level::High, Tick(4)), Ok(true));
    }

    #[test]
    fn single_writer_policy_needs_a_bound_consumer() {
        let policy = AccessPolicy::SingleWriter(QueueId(0));
        assert!(!policy.permits(TaskId(0), None));
        assert!(policy.permits(TaskId(0), Some(TaskId(0))));
        assert!(AccessPolicy::Unguarded.permits(TaskId(9), None));
    }

    #[test]
    fn level_display_matches_log_wording() {
        assert_eq!(Level::High.to_string(), "ON");
        assert_eq!(Level::Low.to_string(), "OFF");
        assert!(Level::High.is_high());
    }
}
