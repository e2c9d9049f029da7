/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Lock-style guards: mutex with priority inheritance and binary semaphore
//! without it.
//!
//! Both share one acquire / release contract; the only difference is whether
//! the holder inherits the priority of the most urgent waiter.
//!
//! | | Mutex | Binary semaphore |
//! |---|---|---|
//! | Priority inheritance | yes | no |
//! | Release by non-holder | `NotOwner` | allowed (semaphore "give") |
//! | Initial state | available | configurable |
//!
//! Wake order on release is strict priority, FIFO within one priority level.

use tracing::debug;

use super::error::GuardError;
use crate::task::{Priority, TaskId, TaskTable};

// ── LockKind ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// FreeRTOS `xSemaphoreCreateMutex()` – priority inheritance enabled.
    Mutex,
    /// FreeRTOS `xSemaphoreCreateBinary()` – no priority inheritance.
    BinarySemaphore,
}

impl LockKind {
    pub fn inherits_priority(self) -> bool {
        matches!(self, LockKind::Mutex)
    }

    /// Short label used in the event log (`"took LED mutex(PI)"`).
    pub fn label(self) -> &'static str {
        match self {
            LockKind::Mutex => "mutex(PI)",
            LockKind::BinarySemaphore => "binsem(noPI)",
        }
    }
}

/// Result of a non-blocking acquire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireAttempt {
    /// The caller now holds the lock.
    Granted,
    /// Held by someone else; the caller may wait.
    Busy,
    /// The caller already holds it.  Locks are not recursive.
    Recursive,
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    task: TaskId,
    /// Arrival order, for FIFO within a priority level.
    seq: u64,
}

// ── Lock ──────────────────────────────────────────────────────────────────────

/// One ownership token guarding the actuator.
///
/// Invariant: `available == false` whenever `holder.is_some()`, so at most one
/// task holds the lock at any tick.
#[derive(Debug)]
pub struct Lock {
    kind: LockKind,
    available: bool,
    holder: Option<TaskId>,
    waiters: Vec<Waiter>,
    next_seq: u64,
}

impl Lock {
    pub fn mutex() -> Self {
        Self::with_state(LockKind::Mutex, true)
    }

    /// `initially_available = false` matches `xSemaphoreCreateBinary()`,
    /// which starts taken and must be given once before first use.
    pub fn binary_semaphore(initially_available: bool) -> Self {
        Self::with_state(LockKind::BinarySemaphore, initially_available)
    }

    fn with_state(kind: LockKind, available: bool) -> Self {
        Self {
            kind,
            available,
            holder: None,
            waiters: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn holder(&self) -> Option<TaskId> {
        self.holder
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Waiting tasks in arrival order.
    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.waiters.iter().map(|w| w.task)
    }

    // ── Acquire path ──────────────────────────────────────────────────────────

    /// Take the lock if it is free.  Never blocks.
    pub fn try_acquire(&mut self, task: TaskId) -> AcquireAttempt {
        if self.available {
            self.available = false;
            self.holder = Some(task);
            AcquireAttempt::Granted
        } else if self.holder == Some(task) {
            AcquireAttempt::Recursive
        } else {
            AcquireAttempt::Busy
        }
    }

    /// Register `task` as waiting and, for a mutex, lend its priority to the
    /// current holder.
    pub fn enqueue_waiter(&mut self, task: TaskId, tasks: &mut TaskTable) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.waiters.push(Waiter { task, seq });
        self.apply_inheritance(tasks);
    }

    /// Remove `task` from the wait list after its timeout expired.  The holder
    /// loses any priority it only had because of that waiter.
    ///
    /// Returns `false` if `task` was not waiting.
    pub fn cancel_wait(&mut self, task: TaskId, tasks: &mut TaskTable) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.task != task);
        let removed = self.waiters.len() != before;
        if removed {
            self.apply_inheritance(tasks);
        }
        removed
    }

    // ── Release path ──────────────────────────────────────────────────────────

    /// Release the lock.
    ///
    /// The releasing holder gets its original priority back.  If tasks are
    /// waiting, ownership passes directly to the most urgent one (which then
    /// inherits from whoever is still waiting) and its id is returned so the
    /// kernel can make it ready.
    ///
    /// # Errors
    /// * [`GuardError::AlreadyAvailable`] – nothing to release.
    /// * [`GuardError::NotOwner`] – mutex released by a task that does not
    ///   hold it.
    pub fn release(
        &mut self,
        task: TaskId,
        tasks: &mut TaskTable,
    ) -> Result<Option<TaskId>, GuardError> {
        if self.available {
            return Err(GuardError::AlreadyAvailable);
        }
        if self.kind == LockKind::Mutex && self.holder != Some(task) {
            return Err(GuardError::NotOwner {
                task,
                holder: self.holder,
            });
        }

        if let Some(prev) = self.holder.take() {
            if self.kind.inherits_priority() {
                if let Some(desc) = tasks.get_mut(prev) {
                    desc.restore();
                }
            }
        }

        match self.pop_most_urgent_waiter(tasks) {
            Some(next) => {
                self.holder = Some(next);
                self.apply_inheritance(tasks);
                debug!(lock = self.kind.label(), from = %task, to = %next, "ownership handed over");
                Ok(Some(next))
            }
            None => {
                self.available = true;
                Ok(None)
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Highest effective priority among the waiters.
    fn highest_waiter_priority(&self, tasks: &TaskTable) -> Option<Priority> {
        self.waiters.iter().map(|w| tasks.priority(w.task)).max()
    }

    /// Set the holder's effective priority to `max(base, waiters)`.  No-op for
    /// a binary semaphore.
    fn apply_inheritance(&self, tasks: &mut TaskTable) {
        if !self.kind.inherits_priority() {
            return;
        }
        let Some(holder) = self.holder else {
            return;
        };
        let inherited = self.highest_waiter_priority(tasks);
        if let Some(desc) = tasks.get_mut(holder) {
            match inherited {
                Some(p) => desc.boost(p),
                None => desc.restore(),
            }
        }
    }

    fn pop_most_urgent_waiter(&mut self, tasks: &TaskTable) -> Option<TaskId> {
        let idx = self
            .waiters
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                tasks
                    .priority(a.task)
                    .cmp(&tasks.priority(b.task))
                    // earlier arrival wins a tie
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;
        Some(self.waiters.remove(idx).task)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
