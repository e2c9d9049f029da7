/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task descriptors and the kernel's task table.
//!
//! ```text
//! spawn(name, priority, stack)  ──►  TaskDescriptor  ──(TaskTable)──►  scheduler / guards
//!                                      base_priority       immutable
//!                                      effective_priority  boosted only by a Lock
//! ```
//!
//! # Ownership model
//! The [`TaskTable`] is owned by the kernel.  Guards never hold references
//! into it; the kernel lends `&mut TaskTable` to a
//! [`Lock`](crate::guard::Lock) for the duration of one acquire / release /
//! timeout call, which is the only place [`TaskDescriptor::boost`] and
//! [`TaskDescriptor::restore`] are invoked.

use std::fmt;

/// Scheduling priority.  Higher values are more urgent (FreeRTOS convention).
pub type Priority = u32;

// ── TaskId ────────────────────────────────────────────────────────────────────

/// Index of a task in the [`TaskTable`], assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── TaskState ─────────────────────────────────────────────────────────────────

/// Scheduler-visible state of a task.
///
/// ```text
///   ┌──────────┐   selected    ┌─────────┐
///   │  Ready   │ ────────────► │ Running │
///   └──────────┘ ◄──────────── └─────────┘
///        ▲        preempt/yield     │
///        │                          │ lock wait / delay / receive
///        │        wake / grant      ▼
///        └──────────────────── ┌─────────┐
///                              │ Blocked │
///                              └─────────┘
/// ```
///
/// There is no terminal state: every task runs for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    #[default]
    Ready,
    Running,
    Blocked,
}

// ── TaskDescriptor ────────────────────────────────────────────────────────────

/// Static description of a task plus its (possibly inherited) priority.
#[derive(Debug, Clone, Default)]
pub struct TaskDescriptor {
    /// Task name as passed to `spawn`, e.g. `"tLED_ON"`.
    pub name: String,

    /// Priority given at creation.  Never changes.
    pub base_priority: Priority,

    /// Priority the scheduler uses.  Equals `base_priority` except while the
    /// task holds a priority-inheriting lock that a more urgent task waits on.
    effective_priority: Priority,

    /// Stack budget in bytes (recorded, checked against the kernel minimum).
    pub stack_budget: usize,

    /// Nominal period in ticks, `0` for tasks that are not periodic.
    pub period_ticks: u32,

    /// Phase offset in ticks relative to the first period.
    pub phase_ticks: u32,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, priority: Priority, stack_budget: usize) -> Self {
        Self {
            name: name.into(),
            base_priority: priority,
            effective_priority: priority,
            stack_budget,
            ..Default::default()
        }
    }

    /// Attach the nominal timing of a periodic task.
    pub fn with_timing(mut self, period_ticks: u32, phase_ticks: u32) -> Self {
        self.period_ticks = period_ticks;
        self.phase_ticks = phase_ticks;
        self
    }

    pub fn effective_priority(&self) -> Priority {
        self.effective_priority
    }

    /// `true` while the effective priority is above the base priority.
    pub fn is_boosted(&self) -> bool {
        self.effective_priority > self.base_priority
    }

    /// Raise the effective priority to `to`.
    ///
    /// Never lowers it below `base_priority`, so `boost(p)` with `p` at or
    /// below the base is equivalent to [`restore`](Self::restore).
    pub fn boost(&mut self, to: Priority) {
        self.effective_priority = to.max(self.base_priority);
    }

    /// Drop any inherited priority.
    pub fn restore(&mut self) {
        self.effective_priority = self.base_priority;
    }
}

// ── TaskTable ─────────────────────────────────────────────────────────────────

/// All task descriptors, indexed by [`TaskId`].  Tasks are never removed.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: Vec<TaskDescriptor>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor and return its id.
    pub fn insert(&mut self, desc: TaskDescriptor) -> TaskId {
        self.tasks.push(desc);
        TaskId(self.tasks.len() - 1)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskDescriptor> {
        self.tasks.get(id.0)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskDescriptor> {
        self.tasks.get_mut(id.0)
    }

    /// Effective priority of `id`, `0` for an unknown id.
    pub fn priority(&self, id: TaskId) -> Priority {
        self.get(id).map(|t| t.effective_priority()).unwrap_or(0)
    }

    /// Task name, `"?"` for an unknown id.
    pub fn name(&self, id: TaskId) -> &str {
        self.get(id).map(|t| t.name.as_str()).unwrap_or("?")
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &TaskDescriptor)> {
        self.tasks.iter().enumerate().map(|(i, t)| (TaskId(i), t))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_starts_at_base_priority() {
        let t = TaskDescriptor::new("tLED_ON", 3, 1024);
        assert_eq!(t.base_priority, 3);
        assert_eq!(t.effective_priority(), 3);
        assert!(!t.is_boosted());
    }

    #[test]
    fn boost_raises_and_restore_returns_exactly_to_base() {
        let mut t = TaskDescriptor::new("low", 1, 1024);
        t.boost(3);
        assert_eq!(t.effective_priority(), 3);
        assert!(t.is_boosted());

        t.restore();
        assert_eq!(t.effective_priority(), 1);
        assert!(!t.is_boosted());
    }

    #[test]
    fn boost_below_base_is_a_restore() {
        let mut t = TaskDescriptor::new("mid", 2, 1024);
        t.boost(5);
        t.boost(1);
        assert_eq!(t.effective_priority(), 2, "never below base");
    }

    #[test]
    fn with_timing_records_period_and_phase() {
        let t = TaskDescriptor::new("tLED_OFF", 2, 1024).with_timing(2_000, 1_000);
        assert_eq!(t.period_ticks, 2_000);
        assert_eq!(t.phase_ticks, 1_000);
    }

    #[test]
    fn table_assigns_ids_in_creation_order() {
        let mut table = TaskTable::new();
        let a = table.insert(TaskDescriptor::new("a", 1, 1024));
        let b = table.insert(TaskDescriptor::new("b", 2, 1024));
        assert_eq!(a, TaskId(0));
        assert_eq!(b, TaskId(1));
        assert_eq!(table.len(), 2);
        assert_eq!(table.name(b), "b");
        assert_eq!(table.priority(b), 2);
    }

    #[test]
    fn table_unknown_id_has_fallbacks() {
        let table = TaskTable::new();
        assert!(table.is_empty());
        assert_eq!(table.name(TaskId(7)), "?");
        assert_eq!(table.priority(TaskId(7)), 0);
    }
}
