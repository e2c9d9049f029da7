/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error type for the shared-resource guards.
//!
//! A failed *acquire* is not an error: it is the normal "resource busy"
//! outcome and is reported as `false` by the kernel.  [`GuardError`] only
//! covers misuse (releasing what you do not hold, receiving from a queue you
//! do not own) and creation-time misconfiguration.

use thiserror::Error;

use crate::task::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// A mutex may only be released by the task that holds it.
    #[error("task {task} released a mutex it does not hold (holder: {holder:?})")]
    NotOwner {
        task: TaskId,
        holder: Option<TaskId>,
    },

    /// Giving a binary semaphore that is already available.
    #[error("semaphore is already available")]
    AlreadyAvailable,

    /// Overwrite semantics are only defined for a single-slot queue.
    #[error("overwrite queue needs capacity 1, got {capacity}")]
    OverwriteNeedsSingleSlot { capacity: usize },

    /// The queue is already bound to a different consumer task.
    #[error("queue is owned by consumer {owner}, task {task} may not receive")]
    NotConsumer { task: TaskId, owner: TaskId },
}
