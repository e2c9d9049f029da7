/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error type for the kernel's creation capabilities.
//!
//! Every variant is fatal at startup; the scheduler is never entered.  Runtime
//! failures (lock timeouts, guard misuse) are *not* kernel errors; they are
//! returned to the calling task as ordinary values.

use thiserror::Error;

use crate::guard::GuardError;
use crate::task::Priority;

#[derive(Debug, Error)]
pub enum KernelError {
    /// The task table is full.
    #[error("cannot create task '{name}': task limit of {limit} reached")]
    TooManyTasks { name: String, limit: usize },

    /// Priority is not below `max_priorities`.
    #[error("task '{name}' priority {priority} out of range (max {max})")]
    PriorityOutOfRange {
        name: String,
        priority: Priority,
        max: Priority,
    },

    /// Stack budget below the kernel minimum.
    #[error("task '{name}' stack budget {budget} below minimum {minimum}")]
    StackTooSmall {
        name: String,
        budget: usize,
        minimum: usize,
    },

    /// No room left for another mutex / semaphore / queue.
    #[error("cannot create {kind}: primitive limit of {limit} reached")]
    ResourceExhausted { kind: &'static str, limit: usize },

    /// The primitive itself rejected its parameters.
    #[error("invalid primitive: {0}")]
    Guard(#[from] GuardError),
}
