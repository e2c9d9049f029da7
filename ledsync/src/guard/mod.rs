//! Shared-resource guards for the LED actuator.
//!
//! Three interchangeable designs serialise writes to the pin:
//!
//! | Design | Type | Correctness comes from |
//! |---|---|---|
//! | Mutex with priority inheritance | [`Lock::mutex`] | locked writer |
//! | Binary semaphore, no inheritance | [`Lock::binary_semaphore`] | locked writer |
//! | Single-owner command queue | [`CommandQueue`] | single writer |
//!
//! The guards are plain data structures.  Blocking, timeouts and waking are
//! done by the [`kernel`](crate::kernel), which calls into these types and
//! lends them the [`TaskTable`](crate::task::TaskTable) when priorities must
//! change.

pub mod error;
pub mod lock;
pub mod queue;

pub use error::GuardError;
pub use lock::{AcquireAttempt, Lock, LockKind};
pub use queue::{Command, CommandQueue, QueueStats};

use std::fmt;

/// Handle to a lock created by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId(pub usize);

/// Handle to a command queue created by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub usize);

/// How long an acquire or receive may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block for at most this many ticks.  `Ticks(0)` never blocks.
    Ticks(u32),
    /// `portMAX_DELAY`.
    Forever,
}

impl Timeout {
    /// Never block; fail at once if the resource is busy.
    pub const IMMEDIATE: Timeout = Timeout::Ticks(0);

    pub fn is_immediate(self) -> bool {
        self == Timeout::IMMEDIATE
    }
}

/// Which guard design protects the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardDesign {
    Mutex,
    Semaphore,
    Queue,
}

impl GuardDesign {
    pub fn label(self) -> &'static str {
        match self {
            GuardDesign::Mutex => LockKind::Mutex.label(),
            GuardDesign::Semaphore => LockKind::BinarySemaphore.label(),
            GuardDesign::Queue => "queue(len=1)",
        }
    }
}

impl fmt::Display for GuardDesign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for GuardDesign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mutex" => Ok(GuardDesign::Mutex),
            "semaphore" | "binsem" => Ok(GuardDesign::Semaphore),
            "queue" => Ok(GuardDesign::Queue),
            other => Err(format!(
                "unknown guard design '{other}' (valid: mutex, semaphore, queue)"
            )),
        }
    }
}
