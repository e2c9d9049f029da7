//! The LED lab: guard selection, task set and start-up.
//!
//! ```text
//!             ┌──────────┐   lock / send   ┌────────────┐   write   ┌─────┐
//!  tLED_ON ──►│          │ ──────────────► │  LedGuard  │ ────────► │ pin │
//!  tLED_OFF ─►│  drive() │                 │ mutex      │           └─────┘
//!             └──────────┘                 │ binsem     │              ▲
//!  tSTATUS  ── trace summary / tick        │ queue ─────┼─► tLED_DRV ──┘
//!                                          └────────────┘
//!  tLOAD    ── optional CPU hog, never touches the guard
//! ```
//!
//! [`build`] creates the guard and the tasks on a fresh [`Kernel`].  Any
//! creation failure is returned before a single tick runs.

pub mod report;
mod tasks;

pub use report::{LabReport, TaskReport};

use std::sync::Arc;

use tracing::info;

use crate::actuator::AccessPolicy;
use crate::config::{LabConfig, LoadConfig, Pattern, PriorityMode, TimingConfig};
use crate::guard::{GuardDesign, LockId, LockKind, QueueId, Timeout};
use crate::kernel::{Kernel, KernelError};
use crate::task::{Priority, TaskDescriptor, TaskId};
use crate::tick::ms_to_ticks;
use crate::trace::TraceRecorder;

pub const LED_ON_TASK: &str = "tLED_ON";
pub const LED_OFF_TASK: &str = "tLED_OFF";
pub const STATUS_TASK: &str = "tSTATUS";
pub const LED_DRIVER_TASK: &str = "tLED_DRV";
pub const LOAD_TASK: &str = "tLOAD";

// ── LedGuard ──────────────────────────────────────────────────────────────────

/// The guard instance protecting the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedGuard {
    Lock { id: LockId, kind: LockKind },
    Queue(QueueId),
}

impl LedGuard {
    pub fn label(self) -> &'static str {
        match self {
            LedGuard::Lock { kind, .. } => kind.label(),
            LedGuard::Queue(_) => GuardDesign::Queue.label(),
        }
    }

    /// Who the actuator accepts writes from under this guard.
    pub fn policy(self) -> AccessPolicy {
        match self {
            LedGuard::Lock { id, .. } => AccessPolicy::Locked(id),
            LedGuard::Queue(queue) => AccessPolicy::SingleWriter(queue),
        }
    }
}

// ── Priorities & timing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabPriorities {
    pub led_on: Priority,
    pub led_off: Priority,
    pub status: Priority,
    /// One above LED-OFF.
    pub driver: Priority,
}

impl LabPriorities {
    pub fn for_mode(mode: PriorityMode) -> Self {
        let (led_on, led_off, status) = match mode {
            PriorityMode::Distinct => (3, 2, 1),
            PriorityMode::Same => (2, 2, 2),
        };
        Self {
            led_on,
            led_off,
            status,
            driver: led_off + 1,
        }
    }
}

/// [`TimingConfig`] converted to ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    pub busy_wait: u32,
    pub off_delay: u32,
    pub status_period: u32,
    pub period: u32,
    pub phase_offset: u32,
    pub lock_timeout: Timeout,
}

impl TaskTiming {
    pub fn from_config(timing: &TimingConfig, tick_rate_hz: u32) -> Self {
        let ticks = |ms| ms_to_ticks(ms, tick_rate_hz);
        Self {
            busy_wait: ticks(timing.busy_wait_ms),
            off_delay: ticks(timing.off_delay_ms),
            status_period: ticks(timing.status_period_ms),
            period: ticks(timing.alternation_period_ms),
            phase_offset: ticks(timing.effective_phase_offset_ms()),
            lock_timeout: timing
                .lock_timeout_ms
                .map_or(Timeout::Forever, |ms| Timeout::Ticks(ticks(ms))),
        }
    }
}

/// [`LoadConfig`] converted to ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTiming {
    pub offset: u32,
    pub busy: u32,
    pub period: u32,
}

impl LoadTiming {
    pub fn from_config(load: &LoadConfig, tick_rate_hz: u32) -> Self {
        Self {
            offset: ms_to_ticks(load.offset_ms, tick_rate_hz),
            busy: ms_to_ticks(load.busy_ms, tick_rate_hz),
            period: ms_to_ticks(load.period_ms, tick_rate_hz).max(1),
        }
    }
}

/// What every lab task gets to see.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lab {
    pub(crate) guard: LedGuard,
    pub(crate) pattern: Pattern,
    pub(crate) priority_mode: PriorityMode,
    pub(crate) timing: TaskTiming,
}

// ── Start-up ──────────────────────────────────────────────────────────────────

/// Handles of a started lab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabTasks {
    pub led_on: TaskId,
    pub led_off: TaskId,
    pub status: TaskId,
    /// Only in the queue design.
    pub driver: Option<TaskId>,
    /// Only with a `load` section.
    pub load: Option<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabApp {
    pub guard: LedGuard,
    pub tasks: LabTasks,
}

/// Create the kernel, the guard and the task set described by `config`.
///
/// # Errors
/// Any [`KernelError`] from creating the guard or a task.  The binary treats
/// these as fatal.
pub fn build(config: &LabConfig) -> Result<(Kernel, LabApp), KernelError> {
    let scenario = &config.scenario;
    let trace = Arc::new(TraceRecorder::new(config.trace_capacity));
    let mut kernel = Kernel::new(config.kernel.clone(), trace, scenario.led_pin);

    let guard = match scenario.design {
        GuardDesign::Mutex => LedGuard::Lock {
            id: kernel.create_mutex()?,
            kind: LockKind::Mutex,
        },
        // created, then given once so the first take succeeds
        GuardDesign::Semaphore => LedGuard::Lock {
            id: kernel.create_binary_semaphore(true)?,
            kind: LockKind::BinarySemaphore,
        },
        GuardDesign::Queue => LedGuard::Queue(kernel.create_queue(1)?),
    };
    kernel.guard_actuator(guard.policy());

    let timing = TaskTiming::from_config(&scenario.timing, config.kernel.tick_rate_hz);
    let lab = Lab {
        guard,
        pattern: scenario.pattern,
        priority_mode: scenario.priority_mode,
        timing,
    };
    let prio = LabPriorities::for_mode(scenario.priority_mode);
    let stack = scenario.stack_budget;

    let driver = match guard {
        LedGuard::Queue(queue) => Some(kernel.spawn(
            TaskDescriptor::new(LED_DRIVER_TASK, prio.driver, stack),
            move |cx| tasks::led_driver(cx, queue),
        )?),
        LedGuard::Lock { .. } => None,
    };

    let (on_timing, off_timing) = match scenario.pattern {
        Pattern::BusyWait | Pattern::HoldBusyWait | Pattern::HoldDelay => {
            ((timing.busy_wait.saturating_add(1), 0), (timing.off_delay, 0))
        }
        Pattern::Alternation => ((timing.period, 0), (timing.period, timing.phase_offset)),
    };
    let led_on = kernel.spawn(
        TaskDescriptor::new(LED_ON_TASK, prio.led_on, stack).with_timing(on_timing.0, on_timing.1),
        move |cx| tasks::led_on(cx, lab),
    )?;
    let led_off = kernel.spawn(
        TaskDescriptor::new(LED_OFF_TASK, prio.led_off, stack)
            .with_timing(off_timing.0, off_timing.1),
        move |cx| tasks::led_off(cx, lab),
    )?;
    let status = kernel.spawn(
        TaskDescriptor::new(STATUS_TASK, prio.status, stack).with_timing(timing.status_period, 0),
        move |cx| tasks::status(cx, lab),
    )?;

    let load = match &scenario.load {
        Some(load_cfg) => {
            let load_timing = LoadTiming::from_config(load_cfg, config.kernel.tick_rate_hz);
            let priority = load_cfg.priority.unwrap_or(prio.led_off);
            Some(kernel.spawn(
                TaskDescriptor::new(LOAD_TASK, priority, stack)
                    .with_timing(load_timing.period, load_timing.offset),
                move |cx| tasks::load(cx, load_timing),
            )?)
        }
        None => None,
    };

    info!(
        guard = guard.label(),
        pattern = %scenario.pattern,
        same_priority = scenario.priority_mode.is_same(),
        load = load.is_some(),
        "LED lab started"
    );

    Ok((
        kernel,
        LabApp {
            guard,
            tasks: LabTasks {
                led_on,
                led_off,
                status,
                driver,
                load,
            },
        },
    ))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
