/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task-side API of the kernel.
//!
//! A task body is an `async` block that receives a [`TaskContext`].  Every
//! kernel call is a future that parks its request in the task's mailbox and
//! returns `Pending`; the kernel picks the request up, acts on it and either
//! posts a reply right away or later, when the task is woken.  Polling the
//! task again then resolves the call with that reply.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::actuator::{ActuatorError, Level};
use crate::guard::{Command, GuardError, LockId, QueueId, Timeout};
use crate::task::TaskId;
use crate::tick::{ms_to_ticks, Tick};
use crate::trace::TraceRecorder;

// ── Mailbox ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Acquire { lock: LockId, timeout: Timeout },
    Release { lock: LockId },
    SetLevel(Level),
    GetLevel,
    Send { queue: QueueId, cmd: Command },
    Receive { queue: QueueId, timeout: Timeout },
    Spin(u32),
    Yield,
    Delay(u32),
    /// Ticks left until the absolute deadline; `0` if it already passed.
    DelayUntil(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Done,
    Acquired(bool),
    Released(Result<(), GuardError>),
    LevelSet(Result<(), ActuatorError>),
    Level(Level),
    Received(Option<Command>),
}

/// One request slot and one reply slot, shared by a task and the kernel.
#[derive(Default)]
pub(crate) struct Mailbox {
    request: Cell<Option<Request>>,
    reply: Cell<Option<Reply>>,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox").finish_non_exhaustive()
    }
}

impl Mailbox {
    pub(crate) fn take_request(&self) -> Option<Request> {
        self.request.take()
    }

    pub(crate) fn post_reply(&self, reply: Reply) {
        self.reply.set(Some(reply));
    }
}

/// Future for a single kernel call.
struct Syscall<'a> {
    mailbox: &'a Mailbox,
    request: Option<Request>,
}

impl Future for Syscall<'_> {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Reply> {
        if let Some(request) = self.request.take() {
            self.mailbox.reply.set(None);
            self.mailbox.request.set(Some(request));
            return Poll::Pending;
        }
        match self.mailbox.reply.take() {
            Some(reply) => Poll::Ready(reply),
            None => Poll::Pending,
        }
    }
}

// ── TaskContext ───────────────────────────────────────────────────────────────

/// Handle a task uses to talk to the kernel.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    name: Rc<str>,
    clock: Rc<Cell<Tick>>,
    tick_rate_hz: u32,
    mailbox: Rc<Mailbox>,
    trace: Arc<TraceRecorder>,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        clock: Rc<Cell<Tick>>,
        tick_rate_hz: u32,
        mailbox: Rc<Mailbox>,
        trace: Arc<TraceRecorder>,
    ) -> Self {
        Self {
            id,
            name: Rc::from(name),
            clock,
            tick_rate_hz,
            mailbox,
            trace,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current tick (`xTaskGetTickCount`).
    pub fn now(&self) -> Tick {
        self.clock.get()
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        ms_to_ticks(ms, self.tick_rate_hz)
    }

    /// The kernel's trace recorder, for reporting tasks.
    pub fn trace(&self) -> &Arc<TraceRecorder> {
        &self.trace
    }

    async fn call(&self, request: Request) -> Reply {
        Syscall {
            mailbox: &self.mailbox,
            request: Some(request),
        }
        .await
    }

    // ── Guards ────────────────────────────────────────────────────────────────

    /// Take `lock`, blocking up to `timeout`.  Returns `false` on timeout,
    /// when the lock is busy and `timeout` is immediate, or when the caller
    /// already holds it.
    pub async fn acquire(&self, lock: LockId, timeout: Timeout) -> bool {
        match self.call(Request::Acquire { lock, timeout }).await {
            Reply::Acquired(granted) => granted,
            _ => false,
        }
    }

    pub async fn release(&self, lock: LockId) -> Result<(), GuardError> {
        match self.call(Request::Release { lock }).await {
            Reply::Released(result) => result,
            _ => Ok(()),
        }
    }

    /// Overwrite the queue's slot.  Never blocks.
    pub async fn send(&self, queue: QueueId, cmd: Command) {
        self.call(Request::Send { queue, cmd }).await;
    }

    /// Wait for a command.  `None` on timeout or if another task is the
    /// queue's consumer.
    pub async fn receive(&self, queue: QueueId, timeout: Timeout) -> Option<Command> {
        match self.call(Request::Receive { queue, timeout }).await {
            Reply::Received(cmd) => cmd,
            _ => None,
        }
    }

    // ── Actuator ──────────────────────────────────────────────────────────────

    pub async fn set_level(&self, level: Level) -> Result<(), ActuatorError> {
        match self.call(Request::SetLevel(level)).await {
            Reply::LevelSet(result) => result,
            _ => Ok(()),
        }
    }

    pub async fn get_level(&self) -> Level {
        match self.call(Request::GetLevel).await {
            Reply::Level(level) => level,
            _ => Level::Low,
        }
    }

    // ── Time ──────────────────────────────────────────────────────────────────

    /// Keep the CPU for `ticks` ticks of wall time without blocking.  Higher
    /// priority tasks still preempt; time spent preempted counts.
    pub async fn spin(&self, ticks: u32) {
        self.call(Request::Spin(ticks)).await;
    }

    /// Give way to other ready tasks of the same priority (`taskYIELD`).
    pub async fn yield_now(&self) {
        self.call(Request::Yield).await;
    }

    /// Block for `ticks` ticks relative to now (`vTaskDelay`).  `0` yields.
    pub async fn delay_for(&self, ticks: u32) {
        self.call(Request::Delay(ticks)).await;
    }

    /// Block until `*deadline + period` and advance `deadline` by exactly one
    /// period (`vTaskDelayUntil`).  If that instant already passed the call
    /// returns without blocking, and the deadline still advances so the
    /// period grid never drifts.
    pub async fn delay_until(&self, deadline: &mut Tick, period: u32) {
        let previous = *deadline;
        *deadline = previous.offset(period);
        let elapsed = self.now().ticks_since(previous);
        let remaining = period.saturating_sub(elapsed);
        self.call(Request::DelayUntil(remaining)).await;
    }
}
