//! Deterministic single-core preemptive kernel.
//!
//! [`Kernel`] runs a fixed set of tasks against a tick counter, one tick per
//! [`Kernel::step`].  Within a tick the highest-priority ready task runs
//! until it blocks, is preempted by a task it made ready, or starts spending
//! wall time in [`TaskContext::spin`]; everything else a task does (lock
//! traffic, pin writes, queue sends) takes zero time.
//!
//! ```text
//! step():
//!   dispatch ── select ─► poll task ─► handle request ─┐
//!      ▲                                                │ reply now / block
//!      └────────────────────────────────────────────────┘
//!   advance ── tick += 1 ─► wake expired delays / timeouts ─► rotate slice
//! ```
//!
//! # Scheduling rules
//! * Highest *effective* priority wins; a task boosted by a mutex competes at
//!   its inherited priority.
//! * The running task keeps the CPU against equal-priority contenders until
//!   it blocks or yields, unless time slicing rotates it at a tick boundary.
//! * Among equal-priority ready tasks, the one ready first runs first.
//! * With preemption disabled the running task is only replaced when it
//!   blocks or yields.
//!
//! All kernel state lives on one thread.  Only the [`TraceRecorder`] is
//! shared (`Arc`) so it can be read from elsewhere while the kernel runs.

pub mod context;
pub mod error;

pub use context::TaskContext;
pub use error::KernelError;

use std::cell::Cell;
use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Wake, Waker};

use tracing::{debug, error, info, trace, warn};

use crate::actuator::{AccessPolicy, Actuator, Level};
use crate::guard::{
    AcquireAttempt, Command, CommandQueue, GuardError, Lock, LockId, QueueId, Timeout,
};
use crate::task::{Priority, TaskDescriptor, TaskId, TaskState, TaskTable};
use crate::tick::{Tick, DEFAULT_TICK_RATE_HZ};
use crate::trace::{TraceReason, TraceRecorder};
use context::{Mailbox, Reply, Request};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Kernel calls one tick may serve before the running task is charged the
/// tick anyway.  Only reached by a task that loops without ever spinning,
/// delaying or blocking.
pub const MAX_SYSCALLS_PER_TICK: u32 = 1_000;

/// `configMAX_PRIORITIES`.
pub const DEFAULT_MAX_PRIORITIES: Priority = 15;

/// `configMINIMAL_STACK_SIZE`.
pub const DEFAULT_MINIMAL_STACK: usize = 768;

pub const DEFAULT_MAX_TASKS: usize = 8;

/// Locks and queues together.
pub const DEFAULT_MAX_PRIMITIVES: usize = 8;

// ── KernelConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    pub tick_rate_hz: u32,
    pub preemption: bool,
    pub time_slicing: bool,
    pub max_priorities: Priority,
    pub minimal_stack: usize,
    pub max_tasks: usize,
    pub max_primitives: usize,
    /// Tick counter value at start-up.  Set near `u32::MAX` to exercise
    /// counter wrap.
    pub initial_tick: Tick,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            preemption: true,
            time_slicing: false,
            max_priorities: DEFAULT_MAX_PRIORITIES,
            minimal_stack: DEFAULT_MINIMAL_STACK,
            max_tasks: DEFAULT_MAX_TASKS,
            max_primitives: DEFAULT_MAX_PRIMITIVES,
            initial_tick: Tick(0),
        }
    }
}

// ── Per-task bookkeeping ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Wait {
    Delay { since: Tick, ticks: u32 },
    Lock {
        lock: LockId,
        since: Tick,
        timeout: Timeout,
    },
    Queue {
        queue: QueueId,
        since: Tick,
        timeout: Timeout,
    },
}

#[derive(Debug, Clone, Copy)]
enum Run {
    Ready,
    Blocked(Wait),
    /// The task body returned.  Never scheduled again.
    Exited,
}

struct Tcb {
    future: Pin<Box<dyn Future<Output = ()>>>,
    mailbox: Rc<Mailbox>,
    run: Run,
    /// Start tick and length of an unfinished `spin`.
    spin: Option<(Tick, u32)>,
    /// Set when a send woke this task out of a queue wait; the command is
    /// read when the task next runs so it sees the latest one.
    retry_receive: Option<QueueId>,
    ready_seq: u64,
    cpu_ticks: u64,
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

// ── Kernel ────────────────────────────────────────────────────────────────────

pub struct Kernel {
    config: KernelConfig,
    clock: Rc<Cell<Tick>>,
    tasks: TaskTable,
    tcbs: Vec<Tcb>,
    locks: Vec<Lock>,
    queues: Vec<CommandQueue>,
    actuator: Actuator,
    trace: Arc<TraceRecorder>,
    current: Option<TaskId>,
    next_seq: u64,
    idle_ticks: u64,
    waker: Waker,
    runaway_warned: bool,
}

impl Kernel {
    pub fn new(config: KernelConfig, trace: Arc<TraceRecorder>, led_pin: u32) -> Self {
        info!(
            tick_rate_hz = config.tick_rate_hz,
            preemption = config.preemption,
            time_slicing = config.time_slicing,
            initial_tick = config.initial_tick.0,
            "kernel initialised"
        );
        Self {
            clock: Rc::new(Cell::new(config.initial_tick)),
            config,
            tasks: TaskTable::new(),
            tcbs: Vec::new(),
            locks: Vec::new(),
            queues: Vec::new(),
            actuator: Actuator::new(led_pin),
            trace,
            current: None,
            next_seq: 0,
            idle_ticks: 0,
            waker: Waker::from(Arc::new(NoopWake)),
            runaway_warned: false,
        }
    }

    // ── Creation ──────────────────────────────────────────────────────────────

    /// Create a task.  `entry` receives the task's [`TaskContext`] and
    /// returns the task body; the body is first polled when the task is
    /// first selected.
    ///
    /// # Errors
    /// [`KernelError::TooManyTasks`], [`KernelError::PriorityOutOfRange`] or
    /// [`KernelError::StackTooSmall`].
    pub fn spawn<F, Fut>(&mut self, desc: TaskDescriptor, entry: F) -> Result<TaskId, KernelError>
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        if self.tasks.len() >= self.config.max_tasks {
            return Err(KernelError::TooManyTasks {
                name: desc.name,
                limit: self.config.max_tasks,
            });
        }
        if desc.base_priority >= self.config.max_priorities {
            return Err(KernelError::PriorityOutOfRange {
                name: desc.name,
                priority: desc.base_priority,
                max: self.config.max_priorities.saturating_sub(1),
            });
        }
        if desc.stack_budget < self.config.minimal_stack {
            return Err(KernelError::StackTooSmall {
                name: desc.name,
                budget: desc.stack_budget,
                minimum: self.config.minimal_stack,
            });
        }

        let name = desc.name.clone();
        let priority = desc.base_priority;
        let id = self.tasks.insert(desc);
        let mailbox = Rc::new(Mailbox::default());
        let cx = TaskContext::new(
            id,
            &name,
            Rc::clone(&self.clock),
            self.config.tick_rate_hz,
            Rc::clone(&mailbox),
            Arc::clone(&self.trace),
        );
        let ready_seq = self.bump_seq();
        self.tcbs.push(Tcb {
            future: Box::pin(entry(cx)),
            mailbox,
            run: Run::Ready,
            spin: None,
            retry_receive: None,
            ready_seq,
            cpu_ticks: 0,
        });

        info!(task = %name, id = %id, priority, "task created");
        Ok(id)
    }

    /// Mutex with priority inheritance.
    pub fn create_mutex(&mut self) -> Result<LockId, KernelError> {
        self.check_room("mutex")?;
        self.locks.push(Lock::mutex());
        Ok(LockId(self.locks.len() - 1))
    }

    /// Binary semaphore without priority inheritance.  Pass `false` to get
    /// the "created taken" state that must be given once before use.
    pub fn create_binary_semaphore(
        &mut self,
        initially_available: bool,
    ) -> Result<LockId, KernelError> {
        self.check_room("binary semaphore")?;
        self.locks.push(Lock::binary_semaphore(initially_available));
        Ok(LockId(self.locks.len() - 1))
    }

    /// Overwrite queue.  `capacity` must be `1`.
    pub fn create_queue(&mut self, capacity: usize) -> Result<QueueId, KernelError> {
        self.check_room("queue")?;
        let queue = CommandQueue::with_capacity(capacity)?;
        self.queues.push(queue);
        Ok(QueueId(self.queues.len() - 1))
    }

    /// Decide which guard must be owned to write the LED pin.
    pub fn guard_actuator(&mut self, policy: AccessPolicy) {
        debug!(?policy, pin = self.actuator.pin(), "actuator access policy set");
        self.actuator.set_policy(policy);
    }

    fn check_room(&self, kind: &'static str) -> Result<(), KernelError> {
        if self.locks.len() + self.queues.len() >= self.config.max_primitives {
            return Err(KernelError::ResourceExhausted {
                kind,
                limit: self.config.max_primitives,
            });
        }
        Ok(())
    }

    // ── Running ───────────────────────────────────────────────────────────────

    /// Execute `ticks` ticks.
    pub fn run_for(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Execute the current tick and advance the counter by one.
    pub fn step(&mut self) {
        self.dispatch();
        self.advance();
    }

    fn dispatch(&mut self) {
        let mut calls = 0u32;
        loop {
            let Some(id) = self.select() else {
                self.current = None;
                self.idle_ticks += 1;
                return;
            };
            if self.current != Some(id) {
                trace!(tick = self.now().0, task = self.tasks.name(id), "switch in");
                self.current = Some(id);
            }

            let now = self.now();
            let tcb = &mut self.tcbs[id.0];
            if let Some((start, ticks)) = tcb.spin {
                if !now.has_elapsed(start, ticks) {
                    tcb.cpu_ticks += 1;
                    return;
                }
                tcb.spin = None;
                tcb.mailbox.post_reply(Reply::Done);
            }
            if let Some(queue) = tcb.retry_receive.take() {
                let cmd = self
                    .queues
                    .get_mut(queue.0)
                    .and_then(|q| q.try_receive(id).ok().flatten());
                tcb.mailbox.post_reply(Reply::Received(cmd));
            }

            if calls == MAX_SYSCALLS_PER_TICK {
                if !self.runaway_warned {
                    warn!(
                        tick = now.0,
                        task = self.tasks.name(id),
                        "task made {MAX_SYSCALLS_PER_TICK} kernel calls in one tick without blocking"
                    );
                    self.runaway_warned = true;
                }
                self.tcbs[id.0].cpu_ticks += 1;
                return;
            }
            calls += 1;
            self.poll(id);
        }
    }

    /// Pick the task that owns the CPU next.
    fn select(&self) -> Option<TaskId> {
        let current = self.current.filter(|&id| self.is_ready(id));
        if let Some(cur) = current {
            if !self.config.preemption {
                return Some(cur);
            }
        }

        let best = self
            .tcbs
            .iter()
            .enumerate()
            .filter(|(_, tcb)| matches!(tcb.run, Run::Ready))
            .max_by_key(|(i, tcb)| (self.tasks.priority(TaskId(*i)), Reverse(tcb.ready_seq)))
            .map(|(i, _)| TaskId(i))?;

        match current {
            Some(cur) if self.tasks.priority(cur) >= self.tasks.priority(best) => Some(cur),
            _ => Some(best),
        }
    }

    fn poll(&mut self, id: TaskId) {
        let mut cx = Context::from_waker(&self.waker);
        let tcb = &mut self.tcbs[id.0];
        if tcb.future.as_mut().poll(&mut cx).is_ready() {
            error!(task = self.tasks.name(id), "task body returned; it will not run again");
            tcb.run = Run::Exited;
            self.current = None;
            return;
        }

        match tcb.mailbox.take_request() {
            Some(request) => self.handle(id, request),
            None => {
                debug!(task = self.tasks.name(id), "task pending outside a kernel call");
                self.requeue(id);
            }
        }
    }

    /// Advance the tick counter and wake every task whose delay or timeout
    /// ran out, in creation order.
    fn advance(&mut self) {
        let now = self.now().offset(1);
        self.clock.set(now);

        for i in 0..self.tcbs.len() {
            let id = TaskId(i);
            let reply = match self.tcbs[i].run {
                Run::Blocked(Wait::Delay { since, ticks }) if now.has_elapsed(since, ticks) => {
                    Reply::Done
                }
                Run::Blocked(Wait::Lock {
                    lock,
                    since,
                    timeout: Timeout::Ticks(limit),
                }) if now.has_elapsed(since, limit) => {
                    if let Some(l) = self.locks.get_mut(lock.0) {
                        l.cancel_wait(id, &mut self.tasks);
                    }
                    debug!(tick = now.0, task = self.tasks.name(id), "lock wait timed out");
                    Reply::Acquired(false)
                }
                Run::Blocked(Wait::Queue {
                    since,
                    timeout: Timeout::Ticks(limit),
                    ..
                }) if now.has_elapsed(since, limit) => Reply::Received(None),
                _ => continue,
            };
            self.wake(id, reply);
        }

        if self.config.time_slicing {
            self.rotate();
        }
    }

    /// Send the running task to the back of its priority level if another
    /// task of that level is ready.
    fn rotate(&mut self) {
        let Some(cur) = self.current else {
            return;
        };
        if !self.is_ready(cur) {
            return;
        }
        let level = self.tasks.priority(cur);
        let contended = self.tcbs.iter().enumerate().any(|(i, tcb)| {
            i != cur.0
                && matches!(tcb.run, Run::Ready)
                && self.tasks.priority(TaskId(i)) == level
        });
        if contended {
            let seq = self.bump_seq();
            self.tcbs[cur.0].ready_seq = seq;
            self.current = None;
        }
    }

    // ── Kernel calls ──────────────────────────────────────────────────────────

    fn handle(&mut self, id: TaskId, request: Request) {
        trace!(tick = self.now().0, task = self.tasks.name(id), ?request, "kernel call");
        match request {
            Request::Acquire { lock, timeout } => self.sys_acquire(id, lock, timeout),
            Request::Release { lock } => self.sys_release(id, lock),
            Request::SetLevel(level) => self.sys_set_level(id, level),
            Request::GetLevel => {
                let level = self.actuator.level();
                self.complete(id, Reply::Level(level));
            }
            Request::Send { queue, cmd } => self.sys_send(id, queue, cmd),
            Request::Receive { queue, timeout } => self.sys_receive(id, queue, timeout),
            Request::Spin(0) => self.complete(id, Reply::Done),
            Request::Spin(ticks) => {
                let now = self.now();
                self.tcbs[id.0].spin = Some((now, ticks));
            }
            Request::Yield | Request::Delay(0) => {
                self.requeue(id);
                self.complete(id, Reply::Done);
            }
            Request::Delay(ticks) => self.block_for(id, ticks, TraceReason::Delay),
            Request::DelayUntil(0) => self.complete(id, Reply::Done),
            Request::DelayUntil(ticks) => self.block_for(id, ticks, TraceReason::DelayUntil),
        }
    }

    fn sys_acquire(&mut self, id: TaskId, lock_id: LockId, timeout: Timeout) {
        let now = self.now();
        let Some(lock) = self.locks.get_mut(lock_id.0) else {
            warn!(task = self.tasks.name(id), lock = lock_id.0, "acquire on unknown lock");
            self.complete(id, Reply::Acquired(false));
            return;
        };

        match lock.try_acquire(id) {
            AcquireAttempt::Granted => self.complete(id, Reply::Acquired(true)),
            AcquireAttempt::Recursive => {
                warn!(
                    task = self.tasks.name(id),
                    lock = lock_id.0,
                    "lock already held by the caller; locks are not recursive"
                );
                self.complete(id, Reply::Acquired(false));
            }
            AcquireAttempt::Busy if timeout.is_immediate() => {
                self.complete(id, Reply::Acquired(false));
            }
            AcquireAttempt::Busy => {
                lock.enqueue_waiter(id, &mut self.tasks);
                if let Some(holder) = lock.holder() {
                    if self.tasks.get(holder).is_some_and(TaskDescriptor::is_boosted) {
                        debug!(
                            tick = now.0,
                            holder = self.tasks.name(holder),
                            waiter = self.tasks.name(id),
                            priority = self.tasks.priority(holder),
                            "priority inherited"
                        );
                    }
                }
                self.record(id, TraceReason::BlockLock);
                self.block(
                    id,
                    Wait::Lock {
                        lock: lock_id,
                        since: now,
                        timeout,
                    },
                );
            }
        }
    }

    fn sys_release(&mut self, id: TaskId, lock_id: LockId) {
        let result = match self.locks.get_mut(lock_id.0) {
            Some(lock) => lock.release(id, &mut self.tasks),
            None => Err(GuardError::NotOwner {
                task: id,
                holder: None,
            }),
        };
        let reply = match result {
            Ok(Some(next)) => {
                self.wake(next, Reply::Acquired(true));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(task = self.tasks.name(id), lock = lock_id.0, "{e}");
                Err(e)
            }
        };
        self.complete(id, Reply::Released(reply));
    }

    fn sys_set_level(&mut self, id: TaskId, level: Level) {
        let now = self.now();
        let owner = match self.actuator.policy() {
            AccessPolicy::Unguarded => None,
            AccessPolicy::Locked(lock) => self.locks.get(lock.0).and_then(Lock::holder),
            AccessPolicy::SingleWriter(queue) => {
                self.queues.get(queue.0).and_then(CommandQueue::consumer)
            }
        };
        let result = self.actuator.set_level(id, owner, level, now);
        if let Ok(true) = result {
            debug!(tick = now.0, task = self.tasks.name(id), %level, "pin level changed");
        }
        self.complete(id, Reply::LevelSet(result.map(|_| ())));
    }

    fn sys_send(&mut self, id: TaskId, queue_id: QueueId, cmd: Command) {
        let Some(queue) = self.queues.get_mut(queue_id.0) else {
            warn!(task = self.tasks.name(id), queue = queue_id.0, "send to unknown queue");
            self.complete(id, Reply::Done);
            return;
        };
        if let Some(dropped) = queue.overwrite(cmd) {
            debug!(%dropped, latest = %cmd, "pending command overwritten");
        }

        if let Some(consumer) = queue.consumer() {
            let waiting = matches!(
                self.tcbs[consumer.0].run,
                Run::Blocked(Wait::Queue { queue, .. }) if queue == queue_id
            );
            if waiting {
                let seq = self.bump_seq();
                let tcb = &mut self.tcbs[consumer.0];
                tcb.run = Run::Ready;
                tcb.ready_seq = seq;
                tcb.retry_receive = Some(queue_id);
            }
        }
        self.complete(id, Reply::Done);
    }

    fn sys_receive(&mut self, id: TaskId, queue_id: QueueId, timeout: Timeout) {
        let now = self.now();
        let Some(queue) = self.queues.get_mut(queue_id.0) else {
            warn!(task = self.tasks.name(id), queue = queue_id.0, "receive on unknown queue");
            self.complete(id, Reply::Received(None));
            return;
        };

        match queue.try_receive(id) {
            Ok(Some(cmd)) => self.complete(id, Reply::Received(Some(cmd))),
            Ok(None) if timeout.is_immediate() => self.complete(id, Reply::Received(None)),
            Ok(None) => {
                self.record(id, TraceReason::BlockQueueRecv);
                self.block(
                    id,
                    Wait::Queue {
                        queue: queue_id,
                        since: now,
                        timeout,
                    },
                );
            }
            Err(e) => {
                warn!(task = self.tasks.name(id), "{e}");
                self.complete(id, Reply::Received(None));
            }
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn complete(&mut self, id: TaskId, reply: Reply) {
        self.tcbs[id.0].mailbox.post_reply(reply);
    }

    fn block(&mut self, id: TaskId, wait: Wait) {
        self.tcbs[id.0].run = Run::Blocked(wait);
        if self.current == Some(id) {
            self.current = None;
        }
    }

    fn block_for(&mut self, id: TaskId, ticks: u32, reason: TraceReason) {
        let since = self.now();
        self.record(id, reason);
        self.block(id, Wait::Delay { since, ticks });
    }

    fn wake(&mut self, id: TaskId, reply: Reply) {
        let seq = self.bump_seq();
        let tcb = &mut self.tcbs[id.0];
        tcb.run = Run::Ready;
        tcb.ready_seq = seq;
        tcb.mailbox.post_reply(reply);
    }

    /// Move a ready task behind its equal-priority peers.
    fn requeue(&mut self, id: TaskId) {
        let seq = self.bump_seq();
        self.tcbs[id.0].ready_seq = seq;
        if self.current == Some(id) {
            self.current = None;
        }
    }

    fn record(&self, id: TaskId, reason: TraceReason) {
        self.trace
            .record_event(self.now(), self.tasks.name(id), reason);
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn is_ready(&self, id: TaskId) -> bool {
        self.tcbs
            .get(id.0)
            .is_some_and(|tcb| matches!(tcb.run, Run::Ready))
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Current tick (`xTaskGetTickCount`).
    pub fn now(&self) -> Tick {
        self.clock.get()
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn task_by_name(&self, name: &str) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|(_, desc)| desc.name == name)
            .map(|(id, _)| id)
    }

    pub fn state(&self, id: TaskId) -> TaskState {
        match self.tcbs.get(id.0).map(|tcb| tcb.run) {
            Some(Run::Ready) if self.current == Some(id) => TaskState::Running,
            Some(Run::Ready) => TaskState::Ready,
            _ => TaskState::Blocked,
        }
    }

    /// Effective (possibly inherited) priority.
    pub fn priority(&self, id: TaskId) -> Priority {
        self.tasks.priority(id)
    }

    /// Ticks the task was charged for, spinning or otherwise holding the CPU
    /// at a tick boundary.
    pub fn cpu_ticks(&self, id: TaskId) -> u64 {
        self.tcbs.get(id.0).map_or(0, |tcb| tcb.cpu_ticks)
    }

    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks
    }

    pub fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub fn lock(&self, id: LockId) -> Option<&Lock> {
        self.locks.get(id.0)
    }

    pub fn queue(&self, id: QueueId) -> Option<&CommandQueue> {
        self.queues.get(id.0)
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }

    pub fn trace(&self) -> &Arc<TraceRecorder> {
        &self.trace
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
