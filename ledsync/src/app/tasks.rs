/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bodies of the lab tasks.  Each runs forever.

use tracing::{debug, info, warn};

use super::{Lab, LedGuard, LoadTiming};
use crate::actuator::Level;
use crate::config::Pattern;
use crate::guard::{Command, QueueId, Timeout};
use crate::kernel::TaskContext;
use crate::tick::ticks_to_ms;
use crate::trace::TraceCursor;

/// What a task does between writing the pin and giving the guard back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hold {
    /// Release at once.
    Release,
    /// Busy-wait this many ticks first.
    Spin(u32),
    /// Sleep this many ticks first, still owning the guard.
    Delay(u32),
}

impl Hold {
    async fn run(self, cx: &TaskContext) {
        match self {
            Hold::Release => {}
            Hold::Spin(ticks) => cx.spin(ticks).await,
            Hold::Delay(ticks) => cx.delay_for(ticks).await,
        }
    }
}

impl LedGuard {
    /// Ask for `level` through the guard, keeping it for `hold`.  Returns
    /// `false` if the lock wait timed out and the command was skipped.
    ///
    /// The queue has nothing to keep; `hold` then simply follows the send.
    pub(crate) async fn drive(
        self,
        cx: &TaskContext,
        level: Level,
        timeout: Timeout,
        hold: Hold,
    ) -> bool {
        match self {
            LedGuard::Lock { id, kind } => {
                let requested = cx.now();
                if !cx.acquire(id, timeout).await {
                    warn!(
                        task = cx.name(),
                        lock = kind.label(),
                        "gave up waiting for the LED, command {level} skipped"
                    );
                    return false;
                }
                let wait_ms = ticks_to_ms(cx.now().ticks_since(requested), cx.tick_rate_hz());
                info!(task = cx.name(), "took LED {} (wait={wait_ms} ms)", kind.label());

                match cx.set_level(level).await {
                    Ok(()) => info!(task = cx.name(), "LED {level}"),
                    Err(e) => warn!(task = cx.name(), "{e}"),
                }
                if hold != Hold::Release {
                    debug!(task = cx.name(), ?hold, "keeping the LED");
                }
                hold.run(cx).await;
                if let Err(e) = cx.release(id).await {
                    warn!(task = cx.name(), "{e}");
                }
                true
            }
            LedGuard::Queue(queue) => {
                let cmd = Command::for_level(level);
                cx.send(queue, cmd).await;
                info!(task = cx.name(), %cmd, "command sent");
                hold.run(cx).await;
                true
            }
        }
    }
}

pub(crate) async fn led_on(cx: TaskContext, lab: Lab) {
    let timeout = lab.timing.lock_timeout;
    match lab.pattern {
        Pattern::BusyWait | Pattern::HoldDelay => loop {
            lab.guard.drive(&cx, Level::High, timeout, Hold::Release).await;
            info!(
                task = cx.name(),
                busy_wait_ms = ticks_to_ms(lab.timing.busy_wait, cx.tick_rate_hz()),
                "busy-waiting without the lock"
            );
            cx.spin(lab.timing.busy_wait).await;
            cx.yield_now().await;
            cx.delay_for(1).await;
        },
        Pattern::HoldBusyWait => loop {
            let hold = Hold::Spin(lab.timing.busy_wait);
            lab.guard.drive(&cx, Level::High, timeout, hold).await;
            cx.yield_now().await;
            cx.delay_for(1).await;
        },
        Pattern::Alternation => {
            let mut next = cx.now();
            loop {
                lab.guard.drive(&cx, Level::High, timeout, Hold::Release).await;
                cx.delay_until(&mut next, lab.timing.period).await;
            }
        }
    }
}

pub(crate) async fn led_off(cx: TaskContext, lab: Lab) {
    let timeout = lab.timing.lock_timeout;
    match lab.pattern {
        Pattern::BusyWait | Pattern::HoldBusyWait => loop {
            lab.guard.drive(&cx, Level::Low, timeout, Hold::Release).await;
            cx.delay_for(lab.timing.off_delay).await;
        },
        Pattern::HoldDelay => loop {
            let hold = Hold::Delay(lab.timing.off_delay);
            if !lab.guard.drive(&cx, Level::Low, timeout, hold).await {
                cx.delay_for(lab.timing.off_delay).await;
            }
        },
        Pattern::Alternation => {
            cx.delay_for(lab.timing.phase_offset).await;
            let mut next = cx.now();
            loop {
                lab.guard.drive(&cx, Level::Low, timeout, Hold::Release).await;
                cx.delay_until(&mut next, lab.timing.period).await;
            }
        }
    }
}

/// Periodic status: guard and priority mode once, then the pin level, the
/// trace summary since the last report, and the tick.
pub(crate) async fn status(cx: TaskContext, lab: Lab) {
    info!(
        task = cx.name(),
        "Status: lock={}, SAME_PRIORITY={}",
        lab.guard.label(),
        u8::from(lab.priority_mode.is_same())
    );
    let mut cursor = TraceCursor::default();
    loop {
        let level = cx.get_level().await;
        let summary = cx.trace().summary_since(&mut cursor);
        info!(
            task = cx.name(),
            lost = summary.lost,
            "[TRACE] DELAY={} DELAY_UNTIL={} BLOCK={}",
            summary.delay,
            summary.delay_until,
            summary.blocked
        );
        info!(task = cx.name(), tick = cx.now().0, "Status: LED is {level}");
        cx.delay_for(lab.timing.status_period).await;
    }
}

/// CPU hog that never touches the LED: after `offset`, spins `busy` ticks
/// once per `period`.
pub(crate) async fn load(cx: TaskContext, timing: LoadTiming) {
    cx.delay_for(timing.offset).await;
    let mut next = cx.now();
    loop {
        info!(task = cx.name(), busy_ticks = timing.busy, "load burst");
        cx.spin(timing.busy).await;
        cx.delay_until(&mut next, timing.period).await;
    }
}

/// Sole writer of the pin in the queue design.
pub(crate) async fn led_driver(cx: TaskContext, queue: QueueId) {
    loop {
        let Some(cmd) = cx.receive(queue, Timeout::Forever).await else {
            continue;
        };
        match cx.set_level(cmd.level()).await {
            Ok(()) => info!(task = cx.name(), %cmd, "LED {}", cmd.level()),
            Err(e) => warn!(task = cx.name(), "{e}"),
        }
    }
}
