/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! End-of-run summary of one experiment.

use tracing::info;

use super::{LabApp, LedGuard};
use crate::actuator::{Level, LevelChange};
use crate::guard::QueueStats;
use crate::kernel::Kernel;
use crate::task::{Priority, TaskState};
use crate::tick::Tick;
use crate::trace::TraceEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: String,
    pub base_priority: Priority,
    /// Nominal activation period and first-release offset, in ticks.
    pub period_ticks: u32,
    pub phase_ticks: u32,
    pub cpu_ticks: u64,
    pub state: TaskState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabReport {
    pub guard: &'static str,
    pub now: Tick,
    pub final_level: Level,
    /// Every transition of the run.
    pub transition_count: u64,
    /// The most recent transitions, oldest first.
    pub transitions: Vec<LevelChange>,
    pub writes: u64,
    pub violations: u64,
    pub idle_ticks: u64,
    pub trace_recorded: usize,
    pub queue: Option<QueueStats>,
    pub tasks: Vec<TaskReport>,
    /// Most recent trace events, oldest first.
    pub recent_trace: Vec<TraceEvent>,
}

impl LabReport {
    pub fn collect(kernel: &Kernel, app: &LabApp) -> Self {
        let actuator = kernel.actuator();
        let queue = match app.guard {
            LedGuard::Queue(id) => kernel.queue(id).map(|q| q.stats()),
            LedGuard::Lock { .. } => None,
        };
        let tasks = kernel
            .tasks()
            .iter()
            .map(|(id, desc)| TaskReport {
                name: desc.name.clone(),
                base_priority: desc.base_priority,
                period_ticks: desc.period_ticks,
                phase_ticks: desc.phase_ticks,
                cpu_ticks: kernel.cpu_ticks(id),
                state: kernel.state(id),
            })
            .collect();

        Self {
            guard: app.guard.label(),
            now: kernel.now(),
            final_level: actuator.level(),
            transition_count: actuator.transitions(),
            transitions: actuator.history().iter().copied().collect(),
            writes: actuator.writes(),
            violations: actuator.violations(),
            idle_ticks: kernel.idle_ticks(),
            trace_recorded: kernel.trace().recorded(),
            queue,
            tasks,
            recent_trace: kernel.trace().snapshot(),
        }
    }

    pub fn log(&self, kernel: &Kernel) {
        let shown = self.transitions.len() as u64;
        if self.transition_count > shown {
            info!(
                total = self.transition_count,
                shown,
                "older LED transitions dropped"
            );
        }
        for change in &self.transitions {
            info!(
                tick = change.tick.0,
                level = %change.level,
                writer = kernel.tasks().name(change.writer),
                "LED transition"
            );
        }
        for event in &self.recent_trace {
            info!(
                seq = event.seq,
                tick = event.tick.0,
                task = %event.task,
                "[TRACE] {}",
                event.reason
            );
        }
        info!(
            guard = self.guard,
            tick = self.now.0,
            led = %self.final_level,
            transitions = self.transition_count,
            writes = self.writes,
            violations = self.violations,
            idle_ticks = self.idle_ticks,
            trace_events = self.trace_recorded,
            "run finished"
        );
        if let Some(q) = self.queue {
            info!(
                sent = q.sent,
                received = q.received,
                overwritten = q.overwritten,
                "command queue"
            );
        }
        for task in &self.tasks {
            info!(
                task = %task.name,
                priority = task.base_priority,
                period_ticks = task.period_ticks,
                phase_ticks = task.phase_ticks,
                cpu_ticks = task.cpu_ticks,
                state = ?task.state,
                "task summary"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::DEFAULT_HISTORY_CAPACITY;
    use crate::app::build;
    use crate::config::LabConfig;

    #[test]
    fn report_reflects_the_run() {
        let (mut kernel, app) = build(&LabConfig::default()).unwrap();
        kernel.run_for(1000);

        let report = LabReport::collect(&kernel, &app);
        assert_eq!(report.guard, "mutex(PI)");
        assert_eq!(report.now, Tick(1000));
        let ticks: Vec<u32> = report.transitions.iter().map(|c| c.tick.0).collect();
        assert_eq!(ticks, vec![0, 500, 501]);
        assert_eq!(report.transition_count, 3);
        assert_eq!(report.final_level, Level::High);
        assert_eq!(report.violations, 0);
        assert!(report.queue.is_none());
        assert_eq!(report.tasks.len(), 3);
        assert_eq!(report.tasks[0].name, "tLED_ON");
        assert_eq!(report.tasks[0].state, TaskState::Running);
        assert!(report.tasks[0].cpu_ticks >= 990);
        assert_eq!(report.tasks[1].cpu_ticks, 0);
        let timing: Vec<(u32, u32)> = report
            .tasks
            .iter()
            .map(|t| (t.period_ticks, t.phase_ticks))
            .collect();
        assert_eq!(timing, vec![(501, 0), (1000, 0), (1000, 0)]);
        assert!(report
            .recent_trace
            .windows(2)
            .all(|w| w[0].seq < w[1].seq));
        report.log(&kernel);
    }

    #[test]
    fn long_run_keeps_the_latest_transitions_and_the_total() {
        let (mut kernel, app) = build(&LabConfig::default()).unwrap();
        kernel.run_for(200_000);

        let report = LabReport::collect(&kernel, &app);
        assert_eq!(report.transitions.len(), DEFAULT_HISTORY_CAPACITY);
        assert!(report.transition_count > DEFAULT_HISTORY_CAPACITY as u64);
        assert!(report
            .transitions
            .windows(2)
            .all(|w| w[0].tick.ticks_since(Tick(0)) < w[1].tick.ticks_since(Tick(0))));
        assert_eq!(
            report.transitions.last().map(|c| c.level),
            Some(report.final_level)
        );
        report.log(&kernel);
    }
}
