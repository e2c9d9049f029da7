/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Block-event trace recorder.
//!
//! A fixed-capacity ring buffer filled by the kernel whenever a task blocks
//! (the FreeRTOS `traceTASK_DELAY` / `traceBLOCKING_ON_QUEUE_RECEIVE` hooks).
//!
//! # Concurrency
//! [`TraceRecorder::record_event`] takes `&self`, never blocks and never
//! fails.  Each writer claims a unique sequence number with one atomic
//! `fetch_add`; the slot is `seq % capacity`.  Slots are guarded by a
//! per-slot sequence word (seqlock): the writer invalidates it, stores the
//! fields, then publishes `seq + 1` with `Release`.  Readers discard slots
//! whose sequence word changed while they were reading.
//!
//! Once more than `capacity` events were written the oldest ones are
//! silently overwritten.  That data loss is accepted, not an error.
//!
//! Two writers that claimed `seq` and `seq + capacity` share a slot.  If
//! they run at the same time their field stores can interleave; the slot
//! then carries the stamp of whichever finished last with fields from
//! either.  The kernel records from one thread, so this only matters to
//! external writers that lap the whole ring while another is mid-store.

use std::fmt;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::tick::Tick;

/// Ring size used by the lab board.
pub const DEFAULT_TRACE_CAPACITY: usize = 64;

/// Task names are stored truncated to this many bytes (`char task[8]`).
pub const TRACE_NAME_LEN: usize = 8;

// ── TraceReason ───────────────────────────────────────────────────────────────

/// Why a task blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceReason {
    /// Relative delay (`vTaskDelay`).
    Delay,
    /// Absolute-deadline delay (`vTaskDelayUntil`).
    DelayUntil,
    /// Waiting for a lock.
    BlockLock,
    /// Waiting on an empty command queue.
    BlockQueueRecv,
}

impl TraceReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceReason::Delay => "DELAY",
            TraceReason::DelayUntil => "DELAY_UNTIL",
            TraceReason::BlockLock => "BLOCK_LOCK",
            TraceReason::BlockQueueRecv => "BLOCK_Q_RECV",
        }
    }

    fn to_tag(self) -> u8 {
        match self {
            TraceReason::Delay => 1,
            TraceReason::DelayUntil => 2,
            TraceReason::BlockLock => 3,
            TraceReason::BlockQueueRecv => 4,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(TraceReason::Delay),
            2 => Some(TraceReason::DelayUntil),
            3 => Some(TraceReason::BlockLock),
            4 => Some(TraceReason::BlockQueueRecv),
            _ => None,
        }
    }
}

impl fmt::Display for TraceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── TraceEvent ────────────────────────────────────────────────────────────────

/// One decoded trace entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Global sequence number (0 = first event ever recorded).
    pub seq: usize,
    pub tick: Tick,
    /// Task name, truncated to [`TRACE_NAME_LEN`] bytes.
    pub task: String,
    pub reason: TraceReason,
}

fn pack_name(name: &str) -> u64 {
    let mut buf = [0u8; TRACE_NAME_LEN];
    for (dst, src) in buf.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    u64::from_le_bytes(buf)
}

fn unpack_name(packed: u64) -> String {
    let bytes = packed.to_le_bytes();
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(TRACE_NAME_LEN);
    String::from_utf8_lossy(&bytes[..len]).into_owned()
}

// ── Slot ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    /// `seq + 1` of the event stored here, `0` while empty or being written.
    stamp: AtomicUsize,
    tick: AtomicU32,
    task: AtomicU64,
    reason: AtomicU8,
}

// ── TraceSummary / TraceCursor ────────────────────────────────────────────────

/// Per-reason counts over an interval (`dump_trace_summary`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceSummary {
    pub delay: u32,
    pub delay_until: u32,
    /// Lock waits plus queue-receive waits.
    pub blocked: u32,
    /// Events that were overwritten before they could be counted.
    pub lost: usize,
}

/// Read position of one consumer of [`TraceRecorder::summary_since`].
///
/// Each reporter owns its cursor, so several can read the same ring.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceCursor {
    next: usize,
}

// ── TraceRecorder ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TraceRecorder {
    slots: Box<[Slot]>,
    next: AtomicUsize,
}

impl TraceRecorder {
    /// A capacity of `0` is raised to `1`.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::default()).collect();
        Self {
            slots,
            next: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total events ever recorded (including overwritten ones).
    pub fn recorded(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    /// Record one block event.  Callable from any context.
    pub fn record_event(&self, tick: Tick, task: &str, reason: TraceReason) {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        let slot = &self.slots[seq % self.slots.len()];

        slot.stamp.store(0, Ordering::Relaxed);
        fence(Ordering::Release);
        slot.tick.store(tick.0, Ordering::Relaxed);
        slot.task.store(pack_name(task), Ordering::Relaxed);
        slot.reason.store(reason.to_tag(), Ordering::Relaxed);
        slot.stamp.store(seq + 1, Ordering::Release);
    }

    /// Decode event `seq` if its slot still holds it.
    fn read(&self, seq: usize) -> Option<TraceEvent> {
        let slot = &self.slots[seq % self.slots.len()];
        if slot.stamp.load(Ordering::Acquire) != seq + 1 {
            return None;
        }
        let tick = slot.tick.load(Ordering::Relaxed);
        let task = slot.task.load(Ordering::Relaxed);
        let reason = slot.reason.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        if slot.stamp.load(Ordering::Relaxed) != seq + 1 {
            return None;
        }
        Some(TraceEvent {
            seq,
            tick: Tick(tick),
            task: unpack_name(task),
            reason: TraceReason::from_tag(reason)?,
        })
    }

    /// The most recent events still in the buffer, oldest first.
    ///
    /// After `M > capacity` sequential writes this is exactly the last
    /// `capacity` of them.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        let end = self.recorded();
        let start = end.saturating_sub(self.capacity());
        (start..end).filter_map(|seq| self.read(seq)).collect()
    }

    /// Count events recorded since `cursor` and advance it.
    pub fn summary_since(&self, cursor: &mut TraceCursor) -> TraceSummary {
        let end = self.recorded();
        let oldest = end.saturating_sub(self.capacity());
        let start = cursor.next.max(oldest);

        let mut summary = TraceSummary {
            lost: start - cursor.next,
            ..Default::default()
        };
        for event in (start..end).filter_map(|seq| self.read(seq)) {
            match event.reason {
                TraceReason::Delay => summary.delay += 1,
                TraceReason::DelayUntil => summary.delay_until += 1,
                TraceReason::BlockLock | TraceReason::BlockQueueRecv => summary.blocked += 1,
            }
        }
        cursor.next = end;
        summary
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_truncated_to_eight_bytes() {
        assert_eq!(unpack_name(pack_name("tLED_ON")), "tLED_ON");
        assert_eq!(unpack_name(pack_name("tSTATUS_REPORTER")), "tSTATUS_");
        assert_eq!(unpack_name(pack_name("")), "");
    }

    #[test]
    fn events_come_back_in_order() {
        let rec = TraceRecorder::new(8);
        rec.record_event(Tick(1), "tLED_ON", TraceReason::Delay);
        rec.record_event(Tick(2), "tLED_OFF", TraceReason::BlockLock);

        let events = rec.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tick, Tick(1));
        assert_eq!(events[0].task, "tLED_ON");
        assert_eq!(events[0].reason, TraceReason::Delay);
        assert_eq!(events[1].reason, TraceReason::BlockLock);
    }

    #[test]
    fn overflow_keeps_exactly_the_most_recent_capacity_events() {
        let rec = TraceRecorder::new(16);
        for i in 0..100u32 {
            rec.record_event(Tick(i), "t", TraceReason::Delay);
        }

        let events = rec.snapshot();
        assert_eq!(events.len(), 16);
        let ticks: Vec<u32> = events.iter().map(|e| e.tick.0).collect();
        assert_eq!(ticks, (84..100).collect::<Vec<_>>(), "oldest first");
        assert_eq!(rec.recorded(), 100);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let rec = TraceRecorder::new(0);
        assert_eq!(rec.capacity(), 1);
        rec.record_event(Tick(1), "a", TraceReason::Delay);
        rec.record_event(Tick(2), "b", TraceReason::DelayUntil);
        let events = rec.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task, "b");
    }

    #[test]
    fn summary_counts_by_reason_and_advances_cursor() {
        let rec = TraceRecorder::new(64);
        let mut cursor = TraceCursor::default();

        rec.record_event(Tick(0), "a", TraceReason::Delay);
        rec.record_event(Tick(0), "b", TraceReason::DelayUntil);
        rec.record_event(Tick(0), "c", TraceReason::BlockLock);
        rec.record_event(Tick(0), "d", TraceReason::BlockQueueRecv);

        let s = rec.summary_since(&mut cursor);
        assert_eq!(
            s,
            TraceSummary {
                delay: 1,
                delay_until: 1,
                blocked: 2,
                lost: 0
            }
        );

        rec.record_event(Tick(1), "a", TraceReason::Delay);
        let s = rec.summary_since(&mut cursor);
        assert_eq!(s.delay, 1);
        assert_eq!(s.blocked, 0);

        assert_eq!(rec.summary_since(&mut cursor), TraceSummary::default());
    }

    #[test]
    fn summary_reports_events_lost_to_wraparound() {
        let rec = TraceRecorder::new(4);
        let mut cursor = TraceCursor::default();
        for i in 0..10 {
            rec.record_event(Tick(i), "t", TraceReason::Delay);
        }
        let s = rec.summary_since(&mut cursor);
        assert_eq!(s.delay, 4);
        assert_eq!(s.lost, 6);
    }

    #[test]
    fn lost_count_spans_many_laps() {
        let rec = TraceRecorder::new(4);
        let mut cursor = TraceCursor::default();
        for i in 0..5_000 {
            rec.record_event(Tick(i), "t", TraceReason::DelayUntil);
        }
        let s = rec.summary_since(&mut cursor);
        assert_eq!(s.delay_until, 4);
        assert_eq!(s.lost, 4_996);
        assert_eq!(rec.summary_since(&mut cursor).lost, 0);
    }

    #[test]
    fn concurrent_writers_get_unique_slots() {
        const WRITERS: usize = 4;
        const PER_WRITER: u32 = 1_000;
        let rec = TraceRecorder::new(64);

        std::thread::scope(|s| {
            for w in 0..WRITERS {
                let rec = &rec;
                s.spawn(move || {
                    let name = format!("w{w}");
                    for i in 0..PER_WRITER {
                        rec.record_event(Tick(i), &name, TraceReason::Delay);
                    }
                });
            }
        });

        assert_eq!(rec.recorded(), WRITERS * PER_WRITER as usize);
        let events = rec.snapshot();
        // A writer that was descheduled between claim and store may leave an
        // older event in a slot; the reader drops it rather than misreport.
        assert!(!events.is_empty() && events.len() <= 64);

        let seqs: HashSet<usize> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs.len(), events.len(), "no slot was claimed twice");
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(events.iter().all(|e| e.task.starts_with('w')));
    }
}
