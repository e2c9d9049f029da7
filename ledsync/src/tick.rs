/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Monotonic tick counter.
//!
//! The kernel increments the counter once per timer interrupt.  It is a
//! 32-bit value that wraps, so every interval is computed with unsigned
//! wrapping subtraction and never by comparing two absolute ticks.

use std::fmt;

/// Default timer interrupt rate (FreeRTOS `CONFIG_FREERTOS_HZ` on the lab board).
pub const DEFAULT_TICK_RATE_HZ: u32 = 1_000;

/// One reading of the kernel tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

impl Tick {
    /// Ticks elapsed from `earlier` to `self`, correct across one wrap.
    pub fn ticks_since(self, earlier: Tick) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// The tick `ticks` after `self`, wrapping at `u32::MAX`.
    pub fn offset(self, ticks: u32) -> Tick {
        Tick(self.0.wrapping_add(ticks))
    }

    /// `true` once at least `ticks` have elapsed since `start`.
    pub fn has_elapsed(self, start: Tick, ticks: u32) -> bool {
        self.ticks_since(start) >= ticks
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Convert milliseconds to ticks (`pdMS_TO_TICKS`), rounding down.
pub fn ms_to_ticks(ms: u32, tick_rate_hz: u32) -> u32 {
    ((ms as u64 * tick_rate_hz as u64) / 1_000) as u32
}

/// Convert a tick interval to milliseconds (`ticks * portTICK_PERIOD_MS`).
pub fn ticks_to_ms(ticks: u32, tick_rate_hz: u32) -> u64 {
    if tick_rate_hz == 0 {
        return 0;
    }
    ticks as u64 * 1_000 / tick_rate_hz as u64
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_since_plain_interval() {
        assert_eq!(Tick(1_500).ticks_since(Tick(500)), 1_000);
    }

    #[test]
    fn ticks_since_survives_wrap() {
        let before = Tick(u32::MAX - 9);
        let after = before.offset(25);
        assert_eq!(after, Tick(15));
        assert_eq!(after.ticks_since(before), 25);
    }

    #[test]
    fn has_elapsed_is_inclusive() {
        let start = Tick(u32::MAX - 2);
        assert!(!start.offset(4).has_elapsed(start, 5));
        assert!(start.offset(5).has_elapsed(start, 5));
    }

    #[test]
    fn ms_conversion_at_default_rate_is_identity() {
        assert_eq!(ms_to_ticks(500, DEFAULT_TICK_RATE_HZ), 500);
        assert_eq!(ticks_to_ms(1_000, DEFAULT_TICK_RATE_HZ), 1_000);
    }

    #[test]
    fn ms_conversion_at_100_hz() {
        // 10 ms per tick, as on a 100 Hz FreeRTOS port
        assert_eq!(ms_to_ticks(500, 100), 50);
        assert_eq!(ms_to_ticks(5, 100), 0);
        assert_eq!(ticks_to_ms(3, 100), 30);
    }

    #[test]
    fn ticks_to_ms_zero_rate_is_zero() {
        assert_eq!(ticks_to_ms(10, 0), 0);
    }
}
