/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! ledsync – guarded LED experiments on a simulated single-core RTOS
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── tick          – wrapping tick counter, ms ↔ tick conversion
//! ├── task          – task descriptors, base / effective priority
//! ├── guard/        – mutex (PI), binary semaphore, overwrite queue
//! ├── actuator      – the LED pin and its access policy
//! ├── trace         – lock-free ring buffer of block events
//! ├── kernel/       – tick-driven preemptive scheduler + task API
//! ├── config/       – YAML lab configuration
//! └── app/          – LED task set, start-up and final report
//! ```

pub mod actuator;
pub mod app;
pub mod config;
pub mod guard;
pub mod kernel;
pub mod task;
pub mod tick;
pub mod trace;
