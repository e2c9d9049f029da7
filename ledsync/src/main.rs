/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use ledsync::app::{self, LabReport};
use ledsync::config::{ConfigManager, Pattern, PriorityMode};
use ledsync::guard::GuardDesign;
use ledsync::kernel::Kernel;
use ledsync::tick::ms_to_ticks;

/// Ticks simulated between Ctrl-C checks when not paced.
const BATCH_TICKS: u32 = 1_000;

// ── CLI argument definition ───────────────────────────────────────────────────

/// Guarded LED experiments on a simulated single-core preemptive RTOS.
///
/// Example:
///   ledsync --config configs/lab2.yaml --design semaphore --same-priority
#[derive(Debug, Parser)]
#[command(
    name = "ledsync",
    about = "LED guard experiments: mutex (PI), binary semaphore, overwrite queue",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML lab configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Guard design: mutex, semaphore or queue.
    #[arg(short = 'g', long = "design")]
    design: Option<GuardDesign>,

    /// Task pattern: busy_wait, alternation, hold_busy_wait or hold_delay.
    #[arg(short = 'p', long = "pattern")]
    pattern: Option<Pattern>,

    /// Run every lab task at the same priority.
    #[arg(long = "same-priority", default_value_t = false)]
    same_priority: bool,

    /// Rotate equal-priority tasks at every tick.
    #[arg(long = "time-slicing", default_value_t = false)]
    time_slicing: bool,

    /// Run length in milliseconds of simulated time; 0 runs until Ctrl-C.
    #[arg(short = 'd', long = "duration-ms")]
    duration_ms: Option<u32>,

    /// Give up on the LED lock after this many milliseconds.
    #[arg(long = "lock-timeout-ms")]
    lock_timeout_ms: Option<u32>,

    /// Pace ticks to wall-clock time instead of simulating as fast as possible.
    #[arg(short = 'r', long = "realtime", default_value_t = false)]
    realtime: bool,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("ledsync starting up...");

    let cli = Cli::parse();
    info!(
        config = ?cli.config,
        design = ?cli.design,
        pattern = ?cli.pattern,
        same_priority = cli.same_priority,
        time_slicing = cli.time_slicing,
        realtime = cli.realtime,
        "Command line"
    );

    // ── Load lab configuration ────────────────────────────────────────────────
    let mut config_manager = ConfigManager::new();
    match &cli.config {
        Some(path) => {
            if let Err(e) = config_manager.load_from_file(path) {
                error!("Failed to load lab configuration: {:#}", e);
                process::exit(1);
            }
        }
        None => warn!("No configuration file provided, using default lab settings"),
    }

    let config = config_manager.config_mut();
    if let Some(design) = cli.design {
        config.scenario.design = design;
    }
    if let Some(pattern) = cli.pattern {
        config.scenario.pattern = pattern;
    }
    if cli.same_priority {
        config.scenario.priority_mode = PriorityMode::Same;
    }
    if cli.time_slicing {
        config.kernel.time_slicing = true;
    }
    if let Some(ms) = cli.duration_ms {
        config.scenario.duration_ms = ms;
    }
    if cli.lock_timeout_ms.is_some() {
        config.scenario.timing.lock_timeout_ms = cli.lock_timeout_ms;
    }
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {:#}", e);
        process::exit(1);
    }
    let config = config_manager.into_config();

    // ── Build and run ─────────────────────────────────────────────────────────
    let (mut kernel, lab) = match app::build(&config) {
        Ok(started) => started,
        Err(e) => {
            error!("Start-up failed: {}", e);
            process::exit(1);
        }
    };

    let ticks = match config.scenario.duration_ms {
        0 => None,
        ms => Some(ms_to_ticks(ms, config.kernel.tick_rate_hz)),
    };
    run(&mut kernel, ticks, cli.realtime).await;

    LabReport::collect(&kernel, &lab).log(&kernel);
}

/// Run `ticks` ticks (`None`: until Ctrl-C).
async fn run(kernel: &mut Kernel, ticks: Option<u32>, realtime: bool) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut remaining = ticks;

    if realtime {
        let hz = u64::from(kernel.config().tick_rate_hz.max(1));
        let period = Duration::from_nanos(1_000_000_000 / hz).max(Duration::from_nanos(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        while remaining != Some(0) {
            tokio::select! {
                _ = &mut ctrl_c => {
                    warn!(tick = kernel.now().0, "interrupted");
                    return;
                }
                _ = interval.tick() => {
                    kernel.step();
                    remaining = remaining.map(|r| r - 1);
                }
            }
        }
        return;
    }

    loop {
        let batch = remaining.map_or(BATCH_TICKS, |r| r.min(BATCH_TICKS));
        if batch == 0 {
            return;
        }
        kernel.run_for(batch);
        remaining = remaining.map(|r| r - batch);

        tokio::select! {
            biased;
            _ = &mut ctrl_c => {
                warn!(tick = kernel.now().0, "interrupted");
                return;
            }
            _ = tokio::task::yield_now() => {}
        }
    }
}
