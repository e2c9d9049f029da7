//! Lab configuration loading.
//!
//! Guard design, priority mode and the scheduler flags all come from one
//! YAML file.  Every key is optional; anything missing keeps its default.
//!
//! The expected YAML structure is:
//! ```yaml
//! kernel:
//!   tick_rate_hz: 1000
//!   preemption: true
//!   time_slicing: false
//!   max_priorities: 15
//!   minimal_stack: 768
//!   initial_tick: 0
//! trace:
//!   capacity: 64
//! scenario:
//!   design: mutex            # mutex | semaphore | queue
//!   pattern: busy_wait       # busy_wait | alternation | hold_busy_wait | hold_delay
//!   priority_mode: distinct  # distinct | same
//!   led_pin: 2
//!   duration_ms: 10000
//!   timing:
//!     busy_wait_ms: 500
//!     off_delay_ms: 1000
//!     status_period_ms: 1000
//!     alternation_period_ms: 2000
//!     phase_offset_ms: 1000
//!     lock_timeout_ms: ~     # ~ = wait forever
//!   load:                    # optional CPU hog, absent = no tLOAD task
//!     priority: 2            # default: LED-OFF's priority
//!     offset_ms: 600
//!     busy_ms: 800
//!     period_ms: 5000
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::actuator::DEFAULT_LED_PIN;
use crate::guard::GuardDesign;
use crate::kernel::KernelConfig;
use crate::task::Priority;
use crate::tick::Tick;
use crate::trace::DEFAULT_TRACE_CAPACITY;

/// Stack budget given to every lab task.
pub const DEFAULT_STACK_BUDGET: usize = 1024;

/// Highest base priority the lab task set uses (the LED driver).
const HIGHEST_LAB_PRIORITY: Priority = 3;

/// Fastest supported tick rate (1 µs per tick).
pub const MAX_TICK_RATE_HZ: u32 = 1_000_000;

// ── Private YAML deserialization types ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    kernel: Option<KernelEntry>,
    trace: Option<TraceEntry>,
    scenario: Option<ScenarioEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KernelEntry {
    tick_rate_hz: Option<u32>,
    preemption: Option<bool>,
    time_slicing: Option<bool>,
    max_priorities: Option<Priority>,
    minimal_stack: Option<usize>,
    max_tasks: Option<usize>,
    max_primitives: Option<usize>,
    initial_tick: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TraceEntry {
    capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScenarioEntry {
    design: Option<GuardDesign>,
    pattern: Option<Pattern>,
    priority_mode: Option<PriorityMode>,
    led_pin: Option<u32>,
    stack_budget: Option<usize>,
    duration_ms: Option<u32>,
    timing: Option<TimingEntry>,
    load: Option<LoadEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimingEntry {
    busy_wait_ms: Option<u32>,
    off_delay_ms: Option<u32>,
    status_period_ms: Option<u32>,
    alternation_period_ms: Option<u32>,
    phase_offset_ms: Option<u32>,
    lock_timeout_ms: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoadEntry {
    priority: Option<Priority>,
    offset_ms: Option<u32>,
    busy_ms: Option<u32>,
    period_ms: Option<u32>,
}

// ── Scenario switches ─────────────────────────────────────────────────────────

/// How the LED tasks spend their cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Busy-wait without the lock, then a short delay.
    #[default]
    BusyWait,
    /// ON and OFF both periodic with the same period, phase-shifted.
    Alternation,
    /// LED-ON keeps the guard for the whole busy-wait.
    HoldBusyWait,
    /// LED-OFF keeps the guard across its delay.
    HoldDelay,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::BusyWait => f.write_str("busy_wait"),
            Pattern::Alternation => f.write_str("alternation"),
            Pattern::HoldBusyWait => f.write_str("hold_busy_wait"),
            Pattern::HoldDelay => f.write_str("hold_delay"),
        }
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "busy_wait" | "busy-wait" => Ok(Pattern::BusyWait),
            "alternation" => Ok(Pattern::Alternation),
            "hold_busy_wait" | "hold-busy-wait" => Ok(Pattern::HoldBusyWait),
            "hold_delay" | "hold-delay" => Ok(Pattern::HoldDelay),
            other => Err(format!(
                "unknown pattern '{other}' \
                 (valid: busy_wait, alternation, hold_busy_wait, hold_delay)"
            )),
        }
    }
}

/// Priority assignment of the lab tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityMode {
    /// LED-ON 3, LED-OFF 2, Status 1.
    #[default]
    Distinct,
    /// Every lab task at 2.
    Same,
}

impl PriorityMode {
    pub fn is_same(self) -> bool {
        self == PriorityMode::Same
    }
}

// ── Public data structures ────────────────────────────────────────────────────

/// Task timing in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Busy-wait length of LED-ON in the busy-wait patterns.
    pub busy_wait_ms: u32,
    /// Delay of LED-OFF after (or, holding the guard, during) each command.
    pub off_delay_ms: u32,
    pub status_period_ms: u32,
    pub alternation_period_ms: u32,
    /// Offset of LED-OFF's first release.  `None` means half the period.
    pub phase_offset_ms: Option<u32>,
    /// Bound on a lock wait.  `None` waits forever.
    pub lock_timeout_ms: Option<u32>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            busy_wait_ms: 500,
            off_delay_ms: 1000,
            status_period_ms: 1000,
            alternation_period_ms: 2000,
            phase_offset_ms: None,
            lock_timeout_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn effective_phase_offset_ms(&self) -> u32 {
        self.phase_offset_ms
            .unwrap_or(self.alternation_period_ms / 2)
    }
}

/// Optional CPU-bound task that spins `busy_ms` once per `period_ms`,
/// starting `offset_ms` after its first run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    /// `None` runs it at LED-OFF's priority.
    pub priority: Option<Priority>,
    pub offset_ms: u32,
    pub busy_ms: u32,
    pub period_ms: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            priority: None,
            offset_ms: 0,
            busy_ms: 500,
            period_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub design: GuardDesign,
    pub pattern: Pattern,
    pub priority_mode: PriorityMode,
    pub led_pin: u32,
    pub stack_budget: usize,
    /// Run length; `0` runs until interrupted.
    pub duration_ms: u32,
    pub timing: TimingConfig,
    pub load: Option<LoadConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            design: GuardDesign::Mutex,
            pattern: Pattern::default(),
            priority_mode: PriorityMode::default(),
            led_pin: DEFAULT_LED_PIN,
            stack_budget: DEFAULT_STACK_BUDGET,
            duration_ms: 10_000,
            timing: TimingConfig::default(),
            load: None,
        }
    }
}

/// Everything needed to build and run one experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabConfig {
    pub kernel: KernelConfig,
    pub trace_capacity: usize,
    pub scenario: ScenarioConfig,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            kernel: KernelConfig::default(),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
            scenario: ScenarioConfig::default(),
        }
    }
}

impl LabConfig {
    /// Reject combinations the kernel or the task set cannot run with.
    ///
    /// # Errors
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<()> {
        if self.kernel.tick_rate_hz == 0 {
            bail!("kernel.tick_rate_hz must be positive");
        }
        if self.kernel.tick_rate_hz > MAX_TICK_RATE_HZ {
            bail!(
                "kernel.tick_rate_hz must not exceed {MAX_TICK_RATE_HZ} (got {})",
                self.kernel.tick_rate_hz
            );
        }
        if self.kernel.max_priorities <= HIGHEST_LAB_PRIORITY {
            bail!(
                "kernel.max_priorities must exceed {HIGHEST_LAB_PRIORITY} (got {})",
                self.kernel.max_priorities
            );
        }
        let timing = &self.scenario.timing;
        if self.scenario.pattern == Pattern::Alternation && timing.alternation_period_ms == 0 {
            bail!("scenario.timing.alternation_period_ms must be positive");
        }
        if timing.status_period_ms == 0 {
            bail!("scenario.timing.status_period_ms must be positive");
        }
        if self.scenario.load.as_ref().is_some_and(|l| l.period_ms == 0) {
            bail!("scenario.load.period_ms must be positive");
        }
        Ok(())
    }
}

// ── ConfigManager ─────────────────────────────────────────────────────────────

/// Loads the lab configuration from a YAML file.
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: LabConfig,

    /// Set to `true` after a successful [`load_from_file`](Self::load_from_file).
    loaded: bool,
}

impl ConfigManager {
    /// Defaults only; nothing loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `path` over the defaults.  Calling it again starts over from the
    /// defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, the YAML is malformed or
    /// the resulting configuration fails [`LabConfig::validate`].
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading lab configuration from: {}", path.display());

        self.config = LabConfig::default();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let mut config = LabConfig::default();
        if let Some(kernel) = file.kernel {
            apply_kernel(&mut config.kernel, kernel);
        }
        if let Some(capacity) = file.trace.and_then(|t| t.capacity) {
            config.trace_capacity = capacity;
        }
        match file.scenario {
            Some(scenario) => apply_scenario(&mut config.scenario, scenario),
            None => warn!("No scenario section in configuration file, using default scenario"),
        }

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        self.config = config;
        self.loaded = true;

        let c = &self.config;
        info!(
            design = %c.scenario.design,
            pattern = %c.scenario.pattern,
            same_priority = c.scenario.priority_mode.is_same(),
            tick_rate_hz = c.kernel.tick_rate_hz,
            time_slicing = c.kernel.time_slicing,
            "Successfully loaded lab configuration"
        );
        debug!("  Timing: {:?}", c.scenario.timing);
        Ok(())
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// For command-line overrides applied after loading.
    pub fn config_mut(&mut self) -> &mut LabConfig {
        &mut self.config
    }

    pub fn into_config(self) -> LabConfig {
        self.config
    }

    /// Returns `true` after a successful call to [`load_from_file`](Self::load_from_file).
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

fn apply_kernel(target: &mut KernelConfig, entry: KernelEntry) {
    if let Some(v) = entry.tick_rate_hz {
        target.tick_rate_hz = v;
    }
    if let Some(v) = entry.preemption {
        target.preemption = v;
    }
    if let Some(v) = entry.time_slicing {
        target.time_slicing = v;
    }
    if let Some(v) = entry.max_priorities {
        target.max_priorities = v;
    }
    if let Some(v) = entry.minimal_stack {
        target.minimal_stack = v;
    }
    if let Some(v) = entry.max_tasks {
        target.max_tasks = v;
    }
    if let Some(v) = entry.max_primitives {
        target.max_primitives = v;
    }
    if let Some(v) = entry.initial_tick {
        target.initial_tick = Tick(v);
    }
}

fn apply_scenario(target: &mut ScenarioConfig, entry: ScenarioEntry) {
    if let Some(v) = entry.design {
        target.design = v;
    }
    if let Some(v) = entry.pattern {
        target.pattern = v;
    }
    if let Some(v) = entry.priority_mode {
        target.priority_mode = v;
    }
    if let Some(v) = entry.led_pin {
        target.led_pin = v;
    }
    if let Some(v) = entry.stack_budget {
        target.stack_budget = v;
    }
    if let Some(v) = entry.duration_ms {
        target.duration_ms = v;
    }
    if let Some(t) = entry.timing {
        let timing = &mut target.timing;
        if let Some(v) = t.busy_wait_ms {
            timing.busy_wait_ms = v;
        }
        if let Some(v) = t.off_delay_ms {
            timing.off_delay_ms = v;
        }
        if let Some(v) = t.status_period_ms {
            timing.status_period_ms = v;
        }
        if let Some(v) = t.alternation_period_ms {
            timing.alternation_period_ms = v;
        }
        if t.phase_offset_ms.is_some() {
            timing.phase_offset_ms = t.phase_offset_ms;
        }
        if t.lock_timeout_ms.is_some() {
            timing.lock_timeout_ms = t.lock_timeout_ms;
        }
    }
    if let Some(l) = entry.load {
        let defaults = LoadConfig::default();
        target.load = Some(LoadConfig {
            priority: l.priority,
            offset_ms: l.offset_ms.unwrap_or(defaults.offset_ms),
            busy_ms: l.busy_ms.unwrap_or(defaults.busy_ms),
            period_ms: l.period_ms.unwrap_or(defaults.period_ms),
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn defaults_match_the_lab_board() {
        let cfg = LabConfig::default();
        assert_eq!(cfg.kernel.tick_rate_hz, 1000);
        assert!(cfg.kernel.preemption);
        assert!(!cfg.kernel.time_slicing);
        assert_eq!(cfg.kernel.max_priorities, 15);
        assert_eq!(cfg.kernel.minimal_stack, 768);
        assert_eq!(cfg.trace_capacity, 64);
        assert_eq!(cfg.scenario.design, GuardDesign::Mutex);
        assert_eq!(cfg.scenario.pattern, Pattern::BusyWait);
        assert_eq!(cfg.scenario.priority_mode, PriorityMode::Distinct);
        assert_eq!(cfg.scenario.led_pin, 2);
        assert_eq!(cfg.scenario.stack_budget, 1024);
        assert_eq!(cfg.scenario.timing.busy_wait_ms, 500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn phase_offset_defaults_to_half_the_period() {
        let mut timing = TimingConfig::default();
        assert_eq!(timing.effective_phase_offset_ms(), 1000);
        timing.phase_offset_ms = Some(250);
        assert_eq!(timing.effective_phase_offset_ms(), 250);
    }

    // ── ConfigManager: load_from_file ─────────────────────────────────────────

    #[test]
    fn load_full_yaml() {
        let yaml = r#"
kernel:
  tick_rate_hz: 100
  preemption: true
  time_slicing: true
  initial_tick: 4294967000
trace:
  capacity: 16
scenario:
  design: semaphore
  pattern: alternation
  priority_mode: same
  led_pin: 5
  duration_ms: 4000
  timing:
    alternation_period_ms: 400
    phase_offset_ms: 100
    lock_timeout_ms: 50
"#;
        let f = yaml_tempfile(yaml);
        let mut mgr = ConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();

        assert!(mgr.is_loaded());
        let cfg = mgr.config();
        assert_eq!(cfg.kernel.tick_rate_hz, 100);
        assert!(cfg.kernel.time_slicing);
        assert_eq!(cfg.kernel.initial_tick, Tick(4_294_967_000));
        assert_eq!(cfg.trace_capacity, 16);
        assert_eq!(cfg.scenario.design, GuardDesign::Semaphore);
        assert_eq!(cfg.scenario.pattern, Pattern::Alternation);
        assert!(cfg.scenario.priority_mode.is_same());
        assert_eq!(cfg.scenario.led_pin, 5);
        assert_eq!(cfg.scenario.duration_ms, 4000);
        assert_eq!(cfg.scenario.timing.alternation_period_ms, 400);
        assert_eq!(cfg.scenario.timing.effective_phase_offset_ms(), 100);
        assert_eq!(cfg.scenario.timing.lock_timeout_ms, Some(50));
        // untouched keys keep their defaults
        assert_eq!(cfg.scenario.timing.busy_wait_ms, 500);
        assert_eq!(cfg.kernel.max_priorities, 15);
    }

    #[test]
    fn missing_scenario_section_uses_defaults() {
        let f = yaml_tempfile("kernel:\n  time_slicing: true\n");
        let mut mgr = ConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();

        assert!(mgr.is_loaded());
        assert!(mgr.config().kernel.time_slicing);
        assert_eq!(mgr.config().scenario, ScenarioConfig::default());
    }

    #[test]
    fn queue_design_parses() {
        let f = yaml_tempfile("scenario:\n  design: queue\n");
        let mut mgr = ConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();
        assert_eq!(mgr.config().scenario.design, GuardDesign::Queue);
    }

    #[test]
    fn shipped_lab_config_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/lab2.yaml");
        let mut mgr = ConfigManager::new();
        mgr.load_from_file(&path).unwrap();
        assert!(mgr.is_loaded());
        assert_eq!(mgr.config(), &LabConfig::default());
    }

    #[test]
    fn missing_file_returns_error() {
        let mut mgr = ConfigManager::new();
        let result = mgr.load_from_file(Path::new("/nonexistent/path/lab2.yaml"));
        assert!(result.is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        let mut mgr = ConfigManager::new();
        assert!(mgr.load_from_file(f.path()).is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn unknown_design_is_rejected() {
        let f = yaml_tempfile("scenario:\n  design: spinlock\n");
        let mut mgr = ConfigManager::new();
        assert!(mgr.load_from_file(f.path()).is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let f = yaml_tempfile("kernel:\n  tick_rate_hz: 0\n");
        let mut mgr = ConfigManager::new();
        let err = mgr.load_from_file(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("tick_rate_hz"));
        assert!(!mgr.is_loaded());

        let f = yaml_tempfile("kernel:\n  max_priorities: 3\n");
        assert!(mgr.load_from_file(f.path()).is_err());
    }

    #[test]
    fn tick_rate_is_bounded_for_realtime_pacing() {
        let mut cfg = LabConfig::default();
        cfg.kernel.tick_rate_hz = MAX_TICK_RATE_HZ;
        assert!(cfg.validate().is_ok());

        cfg.kernel.tick_rate_hz = 2_000_000;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tick_rate_hz"));
    }

    #[test]
    fn load_section_fills_missing_fields_from_defaults() {
        let f = yaml_tempfile(
            "scenario:\n  pattern: hold_delay\n  load:\n    offset_ms: 600\n    busy_ms: 800\n",
        );
        let mut mgr = ConfigManager::new();
        mgr.load_from_file(f.path()).unwrap();
        let scenario = &mgr.config().scenario;
        assert_eq!(scenario.pattern, Pattern::HoldDelay);
        assert_eq!(
            scenario.load,
            Some(LoadConfig {
                priority: None,
                offset_ms: 600,
                busy_ms: 800,
                period_ms: 2000,
            })
        );

        let f = yaml_tempfile("scenario:\n  load:\n    period_ms: 0\n");
        let err = mgr.load_from_file(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("load.period_ms"));
    }

    // ── ConfigManager: reload ─────────────────────────────────────────────────

    #[test]
    fn reload_starts_from_defaults() {
        let f1 = yaml_tempfile("scenario:\n  led_pin: 7\n");
        let f2 = yaml_tempfile("scenario:\n  design: queue\n");

        let mut mgr = ConfigManager::new();
        mgr.load_from_file(f1.path()).unwrap();
        assert_eq!(mgr.config().scenario.led_pin, 7);

        mgr.load_from_file(f2.path()).unwrap();
        assert_eq!(mgr.config().scenario.led_pin, 2, "old value must be gone");
        assert_eq!(mgr.config().scenario.design, GuardDesign::Queue);
    }

    // ── CLI names ─────────────────────────────────────────────────────────────

    #[test]
    fn pattern_parses_cli_names() {
        assert_eq!("busy_wait".parse::<Pattern>(), Ok(Pattern::BusyWait));
        assert_eq!("alternation".parse::<Pattern>(), Ok(Pattern::Alternation));
        assert_eq!("hold-delay".parse::<Pattern>(), Ok(Pattern::HoldDelay));
        assert_eq!(
            "hold_busy_wait".parse::<Pattern>(),
            Ok(Pattern::HoldBusyWait)
        );
        assert!("random".parse::<Pattern>().is_err());
        assert_eq!(Pattern::Alternation.to_string(), "alternation");
    }
}
