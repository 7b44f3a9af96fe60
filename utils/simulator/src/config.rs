use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::regs::RegisterLayout;

pub const DEFAULT_START_ADDRESS: u64 = 0x8000_0000;
pub const DEFAULT_RESET_CYCLES: u64 = 10;
pub const DEFAULT_STUCK_THRESHOLD: u64 = 2000;
pub const DEFAULT_POLL_INTERVAL: u64 = 100;

/// How the cycle loop treats commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Detect commits and check each one against the reference.
    #[default]
    Differential,
    /// Clock the core with no commit tracking, for randomised subsystem
    /// stress runs.
    Stress,
}

/// Verbosity threshold forwarded to the core's log-control inputs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    #[default]
    All = 0,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

/// Cycle window in which the core's own debug logging is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogWindow {
    pub begin: u64,
    pub end: u64,
    pub level: LogLevel,
}

impl Default for LogWindow {
    fn default() -> Self {
        Self {
            begin: 0,
            end: u64::MAX,
            level: LogLevel::All,
        }
    }
}

/// Memory state the program image is written into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RamConfig {
    pub state: String,
    pub base: u64,
}

impl Default for RamConfig {
    fn default() -> Self {
        Self {
            state: "ram".to_owned(),
            base: DEFAULT_START_ADDRESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub layout: RegisterLayout,
    pub mode: ExecutionMode,
    /// PC of the first architecturally visible instruction; seeing it on the
    /// difftest port starts checking.
    pub start_address: u64,
    pub reset_cycles: u64,
    /// Cycle budget, unbounded when absent.
    pub max_cycles: Option<u64>,
    pub stuck_threshold: u64,
    pub poll_interval: u64,
    pub trace: Option<Utf8PathBuf>,
    pub seed: u64,
    pub log: LogWindow,
    pub ram: RamConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            layout: RegisterLayout::default(),
            mode: ExecutionMode::default(),
            start_address: DEFAULT_START_ADDRESS,
            reset_cycles: DEFAULT_RESET_CYCLES,
            max_cycles: None,
            stuck_threshold: DEFAULT_STUCK_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            trace: None,
            seed: 0,
            log: LogWindow::default(),
            ram: RamConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{path}: {e}")))?;
        Self::from_yaml(&text).map_err(|e| match e {
            HarnessError::Config(msg) => HarnessError::Config(format!("{path}: {msg}")),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.stuck_threshold == 0 {
            return Err(HarnessError::Config("stuck_threshold must be non-zero".into()));
        }
        if self.log.begin > self.log.end {
            return Err(HarnessError::Config(format!(
                "log window begins ({}) after it ends ({})",
                self.log.begin, self.log.end
            )));
        }
        Ok(())
    }

    /// The cycle budget `execute` runs with.
    pub fn cycle_budget(&self) -> u64 {
        self.max_cycles.unwrap_or(u64::MAX)
    }
}
