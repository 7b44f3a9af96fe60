//! Cycle-accurate differential co-simulation of a RISC-V core.
//!
//! A [`Harness`] clocks a [`HardwareModel`], detects instruction commits on
//! its difftest port and checks each one against a reference simulator.

pub mod checker;
pub mod clock;
pub mod commit;
pub mod config;
pub mod dylib;
pub mod error;
pub mod harness;
pub mod image;
pub mod model;
pub mod monitor;
pub mod platform;
pub mod reference;
pub mod regs;
pub mod snapshot;
pub mod stuck;
pub mod trace;

pub use checker::{DifferentialChecker, NoChecker, Verdict};
pub use clock::ClockDriver;
pub use commit::CommitEvent;
pub use config::{ExecutionMode, HarnessConfig, LogLevel, LogWindow};
pub use error::{HarnessError, Result};
pub use harness::{Harness, RunOutcome, SimulationState};
pub use image::Image;
pub use model::{ArcModel, HardwareModel, Pin};
pub use monitor::CommitMonitor;
pub use platform::{EventPump, HostPlatform, Platform};
pub use reference::{MismatchReport, NemuLibrary, RefChecker, ReferenceModel};
pub use regs::{RegisterLayout, RegisterVector};
pub use stuck::StuckDetector;
pub use trace::{Trace, TraceRecorder, VcdRecorder};
