//! The per-cycle co-simulation loop.

use crate::checker::DifferentialChecker;
use crate::clock::ClockDriver;
use crate::config::{ExecutionMode, HarnessConfig};
use crate::error::{HarnessError, Result};
use crate::model::{HardwareModel, Pin};
use crate::monitor::CommitMonitor;
use crate::platform::{EventPump, Platform};
use crate::snapshot;
use crate::stuck::StuckDetector;
use crate::trace::Trace;

/// Bookkeeping of the current run. Never carried over between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulationState {
    pub cycles: u64,
    pub max_cycles: u64,
    /// Execution reached the start address.
    pub has_committed: bool,
    pub last_commit_cycle: u64,
    pub aborted: bool,
}

/// How a run ended without a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The core or a device signalled completion.
    Finished { cycles: u64 },
    BudgetExhausted { cycles: u64 },
}

impl RunOutcome {
    pub fn cycles(&self) -> u64 {
        match *self {
            Self::Finished { cycles } | Self::BudgetExhausted { cycles } => cycles,
        }
    }
}

pub struct Harness<M: HardwareModel, C, P> {
    clock: ClockDriver<M>,
    monitor: CommitMonitor,
    stuck: StuckDetector,
    pump: EventPump,
    checker: C,
    platform: P,
    state: SimulationState,
    mode: ExecutionMode,
    budget: u64,
}

impl<M, C, P> Harness<M, C, P>
where
    M: HardwareModel,
    C: DifferentialChecker,
    P: Platform,
{
    /// Applies the log window and holds the core in reset for
    /// `config.reset_cycles` pulses. Memory and devices must already be set up.
    pub fn new(mut model: M, checker: C, platform: P, config: &HarnessConfig) -> Self {
        model.set_log_window(&config.log);
        let mut clock = ClockDriver::new(model);
        clock.reset_for(config.reset_cycles);

        Self {
            clock,
            monitor: CommitMonitor::new(config.start_address, config.layout),
            stuck: StuckDetector::new(config.stuck_threshold),
            pump: EventPump::new(config.poll_interval),
            checker,
            platform,
            state: SimulationState::default(),
            mode: config.mode,
            budget: config.cycle_budget(),
        }
    }

    pub fn with_trace(mut self, trace: Trace<M>) -> Self {
        self.clock = self.clock.with_trace(trace);
        self
    }

    /// Runs the configured mode for the configured budget.
    pub fn execute(&mut self) -> Result<RunOutcome> {
        match self.mode {
            ExecutionMode::Differential => self.execute_cycles(self.budget),
            ExecutionMode::Stress => {
                tracing::warn!("random stress run: commits are not checked");
                self.stress(self.budget)
            }
        }
    }

    /// Steps up to `n` cycles with commit tracking, stuck detection and
    /// device polling, stopping early on completion.
    pub fn execute_cycles(&mut self, n: u64) -> Result<RunOutcome> {
        if self.state.aborted {
            return Err(HarnessError::Aborted);
        }
        self.state.max_cycles = n;
        self.stuck.record_commit(self.clock.cycles());

        let mut remaining = n;
        while remaining > 0 && !self.finished() {
            if let Err(err) = self.clock.step() {
                return Err(self.abort(err));
            }
            remaining -= 1;
            let cycle = self.clock.cycles();
            self.state.cycles = cycle;

            match self.monitor.observe(self.clock.model(), &mut self.checker) {
                Ok(seen) => {
                    if seen.started {
                        // Boot time before the start address never counts.
                        self.state.has_committed = true;
                        self.stuck.record_commit(cycle);
                    }
                    if seen.committed {
                        self.stuck.record_commit(cycle);
                        self.state.last_commit_cycle = cycle;
                    }
                }
                Err(divergence) => {
                    let err = HarnessError::Mismatch {
                        cycle,
                        pc: divergence.pc,
                        event: divergence.event,
                        report: Box::new(divergence.report),
                    };
                    return Err(self.abort(err));
                }
            }

            if let Err(stall) = self.stuck.check(cycle, self.monitor.is_running()) {
                let model = self.clock.model();
                let err = HarnessError::Stuck {
                    cycle,
                    last_commit: stall.last_commit,
                    threshold: stall.threshold,
                    pc: snapshot::read_pc(model),
                    inst: model.read_pin(Pin::ThisInst) as u32,
                };
                return Err(self.abort(err));
            }

            self.pump.tick(&mut self.platform);
        }

        let cycles = self.clock.cycles();
        Ok(if self.finished() {
            RunOutcome::Finished { cycles }
        } else {
            RunOutcome::BudgetExhausted { cycles }
        })
    }

    /// Clocks the core `n` times with no observation at all.
    pub fn stress(&mut self, n: u64) -> Result<RunOutcome> {
        if self.state.aborted {
            return Err(HarnessError::Aborted);
        }
        self.state.max_cycles = n;
        for _ in 0..n {
            if let Err(err) = self.clock.step() {
                return Err(self.abort(err));
            }
        }
        self.state.cycles = self.clock.cycles();
        Ok(RunOutcome::BudgetExhausted {
            cycles: self.state.cycles,
        })
    }

    fn finished(&self) -> bool {
        self.platform.is_finish() || self.clock.model().read_pin(Pin::Finish) != 0
    }

    /// Fixed cleanup for errors raised mid-run: close the trace, then abort.
    fn abort(&mut self, err: HarnessError) -> HarnessError {
        if let Err(close_err) = self.clock.close_trace() {
            tracing::warn!(%close_err, "failed to close trace while aborting");
        }
        self.state.aborted = true;
        tracing::error!(cycle = self.state.cycles, "{err}");
        self.platform.set_abort();
        err
    }

    /// Closes the trace after a normal run.
    pub fn close_trace(&mut self) -> Result<()> {
        self.clock.close_trace()
    }

    pub fn cycles(&self) -> u64 {
        self.clock.cycles()
    }

    pub fn max_cycles(&self) -> u64 {
        self.budget
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn model(&self) -> &M {
        self.clock.model()
    }

    pub fn model_mut(&mut self) -> &mut M {
        self.clock.model_mut()
    }

    pub fn checker(&self) -> &C {
        &self.checker
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn is_tracing(&self) -> bool {
        self.clock.is_tracing()
    }
}
