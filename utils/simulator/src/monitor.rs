use crate::checker::{DifferentialChecker, Verdict};
use crate::commit::CommitEvent;
use crate::model::{HardwareModel, Pin};
use crate::reference::MismatchReport;
use crate::regs::RegisterLayout;
use crate::snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Boot code has not reached the start address yet.
    AwaitingStart,
    Running,
}

/// What the monitor saw in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    /// The start address was seen and the checker initialised this cycle.
    pub started: bool,
    /// A commit was observed (and checked, if checking is enabled).
    pub committed: bool,
}

/// A commit the checker rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub pc: u64,
    pub event: CommitEvent,
    pub report: MismatchReport,
}

/// Turns per-cycle difftest port values into checker calls.
#[derive(Debug, Clone)]
pub struct CommitMonitor {
    state: MonitorState,
    start_address: u64,
    layout: RegisterLayout,
}

impl CommitMonitor {
    pub fn new(start_address: u64, layout: RegisterLayout) -> Self {
        Self {
            state: MonitorState::AwaitingStart,
            start_address,
            layout,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MonitorState::Running
    }

    // 32-bit start addresses are matched on the low word so that
    // sign-extended PCs of 64-bit cores hit as well.
    fn is_start(&self, pc: u64) -> bool {
        if self.start_address <= u32::MAX as u64 {
            pc as u32 == self.start_address as u32
        } else {
            pc == self.start_address
        }
    }

    /// Samples the model after a clock step.
    ///
    /// Start detection runs before the commit check, so the cycle that first
    /// shows the start address may also deliver its commit.
    pub fn observe<M, C>(&mut self, model: &M, checker: &mut C) -> Result<Observation, Divergence>
    where
        M: HardwareModel + ?Sized,
        C: DifferentialChecker + ?Sized,
    {
        let mut observation = Observation::default();

        if self.state == MonitorState::AwaitingStart && self.is_start(snapshot::read_pc(model)) {
            self.state = MonitorState::Running;
            let regs = snapshot::read_registers(model, self.layout);
            tracing::info!(
                pc = format_args!("0x{:x}", regs.pc()),
                "first instruction reached, starting difftest"
            );
            checker.init(regs);
            observation.started = true;
        }

        if self.state == MonitorState::Running && model.read_pin(Pin::Commit) != 0 {
            observation.committed = true;
            if model.read_pin(Pin::DifftestEnable) != 0 {
                let regs = snapshot::read_registers(model, self.layout);
                let pc = regs.pc();
                let event = CommitEvent::sample(model);
                tracing::trace!(pc = format_args!("0x{pc:x}"), %event, "commit");
                if let Verdict::Fail(report) = checker.step(regs, event) {
                    return Err(Divergence { pc, event, report });
                }
            }
        }

        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::regs::RegisterVector;

    #[derive(Default)]
    struct Pins(HashMap<Pin, u64>);

    impl HardwareModel for Pins {
        fn set_clock(&mut self, _high: bool) {}
        fn set_reset(&mut self, _asserted: bool) {}
        fn eval(&mut self) {}
        fn read_pin(&self, pin: Pin) -> u64 {
            self.0.get(&pin).copied().unwrap_or(0)
        }
    }

    #[derive(Default)]
    struct Calls {
        log: Vec<&'static str>,
        fail: bool,
    }

    impl DifferentialChecker for Calls {
        fn init(&mut self, _regs: RegisterVector) {
            self.log.push("init");
        }
        fn step(&mut self, regs: RegisterVector, _event: CommitEvent) -> Verdict {
            self.log.push("step");
            if self.fail {
                Verdict::Fail(MismatchReport::new(regs.pc()))
            } else {
                Verdict::Pass
            }
        }
    }

    fn pins(pc: u64, commit: bool) -> Pins {
        let mut pins = Pins::default();
        pins.0.insert(Pin::ThisPc, pc);
        pins.0.insert(Pin::Commit, commit as u64);
        pins.0.insert(Pin::DifftestEnable, 1);
        pins
    }

    #[test]
    fn ignores_commits_before_start() {
        let mut monitor = CommitMonitor::new(0x8000_0000, RegisterLayout::GprOnly);
        let mut checker = Calls::default();
        let seen = monitor.observe(&pins(0x1000, true), &mut checker).unwrap();
        assert_eq!(seen, Observation::default());
        assert!(checker.log.is_empty());
        assert_eq!(monitor.state(), MonitorState::AwaitingStart);
    }

    #[test]
    fn start_and_commit_in_same_cycle() {
        let mut monitor = CommitMonitor::new(0x8000_0000, RegisterLayout::GprOnly);
        let mut checker = Calls::default();
        let seen = monitor.observe(&pins(0x8000_0000, true), &mut checker).unwrap();
        assert!(seen.started && seen.committed);
        assert_eq!(checker.log, vec!["init", "step"]);
    }

    #[test]
    fn init_happens_once() {
        let mut monitor = CommitMonitor::new(0x8000_0000, RegisterLayout::GprOnly);
        let mut checker = Calls::default();
        monitor.observe(&pins(0x8000_0000, false), &mut checker).unwrap();
        monitor.observe(&pins(0x8000_0000, true), &mut checker).unwrap();
        monitor.observe(&pins(0x8000_0004, true), &mut checker).unwrap();
        assert_eq!(checker.log, vec!["init", "step", "step"]);
    }

    #[test]
    fn sign_extended_start_matches() {
        let mut monitor = CommitMonitor::new(0x8000_0000, RegisterLayout::GprOnly);
        let mut checker = Calls::default();
        let seen = monitor
            .observe(&pins(0xffff_ffff_8000_0000, false), &mut checker)
            .unwrap();
        assert!(seen.started);
    }

    #[test]
    fn disabled_port_skips_check_but_counts_commit() {
        let mut monitor = CommitMonitor::new(0x8000_0000, RegisterLayout::GprOnly);
        let mut checker = Calls { fail: true, ..Default::default() };
        let mut model = pins(0x8000_0000, true);
        model.0.insert(Pin::DifftestEnable, 0);
        let seen = monitor.observe(&model, &mut checker).unwrap();
        assert!(seen.committed);
        assert_eq!(checker.log, vec!["init"]);
    }

    #[test]
    fn failed_step_is_reported() {
        let mut monitor = CommitMonitor::new(0x8000_0000, RegisterLayout::GprOnly);
        let mut checker = Calls { fail: true, ..Default::default() };
        let mut model = pins(0x8000_0000, true);
        model.0.insert(Pin::ThisInst, 0x0000_0013);
        let divergence = monitor.observe(&model, &mut checker).unwrap_err();
        assert_eq!(divergence.pc, 0x8000_0000);
        assert_eq!(divergence.event.inst, 0x13);
    }
}
