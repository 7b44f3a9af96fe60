use crate::commit::CommitEvent;
use crate::reference::MismatchReport;
use crate::regs::RegisterVector;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(MismatchReport),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// Verifies each commit of the core against an independent executor.
///
/// Implementations must be deterministic: the same sequence of `init` and
/// `step` inputs yields the same verdicts.
pub trait DifferentialChecker {
    /// Aligns the reference with the core's state at its first instruction.
    /// Called once per run, before any `step`.
    fn init(&mut self, regs: RegisterVector);

    /// Checks one commit, in cycle order.
    fn step(&mut self, regs: RegisterVector, event: CommitEvent) -> Verdict;
}

impl<C: DifferentialChecker + ?Sized> DifferentialChecker for Box<C> {
    fn init(&mut self, regs: RegisterVector) {
        (**self).init(regs)
    }

    fn step(&mut self, regs: RegisterVector, event: CommitEvent) -> Verdict {
        (**self).step(regs, event)
    }
}

/// Checker for stress runs and bring-up: accepts every commit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChecker;

impl DifferentialChecker for NoChecker {
    fn init(&mut self, _regs: RegisterVector) {}

    fn step(&mut self, _regs: RegisterVector, _event: CommitEvent) -> Verdict {
        Verdict::Pass
    }
}
