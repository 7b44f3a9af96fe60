//! Differential checking against a reference ISA simulator.

mod nemu;

use std::collections::VecDeque;
use std::fmt;

pub use nemu::NemuLibrary;

use crate::checker::{DifferentialChecker, Verdict};
use crate::commit::CommitEvent;
use crate::regs::{self, RegisterVector};

const RETIRE_TRACE_SIZE: usize = 16;

/// The reference executor, in the shape of the NEMU difftest interface.
pub trait ReferenceModel {
    fn init(&mut self);

    /// Copies `bytes` from the core's memory image to reference address `addr`.
    fn memcpy_from_dut(&mut self, addr: u64, bytes: &[u8]);

    /// Reads reference state. The PC slot holds the *next* PC to execute.
    fn get_regs(&mut self, regs: &mut RegisterVector);

    fn set_regs(&mut self, regs: &RegisterVector);

    fn exec(&mut self, n: u64);

    fn raise_intr(&mut self, no: u64);

    /// Prints reference state for a mismatch report.
    fn display(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetireRecord {
    pub pc: u64,
    pub inst: u32,
    pub multi_commit: bool,
    pub skipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegDiff {
    pub name: &'static str,
    pub expected: u64,
    pub actual: u64,
}

/// Everything needed to tell which instruction diverged and how.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MismatchReport {
    pub pc: u64,
    pub privilege_mode: u8,
    pub diffs: Vec<RegDiff>,
    /// Oldest first; the last entry is the diverging commit.
    pub retire_trace: Vec<RetireRecord>,
}

impl MismatchReport {
    pub fn new(pc: u64) -> Self {
        Self {
            pc,
            ..Default::default()
        }
    }
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==============Retire Trace==============")?;
        let last = self.retire_trace.len().saturating_sub(1);
        for (i, record) in self.retire_trace.iter().enumerate() {
            writeln!(
                f,
                "retire trace [{i:x}]: pc {:010x} inst {:08x} {} {} {}",
                record.pc,
                record.inst,
                if record.multi_commit { "MC" } else { "  " },
                if record.skipped { "SKIP" } else { "    " },
                if i == last { "<--" } else { "" }
            )?;
        }
        writeln!(f, "==============  Reg Diff  ==============")?;
        writeln!(f, "priviledgeMode = {}", self.privilege_mode)?;
        for diff in &self.diffs {
            writeln!(
                f,
                "{} different at pc = 0x{:010x}, right= 0x{:016x}, wrong = 0x{:016x}",
                diff.name, self.pc, diff.expected, diff.actual
            )?;
        }
        Ok(())
    }
}

/// [`DifferentialChecker`] that steps a [`ReferenceModel`] alongside the core.
pub struct RefChecker<R> {
    reference: R,
    image: Vec<u8>,
    image_base: u64,
    /// PC of the instruction the reference executes next, as seen from the core.
    ref_this_pc: u64,
    resync_pc: bool,
    retired: VecDeque<RetireRecord>,
}

impl<R: ReferenceModel> RefChecker<R> {
    /// `image` is copied into the reference at `image_base` during `init`.
    pub fn new(reference: R, image: Vec<u8>, image_base: u64) -> Self {
        Self {
            reference,
            image,
            image_base,
            ref_this_pc: image_base,
            resync_pc: false,
            retired: VecDeque::with_capacity(RETIRE_TRACE_SIZE),
        }
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    fn retire(&mut self, record: RetireRecord) {
        if self.retired.len() == RETIRE_TRACE_SIZE {
            self.retired.pop_front();
        }
        self.retired.push_back(record);
    }

    fn sync_reference_pc(&mut self, this_pc: u64, layout: regs::RegisterLayout) {
        let mut ref_regs = RegisterVector::new(layout);
        self.reference.get_regs(&mut ref_regs);
        self.ref_this_pc = this_pc;
        ref_regs.set_pc(this_pc);
        self.reference.set_regs(&ref_regs);
    }
}

impl<R: ReferenceModel> DifferentialChecker for RefChecker<R> {
    fn init(&mut self, regs: RegisterVector) {
        self.reference.init();
        self.reference.memcpy_from_dut(self.image_base, &self.image);
        self.ref_this_pc = regs.pc();
        self.reference.set_regs(&regs);
        tracing::info!(
            pc = format_args!("0x{:x}", regs.pc()),
            image_bytes = self.image.len(),
            "difftest initialised"
        );
    }

    fn step(&mut self, mut regs: RegisterVector, event: CommitEvent) -> Verdict {
        let layout = regs.layout();
        let this_pc = regs.pc();

        if std::mem::take(&mut self.resync_pc) {
            self.sync_reference_pc(this_pc, layout);
        }

        // MMIO results cannot be reproduced by the reference: adopt the
        // core's state and resume from the fall-through PC.
        if event.is_mmio {
            let skip = event.fallthrough_len();
            regs.set_pc(this_pc.wrapping_add(skip));
            self.ref_this_pc = self.ref_this_pc.wrapping_add(skip);
            self.reference.set_regs(&regs);
            self.retire(RetireRecord {
                pc: this_pc,
                inst: event.inst,
                multi_commit: event.is_multi_commit,
                skipped: true,
            });
            self.resync_pc = true;
            return Verdict::Pass;
        }

        if event.intr_no != 0 {
            self.reference.raise_intr(event.intr_no);
        } else {
            self.reference.exec(1);
        }
        if event.is_multi_commit {
            self.reference.exec(1);
        }

        let mut ref_regs = RegisterVector::new(layout);
        self.reference.get_regs(&mut ref_regs);
        let next_pc = ref_regs.pc();
        self.retire(RetireRecord {
            pc: this_pc,
            inst: event.inst,
            multi_commit: event.is_multi_commit,
            skipped: false,
        });

        // mip.mtip is driven by the CLINT, which the reference does not
        // model; take the core's view.
        if event.reads_mip() {
            regs.set_pc(next_pc);
            self.ref_this_pc = next_pc;
            self.reference.set_regs(&regs);
            return Verdict::Pass;
        }

        ref_regs.set_pc(self.ref_this_pc);
        self.ref_this_pc = next_pc;
        ref_regs.set(0, 0);

        if ref_regs == regs {
            return Verdict::Pass;
        }

        self.reference.display();
        let diffs = regs
            .diff(&ref_regs)
            .map(|idx| RegDiff {
                name: regs::reg_name(idx).unwrap_or("?"),
                expected: ref_regs[idx],
                actual: regs[idx],
            })
            .collect();
        Verdict::Fail(MismatchReport {
            pc: this_pc,
            privilege_mode: event.privilege_mode,
            diffs,
            retire_trace: self.retired.iter().copied().collect(),
        })
    }
}
