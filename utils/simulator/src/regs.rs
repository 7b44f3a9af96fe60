//! Architectural register vector exchanged with the reference executor.
//!
//! Slot layout follows the difftest convention: `x0..x31`, then the PC of the
//! committing instruction, then (only for [`RegisterLayout::WithCsrs`]) six
//! privileged CSRs.

use std::fmt;
use std::ops::Index;

use serde::{Deserialize, Serialize};

pub const NR_GPR: usize = 32;
pub const THIS_PC: usize = 32;
pub const MSTATUS: usize = 33;
pub const SSTATUS: usize = 34;
pub const MEPC: usize = 35;
pub const SEPC: usize = 36;
pub const MCAUSE: usize = 37;
pub const SCAUSE: usize = 38;

const REG_NAMES: [&str; 39] = [
    "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5",
    "t6", "this_pc", "mstatus", "sstatus", "mepc", "sepc", "mcause", "scause",
];

/// Which slots a build of the core exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RegisterLayout {
    /// General-purpose registers and PC only.
    GprOnly,
    /// Adds the machine/supervisor status, EPC and cause CSRs.
    #[default]
    WithCsrs,
}

impl RegisterLayout {
    pub const fn len(self) -> usize {
        match self {
            Self::GprOnly => THIS_PC + 1,
            Self::WithCsrs => SCAUSE + 1,
        }
    }

    pub const fn has_csrs(self) -> bool {
        matches!(self, Self::WithCsrs)
    }
}

/// ABI name of a register slot, `None` past the widest layout.
pub fn reg_name(idx: usize) -> Option<&'static str> {
    REG_NAMES.get(idx).copied()
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegisterVector {
    layout: RegisterLayout,
    regs: Vec<u64>,
}

impl RegisterVector {
    pub fn new(layout: RegisterLayout) -> Self {
        Self {
            layout,
            regs: vec![0; layout.len()],
        }
    }

    /// Wraps raw slot values. Returns `None` when the length does not match
    /// the layout.
    pub fn from_slots(layout: RegisterLayout, regs: Vec<u64>) -> Option<Self> {
        (regs.len() == layout.len()).then_some(Self { layout, regs })
    }

    pub fn layout(&self) -> RegisterLayout {
        self.layout
    }

    pub fn get(&self, idx: usize) -> Option<u64> {
        self.regs.get(idx).copied()
    }

    /// Writes a slot. Out-of-layout indices are ignored.
    pub fn set(&mut self, idx: usize, value: u64) {
        if let Some(slot) = self.regs.get_mut(idx) {
            *slot = value;
        }
    }

    pub fn pc(&self) -> u64 {
        self.regs[THIS_PC]
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.regs[THIS_PC] = pc;
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.regs
    }

    pub fn as_mut_slice(&mut self) -> &mut [u64] {
        &mut self.regs
    }

    /// Slot indices whose values differ from `other`.
    pub fn diff<'a>(&'a self, other: &'a RegisterVector) -> impl Iterator<Item = usize> + 'a {
        self.regs
            .iter()
            .zip(other.regs.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(idx, _)| idx)
    }
}

impl Index<usize> for RegisterVector {
    type Output = u64;

    fn index(&self, idx: usize) -> &u64 {
        &self.regs[idx]
    }
}

impl fmt::Debug for RegisterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (idx, value) in self.regs.iter().enumerate() {
            map.entry(&REG_NAMES[idx], &format_args!("0x{value:016x}"));
        }
        map.finish()
    }
}
