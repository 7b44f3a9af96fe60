use std::fmt;

use crate::model::{HardwareModel, Pin};

/// Signals sampled in a cycle where the core asserted its commit output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitEvent {
    pub inst: u32,
    pub is_mmio: bool,
    /// First retiring instruction is compressed.
    pub is_rvc: bool,
    /// Second retiring instruction (multi-commit only) is compressed.
    pub is_rvc2: bool,
    pub intr_no: u64,
    pub privilege_mode: u8,
    pub is_multi_commit: bool,
}

impl CommitEvent {
    pub fn sample<M: HardwareModel + ?Sized>(model: &M) -> Self {
        Self {
            inst: model.read_pin(Pin::ThisInst) as u32,
            is_mmio: model.read_pin(Pin::IsMmio) != 0,
            is_rvc: model.read_pin(Pin::IsRvc) != 0,
            is_rvc2: model.read_pin(Pin::IsRvc2) != 0,
            intr_no: model.read_pin(Pin::IntrNo),
            privilege_mode: model.read_pin(Pin::PrivilegeMode) as u8,
            is_multi_commit: model.read_pin(Pin::IsMultiCommit) != 0,
        }
    }

    /// Bytes the PC advances by when this commit retires without a branch.
    pub fn fallthrough_len(&self) -> u64 {
        let first = if self.is_rvc { 2 } else { 4 };
        let second = match (self.is_multi_commit, self.is_rvc2) {
            (false, _) => 0,
            (true, true) => 2,
            (true, false) => 4,
        };
        first + second
    }

    /// CSR-class instruction (SYSTEM opcode).
    pub fn is_csr(&self) -> bool {
        self.inst & 0x7f == 0x73
    }

    /// CSR instruction addressing `mip`, which is driven by the CLINT and
    /// cannot be reproduced by the reference.
    pub fn reads_mip(&self) -> bool {
        self.is_csr() && self.inst >> 20 == 0x344
    }
}

impl fmt::Display for CommitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inst=0x{:08x} mmio={} rvc={} rvc2={} intr={} priv={} multi={}",
            self.inst,
            self.is_mmio as u8,
            self.is_rvc as u8,
            self.is_rvc2 as u8,
            self.intr_no,
            self.privilege_mode,
            self.is_multi_commit as u8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallthrough_lengths() {
        let mut event = CommitEvent::default();
        assert_eq!(event.fallthrough_len(), 4);
        event.is_rvc = true;
        assert_eq!(event.fallthrough_len(), 2);
        event.is_multi_commit = true;
        assert_eq!(event.fallthrough_len(), 6);
        event.is_rvc2 = true;
        assert_eq!(event.fallthrough_len(), 4);
    }

    #[test]
    fn detects_mip_access() {
        // csrr a0, mip
        let event = CommitEvent {
            inst: 0x3440_2573,
            ..Default::default()
        };
        assert!(event.is_csr());
        assert!(event.reads_mip());

        // csrr a0, mstatus
        let event = CommitEvent {
            inst: 0x3000_2573,
            ..Default::default()
        };
        assert!(!event.reads_mip());
    }
}
