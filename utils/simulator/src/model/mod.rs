//! Interface to the hardware model under test.

mod arc;

use std::borrow::Cow;

pub use arc::{ArcModel, ModelDescription, StateInfo, StateType};

use crate::config::LogWindow;
use crate::regs::{self, RegisterLayout};

/// An observable or drivable pin of the difftest port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pin {
    Gpr(u8),
    ThisPc,
    Mstatus,
    Sstatus,
    Mepc,
    Sepc,
    Mcause,
    Scause,
    Commit,
    ThisInst,
    IsMmio,
    IsRvc,
    IsRvc2,
    IntrNo,
    PrivilegeMode,
    IsMultiCommit,
    DifftestEnable,
    Finish,
}

impl Pin {
    /// Signal name on the generated top-level.
    pub fn signal_name(self) -> Cow<'static, str> {
        let name = match self {
            Self::Gpr(idx) => return Cow::Owned(format!("io_difftest_r_{idx}")),
            Self::ThisPc => "io_difftest_thisPC",
            Self::Mstatus => "io_difftest_mstatus",
            Self::Sstatus => "io_difftest_sstatus",
            Self::Mepc => "io_difftest_mepc",
            Self::Sepc => "io_difftest_sepc",
            Self::Mcause => "io_difftest_mcause",
            Self::Scause => "io_difftest_scause",
            Self::Commit => "io_difftest_commit",
            Self::ThisInst => "io_difftest_thisINST",
            Self::IsMmio => "io_difftest_isMMIO",
            Self::IsRvc => "io_difftest_isRVC",
            Self::IsRvc2 => "io_difftest_isRVC2",
            Self::IntrNo => "io_difftest_intrNO",
            Self::PrivilegeMode => "io_difftest_priviledgeMode",
            Self::IsMultiCommit => "io_difftest_isMultiCommit",
            Self::DifftestEnable => "io_difftestCtrl_enable",
            Self::Finish => "io_difftest_finish",
        };
        Cow::Borrowed(name)
    }

    /// Pin carrying register-vector slot `idx`.
    pub fn for_slot(idx: usize) -> Option<Self> {
        Some(match idx {
            0..regs::NR_GPR => Self::Gpr(idx as u8),
            regs::THIS_PC => Self::ThisPc,
            regs::MSTATUS => Self::Mstatus,
            regs::SSTATUS => Self::Sstatus,
            regs::MEPC => Self::Mepc,
            regs::SEPC => Self::Sepc,
            regs::MCAUSE => Self::Mcause,
            regs::SCAUSE => Self::Scause,
            _ => return None,
        })
    }

    /// Pins a model must provide for `layout`.
    pub fn required(layout: RegisterLayout) -> Vec<Pin> {
        let mut pins: Vec<Pin> = (0..layout.len()).filter_map(Pin::for_slot).collect();
        pins.push(Pin::Commit);
        pins
    }
}

/// A cycle-evaluated model of the core, e.g. a verilated or arcilator build.
pub trait HardwareModel {
    fn set_clock(&mut self, high: bool);

    fn set_reset(&mut self, asserted: bool);

    /// Settles the model for the current input values.
    fn eval(&mut self);

    fn read_pin(&self, pin: Pin) -> u64;

    /// Drives the model's log-control inputs. Models without them ignore it.
    fn set_log_window(&mut self, _window: &LogWindow) {}
}

impl<M: HardwareModel + ?Sized> HardwareModel for Box<M> {
    fn set_clock(&mut self, high: bool) {
        (**self).set_clock(high)
    }

    fn set_reset(&mut self, asserted: bool) {
        (**self).set_reset(asserted)
    }

    fn eval(&mut self) {
        (**self).eval()
    }

    fn read_pin(&self, pin: Pin) -> u64 {
        (**self).read_pin(pin)
    }

    fn set_log_window(&mut self, window: &LogWindow) {
        (**self).set_log_window(window)
    }
}
