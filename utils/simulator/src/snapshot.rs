use crate::model::{HardwareModel, Pin};
use crate::regs::{RegisterLayout, RegisterVector};

/// Reads the architectural state currently presented on the difftest port.
///
/// Only pins are read, so two calls without an intervening clock step
/// produce identical vectors.
pub fn read_registers<M: HardwareModel + ?Sized>(
    model: &M,
    layout: RegisterLayout,
) -> RegisterVector {
    let mut regs = RegisterVector::new(layout);
    for idx in 0..layout.len() {
        if let Some(pin) = Pin::for_slot(idx) {
            regs.set(idx, model.read_pin(pin));
        }
    }
    regs
}

/// Program counter of the instruction currently on the difftest port.
pub fn read_pc<M: HardwareModel + ?Sized>(model: &M) -> u64 {
    model.read_pin(Pin::ThisPc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{MCAUSE, THIS_PC};

    struct PinEcho;

    impl HardwareModel for PinEcho {
        fn set_clock(&mut self, _high: bool) {}
        fn set_reset(&mut self, _asserted: bool) {}
        fn eval(&mut self) {}
        fn read_pin(&self, pin: Pin) -> u64 {
            match pin {
                Pin::Gpr(idx) => idx as u64 * 0x10,
                Pin::ThisPc => 0x8000_0004,
                Pin::Mcause => 0xb,
                _ => 0,
            }
        }
    }

    #[test]
    fn fills_layout_slots() {
        let regs = read_registers(&PinEcho, RegisterLayout::WithCsrs);
        assert_eq!(regs[7], 0x70);
        assert_eq!(regs[THIS_PC], 0x8000_0004);
        assert_eq!(regs[MCAUSE], 0xb);

        let narrow = read_registers(&PinEcho, RegisterLayout::GprOnly);
        assert_eq!(narrow.get(MCAUSE), None);
        assert_eq!(narrow.pc(), 0x8000_0004);
    }

    #[test]
    fn idempotent_without_step() {
        let first = read_registers(&PinEcho, RegisterLayout::WithCsrs);
        let second = read_registers(&PinEcho, RegisterLayout::WithCsrs);
        assert_eq!(first, second);
    }
}
