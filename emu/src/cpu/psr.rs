//! Program status registers (CPSR and SPSR).
//!
//! ```text
//! 31 30 29 28 27      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::condition::Condition;
use crate::cpu::cpu_modes::Mode;

/// Whether the CPU is currently fetching 32-bit ARM or 16-bit Thumb
/// opcodes, mirrored by the T bit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CpuState {
    Arm,
    Thumb,
}

/// A program status register: condition flags in the top nibble, interrupt
/// disables, the Thumb state bit and the operating mode at the bottom.
/// Used for both the live CPSR and every banked SPSR.
#[derive(Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    pub(crate) fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            NV => false,
        }
    }

    /// N, bit 31.
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z, bit 30.
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C, bit 29.
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V, bit 28.
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// I, bit 7 (1 = IRQs disabled).
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F, bit 6 (1 = FIQs disabled).
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T, bit 5 (0 = ARM, 1 = Thumb).
    #[must_use]
    pub fn state_bit(self) -> bool {
        self.0.get_bit(5)
    }

    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        if self.state_bit() {
            CpuState::Thumb
        } else {
            CpuState::Arm
        }
    }

    /// Mode, bits 0-4. Panics on malformed mode bits: the CPU never writes
    /// them, and guest software writing garbage here has already lost.
    #[must_use]
    pub fn mode(self) -> Mode {
        let bits = self.0.get_bits(0..=4);
        bits.try_into()
            .unwrap_or_else(|_| panic!("invalid mode bits {bits:#07b} in PSR"))
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    pub fn set_state_bit(&mut self, value: bool) {
        self.0.set_bit(5, value);
    }

    pub fn set_cpu_state(&mut self, state: CpuState) {
        self.set_state_bit(matches!(state, CpuState::Thumb));
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.set_mode_raw(mode as u32);
    }

    /// Writes the mode field without validation. The BIOS occasionally
    /// stores 0 into a SPSR, which must round-trip untouched.
    pub fn set_mode_raw(&mut self, bits: u32) {
        self.0 = (self.0 & !0b11111) | (bits & 0b11111);
    }

    /// Flag bits only (N, Z, C, V), used by MSR in unprivileged mode.
    pub fn set_flags_raw(&mut self, value: u32) {
        self.0 = (self.0 & 0x0FFF_FFFF) | (value & 0xF000_0000);
    }
}

impl From<Mode> for Psr {
    fn from(mode: Mode) -> Self {
        Self(mode as u32)
    }
}

impl From<Psr> for u32 {
    fn from(psr: Psr) -> Self {
        psr.0
    }
}

impl From<u32> for Psr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Psr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}{}{}{}|{}{}{}|{:05b}]",
            if self.sign_flag() { 'N' } else { '-' },
            if self.zero_flag() { 'Z' } else { '-' },
            if self.carry_flag() { 'C' } else { '-' },
            if self.overflow_flag() { 'V' } else { '-' },
            if self.irq_disable() { 'I' } else { '-' },
            if self.fiq_disable() { 'F' } else { '-' },
            if self.state_bit() { 'T' } else { '-' },
            self.0.get_bits(0..=4),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{CpuState, Psr};
    use crate::cpu::condition::Condition;
    use crate::cpu::cpu_modes::Mode;

    #[test]
    fn flags_round_trip() {
        let mut psr = Psr::default();

        psr.set_zero_flag(true);
        assert!(psr.zero_flag());

        psr.set_carry_flag(true);
        psr.set_carry_flag(false);
        assert!(!psr.carry_flag());
    }

    #[test]
    fn mode_field() {
        let mut psr = Psr::from(Mode::Supervisor);
        assert_eq!(psr.mode(), Mode::Supervisor);

        psr.set_mode(Mode::Irq);
        assert_eq!(psr.mode(), Mode::Irq);
        assert!(!psr.state_bit());
    }

    #[test]
    fn state_switch() {
        let mut psr = Psr::from(Mode::System);
        assert_eq!(psr.cpu_state(), CpuState::Arm);

        psr.set_cpu_state(CpuState::Thumb);
        assert_eq!(psr.cpu_state(), CpuState::Thumb);
    }

    #[test]
    fn conditions() {
        let mut psr = Psr::default();
        psr.set_zero_flag(true);

        assert!(psr.can_execute(Condition::EQ));
        assert!(psr.can_execute(Condition::LS));
        assert!(!psr.can_execute(Condition::NE));
        assert!(psr.can_execute(Condition::AL));
        assert!(!psr.can_execute(Condition::NV));
    }
}
