//! The ARM7TDMI core: pipeline bookkeeping, mode switching and the
//! exception model. Instruction semantics live in [`arm::operations`] and
//! [`thumb::operations`](super::thumb::operations).

use crate::cpu::cpu_modes::Mode;
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{Registers, REG_LR};
use crate::cpu::{Access, BusInterface};

/// The seven exception classes, ordered by vector address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    Reset,
    Undefined,
    SoftwareInterrupt,
    PrefetchAbort,
    DataAbort,
    Irq,
    Fiq,
}

impl Exception {
    pub const fn vector(self) -> u32 {
        match self {
            Self::Reset => 0x00,
            Self::Undefined => 0x04,
            Self::SoftwareInterrupt => 0x08,
            Self::PrefetchAbort => 0x0C,
            Self::DataAbort => 0x10,
            Self::Irq => 0x18,
            Self::Fiq => 0x1C,
        }
    }

    pub const fn mode(self) -> Mode {
        match self {
            Self::Reset | Self::SoftwareInterrupt => Mode::Supervisor,
            Self::Undefined => Mode::Undefined,
            Self::PrefetchAbort | Self::DataAbort => Mode::Abort,
            Self::Irq => Mode::Irq,
            Self::Fiq => Mode::Fiq,
        }
    }
}

pub struct Arm7tdmi {
    pub cpsr: Psr,
    /// SPSR of the active mode. User/System have none; the field simply
    /// holds the last banked value there and is never observable.
    pub spsr: Psr,
    pub registers: Registers,
    pub register_bank: RegisterBank,

    /// Executing, decoded and freshly-fetched opcodes. Thumb opcodes sit
    /// zero-extended in the low half.
    pub(crate) pipeline: [u32; 3],
    pub(crate) pipeline_index: usize,
    /// Set by any control-flow change; forces a two-word refetch.
    pub(crate) flush: bool,
    pub(crate) fetch_access: Access,

    /// Synthesize SWI 0x00-0x2A in the core instead of vectoring into a
    /// BIOS image. Enabled by the facade when no BIOS is attached.
    pub bios_swi_hle: bool,
}

impl Default for Arm7tdmi {
    fn default() -> Self {
        let mut cpu = Self {
            cpsr: Psr::from(Mode::Supervisor),
            spsr: Psr::default(),
            registers: Registers::default(),
            register_bank: RegisterBank::default(),
            pipeline: [0; 3],
            pipeline_index: 0,
            flush: true,
            fetch_access: Access::NonSequential,
            bios_swi_hle: false,
        };

        cpu.cpsr.set_cpu_state(CpuState::Arm);
        cpu.cpsr.set_irq_disable(true);
        cpu.cpsr.set_fiq_disable(true);
        cpu
    }
}

impl Arm7tdmi {
    /// Power-on state: supervisor mode, interrupts masked, PC at the reset
    /// vector. The pipeline refills on the first step.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Boot state the BIOS would otherwise set up, used with `skip_bios`:
    /// system mode, stacks placed, PC at the cartridge entry point.
    pub fn reset_skipping_bios(&mut self) {
        self.reset();
        self.swap_mode(Mode::System);
        self.register_bank.r13_svc = 0x0300_7FE0;
        self.register_bank.r13_irq = 0x0300_7FA0;
        self.cpsr.set_irq_disable(false);
        self.cpsr.set_fiq_disable(false);
        self.registers.set_register_at(13, 0x0300_7F00);
        self.registers.set_program_counter(0x0800_0000);
    }

    /// Executes exactly one instruction, paying its bus and internal
    /// cycles into `bus` as they occur.
    pub fn step(&mut self, bus: &mut impl BusInterface) {
        if self.flush {
            self.refill_pipeline(bus);
        }

        let fetch_slot = if self.pipeline_index == 0 {
            2
        } else {
            self.pipeline_index - 1
        };

        match self.cpsr.cpu_state() {
            CpuState::Thumb => {
                let pc = self.registers.program_counter() & !1;
                self.registers.set_program_counter(pc);

                self.pipeline[fetch_slot] = bus.read_half(pc, self.fetch_access).into();
                self.fetch_access = Access::Sequential;

                let opcode = self.pipeline[self.pipeline_index] as u16;
                self.execute_thumb(bus, opcode);
            }
            CpuState::Arm => {
                let pc = self.registers.program_counter() & !3;
                self.registers.set_program_counter(pc);

                self.pipeline[fetch_slot] = bus.read_word(pc, self.fetch_access);
                self.fetch_access = Access::Sequential;

                let opcode = self.pipeline[self.pipeline_index];
                let condition = crate::cpu::condition::Condition::from(((opcode >> 28) & 0xF) as u8);
                if self.cpsr.can_execute(condition) {
                    self.execute_arm(bus, opcode);
                }
            }
        }

        if self.flush {
            self.refill_pipeline(bus);
            return;
        }

        self.pipeline_index = (self.pipeline_index + 1) % 3;
        let step = match self.cpsr.cpu_state() {
            CpuState::Thumb => 2,
            CpuState::Arm => 4,
        };
        self.registers.advance_program_counter(step);
    }

    /// Any write to R15 (and every exception entry) lands here.
    pub(crate) fn flush_pipeline(&mut self) {
        self.flush = true;
    }

    fn refill_pipeline(&mut self, bus: &mut impl BusInterface) {
        match self.cpsr.cpu_state() {
            CpuState::Thumb => {
                let pc = self.registers.program_counter() & !1;
                self.pipeline[0] = bus.read_half(pc, Access::NonSequential).into();
                self.pipeline[1] = bus.read_half(pc + 2, Access::Sequential).into();
                self.registers.set_program_counter(pc + 4);
            }
            CpuState::Arm => {
                let pc = self.registers.program_counter() & !3;
                self.pipeline[0] = bus.read_word(pc, Access::NonSequential);
                self.pipeline[1] = bus.read_word(pc + 4, Access::Sequential);
                self.registers.set_program_counter(pc + 8);
            }
        }

        self.pipeline_index = 0;
        self.flush = false;
        self.fetch_access = Access::Sequential;
    }

    /// Services a pending IRQ between instructions. The caller has already
    /// consulted the interrupt controller's line; this only re-checks the
    /// CPSR mask.
    pub fn service_irq(&mut self) {
        if self.cpsr.irq_disable() {
            return;
        }
        self.exception(Exception::Irq);
    }

    /// Exception entry: bank the CPSR, switch mode, mask interrupts, stash
    /// the class-specific return address in R14 and branch to the vector.
    /// The pipeline refills on the next step.
    pub fn exception(&mut self, kind: Exception) {
        let old_cpsr = self.cpsr;
        let return_address = self.exception_return_address(kind);

        self.swap_mode(kind.mode());
        self.spsr = old_cpsr;
        self.cpsr.set_cpu_state(CpuState::Arm);
        self.cpsr.set_irq_disable(true);
        if matches!(kind, Exception::Reset | Exception::Fiq) {
            self.cpsr.set_fiq_disable(true);
        }

        self.registers.set_register_at(REG_LR, return_address);
        self.registers.set_program_counter(kind.vector());
        self.flush_pipeline();
    }

    /// R14 value on exception entry. R15 reads two instructions ahead, so
    /// each class subtracts a different amount depending on whether the
    /// faulting/interrupted instruction already executed.
    fn exception_return_address(&self, kind: Exception) -> u32 {
        let pc = self.registers.program_counter();
        let thumb = matches!(self.cpsr.cpu_state(), CpuState::Thumb);

        match kind {
            Exception::SoftwareInterrupt | Exception::Undefined => {
                if thumb {
                    pc.wrapping_sub(2)
                } else {
                    pc.wrapping_sub(4)
                }
            }
            Exception::Irq | Exception::Fiq | Exception::PrefetchAbort => {
                if thumb {
                    pc
                } else {
                    pc.wrapping_sub(4)
                }
            }
            Exception::DataAbort => {
                if thumb {
                    pc.wrapping_add(2)
                } else {
                    pc
                }
            }
            Exception::Reset => 0,
        }
    }

    /// Swaps the banked registers of the outgoing mode with the incoming
    /// one and re-points the live SPSR. The `_old` fields always hold the
    /// User/System copies of whatever an exception mode has displaced.
    pub fn swap_mode(&mut self, new_mode: Mode) {
        let old_mode = self.cpsr.mode();
        if old_mode == new_mode {
            return;
        }

        match old_mode {
            // Leaving FIQ also gives R8-R12 back to everyone else.
            Mode::Fiq => {
                self.register_bank.r8_fiq = self.registers.register_at(8);
                self.register_bank.r9_fiq = self.registers.register_at(9);
                self.register_bank.r10_fiq = self.registers.register_at(10);
                self.register_bank.r11_fiq = self.registers.register_at(11);
                self.register_bank.r12_fiq = self.registers.register_at(12);
                self.register_bank.r13_fiq = self.registers.register_at(13);
                self.register_bank.r14_fiq = self.registers.register_at(14);
                self.register_bank.spsr_fiq = self.spsr;

                self.registers.set_register_at(8, self.register_bank.r8_old);
                self.registers.set_register_at(9, self.register_bank.r9_old);
                self.registers
                    .set_register_at(10, self.register_bank.r10_old);
                self.registers
                    .set_register_at(11, self.register_bank.r11_old);
                self.registers
                    .set_register_at(12, self.register_bank.r12_old);
            }
            Mode::User | Mode::System => {
                self.register_bank.r13_old = self.registers.register_at(13);
                self.register_bank.r14_old = self.registers.register_at(14);
            }
            Mode::Supervisor => {
                self.register_bank.r13_svc = self.registers.register_at(13);
                self.register_bank.r14_svc = self.registers.register_at(14);
                self.register_bank.spsr_svc = self.spsr;
            }
            Mode::Abort => {
                self.register_bank.r13_abt = self.registers.register_at(13);
                self.register_bank.r14_abt = self.registers.register_at(14);
                self.register_bank.spsr_abt = self.spsr;
            }
            Mode::Irq => {
                self.register_bank.r13_irq = self.registers.register_at(13);
                self.register_bank.r14_irq = self.registers.register_at(14);
                self.register_bank.spsr_irq = self.spsr;
            }
            Mode::Undefined => {
                self.register_bank.r13_und = self.registers.register_at(13);
                self.register_bank.r14_und = self.registers.register_at(14);
                self.register_bank.spsr_und = self.spsr;
            }
        }

        match new_mode {
            Mode::Fiq => {
                self.register_bank.r8_old = self.registers.register_at(8);
                self.register_bank.r9_old = self.registers.register_at(9);
                self.register_bank.r10_old = self.registers.register_at(10);
                self.register_bank.r11_old = self.registers.register_at(11);
                self.register_bank.r12_old = self.registers.register_at(12);

                self.registers.set_register_at(8, self.register_bank.r8_fiq);
                self.registers.set_register_at(9, self.register_bank.r9_fiq);
                self.registers
                    .set_register_at(10, self.register_bank.r10_fiq);
                self.registers
                    .set_register_at(11, self.register_bank.r11_fiq);
                self.registers
                    .set_register_at(12, self.register_bank.r12_fiq);
                self.registers
                    .set_register_at(13, self.register_bank.r13_fiq);
                self.registers
                    .set_register_at(14, self.register_bank.r14_fiq);
                self.spsr = self.register_bank.spsr_fiq;
            }
            Mode::User | Mode::System => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_old);
                self.registers
                    .set_register_at(14, self.register_bank.r14_old);
            }
            Mode::Supervisor => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_svc);
                self.registers
                    .set_register_at(14, self.register_bank.r14_svc);
                self.spsr = self.register_bank.spsr_svc;
            }
            Mode::Abort => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_abt);
                self.registers
                    .set_register_at(14, self.register_bank.r14_abt);
                self.spsr = self.register_bank.spsr_abt;
            }
            Mode::Irq => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_irq);
                self.registers
                    .set_register_at(14, self.register_bank.r14_irq);
                self.spsr = self.register_bank.spsr_irq;
            }
            Mode::Undefined => {
                self.registers
                    .set_register_at(13, self.register_bank.r13_und);
                self.registers
                    .set_register_at(14, self.register_bank.r14_und);
                self.spsr = self.register_bank.spsr_und;
            }
        }

        self.cpsr.set_mode(new_mode);
    }

    /// Restores CPSR from the active SPSR, re-banking registers when the
    /// mode field changed (the data-processing S-bit-with-R15 path).
    pub(crate) fn restore_cpsr_from_spsr(&mut self) {
        let spsr = self.spsr;
        self.swap_mode(spsr.mode());
        self.cpsr = spsr;
    }

    // Memory helpers: the architecture rotates and sign-extends misaligned
    // accesses instead of faulting.

    pub(crate) fn read_word_rotated(
        &mut self,
        bus: &mut impl BusInterface,
        address: u32,
        access: Access,
    ) -> u32 {
        let value = bus.read_word(address & !3, access);
        value.rotate_right(8 * (address & 3))
    }

    pub(crate) fn read_half_rotated(
        &mut self,
        bus: &mut impl BusInterface,
        address: u32,
        access: Access,
    ) -> u32 {
        let value: u32 = bus.read_half(address & !1, access).into();
        if address & 1 != 0 {
            value.rotate_right(8)
        } else {
            value
        }
    }

    /// Signed halfword loads from odd addresses degrade to a sign-extended
    /// byte load.
    pub(crate) fn read_half_signed(
        &mut self,
        bus: &mut impl BusInterface,
        address: u32,
        access: Access,
    ) -> u32 {
        if address & 1 != 0 {
            bus.read_byte(address, access) as i8 as i32 as u32
        } else {
            bus.read_half(address & !1, access) as i16 as i32 as u32
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use super::{Arm7tdmi, Exception};
    use crate::cpu::cpu_modes::Mode;
    use crate::cpu::psr::CpuState;
    use crate::cpu::{Access, BusInterface};

    /// Flat 64 KiB test bus: every access costs one cycle.
    pub(crate) struct TestBus {
        pub memory: Vec<u8>,
        pub cycles: u64,
    }

    impl TestBus {
        pub fn new() -> Self {
            Self {
                memory: vec![0; 0x10000],
                cycles: 0,
            }
        }

        pub fn with_program(words: &[u32]) -> Self {
            let mut bus = Self::new();
            for (i, word) in words.iter().enumerate() {
                bus.memory[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
            }
            bus
        }
    }

    impl BusInterface for TestBus {
        fn read_byte(&mut self, address: u32, _access: Access) -> u8 {
            self.cycles += 1;
            self.memory[address as usize % self.memory.len()]
        }

        fn read_half(&mut self, address: u32, access: Access) -> u16 {
            let lo = self.read_byte(address, access);
            let hi = self.memory[(address as usize + 1) % self.memory.len()];
            u16::from_le_bytes([lo, hi])
        }

        fn read_word(&mut self, address: u32, access: Access) -> u32 {
            let lo = self.read_half(address, access);
            let hi = self.read_half(address.wrapping_add(2), access);
            u32::from(lo) | (u32::from(hi) << 16)
        }

        fn write_byte(&mut self, address: u32, value: u8, _access: Access) {
            self.cycles += 1;
            let len = self.memory.len();
            self.memory[address as usize % len] = value;
        }

        fn write_half(&mut self, address: u32, value: u16, access: Access) {
            self.write_byte(address, value as u8, access);
            let len = self.memory.len();
            self.memory[(address as usize + 1) % len] = (value >> 8) as u8;
        }

        fn write_word(&mut self, address: u32, value: u32, access: Access) {
            self.write_half(address, value as u16, access);
            self.write_half(address.wrapping_add(2), (value >> 16) as u16, access);
        }

        fn idle(&mut self) {
            self.cycles += 1;
        }
    }

    #[test]
    fn mode_switch_round_trip_restores_live_registers() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.registers.set_register_at(13, 0x1111);
        cpu.registers.set_register_at(14, 0x2222);

        cpu.register_bank.r13_irq = 0xAAAA;
        cpu.register_bank.r14_irq = 0xBBBB;

        cpu.swap_mode(Mode::Irq);
        assert_eq!(cpu.registers.register_at(13), 0xAAAA);
        assert_eq!(cpu.registers.register_at(14), 0xBBBB);

        cpu.swap_mode(Mode::System);
        assert_eq!(cpu.registers.register_at(13), 0x1111);
        assert_eq!(cpu.registers.register_at(14), 0x2222);
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        for reg in 8..=12 {
            cpu.registers.set_register_at(reg, reg * 10);
        }

        cpu.swap_mode(Mode::Fiq);
        for reg in 8..=12 {
            cpu.registers.set_register_at(reg, 0xF000 + reg);
        }

        cpu.swap_mode(Mode::System);
        for reg in 8..=12 {
            assert_eq!(cpu.registers.register_at(reg), reg * 10);
        }

        cpu.swap_mode(Mode::Fiq);
        for reg in 8..=12 {
            assert_eq!(cpu.registers.register_at(reg), 0xF000 + reg);
        }
    }

    #[test]
    fn exception_entry_banks_cpsr_and_flushes() {
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_irq_disable(false);
        cpu.registers.set_program_counter(0x8000_0008);
        cpu.flush = false;

        cpu.exception(Exception::Irq);

        assert_eq!(cpu.cpsr.mode(), Mode::Irq);
        assert!(cpu.cpsr.irq_disable());
        assert_eq!(cpu.cpsr.cpu_state(), CpuState::Arm);
        assert_eq!(cpu.spsr.mode(), Mode::System);
        assert_eq!(cpu.registers.register_at(14), 0x8000_0004);
        assert_eq!(cpu.registers.program_counter(), 0x18);
        assert!(cpu.flush);
    }

    #[test]
    fn misaligned_word_load_rotates() {
        let mut cpu = Arm7tdmi::default();
        let mut bus = TestBus::new();
        bus.memory[0x100..0x104].copy_from_slice(&0xAABBCCDD_u32.to_le_bytes());

        let aligned = cpu.read_word_rotated(&mut bus, 0x100, Access::NonSequential);
        assert_eq!(aligned, 0xAABBCCDD);

        let rotated = cpu.read_word_rotated(&mut bus, 0x101, Access::NonSequential);
        assert_eq!(rotated, 0xDDAABBCC);

        let rotated = cpu.read_word_rotated(&mut bus, 0x103, Access::NonSequential);
        assert_eq!(rotated, 0xBBCCDDAA);
    }

    #[test]
    fn misaligned_signed_half_load_extends_from_byte() {
        let mut cpu = Arm7tdmi::default();
        let mut bus = TestBus::new();
        bus.memory[0x200] = 0x7F;
        bus.memory[0x201] = 0x80;

        let even = cpu.read_half_signed(&mut bus, 0x200, Access::NonSequential);
        assert_eq!(even, 0xFFFF_807F);

        let odd = cpu.read_half_signed(&mut bus, 0x201, Access::NonSequential);
        assert_eq!(odd, 0xFFFF_FF80);
    }
}
