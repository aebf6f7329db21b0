//! Execution of the Thumb (16-bit) instruction set.

use crate::bitwise::Bits;
use crate::cpu::arm::operations::alu_add;
use crate::cpu::arm7tdmi::{Arm7tdmi, Exception};
use crate::cpu::barrel_shifter::{shift_immediate, shift_register};
use crate::cpu::condition::Condition;
use crate::cpu::flags::{LoadStoreKind, ShiftKind};
use crate::cpu::psr::CpuState;
use crate::cpu::registers::{REG_LR, REG_PC, REG_SP};
use crate::cpu::thumb::{decode, ThumbFormat};
use crate::cpu::{Access, BusInterface};

impl Arm7tdmi {
    pub(crate) fn execute_thumb(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        match decode(opcode) {
            ThumbFormat::MoveShiftedRegister => self.t_move_shifted_register(opcode),
            ThumbFormat::AddSubtract => self.t_add_subtract(opcode),
            ThumbFormat::MoveCompareAddSubtractImm => self.t_move_compare_add_sub_imm(opcode),
            ThumbFormat::AluOperations => self.t_alu_operations(bus, opcode),
            ThumbFormat::HiRegisterOpBx => self.t_hi_register_op_bx(opcode),
            ThumbFormat::PcRelativeLoad => self.t_pc_relative_load(bus, opcode),
            ThumbFormat::LoadStoreRegisterOffset => self.t_load_store_register_offset(bus, opcode),
            ThumbFormat::LoadStoreSignExtended => self.t_load_store_sign_extended(bus, opcode),
            ThumbFormat::LoadStoreImmOffset => self.t_load_store_imm_offset(bus, opcode),
            ThumbFormat::LoadStoreHalfword => self.t_load_store_halfword(bus, opcode),
            ThumbFormat::SpRelativeLoadStore => self.t_sp_relative_load_store(bus, opcode),
            ThumbFormat::LoadAddress => self.t_load_address(opcode),
            ThumbFormat::AddOffsetToSp => self.t_add_offset_to_sp(opcode),
            ThumbFormat::PushPopRegisters => self.t_push_pop_registers(bus, opcode),
            ThumbFormat::MultipleLoadStore => self.t_multiple_load_store(bus, opcode),
            ThumbFormat::ConditionalBranch => self.t_conditional_branch(opcode),
            ThumbFormat::SoftwareInterrupt => {
                self.software_interrupt(bus, u32::from(opcode) & 0xFF);
            }
            ThumbFormat::UnconditionalBranch => self.t_unconditional_branch(opcode),
            ThumbFormat::LongBranchWithLink => self.t_long_branch_with_link(opcode),
            ThumbFormat::Undefined => self.exception(Exception::Undefined),
        }
    }

    fn t_move_shifted_register(&mut self, opcode: u16) {
        let kind = ShiftKind::from(u32::from(opcode.get_bits(11..=12)));
        let offset5 = u32::from(opcode.get_bits(6..=10));
        let rs = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let out = shift_immediate(
            kind,
            offset5,
            self.registers.register_at(rs),
            self.cpsr.carry_flag(),
        );

        self.registers.set_register_at(rd, out.value);
        self.set_nz_thumb(out.value);
        self.cpsr.set_carry_flag(out.carry);
    }

    fn t_add_subtract(&mut self, opcode: u16) {
        let immediate = opcode.get_bit(10);
        let subtract = opcode.get_bit(9);
        let rn_or_imm = u32::from(opcode.get_bits(6..=8));
        let rs = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let op1 = self.registers.register_at(rs);
        let op2 = if immediate {
            rn_or_imm
        } else {
            self.registers.register_at(rn_or_imm)
        };

        let result = if subtract {
            alu_add(op1, !op2, 1)
        } else {
            alu_add(op1, op2, 0)
        };

        self.registers.set_register_at(rd, result.result);
        self.set_nz_thumb(result.result);
        self.cpsr.set_carry_flag(result.carry);
        self.cpsr.set_overflow_flag(result.overflow);
    }

    fn t_move_compare_add_sub_imm(&mut self, opcode: u16) {
        let operation = opcode.get_bits(11..=12);
        let rd = u32::from(opcode.get_bits(8..=10));
        let imm = u32::from(opcode.get_bits(0..=7));
        let current = self.registers.register_at(rd);

        match operation {
            // MOV
            0 => {
                self.registers.set_register_at(rd, imm);
                self.set_nz_thumb(imm);
            }
            // CMP
            1 => {
                let result = alu_add(current, !imm, 1);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // ADD
            2 => {
                let result = alu_add(current, imm, 0);
                self.registers.set_register_at(rd, result.result);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // SUB
            3 => {
                let result = alu_add(current, !imm, 1);
                self.registers.set_register_at(rd, result.result);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            _ => unreachable!(),
        }
    }

    fn t_alu_operations(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let operation = opcode.get_bits(6..=9);
        let rs = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let op1 = self.registers.register_at(rd);
        let op2 = self.registers.register_at(rs);
        let carry_in = self.cpsr.carry_flag();

        match operation {
            // AND
            0x0 => {
                let r = op1 & op2;
                self.registers.set_register_at(rd, r);
                self.set_nz_thumb(r);
            }
            // EOR
            0x1 => {
                let r = op1 ^ op2;
                self.registers.set_register_at(rd, r);
                self.set_nz_thumb(r);
            }
            // LSL / LSR / ASR / ROR by register
            0x2 | 0x3 | 0x4 | 0x7 => {
                bus.idle();
                let kind = match operation {
                    0x2 => ShiftKind::Lsl,
                    0x3 => ShiftKind::Lsr,
                    0x4 => ShiftKind::Asr,
                    _ => ShiftKind::Ror,
                };
                let out = shift_register(kind, op2 & 0xFF, op1, carry_in);
                self.registers.set_register_at(rd, out.value);
                self.set_nz_thumb(out.value);
                self.cpsr.set_carry_flag(out.carry);
            }
            // ADC
            0x5 => {
                let result = alu_add(op1, op2, carry_in.into());
                self.registers.set_register_at(rd, result.result);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // SBC
            0x6 => {
                let result = alu_add(op1, !op2, carry_in.into());
                self.registers.set_register_at(rd, result.result);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // TST
            0x8 => self.set_nz_thumb(op1 & op2),
            // NEG
            0x9 => {
                let result = alu_add(0, !op2, 1);
                self.registers.set_register_at(rd, result.result);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // CMP
            0xA => {
                let result = alu_add(op1, !op2, 1);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // CMN
            0xB => {
                let result = alu_add(op1, op2, 0);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // ORR
            0xC => {
                let r = op1 | op2;
                self.registers.set_register_at(rd, r);
                self.set_nz_thumb(r);
            }
            // MUL
            0xD => {
                bus.idle();
                let r = op1.wrapping_mul(op2);
                self.registers.set_register_at(rd, r);
                self.set_nz_thumb(r);
            }
            // BIC
            0xE => {
                let r = op1 & !op2;
                self.registers.set_register_at(rd, r);
                self.set_nz_thumb(r);
            }
            // MVN
            0xF => {
                let r = !op2;
                self.registers.set_register_at(rd, r);
                self.set_nz_thumb(r);
            }
            _ => unreachable!(),
        }
    }

    fn t_hi_register_op_bx(&mut self, opcode: u16) {
        let operation = opcode.get_bits(8..=9);
        let h1 = u32::from(opcode.get_bit(7));
        let h2 = u32::from(opcode.get_bit(6));
        let rs = u32::from(opcode.get_bits(3..=5)) | (h2 << 3);
        let rd = u32::from(opcode.get_bits(0..=2)) | (h1 << 3);

        let op2 = self.registers.register_at(rs);

        match operation {
            // ADD (no flags)
            0 => {
                let result = self.registers.register_at(rd).wrapping_add(op2);
                self.registers.set_register_at(rd, result);
                if rd == REG_PC {
                    self.flush_pipeline();
                }
            }
            // CMP
            1 => {
                let result = alu_add(self.registers.register_at(rd), !op2, 1);
                self.set_arithmetic_flags(result.result, result.carry, result.overflow);
            }
            // MOV
            2 => {
                self.registers.set_register_at(rd, op2);
                if rd == REG_PC {
                    self.flush_pipeline();
                }
            }
            // BX
            3 => {
                if op2.get_bit(0) {
                    self.registers.set_program_counter(op2 & !1);
                } else {
                    self.cpsr.set_cpu_state(CpuState::Arm);
                    self.registers.set_program_counter(op2 & !3);
                }
                self.flush_pipeline();
            }
            _ => unreachable!(),
        }
    }

    fn t_pc_relative_load(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let rd = u32::from(opcode.get_bits(8..=10));
        let word8 = u32::from(opcode.get_bits(0..=7)) << 2;

        // Bit 1 of the pipeline-advanced PC reads as zero here.
        let address = (self.registers.program_counter() & !2).wrapping_add(word8);
        let value = self.read_word_rotated(bus, address, Access::NonSequential);
        bus.idle();

        self.registers.set_register_at(rd, value);
        self.fetch_access = Access::NonSequential;
    }

    fn t_load_store_register_offset(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let load = LoadStoreKind::from(opcode.get_bit(11));
        let byte = opcode.get_bit(10);
        let ro = u32::from(opcode.get_bits(6..=8));
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self
            .registers
            .register_at(rb)
            .wrapping_add(self.registers.register_at(ro));

        self.transfer_byte_or_word(bus, load, byte, rd, address);
    }

    fn t_load_store_sign_extended(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let h = opcode.get_bit(11);
        let sign_extend = opcode.get_bit(10);
        let ro = u32::from(opcode.get_bits(6..=8));
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self
            .registers
            .register_at(rb)
            .wrapping_add(self.registers.register_at(ro));

        match (sign_extend, h) {
            // STRH
            (false, false) => {
                let value = self.registers.register_at(rd) as u16;
                bus.write_half(address & !1, value, Access::NonSequential);
            }
            // LDRH
            (false, true) => {
                let value = self.read_half_rotated(bus, address, Access::NonSequential);
                bus.idle();
                self.registers.set_register_at(rd, value);
            }
            // LDRSB
            (true, false) => {
                let value = bus.read_byte(address, Access::NonSequential) as i8 as i32 as u32;
                bus.idle();
                self.registers.set_register_at(rd, value);
            }
            // LDRSH
            (true, true) => {
                let value = self.read_half_signed(bus, address, Access::NonSequential);
                bus.idle();
                self.registers.set_register_at(rd, value);
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    fn t_load_store_imm_offset(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let byte = opcode.get_bit(12);
        let load = LoadStoreKind::from(opcode.get_bit(11));
        let offset5 = u32::from(opcode.get_bits(6..=10));
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let offset = if byte { offset5 } else { offset5 << 2 };
        let address = self.registers.register_at(rb).wrapping_add(offset);

        self.transfer_byte_or_word(bus, load, byte, rd, address);
    }

    fn t_load_store_halfword(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let load = LoadStoreKind::from(opcode.get_bit(11));
        let offset5 = u32::from(opcode.get_bits(6..=10)) << 1;
        let rb = u32::from(opcode.get_bits(3..=5));
        let rd = u32::from(opcode.get_bits(0..=2));

        let address = self.registers.register_at(rb).wrapping_add(offset5);

        match load {
            LoadStoreKind::Load => {
                let value = self.read_half_rotated(bus, address, Access::NonSequential);
                bus.idle();
                self.registers.set_register_at(rd, value);
            }
            LoadStoreKind::Store => {
                let value = self.registers.register_at(rd) as u16;
                bus.write_half(address & !1, value, Access::NonSequential);
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    fn t_sp_relative_load_store(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let load = LoadStoreKind::from(opcode.get_bit(11));
        let rd = u32::from(opcode.get_bits(8..=10));
        let word8 = u32::from(opcode.get_bits(0..=7)) << 2;

        let address = self.registers.register_at(REG_SP).wrapping_add(word8);
        self.transfer_byte_or_word(bus, load, false, rd, address);
    }

    fn transfer_byte_or_word(
        &mut self,
        bus: &mut impl BusInterface,
        load: LoadStoreKind,
        byte: bool,
        rd: u32,
        address: u32,
    ) {
        match load {
            LoadStoreKind::Load => {
                let value = if byte {
                    bus.read_byte(address, Access::NonSequential).into()
                } else {
                    self.read_word_rotated(bus, address, Access::NonSequential)
                };
                bus.idle();
                self.registers.set_register_at(rd, value);
            }
            LoadStoreKind::Store => {
                let value = self.registers.register_at(rd);
                if byte {
                    bus.write_byte(address, value as u8, Access::NonSequential);
                } else {
                    bus.write_word(address & !3, value, Access::NonSequential);
                }
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    fn t_load_address(&mut self, opcode: u16) {
        let from_sp = opcode.get_bit(11);
        let rd = u32::from(opcode.get_bits(8..=10));
        let word8 = u32::from(opcode.get_bits(0..=7)) << 2;

        let base = if from_sp {
            self.registers.register_at(REG_SP)
        } else {
            self.registers.program_counter() & !2
        };

        self.registers.set_register_at(rd, base.wrapping_add(word8));
    }

    fn t_add_offset_to_sp(&mut self, opcode: u16) {
        let negative = opcode.get_bit(7);
        let word7 = u32::from(opcode.get_bits(0..=6)) << 2;

        let sp = self.registers.register_at(REG_SP);
        let new_sp = if negative {
            sp.wrapping_sub(word7)
        } else {
            sp.wrapping_add(word7)
        };
        self.registers.set_register_at(REG_SP, new_sp);
    }

    fn t_push_pop_registers(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let pop = LoadStoreKind::from(opcode.get_bit(11));
        let pc_lr = opcode.get_bit(8);
        let register_list = opcode.get_bits(0..=7);

        let count = u32::from(register_list.count_ones()) + u32::from(pc_lr);
        let sp = self.registers.register_at(REG_SP);

        let mut access = Access::NonSequential;
        match pop {
            // POP: LDMIA SP!
            LoadStoreKind::Load => {
                let mut address = sp;
                for reg in 0..8_u32 {
                    if register_list.get_bit(reg as u8) {
                        let value = bus.read_word(address & !3, access);
                        self.registers.set_register_at(reg, value);
                        address = address.wrapping_add(4);
                        access = Access::Sequential;
                    }
                }
                if pc_lr {
                    let value = bus.read_word(address & !3, access);
                    self.registers.set_program_counter(value & !1);
                    address = address.wrapping_add(4);
                    self.flush_pipeline();
                }
                bus.idle();
                self.registers.set_register_at(REG_SP, address);
            }
            // PUSH: STMDB SP!
            LoadStoreKind::Store => {
                let base = sp.wrapping_sub(count * 4);
                let mut address = base;
                for reg in 0..8_u32 {
                    if register_list.get_bit(reg as u8) {
                        let value = self.registers.register_at(reg);
                        bus.write_word(address & !3, value, access);
                        address = address.wrapping_add(4);
                        access = Access::Sequential;
                    }
                }
                if pc_lr {
                    let value = self.registers.register_at(REG_LR);
                    bus.write_word(address & !3, value, access);
                }
                self.registers.set_register_at(REG_SP, base);
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    fn t_multiple_load_store(&mut self, bus: &mut impl BusInterface, opcode: u16) {
        let load = LoadStoreKind::from(opcode.get_bit(11));
        let rb = u32::from(opcode.get_bits(8..=10));
        let register_list = opcode.get_bits(0..=7);

        let base = self.registers.register_at(rb);
        let count = u32::from(register_list.count_ones());
        let final_base = base.wrapping_add(count * 4);

        let mut address = base;
        let mut access = Access::NonSequential;
        let mut first = true;

        for reg in 0..8_u32 {
            if !register_list.get_bit(reg as u8) {
                continue;
            }

            match load {
                LoadStoreKind::Load => {
                    let value = bus.read_word(address & !3, access);
                    self.registers.set_register_at(reg, value);
                }
                LoadStoreKind::Store => {
                    let value = if reg == rb && !first {
                        final_base
                    } else {
                        self.registers.register_at(reg)
                    };
                    bus.write_word(address & !3, value, access);
                }
            }

            address = address.wrapping_add(4);
            access = Access::Sequential;
            first = false;
        }

        match load {
            LoadStoreKind::Load => {
                bus.idle();
                if !register_list.get_bit(rb as u8) {
                    self.registers.set_register_at(rb, final_base);
                }
            }
            LoadStoreKind::Store => {
                self.registers.set_register_at(rb, final_base);
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    fn t_conditional_branch(&mut self, opcode: u16) {
        let condition = Condition::from(opcode.get_bits(8..=11) as u8);
        if !self.cpsr.can_execute(condition) {
            return;
        }

        let offset = (i32::from(opcode.get_bits(0..=7) as i8)) << 1;
        let pc = self.registers.program_counter();
        self.registers
            .set_program_counter(pc.wrapping_add(offset as u32));
        self.flush_pipeline();
    }

    fn t_unconditional_branch(&mut self, opcode: u16) {
        // 11-bit signed offset in halfwords.
        let offset = ((i32::from(opcode.get_bits(0..=10)) << 21) >> 21) << 1;
        let pc = self.registers.program_counter();
        self.registers
            .set_program_counter(pc.wrapping_add(offset as u32));
        self.flush_pipeline();
    }

    fn t_long_branch_with_link(&mut self, opcode: u16) {
        let second_half = opcode.get_bit(11);
        let offset = u32::from(opcode.get_bits(0..=10));
        let pc = self.registers.program_counter();

        if second_half {
            let return_address = pc.wrapping_sub(2) | 1;
            let target = self
                .registers
                .register_at(REG_LR)
                .wrapping_add(offset << 1);
            self.registers.set_register_at(REG_LR, return_address);
            self.registers.set_program_counter(target & !1);
            self.flush_pipeline();
        } else {
            // Sign-extend the high part into bits 12-22.
            let high = ((offset << 21) as i32 >> 21) as u32;
            self.registers
                .set_register_at(REG_LR, pc.wrapping_add(high << 12));
        }
    }

    fn set_nz_thumb(&mut self, result: u32) {
        self.cpsr.set_sign_flag(result.get_bit(31));
        self.cpsr.set_zero_flag(result == 0);
    }

    fn set_arithmetic_flags(&mut self, result: u32, carry: bool, overflow: bool) {
        self.set_nz_thumb(result);
        self.cpsr.set_carry_flag(carry);
        self.cpsr.set_overflow_flag(overflow);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::cpu::arm7tdmi::tests::TestBus;
    use crate::cpu::arm7tdmi::Arm7tdmi;
    use crate::cpu::cpu_modes::Mode;
    use crate::cpu::psr::CpuState;

    fn run_thumb(halfwords: &[u16], steps: usize) -> (Arm7tdmi, TestBus) {
        let mut bus = TestBus::new();
        for (i, half) in halfwords.iter().enumerate() {
            bus.memory[i * 2..i * 2 + 2].copy_from_slice(&half.to_le_bytes());
        }

        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        for _ in 0..steps {
            cpu.step(&mut bus);
        }
        (cpu, bus)
    }

    #[test]
    fn mov_imm_and_add() {
        // MOV R0, #16 ; MOV R1, #4 ; ADD R2, R0, R1
        let (cpu, _) = run_thumb(&[0x2010, 0x2104, 0x1842], 3);
        assert_eq!(cpu.registers.register_at(2), 20);
        assert!(!cpu.cpsr.zero_flag());
    }

    #[test]
    fn lsl_sets_carry() {
        // MOV R0, #0x80 ; LSL R0, R0, #25
        let (cpu, _) = run_thumb(&[0x2080, 0x0640], 2);
        assert_eq!(cpu.registers.register_at(0), 0);
        assert!(cpu.cpsr.carry_flag());
        assert!(cpu.cpsr.zero_flag());
    }

    #[test]
    fn store_load_round_trip() {
        // MOV R1, #0x80 ; MOV R0, #42 ; STR R0, [R1] ; LDR R2, [R1]
        let (cpu, bus) = run_thumb(&[0x2180, 0x202A, 0x6008, 0x680A], 4);
        assert_eq!(cpu.registers.register_at(2), 42);
        assert_eq!(bus.memory[0x80], 42);
    }

    #[test]
    fn push_pop() {
        // MOV R0, #7 ; ADD SP, #-8? Use: MOV R5(sp) manual:
        // MOV R0, #7 ; PUSH {R0} ; MOV R0, #0 ; POP {R1}
        let mut bus = TestBus::new();
        for (i, half) in [0x2007_u16, 0xB401, 0x2000, 0xBC02].iter().enumerate() {
            bus.memory[i * 2..i * 2 + 2].copy_from_slice(&half.to_le_bytes());
        }

        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        cpu.cpsr.set_cpu_state(CpuState::Thumb);
        cpu.registers.set_register_at(13, 0x1000);
        for _ in 0..4 {
            cpu.step(&mut bus);
        }

        assert_eq!(cpu.registers.register_at(1), 7);
        assert_eq!(cpu.registers.register_at(13), 0x1000);
    }

    #[test]
    fn conditional_branch_taken_and_skipped() {
        // MOV R0, #0 (sets Z) ; BEQ +2 ; MOV R1, #1 (skipped) ; MOV R2, #2
        let (cpu, _) = run_thumb(&[0x2000, 0xD000, 0x2101, 0x2202], 3);
        assert_eq!(cpu.registers.register_at(1), 0);
        assert_eq!(cpu.registers.register_at(2), 2);
    }

    #[test]
    fn long_branch_with_link_sets_return_address() {
        // BL forward by 4: F000 F802 at addresses 0,2; target = 8.
        let (cpu, _) = run_thumb(&[0xF000, 0xF802], 2);
        assert_eq!(cpu.registers.program_counter(), 8 + 4);
        // Return address points at the instruction after the pair, with
        // the Thumb bit set.
        assert_eq!(cpu.registers.register_at(14), 0x4 | 1);
    }
}
