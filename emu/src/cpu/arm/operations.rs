//! Execution of the ARM (32-bit) instruction set.

use crate::bitwise::Bits;
use crate::cpu::arm::{decode, ArmFormat};
use crate::cpu::arm7tdmi::{Arm7tdmi, Exception};
use crate::cpu::barrel_shifter::{shift_immediate, shift_register, ShiftOutput};
use crate::cpu::cpu_modes::Mode;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, OperandKind, ReadWriteKind,
    ShiftKind,
};
use crate::cpu::psr::CpuState;
use crate::cpu::registers::REG_PC;
use crate::cpu::{Access, BusInterface};

/// Result of an arithmetic ALU operation together with the flags it
/// produces. Logical operations only use `result` and take their carry
/// from the shifter instead.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ArithmeticOpResult {
    pub result: u32,
    pub carry: bool,
    pub overflow: bool,
}

/// `a + b + carry_in` with NZCV semantics. Subtractions go through here as
/// `a + !b + 1` so the carry flag lands on the architectural
/// "carry = no borrow" convention.
pub(crate) fn alu_add(a: u32, b: u32, carry_in: u32) -> ArithmeticOpResult {
    let wide = u64::from(a) + u64::from(b) + u64::from(carry_in);
    let result = wide as u32;

    ArithmeticOpResult {
        result,
        carry: wide > u64::from(u32::MAX),
        overflow: (!(a ^ b) & (a ^ result)).get_bit(31),
    }
}

impl Arm7tdmi {
    pub(crate) fn execute_arm(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        match decode(opcode) {
            ArmFormat::DataProcessing => self.data_processing(bus, opcode),
            ArmFormat::PsrTransferMrs => self.psr_transfer_mrs(opcode),
            ArmFormat::PsrTransferMsr => self.psr_transfer_msr(opcode),
            ArmFormat::Multiply => self.multiply(bus, opcode),
            ArmFormat::MultiplyLong => self.multiply_long(bus, opcode),
            ArmFormat::SingleDataSwap => self.single_data_swap(bus, opcode),
            ArmFormat::BranchAndExchange => self.branch_and_exchange(opcode),
            ArmFormat::HalfwordDataTransfer => self.halfword_data_transfer(bus, opcode),
            ArmFormat::SingleDataTransfer => self.single_data_transfer(bus, opcode),
            ArmFormat::BlockDataTransfer => self.block_data_transfer(bus, opcode),
            ArmFormat::Branch => self.branch(opcode),
            ArmFormat::SoftwareInterrupt => self.software_interrupt(bus, opcode.get_bits(16..=23)),
            ArmFormat::Undefined
            | ArmFormat::CoprocessorDataTransfer
            | ArmFormat::CoprocessorDataOperation
            | ArmFormat::CoprocessorRegisterTransfer => {
                // No coprocessors exist on this system; everything in this
                // space takes the undefined-instruction trap.
                self.exception(Exception::Undefined);
            }
        }
    }

    fn set_nz(&mut self, result: u32) {
        self.cpsr.set_sign_flag(result.get_bit(31));
        self.cpsr.set_zero_flag(result == 0);
    }

    /// Resolves operand 2 and its shifter carry-out. `pc_extra` reports
    /// how far R15 reads ahead of its usual +8 (register-specified shifts
    /// push it to +12).
    fn decode_operand2(
        &mut self,
        bus: &mut impl BusInterface,
        opcode: u32,
    ) -> (ShiftOutput, u32) {
        let carry_in = self.cpsr.carry_flag();

        match OperandKind::from(opcode.get_bit(25)) {
            OperandKind::Immediate => {
                let imm = opcode.get_bits(0..=7);
                let rotate = opcode.get_bits(8..=11) * 2;
                let value = imm.rotate_right(rotate);
                let carry = if rotate == 0 {
                    carry_in
                } else {
                    value.get_bit(31)
                };
                (ShiftOutput { value, carry }, 0)
            }
            OperandKind::Register => {
                let rm = opcode.get_bits(0..=3);
                let kind = ShiftKind::from(opcode.get_bits(5..=6));

                if opcode.get_bit(4) {
                    // Register-specified amount burns one internal cycle
                    // and makes R15 read one word further ahead.
                    bus.idle();
                    let rs = opcode.get_bits(8..=11);
                    let amount = self.registers.register_at(rs) & 0xFF;
                    let value = self.read_operand_register(rm, 4);
                    (shift_register(kind, amount, value, carry_in), 4)
                } else {
                    let amount = opcode.get_bits(7..=11);
                    let value = self.registers.register_at(rm);
                    (shift_immediate(kind, amount, value, carry_in), 0)
                }
            }
        }
    }

    fn read_operand_register(&self, reg: u32, pc_extra: u32) -> u32 {
        let value = self.registers.register_at(reg);
        if reg == REG_PC {
            value.wrapping_add(pc_extra)
        } else {
            value
        }
    }

    fn data_processing(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let alu_op = opcode.get_bits(21..=24);
        let set_conditions = opcode.get_bit(20);
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);

        let (op2, pc_extra) = self.decode_operand2(bus, opcode);
        let op1 = self.read_operand_register(rn, pc_extra);
        let op2_value = op2.value;

        let mut write = true;
        let mut logical_result = None;
        let mut arithmetic = None;

        let result = match alu_op {
            // AND
            0x0 => {
                let r = op1 & op2_value;
                logical_result = Some(r);
                r
            }
            // EOR
            0x1 => {
                let r = op1 ^ op2_value;
                logical_result = Some(r);
                r
            }
            // SUB
            0x2 => {
                let r = alu_add(op1, !op2_value, 1);
                arithmetic = Some(r);
                r.result
            }
            // RSB
            0x3 => {
                let r = alu_add(op2_value, !op1, 1);
                arithmetic = Some(r);
                r.result
            }
            // ADD
            0x4 => {
                let r = alu_add(op1, op2_value, 0);
                arithmetic = Some(r);
                r.result
            }
            // ADC
            0x5 => {
                let r = alu_add(op1, op2_value, self.cpsr.carry_flag().into());
                arithmetic = Some(r);
                r.result
            }
            // SBC
            0x6 => {
                let r = alu_add(op1, !op2_value, self.cpsr.carry_flag().into());
                arithmetic = Some(r);
                r.result
            }
            // RSC
            0x7 => {
                let r = alu_add(op2_value, !op1, self.cpsr.carry_flag().into());
                arithmetic = Some(r);
                r.result
            }
            // TST
            0x8 => {
                write = false;
                let r = op1 & op2_value;
                logical_result = Some(r);
                r
            }
            // TEQ
            0x9 => {
                write = false;
                let r = op1 ^ op2_value;
                logical_result = Some(r);
                r
            }
            // CMP
            0xA => {
                write = false;
                let r = alu_add(op1, !op2_value, 1);
                arithmetic = Some(r);
                r.result
            }
            // CMN
            0xB => {
                write = false;
                let r = alu_add(op1, op2_value, 0);
                arithmetic = Some(r);
                r.result
            }
            // ORR
            0xC => {
                let r = op1 | op2_value;
                logical_result = Some(r);
                r
            }
            // MOV
            0xD => {
                logical_result = Some(op2_value);
                op2_value
            }
            // BIC
            0xE => {
                let r = op1 & !op2_value;
                logical_result = Some(r);
                r
            }
            // MVN
            0xF => {
                let r = !op2_value;
                logical_result = Some(r);
                r
            }
            _ => unreachable!(),
        };

        if set_conditions {
            if rd == REG_PC {
                // S with R15 returns from an exception: CPSR comes back
                // from the SPSR instead of flag updates.
                self.restore_cpsr_from_spsr();
            } else if let Some(arith) = arithmetic {
                self.set_nz(arith.result);
                self.cpsr.set_carry_flag(arith.carry);
                self.cpsr.set_overflow_flag(arith.overflow);
            } else if let Some(logical) = logical_result {
                self.set_nz(logical);
                self.cpsr.set_carry_flag(op2.carry);
            }
        }

        if write {
            self.registers.set_register_at(rd, result);
            if rd == REG_PC {
                self.flush_pipeline();
            }
        }
    }

    fn psr_transfer_mrs(&mut self, opcode: u32) {
        let rd = opcode.get_bits(12..=15);
        let source_is_spsr = opcode.get_bit(22);

        let psr = if source_is_spsr { self.spsr } else { self.cpsr };
        self.registers.set_register_at(rd, psr.into());
    }

    fn psr_transfer_msr(&mut self, opcode: u32) {
        let dest_is_spsr = opcode.get_bit(22);
        let write_flags = opcode.get_bit(19);
        let write_control = opcode.get_bit(16);

        let value = if opcode.get_bit(25) {
            let imm = opcode.get_bits(0..=7);
            imm.rotate_right(opcode.get_bits(8..=11) * 2)
        } else {
            self.registers.register_at(opcode.get_bits(0..=3))
        };

        if dest_is_spsr {
            if matches!(self.cpsr.mode(), Mode::User | Mode::System) {
                logger::log("MSR to SPSR in a mode without one");
                return;
            }
            if write_flags {
                self.spsr.set_flags_raw(value);
            }
            if write_control {
                // The BIOS stores raw zeroes here; keep whatever the guest
                // wrote and validate only when the SPSR is restored.
                self.spsr.set_irq_disable(value.get_bit(7));
                self.spsr.set_fiq_disable(value.get_bit(6));
                self.spsr.set_state_bit(value.get_bit(5));
                self.spsr.set_mode_raw(value.get_bits(0..=4));
            }
            return;
        }

        if write_flags {
            self.cpsr.set_flags_raw(value);
        }

        // User mode can only touch the flags.
        if write_control && self.cpsr.mode() != Mode::User {
            self.cpsr.set_irq_disable(value.get_bit(7));
            self.cpsr.set_fiq_disable(value.get_bit(6));
            match Mode::try_from(value.get_bits(0..=4)) {
                Ok(new_mode) => self.swap_mode(new_mode),
                // Unpredictable on hardware; keep the old mode.
                Err(error) => logger::log(error),
            }
        }
    }

    fn multiply_internal_cycles(multiplier: u32) -> u32 {
        // Early-out multiplier: one cycle per significant byte.
        match multiplier {
            m if m & 0xFFFF_FF00 == 0 || m & 0xFFFF_FF00 == 0xFFFF_FF00 => 1,
            m if m & 0xFFFF_0000 == 0 || m & 0xFFFF_0000 == 0xFFFF_0000 => 2,
            m if m & 0xFF00_0000 == 0 || m & 0xFF00_0000 == 0xFF00_0000 => 3,
            _ => 4,
        }
    }

    fn multiply(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let rd = opcode.get_bits(16..=19);
        let rn = opcode.get_bits(12..=15);
        let rs = opcode.get_bits(8..=11);
        let rm = opcode.get_bits(0..=3);
        let accumulate = opcode.get_bit(21);
        let set_conditions = opcode.get_bit(20);

        let multiplier = self.registers.register_at(rs);
        for _ in 0..Self::multiply_internal_cycles(multiplier) {
            bus.idle();
        }

        let mut result = self
            .registers
            .register_at(rm)
            .wrapping_mul(multiplier);
        if accumulate {
            bus.idle();
            result = result.wrapping_add(self.registers.register_at(rn));
        }

        self.registers.set_register_at(rd, result);
        if set_conditions {
            self.set_nz(result);
        }
    }

    fn multiply_long(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let rd_hi = opcode.get_bits(16..=19);
        let rd_lo = opcode.get_bits(12..=15);
        let rs = opcode.get_bits(8..=11);
        let rm = opcode.get_bits(0..=3);
        let signed = opcode.get_bit(22);
        let accumulate = opcode.get_bit(21);
        let set_conditions = opcode.get_bit(20);

        let multiplier = self.registers.register_at(rs);
        for _ in 0..Self::multiply_internal_cycles(multiplier) + 1 {
            bus.idle();
        }

        let operand_lhs = self.registers.register_at(rm);
        let mut result: u64 = if signed {
            (i64::from(operand_lhs as i32) * i64::from(multiplier as i32)) as u64
        } else {
            u64::from(operand_lhs) * u64::from(multiplier)
        };

        if accumulate {
            bus.idle();
            let acc = (u64::from(self.registers.register_at(rd_hi)) << 32)
                | u64::from(self.registers.register_at(rd_lo));
            result = result.wrapping_add(acc);
        }

        self.registers.set_register_at(rd_lo, result as u32);
        self.registers.set_register_at(rd_hi, (result >> 32) as u32);

        if set_conditions {
            self.cpsr.set_sign_flag(result.get_bit(63));
            self.cpsr.set_zero_flag(result == 0);
        }
    }

    fn single_data_swap(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);
        let rm = opcode.get_bits(0..=3);
        let address = self.registers.register_at(rn);
        let source = self.registers.register_at(rm);

        let loaded = match ReadWriteKind::from(opcode.get_bit(22)) {
            ReadWriteKind::Byte => {
                let value = bus.read_byte(address, Access::NonSequential).into();
                bus.write_byte(address, source as u8, Access::NonSequential);
                value
            }
            ReadWriteKind::Word => {
                let value = self.read_word_rotated(bus, address, Access::NonSequential);
                bus.write_word(address & !3, source, Access::NonSequential);
                value
            }
        };

        bus.idle();
        self.registers.set_register_at(rd, loaded);
        self.fetch_access = Access::NonSequential;
    }

    fn branch_and_exchange(&mut self, opcode: u32) {
        let rn = opcode.get_bits(0..=3);
        let target = self.registers.register_at(rn);

        if target.get_bit(0) {
            self.cpsr.set_cpu_state(CpuState::Thumb);
            self.registers.set_program_counter(target & !1);
        } else {
            self.cpsr.set_cpu_state(CpuState::Arm);
            self.registers.set_program_counter(target & !3);
        }

        self.flush_pipeline();
    }

    fn halfword_data_transfer(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let indexing = Indexing::from(opcode.get_bit(24));
        let offsetting = Offsetting::from(opcode.get_bit(23));
        let immediate_offset = opcode.get_bit(22);
        let write_back = opcode.get_bit(21);
        let load_store = LoadStoreKind::from(opcode.get_bit(20));
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);
        let kind = HalfwordTransferKind::from(opcode.get_bits(5..=6));

        let offset = if immediate_offset {
            (opcode.get_bits(8..=11) << 4) | opcode.get_bits(0..=3)
        } else {
            self.registers.register_at(opcode.get_bits(0..=3))
        };

        let base = self.registers.register_at(rn);
        let offset_address = match offsetting {
            Offsetting::Up => base.wrapping_add(offset),
            Offsetting::Down => base.wrapping_sub(offset),
        };
        let address = match indexing {
            Indexing::Pre => offset_address,
            Indexing::Post => base,
        };

        match load_store {
            LoadStoreKind::Load => {
                let value = match kind {
                    HalfwordTransferKind::UnsignedHalfwords => {
                        self.read_half_rotated(bus, address, Access::NonSequential)
                    }
                    HalfwordTransferKind::SignedByte => {
                        bus.read_byte(address, Access::NonSequential) as i8 as i32 as u32
                    }
                    HalfwordTransferKind::SignedHalfwords => {
                        self.read_half_signed(bus, address, Access::NonSequential)
                    }
                };
                bus.idle();

                self.write_back_address(rn, rd, offset_address, indexing, write_back, true);
                self.registers.set_register_at(rd, value);
                if rd == REG_PC {
                    self.flush_pipeline();
                }
            }
            LoadStoreKind::Store => {
                let value = self.read_operand_register(rd, 4);
                match kind {
                    HalfwordTransferKind::UnsignedHalfwords => {
                        bus.write_half(address & !1, value as u16, Access::NonSequential);
                    }
                    // The signed store encodings are holes on the ARM7;
                    // drop the access rather than taking down the host.
                    _ => logger::log("store with a signed halfword-transfer encoding"),
                }

                self.write_back_address(rn, rd, offset_address, indexing, write_back, false);
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    /// Base write-back shared by the single and halfword transfers.
    /// Post-indexing always writes back; a load whose destination is the
    /// base keeps the loaded value.
    fn write_back_address(
        &mut self,
        rn: u32,
        rd: u32,
        offset_address: u32,
        indexing: Indexing,
        write_back: bool,
        is_load: bool,
    ) {
        let requested = matches!(indexing, Indexing::Post) || write_back;
        if requested && !(is_load && rn == rd) {
            self.registers.set_register_at(rn, offset_address);
            if rn == REG_PC {
                self.flush_pipeline();
            }
        }
    }

    fn single_data_transfer(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let register_offset = opcode.get_bit(25);
        let indexing = Indexing::from(opcode.get_bit(24));
        let offsetting = Offsetting::from(opcode.get_bit(23));
        let quantity = ReadWriteKind::from(opcode.get_bit(22));
        let write_back = opcode.get_bit(21);
        let load_store = LoadStoreKind::from(opcode.get_bit(20));
        let rn = opcode.get_bits(16..=19);
        let rd = opcode.get_bits(12..=15);

        let offset = if register_offset {
            let rm = opcode.get_bits(0..=3);
            let kind = ShiftKind::from(opcode.get_bits(5..=6));
            let amount = opcode.get_bits(7..=11);
            shift_immediate(
                kind,
                amount,
                self.registers.register_at(rm),
                self.cpsr.carry_flag(),
            )
            .value
        } else {
            opcode.get_bits(0..=11)
        };

        let base = self.registers.register_at(rn);
        let offset_address = match offsetting {
            Offsetting::Up => base.wrapping_add(offset),
            Offsetting::Down => base.wrapping_sub(offset),
        };
        let address = match indexing {
            Indexing::Pre => offset_address,
            Indexing::Post => base,
        };

        match load_store {
            LoadStoreKind::Load => {
                let value = match quantity {
                    ReadWriteKind::Word => {
                        self.read_word_rotated(bus, address, Access::NonSequential)
                    }
                    ReadWriteKind::Byte => bus.read_byte(address, Access::NonSequential).into(),
                };
                bus.idle();

                self.write_back_address(rn, rd, offset_address, indexing, write_back, true);
                self.registers.set_register_at(rd, value);
                if rd == REG_PC {
                    self.flush_pipeline();
                }
            }
            LoadStoreKind::Store => {
                let value = self.read_operand_register(rd, 4);
                match quantity {
                    ReadWriteKind::Word => {
                        bus.write_word(address & !3, value, Access::NonSequential);
                    }
                    ReadWriteKind::Byte => {
                        bus.write_byte(address, value as u8, Access::NonSequential);
                    }
                }

                self.write_back_address(rn, rd, offset_address, indexing, write_back, false);
            }
        }

        self.fetch_access = Access::NonSequential;
    }

    fn block_data_transfer(&mut self, bus: &mut impl BusInterface, opcode: u32) {
        let indexing = Indexing::from(opcode.get_bit(24));
        let offsetting = Offsetting::from(opcode.get_bit(23));
        let psr_or_user_bank = opcode.get_bit(22);
        let write_back = opcode.get_bit(21);
        let load_store = LoadStoreKind::from(opcode.get_bit(20));
        let rn = opcode.get_bits(16..=19);
        let mut register_list = opcode.get_bits(0..=15) as u16;

        let base = self.registers.register_at(rn);

        // Empty list transfers R15 alone and moves the base a full block.
        let empty_list = register_list == 0;
        if empty_list {
            register_list = 1 << 15;
        }
        let count = u32::from(register_list.count_ones());
        let block = if empty_list { 0x40 } else { count * 4 };

        let ascending = matches!(offsetting, Offsetting::Up);
        let (start, final_base) = match (ascending, indexing) {
            (true, Indexing::Post) => (base, base.wrapping_add(block)),
            (true, Indexing::Pre) => (base.wrapping_add(4), base.wrapping_add(block)),
            (false, Indexing::Post) => (base.wrapping_sub(block).wrapping_add(4), base.wrapping_sub(block)),
            (false, Indexing::Pre) => (base.wrapping_sub(block), base.wrapping_sub(block)),
        };

        let user_bank_transfer = psr_or_user_bank
            && !(matches!(load_store, LoadStoreKind::Load) && register_list.get_bit(15));

        let mut address = start;
        let mut access = Access::NonSequential;
        let mut first_store = true;

        for reg in 0..16_u32 {
            if !register_list.get_bit(reg as u8) {
                continue;
            }

            match load_store {
                LoadStoreKind::Load => {
                    let value = bus.read_word(address & !3, access);
                    if user_bank_transfer {
                        self.set_user_register_at(reg, value);
                    } else {
                        self.registers.set_register_at(reg, value);
                    }
                }
                LoadStoreKind::Store => {
                    // Base in list: the original base goes out only if it
                    // is the first transferred register.
                    let value = if reg == rn && write_back && !first_store {
                        final_base
                    } else if user_bank_transfer {
                        self.user_register_at(reg)
                    } else {
                        self.read_operand_register(reg, 4)
                    };
                    bus.write_word(address & !3, value, access);
                }
            }

            address = address.wrapping_add(4);
            access = Access::Sequential;
            first_store = false;
        }

        if matches!(load_store, LoadStoreKind::Load) {
            bus.idle();

            // Base in the list wins over write-back.
            if write_back && !register_list.get_bit(rn as u8) {
                self.registers.set_register_at(rn, final_base);
            }

            if register_list.get_bit(15) {
                if psr_or_user_bank {
                    self.restore_cpsr_from_spsr();
                }
                self.flush_pipeline();
            }
        } else if write_back {
            self.registers.set_register_at(rn, final_base);
        }

        self.fetch_access = Access::NonSequential;
    }

    /// Reads a User/System-bank register regardless of the current mode
    /// (the S-bit LDM/STM forms).
    fn user_register_at(&self, reg: u32) -> u32 {
        let mode = self.cpsr.mode();
        match (reg, mode) {
            (8..=12, Mode::Fiq) => match reg {
                8 => self.register_bank.r8_old,
                9 => self.register_bank.r9_old,
                10 => self.register_bank.r10_old,
                11 => self.register_bank.r11_old,
                12 => self.register_bank.r12_old,
                _ => unreachable!(),
            },
            (13, m) if m != Mode::User && m != Mode::System => self.register_bank.r13_old,
            (14, m) if m != Mode::User && m != Mode::System => self.register_bank.r14_old,
            _ => self.registers.register_at(reg),
        }
    }

    fn set_user_register_at(&mut self, reg: u32, value: u32) {
        let mode = self.cpsr.mode();
        match (reg, mode) {
            (8..=12, Mode::Fiq) => match reg {
                8 => self.register_bank.r8_old = value,
                9 => self.register_bank.r9_old = value,
                10 => self.register_bank.r10_old = value,
                11 => self.register_bank.r11_old = value,
                12 => self.register_bank.r12_old = value,
                _ => unreachable!(),
            },
            (13, m) if m != Mode::User && m != Mode::System => self.register_bank.r13_old = value,
            (14, m) if m != Mode::User && m != Mode::System => self.register_bank.r14_old = value,
            _ => self.registers.set_register_at(reg, value),
        }
    }

    fn branch(&mut self, opcode: u32) {
        let link = opcode.get_bit(24);
        let offset = (opcode.get_bits(0..=23) << 8) as i32 >> 6; // sign-extend, then *4

        let pc = self.registers.program_counter();
        if link {
            self.registers.set_register_at(14, pc.wrapping_sub(4));
        }

        self.registers
            .set_program_counter(pc.wrapping_add(offset as u32));
        self.flush_pipeline();
    }

    pub(crate) fn software_interrupt(&mut self, bus: &mut impl BusInterface, number: u32) {
        if self.bios_swi_hle {
            self.swi_hle(bus, number);
        } else {
            self.exception(Exception::SoftwareInterrupt);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::cpu::arm7tdmi::tests::TestBus;
    use crate::cpu::arm7tdmi::Arm7tdmi;
    use crate::cpu::cpu_modes::Mode;

    fn run(words: &[u32], steps: usize) -> (Arm7tdmi, TestBus) {
        let mut bus = TestBus::with_program(words);
        let mut cpu = Arm7tdmi::default();
        cpu.swap_mode(Mode::System);
        for _ in 0..steps {
            cpu.step(&mut bus);
        }
        (cpu, bus)
    }

    #[test]
    fn mov_and_add() {
        // MOV R0, #1 ; ADD R1, R0, R0
        let (cpu, _) = run(&[0xE3A0_0001, 0xE080_1000], 2);
        assert_eq!(cpu.registers.register_at(0), 1);
        assert_eq!(cpu.registers.register_at(1), 2);
    }

    #[test]
    fn subs_sets_flags() {
        // MOV R0, #5 ; SUBS R1, R0, #5
        let (cpu, _) = run(&[0xE3A0_0005, 0xE250_1005], 2);
        assert_eq!(cpu.registers.register_at(1), 0);
        assert!(cpu.cpsr.zero_flag());
        assert!(cpu.cpsr.carry_flag());
        assert!(!cpu.cpsr.sign_flag());
        assert!(!cpu.cpsr.overflow_flag());
    }

    #[test]
    fn pc_relative_reads_account_for_pipeline() {
        // MOV R0, PC ; at address 0 R15 reads 8.
        let (cpu, _) = run(&[0xE1A0_000F], 1);
        assert_eq!(cpu.registers.register_at(0), 8);
    }

    #[test]
    fn branch_with_link() {
        // BL +8 (lands on word 4): offset field = 2
        let (cpu, _) = run(&[0xEB00_0002], 1);
        assert_eq!(cpu.registers.register_at(14), 4);
        // After the flush the next refill happens inside the following
        // step; PC register itself is at target already.
        assert_eq!(cpu.registers.program_counter(), 16);
    }

    #[test]
    fn load_store_word() {
        // MOV R0, #0x80 ; STR R0, [R0] ; LDR R1, [R0]
        let (cpu, bus) = run(&[0xE3A0_0080, 0xE580_0000, 0xE590_1000], 3);
        assert_eq!(cpu.registers.register_at(1), 0x80);
        assert_eq!(&bus.memory[0x80..0x84], &[0x80, 0, 0, 0]);
    }

    #[test]
    fn ldm_stm_round_trip() {
        // MOV R0, #1; MOV R1, #2; MOV SP, #0x100; STMDB SP!, {R0,R1};
        // MOV R0, #0; MOV R1, #0; LDMIA SP!, {R0,R1}
        let program = [
            0xE3A0_0001, // MOV R0, #1
            0xE3A0_1002, // MOV R1, #2
            0xE3A0_D0FF, // MOV SP, #0xFF
            0xE92D_0003, // STMDB SP!, {R0, R1}
            0xE3A0_0000, // MOV R0, #0
            0xE3A0_1000, // MOV R1, #0
            0xE8BD_0003, // LDMIA SP!, {R0, R1}
        ];
        let (cpu, _) = run(&program, 7);
        assert_eq!(cpu.registers.register_at(0), 1);
        assert_eq!(cpu.registers.register_at(1), 2);
        assert_eq!(cpu.registers.register_at(13), 0xFF);
    }

    #[test]
    fn multiply_accumulate() {
        // MOV R1, #3 ; MOV R2, #4 ; MOV R3, #5 ; MLA R0, R1, R2, R3
        let (cpu, _) = run(
            &[0xE3A0_1003, 0xE3A0_2004, 0xE3A0_3005, 0xE020_3291],
            4,
        );
        assert_eq!(cpu.registers.register_at(0), 17);
    }
}
