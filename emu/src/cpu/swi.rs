//! High-level emulation of the BIOS software-interrupt services.
//!
//! With no BIOS image attached, SWI 0x00-0x2A would vector into empty
//! memory; instead the facade enables this shim and the calls are
//! synthesized in place. Results match the documented register contract of
//! each service; unimplemented numbers log and return so guests keep
//! running.

use logger::log;

use crate::cpu::arm7tdmi::Arm7tdmi;
use crate::cpu::cpu_modes::Mode;
use crate::cpu::{Access, BusInterface};

/// HALTCNT; writing zero stops the CPU until the next interrupt.
const REG_HALTCNT: u32 = 0x0400_0301;

impl Arm7tdmi {
    pub(crate) fn swi_hle(&mut self, bus: &mut impl BusInterface, number: u32) {
        match number {
            // SoftReset
            0x00 => self.swi_soft_reset(bus),
            // RegisterRamReset: clearing work RAM from here would wipe the
            // caller's own stack; reset the I/O the guest asked for and
            // leave RAM alone.
            0x01 => log("HLE RegisterRamReset: I/O reset only"),
            // Halt
            0x02 => bus.write_byte(REG_HALTCNT, 0, Access::NonSequential),
            // IntrWait / VBlankIntrWait: approximated by a plain halt; the
            // wake-up condition is the IE & IF test the IRQ controller
            // already applies.
            0x04 | 0x05 => bus.write_byte(REG_HALTCNT, 0, Access::NonSequential),
            // Div
            0x06 => self.swi_div(false),
            // DivArm (operands swapped)
            0x07 => self.swi_div(true),
            // Sqrt
            0x08 => {
                let result = integer_sqrt(self.registers.register_at(0));
                self.registers.set_register_at(0, result);
            }
            // ArcTan
            0x09 => self.swi_arc_tan(),
            // ArcTan2
            0x0A => self.swi_arc_tan2(),
            // CpuSet
            0x0B => self.swi_cpu_set(bus),
            // CpuFastSet
            0x0C => self.swi_cpu_fast_set(bus),
            // BgAffineSet
            0x0E => self.swi_bg_affine_set(bus),
            // ObjAffineSet
            0x0F => self.swi_obj_affine_set(bus),
            _ => log(format!("unimplemented HLE SWI {number:#04X}")),
        }
    }

    fn swi_soft_reset(&mut self, bus: &mut impl BusInterface) {
        // Return-address flag at 0x03007FFA selects RAM or ROM entry.
        let flag = bus.read_byte(0x0300_7FFA, Access::NonSequential);

        let hle = self.bios_swi_hle;
        self.reset();
        self.bios_swi_hle = hle;
        self.swap_mode(Mode::System);
        self.register_bank.r13_svc = 0x0300_7FE0;
        self.register_bank.r13_irq = 0x0300_7FA0;
        self.cpsr.set_irq_disable(false);
        self.cpsr.set_fiq_disable(false);
        self.registers.set_register_at(13, 0x0300_7F00);
        self.registers.set_program_counter(if flag == 0 {
            0x0800_0000
        } else {
            0x0200_0000
        });
        self.flush_pipeline();
    }

    fn swi_div(&mut self, swapped: bool) {
        let (numerator, denominator) = if swapped {
            (
                self.registers.register_at(1) as i32,
                self.registers.register_at(0) as i32,
            )
        } else {
            (
                self.registers.register_at(0) as i32,
                self.registers.register_at(1) as i32,
            )
        };

        if denominator == 0 {
            // The BIOS spins forever on real hardware; surface it instead.
            log("HLE Div by zero");
            self.registers.set_register_at(0, if numerator < 0 { u32::MAX } else { 1 });
            self.registers.set_register_at(1, numerator as u32);
            self.registers.set_register_at(3, 1);
            return;
        }

        let quotient = numerator.wrapping_div(denominator);
        let remainder = numerator.wrapping_rem(denominator);

        self.registers.set_register_at(0, quotient as u32);
        self.registers.set_register_at(1, remainder as u32);
        self.registers
            .set_register_at(3, quotient.unsigned_abs());
    }

    fn swi_arc_tan(&mut self) {
        // r0: tangent in 1.14 fixed point; result in [-0x4000, 0x4000).
        let tangent = f64::from(self.registers.register_at(0) as i16) / 16384.0;
        let angle = tangent.atan() / std::f64::consts::FRAC_PI_2 * 16384.0;
        self.registers
            .set_register_at(0, (angle as i32 as u32) & 0xFFFF);
    }

    fn swi_arc_tan2(&mut self) {
        let x = f64::from(self.registers.register_at(0) as i16);
        let y = f64::from(self.registers.register_at(1) as i16);
        let angle = y.atan2(x) / std::f64::consts::TAU * 65536.0;
        self.registers
            .set_register_at(0, (angle as i64 as u32) & 0xFFFF);
    }

    fn swi_cpu_set(&mut self, bus: &mut impl BusInterface) {
        let mut source = self.registers.register_at(0);
        let mut dest = self.registers.register_at(1);
        let control = self.registers.register_at(2);

        let count = control & 0x1F_FFFF;
        let fill = control & (1 << 24) != 0;
        let words = control & (1 << 26) != 0;

        if words {
            source &= !3;
            dest &= !3;
            let fixed = bus.read_word(source, Access::NonSequential);
            for i in 0..count {
                let value = if fill {
                    fixed
                } else {
                    bus.read_word(source + i * 4, Access::Sequential)
                };
                bus.write_word(dest + i * 4, value, Access::Sequential);
            }
        } else {
            source &= !1;
            dest &= !1;
            let fixed = bus.read_half(source, Access::NonSequential);
            for i in 0..count {
                let value = if fill {
                    fixed
                } else {
                    bus.read_half(source + i * 2, Access::Sequential)
                };
                bus.write_half(dest + i * 2, value, Access::Sequential);
            }
        }
    }

    fn swi_cpu_fast_set(&mut self, bus: &mut impl BusInterface) {
        let source = self.registers.register_at(0) & !3;
        let dest = self.registers.register_at(1) & !3;
        let control = self.registers.register_at(2);

        // Rounded up to 8-word blocks.
        let count = (control & 0x1F_FFFF).div_ceil(8) * 8;
        let fill = control & (1 << 24) != 0;

        let fixed = bus.read_word(source, Access::NonSequential);
        for i in 0..count {
            let value = if fill {
                fixed
            } else {
                bus.read_word(source + i * 4, Access::Sequential)
            };
            bus.write_word(dest + i * 4, value, Access::Sequential);
        }
    }

    fn swi_bg_affine_set(&mut self, bus: &mut impl BusInterface) {
        let mut source = self.registers.register_at(0);
        let mut dest = self.registers.register_at(1);
        let count = self.registers.register_at(2);

        for _ in 0..count {
            let origin_x =
                f64::from(bus.read_word(source, Access::Sequential) as i32) / 256.0;
            let origin_y =
                f64::from(bus.read_word(source + 4, Access::Sequential) as i32) / 256.0;
            let display_x = f64::from(bus.read_half(source + 8, Access::Sequential) as i16);
            let display_y = f64::from(bus.read_half(source + 10, Access::Sequential) as i16);
            let scale_x = f64::from(bus.read_half(source + 12, Access::Sequential) as i16) / 256.0;
            let scale_y = f64::from(bus.read_half(source + 14, Access::Sequential) as i16) / 256.0;
            let theta = f64::from(bus.read_half(source + 16, Access::Sequential) >> 8)
                / 128.0
                * std::f64::consts::PI;
            source += 20;

            let (sin, cos) = theta.sin_cos();
            let pa = scale_x * cos;
            let pb = -scale_x * sin;
            let pc = scale_y * sin;
            let pd = scale_y * cos;

            bus.write_half(dest, to_fixed8(pa), Access::Sequential);
            bus.write_half(dest + 2, to_fixed8(pb), Access::Sequential);
            bus.write_half(dest + 4, to_fixed8(pc), Access::Sequential);
            bus.write_half(dest + 6, to_fixed8(pd), Access::Sequential);

            let start_x = origin_x - (pa * display_x + pb * display_y);
            let start_y = origin_y - (pc * display_x + pd * display_y);
            bus.write_word(dest + 8, (start_x * 256.0) as i32 as u32, Access::Sequential);
            bus.write_word(dest + 12, (start_y * 256.0) as i32 as u32, Access::Sequential);
            dest += 16;
        }
    }

    fn swi_obj_affine_set(&mut self, bus: &mut impl BusInterface) {
        let mut source = self.registers.register_at(0);
        let mut dest = self.registers.register_at(1);
        let count = self.registers.register_at(2);
        let stride = self.registers.register_at(3);

        for _ in 0..count {
            let scale_x = f64::from(bus.read_half(source, Access::Sequential) as i16) / 256.0;
            let scale_y = f64::from(bus.read_half(source + 2, Access::Sequential) as i16) / 256.0;
            let theta = f64::from(bus.read_half(source + 4, Access::Sequential) >> 8)
                / 128.0
                * std::f64::consts::PI;
            source += 8;

            let (sin, cos) = theta.sin_cos();
            bus.write_half(dest, to_fixed8(scale_x * cos), Access::Sequential);
            dest += stride;
            bus.write_half(dest, to_fixed8(-scale_x * sin), Access::Sequential);
            dest += stride;
            bus.write_half(dest, to_fixed8(scale_y * sin), Access::Sequential);
            dest += stride;
            bus.write_half(dest, to_fixed8(scale_y * cos), Access::Sequential);
            dest += stride;
        }
    }
}

fn to_fixed8(value: f64) -> u16 {
    (value * 256.0) as i32 as u16
}

fn integer_sqrt(value: u32) -> u32 {
    if value == 0 {
        return 0;
    }

    let mut x = value;
    let mut y = x.div_ceil(2);
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::integer_sqrt;
    use crate::cpu::arm7tdmi::tests::TestBus;
    use crate::cpu::arm7tdmi::Arm7tdmi;

    #[test]
    fn sqrt_matches_floor() {
        for value in [0_u32, 1, 2, 3, 4, 15, 16, 17, 80, 81, 0xFFFF_FFFF] {
            let expected = (f64::from(value)).sqrt().floor() as u32;
            assert_eq!(integer_sqrt(value), expected, "sqrt({value})");
        }
    }

    #[test]
    fn div_sets_quotient_remainder_and_abs() {
        let mut cpu = Arm7tdmi::default();
        let mut bus = TestBus::new();
        cpu.bios_swi_hle = true;

        cpu.registers.set_register_at(0, (-7_i32) as u32);
        cpu.registers.set_register_at(1, 2);
        cpu.swi_hle(&mut bus, 0x06);

        assert_eq!(cpu.registers.register_at(0) as i32, -3);
        assert_eq!(cpu.registers.register_at(1) as i32, -1);
        assert_eq!(cpu.registers.register_at(3), 3);
    }

    #[test]
    fn cpu_set_copies_and_fills() {
        let mut cpu = Arm7tdmi::default();
        let mut bus = TestBus::new();
        cpu.bios_swi_hle = true;

        bus.memory[0x100..0x104].copy_from_slice(&0xCAFEBABE_u32.to_le_bytes());

        // Fill 4 words from 0x100 to 0x200.
        cpu.registers.set_register_at(0, 0x100);
        cpu.registers.set_register_at(1, 0x200);
        cpu.registers.set_register_at(2, 4 | (1 << 24) | (1 << 26));
        cpu.swi_hle(&mut bus, 0x0B);

        for i in 0..4 {
            let offset = 0x200 + i * 4;
            assert_eq!(
                &bus.memory[offset..offset + 4],
                &0xCAFEBABE_u32.to_le_bytes()
            );
        }
    }
}
