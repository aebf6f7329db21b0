use serde::{Deserialize, Serialize};

use crate::cpu::psr::Psr;

/// Shadow storage for the banked registers of each privileged mode.
///
/// While a mode is active its registers live in the primary
/// [`Registers`](super::registers::Registers) array; this struct holds
/// whatever the inactive modes left behind. The `_old` fields store the
/// User/System copies of R8-R14 while an exception mode (or FIQ) holds the
/// live slots.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterBank {
    pub r8_old: u32,
    pub r9_old: u32,
    pub r10_old: u32,
    pub r11_old: u32,
    pub r12_old: u32,
    pub r13_old: u32,
    pub r14_old: u32,

    pub r8_fiq: u32,
    pub r9_fiq: u32,
    pub r10_fiq: u32,
    pub r11_fiq: u32,
    pub r12_fiq: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,
    pub spsr_fiq: Psr,

    pub r13_svc: u32,
    pub r14_svc: u32,
    pub spsr_svc: Psr,

    pub r13_abt: u32,
    pub r14_abt: u32,
    pub spsr_abt: Psr,

    pub r13_irq: u32,
    pub r14_irq: u32,
    pub spsr_irq: Psr,

    pub r13_und: u32,
    pub r14_und: u32,
    pub spsr_und: Psr,
}
