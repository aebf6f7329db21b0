use serde::{Deserialize, Serialize};

/// Stack pointer register index.
pub const REG_SP: u32 = 0xD;

/// Link register index (subroutine return address).
pub const REG_LR: u32 = 0xE;

/// Program counter register index.
pub const REG_PC: u32 = 0xF;

/// The 16 currently-visible general registers. Banked shadows for the
/// privileged modes live in [`RegisterBank`](super::register_bank::RegisterBank);
/// switching mode swaps them in and out of this array.
///
/// Because of the three-stage pipeline, R15 reads ahead of the executing
/// instruction: +8 in ARM state, +4 in Thumb state.
#[derive(Default, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[15]
    }

    pub const fn set_program_counter(&mut self, new_value: u32) {
        self.0[15] = new_value;
    }

    pub fn advance_program_counter(&mut self, amount: u32) {
        self.0[15] = self.0[15].wrapping_add(amount);
    }

    #[must_use]
    pub fn register_at(&self, reg: u32) -> u32 {
        assert!(reg <= 15, "invalid register index: {reg}");
        self.0[reg as usize]
    }

    pub fn set_register_at(&mut self, reg: u32, new_value: u32) {
        assert!(reg <= 15, "invalid register index: {reg}");
        self.0[reg as usize] = new_value;
    }

    #[must_use]
    pub const fn snapshot(&self) -> [u32; 16] {
        self.0
    }

    pub const fn restore(&mut self, values: [u32; 16]) {
        self.0 = values;
    }
}
