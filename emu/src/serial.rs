//! Serial I/O register block. Link features are not emulated; the
//! registers store what the guest writes so polling loops behave, and a
//! started transfer completes immediately with no remote peer.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Serial {
    pub data32: u32,
    pub multi_data2: u16,
    pub multi_data3: u16,
    pub control: u16,
    pub data8: u16,
    pub mode_select: u16,
}

impl Serial {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        match address {
            0x0400_0120 => self.data32.get_byte(0),
            0x0400_0121 => self.data32.get_byte(1),
            0x0400_0122 => self.data32.get_byte(2),
            0x0400_0123 => self.data32.get_byte(3),
            0x0400_0124 => self.multi_data2.get_byte(0),
            0x0400_0125 => self.multi_data2.get_byte(1),
            0x0400_0126 => self.multi_data3.get_byte(0),
            0x0400_0127 => self.multi_data3.get_byte(1),
            0x0400_0128 => self.control.get_byte(0),
            0x0400_0129 => self.control.get_byte(1),
            0x0400_012A => self.data8.get_byte(0),
            0x0400_012B => self.data8.get_byte(1),
            0x0400_0134 => self.mode_select.get_byte(0),
            0x0400_0135 => self.mode_select.get_byte(1),
            _ => 0,
        }
    }

    /// Returns true when the write completed a transfer with the serial
    /// IRQ requested.
    pub fn write_byte(&mut self, address: u32, value: u8) -> bool {
        match address {
            0x0400_0120 => self.data32.set_byte(0, value),
            0x0400_0121 => self.data32.set_byte(1, value),
            0x0400_0122 => self.data32.set_byte(2, value),
            0x0400_0123 => self.data32.set_byte(3, value),
            0x0400_0124 => self.multi_data2.set_byte(0, value),
            0x0400_0125 => self.multi_data2.set_byte(1, value),
            0x0400_0126 => self.multi_data3.set_byte(0, value),
            0x0400_0127 => self.multi_data3.set_byte(1, value),
            0x0400_0128 => {
                self.control.set_byte(0, value);
                // With no link partner the start bit falls straight back.
                let started = self.control.get_bit(7);
                self.control.set_bit(7, false);
                return started && self.control.get_bit(14);
            }
            0x0400_0129 => self.control.set_byte(1, value),
            0x0400_012A => self.data8.set_byte(0, value),
            0x0400_012B => self.data8.set_byte(1, value),
            0x0400_0134 => self.mode_select.set_byte(0, value),
            0x0400_0135 => self.mode_select.set_byte(1, value),
            _ => {}
        }
        false
    }
}
