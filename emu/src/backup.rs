//! Save-backup devices: SRAM, Flash (64/128 KiB command machine) and
//! serial EEPROM (512 B / 8 KiB, driven over DMA3).

use serde::{Deserialize, Serialize};

use crate::cartridge::BackupKind;

/// Flash command-machine state. Commands are two-write unlock sequences
/// (0xAA at 0x5555, 0x55 at 0x2AAA) followed by a command byte.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlashState {
    #[default]
    Ready,
    /// Received 0xAA at 0x5555.
    Command1,
    /// Received 0x55 at 0x2AAA; the next write is the command.
    Command2,
    /// Reads return the manufacturer/device id.
    IdMode,
    /// Received 0x80; waiting for the erase unlock sequence.
    EraseCommand,
    /// Erase: received 0xAA at 0x5555.
    EraseCommand1,
    /// Erase: received 0x55 at 0x2AAA; next write picks chip or sector.
    EraseCommand2,
    /// Waiting for the bank number (128 KiB parts only).
    BankSelect,
    /// The next write programs one byte.
    WriteCommand,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Flash {
    memory: Vec<u8>,
    state: FlashState,
    bank: usize,
    banked: bool,
    /// (manufacturer, device) id pair presented in id mode.
    id: (u8, u8),
}

impl Flash {
    fn new(banked: bool) -> Self {
        Self {
            memory: vec![0xFF; if banked { 0x20000 } else { 0x10000 }],
            state: FlashState::Ready,
            bank: 0,
            banked,
            // Sanyo 128 KiB / Panasonic 64 KiB parts.
            id: if banked { (0x62, 0x13) } else { (0x32, 0x1B) },
        }
    }

    fn read(&self, offset: u32) -> u8 {
        let offset = (offset & 0xFFFF) as usize;
        match (self.state, offset) {
            (FlashState::IdMode, 0) => self.id.0,
            (FlashState::IdMode, 1) => self.id.1,
            _ => self.memory[self.bank * 0x10000 + offset],
        }
    }

    fn write(&mut self, offset: u32, value: u8) {
        let offset = (offset & 0xFFFF) as usize;

        match self.state {
            FlashState::Ready | FlashState::IdMode if offset == 0x5555 && value == 0xAA => {
                self.state = FlashState::Command1;
            }
            FlashState::Command1 if offset == 0x2AAA && value == 0x55 => {
                self.state = FlashState::Command2;
            }
            FlashState::Command2 if offset == 0x5555 => match value {
                0x90 => self.state = FlashState::IdMode,
                0xF0 => self.state = FlashState::Ready,
                0x80 => self.state = FlashState::EraseCommand,
                0xA0 => self.state = FlashState::WriteCommand,
                0xB0 if self.banked => self.state = FlashState::BankSelect,
                _ => {
                    logger::log(format!("unknown flash command {value:#04X}"));
                    self.state = FlashState::Ready;
                }
            },
            FlashState::EraseCommand if offset == 0x5555 && value == 0xAA => {
                self.state = FlashState::EraseCommand1;
            }
            FlashState::EraseCommand1 if offset == 0x2AAA && value == 0x55 => {
                self.state = FlashState::EraseCommand2;
            }
            FlashState::EraseCommand2 => {
                if offset == 0x5555 && value == 0x10 {
                    self.memory.fill(0xFF);
                } else if value == 0x30 {
                    let base = self.bank * 0x10000 + (offset & 0xF000);
                    self.memory[base..base + 0x1000].fill(0xFF);
                }
                self.state = FlashState::Ready;
            }
            FlashState::BankSelect if offset == 0 => {
                self.bank = usize::from(value & 1);
                self.state = FlashState::Ready;
            }
            FlashState::WriteCommand => {
                // Programming can only clear bits.
                self.memory[self.bank * 0x10000 + offset] &= value;
                self.state = FlashState::Ready;
            }
            _ => {}
        }
    }
}

/// EEPROM serial protocol state.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum EepromState {
    #[default]
    Idle,
    ReceivingAddress {
        read: bool,
        bits: u32,
        received: u32,
    },
    ReceivingData {
        bits_left: u32,
    },
    AwaitingStopBit {
        then_read: bool,
    },
    /// 4 dummy bits, then 64 data bits.
    Reading {
        bit: u32,
    },
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Eeprom {
    memory: Vec<u8>,
    address_bits: u32,
    state: EepromState,
    address: u32,
    shift: u64,
}

impl Eeprom {
    fn new(address_bits: u32) -> Self {
        Self {
            memory: vec![0xFF; 8 << address_bits],
            address_bits,
            state: EepromState::Idle,
            address: 0,
            shift: 0,
        }
    }

    /// One serial bit from DMA3.
    fn write_bit(&mut self, bit: bool) {
        match self.state {
            EepromState::Idle => {
                if bit {
                    self.shift = 1;
                    self.state = EepromState::ReceivingAddress {
                        read: false,
                        bits: 0,
                        received: 0,
                    };
                }
            }
            EepromState::ReceivingAddress {
                mut read,
                mut bits,
                mut received,
            } => {
                if bits == 0 {
                    // Second request bit: 1 = read, 0 = write.
                    read = bit;
                    bits = 1;
                } else {
                    received = (received << 1) | u32::from(bit);
                    bits += 1;
                }

                if bits == self.address_bits + 1 {
                    self.address = received & ((1 << self.address_bits) - 1);
                    self.state = if read {
                        EepromState::AwaitingStopBit { then_read: true }
                    } else {
                        self.shift = 0;
                        EepromState::ReceivingData { bits_left: 64 }
                    };
                } else {
                    self.state = EepromState::ReceivingAddress {
                        read,
                        bits,
                        received,
                    };
                }
            }
            EepromState::ReceivingData { bits_left } => {
                self.shift = (self.shift << 1) | u64::from(bit);
                if bits_left == 1 {
                    let base = self.address as usize * 8;
                    self.memory[base..base + 8].copy_from_slice(&self.shift.to_be_bytes());
                    self.state = EepromState::AwaitingStopBit { then_read: false };
                } else {
                    self.state = EepromState::ReceivingData {
                        bits_left: bits_left - 1,
                    };
                }
            }
            EepromState::AwaitingStopBit { then_read } => {
                // The trailing zero closes the transaction.
                if !bit {
                    if then_read {
                        let base = self.address as usize * 8;
                        let mut value = [0_u8; 8];
                        value.copy_from_slice(&self.memory[base..base + 8]);
                        self.shift = u64::from_be_bytes(value);
                        self.state = EepromState::Reading { bit: 0 };
                    } else {
                        self.state = EepromState::Idle;
                    }
                }
            }
            EepromState::Reading { .. } => {}
        }
    }

    /// One serial bit back to DMA3.
    fn read_bit(&mut self) -> bool {
        match self.state {
            EepromState::Reading { bit } => {
                let result = if bit < 4 {
                    false
                } else {
                    (self.shift >> (63 - (bit - 4))) & 1 != 0
                };

                self.state = if bit == 67 {
                    EepromState::Idle
                } else {
                    EepromState::Reading { bit: bit + 1 }
                };
                result
            }
            // Ready/busy poll: report ready.
            _ => true,
        }
    }
}

/// The attached backup device.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub enum Backup {
    #[default]
    None,
    Sram(Vec<u8>),
    Flash(Flash),
    Eeprom(Eeprom),
}

impl Backup {
    pub fn new(kind: BackupKind) -> Self {
        match kind {
            BackupKind::None => Self::None,
            BackupKind::Sram => Self::Sram(vec![0xFF; 0x8000]),
            BackupKind::Flash64 => Self::Flash(Flash::new(false)),
            BackupKind::Flash128 => Self::Flash(Flash::new(true)),
            BackupKind::Eeprom512 => Self::Eeprom(Eeprom::new(6)),
            BackupKind::Eeprom8k => Self::Eeprom(Eeprom::new(14)),
        }
    }

    /// Read in the save-memory region (0x0E000000).
    pub fn read_byte(&self, offset: u32) -> u8 {
        match self {
            Self::None => 0xFF,
            Self::Sram(memory) => memory[(offset & 0x7FFF) as usize],
            Self::Flash(flash) => flash.read(offset),
            // EEPROM lives on the ROM bus, not here.
            Self::Eeprom(_) => 0xFF,
        }
    }

    pub fn write_byte(&mut self, offset: u32, value: u8) {
        match self {
            Self::None => {}
            Self::Sram(memory) => memory[(offset & 0x7FFF) as usize] = value,
            Self::Flash(flash) => flash.write(offset, value),
            Self::Eeprom(_) => {}
        }
    }

    /// EEPROM serial access through the upper ROM region.
    pub fn eeprom_write_bit(&mut self, bit: bool) {
        if let Self::Eeprom(eeprom) = self {
            eeprom.write_bit(bit);
        }
    }

    pub fn eeprom_read_bit(&mut self) -> bool {
        match self {
            Self::Eeprom(eeprom) => eeprom.read_bit(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Backup, Eeprom};
    use crate::cartridge::BackupKind;

    #[test]
    fn flash_id_mode() {
        let mut backup = Backup::new(BackupKind::Flash128);

        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x5555, 0x90);

        assert_eq!(backup.read_byte(0), 0x62);
        assert_eq!(backup.read_byte(1), 0x13);

        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x5555, 0xF0);
        assert_eq!(backup.read_byte(0), 0xFF);
    }

    #[test]
    fn flash_write_only_clears_bits() {
        let mut backup = Backup::new(BackupKind::Flash64);

        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x5555, 0xA0);
        backup.write_byte(0x123, 0x0F);
        assert_eq!(backup.read_byte(0x123), 0x0F);

        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x5555, 0xA0);
        backup.write_byte(0x123, 0xF0);
        assert_eq!(backup.read_byte(0x123), 0x00);
    }

    #[test]
    fn flash_sector_erase_restores_ff() {
        let mut backup = Backup::new(BackupKind::Flash64);

        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x5555, 0xA0);
        backup.write_byte(0x1000, 0x00);

        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x5555, 0x80);
        backup.write_byte(0x5555, 0xAA);
        backup.write_byte(0x2AAA, 0x55);
        backup.write_byte(0x1000, 0x30);

        assert_eq!(backup.read_byte(0x1000), 0xFF);
    }

    #[test]
    fn eeprom_write_then_read_round_trip() {
        let mut eeprom = Eeprom::new(6);
        let value: u64 = 0xDEAD_BEEF_0123_4567;

        // Write request: 1, 0, 6 address bits, 64 data bits, stop.
        eeprom.write_bit(true);
        eeprom.write_bit(false);
        for i in (0..6).rev() {
            eeprom.write_bit((5 >> i) & 1 != 0);
        }
        for i in (0..64).rev() {
            eeprom.write_bit((value >> i) & 1 != 0);
        }
        eeprom.write_bit(false);

        // Read request: 1, 1, 6 address bits, stop.
        eeprom.write_bit(true);
        eeprom.write_bit(true);
        for i in (0..6).rev() {
            eeprom.write_bit((5 >> i) & 1 != 0);
        }
        eeprom.write_bit(false);

        let mut result: u64 = 0;
        for _ in 0..4 {
            eeprom.read_bit();
        }
        for _ in 0..64 {
            result = (result << 1) | u64::from(eeprom.read_bit());
        }
        assert_eq!(result, value);
    }
}
