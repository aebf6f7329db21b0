//! Cartridge: raw ROM image, parsed header, save backup and GPIO.

use logger::log;
use serde::{Deserialize, Serialize};

use crate::backup::Backup;
use crate::gpio::Gpio;

/// Save-backup flavor. The kind is out-of-band knowledge shipped with the
/// ROM; the core does not probe for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    None,
    Sram,
    Flash64,
    Flash128,
    Eeprom512,
    Eeprom8k,
}

/// Parsed 192-byte cartridge header. Parsing never fails hard: a bad
/// checksum is logged, because the front-end already chose to run the ROM.
#[derive(Debug, Default, Clone)]
pub struct Header {
    pub title: String,
    pub game_code: String,
    pub checksum_valid: bool,
}

impl Header {
    #[must_use]
    pub fn parse(rom: &[u8]) -> Self {
        if rom.len() < 0xC0 {
            log("ROM too small to carry a header");
            return Self::default();
        }

        let title = String::from_utf8_lossy(&rom[0xA0..0xAC])
            .trim_end_matches('\0')
            .to_string();
        let game_code = String::from_utf8_lossy(&rom[0xAC..0xB0])
            .trim_end_matches('\0')
            .to_string();

        let mut checksum = 0_u8;
        for byte in &rom[0xA0..0xBD] {
            checksum = checksum.wrapping_sub(*byte);
        }
        checksum = checksum.wrapping_sub(0x19);
        let checksum_valid = checksum == rom[0xBD];
        if !checksum_valid {
            log(format!(
                "header checksum mismatch: computed {checksum:#04X}, stored {:#04X}",
                rom[0xBD]
            ));
        }

        Self {
            title,
            game_code,
            checksum_valid,
        }
    }
}

/// A cartridge ready to attach: ≤ 32 MiB of ROM plus its backup kind.
pub struct Rom {
    pub data: Vec<u8>,
    pub backup_kind: BackupKind,
}

impl Rom {
    pub fn new(data: Vec<u8>, backup_kind: BackupKind) -> Self {
        Self { data, backup_kind }
    }
}

/// The attached cartridge as the bus sees it.
#[derive(Default)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub header: Header,
    pub backup: Backup,
    pub gpio: Gpio,
}

impl Cartridge {
    pub fn attach(&mut self, rom: Rom) {
        self.header = Header::parse(&rom.data);
        self.backup = Backup::new(rom.backup_kind);
        self.rom = rom.data;
    }

    /// ROM read with the open-cartridge-bus pattern past the image end:
    /// the address bus value itself comes back.
    pub fn read_rom_byte(&self, offset: u32) -> u8 {
        let offset = offset as usize & 0x01FF_FFFF;
        self.rom.get(offset).copied().unwrap_or_else(|| {
            let half = (offset >> 1) as u16;
            if offset & 1 == 0 {
                half as u8
            } else {
                (half >> 8) as u8
            }
        })
    }

    pub fn uses_eeprom(&self) -> bool {
        matches!(
            self.backup,
            Backup::Eeprom(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{BackupKind, Cartridge, Header, Rom};

    fn rom_with_header(title: &[u8]) -> Vec<u8> {
        let mut rom = vec![0_u8; 0xC0];
        rom[0xA0..0xA0 + title.len()].copy_from_slice(title);

        let mut checksum = 0_u8;
        for byte in &rom[0xA0..0xBD] {
            checksum = checksum.wrapping_sub(*byte);
        }
        rom[0xBD] = checksum.wrapping_sub(0x19);
        rom
    }

    #[test]
    fn parses_title_and_validates_checksum() {
        let rom = rom_with_header(b"TESTCART");
        let header = Header::parse(&rom);

        assert_eq!(header.title, "TESTCART");
        assert!(header.checksum_valid);
    }

    #[test]
    fn detects_bad_checksum() {
        let mut rom = rom_with_header(b"TESTCART");
        rom[0xBD] ^= 0xFF;
        assert!(!Header::parse(&rom).checksum_valid);
    }

    #[test]
    fn out_of_bounds_rom_reads_return_address_bus() {
        let mut cartridge = Cartridge::default();
        cartridge.attach(Rom::new(rom_with_header(b"TESTCART"), BackupKind::None));

        // Offset 0x1000 is past the 0xC0-byte image: reads return the
        // halfword index.
        assert_eq!(cartridge.read_rom_byte(0x1000), 0x00);
        assert_eq!(cartridge.read_rom_byte(0x1001), 0x08);
        assert_eq!(cartridge.read_rom_byte(0x1002), 0x01);
    }
}
