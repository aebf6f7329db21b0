//! System bus: region-dispatched memory access with wait-state
//! accounting, the MMIO byte-dispatch table, open-bus behavior, event
//! routing between devices, and DMA arbitration against the CPU.

use logger::log;

use crate::apu::Apu;
use crate::bitwise::Bits;
use crate::cartridge::{Cartridge, Rom};
use crate::config::Config;
use crate::cpu::{Access, BusInterface};
use crate::dma::{AddressControl, DmaController};
use crate::irq::{InterruptControl, IrqSource};
use crate::keypad::Keypad;
use crate::platform::{AudioSink, InputSource, VideoSink};
use crate::ppu::{Ppu, PpuSideEffects};
use crate::scheduler::{EventClass, Expired, Scheduler};
use crate::serial::Serial;
use crate::timer::Timers;

pub struct Bus {
    pub scheduler: Scheduler,
    pub ppu: Ppu,
    pub apu: Apu,
    pub dma: DmaController,
    pub timers: Timers,
    pub keypad: Keypad,
    pub serial: Serial,
    pub irq: InterruptControl,
    pub cartridge: Cartridge,

    pub(crate) bios: Vec<u8>,
    pub(crate) ewram: Vec<u8>,
    pub(crate) iwram: Vec<u8>,

    pub waitcnt: u16,
    pub postflg: u8,
    pub halted: bool,

    // ROM/SRAM wait states derived from WAITCNT.
    rom_n16: u64,
    rom_s16: u64,
    sram_wait: u64,

    /// Last full word seen on the bus; unmapped reads return it.
    pub(crate) open_bus: u32,
    /// Last word fetched while executing inside the BIOS; BIOS reads from
    /// outside return it instead of the ROM contents.
    pub(crate) bios_latch: u32,
    /// Mirrored from the CPU before every step to gate BIOS reads.
    pub cpu_pc: u32,

    dma_running: bool,

    pub video_sink: Option<Box<dyn VideoSink>>,
    pub audio_sink: Option<Box<dyn AudioSink>>,
    pub input_source: Option<Box<dyn InputSource>>,
    audio_buffer: Vec<(i16, i16)>,

    config: Config,
}

impl Bus {
    pub fn new(config: Config) -> Self {
        let mut bus = Self {
            scheduler: Scheduler::new(),
            ppu: Ppu::new(&config),
            apu: Apu::new(&config),
            dma: DmaController::default(),
            timers: Timers::default(),
            keypad: Keypad::new(),
            serial: Serial::default(),
            irq: InterruptControl::default(),
            cartridge: Cartridge::default(),
            bios: vec![0; 0x4000],
            ewram: vec![0; 0x40000],
            iwram: vec![0; 0x8000],
            waitcnt: 0,
            postflg: 0,
            halted: false,
            rom_n16: 5,
            rom_s16: 3,
            sram_wait: 5,
            open_bus: 0,
            bios_latch: 0,
            cpu_pc: 0,
            dma_running: false,
            video_sink: None,
            audio_sink: None,
            input_source: None,
            audio_buffer: Vec::new(),
            config,
        };

        bus.reset();
        bus
    }

    /// Power-on state for every device. The BIOS image, cartridge and
    /// sinks survive a reset.
    pub fn reset(&mut self) {
        self.scheduler.reset();
        let config = self.config.clone();
        self.ppu.reset(&config, &mut self.scheduler);
        self.apu.reset(&config, &mut self.scheduler);
        self.dma.reset();
        self.timers.reset();
        self.keypad = Keypad::new();
        self.serial.reset();
        self.irq.reset();

        self.ewram.fill(0);
        self.iwram.fill(0);
        self.waitcnt = 0;
        self.postflg = 0;
        self.halted = false;
        self.update_rom_waits();
        self.open_bus = 0;
        self.bios_latch = 0;
        self.cpu_pc = 0;
        self.dma_running = false;
        self.audio_buffer.clear();
    }

    pub fn attach_bios(&mut self, bios: Vec<u8>) {
        self.bios = bios;
    }

    pub fn attach_rom(&mut self, rom: Rom) {
        self.cartridge.attach(rom);
    }

    fn update_rom_waits(&mut self) {
        const NONSEQ: [u64; 4] = [4, 3, 2, 8];

        self.rom_n16 = 1 + NONSEQ[usize::from((self.waitcnt >> 2) & 3)];
        self.rom_s16 = 1 + if self.waitcnt & (1 << 4) != 0 { 1 } else { 2 };
        self.sram_wait = 1 + NONSEQ[usize::from(self.waitcnt & 3)];
    }

    /// Advances the clock and dispatches everything that became due.
    pub(crate) fn tick(&mut self, cycles: u64) {
        self.scheduler.add_cycles(cycles);
        self.drain_events();
    }

    pub(crate) fn drain_events(&mut self) {
        while let Some(event) = self.scheduler.pop_expired() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: Expired) {
        match event.class {
            EventClass::PpuScanline => {
                let effects = self.ppu.on_scanline_complete(&mut self.scheduler);
                self.route_ppu_effects(effects);
            }
            EventClass::PpuHblank => {
                let effects = self.ppu.on_hblank_complete(&mut self.scheduler);
                self.route_ppu_effects(effects);
            }
            EventClass::PpuVblankScanline => {
                let effects = self.ppu.on_vblank_scanline_complete(&mut self.scheduler);
                self.route_ppu_effects(effects);
            }
            EventClass::PpuVblankHblank => {
                let effects = self.ppu.on_vblank_hblank_complete(&mut self.scheduler);
                self.route_ppu_effects(effects);
            }
            EventClass::ApuSequencer => self.apu.on_sequencer_event(&mut self.scheduler),
            EventClass::ApuMixer => {
                let sample = self.apu.on_mixer_event(&mut self.scheduler);
                self.audio_buffer.push(sample);
            }
            EventClass::ApuPsgGenerate => {
                self.apu
                    .on_generate_event(event.user_data as usize, &mut self.scheduler);
            }
            EventClass::IrqSync => self.irq.on_sync_event(event.user_data),
            EventClass::TimerOverflow => {
                let outcome = self.timers.handle_overflow(event.user_data, &mut self.scheduler);
                for id in 0..4 {
                    if outcome.request_irq[id] {
                        self.irq.raise(IrqSource::Timer(id), &mut self.scheduler);
                    }
                    if outcome.overflowed[id] && id < 2 {
                        for address in self.apu.on_timer_overflow(id).into_iter().flatten() {
                            self.dma.request_fifo(address);
                        }
                    }
                }
            }
            EventClass::DmaActivate => self.dma.on_activate_event(event.user_data as usize),
            EventClass::Generic => {}
            EventClass::Sentinel => unreachable!("sentinel events never dispatch"),
        }
    }

    fn route_ppu_effects(&mut self, effects: PpuSideEffects) {
        if effects.irq_vblank {
            self.irq.raise(IrqSource::VBlank, &mut self.scheduler);
        }
        if effects.irq_hblank {
            self.irq.raise(IrqSource::HBlank, &mut self.scheduler);
        }
        if effects.irq_vcount {
            self.irq.raise(IrqSource::VCount, &mut self.scheduler);
        }
        if effects.trigger_vblank_dma {
            self.dma.trigger_vblank();
        }
        if effects.trigger_hblank_dma {
            self.dma.trigger_hblank();
        }
        if effects.trigger_video_dma {
            self.dma.trigger_video_capture();
        }

        if effects.frame_complete {
            if let Some(sink) = &mut self.video_sink {
                sink.push_frame(self.ppu.take_frame());
            }

            if !self.audio_buffer.is_empty() {
                let sample_rate = self.apu.sample_rate();
                if let Some(sink) = &mut self.audio_sink {
                    sink.push_samples(&self.audio_buffer, sample_rate);
                }
                self.audio_buffer.clear();
            }

            if let Some(source) = &mut self.input_source {
                let pressed = source.poll();
                self.keypad.set_pressed_mask(pressed);
            }
            if self.keypad.interrupt_requested() {
                self.irq.raise(IrqSource::Keypad, &mut self.scheduler);
            }
        }
    }

    // Wait states. Regions with a 16-bit data path pay twice for words.

    fn wait_16(&self, region: u32, access: Access) -> u64 {
        match region {
            0x2 => 3,
            0x8 | 0x9 => match access {
                Access::NonSequential => self.rom_n16,
                Access::Sequential => self.rom_s16,
            },
            0xE => self.sram_wait,
            _ => 1,
        }
    }

    fn wait_32(&self, region: u32, access: Access) -> u64 {
        match region {
            0x2 => 6,
            0x5 | 0x6 => 2,
            0x8 | 0x9 => self.wait_16(region, access) + self.rom_s16,
            0xE => self.sram_wait,
            _ => 1,
        }
    }

    // Raw region access, no cycle accounting.

    fn read_raw_byte(&mut self, address: u32) -> u8 {
        match (address >> 24) & 0xF {
            0x0 => {
                if address >= 0x0000_4000 {
                    return self.open_bus_byte(address);
                }
                if self.cpu_pc < 0x4000 {
                    self.bios[address as usize]
                } else {
                    // Locked: the last fetched BIOS word echoes back.
                    (self.bios_latch >> ((address & 3) * 8)) as u8
                }
            }
            0x2 => self.ewram[(address as usize) & 0x3_FFFF],
            0x3 => self.iwram[(address as usize) & 0x7FFF],
            0x4 => self.mmio_read(address),
            0x5 => self.ppu.palette_ram[(address as usize) & 0x3FF],
            0x6 => match self.ppu.vram_read(address) {
                Some(value) => value,
                None => self.open_bus_byte(address),
            },
            0x7 => self.ppu.oam[(address as usize) & 0x3FF],
            0x8 | 0x9 => {
                let offset = address & 0x01FF_FFFF;
                if (0xC4..0xCA).contains(&offset) && self.cartridge.gpio.is_readable() {
                    self.cartridge.gpio.read_byte(offset)
                } else {
                    self.cartridge.read_rom_byte(offset)
                }
            }
            0xD if self.cartridge.uses_eeprom() => {
                u8::from(self.cartridge.backup.eeprom_read_bit())
            }
            0xE => self.cartridge.backup.read_byte(address & 0xFFFF),
            _ => self.open_bus_byte(address),
        }
    }

    fn write_raw_byte(&mut self, address: u32, value: u8) {
        match (address >> 24) & 0xF {
            0x0 => {}
            0x2 => self.ewram[(address as usize) & 0x3_FFFF] = value,
            0x3 => self.iwram[(address as usize) & 0x7FFF] = value,
            0x4 => self.mmio_write(address, value),
            // 8-bit palette writes duplicate into the full halfword.
            0x5 => {
                let offset = (address as usize) & 0x3FE;
                self.ppu.palette_ram[offset] = value;
                self.ppu.palette_ram[offset + 1] = value;
            }
            0x6 => self.ppu.vram_write_byte(address, value),
            // 8-bit OAM writes are ignored by the hardware.
            0x7 => {}
            0x8 | 0x9 => {
                let offset = address & 0x01FF_FFFF;
                if (0xC4..0xCA).contains(&offset) {
                    self.cartridge.gpio.write_byte(offset, value);
                } else {
                    log(format!("write to ROM address {address:#010X}"));
                }
            }
            0xD if self.cartridge.uses_eeprom() => {
                self.cartridge.backup.eeprom_write_bit(value & 1 != 0);
            }
            0xE => self.cartridge.backup.write_byte(address & 0xFFFF, value),
            _ => log(format!("write to unmapped address {address:#010X}")),
        }
    }

    fn open_bus_byte(&self, address: u32) -> u8 {
        (self.open_bus >> ((address & 3) * 8)) as u8
    }

    /// Halfword-granular raw access used by both the CPU and DMA after
    /// wait states were paid. Region 0x5/0x7 (palette/OAM) byte pairs go
    /// through the byte path unchanged; region 0xD is the EEPROM serial
    /// line and must see exactly one bit per transfer.
    fn read_raw_half(&mut self, address: u32) -> u16 {
        if (address >> 24) & 0xF == 0xD && self.cartridge.uses_eeprom() {
            return u16::from(self.cartridge.backup.eeprom_read_bit());
        }

        let lo = self.read_raw_byte(address);
        let hi = self.read_raw_byte(address + 1);
        u16::from_le_bytes([lo, hi])
    }

    fn write_raw_half(&mut self, address: u32, value: u16) {
        if (address >> 24) & 0xF == 0xD && self.cartridge.uses_eeprom() {
            self.cartridge.backup.eeprom_write_bit(value & 1 != 0);
            return;
        }

        // OAM ignores byte writes but accepts halfwords.
        if (address >> 24) & 0xF == 0x7 {
            let offset = (address as usize) & 0x3FE;
            self.ppu.oam[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            return;
        }
        // Halfword palette/VRAM writes must not duplicate like byte
        // writes do.
        if (address >> 24) & 0xF == 0x5 {
            let offset = (address as usize) & 0x3FE;
            self.ppu.palette_ram[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
            return;
        }
        if (address >> 24) & 0xF == 0x6 {
            let [lo, hi] = value.to_le_bytes();
            self.ppu.vram_write(address, lo);
            self.ppu.vram_write(address + 1, hi);
            return;
        }

        let [lo, hi] = value.to_le_bytes();
        self.write_raw_byte(address, lo);
        self.write_raw_byte(address + 1, hi);
    }

    // Shared CPU/DMA access paths: pay wait states, then touch the bus.

    pub(crate) fn bus_read_half(&mut self, address: u32, access: Access) -> u16 {
        let region = (address >> 24) & 0xF;
        self.tick(self.wait_16(region, access));

        let value = self.read_raw_half(address & !1);
        self.open_bus = u32::from(value) * 0x0001_0001;
        value
    }

    pub(crate) fn bus_read_word(&mut self, address: u32, access: Access) -> u32 {
        let region = (address >> 24) & 0xF;
        self.tick(self.wait_32(region, access));

        let address = address & !3;
        let lo = self.read_raw_half(address);
        let hi = self.read_raw_half(address + 2);
        let value = u32::from(lo) | (u32::from(hi) << 16);

        self.open_bus = value;
        if address < 0x4000 && self.cpu_pc < 0x4000 {
            self.bios_latch = value;
        }
        value
    }

    pub(crate) fn bus_write_half(&mut self, address: u32, value: u16, access: Access) {
        let region = (address >> 24) & 0xF;
        self.tick(self.wait_16(region, access));
        self.write_raw_half(address & !1, value);
    }

    pub(crate) fn bus_write_word(&mut self, address: u32, value: u32, access: Access) {
        let region = (address >> 24) & 0xF;
        self.tick(self.wait_32(region, access));

        let address = address & !3;
        self.write_raw_half(address, value as u16);
        self.write_raw_half(address + 2, (value >> 16) as u16);
    }

    // DMA arbitration: the CPU stalls at its next access boundary while
    // pending channels run to completion.

    fn check_dma(&mut self) {
        if self.dma_running {
            return;
        }

        while let Some(id) = self.dma.highest_priority_pending() {
            self.dma_running = true;
            self.run_dma_channel(id);
            self.dma_running = false;
        }
    }

    fn run_dma_channel(&mut self, id: usize) {
        let channel = &self.dma.channels[id];
        let fifo_mode = channel.fifo_mode;
        let word = channel.word_transfer() || fifo_mode;
        let count = if fifo_mode { 4 } else { channel.internal_count };
        let source_control = channel.source_control();
        let dest_control = if fifo_mode {
            AddressControl::Fixed
        } else {
            channel.dest_control()
        };
        let mut source = channel.internal_source;
        let mut dest = channel.internal_dest;

        let step: u32 = if word { 4 } else { 2 };
        let advance = |address: u32, control: AddressControl| match control {
            AddressControl::Increment | AddressControl::IncrementReload => {
                address.wrapping_add(step)
            }
            AddressControl::Decrement => address.wrapping_sub(step),
            AddressControl::Fixed => address,
        };

        // Channel startup overhead.
        self.tick(2);

        let mut access = Access::NonSequential;
        for _ in 0..count {
            if word {
                let value = self.bus_read_word(source, access);
                self.bus_write_word(dest, value, access);
            } else {
                let value = self.bus_read_half(source, access);
                self.bus_write_half(dest, value, access);
            }

            source = advance(source, source_control);
            dest = advance(dest, dest_control);
            access = Access::Sequential;
        }

        let channel = &mut self.dma.channels[id];
        channel.internal_source = source;
        channel.internal_dest = dest;

        if self.dma.complete(id) {
            self.irq.raise(IrqSource::Dma(id), &mut self.scheduler);
        }
    }

    // MMIO: one dispatch table over 8-bit registers. Wider accesses are
    // decomposed by the raw halfword/word paths above, preserving
    // side-effect order.

    fn mmio_read(&mut self, address: u32) -> u8 {
        match address {
            0x0400_0000..=0x0400_005F => self.ppu.read_byte(address),
            0x0400_0060..=0x0400_00AF => self.apu.read_byte(address),
            0x0400_00B0..=0x0400_00DF => self.dma.read_byte(address),
            0x0400_0100..=0x0400_010F => self.timers.read_byte(address, &self.scheduler),
            0x0400_0120..=0x0400_012F | 0x0400_0134..=0x0400_015F => {
                self.serial.read_byte(address)
            }
            0x0400_0130..=0x0400_0133 => self.keypad.read_byte(address),
            0x0400_0200..=0x0400_0203 | 0x0400_0208..=0x0400_0209 => self.irq.read_byte(address),
            0x0400_0204 => self.waitcnt.get_byte(0),
            0x0400_0205 => self.waitcnt.get_byte(1),
            0x0400_0300 => self.postflg,
            _ => {
                log(format!("read on unused I/O address {address:#010X}"));
                0
            }
        }
    }

    fn mmio_write(&mut self, address: u32, value: u8) {
        match address {
            0x0400_0000..=0x0400_005F => self.ppu.write_byte(address, value),
            0x0400_0060..=0x0400_00AF => {
                self.apu.write_byte(address, value, &mut self.scheduler);
            }
            0x0400_00B0..=0x0400_00DF => {
                self.dma.write_byte(address, value, &mut self.scheduler);
                // An immediate channel enabled just now still waits for
                // its activation event; nothing to do here.
            }
            0x0400_0100..=0x0400_010F => {
                self.timers.write_byte(address, value, &mut self.scheduler);
            }
            0x0400_0120..=0x0400_012F | 0x0400_0134..=0x0400_015F => {
                if self.serial.write_byte(address, value) {
                    self.irq.raise(IrqSource::Serial, &mut self.scheduler);
                }
            }
            0x0400_0130..=0x0400_0133 => self.keypad.write_byte(address, value),
            0x0400_0200..=0x0400_0203 | 0x0400_0208..=0x0400_0209 => {
                self.irq.write_byte(address, value, &mut self.scheduler);
            }
            0x0400_0204 => {
                self.waitcnt.set_byte(0, value);
                self.update_rom_waits();
            }
            0x0400_0205 => {
                self.waitcnt.set_byte(1, value);
                self.update_rom_waits();
            }
            0x0400_0300 => self.postflg = value & 1,
            0x0400_0301 => {
                if value & 0x80 != 0 {
                    log("STOP mode requested; treating it as halt");
                }
                self.halted = true;
            }
            _ => log(format!("write on unused I/O address {address:#010X}")),
        }
    }
}

impl BusInterface for Bus {
    fn read_byte(&mut self, address: u32, access: Access) -> u8 {
        self.check_dma();
        let region = (address >> 24) & 0xF;
        self.tick(self.wait_16(region, access));
        self.read_raw_byte(address)
    }

    fn read_half(&mut self, address: u32, access: Access) -> u16 {
        self.check_dma();
        self.bus_read_half(address, access)
    }

    fn read_word(&mut self, address: u32, access: Access) -> u32 {
        self.check_dma();
        self.bus_read_word(address, access)
    }

    fn write_byte(&mut self, address: u32, value: u8, access: Access) {
        self.check_dma();
        let region = (address >> 24) & 0xF;
        self.tick(self.wait_16(region, access));
        self.write_raw_byte(address, value);
    }

    fn write_half(&mut self, address: u32, value: u16, access: Access) {
        self.check_dma();
        self.bus_write_half(address, value, access);
    }

    fn write_word(&mut self, address: u32, value: u32, access: Access) {
        self.check_dma();
        self.bus_write_word(address, value, access);
    }

    fn idle(&mut self) {
        self.check_dma();
        self.tick(1);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Bus;
    use crate::cartridge::{BackupKind, Rom};
    use crate::config::Config;
    use crate::cpu::{Access, BusInterface};

    fn bus() -> Bus {
        Bus::new(Config::default())
    }

    #[test]
    fn ewram_round_trip_with_wait_states() {
        let mut bus = bus();
        let before = bus.scheduler.now();

        bus.write_word(0x0200_0000, 0xCAFE_BABE, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 6);

        let value = bus.read_word(0x0200_0000, Access::NonSequential);
        assert_eq!(value, 0xCAFE_BABE);
    }

    #[test]
    fn rom_wait_states_default_to_5_and_8() {
        let mut bus = bus();
        bus.attach_rom(Rom::new(vec![0xAB; 0x100], BackupKind::None));

        let before = bus.scheduler.now();
        bus.read_half(0x0800_0000, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 5);

        let before = bus.scheduler.now();
        bus.read_half(0x0800_0002, Access::Sequential);
        assert_eq!(bus.scheduler.now() - before, 3);

        let before = bus.scheduler.now();
        bus.read_word(0x0800_0004, Access::NonSequential);
        assert_eq!(bus.scheduler.now() - before, 8);
    }

    #[test]
    fn unmapped_reads_return_open_bus() {
        let mut bus = bus();
        bus.write_word(0x0200_0000, 0x1234_5678, Access::NonSequential);
        bus.read_word(0x0200_0000, Access::NonSequential);

        let value = bus.read_word(0x0B00_0000, Access::NonSequential);
        assert_eq!(value, 0x1234_5678);
    }

    #[test]
    fn palette_byte_writes_duplicate() {
        let mut bus = bus();
        bus.write_byte(0x0500_0001, 0x7C, Access::NonSequential);

        assert_eq!(bus.ppu.palette_ram[0], 0x7C);
        assert_eq!(bus.ppu.palette_ram[1], 0x7C);
    }

    #[test]
    fn oam_ignores_byte_writes_but_takes_halfwords() {
        let mut bus = bus();

        bus.write_byte(0x0700_0000, 0xAA, Access::NonSequential);
        assert_eq!(bus.ppu.oam[0], 0);

        bus.write_half(0x0700_0000, 0xBEEF, Access::NonSequential);
        assert_eq!(bus.ppu.oam[0], 0xEF);
        assert_eq!(bus.ppu.oam[1], 0xBE);
    }

    #[test]
    fn bios_reads_lock_outside_bios_execution() {
        let mut bus = bus();
        bus.bios[0..4].copy_from_slice(&0xDEAD_BEEF_u32.to_le_bytes());

        bus.cpu_pc = 0x0000_0100;
        let fetched = bus.read_word(0x0000_0000, Access::NonSequential);
        assert_eq!(fetched, 0xDEAD_BEEF);

        // From cartridge space the BIOS echoes the last fetched word.
        bus.cpu_pc = 0x0800_0000;
        let locked = bus.read_word(0x0000_0000, Access::NonSequential);
        assert_eq!(locked, 0xDEAD_BEEF);

        bus.bios[0] = 0x00;
        let still_locked = bus.read_word(0x0000_0000, Access::NonSequential);
        assert_eq!(still_locked, 0xDEAD_BEEF);
    }

    #[test]
    fn immediate_dma_stalls_cpu_and_copies() {
        let mut bus = bus();
        bus.attach_rom(Rom::new((0..64).collect(), BackupKind::None));

        // DMA3: ROM -> VRAM, 8 halfwords, immediate.
        let writes: [(u32, u8); 12] = [
            (0x0400_00D4, 0x00),
            (0x0400_00D5, 0x00),
            (0x0400_00D6, 0x00),
            (0x0400_00D7, 0x08),
            (0x0400_00D8, 0x00),
            (0x0400_00D9, 0x00),
            (0x0400_00DA, 0x00),
            (0x0400_00DB, 0x06),
            (0x0400_00DC, 0x08),
            (0x0400_00DD, 0x00),
            (0x0400_00DE, 0x00),
            (0x0400_00DF, 0x80),
        ];
        for (address, value) in writes {
            bus.write_byte(address, value, Access::NonSequential);
        }

        // The activation event is 2 cycles out; the next access runs it.
        bus.idle();
        bus.idle();
        bus.idle();

        assert_eq!(&bus.ppu.video_ram[0..16], &(0..16).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn timer_overflow_raises_irq_through_the_bus() {
        let mut bus = bus();

        // IME + IE timer 0.
        bus.write_byte(0x0400_0208, 0x01, Access::NonSequential);
        bus.write_byte(0x0400_0200, 0x08, Access::NonSequential);

        // Timer 0: reload 0xFFFE, IRQ enable, start.
        bus.write_byte(0x0400_0100, 0xFE, Access::NonSequential);
        bus.write_byte(0x0400_0101, 0xFF, Access::NonSequential);
        bus.write_byte(0x0400_0102, 0xC0, Access::NonSequential);

        for _ in 0..10 {
            bus.idle();
        }

        assert!(bus.irq.interrupt_request & 0x08 != 0);
        assert!(bus.irq.irq_line);
    }
}
