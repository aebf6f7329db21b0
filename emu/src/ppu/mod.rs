//! PPU: scanline renderer and V/H timing source.
//!
//! All timing flows through scheduler events. Each of the 228 lines is a
//! 960-cycle draw phase followed by a 272-cycle H-blank; lines 160-227 are
//! V-blank, where the same pair of events keeps firing for timing but no
//! pixels are produced. A visible line is rendered in one shot when its
//! draw phase completes, so mid-line register writes behave as
//! late-latched (windows in particular).

pub mod background;
pub mod compose;
pub mod registers;
pub mod sprite;

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::config::Config;
use crate::ppu::registers::ReferencePoint;
use crate::scheduler::{EventClass, Scheduler};

pub const LCD_WIDTH: usize = 240;
pub const LCD_HEIGHT: usize = 160;

/// Cycles of visible draw per scanline.
const CYCLES_SCANLINE: u64 = 960;
/// Cycles of H-blank per scanline.
const CYCLES_HBLANK: u64 = 272;

/// Lines 160..=227 are V-blank.
const VBLANK_LINE: u16 = 160;
const TOTAL_LINES: u16 = 228;

/// Marker for "nothing rendered here" in the 15-bit scanline buffers.
pub(crate) const TRANSPARENT: u16 = 0x8000;

/// Per-pixel sprite result for one scanline.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub(crate) struct ObjPixel {
    pub color: u16,
    pub priority: u8,
    pub alpha: bool,
    pub window: bool,
    pub mosaic: bool,
}

impl Default for ObjPixel {
    fn default() -> Self {
        Self {
            color: TRANSPARENT,
            priority: 4,
            alpha: false,
            window: false,
            mosaic: false,
        }
    }
}

/// Requests a PPU event hands back to the bus for routing to the IRQ and
/// DMA controllers.
#[derive(Default, Debug, Copy, Clone)]
pub struct PpuSideEffects {
    pub irq_vblank: bool,
    pub irq_hblank: bool,
    pub irq_vcount: bool,
    pub trigger_vblank_dma: bool,
    pub trigger_hblank_dma: bool,
    pub trigger_video_dma: bool,
    /// A full frame is ready in [`Ppu::take_frame`].
    pub frame_complete: bool,
}

pub struct Ppu {
    // Display control and status.
    pub dispcnt: u16,
    pub green_swap: u16,
    pub dispstat: u16,
    pub vcount: u16,

    // Backgrounds.
    pub bgcnt: [u16; 4],
    pub bghofs: [u16; 4],
    pub bgvofs: [u16; 4],
    pub bgpa: [i16; 2],
    pub bgpb: [i16; 2],
    pub bgpc: [i16; 2],
    pub bgpd: [i16; 2],
    pub bgx: [ReferencePoint; 2],
    pub bgy: [ReferencePoint; 2],

    // Windows, mosaic, blending.
    pub winh: [u16; 2],
    pub winv: [u16; 2],
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,

    /// 1 KiB palette, BG first half, OBJ second half.
    pub palette_ram: Vec<u8>,
    /// 96 KiB of tile/bitmap memory.
    pub video_ram: Vec<u8>,
    /// 1 KiB of object attributes.
    pub oam: Vec<u8>,

    // Per-scanline scratch.
    pub(crate) buffer_bg: [[u16; LCD_WIDTH]; 4],
    pub(crate) buffer_obj: [ObjPixel; LCD_WIDTH],
    pub(crate) win_mask: [[bool; LCD_WIDTH]; 2],
    pub(crate) win_active: [bool; 2],

    /// Double-buffered output; the PPU writes `frame[back]`.
    frame: [Vec<u32>; 2],
    back: usize,

    bitmap_invalid_reads_zero: bool,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Ppu {
    pub fn new(config: &Config) -> Self {
        Self {
            dispcnt: 0,
            green_swap: 0,
            dispstat: 0,
            vcount: 0,
            bgcnt: [0; 4],
            bghofs: [0; 4],
            bgvofs: [0; 4],
            bgpa: [0x100; 2],
            bgpb: [0; 2],
            bgpc: [0; 2],
            bgpd: [0x100; 2],
            bgx: [ReferencePoint::default(); 2],
            bgy: [ReferencePoint::default(); 2],
            winh: [0; 2],
            winv: [0; 2],
            winin: 0,
            winout: 0,
            mosaic: 0,
            bldcnt: 0,
            bldalpha: 0,
            bldy: 0,
            palette_ram: vec![0; 0x400],
            video_ram: vec![0; 0x18000],
            oam: vec![0; 0x400],
            buffer_bg: [[TRANSPARENT; LCD_WIDTH]; 4],
            buffer_obj: [ObjPixel::default(); LCD_WIDTH],
            win_mask: [[false; LCD_WIDTH]; 2],
            win_active: [false; 2],
            frame: [
                vec![0; LCD_WIDTH * LCD_HEIGHT],
                vec![0; LCD_WIDTH * LCD_HEIGHT],
            ],
            back: 0,
            bitmap_invalid_reads_zero: config.bitmap_vram_invalid_reads_zero,
        }
    }

    /// Power-on state; arms the first scanline event.
    pub fn reset(&mut self, config: &Config, scheduler: &mut Scheduler) {
        *self = Self::new(config);
        scheduler.add_event(CYCLES_SCANLINE, EventClass::PpuScanline, 0, 0);
    }

    /// The frame completed by the most recent V-blank.
    #[must_use]
    pub fn take_frame(&self) -> &[u32] {
        &self.frame[self.back ^ 1]
    }

    // Display-control accessors.

    pub(crate) fn bg_mode(&self) -> u16 {
        self.dispcnt.get_bits(0..=2)
    }

    pub(crate) fn frame_select(&self) -> usize {
        usize::from(self.dispcnt.get_bit(4))
    }

    pub(crate) fn hblank_oam_access(&self) -> bool {
        self.dispcnt.get_bit(5)
    }

    pub(crate) fn obj_mapping_1d(&self) -> bool {
        self.dispcnt.get_bit(6)
    }

    pub(crate) fn forced_blank(&self) -> bool {
        self.dispcnt.get_bit(7)
    }

    pub(crate) fn layer_enabled(&self, layer: usize) -> bool {
        self.dispcnt.get_bit(8 + layer as u8)
    }

    fn vcount_setting(&self) -> u16 {
        self.dispstat.get_byte(1).into()
    }

    // Event handlers. The returned side effects are routed by the bus.

    /// End of the visible draw phase: render the line, enter H-blank.
    pub fn on_scanline_complete(&mut self, scheduler: &mut Scheduler) -> PpuSideEffects {
        let mut effects = PpuSideEffects::default();

        self.render_scanline();

        self.dispstat.set_bit_on(1);
        if self.dispstat.get_bit(4) {
            effects.irq_hblank = true;
        }
        effects.trigger_hblank_dma = true;
        if (2..162).contains(&self.vcount) {
            effects.trigger_video_dma = true;
        }

        scheduler.add_event(CYCLES_HBLANK, EventClass::PpuHblank, 0, 0);
        effects
    }

    /// End of a visible line's H-blank: advance to the next line.
    pub fn on_hblank_complete(&mut self, scheduler: &mut Scheduler) -> PpuSideEffects {
        let mut effects = PpuSideEffects::default();

        self.dispstat.set_bit_off(1);
        self.accumulate_affine_references();

        self.vcount += 1;
        self.check_vcount(&mut effects);

        if self.vcount == VBLANK_LINE {
            self.dispstat.set_bit_on(0);
            if self.dispstat.get_bit(3) {
                effects.irq_vblank = true;
            }
            effects.trigger_vblank_dma = true;
            effects.frame_complete = true;
            self.back ^= 1;

            scheduler.add_event(CYCLES_SCANLINE, EventClass::PpuVblankScanline, 0, 0);
        } else {
            scheduler.add_event(CYCLES_SCANLINE, EventClass::PpuScanline, 0, 0);
        }

        effects
    }

    /// Draw-equivalent phase of a V-blank line ended.
    pub fn on_vblank_scanline_complete(&mut self, scheduler: &mut Scheduler) -> PpuSideEffects {
        let mut effects = PpuSideEffects::default();

        self.dispstat.set_bit_on(1);
        if self.dispstat.get_bit(4) {
            effects.irq_hblank = true;
        }
        if (2..162).contains(&self.vcount) {
            effects.trigger_video_dma = true;
        }

        scheduler.add_event(CYCLES_HBLANK, EventClass::PpuVblankHblank, 0, 0);
        effects
    }

    /// H-blank of a V-blank line ended.
    pub fn on_vblank_hblank_complete(&mut self, scheduler: &mut Scheduler) -> PpuSideEffects {
        let mut effects = PpuSideEffects::default();

        self.dispstat.set_bit_off(1);
        self.vcount += 1;

        // The V-blank flag drops on the final line of the frame.
        if self.vcount == TOTAL_LINES - 1 {
            self.dispstat.set_bit_off(0);
        }

        if self.vcount == TOTAL_LINES {
            self.vcount = 0;
            for i in 0..2 {
                self.bgx[i].latch_frame();
                self.bgy[i].latch_frame();
            }
            self.check_vcount(&mut effects);
            scheduler.add_event(CYCLES_SCANLINE, EventClass::PpuScanline, 0, 0);
        } else {
            self.check_vcount(&mut effects);
            scheduler.add_event(CYCLES_SCANLINE, EventClass::PpuVblankScanline, 0, 0);
        }

        effects
    }

    fn check_vcount(&mut self, effects: &mut PpuSideEffects) {
        let matched = self.vcount == self.vcount_setting();
        self.dispstat.set_bit(2, matched);
        if matched && self.dispstat.get_bit(5) {
            effects.irq_vcount = true;
        }
    }

    /// Per-line matrix accumulation, plus adoption of pending reference
    /// writes at the upcoming scanline start.
    fn accumulate_affine_references(&mut self) {
        for i in 0..2 {
            self.bgx[i].current += i32::from(self.bgpb[i]);
            self.bgy[i].current += i32::from(self.bgpd[i]);
            self.bgx[i].latch_pending();
            self.bgy[i].latch_pending();
        }
    }

    fn render_scanline(&mut self) {
        let line = usize::from(self.vcount);

        if self.forced_blank() {
            let row = &mut self.frame[self.back][line * LCD_WIDTH..(line + 1) * LCD_WIDTH];
            row.fill(compose::convert_color(0x7FFF));
            return;
        }

        for buffer in &mut self.buffer_bg {
            buffer.fill(TRANSPARENT);
        }
        self.buffer_obj = [ObjPixel::default(); LCD_WIDTH];

        if self.dispcnt.get_bit(13) {
            self.render_window(0);
        }
        if self.dispcnt.get_bit(14) {
            self.render_window(1);
        }

        match self.bg_mode() {
            0 => {
                for id in 0..4 {
                    if self.layer_enabled(id) {
                        self.render_text_bg(id, line);
                    }
                }
            }
            1 => {
                for id in 0..2 {
                    if self.layer_enabled(id) {
                        self.render_text_bg(id, line);
                    }
                }
                if self.layer_enabled(2) {
                    self.render_affine_bg(2);
                }
            }
            2 => {
                for id in 2..4 {
                    if self.layer_enabled(id) {
                        self.render_affine_bg(id);
                    }
                }
            }
            3 | 4 | 5 => {
                if self.layer_enabled(2) {
                    self.render_bitmap_bg();
                }
            }
            mode => logger::log(format!("prohibited background mode {mode}")),
        }

        if self.layer_enabled(4) {
            self.render_sprites(line);
        }

        self.apply_bg_mosaic();
        self.apply_obj_mosaic();
        self.compose(line);
    }

    // Mosaic sizes from the MOSAIC register.

    pub(crate) fn bg_mosaic_h(&self) -> usize {
        usize::from(self.mosaic.get_bits(0..=3)) + 1
    }

    pub(crate) fn bg_mosaic_v(&self) -> usize {
        usize::from(self.mosaic.get_bits(4..=7)) + 1
    }

    pub(crate) fn obj_mosaic_h(&self) -> usize {
        usize::from(self.mosaic.get_bits(8..=11)) + 1
    }

    pub(crate) fn obj_mosaic_v(&self) -> usize {
        usize::from(self.mosaic.get_bits(12..=15)) + 1
    }

    fn apply_bg_mosaic(&mut self) {
        let step = self.bg_mosaic_h();
        if step == 1 {
            return;
        }

        for id in 0..4 {
            if self.bgcnt[id].get_bit(6) {
                for x in 0..LCD_WIDTH {
                    self.buffer_bg[id][x] = self.buffer_bg[id][x - x % step];
                }
            }
        }
    }

    fn apply_obj_mosaic(&mut self) {
        let step = self.obj_mosaic_h();
        if step == 1 {
            return;
        }

        for x in 0..LCD_WIDTH {
            if self.buffer_obj[x].mosaic {
                let source = self.buffer_obj[x - x % step];
                if source.mosaic {
                    self.buffer_obj[x] = source;
                }
            }
        }
    }

    // Palette/VRAM/OAM accessors used by the bus. The byte-write quirks
    // (halfword duplication, ignored OAM byte writes) live in the bus so
    // these stay plain.

    pub(crate) fn read_palette_color(&self, index: usize, palette_bank: usize) -> u16 {
        let offset = (palette_bank * 16 + index) * 2;
        u16::from_le_bytes([self.palette_ram[offset], self.palette_ram[offset + 1]])
    }

    pub(crate) fn backdrop_color(&self) -> u16 {
        self.read_palette_color(0, 0)
    }

    /// VRAM read with the 64K+32K mirroring fold and the bitmap-range
    /// restriction for the upper 16 KiB.
    pub fn vram_read(&self, address: u32) -> Option<u8> {
        let mut offset = (address & 0x1FFFF) as usize;
        if offset >= 0x18000 {
            if offset & 0x4000 == 0 && self.bg_mode() >= 3 {
                return if self.bitmap_invalid_reads_zero {
                    Some(0)
                } else {
                    None
                };
            }
            offset &= !0x8000;
        }
        Some(self.video_ram[offset])
    }

    pub fn vram_write(&mut self, address: u32, value: u8) {
        let mut offset = (address & 0x1FFFF) as usize;
        if offset >= 0x18000 {
            if offset & 0x4000 == 0 && self.bg_mode() >= 3 {
                return;
            }
            offset &= !0x8000;
        }
        self.video_ram[offset] = value;
    }

    /// 8-bit guest write: duplicated into the aligned halfword inside the
    /// writable range, dropped in the OBJ tile area.
    pub fn vram_write_byte(&mut self, address: u32, value: u8) {
        let offset = (address & 0x1FFFF) as usize;
        let limit = if self.bg_mode() >= 3 { 0x14000 } else { 0x10000 };
        if offset < limit {
            self.vram_write(address & !1, value);
            self.vram_write((address & !1) + 1, value);
        }
    }

    /// Raw VRAM byte for the renderer (wrap only, no restriction).
    pub(crate) fn vram_byte(&self, offset: usize) -> u8 {
        self.video_ram[offset % 0x18000]
    }

    // MMIO.

    pub fn read_byte(&self, address: u32) -> u8 {
        match address {
            0x0400_0000 => self.dispcnt.get_byte(0),
            0x0400_0001 => self.dispcnt.get_byte(1),
            0x0400_0002 => self.green_swap.get_byte(0),
            0x0400_0003 => self.green_swap.get_byte(1),
            0x0400_0004 => self.dispstat.get_byte(0),
            0x0400_0005 => self.dispstat.get_byte(1),
            0x0400_0006 => self.vcount.get_byte(0),
            0x0400_0007 => 0,
            0x0400_0008..=0x0400_000F => {
                let id = ((address - 0x0400_0008) / 2) as usize;
                self.bgcnt[id].get_byte((address & 1) as u8)
            }
            0x0400_0048 => self.winin.get_byte(0),
            0x0400_0049 => self.winin.get_byte(1),
            0x0400_004A => self.winout.get_byte(0),
            0x0400_004B => self.winout.get_byte(1),
            0x0400_0050 => self.bldcnt.get_byte(0),
            0x0400_0051 => self.bldcnt.get_byte(1),
            0x0400_0052 => self.bldalpha.get_byte(0),
            0x0400_0053 => self.bldalpha.get_byte(1),
            // The remaining LCD registers are write-only.
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        match address {
            0x0400_0000 => self.dispcnt.set_byte(0, value),
            0x0400_0001 => self.dispcnt.set_byte(1, value),
            0x0400_0002 => self.green_swap.set_byte(0, value),
            0x0400_0003 => self.green_swap.set_byte(1, value),
            // Flag bits 0-2 are hardware-owned.
            0x0400_0004 => self.dispstat.set_byte(0, (value & 0xF8) | (self.dispstat.get_byte(0) & 0x07)),
            0x0400_0005 => self.dispstat.set_byte(1, value),
            0x0400_0006 | 0x0400_0007 => {}
            0x0400_0008..=0x0400_000F => {
                let id = ((address - 0x0400_0008) / 2) as usize;
                self.bgcnt[id].set_byte((address & 1) as u8, value);
            }
            0x0400_0010..=0x0400_001F => {
                let id = ((address - 0x0400_0010) / 4) as usize;
                let reg = if address & 2 == 0 {
                    &mut self.bghofs[id]
                } else {
                    &mut self.bgvofs[id]
                };
                reg.set_byte((address & 1) as u8, value);
                *reg &= 0x1FF;
            }
            0x0400_0020..=0x0400_003F => self.write_affine_byte(address, value),
            0x0400_0040 => self.winh[0].set_byte(0, value),
            0x0400_0041 => self.winh[0].set_byte(1, value),
            0x0400_0042 => self.winh[1].set_byte(0, value),
            0x0400_0043 => self.winh[1].set_byte(1, value),
            0x0400_0044 => self.winv[0].set_byte(0, value),
            0x0400_0045 => self.winv[0].set_byte(1, value),
            0x0400_0046 => self.winv[1].set_byte(0, value),
            0x0400_0047 => self.winv[1].set_byte(1, value),
            0x0400_0048 => self.winin.set_byte(0, value & 0x3F),
            0x0400_0049 => self.winin.set_byte(1, value & 0x3F),
            0x0400_004A => self.winout.set_byte(0, value & 0x3F),
            0x0400_004B => self.winout.set_byte(1, value & 0x3F),
            0x0400_004C => self.mosaic.set_byte(0, value),
            0x0400_004D => self.mosaic.set_byte(1, value),
            0x0400_0050 => self.bldcnt.set_byte(0, value),
            0x0400_0051 => self.bldcnt.set_byte(1, value & 0x3F),
            0x0400_0052 => self.bldalpha.set_byte(0, value & 0x1F),
            0x0400_0053 => self.bldalpha.set_byte(1, value & 0x1F),
            0x0400_0054 => self.bldy.set_byte(0, value & 0x1F),
            0x0400_0055 => self.bldy.set_byte(1, value),
            _ => logger::log(format!("LCD write to unused address {address:#010X}")),
        }
    }

    fn write_affine_byte(&mut self, address: u32, value: u8) {
        let bg = ((address - 0x0400_0020) / 16) as usize;
        let offset = (address - 0x0400_0020) % 16;

        match offset {
            0 | 1 => {
                let mut raw = self.bgpa[bg] as u16;
                raw.set_byte(offset as u8, value);
                self.bgpa[bg] = raw as i16;
            }
            2 | 3 => {
                let mut raw = self.bgpb[bg] as u16;
                raw.set_byte((offset - 2) as u8, value);
                self.bgpb[bg] = raw as i16;
            }
            4 | 5 => {
                let mut raw = self.bgpc[bg] as u16;
                raw.set_byte((offset - 4) as u8, value);
                self.bgpc[bg] = raw as i16;
            }
            6 | 7 => {
                let mut raw = self.bgpd[bg] as u16;
                raw.set_byte((offset - 6) as u8, value);
                self.bgpd[bg] = raw as i16;
            }
            8..=11 => self.bgx[bg].write_byte((offset - 8) as u8, value),
            12..=15 => self.bgy[bg].write_byte((offset - 12) as u8, value),
            _ => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Ppu, VBLANK_LINE};
    use crate::scheduler::{EventClass, Scheduler};

    /// Runs PPU events until `cycles` have elapsed, returning how many
    /// V-blank IRQ requests were produced.
    fn run_ppu(ppu: &mut Ppu, scheduler: &mut Scheduler, cycles: u64) -> usize {
        let mut vblanks = 0;
        scheduler.add_cycles(cycles);
        while let Some(event) = scheduler.pop_expired() {
            let effects = match event.class {
                EventClass::PpuScanline => ppu.on_scanline_complete(scheduler),
                EventClass::PpuHblank => ppu.on_hblank_complete(scheduler),
                EventClass::PpuVblankScanline => ppu.on_vblank_scanline_complete(scheduler),
                EventClass::PpuVblankHblank => ppu.on_vblank_hblank_complete(scheduler),
                _ => continue,
            };
            if effects.irq_vblank {
                vblanks += 1;
            }
        }
        vblanks
    }

    #[test]
    fn frame_timing() {
        let mut scheduler = Scheduler::new();
        let mut ppu = Ppu::default();
        ppu.reset(&crate::config::Config::default(), &mut scheduler);
        ppu.dispstat = 1 << 3; // V-blank IRQ enable

        // One frame is 228 lines of 1232 cycles.
        let vblanks = run_ppu(&mut ppu, &mut scheduler, 228 * 1232);
        assert_eq!(vblanks, 1);
        assert_eq!(ppu.vcount, 0);
    }

    #[test]
    fn vblank_flag_spans_lines_160_to_226() {
        let mut scheduler = Scheduler::new();
        let mut ppu = Ppu::default();
        ppu.reset(&crate::config::Config::default(), &mut scheduler);

        run_ppu(&mut ppu, &mut scheduler, u64::from(VBLANK_LINE) * 1232);
        assert_eq!(ppu.vcount, VBLANK_LINE);
        assert!(ppu.dispstat & 1 != 0);

        // Advance to the last line of the frame.
        run_ppu(&mut ppu, &mut scheduler, 67 * 1232);
        assert_eq!(ppu.vcount, 227);
        assert!(ppu.dispstat & 1 == 0);
    }

    #[test]
    fn vcount_match_flag() {
        let mut scheduler = Scheduler::new();
        let mut ppu = Ppu::default();
        ppu.reset(&crate::config::Config::default(), &mut scheduler);
        ppu.dispstat = 42 << 8;

        run_ppu(&mut ppu, &mut scheduler, 42 * 1232);
        assert_eq!(ppu.vcount, 42);
        assert!(ppu.dispstat & (1 << 2) != 0);

        run_ppu(&mut ppu, &mut scheduler, 1232);
        assert!(ppu.dispstat & (1 << 2) == 0);
    }

    #[test]
    fn bitmap_range_vram_reads_return_zero_by_default() {
        let mut ppu = Ppu::default();
        ppu.dispcnt = 3;
        ppu.video_ram[0x10000] = 0xAB;

        assert_eq!(ppu.vram_read(0x18000), Some(0));
        // Outside bitmap modes the same address folds into the OBJ area.
        ppu.dispcnt = 0;
        assert_eq!(ppu.vram_read(0x18000), Some(0xAB));
    }
}
