//! Window masks, layer composition and color special effects.

use once_cell::sync::Lazy;

use crate::bitwise::Bits;
use crate::ppu::{Ppu, LCD_WIDTH, TRANSPARENT};

/// Layer indices inside window-enable and blend-target bitfields.
const LAYER_OBJ: usize = 4;
const LAYER_BACKDROP: usize = 5;
/// The effect-enable bit of a window descriptor.
const WINDOW_SFX: usize = 5;

/// `BLEND_TABLE[f0][f1][c0][c1] = min(31, (c0*f0 + c1*f1) >> 4)` for 5-bit
/// channels and 1.4 fixed-point factors.
static BLEND_TABLE: Lazy<Box<[[[[u8; 32]; 32]; 17]; 17]>> = Lazy::new(|| {
    let mut table = Box::new([[[[0_u8; 32]; 32]; 17]; 17]);
    for (factor0, plane0) in table.iter_mut().enumerate() {
        for (factor1, plane1) in plane0.iter_mut().enumerate() {
            for (color0, row) in plane1.iter_mut().enumerate() {
                for (color1, out) in row.iter_mut().enumerate() {
                    let blended = (color0 * factor0 + color1 * factor1) >> 4;
                    *out = blended.min(31) as u8;
                }
            }
        }
    }
    table
});

/// Looks up one blended color channel.
pub fn blend_channel(factor0: usize, factor1: usize, color0: usize, color1: usize) -> u8 {
    BLEND_TABLE[factor0.min(16)][factor1.min(16)][color0][color1]
}

/// 15-bit BGR to 32-bit opaque ARGB.
pub fn convert_color(color: u16) -> u32 {
    let r = u32::from(color.get_bits(0..=4));
    let g = u32::from(color.get_bits(5..=9));
    let b = u32::from(color.get_bits(10..=14));

    0xFF00_0000 | (r << 19) | (g << 11) | (b << 3)
}

fn blend_pixel(target1: u16, target2: u16, eva: usize, evb: usize) -> u16 {
    let r = blend_channel(eva, evb, target1.get_bits(0..=4).into(), target2.get_bits(0..=4).into());
    let g = blend_channel(eva, evb, target1.get_bits(5..=9).into(), target2.get_bits(5..=9).into());
    let b = blend_channel(
        eva,
        evb,
        target1.get_bits(10..=14).into(),
        target2.get_bits(10..=14).into(),
    );

    u16::from(r) | (u16::from(g) << 5) | (u16::from(b) << 10)
}

impl Ppu {
    /// Rebuilds window `id`'s scanline mask. The vertical range decides
    /// whether the window covers this line at all; the horizontal range is
    /// re-read every line, which is what makes mid-frame WINxH writes
    /// late-latched. `min > max` wraps around the edge.
    pub(crate) fn render_window(&mut self, id: usize) {
        let line = self.vcount;
        let v_min = self.winv[id].get_byte(1).into();
        let v_max: u16 = self.winv[id].get_byte(0).into();

        self.win_active[id] = if v_min <= v_max {
            line >= v_min && line < v_max
        } else {
            line >= v_min || line < v_max
        };

        if !self.win_active[id] {
            return;
        }

        let h_min = usize::from(self.winh[id].get_byte(1));
        let h_max = usize::from(self.winh[id].get_byte(0));

        if h_min <= h_max {
            for (x, inside) in self.win_mask[id].iter_mut().enumerate() {
                *inside = x >= h_min && x < h_max;
            }
        } else {
            for (x, inside) in self.win_mask[id].iter_mut().enumerate() {
                *inside = x >= h_min || x < h_max;
            }
        }
    }

    /// Window descriptor covering pixel `x`: per-layer enables plus the
    /// effect-enable bit. With no window active everything is allowed.
    fn window_descriptor(&self, x: usize) -> [bool; 6] {
        let win0 = self.dispcnt.get_bit(13);
        let win1 = self.dispcnt.get_bit(14);
        let obj_win = self.dispcnt.get_bit(15);

        if !win0 && !win1 && !obj_win {
            return [true; 6];
        }

        let select = if win0 && self.win_active[0] && self.win_mask[0][x] {
            self.winin & 0x3F
        } else if win1 && self.win_active[1] && self.win_mask[1][x] {
            (self.winin >> 8) & 0x3F
        } else if obj_win && self.buffer_obj[x].window {
            (self.winout >> 8) & 0x3F
        } else {
            self.winout & 0x3F
        };

        let mut descriptor = [false; 6];
        for (layer, enabled) in descriptor.iter_mut().enumerate() {
            *enabled = select.get_bit(layer as u8);
        }
        descriptor
    }

    /// Picks the two topmost visible layers for pixel `x`, returning
    /// `(color, layer)` pairs; backdrop fills whatever remains.
    fn top_two_layers(&self, x: usize, window: &[bool; 6]) -> [(u16, usize); 2] {
        let backdrop = (self.backdrop_color() & 0x7FFF, LAYER_BACKDROP);
        let mut found = [backdrop, backdrop];
        let mut count = 0;

        let obj = &self.buffer_obj[x];
        let obj_visible =
            self.layer_enabled(LAYER_OBJ) && window[LAYER_OBJ] && obj.color != TRANSPARENT;

        for priority in 0..4_u8 {
            // OBJ wins against a background of equal priority.
            if obj_visible && obj.priority == priority {
                found[count] = (obj.color, LAYER_OBJ);
                count += 1;
                if count == 2 {
                    return found;
                }
            }

            for id in 0..4 {
                if self.layer_enabled(id)
                    && window[id]
                    && self.bg_priority(id) == priority
                    && self.buffer_bg[id][x] != TRANSPARENT
                {
                    found[count] = (self.buffer_bg[id][x], id);
                    count += 1;
                    if count == 2 {
                        return found;
                    }
                }
            }
        }

        found
    }

    pub(crate) fn compose(&mut self, line: usize) {
        let eva = usize::from(self.bldalpha.get_bits(0..=4));
        let evb = usize::from(self.bldalpha.get_bits(8..=12));
        let evy = usize::from(self.bldy.get_bits(0..=4));
        let sfx = self.bldcnt.get_bits(6..=7);

        let mut row = [0_u32; LCD_WIDTH];

        for (x, out) in row.iter_mut().enumerate() {
            let window = self.window_descriptor(x);
            let [(mut color1, layer1), (color2, layer2)] = self.top_two_layers(x, &window);

            let is_alpha_obj = layer1 == LAYER_OBJ && self.buffer_obj[x].alpha;
            let is_target1 = self.bldcnt.get_bit(layer1 as u8) || is_alpha_obj;
            let is_target2 = self.bldcnt.get_bit(8 + layer2 as u8);

            // A semi-transparent sprite forces alpha blending onto any
            // second target, ignoring the selected effect.
            let effect = if is_alpha_obj && is_target2 { 1 } else { sfx };

            if window[WINDOW_SFX] && is_target1 {
                match effect {
                    1 if is_target2 => color1 = blend_pixel(color1, color2, eva, evb),
                    2 => color1 = blend_pixel(color1, 0x7FFF, 16 - evy, evy),
                    3 => color1 = blend_pixel(color1, 0, 16 - evy, evy),
                    _ => {}
                }
            }

            *out = convert_color(color1);
        }

        self.write_frame_row(line, &row);
    }

    pub(crate) fn write_frame_row(&mut self, line: usize, row: &[u32; LCD_WIDTH]) {
        let start = line * LCD_WIDTH;
        self.frame[self.back][start..start + LCD_WIDTH].copy_from_slice(row);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{blend_channel, convert_color};

    #[test]
    fn blend_table_matches_reference_formula() {
        for alpha in 0..=16_usize {
            for c0 in 0..32_usize {
                for c1 in 0..32_usize {
                    let expected = ((c0 * (16 - alpha) + c1 * alpha) >> 4).min(31) as u8;
                    assert_eq!(
                        blend_channel(16 - alpha, alpha, c0, c1),
                        expected,
                        "alpha={alpha} c0={c0} c1={c1}"
                    );
                }
            }
        }
    }

    #[test]
    fn blend_saturates_at_31() {
        assert_eq!(blend_channel(16, 16, 31, 31), 31);
    }

    #[test]
    fn color_conversion_layout() {
        assert_eq!(convert_color(0x001F), 0xFFF8_0000); // red
        assert_eq!(convert_color(0x03E0), 0xFF00_F800); // green
        assert_eq!(convert_color(0x7C00), 0xFF00_00F8); // blue
        assert_eq!(convert_color(0x7FFF), 0xFFF8_F8F8); // white
    }
}
