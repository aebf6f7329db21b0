//! Channel 4: LFSR noise.

use serde::{Deserialize, Serialize};

use crate::apu::sequencer::{LengthCounter, Sequencer};
use crate::bitwise::Bits;

/// Feedback taps for the 15-bit and 7-bit register widths.
const LFSR_XOR: [u16; 2] = [0x6000, 0x60];

/// Seeds loaded on restart.
const LFSR_INIT: [u16; 2] = [0x4000, 0x0040];

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseChannel {
    pub sequencer: Sequencer,

    pub frequency_shift: u8,
    pub frequency_ratio: u8,
    /// 0 = 15-bit register, 1 = 7-bit.
    pub width: usize,
    pub dac_enable: bool,

    pub lfsr: u16,
    pub sample: i16,
    /// Shifts folded into one generator event because the mixer samples
    /// slower than the LFSR advances.
    skip_count: u32,
}

impl Default for NoiseChannel {
    fn default() -> Self {
        Self {
            sequencer: Sequencer {
                length: LengthCounter {
                    default_length: 64,
                    ..Default::default()
                },
                ..Default::default()
            },
            frequency_shift: 0,
            frequency_ratio: 0,
            width: 0,
            dac_enable: false,
            lfsr: 0,
            sample: 0,
            skip_count: 0,
        }
    }
}

impl NoiseChannel {
    /// Cycles between LFSR shifts.
    pub fn synthesis_interval(&self) -> u64 {
        let shift = u64::from(self.frequency_shift.min(13));
        if self.frequency_ratio == 0 {
            8 << shift
        } else {
            (16 * u64::from(self.frequency_ratio)) << shift
        }
    }

    fn shift_lfsr(&mut self) -> bool {
        let carry = self.lfsr & 1 != 0;
        self.lfsr >>= 1;
        if carry {
            self.lfsr ^= LFSR_XOR[self.width];
        }
        carry
    }

    /// One generator event. Returns the interval until the next one,
    /// folding shifts the mixer would never observe into `skip_count`.
    pub fn generate(&mut self, mixer_interval: u64) -> u64 {
        if !self.sequencer.enabled || !self.dac_enable {
            self.sample = 0;
            return self.synthesis_interval().max(mixer_interval);
        }

        let carry = self.shift_lfsr();
        let amplitude: i16 = if carry { 8 } else { -8 };
        self.sample = amplitude * i16::from(self.sequencer.envelope.current_volume);

        for _ in 0..self.skip_count {
            self.shift_lfsr();
        }

        let mut interval = self.synthesis_interval();
        if interval < mixer_interval {
            self.skip_count = (mixer_interval / interval - 1) as u32;
            interval = mixer_interval;
        } else {
            self.skip_count = 0;
        }

        interval
    }

    pub fn read(&self, offset: u32) -> u8 {
        match offset {
            1 => {
                let envelope = &self.sequencer.envelope;
                envelope.divider
                    | (u8::from(matches!(
                        envelope.direction,
                        crate::apu::sequencer::Direction::Increment
                    )) << 3)
                    | (envelope.initial_volume << 4)
            }
            4 => self.frequency_ratio | ((self.width as u8) << 3) | (self.frequency_shift << 4),
            5 => {
                if self.sequencer.length.enabled {
                    0x40
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    /// Returns true when the trigger bit armed a previously-idle channel.
    pub fn write(&mut self, offset: u32, value: u8, zombie_mode: bool) -> bool {
        match offset {
            0 => self.sequencer.length.length = u32::from(64 - (value & 63)),
            1 => {
                let envelope = &mut self.sequencer.envelope;
                let divider_old = envelope.divider;
                let direction_old = envelope.direction;

                envelope.divider = value & 7;
                envelope.direction = if value.get_bit(3) {
                    crate::apu::sequencer::Direction::Increment
                } else {
                    crate::apu::sequencer::Direction::Decrement
                };
                envelope.initial_volume = value >> 4;

                self.dac_enable = value & 0xF8 != 0;
                if !self.dac_enable {
                    self.sequencer.enabled = false;
                }

                if zombie_mode {
                    let envelope = &mut self.sequencer.envelope;
                    if divider_old == 0 && envelope.active {
                        envelope.current_volume = envelope.current_volume.wrapping_add(1);
                    } else if direction_old == crate::apu::sequencer::Direction::Decrement {
                        envelope.current_volume = envelope.current_volume.wrapping_add(2);
                    }
                    if direction_old != envelope.direction {
                        envelope.current_volume = 16_u8.wrapping_sub(envelope.current_volume);
                    }
                    envelope.current_volume &= 15;
                }
            }
            4 => {
                self.frequency_ratio = value & 7;
                self.width = usize::from(value.get_bit(3));
                self.frequency_shift = value >> 4;
            }
            5 => {
                self.sequencer.length.enabled = value.get_bit(6);

                if self.dac_enable && value.get_bit(7) {
                    let was_enabled = self.sequencer.enabled;
                    self.skip_count = 0;
                    self.lfsr = LFSR_INIT[self.width];
                    self.sequencer.restart();
                    self.sequencer.enabled = true;
                    return !was_enabled;
                }
            }
            _ => {}
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{NoiseChannel, LFSR_INIT};

    fn armed(width_bit: u8) -> NoiseChannel {
        let mut channel = NoiseChannel::default();
        channel.write(1, 0xF0, true); // DAC on, volume 15
        channel.write(4, width_bit << 3, true);
        channel.write(5, 0x80, true); // trigger
        channel
    }

    #[test]
    fn restart_reseeds_lfsr() {
        assert_eq!(armed(0).lfsr, 0x4000);
        assert_eq!(armed(1).lfsr, 0x0040);
    }

    #[test]
    fn lfsr_period_reproduces_seed() {
        // A maximal-length 15-bit LFSR returns to its seed after
        // 2^15 - 1 shifts (7-bit: 2^7 - 1).
        for (width, bits) in [(0_usize, 15_u32), (1, 7)] {
            let mut channel = armed(width as u8);
            let seed = LFSR_INIT[width];

            let period = (1 << bits) - 1;
            for _ in 0..period {
                channel.generate(1);
            }
            assert_eq!(channel.lfsr, seed, "width {width}");
        }
    }

    #[test]
    fn output_switches_sign() {
        let mut channel = armed(0);

        let mut signs = std::collections::HashSet::new();
        for _ in 0..32 {
            channel.generate(1);
            signs.insert(channel.sample.signum());
        }
        assert!(signs.contains(&1));
        assert!(signs.contains(&-1));
        assert!(channel.lfsr != 0x4000 || signs.len() > 1);
    }

    #[test]
    fn synthesis_interval_formula() {
        let mut channel = NoiseChannel::default();
        channel.write(4, 0x00, true);
        assert_eq!(channel.synthesis_interval(), 8);

        // ratio 3, shift 2 -> 16*3 << 2
        channel.write(4, 0x23, true);
        assert_eq!(channel.synthesis_interval(), 192);
    }
}
