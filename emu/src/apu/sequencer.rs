//! Frame-sequencer state shared by every PSG channel.
//!
//! The channels are plain structs embedding a [`Sequencer`] subrecord
//! (length counter, envelope, sweep) instead of deriving from a common
//! base; the APU ticks the subrecords and each channel interprets the
//! result.

use serde::{Deserialize, Serialize};

/// System cycles per 512 Hz sequencer step.
pub const CYCLES_PER_STEP: u64 = 16_777_216 / 512;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Decrement,
    Increment,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Decrement
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub direction: Direction,
    pub initial_volume: u8,
    pub current_volume: u8,
    pub divider: u8,
    pub active: bool,
    step: u8,
}

impl Envelope {
    pub fn restart(&mut self) {
        self.step = self.divider;
        self.current_volume = self.initial_volume;
        self.active = true;
    }

    pub fn tick(&mut self) {
        self.step = self.step.wrapping_sub(1);
        if self.step != 0 {
            return;
        }
        self.step = self.divider;

        if self.active && self.divider != 0 {
            match self.direction {
                Direction::Increment => {
                    if self.current_volume != 15 {
                        self.current_volume += 1;
                    } else {
                        self.active = false;
                    }
                }
                Direction::Decrement => {
                    if self.current_volume != 0 {
                        self.current_volume -= 1;
                    } else {
                        self.active = false;
                    }
                }
            }
        }
    }
}

/// Sweep polarity. Kept separate from [`Direction`] because the register
/// encodings disagree: envelope bit 3 set means increment, sweep bit 3 set
/// means subtract.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepDirection {
    Additive,
    Subtractive,
}

impl Default for SweepDirection {
    fn default() -> Self {
        Self::Additive
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub direction: SweepDirection,
    pub initial_freq: u32,
    pub current_freq: u32,
    pub shadow_freq: u32,
    pub divider: u8,
    pub shift: u8,
    pub active: bool,
    /// Set when a sweep calculation overflowed and killed the channel.
    pub channel_disabled: bool,
    step: u8,
}

impl Sweep {
    pub fn restart(&mut self) {
        self.channel_disabled = false;
        self.current_freq = self.initial_freq;
        self.shadow_freq = self.initial_freq;
        self.step = self.divider;
        self.active = self.shift != 0 || self.divider != 0;
    }

    pub fn tick(&mut self) {
        if !self.active {
            return;
        }

        self.step = self.step.wrapping_sub(1);
        if self.step != 0 {
            return;
        }
        self.step = self.divider;

        if self.divider == 0 || self.shift == 0 {
            return;
        }

        let offset = self.shadow_freq >> self.shift;
        let new_freq = match self.direction {
            SweepDirection::Additive => self.shadow_freq + offset,
            SweepDirection::Subtractive => self.shadow_freq.wrapping_sub(offset),
        };

        if new_freq >= 2048 {
            self.channel_disabled = true;
        } else {
            self.shadow_freq = new_freq;
            self.current_freq = new_freq;
        }
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthCounter {
    pub enabled: bool,
    pub length: u32,
    pub default_length: u32,
}

impl LengthCounter {
    pub fn tick(&mut self) -> bool {
        if self.enabled && self.length > 0 {
            self.length -= 1;
            return self.length == 0;
        }
        false
    }
}

/// The common subrecord every PSG channel carries.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequencer {
    pub length: LengthCounter,
    pub envelope: Envelope,
    pub sweep: Sweep,
    /// Channel is producing output (trigger happened, nothing killed it).
    pub enabled: bool,
    pub(crate) step: u8,
}

impl Sequencer {
    pub fn restart(&mut self) {
        if self.length.length == 0 {
            self.length.length = self.length.default_length;
        }
        self.sweep.restart();
        self.envelope.restart();
        self.step = 0;
    }

    /// One 512 Hz step: lengths on 0/2/4/6, sweep on 2/6, envelope on 7.
    pub fn tick(&mut self) {
        match self.step {
            0 | 4 => {
                if self.length.tick() {
                    self.enabled = false;
                }
            }
            2 | 6 => {
                if self.length.tick() {
                    self.enabled = false;
                }
                self.sweep.tick();
                if self.sweep.channel_disabled {
                    self.enabled = false;
                }
            }
            7 => self.envelope.tick(),
            _ => {}
        }

        self.step = (self.step + 1) % 8;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Direction, Sequencer, Sweep, SweepDirection};

    #[test]
    fn length_expiry_disables_channel() {
        let mut sequencer = Sequencer::default();
        sequencer.length.default_length = 64;
        sequencer.restart();
        sequencer.enabled = true;
        sequencer.length.enabled = true;
        sequencer.length.length = 2;

        // Two length steps live on sequencer steps 0 and 2.
        for _ in 0..3 {
            sequencer.tick();
        }
        assert!(!sequencer.enabled);
    }

    #[test]
    fn sweep_overflow_disables_channel() {
        let mut sweep = Sweep {
            direction: SweepDirection::Additive,
            initial_freq: 1500,
            divider: 1,
            shift: 1,
            ..Default::default()
        };
        sweep.restart();

        // 1500 + 750 >= 2048 -> overflow.
        sweep.tick();
        assert!(sweep.channel_disabled);
        assert_eq!(sweep.shadow_freq, 1500);
    }

    #[test]
    fn sweep_writes_back_shadow_frequency() {
        let mut sweep = Sweep {
            direction: SweepDirection::Subtractive,
            initial_freq: 1024,
            divider: 1,
            shift: 2,
            ..Default::default()
        };
        sweep.restart();

        sweep.tick();
        assert_eq!(sweep.shadow_freq, 1024 - 256);
        assert_eq!(sweep.current_freq, 768);
        assert!(!sweep.channel_disabled);
    }

    #[test]
    fn envelope_ramps_and_saturates() {
        let mut sequencer = Sequencer::default();
        sequencer.envelope.direction = Direction::Increment;
        sequencer.envelope.initial_volume = 13;
        sequencer.envelope.divider = 1;
        sequencer.restart();

        // Envelope ticks on step 7 of each 8-step frame.
        for _ in 0..16 {
            sequencer.tick();
        }
        assert_eq!(sequencer.envelope.current_volume, 15);

        for _ in 0..8 {
            sequencer.tick();
        }
        assert_eq!(sequencer.envelope.current_volume, 15);
        assert!(!sequencer.envelope.active);
    }
}
