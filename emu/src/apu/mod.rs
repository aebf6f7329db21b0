//! APU: four PSG channels, two DMA FIFOs, the 512 Hz frame sequencer and
//! the mixer that resamples everything for the audio sink.

pub mod fifo;
pub mod noise;
pub mod quad;
pub mod sequencer;
pub mod wave;

use serde::{Deserialize, Serialize};

use crate::apu::fifo::Fifo;
use crate::apu::noise::NoiseChannel;
use crate::apu::quad::QuadChannel;
use crate::apu::sequencer::CYCLES_PER_STEP;
use crate::apu::wave::WaveChannel;
use crate::bitwise::Bits;
use crate::config::Config;
use crate::dma::{FIFO_A_ADDRESS, FIFO_B_ADDRESS};
use crate::scheduler::{EventClass, Scheduler};

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Apu {
    pub quad: [QuadChannel; 2],
    pub wave: WaveChannel,
    pub noise: NoiseChannel,
    pub fifo: [Fifo; 2],

    /// SOUNDCNT_L: PSG master volume and per-side enables.
    pub soundcnt_l: u16,
    /// SOUNDCNT_H: PSG ratio, FIFO volume/routing/timer selects.
    pub soundcnt_h: u16,
    /// SOUNDCNT_X bit 7.
    pub master_enable: bool,
    /// SOUNDBIAS: bias level and amplitude resolution.
    pub bias: u16,

    /// Whether a generator event is circulating per PSG channel.
    psg_event_active: [bool; 4],

    /// Config toggles copied at construction.
    zombie_mode: bool,
    pause_disabled_channels: bool,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Apu {
    pub fn new(config: &Config) -> Self {
        Self {
            quad: [QuadChannel::new(true), QuadChannel::new(false)],
            wave: WaveChannel::default(),
            noise: NoiseChannel::default(),
            fifo: [Fifo::default(), Fifo::default()],
            soundcnt_l: 0,
            soundcnt_h: 0,
            master_enable: false,
            bias: 0x0200,
            psg_event_active: [false; 4],
            zombie_mode: config.emulate_zombie_envelope,
            pause_disabled_channels: config.psg_events_pause_when_disabled,
        }
    }

    /// Power-on state; arms the sequencer and mixer events.
    pub fn reset(&mut self, config: &Config, scheduler: &mut Scheduler) {
        *self = Self::new(config);
        scheduler.add_event(CYCLES_PER_STEP, EventClass::ApuSequencer, 0, 0);
        scheduler.add_event(self.sample_interval(), EventClass::ApuMixer, 0, 0);
    }

    /// Mixer period in cycles, from the bias resolution field.
    pub fn sample_interval(&self) -> u64 {
        512 >> self.bias.get_bits(14..=15)
    }

    /// Output sample rate in Hz, for the audio sink.
    pub fn sample_rate(&self) -> u32 {
        32_768 << self.bias.get_bits(14..=15)
    }

    pub fn on_sequencer_event(&mut self, scheduler: &mut Scheduler) {
        self.quad[0].sequencer.tick();
        self.quad[1].sequencer.tick();
        self.wave.sequencer.tick();
        self.noise.sequencer.tick();

        scheduler.add_event(CYCLES_PER_STEP, EventClass::ApuSequencer, 0, 0);
    }

    /// A PSG generator event fired for `channel`.
    pub fn on_generate_event(&mut self, channel: usize, scheduler: &mut Scheduler) {
        let mixer_interval = self.sample_interval();

        let (interval, enabled) = match channel {
            0 | 1 => {
                let quad = &mut self.quad[channel];
                quad.generate();
                (quad.synthesis_interval(), quad.sequencer.enabled)
            }
            2 => {
                self.wave.generate();
                (self.wave.synthesis_interval(), self.wave.sequencer.enabled)
            }
            3 => {
                let interval = self.noise.generate(mixer_interval);
                (interval, self.noise.sequencer.enabled)
            }
            _ => unreachable!("generator event for channel {channel}"),
        };

        if self.pause_disabled_channels && !enabled {
            self.psg_event_active[channel] = false;
            return;
        }

        scheduler.add_event(interval, EventClass::ApuPsgGenerate, 0, channel as u64);
    }

    /// Mixes one stereo sample. The caller pushes it to the audio sink.
    pub fn on_mixer_event(&mut self, scheduler: &mut Scheduler) -> (i16, i16) {
        scheduler.add_event(self.sample_interval(), EventClass::ApuMixer, 0, 0);

        if !self.master_enable {
            return (0, 0);
        }

        let psg_samples = [
            i32::from(self.quad[0].sample),
            i32::from(self.quad[1].sample),
            i32::from(self.wave.sample),
            i32::from(self.noise.sample),
        ];

        let mut out = [0_i32; 2];
        for (side, value) in out.iter_mut().enumerate() {
            // SOUNDCNT_L: enables in bits 8-11 (right) and 12-15 (left),
            // master volume in bits 0-2 / 4-6.
            let enable_shift = 8 + side * 4;
            let volume_shift = side * 4;

            let mut psg = 0_i32;
            for (channel, sample) in psg_samples.iter().enumerate() {
                if self.soundcnt_l.get_bit((enable_shift + channel) as u8) {
                    psg += sample;
                }
            }

            let master = i32::from((self.soundcnt_l >> volume_shift) & 7);
            psg = psg * (master + 1) / 8;

            // SOUNDCNT_H bits 0-1: PSG at 25/50/100%.
            let ratio = self.soundcnt_h.get_bits(0..=1).min(2);
            psg >>= 2 - ratio;

            let mut mixed = psg;
            for (index, fifo) in self.fifo.iter().enumerate() {
                let routed = self.soundcnt_h.get_bit((8 + index * 4 + side) as u8);
                if routed {
                    // Bit 2/3: FIFO at half or full volume.
                    let shift = if self.soundcnt_h.get_bit(2 + index as u8) {
                        2
                    } else {
                        1
                    };
                    mixed += i32::from(fifo.latch) << shift;
                }
            }

            let level = i32::from(self.bias.get_bits(0..=9) & !1);
            *value = (mixed + level).clamp(0, 0x3FF);
        }

        (
            ((out[0] - 0x200) << 5) as i16,
            ((out[1] - 0x200) << 5) as i16,
        )
    }

    /// Timer `timer_id` overflowed. Returns the FIFO addresses that want a
    /// refill DMA, for the bus to hand to the DMA controller.
    pub fn on_timer_overflow(&mut self, timer_id: usize) -> [Option<u32>; 2] {
        let mut requests = [None; 2];

        if !self.master_enable {
            return requests;
        }

        for (index, fifo) in self.fifo.iter_mut().enumerate() {
            let select_bit = (10 + index * 4) as u8;
            let selected = usize::from(self.soundcnt_h.get_bit(select_bit));
            if selected == timer_id && fifo.on_timer_overflow() {
                requests[index] = Some(if index == 0 {
                    FIFO_A_ADDRESS
                } else {
                    FIFO_B_ADDRESS
                });
            }
        }

        requests
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        match address {
            0x0400_0060..=0x0400_0065 => self.quad[0].read(address - 0x0400_0060),
            0x0400_0068 => self.quad[1].read(2),
            0x0400_0069 => self.quad[1].read(3),
            0x0400_006C => self.quad[1].read(4),
            0x0400_006D => self.quad[1].read(5),
            0x0400_0070..=0x0400_0075 => self.wave.read(address - 0x0400_0070),
            0x0400_0078 => self.noise.read(0),
            0x0400_0079 => self.noise.read(1),
            0x0400_007C => self.noise.read(4),
            0x0400_007D => self.noise.read(5),
            0x0400_0080 => self.soundcnt_l.get_byte(0),
            0x0400_0081 => self.soundcnt_l.get_byte(1),
            0x0400_0082 => self.soundcnt_h.get_byte(0),
            0x0400_0083 => self.soundcnt_h.get_byte(1) & 0x77,
            0x0400_0084 => {
                let mut value = 0_u8;
                value.set_bit(0, self.quad[0].sequencer.enabled);
                value.set_bit(1, self.quad[1].sequencer.enabled);
                value.set_bit(2, self.wave.sequencer.enabled);
                value.set_bit(3, self.noise.sequencer.enabled);
                value.set_bit(7, self.master_enable);
                value
            }
            0x0400_0088 => self.bias.get_byte(0),
            0x0400_0089 => self.bias.get_byte(1),
            0x0400_0090..=0x0400_009F => {
                self.wave.read_wave_ram((address - 0x0400_0090) as usize)
            }
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        // Everything below SOUNDCNT_X is dead while the APU is off.
        if !self.master_enable && (0x0400_0060..=0x0400_0081).contains(&address) {
            return;
        }

        match address {
            0x0400_0060..=0x0400_0065 => {
                let armed = self.quad[0].write(address - 0x0400_0060, value, self.zombie_mode);
                self.arm_psg_event(0, armed, scheduler);
            }
            0x0400_0068 => {
                let armed = self.quad[1].write(2, value, self.zombie_mode);
                self.arm_psg_event(1, armed, scheduler);
            }
            0x0400_0069 => {
                let armed = self.quad[1].write(3, value, self.zombie_mode);
                self.arm_psg_event(1, armed, scheduler);
            }
            0x0400_006C => {
                let armed = self.quad[1].write(4, value, self.zombie_mode);
                self.arm_psg_event(1, armed, scheduler);
            }
            0x0400_006D => {
                let armed = self.quad[1].write(5, value, self.zombie_mode);
                self.arm_psg_event(1, armed, scheduler);
            }
            0x0400_0070..=0x0400_0075 => {
                let armed = self.wave.write(address - 0x0400_0070, value);
                self.arm_psg_event(2, armed, scheduler);
            }
            0x0400_0078 => {
                let armed = self.noise.write(0, value, self.zombie_mode);
                self.arm_psg_event(3, armed, scheduler);
            }
            0x0400_0079 => {
                let armed = self.noise.write(1, value, self.zombie_mode);
                self.arm_psg_event(3, armed, scheduler);
            }
            0x0400_007C => {
                let armed = self.noise.write(4, value, self.zombie_mode);
                self.arm_psg_event(3, armed, scheduler);
            }
            0x0400_007D => {
                let armed = self.noise.write(5, value, self.zombie_mode);
                self.arm_psg_event(3, armed, scheduler);
            }
            0x0400_0080 => self.soundcnt_l.set_byte(0, value & 0x77),
            0x0400_0081 => self.soundcnt_l.set_byte(1, value),
            0x0400_0082 => self.soundcnt_h.set_byte(0, value & 0x0F),
            0x0400_0083 => {
                self.soundcnt_h.set_byte(1, value & 0x77);
                if value.get_bit(3) {
                    self.fifo[0].reset();
                }
                if value.get_bit(7) {
                    self.fifo[1].reset();
                }
            }
            0x0400_0084 => {
                let enable = value.get_bit(7);
                if !enable && self.master_enable {
                    self.silence_psg();
                }
                self.master_enable = enable;
            }
            0x0400_0088 => self.bias.set_byte(0, value),
            0x0400_0089 => self.bias.set_byte(1, value),
            0x0400_0090..=0x0400_009F => {
                self.wave
                    .write_wave_ram((address - 0x0400_0090) as usize, value);
            }
            0x0400_00A0..=0x0400_00A3 => self.fifo[0].push(value as i8),
            0x0400_00A4..=0x0400_00A7 => self.fifo[1].push(value as i8),
            _ => {}
        }
    }

    fn arm_psg_event(&mut self, channel: usize, armed: bool, scheduler: &mut Scheduler) {
        if armed && !self.psg_event_active[channel] {
            self.psg_event_active[channel] = true;
            let interval = match channel {
                0 | 1 => self.quad[channel].synthesis_interval(),
                2 => self.wave.synthesis_interval(),
                _ => self.noise.synthesis_interval(),
            };
            scheduler.add_event(interval, EventClass::ApuPsgGenerate, 0, channel as u64);
        }
    }

    fn silence_psg(&mut self) {
        for quad in &mut self.quad {
            quad.sequencer.enabled = false;
            quad.sample = 0;
        }
        self.wave.sequencer.enabled = false;
        self.wave.sample = 0;
        self.noise.sequencer.enabled = false;
        self.noise.sample = 0;
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Apu;
    use crate::config::Config;
    use crate::scheduler::{EventClass, Scheduler};

    fn armed_apu(scheduler: &mut Scheduler) -> Apu {
        let mut apu = Apu::default();
        apu.reset(&Config::default(), scheduler);
        apu.write_byte(0x0400_0084, 0x80, scheduler);
        apu
    }

    #[test]
    fn registers_are_dead_while_master_disabled() {
        let mut scheduler = Scheduler::new();
        let mut apu = Apu::default();

        apu.write_byte(0x0400_0063, 0xF0, &mut scheduler);
        assert_eq!(apu.read_byte(0x0400_0063), 0);
    }

    #[test]
    fn trigger_schedules_one_generator_event() {
        let mut scheduler = Scheduler::new();
        let mut apu = armed_apu(&mut scheduler);

        apu.write_byte(0x0400_0063, 0xF0, &mut scheduler);
        apu.write_byte(0x0400_0065, 0x80, &mut scheduler);
        apu.write_byte(0x0400_0065, 0x80, &mut scheduler);

        scheduler.add_cycles(2048 * 16);
        let mut generator_events = 0;
        while let Some(event) = scheduler.pop_expired() {
            match event.class {
                EventClass::ApuPsgGenerate => {
                    generator_events += 1;
                    apu.on_generate_event(event.user_data as usize, &mut scheduler);
                }
                EventClass::ApuSequencer => apu.on_sequencer_event(&mut scheduler),
                EventClass::ApuMixer => {
                    apu.on_mixer_event(&mut scheduler);
                }
                _ => {}
            }
        }
        assert_eq!(generator_events, 1);
    }

    #[test]
    fn mixer_is_silent_at_bias_level() {
        let mut scheduler = Scheduler::new();
        let mut apu = armed_apu(&mut scheduler);

        let (left, right) = apu.on_mixer_event(&mut scheduler);
        assert_eq!((left, right), (0, 0));
    }

    #[test]
    fn fifo_timer_routing() {
        let mut scheduler = Scheduler::new();
        let mut apu = armed_apu(&mut scheduler);

        // FIFO A on timer 0, FIFO B on timer 1.
        apu.write_byte(0x0400_0083, 0x40, &mut scheduler);
        for _ in 0..8 {
            apu.write_byte(0x0400_00A0, 1, &mut scheduler);
        }

        let requests = apu.on_timer_overflow(1);
        assert_eq!(requests, [None, Some(crate::dma::FIFO_B_ADDRESS)]);

        // Draining FIFO A below the threshold requests a refill.
        let mut refill = [None, None];
        for _ in 0..4 {
            refill = apu.on_timer_overflow(0);
        }
        assert_eq!(refill, [Some(crate::dma::FIFO_A_ADDRESS), None]);
    }

    #[test]
    fn resolution_selects_sample_interval() {
        let mut apu = Apu::default();
        assert_eq!(apu.sample_interval(), 512);
        assert_eq!(apu.sample_rate(), 32_768);

        apu.bias = 0x0200 | (0b11 << 14);
        assert_eq!(apu.sample_interval(), 64);
        assert_eq!(apu.sample_rate(), 262_144);
    }
}
