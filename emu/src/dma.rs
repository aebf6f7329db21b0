//! The four DMA channels: register file, trigger logic and per-channel
//! latched state. The transfer loop itself lives in the bus, which owns
//! the memory the channels move.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventClass, EventHandle, Scheduler};

/// FIFO target addresses for the sound-DMA channels 1 and 2.
pub const FIFO_A_ADDRESS: u32 = 0x0400_00A0;
pub const FIFO_B_ADDRESS: u32 = 0x0400_00A4;

/// Cycles between the enable write and an immediate channel becoming
/// runnable.
const ACTIVATION_DELAY: u64 = 2;

/// Start timing field, control bits 12-13.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Sound FIFO on channels 1/2, video capture on channel 3.
    Special,
}

impl From<u16> for StartTiming {
    fn from(value: u16) -> Self {
        match value & 0b11 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::HBlank,
            _ => Self::Special,
        }
    }
}

/// Address stepping for either endpoint.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    /// Increment during the transfer, reload on repeat (destination only).
    IncrementReload,
}

impl From<u16> for AddressControl {
    fn from(value: u16) -> Self {
        match value & 0b11 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmaChannel {
    pub source_address: u32,
    pub destination_address: u32,
    pub word_count: u16,
    pub control: u16,

    /// Latched at enable time; the visible registers are write-only.
    pub internal_source: u32,
    pub internal_dest: u32,
    pub internal_count: u32,

    /// Current request runs in sound-FIFO mode: 4 words, fixed
    /// destination, forced 32-bit.
    pub fifo_mode: bool,

    #[serde(skip)]
    activate_event: Option<EventHandle>,
}

impl DmaChannel {
    pub fn enabled(&self) -> bool {
        self.control.get_bit(15)
    }

    pub fn irq_enabled(&self) -> bool {
        self.control.get_bit(14)
    }

    pub fn word_transfer(&self) -> bool {
        self.control.get_bit(10)
    }

    pub fn repeat(&self) -> bool {
        self.control.get_bit(9)
    }

    pub fn start_timing(&self) -> StartTiming {
        StartTiming::from(self.control.get_bits(12..=13))
    }

    pub fn source_control(&self) -> AddressControl {
        AddressControl::from(self.control.get_bits(7..=8))
    }

    pub fn dest_control(&self) -> AddressControl {
        AddressControl::from(self.control.get_bits(5..=6))
    }

    fn max_count(id: usize) -> u32 {
        if id == 3 {
            0x1_0000
        } else {
            0x4000
        }
    }

    fn count_for(&self, id: usize) -> u32 {
        let count = u32::from(self.word_count) & (Self::max_count(id) - 1);
        if count == 0 {
            Self::max_count(id)
        } else {
            count
        }
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmaController {
    pub channels: [DmaChannel; 4],
    /// Bitmask of channels ready to run at the next bus boundary.
    pub pending: u8,
}

impl DmaController {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Lowest-numbered runnable channel wins arbitration.
    #[must_use]
    pub fn highest_priority_pending(&self) -> Option<usize> {
        (0..4).find(|&id| self.pending.get_bit(id as u8))
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        let id = ((address - 0x0400_00B0) / 12) as usize;
        let channel = &self.channels[id];

        // Everything except the control word is write-only.
        match (address - 0x0400_00B0) % 12 {
            10 => channel.control.get_byte(0),
            11 => channel.control.get_byte(1),
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        let id = ((address - 0x0400_00B0) / 12) as usize;
        let offset = (address - 0x0400_00B0) % 12;
        let channel = &mut self.channels[id];

        match offset {
            0..=3 => channel.source_address.set_byte(offset as u8, value),
            4..=7 => channel
                .destination_address
                .set_byte((offset - 4) as u8, value),
            8 => channel.word_count.set_byte(0, value),
            9 => channel.word_count.set_byte(1, value),
            10 => channel.control.set_byte(0, value),
            11 => {
                let was_enabled = channel.enabled();
                channel.control.set_byte(1, value);

                if channel.enabled() && !was_enabled {
                    self.latch_channel(id, scheduler);
                } else if !channel.enabled() {
                    if let Some(handle) = channel.activate_event.take() {
                        scheduler.cancel_event(handle);
                    }
                    self.pending.set_bit_off(id as u8);
                }
            }
            _ => unreachable!(),
        }
    }

    fn latch_channel(&mut self, id: usize, scheduler: &mut Scheduler) {
        let channel = &mut self.channels[id];

        channel.internal_source = channel.source_address & 0x0FFF_FFFF;
        channel.internal_dest = channel.destination_address & 0x0FFF_FFFF;
        channel.internal_count = channel.count_for(id);
        channel.fifo_mode = false;

        if channel.start_timing() == StartTiming::Immediate {
            channel.activate_event = Some(scheduler.add_event(
                ACTIVATION_DELAY,
                EventClass::DmaActivate,
                2,
                id as u64,
            ));
        }
    }

    pub fn on_activate_event(&mut self, id: usize) {
        self.channels[id].activate_event = None;
        if self.channels[id].enabled() {
            self.pending.set_bit_on(id as u8);
        }
    }

    /// V-blank entered.
    pub fn trigger_vblank(&mut self) {
        self.trigger(StartTiming::VBlank, 0..4);
    }

    /// H-blank of a visible scanline.
    pub fn trigger_hblank(&mut self) {
        self.trigger(StartTiming::HBlank, 0..4);
    }

    /// Video-capture request for channel 3, once per capture scanline.
    pub fn trigger_video_capture(&mut self) {
        self.trigger(StartTiming::Special, 3..4);
    }

    fn trigger(&mut self, timing: StartTiming, ids: std::ops::Range<usize>) {
        for id in ids {
            let channel = &self.channels[id];
            if channel.enabled() && channel.start_timing() == timing {
                self.pending.set_bit_on(id as u8);
            }
        }
    }

    /// An APU FIFO dropped to its refill threshold: run the sound channel
    /// pointed at it.
    pub fn request_fifo(&mut self, fifo_address: u32) {
        for id in 1..=2 {
            let channel = &mut self.channels[id];
            if channel.enabled()
                && channel.start_timing() == StartTiming::Special
                && channel.internal_dest == fifo_address & 0x0FFF_FFFF
            {
                channel.fifo_mode = true;
                self.pending.set_bit_on(id as u8);
            }
        }
    }

    /// Bookkeeping after a channel's transfer finished. Returns true when
    /// the channel requests its completion IRQ.
    pub fn complete(&mut self, id: usize) -> bool {
        self.pending.set_bit_off(id as u8);
        let channel = &mut self.channels[id];

        let one_shot = !channel.repeat() || channel.start_timing() == StartTiming::Immediate;
        if one_shot {
            channel.control.set_bit_off(15);
        } else {
            channel.internal_count = channel.count_for(id);
            if !channel.fifo_mode && channel.dest_control() == AddressControl::IncrementReload {
                channel.internal_dest = channel.destination_address & 0x0FFF_FFFF;
            }
        }
        channel.fifo_mode = false;

        channel.irq_enabled()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{DmaController, StartTiming, FIFO_A_ADDRESS};
    use crate::scheduler::{EventClass, Scheduler};

    fn write_half(dma: &mut DmaController, address: u32, value: u16, scheduler: &mut Scheduler) {
        dma.write_byte(address, value as u8, scheduler);
        dma.write_byte(address + 1, (value >> 8) as u8, scheduler);
    }

    #[test]
    fn immediate_channel_becomes_pending_after_activation_delay() {
        let mut scheduler = Scheduler::new();
        let mut dma = DmaController::default();

        // DMA3: enable, immediate, 32-bit.
        write_half(&mut dma, 0x0400_00DE, 0x8400, &mut scheduler);
        assert_eq!(dma.highest_priority_pending(), None);

        scheduler.add_cycles(2);
        while let Some(event) = scheduler.pop_expired() {
            assert_eq!(event.class, EventClass::DmaActivate);
            dma.on_activate_event(event.user_data as usize);
        }

        assert_eq!(dma.highest_priority_pending(), Some(3));
    }

    #[test]
    fn word_count_zero_means_full_length() {
        let mut scheduler = Scheduler::new();
        let mut dma = DmaController::default();

        write_half(&mut dma, 0x0400_00DC, 0, &mut scheduler);
        write_half(&mut dma, 0x0400_00DE, 0x8000, &mut scheduler);
        assert_eq!(dma.channels[3].internal_count, 0x1_0000);

        write_half(&mut dma, 0x0400_00B8, 0, &mut scheduler);
        write_half(&mut dma, 0x0400_00BA, 0x8000, &mut scheduler);
        assert_eq!(dma.channels[0].internal_count, 0x4000);
    }

    #[test]
    fn fifo_request_targets_matching_channel() {
        let mut scheduler = Scheduler::new();
        let mut dma = DmaController::default();

        // DMA1 -> FIFO A, special timing, repeat.
        for (i, byte) in FIFO_A_ADDRESS.to_le_bytes().iter().enumerate() {
            dma.write_byte(0x0400_00C0 + i as u32, *byte, &mut scheduler);
        }
        write_half(&mut dma, 0x0400_00C6, 0xB200, &mut scheduler);

        dma.request_fifo(FIFO_A_ADDRESS);
        assert_eq!(dma.highest_priority_pending(), Some(1));
        assert!(dma.channels[1].fifo_mode);

        // Completion keeps a repeating special channel armed.
        let irq = dma.complete(1);
        assert!(!irq);
        assert!(dma.channels[1].enabled());
        assert_eq!(dma.highest_priority_pending(), None);
    }

    #[test]
    fn disable_cancels_pending_request() {
        let mut scheduler = Scheduler::new();
        let mut dma = DmaController::default();

        write_half(&mut dma, 0x0400_00BA, 0x9000, &mut scheduler); // vblank timing
        assert_eq!(dma.channels[0].start_timing(), StartTiming::VBlank);

        dma.trigger_vblank();
        assert_eq!(dma.highest_priority_pending(), Some(0));

        write_half(&mut dma, 0x0400_00BA, 0x1000, &mut scheduler);
        assert_eq!(dma.highest_priority_pending(), None);
    }
}
