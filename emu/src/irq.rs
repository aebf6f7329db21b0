//! Interrupt controller: IE, IF and IME plus the synchronizer delay
//! between a source raising its line and the CPU seeing it.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventClass, EventHandle, Scheduler};

/// Cycles between an IE/IF/IME change and the CPU-visible line moving.
const SYNCHRONIZER_DELAY: u64 = 3;

/// The fourteen wired interrupt sources.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IrqSource {
    VBlank,
    HBlank,
    VCount,
    Timer(usize),
    Serial,
    Dma(usize),
    Keypad,
    Gamepak,
}

impl IrqSource {
    const fn bit(self) -> u8 {
        match self {
            Self::VBlank => 0,
            Self::HBlank => 1,
            Self::VCount => 2,
            Self::Timer(id) => 3 + id as u8,
            Self::Serial => 7,
            Self::Dma(channel) => 8 + channel as u8,
            Self::Keypad => 12,
            Self::Gamepak => 13,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptControl {
    /// IE: which sources may interrupt.
    pub interrupt_enable: u16,
    /// IF: latched pending sources, write-1-to-clear.
    pub interrupt_request: u16,
    /// IME bit 0: master switch.
    pub interrupt_master_enable: u16,

    /// The line as the CPU currently sees it, i.e. after the synchronizer.
    pub irq_line: bool,

    #[serde(skip)]
    pending_sync: Option<EventHandle>,
}

impl Default for InterruptControl {
    fn default() -> Self {
        Self {
            interrupt_enable: 0,
            interrupt_request: 0,
            interrupt_master_enable: 0,
            irq_line: false,
            pending_sync: None,
        }
    }
}

impl InterruptControl {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Latches a source into IF and re-evaluates the line.
    pub fn raise(&mut self, source: IrqSource, scheduler: &mut Scheduler) {
        self.interrupt_request.set_bit_on(source.bit());
        self.update_line(scheduler);
    }

    /// True whenever an enabled source is pending, regardless of IME.
    /// This is the halt wake-up condition.
    #[must_use]
    pub const fn has_servable_irq(&self) -> bool {
        self.interrupt_enable & self.interrupt_request != 0
    }

    #[must_use]
    pub fn master_enable(&self) -> bool {
        self.interrupt_master_enable.get_bit(0)
    }

    /// Schedules the CPU-visible line to follow the register state after
    /// the synchronizer delay. Rescheduling cancels the previous event so
    /// the line only ever has one pending transition.
    fn update_line(&mut self, scheduler: &mut Scheduler) {
        let target = self.master_enable() && self.has_servable_irq();

        // A stale transition toward the old target must not fire.
        if let Some(handle) = self.pending_sync.take() {
            scheduler.cancel_event(handle);
        }

        if target != self.irq_line {
            self.pending_sync = Some(scheduler.add_event(
                SYNCHRONIZER_DELAY,
                EventClass::IrqSync,
                0,
                u64::from(target),
            ));
        }
    }

    /// IrqSync event arrived. The line assumes the level the registers
    /// demand *now*: events that outlived a save-state load (where the
    /// cancel handle is gone) then simply re-settle the line.
    pub fn on_sync_event(&mut self, _level: u64) {
        self.pending_sync = None;
        self.irq_line = self.master_enable() && self.has_servable_irq();
    }

    pub fn read_byte(&self, address: u32) -> u8 {
        match address {
            0x0400_0200 => self.interrupt_enable.get_byte(0),
            0x0400_0201 => self.interrupt_enable.get_byte(1),
            0x0400_0202 => self.interrupt_request.get_byte(0),
            0x0400_0203 => self.interrupt_request.get_byte(1),
            0x0400_0208 => self.interrupt_master_enable.get_byte(0),
            0x0400_0209 => self.interrupt_master_enable.get_byte(1),
            _ => 0,
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        match address {
            0x0400_0200 => self.interrupt_enable.set_byte(0, value),
            0x0400_0201 => self.interrupt_enable.set_byte(1, value & 0x3F),
            // Writing 1 acknowledges (clears) a pending bit.
            0x0400_0202 => self.interrupt_request &= !u16::from(value),
            0x0400_0203 => self.interrupt_request &= !(u16::from(value) << 8),
            0x0400_0208 => self.interrupt_master_enable.set_byte(0, value & 1),
            0x0400_0209 => {}
            _ => logger::log(format!("IRQ write to unused address {address:#010X}")),
        }

        self.update_line(scheduler);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{InterruptControl, IrqSource};
    use crate::scheduler::{EventClass, Scheduler};

    fn drain(irq: &mut InterruptControl, scheduler: &mut Scheduler) {
        while let Some(event) = scheduler.pop_expired() {
            assert_eq!(event.class, EventClass::IrqSync);
            irq.on_sync_event(event.user_data);
        }
    }

    #[test]
    fn raise_sets_if_and_line_rises_after_delay() {
        let mut scheduler = Scheduler::new();
        let mut irq = InterruptControl::default();

        irq.write_byte(0x0400_0200, 0x01, &mut scheduler); // IE: V-blank
        irq.write_byte(0x0400_0208, 0x01, &mut scheduler); // IME
        drain(&mut irq, &mut scheduler);

        irq.raise(IrqSource::VBlank, &mut scheduler);
        assert!(irq.interrupt_request & 1 != 0);
        assert!(!irq.irq_line);

        scheduler.add_cycles(3);
        drain(&mut irq, &mut scheduler);
        assert!(irq.irq_line);
    }

    #[test]
    fn masked_source_never_moves_the_line() {
        let mut scheduler = Scheduler::new();
        let mut irq = InterruptControl::default();

        irq.write_byte(0x0400_0208, 0x01, &mut scheduler);
        irq.raise(IrqSource::Keypad, &mut scheduler);

        scheduler.add_cycles(100);
        drain(&mut irq, &mut scheduler);
        assert!(!irq.irq_line);
        assert!(irq.interrupt_request != 0);
    }

    #[test]
    fn write_one_to_clear() {
        let mut scheduler = Scheduler::new();
        let mut irq = InterruptControl::default();

        irq.raise(IrqSource::Timer(2), &mut scheduler);
        assert_eq!(irq.interrupt_request, 1 << 5);

        irq.write_byte(0x0400_0202, 0xFF, &mut scheduler);
        assert_eq!(irq.interrupt_request, 0);
    }

    #[test]
    fn line_falls_after_acknowledge() {
        let mut scheduler = Scheduler::new();
        let mut irq = InterruptControl::default();

        irq.write_byte(0x0400_0200, 0xFF, &mut scheduler);
        irq.write_byte(0x0400_0208, 0x01, &mut scheduler);
        irq.raise(IrqSource::HBlank, &mut scheduler);
        scheduler.add_cycles(3);
        drain(&mut irq, &mut scheduler);
        assert!(irq.irq_line);

        irq.write_byte(0x0400_0202, 0xFF, &mut scheduler);
        scheduler.add_cycles(3);
        drain(&mut irq, &mut scheduler);
        assert!(!irq.irq_line);
    }
}
