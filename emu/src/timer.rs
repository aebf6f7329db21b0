//! The four hardware timers.
//!
//! A running timer never counts per-cycle: its overflow is a scheduled
//! event and counter reads are derived from the scheduler clock. Cascaded
//! timers have no event of their own; they increment when the timer below
//! them overflows.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::scheduler::{EventClass, EventHandle, Scheduler};

/// Prescaler steps selected by control bits 0-1.
const PRESCALER: [u64; 4] = [1, 64, 256, 1024];

/// Cycles between the enable write and the first count step.
const START_DELAY: u64 = 2;

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Value loaded into the counter on start and on overflow.
    pub reload: u16,
    pub control: u16,

    /// Counter as of `base_timestamp`; live value is derived.
    counter: u16,
    base_timestamp: u64,

    /// Bumped on every control write. Overflow events carry the sequence
    /// they were armed with, so events surviving a save-state round trip
    /// (whose handles are gone) can still be told apart from live ones.
    sequence: u16,

    #[serde(skip)]
    overflow_event: Option<EventHandle>,
}

impl Timer {
    fn enabled(&self) -> bool {
        self.control.get_bit(7)
    }

    fn irq_enabled(&self) -> bool {
        self.control.get_bit(6)
    }

    fn cascade(&self) -> bool {
        self.control.get_bit(2)
    }

    fn prescaler(&self) -> u64 {
        PRESCALER[usize::from(self.control.get_byte(0)) & 0b11]
    }

    /// Live counter value at `now`.
    fn counter_at(&self, now: u64) -> u16 {
        if !self.enabled() || self.cascade() {
            return self.counter;
        }

        let elapsed = now.saturating_sub(self.base_timestamp) / self.prescaler();
        // Overflows in between have re-based the counter, so this cannot
        // wrap more than once.
        (u64::from(self.counter) + elapsed) as u16
    }

    fn cycles_until_overflow(&self, from_counter: u16) -> u64 {
        (0x1_0000 - u64::from(from_counter)) * self.prescaler()
    }

    fn event_tag(&self, id: usize) -> u64 {
        id as u64 | (u64::from(self.sequence) << 8)
    }
}

#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timers {
    pub channels: [Timer; 4],
}

/// What a completed overflow asks the rest of the system to do. The bus
/// routes IRQ raises and APU FIFO ticks from here.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct OverflowOutcome {
    /// Per-timer overflow occurred this event (cascades included).
    pub overflowed: [bool; 4],
    /// Per-timer IRQ requested.
    pub request_irq: [bool; 4],
}

impl Timers {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn read_byte(&self, address: u32, scheduler: &Scheduler) -> u8 {
        let id = ((address - 0x0400_0100) / 4) as usize;
        let timer = &self.channels[id];

        match address % 4 {
            0 => timer.counter_at(scheduler.now()).get_byte(0),
            1 => timer.counter_at(scheduler.now()).get_byte(1),
            2 => timer.control.get_byte(0),
            3 => timer.control.get_byte(1),
            _ => unreachable!(),
        }
    }

    pub fn write_byte(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        let id = ((address - 0x0400_0100) / 4) as usize;

        match address % 4 {
            // Counter writes set the reload, not the live counter.
            0 => self.channels[id].reload.set_byte(0, value),
            1 => self.channels[id].reload.set_byte(1, value),
            2 => self.write_control(id, value, scheduler),
            3 => {}
            _ => unreachable!(),
        }
    }

    fn write_control(&mut self, id: usize, value: u8, scheduler: &mut Scheduler) {
        let was_enabled = self.channels[id].enabled();

        // Latch the live value before the control change re-bases timing.
        self.channels[id].counter = self.channels[id].counter_at(scheduler.now());
        self.channels[id].base_timestamp = scheduler.now();
        self.channels[id].control.set_byte(0, value);

        let timer = &mut self.channels[id];
        timer.sequence = timer.sequence.wrapping_add(1);
        if let Some(handle) = timer.overflow_event.take() {
            scheduler.cancel_event(handle);
        }

        if !timer.enabled() {
            return;
        }

        if !was_enabled {
            timer.counter = timer.reload;
            timer.base_timestamp = scheduler.now() + START_DELAY;
        }

        if !timer.cascade() {
            let delay = timer.cycles_until_overflow(timer.counter)
                + if was_enabled { 0 } else { START_DELAY };
            let tag = timer.event_tag(id);
            timer.overflow_event =
                Some(scheduler.add_event(delay, EventClass::TimerOverflow, 1, tag));
        }
    }

    /// Handles a `TimerOverflow` event, cascading upwards. Events whose
    /// sequence no longer matches (possible only after a save-state load,
    /// where handles cannot cancel) are ignored.
    pub fn handle_overflow(&mut self, user_data: u64, scheduler: &mut Scheduler) -> OverflowOutcome {
        let id = (user_data & 0xFF) as usize;
        let sequence = (user_data >> 8) as u16;

        let mut outcome = OverflowOutcome::default();
        let timer = &self.channels[id];
        if sequence != timer.sequence || !timer.enabled() || timer.cascade() {
            return outcome;
        }

        self.overflow(id, scheduler, &mut outcome);
        outcome
    }

    fn overflow(&mut self, id: usize, scheduler: &mut Scheduler, outcome: &mut OverflowOutcome) {
        {
            let timer = &mut self.channels[id];

            outcome.overflowed[id] = true;
            if timer.irq_enabled() {
                outcome.request_irq[id] = true;
            }

            timer.counter = timer.reload;
            timer.base_timestamp = scheduler.now();

            if !timer.cascade() {
                let delay = timer.cycles_until_overflow(timer.reload);
                let tag = timer.event_tag(id);
                timer.overflow_event =
                    Some(scheduler.add_event(delay, EventClass::TimerOverflow, 1, tag));
            }
        }

        // Tick the timer above when it is counting us.
        if id < 3 {
            let upper = &self.channels[id + 1];
            if upper.enabled() && upper.cascade() {
                let (next, wrapped) = self.channels[id + 1].counter.overflowing_add(1);
                self.channels[id + 1].counter = next;
                if wrapped {
                    self.overflow(id + 1, scheduler, outcome);
                }
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Timers;
    use crate::scheduler::{EventClass, Scheduler};

    fn run_events(timers: &mut Timers, scheduler: &mut Scheduler) -> Vec<super::OverflowOutcome> {
        let mut outcomes = Vec::new();
        while let Some(event) = scheduler.pop_expired() {
            assert_eq!(event.class, EventClass::TimerOverflow);
            outcomes.push(timers.handle_overflow(event.user_data, scheduler));
        }
        outcomes
    }

    #[test]
    fn counter_reads_derive_from_clock() {
        let mut scheduler = Scheduler::new();
        let mut timers = Timers::default();

        timers.write_byte(0x0400_0100, 0x00, &mut scheduler); // reload = 0
        timers.write_byte(0x0400_0102, 0x80, &mut scheduler); // enable, prescaler 1

        scheduler.add_cycles(100);
        run_events(&mut timers, &mut scheduler);

        // Two cycles of start delay, then one increment per cycle.
        assert_eq!(timers.read_byte(0x0400_0100, &scheduler), 98);
    }

    #[test]
    fn overflow_reloads_and_requests_irq() {
        let mut scheduler = Scheduler::new();
        let mut timers = Timers::default();

        // Reload 0xFFFE, prescaler 1, IRQ enabled.
        timers.write_byte(0x0400_0100, 0xFE, &mut scheduler);
        timers.write_byte(0x0400_0101, 0xFF, &mut scheduler);
        timers.write_byte(0x0400_0102, 0b1100_0000, &mut scheduler);

        // Overflow after start delay (2) + 2 increments.
        scheduler.add_cycles(4);
        let outcomes = run_events(&mut timers, &mut scheduler);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].overflowed[0]);
        assert!(outcomes[0].request_irq[0]);

        // Counter restarted from the reload value.
        assert_eq!(timers.channels[0].reload, 0xFFFE);
    }

    #[test]
    fn cascade_increments_on_lower_overflow() {
        let mut scheduler = Scheduler::new();
        let mut timers = Timers::default();

        // Timer 0: reload 0xFFFF, prescaler 1 -> overflows every cycle.
        timers.write_byte(0x0400_0100, 0xFF, &mut scheduler);
        timers.write_byte(0x0400_0101, 0xFF, &mut scheduler);
        timers.write_byte(0x0400_0102, 0x80, &mut scheduler);

        // Timer 1: cascade, reload 0.
        timers.write_byte(0x0400_0106, 0b1000_0100, &mut scheduler);

        scheduler.add_cycles(2 + 3);
        run_events(&mut timers, &mut scheduler);

        assert_eq!(timers.read_byte(0x0400_0104, &scheduler), 3);
    }

    #[test]
    fn disabling_cancels_the_overflow_event() {
        let mut scheduler = Scheduler::new();
        let mut timers = Timers::default();

        timers.write_byte(0x0400_0102, 0x80, &mut scheduler);
        timers.write_byte(0x0400_0102, 0x00, &mut scheduler);

        scheduler.add_cycles(0x2_0000);
        assert!(run_events(&mut timers, &mut scheduler).is_empty());
    }
}
