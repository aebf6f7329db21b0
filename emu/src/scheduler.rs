//! Event scheduler: the single source of truth for emulated time.
//!
//! Every timed device (PPU phases, APU synthesis and mixing, timer
//! overflows, the IRQ synchronizer, DMA activation) advances exclusively by
//! events pulled out of this queue. The CPU pays cycles into the scheduler
//! through the bus; whenever the clock crosses an event's timestamp the
//! owner drains it with [`Scheduler::pop_expired`] and dispatches on the
//! event class.
//!
//! Events carry a class tag plus a 64-bit `user_data` word instead of boxed
//! callbacks: recurring hardware events have no closure state, and keeping
//! them as plain data makes the queue trivially serializable into a save
//! state.

use serde::{Deserialize, Serialize};

/// Hardware device count plus slack. Exceeding it is a programmer error.
const MAX_EVENTS: usize = 64;

/// What an event means to the dispatcher. `user_data` disambiguates
/// instances within a class (timer index, DMA channel, IRQ line level).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventClass {
    /// End of the event queue. Dispatching it is a fatal invariant
    /// violation: the sentinel must always remain in the heap.
    Sentinel,

    /// End of the 960-cycle visible draw phase of a scanline.
    PpuScanline,
    /// End of the 272-cycle H-blank phase of a visible scanline.
    PpuHblank,
    /// End of the draw-equivalent phase of a V-blank line.
    PpuVblankScanline,
    /// End of the H-blank phase of a V-blank line.
    PpuVblankHblank,

    /// Frame-sequencer tick (512 Hz): lengths, sweep, envelopes.
    ApuSequencer,
    /// Mixer sample tick; interval depends on the bias resolution.
    ApuMixer,
    /// PSG generator tick; `user_data` is the channel index 0..=3.
    ApuPsgGenerate,

    /// IRQ synchronizer delay elapsed; `user_data` is the new line level.
    IrqSync,

    /// Timer overflow; `user_data` is the timer index 0..=3.
    TimerOverflow,

    /// DMA activation delay elapsed; `user_data` is the channel index.
    DmaActivate,

    /// Catch-all used by tests and one-off delays.
    Generic,
}

/// Identifies a specific prior submission so it can be canceled even after
/// the heap has been reorganized. Ids are unique and monotonic; canceling a
/// handle that already fired is a no-op.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHandle(u64);

#[derive(Debug, Copy, Clone)]
struct Event {
    /// `(timestamp << 2) | priority`: equal-timestamp events pop in
    /// priority order.
    key: u64,
    timestamp: u64,
    class: EventClass,
    user_data: u64,
    id: u64,
}

/// An event popped out of the queue, ready for dispatch. "Now" equals the
/// event's own timestamp while it is being handled, so recurring events
/// reschedule relative to it and stay phase-locked for free.
#[derive(Debug, Copy, Clone)]
pub struct Expired {
    pub class: EventClass,
    pub user_data: u64,
}

/// A pending event in save-state form: class, user data, cycles from "now"
/// and its 2-bit priority.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedEvent {
    pub class: EventClass,
    pub user_data: u64,
    pub delay: u64,
    pub priority: u8,
}

pub struct Scheduler {
    heap: [Event; MAX_EVENTS],
    len: usize,
    now: u64,
    /// Provisional timestamp `add_cycles` is draining towards.
    target: u64,
    next_id: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        let mut scheduler = Self {
            heap: [Event {
                key: 0,
                timestamp: 0,
                class: EventClass::Sentinel,
                user_data: 0,
                id: 0,
            }; MAX_EVENTS],
            len: 0,
            now: 0,
            target: 0,
            next_id: 0,
        };

        scheduler.reset();
        scheduler
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties the queue and re-arms the sentinel. The clock rewinds to 0.
    pub fn reset(&mut self) {
        self.len = 0;
        self.now = 0;
        self.target = 0;
        let id = self.take_id();
        self.push(Event {
            key: u64::MAX,
            timestamp: u64::MAX,
            class: EventClass::Sentinel,
            user_data: 0,
            id,
        });
    }

    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Timestamp of the nearest pending event.
    pub const fn next_timestamp(&self) -> u64 {
        self.heap[0].timestamp
    }

    /// Cycles left until the nearest pending event fires.
    pub const fn remaining_until_next_event(&self) -> u64 {
        self.heap[0].timestamp - self.now
    }

    /// Schedules `class` to fire `delay` cycles from now. `priority` must
    /// fit in two bits; lower values fire first at equal timestamps.
    pub fn add_event(
        &mut self,
        delay: u64,
        class: EventClass,
        priority: u8,
        user_data: u64,
    ) -> EventHandle {
        assert!(priority <= 3, "scheduler: priority must be between 0 and 3");
        assert!(
            self.len < MAX_EVENTS,
            "scheduler: reached maximum number of events"
        );

        let timestamp = self.now + delay;
        let id = self.take_id();
        self.push(Event {
            key: (timestamp << 2) | u64::from(priority),
            timestamp,
            class,
            user_data,
            id,
        });

        EventHandle(id)
    }

    /// Removes a pending event. Handles of events that already fired (or
    /// were canceled before) resolve to nothing and are ignored.
    pub fn cancel_event(&mut self, handle: EventHandle) {
        if let Some(index) = (0..self.len).find(|&i| self.heap[i].id == handle.0) {
            self.remove(index);
        }
    }

    /// Advances the provisional clock target by `n` cycles. The owner must
    /// drain [`Self::pop_expired`] afterwards; "now" only reaches the
    /// target once the drain returns `None`.
    pub fn add_cycles(&mut self, n: u64) {
        self.target += n;
    }

    /// Pops the next event whose timestamp has been crossed, advancing
    /// "now" to that timestamp. Once no event remains at or before the
    /// target, "now" snaps to the target and `None` is returned.
    pub fn pop_expired(&mut self) -> Option<Expired> {
        let root = self.heap[0];
        if root.timestamp > self.target {
            self.now = self.target;
            return None;
        }

        assert!(
            root.class != EventClass::Sentinel,
            "scheduler: reached the end of the event queue"
        );

        self.now = root.timestamp;
        self.remove(0);

        Some(Expired {
            class: root.class,
            user_data: root.user_data,
        })
    }

    /// Exports every pending event (sentinel excluded) relative to "now".
    pub fn export_events(&self) -> Vec<SavedEvent> {
        let mut events: Vec<SavedEvent> = self.heap[..self.len]
            .iter()
            .filter(|event| event.class != EventClass::Sentinel)
            .map(|event| SavedEvent {
                class: event.class,
                user_data: event.user_data,
                delay: event.timestamp - self.now,
                priority: (event.key & 0b11) as u8,
            })
            .collect();

        // Stable order for byte-identical snapshots.
        events.sort_by_key(|event| (event.delay, event.priority, event.user_data));
        events
    }

    /// Rebuilds the queue from a snapshot taken at timestamp `now`.
    pub fn import_events(&mut self, now: u64, events: &[SavedEvent]) {
        self.reset();
        self.now = now;
        self.target = now;

        for event in events {
            self.add_event(event.delay, event.class, event.priority, event.user_data);
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Heap ordering: composite key first, submission order as tiebreaker.
    fn before(a: &Event, b: &Event) -> bool {
        (a.key, a.id) < (b.key, b.id)
    }

    fn push(&mut self, event: Event) {
        let mut n = self.len;
        self.heap[n] = event;
        self.len += 1;

        while n != 0 {
            let p = (n - 1) / 2;
            if Self::before(&self.heap[n], &self.heap[p]) {
                self.heap.swap(n, p);
                n = p;
            } else {
                break;
            }
        }
    }

    fn remove(&mut self, n: usize) {
        self.len -= 1;
        self.heap.swap(n, self.len);

        if n == self.len {
            return;
        }

        // The swapped-in element may need to travel either direction.
        let mut n = n;
        while n != 0 {
            let p = (n - 1) / 2;
            if Self::before(&self.heap[n], &self.heap[p]) {
                self.heap.swap(n, p);
                n = p;
            } else {
                break;
            }
        }
        self.heapify(n);
    }

    fn heapify(&mut self, n: usize) {
        let l = n * 2 + 1;
        let r = n * 2 + 2;

        if l < self.len && Self::before(&self.heap[l], &self.heap[n]) {
            self.heap.swap(l, n);
            self.heapify(l);
        }

        if r < self.len && Self::before(&self.heap[r], &self.heap[n]) {
            self.heap.swap(r, n);
            self.heapify(r);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{EventClass, Scheduler};

    fn drain(scheduler: &mut Scheduler) -> Vec<u64> {
        let mut fired = Vec::new();
        while let Some(event) = scheduler.pop_expired() {
            fired.push(event.user_data);
        }
        fired
    }

    #[test]
    fn clock_advances_exactly() {
        let mut scheduler = Scheduler::new();

        scheduler.add_cycles(123);
        assert_eq!(drain(&mut scheduler), Vec::<u64>::new());
        assert_eq!(scheduler.now(), 123);

        scheduler.add_cycles(0);
        drain(&mut scheduler);
        assert_eq!(scheduler.now(), 123);
    }

    #[test]
    fn increasing_timestamps_dispatch_in_insertion_order() {
        let mut scheduler = Scheduler::new();

        for (delay, tag) in [(10, 0), (20, 1), (30, 2), (40, 3)] {
            scheduler.add_event(delay, EventClass::Generic, 0, tag);
        }

        scheduler.add_cycles(100);
        assert_eq!(drain(&mut scheduler), vec![0, 1, 2, 3]);
        assert_eq!(scheduler.now(), 100);
    }

    #[test]
    fn equal_timestamps_dispatch_in_priority_order() {
        let mut scheduler = Scheduler::new();

        scheduler.add_event(50, EventClass::Generic, 3, 30);
        scheduler.add_event(50, EventClass::Generic, 1, 10);
        scheduler.add_event(50, EventClass::Generic, 2, 20);
        scheduler.add_event(50, EventClass::Generic, 0, 0);

        scheduler.add_cycles(50);
        assert_eq!(drain(&mut scheduler), vec![0, 10, 20, 30]);
    }

    #[test]
    fn equal_keys_dispatch_in_submission_order() {
        let mut scheduler = Scheduler::new();

        for tag in 0..8 {
            scheduler.add_event(50, EventClass::Generic, 0, tag);
        }

        scheduler.add_cycles(50);
        assert_eq!(drain(&mut scheduler), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn now_rests_at_event_timestamp_between_pops() {
        let mut scheduler = Scheduler::new();

        scheduler.add_event(10, EventClass::Generic, 0, 0);
        scheduler.add_event(25, EventClass::Generic, 0, 1);
        scheduler.add_cycles(40);

        scheduler.pop_expired().unwrap();
        assert_eq!(scheduler.now(), 10);
        scheduler.pop_expired().unwrap();
        assert_eq!(scheduler.now(), 25);
        assert!(scheduler.pop_expired().is_none());
        assert_eq!(scheduler.now(), 40);
    }

    #[test]
    fn canceled_event_never_fires() {
        let mut scheduler = Scheduler::new();

        let keep = scheduler.add_event(10, EventClass::Generic, 0, 1);
        let drop = scheduler.add_event(20, EventClass::Generic, 0, 2);
        scheduler.cancel_event(drop);

        scheduler.add_cycles(100);
        assert_eq!(drain(&mut scheduler), vec![1]);

        // Stale handles are harmless.
        scheduler.cancel_event(keep);
        scheduler.cancel_event(drop);
    }

    #[test]
    fn events_scheduled_during_drain_can_fire_in_same_drain() {
        let mut scheduler = Scheduler::new();

        scheduler.add_event(10, EventClass::Generic, 0, 1);
        scheduler.add_cycles(30);

        let first = scheduler.pop_expired().unwrap();
        assert_eq!(first.user_data, 1);

        // Rescheduled relative to now = 10, still inside the target.
        scheduler.add_event(10, EventClass::Generic, 0, 2);
        let second = scheduler.pop_expired().unwrap();
        assert_eq!(second.user_data, 2);
        assert_eq!(scheduler.now(), 20);

        assert!(scheduler.pop_expired().is_none());
        assert_eq!(scheduler.now(), 30);
    }

    #[test]
    fn export_import_round_trip() {
        let mut scheduler = Scheduler::new();

        scheduler.add_cycles(100);
        drain(&mut scheduler);

        scheduler.add_event(32, EventClass::ApuSequencer, 0, 0);
        scheduler.add_event(16, EventClass::TimerOverflow, 1, 2);

        let saved = scheduler.export_events();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].delay, 16);
        assert_eq!(saved[1].delay, 32);

        scheduler.import_events(scheduler.now(), &saved);
        scheduler.add_cycles(16);
        let event = scheduler.pop_expired().unwrap();
        assert_eq!(event.class, EventClass::TimerOverflow);
        assert_eq!(event.user_data, 2);
    }

    #[test]
    #[should_panic(expected = "end of the event queue")]
    fn sentinel_dispatch_is_fatal() {
        let mut scheduler = Scheduler::new();
        scheduler.add_cycles(u64::MAX);
        drain(&mut scheduler);
    }
}
