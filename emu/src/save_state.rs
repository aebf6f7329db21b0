//! Save states: a plain, versioned structure mirroring every piece of
//! emulated state, including the scheduler's pending events. The structure
//! itself is the format; how it gets to disk is the front-end's business
//! (everything derives serde for that).

use serde::{Deserialize, Serialize};

use crate::apu::Apu;
use crate::backup::Backup;
use crate::cpu::psr::Psr;
use crate::cpu::register_bank::RegisterBank;
use crate::dma::DmaController;
use crate::gpio::Gpio;
use crate::irq::InterruptControl;
use crate::keypad::Keypad;
use crate::ppu::registers::ReferencePoint;
use crate::scheduler::SavedEvent;
use crate::serial::Serial;
use crate::timer::Timers;

pub const SAVE_STATE_MAGIC: u32 = u32::from_le_bytes(*b"STSA");
pub const SAVE_STATE_VERSION: u32 = 1;

#[derive(Default, Serialize, Deserialize, PartialEq)]
pub struct CpuState {
    pub cpsr: Psr,
    pub spsr: Psr,
    pub registers: [u32; 16],
    pub bank: RegisterBank,
    pub pipeline: [u32; 3],
    pub pipeline_index: u8,
    pub flush: bool,
    pub fetch_sequential: bool,
    pub bios_swi_hle: bool,
}

#[derive(Default, Serialize, Deserialize, PartialEq)]
pub struct PpuState {
    pub dispcnt: u16,
    pub green_swap: u16,
    pub dispstat: u16,
    pub vcount: u16,
    pub bgcnt: [u16; 4],
    pub bghofs: [u16; 4],
    pub bgvofs: [u16; 4],
    pub bgpa: [i16; 2],
    pub bgpb: [i16; 2],
    pub bgpc: [i16; 2],
    pub bgpd: [i16; 2],
    pub bgx: [ReferencePoint; 2],
    pub bgy: [ReferencePoint; 2],
    pub winh: [u16; 2],
    pub winv: [u16; 2],
    pub winin: u16,
    pub winout: u16,
    pub mosaic: u16,
    pub bldcnt: u16,
    pub bldalpha: u16,
    pub bldy: u16,
    pub palette_ram: Vec<u8>,
    pub video_ram: Vec<u8>,
    pub oam: Vec<u8>,
}

#[derive(Default, Serialize, Deserialize, PartialEq)]
pub struct BusState {
    pub ewram: Vec<u8>,
    pub iwram: Vec<u8>,
    pub waitcnt: u16,
    pub postflg: u8,
    pub halted: bool,
    pub open_bus: u32,
    pub bios_latch: u32,
}

/// The whole machine at one instant. `Gba::copy_state` produces it,
/// `Gba::load_state` restores it; loading a state produced by a different
/// build layout is rejected via magic/version.
#[derive(Serialize, Deserialize, PartialEq)]
pub struct SaveState {
    pub magic: u32,
    pub version: u32,

    pub cpu: CpuState,
    pub bus: BusState,
    pub ppu: PpuState,
    pub apu: Apu,
    pub timers: Timers,
    pub dma: DmaController,
    pub keypad: Keypad,
    pub serial: Serial,
    pub irq: InterruptControl,
    pub backup: Backup,
    pub gpio: Gpio,

    pub scheduler_now: u64,
    pub events: Vec<SavedEvent>,
    /// Facade-level overshoot carry; without it a restored run would
    /// drift from the original trace by a few cycles.
    pub run_carry: u64,
}

impl SaveState {
    /// An empty container for [`crate::gba::Gba::copy_state`] to fill.
    #[must_use]
    pub fn power_on() -> Self {
        Self {
            magic: SAVE_STATE_MAGIC,
            version: SAVE_STATE_VERSION,
            cpu: CpuState::default(),
            bus: BusState::default(),
            ppu: PpuState::default(),
            apu: Apu::default(),
            timers: Timers::default(),
            dma: DmaController::default(),
            keypad: Keypad::new(),
            serial: Serial::default(),
            irq: InterruptControl::default(),
            backup: Backup::default(),
            gpio: Gpio::default(),
            scheduler_now: 0,
            events: Vec::new(),
            run_carry: 0,
        }
    }
}
