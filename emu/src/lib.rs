//! # Satsuma Emulation Core
//!
//! Cycle-accurate emulation of the ARM7TDMI-based handheld - no UI code,
//! no audio device, no file dialogs. Front-ends talk to [`gba::Gba`] and
//! plug into the [`platform`] traits.
//!
//! ## Module Overview
//!
//! | Module          | Description                                         |
//! |-----------------|-----------------------------------------------------|
//! | [`gba`]         | Top-level console facade (start here)               |
//! | [`cpu`]         | ARM7TDMI processor and both instruction sets        |
//! | [`bus`]         | Memory bus, wait states, MMIO and DMA arbitration   |
//! | [`scheduler`]   | Event queue every timed device hangs off            |
//! | [`ppu`]         | Scanline renderer and V/H timing                    |
//! | [`apu`]         | PSG channels, FIFOs and the mixer                   |
//! | [`cartridge`]   | ROM image, header, save backup, GPIO                |
//! | [`save_state`]  | Versioned whole-machine snapshots                   |
//!
//! ## Quick Start
//!
//! ```ignore
//! use emu::cartridge::{BackupKind, Rom};
//! use emu::gba::Gba;
//!
//! let mut gba = Gba::default();
//! gba.attach_bios(std::fs::read("gba_bios.bin")?)?;
//! gba.attach_rom(Rom::new(std::fs::read("game.gba")?, BackupKind::Sram))?;
//! loop {
//!     gba.run_for_one_frame();
//! }
//! ```

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
mod bitwise;

pub mod apu;
pub mod backup;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::cast_lossless)]
pub mod bus;

pub mod cartridge;
pub mod config;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod cpu;

pub mod dma;
pub mod gba;
pub mod gpio;
pub mod irq;
pub mod keypad;
pub mod platform;

#[allow(clippy::cast_possible_truncation)]
pub mod ppu;

pub mod save_state;
pub mod scheduler;
pub mod serial;
pub mod timer;
