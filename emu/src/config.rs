//! Core configuration. The three hardware-ambiguity toggles default to the
//! documented-hardware behavior; see DESIGN.md for the reasoning.

#[derive(Debug, Clone)]
pub struct Config {
    /// Boot straight into the cartridge with the post-BIOS register state
    /// instead of executing a BIOS image.
    pub skip_bios: bool,

    /// Park a disabled PSG channel's generator event instead of letting it
    /// keep rescheduling at its idle interval.
    pub psg_events_pause_when_disabled: bool,

    /// Apply the mid-envelope write ("zombie") volume adjustments.
    pub emulate_zombie_envelope: bool,

    /// Disallowed bitmap-range VRAM reads return 0; when false they return
    /// open bus.
    pub bitmap_vram_invalid_reads_zero: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            skip_bios: false,
            psg_events_pause_when_disabled: false,
            emulate_zombie_envelope: true,
            bitmap_vram_invalid_reads_zero: true,
        }
    }
}
