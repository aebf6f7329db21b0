use serde::{Deserialize, Serialize};

/// ARM7TDMI operating mode, as encoded in CPSR bits 0-4.
///
/// User is the only unprivileged mode. The five exception modes (Fiq, Irq,
/// Supervisor, Abort, Undefined) each own a banked R13/R14 pair and a SPSR;
/// Fiq additionally banks R8-R12. System shares the User register set while
/// staying privileged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    User = 0b10000,
    Fiq = 0b10001,
    Irq = 0b10010,
    Supervisor = 0b10011,
    Abort = 0b10111,
    Undefined = 0b11011,
    System = 0b11111,
}

impl TryFrom<u32> for Mode {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0b10000 => Ok(Self::User),
            0b10001 => Ok(Self::Fiq),
            0b10010 => Ok(Self::Irq),
            0b10011 => Ok(Self::Supervisor),
            0b10111 => Ok(Self::Abort),
            0b11011 => Ok(Self::Undefined),
            0b11111 => Ok(Self::System),
            _ => Err(format!("unexpected mode bits {value:#07b}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Mode;

    #[test]
    fn mode_round_trip() {
        for mode in [
            Mode::User,
            Mode::Fiq,
            Mode::Irq,
            Mode::Supervisor,
            Mode::Abort,
            Mode::Undefined,
            Mode::System,
        ] {
            assert_eq!(Mode::try_from(mode as u32), Ok(mode));
        }
    }

    #[test]
    fn invalid_mode_bits_are_rejected() {
        assert!(Mode::try_from(0b00000).is_err());
        assert!(Mode::try_from(0b10100).is_err());
    }
}
