//! Small decode enums shared by the ARM and Thumb instruction handlers.

/// Width of a single data transfer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ReadWriteKind {
    /// 32-bit in ARM state.
    #[default]
    Word,

    /// 8-bit.
    Byte,
}

impl From<bool> for ReadWriteKind {
    fn from(value: bool) -> Self {
        if value {
            Self::Byte
        } else {
            Self::Word
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadStoreKind {
    Store,
    Load,
}

impl From<bool> for LoadStoreKind {
    fn from(b: bool) -> Self {
        match b {
            false => Self::Store,
            true => Self::Load,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Indexing {
    /// Add the offset after the transfer.
    Post,

    /// Add the offset before the transfer.
    Pre,
}

impl From<bool> for Indexing {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Post,
            true => Self::Pre,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Offsetting {
    /// Subtract the offset from the base.
    Down,

    /// Add the offset to the base.
    Up,
}

impl From<bool> for Offsetting {
    fn from(state: bool) -> Self {
        match state {
            false => Self::Down,
            true => Self::Up,
        }
    }
}

/// Second-operand kind of a data-processing instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandKind {
    Register,
    Immediate,
}

impl From<bool> for OperandKind {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Register,
            true => Self::Immediate,
        }
    }
}

/// Barrel shifter operation, bits 6:5 of a shifted register operand.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShiftKind {
    Lsl = 0,
    Lsr = 1,
    Asr = 2,
    Ror = 3,
}

impl From<u32> for ShiftKind {
    fn from(value: u32) -> Self {
        match value & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            3 => Self::Ror,
            _ => unreachable!(),
        }
    }
}

/// Transfer flavor of the halfword/signed data-transfer format, bits 6:5.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HalfwordTransferKind {
    UnsignedHalfwords,
    SignedByte,
    SignedHalfwords,
}

impl From<u32> for HalfwordTransferKind {
    fn from(value: u32) -> Self {
        match value & 0b11 {
            0b01 => Self::UnsignedHalfwords,
            0b10 => Self::SignedByte,
            0b11 => Self::SignedHalfwords,
            _ => panic!("SWP encoding reached the halfword-transfer decoder"),
        }
    }
}
