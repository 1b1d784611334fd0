//! Packed representation of the CPU's physical pins.
//!
//! A [`PinWord`] carries the 16 address lines, the 8 data lines, and the control lines in one
//! `u64`. Every control line is stored as "asserted" (1) or "not asserted" (0) regardless of the
//! electrical polarity of the real pin, so e.g. an asserted NMI is a 1 bit even though /NMI is
//! active-low on the chip.

use bincode::{Decode, Encode};
use std::fmt::{Debug, Formatter};

pub const ADDRESS_SHIFT: u32 = 0;
pub const ADDRESS_MASK: u64 = 0xFFFF << ADDRESS_SHIFT;

pub const DATA_SHIFT: u32 = 16;
pub const DATA_MASK: u64 = 0xFF << DATA_SHIFT;

/// Read/write line; 1 = read, 0 = write
pub const RW: u64 = 1 << 24;
/// Set by the CPU on every opcode fetch cycle
pub const SYNC: u64 = 1 << 25;
pub const IRQ: u64 = 1 << 26;
pub const NMI: u64 = 1 << 27;
/// Ready line; while asserted, read cycles are repeated instead of advancing
pub const RDY: u64 = 1 << 28;
pub const RES: u64 = 1 << 29;

/// Lines that are driven by the system rather than by the CPU.
pub const INPUT_LINES_MASK: u64 = IRQ | NMI | RDY | RES;

/// Every control line, inputs and outputs.
pub const CONTROL_MASK: u64 = RW | SYNC | INPUT_LINES_MASK;

#[derive(Clone, Copy, PartialEq, Eq, Default, Hash, Encode, Decode)]
pub struct PinWord(u64);

/// Pack an address, a data byte, the read/write line, and a set of control line bits.
///
/// `control_lines` is masked to the control line bits; address and data bits in it are ignored.
#[inline]
#[must_use]
pub fn encode(address: u16, data: u8, read: bool, control_lines: u64) -> PinWord {
    let rw = if read { RW } else { 0 };
    PinWord(
        (u64::from(address) << ADDRESS_SHIFT)
            | (u64::from(data) << DATA_SHIFT)
            | rw
            | (control_lines & CONTROL_MASK & !RW),
    )
}

#[inline]
#[must_use]
pub fn decode_address(pins: PinWord) -> u16 {
    ((pins.0 & ADDRESS_MASK) >> ADDRESS_SHIFT) as u16
}

#[inline]
#[must_use]
pub fn decode_data(pins: PinWord) -> u8 {
    ((pins.0 & DATA_MASK) >> DATA_SHIFT) as u8
}

#[inline]
#[must_use]
pub fn set_data(pins: PinWord, data: u8) -> PinWord {
    PinWord((pins.0 & !DATA_MASK) | (u64::from(data) << DATA_SHIFT))
}

impl PinWord {
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub fn address(self) -> u16 {
        decode_address(self)
    }

    #[inline]
    #[must_use]
    pub fn data(self) -> u8 {
        decode_data(self)
    }

    #[inline]
    #[must_use]
    pub fn with_data(self, data: u8) -> Self {
        set_data(self, data)
    }

    #[inline]
    #[must_use]
    pub fn with_address(self, address: u16) -> Self {
        Self((self.0 & !ADDRESS_MASK) | (u64::from(address) << ADDRESS_SHIFT))
    }

    /// Assert or release the given line(s).
    #[inline]
    #[must_use]
    pub fn with_line(self, mask: u64, asserted: bool) -> Self {
        let mask = mask & CONTROL_MASK;
        if asserted { Self(self.0 | mask) } else { Self(self.0 & !mask) }
    }

    #[inline]
    #[must_use]
    pub fn line(self, mask: u64) -> bool {
        self.0 & mask != 0
    }

    /// Return only the control line bits.
    #[inline]
    #[must_use]
    pub fn control_lines(self) -> u64 {
        self.0 & CONTROL_MASK
    }

    #[inline]
    #[must_use]
    pub fn rw(self) -> bool {
        self.line(RW)
    }

    #[inline]
    #[must_use]
    pub fn sync(self) -> bool {
        self.line(SYNC)
    }

    #[inline]
    #[must_use]
    pub fn irq(self) -> bool {
        self.line(IRQ)
    }

    #[inline]
    #[must_use]
    pub fn nmi(self) -> bool {
        self.line(NMI)
    }

    #[inline]
    #[must_use]
    pub fn rdy(self) -> bool {
        self.line(RDY)
    }

    #[inline]
    #[must_use]
    pub fn res(self) -> bool {
        self.line(RES)
    }
}

impl Debug for PinWord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PinWord {{ address: {:04X}, data: {:02X}, {}",
            self.address(),
            self.data(),
            if self.rw() { "R" } else { "W" }
        )?;

        for (mask, name) in
            [(SYNC, "SYNC"), (IRQ, "IRQ"), (NMI, "NMI"), (RDY, "RDY"), (RES, "RES")]
        {
            if self.line(mask) {
                write!(f, " {name}")?;
            }
        }

        write!(f, " }}")
    }
}
