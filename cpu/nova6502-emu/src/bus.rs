use crate::pins::{self, PinWord};
use bincode::{Decode, Encode};

/// Something that can answer the CPU's bus cycles.
///
/// The CPU itself never calls this trait; it only emits pin words. [`access`] performs the bus
/// cycle described by a pin word against an implementation of this trait.
pub trait BusInterface {
    fn read(&mut self, address: u16) -> u8;

    fn write(&mut self, address: u16, value: u8);
}

/// Perform the bus cycle requested by `pins`.
///
/// For a read the byte is placed on the data lines of the returned word; for a write the data
/// lines are stored and the word is returned unchanged.
#[inline]
pub fn access<B: BusInterface + ?Sized>(bus: &mut B, pins: PinWord) -> PinWord {
    let address = pins::decode_address(pins);
    if pins.rw() {
        pins::set_data(pins, bus.read(address))
    } else {
        bus.write(address, pins::decode_data(pins));
        pins
    }
}

impl<B: BusInterface + ?Sized> BusInterface for &mut B {
    #[inline]
    fn read(&mut self, address: u16) -> u8 {
        (**self).read(address)
    }

    #[inline]
    fn write(&mut self, address: u16, value: u8) {
        (**self).write(address, value);
    }
}

/// One bus cycle as requested by the CPU, before it is packed into a [`PinWord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct BusCycle {
    pub address: u16,
    pub data: u8,
    pub read: bool,
    pub sync: bool,
}

impl BusCycle {
    #[inline]
    #[must_use]
    pub fn read(address: u16) -> Self {
        Self { address, data: 0, read: true, sync: false }
    }

    #[inline]
    #[must_use]
    pub fn write(address: u16, data: u8) -> Self {
        Self { address, data, read: false, sync: false }
    }

    /// An opcode fetch; identical to a read except that SYNC is asserted.
    #[inline]
    #[must_use]
    pub fn fetch(address: u16) -> Self {
        Self { address, data: 0, read: true, sync: true }
    }

    /// Pack into a pin word, carrying over the system-driven input lines from `inputs`.
    #[inline]
    #[must_use]
    pub fn to_pins(self, inputs: PinWord) -> PinWord {
        let sync = if self.sync { pins::SYNC } else { 0 };
        pins::encode(
            self.address,
            self.data,
            self.read,
            (inputs.control_lines() & pins::INPUT_LINES_MASK) | sync,
        )
    }
}
