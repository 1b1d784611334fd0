use crate::num::GetBit;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum StatusReadContext {
    HardwareInterruptHandler,
    Brk,
    PushStack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Flag {
    Carry,
    Zero,
    InterruptDisable,
    Decimal,
    Break,
    Unused,
    Overflow,
    Negative,
}

impl Flag {
    pub const ALL: [Self; 8] = [
        Self::Carry,
        Self::Zero,
        Self::InterruptDisable,
        Self::Decimal,
        Self::Break,
        Self::Unused,
        Self::Overflow,
        Self::Negative,
    ];

    #[inline]
    #[must_use]
    pub fn mask(self) -> u8 {
        match self {
            Self::Carry => 1 << 0,
            Self::Zero => 1 << 1,
            Self::InterruptDisable => 1 << 2,
            Self::Decimal => 1 << 3,
            Self::Break => 1 << 4,
            Self::Unused => 1 << 5,
            Self::Overflow => 1 << 6,
            Self::Negative => 1 << 7,
        }
    }
}

/// The P register.
///
/// The break and unused bits have no storage on the real chip. They are kept here so that the
/// status byte can be inspected as one value; the unused bit always reads as 1, and the break bit
/// written to the stack is decided by [`StatusReadContext`] rather than by the stored value. Pulls
/// from the stack never set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    pub break_flag: bool,
    pub decimal: bool,
    pub interrupt_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    #[must_use]
    pub fn new() -> Self {
        // I flag defaults to 1, others default to 0
        Self {
            negative: false,
            overflow: false,
            break_flag: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    pub fn set_negative(&mut self, negative: bool) -> &mut Self {
        self.negative = negative;
        self
    }

    pub fn set_overflow(&mut self, overflow: bool) -> &mut Self {
        self.overflow = overflow;
        self
    }

    pub fn set_zero(&mut self, zero: bool) -> &mut Self {
        self.zero = zero;
        self
    }

    pub fn set_carry(&mut self, carry: bool) -> &mut Self {
        self.carry = carry;
        self
    }

    #[must_use]
    pub fn test_flag(&self, flag: Flag) -> bool {
        match flag {
            Flag::Carry => self.carry,
            Flag::Zero => self.zero,
            Flag::InterruptDisable => self.interrupt_disable,
            Flag::Decimal => self.decimal,
            Flag::Break => self.break_flag,
            Flag::Unused => true,
            Flag::Overflow => self.overflow,
            Flag::Negative => self.negative,
        }
    }

    pub fn set_flag(&mut self, flag: Flag) {
        self.write_flag(flag, true);
    }

    /// Clearing [`Flag::Unused`] has no effect.
    pub fn clear_flag(&mut self, flag: Flag) {
        self.write_flag(flag, false);
    }

    fn write_flag(&mut self, flag: Flag, value: bool) {
        match flag {
            Flag::Carry => self.carry = value,
            Flag::Zero => self.zero = value,
            Flag::InterruptDisable => self.interrupt_disable = value,
            Flag::Decimal => self.decimal = value,
            Flag::Break => self.break_flag = value,
            Flag::Unused => {}
            Flag::Overflow => self.overflow = value,
            Flag::Negative => self.negative = value,
        }
    }

    pub fn update_zero_negative(&mut self, value: u8) -> &mut Self {
        self.set_zero(value == 0).set_negative(value.bit(7))
    }

    /// The status byte as it would be pushed to the stack in the given context.
    #[must_use]
    pub fn to_byte(self, read_ctx: StatusReadContext) -> u8 {
        // B flag is set during BRK and PHA/PHP, cleared during NMI & IRQ handlers
        let b_flag = match read_ctx {
            StatusReadContext::Brk | StatusReadContext::PushStack => 0x10,
            StatusReadContext::HardwareInterruptHandler => 0x00,
        };

        (self.bits() & !Flag::Break.mask()) | b_flag
    }

    /// The status byte including the stored break bit. Bit 5 is always set.
    #[must_use]
    pub fn bits(self) -> u8 {
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | 0x20
            | (u8::from(self.break_flag) << 4)
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.interrupt_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    /// Load flags from a byte pulled off the stack. Bit 4 is ignored.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte.bit(7),
            overflow: byte.bit(6),
            // B only exists on the stack
            break_flag: false,
            decimal: byte.bit(3),
            interrupt_disable: byte.bit(2),
            zero: byte.bit(1),
            carry: byte.bit(0),
        }
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct CpuRegisters {
    pub accumulator: u8,
    pub x: u8,
    pub y: u8,
    pub status: StatusFlags,
    pub pc: u16,
    pub sp: u8,
}

impl CpuRegisters {
    /// Register contents at power-on, before the RESET sequence has run.
    #[must_use]
    pub fn new() -> Self {
        Self { accumulator: 0, x: 0, y: 0, status: StatusFlags::new(), pc: 0x0000, sp: 0x00 }
    }

    /// Stack address currently pointed to by S.
    #[inline]
    #[must_use]
    pub fn stack_address(&self) -> u16 {
        u16::from_be_bytes([0x01, self.sp])
    }
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn unused_bit_always_set() {
        let mut flags = StatusFlags::from_byte(0x00);
        assert_eq!(flags.bits(), 0x20);

        flags.clear_flag(Flag::Unused);
        assert!(flags.test_flag(Flag::Unused));
        assert_eq!(flags.bits() & 0x20, 0x20);

        for ctx in
            [StatusReadContext::Brk, StatusReadContext::PushStack, StatusReadContext::HardwareInterruptHandler]
        {
            assert_eq!(flags.to_byte(ctx) & 0x20, 0x20);
        }
    }

    #[test]
    fn break_bit_depends_on_context() {
        let flags = StatusFlags::from_byte(0xC3);
        assert_eq!(flags.to_byte(StatusReadContext::Brk), 0xF3);
        assert_eq!(flags.to_byte(StatusReadContext::PushStack), 0xF3);
        assert_eq!(flags.to_byte(StatusReadContext::HardwareInterruptHandler), 0xE3);
    }

    #[test]
    fn from_byte_ignores_break() {
        let flags = StatusFlags::from_byte(0xFF);
        assert!(!flags.test_flag(Flag::Break));
        assert_eq!(flags.bits(), 0xEF);
    }

    #[test]
    fn set_clear_test() {
        let mut flags = StatusFlags::from_byte(0x00);
        for flag in Flag::ALL {
            flags.set_flag(flag);
            assert!(flags.test_flag(flag), "{flag:?}");
            assert_eq!(flags.bits() & flag.mask(), flag.mask());
        }
        assert_eq!(flags.bits(), 0xFF);

        for flag in Flag::ALL {
            flags.clear_flag(flag);
        }
        assert_eq!(flags.bits(), 0x20);
    }

    #[test]
    fn zero_negative() {
        let mut flags = StatusFlags::new();
        flags.update_zero_negative(0x00);
        assert!(flags.zero && !flags.negative);

        flags.update_zero_negative(0x80);
        assert!(!flags.zero && flags.negative);

        flags.update_zero_negative(0x7F);
        assert!(!flags.zero && !flags.negative);
    }
}
