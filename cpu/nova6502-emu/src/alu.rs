//! Instruction semantics, separated from bus timing.

use crate::num::GetBit;
use crate::registers::{CpuRegisters, StatusFlags};
use crate::table::Operation;

/// Magic constant ORed into A by the unstable ANE and LXA opcodes.
const UNSTABLE_MAGIC: u8 = 0xEE;

fn add_binary(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let existing_carry = flags.carry;

    let (result, carry1) = accumulator.overflowing_add(value);
    let (result, carry2) = result.overflowing_add(existing_carry.into());
    let new_carry = carry1 || carry2;

    let bit_6_carry = (accumulator & 0x7F) + (value & 0x7F) + u8::from(existing_carry) >= 0x80;
    let overflow = new_carry ^ bit_6_carry;

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(new_carry);

    result
}

// NMOS decimal mode: Z comes from the binary sum, N and V from the high nibble before the final
// adjustment, C from the adjusted high nibble
fn add_decimal(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let carry = u16::from(flags.carry);

    let binary_sum = u16::from(accumulator) + u16::from(value) + carry;

    let mut low = u16::from(accumulator & 0x0F) + u16::from(value & 0x0F) + carry;
    let mut high = u16::from(accumulator & 0xF0) + u16::from(value & 0xF0);
    if low > 0x09 {
        high += 0x10;
        low += 0x06;
    }

    let overflow = !(accumulator ^ value) & (accumulator ^ high as u8) & 0x80 != 0;
    flags.set_zero(binary_sum & 0xFF == 0).set_negative(high.bit(7)).set_overflow(overflow);

    if high > 0x90 {
        high += 0x60;
    }
    flags.set_carry(high > 0xFF);

    ((high & 0xF0) | (low & 0x0F)) as u8
}

fn subtract_binary(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // Carry flag is inverted in subtraction
    let existing_borrow = u8::from(!flags.carry);

    let (result, borrowed1) = accumulator.overflowing_sub(value);
    let (result, borrowed2) = result.overflowing_sub(existing_borrow);
    let borrowed = borrowed1 || borrowed2;

    let bit_6_borrowed = accumulator & 0x7F < (value & 0x7F) + existing_borrow;
    let overflow = borrowed ^ bit_6_borrowed;

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(!borrowed);

    result
}

// NMOS decimal mode: all flags are set exactly as in binary mode, only A is adjusted
fn subtract_decimal(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let borrow = i16::from(!flags.carry);
    subtract_binary(accumulator, value, flags);

    let mut low = i16::from(accumulator & 0x0F) - i16::from(value & 0x0F) - borrow;
    let mut high = i16::from(accumulator & 0xF0) - i16::from(value & 0xF0);
    if low < 0 {
        low -= 0x06;
        high -= 0x10;
    }
    if high < 0 {
        high -= 0x60;
    }

    ((high & 0xF0) | (low & 0x0F)) as u8
}

/// ADC, with BCD arithmetic when `decimal_enabled` and the D flag are both set.
pub fn add(registers: &mut CpuRegisters, value: u8, decimal_enabled: bool) {
    let flags = &mut registers.status;
    registers.accumulator = if decimal_enabled && flags.decimal {
        add_decimal(registers.accumulator, value, flags)
    } else {
        add_binary(registers.accumulator, value, flags)
    };
}

/// SBC, with BCD arithmetic when `decimal_enabled` and the D flag are both set.
pub fn subtract(registers: &mut CpuRegisters, value: u8, decimal_enabled: bool) {
    let flags = &mut registers.status;
    registers.accumulator = if decimal_enabled && flags.decimal {
        subtract_decimal(registers.accumulator, value, flags)
    } else {
        subtract_binary(registers.accumulator, value, flags)
    };
}

fn compare(register: u8, value: u8, flags: &mut StatusFlags) {
    flags
        .set_negative(register.wrapping_sub(value).bit(7))
        .set_zero(register == value)
        .set_carry(register >= value);
}

fn load(value: u8, flags: &mut StatusFlags) -> u8 {
    flags.update_zero_negative(value);
    value
}

fn shift_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let shifted = value << 1;
    flags.set_carry(value.bit(7)).update_zero_negative(shifted);
    shifted
}

fn logical_shift_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let shifted = value >> 1;
    flags.set_carry(value.bit(0)).update_zero_negative(shifted);
    shifted
}

fn rotate_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let rotated = (value << 1) | u8::from(flags.carry);
    flags.set_carry(value.bit(7)).update_zero_negative(rotated);
    rotated
}

fn rotate_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let rotated = (value >> 1) | (u8::from(flags.carry) << 7);
    flags.set_carry(value.bit(0)).update_zero_negative(rotated);
    rotated
}

fn increment(value: u8, flags: &mut StatusFlags) -> u8 {
    load(value.wrapping_add(1), flags)
}

fn decrement(value: u8, flags: &mut StatusFlags) -> u8 {
    load(value.wrapping_sub(1), flags)
}

/// Apply an instruction that reads one operand byte.
pub fn execute_read(
    operation: Operation,
    registers: &mut CpuRegisters,
    operand: u8,
    decimal_enabled: bool,
) {
    let a = registers.accumulator;
    match operation {
        Operation::Adc => add(registers, operand, decimal_enabled),
        Operation::Sbc => subtract(registers, operand, decimal_enabled),
        Operation::And => registers.accumulator = load(a & operand, &mut registers.status),
        Operation::Ora => registers.accumulator = load(a | operand, &mut registers.status),
        Operation::Eor => registers.accumulator = load(a ^ operand, &mut registers.status),
        Operation::Bit => {
            registers
                .status
                .set_negative(operand.bit(7))
                .set_overflow(operand.bit(6))
                .set_zero(a & operand == 0);
        }
        Operation::Cmp => compare(a, operand, &mut registers.status),
        Operation::Cpx => compare(registers.x, operand, &mut registers.status),
        Operation::Cpy => compare(registers.y, operand, &mut registers.status),
        Operation::Lda => registers.accumulator = load(operand, &mut registers.status),
        Operation::Ldx => registers.x = load(operand, &mut registers.status),
        Operation::Ldy => registers.y = load(operand, &mut registers.status),
        Operation::Lax => {
            registers.accumulator = load(operand, &mut registers.status);
            registers.x = operand;
        }
        Operation::Anc => {
            // AND, then C is set the way ASL would set it
            registers.accumulator = load(a & operand, &mut registers.status);
            registers.status.carry = registers.accumulator.bit(7);
        }
        Operation::Alr => {
            registers.accumulator = logical_shift_right(a & operand, &mut registers.status);
        }
        Operation::Arr => and_with_rotate_right(registers, operand),
        Operation::Ane => {
            let value = (a | UNSTABLE_MAGIC) & registers.x & operand;
            registers.accumulator = load(value, &mut registers.status);
        }
        Operation::Lxa => {
            let value = (a | UNSTABLE_MAGIC) & operand;
            registers.accumulator = load(value, &mut registers.status);
            registers.x = value;
        }
        Operation::Axs => {
            // X = (A & X) - #imm without borrow; flags are set as by CMP
            let ax = a & registers.x;
            registers.x = ax.wrapping_sub(operand);
            compare(ax, operand, &mut registers.status);
        }
        Operation::Las => {
            let value = operand & registers.sp;
            registers.accumulator = load(value, &mut registers.status);
            registers.x = value;
            registers.sp = value;
        }
        Operation::Nop => {}
        _ => panic!("{operation:?} is not a read instruction"),
    }
}

fn and_with_rotate_right(registers: &mut CpuRegisters, operand: u8) {
    // A is set to (A & #imm) rotated right, but C and V come from bits 6 and 5 of the result
    let and_value = registers.accumulator & operand;
    registers.accumulator = (and_value >> 1) | (u8::from(registers.status.carry) << 7);

    let overflow = registers.accumulator.bit(6) ^ registers.accumulator.bit(5);
    registers
        .status
        .set_overflow(overflow)
        .set_carry(registers.accumulator.bit(6))
        .update_zero_negative(registers.accumulator);
}

/// Apply a read-modify-write instruction to `operand`, returning the value to write back.
pub fn execute_modify(
    operation: Operation,
    registers: &mut CpuRegisters,
    operand: u8,
    decimal_enabled: bool,
) -> u8 {
    let flags = &mut registers.status;
    match operation {
        Operation::Asl => shift_left(operand, flags),
        Operation::Lsr => logical_shift_right(operand, flags),
        Operation::Rol => rotate_left(operand, flags),
        Operation::Ror => rotate_right(operand, flags),
        Operation::Inc => increment(operand, flags),
        Operation::Dec => decrement(operand, flags),
        Operation::Slo => {
            let shifted = shift_left(operand, flags);
            registers.accumulator = load(registers.accumulator | shifted, &mut registers.status);
            shifted
        }
        Operation::Rla => {
            let rotated = rotate_left(operand, flags);
            registers.accumulator = load(registers.accumulator & rotated, &mut registers.status);
            rotated
        }
        Operation::Sre => {
            let shifted = logical_shift_right(operand, flags);
            registers.accumulator = load(registers.accumulator ^ shifted, &mut registers.status);
            shifted
        }
        Operation::Rra => {
            let rotated = rotate_right(operand, flags);
            add(registers, rotated, decimal_enabled);
            rotated
        }
        Operation::Dcp => {
            let decremented = operand.wrapping_sub(1);
            compare(registers.accumulator, decremented, flags);
            decremented
        }
        Operation::Isc => {
            let incremented = operand.wrapping_add(1);
            subtract(registers, incremented, decimal_enabled);
            incremented
        }
        _ => panic!("{operation:?} is not a read-modify-write instruction"),
    }
}

/// Apply an instruction that only touches registers, including accumulator-mode shifts.
pub fn execute_implied(operation: Operation, registers: &mut CpuRegisters) {
    match operation {
        Operation::Asl => {
            registers.accumulator = shift_left(registers.accumulator, &mut registers.status);
        }
        Operation::Lsr => {
            registers.accumulator =
                logical_shift_right(registers.accumulator, &mut registers.status);
        }
        Operation::Rol => {
            registers.accumulator = rotate_left(registers.accumulator, &mut registers.status);
        }
        Operation::Ror => {
            registers.accumulator = rotate_right(registers.accumulator, &mut registers.status);
        }
        Operation::Clc => registers.status.carry = false,
        Operation::Cld => registers.status.decimal = false,
        Operation::Cli => registers.status.interrupt_disable = false,
        Operation::Clv => registers.status.overflow = false,
        Operation::Sec => registers.status.carry = true,
        Operation::Sed => registers.status.decimal = true,
        Operation::Sei => registers.status.interrupt_disable = true,
        Operation::Inx => registers.x = increment(registers.x, &mut registers.status),
        Operation::Iny => registers.y = increment(registers.y, &mut registers.status),
        Operation::Dex => registers.x = decrement(registers.x, &mut registers.status),
        Operation::Dey => registers.y = decrement(registers.y, &mut registers.status),
        Operation::Tax => registers.x = load(registers.accumulator, &mut registers.status),
        Operation::Tay => registers.y = load(registers.accumulator, &mut registers.status),
        Operation::Txa => registers.accumulator = load(registers.x, &mut registers.status),
        Operation::Tya => registers.accumulator = load(registers.y, &mut registers.status),
        Operation::Tsx => registers.x = load(registers.sp, &mut registers.status),
        // TXS does not touch flags
        Operation::Txs => registers.sp = registers.x,
        Operation::Nop => {}
        _ => panic!("{operation:?} is not an implied instruction"),
    }
}

/// Value and address for a store. `base_high` is the high byte of the address before indexing.
///
/// SHA/SHX/SHY/TAS store `register & (base_high + 1)`, and when indexing crosses a page the
/// stored value also replaces the high byte of the target address.
pub fn store(
    operation: Operation,
    registers: &mut CpuRegisters,
    address: u16,
    base_high: u8,
    page_crossed: bool,
) -> (u16, u8) {
    let unstable = |value: u8| {
        let value = value & base_high.wrapping_add(1);
        let address =
            if page_crossed { u16::from_le_bytes([address as u8, value]) } else { address };
        (address, value)
    };

    match operation {
        Operation::Sta => (address, registers.accumulator),
        Operation::Stx => (address, registers.x),
        Operation::Sty => (address, registers.y),
        Operation::Sax => (address, registers.accumulator & registers.x),
        Operation::Sha => unstable(registers.accumulator & registers.x),
        Operation::Shx => unstable(registers.x),
        Operation::Shy => unstable(registers.y),
        Operation::Tas => {
            registers.sp = registers.accumulator & registers.x;
            unstable(registers.sp)
        }
        _ => panic!("{operation:?} is not a store instruction"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn registers(accumulator: u8, status: u8) -> CpuRegisters {
        CpuRegisters { accumulator, status: StatusFlags::from_byte(status), ..CpuRegisters::new() }
    }

    fn flags(registers: &CpuRegisters) -> (bool, bool, bool, bool) {
        let status = registers.status;
        (status.negative, status.overflow, status.zero, status.carry)
    }

    #[test]
    fn adc_signed_overflow() {
        let mut r = registers(0x50, 0x00);
        add(&mut r, 0x50, false);
        assert_eq!(r.accumulator, 0xA0);
        // N, V, Z, C
        assert_eq!(flags(&r), (true, true, false, false));
    }

    #[test]
    fn adc_vectors() {
        // (A, operand, carry in) -> (result, N, V, Z, C)
        let vectors = [
            (0x01, 0x01, false, 0x02, false, false, false, false),
            (0x01, 0xFF, false, 0x00, false, false, true, true),
            (0x7F, 0x01, false, 0x80, true, true, false, false),
            (0x80, 0xFF, false, 0x7F, false, true, false, true),
            (0xFF, 0x00, true, 0x00, false, false, true, true),
            (0xD0, 0x90, false, 0x60, false, true, false, true),
            (0x50, 0x10, true, 0x61, false, false, false, false),
        ];

        for (a, operand, carry, result, n, v, z, c) in vectors {
            let mut r = registers(a, u8::from(carry));
            add(&mut r, operand, false);
            assert_eq!(r.accumulator, result, "{a:02X} + {operand:02X} + {carry}");
            assert_eq!(flags(&r), (n, v, z, c), "{a:02X} + {operand:02X} + {carry}");
        }
    }

    #[test]
    fn sbc_vectors() {
        // (A, operand, carry in) -> (result, N, V, Z, C)
        let vectors = [
            (0x50, 0xF0, true, 0x60, false, false, false, false),
            (0x50, 0xB0, true, 0xA0, true, true, false, false),
            (0x50, 0x70, true, 0xE0, true, false, false, false),
            (0xD0, 0x70, true, 0x60, false, true, false, true),
            (0x05, 0x05, true, 0x00, false, false, true, true),
            (0x05, 0x05, false, 0xFF, true, false, false, false),
            (0x00, 0x01, true, 0xFF, true, false, false, false),
            (0x80, 0x01, true, 0x7F, false, true, false, true),
        ];

        for (a, operand, carry, result, n, v, z, c) in vectors {
            let mut r = registers(a, u8::from(carry));
            subtract(&mut r, operand, false);
            assert_eq!(r.accumulator, result, "{a:02X} - {operand:02X} - !{carry}");
            assert_eq!(flags(&r), (n, v, z, c), "{a:02X} - {operand:02X} - !{carry}");
        }
    }

    #[test]
    fn decimal_ignored_unless_enabled() {
        let mut r = registers(0x09, 0x08);
        add(&mut r, 0x01, false);
        assert_eq!(r.accumulator, 0x0A);

        let mut r = registers(0x09, 0x08);
        add(&mut r, 0x01, true);
        assert_eq!(r.accumulator, 0x10);
    }

    #[test]
    fn decimal_add() {
        // (A, operand, carry in) -> (result, carry out)
        let vectors = [
            (0x00, 0x00, false, 0x00, false),
            (0x15, 0x27, false, 0x42, false),
            (0x58, 0x46, true, 0x05, true),
            (0x99, 0x01, false, 0x00, true),
            (0x81, 0x92, false, 0x73, true),
            (0x12, 0x34, true, 0x47, false),
        ];

        for (a, operand, carry, result, carry_out) in vectors {
            let mut r = registers(a, 0x08 | u8::from(carry));
            add(&mut r, operand, true);
            assert_eq!(r.accumulator, result, "{a:02X} + {operand:02X} + {carry}");
            assert_eq!(r.status.carry, carry_out, "{a:02X} + {operand:02X} + {carry}");
        }

        // Z comes from the binary result
        let mut r = registers(0x99, 0x08);
        add(&mut r, 0x01, true);
        assert!(!r.status.zero);
    }

    #[test]
    fn decimal_subtract() {
        // (A, operand, carry in) -> (result, carry out)
        let vectors = [
            (0x46, 0x12, true, 0x34, true),
            (0x40, 0x13, true, 0x27, true),
            (0x32, 0x02, false, 0x29, true),
            (0x12, 0x21, true, 0x91, false),
            (0x21, 0x34, true, 0x87, false),
            (0x00, 0x01, true, 0x99, false),
        ];

        for (a, operand, carry, result, carry_out) in vectors {
            let mut r = registers(a, 0x08 | u8::from(carry));
            subtract(&mut r, operand, true);
            assert_eq!(r.accumulator, result, "{a:02X} - {operand:02X} - !{carry}");
            assert_eq!(r.status.carry, carry_out, "{a:02X} - {operand:02X} - !{carry}");
        }
    }

    #[test]
    fn unstable_store() {
        let mut r = CpuRegisters { x: 0xFF, ..CpuRegisters::new() };
        assert_eq!(store(Operation::Shx, &mut r, 0x1234, 0x12, false), (0x1234, 0x13));
        assert_eq!(store(Operation::Shx, &mut r, 0x1305, 0x12, true), (0x1305, 0x13));

        let mut r = CpuRegisters { x: 0x01, ..CpuRegisters::new() };
        assert_eq!(store(Operation::Shx, &mut r, 0x1305, 0x12, true), (0x0105, 0x01));
    }

    #[test]
    fn arr() {
        let mut r = registers(0xFF, 0x01);
        execute_read(Operation::Arr, &mut r, 0xC0, false);
        assert_eq!(r.accumulator, 0xE0);
        assert!(r.status.carry);
        assert!(!r.status.overflow);
        assert!(r.status.negative);

        let mut r = registers(0xFF, 0x00);
        execute_read(Operation::Arr, &mut r, 0x80, false);
        assert_eq!(r.accumulator, 0x40);
        assert!(r.status.carry);
        assert!(r.status.overflow);
    }

    #[test]
    fn axs() {
        let mut r = CpuRegisters { accumulator: 0xF0, x: 0x3C, ..CpuRegisters::new() };
        execute_read(Operation::Axs, &mut r, 0x10, false);
        assert_eq!(r.x, 0x20);
        assert!(r.status.carry);

        // A & X is now 0x20
        execute_read(Operation::Axs, &mut r, 0x40, false);
        assert_eq!(r.x, 0xE0);
        assert!(!r.status.carry);
        assert!(r.status.negative);
    }
}
