//! Cycle-stepped effective address resolution.
//!
//! Each call to [`AddressResolver::step`] consumes the byte returned by the previous bus cycle
//! and either requests another bus cycle or yields the effective address. The first call of an
//! instruction receives the opcode byte, which is ignored.

use crate::bus::BusCycle;
use crate::registers::CpuRegisters;
use crate::table::AddressingMode;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct EffectiveAddress {
    pub address: u16,
    /// High byte of the address before indexing was applied
    pub base_high: u8,
    pub page_crossed: bool,
    /// Bus cycles spent resolving, not counting the operand access itself
    pub cycles: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStep {
    Bus(BusCycle),
    Resolved(EffectiveAddress),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct AddressResolver {
    cycle: u8,
    pointer: u8,
    low: u8,
    high: u8,
    page_crossed: bool,
}

macro_rules! invalid_step {
    ($mode:expr, $cycle:expr) => {
        panic!("Invalid address resolution step for {:?}: {}", $mode, $cycle)
    };
}

#[inline]
fn fetch_operand(registers: &mut CpuRegisters) -> ResolveStep {
    let address = registers.pc;
    registers.pc = registers.pc.wrapping_add(1);
    ResolveStep::Bus(BusCycle::read(address))
}

#[inline]
fn zero_page(address: u8) -> u16 {
    address.into()
}

impl AddressResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance resolution by one cycle.
    ///
    /// `always_fix_up` forces indexed modes to spend the page fix-up cycle even when indexing
    /// does not cross a page, which is what stores and read-modify-write instructions do.
    ///
    /// # Panics
    ///
    /// Panics if called again after the address has been resolved.
    pub fn step(
        &mut self,
        mode: AddressingMode,
        always_fix_up: bool,
        registers: &mut CpuRegisters,
        data: u8,
    ) -> ResolveStep {
        let cycle = self.cycle;
        self.cycle += 1;

        match mode {
            AddressingMode::Implied | AddressingMode::Accumulator => match cycle {
                // Dummy read of the byte after the opcode
                0 => ResolveStep::Bus(BusCycle::read(registers.pc)),
                1 => self.resolved(registers.pc, cycle),
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::Immediate => match cycle {
                0 => {
                    let address = registers.pc;
                    registers.pc = registers.pc.wrapping_add(1);
                    self.resolved(address, cycle)
                }
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::ZeroPage => match cycle {
                0 => fetch_operand(registers),
                1 => self.resolved(zero_page(data), cycle),
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::ZeroPageX | AddressingMode::ZeroPageY => match cycle {
                0 => fetch_operand(registers),
                1 => {
                    self.pointer = data;
                    ResolveStep::Bus(BusCycle::read(zero_page(data)))
                }
                2 => {
                    let index =
                        if mode == AddressingMode::ZeroPageX { registers.x } else { registers.y };
                    self.resolved(zero_page(self.pointer.wrapping_add(index)), cycle)
                }
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::Absolute => match cycle {
                0 => fetch_operand(registers),
                1 => {
                    self.low = data;
                    fetch_operand(registers)
                }
                2 => {
                    self.high = data;
                    self.resolved(u16::from_le_bytes([self.low, self.high]), cycle)
                }
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
                let index = if mode == AddressingMode::AbsoluteX { registers.x } else { registers.y };
                match cycle {
                    0 => fetch_operand(registers),
                    1 => {
                        self.low = data;
                        fetch_operand(registers)
                    }
                    2 => {
                        self.high = data;
                        self.index(index, always_fix_up, cycle)
                    }
                    3 => self.fixed_up(index, cycle),
                    _ => invalid_step!(mode, cycle),
                }
            }
            AddressingMode::Indirect => match cycle {
                0 => fetch_operand(registers),
                1 => {
                    self.low = data;
                    fetch_operand(registers)
                }
                2 => {
                    self.high = data;
                    ResolveStep::Bus(BusCycle::read(u16::from_le_bytes([self.low, self.high])))
                }
                3 => {
                    self.pointer = data;
                    // The pointer's high byte is fetched from the same page even if the low byte
                    // of the pointer is $FF
                    let address = u16::from_le_bytes([self.low.wrapping_add(1), self.high]);
                    ResolveStep::Bus(BusCycle::read(address))
                }
                4 => {
                    let address = u16::from_le_bytes([self.pointer, data]);
                    self.resolved(address, cycle)
                }
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::IndirectX => match cycle {
                0 => fetch_operand(registers),
                1 => {
                    self.pointer = data;
                    ResolveStep::Bus(BusCycle::read(zero_page(data)))
                }
                2 => {
                    let address = self.pointer.wrapping_add(registers.x);
                    ResolveStep::Bus(BusCycle::read(zero_page(address)))
                }
                3 => {
                    self.low = data;
                    let address = self.pointer.wrapping_add(registers.x).wrapping_add(1);
                    ResolveStep::Bus(BusCycle::read(zero_page(address)))
                }
                4 => {
                    self.high = data;
                    self.resolved(u16::from_le_bytes([self.low, self.high]), cycle)
                }
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::IndirectY => match cycle {
                0 => fetch_operand(registers),
                1 => {
                    self.pointer = data;
                    ResolveStep::Bus(BusCycle::read(zero_page(data)))
                }
                2 => {
                    self.low = data;
                    ResolveStep::Bus(BusCycle::read(zero_page(self.pointer.wrapping_add(1))))
                }
                3 => {
                    self.high = data;
                    self.index(registers.y, always_fix_up, cycle)
                }
                4 => self.fixed_up(registers.y, cycle),
                _ => invalid_step!(mode, cycle),
            },
            AddressingMode::Relative => match cycle {
                0 => fetch_operand(registers),
                1 => {
                    // PC already points to the next instruction
                    let offset = data as i8;
                    let target = registers.pc.wrapping_add_signed(offset.into());
                    self.high = (registers.pc >> 8) as u8;
                    self.page_crossed = (target >> 8) as u8 != self.high;
                    self.resolved(target, cycle)
                }
                _ => invalid_step!(mode, cycle),
            },
        }
    }

    fn index(&mut self, index: u8, always_fix_up: bool, cycle: u8) -> ResolveStep {
        let (low, overflowed) = self.low.overflowing_add(index);
        self.page_crossed = overflowed;

        if overflowed || always_fix_up {
            // The CPU reads from the address before the high byte is corrected
            ResolveStep::Bus(BusCycle::read(u16::from_le_bytes([low, self.high])))
        } else {
            self.resolved(u16::from_le_bytes([low, self.high]), cycle)
        }
    }

    fn fixed_up(&mut self, index: u8, cycle: u8) -> ResolveStep {
        let address = u16::from_le_bytes([self.low, self.high]).wrapping_add(index.into());
        self.resolved(address, cycle)
    }

    fn resolved(&self, address: u16, cycle: u8) -> ResolveStep {
        ResolveStep::Resolved(EffectiveAddress {
            address,
            base_high: self.high,
            page_crossed: self.page_crossed,
            cycles: cycle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    // Drive the resolver against a flat memory image, returning the result and every bus cycle
    fn resolve(
        mode: AddressingMode,
        always_fix_up: bool,
        registers: &mut CpuRegisters,
        memory: &[u8],
    ) -> (EffectiveAddress, Vec<BusCycle>) {
        let mut resolver = AddressResolver::new();
        let mut cycles = Vec::new();
        let mut data = 0x00;
        loop {
            match resolver.step(mode, always_fix_up, registers, data) {
                ResolveStep::Bus(cycle) => {
                    data = memory[cycle.address as usize];
                    cycles.push(cycle);
                }
                ResolveStep::Resolved(effective) => return (effective, cycles),
            }
        }
    }

    fn memory_with(bytes: &[(u16, u8)]) -> Vec<u8> {
        let mut memory = vec![0; 0x10000];
        for &(address, value) in bytes {
            memory[address as usize] = value;
        }
        memory
    }

    fn registers_at(pc: u16) -> CpuRegisters {
        CpuRegisters { pc, ..CpuRegisters::new() }
    }

    #[test]
    fn immediate() {
        let mut registers = registers_at(0x8001);
        let (effective, cycles) =
            resolve(AddressingMode::Immediate, false, &mut registers, &memory_with(&[]));

        assert_eq!(effective.address, 0x8001);
        assert_eq!(effective.cycles, 0);
        assert!(cycles.is_empty());
        assert_eq!(registers.pc, 0x8002);
    }

    #[test]
    fn zero_page_x_wraps() {
        let mut registers = CpuRegisters { x: 0x20, ..registers_at(0x8001) };
        let memory = memory_with(&[(0x8001, 0xF0)]);
        let (effective, cycles) = resolve(AddressingMode::ZeroPageX, false, &mut registers, &memory);

        assert_eq!(effective.address, 0x0010);
        assert_eq!(effective.cycles, 2);
        assert_eq!(cycles, vec![BusCycle::read(0x8001), BusCycle::read(0x00F0)]);
    }

    #[test]
    fn absolute_x_page_cross() {
        let memory = memory_with(&[(0x8001, 0xF0), (0x8002, 0x12)]);

        let mut registers = CpuRegisters { x: 0x05, ..registers_at(0x8001) };
        let (effective, cycles) = resolve(AddressingMode::AbsoluteX, false, &mut registers, &memory);
        assert_eq!(effective.address, 0x12F5);
        assert!(!effective.page_crossed);
        assert_eq!(cycles.len(), 2);

        let mut registers = CpuRegisters { x: 0x20, ..registers_at(0x8001) };
        let (effective, cycles) = resolve(AddressingMode::AbsoluteX, false, &mut registers, &memory);
        assert_eq!(effective.address, 0x1310);
        assert!(effective.page_crossed);
        assert_eq!(effective.cycles, 3);
        // Dummy read from the uncorrected address
        assert_eq!(cycles[2], BusCycle::read(0x1210));
    }

    #[test]
    fn absolute_y_store_always_fixes_up() {
        let memory = memory_with(&[(0x8001, 0x00), (0x8002, 0x12)]);
        let mut registers = CpuRegisters { y: 0x01, ..registers_at(0x8001) };
        let (effective, cycles) = resolve(AddressingMode::AbsoluteY, true, &mut registers, &memory);

        assert_eq!(effective.address, 0x1201);
        assert!(!effective.page_crossed);
        assert_eq!(cycles.len(), 3);
    }

    #[test]
    fn indirect_x() {
        let memory =
            memory_with(&[(0x8001, 0xFE), (0x0003, 0x34), (0x0004, 0x12), (0x00FE, 0xFF)]);
        let mut registers = CpuRegisters { x: 0x05, ..registers_at(0x8001) };
        let (effective, cycles) = resolve(AddressingMode::IndirectX, false, &mut registers, &memory);

        assert_eq!(effective.address, 0x1234);
        assert_eq!(effective.cycles, 4);
        assert_eq!(cycles[1], BusCycle::read(0x00FE));
        assert_eq!(cycles[2], BusCycle::read(0x0003));
        assert_eq!(cycles[3], BusCycle::read(0x0004));
    }

    #[test]
    fn indirect_y_pointer_wraps_in_zero_page() {
        let memory = memory_with(&[(0x8001, 0xFF), (0x00FF, 0xF0), (0x0000, 0x20)]);
        let mut registers = CpuRegisters { y: 0x20, ..registers_at(0x8001) };
        let (effective, cycles) = resolve(AddressingMode::IndirectY, false, &mut registers, &memory);

        assert_eq!(effective.address, 0x2110);
        assert!(effective.page_crossed);
        assert_eq!(effective.base_high, 0x20);
        assert_eq!(cycles[2], BusCycle::read(0x0000));
        assert_eq!(cycles[3], BusCycle::read(0x2010));
    }

    #[test]
    fn indirect_page_wrap_bug() {
        let memory = memory_with(&[
            (0x8001, 0xFF),
            (0x8002, 0x30),
            (0x30FF, 0x80),
            (0x3000, 0x50),
            (0x3100, 0x40),
        ]);
        let mut registers = registers_at(0x8001);
        let (effective, _) = resolve(AddressingMode::Indirect, false, &mut registers, &memory);

        assert_eq!(effective.address, 0x5080);
        assert_eq!(effective.cycles, 4);
    }

    #[test]
    fn relative() {
        let memory = memory_with(&[(0x80F1, 0x80), (0x8011, 0x10)]);

        let mut registers = registers_at(0x80F1);
        let (effective, _) = resolve(AddressingMode::Relative, false, &mut registers, &memory);
        assert_eq!(effective.address, 0x8072);
        assert!(!effective.page_crossed);

        let mut registers = registers_at(0x8011);
        let (effective, _) = resolve(AddressingMode::Relative, false, &mut registers, &memory);
        assert_eq!(effective.address, 0x8022);

        let memory = memory_with(&[(0x80F1, 0x7F)]);
        let mut registers = registers_at(0x80F1);
        let (effective, _) = resolve(AddressingMode::Relative, false, &mut registers, &memory);
        assert_eq!(effective.address, 0x8171);
        assert!(effective.page_crossed);
    }
}
