//! The cycle-stepped execution state machine.
//!
//! Every call to [`step`] corresponds to one clock cycle. It consumes the byte delivered by the
//! previous bus cycle and returns the next bus cycle to perform. An instruction's final bus cycle
//! is consumed in the same step that issues the following opcode fetch.

use crate::addressing::{AddressResolver, EffectiveAddress, ResolveStep};
use crate::alu;
use crate::bus::BusCycle;
use crate::interrupts::{InterruptSource, RESET_VECTOR};
use crate::registers::{StatusFlags, StatusReadContext};
use crate::table::{AccessKind, Instruction, Operation};
use crate::Mos6502;
use bincode::{Decode, Encode};

/// Address read over and over by a jammed CPU.
const JAM_ADDRESS: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Phase {
    /// No bus cycle has been issued yet
    PowerOn,
    /// The previous cycle fetched an opcode
    FetchOpcode,
    ResolveAddress,
    /// Waiting on the operand read
    Execute,
    /// Read-modify-write; the unmodified value has been written back
    Writeback,
    /// The final bus cycle was a write; nothing left to apply
    Complete,
    /// Taken branch
    Branch,
    /// JSR, RTS, RTI, PHA, PHP, PLA, PLP
    Stack,
    /// BRK, NMI, IRQ, or RESET sequence
    Interrupt,
    Jammed,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct InstructionState {
    pub phase: Phase,
    pub opcode: u8,
    pub cycle: u8,
    pub resolver: AddressResolver,
    pub address: u16,
    pub page_crossed: bool,
    pub operand: u8,
    pub result: u8,
    pub interrupt: InterruptSource,
    pub interrupt_vector: u16,
    pub skip_poll: bool,
}

impl InstructionState {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            opcode: 0,
            cycle: 0,
            resolver: AddressResolver::new(),
            address: 0,
            page_crossed: false,
            operand: 0,
            result: 0,
            interrupt: InterruptSource::Reset,
            interrupt_vector: RESET_VECTOR,
            skip_poll: false,
        }
    }

    #[inline]
    pub fn instruction(&self) -> Instruction {
        Instruction::from_opcode(self.opcode)
    }

    /// Whether the interrupt lines should be polled after the current cycle.
    #[inline]
    pub fn polls_interrupts(&self) -> bool {
        !self.skip_poll && !matches!(self.phase, Phase::Interrupt | Phase::Jammed)
    }
}

macro_rules! invalid_cycle {
    ($cpu:expr) => {
        panic!("Invalid cycle for {:?}: {}", $cpu.state.phase, $cpu.state.cycle)
    };
}

pub fn step(cpu: &mut Mos6502, data: u8) -> BusCycle {
    match cpu.state.phase {
        Phase::PowerOn | Phase::Complete => begin_instruction(cpu),
        Phase::FetchOpcode => decode(cpu, data),
        Phase::ResolveAddress => resolve_address(cpu, data),
        Phase::Execute => execute(cpu, data),
        Phase::Writeback => writeback(cpu),
        Phase::Branch => branch(cpu),
        Phase::Stack => stack_sequence(cpu, data),
        Phase::Interrupt => interrupt_sequence(cpu, data),
        Phase::Jammed => jammed(cpu),
    }
}

/// Start the next instruction, or an interrupt sequence if one is pending.
///
/// The opcode at PC is always fetched. When an interrupt is serviced the fetched byte is
/// discarded and PC is not incremented.
fn begin_instruction(cpu: &mut Mos6502) -> BusCycle {
    let pc = cpu.registers.pc;

    match cpu.interrupts.take_pending() {
        Some(source) => {
            log::trace!("Servicing {source:?} at PC={pc:04X}");

            cpu.state.phase = Phase::Interrupt;
            cpu.state.interrupt = source;
            // RESET has no dummy read after the discarded fetch
            cpu.state.cycle = if source == InterruptSource::Reset { 1 } else { 0 };

            if source == InterruptSource::Reset {
                cpu.jammed = false;
            }
        }
        None => {
            cpu.state.phase = Phase::FetchOpcode;
        }
    }

    BusCycle::fetch(pc)
}

#[inline]
fn fetch_operand(cpu: &mut Mos6502) -> BusCycle {
    let address = cpu.registers.pc;
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    BusCycle::read(address)
}

#[inline]
fn push(cpu: &mut Mos6502, value: u8) -> BusCycle {
    let address = cpu.registers.stack_address();
    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
    BusCycle::write(address, value)
}

// Read the current stack slot and then increment S
#[inline]
fn pull(cpu: &mut Mos6502) -> BusCycle {
    let address = cpu.registers.stack_address();
    cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
    BusCycle::read(address)
}

fn decode(cpu: &mut Mos6502, opcode: u8) -> BusCycle {
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);

    cpu.state.opcode = opcode;
    cpu.state.cycle = 0;
    cpu.state.resolver = AddressResolver::new();

    let instruction = Instruction::from_opcode(opcode);
    match instruction.access_kind() {
        AccessKind::Stack => {
            cpu.state.phase = Phase::Stack;
            stack_sequence(cpu, opcode)
        }
        AccessKind::Break => {
            cpu.state.phase = Phase::Interrupt;
            cpu.state.interrupt = InterruptSource::Brk;
            interrupt_sequence(cpu, opcode)
        }
        AccessKind::Jam => {
            log::warn!(
                "CPU jammed by opcode ${opcode:02X} at PC={:04X}",
                cpu.registers.pc.wrapping_sub(1)
            );
            cpu.jammed = true;
            cpu.state.phase = Phase::Jammed;
            BusCycle::read(JAM_ADDRESS)
        }
        AccessKind::Read
        | AccessKind::Write
        | AccessKind::ReadModifyWrite
        | AccessKind::Implied
        | AccessKind::Branch
        | AccessKind::Jump => {
            cpu.state.phase = Phase::ResolveAddress;
            resolve_address(cpu, opcode)
        }
    }
}

fn resolve_address(cpu: &mut Mos6502, data: u8) -> BusCycle {
    let instruction = cpu.state.instruction();
    let step = cpu.state.resolver.step(
        instruction.mode,
        instruction.always_fixes_up_address(),
        &mut cpu.registers,
        data,
    );

    let effective = match step {
        ResolveStep::Bus(cycle) => return cycle,
        ResolveStep::Resolved(effective) => effective,
    };

    cpu.state.address = effective.address;
    cpu.state.page_crossed = effective.page_crossed;

    match instruction.access_kind() {
        AccessKind::Read | AccessKind::ReadModifyWrite => {
            cpu.state.phase = Phase::Execute;
            BusCycle::read(effective.address)
        }
        AccessKind::Write => {
            let (address, value) = alu::store(
                instruction.operation,
                &mut cpu.registers,
                effective.address,
                effective.base_high,
                effective.page_crossed,
            );
            cpu.state.phase = Phase::Complete;
            BusCycle::write(address, value)
        }
        AccessKind::Implied => {
            alu::execute_implied(instruction.operation, &mut cpu.registers);
            begin_instruction(cpu)
        }
        AccessKind::Jump => {
            cpu.registers.pc = effective.address;
            begin_instruction(cpu)
        }
        AccessKind::Branch => start_branch(cpu, instruction.operation, effective),
        AccessKind::Stack | AccessKind::Break | AccessKind::Jam => {
            panic!("{instruction} does not use the address resolver")
        }
    }
}

fn execute(cpu: &mut Mos6502, data: u8) -> BusCycle {
    let instruction = cpu.state.instruction();
    let decimal_enabled = cpu.variant.decimal_enabled();

    if instruction.access_kind() == AccessKind::ReadModifyWrite {
        cpu.state.operand = data;
        cpu.state.result =
            alu::execute_modify(instruction.operation, &mut cpu.registers, data, decimal_enabled);
        cpu.state.phase = Phase::Writeback;

        // The unmodified value is written back before the result
        BusCycle::write(cpu.state.address, data)
    } else {
        alu::execute_read(instruction.operation, &mut cpu.registers, data, decimal_enabled);
        begin_instruction(cpu)
    }
}

fn writeback(cpu: &mut Mos6502) -> BusCycle {
    cpu.state.phase = Phase::Complete;
    BusCycle::write(cpu.state.address, cpu.state.result)
}

fn branch_condition(operation: Operation, status: StatusFlags) -> bool {
    match operation {
        Operation::Bcc => !status.carry,
        Operation::Bcs => status.carry,
        Operation::Bne => !status.zero,
        Operation::Beq => status.zero,
        Operation::Bpl => !status.negative,
        Operation::Bmi => status.negative,
        Operation::Bvc => !status.overflow,
        Operation::Bvs => status.overflow,
        _ => panic!("{operation:?} is not a branch"),
    }
}

fn start_branch(cpu: &mut Mos6502, operation: Operation, target: EffectiveAddress) -> BusCycle {
    if !branch_condition(operation, cpu.registers.status) {
        return begin_instruction(cpu);
    }

    cpu.state.phase = Phase::Branch;
    cpu.state.cycle = 0;
    // Interrupts are not polled on the last cycle of a taken branch that stays on the same page
    cpu.state.skip_poll = !target.page_crossed;

    BusCycle::read(cpu.registers.pc)
}

fn branch(cpu: &mut Mos6502) -> BusCycle {
    let target = cpu.state.address;

    if cpu.state.page_crossed && cpu.state.cycle == 0 {
        cpu.state.cycle = 1;

        // Read with the new low byte but the old high byte
        let pc = cpu.registers.pc;
        return BusCycle::read(u16::from_le_bytes([target as u8, (pc >> 8) as u8]));
    }

    cpu.registers.pc = target;
    begin_instruction(cpu)
}

fn stack_sequence(cpu: &mut Mos6502, data: u8) -> BusCycle {
    let operation = cpu.state.instruction().operation;
    let cycle = cpu.state.cycle;
    cpu.state.cycle += 1;

    match (operation, cycle) {
        (Operation::Jsr, 0) => fetch_operand(cpu),
        (
            Operation::Pha
            | Operation::Php
            | Operation::Pla
            | Operation::Plp
            | Operation::Rts
            | Operation::Rti,
            0,
        ) => BusCycle::read(cpu.registers.pc),
        (Operation::Pha, 1) => {
            let value = cpu.registers.accumulator;
            push(cpu, value)
        }
        (Operation::Php, 1) => {
            let value = cpu.registers.status.to_byte(StatusReadContext::PushStack);
            push(cpu, value)
        }
        (Operation::Pha | Operation::Php, 2) => begin_instruction(cpu),
        (Operation::Pla | Operation::Plp | Operation::Rts | Operation::Rti, 1) => pull(cpu),
        (Operation::Pla | Operation::Plp, 2) => BusCycle::read(cpu.registers.stack_address()),
        (Operation::Pla, 3) => {
            cpu.registers.accumulator = data;
            cpu.registers.status.update_zero_negative(data);
            begin_instruction(cpu)
        }
        (Operation::Plp, 3) => {
            cpu.registers.status = StatusFlags::from_byte(data);
            begin_instruction(cpu)
        }
        (Operation::Jsr, 1) => {
            cpu.state.operand = data;
            BusCycle::read(cpu.registers.stack_address())
        }
        (Operation::Jsr, 2) => {
            // PC points to the high byte of the target address here
            let [_, pc_msb] = cpu.registers.pc.to_le_bytes();
            push(cpu, pc_msb)
        }
        (Operation::Jsr, 3) => {
            let [pc_lsb, _] = cpu.registers.pc.to_le_bytes();
            push(cpu, pc_lsb)
        }
        (Operation::Jsr, 4) => BusCycle::read(cpu.registers.pc),
        (Operation::Jsr, 5) => {
            cpu.registers.pc = u16::from_le_bytes([cpu.state.operand, data]);
            begin_instruction(cpu)
        }
        (Operation::Rts | Operation::Rti, 2) => pull(cpu),
        (Operation::Rts, 3) => {
            cpu.state.operand = data;
            BusCycle::read(cpu.registers.stack_address())
        }
        (Operation::Rts, 4) => {
            cpu.registers.pc = u16::from_le_bytes([cpu.state.operand, data]);
            fetch_operand(cpu)
        }
        (Operation::Rts, 5) => begin_instruction(cpu),
        (Operation::Rti, 3) => {
            cpu.registers.status = StatusFlags::from_byte(data);
            pull(cpu)
        }
        (Operation::Rti, 4) => {
            cpu.state.operand = data;
            BusCycle::read(cpu.registers.stack_address())
        }
        (Operation::Rti, 5) => {
            cpu.registers.pc = u16::from_le_bytes([cpu.state.operand, data]);
            begin_instruction(cpu)
        }
        _ => invalid_cycle!(cpu),
    }
}

fn interrupt_sequence(cpu: &mut Mos6502, data: u8) -> BusCycle {
    let source = cpu.state.interrupt;
    let cycle = cpu.state.cycle;
    cpu.state.cycle += 1;

    match cycle {
        0 => {
            if source == InterruptSource::Brk {
                // BRK skips over its padding byte
                fetch_operand(cpu)
            } else {
                BusCycle::read(cpu.registers.pc)
            }
        }
        1..=3 if source == InterruptSource::Reset => {
            // RESET decrements S three times like the pushes below, but the bus stays in read mode
            if cycle == 3 {
                cpu.state.interrupt_vector = source.vector();
            }
            let address = cpu.registers.stack_address();
            cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
            BusCycle::read(address)
        }
        1 => {
            let [_, pc_msb] = cpu.registers.pc.to_le_bytes();
            push(cpu, pc_msb)
        }
        2 => {
            let [pc_lsb, _] = cpu.registers.pc.to_le_bytes();
            push(cpu, pc_lsb)
        }
        3 => {
            // The vector is chosen here; an NMI that arrived by now takes over a BRK or IRQ
            let nmi = cpu.interrupts.acknowledge_nmi();
            if nmi && source != InterruptSource::Nmi {
                log::trace!("NMI hijacked {source:?} sequence");
            }
            let vector_source = if nmi { InterruptSource::Nmi } else { source };
            cpu.state.interrupt_vector = vector_source.vector();

            let read_ctx = if source == InterruptSource::Brk {
                StatusReadContext::Brk
            } else {
                StatusReadContext::HardwareInterruptHandler
            };
            let status = cpu.registers.status.to_byte(read_ctx);
            push(cpu, status)
        }
        4 => {
            cpu.registers.status.interrupt_disable = true;
            BusCycle::read(cpu.state.interrupt_vector)
        }
        5 => {
            cpu.state.operand = data;
            BusCycle::read(cpu.state.interrupt_vector.wrapping_add(1))
        }
        6 => {
            cpu.registers.pc = u16::from_le_bytes([cpu.state.operand, data]);
            log::trace!(
                "{source:?} sequence complete, vector {:04X} -> PC={:04X}",
                cpu.state.interrupt_vector,
                cpu.registers.pc
            );
            begin_instruction(cpu)
        }
        _ => invalid_cycle!(cpu),
    }
}

fn jammed(cpu: &mut Mos6502) -> BusCycle {
    if cpu.interrupts.reset_pending() {
        return begin_instruction(cpu);
    }

    BusCycle::read(JAM_ADDRESS)
}
