//! Pin-level, cycle-stepped emulation of the 6502 as used in the NES's Ricoh 2A03.
//!
//! The CPU never touches memory directly. Each call to [`Mos6502::tick`] is one clock cycle: it
//! takes the pin word produced by the previous cycle (with the data lines filled in by whatever
//! answered that bus cycle) and returns the pin word for the next bus cycle.

pub mod addressing;
mod alu;
pub mod bus;
mod engine;
pub mod interrupts;
mod num;
pub mod pins;
pub mod registers;
pub mod table;


use crate::bus::BusCycle;
use crate::engine::{InstructionState, Phase};
use crate::interrupts::InterruptLines;
use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

pub use crate::pins::PinWord;
pub use crate::registers::{CpuRegisters, Flag, StatusFlags, StatusReadContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CpuVariant {
    /// NES CPU; the D flag exists but ADC/SBC ignore it
    #[default]
    Ricoh2A03,
    /// Stock NMOS 6502 with BCD arithmetic
    Nmos6502,
}

impl CpuVariant {
    #[inline]
    #[must_use]
    pub fn decimal_enabled(self) -> bool {
        self == Self::Nmos6502
    }
}

impl Display for CpuVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ricoh2A03 => write!(f, "Ricoh 2A03"),
            Self::Nmos6502 => write!(f, "NMOS 6502"),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mos6502 {
    registers: CpuRegisters,
    state: InstructionState,
    interrupts: InterruptLines,
    variant: CpuVariant,
    last_cycle: BusCycle,
    cycles: u64,
    jammed: bool,
}

impl Mos6502 {
    /// Create a CPU in its power-on state. The first ticks run the RESET sequence, which loads
    /// PC from the RESET vector at $FFFC.
    #[must_use]
    pub fn new(variant: CpuVariant) -> Self {
        Self {
            registers: CpuRegisters::new(),
            state: InstructionState::new(Phase::PowerOn),
            interrupts: InterruptLines::power_on(),
            variant,
            last_cycle: BusCycle::read(0x0000),
            cycles: 0,
            jammed: false,
        }
    }

    /// Run the CPU for 1 cycle.
    ///
    /// `pins` is the pin word returned by the previous call, with the data lines set by the bus if
    /// that cycle was a read, and with IRQ/NMI/RDY/RES set to the current state of those inputs.
    /// Those four input lines are carried over unchanged into the returned word.
    #[inline]
    pub fn tick(&mut self, pins: PinWord) -> PinWord {
        self.interrupts.sample(pins);
        self.cycles += 1;

        if pins.rdy() && self.last_cycle.read && self.state.phase != Phase::PowerOn {
            // Halted by RDY; the read is repeated and its result is not consumed
            return self.last_cycle.to_pins(pins);
        }

        let cycle = engine::step(self, pins.data());

        if self.state.polls_interrupts() {
            self.interrupts.poll(self.registers.status.interrupt_disable);
        }
        self.state.skip_poll = false;

        self.last_cycle = cycle;
        cycle.to_pins(pins)
    }

    /// Abandon whatever the CPU is doing and put it at an instruction boundary with the given
    /// registers. Returns the pin word for the opcode fetch at the new PC.
    ///
    /// Latched NMI edges and a pending RESET are discarded, and a jammed CPU is released.
    pub fn restart_at(&mut self, registers: CpuRegisters) -> PinWord {
        self.registers = registers;
        self.state = InstructionState::new(Phase::FetchOpcode);
        self.interrupts.clear();
        self.jammed = false;

        self.last_cycle = BusCycle::fetch(registers.pc);
        self.last_cycle.to_pins(PinWord::default())
    }

    /// Request a RESET, which is serviced at the next instruction boundary (or immediately if the
    /// CPU is jammed). This is equivalent to pulsing the RES line.
    pub fn reset(&mut self) {
        self.interrupts.request_reset();
    }

    #[inline]
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    /// Whether an instruction or interrupt sequence is in progress. Returns false only when the
    /// most recent bus cycle was a plain opcode fetch.
    #[must_use]
    pub fn is_mid_instruction(&self) -> bool {
        self.state.phase != Phase::FetchOpcode
    }

    #[must_use]
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    /// Return whether the CPU has frozen from a JAM instruction.
    #[inline]
    #[must_use]
    pub fn jammed(&self) -> bool {
        self.jammed
    }

    /// Total number of clock cycles ticked since power-on, including RDY stalls.
    #[inline]
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    #[inline]
    #[must_use]
    pub fn variant(&self) -> CpuVariant {
        self.variant
    }
}
