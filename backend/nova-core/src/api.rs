use crate::memory::MemoryMap;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use nova6502_emu::bus::{self, BusInterface};
use nova6502_emu::pins::{self, PinWord};
use nova6502_emu::{CpuRegisters, CpuVariant, Mos6502};
use std::fmt::{Display, Formatter};
use thiserror::Error;

// RESET waits for the current instruction to finish (at most 7 cycles, plus a page-crossed
// branch/interrupt overlap), then takes 6 cycles and a fetch
const RESET_CYCLE_LIMIT: u32 = 32;

// No instruction or interrupt sequence is longer than 7 cycles; anything beyond this is a RDY
// stall that never ends
const STEP_CYCLE_LIMIT: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum MemoryLayout {
    /// 64 KiB of RAM with no mirroring
    Flat,
    /// 2 KiB RAM mirrored to $1FFF, PPU registers mirrored to $3FFF
    #[default]
    Nes,
}

impl MemoryLayout {
    #[must_use]
    pub fn build(self) -> MemoryMap {
        match self {
            Self::Flat => MemoryMap::flat(),
            Self::Nes => MemoryMap::nes(),
        }
    }
}

impl Display for MemoryLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "Flat"),
            Self::Nes => write!(f, "NES"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NovaConfig {
    /// CPU variant; only the NMOS 6502 performs BCD arithmetic
    pub variant: CpuVariant,
    /// Mirroring preset used by [`Machine::new`]
    pub memory_layout: MemoryLayout,
    /// If set, PC is forced to this address after every RESET sequence instead of using the
    /// RESET vector
    pub entry_point: Option<u16>,
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("Error encoding CPU state: {0}")]
    Encode(#[from] EncodeError),
    #[error("Error decoding CPU state: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// An instruction left PC where it started, e.g. `JMP *` or a branch to itself
    Trapped { pc: u16 },
    /// A JAM opcode froze the CPU
    Jammed { pc: u16 },
    /// The cycle budget ran out
    CycleLimit { pc: u16 },
}

// Everything needed to resume the CPU mid-instruction: the pin word carries the byte read by the
// most recent bus cycle
#[derive(Debug, Clone, Encode, Decode)]
struct CpuSnapshot {
    cpu: Mos6502,
    pins: PinWord,
    input_lines: u64,
}

/// A CPU wired to a bus. The machine drives the pin protocol itself: every tick feeds the previous
/// pin word (with the current input lines) to the CPU and resolves the bus cycle it asks for.
#[derive(Debug)]
pub struct Machine<B = MemoryMap> {
    cpu: Mos6502,
    bus: B,
    pins: PinWord,
    input_lines: u64,
    config: NovaConfig,
}

impl Machine<MemoryMap> {
    /// Create a machine with a memory map built from `config.memory_layout`.
    #[must_use]
    pub fn new(config: NovaConfig) -> Self {
        Self::with_bus(config.memory_layout.build(), config)
    }
}

impl<B: BusInterface> Machine<B> {
    /// Create a machine around an arbitrary bus. The CPU starts powered off with RESET pending;
    /// call [`Self::reset`] or start ticking.
    pub fn with_bus(bus: B, config: NovaConfig) -> Self {
        log::debug!("Creating {} machine with config {config:?}", config.variant);

        Self { cpu: Mos6502::new(config.variant), bus, pins: PinWord::default(), input_lines: 0, config }
    }

    /// Run one clock cycle.
    #[inline]
    pub fn tick(&mut self) {
        let pins = self
            .pins
            .with_line(pins::INPUT_LINES_MASK, false)
            .with_line(self.input_lines, true);
        let pins = self.cpu.tick(pins);
        self.pins = bus::access(&mut self.bus, pins);
    }

    /// Run until the next instruction boundary and return the number of cycles ticked.
    ///
    /// An interrupt sequence counts as part of the instruction it follows. A jammed CPU runs for
    /// a single cycle.
    pub fn step_instruction(&mut self) -> u32 {
        let mut cycles = 0;
        loop {
            self.tick();
            cycles += 1;

            if !self.cpu.is_mid_instruction() || self.cpu.jammed() {
                return cycles;
            }

            if cycles == STEP_CYCLE_LIMIT {
                log::warn!(
                    "Instruction did not complete after {cycles} cycles; RDY is likely held asserted"
                );
                return cycles;
            }
        }
    }

    /// Pulse RESET and run the reset sequence through the fetch of the first instruction.
    ///
    /// If the config has an entry point, PC is then moved to it.
    pub fn reset(&mut self) {
        self.cpu.reset();

        let mut cycles = 0;
        loop {
            self.tick();
            cycles += 1;

            if !self.cpu.is_mid_instruction() {
                break;
            }

            if cycles == RESET_CYCLE_LIMIT {
                log::warn!("RESET sequence did not complete after {cycles} cycles");
                return;
            }
        }

        log::debug!("RESET complete after {cycles} cycles, PC={:04X}", self.cpu.pc());

        if let Some(entry_point) = self.config.entry_point {
            log::debug!("Jumping to entry point {entry_point:04X}");
            self.restart_at(CpuRegisters { pc: entry_point, ..*self.cpu.registers() });
        }
    }

    /// Put the CPU at an instruction boundary with the given registers.
    pub fn restart_at(&mut self, registers: CpuRegisters) {
        let pins = self.cpu.restart_at(registers);
        self.pins = bus::access(&mut self.bus, pins);
    }

    /// Run instructions until one leaves PC unchanged, the CPU jams, or `max_cycles` cycles have
    /// elapsed.
    pub fn run_until_trap(&mut self, max_cycles: u64) -> RunOutcome {
        let start_cycles = self.cpu.cycles();

        loop {
            let pc = self.cpu.pc();
            // Mid-instruction, PC already points past the operands and says nothing about a trap
            let started_at_boundary = !self.cpu.is_mid_instruction();
            self.step_instruction();

            if self.cpu.jammed() {
                return RunOutcome::Jammed { pc };
            }

            if started_at_boundary && !self.cpu.is_mid_instruction() && self.cpu.pc() == pc {
                log::debug!("Trapped at PC={pc:04X}");
                return RunOutcome::Trapped { pc };
            }

            let elapsed = self.cpu.cycles() - start_cycles;
            if elapsed >= max_cycles {
                log::warn!("Cycle limit of {max_cycles} reached at PC={:04X}", self.cpu.pc());
                return RunOutcome::CycleLimit { pc: self.cpu.pc() };
            }
        }
    }

    /// Assert or release input lines (any of `IRQ`, `NMI`, `RDY`, `RES` from [`pins`]). The new
    /// state is seen by the CPU on the next tick.
    pub fn set_input_lines(&mut self, mask: u64, asserted: bool) {
        let mask = mask & pins::INPUT_LINES_MASK;
        if asserted {
            self.input_lines |= mask;
        } else {
            self.input_lines &= !mask;
        }
    }

    pub fn set_irq(&mut self, asserted: bool) {
        self.set_input_lines(pins::IRQ, asserted);
    }

    pub fn set_nmi(&mut self, asserted: bool) {
        self.set_input_lines(pins::NMI, asserted);
    }

    pub fn set_rdy(&mut self, asserted: bool) {
        self.set_input_lines(pins::RDY, asserted);
    }

    /// Serialize the CPU, including any in-progress instruction.
    ///
    /// # Errors
    ///
    /// Propagates any error from bincode.
    pub fn save_cpu_state(&self) -> Result<Vec<u8>, SaveStateError> {
        let snapshot =
            CpuSnapshot { cpu: self.cpu.clone(), pins: self.pins, input_lines: self.input_lines };
        Ok(bincode::encode_to_vec(&snapshot, bincode::config::standard())?)
    }

    /// Restore CPU state produced by [`Self::save_cpu_state`]. Memory is not part of the state.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid CPU state.
    pub fn load_cpu_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let (snapshot, _): (CpuSnapshot, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())?;

        self.cpu = snapshot.cpu;
        self.pins = snapshot.pins;
        self.input_lines = snapshot.input_lines;

        Ok(())
    }

    /// Read-only snapshot of the CPU registers.
    #[inline]
    #[must_use]
    pub fn registers(&self) -> CpuRegisters {
        *self.cpu.registers()
    }

    #[inline]
    #[must_use]
    pub fn cpu(&self) -> &Mos6502 {
        &self.cpu
    }

    #[inline]
    #[must_use]
    pub fn pins(&self) -> PinWord {
        self.pins
    }

    #[inline]
    #[must_use]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    #[inline]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> NovaConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::LoadError;
    use std::cell::Cell;
    use std::rc::Rc;
    use test_log::test;

    // LDX #$0A; LDA #$00; loop: CLC; STX $01; ADC $01; DEX; BNE loop; STA $00; JMP *
    const SUM_PROGRAM: [u8; 17] = [
        0xA2, 0x0A, 0xA9, 0x00, 0x18, 0x86, 0x01, 0x65, 0x01, 0xCA, 0xD0, 0xF8, 0x85, 0x00, 0x4C,
        0x0E, 0x80,
    ];

    fn flat_machine() -> Machine {
        let mut machine = Machine::new(NovaConfig {
            memory_layout: MemoryLayout::Flat,
            ..NovaConfig::default()
        });
        machine.bus_mut().load(0xFFFC, &[0x00, 0x80]).unwrap();
        machine
    }

    #[test]
    fn reset_loads_vector() {
        let mut machine = flat_machine();
        machine.reset();

        let registers = machine.registers();
        assert_eq!(registers.pc, 0x8000);
        assert_eq!(registers.sp, 0xFD);
        assert!(registers.status.interrupt_disable);
        assert_eq!(machine.cpu().cycles(), 7);
        assert!(machine.pins().sync());
    }

    #[test]
    fn entry_point_overrides_vector() {
        let mut machine = Machine::new(NovaConfig {
            memory_layout: MemoryLayout::Flat,
            entry_point: Some(0x0400),
            ..NovaConfig::default()
        });
        machine.reset();

        assert_eq!(machine.registers().pc, 0x0400);
        assert_eq!(machine.pins().address(), 0x0400);
    }

    #[test]
    fn run_program_to_trap() {
        let mut machine = flat_machine();
        machine.bus_mut().load(0x8000, &SUM_PROGRAM).unwrap();
        machine.reset();

        assert_eq!(machine.run_until_trap(10_000), RunOutcome::Trapped { pc: 0x800E });
        assert_eq!(machine.bus().peek(0x0000), 55);
        assert_eq!(machine.registers().x, 0);
    }

    #[test]
    fn cycle_limit() {
        let mut machine = flat_machine();
        // NOP; JMP $8000 loops forever without any single instruction trapping
        machine.bus_mut().load(0x8000, &[0xEA, 0x4C, 0x00, 0x80]).unwrap();
        machine.reset();

        assert!(matches!(machine.run_until_trap(100), RunOutcome::CycleLimit { .. }));
        assert!(machine.cpu().cycles() >= 100);
    }

    #[test]
    fn jam_reported() {
        let mut machine = flat_machine();
        machine.bus_mut().load(0x8000, &[0xEA, 0x02]).unwrap();
        machine.reset();

        assert_eq!(machine.run_until_trap(1000), RunOutcome::Jammed { pc: 0x8001 });

        // RESET recovers
        machine.bus_mut().load(0x8000, &SUM_PROGRAM).unwrap();
        machine.reset();
        assert!(!machine.cpu().jammed());
        assert_eq!(machine.run_until_trap(10_000), RunOutcome::Trapped { pc: 0x800E });
    }

    #[test]
    fn ram_mirrors_visible_to_cpu() {
        let mut machine = Machine::new(NovaConfig::default());
        // LDA #$42; STA $1803; LDX $0003; JMP *
        let program = [0xA9, 0x42, 0x8D, 0x03, 0x18, 0xAE, 0x03, 0x00, 0x4C, 0x08, 0x80];
        machine.bus_mut().load(0x8000, &program).unwrap();
        machine.bus_mut().load(0xFFFC, &[0x00, 0x80]).unwrap();
        machine.reset();

        assert_eq!(machine.run_until_trap(1000), RunOutcome::Trapped { pc: 0x8008 });
        assert_eq!(machine.registers().x, 0x42);
        assert_eq!(machine.bus().peek(0x0803), 0x42);
    }

    #[test]
    fn hook_drives_irq() {
        let mut machine = flat_machine();
        let writes = Rc::new(Cell::new(0_u32));

        let hook_writes = Rc::clone(&writes);
        machine
            .bus_mut()
            .register_hook(0x4000, 0x4000, move |_, is_read, _| {
                if !is_read {
                    hook_writes.set(hook_writes.get() + 1);
                }
                0x99
            })
            .unwrap();

        // CLI; LDA $4000; STA $4000; JMP *
        let program = [0x58, 0xAD, 0x00, 0x40, 0x8D, 0x00, 0x40, 0x4C, 0x07, 0x80];
        machine.bus_mut().load(0x8000, &program).unwrap();
        // IRQ handler: LDY #$01; JMP *
        machine.bus_mut().load(0x9000, &[0xA0, 0x01, 0x4C, 0x02, 0x90]).unwrap();
        machine.bus_mut().load(0xFFFE, &[0x00, 0x90]).unwrap();
        machine.reset();

        assert_eq!(machine.run_until_trap(1000), RunOutcome::Trapped { pc: 0x8007 });
        assert_eq!(machine.registers().accumulator, 0x99);
        assert_eq!(writes.get(), 1);

        machine.set_irq(true);
        assert_eq!(machine.run_until_trap(1000), RunOutcome::Trapped { pc: 0x9002 });
        assert_eq!(machine.registers().y, 0x01);

        // Pushed status has B clear
        let pushed_status = machine.bus().peek(0x01FB);
        assert_eq!(pushed_status & 0x10, 0x00);
        assert!(machine.registers().status.interrupt_disable);
    }

    #[test]
    fn save_and_load_mid_instruction() {
        let mut machine = flat_machine();
        machine.bus_mut().load(0x8000, &SUM_PROGRAM).unwrap();
        machine.reset();

        machine.step_instruction();
        machine.tick();
        let state = machine.save_cpu_state().unwrap();
        let saved_registers = machine.registers();

        assert_eq!(machine.run_until_trap(10_000), RunOutcome::Trapped { pc: 0x800E });

        // Rewind; memory is not part of the state, so clear the result first
        machine.bus_mut().load(0x0000, &[0x00, 0x00]).unwrap();
        machine.load_cpu_state(&state).unwrap();
        assert_eq!(machine.registers(), saved_registers);

        assert_eq!(machine.run_until_trap(10_000), RunOutcome::Trapped { pc: 0x800E });
        assert_eq!(machine.bus().peek(0x0000), 55);

        assert!(machine.load_cpu_state(&[0xFF]).is_err());
    }

    #[test]
    fn run_from_mid_instruction() {
        let mut machine = flat_machine();
        // LDA #$01; LDX #$02; JMP *
        machine.bus_mut().load(0x8000, &[0xA9, 0x01, 0xA2, 0x02, 0x4C, 0x04, 0x80]).unwrap();
        machine.reset();

        // Opcode of LDA consumed, operand fetch in flight
        machine.tick();
        assert!(machine.cpu().is_mid_instruction());

        assert_eq!(machine.run_until_trap(10_000), RunOutcome::Trapped { pc: 0x8004 });
        assert_eq!(machine.registers().accumulator, 0x01);
        assert_eq!(machine.registers().x, 0x02);
    }

    #[test]
    fn nmi_and_rdy_lines() {
        let mut machine = flat_machine();
        // NOP; NOP; JMP *
        machine.bus_mut().load(0x8000, &[0xEA, 0xEA, 0x4C, 0x02, 0x80]).unwrap();
        // NMI handler: LDY #$07; JMP *
        machine.bus_mut().load(0x9000, &[0xA0, 0x07, 0x4C, 0x02, 0x90]).unwrap();
        machine.bus_mut().load(0xFFFA, &[0x00, 0x90]).unwrap();
        machine.reset();

        // RDY holds the CPU on its opcode fetch
        machine.set_rdy(true);
        for _ in 0..10 {
            machine.tick();
        }
        assert_eq!(machine.registers().pc, 0x8000);
        assert_eq!(machine.pins().address(), 0x8000);
        machine.set_rdy(false);

        // NMI is serviced even with I set
        assert!(machine.registers().status.interrupt_disable);
        machine.set_nmi(true);
        assert_eq!(machine.run_until_trap(1000), RunOutcome::Trapped { pc: 0x9002 });
        assert_eq!(machine.registers().y, 0x07);
    }

    #[test]
    fn load_error_leaves_memory() {
        let mut machine = flat_machine();
        let err = machine.bus_mut().load(0xFFFF, &[1, 2]).unwrap_err();
        assert!(matches!(err, LoadError::TooLarge { .. }));
        assert_eq!(machine.bus().peek(0xFFFF), 0x00);
    }
}
