use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use nova_core::{Machine, MemoryLayout, NovaConfig, RunOutcome};
use nova6502_emu::bus::{self, BusInterface};
use nova6502_emu::table::{Instruction, Operation};
use nova6502_emu::{CpuRegisters, CpuVariant, Mos6502, PinWord, StatusFlags, StatusReadContext};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusCycle {
    Read(u16, u8),
    Write(u16, u8),
}

impl BusCycle {
    fn from_resolved_pins(pins: PinWord) -> Self {
        if pins.rw() {
            Self::Read(pins.address(), pins.data())
        } else {
            Self::Write(pins.address(), pins.data())
        }
    }
}

// 64 KiB of RAM that remembers which bytes a test touched so they can be cleared cheaply
struct TestBus {
    ram: Box<[u8]>,
    touched: Vec<u16>,
}

impl TestBus {
    fn new() -> Self {
        Self { ram: vec![0; 0x10000].into_boxed_slice(), touched: Vec::new() }
    }

    fn load(&mut self, ram: &[(u16, u8)]) {
        for address in self.touched.drain(..) {
            self.ram[address as usize] = 0;
        }

        for &(address, value) in ram {
            self.ram[address as usize] = value;
            self.touched.push(address);
        }
    }
}

impl BusInterface for TestBus {
    #[inline]
    fn read(&mut self, address: u16) -> u8 {
        self.ram[address as usize]
    }

    #[inline]
    fn write(&mut self, address: u16, value: u8) {
        self.ram[address as usize] = value;
        self.touched.push(address);
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CpuState {
    pc: u16,
    s: u8,
    a: u8,
    x: u8,
    y: u8,
    p: u8,
    ram: Vec<(u16, u8)>,
}

impl CpuState {
    fn registers(&self) -> CpuRegisters {
        CpuRegisters {
            accumulator: self.a,
            x: self.x,
            y: self.y,
            status: StatusFlags::from_byte(self.p),
            pc: self.pc,
            sp: self.s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ExpectedCycle(u16, u8, String);

impl ExpectedCycle {
    fn to_bus_cycle(&self) -> anyhow::Result<BusCycle> {
        match self.2.as_str() {
            "read" => Ok(BusCycle::Read(self.0, self.1)),
            "write" => Ok(BusCycle::Write(self.0, self.1)),
            other => Err(anyhow!("Invalid bus cycle type, expected read/write: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SingleStepTest {
    name: String,
    initial: CpuState,
    #[serde(rename = "final")]
    final_: CpuState,
    cycles: Vec<ExpectedCycle>,
}

fn parse_hex_u16(s: &str) -> Result<u16, ParseIntError> {
    let digits = s.trim_start_matches("0x").trim_start_matches('$');
    u16::from_str_radix(digits, 16)
}

#[derive(Debug, Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run per-opcode JSON single-step tests, one file per opcode named e.g. a9.json
    SingleStep {
        /// Directory containing JSON tests
        #[arg(long, short = 'd')]
        dir_path: PathBuf,
        #[arg(long, value_enum, default_value_t)]
        variant: CpuVariant,
    },
    /// Run a functional test binary until it traps on a self-loop
    Functional {
        /// Path to the test binary, e.g. 6502_functional_test.bin
        #[arg(long, short = 'f')]
        file_path: PathBuf,
        /// Address to load the binary at (hex)
        #[arg(long, default_value = "0000", value_parser = parse_hex_u16)]
        load_address: u16,
        /// PC after RESET (hex)
        #[arg(long, default_value = "0400", value_parser = parse_hex_u16)]
        entry_point: u16,
        /// Trap address that indicates success (hex)
        #[arg(long, default_value = "3469", value_parser = parse_hex_u16)]
        success_pc: u16,
        #[arg(long, default_value_t = 200_000_000)]
        max_cycles: u64,
        #[arg(long, value_enum, default_value_t = CpuVariant::Nmos6502)]
        variant: CpuVariant,
        #[arg(long, value_enum, default_value_t = MemoryLayout::Flat)]
        memory_layout: MemoryLayout,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        Command::SingleStep { dir_path, variant } => run_single_step_tests(&dir_path, variant),
        Command::Functional {
            file_path,
            load_address,
            entry_point,
            success_pc,
            max_cycles,
            variant,
            memory_layout,
        } => {
            let config = NovaConfig { variant, memory_layout, entry_point: Some(entry_point) };
            run_functional_test(&file_path, load_address, success_pc, max_cycles, config)
        }
    }
}

fn run_single_step_tests(dir_path: &Path, variant: CpuVariant) -> anyhow::Result<()> {
    let mut bus = TestBus::new();
    let mut total_failures = 0;

    for opcode in 0x00..=0xFF {
        if Instruction::from_opcode(opcode).operation == Operation::Jam {
            // JAM never reaches another opcode fetch
            continue;
        }

        let file_path = dir_path.join(format!("{opcode:02x}.json"));
        let tests: Vec<SingleStepTest> =
            serde_json::from_reader(BufReader::new(File::open(&file_path)?))?;

        let mut failures = 0;
        let test_count = tests.len();
        for test in tests {
            let errors = run_single_step_test(&test, &mut bus, variant)?;
            if !errors.is_empty() {
                failures += 1;
                log::debug!("Failed '{}': {}", test.name, errors.join(", "));
            }
        }

        if failures != 0 {
            log::error!("Failed {failures} out of {test_count} tests for opcode {opcode:02X}");
        }
        total_failures += failures;
    }

    if total_failures != 0 {
        bail!("{total_failures} single-step tests failed");
    }

    log::info!("All single-step tests passed");

    Ok(())
}

// Returns a description of every mismatch against the expected final state
fn run_single_step_test(
    test: &SingleStepTest,
    bus: &mut TestBus,
    variant: CpuVariant,
) -> anyhow::Result<Vec<String>> {
    bus.load(&test.initial.ram);

    let mut cpu = Mos6502::new(variant);
    let mut pins = cpu.restart_at(test.initial.registers());

    // Each listed cycle is resolved against the bus and then consumed by one tick
    let mut trace = Vec::with_capacity(test.cycles.len());
    for _ in 0..test.cycles.len() {
        pins = bus::access(bus, pins);
        trace.push(BusCycle::from_resolved_pins(pins));
        pins = cpu.tick(pins);
    }

    let mut errors = Vec::new();

    // After the last listed cycle the CPU should be fetching the next opcode
    if cpu.is_mid_instruction() || !pins.sync() {
        errors.push(format!("[instruction did not complete in {} cycles]", test.cycles.len()));
    }

    let expected = &test.final_;
    let registers = cpu.registers();
    let register_checks = [
        ("A", expected.a, registers.accumulator),
        ("X", expected.x, registers.x),
        ("Y", expected.y, registers.y),
        ("S", expected.s, registers.sp),
        // B only exists on the stack
        ("P", expected.p | 0x10, registers.status.to_byte(StatusReadContext::Brk) | 0x10),
    ];
    for (name, expected, actual) in register_checks {
        if expected != actual {
            errors.push(format!("[{name}: expected={expected:02X}, actual={actual:02X}]"));
        }
    }

    if expected.pc != registers.pc {
        errors.push(format!("[PC: expected={:04X}, actual={:04X}]", expected.pc, registers.pc));
    }

    for &(address, expected_value) in &expected.ram {
        let actual_value = bus.ram[address as usize];
        if expected_value != actual_value {
            errors.push(format!(
                "[RAM[{address:04X}]: expected={expected_value:02X}, actual={actual_value:02X}]"
            ));
        }
    }

    for (i, (expected, &actual)) in test.cycles.iter().zip(&trace).enumerate() {
        let expected = expected.to_bus_cycle()?;
        if expected != actual {
            errors.push(format!("[cycle {i}: expected={expected:?}, actual={actual:?}]"));
        }
    }

    Ok(errors)
}

fn run_functional_test(
    file_path: &Path,
    load_address: u16,
    success_pc: u16,
    max_cycles: u64,
    config: NovaConfig,
) -> anyhow::Result<()> {
    let mut machine = Machine::new(config);

    let len = machine.bus_mut().load_file(file_path, load_address)?;
    log::info!("Loaded {len} bytes from '{}' at ${load_address:04X}", file_path.display());

    machine.reset();
    let outcome = machine.run_until_trap(max_cycles);

    let registers = machine.registers();
    log::info!(
        "A={:02X} X={:02X} Y={:02X} S={:02X} P={:02X} PC={:04X} after {} cycles",
        registers.accumulator,
        registers.x,
        registers.y,
        registers.sp,
        registers.status.to_byte(StatusReadContext::PushStack),
        registers.pc,
        machine.cpu().cycles()
    );

    match outcome {
        RunOutcome::Trapped { pc } if pc == success_pc => {
            log::info!("Functional test passed");
            Ok(())
        }
        RunOutcome::Trapped { pc } => {
            Err(anyhow!("Trapped at ${pc:04X}, expected success trap at ${success_pc:04X}"))
        }
        RunOutcome::Jammed { pc } => Err(anyhow!("CPU jammed by opcode at ${pc:04X}")),
        RunOutcome::CycleLimit { pc } => {
            Err(anyhow!("No trap after {max_cycles} cycles; PC=${pc:04X}"))
        }
    }
}
