use nova_core::{CpuVariant, Machine, MemoryLayout, NovaConfig, RunOutcome};
use std::env;
use test_log::test;

const BIN_PATH_VAR: &str = "NOVA_FUNCTIONAL_TEST_BIN";

// Entry point and success trap of the standard 6502_functional_test.bin build
const ENTRY_POINT: u16 = 0x0400;
const SUCCESS_PC: u16 = 0x3469;

const MAX_CYCLES: u64 = 200_000_000;

#[test]
#[ignore = "requires the 6502 functional test binary; set NOVA_FUNCTIONAL_TEST_BIN"]
fn functional_test() {
    let path = env::var(BIN_PATH_VAR)
        .unwrap_or_else(|_| panic!("{BIN_PATH_VAR} must point to 6502_functional_test.bin"));

    let mut machine = Machine::new(NovaConfig {
        variant: CpuVariant::Nmos6502,
        memory_layout: MemoryLayout::Flat,
        entry_point: Some(ENTRY_POINT),
    });
    machine.bus_mut().load_file(&path, 0x0000).unwrap();
    machine.reset();

    let outcome = machine.run_until_trap(MAX_CYCLES);
    let registers = machine.registers();
    assert_eq!(
        outcome,
        RunOutcome::Trapped { pc: SUCCESS_PC },
        "A={:02X} X={:02X} Y={:02X} S={:02X}, test number {:02X}",
        registers.accumulator,
        registers.x,
        registers.y,
        registers.sp,
        machine.bus().peek(0x0200)
    );
}
