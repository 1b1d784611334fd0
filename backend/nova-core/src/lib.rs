//! A 6502 / Ricoh 2A03 machine: the cycle-stepped CPU from `nova6502-emu` wired to a 64 KiB memory
//! map with mirrored regions and peripheral hooks.

pub mod api;
pub mod memory;

pub use api::{Machine, MemoryLayout, NovaConfig, RunOutcome, SaveStateError};
pub use memory::{HookId, LoadError, MemoryMap, MemoryMapError};
pub use nova6502_emu::{CpuRegisters, CpuVariant, PinWord};
