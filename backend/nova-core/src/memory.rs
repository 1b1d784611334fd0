//! The 64 KiB CPU address space.
//!
//! Every access is resolved in a fixed order:
//! 1. If a registered hook covers the address, the hook handles the access and the backing
//!    storage is not touched
//! 2. If a mirror window covers the address, the address is folded into the mirror's base range
//! 3. The (possibly folded) address indexes the flat backing array
//!
//! NES CPU address layout, used by [`MemoryMap::nes`]:
//! * $0000-$07FF: 2KB internal RAM
//! * $0800-$1FFF: Mirrors of internal RAM
//! * $2000-$2007: Memory-mapped PPU registers
//! * $2008-$3FFF: Mirrors of memory-mapped PPU registers
//! * $4000-$4017: Memory-mapped APU and I/O registers
//! * $4018-$401F: "Test mode" functionality
//! * $4020-$FFFF: Mapped to the cartridge board

use nova6502_emu::PinWord;
use nova6502_emu::bus::{self, BusInterface};
use std::fmt::{Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::{fmt, fs};
use thiserror::Error;

pub const ADDRESS_SPACE_LEN: usize = 0x10000;

pub const CPU_RAM_START: u16 = 0x0000;
pub const CPU_RAM_END: u16 = 0x1FFF;
pub const CPU_RAM_LEN: u16 = 0x0800;

pub const CPU_PPU_REGISTERS_START: u16 = 0x2000;
pub const CPU_PPU_REGISTERS_END: u16 = 0x3FFF;
pub const CPU_PPU_REGISTERS_LEN: u16 = 0x0008;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{len} bytes do not fit at ${base:04X}; only {available} bytes are available")]
    TooLarge { len: usize, base: u16, available: usize },
    #[error("Unable to read program file '{}': {source}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryMapError {
    #[error("Invalid address range ${start:04X}-${end:04X}")]
    InvalidRange { start: u16, end: u16 },
    #[error(
        "Hook range ${start:04X}-${end:04X} overlaps existing hook range ${existing_start:04X}-${existing_end:04X}"
    )]
    OverlappingHook { start: u16, end: u16, existing_start: u16, existing_end: u16 },
    #[error(
        "Mirror range ${start:04X}-${end:04X} overlaps existing mirror range ${existing_start:04X}-${existing_end:04X}"
    )]
    OverlappingMirror { start: u16, end: u16, existing_start: u16, existing_end: u16 },
    #[error("Invalid mirror backing range: base ${base:04X}, size {size}")]
    InvalidMirrorBase { base: u16, size: u16 },
    #[error("No hook registered with id {0:?}")]
    UnknownHook(HookId),
}

/// Handler for a hooked address window, called as `handler(address, is_read, data)`.
///
/// `data` is the byte being written for writes and 0 for reads. The return value is placed on
/// the data bus for reads and ignored for writes. Handlers must not drive the CPU themselves.
pub type HookHandler = Box<dyn FnMut(u16, bool, u8) -> u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u32);

struct Hook {
    id: HookId,
    start: u16,
    end: u16,
    handler: HookHandler,
}

impl Debug for Hook {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("start", &format_args!("${:04X}", self.start))
            .field("end", &format_args!("${:04X}", self.end))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mirror {
    start: u16,
    end: u16,
    base: u16,
    size: u16,
}

impl Mirror {
    fn fold(self, address: u16) -> u16 {
        self.base + (address - self.start) % self.size
    }
}

fn overlaps(start: u16, end: u16, other_start: u16, other_end: u16) -> bool {
    start <= other_end && other_start <= end
}

#[derive(Debug)]
pub struct MemoryMap {
    memory: Box<[u8]>,
    mirrors: Vec<Mirror>,
    hooks: Vec<Hook>,
    next_hook_id: u32,
}

impl MemoryMap {
    /// 64 KiB of plain RAM with no mirrors or hooks.
    #[must_use]
    pub fn flat() -> Self {
        Self {
            memory: vec![0; ADDRESS_SPACE_LEN].into_boxed_slice(),
            mirrors: Vec::new(),
            hooks: Vec::new(),
            next_hook_id: 0,
        }
    }

    /// The NES CPU layout: 2 KiB of RAM mirrored through $1FFF and the 8 PPU registers mirrored
    /// through $3FFF. The PPU/APU windows are plain memory until hooks are registered over them.
    #[must_use]
    pub fn nes() -> Self {
        let mut memory_map = Self::flat();
        memory_map.mirrors = vec![
            Mirror { start: CPU_RAM_START, end: CPU_RAM_END, base: CPU_RAM_START, size: CPU_RAM_LEN },
            Mirror {
                start: CPU_PPU_REGISTERS_START,
                end: CPU_PPU_REGISTERS_END,
                base: CPU_PPU_REGISTERS_START,
                size: CPU_PPU_REGISTERS_LEN,
            },
        ];
        memory_map
    }

    /// Alias `start..=end` onto the `size` bytes starting at `base`, repeating every `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is empty or inverted, if the backing range is empty or runs
    /// past the end of the address space, or if the window overlaps an existing mirror window.
    pub fn register_mirror(
        &mut self,
        start: u16,
        end: u16,
        base: u16,
        size: u16,
    ) -> Result<(), MemoryMapError> {
        if start > end {
            return Err(MemoryMapError::InvalidRange { start, end });
        }

        if size == 0 || usize::from(base) + usize::from(size) > ADDRESS_SPACE_LEN {
            return Err(MemoryMapError::InvalidMirrorBase { base, size });
        }

        if let Some(existing) =
            self.mirrors.iter().find(|mirror| overlaps(start, end, mirror.start, mirror.end))
        {
            return Err(MemoryMapError::OverlappingMirror {
                start,
                end,
                existing_start: existing.start,
                existing_end: existing.end,
            });
        }

        log::debug!("Registered mirror ${start:04X}-${end:04X} -> ${base:04X} (size {size})");
        self.mirrors.push(Mirror { start, end, base, size });

        Ok(())
    }

    /// Route every access in `start..=end` to `handler` instead of the backing storage.
    ///
    /// # Errors
    ///
    /// Returns an error if `start > end` or if the range overlaps an already-registered hook.
    pub fn register_hook<F>(
        &mut self,
        start: u16,
        end: u16,
        handler: F,
    ) -> Result<HookId, MemoryMapError>
    where
        F: FnMut(u16, bool, u8) -> u8 + 'static,
    {
        if start > end {
            return Err(MemoryMapError::InvalidRange { start, end });
        }

        if let Some(existing) = self.hooks.iter().find(|hook| overlaps(start, end, hook.start, hook.end))
        {
            return Err(MemoryMapError::OverlappingHook {
                start,
                end,
                existing_start: existing.start,
                existing_end: existing.end,
            });
        }

        let id = HookId(self.next_hook_id);
        self.next_hook_id += 1;

        log::debug!("Registered hook {id:?} for ${start:04X}-${end:04X}");
        self.hooks.push(Hook { id, start, end, handler: Box::new(handler) });

        Ok(id)
    }

    /// # Errors
    ///
    /// Returns an error if no hook with the given id is registered.
    pub fn unregister_hook(&mut self, id: HookId) -> Result<(), MemoryMapError> {
        let Some(i) = self.hooks.iter().position(|hook| hook.id == id) else {
            return Err(MemoryMapError::UnknownHook(id));
        };

        let hook = self.hooks.remove(i);
        log::debug!("Unregistered hook {id:?} for ${:04X}-${:04X}", hook.start, hook.end);

        Ok(())
    }

    fn find_hook(&mut self, address: u16) -> Option<&mut Hook> {
        self.hooks.iter_mut().find(|hook| (hook.start..=hook.end).contains(&address))
    }

    fn backing_address(&self, address: u16) -> usize {
        let folded = self
            .mirrors
            .iter()
            .find(|mirror| (mirror.start..=mirror.end).contains(&address))
            .map_or(address, |mirror| mirror.fold(address));
        folded.into()
    }

    pub fn read(&mut self, address: u16) -> u8 {
        if let Some(hook) = self.find_hook(address) {
            let value = (hook.handler)(address, true, 0);
            log::trace!("Hook {:?} read ${address:04X} -> {value:02X}", hook.id);
            return value;
        }

        self.memory[self.backing_address(address)]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        if let Some(hook) = self.find_hook(address) {
            log::trace!("Hook {:?} write ${address:04X} <- {value:02X}", hook.id);
            (hook.handler)(address, false, value);
            return;
        }

        let backing_address = self.backing_address(address);
        self.memory[backing_address] = value;
    }

    /// Read the backing storage (through mirrors) without invoking hooks.
    #[must_use]
    pub fn peek(&self, address: u16) -> u8 {
        self.memory[self.backing_address(address)]
    }

    /// Perform the bus cycle asserted by `pins`: a read returns `pins` with the data lines set,
    /// a write stores the data lines and returns `pins` unchanged.
    pub fn resolve(&mut self, pins: PinWord) -> PinWord {
        bus::access(self, pins)
    }

    /// Copy `program` into memory starting at `base`. The copy goes through mirrors but bypasses
    /// hooks.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::TooLarge`] if the program would run past $FFFF, in which case memory is
    /// left untouched.
    pub fn load(&mut self, base: u16, program: &[u8]) -> Result<(), LoadError> {
        let available = ADDRESS_SPACE_LEN - usize::from(base);
        if program.len() > available {
            return Err(LoadError::TooLarge { len: program.len(), base, available });
        }

        for (address, &byte) in (base..=u16::MAX).zip(program) {
            let backing_address = self.backing_address(address);
            self.memory[backing_address] = byte;
        }

        log::debug!("Loaded {} bytes at ${base:04X}", program.len());

        Ok(())
    }

    /// Read a program file and load it at `base`, returning the number of bytes loaded.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::NotFound`] if the file cannot be read, or [`LoadError::TooLarge`] if
    /// its contents do not fit.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P, base: u16) -> Result<usize, LoadError> {
        let path = path.as_ref();
        let program = fs::read(path)
            .map_err(|source| LoadError::NotFound { path: path.to_path_buf(), source })?;

        self.load(base, &program)?;

        Ok(program.len())
    }
}

impl BusInterface for MemoryMap {
    #[inline]
    fn read(&mut self, address: u16) -> u8 {
        MemoryMap::read(self, address)
    }

    #[inline]
    fn write(&mut self, address: u16, value: u8) {
        MemoryMap::write(self, address, value);
    }
}
