//! Opcode decoding.
//!
//! Every one of the 256 opcode values has exactly one [`Instruction`] entry, including the
//! undocumented opcodes, which are flagged with `illegal: true`.

use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode.
    #[must_use]
    pub fn operand_len(self) -> u16 {
        match self {
            Self::Implied | Self::Accumulator => 0,
            Self::Immediate
            | Self::ZeroPage
            | Self::ZeroPageX
            | Self::ZeroPageY
            | Self::IndirectX
            | Self::IndirectY
            | Self::Relative => 1,
            Self::Absolute | Self::AbsoluteX | Self::AbsoluteY | Self::Indirect => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum Operation {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Undocumented
    Alr,
    Anc,
    Ane,
    Arr,
    Axs,
    Dcp,
    Isc,
    Jam,
    Las,
    Lax,
    Lxa,
    Rla,
    Rra,
    Sax,
    Sha,
    Shx,
    Shy,
    Slo,
    Sre,
    Tas,
}

/// How an instruction uses the bus once its opcode has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum AccessKind {
    /// Resolve an address, read one operand byte, apply the operation
    Read,
    /// Resolve an address, write one byte
    Write,
    /// Resolve an address, read, write the unmodified value back, write the result
    ReadModifyWrite,
    /// Registers only; one dummy read of the next opcode byte
    Implied,
    Branch,
    Jump,
    /// Dedicated stack sequence (JSR, RTS, RTI, PHA, PHP, PLA, PLP)
    Stack,
    /// BRK, which shares its sequence with hardware interrupts
    Break,
    Jam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Instruction {
    pub opcode: u8,
    pub operation: Operation,
    pub mode: AddressingMode,
    /// Cycle count without page crossing or branch penalties; 0 for JAM, which never completes
    pub cycles: u8,
    pub illegal: bool,
}

impl Instruction {
    #[inline]
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Self {
        INSTRUCTION_TABLE[opcode as usize]
    }

    #[must_use]
    pub fn access_kind(self) -> AccessKind {
        use Operation::*;

        match self.operation {
            Brk => AccessKind::Break,
            Jam => AccessKind::Jam,
            Jmp => AccessKind::Jump,
            Jsr | Rts | Rti | Pha | Php | Pla | Plp => AccessKind::Stack,
            Bcc | Bcs | Beq | Bmi | Bne | Bpl | Bvc | Bvs => AccessKind::Branch,
            Sta | Stx | Sty | Sax | Sha | Shx | Shy | Tas => AccessKind::Write,
            Asl | Lsr | Rol | Ror | Inc | Dec | Slo | Rla | Sre | Rra | Dcp | Isc => {
                if self.mode == AddressingMode::Accumulator {
                    AccessKind::Implied
                } else {
                    AccessKind::ReadModifyWrite
                }
            }
            _ => {
                if self.mode == AddressingMode::Implied {
                    AccessKind::Implied
                } else {
                    AccessKind::Read
                }
            }
        }
    }

    /// Whether indexed addressing always spends the fix-up cycle, even without a page crossing.
    #[must_use]
    pub fn always_fixes_up_address(self) -> bool {
        matches!(self.access_kind(), AccessKind::Write | AccessKind::ReadModifyWrite)
    }

    /// Total instruction length in bytes, including the opcode.
    #[must_use]
    pub fn size(self) -> u16 {
        1 + self.mode.operand_len()
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:?} (${:02X})", self.operation, self.mode, self.opcode)
    }
}

macro_rules! op {
    ($opcode:literal, $operation:ident, $mode:ident, $cycles:literal) => {
        Instruction {
            opcode: $opcode,
            operation: Operation::$operation,
            mode: AddressingMode::$mode,
            cycles: $cycles,
            illegal: false,
        }
    };
}

macro_rules! illegal {
    ($opcode:literal, $operation:ident, $mode:ident, $cycles:literal) => {
        Instruction {
            opcode: $opcode,
            operation: Operation::$operation,
            mode: AddressingMode::$mode,
            cycles: $cycles,
            illegal: true,
        }
    };
}

pub static INSTRUCTION_TABLE: [Instruction; 256] = [
    op!(0x00, Brk, Implied, 7),
    op!(0x01, Ora, IndirectX, 6),
    illegal!(0x02, Jam, Implied, 0),
    illegal!(0x03, Slo, IndirectX, 8),
    illegal!(0x04, Nop, ZeroPage, 3),
    op!(0x05, Ora, ZeroPage, 3),
    op!(0x06, Asl, ZeroPage, 5),
    illegal!(0x07, Slo, ZeroPage, 5),
    op!(0x08, Php, Implied, 3),
    op!(0x09, Ora, Immediate, 2),
    op!(0x0A, Asl, Accumulator, 2),
    illegal!(0x0B, Anc, Immediate, 2),
    illegal!(0x0C, Nop, Absolute, 4),
    op!(0x0D, Ora, Absolute, 4),
    op!(0x0E, Asl, Absolute, 6),
    illegal!(0x0F, Slo, Absolute, 6),
    op!(0x10, Bpl, Relative, 2),
    op!(0x11, Ora, IndirectY, 5),
    illegal!(0x12, Jam, Implied, 0),
    illegal!(0x13, Slo, IndirectY, 8),
    illegal!(0x14, Nop, ZeroPageX, 4),
    op!(0x15, Ora, ZeroPageX, 4),
    op!(0x16, Asl, ZeroPageX, 6),
    illegal!(0x17, Slo, ZeroPageX, 6),
    op!(0x18, Clc, Implied, 2),
    op!(0x19, Ora, AbsoluteY, 4),
    illegal!(0x1A, Nop, Implied, 2),
    illegal!(0x1B, Slo, AbsoluteY, 7),
    illegal!(0x1C, Nop, AbsoluteX, 4),
    op!(0x1D, Ora, AbsoluteX, 4),
    op!(0x1E, Asl, AbsoluteX, 7),
    illegal!(0x1F, Slo, AbsoluteX, 7),
    op!(0x20, Jsr, Absolute, 6),
    op!(0x21, And, IndirectX, 6),
    illegal!(0x22, Jam, Implied, 0),
    illegal!(0x23, Rla, IndirectX, 8),
    op!(0x24, Bit, ZeroPage, 3),
    op!(0x25, And, ZeroPage, 3),
    op!(0x26, Rol, ZeroPage, 5),
    illegal!(0x27, Rla, ZeroPage, 5),
    op!(0x28, Plp, Implied, 4),
    op!(0x29, And, Immediate, 2),
    op!(0x2A, Rol, Accumulator, 2),
    illegal!(0x2B, Anc, Immediate, 2),
    op!(0x2C, Bit, Absolute, 4),
    op!(0x2D, And, Absolute, 4),
    op!(0x2E, Rol, Absolute, 6),
    illegal!(0x2F, Rla, Absolute, 6),
    op!(0x30, Bmi, Relative, 2),
    op!(0x31, And, IndirectY, 5),
    illegal!(0x32, Jam, Implied, 0),
    illegal!(0x33, Rla, IndirectY, 8),
    illegal!(0x34, Nop, ZeroPageX, 4),
    op!(0x35, And, ZeroPageX, 4),
    op!(0x36, Rol, ZeroPageX, 6),
    illegal!(0x37, Rla, ZeroPageX, 6),
    op!(0x38, Sec, Implied, 2),
    op!(0x39, And, AbsoluteY, 4),
    illegal!(0x3A, Nop, Implied, 2),
    illegal!(0x3B, Rla, AbsoluteY, 7),
    illegal!(0x3C, Nop, AbsoluteX, 4),
    op!(0x3D, And, AbsoluteX, 4),
    op!(0x3E, Rol, AbsoluteX, 7),
    illegal!(0x3F, Rla, AbsoluteX, 7),
    op!(0x40, Rti, Implied, 6),
    op!(0x41, Eor, IndirectX, 6),
    illegal!(0x42, Jam, Implied, 0),
    illegal!(0x43, Sre, IndirectX, 8),
    illegal!(0x44, Nop, ZeroPage, 3),
    op!(0x45, Eor, ZeroPage, 3),
    op!(0x46, Lsr, ZeroPage, 5),
    illegal!(0x47, Sre, ZeroPage, 5),
    op!(0x48, Pha, Implied, 3),
    op!(0x49, Eor, Immediate, 2),
    op!(0x4A, Lsr, Accumulator, 2),
    illegal!(0x4B, Alr, Immediate, 2),
    op!(0x4C, Jmp, Absolute, 3),
    op!(0x4D, Eor, Absolute, 4),
    op!(0x4E, Lsr, Absolute, 6),
    illegal!(0x4F, Sre, Absolute, 6),
    op!(0x50, Bvc, Relative, 2),
    op!(0x51, Eor, IndirectY, 5),
    illegal!(0x52, Jam, Implied, 0),
    illegal!(0x53, Sre, IndirectY, 8),
    illegal!(0x54, Nop, ZeroPageX, 4),
    op!(0x55, Eor, ZeroPageX, 4),
    op!(0x56, Lsr, ZeroPageX, 6),
    illegal!(0x57, Sre, ZeroPageX, 6),
    op!(0x58, Cli, Implied, 2),
    op!(0x59, Eor, AbsoluteY, 4),
    illegal!(0x5A, Nop, Implied, 2),
    illegal!(0x5B, Sre, AbsoluteY, 7),
    illegal!(0x5C, Nop, AbsoluteX, 4),
    op!(0x5D, Eor, AbsoluteX, 4),
    op!(0x5E, Lsr, AbsoluteX, 7),
    illegal!(0x5F, Sre, AbsoluteX, 7),
    op!(0x60, Rts, Implied, 6),
    op!(0x61, Adc, IndirectX, 6),
    illegal!(0x62, Jam, Implied, 0),
    illegal!(0x63, Rra, IndirectX, 8),
    illegal!(0x64, Nop, ZeroPage, 3),
    op!(0x65, Adc, ZeroPage, 3),
    op!(0x66, Ror, ZeroPage, 5),
    illegal!(0x67, Rra, ZeroPage, 5),
    op!(0x68, Pla, Implied, 4),
    op!(0x69, Adc, Immediate, 2),
    op!(0x6A, Ror, Accumulator, 2),
    illegal!(0x6B, Arr, Immediate, 2),
    op!(0x6C, Jmp, Indirect, 5),
    op!(0x6D, Adc, Absolute, 4),
    op!(0x6E, Ror, Absolute, 6),
    illegal!(0x6F, Rra, Absolute, 6),
    op!(0x70, Bvs, Relative, 2),
    op!(0x71, Adc, IndirectY, 5),
    illegal!(0x72, Jam, Implied, 0),
    illegal!(0x73, Rra, IndirectY, 8),
    illegal!(0x74, Nop, ZeroPageX, 4),
    op!(0x75, Adc, ZeroPageX, 4),
    op!(0x76, Ror, ZeroPageX, 6),
    illegal!(0x77, Rra, ZeroPageX, 6),
    op!(0x78, Sei, Implied, 2),
    op!(0x79, Adc, AbsoluteY, 4),
    illegal!(0x7A, Nop, Implied, 2),
    illegal!(0x7B, Rra, AbsoluteY, 7),
    illegal!(0x7C, Nop, AbsoluteX, 4),
    op!(0x7D, Adc, AbsoluteX, 4),
    op!(0x7E, Ror, AbsoluteX, 7),
    illegal!(0x7F, Rra, AbsoluteX, 7),
    illegal!(0x80, Nop, Immediate, 2),
    op!(0x81, Sta, IndirectX, 6),
    illegal!(0x82, Nop, Immediate, 2),
    illegal!(0x83, Sax, IndirectX, 6),
    op!(0x84, Sty, ZeroPage, 3),
    op!(0x85, Sta, ZeroPage, 3),
    op!(0x86, Stx, ZeroPage, 3),
    illegal!(0x87, Sax, ZeroPage, 3),
    op!(0x88, Dey, Implied, 2),
    illegal!(0x89, Nop, Immediate, 2),
    op!(0x8A, Txa, Implied, 2),
    illegal!(0x8B, Ane, Immediate, 2),
    op!(0x8C, Sty, Absolute, 4),
    op!(0x8D, Sta, Absolute, 4),
    op!(0x8E, Stx, Absolute, 4),
    illegal!(0x8F, Sax, Absolute, 4),
    op!(0x90, Bcc, Relative, 2),
    op!(0x91, Sta, IndirectY, 6),
    illegal!(0x92, Jam, Implied, 0),
    illegal!(0x93, Sha, IndirectY, 6),
    op!(0x94, Sty, ZeroPageX, 4),
    op!(0x95, Sta, ZeroPageX, 4),
    op!(0x96, Stx, ZeroPageY, 4),
    illegal!(0x97, Sax, ZeroPageY, 4),
    op!(0x98, Tya, Implied, 2),
    op!(0x99, Sta, AbsoluteY, 5),
    op!(0x9A, Txs, Implied, 2),
    illegal!(0x9B, Tas, AbsoluteY, 5),
    illegal!(0x9C, Shy, AbsoluteX, 5),
    op!(0x9D, Sta, AbsoluteX, 5),
    illegal!(0x9E, Shx, AbsoluteY, 5),
    illegal!(0x9F, Sha, AbsoluteY, 5),
    op!(0xA0, Ldy, Immediate, 2),
    op!(0xA1, Lda, IndirectX, 6),
    op!(0xA2, Ldx, Immediate, 2),
    illegal!(0xA3, Lax, IndirectX, 6),
    op!(0xA4, Ldy, ZeroPage, 3),
    op!(0xA5, Lda, ZeroPage, 3),
    op!(0xA6, Ldx, ZeroPage, 3),
    illegal!(0xA7, Lax, ZeroPage, 3),
    op!(0xA8, Tay, Implied, 2),
    op!(0xA9, Lda, Immediate, 2),
    op!(0xAA, Tax, Implied, 2),
    illegal!(0xAB, Lxa, Immediate, 2),
    op!(0xAC, Ldy, Absolute, 4),
    op!(0xAD, Lda, Absolute, 4),
    op!(0xAE, Ldx, Absolute, 4),
    illegal!(0xAF, Lax, Absolute, 4),
    op!(0xB0, Bcs, Relative, 2),
    op!(0xB1, Lda, IndirectY, 5),
    illegal!(0xB2, Jam, Implied, 0),
    illegal!(0xB3, Lax, IndirectY, 5),
    op!(0xB4, Ldy, ZeroPageX, 4),
    op!(0xB5, Lda, ZeroPageX, 4),
    op!(0xB6, Ldx, ZeroPageY, 4),
    illegal!(0xB7, Lax, ZeroPageY, 4),
    op!(0xB8, Clv, Implied, 2),
    op!(0xB9, Lda, AbsoluteY, 4),
    op!(0xBA, Tsx, Implied, 2),
    illegal!(0xBB, Las, AbsoluteY, 4),
    op!(0xBC, Ldy, AbsoluteX, 4),
    op!(0xBD, Lda, AbsoluteX, 4),
    op!(0xBE, Ldx, AbsoluteY, 4),
    illegal!(0xBF, Lax, AbsoluteY, 4),
    op!(0xC0, Cpy, Immediate, 2),
    op!(0xC1, Cmp, IndirectX, 6),
    illegal!(0xC2, Nop, Immediate, 2),
    illegal!(0xC3, Dcp, IndirectX, 8),
    op!(0xC4, Cpy, ZeroPage, 3),
    op!(0xC5, Cmp, ZeroPage, 3),
    op!(0xC6, Dec, ZeroPage, 5),
    illegal!(0xC7, Dcp, ZeroPage, 5),
    op!(0xC8, Iny, Implied, 2),
    op!(0xC9, Cmp, Immediate, 2),
    op!(0xCA, Dex, Implied, 2),
    illegal!(0xCB, Axs, Immediate, 2),
    op!(0xCC, Cpy, Absolute, 4),
    op!(0xCD, Cmp, Absolute, 4),
    op!(0xCE, Dec, Absolute, 6),
    illegal!(0xCF, Dcp, Absolute, 6),
    op!(0xD0, Bne, Relative, 2),
    op!(0xD1, Cmp, IndirectY, 5),
    illegal!(0xD2, Jam, Implied, 0),
    illegal!(0xD3, Dcp, IndirectY, 8),
    illegal!(0xD4, Nop, ZeroPageX, 4),
    op!(0xD5, Cmp, ZeroPageX, 4),
    op!(0xD6, Dec, ZeroPageX, 6),
    illegal!(0xD7, Dcp, ZeroPageX, 6),
    op!(0xD8, Cld, Implied, 2),
    op!(0xD9, Cmp, AbsoluteY, 4),
    illegal!(0xDA, Nop, Implied, 2),
    illegal!(0xDB, Dcp, AbsoluteY, 7),
    illegal!(0xDC, Nop, AbsoluteX, 4),
    op!(0xDD, Cmp, AbsoluteX, 4),
    op!(0xDE, Dec, AbsoluteX, 7),
    illegal!(0xDF, Dcp, AbsoluteX, 7),
    op!(0xE0, Cpx, Immediate, 2),
    op!(0xE1, Sbc, IndirectX, 6),
    illegal!(0xE2, Nop, Immediate, 2),
    illegal!(0xE3, Isc, IndirectX, 8),
    op!(0xE4, Cpx, ZeroPage, 3),
    op!(0xE5, Sbc, ZeroPage, 3),
    op!(0xE6, Inc, ZeroPage, 5),
    illegal!(0xE7, Isc, ZeroPage, 5),
    op!(0xE8, Inx, Implied, 2),
    op!(0xE9, Sbc, Immediate, 2),
    op!(0xEA, Nop, Implied, 2),
    illegal!(0xEB, Sbc, Immediate, 2),
    op!(0xEC, Cpx, Absolute, 4),
    op!(0xED, Sbc, Absolute, 4),
    op!(0xEE, Inc, Absolute, 6),
    illegal!(0xEF, Isc, Absolute, 6),
    op!(0xF0, Beq, Relative, 2),
    op!(0xF1, Sbc, IndirectY, 5),
    illegal!(0xF2, Jam, Implied, 0),
    illegal!(0xF3, Isc, IndirectY, 8),
    illegal!(0xF4, Nop, ZeroPageX, 4),
    op!(0xF5, Sbc, ZeroPageX, 4),
    op!(0xF6, Inc, ZeroPageX, 6),
    illegal!(0xF7, Isc, ZeroPageX, 6),
    op!(0xF8, Sed, Implied, 2),
    op!(0xF9, Sbc, AbsoluteY, 4),
    illegal!(0xFA, Nop, Implied, 2),
    illegal!(0xFB, Isc, AbsoluteY, 7),
    illegal!(0xFC, Nop, AbsoluteX, 4),
    op!(0xFD, Sbc, AbsoluteX, 4),
    op!(0xFE, Inc, AbsoluteX, 7),
    illegal!(0xFF, Isc, AbsoluteX, 7),
];

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn table_is_indexed_by_opcode() {
        for (i, instruction) in INSTRUCTION_TABLE.iter().enumerate() {
            assert_eq!(usize::from(instruction.opcode), i);
        }
    }

    #[test]
    fn documented_opcode_count() {
        let documented = INSTRUCTION_TABLE.iter().filter(|instruction| !instruction.illegal).count();
        assert_eq!(documented, 151);
    }

    #[test]
    fn jam_opcodes() {
        let jams: Vec<_> = INSTRUCTION_TABLE
            .iter()
            .filter(|instruction| instruction.operation == Operation::Jam)
            .map(|instruction| instruction.opcode)
            .collect();
        assert_eq!(jams, vec![0x02, 0x12, 0x22, 0x32, 0x42, 0x52, 0x62, 0x72, 0x92, 0xB2, 0xD2, 0xF2]);
    }

    #[test]
    fn access_kinds() {
        assert_eq!(Instruction::from_opcode(0xA9).access_kind(), AccessKind::Read);
        assert_eq!(Instruction::from_opcode(0x9D).access_kind(), AccessKind::Write);
        assert_eq!(Instruction::from_opcode(0x1E).access_kind(), AccessKind::ReadModifyWrite);
        assert_eq!(Instruction::from_opcode(0x0A).access_kind(), AccessKind::Implied);
        assert_eq!(Instruction::from_opcode(0xEA).access_kind(), AccessKind::Implied);
        assert_eq!(Instruction::from_opcode(0x04).access_kind(), AccessKind::Read);
        assert_eq!(Instruction::from_opcode(0x6C).access_kind(), AccessKind::Jump);
        assert_eq!(Instruction::from_opcode(0x60).access_kind(), AccessKind::Stack);
        assert_eq!(Instruction::from_opcode(0xD0).access_kind(), AccessKind::Branch);
        assert_eq!(Instruction::from_opcode(0x00).access_kind(), AccessKind::Break);
    }

    #[test]
    fn sizes() {
        assert_eq!(Instruction::from_opcode(0xEA).size(), 1);
        assert_eq!(Instruction::from_opcode(0xA9).size(), 2);
        assert_eq!(Instruction::from_opcode(0x20).size(), 3);
        assert_eq!(Instruction::from_opcode(0x6C).size(), 3);
    }
}
