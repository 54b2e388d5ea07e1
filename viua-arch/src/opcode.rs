//! # Opcode table
//!
//! Opcode numbers, format tags, and mnemonic text for every instruction.
//!
//! An opcode word is its format tag OR-ed with an ordinal, so the format
//! of an instruction can be recovered from the opcode alone. Opcode
//! numbers are stable across releases within a major version.
//!
//! ## Families
//! - Arithmetic: ADD, SUB, MUL, DIV, MOD and the signed/unsigned
//!   immediate variants ADDI(U), SUBI(U), MULI(U), DIVI(U)
//! - Bitwise: BITSHL, BITSHR, BITASHR, BITROL, BITROR, BITAND, BITOR,
//!   BITXOR, BITNOT
//! - Comparison: EQ, LT, GT, CMP, AND, OR, NOT
//! - Data movement: DELETE, FRAME, STRING, ATOM, LUI(U), LLIU/LLIL, AA
//! - Control: NOOP, EBREAK, HALT, CALL, RETURN

use serde::{Deserialize, Serialize};

use crate::encoding::{extract_opcode, Format, OPCODE_MASK};
use crate::{OpcodeWord, Word};

/// Instruction opcode.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // ========== N format ==========
    /// NOOP: do nothing
    Noop = 0x0000,
    /// HALT: stop the dispatch loop
    Halt = 0x0001,
    /// EBREAK: dump non-void registers to the trace stream
    Ebreak = 0x0002,

    // ========== T format ==========
    /// ADD: out = lhs + rhs
    Add = 0x1001,
    /// SUB: out = lhs - rhs
    Sub = 0x1002,
    /// MUL: out = lhs * rhs
    Mul = 0x1003,
    /// DIV: out = lhs / rhs, aborts on zero rhs
    Div = 0x1004,
    /// MOD: out = lhs % rhs, aborts on zero rhs
    Mod = 0x1005,
    /// BITSHL: out = lhs << rhs
    Bitshl = 0x1006,
    /// BITSHR: out = lhs >> rhs (logical)
    Bitshr = 0x1007,
    /// BITASHR: out = lhs >> rhs (arithmetic)
    Bitashr = 0x1008,
    /// BITROL: out = lhs rotated left by rhs
    Bitrol = 0x1009,
    /// BITROR: out = lhs rotated right by rhs
    Bitror = 0x100a,
    /// BITAND: out = lhs & rhs
    Bitand = 0x100b,
    /// BITOR: out = lhs | rhs
    Bitor = 0x100c,
    /// BITXOR: out = lhs ^ rhs
    Bitxor = 0x100d,
    /// EQ: out = (lhs == rhs)
    Eq = 0x100e,
    /// LT: out = (lhs < rhs)
    Lt = 0x100f,
    /// GT: out = (lhs > rhs)
    Gt = 0x1010,
    /// CMP: out = -1, 0, or 1
    Cmp = 0x1011,
    /// AND: logical conjunction of boolean projections
    And = 0x1012,
    /// OR: logical disjunction of boolean projections
    Or = 0x1013,

    // ========== D format ==========
    /// CALL: call the function whose symbol index is in `in`
    Call = 0x2001,
    /// BITNOT: out = !in (bitwise)
    Bitnot = 0x2002,
    /// NOT: out = logical negation of in's boolean projection
    Not = 0x2003,
    /// AA: allocate `in` bytes in the arena, pointer into out
    Aa = 0x2004,

    // ========== S format ==========
    /// DELETE: reset the slot to void, releasing boxed owners
    Delete = 0x3001,
    /// STRING: replace the symbol index in out with a boxed string
    String = 0x3002,
    /// FRAME: stage an argument register file of `out.index` slots
    Frame = 0x3003,
    /// ATOM: replace the symbol index in out with a boxed atom
    Atom = 0x3004,
    /// RETURN: return out's value through the caller's result register
    Return = 0x3005,

    // ========== F format ==========
    /// LLIU: load the upper 32 bits of a long literal
    Lliu = 0x4001,
    /// LLIL: load the lower 32 bits of a long literal
    Llil = 0x4002,

    // ========== E format ==========
    /// LUI: out = imm << 28, tagged signed
    Lui = 0x5001,
    /// LUIU: out = imm << 28, tagged unsigned
    Luiu = 0x5002,

    // ========== R format ==========
    /// ADDI: out = (in or 0) + imm, signed
    Addi = 0x6001,
    /// ADDIU: out = (in or 0) + imm, unsigned
    Addiu = 0x6002,
    /// SUBI: out = (in or 0) - imm, signed
    Subi = 0x6003,
    /// SUBIU: out = (in or 0) - imm, unsigned
    Subiu = 0x6004,
    /// MULI: out = (in or 0) * imm, signed
    Muli = 0x6005,
    /// MULIU: out = (in or 0) * imm, unsigned
    Muliu = 0x6006,
    /// DIVI: out = (in or 0) / imm, signed
    Divi = 0x6007,
    /// DIVIU: out = (in or 0) / imm, unsigned
    Diviu = 0x6008,
}

/// Every opcode, in numbering order.
pub const OPCODES: &[Opcode] = &[
    Opcode::Noop,
    Opcode::Halt,
    Opcode::Ebreak,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Mod,
    Opcode::Bitshl,
    Opcode::Bitshr,
    Opcode::Bitashr,
    Opcode::Bitrol,
    Opcode::Bitror,
    Opcode::Bitand,
    Opcode::Bitor,
    Opcode::Bitxor,
    Opcode::Eq,
    Opcode::Lt,
    Opcode::Gt,
    Opcode::Cmp,
    Opcode::And,
    Opcode::Or,
    Opcode::Call,
    Opcode::Bitnot,
    Opcode::Not,
    Opcode::Aa,
    Opcode::Delete,
    Opcode::String,
    Opcode::Frame,
    Opcode::Atom,
    Opcode::Return,
    Opcode::Lliu,
    Opcode::Llil,
    Opcode::Lui,
    Opcode::Luiu,
    Opcode::Addi,
    Opcode::Addiu,
    Opcode::Subi,
    Opcode::Subiu,
    Opcode::Muli,
    Opcode::Muliu,
    Opcode::Divi,
    Opcode::Diviu,
];

impl Opcode {
    /// Convert from an opcode word. The greedy bit is stripped before
    /// the lookup.
    pub fn from_u16(value: OpcodeWord) -> Option<Opcode> {
        let value = value & OPCODE_MASK;
        match value {
            0x0000 => Some(Opcode::Noop),
            0x0001 => Some(Opcode::Halt),
            0x0002 => Some(Opcode::Ebreak),

            0x1001 => Some(Opcode::Add),
            0x1002 => Some(Opcode::Sub),
            0x1003 => Some(Opcode::Mul),
            0x1004 => Some(Opcode::Div),
            0x1005 => Some(Opcode::Mod),
            0x1006 => Some(Opcode::Bitshl),
            0x1007 => Some(Opcode::Bitshr),
            0x1008 => Some(Opcode::Bitashr),
            0x1009 => Some(Opcode::Bitrol),
            0x100a => Some(Opcode::Bitror),
            0x100b => Some(Opcode::Bitand),
            0x100c => Some(Opcode::Bitor),
            0x100d => Some(Opcode::Bitxor),
            0x100e => Some(Opcode::Eq),
            0x100f => Some(Opcode::Lt),
            0x1010 => Some(Opcode::Gt),
            0x1011 => Some(Opcode::Cmp),
            0x1012 => Some(Opcode::And),
            0x1013 => Some(Opcode::Or),

            0x2001 => Some(Opcode::Call),
            0x2002 => Some(Opcode::Bitnot),
            0x2003 => Some(Opcode::Not),
            0x2004 => Some(Opcode::Aa),

            0x3001 => Some(Opcode::Delete),
            0x3002 => Some(Opcode::String),
            0x3003 => Some(Opcode::Frame),
            0x3004 => Some(Opcode::Atom),
            0x3005 => Some(Opcode::Return),

            0x4001 => Some(Opcode::Lliu),
            0x4002 => Some(Opcode::Llil),

            0x5001 => Some(Opcode::Lui),
            0x5002 => Some(Opcode::Luiu),

            0x6001 => Some(Opcode::Addi),
            0x6002 => Some(Opcode::Addiu),
            0x6003 => Some(Opcode::Subi),
            0x6004 => Some(Opcode::Subiu),
            0x6005 => Some(Opcode::Muli),
            0x6006 => Some(Opcode::Muliu),
            0x6007 => Some(Opcode::Divi),
            0x6008 => Some(Opcode::Diviu),

            _ => None,
        }
    }

    /// Extract the opcode from a full instruction word.
    #[inline]
    pub fn from_word(word: Word) -> Option<Opcode> {
        Opcode::from_u16(extract_opcode(word))
    }

    #[inline]
    pub const fn to_u16(self) -> OpcodeWord {
        self as OpcodeWord
    }

    /// The operand format of this opcode.
    pub fn format(self) -> Format {
        // The numbering scheme makes this lookup infallible.
        Format::of(self.to_u16()).unwrap_or(Format::N)
    }

    /// Mnemonic text as written in assembly source.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Noop => "noop",
            Opcode::Halt => "halt",
            Opcode::Ebreak => "ebreak",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Bitshl => "bitshl",
            Opcode::Bitshr => "bitshr",
            Opcode::Bitashr => "bitashr",
            Opcode::Bitrol => "bitrol",
            Opcode::Bitror => "bitror",
            Opcode::Bitand => "bitand",
            Opcode::Bitor => "bitor",
            Opcode::Bitxor => "bitxor",
            Opcode::Eq => "eq",
            Opcode::Lt => "lt",
            Opcode::Gt => "gt",
            Opcode::Cmp => "cmp",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Call => "call",
            Opcode::Bitnot => "bitnot",
            Opcode::Not => "not",
            Opcode::Aa => "aa",
            Opcode::Delete => "delete",
            Opcode::String => "string",
            Opcode::Frame => "frame",
            Opcode::Atom => "atom",
            Opcode::Return => "return",
            Opcode::Lliu => "lliu",
            Opcode::Llil => "llil",
            Opcode::Lui => "lui",
            Opcode::Luiu => "luiu",
            Opcode::Addi => "addi",
            Opcode::Addiu => "addiu",
            Opcode::Subi => "subi",
            Opcode::Subiu => "subiu",
            Opcode::Muli => "muli",
            Opcode::Muliu => "muliu",
            Opcode::Divi => "divi",
            Opcode::Diviu => "diviu",
        }
    }

    /// Reverse lookup used by the parser.
    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        OPCODES.iter().copied().find(|op| op.mnemonic() == text)
    }

    /// Get the opcode family.
    pub fn family(self) -> OpcodeFamily {
        match self {
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Addi
            | Opcode::Addiu
            | Opcode::Subi
            | Opcode::Subiu
            | Opcode::Muli
            | Opcode::Muliu
            | Opcode::Divi
            | Opcode::Diviu => OpcodeFamily::Arithmetic,

            Opcode::Bitshl
            | Opcode::Bitshr
            | Opcode::Bitashr
            | Opcode::Bitrol
            | Opcode::Bitror
            | Opcode::Bitand
            | Opcode::Bitor
            | Opcode::Bitxor
            | Opcode::Bitnot => OpcodeFamily::Bitwise,

            Opcode::Eq
            | Opcode::Lt
            | Opcode::Gt
            | Opcode::Cmp
            | Opcode::And
            | Opcode::Or
            | Opcode::Not => OpcodeFamily::Comparison,

            Opcode::Delete
            | Opcode::Frame
            | Opcode::String
            | Opcode::Atom
            | Opcode::Lui
            | Opcode::Luiu
            | Opcode::Lliu
            | Opcode::Llil
            | Opcode::Aa => OpcodeFamily::DataMovement,

            Opcode::Noop | Opcode::Ebreak | Opcode::Halt | Opcode::Call | Opcode::Return => {
                OpcodeFamily::Control
            }
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Instruction family.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeFamily {
    Arithmetic = 0,
    Bitwise = 1,
    Comparison = 2,
    DataMovement = 3,
    Control = 4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_are_stable() {
        assert_eq!(Opcode::Noop.to_u16(), 0x0000);
        assert_eq!(Opcode::Halt.to_u16(), 0x0001);
        assert_eq!(Opcode::Add.to_u16(), 0x1001);
        assert_eq!(Opcode::Call.to_u16(), 0x2001);
        assert_eq!(Opcode::Delete.to_u16(), 0x3001);
        assert_eq!(Opcode::Lliu.to_u16(), 0x4001);
        assert_eq!(Opcode::Lui.to_u16(), 0x5001);
        assert_eq!(Opcode::Addiu.to_u16(), 0x6002);
    }

    #[test]
    fn from_u16_roundtrip() {
        for op in OPCODES {
            assert_eq!(Opcode::from_u16(op.to_u16()), Some(*op));
        }
        assert_eq!(Opcode::from_u16(0x1fff), None);
        assert_eq!(Opcode::from_u16(0x7123), None);
    }

    #[test]
    fn from_u16_strips_greedy() {
        use crate::encoding::GREEDY;
        assert_eq!(Opcode::from_u16(GREEDY | 0x1001), Some(Opcode::Add));
    }

    #[test]
    fn format_matches_numbering() {
        assert_eq!(Opcode::Halt.format(), Format::N);
        assert_eq!(Opcode::Add.format(), Format::T);
        assert_eq!(Opcode::Call.format(), Format::D);
        assert_eq!(Opcode::Return.format(), Format::S);
        assert_eq!(Opcode::Llil.format(), Format::F);
        assert_eq!(Opcode::Luiu.format(), Format::E);
        assert_eq!(Opcode::Divi.format(), Format::R);
    }

    #[test]
    fn mnemonic_roundtrip() {
        for op in OPCODES {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
        }
        assert_eq!(Opcode::from_mnemonic("li"), None);
        assert_eq!(Opcode::from_mnemonic("bogus"), None);
    }

    #[test]
    fn families() {
        assert_eq!(Opcode::Add.family(), OpcodeFamily::Arithmetic);
        assert_eq!(Opcode::Addiu.family(), OpcodeFamily::Arithmetic);
        assert_eq!(Opcode::Bitxor.family(), OpcodeFamily::Bitwise);
        assert_eq!(Opcode::Cmp.family(), OpcodeFamily::Comparison);
        assert_eq!(Opcode::Atom.family(), OpcodeFamily::DataMovement);
        assert_eq!(Opcode::Call.family(), OpcodeFamily::Control);
    }
}
