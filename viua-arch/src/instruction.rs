//! # Typed operand bundles
//!
//! One struct per operand format, each packing itself into a 64-bit word
//! and unpacking from one. Decoding is format-blind: running the wrong
//! decoder over a word yields defined but meaningless operands, never an
//! error. The greedy bit travels inside the opcode field and is
//! preserved verbatim in both directions.

use crate::encoding::{
    extract_imm24, extract_imm32, extract_imm36, extract_in, extract_in_compact, extract_opcode,
    extract_out, extract_out_compact, extract_rhs, IMM24_MASK, IMM36_MASK,
};
use crate::register::RegisterAccess;
use crate::{OpcodeWord, Word};

/// N format: no operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct N {
    pub opcode: OpcodeWord,
}

impl N {
    pub fn encode(self) -> Word {
        self.opcode as Word
    }

    pub fn decode(word: Word) -> N {
        N {
            opcode: extract_opcode(word),
        }
    }
}

/// S format: one register access (out).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct S {
    pub opcode: OpcodeWord,
    pub out: RegisterAccess,
}

impl S {
    pub fn encode(self) -> Word {
        (self.opcode as Word) | ((self.out.encode() as Word) << 16)
    }

    pub fn decode(word: Word) -> S {
        S {
            opcode: extract_opcode(word),
            out: RegisterAccess::decode(extract_out(word)),
        }
    }
}

/// D format: two register accesses (out, in).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct D {
    pub opcode: OpcodeWord,
    pub out: RegisterAccess,
    pub input: RegisterAccess,
}

impl D {
    pub fn encode(self) -> Word {
        (self.opcode as Word)
            | ((self.out.encode() as Word) << 16)
            | ((self.input.encode() as Word) << 32)
    }

    pub fn decode(word: Word) -> D {
        D {
            opcode: extract_opcode(word),
            out: RegisterAccess::decode(extract_out(word)),
            input: RegisterAccess::decode(extract_in(word)),
        }
    }
}

/// T format: three register accesses (out, lhs, rhs).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct T {
    pub opcode: OpcodeWord,
    pub out: RegisterAccess,
    pub lhs: RegisterAccess,
    pub rhs: RegisterAccess,
}

impl T {
    pub fn encode(self) -> Word {
        (self.opcode as Word)
            | ((self.out.encode() as Word) << 16)
            | ((self.lhs.encode() as Word) << 32)
            | ((self.rhs.encode() as Word) << 48)
    }

    pub fn decode(word: Word) -> T {
        T {
            opcode: extract_opcode(word),
            out: RegisterAccess::decode(extract_out(word)),
            lhs: RegisterAccess::decode(extract_in(word)),
            rhs: RegisterAccess::decode(extract_rhs(word)),
        }
    }
}

/// F format: one register access and a 32-bit immediate, used to carry
/// half of a 64-bit literal. Two F words in sequence form the full
/// literal, upper 32 bits first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct F {
    pub opcode: OpcodeWord,
    pub out: RegisterAccess,
    pub immediate: u32,
}

impl F {
    pub fn encode(self) -> Word {
        (self.opcode as Word)
            | ((self.out.encode() as Word) << 16)
            | ((self.immediate as Word) << 32)
    }

    pub fn decode(word: Word) -> F {
        F {
            opcode: extract_opcode(word),
            out: RegisterAccess::decode(extract_out(word)),
            immediate: extract_imm32(word),
        }
    }
}

/// E format: one register access and a 36-bit immediate. The register
/// access sits in a 12-bit slot to make room; the immediate is
/// zero-extended on decode, signedness is carried by the opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct E {
    pub opcode: OpcodeWord,
    pub out: RegisterAccess,
    pub immediate: u64,
}

impl E {
    pub fn encode(self) -> Word {
        (self.opcode as Word)
            | ((self.out.encode() as Word) << 16)
            | ((self.immediate & IMM36_MASK) << 28)
    }

    pub fn decode(word: Word) -> E {
        E {
            opcode: extract_opcode(word),
            out: RegisterAccess::decode(extract_out_compact(word)),
            immediate: extract_imm36(word),
        }
    }
}

/// R format: two register accesses (out, in) in 12-bit slots and a
/// 24-bit immediate, signedness carried by the opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct R {
    pub opcode: OpcodeWord,
    pub out: RegisterAccess,
    pub input: RegisterAccess,
    pub immediate: u32,
}

impl R {
    pub fn encode(self) -> Word {
        (self.opcode as Word)
            | ((self.out.encode() as Word) << 16)
            | ((self.input.encode() as Word) << 28)
            | (((self.immediate as Word) & IMM24_MASK) << 40)
    }

    pub fn decode(word: Word) -> R {
        R {
            opcode: extract_opcode(word),
            out: RegisterAccess::decode(extract_out_compact(word)),
            input: RegisterAccess::decode(extract_in_compact(word)),
            immediate: extract_imm24(word),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::GREEDY;
    use crate::opcode::Opcode;

    #[test]
    fn n_roundtrip() {
        let n = N {
            opcode: Opcode::Halt.to_u16(),
        };
        assert_eq!(N::decode(n.encode()), n);
    }

    #[test]
    fn s_roundtrip() {
        let s = S {
            opcode: Opcode::Delete.to_u16(),
            out: RegisterAccess::local(0xff),
        };
        assert_eq!(S::decode(s.encode()), s);
    }

    #[test]
    fn d_roundtrip() {
        let d = D {
            opcode: Opcode::Call.to_u16(),
            out: RegisterAccess::local(0xff),
            input: RegisterAccess::local(0x01),
        };
        assert_eq!(D::decode(d.encode()), d);
    }

    #[test]
    fn t_roundtrip() {
        let t = T {
            opcode: Opcode::Add.to_u16(),
            out: RegisterAccess::local(0xff),
            lhs: RegisterAccess::local(0x01),
            rhs: RegisterAccess::local_indirect(0x02),
        };
        assert_eq!(T::decode(t.encode()), t);
    }

    #[test]
    fn f_roundtrip() {
        let f = F {
            opcode: Opcode::Lliu.to_u16(),
            out: RegisterAccess::local(0xff),
            immediate: 0xdead_beef,
        };
        assert_eq!(F::decode(f.encode()), f);
    }

    #[test]
    fn f_carries_float_bits_verbatim() {
        let bits = 3.14f32.to_bits();
        let f = F {
            opcode: Opcode::Llil.to_u16(),
            out: RegisterAccess::local(7),
            immediate: bits,
        };
        let decoded = F::decode(f.encode());
        assert_eq!(f32::from_bits(decoded.immediate), 3.14f32);
    }

    #[test]
    fn e_roundtrip() {
        let e = E {
            opcode: Opcode::Lui.to_u16(),
            out: RegisterAccess::local(0xff),
            immediate: 0xa_bcde_f012,
        };
        assert_eq!(E::decode(e.encode()), e);
    }

    #[test]
    fn e_masks_oversized_immediate() {
        let e = E {
            opcode: Opcode::Luiu.to_u16(),
            out: RegisterAccess::local(1),
            immediate: u64::MAX,
        };
        assert_eq!(E::decode(e.encode()).immediate, IMM36_MASK);
    }

    #[test]
    fn r_roundtrip() {
        let r = R {
            opcode: Opcode::Addiu.to_u16(),
            out: RegisterAccess::local(0x55),
            input: RegisterAccess::local(0x22),
            immediate: 0xab_cdef,
        };
        assert_eq!(R::decode(r.encode()), r);
    }

    #[test]
    fn r_void_input_roundtrip() {
        let r = R {
            opcode: Opcode::Addi.to_u16(),
            out: RegisterAccess::local(1),
            input: RegisterAccess::void(),
            immediate: 42,
        };
        let decoded = R::decode(r.encode());
        assert!(decoded.input.is_void());
        assert_eq!(decoded, r);
    }

    #[test]
    fn greedy_bit_is_preserved() {
        let t = T {
            opcode: GREEDY | Opcode::Mul.to_u16(),
            out: RegisterAccess::local(2),
            lhs: RegisterAccess::local(2),
            rhs: RegisterAccess::local(3),
        };
        let word = t.encode();
        assert!(crate::encoding::is_greedy(word));
        assert_eq!(T::decode(word).opcode, GREEDY | Opcode::Mul.to_u16());
    }

    #[test]
    fn wrong_format_decode_never_panics() {
        let word = E {
            opcode: Opcode::Lui.to_u16(),
            out: RegisterAccess::local(1),
            immediate: 0xf_ffff_ffff,
        }
        .encode();
        // Meaningless but defined values.
        let _ = T::decode(word);
        let _ = D::decode(word);
        let _ = R::decode(word);
        let _ = F::decode(word);
        let _ = S::decode(word);
    }
}
