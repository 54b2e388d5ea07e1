//! # Instruction decoder
//!
//! Decodes 64-bit words into typed instructions; the inverse of the
//! assembler's emitter.

use viua_arch::encoding::{extract_opcode, is_greedy, OPCODE_MASK};
use viua_arch::{Format, Opcode, Word, D, E, F, N, R, S, T};

use crate::error::{DisassemblerError, Result};

/// The operand bundle of a decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operands {
    N(N),
    S(S),
    D(D),
    T(T),
    F(F),
    E(E),
    R(R),
}

/// A fully decoded instruction word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub opcode: Opcode,
    pub greedy: bool,
    pub operands: Operands,
}

/// Decode one instruction word.
pub fn decode(word: Word) -> Result<DecodedInstruction> {
    let opcode = Opcode::from_word(word).ok_or_else(|| {
        DisassemblerError::UnknownOpcode(extract_opcode(word) & OPCODE_MASK)
    })?;

    let operands = match opcode.format() {
        Format::N => Operands::N(N::decode(word)),
        Format::S => Operands::S(S::decode(word)),
        Format::D => Operands::D(D::decode(word)),
        Format::T => Operands::T(T::decode(word)),
        Format::F => Operands::F(F::decode(word)),
        Format::E => Operands::E(E::decode(word)),
        Format::R => Operands::R(R::decode(word)),
    };

    Ok(DecodedInstruction {
        opcode,
        greedy: is_greedy(word),
        operands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use viua_arch::{RegisterAccess, GREEDY};

    #[test]
    fn decode_n_format() {
        let word = N {
            opcode: Opcode::Halt.to_u16(),
        }
        .encode();
        let decoded = decode(word).unwrap();
        assert_eq!(decoded.opcode, Opcode::Halt);
        assert!(!decoded.greedy);
    }

    #[test]
    fn decode_greedy_t_format() {
        let word = T {
            opcode: GREEDY | Opcode::Mul.to_u16(),
            out: RegisterAccess::local(2),
            lhs: RegisterAccess::local(2),
            rhs: RegisterAccess::local(3),
        }
        .encode();
        let decoded = decode(word).unwrap();
        assert_eq!(decoded.opcode, Opcode::Mul);
        assert!(decoded.greedy);
        assert!(matches!(decoded.operands, Operands::T(t)
            if t.out == RegisterAccess::local(2) && t.rhs == RegisterAccess::local(3)));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode(0x0000_0000_0000_7abc),
            Err(DisassemblerError::UnknownOpcode(0x7abc))
        ));
    }
}
