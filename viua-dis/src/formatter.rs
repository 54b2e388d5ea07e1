//! # Instruction formatter
//!
//! Renders decoded instructions the way the assembler would accept them
//! back: greedy instructions carry a `g.` prefix, registers use the
//! source sigils.

use crate::decoder::{DecodedInstruction, Operands};

/// Render a single decoded instruction.
pub fn format(instruction: &DecodedInstruction) -> String {
    let prefix = if instruction.greedy { "g." } else { "" };
    let mnemonic = format!("{}{}", prefix, instruction.opcode.mnemonic());
    match instruction.operands {
        Operands::N(_) => mnemonic,
        Operands::S(s) => format!("{} {}", mnemonic, s.out),
        Operands::D(d) => format!("{} {}, {}", mnemonic, d.out, d.input),
        Operands::T(t) => format!("{} {}, {}, {}", mnemonic, t.out, t.lhs, t.rhs),
        Operands::F(f) => format!("{} {}, {:#010x}", mnemonic, f.out, f.immediate),
        Operands::E(e) => format!("{} {}, {}", mnemonic, e.out, e.immediate),
        Operands::R(r) => format!("{} {}, {}, {}", mnemonic, r.out, r.input, r.immediate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use viua_arch::{Opcode, RegisterAccess, GREEDY, R, T};

    #[test]
    fn format_t_instruction() {
        let word = T {
            opcode: Opcode::Add.to_u16(),
            out: RegisterAccess::local(1),
            lhs: RegisterAccess::local(2),
            rhs: RegisterAccess::local(3),
        }
        .encode();
        assert_eq!(format(&decode(word).unwrap()), "add $1, $2, $3");
    }

    #[test]
    fn format_greedy_r_instruction_with_void_input() {
        let word = R {
            opcode: GREEDY | Opcode::Addiu.to_u16(),
            out: RegisterAccess::local(1),
            input: RegisterAccess::void(),
            immediate: 42,
        }
        .encode();
        assert_eq!(format(&decode(word).unwrap()), "g.addiu $1, void, 42");
    }
}
