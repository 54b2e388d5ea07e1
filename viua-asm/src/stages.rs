//! # Assembly stages
//!
//! The ordered passes between the AST and the object image. Each stage
//! mutates the AST or the output buffers for the next one:
//!
//! 1. load function labels into the symbol table
//! 2. load value labels, materializing their bytes into `.rodata`
//! 3. cook long immediates (label operands become carrier pairs)
//! 4. expand pseudo-instructions (`li`)
//! 5. detect the entry point
//! 6. emit bytecode
//! 7. build the relocation table from the emitted stream

use std::collections::HashMap;

use viua_arch::image::{binding, symbol_type, RelocKind, Relocation, Symbol};
use viua_arch::{
    encoding, Opcode, RegisterAccess, Word, D, E, F, N, R, S, T, GREEDY, OPCODE_MASK, WORD_SIZE,
};

use crate::error::{Cause, Diagnostic, Location, Result};
use crate::lexer::{Token, TokenKind};
use crate::parser::{FnDef, InsnNode, LabelKind, Node, Operand};

// ============================================================================
// Table helpers
// ============================================================================

/// Append a NUL-terminated string to a string table, returning its
/// offset.
pub fn save_string(table: &mut Vec<u8>, text: &str) -> u32 {
    let at = table.len() as u32;
    table.extend_from_slice(text.as_bytes());
    table.push(0);
    at
}

/// Append raw bytes to `.rodata`, returning their offset.
pub fn save_buffer(rodata: &mut Vec<u8>, bytes: &[u8]) -> u64 {
    let at = rodata.len() as u64;
    rodata.extend_from_slice(bytes);
    at
}

/// Record a symbol under a name; duplicate names are fatal.
pub fn record_symbol(
    name: &str,
    location: Location,
    symbol: Symbol,
    symbol_table: &mut Vec<Symbol>,
    symbol_map: &mut HashMap<String, usize>,
) -> Result<usize> {
    if symbol_map.contains_key(name) {
        return Err(Diagnostic::new(
            location,
            Cause::DuplicatedSymbol(name.to_string()),
        ));
    }
    let index = symbol_table.len();
    symbol_table.push(symbol);
    symbol_map.insert(name.to_string(), index);
    Ok(index)
}

/// Process the escape sequences of a string literal's inner text.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ============================================================================
// Stage 1: function labels
// ============================================================================

/// Append a symbol for every function definition. Size and value stay
/// empty until the bytecode is emitted; functions marked `[[extern]]`
/// keep them empty as a signal that the symbol lives in another module.
pub fn load_function_labels(
    nodes: &[Node],
    string_table: &mut Vec<u8>,
    symbol_table: &mut Vec<Symbol>,
    symbol_map: &mut HashMap<String, usize>,
) -> Result<()> {
    for node in nodes {
        let Node::Function(fun) = node else {
            continue;
        };
        let name_off = save_string(string_table, &fun.name.text);
        let symbol = Symbol::new(name_off, binding::GLOBAL, symbol_type::FUNC);
        record_symbol(
            &fun.name.text,
            fun.name.location,
            symbol,
            symbol_table,
            symbol_map,
        )?;
    }
    Ok(())
}

// ============================================================================
// Stage 2: value labels
// ============================================================================

/// Resolve every non-function label into bytes appended to `.rodata`
/// and a matching object symbol.
pub fn load_value_labels(
    nodes: &[Node],
    rodata: &mut Vec<u8>,
    string_table: &mut Vec<u8>,
    symbol_table: &mut Vec<Symbol>,
    symbol_map: &mut HashMap<String, usize>,
) -> Result<()> {
    for node in nodes {
        let Node::Label(label) = node else {
            continue;
        };

        if label.has_attr("extern") {
            let name_off = save_string(string_table, &label.name.text);
            // Neither address nor size of an extern symbol is known,
            // only its label.
            let symbol = Symbol::new(name_off, binding::GLOBAL, symbol_type::OBJECT);
            record_symbol(
                &label.name.text,
                label.name.location,
                symbol,
                symbol_table,
                symbol_map,
            )?;
            continue;
        }

        let bytes = match label.kind {
            LabelKind::Str => cook_string_value(label.name.location, &label.value)?,
            LabelKind::Atom => {
                let token = &label.value[0];
                let text = if token.kind == TokenKind::LiteralAtom {
                    token.text.trim_matches('\'').to_string()
                } else {
                    token.text.clone()
                };
                text.into_bytes()
            }
        };

        let value_off = save_buffer(rodata, &bytes);
        let name_off = save_string(string_table, &label.name.text);
        let mut symbol = Symbol::new(name_off, binding::GLOBAL, symbol_type::OBJECT);
        symbol.value = value_off;
        symbol.size = bytes.len() as u64;
        record_symbol(
            &label.name.text,
            label.name.location,
            symbol,
            symbol_table,
            symbol_map,
        )?;
    }
    Ok(())
}

fn cook_string_value(at: Location, value: &[Token]) -> Result<Vec<u8>> {
    let mut cooked = String::new();
    let mut i = 0;
    while i < value.len() {
        let token = &value[i];
        match token.kind {
            TokenKind::LiteralString => {
                let inner = &token.text[1..token.text.len() - 1];
                cooked.push_str(&unescape(inner));
            }
            TokenKind::Star => {
                i += 1;
                let count = match value.get(i) {
                    Some(next) if next.kind == TokenKind::LiteralInteger => {
                        crate::parser::parse_integer(next)?
                    }
                    Some(next) => {
                        return Err(Diagnostic::new(
                            next.location,
                            Cause::InvalidOperand(
                                "cannot multiply string constant by non-integer".to_string(),
                            ),
                        )
                        .with_note("right-hand side must be a positive integer"));
                    }
                    None => {
                        return Err(Diagnostic::new(
                            at,
                            Cause::InvalidOperand("string repetition without a count".to_string()),
                        ));
                    }
                };
                if count < 0 {
                    return Err(Diagnostic::new(
                        value[i].location,
                        Cause::InvalidOperand(
                            "cannot multiply string constant by non-integer".to_string(),
                        ),
                    )
                    .with_note("right-hand side must be a positive integer"));
                }
                cooked = cooked.repeat(count as usize);
            }
            _ => {
                return Err(Diagnostic::new(
                    token.location,
                    Cause::InvalidOperand(format!("unexpected {:?} in string value", token.text)),
                ));
            }
        }
        i += 1;
    }
    Ok(cooked.into_bytes())
}

// ============================================================================
// Stage 3: long-immediate cooking
// ============================================================================

fn synthetic_opcode(template: &Token, mnemonic: &str) -> Token {
    Token {
        kind: TokenKind::Opcode,
        location: template.location,
        text: mnemonic.to_string(),
    }
}

fn register_operand(access: RegisterAccess, location: Location) -> Operand {
    Operand::Register {
        access,
        token: Token {
            kind: TokenKind::Register,
            location,
            text: access.to_string(),
        },
    }
}

fn immediate_operand(value: i128, location: Location) -> Operand {
    Operand::Immediate {
        value,
        token: Token {
            kind: TokenKind::LiteralInteger,
            location,
            text: value.to_string(),
        },
    }
}

/// Rewrite instructions whose operand references a label into a carrier
/// pair of F-format instructions holding the upper and lower halves of
/// the referenced symbol-table index, followed by the original
/// instruction in register form. A relocation emitted later patches the
/// pair at link time.
pub fn cook_long_immediates(
    nodes: &mut [Node],
    symbol_map: &HashMap<String, usize>,
) -> Result<()> {
    for node in nodes.iter_mut() {
        let Node::Function(fun) = node else {
            continue;
        };

        let mut cooked = Vec::with_capacity(fun.instructions.len());
        for insn in fun.instructions.drain(..) {
            let wants_cooking = matches!(insn.mnemonic.text.as_str(), "call" | "atom" | "string")
                && insn
                    .operands
                    .iter()
                    .any(|operand| matches!(operand, Operand::Label { .. }));
            if !wants_cooking {
                cooked.push(insn);
                continue;
            }

            let (out, label) = match insn.operands.as_slice() {
                [Operand::Register { access, .. }, Operand::Label { token }] => (*access, token),
                _ => {
                    return Err(Diagnostic::new(
                        insn.mnemonic.location,
                        Cause::InvalidOperand(format!(
                            "{} expects a register and a label",
                            insn.mnemonic.text
                        )),
                    ));
                }
            };

            let index = *symbol_map.get(&label.text).ok_or_else(|| {
                Diagnostic::new(label.location, Cause::UnknownLabel(label.text.clone()))
            })? as u64;

            // CALL with a void output still needs a register to carry
            // the symbol index; local 0 is the designated scratch.
            let carrier = if out.is_void() {
                RegisterAccess::local(0)
            } else {
                out
            };

            let at = insn.mnemonic.location;
            let lliu = InsnNode {
                mnemonic: synthetic_opcode(&insn.mnemonic, "lliu"),
                operands: vec![
                    register_operand(carrier, at),
                    immediate_operand((index >> 32) as i128, at),
                ],
                physical_index: insn.physical_index,
                greedy: true,
            };
            let llil = InsnNode {
                mnemonic: synthetic_opcode(&insn.mnemonic, "llil"),
                operands: vec![
                    register_operand(carrier, at),
                    immediate_operand((index & 0xffff_ffff) as i128, at),
                ],
                physical_index: insn.physical_index,
                greedy: true,
            };

            let rewritten = match insn.mnemonic.text.as_str() {
                "call" => InsnNode {
                    operands: vec![register_operand(out, at), register_operand(carrier, at)],
                    ..insn.clone()
                },
                _ => InsnNode {
                    operands: vec![register_operand(carrier, at)],
                    ..insn.clone()
                },
            };

            cooked.push(lliu);
            cooked.push(llil);
            cooked.push(rewritten);
        }
        fun.instructions = cooked;
    }
    Ok(())
}

// ============================================================================
// Stage 4: pseudo-instruction expansion
// ============================================================================

/// The `li` decomposition of a 64-bit value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadingParts {
    /// The top 36 bits, to be loaded with LUI.
    pub high: u64,
    pub base: u32,
    /// Zero when the low part fits in 24 bits.
    pub multiplier: u32,
    pub remainder: u32,
}

/// Split a value for loading: the high 36 bits go through LUI, and the
/// low 28 bits either fit a 24-bit immediate directly or are rebuilt as
/// `base * multiplier + remainder`.
pub fn to_loading_parts_unsigned(value: u64) -> LoadingParts {
    const LOW_24: u64 = 0x0000_0000_00ff_ffff;
    const HIGH_36: u64 = 0xffff_ffff_f000_0000;

    let high = (value & HIGH_36) >> 28;
    let low = (value & !HIGH_36) as u32;

    // When the low part fits in 24 bits two instructions are enough:
    // lui for the high bits, addi for the rest.
    if (low as u64 & LOW_24) == low as u64 {
        return LoadingParts {
            high,
            base: low,
            multiplier: 0,
            remainder: 0,
        };
    }

    let multiplier = 16;
    let remainder = low % multiplier;
    let base = (low - remainder) / multiplier;
    LoadingParts {
        high,
        base,
        multiplier,
        remainder,
    }
}

/// Recombine loading parts; inverse of [`to_loading_parts_unsigned`].
pub fn from_loading_parts(parts: LoadingParts) -> u64 {
    let low = if parts.multiplier != 0 {
        (parts.base * parts.multiplier + parts.remainder) as u64
    } else {
        parts.base as u64
    };
    (parts.high << 28) | low
}

fn expand_li(insn: &InsnNode) -> Result<Vec<InsnNode>> {
    let (dest, value) = match insn.operands.as_slice() {
        [Operand::Register { access, .. }, Operand::Immediate { value, .. }] => (*access, *value),
        _ => {
            return Err(Diagnostic::new(
                insn.mnemonic.location,
                Cause::InvalidOperand("li expects a register and an integer".to_string()),
            ));
        }
    };
    if dest.is_void() || !dest.direct {
        return Err(Diagnostic::new(
            insn.mnemonic.location,
            Cause::InvalidOperand("li needs a direct destination register".to_string()),
        ));
    }
    if value < i64::MIN as i128 || value > u64::MAX as i128 {
        return Err(Diagnostic::new(
            insn.mnemonic.location,
            Cause::ImmediateOutOfRange { value, width: 64 },
        ));
    }

    // Values that cannot be represented as a signed 64-bit integer load
    // as unsigned; everything else, including negatives, loads signed.
    let signed = value <= i64::MAX as i128;
    let bits = value as u64;
    let (lui, addi) = if signed {
        ("lui", "addi")
    } else {
        ("luiu", "addiu")
    };

    let parts = to_loading_parts_unsigned(bits);
    let at = insn.mnemonic.location;
    let index = insn.physical_index;
    let mut ops: Vec<InsnNode> = Vec::new();

    let mut push = |mnemonic: &str, operands: Vec<Operand>, greedy: bool| {
        ops.push(InsnNode {
            mnemonic: synthetic_opcode(&insn.mnemonic, mnemonic),
            operands,
            physical_index: index,
            greedy,
        });
    };

    // The lui is pure overhead unless some of the highest 36 bits are
    // actually set.
    if parts.high != 0 {
        push(
            lui,
            vec![
                register_operand(dest, at),
                immediate_operand(parts.high as i128, at),
            ],
            true,
        );
    }

    if parts.multiplier != 0 {
        if dest.index > u8::MAX - 2 {
            return Err(Diagnostic::new(
                at,
                Cause::InvalidOperand(
                    "li needs two scratch registers above the destination".to_string(),
                ),
            ));
        }
        let t0 = RegisterAccess {
            index: dest.index + 1,
            ..dest
        };
        let t1 = RegisterAccess {
            index: dest.index + 2,
            ..dest
        };

        if parts.high == 0 {
            // Nothing loaded the destination yet; the final add needs a
            // defined value there.
            push(
                addi,
                vec![
                    register_operand(dest, at),
                    register_operand(RegisterAccess::void(), at),
                    immediate_operand(0, at),
                ],
                true,
            );
        }

        push(
            addi,
            vec![
                register_operand(t0, at),
                register_operand(RegisterAccess::void(), at),
                immediate_operand(parts.base as i128, at),
            ],
            true,
        );
        push(
            addi,
            vec![
                register_operand(t1, at),
                register_operand(RegisterAccess::void(), at),
                immediate_operand(parts.multiplier as i128, at),
            ],
            true,
        );
        push(
            "mul",
            vec![
                register_operand(t0, at),
                register_operand(t0, at),
                register_operand(t1, at),
            ],
            true,
        );
        push(
            addi,
            vec![
                register_operand(t1, at),
                register_operand(RegisterAccess::void(), at),
                immediate_operand(parts.remainder as i128, at),
            ],
            true,
        );
        push(
            "add",
            vec![
                register_operand(t0, at),
                register_operand(t0, at),
                register_operand(t1, at),
            ],
            true,
        );
        push(
            "add",
            vec![
                register_operand(dest, at),
                register_operand(dest, at),
                register_operand(t0, at),
            ],
            false,
        );
    } else if parts.high != 0 {
        push(
            addi,
            vec![
                register_operand(dest, at),
                register_operand(dest, at),
                immediate_operand(parts.base as i128, at),
            ],
            false,
        );
    } else {
        push(
            addi,
            vec![
                register_operand(dest, at),
                register_operand(RegisterAccess::void(), at),
                immediate_operand(parts.base as i128, at),
            ],
            false,
        );
    }

    Ok(ops)
}

/// Replace pseudo-instructions with sequences of real instructions. All
/// expansion products except the final one carry the greedy bit so the
/// sequence executes atomically with respect to preemption.
pub fn expand_pseudoinstructions(nodes: &mut [Node]) -> Result<()> {
    for node in nodes.iter_mut() {
        let Node::Function(fun) = node else {
            continue;
        };
        let mut expanded = Vec::with_capacity(fun.instructions.len());
        for insn in fun.instructions.drain(..) {
            if insn.mnemonic.text == "li" {
                expanded.extend(expand_li(&insn)?);
            } else {
                expanded.push(insn);
            }
        }
        fun.instructions = expanded;
    }
    Ok(())
}

// ============================================================================
// Stage 5: entry-point detection
// ============================================================================

/// Find the function carrying the `entry_point` attribute. More than
/// one is a fatal diagnostic citing both.
pub fn find_entry_point(nodes: &[Node]) -> Result<Option<String>> {
    let mut entry: Option<&FnDef> = None;
    for node in nodes {
        let Node::Function(fun) = node else {
            continue;
        };
        if !fun.has_attr("entry_point") {
            continue;
        }
        if let Some(first) = entry {
            return Err(Diagnostic::new(
                fun.name.location,
                Cause::DuplicatedEntryPoint,
            )
            .with_related(
                first.name.location,
                format!("first entry point was: {}", first.name.text),
            )
            .with_note(format!("cannot mark {} as a second entry point", fun.name.text)));
        }
        entry = Some(fun);
    }
    Ok(entry.map(|fun| fun.name.text.clone()))
}

// ============================================================================
// Stage 6: bytecode emission
// ============================================================================

fn expect_register(insn: &InsnNode, at: usize) -> Result<RegisterAccess> {
    match insn.operands.get(at) {
        Some(Operand::Register { access, .. }) => Ok(*access),
        Some(operand) => Err(Diagnostic::new(
            operand.location(),
            Cause::InvalidOperand(format!(
                "{} expects a register as operand {}",
                insn.mnemonic.text,
                at + 1
            )),
        )),
        None => Err(Diagnostic::new(
            insn.mnemonic.location,
            Cause::MissingOperand(insn.mnemonic.text.clone()),
        )),
    }
}

fn expect_immediate(insn: &InsnNode, at: usize) -> Result<(i128, Location)> {
    match insn.operands.get(at) {
        Some(Operand::Immediate { value, token }) => Ok((*value, token.location)),
        Some(operand) => Err(Diagnostic::new(
            operand.location(),
            Cause::InvalidOperand(format!(
                "{} expects an immediate as operand {}",
                insn.mnemonic.text,
                at + 1
            )),
        )),
        None => Err(Diagnostic::new(
            insn.mnemonic.location,
            Cause::MissingOperand(insn.mnemonic.text.clone()),
        )),
    }
}

fn check_arity(insn: &InsnNode, expected: usize) -> Result<()> {
    if insn.operands.len() > expected {
        return Err(Diagnostic::new(
            insn.operands[expected].location(),
            Cause::InvalidOperand(format!(
                "{} takes {} operand(s), got {}",
                insn.mnemonic.text,
                expected,
                insn.operands.len()
            )),
        ));
    }
    Ok(())
}

/// Encode a single instruction node through the codec.
pub fn emit_instruction(insn: &InsnNode) -> Result<Word> {
    let opcode = Opcode::from_mnemonic(&insn.mnemonic.text).ok_or_else(|| {
        Diagnostic::new(
            insn.mnemonic.location,
            Cause::UnknownMnemonic(insn.mnemonic.text.clone()),
        )
    })?;
    let mut op_word = opcode.to_u16();
    if insn.greedy {
        op_word |= GREEDY;
    }

    use viua_arch::Format;
    let word = match opcode.format() {
        Format::N => {
            check_arity(insn, 0)?;
            N { opcode: op_word }.encode()
        }
        Format::S => {
            let out = expect_register(insn, 0)?;
            check_arity(insn, 1)?;
            S {
                opcode: op_word,
                out,
            }
            .encode()
        }
        Format::D => {
            let out = expect_register(insn, 0)?;
            let input = expect_register(insn, 1)?;
            check_arity(insn, 2)?;
            D {
                opcode: op_word,
                out,
                input,
            }
            .encode()
        }
        Format::T => {
            let out = expect_register(insn, 0)?;
            let lhs = expect_register(insn, 1)?;
            let rhs = expect_register(insn, 2)?;
            check_arity(insn, 3)?;
            T {
                opcode: op_word,
                out,
                lhs,
                rhs,
            }
            .encode()
        }
        Format::F => {
            let out = expect_register(insn, 0)?;
            let (value, at) = expect_immediate(insn, 1)?;
            check_arity(insn, 2)?;
            if !(0..=u32::MAX as i128).contains(&value) {
                return Err(Diagnostic::new(
                    at,
                    Cause::ImmediateOutOfRange { value, width: 32 },
                ));
            }
            F {
                opcode: op_word,
                out,
                immediate: value as u32,
            }
            .encode()
        }
        Format::E => {
            let out = expect_register(insn, 0)?;
            let (value, at) = expect_immediate(insn, 1)?;
            check_arity(insn, 2)?;
            if !(0..=encoding::IMM36_MASK as i128).contains(&value) {
                return Err(Diagnostic::new(
                    at,
                    Cause::ImmediateOutOfRange { value, width: 36 },
                ));
            }
            E {
                opcode: op_word,
                out,
                immediate: value as u64,
            }
            .encode()
        }
        Format::R => {
            let out = expect_register(insn, 0)?;
            let input = expect_register(insn, 1)?;
            let (value, at) = expect_immediate(insn, 2)?;
            check_arity(insn, 3)?;
            let signed = matches!(
                opcode,
                Opcode::Addi | Opcode::Subi | Opcode::Muli | Opcode::Divi
            );
            let immediate = if signed {
                if !(-(1i128 << 23)..(1i128 << 23)).contains(&value) {
                    return Err(Diagnostic::new(
                        at,
                        Cause::ImmediateOutOfRange { value, width: 24 },
                    ));
                }
                (value as i64 as u64 & 0xff_ffff) as u32
            } else {
                if !(0..(1i128 << 24)).contains(&value) {
                    return Err(Diagnostic::new(
                        at,
                        Cause::ImmediateOutOfRange { value, width: 24 },
                    ));
                }
                value as u32
            };
            R {
                opcode: op_word,
                out,
                input,
                immediate,
            }
            .encode()
        }
    };
    Ok(word)
}

/// Emit the `.text` stream: a HALT guard at offset 0, then every
/// function in definition order. Function symbols get their final value
/// and size here.
pub fn emit_bytecode(
    nodes: &[Node],
    symbol_table: &mut [Symbol],
    symbol_map: &HashMap<String, usize>,
) -> Result<Vec<Word>> {
    let mut text = vec![N {
        opcode: Opcode::Halt.to_u16(),
    }
    .encode()];

    for node in nodes {
        let Node::Function(fun) = node else {
            continue;
        };

        let fn_offset = (text.len() * WORD_SIZE) as u64;
        if let Some(&index) = symbol_map.get(&fun.name.text) {
            if !fun.has_attr("extern") {
                let symbol = &mut symbol_table[index];
                symbol.value = fn_offset;
                symbol.size = (fun.instructions.len() * WORD_SIZE) as u64;
            }
        }

        for insn in &fun.instructions {
            text.push(emit_instruction(insn)?);
        }
    }

    Ok(text)
}

// ============================================================================
// Stage 7: relocation table
// ============================================================================

/// Scan the emitted stream for CALL and ATOM instructions; the two
/// F-format words before each hold the symbol-table index the carrier
/// pair was cooked with.
pub fn make_reloc_table(text: &[Word]) -> Vec<Relocation> {
    let mut table = Vec::new();
    for (i, &word) in text.iter().enumerate() {
        if i < 2 {
            continue;
        }
        let opcode = match Opcode::from_u16(encoding::extract_opcode(word) & OPCODE_MASK) {
            Some(opcode) => opcode,
            None => continue,
        };
        let kind = match opcode {
            Opcode::Call => RelocKind::JumpSlot,
            Opcode::Atom => RelocKind::Object,
            _ => continue,
        };
        let hi = (F::decode(text[i - 2]).immediate as u64) << 32;
        let lo = F::decode(text[i - 1]).immediate as u64;
        let symbol = (hi | lo) as u32;
        table.push(Relocation::new(
            ((i - 2) * WORD_SIZE) as u64,
            symbol,
            kind,
        ));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_parts_recombine() {
        let mut grid: Vec<u64> = vec![
            0x0000000000000000,
            0x0000000000000001,
            0x0000000000bedead, // low 24 only
            0x00000000deadbeef, // low 32
            0xdeadbeefd0adbeef, // high 36 with a low part fitting 24 bits
            0xffffffffffffffff,
        ];
        for x in 1..=0xf_u64 {
            grid.push(0xdeadbeefd0adbeef | (x << 24));
        }

        for value in grid {
            let parts = to_loading_parts_unsigned(value);
            assert_eq!(from_loading_parts(parts), value, "value {:#018x}", value);
        }
    }

    #[test]
    fn loading_parts_special_case() {
        // The low 28 bits of this value fit in 24 bits, so no multiplier
        // decomposition is needed despite the high bits being set.
        let parts = to_loading_parts_unsigned(0xdeadbeefd0adbeef);
        assert_eq!(parts.high, 0xdeadbeefd);
        assert_eq!(parts.base, 0x0adbeef);
        assert_eq!(parts.multiplier, 0);
    }

    #[test]
    fn loading_parts_multiplier_case() {
        let parts = to_loading_parts_unsigned(0xdeadbeefdeadbeef);
        assert_eq!(parts.high, 0xdeadbeefd);
        assert_eq!(parts.multiplier, 16);
        assert_eq!(
            (parts.base * parts.multiplier + parts.remainder) as u64,
            0xeadbeef
        );
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r"Hello\n"), "Hello\n");
        assert_eq!(unescape(r"a\tb"), "a\tb");
        assert_eq!(unescape(r#"say \"hi\""#), "say \"hi\"");
        assert_eq!(unescape(r"back\\slash"), "back\\slash");
        assert_eq!(unescape(r"nul\0"), "nul\0");
        assert_eq!(unescape("plain"), "plain");
    }

    fn li_node(index: u8, value: i128) -> InsnNode {
        InsnNode {
            mnemonic: Token {
                kind: TokenKind::Opcode,
                location: Location::default(),
                text: "li".to_string(),
            },
            operands: vec![
                register_operand(RegisterAccess::local(index), Location::default()),
                immediate_operand(value, Location::default()),
            ],
            physical_index: 0,
            greedy: false,
        }
    }

    #[test]
    fn li_small_value_is_one_instruction() {
        let ops = expand_li(&li_node(1, 42)).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].mnemonic.text, "addi");
        assert!(!ops[0].greedy);
    }

    #[test]
    fn li_hex_beyond_i64_uses_unsigned_ops() {
        let ops = expand_li(&li_node(1, 0xdeadbeefdeadbeef_u64 as i128)).unwrap();
        assert_eq!(ops[0].mnemonic.text, "luiu");
        assert!(ops.iter().all(|op| op.mnemonic.text != "lui"));
        assert!(ops.iter().any(|op| op.mnemonic.text == "mul"));
    }

    #[test]
    fn li_negative_uses_signed_ops() {
        let ops = expand_li(&li_node(1, -1)).unwrap();
        assert_eq!(ops[0].mnemonic.text, "lui");
        assert!(ops.iter().any(|op| op.mnemonic.text == "addi"));
    }

    #[test]
    fn li_greedy_everywhere_but_the_last() {
        for value in [42, 0xdeadbeef_i128, 0xdeadbeefdeadbeef_u64 as i128] {
            let ops = expand_li(&li_node(1, value)).unwrap();
            let (last, rest) = ops.split_last().unwrap();
            assert!(!last.greedy, "value {:#x}", value);
            assert!(rest.iter().all(|op| op.greedy), "value {:#x}", value);
        }
    }

    #[test]
    fn li_uses_the_two_registers_above_the_destination() {
        let ops = expand_li(&li_node(5, 0xdeadbeefdeadbeef_u64 as i128)).unwrap();
        let touched: Vec<u8> = ops
            .iter()
            .flat_map(|op| op.operands.iter())
            .filter_map(|operand| match operand {
                Operand::Register { access, .. } if !access.is_void() => Some(access.index),
                _ => None,
            })
            .collect();
        assert!(touched.iter().all(|&index| (5..=7).contains(&index)));
        assert!(touched.contains(&6));
        assert!(touched.contains(&7));
    }

    #[test]
    fn li_without_room_for_scratch_registers_fails() {
        let err = expand_li(&li_node(254, 0xdeadbeefdeadbeef_u64 as i128)).unwrap_err();
        assert!(matches!(err.cause, Cause::InvalidOperand(_)));
    }

    #[test]
    fn emit_rejects_oversized_immediates() {
        let insn = InsnNode {
            mnemonic: Token {
                kind: TokenKind::Opcode,
                location: Location::default(),
                text: "addiu".to_string(),
            },
            operands: vec![
                register_operand(RegisterAccess::local(1), Location::default()),
                register_operand(RegisterAccess::void(), Location::default()),
                immediate_operand(1 << 24, Location::default()),
            ],
            physical_index: 0,
            greedy: false,
        };
        let err = emit_instruction(&insn).unwrap_err();
        assert!(matches!(
            err.cause,
            Cause::ImmediateOutOfRange { width: 24, .. }
        ));
    }

    #[test]
    fn emit_encodes_negative_signed_immediates() {
        let insn = InsnNode {
            mnemonic: Token {
                kind: TokenKind::Opcode,
                location: Location::default(),
                text: "addi".to_string(),
            },
            operands: vec![
                register_operand(RegisterAccess::local(1), Location::default()),
                register_operand(RegisterAccess::void(), Location::default()),
                immediate_operand(-2, Location::default()),
            ],
            physical_index: 0,
            greedy: false,
        };
        let word = emit_instruction(&insn).unwrap();
        let decoded = R::decode(word);
        assert_eq!(encoding::sign_extend_24(decoded.immediate), -2);
    }

    #[test]
    fn reloc_scan_finds_call_and_atom_pairs() {
        let carrier = RegisterAccess::local(1);
        let text = vec![
            N {
                opcode: Opcode::Halt.to_u16(),
            }
            .encode(),
            F {
                opcode: GREEDY | Opcode::Lliu.to_u16(),
                out: carrier,
                immediate: 0,
            }
            .encode(),
            F {
                opcode: GREEDY | Opcode::Llil.to_u16(),
                out: carrier,
                immediate: 7,
            }
            .encode(),
            D {
                opcode: Opcode::Call.to_u16(),
                out: carrier,
                input: carrier,
            }
            .encode(),
            F {
                opcode: GREEDY | Opcode::Lliu.to_u16(),
                out: carrier,
                immediate: 0,
            }
            .encode(),
            F {
                opcode: GREEDY | Opcode::Llil.to_u16(),
                out: carrier,
                immediate: 9,
            }
            .encode(),
            S {
                opcode: Opcode::Atom.to_u16(),
                out: carrier,
            }
            .encode(),
        ];

        let relocations = make_reloc_table(&text);
        assert_eq!(relocations.len(), 2);

        assert_eq!(relocations[0].offset, 1 * WORD_SIZE as u64);
        assert_eq!(relocations[0].symbol(), 7);
        assert_eq!(relocations[0].kind(), Some(RelocKind::JumpSlot));

        assert_eq!(relocations[1].offset, 4 * WORD_SIZE as u64);
        assert_eq!(relocations[1].symbol(), 9);
        assert_eq!(relocations[1].kind(), Some(RelocKind::Object));

        assert!(relocations.iter().all(|rel| rel.offset % 8 == 0));
    }
}
