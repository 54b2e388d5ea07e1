//! # Per-opcode execution
//!
//! The per-format decoders and per-opcode executors behind the dispatch
//! loop. Executors return the next instruction pointer; `None` is the
//! halt sentinel.
//!
//! Values are computed on raw 64-bit payloads; the type tag of the
//! left-hand operand propagates to the result. There is no implicit
//! numeric promotion between tags.

use viua_arch::value::{Atom, Str};
use viua_arch::{
    encoding, Format, Opcode, RegisterAccess, Tag, Value, Word, D, E, F, R, S, T, WORD_SIZE,
};

use crate::error::{Result, RuntimeError};
use crate::loader::LoadedProgram;
use crate::state::{Frame, Process, RegisterFile, MAX_FRAME_DEPTH};
use crate::trace::TraceStream;

/// Everything an executor can touch.
pub struct ExecutionContext<'a> {
    pub process: &'a mut Process,
    pub program: &'a LoadedProgram,
    pub trace: &'a mut TraceStream,
}

/// Decode and execute the word at `ip` (a word index into `.text`).
/// Returns the next instruction pointer, or `None` to halt.
pub fn execute_word(ctx: &mut ExecutionContext, word: Word, ip: u64) -> Result<Option<u64>> {
    let at = ip * WORD_SIZE as u64;
    let opcode = Opcode::from_word(word).ok_or(RuntimeError::InvalidInstruction {
        word,
        offset: at,
    })?;

    if ctx.trace.enabled() {
        ctx.trace.line(&format!("    {}", render_instruction(word)));
    }

    let next = Some(ip + 1);
    match opcode {
        // ========== Control ==========
        Opcode::Noop => Ok(next),
        Opcode::Halt => Ok(None),
        Opcode::Ebreak => {
            dump_registers(ctx);
            Ok(next)
        }
        Opcode::Call => execute_call(ctx, D::decode(word), ip, at),
        Opcode::Return => execute_return(ctx, S::decode(word)),

        // ========== T format: arithmetic and bitwise ==========
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
            let t = T::decode(word);
            let (tag, lhs) = ctx.process.tagged(t.lhs).map_err(|e| e.at(at))?;
            let (_, rhs) = ctx.process.tagged(t.rhs).map_err(|e| e.at(at))?;
            let value = match opcode {
                Opcode::Add => lhs.wrapping_add(rhs),
                Opcode::Sub => lhs.wrapping_sub(rhs),
                Opcode::Mul => lhs.wrapping_mul(rhs),
                Opcode::Div | Opcode::Mod => {
                    if rhs == 0 {
                        return Err(RuntimeError::DivisionByZero { offset: at });
                    }
                    if opcode == Opcode::Div {
                        lhs / rhs
                    } else {
                        lhs % rhs
                    }
                }
                _ => unreachable!(),
            };
            ctx.process.set(t.out, Value::unboxed(tag, value))?;
            Ok(next)
        }

        Opcode::Bitshl
        | Opcode::Bitshr
        | Opcode::Bitashr
        | Opcode::Bitrol
        | Opcode::Bitror
        | Opcode::Bitand
        | Opcode::Bitor
        | Opcode::Bitxor => {
            let t = T::decode(word);
            let (tag, lhs) = ctx.process.tagged(t.lhs).map_err(|e| e.at(at))?;
            let (_, rhs) = ctx.process.tagged(t.rhs).map_err(|e| e.at(at))?;
            let shift = (rhs & 63) as u32;
            let value = match opcode {
                Opcode::Bitshl => lhs.wrapping_shl(shift),
                Opcode::Bitshr => lhs.wrapping_shr(shift),
                Opcode::Bitashr => ((lhs as i64) >> shift) as u64,
                Opcode::Bitrol => lhs.rotate_left(shift),
                Opcode::Bitror => lhs.rotate_right(shift),
                Opcode::Bitand => lhs & rhs,
                Opcode::Bitor => lhs | rhs,
                Opcode::Bitxor => lhs ^ rhs,
                _ => unreachable!(),
            };
            ctx.process.set(t.out, Value::unboxed(tag, value))?;
            Ok(next)
        }

        // ========== T format: comparison ==========
        Opcode::Eq | Opcode::Lt | Opcode::Gt | Opcode::Cmp => {
            let t = T::decode(word);
            let (tag, lhs) = ctx.process.tagged(t.lhs).map_err(|e| e.at(at))?;
            let (_, rhs) = ctx.process.tagged(t.rhs).map_err(|e| e.at(at))?;
            // Signed slots compare as signed; everything else compares
            // on the raw payload.
            let ordering = if tag == Tag::Signed {
                (lhs as i64).cmp(&(rhs as i64))
            } else {
                lhs.cmp(&rhs)
            };
            let value = match opcode {
                Opcode::Eq => Value::unsigned((ordering == std::cmp::Ordering::Equal) as u64),
                Opcode::Lt => Value::unsigned((ordering == std::cmp::Ordering::Less) as u64),
                Opcode::Gt => Value::unsigned((ordering == std::cmp::Ordering::Greater) as u64),
                Opcode::Cmp => Value::signed(match ordering {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                }),
                _ => unreachable!(),
            };
            ctx.process.set(t.out, value)?;
            Ok(next)
        }

        Opcode::And | Opcode::Or => {
            let t = T::decode(word);
            let lhs = ctx.process.boolean(t.lhs).map_err(|e| e.at(at))?;
            let rhs = ctx.process.boolean(t.rhs).map_err(|e| e.at(at))?;
            let value = match opcode {
                Opcode::And => lhs && rhs,
                Opcode::Or => lhs || rhs,
                _ => unreachable!(),
            };
            ctx.process.set(t.out, Value::unsigned(value as u64))?;
            Ok(next)
        }

        // ========== D format ==========
        Opcode::Bitnot => {
            let d = D::decode(word);
            let (tag, input) = ctx.process.tagged(d.input).map_err(|e| e.at(at))?;
            ctx.process.set(d.out, Value::unboxed(tag, !input))?;
            Ok(next)
        }
        Opcode::Not => {
            let d = D::decode(word);
            let input = ctx.process.boolean(d.input).map_err(|e| e.at(at))?;
            ctx.process.set(d.out, Value::unsigned(!input as u64))?;
            Ok(next)
        }
        Opcode::Aa => {
            let d = D::decode(word);
            let (tag, size) = ctx.process.tagged(d.input).map_err(|e| e.at(at))?;
            if tag != Tag::Unsigned {
                return Err(RuntimeError::InvalidOperand {
                    offset: at,
                    detail: "invalid operand type for aa instruction".to_string(),
                });
            }
            let pointer = ctx.process.stack_break;
            ctx.process.stack_break += size;
            let stack_break = ctx.process.stack_break;
            ctx.process.frame_mut().saved_break = stack_break;
            ctx.process.set(d.out, Value::unsigned(pointer))?;
            ctx.process.pointers.push(pointer);
            Ok(next)
        }

        // ========== S format ==========
        Opcode::Delete => {
            let s = S::decode(word);
            // Overwriting the slot releases a boxed owner first.
            ctx.process.set(s.out, Value::void()).map_err(|e| e.at(at))?;
            Ok(next)
        }
        Opcode::Frame => {
            let s = S::decode(word);
            let count = s.out.index as usize;
            ctx.process.staged_arguments = Some(RegisterFile::new(count));
            Ok(next)
        }
        Opcode::String => {
            let s = S::decode(word);
            let bytes = fetch_object_bytes(ctx, s.out, at, "string")?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            ctx.process.set(s.out, Value::boxed(Box::new(Str(text))))?;
            Ok(next)
        }
        Opcode::Atom => {
            let s = S::decode(word);
            let bytes = fetch_object_bytes(ctx, s.out, at, "atom")?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            ctx.process.set(s.out, Value::boxed(Box::new(Atom(text))))?;
            Ok(next)
        }

        // ========== F format: long-literal carriers ==========
        Opcode::Lliu => {
            let f = F::decode(word);
            ctx.process
                .set(f.out, Value::unsigned((f.immediate as u64) << 32))?;
            Ok(next)
        }
        Opcode::Llil => {
            let f = F::decode(word);
            let (_, upper) = ctx.process.tagged(f.out).map_err(|e| e.at(at))?;
            ctx.process
                .set(f.out, Value::unsigned(upper | f.immediate as u64))?;
            Ok(next)
        }

        // ========== E format ==========
        Opcode::Lui => {
            let e = E::decode(word);
            ctx.process
                .set(e.out, Value::signed((e.immediate << 28) as i64))?;
            Ok(next)
        }
        Opcode::Luiu => {
            let e = E::decode(word);
            ctx.process.set(e.out, Value::unsigned(e.immediate << 28))?;
            Ok(next)
        }

        // ========== R format ==========
        Opcode::Addi
        | Opcode::Subi
        | Opcode::Muli
        | Opcode::Divi
        | Opcode::Addiu
        | Opcode::Subiu
        | Opcode::Muliu
        | Opcode::Diviu => {
            let r = R::decode(word);
            let (_, base) = ctx.process.tagged(r.input).map_err(|e| e.at(at))?;
            let value = match opcode {
                Opcode::Addi | Opcode::Subi | Opcode::Muli | Opcode::Divi => {
                    let imm = encoding::sign_extend_24(r.immediate);
                    let base = base as i64;
                    let result = match opcode {
                        Opcode::Addi => base.wrapping_add(imm),
                        Opcode::Subi => base.wrapping_sub(imm),
                        Opcode::Muli => base.wrapping_mul(imm),
                        Opcode::Divi => {
                            if imm == 0 {
                                return Err(RuntimeError::DivisionByZero { offset: at });
                            }
                            base.wrapping_div(imm)
                        }
                        _ => unreachable!(),
                    };
                    Value::signed(result)
                }
                _ => {
                    let imm = r.immediate as u64;
                    let result = match opcode {
                        Opcode::Addiu => base.wrapping_add(imm),
                        Opcode::Subiu => base.wrapping_sub(imm),
                        Opcode::Muliu => base.wrapping_mul(imm),
                        Opcode::Diviu => {
                            if imm == 0 {
                                return Err(RuntimeError::DivisionByZero { offset: at });
                            }
                            base / imm
                        }
                        _ => unreachable!(),
                    };
                    Value::unsigned(result)
                }
            };
            ctx.process.set(r.out, value)?;
            Ok(next)
        }
    }
}

fn execute_call(
    ctx: &mut ExecutionContext,
    d: D,
    ip: u64,
    at: u64,
) -> Result<Option<u64>> {
    let (tag, index) = ctx.process.tagged(d.input).map_err(|e| e.at(at))?;
    if tag != Tag::Unsigned {
        return Err(RuntimeError::InvalidOperand {
            offset: at,
            detail: "call target must be an unsigned symbol index".to_string(),
        });
    }

    let symbol = ctx
        .program
        .symbols
        .get(index as usize)
        .ok_or(RuntimeError::UnknownSymbol { index, offset: at })?;
    if !symbol.is_function() {
        return Err(RuntimeError::InvalidOperand {
            offset: at,
            detail: format!("symbol {} is not a function", index),
        });
    }

    let target_bytes = symbol.value;
    if target_bytes % WORD_SIZE as u64 != 0 {
        return Err(RuntimeError::UnalignedOffset {
            offset: target_bytes,
        });
    }
    let target = target_bytes / WORD_SIZE as u64;
    if target as usize >= ctx.program.text.len() {
        return Err(RuntimeError::JumpOutOfText {
            target: target_bytes,
        });
    }

    if ctx.process.frames.len() >= MAX_FRAME_DEPTH {
        return Err(RuntimeError::StackOverflow {
            depth: MAX_FRAME_DEPTH,
        });
    }

    let parameters = ctx
        .process
        .staged_arguments
        .take()
        .unwrap_or_else(|| RegisterFile::new(0));
    let stack_break = ctx.process.stack_break;
    ctx.process.frames.push(Frame::new(
        parameters,
        Some(ip + 1),
        d.out,
        stack_break,
    ));

    Ok(Some(target))
}

fn execute_return(ctx: &mut ExecutionContext, s: S) -> Result<Option<u64>> {
    let value = if s.out.is_void() {
        Value::void()
    } else {
        std::mem::take(ctx.process.slot_mut(s.out)?)
    };

    let finished = ctx
        .process
        .frames
        .pop()
        .expect("a process always has a frame");
    if ctx.process.frames.is_empty() {
        // The entry function returned: restore the invariant and halt.
        ctx.process.frames.push(finished);
        return Ok(None);
    }

    if !finished.result.is_void() {
        ctx.process.set(finished.result, value)?;
    }
    Ok(finished.return_address)
}

/// Resolve the symbol index held in a register into its `.rodata`
/// bytes; used by STRING and ATOM.
fn fetch_object_bytes(
    ctx: &mut ExecutionContext,
    access: RegisterAccess,
    at: u64,
    mnemonic: &str,
) -> Result<Vec<u8>> {
    let (tag, index) = ctx.process.tagged(access).map_err(|e| e.at(at))?;
    if tag != Tag::Unsigned {
        return Err(RuntimeError::InvalidOperand {
            offset: at,
            detail: format!("invalid operand type for {} instruction", mnemonic),
        });
    }
    let symbol = ctx
        .program
        .symbols
        .get(index as usize)
        .ok_or(RuntimeError::UnknownSymbol { index, offset: at })?;
    let start = symbol.value as usize;
    let end = start + symbol.size as usize;
    ctx.program
        .rodata
        .get(start..end)
        .map(|bytes| bytes.to_vec())
        .ok_or_else(|| RuntimeError::InvalidOperand {
            offset: at,
            detail: format!(
                "symbol {} spans bytes {}..{} outside of rodata",
                index, start, end
            ),
        })
}

fn dump_registers(ctx: &mut ExecutionContext) {
    let frame = ctx.process.frame();
    let mut lines = Vec::new();
    for (index, value) in frame.registers.iter() {
        if value.is_void() {
            continue;
        }
        lines.push(format!("[{:3}] {}", index, value.string_repr()));
    }
    for (index, value) in frame.parameters.iter() {
        if value.is_void() {
            continue;
        }
        lines.push(format!("[p{:2}] {}", index, value.string_repr()));
    }
    for line in lines {
        ctx.trace.line(&line);
    }
}

/// Render a word the way it would look in assembly source; used for the
/// per-instruction trace.
pub fn render_instruction(word: Word) -> String {
    let Some(opcode) = Opcode::from_word(word) else {
        return format!(".word {:#018x}", word);
    };
    let prefix = if encoding::is_greedy(word) { "g." } else { "" };
    let mnemonic = format!("{}{}", prefix, opcode.mnemonic());
    match opcode.format() {
        Format::N => mnemonic,
        Format::S => {
            let s = S::decode(word);
            format!("{} {}", mnemonic, s.out)
        }
        Format::D => {
            let d = D::decode(word);
            format!("{} {}, {}", mnemonic, d.out, d.input)
        }
        Format::T => {
            let t = T::decode(word);
            format!("{} {}, {}, {}", mnemonic, t.out, t.lhs, t.rhs)
        }
        Format::F => {
            let f = F::decode(word);
            format!("{} {}, {:#010x}", mnemonic, f.out, f.immediate)
        }
        Format::E => {
            let e = E::decode(word);
            format!("{} {}, {}", mnemonic, e.out, e.immediate)
        }
        Format::R => {
            let r = R::decode(word);
            format!("{} {}, {}, {}", mnemonic, r.out, r.input, r.immediate)
        }
    }
}

impl RuntimeError {
    /// Attach the faulting byte offset to state-level errors that could
    /// not know it.
    fn at(self, offset: u64) -> RuntimeError {
        match self {
            RuntimeError::InvalidOperand { detail, offset: 0 } => {
                RuntimeError::InvalidOperand { offset, detail }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use viua_arch::N;

    fn empty_program() -> LoadedProgram {
        LoadedProgram {
            text: vec![0],
            rodata: Vec::new(),
            entry: 0,
            functions: BTreeMap::new(),
            symbols: Vec::new(),
            module: "test".to_string(),
        }
    }

    fn run_one(process: &mut Process, word: Word) -> Result<Option<u64>> {
        let program = empty_program();
        let mut trace = TraceStream::off();
        let mut ctx = ExecutionContext {
            process,
            program: &program,
            trace: &mut trace,
        };
        execute_word(&mut ctx, word, 0)
    }

    #[test]
    fn addi_from_void_loads_the_immediate() {
        let mut process = Process::new();
        let word = R {
            opcode: Opcode::Addi.to_u16(),
            out: RegisterAccess::local(1),
            input: RegisterAccess::void(),
            immediate: 42,
        }
        .encode();
        assert_eq!(run_one(&mut process, word).unwrap(), Some(1));
        assert_eq!(
            process.tagged(RegisterAccess::local(1)).unwrap(),
            (Tag::Signed, 42)
        );
    }

    #[test]
    fn lui_shifts_by_28() {
        let mut process = Process::new();
        let word = E {
            opcode: Opcode::Luiu.to_u16(),
            out: RegisterAccess::local(1),
            immediate: 0xdeadbeefd,
        }
        .encode();
        run_one(&mut process, word).unwrap();
        assert_eq!(
            process.tagged(RegisterAccess::local(1)).unwrap(),
            (Tag::Unsigned, 0xdeadbeefd << 28)
        );
    }

    #[test]
    fn add_propagates_the_lhs_tag() {
        let mut process = Process::new();
        process.set(RegisterAccess::local(1), Value::signed(-2)).unwrap();
        process.set(RegisterAccess::local(2), Value::unsigned(3)).unwrap();
        let word = T {
            opcode: Opcode::Add.to_u16(),
            out: RegisterAccess::local(3),
            lhs: RegisterAccess::local(1),
            rhs: RegisterAccess::local(2),
        }
        .encode();
        run_one(&mut process, word).unwrap();
        assert_eq!(
            process.tagged(RegisterAccess::local(3)).unwrap(),
            (Tag::Signed, 1)
        );
    }

    #[test]
    fn div_by_zero_aborts_with_the_offset() {
        let mut process = Process::new();
        process.set(RegisterAccess::local(1), Value::unsigned(9)).unwrap();
        process.set(RegisterAccess::local(2), Value::unsigned(0)).unwrap();
        let word = T {
            opcode: Opcode::Div.to_u16(),
            out: RegisterAccess::local(3),
            lhs: RegisterAccess::local(1),
            rhs: RegisterAccess::local(2),
        }
        .encode();
        assert!(matches!(
            run_one(&mut process, word),
            Err(RuntimeError::DivisionByZero { offset: 0 })
        ));
    }

    #[test]
    fn delete_resets_to_void() {
        let mut process = Process::new();
        process
            .set(
                RegisterAccess::local(2),
                Value::boxed(Box::new(Str("gone".into()))),
            )
            .unwrap();
        let word = S {
            opcode: Opcode::Delete.to_u16(),
            out: RegisterAccess::local(2),
        }
        .encode();
        run_one(&mut process, word).unwrap();
        assert!(process.frame().registers.get(2).unwrap().is_void());
    }

    #[test]
    fn halt_returns_the_sentinel() {
        let mut process = Process::new();
        let word = N {
            opcode: Opcode::Halt.to_u16(),
        }
        .encode();
        assert_eq!(run_one(&mut process, word).unwrap(), None);
    }

    #[test]
    fn carrier_pair_builds_a_long_literal() {
        let mut process = Process::new();
        let out = RegisterAccess::local(1);
        let hi = F {
            opcode: Opcode::Lliu.to_u16(),
            out,
            immediate: 0xdead_beef,
        }
        .encode();
        let lo = F {
            opcode: Opcode::Llil.to_u16(),
            out,
            immediate: 0xd0ad_beef,
        }
        .encode();
        run_one(&mut process, hi).unwrap();
        run_one(&mut process, lo).unwrap();
        assert_eq!(
            process.tagged(out).unwrap(),
            (Tag::Unsigned, 0xdead_beef_d0ad_beef)
        );
    }

    #[test]
    fn aa_requires_an_unsigned_size() {
        let mut process = Process::new();
        process.set(RegisterAccess::local(1), Value::signed(8)).unwrap();
        let word = D {
            opcode: Opcode::Aa.to_u16(),
            out: RegisterAccess::local(2),
            input: RegisterAccess::local(1),
        }
        .encode();
        let err = run_one(&mut process, word).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidOperand { .. }));
        assert!(err.to_string().contains("aa instruction"));
    }

    #[test]
    fn aa_advances_the_stack_break() {
        let mut process = Process::new();
        process.set(RegisterAccess::local(1), Value::unsigned(64)).unwrap();
        let word = D {
            opcode: Opcode::Aa.to_u16(),
            out: RegisterAccess::local(2),
            input: RegisterAccess::local(1),
        }
        .encode();
        run_one(&mut process, word).unwrap();
        assert_eq!(
            process.tagged(RegisterAccess::local(2)).unwrap(),
            (Tag::Unsigned, 0)
        );
        assert_eq!(process.stack_break, 64);
        assert_eq!(process.frame().saved_break, 64);
        assert_eq!(process.pointers, vec![0]);

        run_one(&mut process, word).unwrap();
        assert_eq!(process.stack_break, 128);
        assert_eq!(
            process.tagged(RegisterAccess::local(2)).unwrap(),
            (Tag::Unsigned, 64)
        );
    }

    #[test]
    fn frame_stages_an_argument_file() {
        let mut process = Process::new();
        let word = S {
            opcode: Opcode::Frame.to_u16(),
            out: RegisterAccess::local(3),
        }
        .encode();
        run_one(&mut process, word).unwrap();
        assert_eq!(process.staged_arguments.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn ebreak_dumps_non_void_registers() {
        let program = empty_program();
        let (mut trace, buffer) = TraceStream::buffer();
        let mut process = Process::new();
        process.set(RegisterAccess::local(1), Value::signed(42)).unwrap();
        let mut ctx = ExecutionContext {
            process: &mut process,
            program: &program,
            trace: &mut trace,
        };
        let word = N {
            opcode: Opcode::Ebreak.to_u16(),
        }
        .encode();
        execute_word(&mut ctx, word, 0).unwrap();
        let output = buffer.borrow();
        assert!(output.contains("[  1] is"));
        assert!(output.contains("42"));
    }

    #[test]
    fn invalid_word_is_a_decode_error() {
        let mut process = Process::new();
        let err = run_one(&mut process, 0x7fff).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidInstruction { .. }));
    }

    #[test]
    fn rendering_matches_source_syntax() {
        let add = T {
            opcode: Opcode::Add.to_u16(),
            out: RegisterAccess::local(1),
            lhs: RegisterAccess::local(2),
            rhs: RegisterAccess::local(3),
        }
        .encode();
        assert_eq!(render_instruction(add), "add $1, $2, $3");

        let greedy_addi = R {
            opcode: viua_arch::GREEDY | Opcode::Addiu.to_u16(),
            out: RegisterAccess::local(1),
            input: RegisterAccess::void(),
            immediate: 42,
        }
        .encode();
        assert_eq!(render_instruction(greedy_addi), "g.addiu $1, void, 42");
    }
}
