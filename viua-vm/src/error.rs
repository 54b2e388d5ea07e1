//! # Runtime error types

use thiserror::Error;
use viua_arch::ArchError;

/// Why a run ended without an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HaltReason {
    /// A HALT instruction was executed, or the entry function returned.
    Halted,
    /// The cancel flag was observed at a preemption point.
    Cancelled,
    /// The configured cycle limit was reached.
    CycleLimit,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Arch(#[from] ArchError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: image has no entry point and cannot be executed directly")]
    NotExecutable { path: String },

    #[error("entry point at byte {offset} does not name a function symbol")]
    EntryNotFunction { offset: u64 },

    #[error("unaligned text offset {offset:#x}: not on an 8-byte boundary")]
    UnalignedOffset { offset: u64 },

    #[error("decode failed at byte {offset:#x}: {word:#018x} is not an instruction")]
    InvalidInstruction { word: u64, offset: u64 },

    #[error("division by zero at byte {offset:#x}")]
    DivisionByZero { offset: u64 },

    #[error("invalid operand type at byte {offset:#x}: {detail}")]
    InvalidOperand { offset: u64, detail: String },

    #[error("register {index} out of range for a file of {size} slots")]
    RegisterOutOfRange { index: usize, size: usize },

    #[error("no symbol with index {index} at byte {offset:#x}")]
    UnknownSymbol { index: u64, offset: u64 },

    #[error("stack overflow: frame depth exceeded {depth}")]
    StackOverflow { depth: usize },

    #[error("jump target {target:#x} is outside the text section")]
    JumpOutOfText { target: u64 },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
