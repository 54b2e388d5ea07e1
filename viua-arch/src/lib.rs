//! # Viua instruction set architecture
//!
//! 64-bit register-based instruction set shared by the assembler and the
//! virtual machine.
//!
//! ## Key features
//! - Fixed-width 64-bit instruction words, seven operand formats
//! - 16-bit opcode word with a format tag and a greedy (no-preempt) bit
//! - 256-slot register files addressed through compact register accesses
//! - Tagged unboxed values plus opaque boxed values
//! - An ELF-shaped object-image container for assembled modules

pub mod encoding;
pub mod error;
pub mod image;
pub mod instruction;
pub mod opcode;
pub mod register;
pub mod value;

pub use encoding::{Format, FORMAT_MASK, GREEDY, OPCODE_MASK};
pub use error::ArchError;
pub use image::{Image, ImageParams, RelocKind, Relocation, Symbol};
pub use instruction::{D, E, F, N, R, S, T};
pub use opcode::{Opcode, OpcodeFamily, OPCODES};
pub use register::{RegisterAccess, RegisterSet};
pub use value::{BoxedObject, BoxedValue, Tag, Value};

/// A single encoded instruction.
pub type Word = u64;

/// The 16-bit opcode word (format tag, greedy bit, ordinal).
pub type OpcodeWord = u16;

/// Number of slots in a register file.
pub const REGISTER_COUNT: usize = 256;

/// Size of one instruction word in bytes.
pub const WORD_SIZE: usize = 8;
