//! # Viua disassembler
//!
//! Decode instruction words back into assembly text, for inspection and
//! for round-trip testing of the toolchain.

pub mod decoder;
pub mod disassembler;
pub mod error;
pub mod formatter;

pub use decoder::{decode, DecodedInstruction, Operands};
pub use disassembler::{disassemble, disassemble_words};
pub use error::{DisassemblerError, Result};
pub use formatter::format;
