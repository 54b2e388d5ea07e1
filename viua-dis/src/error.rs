//! # Disassembler errors

use thiserror::Error;
use viua_arch::ArchError;

#[derive(Debug, Error)]
pub enum DisassemblerError {
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    #[error(transparent)]
    Arch(#[from] ArchError),
}

pub type Result<T> = std::result::Result<T, DisassemblerError>;
