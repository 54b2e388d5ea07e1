//! # Viua toolchain
//!
//! Facade over the workspace crates: the instruction set and object
//! image ([`arch`]), the assembler ([`asm`]), the interpreter ([`vm`]),
//! and the disassembler ([`dis`]).

pub use viua_arch as arch;
pub use viua_asm as asm;
pub use viua_dis as dis;
pub use viua_vm as vm;
