//! # Viua assembler
//!
//! Turns textual assembly into a relocatable or executable object image.
//!
//! The pipeline is pure (lexer → parser → stages → image writer) and
//! returns either an [`AssembledModule`] or a [`Diagnostic`]; terminal
//! rendering of diagnostics is a separate presentation layer.

pub mod assembler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod report;
pub mod stages;

pub use assembler::{assemble, AssembledModule};
pub use error::{Cause, Diagnostic, Location};
pub use stages::{from_loading_parts, to_loading_parts_unsigned, LoadingParts};

/// Interpreter name recorded in the images this assembler produces.
pub const INTERPRETER: &str = "viua-vm";
