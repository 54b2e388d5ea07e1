//! # Viua virtual machine
//!
//! Loads object images produced by the assembler and executes them in a
//! register-based interpreter with cooperative preemption.

pub mod error;
pub mod execute;
pub mod loader;
pub mod state;
pub mod trace;
pub mod vm;

pub use error::{HaltReason, RuntimeError};
pub use execute::render_instruction;
pub use loader::LoadedProgram;
pub use state::{Frame, Process, RegisterFile, MAX_FRAME_DEPTH};
pub use trace::TraceStream;
pub use vm::{run, ExecutionResult, Vm, VmConfig, PREEMPTION_THRESHOLD};
