//! # Dispatch loop
//!
//! A tight fetch/decode/dispatch loop with cooperative preemption. The
//! loop grants each scheduler turn a small number of dispatch slots;
//! greedy bundles run to completion even when they cross the threshold,
//! with the extra instructions charged against the turn afterwards.
//! Cancellation is cooperative: a shared flag checked at the top of
//! every turn ends the run cleanly at the next preemption point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use viua_arch::encoding::is_greedy;
use viua_arch::WORD_SIZE;

use crate::error::{HaltReason, Result, RuntimeError};
use crate::execute::{execute_word, ExecutionContext};
use crate::loader::LoadedProgram;
use crate::state::Process;
use crate::trace::TraceStream;

/// Dispatch slots per scheduler turn.
pub const PREEMPTION_THRESHOLD: usize = 2;

/// Interpreter configuration, threaded through explicitly.
pub struct VmConfig {
    /// Dispatch slots per scheduler turn.
    pub preemption_threshold: usize,
    /// Hard cap on executed instructions; `None` means unlimited.
    pub max_cycles: Option<u64>,
    /// Cooperative cancellation flag.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Where the instruction trace goes.
    pub trace: TraceStream,
}

impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            preemption_threshold: PREEMPTION_THRESHOLD,
            max_cycles: None,
            cancel: None,
            trace: TraceStream::off(),
        }
    }
}

/// Result of a finished run.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Instructions executed.
    pub cycles: u64,
    /// Preemption points that were actually taken.
    pub preemptions: u64,
    pub halt_reason: HaltReason,
    /// Final process state, for inspection.
    pub process: Process,
}

/// One interpreter instance executing one process.
pub struct Vm {
    program: LoadedProgram,
    process: Process,
    config: VmConfig,
    cycles: u64,
    preemptions: u64,
}

impl Vm {
    pub fn new(program: LoadedProgram, config: VmConfig) -> Vm {
        Vm {
            program,
            process: Process::new(),
            config,
            cycles: 0,
            preemptions: 0,
        }
    }

    fn cancelled(&self) -> bool {
        self.config
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Execute one instruction, then keep going while the executed word
    /// carries the greedy bit. Returns the next instruction pointer
    /// (`None` for halt) and the number of instructions that ran.
    fn run_bundle(&mut self, mut ip: u64) -> Result<(Option<u64>, usize)> {
        let mut executed = 0;
        loop {
            let word = *self
                .program
                .text
                .get(ip as usize)
                .ok_or(RuntimeError::JumpOutOfText {
                    target: ip * WORD_SIZE as u64,
                })?;

            let mut ctx = ExecutionContext {
                process: &mut self.process,
                program: &self.program,
                trace: &mut self.config.trace,
            };
            let next = execute_word(&mut ctx, word, ip)?;
            executed += 1;
            self.cycles += 1;

            match next {
                None => return Ok((None, executed)),
                Some(next_ip) => {
                    if !is_greedy(word) {
                        return Ok((Some(next_ip), executed));
                    }
                    ip = next_ip;
                }
            }
        }
    }

    /// Run to completion.
    pub fn run(mut self) -> Result<ExecutionResult> {
        let end = self.program.text.len() as u64;
        let threshold = self.config.preemption_threshold.max(1);
        let mut ip = self.program.entry;
        let mut halt_reason = HaltReason::Halted;

        while ip != end {
            if self.cancelled() {
                halt_reason = HaltReason::Cancelled;
                break;
            }
            if let Some(limit) = self.config.max_cycles {
                if self.cycles >= limit {
                    halt_reason = HaltReason::CycleLimit;
                    break;
                }
            }

            if self.config.trace.enabled() {
                let line = format!(
                    "cycle at {}[.text]+{:#010x}",
                    self.program.module,
                    ip * WORD_SIZE as u64
                );
                self.config.trace.line(&line);
            }

            let turn_start_cycles = self.cycles;
            let mut slot = 0;
            while slot < threshold && ip != end {
                // Greedy bundles are detected here so the preemption
                // counter can be adjusted: a bundle longer than the
                // remaining slots finishes anyway and the turn ends
                // right after it.
                let (next, executed) = self.run_bundle(ip)?;
                match next {
                    None => {
                        ip = end;
                    }
                    Some(next_ip) => {
                        ip = next_ip;
                        slot += executed - 1;
                    }
                }
                slot += 1;
            }

            if ip == end {
                self.config.trace.line("halted");
                break;
            }
            self.preemptions += 1;
            if self.config.trace.enabled() {
                let line = format!(
                    "preempted after {} op(s)",
                    self.cycles - turn_start_cycles
                );
                self.config.trace.line(&line);
            }
        }

        Ok(ExecutionResult {
            cycles: self.cycles,
            preemptions: self.preemptions,
            halt_reason,
            process: self.process,
        })
    }
}

/// Run a loaded program with default configuration.
pub fn run(program: LoadedProgram) -> Result<ExecutionResult> {
    Vm::new(program, VmConfig::default()).run()
}
