//! Virtual-machine command-line frontend.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};

use viua_vm::{HaltReason, LoadedProgram, TraceStream, Vm, VmConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "viua-vm",
    version = VERSION,
    about = "Execute a viua object image"
)]
struct Cli {
    /// Image to execute.
    #[arg(value_name = "IMAGE", default_value = "./a.out")]
    image: PathBuf,

    /// Increase verbosity; repeatable. One level enables the
    /// instruction trace on standard error.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Stop after this many executed instructions.
    #[arg(long = "cycle-limit", value_name = "N")]
    cycle_limit: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let program = match LoadedProgram::from_file(&cli.image) {
        Ok(program) => program,
        Err(error) => {
            eprintln!("{}: error: {}", cli.image.display(), error);
            return ExitCode::FAILURE;
        }
    };

    if cli.verbose > 0 {
        eprintln!(
            "[vm] loaded {} instruction(s) from {}",
            program.text.len(),
            cli.image.display()
        );
        eprintln!("[vm] {} function symbol(s)", program.functions.len());
    }

    let config = VmConfig {
        max_cycles: cli.cycle_limit,
        trace: if cli.verbose > 0 {
            TraceStream::stderr()
        } else {
            TraceStream::off()
        },
        ..VmConfig::default()
    };

    match Vm::new(program, config).run() {
        Ok(result) => {
            if cli.verbose > 0 {
                eprintln!(
                    "[vm] {} cycle(s), {} preemption(s)",
                    result.cycles, result.preemptions
                );
            }
            match result.halt_reason {
                HaltReason::Halted => ExitCode::SUCCESS,
                HaltReason::Cancelled => {
                    eprintln!("[vm] cancelled");
                    ExitCode::FAILURE
                }
                HaltReason::CycleLimit => {
                    eprintln!("[vm] cycle limit reached");
                    ExitCode::FAILURE
                }
            }
        }
        Err(error) => {
            eprintln!("{}: error: {}", cli.image.display(), error);
            ExitCode::FAILURE
        }
    }
}
