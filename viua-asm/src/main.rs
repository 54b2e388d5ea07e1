//! Assembler command-line frontend.

use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};

use viua_asm::{assemble, report, INTERPRETER};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "viua-asm",
    version = VERSION,
    about = "Assemble viua source into an object image",
    long_about = "Assemble viua source into an object image.\n\n\
        The produced binary is executable when the source marks exactly one\n\
        function with [[entry_point]], and relocatable otherwise."
)]
struct Cli {
    /// Source file to assemble.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// Output path; defaults to the source path with a .o extension.
    #[arg(short = 'o', value_name = "PATH")]
    output: Option<PathBuf>,

    /// Increase verbosity; repeatable.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn fail(path: &PathBuf, message: impl std::fmt::Display) -> ExitCode {
    eprintln!("{}: error: {}", path.display(), message);
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.source) {
        Ok(source) => source,
        Err(error) => return fail(&cli.source, error),
    };

    let module = match assemble(&source, &cli.source) {
        Ok(module) => module,
        Err(diagnostic) => {
            let color = std::io::stderr().is_terminal();
            eprint!(
                "{}",
                report::render(&cli.source, &source, &diagnostic, color)
            );
            return ExitCode::FAILURE;
        }
    };

    let output = cli
        .output
        .unwrap_or_else(|| cli.source.with_extension("o"));

    let comment = format!("viua-asm {}", VERSION);
    let bytes = module.to_image_bytes(INTERPRETER, &comment);
    if let Err(error) = fs::write(&output, &bytes) {
        return fail(&output, error);
    }

    if cli.verbose > 0 {
        eprintln!(
            "{}: {} instruction(s), {} symbol(s), {} relocation(s), {} byte(s) of rodata",
            output.display(),
            module.text.len(),
            module.symbols.len(),
            module.relocations.len(),
            module.rodata.len(),
        );
    }
    if cli.verbose > 1 {
        for (offset, relocation) in module.relocations.iter().enumerate() {
            eprintln!("  rel {:2}: {:?}", offset, relocation);
        }
    }

    ExitCode::SUCCESS
}
