//! # Assembler diagnostics
//!
//! Compile-time errors are values: a cause, a precise source location,
//! and optional notes and related locations. The pipeline returns them;
//! rendering for terminals lives in [`crate::report`].

use thiserror::Error;

/// A position in the source text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Location {
    /// Character offset from the start of the source.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number.
    pub column: usize,
}

impl Location {
    pub fn new(offset: usize, line: usize, column: usize) -> Location {
        Location {
            offset,
            line,
            column,
        }
    }
}

/// What went wrong.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Cause {
    // Lexical
    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unterminated atom literal")]
    UnterminatedAtom,

    #[error("illegal character {0:?}")]
    IllegalCharacter(char),

    #[error("malformed numeric literal {0:?}")]
    MalformedNumber(String),

    // Syntactic
    #[error("unexpected token {got:?}, expected {expected}")]
    UnexpectedToken { got: String, expected: String },

    #[error("unexpected end of input, expected {0}")]
    UnexpectedEnd(String),

    #[error("unknown directive {0:?}")]
    UnknownDirective(String),

    #[error("unknown mnemonic {0:?}")]
    UnknownMnemonic(String),

    #[error("missing operand for {0}")]
    MissingOperand(String),

    // Semantic
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    #[error("invalid register access {0:?}")]
    InvalidRegister(String),

    #[error("immediate does not fit in {width} bits: {value}")]
    ImmediateOutOfRange { value: i128, width: u32 },

    #[error("duplicated entry point")]
    DuplicatedEntryPoint,

    #[error("unknown label {0:?}")]
    UnknownLabel(String),

    #[error("duplicated symbol {0:?}")]
    DuplicatedSymbol(String),

    // I/O
    #[error("empty source file")]
    EmptySource,
}

/// A complete diagnostic: the first error wins and aborts the pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub location: Location,
    pub cause: Cause,
    /// Free-standing remarks appended after the message.
    pub notes: Vec<String>,
    /// Other source positions involved in the error.
    pub related: Vec<(Location, String)>,
}

impl Diagnostic {
    pub fn new(location: Location, cause: Cause) -> Diagnostic {
        Diagnostic {
            location,
            cause,
            notes: Vec::new(),
            related: Vec::new(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Diagnostic {
        self.notes.push(note.into());
        self
    }

    pub fn with_related(mut self, location: Location, remark: impl Into<String>) -> Diagnostic {
        self.related.push((location, remark.into()));
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: error: {}",
            self.location.line, self.location.column, self.cause
        )
    }
}

impl std::error::Error for Diagnostic {}

pub type Result<T> = std::result::Result<T, Diagnostic>;
