//! # Trace stream
//!
//! The textual log of dispatched instructions, cycle starts, preemption
//! points, and EBREAK register dumps. The stream is explicit
//! configuration threaded through the interpreter instead of a global;
//! tests capture it in memory, the CLI points it at stderr.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

enum Sink {
    Off,
    Stderr,
    Buffer(Rc<RefCell<String>>),
}

/// Destination of the interpreter's trace output.
pub struct TraceStream {
    sink: Sink,
}

impl TraceStream {
    /// Discard all trace output.
    pub fn off() -> TraceStream {
        TraceStream { sink: Sink::Off }
    }

    /// Log to standard error.
    pub fn stderr() -> TraceStream {
        TraceStream { sink: Sink::Stderr }
    }

    /// Collect into a shared in-memory buffer.
    pub fn buffer() -> (TraceStream, Rc<RefCell<String>>) {
        let buffer = Rc::new(RefCell::new(String::new()));
        (
            TraceStream {
                sink: Sink::Buffer(Rc::clone(&buffer)),
            },
            buffer,
        )
    }

    pub fn enabled(&self) -> bool {
        !matches!(self.sink, Sink::Off)
    }

    /// Emit one line. Trace output is best-effort: write failures are
    /// swallowed.
    pub fn line(&mut self, text: &str) {
        match &self.sink {
            Sink::Off => {}
            Sink::Stderr => {
                let _ = writeln!(std::io::stderr(), "{}", text);
            }
            Sink::Buffer(buffer) => {
                let mut buffer = buffer.borrow_mut();
                buffer.push_str(text);
                buffer.push('\n');
            }
        }
    }
}

impl Default for TraceStream {
    fn default() -> TraceStream {
        TraceStream::off()
    }
}
