//! # Diagnostic presentation
//!
//! Renders diagnostics for terminals: `path:line:column: kind: message`
//! with the offending source line and a caret, plus notes and related
//! locations. Color is applied only when asked for (ie, on a TTY).

use std::path::Path;

use crate::error::{Diagnostic, Location};

const RESET: &str = "\x1b[0m";
const BOLD_WHITE: &str = "\x1b[1;37m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

fn paint(text: &str, color: &str, enabled: bool) -> String {
    if enabled {
        format!("{}{}{}", color, text, RESET)
    } else {
        text.to_string()
    }
}

fn source_line(source: &str, line: usize) -> Option<&str> {
    source.lines().nth(line.saturating_sub(1))
}

fn snippet(source: &str, location: Location, color: bool) -> String {
    let Some(line) = source_line(source, location.line) else {
        return String::new();
    };
    let caret_pad = " ".repeat(location.column.saturating_sub(1));
    format!(
        "    {}\n    {}\n",
        line,
        paint(&format!("{}^", caret_pad), RED, color)
    )
}

/// Render one diagnostic against its source text.
pub fn render(path: &Path, source: &str, diagnostic: &Diagnostic, color: bool) -> String {
    let mut out = String::new();

    let position = format!(
        "{}:{}:{}",
        path.display(),
        diagnostic.location.line,
        diagnostic.location.column
    );
    out.push_str(&format!(
        "{}: {}: {}\n",
        paint(&position, BOLD_WHITE, color),
        paint("error", RED, color),
        diagnostic.cause
    ));
    out.push_str(&snippet(source, diagnostic.location, color));

    for (location, remark) in &diagnostic.related {
        let position = format!("{}:{}:{}", path.display(), location.line, location.column);
        out.push_str(&format!(
            "{}: {}: {}\n",
            paint(&position, BOLD_WHITE, color),
            paint("note", CYAN, color),
            remark
        ));
        out.push_str(&snippet(source, *location, color));
    }

    for note in &diagnostic.notes {
        out.push_str(&format!("{}: {}\n", paint("note", CYAN, color), note));
    }

    out
}
