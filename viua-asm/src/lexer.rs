//! # Lexer for viua assembly
//!
//! Produces a finite sequence of tokens, each carrying its source
//! location and raw text. String escapes are not processed here; the
//! value-label stage does that. Comments, whitespace, and newlines are
//! emitted as tokens and dropped by the noise-removal pass.

use std::fmt;

use viua_arch::Opcode;

use crate::error::{Cause, Diagnostic, Location, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// An instruction mnemonic (including the `li` pseudo-instruction).
    Opcode,
    /// A name: function, label, attribute, atom value.
    Identifier,
    /// Decimal or hexadecimal integer, possibly negative.
    LiteralInteger,
    /// Floating-point literal.
    LiteralFloat,
    /// Double-quoted string, escapes unprocessed, quotes included.
    LiteralString,
    /// Single-quoted atom, quotes included.
    LiteralAtom,
    /// `$N`, `$N.a`, `$N.p`, `*N`, or `void`.
    Register,
    Comma,
    /// The pointer-dereference token, also string repetition.
    Star,
    /// `[[`
    AttrOpen,
    /// `]]`
    AttrClose,
    /// `.function:`, `.string:`, `.atom:`, `.end`, ...
    Directive,
    Comment,
    Whitespace,
    Newline,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: Location,
    pub text: String,
}

impl Token {
    pub fn is_noise(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Comment | TokenKind::Whitespace | TokenKind::Newline
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[derive(Debug)]
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Lexer {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn location(&self) -> Location {
        Location::new(self.pos, self.line, self.column)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, location: Location, cause: Cause) -> Diagnostic {
        Diagnostic::new(location, cause)
    }

    fn token(&self, kind: TokenKind, location: Location, text: String) -> Token {
        Token {
            kind,
            location,
            text,
        }
    }

    fn read_while(&mut self, predicate: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(ch) = self.current() {
            if !predicate(ch) {
                break;
            }
            text.push(ch);
            self.advance();
        }
        text
    }

    fn read_identifier(&mut self) -> String {
        self.read_while(|ch| ch.is_alphanumeric() || ch == '_')
    }

    fn read_comment(&mut self, location: Location) -> Token {
        let text = self.read_while(|ch| ch != '\n');
        self.token(TokenKind::Comment, location, text)
    }

    fn read_string(&mut self, location: Location) -> Result<Token> {
        let mut text = String::new();
        text.push(self.advance().unwrap_or('"'));
        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(self.error(location, Cause::UnterminatedString));
                }
                Some('\\') => {
                    text.push(self.advance().unwrap_or('\\'));
                    if let Some(escaped) = self.advance() {
                        text.push(escaped);
                    }
                }
                Some('"') => {
                    text.push(self.advance().unwrap_or('"'));
                    return Ok(self.token(TokenKind::LiteralString, location, text));
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_atom(&mut self, location: Location) -> Result<Token> {
        let mut text = String::new();
        text.push(self.advance().unwrap_or('\''));
        loop {
            match self.current() {
                None | Some('\n') => {
                    return Err(self.error(location, Cause::UnterminatedAtom));
                }
                Some('\'') => {
                    text.push(self.advance().unwrap_or('\''));
                    return Ok(self.token(TokenKind::LiteralAtom, location, text));
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self, location: Location) -> Result<Token> {
        let mut text = String::new();
        if self.current() == Some('-') {
            text.push('-');
            self.advance();
        }

        if self.current() == Some('0') && matches!(self.peek(1), Some('x') | Some('X')) {
            text.push(self.advance().unwrap_or('0'));
            text.push(self.advance().unwrap_or('x'));
            let digits = self.read_while(|ch| ch.is_ascii_hexdigit());
            if digits.is_empty() {
                return Err(self.error(location, Cause::MalformedNumber(text)));
            }
            text.push_str(&digits);
            return Ok(self.token(TokenKind::LiteralInteger, location, text));
        }

        let digits = self.read_while(|ch| ch.is_ascii_digit());
        if digits.is_empty() {
            return Err(self.error(location, Cause::MalformedNumber(text)));
        }
        text.push_str(&digits);

        if self.current() == Some('.') && self.peek(1).is_some_and(|ch| ch.is_ascii_digit()) {
            text.push(self.advance().unwrap_or('.'));
            text.push_str(&self.read_while(|ch| ch.is_ascii_digit()));
            return Ok(self.token(TokenKind::LiteralFloat, location, text));
        }

        // A number running straight into letters is a malformed literal,
        // not two tokens.
        if self.current().is_some_and(|ch| ch.is_alphanumeric() || ch == '_') {
            let tail = self.read_identifier();
            return Err(self.error(location, Cause::MalformedNumber(format!("{}{}", text, tail))));
        }

        Ok(self.token(TokenKind::LiteralInteger, location, text))
    }

    fn read_register(&mut self, location: Location) -> Result<Token> {
        let mut text = String::new();
        text.push(self.advance().unwrap_or('$'));
        let digits = self.read_while(|ch| ch.is_ascii_digit());
        if digits.is_empty() {
            return Err(self.error(location, Cause::InvalidRegister(text)));
        }
        text.push_str(&digits);
        if self.current() == Some('.') && matches!(self.peek(1), Some('a') | Some('p') | Some('l'))
        {
            text.push(self.advance().unwrap_or('.'));
            text.push(self.advance().unwrap_or('l'));
        }
        Ok(self.token(TokenKind::Register, location, text))
    }

    fn read_directive(&mut self, location: Location) -> Result<Token> {
        let mut text = String::new();
        text.push(self.advance().unwrap_or('.'));
        if !self.current().is_some_and(|ch| ch.is_ascii_alphabetic()) {
            return Err(self.error(location, Cause::IllegalCharacter('.')));
        }
        text.push_str(&self.read_identifier());
        if self.current() == Some(':') {
            text.push(self.advance().unwrap_or(':'));
        }
        Ok(self.token(TokenKind::Directive, location, text))
    }

    pub fn next_token(&mut self) -> Result<Option<Token>> {
        let location = self.location();
        let ch = match self.current() {
            Some(ch) => ch,
            None => return Ok(None),
        };

        let token = match ch {
            '\n' => {
                self.advance();
                self.token(TokenKind::Newline, location, "\n".to_string())
            }
            ' ' | '\t' | '\r' => {
                let text = self.read_while(|ch| ch == ' ' || ch == '\t' || ch == '\r');
                self.token(TokenKind::Whitespace, location, text)
            }
            ';' | '#' => self.read_comment(location),
            ',' => {
                self.advance();
                self.token(TokenKind::Comma, location, ",".to_string())
            }
            '"' => self.read_string(location)?,
            '\'' => self.read_atom(location)?,
            '[' => {
                if self.peek(1) == Some('[') {
                    self.advance();
                    self.advance();
                    self.token(TokenKind::AttrOpen, location, "[[".to_string())
                } else {
                    return Err(self.error(location, Cause::IllegalCharacter('[')));
                }
            }
            ']' => {
                if self.peek(1) == Some(']') {
                    self.advance();
                    self.advance();
                    self.token(TokenKind::AttrClose, location, "]]".to_string())
                } else {
                    return Err(self.error(location, Cause::IllegalCharacter(']')));
                }
            }
            '*' => {
                if self.peek(1).is_some_and(|ch| ch.is_ascii_digit()) {
                    self.read_register(location)?
                } else {
                    self.advance();
                    self.token(TokenKind::Star, location, "*".to_string())
                }
            }
            '$' => self.read_register(location)?,
            '.' => self.read_directive(location)?,
            '-' => {
                if self.peek(1).is_some_and(|ch| ch.is_ascii_digit()) {
                    self.read_number(location)?
                } else {
                    return Err(self.error(location, Cause::IllegalCharacter('-')));
                }
            }
            ch if ch.is_ascii_digit() => self.read_number(location)?,
            ch if ch.is_ascii_alphabetic() || ch == '_' => {
                let text = self.read_identifier();
                let kind = if text == "void" {
                    TokenKind::Register
                } else if text == "li" || Opcode::from_mnemonic(&text).is_some() {
                    TokenKind::Opcode
                } else {
                    TokenKind::Identifier
                };
                self.token(kind, location, text)
            }
            other => return Err(self.error(location, Cause::IllegalCharacter(other))),
        };

        Ok(Some(token))
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

/// Lex a whole source file.
pub fn lexical_analysis(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).tokenize()
}

/// Drop comments, whitespace, and newlines.
pub fn remove_noise(tokens: Vec<Token>) -> Vec<Token> {
    tokens.into_iter().filter(|token| !token.is_noise()).collect()
}
