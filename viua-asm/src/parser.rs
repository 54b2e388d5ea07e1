//! # Parser for viua assembly
//!
//! Builds an AST of top-level nodes out of the noise-free token stream:
//! function definitions (name, attributes, instructions), label
//! definitions (name, type, value tokens, attributes). Each instruction
//! node records its operands and its physical index within the function.

use viua_arch::{RegisterAccess, RegisterSet};

use crate::error::{Cause, Diagnostic, Location, Result};
use crate::lexer::{Token, TokenKind};

/// A `[[ ... ]]` attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub token: Token,
}

/// One operand of an instruction node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Register { access: RegisterAccess, token: Token },
    Immediate { value: i128, token: Token },
    Label { token: Token },
}

impl Operand {
    pub fn location(&self) -> Location {
        match self {
            Operand::Register { token, .. }
            | Operand::Immediate { token, .. }
            | Operand::Label { token } => token.location,
        }
    }
}

/// A single instruction inside a function body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsnNode {
    pub mnemonic: Token,
    pub operands: Vec<Operand>,
    /// Index of the source instruction this node came from; expansion
    /// products share the index of the pseudo-instruction they replace.
    pub physical_index: usize,
    /// Set on expansion products that must not be preempted away from
    /// their successor.
    pub greedy: bool,
}

/// A function definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FnDef {
    pub name: Token,
    pub attributes: Vec<Attribute>,
    pub instructions: Vec<InsnNode>,
    pub start: Location,
    pub end: Location,
}

impl FnDef {
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

/// The kind of a value label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelKind {
    Str,
    Atom,
}

/// A value-label definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelDef {
    pub name: Token,
    pub kind: LabelKind,
    /// Raw value tokens; interpreted by the value-label stage.
    pub value: Vec<Token>,
    pub attributes: Vec<Attribute>,
}

impl LabelDef {
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr.name == name)
    }
}

/// A top-level node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Function(FnDef),
    Label(LabelDef),
}

/// Parse a noise-free token stream into top-level nodes.
pub fn parse(tokens: &[Token]) -> Result<Vec<Node>> {
    Parser { tokens, pos: 0 }.parse_program()
}

/// Turn a register token's text into a register access.
pub fn parse_register_access(token: &Token) -> Result<RegisterAccess> {
    let text = token.text.as_str();
    if text == "void" {
        return Ok(RegisterAccess::void());
    }

    let invalid = || {
        Diagnostic::new(
            token.location,
            Cause::InvalidRegister(token.text.clone()),
        )
    };

    let mut chars = text.chars();
    let sigil = chars.next().ok_or_else(invalid)?;
    let direct = match sigil {
        '$' => true,
        '*' => false,
        _ => return Err(invalid()),
    };

    let rest = &text[1..];
    let (digits, set) = match rest.split_once('.') {
        None => (rest, RegisterSet::Local),
        Some((digits, "l")) => (digits, RegisterSet::Local),
        Some((digits, "a")) => (digits, RegisterSet::Argument),
        Some((digits, "p")) => (digits, RegisterSet::Parameter),
        Some(_) => return Err(invalid()),
    };

    let index: u8 = digits.parse().map_err(|_| invalid())?;
    Ok(RegisterAccess {
        set,
        direct,
        index,
    })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn last_location(&self) -> Location {
        self.tokens
            .last()
            .map(|token| token.location)
            .unwrap_or_default()
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<&'a Token> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(Diagnostic::new(
                token.location,
                Cause::UnexpectedToken {
                    got: token.text.clone(),
                    expected: what.to_string(),
                },
            )),
            None => Err(Diagnostic::new(
                self.last_location(),
                Cause::UnexpectedEnd(what.to_string()),
            )),
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        while let Some(token) = self.peek() {
            match (token.kind, token.text.as_str()) {
                (TokenKind::Directive, ".function:") => {
                    nodes.push(Node::Function(self.parse_function()?));
                }
                (TokenKind::Directive, ".string:") => {
                    nodes.push(Node::Label(self.parse_label(LabelKind::Str)?));
                }
                (TokenKind::Directive, ".atom:") => {
                    nodes.push(Node::Label(self.parse_label(LabelKind::Atom)?));
                }
                (TokenKind::Directive, other) => {
                    return Err(Diagnostic::new(
                        token.location,
                        Cause::UnknownDirective(other.to_string()),
                    ));
                }
                _ => {
                    return Err(Diagnostic::new(
                        token.location,
                        Cause::UnexpectedToken {
                            got: token.text.clone(),
                            expected: "a directive".to_string(),
                        },
                    ));
                }
            }
        }
        Ok(nodes)
    }

    fn parse_attributes(&mut self) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::new();
        if self.peek().map(|token| token.kind) != Some(TokenKind::AttrOpen) {
            return Ok(attributes);
        }
        self.advance();
        loop {
            match self.peek().map(|token| token.kind) {
                Some(TokenKind::AttrClose) => {
                    self.advance();
                    return Ok(attributes);
                }
                Some(TokenKind::Identifier) => {
                    let token = self.advance().map(Token::clone).unwrap_or_else(|| {
                        unreachable!("peeked identifier must be consumable")
                    });
                    attributes.push(Attribute {
                        name: token.text.clone(),
                        token,
                    });
                    if self.peek().map(|token| token.kind) == Some(TokenKind::Comma) {
                        self.advance();
                    }
                }
                Some(_) => {
                    let token = self.advance().expect("peeked token must be consumable");
                    return Err(Diagnostic::new(
                        token.location,
                        Cause::UnexpectedToken {
                            got: token.text.clone(),
                            expected: "an attribute name or ]]".to_string(),
                        },
                    ));
                }
                None => {
                    return Err(Diagnostic::new(
                        self.last_location(),
                        Cause::UnexpectedEnd("]]".to_string()),
                    ));
                }
            }
        }
    }

    fn parse_function(&mut self) -> Result<FnDef> {
        let start = self.expect(TokenKind::Directive, ".function:")?.location;
        let attributes = self.parse_attributes()?;
        let name = self.expect(TokenKind::Identifier, "a function name")?.clone();

        let mut instructions = Vec::new();
        loop {
            match self.peek() {
                Some(token) if token.kind == TokenKind::Directive && token.text == ".end" => {
                    let end = token.location;
                    self.advance();
                    return Ok(FnDef {
                        name,
                        attributes,
                        instructions,
                        start,
                        end,
                    });
                }
                Some(token) if token.kind == TokenKind::Opcode => {
                    let index = instructions.len();
                    instructions.push(self.parse_instruction(index)?);
                }
                Some(token) if token.kind == TokenKind::Identifier => {
                    return Err(Diagnostic::new(
                        token.location,
                        Cause::UnknownMnemonic(token.text.clone()),
                    ));
                }
                Some(token) => {
                    return Err(Diagnostic::new(
                        token.location,
                        Cause::UnexpectedToken {
                            got: token.text.clone(),
                            expected: "an instruction or .end".to_string(),
                        },
                    ));
                }
                None => {
                    return Err(Diagnostic::new(
                        self.last_location(),
                        Cause::UnexpectedEnd(".end".to_string()),
                    ));
                }
            }
        }
    }

    fn parse_instruction(&mut self, physical_index: usize) -> Result<InsnNode> {
        let mnemonic = self.expect(TokenKind::Opcode, "an instruction mnemonic")?.clone();
        let mut operands = Vec::new();

        if self.at_operand() {
            operands.push(self.parse_operand()?);
            while self.peek().map(|token| token.kind) == Some(TokenKind::Comma) {
                self.advance();
                if !self.at_operand() {
                    let location = self
                        .peek()
                        .map(|token| token.location)
                        .unwrap_or_else(|| self.last_location());
                    return Err(Diagnostic::new(
                        location,
                        Cause::MissingOperand(mnemonic.text.clone()),
                    ));
                }
                operands.push(self.parse_operand()?);
            }
        }

        Ok(InsnNode {
            mnemonic,
            operands,
            physical_index,
            greedy: false,
        })
    }

    fn at_operand(&self) -> bool {
        matches!(
            self.peek().map(|token| token.kind),
            Some(TokenKind::Register)
                | Some(TokenKind::LiteralInteger)
                | Some(TokenKind::Identifier)
        )
    }

    fn parse_operand(&mut self) -> Result<Operand> {
        let token = self
            .advance()
            .expect("at_operand() guarantees a token")
            .clone();
        match token.kind {
            TokenKind::Register => {
                let access = parse_register_access(&token)?;
                Ok(Operand::Register { access, token })
            }
            TokenKind::LiteralInteger => {
                let value = parse_integer(&token)?;
                Ok(Operand::Immediate { value, token })
            }
            TokenKind::Identifier => Ok(Operand::Label { token }),
            _ => Err(Diagnostic::new(
                token.location,
                Cause::UnexpectedToken {
                    got: token.text.clone(),
                    expected: "an operand".to_string(),
                },
            )),
        }
    }

    fn parse_label(&mut self, kind: LabelKind) -> Result<LabelDef> {
        self.advance();
        let attributes = self.parse_attributes()?;
        let name = self.expect(TokenKind::Identifier, "a label name")?.clone();

        let mut value = Vec::new();
        match kind {
            LabelKind::Str => {
                value.push(self.expect(TokenKind::LiteralString, "a string literal")?.clone());
                if self.peek().map(|token| token.kind) == Some(TokenKind::Star) {
                    value.push(self.advance().expect("peeked star").clone());
                    // The repetition count is validated by the
                    // value-label stage so the error message can point at
                    // the whole construct.
                    match self.peek() {
                        Some(token)
                            if matches!(
                                token.kind,
                                TokenKind::LiteralInteger | TokenKind::LiteralFloat
                            ) =>
                        {
                            value.push(self.advance().expect("peeked literal").clone());
                        }
                        Some(token) => {
                            value.push(token.clone());
                            self.advance();
                        }
                        None => {
                            return Err(Diagnostic::new(
                                self.last_location(),
                                Cause::UnexpectedEnd("a repetition count".to_string()),
                            ));
                        }
                    }
                }
            }
            LabelKind::Atom => {
                let token = match self.advance() {
                    Some(token)
                        if matches!(
                            token.kind,
                            TokenKind::LiteralAtom | TokenKind::Identifier
                        ) =>
                    {
                        token.clone()
                    }
                    Some(token) => {
                        return Err(Diagnostic::new(
                            token.location,
                            Cause::UnexpectedToken {
                                got: token.text.clone(),
                                expected: "an atom value".to_string(),
                            },
                        ));
                    }
                    None => {
                        return Err(Diagnostic::new(
                            self.last_location(),
                            Cause::UnexpectedEnd("an atom value".to_string()),
                        ));
                    }
                };
                value.push(token);
            }
        }

        Ok(LabelDef {
            name,
            kind,
            value,
            attributes,
        })
    }
}

/// Parse an integer literal token (decimal or `0x` hexadecimal).
pub fn parse_integer(token: &Token) -> Result<i128> {
    let text = token.text.as_str();
    let malformed = || {
        Diagnostic::new(
            token.location,
            Cause::MalformedNumber(token.text.clone()),
        )
    };

    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude: i128 = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|_| malformed())? as i128
    } else {
        rest.parse::<u64>().map_err(|_| malformed())? as i128
    };
    Ok(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{lexical_analysis, remove_noise};

    fn parse_source(source: &str) -> Result<Vec<Node>> {
        parse(&remove_noise(lexical_analysis(source)?))
    }

    #[test]
    fn parse_simple_function() {
        let nodes = parse_source(
            r#"
            .function: [[entry_point]] main
                li $1, 42
                ebreak
                halt
            .end
            "#,
        )
        .unwrap();

        assert_eq!(nodes.len(), 1);
        let Node::Function(fun) = &nodes[0] else {
            panic!("expected a function");
        };
        assert_eq!(fun.name.text, "main");
        assert!(fun.has_attr("entry_point"));
        assert_eq!(fun.instructions.len(), 3);
        assert_eq!(fun.instructions[0].mnemonic.text, "li");
        assert_eq!(fun.instructions[0].physical_index, 0);
        assert_eq!(fun.instructions[2].physical_index, 2);
    }

    #[test]
    fn parse_operand_shapes() {
        let nodes = parse_source(
            r#"
            .function: main
                addi $1, void, 42
                call $2, greet
                add $3, $1, *4
            .end
            "#,
        )
        .unwrap();
        let Node::Function(fun) = &nodes[0] else {
            panic!("expected a function");
        };

        let addi = &fun.instructions[0];
        assert!(matches!(addi.operands[0], Operand::Register { access, .. }
            if access == RegisterAccess::local(1)));
        assert!(matches!(addi.operands[1], Operand::Register { access, .. }
            if access.is_void()));
        assert!(matches!(addi.operands[2], Operand::Immediate { value: 42, .. }));

        let call = &fun.instructions[1];
        assert!(matches!(&call.operands[1], Operand::Label { token } if token.text == "greet"));

        let add = &fun.instructions[2];
        assert!(matches!(add.operands[2], Operand::Register { access, .. }
            if access == RegisterAccess::local_indirect(4)));
    }

    #[test]
    fn parse_string_label_with_repetition() {
        let nodes = parse_source(r#".string: msg "ab" * 3"#).unwrap();
        let Node::Label(label) = &nodes[0] else {
            panic!("expected a label");
        };
        assert_eq!(label.kind, LabelKind::Str);
        assert_eq!(label.name.text, "msg");
        assert_eq!(label.value.len(), 3);
        assert_eq!(label.value[0].text, r#""ab""#);
        assert_eq!(label.value[1].kind, TokenKind::Star);
    }

    #[test]
    fn parse_atom_label() {
        let nodes = parse_source(".atom: state 'running'").unwrap();
        let Node::Label(label) = &nodes[0] else {
            panic!("expected a label");
        };
        assert_eq!(label.kind, LabelKind::Atom);
        assert_eq!(label.value[0].text, "'running'");
    }

    #[test]
    fn register_set_suffixes() {
        let nodes = parse_source(
            r#"
            .function: main
                add $1.l, $2.a, $3.p
            .end
            "#,
        )
        .unwrap();
        let Node::Function(fun) = &nodes[0] else {
            panic!("expected a function");
        };
        let ops = &fun.instructions[0].operands;
        assert!(matches!(ops[0], Operand::Register { access, .. }
            if access.set == RegisterSet::Local));
        assert!(matches!(ops[1], Operand::Register { access, .. }
            if access.set == RegisterSet::Argument));
        assert!(matches!(ops[2], Operand::Register { access, .. }
            if access.set == RegisterSet::Parameter));
    }

    #[test]
    fn missing_end_is_an_error() {
        let diag = parse_source(".function: main\n halt\n").unwrap_err();
        assert!(matches!(diag.cause, Cause::UnexpectedEnd(_)));
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let diag = parse_source(".function: main\n frobnicate $1\n.end").unwrap_err();
        assert_eq!(diag.cause, Cause::UnknownMnemonic("frobnicate".to_string()));
    }

    #[test]
    fn dangling_comma_is_an_error() {
        let diag = parse_source(".function: main\n add $1, $2,\n.end").unwrap_err();
        assert!(matches!(diag.cause, Cause::MissingOperand(_)));
    }

    #[test]
    fn unknown_directive_is_an_error() {
        let diag = parse_source(".data: x 1").unwrap_err();
        assert_eq!(diag.cause, Cause::UnknownDirective(".data:".to_string()));
    }

    #[test]
    fn register_index_must_fit() {
        let diag = parse_source(".function: main\n delete $256\n.end").unwrap_err();
        assert!(matches!(diag.cause, Cause::InvalidRegister(_)));
    }

    #[test]
    fn integer_literals() {
        let lex = |s: &str| {
            remove_noise(lexical_analysis(s).unwrap())
                .into_iter()
                .next()
                .unwrap()
        };
        assert_eq!(parse_integer(&lex("42")).unwrap(), 42);
        assert_eq!(parse_integer(&lex("-7")).unwrap(), -7);
        assert_eq!(
            parse_integer(&lex("0xdeadbeefdeadbeef")).unwrap(),
            0xdead_beef_dead_beefu64 as i128
        );
    }
}
