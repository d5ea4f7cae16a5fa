//! Splits assembler source into statements of tokens.
//!
//! A statement ends at a newline or `;`. `#` and `//` start line comments,
//! except that a `# <line> "<file>"` marker at the start of a line moves the
//! presumed position the way preprocessor output expects.

use super::parser::AsmError;
use crate::diagnostic::{Diagnostic, DiagnosticEngine, SourceLoc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Symbol or directive name; `.` alone is the location counter
    Ident(String),
    Int(i64),
    Str(Vec<u8>),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub(crate) struct Statement {
    pub tokens: Vec<Token>,
    /// Position of the first token
    pub loc: SourceLoc,
}

const PUNCTUATORS: &[&str] = &[
    "<<", ">>", "+", "-", "*", "/", "%", "&", "|", "^", "~", "(", ")", ",", ":", "@", "=", "!", "$",
];

/// `$` may continue a name but starts an immediate operand
fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || matches!(c, b'_' | b'.')
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'.' | b'$')
}

pub(crate) struct Lexer<'a, 'd> {
    src: &'a [u8],
    pos: usize,
    file: String,
    line: u32,
    line_start: usize,
    diag: &'d mut DiagnosticEngine,
}

impl<'a, 'd> Lexer<'a, 'd> {
    pub fn new(src: &'a str, file: impl Into<String>, diag: &'d mut DiagnosticEngine) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            file: file.into(),
            line: 1,
            line_start: 0,
            diag,
        }
    }

    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    fn peek_at(&self, n: usize) -> u8 {
        self.src.get(self.pos + n).copied().unwrap_or(0)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.file.clone(), self.line, (self.pos - self.line_start + 1) as u32)
    }

    fn newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.line_start = self.pos;
    }

    fn error(&mut self, loc: SourceLoc, msg: impl Into<String>) {
        self.diag.report(Diagnostic::error(msg).at(loc));
    }

    pub fn statements(mut self) -> Vec<Statement> {
        let mut statements = Vec::new();
        let mut current: Vec<Token> = Vec::new();
        let flush = |current: &mut Vec<Token>, statements: &mut Vec<Statement>| {
            if let Some(first) = current.first() {
                let loc = first.loc.clone();
                statements.push(Statement {
                    tokens: std::mem::take(current),
                    loc,
                });
            }
        };

        while !self.at_end() {
            match self.peek() {
                b'\n' => {
                    flush(&mut current, &mut statements);
                    self.newline();
                }
                b';' => {
                    flush(&mut current, &mut statements);
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c => self.pos += 1,
                b'#' => {
                    let line_start = self.src[self.line_start..self.pos].iter().all(|b| b.is_ascii_whitespace());
                    if line_start && current.is_empty() {
                        self.line_marker();
                    } else {
                        self.skip_line();
                    }
                }
                b'/' if self.peek_at(1) == b'/' => self.skip_line(),
                b'/' if self.peek_at(1) == b'*' => self.skip_block_comment(),
                _ => {
                    let loc = self.loc();
                    if let Some(kind) = self.lex_token(&loc) {
                        current.push(Token { kind, loc });
                    } else {
                        // drop the rest of a statement that failed to lex
                        current.clear();
                        while !self.at_end() && !matches!(self.peek(), b'\n' | b';') {
                            self.pos += 1;
                        }
                    }
                }
            }
        }
        flush(&mut current, &mut statements);
        statements
    }

    fn skip_line(&mut self) {
        while !self.at_end() && self.peek() != b'\n' {
            self.pos += 1;
        }
    }

    fn skip_block_comment(&mut self) {
        let loc = self.loc();
        self.pos += 2;
        while !(self.peek() == b'*' && self.peek_at(1) == b'/') {
            if self.at_end() {
                self.error(loc, "unterminated comment");
                return;
            }
            if self.peek() == b'\n' {
                self.newline();
            } else {
                self.pos += 1;
            }
        }
        self.pos += 2;
    }

    /// `# 12 "file.S"` makes the next line line 12 of `file.S`; other `#` lines are comments.
    fn line_marker(&mut self) {
        let start = self.pos + 1;
        self.skip_line();
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let rest = text.trim_start();
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let Ok(line) = digits.parse::<u32>() else {
            return;
        };
        if let Some(quoted) = rest[digits.len()..].trim_start().strip_prefix('"') {
            if let Some(close) = quoted.find('"') {
                self.file = quoted[..close].to_string();
            }
        }
        if !self.at_end() {
            self.newline();
        }
        self.line = line;
    }

    fn lex_token(&mut self, loc: &SourceLoc) -> Option<TokenKind> {
        let c = self.peek();
        if is_ident_start(c) {
            let start = self.pos;
            while is_ident_continue(self.peek()) {
                self.pos += 1;
            }
            return Some(TokenKind::Ident(
                String::from_utf8_lossy(&self.src[start..self.pos]).into_owned(),
            ));
        }
        if c.is_ascii_digit() {
            return self.lex_number(loc);
        }
        if c == b'"' {
            self.pos += 1;
            return self.lex_string(loc).map(TokenKind::Str);
        }
        if c == b'\'' {
            // GNU style 'c with an optional closing quote
            self.pos += 1;
            let value = match self.peek() {
                b'\\' => {
                    self.pos += 1;
                    self.lex_escape(loc)?
                }
                b'\n' | 0 => {
                    self.error(loc.clone(), "missing character after quote");
                    return None;
                }
                b => {
                    self.pos += 1;
                    b
                }
            };
            if self.peek() == b'\'' {
                self.pos += 1;
            }
            return Some(TokenKind::Int(value as i64));
        }
        for punct in PUNCTUATORS {
            if self.src[self.pos..].starts_with(punct.as_bytes()) {
                self.pos += punct.len();
                return Some(TokenKind::Punct(*punct));
            }
        }

        let ch = String::from_utf8_lossy(&self.src[self.pos..(self.pos + 1).min(self.src.len())]).into_owned();
        self.pos += 1;
        self.error(loc.clone(), format!("unexpected character '{}'", ch));
        None
    }

    fn lex_number(&mut self, loc: &SourceLoc) -> Option<TokenKind> {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).to_ascii_lowercase();
        let parsed = if let Some(hex) = text.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
        } else if let Some(bin) = text.strip_prefix("0b") {
            u64::from_str_radix(bin, 2)
        } else if text.len() > 1 && text.starts_with('0') {
            u64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<u64>()
        };
        match parsed {
            Ok(value) => Some(TokenKind::Int(value as i64)),
            Err(_) => {
                self.error(loc.clone(), format!("invalid number '{}'", text));
                None
            }
        }
    }

    fn lex_string(&mut self, loc: &SourceLoc) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                _ if self.at_end() => {
                    self.error(loc.clone(), "unterminated string");
                    return None;
                }
                b'\n' => {
                    self.error(loc.clone(), "unterminated string");
                    return None;
                }
                b'"' => {
                    self.pos += 1;
                    return Some(bytes);
                }
                b'\\' => {
                    self.pos += 1;
                    bytes.push(self.lex_escape(loc)?);
                }
                b => {
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    fn lex_escape(&mut self, loc: &SourceLoc) -> Option<u8> {
        let c = self.peek();
        self.pos += 1;
        let value = match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' | b'\'' | b'"' => c,
            b'0'..=b'7' => {
                let mut value = (c - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        d @ b'0'..=b'7' => {
                            value = value * 8 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                value as u8
            }
            b'x' | b'X' => {
                let mut value = 0u32;
                while self.peek().is_ascii_hexdigit() {
                    value = (value << 4) | (self.peek() as char).to_digit(16).unwrap_or(0);
                    self.pos += 1;
                }
                value as u8
            }
            other => {
                self.error(loc.clone(), format!("invalid escape sequence '\\{}'", other as char));
                return None;
            }
        };
        Some(value)
    }
}

/// Read position in one statement's tokens
pub(crate) struct TokenCursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Reported for errors past the last token
    end: SourceLoc,
}

impl<'t> TokenCursor<'t> {
    pub fn new(tokens: &'t [Token], end: SourceLoc) -> Self {
        TokenCursor { tokens, pos: 0, end }
    }

    pub fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    pub fn peek_at(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + n)
    }

    pub fn peek_punct(&self) -> Option<&'static str> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Punct(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    pub fn advance(&mut self) {
        self.pos += 1;
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn loc(&self) -> SourceLoc {
        self.peek().map_or_else(|| self.end.clone(), |t| t.loc.clone())
    }

    pub fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek_punct() == Some(punct) {
            self.pos += 1;
            return true;
        }
        false
    }

    pub fn expect_punct(&mut self, punct: &str) -> Result<(), AsmError> {
        if self.eat_punct(punct) {
            return Ok(());
        }
        Err(AsmError::new(self.loc(), format!("expected '{}'", punct)))
    }

    pub fn expect_ident(&mut self) -> Result<&'t str, AsmError> {
        let loc = self.loc();
        match self.next().map(|t| &t.kind) {
            Some(TokenKind::Ident(name)) => Ok(name),
            _ => Err(AsmError::new(loc, "expected identifier")),
        }
    }

    pub fn expect_string(&mut self) -> Result<&'t [u8], AsmError> {
        let loc = self.loc();
        match self.next().map(|t| &t.kind) {
            Some(TokenKind::Str(bytes)) => Ok(bytes),
            _ => Err(AsmError::new(loc, "expected string")),
        }
    }

    /// Error unless every token was consumed
    pub fn expect_end(&self) -> Result<(), AsmError> {
        if self.at_end() {
            return Ok(());
        }
        Err(AsmError::new(self.loc(), "unexpected token at end of statement"))
    }
}
