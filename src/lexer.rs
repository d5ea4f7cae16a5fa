//! C lexer over preprocessed text.
//!
//! Understands the `# <line> "<file>"` markers the preprocessor writes, so
//! every token carries its presumed source position. `#pragma` lines are
//! skipped.

use crate::diagnostic::{Diagnostic, DiagnosticEngine, SourceLoc};

/// C11 token kinds for the lexical analyzer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    // === LITERALS ===
    IntegerConstant { value: u64, unsigned: bool, long: bool },
    CharacterConstant(i64),
    /// Bytes without the terminating NUL
    StringLiteral(Vec<u8>),

    Identifier(String),

    // === KEYWORDS ===
    Auto,
    Extern,
    Register,
    Static,
    Typedef,
    Const,
    Restrict,
    Volatile,
    Inline,
    Noreturn,
    Bool,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Signed,
    Unsigned,
    Void,
    Struct,
    Union,
    Enum,
    Break,
    Case,
    Continue,
    Default,
    Do,
    Else,
    For,
    Goto,
    If,
    Return,
    Switch,
    While,
    Sizeof,
    StaticAssert,
    Attribute,
    Extension,

    // === OPERATORS ===
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Increment,
    Decrement,
    And,
    Or,
    Xor,
    Not,
    Tilde,
    LeftShift,
    RightShift,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    DivAssign,
    ModAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    LeftShiftAssign,
    RightShiftAssign,
    LogicAnd,
    LogicOr,
    Arrow,
    Dot,
    Question,
    Colon,

    // === PUNCTUATION ===
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Ellipsis,

    EndOfFile,
}

impl TokenKind {
    fn keyword(ident: &str) -> Option<TokenKind> {
        let kw = match ident {
            "auto" => TokenKind::Auto,
            "extern" => TokenKind::Extern,
            "register" => TokenKind::Register,
            "static" => TokenKind::Static,
            "typedef" => TokenKind::Typedef,
            "const" | "__const" | "__const__" => TokenKind::Const,
            "restrict" | "__restrict" | "__restrict__" => TokenKind::Restrict,
            "volatile" | "__volatile__" => TokenKind::Volatile,
            "inline" | "__inline" | "__inline__" => TokenKind::Inline,
            "_Noreturn" => TokenKind::Noreturn,
            "_Bool" => TokenKind::Bool,
            "char" => TokenKind::Char,
            "double" => TokenKind::Double,
            "float" => TokenKind::Float,
            "int" => TokenKind::Int,
            "long" => TokenKind::Long,
            "short" => TokenKind::Short,
            "signed" | "__signed__" => TokenKind::Signed,
            "unsigned" => TokenKind::Unsigned,
            "void" => TokenKind::Void,
            "struct" => TokenKind::Struct,
            "union" => TokenKind::Union,
            "enum" => TokenKind::Enum,
            "break" => TokenKind::Break,
            "case" => TokenKind::Case,
            "continue" => TokenKind::Continue,
            "default" => TokenKind::Default,
            "do" => TokenKind::Do,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "goto" => TokenKind::Goto,
            "if" => TokenKind::If,
            "return" => TokenKind::Return,
            "switch" => TokenKind::Switch,
            "while" => TokenKind::While,
            "sizeof" => TokenKind::Sizeof,
            "_Static_assert" => TokenKind::StaticAssert,
            "__attribute__" | "__attribute" => TokenKind::Attribute,
            "__extension__" => TokenKind::Extension,
            _ => return None,
        };
        Some(kw)
    }

    /// Spelling used in "expected X" diagnostics
    pub fn spelling(&self) -> String {
        let s = match self {
            TokenKind::IntegerConstant { value, .. } => return value.to_string(),
            TokenKind::CharacterConstant(_) => "character constant",
            TokenKind::StringLiteral(_) => "string literal",
            TokenKind::Identifier(name) => return name.clone(),
            TokenKind::EndOfFile => "end of file",
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftBracket => "[",
            TokenKind::RightBracket => "]",
            TokenKind::LeftBrace => "{",
            TokenKind::RightBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Assign => "=",
            other => return PUNCTUATORS
                .iter()
                .find(|(_, k)| k == other)
                .map(|(s, _)| s.to_string())
                .unwrap_or_else(|| format!("{:?}", other).to_lowercase()),
        };
        s.to_string()
    }
}

const PUNCTUATORS: &[(&str, TokenKind)] = &[
    ("...", TokenKind::Ellipsis),
    ("<<=", TokenKind::LeftShiftAssign),
    (">>=", TokenKind::RightShiftAssign),
    ("->", TokenKind::Arrow),
    ("++", TokenKind::Increment),
    ("--", TokenKind::Decrement),
    ("<<", TokenKind::LeftShift),
    (">>", TokenKind::RightShift),
    ("<=", TokenKind::LessEqual),
    (">=", TokenKind::GreaterEqual),
    ("==", TokenKind::Equal),
    ("!=", TokenKind::NotEqual),
    ("&&", TokenKind::LogicAnd),
    ("||", TokenKind::LogicOr),
    ("+=", TokenKind::PlusAssign),
    ("-=", TokenKind::MinusAssign),
    ("*=", TokenKind::StarAssign),
    ("/=", TokenKind::DivAssign),
    ("%=", TokenKind::ModAssign),
    ("&=", TokenKind::AndAssign),
    ("|=", TokenKind::OrAssign),
    ("^=", TokenKind::XorAssign),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("&", TokenKind::And),
    ("|", TokenKind::Or),
    ("^", TokenKind::Xor),
    ("!", TokenKind::Not),
    ("~", TokenKind::Tilde),
    ("<", TokenKind::Less),
    (">", TokenKind::Greater),
    ("=", TokenKind::Assign),
    (".", TokenKind::Dot),
    ("?", TokenKind::Question),
    (":", TokenKind::Colon),
    ("(", TokenKind::LeftParen),
    (")", TokenKind::RightParen),
    ("[", TokenKind::LeftBracket),
    ("]", TokenKind::RightBracket),
    ("{", TokenKind::LeftBrace),
    ("}", TokenKind::RightBrace),
    (",", TokenKind::Comma),
    (";", TokenKind::Semicolon),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: SourceLoc,
}

pub struct Lexer<'a, 'd> {
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

    /// Lex everything; the last token is always `EndOfFile`.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let loc = self.loc();
            if self.pos >= self.src.len() {
                tokens.push(Token {
                    kind: TokenKind::EndOfFile,
                    loc,
                });
                return tokens;
            }
            if let Some(kind) = self.lex_token(&loc) {
                tokens.push(Token { kind, loc });
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                b'\n' => self.newline(),
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c if self.pos < self.src.len() => self.pos += 1,
                b'#' if self.src[self.line_start..self.pos].iter().all(|b| b.is_ascii_whitespace()) => {
                    self.line_directive()
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while self.pos < self.src.len() && self.peek() != b'\n' {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek_at(1) == b'*' => {
                    self.pos += 2;
                    while self.pos < self.src.len() && !(self.peek() == b'*' && self.peek_at(1) == b'/') {
                        if self.peek() == b'\n' {
                            self.newline();
                        } else {
                            self.pos += 1;
                        }
                    }
                    self.pos = (self.pos + 2).min(self.src.len());
                }
                _ => return,
            }
        }
    }

    /// `# 12 "file.c" ...` sets the position of the next line; anything else is skipped.
    fn line_directive(&mut self) {
        let start = self.pos + 1;
        let end = self.src[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(self.src.len(), |p| start + p);
        let text = String::from_utf8_lossy(&self.src[start..end]).into_owned();
        let mut rest = text.trim_start();
        rest = rest.strip_prefix("line").map_or(rest, str::trim_start);
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();

        self.pos = end;
        if digits.is_empty() {
            return;
        }
        let after = rest[digits.len()..].trim_start();
        if let Some(quoted) = after.strip_prefix('"') {
            if let Some(close) = quoted.find('"') {
                self.file = quoted[..close].replace("\\\\", "\\");
            }
        }
        if let Ok(line) = digits.parse::<u32>() {
            if self.pos < self.src.len() {
                self.newline();
            }
            // the newline above advanced the counter past the marker's own line
            self.line = line;
        }
    }

    fn lex_token(&mut self, loc: &SourceLoc) -> Option<TokenKind> {
        let c = self.peek();

        if (c == b'L' || c == b'u' || c == b'U') && matches!(self.peek_at(1), b'"' | b'\'')
            || (c == b'u' && self.peek_at(1) == b'8' && self.peek_at(2) == b'"')
        {
            self.error(loc.clone(), "wide and unicode character literals are not supported");
            while self.peek() != b'"' && self.peek() != b'\'' {
                self.pos += 1;
            }
            let quote = self.peek();
            self.pos += 1;
            let _ = self.lex_quoted_body(quote, loc);
            return None;
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            let start = self.pos;
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                self.pos += 1;
            }
            let ident = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
            return Some(TokenKind::keyword(&ident).unwrap_or(TokenKind::Identifier(ident)));
        }

        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_ascii_digit()) {
            return self.lex_number(loc);
        }

        if c == b'"' {
            self.pos += 1;
            let bytes = self.lex_quoted_body(b'"', loc)?;
            return Some(TokenKind::StringLiteral(bytes));
        }

        if c == b'\'' {
            self.pos += 1;
            let bytes = self.lex_quoted_body(b'\'', loc)?;
            return match bytes.as_slice() {
                [] => {
                    self.error(loc.clone(), "empty character constant");
                    None
                }
                [b] => Some(TokenKind::CharacterConstant(*b as i8 as i64)),
                multi => {
                    self.diag.report(
                        Diagnostic::warning("multi-character character constant")
                            .with_code("multichar")
                            .at(loc.clone()),
                    );
                    Some(TokenKind::CharacterConstant(
                        multi.iter().fold(0i64, |acc, b| (acc << 8) | *b as i64) as i32 as i64,
                    ))
                }
            };
        }

        for (spelling, kind) in PUNCTUATORS {
            if self.src[self.pos..].starts_with(spelling.as_bytes()) {
                self.pos += spelling.len();
                return Some(kind.clone());
            }
        }

        let ch = String::from_utf8_lossy(&self.src[self.pos..(self.pos + 1).min(self.src.len())]).into_owned();
        self.pos += 1;
        self.error(loc.clone(), format!("invalid character '{}' in source", ch));
        None
    }

    fn lex_number(&mut self, loc: &SourceLoc) -> Option<TokenKind> {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'.' || self.peek() == b'_' {
            if matches!(self.peek(), b'e' | b'E' | b'p' | b'P') && matches!(self.peek_at(1), b'+' | b'-') {
                self.pos += 1;
            }
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let lower = text.to_ascii_lowercase();

        let is_hex = lower.starts_with("0x");
        if lower.contains('.') || (!is_hex && (lower.contains('e'))) || (is_hex && lower.contains('p')) {
            self.error(loc.clone(), "floating-point types are not supported");
            return Some(TokenKind::IntegerConstant {
                value: 0,
                unsigned: false,
                long: false,
            });
        }

        let is_bin = lower.starts_with("0b");
        let radix = if is_hex { 16 } else { 10 };
        let digits_end = lower
            .char_indices()
            .skip(if is_hex || is_bin { 2 } else { 0 })
            .find(|(_, c)| !c.is_digit(radix))
            .map_or(lower.len(), |(i, _)| i);
        let (digits, suffix) = lower.split_at(digits_end);
        let unsigned = suffix.contains('u');
        let long = suffix.contains('l');
        if !matches!(suffix, "" | "u" | "l" | "ul" | "lu" | "ll" | "ull" | "llu") {
            self.error(loc.clone(), format!("invalid suffix '{}' on integer constant", &text[digits_end..]));
        }

        let parsed = if is_hex {
            u64::from_str_radix(&digits[2..], 16)
        } else if let Some(bin) = digits.strip_prefix("0b") {
            u64::from_str_radix(bin, 2)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse::<u64>()
        };
        let value = match parsed {
            Ok(v) => v,
            Err(_) => {
                self.error(loc.clone(), "integer literal is too large to be represented in any integer type");
                0
            }
        };
        Some(TokenKind::IntegerConstant { value, unsigned, long })
    }

    /// Body of a quoted literal after the opening quote, escapes decoded.
    fn lex_quoted_body(&mut self, quote: u8, loc: &SourceLoc) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            if self.pos >= self.src.len() || self.peek() == b'\n' {
                let which = if quote == b'"' { '"' } else { '\'' };
                self.error(loc.clone(), format!("missing terminating {} character", which));
                return None;
            }
            match self.peek() {
                b'\\' => {
                    self.pos += 1;
                    let b = self.lex_escape(loc);
                    bytes.push(b);
                }
                c if c == quote => {
                    self.pos += 1;
                    return Some(bytes);
                }
                c => {
                    bytes.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn lex_escape(&mut self, loc: &SourceLoc) -> u8 {
        let c = self.peek();
        self.pos += 1;
        match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' | b'\'' | b'"' | b'?' => c,
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
            b'x' => {
                let mut value = 0u32;
                while self.peek().is_ascii_hexdigit() {
                    value = value.wrapping_mul(16) + (self.peek() as char).to_digit(16).unwrap_or(0);
                    self.pos += 1;
                }
                value as u8
            }
            other => {
                self.diag.report(
                    Diagnostic::warning(format!("unknown escape sequence '\\{}'", other as char))
                        .with_code("unknown-escape-sequence")
                        .at(loc.clone()),
                );
                other
            }
        }
    }
}

#[cfg(test)]
mod tests_lexer;
