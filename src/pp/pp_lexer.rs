//! Preprocessing-token lexer.
//!
//! Works on one file at a time. Line splices are removed up front while the
//! physical line/column of every character is remembered, so tokens keep
//! their real position even after a `\`-newline.

/// Coarse classification of a preprocessing token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PPTokenKind {
    Identifier,
    Number,
    CharLiteral,
    StringLiteral,
    Punct,
    /// Any other single character (`$`, `@`, a stray quote, ...)
    Other,
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PPTokenFlags: u8 {
        /// First token of a logical line
        const STARTS_LINE = 1 << 0;
        /// Preceded by whitespace or a comment
        const LEADING_SPACE = 1 << 1;
    }
}

/// A preprocessing token. `file` indexes the preprocessor's file table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PPToken {
    pub kind: PPTokenKind,
    pub text: String,
    pub flags: PPTokenFlags,
    pub file: usize,
    pub line: u32,
    pub column: u32,
    /// Macros that must not be expanded again from this token.
    pub hideset: Vec<String>,
}

impl PPToken {
    pub fn new(kind: PPTokenKind, text: impl Into<String>) -> Self {
        PPToken {
            kind,
            text: text.into(),
            flags: PPTokenFlags::empty(),
            file: 0,
            line: 0,
            column: 0,
            hideset: Vec::new(),
        }
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == PPTokenKind::Punct && self.text == p
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == PPTokenKind::Identifier && self.text == name
    }

    pub fn starts_line(&self) -> bool {
        self.flags.contains(PPTokenFlags::STARTS_LINE)
    }

    pub fn has_leading_space(&self) -> bool {
        self.flags.contains(PPTokenFlags::LEADING_SPACE)
    }
}

const PUNCTUATORS: &[&str] = &[
    "%:%:", "...", "<<=", ">>=", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "*=", "/=", "%=",
    "+=", "-=", "&=", "^=", "|=", "##", "<:", ":>", "<%", "%>", "%:", "[", "]", "(", ")", "{", "}", ".", "&", "*", "+",
    "-", "~", "!", "/", "%", "<", ">", "^", "|", "?", ":", ";", "=", ",", "#",
];

/// Digraph spellings and the punctuator they stand for
fn canonical_punct(p: &'static str) -> &'static str {
    match p {
        "<:" => "[",
        ":>" => "]",
        "<%" => "{",
        "%>" => "}",
        "%:" => "#",
        "%:%:" => "##",
        other => other,
    }
}

pub struct PPLexer {
    chars: Vec<(char, u32, u32)>,
    pos: usize,
    file: usize,
}

impl PPLexer {
    pub fn new(source: &str, file: usize) -> Self {
        let mut chars = Vec::with_capacity(source.len());
        let mut line = 1;
        let mut column = 1;
        let mut iter = source.chars().peekable();
        while let Some(c) = iter.next() {
            if c == '\\' {
                // splice: backslash, optional trailing blanks, newline
                let rest: String = iter.clone().take_while(|c| *c == ' ' || *c == '\t' || *c == '\r').collect();
                let mut lookahead = iter.clone().skip(rest.chars().count());
                if lookahead.next() == Some('\n') {
                    for _ in 0..=rest.chars().count() {
                        iter.next();
                    }
                    line += 1;
                    column = 1;
                    continue;
                }
            }
            if c == '\r' && iter.peek() == Some(&'\n') {
                continue;
            }
            chars.push((c, line, column));
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        PPLexer { chars, pos: 0, file }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|c| c.0)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|c| c.0)
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    /// Lex the whole input. Comments become whitespace.
    pub fn tokenize(mut self) -> Vec<PPToken> {
        let mut tokens = Vec::new();
        let mut flags = PPTokenFlags::STARTS_LINE;

        while let Some(c) = self.peek() {
            if c == '\n' {
                self.pos += 1;
                flags = PPTokenFlags::STARTS_LINE;
                continue;
            }
            if c.is_whitespace() {
                self.pos += 1;
                flags |= PPTokenFlags::LEADING_SPACE;
                continue;
            }
            if self.starts_with("//") {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                flags |= PPTokenFlags::LEADING_SPACE;
                continue;
            }
            if self.starts_with("/*") {
                self.pos += 2;
                while self.peek().is_some() && !self.starts_with("*/") {
                    self.pos += 1;
                }
                self.pos = (self.pos + 2).min(self.chars.len());
                flags |= PPTokenFlags::LEADING_SPACE;
                continue;
            }

            let (_, line, column) = self.chars[self.pos];
            let (kind, text) = self.lex_one();
            tokens.push(PPToken {
                kind,
                text,
                flags,
                file: self.file,
                line,
                column,
                hideset: Vec::new(),
            });
            flags = PPTokenFlags::empty();
        }
        tokens
    }

    fn lex_one(&mut self) -> (PPTokenKind, String) {
        let start = self.pos;
        let c = self.peek().unwrap_or_default();

        // encoding prefixes
        let prefix_len = ["u8\"", "u8'", "u\"", "u'", "U\"", "U'", "L\"", "L'"]
            .iter()
            .find(|p| self.starts_with(p))
            .map(|p| p.len() - 1);
        if let Some(len) = prefix_len {
            self.pos += len;
            if let Some(kind) = self.lex_quoted() {
                return (kind, self.text_from(start));
            }
            self.pos = start;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.pos += 1;
            }
            return (PPTokenKind::Identifier, self.text_from(start));
        }

        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            self.pos += 1;
            while let Some(c) = self.peek() {
                if matches!(c, 'e' | 'E' | 'p' | 'P') && matches!(self.peek_at(1), Some('+') | Some('-')) {
                    self.pos += 2;
                } else if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            return (PPTokenKind::Number, self.text_from(start));
        }

        if c == '"' || c == '\'' {
            if let Some(kind) = self.lex_quoted() {
                return (kind, self.text_from(start));
            }
            self.pos = start + 1;
            return (PPTokenKind::Other, c.to_string());
        }

        if let Some(p) = PUNCTUATORS.iter().find(|p| self.starts_with(p)) {
            self.pos += p.len();
            return (PPTokenKind::Punct, canonical_punct(p).to_string());
        }

        self.pos += 1;
        (PPTokenKind::Other, c.to_string())
    }

    /// Lex a string or character literal starting at the opening quote.
    /// `None` when the literal is not terminated on its line.
    fn lex_quoted(&mut self) -> Option<PPTokenKind> {
        let quote = self.peek()?;
        let kind = if quote == '"' {
            PPTokenKind::StringLiteral
        } else {
            PPTokenKind::CharLiteral
        };
        self.pos += 1;
        loop {
            match self.peek() {
                None | Some('\n') => return None,
                Some('\\') => self.pos += 2,
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Some(kind);
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn text_from(&self, start: usize) -> String {
        let end = self.pos.min(self.chars.len());
        self.chars[start..end].iter().map(|c| c.0).collect()
    }
}

/// Lex a fragment that is not part of any file (macro pasting, command line).
pub fn lex_fragment(text: &str) -> Vec<PPToken> {
    PPLexer::new(text, 0).tokenize()
}

/// Would writing `next` right after `prev` with no space lex differently?
pub fn needs_separator(prev: &PPToken, next: &PPToken) -> bool {
    let word = |k: PPTokenKind| matches!(k, PPTokenKind::Identifier | PPTokenKind::Number);
    if word(prev.kind) && (word(next.kind) || next.kind == PPTokenKind::StringLiteral || next.kind == PPTokenKind::CharLiteral) {
        return true;
    }
    if prev.kind == PPTokenKind::Number && next.text.starts_with('.') {
        return true;
    }
    if prev.kind == PPTokenKind::Punct && next.kind == PPTokenKind::Punct {
        let joined = format!("{}{}", prev.text, next.text);
        return PUNCTUATORS
            .iter()
            .any(|p| p.len() > prev.text.len() && joined.starts_with(p))
            || joined.starts_with("//")
            || joined.starts_with("/*");
    }
    false
}
