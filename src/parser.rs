//! Parser for the supported C subset.
//!
//! Recursive descent for declarations and statements, a Pratt parser for
//! expressions. Typedef names are tracked per scope so `T * x;` can be told
//! apart from a multiplication. Syntax errors are reported to the
//! [`DiagnosticEngine`] and parsing resumes at the next statement or
//! declaration boundary, so one run reports as many errors as it can.

use hashbrown::HashMap;
use log::{debug, trace};
use thiserror::Error;

use crate::diagnostic::{Diagnostic, DiagnosticEngine, SourceLoc};
use crate::lang_options::LangOptions;
use crate::lexer::{Token, TokenKind};

pub mod ast;
mod declarations;
mod expressions;
mod statements;

#[cfg(test)]
mod tests_parser;

use ast::{ExternalDecl, ParsedType, TranslationUnit};

/// Syntax errors; each one is reported and followed by recovery.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("expected {expected}")]
    Expected { expected: String, loc: SourceLoc },

    #[error("{message}")]
    Unsupported { message: String, loc: SourceLoc },

    #[error("{message}")]
    Syntax { message: String, loc: SourceLoc },
}

impl ParseError {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            ParseError::Expected { loc, .. } | ParseError::Unsupported { loc, .. } | ParseError::Syntax { loc, .. } => loc,
        }
    }

    pub(crate) fn expected(expected: impl Into<String>, loc: SourceLoc) -> Self {
        ParseError::Expected {
            expected: expected.into(),
            loc,
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>, loc: SourceLoc) -> Self {
        ParseError::Unsupported {
            message: message.into(),
            loc,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, loc: SourceLoc) -> Self {
        ParseError::Syntax {
            message: message.into(),
            loc,
        }
    }
}

/// An ordinary identifier in scope, or a typedef name with its type
#[derive(Debug, Clone)]
enum ScopeEntry {
    Ordinary,
    Typedef(ParsedType),
}

pub struct Parser<'t, 'd> {
    tokens: &'t [Token],
    pos: usize,
    eof: Token,
    lang_opts: LangOptions,
    diag: &'d mut DiagnosticEngine,
    scopes: Vec<HashMap<String, ScopeEntry>>,
}

impl<'t, 'd> Parser<'t, 'd> {
    pub fn new(tokens: &'t [Token], lang_opts: LangOptions, diag: &'d mut DiagnosticEngine) -> Self {
        let eof_loc = tokens
            .last()
            .map(|t| t.loc.clone())
            .unwrap_or_else(|| SourceLoc::new("<unknown>", 1, 1));
        Parser {
            tokens,
            pos: 0,
            eof: Token {
                kind: TokenKind::EndOfFile,
                loc: eof_loc,
            },
            lang_opts,
            diag,
            scopes: vec![HashMap::new()],
        }
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn peek_kind(&self, n: usize) -> &TokenKind {
        self.tokens.get(self.pos + n).map_or(&self.eof.kind, |t| &t.kind)
    }

    fn loc(&self) -> SourceLoc {
        self.current().loc.clone()
    }

    fn at_eof(&self) -> bool {
        matches!(self.kind(), TokenKind::EndOfFile)
    }

    fn is(&self, kind: &TokenKind) -> bool {
        self.kind() == kind
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, kind: &TokenKind) -> bool {
        if self.is(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        if self.is(&kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::expected(format!("'{}'", kind.spelling()), self.loc()))
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, SourceLoc), ParseError> {
        match self.kind() {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let loc = self.advance().loc;
                Ok((name, loc))
            }
            _ => Err(ParseError::expected("identifier", self.loc())),
        }
    }

    fn report(&mut self, err: ParseError) {
        debug!("parse error: {}", err);
        let loc = err.loc().clone();
        self.diag.report(Diagnostic::error(err.to_string()).at(loc));
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn declare_typedef(&mut self, name: &str, ty: ParsedType) {
        trace!("typedef name '{}'", name);
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ScopeEntry::Typedef(ty));
        }
    }

    fn declare_ordinary(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ScopeEntry::Ordinary);
        }
    }

    /// Type named by `name` if it is a typedef in the innermost scope that declares it
    fn typedef_type(&self, name: &str) -> Option<&ParsedType> {
        self.scopes.iter().rev().find_map(|s| s.get(name)).and_then(|entry| match entry {
            ScopeEntry::Typedef(ty) => Some(ty),
            ScopeEntry::Ordinary => None,
        })
    }

    fn is_typedef_name(&self, kind: &TokenKind) -> bool {
        matches!(kind, TokenKind::Identifier(name) if self.typedef_type(name).is_some())
    }

    /// Skip `__attribute__((...))` and `__asm__("...")` annotations.
    fn skip_annotations(&mut self) -> Result<(), ParseError> {
        loop {
            let is_asm = matches!(self.kind(), TokenKind::Identifier(n) if n == "__asm__" || n == "__asm");
            if !is_asm && !self.is(&TokenKind::Attribute) {
                return Ok(());
            }
            self.advance();
            self.expect(TokenKind::LeftParen)?;
            self.skip_balanced_parens()?;
        }
    }

    /// Skip to just past the `)` matching an already consumed `(`.
    fn skip_balanced_parens(&mut self) -> Result<(), ParseError> {
        let mut depth = 1usize;
        loop {
            match self.kind() {
                TokenKind::EndOfFile => return Err(ParseError::expected("')'", self.loc())),
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.advance();
        }
    }

    /// Recover at file scope: skip past the next `;` or closing `}` at nesting depth zero.
    fn synchronize(&mut self) {
        let start = self.pos;
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.advance().kind {
                TokenKind::LeftBrace => depth += 1,
                TokenKind::RightBrace => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Semicolon if depth == 0 => break,
                _ => {}
            }
        }
        if self.pos == start && !self.at_eof() {
            self.advance();
        }
    }

    /// Recover inside a block: skip past the next `;`, stopping before the block's `}`.
    fn recover_in_block(&mut self) {
        let start = self.pos;
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.kind() {
                TokenKind::RightBrace if depth == 0 => break,
                TokenKind::RightBrace => depth -= 1,
                TokenKind::LeftBrace => depth += 1,
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    break;
                }
                _ => {}
            }
            self.advance();
        }
        if self.pos == start && !self.at_eof() && !self.is(&TokenKind::RightBrace) {
            self.advance();
        }
    }

    /// Parse a whole translation unit, reporting syntax errors as they are found.
    pub fn parse_translation_unit(&mut self) -> TranslationUnit {
        let mut unit = TranslationUnit::default();
        while !self.at_eof() {
            match self.parse_external_declaration() {
                Ok(Some(decl)) => {
                    if let ExternalDecl::Function(f) = &decl {
                        trace!("parsed function '{}'", f.name);
                    }
                    unit.decls.push(decl);
                }
                Ok(None) => {}
                Err(err) => {
                    self.report(err);
                    self.synchronize();
                }
            }
        }
        debug!("parsed {} external declarations", unit.decls.len());
        unit
    }
}

/// Convenience wrapper: parse `tokens` (ending with `EndOfFile`) into a translation unit.
pub fn parse(tokens: &[Token], lang_opts: LangOptions, diag: &mut DiagnosticEngine) -> TranslationUnit {
    Parser::new(tokens, lang_opts, diag).parse_translation_unit()
}
