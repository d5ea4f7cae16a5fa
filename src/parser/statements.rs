//! Statement parsing

use log::debug;

use super::ast::*;
use super::{ParseError, Parser};
use crate::lexer::TokenKind;

impl Parser<'_, '_> {
    /// `{ block-item* }`; errors inside the block are reported and skipped.
    pub(super) fn parse_compound_statement(&mut self) -> Result<Vec<BlockItem>, ParseError> {
        self.expect(TokenKind::LeftBrace)?;
        self.push_scope();
        let mut items = Vec::new();
        while !self.is(&TokenKind::RightBrace) && !self.at_eof() {
            match self.parse_block_item() {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.report(err);
                    self.recover_in_block();
                }
            }
        }
        self.pop_scope();
        self.expect(TokenKind::RightBrace)?;
        Ok(items)
    }

    fn parse_block_item(&mut self) -> Result<BlockItem, ParseError> {
        if self.is(&TokenKind::StaticAssert) {
            return Ok(BlockItem::StaticAssert(self.parse_static_assert()?));
        }
        let is_label = matches!(self.kind(), TokenKind::Identifier(_)) && matches!(self.peek_kind(1), TokenKind::Colon);
        if self.is_declaration_start_at(0) && !is_label {
            return Ok(BlockItem::Declaration(self.parse_declaration()?));
        }
        Ok(BlockItem::Statement(self.parse_statement()?))
    }

    pub(super) fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        let kind = match self.kind() {
            TokenKind::LeftBrace => StmtKind::Compound(self.parse_compound_statement()?),
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Expr(None)
            }
            TokenKind::If => {
                self.advance();
                let cond = self.parse_paren_condition()?;
                let then = Box::new(self.parse_statement()?);
                let otherwise = if self.accept(&TokenKind::Else) {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                StmtKind::If { cond, then, otherwise }
            }
            TokenKind::While => {
                self.advance();
                let cond = self.parse_paren_condition()?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { cond, body }
            }
            TokenKind::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(TokenKind::While)?;
                let cond = self.parse_paren_condition()?;
                self.expect_semicolon("do/while statement")?;
                StmtKind::DoWhile { body, cond }
            }
            TokenKind::For => {
                self.advance();
                self.push_scope();
                let result = self.parse_for_rest();
                self.pop_scope();
                result?
            }
            TokenKind::Switch => {
                self.advance();
                let cond = self.parse_paren_condition()?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::Switch { cond, body }
            }
            TokenKind::Case => {
                self.advance();
                let value = self.parse_conditional_expression()?;
                self.expect(TokenKind::Colon)?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::Case { value, body }
            }
            TokenKind::Default => {
                self.advance();
                self.expect(TokenKind::Colon)?;
                StmtKind::Default(Box::new(self.parse_statement()?))
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.is(&TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_semicolon("return statement")?;
                StmtKind::Return(value)
            }
            TokenKind::Break => {
                self.advance();
                self.expect_semicolon("break statement")?;
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.expect_semicolon("continue statement")?;
                StmtKind::Continue
            }
            TokenKind::Goto => {
                return Err(ParseError::unsupported("'goto' statements are not supported", loc));
            }
            TokenKind::Identifier(_) if matches!(self.peek_kind(1), TokenKind::Colon) => {
                return Err(ParseError::unsupported("labeled statements are not supported", loc));
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect_semicolon("expression")?;
                StmtKind::Expr(Some(expr))
            }
        };
        Ok(Stmt { kind, loc })
    }

    fn parse_paren_condition(&mut self) -> Result<Expr, ParseError> {
        self.expect(TokenKind::LeftParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RightParen)?;
        Ok(cond)
    }

    fn expect_semicolon(&mut self, after: &str) -> Result<(), ParseError> {
        if self.accept(&TokenKind::Semicolon) {
            Ok(())
        } else {
            Err(ParseError::expected(format!("';' after {}", after), self.loc()))
        }
    }

    /// After `for`: the parenthesized header and the body
    fn parse_for_rest(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(TokenKind::LeftParen)?;
        let init = if self.accept(&TokenKind::Semicolon) {
            None
        } else if self.is_declaration_start_at(0) {
            debug!("for loop with declaration");
            Some(ForInit::Declaration(self.parse_declaration()?))
        } else {
            let expr = self.parse_expr()?;
            self.expect(TokenKind::Semicolon)?;
            Some(ForInit::Expr(expr))
        };
        let cond = if self.is(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semicolon)?;
        let step = if self.is(&TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::RightParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For { init, cond, step, body })
    }
}
