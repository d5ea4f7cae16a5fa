//! Expression parsing
//!
//! Binary operators go through a Pratt loop driven by [`BindingPower`];
//! prefix operators, casts and postfix operators are handled by dedicated
//! functions.

use log::trace;

use super::ast::*;
use super::{ParseError, Parser};
use crate::lexer::TokenKind;

/// Binding power for Pratt parser operator precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BindingPower(u8);

impl BindingPower {
    pub const MIN: Self = Self(0);
    pub const COMMA: Self = Self(1);
    pub const ASSIGNMENT: Self = Self(2);
    pub const CONDITIONAL: Self = Self(3);
    pub const LOGICAL_OR: Self = Self(4);
    pub const LOGICAL_AND: Self = Self(5);
    pub const BITWISE_OR: Self = Self(6);
    pub const BITWISE_XOR: Self = Self(7);
    pub const BITWISE_AND: Self = Self(8);
    pub const EQUALITY: Self = Self(9);
    pub const RELATIONAL: Self = Self(10);
    pub const SHIFT: Self = Self(11);
    pub const ADDITIVE: Self = Self(12);
    pub const MULTIPLICATIVE: Self = Self(13);
    pub const UNARY: Self = Self(15);

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Associativity {
    Left,
    Right,
}

/// Infix operator table
fn binding_power(kind: &TokenKind) -> Option<(BindingPower, Associativity)> {
    let entry = match kind {
        TokenKind::Assign
        | TokenKind::PlusAssign
        | TokenKind::MinusAssign
        | TokenKind::StarAssign
        | TokenKind::DivAssign
        | TokenKind::ModAssign
        | TokenKind::AndAssign
        | TokenKind::OrAssign
        | TokenKind::XorAssign
        | TokenKind::LeftShiftAssign
        | TokenKind::RightShiftAssign => (BindingPower::ASSIGNMENT, Associativity::Right),
        TokenKind::Comma => (BindingPower::COMMA, Associativity::Left),
        TokenKind::Question => (BindingPower::CONDITIONAL, Associativity::Right),
        TokenKind::LogicOr => (BindingPower::LOGICAL_OR, Associativity::Left),
        TokenKind::LogicAnd => (BindingPower::LOGICAL_AND, Associativity::Left),
        TokenKind::Or => (BindingPower::BITWISE_OR, Associativity::Left),
        TokenKind::Xor => (BindingPower::BITWISE_XOR, Associativity::Left),
        TokenKind::And => (BindingPower::BITWISE_AND, Associativity::Left),
        TokenKind::Equal | TokenKind::NotEqual => (BindingPower::EQUALITY, Associativity::Left),
        TokenKind::Less | TokenKind::Greater | TokenKind::LessEqual | TokenKind::GreaterEqual => {
            (BindingPower::RELATIONAL, Associativity::Left)
        }
        TokenKind::LeftShift | TokenKind::RightShift => (BindingPower::SHIFT, Associativity::Left),
        TokenKind::Plus | TokenKind::Minus => (BindingPower::ADDITIVE, Associativity::Left),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => {
            (BindingPower::MULTIPLICATIVE, Associativity::Left)
        }
        _ => return None,
    };
    Some(entry)
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Plus | TokenKind::PlusAssign => BinaryOp::Add,
        TokenKind::Minus | TokenKind::MinusAssign => BinaryOp::Sub,
        TokenKind::Star | TokenKind::StarAssign => BinaryOp::Mul,
        TokenKind::Slash | TokenKind::DivAssign => BinaryOp::Div,
        TokenKind::Percent | TokenKind::ModAssign => BinaryOp::Mod,
        TokenKind::LeftShift | TokenKind::LeftShiftAssign => BinaryOp::Shl,
        TokenKind::RightShift | TokenKind::RightShiftAssign => BinaryOp::Shr,
        TokenKind::And | TokenKind::AndAssign => BinaryOp::BitAnd,
        TokenKind::Or | TokenKind::OrAssign => BinaryOp::BitOr,
        TokenKind::Xor | TokenKind::XorAssign => BinaryOp::BitXor,
        TokenKind::Less => BinaryOp::Less,
        TokenKind::Greater => BinaryOp::Greater,
        TokenKind::LessEqual => BinaryOp::LessEqual,
        TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
        TokenKind::Equal => BinaryOp::Equal,
        TokenKind::NotEqual => BinaryOp::NotEqual,
        TokenKind::LogicAnd => BinaryOp::LogicAnd,
        TokenKind::LogicOr => BinaryOp::LogicOr,
        _ => return None,
    };
    Some(op)
}

impl Parser<'_, '_> {
    /// Full expression, comma operator included
    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_expression(BindingPower::MIN)
    }

    pub(crate) fn parse_assignment_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_expression(BindingPower::ASSIGNMENT)
    }

    pub(crate) fn parse_conditional_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_expression(BindingPower::CONDITIONAL)
    }

    pub(crate) fn parse_expression(&mut self, min_bp: BindingPower) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let kind = self.kind().clone();
            let Some((bp, assoc)) = binding_power(&kind) else {
                break;
            };
            if bp < min_bp {
                break;
            }
            let op_token = self.advance();
            let loc = op_token.loc;
            let rhs_bp = match assoc {
                Associativity::Left => bp.next(),
                Associativity::Right => bp,
            };

            let kind_expr = match kind {
                TokenKind::Question => {
                    let then = self.parse_expr()?;
                    self.expect(TokenKind::Colon)?;
                    let otherwise = self.parse_expression(BindingPower::CONDITIONAL)?;
                    ExprKind::Conditional(Box::new(left), Box::new(then), Box::new(otherwise))
                }
                TokenKind::Comma => {
                    let right = self.parse_expression(rhs_bp)?;
                    ExprKind::Comma(Box::new(left), Box::new(right))
                }
                TokenKind::Assign => {
                    let right = self.parse_expression(rhs_bp)?;
                    ExprKind::Assign(None, Box::new(left), Box::new(right))
                }
                ref other if bp == BindingPower::ASSIGNMENT => {
                    let right = self.parse_expression(rhs_bp)?;
                    ExprKind::Assign(binary_op(other), Box::new(left), Box::new(right))
                }
                ref other => {
                    let right = self.parse_expression(rhs_bp)?;
                    let op = binary_op(other).ok_or_else(|| ParseError::expected("expression", loc.clone()))?;
                    ExprKind::Binary(op, Box::new(left), Box::new(right))
                }
            };
            left = Expr { kind: kind_expr, loc };
        }

        Ok(left)
    }

    /// Prefix operators, casts, `sizeof`, then a postfix expression.
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let op = match self.kind() {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Star => Some(UnaryOp::Deref),
            TokenKind::And => Some(UnaryOp::AddrOf),
            TokenKind::Increment => Some(UnaryOp::PreInc),
            TokenKind::Decrement => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary(op, Box::new(operand)),
                loc,
            });
        }

        match self.kind() {
            TokenKind::Extension => {
                self.advance();
                self.parse_unary()
            }
            TokenKind::Sizeof => {
                self.advance();
                if self.is(&TokenKind::LeftParen) && self.is_type_name_start_at(1) {
                    self.advance();
                    let ty = self.parse_type_name()?;
                    self.expect(TokenKind::RightParen)?;
                    return Ok(Expr {
                        kind: ExprKind::SizeofType(ty),
                        loc,
                    });
                }
                let operand = self.parse_unary()?;
                Ok(Expr {
                    kind: ExprKind::SizeofExpr(Box::new(operand)),
                    loc,
                })
            }
            TokenKind::LeftParen if self.is_type_name_start_at(1) => {
                self.advance();
                let ty = self.parse_type_name()?;
                self.expect(TokenKind::RightParen)?;
                if self.is(&TokenKind::LeftBrace) {
                    return Err(ParseError::unsupported("compound literals are not supported", loc));
                }
                let operand = self.parse_unary()?;
                Ok(Expr {
                    kind: ExprKind::Cast(ty, Box::new(operand)),
                    loc,
                })
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let kind = match self.kind().clone() {
            TokenKind::IntegerConstant { value, unsigned, long } => {
                self.advance();
                ExprKind::IntLiteral { value, unsigned, long }
            }
            TokenKind::CharacterConstant(value) => {
                self.advance();
                ExprKind::CharLiteral(value)
            }
            TokenKind::StringLiteral(mut bytes) => {
                self.advance();
                // adjacent literals are concatenated
                while let TokenKind::StringLiteral(more) = self.kind() {
                    bytes.extend_from_slice(more);
                    self.advance();
                }
                ExprKind::StringLiteral(bytes)
            }
            TokenKind::Identifier(name) => {
                if self.typedef_type(&name).is_some() {
                    return Err(ParseError::syntax(
                        format!("unexpected type name '{}': expected expression", name),
                        loc,
                    ));
                }
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RightParen)?;
                return Ok(inner);
            }
            _ => return Err(ParseError::expected("expression", loc)),
        };
        Ok(Expr { kind, loc })
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        loop {
            let loc = self.loc();
            let kind = match self.kind() {
                TokenKind::LeftParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.is(&TokenKind::RightParen) {
                        loop {
                            args.push(self.parse_assignment_expression()?);
                            if !self.accept(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RightParen)?;
                    trace!("call with {} arguments", args.len());
                    ExprKind::Call(Box::new(expr), args)
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RightBracket)?;
                    ExprKind::Index(Box::new(expr), Box::new(index))
                }
                TokenKind::Increment => {
                    self.advance();
                    ExprKind::Unary(UnaryOp::PostInc, Box::new(expr))
                }
                TokenKind::Decrement => {
                    self.advance();
                    ExprKind::Unary(UnaryOp::PostDec, Box::new(expr))
                }
                TokenKind::Dot | TokenKind::Arrow => {
                    return Err(ParseError::unsupported(
                        "member access is not supported without struct types",
                        loc,
                    ));
                }
                _ => return Ok(expr),
            };
            expr = Expr { kind, loc };
        }
    }
}
