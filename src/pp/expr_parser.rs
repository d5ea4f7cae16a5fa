//! `#if` expression evaluation.
//!
//! Input is a directive's token list after `defined` has been folded and
//! macros expanded. Identifiers that survive evaluate to 0.

use crate::pp::pp_lexer::{PPToken, PPTokenKind};
use crate::pp::preprocessor::PPError;

#[derive(Debug)]
pub enum Expr {
    Number(i64),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
pub enum BinaryOp {
    LogicOr,
    LogicAnd,
    Or,
    Xor,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LeftShift,
    RightShift,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Comma,
}

#[derive(Debug, Clone, Copy)]
pub enum UnaryOp {
    Plus,
    Minus,
    Tilde,
    Not,
}

impl Expr {
    pub fn evaluate(&self) -> Result<i64, PPError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Binary(BinaryOp::LogicAnd, left, right) => {
                Ok((left.evaluate()? != 0 && right.evaluate()? != 0) as i64)
            }
            Expr::Binary(BinaryOp::LogicOr, left, right) => {
                Ok((left.evaluate()? != 0 || right.evaluate()? != 0) as i64)
            }
            Expr::Binary(op, left, right) => {
                let l = left.evaluate()?;
                let r = right.evaluate()?;
                let value = match op {
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::And => l & r,
                    BinaryOp::Equal => (l == r) as i64,
                    BinaryOp::NotEqual => (l != r) as i64,
                    BinaryOp::Less => (l < r) as i64,
                    BinaryOp::LessEqual => (l <= r) as i64,
                    BinaryOp::Greater => (l > r) as i64,
                    BinaryOp::GreaterEqual => (l >= r) as i64,
                    BinaryOp::LeftShift => l.wrapping_shl(r as u32),
                    BinaryOp::RightShift => l.wrapping_shr(r as u32),
                    BinaryOp::Plus => l.wrapping_add(r),
                    BinaryOp::Minus => l.wrapping_sub(r),
                    BinaryOp::Star => l.wrapping_mul(r),
                    BinaryOp::Slash | BinaryOp::Percent if r == 0 => return Err(PPError::DivisionByZero),
                    // INT64_MIN / -1 wraps
                    BinaryOp::Slash => l.wrapping_div(r),
                    BinaryOp::Percent => l.wrapping_rem(r),
                    BinaryOp::Comma => r,
                    BinaryOp::LogicAnd | BinaryOp::LogicOr => unreachable!("handled above"),
                };
                Ok(value)
            }
            Expr::Unary(op, operand) => {
                let o = operand.evaluate()?;
                Ok(match op {
                    UnaryOp::Plus => o,
                    UnaryOp::Minus => o.wrapping_neg(),
                    UnaryOp::Tilde => !o,
                    UnaryOp::Not => (o == 0) as i64,
                })
            }
            Expr::Conditional(cond, true_e, false_e) => {
                if cond.evaluate()? != 0 {
                    true_e.evaluate()
                } else {
                    false_e.evaluate()
                }
            }
        }
    }
}

/// Binary operators by precedence level, loosest first
const LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::LogicOr)],
    &[("&&", BinaryOp::LogicAnd)],
    &[("|", BinaryOp::Or)],
    &[("^", BinaryOp::Xor)],
    &[("&", BinaryOp::And)],
    &[("==", BinaryOp::Equal), ("!=", BinaryOp::NotEqual)],
    &[
        ("<", BinaryOp::Less),
        ("<=", BinaryOp::LessEqual),
        (">", BinaryOp::Greater),
        (">=", BinaryOp::GreaterEqual),
    ],
    &[("<<", BinaryOp::LeftShift), (">>", BinaryOp::RightShift)],
    &[("+", BinaryOp::Plus), ("-", BinaryOp::Minus)],
    &[("*", BinaryOp::Star), ("/", BinaryOp::Slash), ("%", BinaryOp::Percent)],
];

/// Expression parser for preprocessor arithmetic
pub struct ExpressionParser<'a> {
    tokens: &'a [PPToken],
    pos: usize,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(tokens: &'a [PPToken]) -> Self {
        ExpressionParser { tokens, pos: 0 }
    }

    /// Parse the whole token list as one expression.
    pub fn parse_all(mut self) -> Result<Expr, PPError> {
        if self.tokens.is_empty() {
            return Err(PPError::MissingExpression);
        }
        let expr = self.parse_comma()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some(tok) => Err(PPError::InvalidExpressionToken(tok.text.clone())),
        }
    }

    fn peek_punct(&self, p: &str) -> bool {
        self.tokens.get(self.pos).is_some_and(|t| t.is_punct(p))
    }

    fn parse_comma(&mut self) -> Result<Expr, PPError> {
        let mut left = self.parse_conditional()?;
        while self.peek_punct(",") {
            self.pos += 1;
            let right = self.parse_conditional()?;
            left = Expr::Binary(BinaryOp::Comma, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_conditional(&mut self) -> Result<Expr, PPError> {
        let cond = self.parse_binary(0)?;
        if !self.peek_punct("?") {
            return Ok(cond);
        }
        self.pos += 1;
        let true_e = self.parse_comma()?;
        if !self.peek_punct(":") {
            return Err(PPError::ExpectedColon);
        }
        self.pos += 1;
        let false_e = self.parse_conditional()?;
        Ok(Expr::Conditional(Box::new(cond), Box::new(true_e), Box::new(false_e)))
    }

    fn parse_binary(&mut self, level: usize) -> Result<Expr, PPError> {
        if level == LEVELS.len() {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(level + 1)?;
        loop {
            let op = self.tokens.get(self.pos).and_then(|tok| {
                LEVELS[level]
                    .iter()
                    .find(|(spelling, _)| tok.is_punct(spelling))
                    .map(|(_, op)| *op)
            });
            let Some(op) = op else { break };
            self.pos += 1;
            let right = self.parse_binary(level + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, PPError> {
        let op = match self.tokens.get(self.pos) {
            Some(t) if t.is_punct("+") => Some(UnaryOp::Plus),
            Some(t) if t.is_punct("-") => Some(UnaryOp::Minus),
            Some(t) if t.is_punct("~") => Some(UnaryOp::Tilde),
            Some(t) if t.is_punct("!") => Some(UnaryOp::Not),
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
            }
            None => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, PPError> {
        let token = self.tokens.get(self.pos).ok_or(PPError::MissingExpression)?;
        self.pos += 1;
        match token.kind {
            PPTokenKind::Number => parse_integer(&token.text).map(Expr::Number),
            PPTokenKind::CharLiteral => Ok(Expr::Number(char_value(&token.text))),
            PPTokenKind::Identifier => Ok(Expr::Number(0)),
            PPTokenKind::Punct if token.text == "(" => {
                let result = self.parse_comma()?;
                if !self.peek_punct(")") {
                    return Err(PPError::ExpectedRightParen);
                }
                self.pos += 1;
                Ok(result)
            }
            _ => Err(PPError::InvalidExpressionToken(token.text.clone())),
        }
    }
}

/// Value of an integer pp-number, suffixes ignored.
pub fn parse_integer(text: &str) -> Result<i64, PPError> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<u64>()
    };
    parsed
        .map(|v| v as i64)
        .map_err(|_| PPError::InvalidInteger(text.to_string()))
}

/// Value of a simple character constant such as `'a'` or `'\n'`.
pub fn char_value(text: &str) -> i64 {
    let body = text
        .trim_start_matches(['L', 'u', 'U', '8'])
        .trim_start_matches('\'')
        .trim_end_matches('\'');
    let mut chars = body.chars();
    match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => 10,
            Some('t') => 9,
            Some('r') => 13,
            Some(d) if d.is_digit(8) => std::iter::once(d)
                .chain(chars.take_while(|c| c.is_digit(8)))
                .take(3)
                .fold(0, |acc, c| acc * 8 + c.to_digit(8).unwrap_or(0) as i64),
            Some('a') => 7,
            Some('b') => 8,
            Some('f') => 12,
            Some('v') => 11,
            Some('x') => i64::from_str_radix(chars.as_str(), 16).unwrap_or(0),
            Some(c) => c as i64,
            None => 0,
        },
        Some(c) => c as i64,
        None => 0,
    }
}
