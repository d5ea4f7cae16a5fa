//! Assembler expressions, evaluated while they are parsed.
//!
//! Precedence follows GNU as: unary operators bind tightest, then
//! `* / % << >>`, then `& | ^`, then `+ -`.

use super::lexer::{TokenCursor, TokenKind};
use super::parser::AsmError;

/// Result of an expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Abs(i64),
    /// A place in a section known right now: `.` or a `.L` label
    Loc { section: usize, offset: i64 },
    /// Named symbol plus addend; `defined` is the symbol's place when already known
    Sym {
        name: String,
        addend: i64,
        defined: Option<(usize, i64)>,
    },
}

impl Value {
    /// Section and offset the value refers to, when known
    fn place(&self) -> Option<(usize, i64)> {
        match self {
            Value::Abs(_) => None,
            Value::Loc { section, offset } => Some((*section, *offset)),
            Value::Sym { addend, defined, .. } => defined.map(|(section, offset)| (section, offset + addend)),
        }
    }

    fn add_constant(self, n: i64) -> Value {
        match self {
            Value::Abs(v) => Value::Abs(v.wrapping_add(n)),
            Value::Loc { section, offset } => Value::Loc {
                section,
                offset: offset.wrapping_add(n),
            },
            Value::Sym { name, addend, defined } => Value::Sym {
                name,
                addend: addend.wrapping_add(n),
                defined,
            },
        }
    }
}

/// Symbol lookup during evaluation
pub(crate) trait SymbolEnv {
    /// Value of `name`; `.` is the current location.
    fn resolve(&mut self, name: &str) -> Value;
}

pub(crate) fn parse_expr(cursor: &mut TokenCursor<'_>, env: &mut dyn SymbolEnv) -> Result<Value, AsmError> {
    let mut lhs = parse_bitwise(cursor, env)?;
    loop {
        let op = match cursor.peek_punct() {
            Some(op @ ("+" | "-")) => op,
            _ => return Ok(lhs),
        };
        let loc = cursor.loc();
        cursor.advance();
        let rhs = parse_bitwise(cursor, env)?;
        lhs = if op == "+" {
            match (lhs, rhs) {
                (Value::Abs(n), other) | (other, Value::Abs(n)) => other.add_constant(n),
                _ => return Err(AsmError::new(loc, "cannot add two relocatable values")),
            }
        } else {
            subtract(lhs, rhs).ok_or_else(|| {
                AsmError::new(loc, "cannot subtract values that are not in the same section")
            })?
        };
    }
}

fn subtract(lhs: Value, rhs: Value) -> Option<Value> {
    if let Value::Abs(n) = rhs {
        return Some(lhs.add_constant(n.wrapping_neg()));
    }
    let (lsec, loff) = lhs.place()?;
    let (rsec, roff) = rhs.place()?;
    (lsec == rsec).then(|| Value::Abs(loff - roff))
}

fn parse_bitwise(cursor: &mut TokenCursor<'_>, env: &mut dyn SymbolEnv) -> Result<Value, AsmError> {
    let mut lhs = parse_multiplicative(cursor, env)?;
    while let Some(op @ ("&" | "|" | "^")) = cursor.peek_punct() {
        let loc = cursor.loc();
        cursor.advance();
        let rhs = parse_multiplicative(cursor, env)?;
        let (l, r) = absolute_operands(op, lhs, rhs).map_err(|msg| AsmError::new(loc, msg))?;
        lhs = Value::Abs(match op {
            "&" => l & r,
            "|" => l | r,
            _ => l ^ r,
        });
    }
    Ok(lhs)
}

fn parse_multiplicative(cursor: &mut TokenCursor<'_>, env: &mut dyn SymbolEnv) -> Result<Value, AsmError> {
    let mut lhs = parse_unary(cursor, env)?;
    while let Some(op @ ("*" | "/" | "%" | "<<" | ">>")) = cursor.peek_punct() {
        let loc = cursor.loc();
        cursor.advance();
        let rhs = parse_unary(cursor, env)?;
        let (l, r) = absolute_operands(op, lhs, rhs).map_err(|msg| AsmError::new(loc.clone(), msg))?;
        let value = match op {
            "*" => Some(l.wrapping_mul(r)),
            "/" | "%" if r == 0 => None,
            "/" => Some(l.wrapping_div(r)),
            "%" => Some(l.wrapping_rem(r)),
            "<<" => Some(l.wrapping_shl(r as u32)),
            _ => Some(l.wrapping_shr(r as u32)),
        };
        lhs = Value::Abs(value.ok_or_else(|| AsmError::new(loc, "division by zero"))?);
    }
    Ok(lhs)
}

fn absolute_operands(op: &str, lhs: Value, rhs: Value) -> Result<(i64, i64), String> {
    match (lhs, rhs) {
        (Value::Abs(l), Value::Abs(r)) => Ok((l, r)),
        _ => Err(format!("operands of '{}' must be absolute", op)),
    }
}

fn parse_unary(cursor: &mut TokenCursor<'_>, env: &mut dyn SymbolEnv) -> Result<Value, AsmError> {
    let loc = cursor.loc();
    match cursor.peek_punct() {
        Some(op @ ("-" | "~" | "!" | "+")) => {
            cursor.advance();
            let operand = parse_unary(cursor, env)?;
            if op == "+" {
                return Ok(operand);
            }
            let Value::Abs(n) = operand else {
                return Err(AsmError::new(loc, format!("operand of unary '{}' must be absolute", op)));
            };
            Ok(Value::Abs(match op {
                "-" => n.wrapping_neg(),
                "~" => !n,
                _ => (n == 0) as i64,
            }))
        }
        _ => parse_primary(cursor, env),
    }
}

fn parse_primary(cursor: &mut TokenCursor<'_>, env: &mut dyn SymbolEnv) -> Result<Value, AsmError> {
    let loc = cursor.loc();
    match cursor.next().map(|t| &t.kind) {
        Some(TokenKind::Int(n)) => Ok(Value::Abs(*n)),
        Some(TokenKind::Ident(name)) => Ok(env.resolve(name)),
        Some(TokenKind::Punct("(")) => {
            let value = parse_expr(cursor, env)?;
            cursor.expect_punct(")")?;
            Ok(value)
        }
        Some(_) => Err(AsmError::new(loc, "malformed expression")),
        None => Err(AsmError::new(loc, "expected expression")),
    }
}

/// Parse an expression that must fold to a constant
pub(crate) fn parse_absolute(cursor: &mut TokenCursor<'_>, env: &mut dyn SymbolEnv) -> Result<i64, AsmError> {
    let loc = cursor.loc();
    match parse_expr(cursor, env)? {
        Value::Abs(n) => Ok(n),
        _ => Err(AsmError::new(loc, "expected absolute expression")),
    }
}
