//! Constant expression evaluation over the typed tree
//!
//! Used for array bounds, enumerator values, case labels, `_Static_assert`
//! and static initializers. Address constants (`&global + 4`, `"str"`,
//! function names) are only meaningful for initializers.

use super::typed_ast::{BinOp, SymbolTarget, TExpr, TExprKind, UnOp};
use crate::types::CType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstValue {
    Int(i64),
    Addr { target: SymbolTarget, offset: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstError {
    NotConstant,
    DivisionByZero,
}

/// Reinterpret `value` as an object of type `ty` (truncate, then sign or zero extend)
pub fn truncate(value: i64, ty: &CType) -> i64 {
    if matches!(ty, CType::Bool) {
        return (value != 0) as i64;
    }
    let bits = ty.size() * 8;
    if bits == 0 || bits >= 64 {
        return value;
    }
    let shift = 64 - bits;
    if ty.is_signed() {
        (value << shift) >> shift
    } else {
        ((value as u64) << shift >> shift) as i64
    }
}

pub fn eval(expr: &TExpr) -> Result<ConstValue, ConstError> {
    match &expr.kind {
        TExprKind::Const(v) => Ok(ConstValue::Int(*v)),
        TExprKind::FuncAddr(name) => Ok(ConstValue::Addr {
            target: SymbolTarget::Function(name.clone()),
            offset: 0,
        }),
        TExprKind::AddrOf(inner) => address_of(inner),
        TExprKind::Cast(inner) => match eval(inner)? {
            ConstValue::Int(v) => Ok(ConstValue::Int(truncate(v, &expr.ty))),
            addr if expr.ty.is_pointer() || expr.ty.size() == 8 => Ok(addr),
            _ => Err(ConstError::NotConstant),
        },
        TExprKind::Unary(op, operand) => {
            let v = eval_int(operand)?;
            let result = match op {
                UnOp::Neg => v.wrapping_neg(),
                UnOp::BitNot => !v,
                UnOp::LogNot => (v == 0) as i64,
            };
            Ok(ConstValue::Int(truncate(result, &expr.ty)))
        }
        TExprKind::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, &expr.ty),
        TExprKind::Logical { and, lhs, rhs } => {
            let l = truthy(&eval(lhs)?);
            let result = if *and {
                l && truthy(&eval(rhs)?)
            } else {
                l || truthy(&eval(rhs)?)
            };
            Ok(ConstValue::Int(result as i64))
        }
        TExprKind::Conditional(cond, a, b) => {
            if truthy(&eval(cond)?) {
                eval(a)
            } else {
                eval(b)
            }
        }
        _ => Err(ConstError::NotConstant),
    }
}

/// Evaluate an integer constant expression
pub fn eval_int(expr: &TExpr) -> Result<i64, ConstError> {
    match eval(expr)? {
        ConstValue::Int(v) => Ok(v),
        ConstValue::Addr { .. } => Err(ConstError::NotConstant),
    }
}

fn truthy(value: &ConstValue) -> bool {
    match value {
        ConstValue::Int(v) => *v != 0,
        ConstValue::Addr { .. } => true,
    }
}

fn address_of(lvalue: &TExpr) -> Result<ConstValue, ConstError> {
    let target = match &lvalue.kind {
        TExprKind::Global(name) => SymbolTarget::Global(name.clone()),
        TExprKind::StringLit(index) => SymbolTarget::String(*index),
        TExprKind::Function(name) => SymbolTarget::Function(name.clone()),
        TExprKind::Deref(pointer) => return eval(pointer),
        _ => return Err(ConstError::NotConstant),
    };
    Ok(ConstValue::Addr { target, offset: 0 })
}

fn eval_binary(op: BinOp, lhs: &TExpr, rhs: &TExpr, ty: &CType) -> Result<ConstValue, ConstError> {
    let l = eval(lhs)?;
    let r = eval(rhs)?;
    let (a, b) = match (l, r) {
        (ConstValue::Int(a), ConstValue::Int(b)) => (a, b),
        (ConstValue::Addr { target, offset }, ConstValue::Int(b)) => {
            return match op {
                BinOp::Add => Ok(ConstValue::Addr {
                    target,
                    offset: offset.wrapping_add(b),
                }),
                BinOp::Sub => Ok(ConstValue::Addr {
                    target,
                    offset: offset.wrapping_sub(b),
                }),
                _ => Err(ConstError::NotConstant),
            };
        }
        (ConstValue::Int(a), ConstValue::Addr { target, offset }) if op == BinOp::Add => {
            return Ok(ConstValue::Addr {
                target,
                offset: offset.wrapping_add(a),
            });
        }
        _ => return Err(ConstError::NotConstant),
    };

    let signed = lhs.ty.is_signed();
    let result = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(ConstError::DivisionByZero),
        BinOp::Div if signed => a.wrapping_div(b),
        BinOp::Div => ((a as u64) / (b as u64)) as i64,
        BinOp::Rem if signed => a.wrapping_rem(b),
        BinOp::Rem => ((a as u64) % (b as u64)) as i64,
        BinOp::Shl => a.wrapping_shl(b as u32),
        BinOp::Shr if signed => a.wrapping_shr(b as u32),
        BinOp::Shr => (truncate(a, &lhs.ty) as u64).wrapping_shr(b as u32) as i64,
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt if signed => (a < b) as i64,
        BinOp::Lt => ((a as u64) < (b as u64)) as i64,
        BinOp::Le if signed => (a <= b) as i64,
        BinOp::Le => ((a as u64) <= (b as u64)) as i64,
        BinOp::Gt if signed => (a > b) as i64,
        BinOp::Gt => ((a as u64) > (b as u64)) as i64,
        BinOp::Ge if signed => (a >= b) as i64,
        BinOp::Ge => ((a as u64) >= (b as u64)) as i64,
    };
    Ok(ConstValue::Int(truncate(result, ty)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> TExpr {
        TExpr::constant(v, CType::INT)
    }

    #[test]
    fn truncation_follows_the_target_type() {
        assert_eq!(truncate(300, &CType::Char { signed: false }), 44);
        assert_eq!(truncate(200, &CType::CHAR), -56);
        assert_eq!(truncate(-1, &CType::UINT), 0xffff_ffff);
        assert_eq!(truncate(7, &CType::Bool), 1);
    }

    #[test]
    fn division_by_zero_is_reported() {
        let e = TExpr::new(TExprKind::Binary(BinOp::Div, Box::new(int(1)), Box::new(int(0))), CType::INT);
        assert_eq!(eval(&e), Err(ConstError::DivisionByZero));
    }

    #[test]
    fn address_plus_offset() {
        let global = TExpr::new(TExprKind::Global("table".into()), CType::INT);
        let addr = TExpr::new(TExprKind::AddrOf(Box::new(global)), CType::pointer_to(CType::INT));
        let sum = TExpr::new(
            TExprKind::Binary(BinOp::Add, Box::new(addr), Box::new(TExpr::constant(8, CType::LONG))),
            CType::pointer_to(CType::INT),
        );
        assert_eq!(
            eval(&sum),
            Ok(ConstValue::Addr {
                target: SymbolTarget::Global("table".into()),
                offset: 8
            })
        );
    }
}
