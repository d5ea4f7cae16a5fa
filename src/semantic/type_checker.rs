//! Expression type checking
//!
//! Every expression is checked bottom-up into a [`TExpr`]. Lvalues keep their
//! object type until [`Analyzer::rvalue`] applies lvalue conversion, which is
//! also where arrays and function designators decay to pointers.

use log::trace;

use super::const_eval::{self, ConstValue};
use super::symbol_table::Symbol;
use super::typed_ast::*;
use super::{Analyzer, Reported, SemaResult};
use crate::diagnostic::SourceLoc;
use crate::parser::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::types::{CType, FunctionType};

/// Where an implicit conversion happens, for the wording of diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignContext {
    Assigning,
    Initializing,
    Passing,
    Returning,
}

impl AssignContext {
    fn describe(self, target: &CType, source: &CType) -> String {
        match self {
            AssignContext::Assigning => format!("assigning to '{}' from '{}'", target, source),
            AssignContext::Initializing => {
                format!("initializing '{}' with an expression of type '{}'", target, source)
            }
            AssignContext::Passing => format!("passing '{}' to parameter of type '{}'", source, target),
            AssignContext::Returning => {
                format!("returning '{}' from a function with result type '{}'", source, target)
            }
        }
    }

    fn incompatible(self, target: &CType, source: &CType) -> String {
        match self {
            AssignContext::Assigning => format!("assigning to '{}' from incompatible type '{}'", target, source),
            AssignContext::Initializing => format!(
                "initializing '{}' with an expression of incompatible type '{}'",
                target, source
            ),
            AssignContext::Passing => {
                format!("passing '{}' to parameter of incompatible type '{}'", source, target)
            }
            AssignContext::Returning => format!(
                "returning '{}' from a function with incompatible result type '{}'",
                source, target
            ),
        }
    }
}

/// Type of an integer literal: the first of the candidate types that holds the value
fn literal_type(value: u64, unsigned: bool, long: bool) -> CType {
    let fits_int = value <= i32::MAX as u64;
    let fits_uint = value <= u32::MAX as u64;
    let fits_long = value <= i64::MAX as u64;
    match (unsigned, long) {
        (false, false) if fits_int => CType::INT,
        (false, _) if fits_long => CType::LONG,
        (true, false) if fits_uint => CType::UINT,
        _ => CType::ULONG,
    }
}

/// Replace an operation on constants by its value
fn fold(expr: TExpr) -> TExpr {
    if matches!(
        expr.kind,
        TExprKind::Unary(..) | TExprKind::Binary(..) | TExprKind::Logical { .. } | TExprKind::Conditional(..)
    ) {
        if let Ok(ConstValue::Int(v)) = const_eval::eval(&expr) {
            return TExpr::constant(v, expr.ty);
        }
    }
    expr
}

/// Implicit or explicit conversion of a scalar to `ty`
pub(super) fn cast_to(expr: TExpr, ty: &CType) -> TExpr {
    if expr.ty == *ty {
        return expr;
    }
    if let TExprKind::Const(v) = expr.kind {
        if ty.is_integer() || ty.is_pointer() {
            return TExpr::constant(const_eval::truncate(v, ty), ty.clone());
        }
    }
    TExpr::new(TExprKind::Cast(Box::new(expr)), ty.clone())
}

fn is_null_constant(expr: &TExpr) -> bool {
    (expr.ty.is_integer() || expr.ty.pointee().is_some_and(CType::is_void))
        && matches!(const_eval::eval(expr), Ok(ConstValue::Int(0)))
}

fn binop(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Rem,
        BinaryOp::Shl => BinOp::Shl,
        BinaryOp::Shr => BinOp::Shr,
        BinaryOp::BitAnd => BinOp::And,
        BinaryOp::BitOr => BinOp::Or,
        BinaryOp::BitXor => BinOp::Xor,
        BinaryOp::Less => BinOp::Lt,
        BinaryOp::Greater => BinOp::Gt,
        BinaryOp::LessEqual => BinOp::Le,
        BinaryOp::GreaterEqual => BinOp::Ge,
        BinaryOp::Equal => BinOp::Eq,
        BinaryOp::NotEqual => BinOp::Ne,
        // handled as `TExprKind::Logical`
        BinaryOp::LogicAnd | BinaryOp::LogicOr => BinOp::And,
    }
}

impl Analyzer<'_> {
    /// Check an expression and apply lvalue conversion.
    pub(crate) fn rvalue_expr(&mut self, expr: &Expr) -> SemaResult<TExpr> {
        let e = self.expr(expr)?;
        Ok(self.rvalue(e))
    }

    /// Lvalue conversion plus array and function decay
    pub(super) fn rvalue(&self, e: TExpr) -> TExpr {
        if let CType::Array(elem, _) = &e.ty {
            let ty = CType::pointer_to((**elem).clone());
            return TExpr::new(TExprKind::AddrOf(Box::new(e)), ty);
        }
        if !e.ty.is_function() {
            return e;
        }
        let ty = CType::pointer_to(e.ty.clone());
        match e.kind {
            TExprKind::Function(name) => TExpr::new(TExprKind::FuncAddr(name), ty),
            TExprKind::Deref(inner) => *inner,
            kind => TExpr::new(kind, e.ty),
        }
    }

    pub(super) fn expr(&mut self, expr: &Expr) -> SemaResult<TExpr> {
        let loc = &expr.loc;
        match &expr.kind {
            ExprKind::IntLiteral { value, unsigned, long } => {
                let ty = literal_type(*value, *unsigned, *long);
                Ok(TExpr::constant(const_eval::truncate(*value as i64, &ty), ty))
            }
            ExprKind::CharLiteral(v) => Ok(TExpr::constant(*v, CType::INT)),
            ExprKind::StringLiteral(bytes) => {
                let index = self.intern_string(bytes);
                let ty = CType::Array(Box::new(CType::CHAR), Some(bytes.len() as u64 + 1));
                Ok(TExpr::new(TExprKind::StringLit(index), ty))
            }
            ExprKind::Ident(name) => self.identifier(name, loc),
            ExprKind::Unary(op, operand) => self.unary(*op, operand, loc),
            ExprKind::Binary(BinaryOp::LogicAnd, lhs, rhs) => self.logical(true, lhs, rhs),
            ExprKind::Binary(BinaryOp::LogicOr, lhs, rhs) => self.logical(false, lhs, rhs),
            ExprKind::Binary(op, lhs, rhs) => {
                let l = self.rvalue_expr(lhs)?;
                let r = self.rvalue_expr(rhs)?;
                self.binary(*op, l, r, loc)
            }
            ExprKind::Assign(None, lhs, rhs) => {
                let target = self.expr(lhs)?;
                self.check_modifiable(&target, &lhs.loc)?;
                let value = self.rvalue_expr(rhs)?;
                let value = self.convert_assign(value, &target.ty, AssignContext::Assigning, loc)?;
                let ty = target.ty.clone();
                Ok(TExpr::new(TExprKind::Assign(Box::new(target), Box::new(value)), ty))
            }
            ExprKind::Assign(Some(op), lhs, rhs) => self.compound_assign(*op, lhs, rhs, loc),
            ExprKind::Conditional(cond, a, b) => self.conditional(cond, a, b, loc),
            ExprKind::Call(callee, args) => self.call(callee, args, loc),
            ExprKind::Index(base, index) => {
                let base = self.rvalue_expr(base)?;
                let index = self.rvalue_expr(index)?;
                let (ptr, idx) = if base.ty.is_pointer() && index.ty.is_integer() {
                    (base, index)
                } else if index.ty.is_pointer() && base.ty.is_integer() {
                    (index, base)
                } else {
                    return Err(self.error(loc, "subscripted value is not an array, pointer, or vector"));
                };
                if ptr.ty.pointee().is_some_and(CType::is_void) {
                    return Err(self.error(loc, "subscript of pointer to incomplete type 'void'"));
                }
                let address = self.pointer_offset(ptr, idx, false, loc)?;
                self.deref(address, loc)
            }
            ExprKind::Cast(parsed, operand) => {
                let ty = self.resolve_type(parsed, loc)?;
                let value = self.rvalue_expr(operand)?;
                if ty.is_void() {
                    return Ok(TExpr::new(TExprKind::Cast(Box::new(value)), CType::Void));
                }
                if !ty.is_scalar() {
                    return Err(self.error(
                        loc,
                        format!("used type '{}' where arithmetic or pointer type is required", ty),
                    ));
                }
                if !value.ty.is_scalar() {
                    return Err(self.error(
                        loc,
                        format!("operand of type '{}' where arithmetic or pointer type is required", value.ty),
                    ));
                }
                Ok(cast_to(value, &ty))
            }
            ExprKind::SizeofExpr(operand) => {
                let value = self.expr(operand)?;
                self.size_of(&value.ty, loc)
            }
            ExprKind::SizeofType(parsed) => {
                let ty = self.resolve_type(parsed, loc)?;
                self.size_of(&ty, loc)
            }
            ExprKind::Comma(lhs, rhs) => {
                let l = self.rvalue_expr(lhs)?;
                let r = self.rvalue_expr(rhs)?;
                let ty = r.ty.clone();
                Ok(TExpr::new(TExprKind::Comma(Box::new(l), Box::new(r)), ty))
            }
        }
    }

    fn identifier(&mut self, name: &str, loc: &SourceLoc) -> SemaResult<TExpr> {
        match self.symbols.lookup(name).cloned() {
            Some(Symbol::Local { id, ty }) => {
                let ty = self.locals.get(id).map_or(ty, |l| l.ty.clone());
                Ok(TExpr::new(TExprKind::Local(id), ty))
            }
            Some(Symbol::Global { link_name, ty }) => {
                let ty = self.globals.get(&link_name).map_or(ty, |g| g.ty.clone());
                Ok(TExpr::new(TExprKind::Global(link_name), ty))
            }
            Some(Symbol::Function { name }) => {
                let Some(decl) = self.functions.get(&name) else {
                    return Err(self.error(loc, format!("use of undeclared identifier '{}'", name)));
                };
                let ty = CType::Function(decl.ty.clone());
                Ok(TExpr::new(TExprKind::Function(name), ty))
            }
            Some(Symbol::EnumConstant(v)) => Ok(TExpr::constant(v, CType::INT)),
            Some(Symbol::Typedef) => Err(self.error(
                loc,
                format!("unexpected type name '{}': expected expression", name),
            )),
            None => Err(self.error(loc, format!("use of undeclared identifier '{}'", name))),
        }
    }

    fn size_of(&mut self, ty: &CType, loc: &SourceLoc) -> SemaResult<TExpr> {
        let size = match ty {
            CType::Function(_) => {
                return Err(self.error(loc, "invalid application of 'sizeof' to a function type"));
            }
            CType::Void => {
                self.warning(loc, "pointer-arith", "invalid application of 'sizeof' to a void type");
                1
            }
            _ if !ty.is_complete() => {
                return Err(self.error(
                    loc,
                    format!("invalid application of 'sizeof' to an incomplete type '{}'", ty),
                ));
            }
            _ => ty.size(),
        };
        Ok(TExpr::constant(size as i64, CType::ULONG))
    }

    fn deref(&mut self, pointer: TExpr, loc: &SourceLoc) -> SemaResult<TExpr> {
        let Some(pointee) = pointer.ty.pointee().cloned() else {
            return Err(self.error(
                loc,
                format!("indirection requires pointer operand ('{}' invalid)", pointer.ty),
            ));
        };
        if pointee.is_void() {
            return Err(self.error(loc, "incomplete type 'void' where a complete type is required"));
        }
        Ok(TExpr::new(TExprKind::Deref(Box::new(pointer)), pointee))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, loc: &SourceLoc) -> SemaResult<TExpr> {
        match op {
            UnaryOp::AddrOf => {
                let value = self.expr(operand)?;
                let ty = CType::pointer_to(value.ty.clone());
                match value.kind {
                    TExprKind::Function(name) => Ok(TExpr::new(TExprKind::FuncAddr(name), ty)),
                    TExprKind::Deref(inner) => Ok(TExpr::new(inner.kind, ty)),
                    kind @ (TExprKind::Local(_) | TExprKind::Global(_) | TExprKind::StringLit(_)) => {
                        let object = TExpr::new(kind, value.ty);
                        Ok(TExpr::new(TExprKind::AddrOf(Box::new(object)), ty))
                    }
                    _ => Err(self.error(
                        loc,
                        format!("cannot take the address of an rvalue of type '{}'", value.ty),
                    )),
                }
            }
            UnaryOp::Deref => {
                let pointer = self.rvalue_expr(operand)?;
                if pointer.ty.pointee().is_some_and(CType::is_function) {
                    // `*f` designates the function again
                    let ty = pointer.ty.pointee().cloned().unwrap_or(CType::Void);
                    return Ok(TExpr::new(TExprKind::Deref(Box::new(pointer)), ty));
                }
                self.deref(pointer, loc)
            }
            UnaryOp::Plus | UnaryOp::Minus | UnaryOp::BitNot => {
                let value = self.rvalue_expr(operand)?;
                if !value.ty.is_integer() {
                    return Err(self.error(
                        loc,
                        format!("invalid argument type '{}' to unary expression", value.ty),
                    ));
                }
                let ty = value.ty.promote();
                let value = cast_to(value, &ty);
                let op = match op {
                    UnaryOp::Plus => return Ok(value),
                    UnaryOp::Minus => UnOp::Neg,
                    _ => UnOp::BitNot,
                };
                Ok(fold(TExpr::new(TExprKind::Unary(op, Box::new(value)), ty)))
            }
            UnaryOp::Not => {
                let value = self.rvalue_expr(operand)?;
                if !value.ty.is_scalar() {
                    return Err(self.error(
                        loc,
                        format!("invalid argument type '{}' to unary expression", value.ty),
                    ));
                }
                Ok(fold(TExpr::new(TExprKind::Unary(UnOp::LogNot, Box::new(value)), CType::INT)))
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let target = self.expr(operand)?;
                self.check_modifiable(&target, &operand.loc)?;
                if !target.ty.is_scalar() {
                    return Err(self.error(
                        loc,
                        format!("cannot increment value of type '{}'", target.ty),
                    ));
                }
                let step = match target.ty.pointee() {
                    Some(pointee) => self.pointee_size(pointee, loc)? as i64,
                    None => 1,
                };
                let delta = if matches!(op, UnaryOp::PreDec | UnaryOp::PostDec) {
                    -step
                } else {
                    step
                };
                let ty = target.ty.clone();
                Ok(TExpr::new(
                    TExprKind::IncDec {
                        target: Box::new(target),
                        delta,
                        prefix: matches!(op, UnaryOp::PreInc | UnaryOp::PreDec),
                    },
                    ty,
                ))
            }
        }
    }

    fn logical(&mut self, and: bool, lhs: &Expr, rhs: &Expr) -> SemaResult<TExpr> {
        let l = self.rvalue_expr(lhs)?;
        let r = self.rvalue_expr(rhs)?;
        for (value, loc) in [(&l, &lhs.loc), (&r, &rhs.loc)] {
            if !value.ty.is_scalar() {
                let message = format!("invalid operands to binary expression ('{}' and '{}')", l.ty, r.ty);
                return Err(self.error(loc, message));
            }
        }
        Ok(fold(TExpr::new(
            TExprKind::Logical {
                and,
                lhs: Box::new(l),
                rhs: Box::new(r),
            },
            CType::INT,
        )))
    }

    /// Size used to scale pointer arithmetic over `pointee`
    fn pointee_size(&mut self, pointee: &CType, loc: &SourceLoc) -> SemaResult<u64> {
        match pointee {
            CType::Void => {
                self.warning(loc, "pointer-arith", "arithmetic on a pointer to void is a GNU extension");
                Ok(1)
            }
            CType::Function(_) => {
                self.warning(
                    loc,
                    "pointer-arith",
                    "arithmetic on a pointer to a function type is a GNU extension",
                );
                Ok(1)
            }
            ty if !ty.is_complete() => Err(self.error(
                loc,
                format!("arithmetic on a pointer to an incomplete type '{}'", ty),
            )),
            ty => Ok(ty.size()),
        }
    }

    /// `ptr + idx` or `ptr - idx` with the index scaled by the pointee size
    fn pointer_offset(&mut self, ptr: TExpr, idx: TExpr, negate: bool, loc: &SourceLoc) -> SemaResult<TExpr> {
        let pointee = ptr.ty.pointee().cloned().unwrap_or(CType::Void);
        let size = self.pointee_size(&pointee, loc)?;
        let offset = self.scaled_index(idx, size);
        let op = if negate { BinOp::Sub } else { BinOp::Add };
        let ty = ptr.ty.clone();
        Ok(TExpr::new(TExprKind::Binary(op, Box::new(ptr), Box::new(offset)), ty))
    }

    fn scaled_index(&self, idx: TExpr, size: u64) -> TExpr {
        let idx = cast_to(idx, &CType::LONG);
        if size == 1 {
            return idx;
        }
        fold(TExpr::new(
            TExprKind::Binary(
                BinOp::Mul,
                Box::new(idx),
                Box::new(TExpr::constant(size as i64, CType::LONG)),
            ),
            CType::LONG,
        ))
    }

    fn invalid_operands(&mut self, l: &CType, r: &CType, loc: &SourceLoc) -> Reported {
        self.error(
            loc,
            format!("invalid operands to binary expression ('{}' and '{}')", l, r),
        )
    }

    pub(super) fn binary(&mut self, op: BinaryOp, l: TExpr, r: TExpr, loc: &SourceLoc) -> SemaResult<TExpr> {
        let bin = binop(op);
        match op {
            BinaryOp::Add | BinaryOp::Sub if l.ty.is_pointer() && r.ty.is_integer() => {
                return self.pointer_offset(l, r, op == BinaryOp::Sub, loc);
            }
            BinaryOp::Add if l.ty.is_integer() && r.ty.is_pointer() => {
                return self.pointer_offset(r, l, false, loc);
            }
            BinaryOp::Sub if l.ty.is_pointer() && r.ty.is_pointer() => {
                let (lp, rp) = (l.ty.pointee().cloned(), r.ty.pointee().cloned());
                let (Some(lp), Some(rp)) = (lp, rp) else {
                    return Err(self.invalid_operands(&l.ty, &r.ty, loc));
                };
                if !lp.is_compatible(&rp) || lp.is_void() != rp.is_void() {
                    return Err(self.error(
                        loc,
                        format!("'{}' and '{}' are not pointers to compatible types", l.ty, r.ty),
                    ));
                }
                let size = self.pointee_size(&lp, loc)?;
                let diff = TExpr::new(
                    TExprKind::Binary(
                        BinOp::Sub,
                        Box::new(cast_to(l, &CType::LONG)),
                        Box::new(cast_to(r, &CType::LONG)),
                    ),
                    CType::LONG,
                );
                if size <= 1 {
                    return Ok(diff);
                }
                return Ok(TExpr::new(
                    TExprKind::Binary(
                        BinOp::Div,
                        Box::new(diff),
                        Box::new(TExpr::constant(size as i64, CType::LONG)),
                    ),
                    CType::LONG,
                ));
            }
            _ => {}
        }

        if bin.is_comparison() && (l.ty.is_pointer() || r.ty.is_pointer()) {
            return self.pointer_comparison(bin, l, r, loc);
        }

        if !l.ty.is_integer() || !r.ty.is_integer() {
            return Err(self.invalid_operands(&l.ty, &r.ty, loc));
        }

        if matches!(bin, BinOp::Div | BinOp::Rem) && r.as_const() == Some(0) {
            let what = if bin == BinOp::Div { "division" } else { "remainder" };
            self.warning(loc, "division-by-zero", format!("{} by zero is undefined", what));
            let (l, r, ty) = self.arith_operands(l, r);
            // not folded: evaluating it would trap
            return Ok(TExpr::new(TExprKind::Binary(bin, Box::new(l), Box::new(r)), ty));
        }

        if matches!(bin, BinOp::Shl | BinOp::Shr) {
            let lt = l.ty.promote();
            let rt = r.ty.promote();
            let (l, r) = (cast_to(l, &lt), cast_to(r, &rt));
            if let Some(amount) = r.as_const() {
                if amount < 0 {
                    self.warning(loc, "shift-count-negative", "shift count is negative");
                } else if amount as u64 >= lt.size() * 8 {
                    self.warning(loc, "shift-count-overflow", "shift count >= width of type");
                }
            }
            return Ok(fold(TExpr::new(TExprKind::Binary(bin, Box::new(l), Box::new(r)), lt)));
        }

        let (l, r, common) = self.arith_operands(l, r);
        let ty = if bin.is_comparison() { CType::INT } else { common };
        Ok(fold(TExpr::new(TExprKind::Binary(bin, Box::new(l), Box::new(r)), ty)))
    }

    /// Usual arithmetic conversions
    fn arith_operands(&self, l: TExpr, r: TExpr) -> (TExpr, TExpr, CType) {
        let common = CType::common(&l.ty, &r.ty);
        (cast_to(l, &common), cast_to(r, &common), common)
    }

    fn pointer_comparison(&mut self, op: BinOp, l: TExpr, r: TExpr, loc: &SourceLoc) -> SemaResult<TExpr> {
        let equality = matches!(op, BinOp::Eq | BinOp::Ne);
        let ptr_ty = match (&l.ty, &r.ty) {
            (a, b) if a.is_pointer() && b.is_pointer() => {
                if !a.is_compatible(b) {
                    self.warning(
                        loc,
                        "compare-distinct-pointer-types",
                        format!("comparison of distinct pointer types ('{}' and '{}')", a, b),
                    );
                }
                a.clone()
            }
            (a, _) if a.is_pointer() && is_null_constant(&r) => a.clone(),
            (_, b) if b.is_pointer() && is_null_constant(&l) => b.clone(),
            (a, b) if (a.is_pointer() && b.is_integer()) || (a.is_integer() && b.is_pointer()) => {
                if !equality {
                    self.warning(
                        loc,
                        "pointer-integer-compare",
                        format!("ordered comparison between pointer and integer ('{}' and '{}')", a, b),
                    );
                } else {
                    self.warning(
                        loc,
                        "pointer-integer-compare",
                        format!("comparison between pointer and integer ('{}' and '{}')", a, b),
                    );
                }
                if a.is_pointer() { a.clone() } else { b.clone() }
            }
            _ => return Err(self.invalid_operands(&l.ty, &r.ty, loc)),
        };
        let (l, r) = (cast_to(l, &ptr_ty), cast_to(r, &ptr_ty));
        Ok(TExpr::new(TExprKind::Binary(op, Box::new(l), Box::new(r)), CType::INT))
    }

    fn compound_assign(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, loc: &SourceLoc) -> SemaResult<TExpr> {
        let target = self.expr(lhs)?;
        self.check_modifiable(&target, &lhs.loc)?;
        let value = self.rvalue_expr(rhs)?;
        let bin = binop(op);

        let (value, op_ty) = if target.ty.is_pointer() {
            if !matches!(bin, BinOp::Add | BinOp::Sub) || !value.ty.is_integer() {
                return Err(self.invalid_operands(&target.ty, &value.ty, loc));
            }
            let pointee = target.ty.pointee().cloned().unwrap_or(CType::Void);
            let size = self.pointee_size(&pointee, loc)?;
            (self.scaled_index(value, size), target.ty.clone())
        } else if target.ty.is_integer() && value.ty.is_integer() {
            if matches!(bin, BinOp::Shl | BinOp::Shr) {
                let rt = value.ty.promote();
                (cast_to(value, &rt), target.ty.promote())
            } else {
                let common = CType::common(&target.ty, &value.ty);
                (cast_to(value, &common), common)
            }
        } else {
            return Err(self.invalid_operands(&target.ty, &value.ty, loc));
        };

        let ty = target.ty.clone();
        trace!("compound assignment {:?} computed in {}", bin, op_ty);
        Ok(TExpr::new(
            TExprKind::CompoundAssign {
                op: bin,
                target: Box::new(target),
                value: Box::new(value),
                op_ty,
            },
            ty,
        ))
    }

    fn conditional(&mut self, cond: &Expr, a: &Expr, b: &Expr, loc: &SourceLoc) -> SemaResult<TExpr> {
        let cond = self.rvalue_expr(cond)?;
        if !cond.ty.is_scalar() {
            return Err(self.error(
                loc,
                format!("used type '{}' where arithmetic or pointer type is required", cond.ty),
            ));
        }
        let a = self.rvalue_expr(a)?;
        let b = self.rvalue_expr(b)?;
        let ty = match (&a.ty, &b.ty) {
            (x, y) if x.is_integer() && y.is_integer() => CType::common(x, y),
            (CType::Void, CType::Void) => CType::Void,
            (x, y) if x.is_pointer() && y.is_pointer() => {
                if x.pointee().is_some_and(CType::is_void) {
                    x.clone()
                } else if y.pointee().is_some_and(CType::is_void) || x.is_compatible(y) {
                    y.clone()
                } else {
                    self.warning(
                        loc,
                        "pointer-type-mismatch",
                        format!("pointer type mismatch ('{}' and '{}')", x, y),
                    );
                    x.clone()
                }
            }
            (x, _) if x.is_pointer() && is_null_constant(&b) => x.clone(),
            (_, y) if y.is_pointer() && is_null_constant(&a) => y.clone(),
            (x, y) => {
                let message = format!("incompatible operand types ('{}' and '{}')", x, y);
                return Err(self.error(loc, message));
            }
        };
        let (a, b) = if ty.is_void() { (a, b) } else { (cast_to(a, &ty), cast_to(b, &ty)) };
        Ok(fold(TExpr::new(
            TExprKind::Conditional(Box::new(cond), Box::new(a), Box::new(b)),
            ty,
        )))
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], loc: &SourceLoc) -> SemaResult<TExpr> {
        let callee_expr = match &callee.kind {
            ExprKind::Ident(name) if self.symbols.lookup(name).is_none() => self.implicit_declaration(name, loc)?,
            _ => self.expr(callee)?,
        };

        let (callee, fn_ty): (Callee, FunctionType) = match callee_expr.kind {
            TExprKind::Function(name) => {
                let fn_ty = match callee_expr.ty {
                    CType::Function(f) => f,
                    _ => return Err(self.error(loc, "called object is not a function")),
                };
                (Callee::Direct(name), fn_ty)
            }
            kind => {
                let value = self.rvalue(TExpr::new(kind, callee_expr.ty));
                let Some(fn_ty) = value.ty.as_function().cloned() else {
                    return Err(self.error(
                        loc,
                        format!("called object type '{}' is not a function or function pointer", value.ty),
                    ));
                };
                (Callee::Indirect(Box::new(value)), fn_ty)
            }
        };

        if fn_ty.prototyped {
            let expected = fn_ty.params.len();
            let too_few = args.len() < expected;
            let too_many = args.len() > expected && !fn_ty.variadic;
            if too_few || too_many {
                let which = if too_few { "few" } else { "many" };
                let at_least = if fn_ty.variadic { "at least " } else { "" };
                return Err(self.error(
                    loc,
                    format!(
                        "too {} arguments to function call, expected {}{}, have {}",
                        which,
                        at_least,
                        expected,
                        args.len()
                    ),
                ));
            }
        }

        let mut checked = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let value = self.rvalue_expr(arg)?;
            if value.ty.is_void() {
                return Err(self.error(&arg.loc, "argument type 'void' is incomplete"));
            }
            let value = match fn_ty.params.get(i) {
                Some(param) if fn_ty.prototyped => {
                    self.convert_assign(value, param, AssignContext::Passing, &arg.loc)?
                }
                // default argument promotions
                _ => {
                    let ty = value.ty.promote();
                    cast_to(value, &ty)
                }
            };
            checked.push(value);
        }

        let fixed_signature = matches!(callee, Callee::Direct(_)) && fn_ty.prototyped && !fn_ty.variadic;
        let ret = (*fn_ty.ret).clone();
        Ok(TExpr::new(
            TExprKind::Call {
                callee,
                args: checked,
                fixed_signature,
            },
            ret,
        ))
    }

    fn implicit_declaration(&mut self, name: &str, loc: &SourceLoc) -> SemaResult<TExpr> {
        if self.lang_opts.c_standard.stdc_version().is_some() {
            return Err(self.error(
                loc,
                format!(
                    "call to undeclared function '{}'; ISO C99 and later do not support implicit function declarations",
                    name
                ),
            ));
        }
        self.warning(
            loc,
            "implicit-function-declaration",
            format!("implicit declaration of function '{}'", name),
        );
        let ty = FunctionType {
            ret: Box::new(CType::INT),
            params: Vec::new(),
            variadic: false,
            prototyped: false,
        };
        self.functions.entry(name.to_string()).or_insert_with(|| FunctionDecl {
            name: name.to_string(),
            ty: ty.clone(),
            linkage: Linkage::External,
            defined: false,
        });
        self.symbols
            .insert_file_scope(name.to_string(), Symbol::Function { name: name.to_string() });
        Ok(TExpr::new(TExprKind::Function(name.to_string()), CType::Function(ty)))
    }

    pub(super) fn check_modifiable(&mut self, target: &TExpr, loc: &SourceLoc) -> SemaResult<()> {
        let const_name = match &target.kind {
            TExprKind::Local(id) => self.locals.get(*id).filter(|l| l.is_const).map(|l| l.name.clone()),
            TExprKind::Global(name) => self.globals.get(name).filter(|g| g.readonly).map(|g| g.name.clone()),
            TExprKind::Deref(_) => None,
            _ => return Err(self.error(loc, "expression is not assignable")),
        };
        if let Some(name) = const_name {
            return Err(self.error(
                loc,
                format!("cannot assign to variable '{}' with const-qualified type 'const {}'", name, target.ty),
            ));
        }
        if target.ty.is_array() {
            return Err(self.error(loc, format!("array type '{}' is not assignable", target.ty)));
        }
        if target.ty.is_function() || target.ty.is_void() {
            return Err(self.error(loc, "expression is not assignable"));
        }
        Ok(())
    }

    /// Implicit conversion as if by assignment
    pub(crate) fn convert_assign(
        &mut self,
        value: TExpr,
        target: &CType,
        ctx: AssignContext,
        loc: &SourceLoc,
    ) -> SemaResult<TExpr> {
        let source = value.ty.clone();
        match (target, &source) {
            (t, s) if t.is_integer() && s.is_integer() => Ok(cast_to(value, target)),
            (t, s) if t.is_pointer() && s.is_pointer() => {
                let void_side = t.pointee().is_some_and(CType::is_void) || s.pointee().is_some_and(CType::is_void);
                if !void_side && !t.is_compatible(s) {
                    self.warning(
                        loc,
                        "incompatible-pointer-types",
                        format!("incompatible pointer types {}", ctx.describe(target, &source)),
                    );
                }
                Ok(cast_to(value, target))
            }
            (t, s) if t.is_pointer() && s.is_integer() => {
                if is_null_constant(&value) {
                    return Ok(cast_to(value, target));
                }
                Err(self.error(
                    loc,
                    format!("incompatible integer to pointer conversion {}", ctx.describe(target, &source)),
                ))
            }
            (CType::Bool, s) if s.is_pointer() => Ok(cast_to(value, target)),
            (t, s) if t.is_integer() && s.is_pointer() => Err(self.error(
                loc,
                format!("incompatible pointer to integer conversion {}", ctx.describe(target, &source)),
            )),
            _ => Err(self.error(loc, ctx.incompatible(target, &source))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_types_follow_the_candidate_lists() {
        assert_eq!(literal_type(1, false, false), CType::INT);
        assert_eq!(literal_type(0x8000_0000, false, false), CType::LONG);
        assert_eq!(literal_type(1, true, false), CType::UINT);
        assert_eq!(literal_type(0x1_0000_0000, true, false), CType::ULONG);
        assert_eq!(literal_type(1, false, true), CType::LONG);
        assert_eq!(literal_type(u64::MAX, false, false), CType::ULONG);
    }
}
