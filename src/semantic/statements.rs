//! Function bodies and statements

use log::debug;

use super::const_eval;
use super::symbol_table::Symbol;
use super::type_checker::{cast_to, AssignContext};
use super::typed_ast::*;
use super::{Analyzer, Reported, SemaResult, SwitchState};
use crate::parser::ast::*;
use crate::types::{CType, StorageClass, TypeQualifiers};

impl Analyzer<'_> {
    pub(super) fn function_definition(&mut self, def: &FunctionDef) -> SemaResult<()> {
        let CType::Function(fn_ty) = self.resolve_type(&def.ty, &def.loc)? else {
            return Err(self.error(&def.loc, "expected a function declarator"));
        };
        if !fn_ty.ret.is_void() && !fn_ty.ret.is_complete() {
            return Err(self.error(&def.loc, format!("incomplete result type '{}' in function definition", fn_ty.ret)));
        }
        self.declare_function(&def.name, fn_ty.clone(), def.specifiers.storage, &def.loc, true)?;
        debug!("analyzing function '{}'", def.name);

        let ParsedType::Function { params, .. } = &def.ty else {
            return Err(self.error(&def.loc, "expected a function declarator"));
        };

        self.current_fn = Some((def.name.clone(), (*fn_ty.ret).clone()));
        self.locals.clear();
        self.loop_depth = 0;
        self.breakable_depth = 0;
        self.switches.clear();
        self.saw_return = false;

        // parameters share the outermost block scope of the body
        self.symbols.push_scope();
        let mut param_ids = Vec::with_capacity(params.len());
        let mut failed = false;
        for (param, ty) in params.iter().zip(&fn_ty.params) {
            let Some(name) = &param.name else {
                self.error(&param.loc, "parameter name omitted");
                failed = true;
                continue;
            };
            if self.symbols.lookup_current(name).is_some() {
                self.error(&param.loc, format!("redefinition of parameter '{}'", name));
                failed = true;
                continue;
            }
            let id = self.locals.len();
            self.locals.push(Local {
                name: name.clone(),
                ty: ty.clone(),
                is_const: param.ty.top_qualifiers().contains(TypeQualifiers::CONST),
            });
            self.symbols.insert(name.clone(), Symbol::Local { id, ty: ty.clone() });
            param_ids.push(id);
        }
        let errors_before = self.diag.num_errors();
        let body = self.block_items(&def.body);
        self.symbols.pop_scope();
        let (_, ret) = self.current_fn.take().unwrap_or_else(|| (def.name.clone(), CType::Void));
        if failed {
            return Err(Reported);
        }

        // a failed statement may have been the return
        let body_ok = self.diag.num_errors() == errors_before;
        if body_ok && !ret.is_void() && def.name != "main" && !always_returns(&body) {
            let message = if self.saw_return {
                "non-void function does not return a value in all control paths"
            } else {
                "non-void function does not return a value"
            };
            self.warning(&def.loc, "return-type", message);
        }

        let linkage = self
            .functions
            .get(&def.name)
            .map_or(Linkage::External, |f| f.linkage);
        self.bodies.push(Function {
            name: def.name.clone(),
            ty: fn_ty,
            linkage,
            params: param_ids,
            locals: std::mem::take(&mut self.locals),
            body,
        });
        Ok(())
    }

    fn block_items(&mut self, items: &[BlockItem]) -> Vec<TStmt> {
        let mut stmts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                BlockItem::Declaration(decl) => {
                    if let Ok(mut init) = self.declaration(decl) {
                        stmts.append(&mut init);
                    }
                }
                BlockItem::StaticAssert(sa) => {
                    let _ = self.static_assert(sa);
                }
                BlockItem::Statement(stmt) => {
                    if let Ok(s) = self.statement(stmt) {
                        stmts.push(s);
                    }
                }
            }
        }
        stmts
    }

    /// Controlling expression of `if`, loops and `?:`
    fn condition(&mut self, expr: &Expr) -> SemaResult<TExpr> {
        let value = self.rvalue_expr(expr)?;
        if !value.ty.is_scalar() {
            return Err(self.error(
                &expr.loc,
                format!("statement requires expression of scalar type ('{}' invalid)", value.ty),
            ));
        }
        Ok(value)
    }

    fn loop_body(&mut self, body: &Stmt) -> SemaResult<TStmt> {
        self.loop_depth += 1;
        self.breakable_depth += 1;
        let result = self.statement(body);
        self.loop_depth -= 1;
        self.breakable_depth -= 1;
        result
    }

    fn statement(&mut self, stmt: &Stmt) -> SemaResult<TStmt> {
        let loc = &stmt.loc;
        match &stmt.kind {
            StmtKind::Compound(items) => {
                self.symbols.push_scope();
                let stmts = self.block_items(items);
                self.symbols.pop_scope();
                Ok(TStmt::Block(stmts))
            }
            StmtKind::Expr(None) => Ok(TStmt::Block(Vec::new())),
            StmtKind::Expr(Some(e)) => Ok(TStmt::Expr(self.rvalue_expr(e)?)),
            StmtKind::If { cond, then, otherwise } => {
                let cond = self.condition(cond);
                let then = self.statement(then);
                let otherwise = otherwise.as_ref().map(|s| self.statement(s)).transpose();
                Ok(TStmt::If {
                    cond: cond?,
                    then: Box::new(then?),
                    otherwise: otherwise?.map(Box::new),
                })
            }
            StmtKind::While { cond, body } => {
                let cond = self.condition(cond);
                let body = self.loop_body(body);
                Ok(TStmt::While {
                    cond: cond?,
                    body: Box::new(body?),
                })
            }
            StmtKind::DoWhile { body, cond } => {
                let body = self.loop_body(body);
                let cond = self.condition(cond);
                Ok(TStmt::DoWhile {
                    body: Box::new(body?),
                    cond: cond?,
                })
            }
            StmtKind::For { init, cond, step, body } => {
                self.symbols.push_scope();
                let result = self.for_statement(init.as_ref(), cond.as_ref(), step.as_ref(), body);
                self.symbols.pop_scope();
                result
            }
            StmtKind::Switch { cond, body } => {
                let cond = self.rvalue_expr(cond)?;
                if !cond.ty.is_integer() {
                    return Err(self.error(
                        loc,
                        format!("statement requires expression of integer type ('{}' invalid)", cond.ty),
                    ));
                }
                let ty = cond.ty.promote();
                let cond = cast_to(cond, &ty);
                self.switches.push(SwitchState {
                    cond_ty: ty,
                    cases: Vec::new(),
                    has_default: false,
                });
                self.breakable_depth += 1;
                let body = self.statement(body);
                self.breakable_depth -= 1;
                let state = self.switches.pop();
                let (cases, has_default) = state.map_or((Vec::new(), false), |s| (s.cases, s.has_default));
                Ok(TStmt::Switch {
                    cond,
                    cases,
                    has_default,
                    body: Box::new(body?),
                })
            }
            StmtKind::Case { value, body } => {
                if self.switches.is_empty() {
                    return Err(self.error(loc, "'case' statement not in switch statement"));
                }
                let v = self.integer_constant(value, "expression is not an integer constant expression");
                let index = match v {
                    Ok(v) => self.add_case(v, &value.loc)?,
                    Err(Reported) => {
                        // still analyze the labeled statement
                        let _ = self.statement(body);
                        return Err(Reported);
                    }
                };
                Ok(TStmt::Case {
                    index,
                    body: Box::new(self.statement(body)?),
                })
            }
            StmtKind::Default(body) => {
                let Some(state) = self.switches.last_mut() else {
                    return Err(self.error(loc, "'default' statement not in switch statement"));
                };
                if state.has_default {
                    return Err(self.error(loc, "multiple default labels in one switch"));
                }
                state.has_default = true;
                Ok(TStmt::Default(Box::new(self.statement(body)?)))
            }
            StmtKind::Return(value) => self.return_statement(value.as_ref(), loc),
            StmtKind::Break => {
                if self.breakable_depth == 0 {
                    return Err(self.error(loc, "'break' statement not in loop or switch statement"));
                }
                Ok(TStmt::Break)
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.error(loc, "'continue' statement not in loop statement"));
                }
                Ok(TStmt::Continue)
            }
        }
    }

    fn add_case(&mut self, value: i64, loc: &crate::diagnostic::SourceLoc) -> SemaResult<usize> {
        let Some(state) = self.switches.last_mut() else {
            return Err(self.error(loc, "'case' statement not in switch statement"));
        };
        let value = const_eval::truncate(value, &state.cond_ty);
        if state.cases.contains(&value) {
            return Err(self.error(loc, format!("duplicate case value '{}'", value)));
        }
        state.cases.push(value);
        Ok(state.cases.len() - 1)
    }

    fn for_statement(
        &mut self,
        init: Option<&ForInit>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> SemaResult<TStmt> {
        let init = match init {
            None => Ok(Vec::new()),
            Some(ForInit::Declaration(decl)) => {
                if !matches!(
                    decl.specifiers.storage,
                    StorageClass::None | StorageClass::Auto | StorageClass::Register
                ) {
                    let loc = decl.specifiers.loc.clone();
                    return Err(self.error(&loc, "declaration of non-local variable in 'for' loop"));
                }
                self.declaration(decl)
            }
            Some(ForInit::Expr(e)) => self.rvalue_expr(e).map(|e| vec![TStmt::Expr(e)]),
        };
        let cond = cond.map(|c| self.condition(c)).transpose();
        let step = step.map(|s| self.rvalue_expr(s)).transpose();
        let body = self.loop_body(body);
        Ok(TStmt::For {
            init: init?,
            cond: cond?,
            step: step?,
            body: Box::new(body?),
        })
    }

    fn return_statement(&mut self, value: Option<&Expr>, loc: &crate::diagnostic::SourceLoc) -> SemaResult<TStmt> {
        self.saw_return = true;
        let (name, ret) = self
            .current_fn
            .clone()
            .unwrap_or_else(|| (String::new(), CType::INT));
        match (value, ret.is_void()) {
            (None, true) => Ok(TStmt::Return(None)),
            (None, false) => {
                let message = format!("non-void function '{}' should return a value", name);
                if self.lang_opts.c_standard.stdc_version().is_some() {
                    Err(self.error(loc, message))
                } else {
                    self.warning(loc, "return-type", message);
                    Ok(TStmt::Return(None))
                }
            }
            (Some(e), true) => {
                let value = self.rvalue_expr(e)?;
                if !value.ty.is_void() {
                    return Err(self.error(
                        &e.loc,
                        format!("void function '{}' should not return a value", name),
                    ));
                }
                // `return f();` in a void function evaluates the call
                Ok(TStmt::Block(vec![TStmt::Expr(value), TStmt::Return(None)]))
            }
            (Some(e), false) => {
                let value = self.rvalue_expr(e)?;
                let value = self.convert_assign(value, &ret, AssignContext::Returning, &e.loc)?;
                Ok(TStmt::Return(Some(value)))
            }
        }
    }
}

/// Does control never fall off the end of `stmts`?
fn always_returns(stmts: &[TStmt]) -> bool {
    stmts.iter().any(stmt_returns)
}

fn stmt_returns(stmt: &TStmt) -> bool {
    match stmt {
        TStmt::Return(_) => true,
        TStmt::Block(stmts) => always_returns(stmts),
        TStmt::If {
            then,
            otherwise: Some(otherwise),
            ..
        } => stmt_returns(then) && stmt_returns(otherwise),
        TStmt::DoWhile { body, cond } => stmt_returns(body) || (is_true(cond) && !breaks_out(body)),
        TStmt::While { cond, body } => is_true(cond) && !breaks_out(body),
        TStmt::For { cond, body, .. } => cond.as_ref().is_none_or(is_true) && !breaks_out(body),
        TStmt::Case { body, .. } | TStmt::Default(body) => stmt_returns(body),
        _ => false,
    }
}

fn is_true(cond: &TExpr) -> bool {
    matches!(cond.as_const(), Some(v) if v != 0)
}

/// Does a `break` in `stmt` leave the enclosing loop?
fn breaks_out(stmt: &TStmt) -> bool {
    match stmt {
        TStmt::Break => true,
        TStmt::Block(stmts) => stmts.iter().any(breaks_out),
        TStmt::If { then, otherwise, .. } => breaks_out(then) || otherwise.as_deref().is_some_and(breaks_out),
        TStmt::Case { body, .. } | TStmt::Default(body) => breaks_out(body),
        // a break inside a nested loop or switch leaves only that statement
        _ => false,
    }
}
