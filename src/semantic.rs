//! Semantic analysis
//!
//! Walks the parsed [`TranslationUnit`] once, resolving names through a
//! scoped [`SymbolTable`], computing C types, checking constraints and
//! building the typed [`Program`] that code generation consumes. Problems are
//! reported to the [`DiagnosticEngine`]; analysis carries on with the next
//! declaration or statement so that one run reports as much as possible.

use hashbrown::HashSet;
use indexmap::IndexMap;
use log::{debug, trace};

use crate::diagnostic::{Diagnostic, DiagnosticEngine, SourceLoc};
use crate::lang_options::LangOptions;
use crate::parser::ast::*;
use crate::types::{CType, FunctionType, StorageClass, TypeQualifiers};

pub mod const_eval;
mod statements;
pub mod symbol_table;
mod type_checker;
pub mod typed_ast;

#[cfg(test)]
mod tests_semantic;

use const_eval::{ConstError, ConstValue};
use symbol_table::{Symbol, SymbolTable};
use type_checker::AssignContext;
use typed_ast::*;

/// Marker for an error that has already been reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reported;

pub(crate) type SemaResult<T> = Result<T, Reported>;

#[derive(Debug)]
struct SwitchState {
    cond_ty: CType,
    cases: Vec<i64>,
    has_default: bool,
}

pub(crate) struct Analyzer<'d> {
    diag: &'d mut DiagnosticEngine,
    lang_opts: LangOptions,
    symbols: SymbolTable,
    globals: IndexMap<String, GlobalVar>,
    initialized: HashSet<String>,
    functions: IndexMap<String, FunctionDecl>,
    bodies: Vec<Function>,
    strings: Vec<Vec<u8>>,

    // state of the function being analyzed
    current_fn: Option<(String, CType)>,
    locals: Vec<Local>,
    loop_depth: usize,
    breakable_depth: usize,
    switches: Vec<SwitchState>,
    saw_return: bool,
}

/// Analyze a translation unit. Errors are on `diag`; the returned program is
/// only meaningful when none were reported.
pub fn analyze(unit: &TranslationUnit, lang_opts: LangOptions, diag: &mut DiagnosticEngine) -> Program {
    let mut analyzer = Analyzer::new(lang_opts, diag);
    for decl in &unit.decls {
        // failures are already reported; keep going with the next declaration
        let _ = match decl {
            ExternalDecl::Function(f) => analyzer.function_definition(f),
            ExternalDecl::Declaration(d) => analyzer.declaration(d).map(|_| ()),
            ExternalDecl::StaticAssert(sa) => analyzer.static_assert(sa),
        };
    }
    analyzer.finish()
}

impl<'d> Analyzer<'d> {
    pub(crate) fn new(lang_opts: LangOptions, diag: &'d mut DiagnosticEngine) -> Self {
        Analyzer {
            diag,
            lang_opts,
            symbols: SymbolTable::new(),
            globals: IndexMap::new(),
            initialized: HashSet::new(),
            functions: IndexMap::new(),
            bodies: Vec::new(),
            strings: Vec::new(),
            current_fn: None,
            locals: Vec::new(),
            loop_depth: 0,
            breakable_depth: 0,
            switches: Vec::new(),
            saw_return: false,
        }
    }

    fn error(&mut self, loc: &SourceLoc, message: impl Into<String>) -> Reported {
        self.diag.report(Diagnostic::error(message).at(loc.clone()));
        Reported
    }

    fn warning(&mut self, loc: &SourceLoc, code: &'static str, message: impl Into<String>) {
        self.diag
            .report(Diagnostic::warning(message).with_code(code).at(loc.clone()));
    }

    fn finish(mut self) -> Program {
        let mut globals = Vec::with_capacity(self.globals.len());
        for (_, mut global) in std::mem::take(&mut self.globals) {
            // `int a[];` at the end of the unit is an array of one element
            if let CType::Array(elem, None) = &global.ty {
                if global.init == GlobalInit::Zero {
                    self.diag.report(
                        Diagnostic::warning(format!(
                            "tentative array definition assumed to have one element: '{}'",
                            global.name
                        ))
                        .with_code("tentative-definition-array"),
                    );
                    global.ty = CType::Array(elem.clone(), Some(1));
                }
            }
            globals.push(global);
        }
        debug!(
            "semantic analysis produced {} functions, {} globals, {} strings",
            self.bodies.len(),
            globals.len(),
            self.strings.len()
        );
        Program {
            globals,
            functions: self.bodies,
            function_decls: self.functions.into_values().collect(),
            strings: self.strings,
        }
    }

    fn intern_string(&mut self, bytes: &[u8]) -> usize {
        let mut data = bytes.to_vec();
        data.push(0);
        if let Some(index) = self.strings.iter().position(|s| *s == data) {
            return index;
        }
        self.strings.push(data);
        self.strings.len() - 1
    }

    /// Turn a declarator type into a C type, evaluating array bounds.
    fn resolve_type(&mut self, ty: &ParsedType, loc: &SourceLoc) -> SemaResult<CType> {
        match ty {
            ParsedType::Base { ty, .. } => Ok(ty.clone()),
            ParsedType::Pointer { pointee, .. } => Ok(CType::pointer_to(self.resolve_type(pointee, loc)?)),
            ParsedType::Array { elem, size } => {
                let elem = self.resolve_type(elem, loc)?;
                if elem.is_function() {
                    return Err(self.error(loc, "array of functions is not allowed"));
                }
                if !elem.is_complete() {
                    return Err(self.error(loc, format!("array has incomplete element type '{}'", elem)));
                }
                let len = match size {
                    None => None,
                    Some(expr) => {
                        let n = self.integer_constant(expr, "variable length arrays are not supported")?;
                        if n < 0 {
                            return Err(self.error(&expr.loc, "array size is negative"));
                        }
                        Some(n as u64)
                    }
                };
                Ok(CType::Array(Box::new(elem), len))
            }
            ParsedType::Function {
                ret,
                params,
                variadic,
                prototyped,
            } => {
                let ret = self.resolve_type(ret, loc)?;
                if ret.is_array() {
                    return Err(self.error(loc, format!("function cannot return array type '{}'", ret)));
                }
                if ret.is_function() {
                    return Err(self.error(loc, format!("function cannot return function type '{}'", ret)));
                }
                let mut resolved = Vec::with_capacity(params.len());
                for param in params {
                    let ty = self.resolve_type(&param.ty, &param.loc)?.decay();
                    if ty.is_void() {
                        return Err(self.error(&param.loc, "argument may not have 'void' type"));
                    }
                    resolved.push(ty);
                }
                Ok(CType::Function(FunctionType {
                    ret: Box::new(ret),
                    params: resolved,
                    variadic: *variadic,
                    prototyped: *prototyped,
                }))
            }
        }
    }

    /// Evaluate an integer constant expression; `not_constant` is the message when it isn't one.
    fn integer_constant(&mut self, expr: &Expr, not_constant: &str) -> SemaResult<i64> {
        let value = self.rvalue_expr(expr)?;
        if !value.ty.is_integer() {
            return Err(self.error(&expr.loc, "expression is not an integer constant expression"));
        }
        match const_eval::eval_int(&value) {
            Ok(v) => Ok(v),
            Err(ConstError::DivisionByZero) => Err(self.error(&expr.loc, "division by zero in constant expression")),
            Err(ConstError::NotConstant) => Err(self.error(&expr.loc, not_constant)),
        }
    }

    fn static_assert(&mut self, sa: &StaticAssert) -> SemaResult<()> {
        let value = self.integer_constant(&sa.cond, "static assertion expression is not an integral constant expression")?;
        if value == 0 {
            let message = match &sa.message {
                Some(bytes) => format!("static assertion failed: {}", String::from_utf8_lossy(bytes)),
                None => "static assertion failed".to_string(),
            };
            return Err(self.error(&sa.loc, message));
        }
        Ok(())
    }

    fn enumerators(&mut self, enumerators: &[Enumerator]) -> SemaResult<()> {
        let mut next = 0i64;
        for e in enumerators {
            let value = match &e.value {
                Some(expr) => self
                    .integer_constant(expr, "expression is not an integer constant expression")
                    .unwrap_or(next),
                None => next,
            };
            if i32::try_from(value).is_err() {
                self.error(&e.loc, "enumerator value is not representable in the underlying type 'int'");
            }
            if self.symbols.lookup_current(&e.name).is_some() {
                self.error(&e.loc, format!("redefinition of enumerator '{}'", e.name));
                continue;
            }
            self.symbols.insert(e.name.clone(), Symbol::EnumConstant(value));
            next = value.wrapping_add(1);
        }
        Ok(())
    }

    /// Declaration at any scope; block-scope objects produce initialization statements.
    pub(crate) fn declaration(&mut self, decl: &Declaration) -> SemaResult<Vec<TStmt>> {
        self.enumerators(&decl.specifiers.enumerators)?;
        let mut stmts = Vec::new();
        let mut failed = false;
        for declarator in &decl.declarators {
            match self.declarator(&decl.specifiers, declarator) {
                Ok(mut s) => stmts.append(&mut s),
                Err(Reported) => failed = true,
            }
        }
        if failed { Err(Reported) } else { Ok(stmts) }
    }

    fn declarator(&mut self, specs: &DeclSpecifiers, decl: &InitDeclarator) -> SemaResult<Vec<TStmt>> {
        let ty = self.resolve_type(&decl.ty, &decl.loc)?;
        let is_const = decl.ty.top_qualifiers().contains(TypeQualifiers::CONST);
        trace!("declare '{}': {}", decl.name, ty);

        if specs.storage == StorageClass::Typedef {
            if let Some(existing) = self.symbols.lookup_current(&decl.name) {
                if !matches!(existing, Symbol::Typedef) {
                    return Err(self.error(
                        &decl.loc,
                        format!("redefinition of '{}' as different kind of symbol", decl.name),
                    ));
                }
            }
            self.symbols.insert(decl.name.clone(), Symbol::Typedef);
            return Ok(Vec::new());
        }

        if let CType::Function(fn_ty) = ty {
            if decl.init.is_some() {
                return Err(self.error(
                    &decl.loc,
                    "illegal initializer (only variables can be initialized)",
                ));
            }
            if !self.symbols.at_file_scope() && specs.storage == StorageClass::Static {
                return Err(self.error(
                    &decl.loc,
                    "function declared in block scope cannot have 'static' storage class",
                ));
            }
            self.declare_function(&decl.name, fn_ty, specs.storage, &decl.loc, false)?;
            return Ok(Vec::new());
        }

        if self.symbols.at_file_scope() {
            if matches!(specs.storage, StorageClass::Auto | StorageClass::Register) {
                return Err(self.error(&decl.loc, "illegal storage class on file-scoped variable"));
            }
            self.declare_global(&decl.name, &decl.name, ty, specs.storage, decl.init.as_ref(), is_const, &decl.loc)?;
            return Ok(Vec::new());
        }

        match specs.storage {
            StorageClass::Extern => {
                if decl.init.is_some() {
                    return Err(self.error(
                        &decl.loc,
                        "declaration of block scope identifier with linkage cannot have an initializer",
                    ));
                }
                self.declare_global(&decl.name, &decl.name, ty.clone(), specs.storage, None, is_const, &decl.loc)?;
                // `declare_global` bound the name at file scope; bind it here too
                let ty = self.globals.get(&decl.name).map_or(ty, |g| g.ty.clone());
                self.symbols.insert(
                    decl.name.clone(),
                    Symbol::Global {
                        link_name: decl.name.clone(),
                        ty,
                    },
                );
                Ok(Vec::new())
            }
            StorageClass::Static => {
                if self.symbols.lookup_current(&decl.name).is_some() {
                    return Err(self.error(&decl.loc, format!("redefinition of '{}'", decl.name)));
                }
                let fn_name = self.current_fn.as_ref().map_or("", |(n, _)| n.as_str()).to_string();
                let mut link_name = format!("{}.{}", fn_name, decl.name);
                let mut n = 1;
                while self.globals.contains_key(&link_name) {
                    link_name = format!("{}.{}.{}", fn_name, decl.name, n);
                    n += 1;
                }
                let file_scope_binding = self.symbols.lookup(&decl.name).cloned();
                self.declare_global(&link_name, &decl.name, ty, StorageClass::Static, decl.init.as_ref(), is_const, &decl.loc)?;
                // the static is only visible in this block
                match file_scope_binding {
                    Some(previous) => self.symbols.insert_file_scope(decl.name.clone(), previous),
                    None => self.symbols.remove_file_scope(&decl.name),
                }
                let ty = self.globals.get(&link_name).map_or(CType::INT, |g| g.ty.clone());
                self.symbols.insert(decl.name.clone(), Symbol::Global { link_name, ty });
                Ok(Vec::new())
            }
            _ => self.local_variable(decl, ty, is_const),
        }
    }

    fn local_variable(&mut self, decl: &InitDeclarator, ty: CType, is_const: bool) -> SemaResult<Vec<TStmt>> {
        if self.symbols.lookup_current(&decl.name).is_some() {
            return Err(self.error(&decl.loc, format!("redefinition of '{}'", decl.name)));
        }
        if ty.is_void() {
            return Err(self.error(&decl.loc, "variable has incomplete type 'void'"));
        }

        let id = self.locals.len();
        self.locals.push(Local {
            name: decl.name.clone(),
            ty: ty.clone(),
            is_const,
        });
        self.symbols.insert(decl.name.clone(), Symbol::Local { id, ty: ty.clone() });

        let Some(init) = &decl.init else {
            if !ty.is_complete() {
                return Err(self.error(&decl.loc, format!("variable has incomplete type '{}'", ty)));
            }
            return Ok(Vec::new());
        };

        let (ty, items) = self.layout_initializer(&ty, init, &decl.loc)?;
        if !ty.is_complete() {
            return Err(self.error(&decl.loc, format!("variable has incomplete type '{}'", ty)));
        }
        self.locals[id].ty = ty.clone();
        let zero_fill = !ty.is_scalar();
        self.symbols.insert(decl.name.clone(), Symbol::Local { id, ty });
        Ok(vec![TStmt::InitLocal {
            local: id,
            zero_fill,
            items,
        }])
    }

    /// Declare or redeclare an object with static storage duration.
    #[allow(clippy::too_many_arguments)]
    fn declare_global(
        &mut self,
        link_name: &str,
        c_name: &str,
        ty: CType,
        storage: StorageClass,
        init: Option<&Initializer>,
        is_const: bool,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        if let Some(existing) = self.symbols.lookup(c_name) {
            if self.symbols.at_file_scope() && !matches!(existing, Symbol::Global { .. }) {
                return Err(self.error(loc, format!("redefinition of '{}' as different kind of symbol", c_name)));
            }
        }

        let linkage = if storage == StorageClass::Static {
            Linkage::Internal
        } else {
            Linkage::External
        };
        let mut ty = ty;
        let mut linkage = linkage;
        if let Some(prev) = self.globals.get(link_name) {
            if !prev.ty.is_compatible(&ty) {
                let prev_ty = prev.ty.clone();
                return Err(self.error(
                    loc,
                    format!("redefinition of '{}' with a different type: '{}' vs '{}'", c_name, ty, prev_ty),
                ));
            }
            match (storage, prev.linkage) {
                (StorageClass::Static, Linkage::External) => {
                    return Err(self.error(
                        loc,
                        format!("static declaration of '{}' follows non-static declaration", c_name),
                    ));
                }
                (StorageClass::None, Linkage::Internal) => {
                    return Err(self.error(
                        loc,
                        format!("non-static declaration of '{}' follows static declaration", c_name),
                    ));
                }
                _ => linkage = prev.linkage,
            }
            if ty.is_complete() || !prev.ty.is_complete() {
                // keep the newer, possibly completed type
            } else {
                ty = prev.ty.clone();
            }
        }

        let new_init = match init {
            Some(init) => {
                if storage == StorageClass::Extern {
                    self.warning(loc, "extern-initializer", "'extern' variable has an initializer");
                }
                if self.initialized.contains(link_name) {
                    return Err(self.error(loc, format!("redefinition of '{}'", c_name)));
                }
                let (completed, data) = self.static_initializer(&ty, init, loc)?;
                ty = completed;
                self.initialized.insert(link_name.to_string());
                Some(data)
            }
            None => None,
        };

        let readonly = is_const || self.globals.get(link_name).is_some_and(|g| g.readonly);
        let init = match (new_init, self.globals.get(link_name).map(|g| g.init.clone())) {
            (Some(data), _) => data,
            (None, Some(previous)) if storage == StorageClass::Extern => previous,
            (None, Some(GlobalInit::Extern)) | (None, None) if storage != StorageClass::Extern => GlobalInit::Zero,
            (None, Some(previous)) => previous,
            (None, None) => GlobalInit::Extern,
        };

        self.globals.insert(
            link_name.to_string(),
            GlobalVar {
                name: link_name.to_string(),
                ty: ty.clone(),
                linkage,
                init,
                readonly,
            },
        );
        self.symbols.insert_file_scope(
            c_name.to_string(),
            Symbol::Global {
                link_name: link_name.to_string(),
                ty,
            },
        );
        Ok(())
    }

    fn declare_function(
        &mut self,
        name: &str,
        ty: FunctionType,
        storage: StorageClass,
        loc: &SourceLoc,
        defining: bool,
    ) -> SemaResult<()> {
        if let Some(existing) = self.symbols.lookup(name) {
            if !matches!(existing, Symbol::Function { .. }) && self.symbols.lookup_current(name).is_some() {
                return Err(self.error(loc, format!("redefinition of '{}' as different kind of symbol", name)));
            }
        }

        match self.functions.get_mut(name) {
            Some(prev) => {
                let compatible = CType::Function(prev.ty.clone()).is_compatible(&CType::Function(ty.clone()));
                if !compatible {
                    return Err(self.error(loc, format!("conflicting types for '{}'", name)));
                }
                if defining && prev.defined {
                    return Err(self.error(loc, format!("redefinition of '{}'", name)));
                }
                if storage == StorageClass::Static && prev.linkage == Linkage::External {
                    return Err(self.error(
                        loc,
                        format!("static declaration of '{}' follows non-static declaration", name),
                    ));
                }
                if ty.prototyped && (!prev.ty.prototyped || defining) {
                    prev.ty = ty;
                }
                prev.defined |= defining;
            }
            None => {
                let linkage = if storage == StorageClass::Static {
                    Linkage::Internal
                } else {
                    Linkage::External
                };
                self.functions.insert(
                    name.to_string(),
                    FunctionDecl {
                        name: name.to_string(),
                        ty,
                        linkage,
                        defined: defining,
                    },
                );
            }
        }

        let symbol = Symbol::Function { name: name.to_string() };
        if !self.symbols.at_file_scope() {
            self.symbols.insert(name.to_string(), symbol.clone());
        }
        self.symbols.insert_file_scope(name.to_string(), symbol);
        Ok(())
    }

    /// Compute the complete type and the scalar stores an initializer performs.
    fn layout_initializer(
        &mut self,
        ty: &CType,
        init: &Initializer,
        loc: &SourceLoc,
    ) -> SemaResult<(CType, Vec<(u64, TExpr)>)> {
        let mut items = Vec::new();
        if let Some(bytes) = string_initializer(ty, init) {
            let ty = self.string_items(ty, bytes, 0, &mut items, loc);
            return Ok((ty, items));
        }

        match (ty, init) {
            (CType::Array(..), Initializer::Expr(e)) => Err(self.error(&e.loc, "array initializer must be an initializer list")),
            (CType::Array(elem, None), Initializer::List(list, _)) => {
                let mut pos = 0;
                let mut count = 0u64;
                while pos < list.len() {
                    let before = pos;
                    self.fill_one(elem, count * elem.size(), list, &mut pos, &mut items)?;
                    if pos == before {
                        break;
                    }
                    count += 1;
                }
                Ok((CType::Array(elem.clone(), Some(count)), items))
            }
            (CType::Array(..), Initializer::List(list, list_loc)) => {
                let mut pos = 0;
                self.fill(ty, 0, list, &mut pos, &mut items)?;
                if pos < list.len() {
                    self.warning(list_loc, "excess-initializers", "excess elements in array initializer");
                }
                Ok((ty.clone(), items))
            }
            (_, _) if !ty.is_scalar() => Err(self.error(loc, format!("variable has incomplete type '{}'", ty))),
            (_, Initializer::Expr(e)) => {
                items.push((0, self.convert_initializer(e, ty)?));
                Ok((ty.clone(), items))
            }
            (_, Initializer::List(list, list_loc)) => {
                if list.is_empty() {
                    return Err(self.error(list_loc, "scalar initializer cannot be empty"));
                }
                let mut pos = 0;
                self.fill_one(ty, 0, list, &mut pos, &mut items)?;
                if list.len() > 1 {
                    self.warning(list_loc, "excess-initializers", "excess elements in scalar initializer");
                }
                Ok((ty.clone(), items))
            }
        }
    }

    /// Fill an object of type `ty` at `offset` from `list[*pos..]`, with brace elision.
    fn fill(
        &mut self,
        ty: &CType,
        offset: u64,
        list: &[Initializer],
        pos: &mut usize,
        items: &mut Vec<(u64, TExpr)>,
    ) -> SemaResult<()> {
        match ty {
            CType::Array(elem, Some(len)) => {
                for i in 0..*len {
                    if *pos >= list.len() {
                        break;
                    }
                    self.fill_one(elem, offset + i * elem.size(), list, pos, items)?;
                }
                Ok(())
            }
            _ => self.fill_one(ty, offset, list, pos, items),
        }
    }

    fn fill_one(
        &mut self,
        ty: &CType,
        offset: u64,
        list: &[Initializer],
        pos: &mut usize,
        items: &mut Vec<(u64, TExpr)>,
    ) -> SemaResult<()> {
        let Some(item) = list.get(*pos) else {
            return Ok(());
        };
        if let Some(bytes) = string_initializer(ty, item) {
            *pos += 1;
            let loc = match item {
                Initializer::Expr(e) => e.loc.clone(),
                Initializer::List(_, loc) => loc.clone(),
            };
            self.string_items(ty, bytes, offset, items, &loc);
            return Ok(());
        }
        match item {
            Initializer::List(sub, loc) => {
                *pos += 1;
                let mut inner = 0;
                if ty.is_array() {
                    self.fill(ty, offset, sub, &mut inner, items)?;
                    if inner < sub.len() {
                        self.warning(loc, "excess-initializers", "excess elements in array initializer");
                    }
                } else {
                    if sub.is_empty() {
                        return Err(self.error(loc, "scalar initializer cannot be empty"));
                    }
                    self.fill_one(ty, offset, sub, &mut inner, items)?;
                    if sub.len() > 1 {
                        self.warning(loc, "excess-initializers", "excess elements in scalar initializer");
                    }
                }
                Ok(())
            }
            Initializer::Expr(_) if ty.is_array() => self.fill(ty, offset, list, pos, items),
            Initializer::Expr(e) => {
                *pos += 1;
                let value = self.convert_initializer(e, ty)?;
                items.push((offset, value));
                Ok(())
            }
        }
    }

    /// Bytes of a string literal initializing a char array; returns the completed array type.
    fn string_items(
        &mut self,
        ty: &CType,
        bytes: &[u8],
        offset: u64,
        items: &mut Vec<(u64, TExpr)>,
        loc: &SourceLoc,
    ) -> CType {
        let CType::Array(elem, len) = ty else {
            return ty.clone();
        };
        let len = len.unwrap_or(bytes.len() as u64 + 1);
        if bytes.len() as u64 > len {
            self.warning(loc, "excess-initializers", "initializer-string for char array is too long");
        }
        for (i, b) in bytes.iter().take(len as usize).enumerate() {
            let value = const_eval::truncate(*b as i64, elem);
            items.push((offset + i as u64, TExpr::constant(value, (**elem).clone())));
        }
        CType::Array(elem.clone(), Some(len))
    }

    fn convert_initializer(&mut self, expr: &Expr, ty: &CType) -> SemaResult<TExpr> {
        let value = self.rvalue_expr(expr)?;
        self.convert_assign(value, ty, AssignContext::Initializing, &expr.loc)
    }

    /// Lay out a static initializer as bytes plus relocations.
    fn static_initializer(&mut self, ty: &CType, init: &Initializer, loc: &SourceLoc) -> SemaResult<(CType, GlobalInit)> {
        let (ty, items) = self.layout_initializer(ty, init, loc)?;
        let mut bytes = vec![0u8; ty.size() as usize];
        let mut relocs = Vec::new();
        for (offset, expr) in items {
            let size = expr.ty.size() as usize;
            match const_eval::eval(&expr) {
                Ok(ConstValue::Int(v)) => {
                    let start = offset as usize;
                    if let Some(slot) = bytes.get_mut(start..start + size) {
                        slot.copy_from_slice(&v.to_le_bytes()[..size]);
                    }
                }
                Ok(ConstValue::Addr { target, offset: addend }) if size == 8 => {
                    relocs.push(DataReloc { offset, target, addend });
                }
                Err(ConstError::DivisionByZero) => {
                    return Err(self.error(loc, "division by zero in constant expression"));
                }
                Ok(ConstValue::Addr { .. }) | Err(ConstError::NotConstant) => {
                    return Err(self.error(loc, "initializer element is not a compile-time constant"));
                }
            }
        }
        let init = if relocs.is_empty() && bytes.iter().all(|b| *b == 0) {
            GlobalInit::Zero
        } else {
            GlobalInit::Data { bytes, relocs }
        };
        Ok((ty, init))
    }
}

/// `"abc"` or `{ "abc" }` initializing an array of character type
fn string_initializer<'a>(ty: &CType, init: &'a Initializer) -> Option<&'a [u8]> {
    let CType::Array(elem, _) = ty else {
        return None;
    };
    if !matches!(**elem, CType::Char { .. }) {
        return None;
    }
    let expr = match init {
        Initializer::Expr(e) => e,
        Initializer::List(list, _) => match list.as_slice() {
            [Initializer::Expr(e)] => e,
            _ => return None,
        },
    };
    match &expr.kind {
        ExprKind::StringLiteral(bytes) => Some(bytes),
        _ => None,
    }
}
