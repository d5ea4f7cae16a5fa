//! Lexically scoped symbol table for ordinary identifiers.

use hashbrown::HashMap;

use super::typed_ast::LocalId;
use crate::types::CType;

#[derive(Debug, Clone)]
pub enum Symbol {
    Local { id: LocalId, ty: CType },
    /// Object with static storage; `link_name` differs from the C name for block-scope statics
    Global { link_name: String, ty: CType },
    Function { name: String },
    EnumConstant(i64),
    Typedef,
}

impl Symbol {
    fn kind_name(&self) -> &'static str {
        match self {
            Symbol::Local { .. } | Symbol::Global { .. } => "variable",
            Symbol::Function { .. } => "function",
            Symbol::EnumConstant(_) => "enumerator",
            Symbol::Typedef => "typedef",
        }
    }

    /// Could a new declaration of kind `other` refer to the same entity?
    pub fn same_kind(&self, other: &Symbol) -> bool {
        self.kind_name() == other.kind_name()
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Symbol>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn at_file_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Symbol declared in the innermost scope only
    pub fn lookup_current(&self, name: &str) -> Option<&Symbol> {
        self.scopes.last().and_then(|scope| scope.get(name))
    }

    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), symbol);
        }
    }

    /// Replace or add a binding at file scope
    pub fn insert_file_scope(&mut self, name: impl Into<String>, symbol: Symbol) {
        if let Some(scope) = self.scopes.first_mut() {
            scope.insert(name.into(), symbol);
        }
    }

    pub fn remove_file_scope(&mut self, name: &str) {
        if let Some(scope) = self.scopes.first_mut() {
            scope.remove(name);
        }
    }

    pub fn kind_name(symbol: &Symbol) -> &'static str {
        symbol.kind_name()
    }
}
