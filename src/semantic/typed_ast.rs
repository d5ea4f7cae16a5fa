//! Typed program produced by semantic analysis and consumed by code generation.
//!
//! Every expression carries its [`CType`]. Implicit conversions, array and
//! function decay and pointer scaling are explicit nodes, so code generation
//! only deals with integer values of known width and signedness.

use crate::types::{CType, FunctionType};

pub type LocalId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

/// Symbol an address constant or data relocation refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolTarget {
    Global(String),
    Function(String),
    /// Index into [`Program::strings`]
    String(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReloc {
    pub offset: u64,
    pub target: SymbolTarget,
    pub addend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    /// Declared here, defined elsewhere
    Extern,
    Zero,
    Data { bytes: Vec<u8>, relocs: Vec<DataReloc> },
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub ty: CType,
    pub linkage: Linkage,
    pub init: GlobalInit,
    /// `const` objects go to read-only data
    pub readonly: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub ty: FunctionType,
    pub linkage: Linkage,
    pub defined: bool,
}

#[derive(Debug, Clone)]
pub struct Local {
    pub name: String,
    pub ty: CType,
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: FunctionType,
    pub linkage: Linkage,
    /// Parameter locals, in order
    pub params: Vec<LocalId>,
    pub locals: Vec<Local>,
    pub body: Vec<TStmt>,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub globals: Vec<GlobalVar>,
    pub functions: Vec<Function>,
    pub function_decls: Vec<FunctionDecl>,
    /// String literal contents, NUL terminated
    pub strings: Vec<Vec<u8>>,
}

impl Program {
    pub fn function_decl(&self, name: &str) -> Option<&FunctionDecl> {
        self.function_decls.iter().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVar> {
        self.globals.iter().find(|g| g.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    BitNot,
    LogNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

#[derive(Debug, Clone)]
pub enum Callee {
    Direct(String),
    Indirect(Box<TExpr>),
}

#[derive(Debug, Clone)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: CType,
}

#[derive(Debug, Clone)]
pub enum TExprKind {
    /// Integer constant, already normalized to `ty`
    Const(i64),
    // lvalues
    Local(LocalId),
    Global(String),
    /// String literal object; `ty` is `char[N]`
    StringLit(usize),
    Deref(Box<TExpr>),
    /// Function designator, only seen as the operand of `&` or a call
    Function(String),
    // rvalues
    FuncAddr(String),
    AddrOf(Box<TExpr>),
    /// Conversion of the operand to `ty`
    Cast(Box<TExpr>),
    Unary(UnOp, Box<TExpr>),
    /// Operands share a type except for shifts; comparisons produce `int`
    Binary(BinOp, Box<TExpr>, Box<TExpr>),
    Logical {
        and: bool,
        lhs: Box<TExpr>,
        rhs: Box<TExpr>,
    },
    Conditional(Box<TExpr>, Box<TExpr>, Box<TExpr>),
    Assign(Box<TExpr>, Box<TExpr>),
    /// `target op= value`, computed in `op_ty` and converted back
    CompoundAssign {
        op: BinOp,
        target: Box<TExpr>,
        value: Box<TExpr>,
        op_ty: CType,
    },
    IncDec {
        target: Box<TExpr>,
        delta: i64,
        prefix: bool,
    },
    Call {
        callee: Callee,
        args: Vec<TExpr>,
        /// Arguments match the callee's declared signature exactly
        fixed_signature: bool,
    },
    Comma(Box<TExpr>, Box<TExpr>),
}

impl TExpr {
    pub fn new(kind: TExprKind, ty: CType) -> Self {
        TExpr { kind, ty }
    }

    pub fn constant(value: i64, ty: CType) -> Self {
        TExpr {
            kind: TExprKind::Const(value),
            ty,
        }
    }

    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            TExprKind::Local(_) | TExprKind::Global(_) | TExprKind::StringLit(_) | TExprKind::Deref(_)
        )
    }

    pub fn as_const(&self) -> Option<i64> {
        match self.kind {
            TExprKind::Const(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TStmt {
    Block(Vec<TStmt>),
    Expr(TExpr),
    /// Store `items` at byte offsets of the local; aggregates are zeroed first
    InitLocal {
        local: LocalId,
        zero_fill: bool,
        items: Vec<(u64, TExpr)>,
    },
    If {
        cond: TExpr,
        then: Box<TStmt>,
        otherwise: Option<Box<TStmt>>,
    },
    While {
        cond: TExpr,
        body: Box<TStmt>,
    },
    DoWhile {
        body: Box<TStmt>,
        cond: TExpr,
    },
    For {
        init: Vec<TStmt>,
        cond: Option<TExpr>,
        step: Option<TExpr>,
        body: Box<TStmt>,
    },
    Switch {
        cond: TExpr,
        /// Case values in source order; `TStmt::Case::index` points here
        cases: Vec<i64>,
        has_default: bool,
        body: Box<TStmt>,
    },
    Case {
        index: usize,
        body: Box<TStmt>,
    },
    Default(Box<TStmt>),
    Return(Option<TExpr>),
    Break,
    Continue,
}
