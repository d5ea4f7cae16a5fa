//! Syntax tree produced by the parser.
//!
//! Types are kept in their declarator shape ([`ParsedType`]) because array
//! bounds and enumerator values are constant expressions that only the
//! semantic pass can evaluate.

use crate::diagnostic::SourceLoc;
use crate::types::{CType, StorageClass, TypeQualifiers};

#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    pub decls: Vec<ExternalDecl>,
}

#[derive(Debug, Clone)]
pub enum ExternalDecl {
    Function(FunctionDef),
    Declaration(Declaration),
    StaticAssert(StaticAssert),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub specifiers: DeclSpecifiers,
    pub name: String,
    /// Always a `ParsedType::Function`
    pub ty: ParsedType,
    pub body: Vec<BlockItem>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub struct DeclSpecifiers {
    pub storage: StorageClass,
    pub base: ParsedType,
    pub inline: bool,
    /// Enumerators introduced by an `enum { ... }` specifier, in order
    pub enumerators: Vec<Enumerator>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub struct Enumerator {
    pub name: String,
    pub value: Option<Expr>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub specifiers: DeclSpecifiers,
    pub declarators: Vec<InitDeclarator>,
}

#[derive(Debug, Clone)]
pub struct InitDeclarator {
    pub name: String,
    pub ty: ParsedType,
    pub init: Option<Initializer>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum Initializer {
    Expr(Expr),
    List(Vec<Initializer>, SourceLoc),
}

#[derive(Debug, Clone)]
pub struct StaticAssert {
    pub cond: Expr,
    pub message: Option<Vec<u8>>,
    pub loc: SourceLoc,
}

/// A type as spelled by specifiers and a declarator
#[derive(Debug, Clone)]
pub enum ParsedType {
    Base {
        ty: CType,
        quals: TypeQualifiers,
    },
    Pointer {
        pointee: Box<ParsedType>,
        quals: TypeQualifiers,
    },
    Array {
        elem: Box<ParsedType>,
        size: Option<Box<Expr>>,
    },
    Function {
        ret: Box<ParsedType>,
        params: Vec<ParamDecl>,
        variadic: bool,
        prototyped: bool,
    },
}

impl ParsedType {
    pub fn base(ty: CType) -> Self {
        ParsedType::Base {
            ty,
            quals: TypeQualifiers::empty(),
        }
    }

    /// Qualifiers of the outermost object, e.g. the `const` in `int *const p`
    pub fn top_qualifiers(&self) -> TypeQualifiers {
        match self {
            ParsedType::Base { quals, .. } | ParsedType::Pointer { quals, .. } => *quals,
            ParsedType::Array { elem, .. } => elem.top_qualifiers(),
            ParsedType::Function { .. } => TypeQualifiers::empty(),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, ParsedType::Function { .. })
    }

    pub(crate) fn with_qualifiers(self, extra: TypeQualifiers) -> Self {
        match self {
            ParsedType::Base { ty, quals } => ParsedType::Base { ty, quals: quals | extra },
            ParsedType::Pointer { pointee, quals } => ParsedType::Pointer {
                pointee,
                quals: quals | extra,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: Option<String>,
    pub ty: ParsedType,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum BlockItem {
    Declaration(Declaration),
    StaticAssert(StaticAssert),
    Statement(Stmt),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Compound(Vec<BlockItem>),
    /// `None` is the empty statement
    Expr(Option<Expr>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<ForInit>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Switch {
        cond: Expr,
        body: Box<Stmt>,
    },
    Case {
        value: Expr,
        body: Box<Stmt>,
    },
    Default(Box<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub enum ForInit {
    Declaration(Declaration),
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral { value: u64, unsigned: bool, long: bool },
    CharLiteral(i64),
    StringLiteral(Vec<u8>),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `None` is plain `=`, otherwise the operator of a compound assignment
    Assign(Option<BinaryOp>, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Cast(ParsedType, Box<Expr>),
    SizeofExpr(Box<Expr>),
    SizeofType(ParsedType),
    Comma(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    LogicAnd,
    LogicOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Less
                | BinaryOp::Greater
                | BinaryOp::LessEqual
                | BinaryOp::GreaterEqual
                | BinaryOp::Equal
                | BinaryOp::NotEqual
        )
    }

    pub fn spelling(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LogicAnd => "&&",
            BinaryOp::LogicOr => "||",
        }
    }
}
