//! C type model shared by the parser, semantic analysis and code generation.
//!
//! Only LP64 targets are modelled: `long` and pointers are 8 bytes.

use std::fmt;

use itertools::Itertools;

bitflags::bitflags! {
    /// Bitflags for type qualifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeQualifiers: u8 {
        const CONST     = 0b0001;
        const VOLATILE  = 0b0010;
        const RESTRICT  = 0b0100;
    }
}

/// Storage classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageClass {
    #[default]
    None,
    Typedef,
    Extern,
    Static,
    Auto,
    Register,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub ret: Box<CType>,
    pub params: Vec<CType>,
    pub variadic: bool,
    /// `false` for old-style `f()` declarations
    pub prototyped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CType {
    Void,
    Bool,
    Char { signed: bool },
    Short { signed: bool },
    Int { signed: bool },
    Long { signed: bool },
    LongLong { signed: bool },
    Pointer(Box<CType>),
    Array(Box<CType>, Option<u64>),
    Function(FunctionType),
}

pub const POINTER_SIZE: u64 = 8;

impl CType {
    pub const INT: CType = CType::Int { signed: true };
    pub const UINT: CType = CType::Int { signed: false };
    pub const LONG: CType = CType::Long { signed: true };
    pub const ULONG: CType = CType::Long { signed: false };
    pub const CHAR: CType = CType::Char { signed: true };

    pub fn pointer_to(ty: CType) -> CType {
        CType::Pointer(Box::new(ty))
    }

    /// Size in bytes; 0 for void, functions and arrays of unknown bound
    pub fn size(&self) -> u64 {
        match self {
            CType::Void | CType::Function(_) => 0,
            CType::Bool | CType::Char { .. } => 1,
            CType::Short { .. } => 2,
            CType::Int { .. } => 4,
            CType::Long { .. } | CType::LongLong { .. } | CType::Pointer(_) => 8,
            CType::Array(elem, len) => elem.size() * len.unwrap_or(0),
        }
    }

    pub fn align(&self) -> u64 {
        match self {
            CType::Array(elem, _) => elem.align(),
            CType::Void | CType::Function(_) => 1,
            other => other.size(),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, CType::Void)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            CType::Bool
                | CType::Char { .. }
                | CType::Short { .. }
                | CType::Int { .. }
                | CType::Long { .. }
                | CType::LongLong { .. }
        )
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Pointer(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, CType::Array(..))
    }

    pub fn is_function(&self) -> bool {
        matches!(self, CType::Function(_))
    }

    /// Integer or pointer
    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_pointer()
    }

    pub fn is_complete(&self) -> bool {
        match self {
            CType::Void | CType::Function(_) => false,
            CType::Array(elem, len) => len.is_some() && elem.is_complete(),
            _ => true,
        }
    }

    pub fn is_signed(&self) -> bool {
        match self {
            CType::Char { signed }
            | CType::Short { signed }
            | CType::Int { signed }
            | CType::Long { signed }
            | CType::LongLong { signed } => *signed,
            _ => false,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CType::Bool => 0,
            CType::Char { .. } => 1,
            CType::Short { .. } => 2,
            CType::Int { .. } => 3,
            CType::Long { .. } => 4,
            CType::LongLong { .. } => 5,
            _ => 0,
        }
    }

    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            CType::Function(f) => Some(f),
            CType::Pointer(inner) => match inner.as_ref() {
                CType::Function(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Array-to-pointer and function-to-pointer conversion
    pub fn decay(&self) -> CType {
        match self {
            CType::Array(elem, _) => CType::pointer_to((**elem).clone()),
            CType::Function(_) => CType::pointer_to(self.clone()),
            other => other.clone(),
        }
    }

    /// Integer promotion
    pub fn promote(&self) -> CType {
        if self.is_integer() && self.rank() < CType::INT.rank() {
            CType::INT
        } else {
            self.clone()
        }
    }

    /// Usual arithmetic conversions for two integer operands
    pub fn common(a: &CType, b: &CType) -> CType {
        let a = a.promote();
        let b = b.promote();
        if a == b {
            return a;
        }
        let (hi, lo) = if a.rank() >= b.rank() { (a, b) } else { (b, a) };
        if hi.rank() == lo.rank() {
            // same rank, different signedness
            return hi.with_signedness(false);
        }
        if !hi.is_signed() || hi.size() > lo.size() {
            return hi;
        }
        if lo.is_signed() {
            hi
        } else {
            hi.with_signedness(false)
        }
    }

    fn with_signedness(&self, signed: bool) -> CType {
        match self {
            CType::Char { .. } => CType::Char { signed },
            CType::Short { .. } => CType::Short { signed },
            CType::Int { .. } => CType::Int { signed },
            CType::Long { .. } => CType::Long { signed },
            CType::LongLong { .. } => CType::LongLong { signed },
            other => other.clone(),
        }
    }

    /// Types that may be assigned to each other without a diagnostic
    pub fn is_compatible(&self, other: &CType) -> bool {
        match (self, other) {
            (CType::Pointer(a), CType::Pointer(b)) => a.is_void() || b.is_void() || a.is_compatible(b),
            (CType::Array(a, _), CType::Array(b, _)) => a.is_compatible(b),
            (CType::Function(a), CType::Function(b)) => {
                a.ret.is_compatible(&b.ret)
                    && (!a.prototyped
                        || !b.prototyped
                        || (a.variadic == b.variadic
                            && a.params.len() == b.params.len()
                            && a.params.iter().zip(&b.params).all(|(x, y)| x.is_compatible(y))))
            }
            (a, b) if a.is_integer() && b.is_integer() => a.size() == b.size() && a.is_signed() == b.is_signed(),
            (a, b) => a == b,
        }
    }

    fn base_name(&self) -> &'static str {
        match self {
            CType::Void => "void",
            CType::Bool => "_Bool",
            CType::Char { signed: true } => "char",
            CType::Char { signed: false } => "unsigned char",
            CType::Short { signed: true } => "short",
            CType::Short { signed: false } => "unsigned short",
            CType::Int { signed: true } => "int",
            CType::Int { signed: false } => "unsigned int",
            CType::Long { signed: true } => "long",
            CType::Long { signed: false } => "unsigned long",
            CType::LongLong { signed: true } => "long long",
            CType::LongLong { signed: false } => "unsigned long long",
            CType::Pointer(_) | CType::Array(..) | CType::Function(_) => "",
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Pointer(inner) => match inner.as_ref() {
                CType::Function(func) => write!(f, "{} (*)({})", func.ret, param_list(func)),
                CType::Array(elem, len) => write!(f, "{} (*)[{}]", elem, len.map(|l| l.to_string()).unwrap_or_default()),
                other if other.to_string().ends_with('*') => write!(f, "{}*", other),
                other => write!(f, "{} *", other),
            },
            CType::Array(elem, len) => write!(f, "{}[{}]", elem, len.map(|l| l.to_string()).unwrap_or_default()),
            CType::Function(func) => write!(f, "{} ({})", func.ret, param_list(func)),
            other => f.write_str(other.base_name()),
        }
    }
}

fn param_list(func: &FunctionType) -> String {
    let mut params = func.params.iter().map(|p| p.to_string()).collect_vec();
    if func.variadic {
        params.push("...".to_string());
    }
    if params.is_empty() && func.prototyped {
        params.push("void".to_string());
    }
    params.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usual_arithmetic_conversions() {
        let uint = CType::UINT;
        let long = CType::LONG;
        assert_eq!(CType::common(&CType::CHAR, &CType::Short { signed: true }), CType::INT);
        assert_eq!(CType::common(&CType::INT, &uint), uint);
        assert_eq!(CType::common(&uint, &long), long);
        assert_eq!(CType::common(&CType::ULONG, &long), CType::ULONG);
    }

    #[test]
    fn display_spells_c_types() {
        let f = CType::Function(FunctionType {
            ret: Box::new(CType::INT),
            params: vec![CType::pointer_to(CType::CHAR)],
            variadic: true,
            prototyped: true,
        });
        assert_eq!(f.to_string(), "int (char *, ...)");
        assert_eq!(CType::Array(Box::new(CType::INT), Some(4)).to_string(), "int[4]");
        assert_eq!(CType::pointer_to(f).to_string(), "int (*)(char *, ...)");
    }
}
