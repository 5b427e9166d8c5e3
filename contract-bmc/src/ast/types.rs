//! Type AST nodes

use serde::{Deserialize, Serialize};

/// Primitive Java types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimType {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl PrimType {
    pub fn from_keyword(kw: &str) -> Option<Self> {
        Some(match kw {
            "boolean" => PrimType::Boolean,
            "byte" => PrimType::Byte,
            "short" => PrimType::Short,
            "char" => PrimType::Char,
            "int" => PrimType::Int,
            "long" => PrimType::Long,
            "float" => PrimType::Float,
            "double" => PrimType::Double,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            PrimType::Boolean => "boolean",
            PrimType::Byte => "byte",
            PrimType::Short => "short",
            PrimType::Char => "char",
            PrimType::Int => "int",
            PrimType::Long => "long",
            PrimType::Float => "float",
            PrimType::Double => "double",
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimType::Byte | PrimType::Short | PrimType::Char | PrimType::Int | PrimType::Long
        )
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, PrimType::Boolean)
    }
}

/// Type representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Void,
    Prim(PrimType),
    /// Possibly qualified class name with (erased) type arguments
    Class { name: String, args: Vec<Type> },
    Array(Box<Type>),
}

impl Type {
    pub const INT: Type = Type::Prim(PrimType::Int);
    pub const BOOLEAN: Type = Type::Prim(PrimType::Boolean);

    pub fn class(name: impl Into<String>) -> Self {
        Type::Class {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn array_of(elem: Type) -> Self {
        Type::Array(Box::new(elem))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Prim(PrimType::Boolean))
            || matches!(self, Type::Class { name, .. } if name == "Boolean" || name == "java.lang.Boolean")
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, Type::Prim(_))
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Type::Prim(p) if p.is_integral())
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Literal source text of the zero/null value of this type
    pub fn default_value(&self) -> &'static str {
        match self {
            Type::Prim(PrimType::Boolean) => "false",
            Type::Prim(PrimType::Float) => "0.0f",
            Type::Prim(PrimType::Double) => "0.0",
            Type::Prim(PrimType::Long) => "0L",
            Type::Prim(_) => "0",
            Type::Void | Type::Class { .. } | Type::Array(_) => "null",
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Prim(p) => write!(f, "{}", p.keyword()),
            Type::Class { name, args } => {
                write!(f, "{name}")?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}
