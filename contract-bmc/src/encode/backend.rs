//! Model-checker primitives used by the encoder

use crate::ast::{Expr, PrimType, Span, Type};

/// Injected capability producing backend-specific assume and nondet calls
pub trait BackendPrimitives {
    /// Expression statement restricting execution to states where `cond` holds
    fn assume(&self, cond: Expr) -> Expr;

    /// Fresh unconstrained value of `ty`, or `None` when the backend has no
    /// primitive for it
    fn nondet(&self, ty: &Type) -> Option<Expr>;
}

/// `org.cprover.CProver` as shipped with the JBMC models library
#[derive(Debug, Clone, Copy, Default)]
pub struct CProverPrimitives;

const CPROVER_CLASS: &str = "org.cprover.CProver";

impl BackendPrimitives for CProverPrimitives {
    fn assume(&self, cond: Expr) -> Expr {
        let span = cond.span;
        Expr::call(Some(Expr::path(CPROVER_CLASS, span)), "assume", vec![cond], span)
    }

    fn nondet(&self, ty: &Type) -> Option<Expr> {
        let name = match ty {
            Type::Prim(PrimType::Boolean) => "nondetBoolean",
            Type::Prim(PrimType::Byte) => "nondetByte",
            Type::Prim(PrimType::Short) => "nondetShort",
            Type::Prim(PrimType::Char) => "nondetChar",
            Type::Prim(PrimType::Int) => "nondetInt",
            Type::Prim(PrimType::Long) => "nondetLong",
            Type::Prim(PrimType::Float) => "nondetFloat",
            Type::Prim(PrimType::Double) => "nondetDouble",
            _ => return None,
        };
        let span = Span::SYNTHETIC;
        Some(Expr::call(Some(Expr::path(CPROVER_CLASS, span)), name, vec![], span))
    }
}
