//! Per-method translation state

use std::collections::HashMap;

use super::backend::BackendPrimitives;
use crate::ast::*;
use crate::types::TypeEnv;

/// Name of the variable holding the method's return value
pub const RESULT_VAR: &str = "__result";

/// `\old` argument captured before the method body runs
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub ty: Type,
    pub expr: Expr,
    pub span: Span,
}

/// Mutable context threaded through the rewrite of one method's contract
pub struct TranslationState<'a> {
    pub primitives: &'a dyn BackendPrimitives,
    pub env: TypeEnv,
    pub method_name: String,
    /// Clause currently being rewritten
    pub clause: ClauseKind,
    /// Statements that must run before the expression being built
    pub pending: Vec<Stmt>,
    pub requires: Vec<Stmt>,
    pub ensures: Vec<Stmt>,
    pub snapshots: Vec<Snapshot>,
    pub warnings: Vec<String>,
    witness_counter: u32,
    bound_counter: u32,
    snapshot_keys: HashMap<String, usize>,
    /// Rewritten result per parser node, one map per open statement block
    memo: Vec<HashMap<NodeId, Expr>>,
    /// Quantified variable renames, innermost last
    renames: Vec<(String, String)>,
}

impl<'a> TranslationState<'a> {
    pub fn new(primitives: &'a dyn BackendPrimitives, env: TypeEnv, method_name: &str) -> Self {
        Self {
            primitives,
            env,
            method_name: method_name.to_string(),
            clause: ClauseKind::Requires,
            pending: Vec::new(),
            requires: Vec::new(),
            ensures: Vec::new(),
            snapshots: Vec::new(),
            warnings: Vec::new(),
            witness_counter: 0,
            bound_counter: 0,
            snapshot_keys: HashMap::new(),
            memo: vec![HashMap::new()],
            renames: Vec::new(),
        }
    }

    /// Return type when the method produces a value
    pub fn result_ty(&self) -> Option<&Type> {
        Some(self.env.ret_ty()).filter(|ty| !ty.is_void())
    }

    pub fn fresh_witness(&mut self) -> String {
        let name = format!("__b{}", self.witness_counter);
        self.witness_counter += 1;
        name
    }

    pub fn fresh_bound(&mut self, var: &str) -> String {
        let name = format!("__q{}_{}", self.bound_counter, var);
        self.bound_counter += 1;
        name
    }

    pub fn emit(&mut self, stmt: Stmt) {
        self.pending.push(stmt);
    }

    /// Declares `boolean __bN = init;` and returns a reference to it
    pub fn declare_witness(&mut self, init: Expr, span: Span) -> Expr {
        let name = self.fresh_witness();
        self.emit(Stmt::local(name.clone(), Type::BOOLEAN, Some(init), span));
        Expr::ident(name, span)
    }

    /// Runs `f` with an empty pending list and returns what it produced.
    /// Results memoised inside do not leak past the block.
    pub fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> crate::Result<T>,
    ) -> crate::Result<(T, Vec<Stmt>)> {
        let saved = std::mem::take(&mut self.pending);
        self.memo.push(HashMap::new());
        let out = f(self);
        self.memo.pop();
        let produced = std::mem::replace(&mut self.pending, saved);
        out.map(|value| (value, produced))
    }

    pub fn memoized(&self, id: NodeId) -> Option<Expr> {
        if id.is_synthetic() {
            return None;
        }
        self.memo.iter().rev().find_map(|scope| scope.get(&id)).cloned()
    }

    pub fn memoize(&mut self, id: NodeId, expr: &Expr) {
        if id.is_synthetic() {
            return;
        }
        if let Some(scope) = self.memo.last_mut() {
            scope.insert(id, expr.clone());
        }
    }

    /// Brings a quantified variable into scope under its fresh name
    pub fn bind_quantified(&mut self, var: &str, fresh: &str, ty: &Type) {
        self.renames.push((var.to_string(), fresh.to_string()));
        self.env.push_scope();
        self.env.bind(var, ty.clone());
        self.env.bind(fresh, ty.clone());
    }

    pub fn unbind_quantified(&mut self) {
        self.renames.pop();
        self.env.pop_scope();
    }

    pub fn renamed(&self, name: &str) -> Option<&str> {
        self.renames
            .iter()
            .rev()
            .find(|(orig, _)| orig == name)
            .map(|(_, fresh)| fresh.as_str())
    }

    /// Whether `expr` mentions a variable bound by an enclosing quantifier
    pub fn mentions_bound(&self, expr: &Expr) -> bool {
        expr.referenced_names()
            .iter()
            .any(|name| self.renamed(name).is_some())
    }

    /// Snapshot variable for `expr`, reusing one already taken for a
    /// structurally equal expression
    pub fn snapshot(&mut self, expr: &Expr, ty: Type) -> String {
        let key = expr.structural_key();
        if let Some(&index) = self.snapshot_keys.get(&key) {
            return self.snapshots[index].name.clone();
        }
        let name = format!("__old{}", self.snapshots.len());
        self.snapshot_keys.insert(key, self.snapshots.len());
        self.snapshots.push(Snapshot {
            name: name.clone(),
            ty,
            expr: expr.clone(),
            span: expr.span,
        });
        name
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Zero or null value of `ty` as an expression
pub fn default_expr(ty: &Type, span: Span) -> Expr {
    let lit = match ty {
        Type::Prim(PrimType::Boolean) => Literal::Bool(false),
        Type::Prim(PrimType::Float) => Literal::Float(0.0),
        Type::Prim(PrimType::Double) => Literal::Double(0.0),
        Type::Prim(PrimType::Long) => Literal::Long(0),
        Type::Prim(_) => Literal::Int(0),
        Type::Void | Type::Class { .. } | Type::Array(_) => Literal::Null,
    };
    Expr::synthetic(ExprKind::Literal(lit), span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::backend::CProverPrimitives;

    fn state() -> TranslationState<'static> {
        TranslationState::new(&CProverPrimitives, TypeEnv::empty(Type::INT), "f")
    }

    #[test]
    fn test_fresh_names_are_unique() {
        let mut st = state();
        assert_eq!(st.fresh_witness(), "__b0");
        assert_eq!(st.fresh_witness(), "__b1");
        assert_eq!(st.fresh_bound("i"), "__q0_i");
        assert_eq!(st.fresh_bound("i"), "__q1_i");
    }

    #[test]
    fn test_snapshots_deduplicate_structurally() {
        let mut st = state();
        let a = Expr::new(NodeId(1), ExprKind::Ident("x".into()), Span::new(0, 1));
        let b = Expr::new(NodeId(7), ExprKind::Ident("x".into()), Span::new(9, 10));
        let first = st.snapshot(&a, Type::INT);
        let second = st.snapshot(&b, Type::INT);
        assert_eq!(first, second);
        assert_eq!(st.snapshots.len(), 1);
    }

    #[test]
    fn test_nested_restores_pending_and_memo() {
        let mut st = state();
        st.emit(Stmt::new(StmtKind::Empty, Span::SYNTHETIC));
        let ((), inner) = st
            .nested(|st| {
                st.declare_witness(Expr::bool_lit(true, Span::SYNTHETIC), Span::SYNTHETIC);
                st.memoize(NodeId(4), &Expr::ident("__b0", Span::SYNTHETIC));
                Ok(())
            })
            .unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(st.pending.len(), 1);
        assert!(st.memoized(NodeId(4)).is_none());
    }

    #[test]
    fn test_renames_shadow() {
        let mut st = state();
        st.bind_quantified("i", "__q0_i", &Type::INT);
        st.bind_quantified("i", "__q1_i", &Type::INT);
        assert_eq!(st.renamed("i"), Some("__q1_i"));
        st.unbind_quantified();
        assert_eq!(st.renamed("i"), Some("__q0_i"));
        st.unbind_quantified();
        assert_eq!(st.renamed("i"), None);
    }

    #[test]
    fn test_default_expr() {
        assert_eq!(default_expr(&Type::Prim(PrimType::Long), Span::SYNTHETIC).to_string(), "0L");
        assert_eq!(default_expr(&Type::class("String"), Span::SYNTHETIC).to_string(), "null");
    }
}
