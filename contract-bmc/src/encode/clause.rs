//! Rewriting of contract expressions into executable Java

use super::state::{RESULT_VAR, TranslationState, default_expr};
use super::{STACK_GROW_SIZE, STACK_RED_ZONE};
use crate::ast::*;
use crate::error::{CompileError, Result};

/// Position of a subexpression relative to the truth of its clause.
///
/// Under `Positive` the subexpression must hold for the clause to hold;
/// `!` and the left side of `==>` flip it; `==`, `?:` conditions and call
/// arguments make it `Mixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Mixed,
}

impl Polarity {
    pub fn flip(self) -> Self {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
            Polarity::Mixed => Polarity::Mixed,
        }
    }
}

impl TranslationState<'_> {
    /// Rewrites `clause` into checking statements appended to the requires
    /// or ensures list. Top-level conjuncts are checked one by one.
    pub fn encode_clause(&mut self, clause: &ContractClause) -> Result<()> {
        self.clause = clause.kind;
        if self.env.is_boolean(&clause.expr) == Some(false) {
            return Err(CompileError::translation(
                format!("{} clause is not a boolean expression", clause.kind),
                clause.expr.span,
            ));
        }
        if clause.kind == ClauseKind::Requires && const_bool(&clause.expr) == Some(false) {
            let message = format!(
                "precondition of `{}` is always false; every property holds vacuously",
                self.method_name
            );
            self.warn(message);
        }

        let mut out = Vec::new();
        for conjunct in conjuncts(&clause.expr) {
            let (cond, stmts) =
                self.nested(|st| st.rewrite(conjunct, Polarity::Positive, true))?;
            out.extend(stmts);
            out.push(self.check(cond, conjunct.span));
        }
        match clause.kind {
            ClauseKind::Requires => self.requires.extend(out),
            ClauseKind::Ensures => self.ensures.extend(out),
        }
        Ok(())
    }

    /// `assume(cond)` for preconditions, `assert cond` for postconditions
    fn check(&self, cond: Expr, span: Span) -> Stmt {
        match self.clause {
            ClauseKind::Requires => Stmt::new(StmtKind::Expr(self.primitives.assume(cond)), span),
            ClauseKind::Ensures => Stmt::new(
                StmtKind::Assert {
                    cond,
                    message: None,
                    kind: CheckKind::Ensures,
                },
                span,
            ),
        }
    }

    /// Rewrites `expr` into a Java expression, emitting whatever statements
    /// must run first into `pending`. `root` marks a whole clause conjunct.
    pub fn rewrite(&mut self, expr: &Expr, pol: Polarity, root: bool) -> Result<Expr> {
        if let Some(done) = self.memoized(expr.id) {
            return Ok(done);
        }
        let out = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.rewrite_inner(expr, pol, root)
        })?;
        self.memoize(expr.id, &out);
        Ok(out)
    }

    fn rewrite_inner(&mut self, expr: &Expr, pol: Polarity, root: bool) -> Result<Expr> {
        let span = expr.span;
        match &expr.kind {
            // Hoisted so each occurrence has a name of its own in traces
            ExprKind::Literal(Literal::Bool(_)) => Ok(self.declare_witness(expr.clone(), span)),
            ExprKind::Literal(_) | ExprKind::This => Ok(expr.clone()),
            ExprKind::Ident(name) => Ok(match self.renamed(name) {
                Some(fresh) => Expr::new(expr.id, ExprKind::Ident(fresh.to_string()), span),
                None => expr.clone(),
            }),
            ExprKind::Result => self.rewrite_result(span),
            ExprKind::Old(inner) => self.rewrite_old(inner, span),
            ExprKind::Quantifier {
                kind,
                var_ty,
                var,
                range,
                body,
            } => self.rewrite_quantifier(
                super::quantifier::Quantified {
                    kind,
                    var_ty,
                    var,
                    range: range.as_deref(),
                    body,
                    span,
                },
                pol,
                root,
            ),
            ExprKind::JmlBuiltin { name, .. } => Err(CompileError::translation(
                format!("unsupported JML construct `\\{name}`"),
                span,
            )),
            ExprKind::Binary { left, op, right } => match op {
                BinOp::And => self.rewrite_lazy(left, pol, false, BinOp::And, right, pol, span),
                BinOp::Or => self.rewrite_lazy(left, pol, false, BinOp::Or, right, pol, span),
                // a ==> b is !a || b
                BinOp::Implies => {
                    self.rewrite_lazy(left, pol.flip(), true, BinOp::Or, right, pol, span)
                }
                BinOp::RevImplies => {
                    self.rewrite_lazy(right, pol.flip(), true, BinOp::Or, left, pol, span)
                }
                BinOp::Equiv | BinOp::NotEquiv => {
                    let java_op = if *op == BinOp::Equiv { BinOp::Eq } else { BinOp::Ne };
                    let parts = self
                        .rewrite_operands(&[left.as_ref(), right.as_ref()], Polarity::Mixed)?;
                    let mut out = with_children(expr, parts);
                    if let ExprKind::Binary { op, .. } = &mut out.kind {
                        *op = java_op;
                    }
                    Ok(out)
                }
                // Non-short-circuit boolean connectives keep polarity
                BinOp::BitAnd | BinOp::BitOr => {
                    let parts = self.rewrite_operands(&[left.as_ref(), right.as_ref()], pol)?;
                    Ok(with_children(expr, parts))
                }
                _ => {
                    let parts = self
                        .rewrite_operands(&[left.as_ref(), right.as_ref()], Polarity::Mixed)?;
                    Ok(with_children(expr, parts))
                }
            },
            ExprKind::Unary {
                op: UnOp::Not,
                expr: inner,
            } => {
                let inner = self.rewrite(inner, pol.flip(), false)?;
                Ok(at(Expr::not(inner), span))
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => self.rewrite_conditional(expr, cond, then_expr, else_expr, pol),
            _ => {
                let children = expr.children();
                let parts = self.rewrite_operands(&children, Polarity::Mixed)?;
                Ok(with_children(expr, parts))
            }
        }
    }

    fn rewrite_result(&self, span: Span) -> Result<Expr> {
        if self.clause == ClauseKind::Requires {
            return Err(CompileError::translation(
                "\\result cannot be used in a precondition",
                span,
            ));
        }
        if self.result_ty().is_none() {
            return Err(CompileError::translation(
                format!("\\result used in method `{}` which returns no value", self.method_name),
                span,
            ));
        }
        Ok(Expr::ident(RESULT_VAR, span))
    }

    fn rewrite_old(&mut self, inner: &Expr, span: Span) -> Result<Expr> {
        if self.clause == ClauseKind::Requires {
            return Err(CompileError::translation(
                "\\old cannot be used in a precondition",
                span,
            ));
        }
        if inner.contains_jml() {
            return Err(CompileError::translation(
                "argument of \\old must not contain JML expressions such as \\result",
                inner.span,
            ));
        }
        if self.mentions_bound(inner) {
            return Err(CompileError::translation(
                "argument of \\old refers to a quantified variable",
                inner.span,
            ));
        }
        let ty = self.env.type_of(inner).ok_or_else(|| {
            CompileError::translation(
                format!("cannot determine the type of `\\old({inner})`"),
                span,
            )
        })?;
        let name = self.snapshot(inner, ty);
        Ok(Expr::ident(name, span))
    }

    /// Short-circuit connective. When the right operand needs statements of
    /// its own they run only if the left operand does not decide the result.
    #[allow(clippy::too_many_arguments)]
    fn rewrite_lazy(
        &mut self,
        left: &Expr,
        left_pol: Polarity,
        negate_left: bool,
        op: BinOp,
        right: &Expr,
        right_pol: Polarity,
        span: Span,
    ) -> Result<Expr> {
        let mut l = self.rewrite(left, left_pol, false)?;
        if negate_left {
            l = Expr::not(l);
        }
        let (r, stmts) = self.nested(|st| st.rewrite(right, right_pol, false))?;
        if stmts.is_empty() {
            return Ok(at(Expr::binary(l, op, r), span));
        }

        let witness = self.declare_witness(l, span);
        let guard = match op {
            BinOp::And => witness.clone(),
            _ => Expr::not(witness.clone()),
        };
        let mut block = stmts;
        block.push(Stmt::new(StmtKind::Expr(Expr::assign(witness.clone(), r)), span));
        self.emit(Stmt::new(
            StmtKind::If {
                cond: guard,
                then_branch: Box::new(Stmt::block(block, span)),
                else_branch: None,
            },
            span,
        ));
        Ok(witness)
    }

    fn rewrite_conditional(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
        pol: Polarity,
    ) -> Result<Expr> {
        let span = expr.span;
        let c = self.rewrite(cond, Polarity::Mixed, false)?;
        let (t, then_stmts) = self.nested(|st| st.rewrite(then_expr, pol, false))?;
        let (e, else_stmts) = self.nested(|st| st.rewrite(else_expr, pol, false))?;
        if then_stmts.is_empty() && else_stmts.is_empty() {
            return Ok(at(
                Expr::synthetic(
                    ExprKind::Conditional {
                        cond: Box::new(c),
                        then_expr: Box::new(t),
                        else_expr: Box::new(e),
                    },
                    span,
                ),
                span,
            ));
        }

        let ty = self.env.type_of(expr).ok_or_else(|| {
            CompileError::translation("cannot determine the type of conditional expression", span)
        })?;
        let name = self.fresh_witness();
        self.env.bind(name.clone(), ty.clone());
        let target = Expr::ident(name.clone(), span);
        self.emit(Stmt::local(name, ty.clone(), Some(default_expr(&ty, span)), span));
        let branch = |mut stmts: Vec<Stmt>, value: Expr| {
            stmts.push(Stmt::new(StmtKind::Expr(Expr::assign(target.clone(), value)), span));
            Box::new(Stmt::block(stmts, span))
        };
        let then_branch = branch(then_stmts, t);
        let else_branch = branch(else_stmts, e);
        self.emit(Stmt::new(
            StmtKind::If {
                cond: c,
                then_branch,
                else_branch: Some(else_branch),
            },
            span,
        ));
        Ok(target)
    }

    /// Rewrites eagerly evaluated operands left to right. When a later
    /// operand needs statements, earlier side-effecting operands are moved
    /// into temporaries first so evaluation order is kept.
    fn rewrite_operands(&mut self, operands: &[&Expr], pol: Polarity) -> Result<Vec<Expr>> {
        let mut done: Vec<(Expr, &Expr)> = Vec::with_capacity(operands.len());
        for operand in operands {
            let (value, stmts) = self.nested(|st| st.rewrite(operand, pol, false))?;
            if !stmts.is_empty() {
                for (prev, original) in done.iter_mut() {
                    if prev.has_side_effects() {
                        *prev = self.hoist(prev.clone(), *original)?;
                    }
                }
                self.pending.extend(stmts);
            }
            done.push((value, *operand));
        }
        Ok(done.into_iter().map(|(value, _)| value).collect())
    }

    fn hoist(&mut self, value: Expr, original: &Expr) -> Result<Expr> {
        let span = original.span;
        let ty = self.env.type_of(original).ok_or_else(|| {
            CompileError::translation(
                format!("cannot keep evaluation order around `{original}` whose type is unknown"),
                span,
            )
        })?;
        let name = self.fresh_witness();
        self.env.bind(name.clone(), ty.clone());
        self.emit(Stmt::local(name.clone(), ty, Some(value), span));
        Ok(Expr::ident(name, span))
    }
}

/// Top-level `&&` operands, left to right
pub fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    match &expr.kind {
        ExprKind::Binary {
            left,
            op: BinOp::And,
            right,
        } => {
            let mut out = conjuncts(left);
            out.extend(conjuncts(right));
            out
        }
        _ => vec![expr],
    }
}

/// Value of a clause built only from boolean literals and connectives
pub fn const_bool(expr: &Expr) -> Option<bool> {
    match &expr.kind {
        ExprKind::Literal(Literal::Bool(b)) => Some(*b),
        ExprKind::Unary {
            op: UnOp::Not,
            expr,
        } => const_bool(expr).map(|b| !b),
        ExprKind::Binary { left, op, right } => {
            let (l, r) = (const_bool(left), const_bool(right));
            match op {
                BinOp::And => match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                },
                BinOp::Or => match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                },
                BinOp::Implies => match (l, r) {
                    (Some(false), _) | (_, Some(true)) => Some(true),
                    (Some(true), Some(false)) => Some(false),
                    _ => None,
                },
                BinOp::Equiv | BinOp::Eq => Some(l? == r?),
                BinOp::NotEquiv | BinOp::Ne => Some(l? != r?),
                _ => None,
            }
        }
        _ => None,
    }
}

fn at(mut expr: Expr, span: Span) -> Expr {
    expr.span = span;
    expr
}

/// Copy of `expr` with its direct children replaced, in `children()` order
fn with_children(expr: &Expr, new: Vec<Expr>) -> Expr {
    let mut new = new.into_iter();
    let mut next = |old: &Expr| new.next().unwrap_or_else(|| old.clone());
    let kind = match &expr.kind {
        ExprKind::FieldAccess { target, field } => ExprKind::FieldAccess {
            target: Box::new(next(target.as_ref())),
            field: field.clone(),
        },
        ExprKind::ArrayAccess { array, index } => ExprKind::ArrayAccess {
            array: Box::new(next(array.as_ref())),
            index: Box::new(next(index.as_ref())),
        },
        ExprKind::Binary { left, op, right } => ExprKind::Binary {
            left: Box::new(next(left.as_ref())),
            op: *op,
            right: Box::new(next(right.as_ref())),
        },
        ExprKind::Unary { op, expr: inner } => ExprKind::Unary {
            op: *op,
            expr: Box::new(next(inner.as_ref())),
        },
        ExprKind::Assign { target, op, value } => ExprKind::Assign {
            target: Box::new(next(target.as_ref())),
            op: *op,
            value: Box::new(next(value.as_ref())),
        },
        ExprKind::MethodCall {
            receiver,
            name,
            args,
        } => ExprKind::MethodCall {
            receiver: receiver.as_deref().map(|r| Box::new(next(r))),
            name: name.clone(),
            args: args.iter().map(&mut next).collect(),
        },
        ExprKind::New { ty, args } => ExprKind::New {
            ty: ty.clone(),
            args: args.iter().map(&mut next).collect(),
        },
        ExprKind::NewArray {
            elem,
            dims,
            extra_dims,
            init,
        } => ExprKind::NewArray {
            elem: elem.clone(),
            dims: dims.iter().map(&mut next).collect(),
            extra_dims: *extra_dims,
            init: init.as_ref().map(|items| items.iter().map(&mut next).collect()),
        },
        ExprKind::ArrayInit(items) => ExprKind::ArrayInit(items.iter().map(&mut next).collect()),
        ExprKind::Cast { ty, expr: inner } => ExprKind::Cast {
            ty: ty.clone(),
            expr: Box::new(next(inner.as_ref())),
        },
        ExprKind::InstanceOf { expr: inner, ty } => ExprKind::InstanceOf {
            expr: Box::new(next(inner.as_ref())),
            ty: ty.clone(),
        },
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => ExprKind::Conditional {
            cond: Box::new(next(cond.as_ref())),
            then_expr: Box::new(next(then_expr.as_ref())),
            else_expr: Box::new(next(else_expr.as_ref())),
        },
        other => other.clone(),
    };
    Expr::new(expr.id, kind, expr.span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::backend::CProverPrimitives;
    use crate::types::TypeEnv;

    fn parse_clause(source: &str) -> Expr {
        let wrapped = format!("class T {{ boolean f() {{ return {source}; }} }}");
        let tokens = crate::lexer::tokenize(&wrapped).unwrap();
        let program = crate::parser::parse("T.java", &wrapped, tokens).unwrap();
        let (_, method) = program.methods().next().unwrap();
        match &method.body.as_ref().unwrap()[0].kind {
            StmtKind::Return(Some(expr)) => expr.clone(),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    fn state(ret: Type) -> TranslationState<'static> {
        let mut env = TypeEnv::empty(ret);
        env.bind("x", Type::INT);
        env.bind("n", Type::INT);
        env.bind("a", Type::array_of(Type::INT));
        TranslationState::new(&CProverPrimitives, env, "f")
    }

    fn clause(kind: ClauseKind, source: &str) -> ContractClause {
        let expr = parse_clause(source);
        ContractClause {
            kind,
            span: expr.span,
            expr,
        }
    }

    fn render(stmts: &[Stmt]) -> Vec<String> {
        stmts.iter().map(|s| format!("{:?}", s.kind)).collect()
    }

    #[test]
    fn test_simple_requires_becomes_assume() {
        let mut st = state(Type::INT);
        st.encode_clause(&clause(ClauseKind::Requires, "x > 0 && n < 10")).unwrap();
        assert_eq!(st.requires.len(), 2);
        match &st.requires[0].kind {
            StmtKind::Expr(call) => {
                assert_eq!(call.to_string(), "org.cprover.CProver.assume(x > 0)")
            }
            other => panic!("expected assume, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_ensures_becomes_assert() {
        let mut st = state(Type::INT);
        st.encode_clause(&clause(ClauseKind::Ensures, "\\result >= x")).unwrap();
        match &st.ensures[0].kind {
            StmtKind::Assert { cond, kind, .. } => {
                assert_eq!(cond.to_string(), "__result >= x");
                assert_eq!(*kind, CheckKind::Ensures);
            }
            other => panic!("expected assert, got {other:?}"),
        }
    }

    #[test]
    fn test_result_in_requires_fails() {
        let mut st = state(Type::INT);
        let err = st
            .encode_clause(&clause(ClauseKind::Requires, "\\result > 0"))
            .unwrap_err();
        assert!(err.message().contains("precondition"));
    }

    #[test]
    fn test_result_in_void_method_fails() {
        let mut st = state(Type::Void);
        let err = st
            .encode_clause(&clause(ClauseKind::Ensures, "\\result > 0"))
            .unwrap_err();
        assert!(err.message().contains("returns no value"));
    }

    #[test]
    fn test_non_boolean_clause_fails() {
        let mut st = state(Type::INT);
        let err = st
            .encode_clause(&clause(ClauseKind::Requires, "x + 1"))
            .unwrap_err();
        assert!(err.message().contains("not a boolean"));
    }

    #[test]
    fn test_false_precondition_warns() {
        let mut st = state(Type::INT);
        st.encode_clause(&clause(ClauseKind::Requires, "false")).unwrap();
        assert_eq!(st.warnings.len(), 1);
        // the literal itself is hoisted
        assert_eq!(st.requires.len(), 2);
        assert!(matches!(st.requires[0].kind, StmtKind::LocalVar { .. }));
    }

    #[test]
    fn test_old_snapshot_shared() {
        let mut st = state(Type::INT);
        st.encode_clause(&clause(
            ClauseKind::Ensures,
            "\\result == \\old(x) + \\old(x)",
        ))
        .unwrap();
        assert_eq!(st.snapshots.len(), 1);
        match &st.ensures[0].kind {
            StmtKind::Assert { cond, .. } => {
                assert_eq!(cond.to_string(), "__result == __old0 + __old0")
            }
            other => panic!("expected assert, got {other:?}"),
        }
    }

    #[test]
    fn test_old_in_requires_fails() {
        let mut st = state(Type::INT);
        assert!(
            st.encode_clause(&clause(ClauseKind::Requires, "\\old(x) > 0"))
                .is_err()
        );
    }

    #[test]
    fn test_old_of_bound_variable_fails() {
        let mut st = state(Type::INT);
        let err = st
            .encode_clause(&clause(
                ClauseKind::Ensures,
                "(\\forall int i; 0 <= i && i < n; \\old(a[i]) == a[i])",
            ))
            .unwrap_err();
        assert!(err.message().contains("quantified variable"));
    }

    #[test]
    fn test_unsupported_builtin_fails() {
        let mut st = state(Type::INT);
        let err = st
            .encode_clause(&clause(ClauseKind::Ensures, "\\fresh(a)"))
            .unwrap_err();
        assert!(err.message().contains("\\fresh"));
    }

    #[test]
    fn test_lazy_right_operand_is_guarded() {
        let mut st = state(Type::INT);
        st.encode_clause(&clause(
            ClauseKind::Requires,
            "n > 0 ==> (\\forall int i; 0 <= i && i < n; a[i] > 0)",
        ))
        .unwrap();
        // the loop witness is __b0, the implication witness __b1
        let kinds = render(&st.requires);
        assert_eq!(kinds.len(), 3);
        assert!(kinds[0].starts_with("LocalVar"));
        assert!(kinds[1].starts_with("If"));
        match &st.requires[2].kind {
            StmtKind::Expr(call) => {
                assert_eq!(call.to_string(), "org.cprover.CProver.assume(__b1)")
            }
            other => panic!("expected assume, got {other:?}"),
        }
    }

    #[test]
    fn test_equivalence_becomes_equality() {
        let mut st = state(Type::INT);
        st.encode_clause(&clause(ClauseKind::Ensures, "x > 0 <==> n > 0"))
            .unwrap();
        match &st.ensures[0].kind {
            StmtKind::Assert { cond, .. } => assert_eq!(cond.to_string(), "x > 0 == n > 0"),
            other => panic!("expected assert, got {other:?}"),
        }
    }

    #[test]
    fn test_const_bool() {
        assert_eq!(const_bool(&parse_clause("!true || false")), Some(false));
        assert_eq!(const_bool(&parse_clause("false ==> x > 0")), Some(true));
        assert_eq!(const_bool(&parse_clause("x > 0")), None);
    }

    #[test]
    fn test_polarity_flip() {
        assert_eq!(Polarity::Positive.flip(), Polarity::Negative);
        assert_eq!(Polarity::Mixed.flip(), Polarity::Mixed);
    }
}
