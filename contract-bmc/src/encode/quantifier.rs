//! Quantifier encodings
//!
//! A quantifier whose truth the backend may pick freely (an existential in
//! a precondition, a universal in a postcondition) becomes a nondeterministic
//! choice of the bound variable. Every other quantifier is enumerated over
//! the bounds found in its range. The choice is only made in positive
//! position; negated or mixed occurrences are always enumerated.
//!
//! A precondition may assume the chosen value lies in the range. A
//! postcondition must not: the assumption would cut off every later check
//! when the range is empty, so the range guards the body instead.

use super::clause::{Polarity, conjuncts};
use super::state::TranslationState;
use crate::ast::*;
use crate::error::{CompileError, Result};

/// Borrowed view of a quantifier expression
pub struct Quantified<'e> {
    pub kind: &'e QuantKind,
    pub var_ty: &'e Type,
    pub var: &'e str,
    pub range: Option<&'e Expr>,
    pub body: &'e Expr,
    pub span: Span,
}

impl<'e> Quantified<'e> {
    /// `(\forall T x; a ==> b)` and `(\exists T x; a && b)` written without
    /// a range read as if `a` were the range
    fn with_guard_as_range(self) -> Self {
        if self.range.is_some() {
            return self;
        }
        let body: &'e Expr = self.body;
        let ExprKind::Binary { left, op, right } = &body.kind else {
            return self;
        };
        let splits = match self.kind {
            QuantKind::ForAll => *op == BinOp::Implies,
            QuantKind::Exists => *op == BinOp::And,
            QuantKind::Other(_) => false,
        };
        if !splits {
            return self;
        }
        Quantified {
            range: Some(left.as_ref()),
            body: right.as_ref(),
            ..self
        }
    }
}

/// Loop bounds found among the range conjuncts
#[derive(Debug, Default)]
struct Bounds<'e> {
    /// Lower bound and whether it is strict
    lower: Option<(&'e Expr, bool)>,
    /// Upper bound and whether it is inclusive
    upper: Option<(&'e Expr, bool)>,
    /// Remaining conjuncts, checked inside the loop
    guards: Vec<&'e Expr>,
}

impl<'e> Bounds<'e> {
    fn extract(var: &str, range: &'e Expr) -> Self {
        let mut bounds = Bounds::default();
        for conjunct in conjuncts(range) {
            if !bounds.record(var, conjunct) {
                bounds.guards.push(conjunct);
            }
        }
        bounds
    }

    /// Records `conjunct` as a bound when it has the shape `var op e` or
    /// `e op var` and no bound of that side was found yet
    fn record(&mut self, var: &str, conjunct: &'e Expr) -> bool {
        let ExprKind::Binary { left, op, right } = &conjunct.kind else {
            return false;
        };
        let (left, right) = (left.as_ref(), right.as_ref());
        let is_var = |e: &Expr| matches!(&e.kind, ExprKind::Ident(name) if name == var);
        let free = |e: &Expr| !e.referenced_names().iter().any(|name| name == var);

        // Normalise to `var op bound`
        let (op, bound) = if is_var(left) && free(right) {
            (*op, right)
        } else if is_var(right) && free(left) {
            let mirrored = match op {
                BinOp::Lt => BinOp::Gt,
                BinOp::Le => BinOp::Ge,
                BinOp::Gt => BinOp::Lt,
                BinOp::Ge => BinOp::Le,
                _ => return false,
            };
            (mirrored, left)
        } else {
            return false;
        };

        match op {
            BinOp::Ge | BinOp::Gt if self.lower.is_none() => {
                self.lower = Some((bound, op == BinOp::Gt));
                true
            }
            BinOp::Lt | BinOp::Le if self.upper.is_none() => {
                self.upper = Some((bound, op == BinOp::Le));
                true
            }
            _ => false,
        }
    }
}

impl TranslationState<'_> {
    pub(super) fn rewrite_quantifier(
        &mut self,
        q: Quantified<'_>,
        pol: Polarity,
        root: bool,
    ) -> Result<Expr> {
        let exists = match q.kind {
            QuantKind::ForAll => false,
            QuantKind::Exists => true,
            QuantKind::Other(name) => {
                return Err(CompileError::translation(
                    format!("unsupported quantifier `\\{name}`"),
                    q.span,
                ));
            }
        };
        if !q.var_ty.is_integral() {
            return Err(CompileError::translation(
                format!(
                    "quantified variable `{}` must have an integral type, found `{}`",
                    q.var, q.var_ty
                ),
                q.span,
            ));
        }

        let q = q.with_guard_as_range();
        let chooses_freely = match self.clause {
            ClauseKind::Requires => exists,
            ClauseKind::Ensures => !exists,
        };
        let fresh = self.fresh_bound(q.var);
        self.bind_quantified(q.var, &fresh, q.var_ty);
        let out = if chooses_freely && pol == Polarity::Positive {
            self.choose_nondet(&q, &fresh, exists, pol, root)
        } else {
            self.enumerate(&q, &fresh, exists, pol)
        };
        self.unbind_quantified();
        out
    }

    /// `T x = nondet(); assume(range); body` at the root of a precondition,
    /// `range ==> body` or `range && body` everywhere else
    fn choose_nondet(
        &mut self,
        q: &Quantified<'_>,
        fresh: &str,
        exists: bool,
        pol: Polarity,
        root: bool,
    ) -> Result<Expr> {
        let init = self.primitives.nondet(q.var_ty).ok_or_else(|| {
            CompileError::translation(
                format!("backend has no nondeterministic value of type `{}`", q.var_ty),
                q.span,
            )
        })?;
        self.emit(Stmt::local(fresh, q.var_ty.clone(), Some(init), q.span));

        match q.range {
            None => self.rewrite(q.body, pol, root),
            Some(range) if root && self.clause == ClauseKind::Requires => {
                let range = self.rewrite(range, Polarity::Mixed, false)?;
                let assume = self.primitives.assume(range);
                self.emit(Stmt::expr(assume));
                self.rewrite(q.body, pol, true)
            }
            Some(range) => {
                let op = if exists { BinOp::And } else { BinOp::Implies };
                let mut guarded = Expr::binary(range.clone(), op, q.body.clone());
                guarded.span = q.span;
                self.rewrite(&guarded, pol, false)
            }
        }
    }

    /// Bounded loop folding the body into a boolean witness
    fn enumerate(
        &mut self,
        q: &Quantified<'_>,
        fresh: &str,
        exists: bool,
        pol: Polarity,
    ) -> Result<Expr> {
        let span = q.span;
        let no_upper = || {
            CompileError::translation(
                format!(
                    "quantifier over `{}` needs an upper bound in its range to be enumerated",
                    q.var
                ),
                span,
            )
        };
        let range = q.range.ok_or_else(no_upper)?;
        let bounds = Bounds::extract(q.var, range);
        let (upper, inclusive) = bounds.upper.ok_or_else(no_upper)?;

        let start = match bounds.lower {
            Some((lower, strict)) => {
                let lower = self.rewrite(lower, Polarity::Mixed, false)?;
                if strict {
                    let next = Expr::binary(lower, BinOp::Add, Expr::int_lit(1, span));
                    narrow(next, q.var_ty)
                } else {
                    lower
                }
            }
            None => Expr::int_lit(0, span),
        };
        let limit = self.rewrite(upper, Polarity::Mixed, false)?;
        let witness = self.declare_witness(Expr::bool_lit(!exists, span), span);

        let predicate = match and_all(&bounds.guards) {
            None => q.body.clone(),
            Some(guard) => {
                let op = if exists { BinOp::And } else { BinOp::Implies };
                Expr::binary(guard, op, q.body.clone())
            }
        };
        let (value, mut stmts) = self.nested(|st| st.rewrite(&predicate, pol, false))?;
        let fold = if exists { BinOp::Or } else { BinOp::And };
        stmts.push(Stmt::new(
            StmtKind::Expr(Expr::assign(
                witness.clone(),
                Expr::binary(witness.clone(), fold, value),
            )),
            span,
        ));

        let var = Expr::ident(fresh, span);
        let cmp = if inclusive { BinOp::Le } else { BinOp::Lt };
        self.emit(Stmt::new(
            StmtKind::For {
                init: vec![Stmt::local(fresh, q.var_ty.clone(), Some(start), span)],
                cond: Some(Expr::binary(var.clone(), cmp, limit)),
                update: vec![Expr::synthetic(
                    ExprKind::Unary {
                        op: UnOp::PostInc,
                        expr: Box::new(var),
                    },
                    span,
                )],
                body: Box::new(Stmt::block(stmts, span)),
            },
            span,
        ));
        Ok(witness)
    }
}

fn and_all(exprs: &[&Expr]) -> Option<Expr> {
    let (first, rest) = exprs.split_first()?;
    Some(rest.iter().fold((*first).clone(), |acc, e| {
        Expr::binary(acc, BinOp::And, (*e).clone())
    }))
}

/// `e + 1` is an int; narrower loop variables need a cast back
fn narrow(expr: Expr, ty: &Type) -> Expr {
    match ty {
        Type::Prim(PrimType::Byte | PrimType::Short | PrimType::Char) => {
            let span = expr.span;
            Expr::synthetic(
                ExprKind::Cast {
                    ty: ty.clone(),
                    expr: Box::new(expr),
                },
                span,
            )
        }
        _ => expr,
    }
}
