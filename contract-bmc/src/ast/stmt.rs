//! Statement AST nodes

use super::{ClauseKind, Expr, Span, Type};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Block(Vec<Stmt>),
    LocalVar {
        is_final: bool,
        declarators: Vec<VarDeclarator>,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
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
        init: Vec<Stmt>,
        cond: Option<Expr>,
        update: Vec<Expr>,
        body: Box<Stmt>,
    },
    ForEach {
        ty: Type,
        var: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Labeled {
        label: String,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break(Option<String>),
    Continue(Option<String>),
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Stmt>>,
        /// Set when the body evaluates a contract clause
        contract: Option<ClauseKind>,
    },
    Assert {
        cond: Expr,
        message: Option<Expr>,
        kind: CheckKind,
    },
    /// JML annotation inside a method body (`//@ assert ..`, `//@ loop_invariant ..`)
    Spec(String),
    Empty,
}

/// One declared variable; `ty` already includes any `[]` written after the name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDeclarator {
    pub name: String,
    pub ty: Type,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// More than one type for multi-catch
    pub types: Vec<Type>,
    pub var: String,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Origin of an assertion in the emitted program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckKind {
    Requires,
    Ensures,
    User,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn expr(expr: Expr) -> Self {
        let span = expr.span;
        Self::new(StmtKind::Expr(expr), span)
    }

    pub fn local(name: impl Into<String>, ty: Type, init: Option<Expr>, span: Span) -> Self {
        Self::new(
            StmtKind::LocalVar {
                is_final: false,
                declarators: vec![VarDeclarator {
                    name: name.into(),
                    ty,
                    init,
                }],
            },
            span,
        )
    }

    pub fn block(stmts: Vec<Stmt>, span: Span) -> Self {
        Self::new(StmtKind::Block(stmts), span)
    }

    /// Direct child statements
    pub fn children(&self) -> Vec<&Stmt> {
        match &self.kind {
            StmtKind::Block(stmts) => stmts.iter().collect(),
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => std::iter::once(then_branch.as_ref())
                .chain(else_branch.as_deref())
                .collect(),
            StmtKind::While { body, .. }
            | StmtKind::DoWhile { body, .. }
            | StmtKind::ForEach { body, .. }
            | StmtKind::Labeled { body, .. } => vec![body.as_ref()],
            StmtKind::For { init, body, .. } => {
                init.iter().chain(std::iter::once(body.as_ref())).collect()
            }
            StmtKind::Try {
                body,
                catches,
                finally,
                ..
            } => body
                .iter()
                .chain(catches.iter().flat_map(|c| c.body.iter()))
                .chain(finally.iter().flatten())
                .collect(),
            _ => vec![],
        }
    }

    /// Whether `pred` holds for this statement or any nested statement
    pub fn any(&self, pred: &mut impl FnMut(&Stmt) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.any(pred))
    }

    pub fn contains_return(&self) -> bool {
        self.any(&mut |s| matches!(s.kind, StmtKind::Return(_)))
    }
}
