//! Expression AST nodes

use super::{Span, Type};
use serde::{Deserialize, Serialize};

/// Stable identity of an expression node, unique within a parsed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Id shared by every node the encoder synthesises
    pub const SYNTHETIC: NodeId = NodeId(u32::MAX);

    pub fn is_synthetic(self) -> bool {
        self == NodeId::SYNTHETIC
    }
}

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    /// Variable, parameter or unqualified field reference
    Ident(String),
    This,
    FieldAccess {
        target: Box<Expr>,
        field: String,
    },
    ArrayAccess {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    /// `target = value`, or `target op= value` when `op` is set
    Assign {
        target: Box<Expr>,
        op: Option<BinOp>,
        value: Box<Expr>,
    },
    MethodCall {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    New {
        ty: Type,
        args: Vec<Expr>,
    },
    /// `new T[d1][d2][]...` or `new T[]{...}`
    NewArray {
        elem: Type,
        dims: Vec<Expr>,
        extra_dims: usize,
        init: Option<Vec<Expr>>,
    },
    /// Bare `{a, b}` initializer in a declaration
    ArrayInit(Vec<Expr>),
    Cast {
        ty: Type,
        expr: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: Type,
    },

    // JML
    /// `(\forall T x; range; body)`; range may be omitted
    Quantifier {
        kind: QuantKind,
        var_ty: Type,
        var: String,
        range: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    /// `\old(expr)`
    Old(Box<Expr>),
    /// `\result`
    Result,
    /// Any other backslash keyword, e.g. `\fresh(x)` or `\nothing`
    JmlBuiltin {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Long(i64),
    Float(f64),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

/// Quantifier kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantKind {
    ForAll,
    Exists,
    /// Generalised quantifiers (`\sum`, `\max`, `\num_of`, ...)
    Other(String),
}

impl std::fmt::Display for QuantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuantKind::ForAll => write!(f, "\\forall"),
            QuantKind::Exists => write!(f, "\\exists"),
            QuantKind::Other(name) => write!(f, "\\{name}"),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,

    // Comparison
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,

    // Bitwise / non-short-circuit logical
    BitAnd,
    BitOr,
    BitXor,

    // Logical
    And,
    Or,

    // JML
    Implies,
    RevImplies,
    Equiv,
    NotEquiv,
}

impl BinOp {
    /// Binding strength, higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Equiv | BinOp::NotEquiv => 3,
            BinOp::Implies | BinOp::RevImplies => 4,
            BinOp::Or => 5,
            BinOp::And => 6,
            BinOp::BitOr => 7,
            BinOp::BitXor => 8,
            BinOp::BitAnd => 9,
            BinOp::Eq | BinOp::Ne => 10,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => 11,
            BinOp::Shl | BinOp::Shr | BinOp::UShr => 12,
            BinOp::Add | BinOp::Sub => 13,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 14,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    /// Short-circuit and JML logical connectives
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            BinOp::And
                | BinOp::Or
                | BinOp::Implies
                | BinOp::RevImplies
                | BinOp::Equiv
                | BinOp::NotEquiv
        )
    }

    pub fn is_jml(self) -> bool {
        matches!(
            self,
            BinOp::Implies | BinOp::RevImplies | BinOp::Equiv | BinOp::NotEquiv
        )
    }

    /// Whether the operator always yields a boolean
    pub fn yields_boolean(self) -> bool {
        self.is_comparison() || self.is_logical()
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::UShr => ">>>",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Implies => "==>",
            BinOp::RevImplies => "<==",
            BinOp::Equiv => "<==>",
            BinOp::NotEquiv => "<=!=>",
        };
        write!(f, "{s}")
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnOp {
    pub fn is_postfix(self) -> bool {
        matches!(self, UnOp::PostInc | UnOp::PostDec)
    }

    /// Increment/decrement operators mutate their operand
    pub fn is_update(self) -> bool {
        matches!(
            self,
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec
        )
    }
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnOp::Neg => "-",
            UnOp::Plus => "+",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
            UnOp::PreInc | UnOp::PostInc => "++",
            UnOp::PreDec | UnOp::PostDec => "--",
        };
        write!(f, "{s}")
    }
}

impl Expr {
    pub fn new(id: NodeId, kind: ExprKind, span: Span) -> Self {
        Self { id, kind, span }
    }

    /// Node built by the encoder rather than the parser
    pub fn synthetic(kind: ExprKind, span: Span) -> Self {
        Self {
            id: NodeId::SYNTHETIC,
            kind,
            span,
        }
    }

    pub fn ident(name: impl Into<String>, span: Span) -> Self {
        Self::synthetic(ExprKind::Ident(name.into()), span)
    }

    pub fn bool_lit(value: bool, span: Span) -> Self {
        Self::synthetic(ExprKind::Literal(Literal::Bool(value)), span)
    }

    pub fn int_lit(value: i64, span: Span) -> Self {
        Self::synthetic(ExprKind::Literal(Literal::Int(value)), span)
    }

    pub fn str_lit(value: impl Into<String>, span: Span) -> Self {
        Self::synthetic(ExprKind::Literal(Literal::Str(value.into())), span)
    }

    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Self {
        let span = left.span.merge(right.span);
        Self::synthetic(
            ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        )
    }

    pub fn not(expr: Expr) -> Self {
        let span = expr.span;
        Self::synthetic(
            ExprKind::Unary {
                op: UnOp::Not,
                expr: Box::new(expr),
            },
            span,
        )
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        let span = target.span.merge(value.span);
        Self::synthetic(
            ExprKind::Assign {
                target: Box::new(target),
                op: None,
                value: Box::new(value),
            },
            span,
        )
    }

    pub fn call(receiver: Option<Expr>, name: impl Into<String>, args: Vec<Expr>, span: Span) -> Self {
        Self::synthetic(
            ExprKind::MethodCall {
                receiver: receiver.map(Box::new),
                name: name.into(),
                args,
            },
            span,
        )
    }

    /// Dotted static path such as `org.cprover.CProver`
    pub fn path(path: &str, span: Span) -> Self {
        let mut parts = path.split('.');
        let first = parts.next().unwrap_or_default();
        let mut expr = Expr::ident(first, span);
        for part in parts {
            expr = Expr::synthetic(
                ExprKind::FieldAccess {
                    target: Box::new(expr),
                    field: part.to_string(),
                },
                span,
            );
        }
        expr
    }

    pub fn as_bool_literal(&self) -> Option<bool> {
        match &self.kind {
            ExprKind::Literal(Literal::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::This | ExprKind::Result => {
                vec![]
            }
            ExprKind::FieldAccess { target, .. } => vec![target.as_ref()],
            ExprKind::ArrayAccess { array, index } => vec![array.as_ref(), index.as_ref()],
            ExprKind::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::Unary { expr, .. } => vec![expr.as_ref()],
            ExprKind::Assign { target, value, .. } => vec![target.as_ref(), value.as_ref()],
            ExprKind::MethodCall { receiver, args, .. } => {
                receiver.iter().map(|r| r.as_ref()).chain(args.iter()).collect()
            }
            ExprKind::New { args, .. } => args.iter().collect(),
            ExprKind::NewArray { dims, init, .. } => {
                dims.iter().chain(init.iter().flatten()).collect()
            }
            ExprKind::ArrayInit(items) => items.iter().collect(),
            ExprKind::Cast { expr, .. } => vec![expr.as_ref()],
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => vec![cond.as_ref(), then_expr.as_ref(), else_expr.as_ref()],
            ExprKind::InstanceOf { expr, .. } => vec![expr.as_ref()],
            ExprKind::Quantifier { range, body, .. } => {
                range.iter().map(|r| r.as_ref()).chain(std::iter::once(body.as_ref())).collect()
            }
            ExprKind::Old(inner) => vec![inner.as_ref()],
            ExprKind::JmlBuiltin { args, .. } => args.iter().collect(),
        }
    }

    /// Whether `pred` holds for this node or any descendant
    pub fn any(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.any(pred))
    }

    /// Calls, assignments, object creation and increments
    pub fn has_side_effects(&self) -> bool {
        self.any(&mut |e| {
            matches!(
                e.kind,
                ExprKind::MethodCall { .. }
                    | ExprKind::Assign { .. }
                    | ExprKind::New { .. }
                    | ExprKind::NewArray { .. }
            ) || matches!(&e.kind, ExprKind::Unary { op, .. } if op.is_update())
        })
    }

    /// Whether any JML construct occurs in this expression
    pub fn contains_jml(&self) -> bool {
        self.any(&mut |e| {
            matches!(
                e.kind,
                ExprKind::Quantifier { .. }
                    | ExprKind::Old(_)
                    | ExprKind::Result
                    | ExprKind::JmlBuiltin { .. }
            ) || matches!(&e.kind, ExprKind::Binary { op, .. } if op.is_jml())
        })
    }

    /// Simple names referenced (free or bound) anywhere in the expression
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.any(&mut |e| {
            if let ExprKind::Ident(name) = &e.kind
                && !names.contains(name)
            {
                names.push(name.clone());
            }
            false
        });
        names
    }

    /// Structural identity used to deduplicate `\old` snapshots.
    /// Ignores node ids and spans.
    pub fn structural_key(&self) -> String {
        self.to_string()
    }

    fn precedence(&self) -> u8 {
        match &self.kind {
            ExprKind::Assign { .. } => 1,
            ExprKind::Conditional { .. } => 2,
            ExprKind::Binary { op, .. } => op.precedence(),
            ExprKind::InstanceOf { .. } => 11,
            ExprKind::Unary { op, .. } if op.is_postfix() => 16,
            ExprKind::Unary { .. } | ExprKind::Cast { .. } => 15,
            ExprKind::Literal(Literal::Int(n)) | ExprKind::Literal(Literal::Long(n)) if *n < 0 => 15,
            _ => 17,
        }
    }

    fn fmt_prec(&self, f: &mut std::fmt::Formatter<'_>, min: u8) -> std::fmt::Result {
        if self.precedence() < min {
            write!(f, "(")?;
            self.fmt_bare(f)?;
            write!(f, ")")
        } else {
            self.fmt_bare(f)
        }
    }

    fn fmt_bare(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{lit}"),
            ExprKind::Ident(name) => write!(f, "{name}"),
            ExprKind::This => write!(f, "this"),
            ExprKind::FieldAccess { target, field } => {
                target.fmt_prec(f, 16)?;
                write!(f, ".{field}")
            }
            ExprKind::ArrayAccess { array, index } => {
                array.fmt_prec(f, 16)?;
                write!(f, "[{index}]")
            }
            ExprKind::Binary { left, op, right } => {
                let p = op.precedence();
                // JML implication associates to the right
                let (lp, rp) = if *op == BinOp::Implies { (p + 1, p) } else { (p, p + 1) };
                left.fmt_prec(f, lp)?;
                write!(f, " {op} ")?;
                right.fmt_prec(f, rp)
            }
            ExprKind::Unary { op, expr } if op.is_postfix() => {
                expr.fmt_prec(f, 16)?;
                write!(f, "{op}")
            }
            ExprKind::Unary { op, expr } => {
                write!(f, "{op}")?;
                let clashes = matches!(op, UnOp::Neg | UnOp::Plus | UnOp::PreInc | UnOp::PreDec)
                    && (matches!(&expr.kind, ExprKind::Unary { op: inner, .. } if !inner.is_postfix())
                        || matches!(
                            &expr.kind,
                            ExprKind::Literal(Literal::Int(n)) | ExprKind::Literal(Literal::Long(n)) if *n < 0
                        ));
                if clashes {
                    write!(f, "({expr})")
                } else {
                    expr.fmt_prec(f, 15)
                }
            }
            ExprKind::Assign { target, op, value } => {
                target.fmt_prec(f, 16)?;
                match op {
                    Some(op) => write!(f, " {op}= ")?,
                    None => write!(f, " = ")?,
                }
                value.fmt_prec(f, 1)
            }
            ExprKind::MethodCall {
                receiver,
                name,
                args,
            } => {
                if let Some(recv) = receiver {
                    recv.fmt_prec(f, 16)?;
                    write!(f, ".")?;
                }
                write!(f, "{name}(")?;
                fmt_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::New { ty, args } => {
                write!(f, "new {ty}(")?;
                fmt_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::NewArray {
                elem,
                dims,
                extra_dims,
                init,
            } => {
                write!(f, "new {elem}")?;
                for dim in dims {
                    write!(f, "[{dim}]")?;
                }
                for _ in 0..*extra_dims {
                    write!(f, "[]")?;
                }
                if let Some(items) = init {
                    write!(f, "{{")?;
                    fmt_list(f, items)?;
                    write!(f, "}}")?;
                }
                Ok(())
            }
            ExprKind::ArrayInit(items) => {
                write!(f, "{{")?;
                fmt_list(f, items)?;
                write!(f, "}}")
            }
            ExprKind::Cast { ty, expr } => {
                write!(f, "({ty}) ")?;
                expr.fmt_prec(f, 15)
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.fmt_prec(f, 3)?;
                write!(f, " ? ")?;
                then_expr.fmt_prec(f, 2)?;
                write!(f, " : ")?;
                else_expr.fmt_prec(f, 2)
            }
            ExprKind::InstanceOf { expr, ty } => {
                expr.fmt_prec(f, 12)?;
                write!(f, " instanceof {ty}")
            }
            ExprKind::Quantifier {
                kind,
                var_ty,
                var,
                range,
                body,
            } => {
                write!(f, "({kind} {var_ty} {var}; ")?;
                if let Some(range) = range {
                    write!(f, "{range}; ")?;
                }
                write!(f, "{body})")
            }
            ExprKind::Old(inner) => write!(f, "\\old({inner})"),
            ExprKind::Result => write!(f, "\\result"),
            ExprKind::JmlBuiltin { name, args } => {
                write!(f, "\\{name}")?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    fmt_list(f, args)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

fn fmt_list(f: &mut std::fmt::Formatter<'_>, items: &[Expr]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_bare(f)
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Long(n) => write!(f, "{n}L"),
            Literal::Float(v) => write!(f, "{v:?}f"),
            Literal::Double(v) => write!(f, "{v:?}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Char(c) => write!(f, "'{}'", escape_char(*c, '\'')),
            Literal::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    write!(f, "{}", escape_char(c, '"'))?;
                }
                write!(f, "\"")
            }
            Literal::Null => write!(f, "null"),
        }
    }
}

fn escape_char(c: char, quote: char) -> String {
    match c {
        '\n' => "\\n".to_string(),
        '\t' => "\\t".to_string(),
        '\r' => "\\r".to_string(),
        '\0' => "\\0".to_string(),
        '\\' => "\\\\".to_string(),
        c if c == quote => format!("\\{c}"),
        c => c.to_string(),
    }
}
