//! Abstract Syntax Tree definitions

mod expr;
mod span;
mod stmt;
mod types;

pub use expr::*;
pub use span::*;
pub use stmt::*;
pub use types::*;

use serde::{Deserialize, Serialize};

/// A compilation unit: package, imports and top-level classes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub classes: Vec<ClassDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    /// Dotted path without a trailing `.*`
    pub path: String,
    pub is_static: bool,
    pub wildcard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
}

/// Class or interface declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub kind: ClassKind,
    pub modifiers: Modifiers,
    pub name: Spanned<String>,
    pub type_params: Vec<String>,
    pub extends: Option<Type>,
    pub implements: Vec<Type>,
    pub members: Vec<Member>,
    /// JML clauses attached to fields or classes (invariants and the like)
    pub ignored_specs: Vec<Spanned<String>>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Member {
    Field(FieldDecl),
    Method(MethodDecl),
    Class(ClassDecl),
    Initializer { is_static: bool, body: Vec<Stmt> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub modifiers: Modifiers,
    pub declarators: Vec<VarDeclarator>,
    pub span: Span,
}

/// Method or constructor declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDecl {
    pub annotations: Vec<Annotation>,
    pub modifiers: Modifiers,
    pub type_params: Vec<String>,
    pub name: Spanned<String>,
    /// `Type::Void` for constructors
    pub ret_ty: Type,
    pub is_constructor: bool,
    pub params: Vec<Param>,
    pub throws: Vec<Type>,
    pub contract: MethodContract,
    /// `None` for abstract and native methods
    pub body: Option<Vec<Stmt>>,
    pub span: Span,
}

impl MethodDecl {
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static
    }

    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.simple_name() == name)
    }
}

/// Method parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Spanned<String>,
    /// Array type for a variable-arity parameter
    pub ty: Type,
    pub is_final: bool,
    pub is_varargs: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Protected,
    Private,
    #[default]
    Package,
}

/// Java modifiers, emitted in canonical order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_final: bool,
    pub is_abstract: bool,
    pub is_synchronized: bool,
    pub is_native: bool,
    pub is_transient: bool,
    pub is_volatile: bool,
}

impl std::fmt::Display for Modifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.visibility {
            Visibility::Public => write!(f, "public ")?,
            Visibility::Protected => write!(f, "protected ")?,
            Visibility::Private => write!(f, "private ")?,
            Visibility::Package => {}
        }
        let flags = [
            (self.is_abstract, "abstract "),
            (self.is_static, "static "),
            (self.is_final, "final "),
            (self.is_transient, "transient "),
            (self.is_volatile, "volatile "),
            (self.is_synchronized, "synchronized "),
            (self.is_native, "native "),
        ];
        for (set, text) in flags {
            if set {
                write!(f, "{text}")?;
            }
        }
        Ok(())
    }
}

/// Java annotation on a declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    /// Possibly qualified name as written
    pub name: String,
    pub args: AnnotationArgs,
    pub span: Span,
}

impl Annotation {
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AnnotationArgs {
    None,
    /// `@Name(expr)`
    Single(Expr),
    /// `@Name(key = expr, ...)`
    Named(Vec<(String, Expr)>),
}

/// Declarative contract of one method
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodContract {
    pub requires: Option<ContractClause>,
    pub ensures: Option<ContractClause>,
    /// Clause keywords with no encoding (`assignable`, `signals`, ...)
    pub unsupported: Vec<Spanned<String>>,
}

impl MethodContract {
    pub fn is_empty(&self) -> bool {
        self.requires.is_none() && self.ensures.is_none() && self.unsupported.is_empty()
    }

    /// Adds a clause, conjoining it with an existing one of the same kind
    pub fn add(&mut self, clause: ContractClause) {
        let slot = match clause.kind {
            ClauseKind::Requires => &mut self.requires,
            ClauseKind::Ensures => &mut self.ensures,
        };
        *slot = Some(match slot.take() {
            None => clause,
            Some(prev) => {
                let span = prev.span.merge(clause.span);
                ContractClause {
                    kind: clause.kind,
                    expr: Expr::binary(prev.expr, BinOp::And, clause.expr),
                    span,
                }
            }
        });
    }
}

/// A single `requires` or `ensures` clause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractClause {
    pub kind: ClauseKind,
    pub expr: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClauseKind {
    Requires,
    Ensures,
}

impl std::fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClauseKind::Requires => write!(f, "requires"),
            ClauseKind::Ensures => write!(f, "ensures"),
        }
    }
}

impl Program {
    /// Methods of every top-level class, paired with their class
    pub fn methods(&self) -> impl Iterator<Item = (&ClassDecl, &MethodDecl)> {
        self.classes.iter().flat_map(|class| {
            class.members.iter().filter_map(move |m| match m {
                Member::Method(method) => Some((class, method)),
                _ => None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(kind: ClauseKind, name: &str, at: usize) -> ContractClause {
        let span = Span::new(at, at + name.len());
        ContractClause {
            kind,
            expr: Expr::new(NodeId(at as u32), ExprKind::Ident(name.to_string()), span),
            span,
        }
    }

    #[test]
    fn test_contract_conjoins_repeated_clauses() {
        let mut contract = MethodContract::default();
        contract.add(clause(ClauseKind::Requires, "a", 0));
        contract.add(clause(ClauseKind::Requires, "b", 10));
        contract.add(clause(ClauseKind::Ensures, "c", 20));

        let req = contract.requires.as_ref().map(|c| c.expr.to_string());
        assert_eq!(req.as_deref(), Some("a && b"));
        assert_eq!(contract.requires.as_ref().map(|c| c.span), Some(Span::new(0, 11)));
        assert!(contract.ensures.is_some());
        assert!(!contract.is_empty());
    }

    #[test]
    fn test_modifiers_display_order() {
        let mods = Modifiers {
            visibility: Visibility::Public,
            is_static: true,
            is_final: true,
            ..Default::default()
        };
        assert_eq!(mods.to_string(), "public static final ");
    }

    #[test]
    fn test_annotation_simple_name() {
        let ann = Annotation {
            name: "org.example.Unwind".to_string(),
            args: AnnotationArgs::None,
            span: Span::new(0, 1),
        };
        assert_eq!(ann.simple_name(), "Unwind");
    }
}
