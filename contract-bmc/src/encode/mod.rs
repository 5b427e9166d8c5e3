//! Contract encoder
//!
//! Rewrites every method carrying a JML contract into plain Java the model
//! checker can run: preconditions become backend assumptions, postconditions
//! become `assert` statements, and early `return`s are routed through a
//! private signal so the postcondition is checked on every exit path.
//!
//! The encoded method body has this layout:
//!
//! ```text
//! [this(..) / super(..)]
//! T __result = <default>;
//! try { <requires> } catch (Exception __e) { throw new IllegalStateException(..); }
//! T __old0 = <default>; try { __old0 = <pre-state>; } catch (Exception __e) {}
//! try { <body, returns rewritten> } catch (__ReturnSignal __sig) {}
//! try { <ensures> } catch (Exception __e) { throw new IllegalStateException(..); }
//! return __result;
//! ```

mod backend;
mod clause;
mod quantifier;
mod state;

pub use backend::{BackendPrimitives, CProverPrimitives};
pub use clause::Polarity;
pub use state::RESULT_VAR;

use crate::ast::*;
use crate::error::{CompileError, Result};
use crate::types::TypeEnv;
use state::{Snapshot, TranslationState, default_expr};
use tracing::{debug, warn};

const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Nested class thrown in place of an early `return`
pub const RETURN_SIGNAL: &str = "__ReturnSignal";
const SIGNAL_VAR: &str = "__sig";
const EXCEPTION_VAR: &str = "__e";

/// Translation result for one method
#[derive(Debug)]
pub struct MethodOutcome {
    /// Binary class name, `Outer$Inner` for nested classes
    pub class: String,
    pub method: String,
    /// Span of the method declaration, used to match catalog entries
    pub span: Span,
    pub had_contract: bool,
    pub error: Option<CompileError>,
    pub warnings: Vec<String>,
}

impl MethodOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Program with every contract encoded
#[derive(Debug)]
pub struct EncodedProgram {
    pub program: Program,
    pub methods: Vec<MethodOutcome>,
}

impl EncodedProgram {
    pub fn outcome(&self, span: Span) -> Option<&MethodOutcome> {
        self.methods.iter().find(|m| m.span == span)
    }

    pub fn failures(&self) -> impl Iterator<Item = &MethodOutcome> {
        self.methods.iter().filter(|m| !m.is_ok())
    }
}

/// A successfully encoded method
#[derive(Debug)]
pub struct EncodedMethod {
    pub method: MethodDecl,
    /// Whether the body throws the return signal
    pub uses_signal: bool,
    pub warnings: Vec<String>,
}

pub struct Encoder<'a> {
    primitives: &'a dyn BackendPrimitives,
}

impl<'a> Encoder<'a> {
    pub fn new(primitives: &'a dyn BackendPrimitives) -> Self {
        Self { primitives }
    }

    /// Encodes every method of every class. A method that cannot be encoded
    /// keeps its original body, loses its contract, and is reported in the
    /// outcome list.
    pub fn encode_program(&self, program: &Program) -> EncodedProgram {
        let mut out = program.clone();
        let mut methods = Vec::new();
        for class in &mut out.classes {
            let name = class.name.node.clone();
            if self.encode_class(class, &name, &mut methods) {
                class.members.push(Member::Class(signal_class()));
            }
        }
        EncodedProgram {
            program: out,
            methods,
        }
    }

    /// Returns whether any method in `class` or its nested classes needs the
    /// return signal
    fn encode_class(&self, class: &mut ClassDecl, binary_name: &str, outcomes: &mut Vec<MethodOutcome>) -> bool {
        for spec in &class.ignored_specs {
            warn!(class = binary_name, annotation = %spec.node, "ignoring class-level JML annotation");
        }

        let original = class.clone();
        let mut uses_signal = false;
        for member in &mut class.members {
            match member {
                Member::Method(method) => {
                    let mut outcome = MethodOutcome {
                        class: binary_name.to_string(),
                        method: method.name.node.clone(),
                        span: method.span,
                        had_contract: !method.contract.is_empty(),
                        error: None,
                        warnings: Vec::new(),
                    };
                    match self.encode_method(&original, method) {
                        Ok(Some(encoded)) => {
                            debug!(class = binary_name, method = %method.name.node, "encoded contract");
                            uses_signal |= encoded.uses_signal;
                            outcome.warnings = encoded.warnings;
                            *method = encoded.method;
                        }
                        Ok(None) => {}
                        Err(err) => {
                            warn!(
                                class = binary_name,
                                method = %method.name.node,
                                "cannot encode contract: {}",
                                err.message()
                            );
                            method.contract = MethodContract::default();
                            outcome.error = Some(err);
                        }
                    }
                    for warning in &outcome.warnings {
                        warn!(class = binary_name, method = %outcome.method, "{warning}");
                    }
                    outcomes.push(outcome);
                }
                Member::Class(inner) => {
                    let inner_name = format!("{binary_name}${}", inner.name.node);
                    uses_signal |= self.encode_class(inner, &inner_name, outcomes);
                }
                Member::Field(_) | Member::Initializer { .. } => {}
            }
        }
        uses_signal
    }

    /// Encodes one method. `Ok(None)` means the method has no contract and is
    /// left untouched.
    pub fn encode_method(&self, class: &ClassDecl, method: &MethodDecl) -> Result<Option<EncodedMethod>> {
        if let Some(spec) = method.body.iter().flatten().find_map(find_spec_stmt) {
            return Err(CompileError::translation(
                format!("unsupported JML annotation in method body: `{}`", spec.0),
                spec.1,
            ));
        }
        if method.contract.is_empty() {
            return Ok(None);
        }
        if let Some(clause) = method.contract.unsupported.first() {
            return Err(CompileError::translation(
                format!("unsupported JML clause `{}`", clause.node),
                clause.span,
            ));
        }
        let Some(body) = &method.body else {
            return Err(CompileError::translation(
                format!("method `{}` has a contract but no body", method.name.node),
                method.name.span,
            ));
        };

        let env = TypeEnv::for_method(class, method);
        let mut st = TranslationState::new(self.primitives, env, &method.name.node);
        if let Some(requires) = &method.contract.requires {
            st.encode_clause(requires)?;
        }
        if let Some(ensures) = &method.contract.ensures {
            st.encode_clause(ensures)?;
        }

        let mut stmts = body.clone();
        let leading = if method.is_constructor && stmts.first().is_some_and(is_explicit_ctor_call) {
            Some(stmts.remove(0))
        } else {
            None
        };
        let uses_signal = stmts.iter().any(Stmt::contains_return);
        let result_ty = st.result_ty().cloned();
        let name = method.name.node.as_str();

        let mut out: Vec<Stmt> = leading.into_iter().collect();
        if let Some(ty) = &result_ty {
            out.push(Stmt::local(RESULT_VAR, ty.clone(), Some(default_expr(ty, Span::SYNTHETIC)), Span::SYNTHETIC));
        }
        if !st.requires.is_empty() {
            out.push(well_defined(ClauseKind::Requires, std::mem::take(&mut st.requires), name));
        }
        for snapshot in &st.snapshots {
            out.extend(capture(snapshot));
        }
        if uses_signal {
            let body = stmts.into_iter().map(rewrite_returns).collect();
            out.push(Stmt::new(
                StmtKind::Try {
                    body,
                    catches: vec![CatchClause {
                        types: vec![Type::class(RETURN_SIGNAL)],
                        var: SIGNAL_VAR.to_string(),
                        body: vec![],
                        span: Span::SYNTHETIC,
                    }],
                    finally: None,
                    contract: None,
                },
                Span::SYNTHETIC,
            ));
        } else {
            out.extend(stmts);
        }
        if !st.ensures.is_empty() {
            out.push(well_defined(ClauseKind::Ensures, std::mem::take(&mut st.ensures), name));
        }
        if result_ty.is_some() {
            out.push(Stmt::new(
                StmtKind::Return(Some(Expr::ident(RESULT_VAR, Span::SYNTHETIC))),
                Span::SYNTHETIC,
            ));
        }

        let mut encoded = method.clone();
        encoded.contract = MethodContract::default();
        encoded.body = Some(out);
        Ok(Some(EncodedMethod {
            method: encoded,
            uses_signal,
            warnings: st.warnings,
        }))
    }
}

/// `static final class __ReturnSignal extends Error {}`
fn signal_class() -> ClassDecl {
    ClassDecl {
        kind: ClassKind::Class,
        modifiers: Modifiers {
            is_static: true,
            is_final: true,
            ..Modifiers::default()
        },
        name: Spanned::new(RETURN_SIGNAL.to_string(), Span::SYNTHETIC),
        type_params: Vec::new(),
        extends: Some(Type::class("Error")),
        implements: Vec::new(),
        members: Vec::new(),
        ignored_specs: Vec::new(),
        span: Span::SYNTHETIC,
    }
}

fn find_spec_stmt(stmt: &Stmt) -> Option<(String, Span)> {
    let mut found = None;
    stmt.any(&mut |s| match &s.kind {
        StmtKind::Spec(text) => {
            found = Some((text.clone(), s.span));
            true
        }
        _ => false,
    });
    found
}

fn is_explicit_ctor_call(stmt: &Stmt) -> bool {
    matches!(
        &stmt.kind,
        StmtKind::Expr(Expr { kind: ExprKind::MethodCall { receiver: None, name, .. }, .. })
            if name == "this" || name == "super"
    )
}

fn throw_new(ty: &str, args: Vec<Expr>, span: Span) -> Stmt {
    Stmt::new(
        StmtKind::Throw(Expr::synthetic(
            ExprKind::New {
                ty: Type::class(ty),
                args,
            },
            span,
        )),
        span,
    )
}

/// Wraps contract checks so an exception while evaluating them reports an
/// ill-formed contract rather than a program error. The marker lets the
/// emitter record the checked lines.
fn well_defined(kind: ClauseKind, stmts: Vec<Stmt>, method: &str) -> Stmt {
    let message = Expr::str_lit(
        format!("Specification is not well defined for method {method}"),
        Span::SYNTHETIC,
    );
    Stmt::new(
        StmtKind::Try {
            body: stmts,
            catches: vec![CatchClause {
                types: vec![Type::class("Exception")],
                var: EXCEPTION_VAR.to_string(),
                body: vec![throw_new("IllegalStateException", vec![message], Span::SYNTHETIC)],
                span: Span::SYNTHETIC,
            }],
            finally: None,
            contract: Some(kind),
        },
        Span::SYNTHETIC,
    )
}

/// Declaration and capture of one `\old` snapshot. A capture that throws
/// leaves the default value in place.
fn capture(snapshot: &Snapshot) -> [Stmt; 2] {
    let span = snapshot.span;
    let value = match &snapshot.ty {
        Type::Array(_) => Expr::call(Some(snapshot.expr.clone()), "clone", vec![], span),
        Type::Class { name, .. } if !is_immutable(name) => Expr::synthetic(
            ExprKind::Cast {
                ty: snapshot.ty.clone(),
                expr: Box::new(Expr::call(Some(snapshot.expr.clone()), "clone", vec![], span)),
            },
            span,
        ),
        _ => snapshot.expr.clone(),
    };
    let declare = Stmt::local(
        snapshot.name.clone(),
        snapshot.ty.clone(),
        Some(default_expr(&snapshot.ty, span)),
        span,
    );
    let assign = Stmt::new(
        StmtKind::Expr(Expr::assign(Expr::ident(snapshot.name.clone(), span), value)),
        span,
    );
    let guarded = Stmt::new(
        StmtKind::Try {
            body: vec![assign],
            catches: vec![CatchClause {
                types: vec![Type::class("Exception")],
                var: EXCEPTION_VAR.to_string(),
                body: vec![],
                span: Span::SYNTHETIC,
            }],
            finally: None,
            contract: None,
        },
        span,
    );
    [declare, guarded]
}

/// Value types whose snapshot needs no copy
fn is_immutable(name: &str) -> bool {
    let simple = name.strip_prefix("java.lang.").unwrap_or(name);
    matches!(
        simple,
        "String" | "Integer" | "Long" | "Short" | "Byte" | "Character" | "Boolean" | "Float" | "Double" | "Object"
    )
}

/// Replaces `return e;` with `{ __result = e; throw new __ReturnSignal(); }`
fn rewrite_returns(stmt: Stmt) -> Stmt {
    let span = stmt.span;
    let boxed = |s: Box<Stmt>| Box::new(rewrite_returns(*s));
    let all = |stmts: Vec<Stmt>| stmts.into_iter().map(rewrite_returns).collect::<Vec<_>>();
    let kind = match stmt.kind {
        StmtKind::Return(None) => return throw_new(RETURN_SIGNAL, vec![], span),
        StmtKind::Return(Some(value)) => StmtKind::Block(vec![
            Stmt::new(
                StmtKind::Expr(Expr::assign(Expr::ident(RESULT_VAR, span), value)),
                span,
            ),
            throw_new(RETURN_SIGNAL, vec![], span),
        ]),
        StmtKind::Block(stmts) => StmtKind::Block(all(stmts)),
        StmtKind::If {
            cond,
            then_branch,
            else_branch,
        } => StmtKind::If {
            cond,
            then_branch: boxed(then_branch),
            else_branch: else_branch.map(boxed),
        },
        StmtKind::While { cond, body } => StmtKind::While {
            cond,
            body: boxed(body),
        },
        StmtKind::DoWhile { body, cond } => StmtKind::DoWhile {
            body: boxed(body),
            cond,
        },
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => StmtKind::For {
            init,
            cond,
            update,
            body: boxed(body),
        },
        StmtKind::ForEach {
            ty,
            var,
            iterable,
            body,
        } => StmtKind::ForEach {
            ty,
            var,
            iterable,
            body: boxed(body),
        },
        StmtKind::Labeled { label, body } => StmtKind::Labeled {
            label,
            body: boxed(body),
        },
        StmtKind::Try {
            body,
            catches,
            finally,
            contract,
        } => StmtKind::Try {
            body: all(body),
            catches: catches
                .into_iter()
                .map(|catch| {
                    let mut body = all(catch.body);
                    if catches_signal(&catch.types) {
                        body.insert(0, rethrow_signal(&catch.var, catch.span));
                    }
                    CatchClause { body, ..catch }
                })
                .collect(),
            finally: finally.map(all),
            contract,
        },
        other => other,
    };
    Stmt::new(kind, span)
}

/// Whether a user catch clause would intercept the return signal
fn catches_signal(types: &[Type]) -> bool {
    types.iter().any(|ty| {
        matches!(ty, Type::Class { name, .. }
            if matches!(name.as_str(), "Throwable" | "Error" | "java.lang.Throwable" | "java.lang.Error"))
    })
}

/// `if (e instanceof __ReturnSignal) throw (__ReturnSignal) e;`
fn rethrow_signal(var: &str, span: Span) -> Stmt {
    let caught = Expr::ident(var, span);
    let signal = Type::class(RETURN_SIGNAL);
    Stmt::new(
        StmtKind::If {
            cond: Expr::synthetic(
                ExprKind::InstanceOf {
                    expr: Box::new(caught.clone()),
                    ty: signal.clone(),
                },
                span,
            ),
            then_branch: Box::new(Stmt::new(
                StmtKind::Throw(Expr::synthetic(
                    ExprKind::Cast {
                        ty: signal,
                        expr: Box::new(caught),
                    },
                    span,
                )),
                span,
            )),
            else_branch: None,
        },
        span,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        let source = crate::preprocessor::preprocess(source).unwrap();
        let tokens = crate::lexer::tokenize(&source).unwrap();
        crate::parser::parse("T.java", &source, tokens).unwrap()
    }

    fn encode(source: &str) -> EncodedProgram {
        Encoder::new(&CProverPrimitives).encode_program(&parse(source))
    }

    fn method<'p>(program: &'p Program, name: &str) -> &'p MethodDecl {
        program
            .methods()
            .map(|(_, m)| m)
            .find(|m| m.name.node == name)
            .unwrap()
    }

    fn top_level_kinds(method: &MethodDecl) -> Vec<&'static str> {
        method
            .body
            .as_ref()
            .unwrap()
            .iter()
            .map(|s| match &s.kind {
                StmtKind::LocalVar { .. } => "local",
                StmtKind::Try { .. } => "try",
                StmtKind::Return(_) => "return",
                StmtKind::Expr(_) => "expr",
                StmtKind::If { .. } => "if",
                _ => "other",
            })
            .collect()
    }

    #[test]
    fn test_method_without_contract_is_unchanged() {
        let source = "class T { int f(int x) { if (x > 0) return 1; return 2; } }";
        let encoded = encode(source);
        assert_eq!(method(&encoded.program, "f").body, method(&parse(source), "f").body);
        assert!(encoded.methods[0].is_ok());
        assert!(!encoded.methods[0].had_contract);
        // no return signal needed
        assert_eq!(encoded.program.classes[0].members.len(), 1);
    }

    #[test]
    fn test_body_layout() {
        let encoded = encode(
            "class T {\n\
             //@ requires x >= 0;\n\
             //@ ensures \\result == \\old(x) + 1;\n\
             int inc(int x) { x = x + 1; return x; }\n\
             }",
        );
        let m = method(&encoded.program, "inc");
        assert!(m.contract.is_empty());
        assert_eq!(
            top_level_kinds(m),
            vec!["local", "try", "local", "try", "try", "try", "return"]
        );
        let markers: Vec<_> = m
            .body
            .as_ref()
            .unwrap()
            .iter()
            .filter_map(|s| match &s.kind {
                StmtKind::Try { contract, .. } => Some(*contract),
                _ => None,
            })
            .collect();
        // requires, \old capture, body, ensures
        assert_eq!(
            markers,
            vec![Some(ClauseKind::Requires), None, None, Some(ClauseKind::Ensures)]
        );
        assert!(matches!(
            encoded.program.classes[0].members.last(),
            Some(Member::Class(c)) if c.name.node == RETURN_SIGNAL
        ));
    }

    #[test]
    fn test_void_method_without_returns_is_inlined() {
        let encoded = encode(
            "class T { int count;\n\
             //@ ensures count == \\old(count) + 1;\n\
             void bump() { count++; } }",
        );
        let m = method(&encoded.program, "bump");
        assert_eq!(top_level_kinds(m), vec!["local", "try", "expr", "try"]);
        assert_eq!(encoded.program.classes[0].members.len(), 2);
    }

    #[test]
    fn test_returns_rewritten_to_signal() {
        let stmt = Stmt::new(
            StmtKind::Return(Some(Expr::int_lit(3, Span::new(7, 8)))),
            Span::new(0, 9),
        );
        match rewrite_returns(stmt).kind {
            StmtKind::Block(stmts) => {
                assert_eq!(stmts.len(), 2);
                assert!(matches!(&stmts[1].kind, StmtKind::Throw(_)));
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn test_catch_throwable_rethrows_signal() {
        let encoded = encode(
            "class T {\n\
             //@ ensures \\result > 0;\n\
             int f() { try { return 1; } catch (Throwable t) { return 2; } } }",
        );
        let m = method(&encoded.program, "f");
        let body = m.body.as_ref().unwrap();
        let StmtKind::Try { body: inner, .. } = &body[1].kind else {
            panic!("expected signal try, got {:?}", body[1].kind);
        };
        let StmtKind::Try { catches, .. } = &inner[0].kind else {
            panic!("expected user try");
        };
        assert!(matches!(catches[0].body[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn test_constructor_call_stays_first() {
        let encoded = encode(
            "class T extends Base { int v;\n\
             //@ requires v0 > 0;\n\
             T(int v0) { super(v0); v = v0; } }",
        );
        let m = method(&encoded.program, "T");
        let body = m.body.as_ref().unwrap();
        assert!(is_explicit_ctor_call(&body[0]));
        assert_eq!(top_level_kinds(m), vec!["expr", "try", "expr"]);
    }

    #[test]
    fn test_failed_method_keeps_body_and_drops_contract() {
        let source = "class T {\n\
             //@ assignable \\nothing;\n\
             int f() { return 1; } }";
        let encoded = encode(source);
        let outcome = &encoded.methods[0];
        assert!(!outcome.is_ok());
        assert!(outcome.error.as_ref().unwrap().message().contains("assignable"));
        let m = method(&encoded.program, "f");
        assert!(m.contract.is_empty());
        assert_eq!(m.body, method(&parse(source), "f").body);
    }

    #[test]
    fn test_spec_statement_in_body_fails() {
        let encoded = encode("class T { void f() { //@ assert true;\n } }");
        assert!(!encoded.methods[0].is_ok());
    }

    #[test]
    fn test_nested_class_outcome_name() {
        let encoded = encode(
            "class T { static class In {\n\
             //@ ensures \\result;\n\
             boolean ok() { return true; } } }",
        );
        let outcome = encoded.methods.iter().find(|m| m.method == "ok").unwrap();
        assert_eq!(outcome.class, "T$In");
        assert!(outcome.is_ok());
        // signal class lands in the top-level class
        assert!(matches!(
            encoded.program.classes[0].members.last(),
            Some(Member::Class(c)) if c.name.node == RETURN_SIGNAL
        ));
    }

    #[test]
    fn test_snapshot_of_array_is_cloned() {
        let snapshot = Snapshot {
            name: "__old0".into(),
            ty: Type::array_of(Type::INT),
            expr: Expr::ident("a", Span::SYNTHETIC),
            span: Span::SYNTHETIC,
        };
        let [_, guarded] = capture(&snapshot);
        let StmtKind::Try { body, .. } = guarded.kind else {
            panic!("expected try");
        };
        let StmtKind::Expr(assign) = &body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(assign.to_string(), "__old0 = a.clone()");
    }
}
