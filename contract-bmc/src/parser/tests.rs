//! Parser tests for the Java subset and JML contracts

use crate::ast::*;
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::preprocessor::preprocess;

/// Helper to parse a source file (JML comments included)
fn parse_program(source: &str) -> crate::Result<Program> {
    let source = preprocess(source)?;
    let tokens = tokenize(&source)?;
    parse("Test.java", &source, tokens)
}

/// Helper to parse and expect success
fn parse_ok(source: &str) -> Program {
    parse_program(source).expect("Parse should succeed")
}

/// Helper to check if parsing fails
fn parse_fails(source: &str) -> bool {
    parse_program(source).is_err()
}

/// Parse a single method wrapped in `class T`
fn parse_method(method: &str) -> MethodDecl {
    let prog = parse_ok(&format!("class T {{\n{method}\n}}"));
    let (_, m) = prog.methods().next().expect("one method");
    m.clone()
}

/// Parse one expression as the returned value of a method
fn parse_expr(expr: &str) -> Expr {
    let m = parse_method(&format!("Object f() {{ return {expr}; }}"));
    match &m.body.as_deref().expect("body")[0].kind {
        StmtKind::Return(Some(e)) => e.clone(),
        other => panic!("expected return, got {other:?}"),
    }
}

fn body(m: &MethodDecl) -> &[Stmt] {
    m.body.as_deref().expect("method body")
}

// ============================================
// Compilation unit
// ============================================

#[test]
fn test_parse_package_and_imports() {
    let prog = parse_ok(
        "package org.example;\nimport java.util.List;\nimport java.util.*;\nimport static java.lang.Math.max;\npublic class A {}",
    );
    assert_eq!(prog.package.as_deref(), Some("org.example"));
    assert_eq!(prog.imports.len(), 3);
    assert_eq!(prog.imports[0].path, "java.util.List");
    assert!(prog.imports[1].wildcard);
    assert_eq!(prog.imports[1].path, "java.util");
    assert!(prog.imports[2].is_static);
    assert_eq!(prog.classes[0].name.node, "A");
    assert_eq!(prog.classes[0].modifiers.visibility, Visibility::Public);
}

#[test]
fn test_parse_modifiers_without_package() {
    let prog = parse_ok("public final class A {}");
    assert_eq!(prog.classes[0].modifiers.visibility, Visibility::Public);
    assert!(prog.classes[0].modifiers.is_final);
}

#[test]
fn test_parse_members() {
    let prog = parse_ok(
        "class A extends B implements C, D<E> {\n  private int x = 1, y[];\n  static { x = 2; }\n  A(int x) { this.x = x; }\n  abstract void g();\n  static class Inner {}\n}",
    );
    let class = &prog.classes[0];
    assert_eq!(class.extends, Some(Type::class("B")));
    assert_eq!(class.implements.len(), 2);
    assert_eq!(class.members.len(), 5);

    let Member::Field(field) = &class.members[0] else {
        panic!("expected field");
    };
    assert_eq!(field.declarators.len(), 2);
    assert_eq!(field.declarators[1].ty, Type::array_of(Type::INT));

    assert!(matches!(class.members[1], Member::Initializer { is_static: true, .. }));

    let Member::Method(ctor) = &class.members[2] else {
        panic!("expected constructor");
    };
    assert!(ctor.is_constructor);
    assert_eq!(ctor.ret_ty, Type::Void);

    let Member::Method(g) = &class.members[3] else {
        panic!("expected method");
    };
    assert!(g.body.is_none());
    assert!(matches!(class.members[4], Member::Class(_)));
}

#[test]
fn test_parse_generic_types() {
    let m = parse_method("java.util.Map<String, java.util.List<Integer>> f(int... xs) { return null; }");
    assert_eq!(
        m.ret_ty.to_string(),
        "java.util.Map<String, java.util.List<Integer>>"
    );
    assert_eq!(m.params[0].ty, Type::array_of(Type::INT));
}

#[test]
fn test_parse_annotations() {
    let m = parse_method("@Verifyable @Unwind(7) @Other(key = 3, more = \"x\") int f() { return 0; }");
    assert_eq!(m.annotations.len(), 3);
    assert!(matches!(&m.annotations[1].args, AnnotationArgs::Single(e) if e.to_string() == "7"));
    assert!(matches!(&m.annotations[2].args, AnnotationArgs::Named(pairs) if pairs.len() == 2));
    assert!(m.annotation("Unwind").is_some());
}

// ============================================
// Contracts
// ============================================

#[test]
fn test_parse_requires_ensures() {
    let m = parse_method(
        "//@ requires a > 0 && b > 0;\n//@ ensures \\result > 0;\nstatic int gcd(int a, int b) { return a; }",
    );
    let req = m.contract.requires.as_ref().expect("requires");
    assert_eq!(req.expr.to_string(), "a > 0 && b > 0");
    let ens = m.contract.ensures.as_ref().expect("ensures");
    assert_eq!(ens.expr.to_string(), "\\result > 0");
    assert!(m.contract.unsupported.is_empty());
}

#[test]
fn test_parse_block_contract_with_margins() {
    let m = parse_method(
        "/*@ public normal_behavior\n  @ requires x >= 0;\n  @ ensures \\result == x;\n  @*/\nint id(int x) { return x; }",
    );
    assert!(m.contract.requires.is_some());
    assert!(m.contract.ensures.is_some());
}

#[test]
fn test_parse_repeated_clauses_conjoined() {
    let m = parse_method("//@ requires a;\n//@ requires b || c;\nvoid f(boolean a, boolean b, boolean c) {}");
    let req = m.contract.requires.as_ref().expect("requires");
    assert_eq!(req.expr.to_string(), "a && (b || c)");
}

#[test]
fn test_parse_unsupported_clause_recorded() {
    let m = parse_method("/*@ requires x > 0;\n  @ assignable \\nothing;\n  @*/\nvoid f(int x) {}");
    assert!(m.contract.requires.is_some());
    assert_eq!(m.contract.unsupported.len(), 1);
    assert_eq!(m.contract.unsupported[0].node, "assignable");
}

#[test]
fn test_parse_field_specs_are_ignored_on_class() {
    let prog = parse_ok("class A {\n//@ invariant x > 0;\nint x;\n}");
    assert_eq!(prog.classes[0].ignored_specs.len(), 1);
    assert_eq!(prog.classes[0].ignored_specs[0].node, "invariant");
}

#[test]
fn test_parse_quantifier() {
    let e = parse_expr("(\\forall int i; 0 <= i && i < a.length; a[i] > 0)");
    let ExprKind::Quantifier {
        kind,
        var_ty,
        var,
        range,
        body,
    } = &e.kind
    else {
        panic!("expected quantifier");
    };
    assert_eq!(*kind, QuantKind::ForAll);
    assert_eq!(*var_ty, Type::INT);
    assert_eq!(var, "i");
    assert_eq!(range.as_ref().map(|r| r.to_string()).as_deref(), Some("0 <= i && i < a.length"));
    assert_eq!(body.to_string(), "a[i] > 0");
}

#[test]
fn test_parse_quantifier_without_range() {
    let e = parse_expr("(\\exists int i; i * i == 4)");
    assert!(matches!(&e.kind, ExprKind::Quantifier { range: None, kind: QuantKind::Exists, .. }));
}

#[test]
fn test_parse_other_quantifier_kind() {
    let e = parse_expr("(\\sum int i; 0 <= i && i < 3; i)");
    assert!(matches!(&e.kind, ExprKind::Quantifier { kind: QuantKind::Other(name), .. } if name == "sum"));
}

#[test]
fn test_parse_multi_variable_quantifier_rejected() {
    assert!(parse_fails("class T { //@ ensures (\\forall int i, j; i < j; true);\nvoid f() {} }"));
}

#[test]
fn test_parse_old_and_builtins() {
    let e = parse_expr("\\old(x.f) + 1");
    assert_eq!(e.to_string(), "\\old(x.f) + 1");
    let e = parse_expr("\\fresh(x)");
    assert!(matches!(&e.kind, ExprKind::JmlBuiltin { name, args } if name == "fresh" && args.len() == 1));
}

#[test]
fn test_parse_jml_operator_precedence() {
    let e = parse_expr("a || b ==> c && d <==> e");
    let ExprKind::Binary { op, left, .. } = &e.kind else {
        panic!("expected binary");
    };
    assert_eq!(*op, BinOp::Equiv);
    assert!(matches!(&left.kind, ExprKind::Binary { op: BinOp::Implies, .. }));
}

#[test]
fn test_parse_implication_right_assoc() {
    let e = parse_expr("a ==> b ==> c");
    let ExprKind::Binary { right, .. } = &e.kind else {
        panic!("expected binary");
    };
    assert!(matches!(&right.kind, ExprKind::Binary { op: BinOp::Implies, .. }));
}

// ============================================
// Expressions
// ============================================

#[test]
fn test_parse_arithmetic_precedence() {
    assert_eq!(parse_expr("1 + 2 * 3").to_string(), "1 + 2 * 3");
    assert_eq!(parse_expr("(1 + 2) * 3").to_string(), "(1 + 2) * 3");
    assert_eq!(parse_expr("a - (b - c)").to_string(), "a - (b - c)");
}

#[test]
fn test_parse_shifts_from_split_tokens() {
    let e = parse_expr("a >> 2");
    assert!(matches!(&e.kind, ExprKind::Binary { op: BinOp::Shr, .. }));
    let e = parse_expr("a >>> 2");
    assert!(matches!(&e.kind, ExprKind::Binary { op: BinOp::UShr, .. }));
    let e = parse_expr("a > 2");
    assert!(matches!(&e.kind, ExprKind::Binary { op: BinOp::Gt, .. }));
}

#[test]
fn test_parse_compound_shift_assign() {
    let m = parse_method("void f(int a) { a >>= 1; a >>>= 2; a += 3; }");
    let ops: Vec<_> = body(&m)
        .iter()
        .map(|s| match &s.kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Assign { op, .. },
                ..
            }) => *op,
            other => panic!("expected assignment, got {other:?}"),
        })
        .collect();
    assert_eq!(ops, vec![Some(BinOp::Shr), Some(BinOp::UShr), Some(BinOp::Add)]);
}

#[test]
fn test_parse_casts() {
    assert!(matches!(parse_expr("(int) x").kind, ExprKind::Cast { .. }));
    assert!(matches!(parse_expr("(String) o").kind, ExprKind::Cast { .. }));
    assert!(matches!(parse_expr("(x) + 1").kind, ExprKind::Binary { .. }));
    assert!(matches!(parse_expr("(long) -x").kind, ExprKind::Cast { .. }));
}

#[test]
fn test_parse_calls_fields_arrays() {
    assert_eq!(parse_expr("this.a[i].f(x, y)").to_string(), "this.a[i].f(x, y)");
    assert_eq!(parse_expr("Math.max(a, b)").to_string(), "Math.max(a, b)");
    assert_eq!(parse_expr("c ? x : y").to_string(), "c ? x : y");
}

#[test]
fn test_parse_new_expressions() {
    assert_eq!(parse_expr("new int[n][]").to_string(), "new int[n][]");
    assert_eq!(parse_expr("new int[]{1, 2}").to_string(), "new int[]{1, 2}");
    assert_eq!(parse_expr("new java.util.ArrayList<>()").to_string(), "new java.util.ArrayList()");
    assert!(parse_fails("class T { Object f() { return new Object() { }; } }"));
}

#[test]
fn test_parse_node_ids_unique() {
    let e = parse_expr("a + b * c");
    let mut ids = Vec::new();
    e.any(&mut |n| {
        ids.push(n.id);
        false
    });
    let count = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), count);
    assert_eq!(count, 5);
}

// ============================================
// Statements
// ============================================

#[test]
fn test_parse_control_flow() {
    let m = parse_method(
        "int f(int n) {\n  int s = 0;\n  for (int i = 0; i < n; i++) { s += i; }\n  while (s > 10) s--;\n  do { s++; } while (s < 0);\n  if (s == 3) return 1; else { s = 2; }\n  for (int x : arr) {}\n  outer: for (;;) { break outer; }\n  return s;\n}",
    );
    let kinds: Vec<_> = body(&m).iter().map(|s| std::mem::discriminant(&s.kind)).collect();
    let expected = [
        StmtKind::LocalVar {
            is_final: false,
            declarators: vec![],
        },
        StmtKind::For {
            init: vec![],
            cond: None,
            update: vec![],
            body: Box::new(Stmt::new(StmtKind::Empty, Span::SYNTHETIC)),
        },
        StmtKind::While {
            cond: Expr::bool_lit(true, Span::SYNTHETIC),
            body: Box::new(Stmt::new(StmtKind::Empty, Span::SYNTHETIC)),
        },
        StmtKind::DoWhile {
            body: Box::new(Stmt::new(StmtKind::Empty, Span::SYNTHETIC)),
            cond: Expr::bool_lit(true, Span::SYNTHETIC),
        },
        StmtKind::If {
            cond: Expr::bool_lit(true, Span::SYNTHETIC),
            then_branch: Box::new(Stmt::new(StmtKind::Empty, Span::SYNTHETIC)),
            else_branch: None,
        },
        StmtKind::ForEach {
            ty: Type::INT,
            var: String::new(),
            iterable: Expr::bool_lit(true, Span::SYNTHETIC),
            body: Box::new(Stmt::new(StmtKind::Empty, Span::SYNTHETIC)),
        },
        StmtKind::Labeled {
            label: String::new(),
            body: Box::new(Stmt::new(StmtKind::Empty, Span::SYNTHETIC)),
        },
        StmtKind::Return(None),
    ];
    let expected: Vec<_> = expected.iter().map(std::mem::discriminant).collect();
    assert_eq!(kinds, expected);
}

#[test]
fn test_parse_local_declarations() {
    let m = parse_method("void f() { final int a = 1, b; java.util.List<String> xs = null; int[] ys = {1, 2}; a = b; }");
    let stmts = body(&m);
    assert!(matches!(&stmts[0].kind, StmtKind::LocalVar { is_final: true, declarators } if declarators.len() == 2));
    assert!(matches!(&stmts[1].kind, StmtKind::LocalVar { .. }));
    assert!(matches!(
        &stmts[2].kind,
        StmtKind::LocalVar { declarators, .. } if matches!(declarators[0].init.as_ref().map(|e| &e.kind), Some(ExprKind::ArrayInit(items)) if items.len() == 2)
    ));
    assert!(matches!(&stmts[3].kind, StmtKind::Expr(_)));
}

#[test]
fn test_parse_try_catch_finally() {
    let m = parse_method("void f() { try { g(); } catch (IllegalStateException | ArithmeticException e) { } finally { h(); } }");
    let StmtKind::Try {
        catches, finally, ..
    } = &body(&m)[0].kind
    else {
        panic!("expected try");
    };
    assert_eq!(catches[0].types.len(), 2);
    assert!(finally.is_some());
}

#[test]
fn test_parse_assert_and_body_spec() {
    let m = parse_method("void f(int x) { assert x > 0 : \"positive\";\n//@ assert x > 1;\n}");
    let stmts = body(&m);
    assert!(matches!(&stmts[0].kind, StmtKind::Assert { message: Some(_), kind: CheckKind::User, .. }));
    assert!(matches!(&stmts[1].kind, StmtKind::Spec(text) if text.starts_with("assert")));
}

#[test]
fn test_parse_constructor_delegation() {
    let m = parse_method("T(int x) { this(); super.f(); }");
    let stmts = body(&m);
    assert!(matches!(
        &stmts[0].kind,
        StmtKind::Expr(Expr { kind: ExprKind::MethodCall { name, receiver: None, .. }, .. }) if name == "this"
    ));
}

#[test]
fn test_parse_errors() {
    assert!(parse_fails("class A { void f() { int x = ; } }"));
    assert!(parse_fails("class A { void f() { switch (x) { } } }"));
    assert!(parse_fails("enum E { A }"));
    assert!(parse_fails("class A { void f() {"));
    assert!(parse_fails("class A { //@ requires x > ;\nvoid f() {} }"));
}

#[test]
fn test_parse_error_span_points_at_token() {
    let err = parse_program("class A { int f() { return 1 } }").unwrap_err();
    let span = err.span().expect("span");
    assert_eq!(&"class A { int f() { return 1 } }"[span.start..span.end], "}");
}
