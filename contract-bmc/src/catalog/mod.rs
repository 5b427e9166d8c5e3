//! Function catalog
//!
//! Enumerates the verification targets of a file: one per method of a
//! top-level class, with the backend's function descriptor, the behavior
//! declared by annotations and an optional unwind bound.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::ast::{
    Annotation, AnnotationArgs, ClassDecl, Expr, ExprKind, LineIndex, Literal, Member, MethodDecl,
    PrimType, Program, Span, Type,
};

/// Annotations that carry no verification intent
const SILENT_ANNOTATIONS: &[&str] = &[
    "Override",
    "SuppressWarnings",
    "Deprecated",
    "SafeVarargs",
    "FunctionalInterface",
];

/// `java.lang` names resolvable without an import
const JAVA_LANG: &[&str] = &[
    "Object",
    "String",
    "Boolean",
    "Byte",
    "Short",
    "Character",
    "Integer",
    "Long",
    "Float",
    "Double",
    "Number",
    "Void",
    "Math",
    "StringBuilder",
    "CharSequence",
    "Comparable",
    "Iterable",
    "Class",
    "Throwable",
    "Error",
    "Exception",
    "RuntimeException",
    "IllegalArgumentException",
    "IllegalStateException",
    "ArithmeticException",
    "NullPointerException",
    "IndexOutOfBoundsException",
    "ArrayIndexOutOfBoundsException",
];

/// Declared expectation for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Behavior {
    /// `@Verifyable`: every contract is expected to hold
    Verify,
    /// `@Fails`: the backend is expected to find a violation
    Fails,
    /// No annotation: reported but never run
    Ignored,
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Behavior::Verify => write!(f, "verifyable"),
            Behavior::Fails => write!(f, "fails"),
            Behavior::Ignored => write!(f, "ignored"),
        }
    }
}

/// One method the controller may run the backend on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationTarget {
    /// Qualified class name, `pkg.Class`
    pub class: String,
    /// Method name, `<init>` for constructors
    pub method: String,
    /// `pkg.Class.name:(params)ret`
    pub descriptor: String,
    pub behavior: Behavior,
    /// Explicit `@Unwind` bound
    pub unwind: Option<u32>,
    pub is_static: bool,
    #[serde(skip)]
    pub span: Span,
    /// 1-based line of the method name
    pub line: Option<u32>,
}

impl VerificationTarget {
    /// Whether the target passes the command-line method filter
    pub fn matches_filter(&self, filter: &str) -> bool {
        self.descriptor.contains(&format!(".{filter}"))
    }
}

/// Builds verification targets from a parsed file
pub struct FunctionCatalog<'p> {
    program: &'p Program,
    package: String,
    /// Simple name to binary name for every class declared in the file
    local_classes: HashMap<String, String>,
    /// Simple name to qualified name for single-type imports
    imports: HashMap<String, String>,
}

impl<'p> FunctionCatalog<'p> {
    pub fn new(program: &'p Program) -> Self {
        let mut local_classes = HashMap::new();
        for class in &program.classes {
            collect_classes(class, &class.name.node, &mut local_classes);
        }

        let imports = program
            .imports
            .iter()
            .filter(|import| !import.is_static && !import.wildcard)
            .filter_map(|import| {
                let simple = import.path.rsplit('.').next()?;
                Some((simple.to_string(), import.path.clone()))
            })
            .collect();

        Self {
            program,
            package: program.package.clone().unwrap_or_default(),
            local_classes,
            imports,
        }
    }

    /// Targets of every method of every top-level class, in source order
    pub fn targets(&self, source: &str) -> Vec<VerificationTarget> {
        let index = LineIndex::new(source);
        let mut targets = Vec::new();

        for class in &self.program.classes {
            // Nested classes are not catalogued
            if class.name.node.contains('$') {
                continue;
            }
            for member in &class.members {
                if let Member::Method(method) = member {
                    targets.push(self.target(class, method, &index));
                }
            }
        }

        debug!(count = targets.len(), "catalogued verification targets");
        targets
    }

    fn target(&self, class: &ClassDecl, method: &MethodDecl, index: &LineIndex) -> VerificationTarget {
        let class_name = self.qualify(&class.name.node);
        let method_name = if method.is_constructor {
            "<init>".to_string()
        } else {
            method.name.node.clone()
        };
        let descriptor = format!(
            "{class_name}.{method_name}:{}",
            self.signature(class, method)
        );
        let (behavior, unwind) = annotations(method, &descriptor);

        VerificationTarget {
            class: class_name,
            method: method_name,
            descriptor,
            behavior,
            unwind,
            is_static: method.is_static(),
            span: method.span,
            line: index.span_line(method.name.span),
        }
    }

    /// Backend-native `(params)ret` encoding
    pub fn signature(&self, class: &ClassDecl, method: &MethodDecl) -> String {
        let mut sig = String::from("(");
        for param in &method.params {
            sig.push_str(&self.type_code(&param.ty, class, method));
        }
        sig.push(')');
        if method.is_constructor {
            sig.push('V');
        } else {
            sig.push_str(&self.type_code(&method.ret_ty, class, method));
        }
        sig
    }

    fn type_code(&self, ty: &Type, class: &ClassDecl, method: &MethodDecl) -> String {
        match ty {
            Type::Void => "V".to_string(),
            Type::Prim(prim) => prim_code(*prim).to_string(),
            Type::Array(elem) => format!("[{}", self.type_code(elem, class, method)),
            Type::Class { name, .. } => {
                let erased = method.type_params.iter().chain(&class.type_params).any(|p| p == name);
                let qualified = if erased {
                    "java.lang.Object".to_string()
                } else {
                    self.resolve(name)
                };
                format!("L{};", qualified.replace('.', "/"))
            }
        }
    }

    /// Qualified name of a reference type as written in the file
    fn resolve(&self, name: &str) -> String {
        let (head, rest) = match name.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name, None),
        };

        // `Outer.Inner` written against a known outer type
        let nested = |base: String| match rest {
            Some(rest) => format!("{base}${}", rest.replace('.', "$")),
            None => base,
        };

        if let Some(path) = self.imports.get(head) {
            return nested(path.clone());
        }
        if let Some(binary) = self.local_classes.get(head) {
            return nested(self.qualify(binary));
        }
        if JAVA_LANG.contains(&head) {
            return nested(format!("java.lang.{head}"));
        }
        match rest {
            // Already fully qualified
            Some(_) => name.to_string(),
            None => self.qualify(name),
        }
    }

    fn qualify(&self, name: &str) -> String {
        if self.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.package)
        }
    }
}

fn collect_classes(class: &ClassDecl, binary: &str, out: &mut HashMap<String, String>) {
    out.entry(class.name.node.clone()).or_insert_with(|| binary.to_string());
    for member in &class.members {
        if let Member::Class(nested) = member {
            collect_classes(nested, &format!("{binary}${}", nested.name.node), out);
        }
    }
}

fn prim_code(prim: PrimType) -> char {
    match prim {
        PrimType::Boolean => 'Z',
        PrimType::Byte => 'B',
        PrimType::Short => 'S',
        PrimType::Char => 'C',
        PrimType::Int => 'I',
        PrimType::Long => 'J',
        PrimType::Float => 'F',
        PrimType::Double => 'D',
    }
}

/// Behavior tag and unwind bound declared on a method
fn annotations(method: &MethodDecl, descriptor: &str) -> (Behavior, Option<u32>) {
    let mut behavior = Behavior::Ignored;
    let mut unwind = None;

    for annotation in &method.annotations {
        match annotation.simple_name() {
            "Verifyable" => {
                if behavior == Behavior::Fails {
                    warn!(descriptor, "both @Fails and @Verifyable present, keeping @Fails");
                } else {
                    behavior = Behavior::Verify;
                }
            }
            "Fails" => {
                if behavior == Behavior::Verify {
                    warn!(descriptor, "both @Fails and @Verifyable present, keeping @Fails");
                }
                behavior = Behavior::Fails;
            }
            "Unwind" => match unwind_bound(annotation) {
                Some(n) => unwind = Some(n),
                None => warn!(descriptor, "cannot parse @Unwind argument, using the default bound"),
            },
            name if SILENT_ANNOTATIONS.contains(&name) => {}
            name => warn!(descriptor, annotation = name, "ignoring unknown annotation"),
        }
    }

    (behavior, unwind)
}

/// `@Unwind(n)` or `@Unwind(value = n)` with a positive `n`
fn unwind_bound(annotation: &Annotation) -> Option<u32> {
    let expr: &Expr = match &annotation.args {
        AnnotationArgs::None => return None,
        AnnotationArgs::Single(expr) => expr,
        AnnotationArgs::Named(pairs) => pairs.iter().find(|(key, _)| key == "value").map(|(_, e)| e)?,
    };
    match &expr.kind {
        ExprKind::Literal(Literal::Int(n)) | ExprKind::Literal(Literal::Long(n)) => {
            u32::try_from(*n).ok().filter(|n| *n > 0)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser, preprocessor};

    fn targets(source: &str) -> Vec<VerificationTarget> {
        let source = preprocessor::preprocess(source).unwrap();
        let tokens = lexer::tokenize(&source).unwrap();
        let program = parser::parse("Test.java", &source, tokens).unwrap();
        FunctionCatalog::new(&program).targets(&source)
    }

    #[test]
    fn test_primitive_descriptors() {
        let found = targets(
            "class Calc {\n  static int add(int a, long b) { return a; }\n  void touch(boolean f, double d, char c) {}\n}",
        );
        insta::assert_snapshot!(found[0].descriptor, @"Calc.add:(IJ)I");
        insta::assert_snapshot!(found[1].descriptor, @"Calc.touch:(ZDC)V");
        assert!(found[0].is_static);
        assert!(!found[1].is_static);
        assert_eq!(found[0].line, Some(2));
    }

    #[test]
    fn test_reference_resolution() {
        let found = targets(
            "package a.b;\nimport java.util.List;\nclass Box {\n  static class Item {}\n  \
             String name(List<String> xs, Item[] items, Other o, int[][] grid) { return null; }\n}",
        );
        insta::assert_snapshot!(
            found[0].descriptor,
            @"a.b.Box.name:(Ljava/util/List;[La/b/Box$Item;La/b/Other;[[I)Ljava/lang/String;"
        );
    }

    #[test]
    fn test_constructor_and_generics() {
        let found = targets("class G<T> {\n  G(T seed) {}\n  <U> U pick(U u, T t) { return u; }\n}");
        insta::assert_snapshot!(found[0].descriptor, @"G.<init>:(Ljava/lang/Object;)V");
        assert_eq!(found[0].method, "<init>");
        insta::assert_snapshot!(
            found[1].descriptor,
            @"G.pick:(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;"
        );
    }

    #[test]
    fn test_behavior_annotations() {
        let found = targets(
            "class T {\n  @Verifyable int a() { return 1; }\n  @Fails @Unwind(8) int b() { return 1; }\n  \
             @Override public String toString() { return \"\"; }\n  @Unwind(value = 3) @Verifyable void c() {}\n}",
        );
        assert_eq!(found[0].behavior, Behavior::Verify);
        assert_eq!(found[0].unwind, None);
        assert_eq!(found[1].behavior, Behavior::Fails);
        assert_eq!(found[1].unwind, Some(8));
        assert_eq!(found[2].behavior, Behavior::Ignored);
        assert_eq!(found[3].behavior, Behavior::Verify);
        assert_eq!(found[3].unwind, Some(3));
    }

    #[test]
    fn test_bad_unwind_falls_back() {
        let found = targets("class T {\n  @Verifyable @Unwind(\"many\") void a() {}\n  @Verifyable @Unwind(0) void b() {}\n}");
        assert_eq!(found[0].unwind, None);
        assert_eq!(found[1].unwind, None);
        assert_eq!(found[0].behavior, Behavior::Verify);
    }

    #[test]
    fn test_nested_methods_skipped() {
        let found = targets("class T {\n  void a() {}\n  static class In { void b() {} }\n}");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].method, "a");
    }

    #[test]
    fn test_method_filter() {
        let found = targets("class T {\n  void gcd() {}\n  void lcm() {}\n}");
        let picked: Vec<_> = found.iter().filter(|t| t.matches_filter("gcd")).collect();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].descriptor, "T.gcd:()V");
    }
}
