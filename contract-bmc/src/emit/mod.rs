//! Java source emission
//!
//! Prints an encoded program as compilable Java. Annotations and JML are
//! dropped. Every statement occupies its own line so the model checker's
//! line numbers can be mapped back through [`TraceMetadata`].

mod trace_info;

pub use trace_info::{AssertionInfo, ContractBlock, MethodInfo, TraceMetadata};

use crate::ast::*;

/// Emitted program text with its source mapping
#[derive(Debug, Clone)]
pub struct Emitted {
    pub source: String,
    pub metadata: TraceMetadata,
}

/// Emits `program`. `source` is the (preprocessed) text it was parsed from;
/// spans are resolved against it.
pub fn emit(program: &Program, source: &str) -> Emitted {
    let mut printer = JavaPrinter::new(source);
    printer.program(program);
    Emitted {
        source: printer.out,
        metadata: printer.metadata,
    }
}

struct JavaPrinter<'s> {
    source: &'s str,
    index: LineIndex,
    out: String,
    /// Number of the next line to be written
    line: u32,
    indent: usize,
    metadata: TraceMetadata,
    /// Locals of the method being printed
    locals: Vec<String>,
}

impl<'s> JavaPrinter<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            index: LineIndex::new(source),
            out: String::new(),
            line: 1,
            indent: 0,
            metadata: TraceMetadata::default(),
            locals: Vec::new(),
        }
    }

    /// Writes one line, mapping it to the line of `span`. Returns its number.
    fn line(&mut self, text: &str, span: Span) -> u32 {
        let current = self.line;
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
        if let Some(original) = self.index.span_line(span) {
            self.metadata.record_line(current, original);
        }
        self.line += 1;
        current
    }

    fn program(&mut self, program: &Program) {
        if let Some(package) = &program.package {
            self.line(&format!("package {package};"), Span::SYNTHETIC);
        }
        for import in &program.imports {
            let kw = if import.is_static { "import static" } else { "import" };
            let star = if import.wildcard { ".*" } else { "" };
            self.line(&format!("{kw} {}{star};", import.path), Span::SYNTHETIC);
        }
        for class in &program.classes {
            self.class(class, &class.name.node);
        }
    }

    fn class(&mut self, class: &ClassDecl, binary_name: &str) {
        let mut header = format!("{}", class.modifiers);
        let supers: Vec<String> = class.implements.iter().map(Type::to_string).collect();
        match class.kind {
            ClassKind::Class => {
                header.push_str(&format!("class {}{}", class.name.node, type_params(&class.type_params)));
                if let Some(base) = &class.extends {
                    header.push_str(&format!(" extends {base}"));
                }
                if !supers.is_empty() {
                    header.push_str(&format!(" implements {}", supers.join(", ")));
                }
            }
            ClassKind::Interface => {
                header.push_str(&format!("interface {}{}", class.name.node, type_params(&class.type_params)));
                if !supers.is_empty() {
                    header.push_str(&format!(" extends {}", supers.join(", ")));
                }
            }
        }
        header.push_str(" {");
        self.line(&header, class.name.span);
        self.indent += 1;
        for member in &class.members {
            match member {
                Member::Field(field) => {
                    for decl in &field.declarators {
                        let text = declaration(&field.modifiers.to_string(), decl);
                        self.line(&format!("{text};"), field.span);
                    }
                }
                Member::Method(method) => self.method(method, binary_name),
                Member::Class(inner) => {
                    let inner_name = format!("{binary_name}${}", inner.name.node);
                    self.class(inner, &inner_name);
                }
                Member::Initializer { is_static, body } => {
                    self.line(if *is_static { "static {" } else { "{" }, Span::SYNTHETIC);
                    self.block_contents(body);
                    self.line("}", Span::SYNTHETIC);
                }
            }
        }
        self.indent -= 1;
        self.line("}", Span::SYNTHETIC);
    }

    fn method(&mut self, method: &MethodDecl, class: &str) {
        let params: Vec<String> = method.params.iter().map(param).collect();
        let mut header = format!("{}{}", method.modifiers, type_params(&method.type_params));
        if !method.type_params.is_empty() {
            header.push(' ');
        }
        if !method.is_constructor {
            header.push_str(&format!("{} ", method.ret_ty));
        }
        header.push_str(&format!("{}({})", method.name.node, params.join(", ")));
        if !method.throws.is_empty() {
            let throws: Vec<String> = method.throws.iter().map(Type::to_string).collect();
            header.push_str(&format!(" throws {}", throws.join(", ")));
        }

        let Some(body) = &method.body else {
            header.push(';');
            self.line(&header, method.name.span);
            return;
        };
        header.push_str(" {");
        self.locals.clear();
        let entry_line = self.line(&header, method.name.span);
        self.block_contents(body);
        let end_line = self.line("}", Span::SYNTHETIC);
        self.metadata.methods.push(MethodInfo {
            class: class.to_string(),
            name: if method.is_constructor {
                "<init>".to_string()
            } else {
                method.name.node.clone()
            },
            entry_line,
            end_line,
            original_line: self.index.span_line(method.name.span),
            is_static: method.is_static(),
            params: method.params.iter().map(|p| p.name.node.clone()).collect(),
            locals: std::mem::take(&mut self.locals),
        });
    }

    fn block_contents(&mut self, stmts: &[Stmt]) {
        self.indent += 1;
        for stmt in stmts {
            self.stmt(stmt);
        }
        self.indent -= 1;
    }

    /// Statement as the body of a compound statement, always braced
    fn braced(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Block(stmts) => self.block_contents(stmts),
            _ => self.block_contents(std::slice::from_ref(stmt)),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.line("{", span);
                self.block_contents(stmts);
                self.line("}", Span::SYNTHETIC);
            }
            StmtKind::LocalVar {
                is_final,
                declarators,
            } => {
                let modifiers = if *is_final { "final " } else { "" };
                for decl in declarators {
                    let line = self.line(&format!("{};", declaration(modifiers, decl)), span);
                    self.note_local(&decl.name);
                    if decl.init.is_some() {
                        self.note_assignment(line, span, &decl.name);
                    }
                }
            }
            StmtKind::Expr(expr) => {
                let line = self.line(&format!("{expr};"), span);
                if let Some(name) = assigned_name(expr) {
                    self.note_assignment(line, span, &name);
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.line(&format!("if ({cond}) {{"), span);
                self.braced(then_branch);
                if let Some(else_branch) = else_branch {
                    self.line("} else {", Span::SYNTHETIC);
                    self.braced(else_branch);
                }
                self.line("}", Span::SYNTHETIC);
            }
            StmtKind::While { cond, body } => {
                self.line(&format!("while ({cond}) {{"), span);
                self.braced(body);
                self.line("}", Span::SYNTHETIC);
            }
            StmtKind::DoWhile { body, cond } => {
                self.line("do {", span);
                self.braced(body);
                self.line(&format!("}} while ({cond});"), span);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                let init = for_init(init);
                let cond = cond.as_ref().map(Expr::to_string).unwrap_or_default();
                let update: Vec<String> = update.iter().map(Expr::to_string).collect();
                self.line(&format!("for ({init}; {cond}; {}) {{", update.join(", ")), span);
                self.braced(body);
                self.line("}", Span::SYNTHETIC);
            }
            StmtKind::ForEach {
                ty,
                var,
                iterable,
                body,
            } => {
                self.note_local(var);
                self.line(&format!("for ({ty} {var} : {iterable}) {{"), span);
                self.braced(body);
                self.line("}", Span::SYNTHETIC);
            }
            StmtKind::Labeled { label, body } => {
                self.line(&format!("{label}:"), span);
                self.stmt(body);
            }
            StmtKind::Return(value) => {
                let text = match value {
                    Some(value) => format!("return {value};"),
                    None => "return;".to_string(),
                };
                self.line(&text, span);
            }
            StmtKind::Break(label) => {
                self.line(&jump("break", label), span);
            }
            StmtKind::Continue(label) => {
                self.line(&jump("continue", label), span);
            }
            StmtKind::Throw(expr) => {
                self.line(&format!("throw {expr};"), span);
            }
            StmtKind::Try {
                body,
                catches,
                finally,
                contract,
            } => {
                let start_line = self.line("try {", span);
                self.block_contents(body);
                for catch in catches {
                    let types: Vec<String> = catch.types.iter().map(Type::to_string).collect();
                    self.line(&format!("}} catch ({} {}) {{", types.join(" | "), catch.var), catch.span);
                    self.block_contents(&catch.body);
                }
                if let Some(finally) = finally {
                    self.line("} finally {", Span::SYNTHETIC);
                    self.block_contents(finally);
                }
                let end_line = self.line("}", Span::SYNTHETIC);
                if let Some(kind) = contract {
                    self.metadata.contract_blocks.push(ContractBlock {
                        kind: *kind,
                        start_line,
                        end_line,
                    });
                }
            }
            StmtKind::Assert {
                cond,
                message,
                kind,
            } => {
                let text = match message {
                    Some(message) => format!("assert {cond} : {message};"),
                    None => format!("assert {cond};"),
                };
                let line = self.line(&text, span);
                let original_text = self
                    .source
                    .get(span.start..span.end)
                    .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
                    .unwrap_or_else(|| cond.to_string());
                self.metadata.assertions.insert(
                    line,
                    AssertionInfo {
                        text: original_text,
                        vars: cond.referenced_names(),
                        kind: *kind,
                        original_line: self.index.span_line(span),
                    },
                );
            }
            // Unsupported annotations never reach the backend
            StmtKind::Spec(_) => {}
            StmtKind::Empty => {
                self.line(";", span);
            }
        }
    }

    fn note_local(&mut self, name: &str) {
        if !self.locals.iter().any(|l| l == name) {
            self.locals.push(name.to_string());
        }
    }

    /// Records an assignment written by the user, not by the encoder
    fn note_assignment(&mut self, line: u32, span: Span, name: &str) {
        if span.is_synthetic() || name.starts_with("__") {
            return;
        }
        let names = self.metadata.assignments.entry(line).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
}

fn type_params(params: &[String]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        format!("<{}>", params.join(", "))
    }
}

fn param(param: &Param) -> String {
    let modifier = if param.is_final { "final " } else { "" };
    let ty = match (&param.ty, param.is_varargs) {
        (Type::Array(elem), true) => format!("{elem}..."),
        (ty, _) => ty.to_string(),
    };
    format!("{modifier}{ty} {}", param.name.node)
}

fn declaration(modifiers: &str, decl: &VarDeclarator) -> String {
    match &decl.init {
        Some(init) => format!("{modifiers}{} {} = {init}", decl.ty, decl.name),
        None => format!("{modifiers}{} {}", decl.ty, decl.name),
    }
}

fn for_init(init: &[Stmt]) -> String {
    let parts: Vec<String> = init
        .iter()
        .map(|stmt| match &stmt.kind {
            StmtKind::LocalVar { declarators, .. } => {
                let Some(first) = declarators.first() else {
                    return String::new();
                };
                // declarators of one statement share their base type
                let rest: Vec<String> = declarators[1..]
                    .iter()
                    .map(|d| match &d.init {
                        Some(init) => format!("{} = {init}", d.name),
                        None => d.name.clone(),
                    })
                    .collect();
                let mut text = declaration("", first);
                for r in rest {
                    text.push_str(", ");
                    text.push_str(&r);
                }
                text
            }
            StmtKind::Expr(expr) => expr.to_string(),
            _ => String::new(),
        })
        .collect();
    parts.join(", ")
}

fn jump(keyword: &str, label: &Option<String>) -> String {
    match label {
        Some(label) => format!("{keyword} {label};"),
        None => format!("{keyword};"),
    }
}

/// Variable updated by an expression statement
fn assigned_name(expr: &Expr) -> Option<String> {
    let target = match &expr.kind {
        ExprKind::Assign { target, .. } => target,
        ExprKind::Unary { op, expr } if op.is_update() => expr,
        _ => return None,
    };
    match &target.kind {
        ExprKind::Ident(name) => Some(name.clone()),
        ExprKind::FieldAccess { target, field } if matches!(target.kind, ExprKind::This) => {
            Some(field.clone())
        }
        ExprKind::ArrayAccess { array, .. } => match &array.kind {
            ExprKind::Ident(name) => Some(name.clone()),
            _ => None,
        },
        _ => None,
    }
}
