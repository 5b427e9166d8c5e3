//! Best-effort type oracle for contract translation
//!
//! Java typing is not re-implemented here. The environment only answers the
//! questions the encoder asks: the type of an `\old` argument, whether a
//! clause is boolean, and whether a quantified variable is integral. Any
//! expression it cannot type yields `None` and is accepted as-is.

use std::collections::HashMap;

use crate::ast::*;

/// Signature of a method declared in the class under translation
#[derive(Debug, Clone)]
struct MethodSig {
    arity: usize,
    ret_ty: Type,
}

/// Variable and member types visible inside one method
#[derive(Debug, Clone)]
pub struct TypeEnv {
    class_name: String,
    fields: HashMap<String, Type>,
    methods: HashMap<String, Vec<MethodSig>>,
    /// Innermost scope last; parameters and locals live in scope 0
    scopes: Vec<HashMap<String, Type>>,
    ret_ty: Type,
}

impl TypeEnv {
    /// Environment for `method` declared in `class`
    pub fn for_method(class: &ClassDecl, method: &MethodDecl) -> Self {
        let mut fields = HashMap::new();
        let mut methods: HashMap<String, Vec<MethodSig>> = HashMap::new();
        for member in &class.members {
            match member {
                Member::Field(field) => {
                    for decl in &field.declarators {
                        fields.insert(decl.name.clone(), decl.ty.clone());
                    }
                }
                Member::Method(m) if !m.is_constructor => {
                    methods.entry(m.name.node.clone()).or_default().push(MethodSig {
                        arity: m.params.len(),
                        ret_ty: m.ret_ty.clone(),
                    });
                }
                _ => {}
            }
        }

        let mut locals = HashMap::new();
        for param in &method.params {
            locals.insert(param.name.node.clone(), param.ty.clone());
        }
        if let Some(body) = &method.body {
            for stmt in body {
                collect_locals(stmt, &mut locals);
            }
        }

        Self {
            class_name: class.name.node.clone(),
            fields,
            methods,
            scopes: vec![locals],
            ret_ty: method.ret_ty.clone(),
        }
    }

    /// Empty environment, mostly useful in tests
    pub fn empty(ret_ty: Type) -> Self {
        Self {
            class_name: String::new(),
            fields: HashMap::new(),
            methods: HashMap::new(),
            scopes: vec![HashMap::new()],
            ret_ty,
        }
    }

    pub fn ret_ty(&self) -> &Type {
        &self.ret_ty
    }

    /// Declare a variable in the innermost scope
    pub fn bind(&mut self, name: impl Into<String>, ty: Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), ty);
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.fields.get(name))
    }

    /// Whether `name` resolves to a local, parameter or bound variable
    pub fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains_key(name))
    }

    /// Static type of `expr`, if it can be determined
    pub fn type_of(&self, expr: &Expr) -> Option<Type> {
        match &expr.kind {
            ExprKind::Literal(lit) => Some(match lit {
                Literal::Int(_) => Type::INT,
                Literal::Long(_) => Type::Prim(PrimType::Long),
                Literal::Float(_) => Type::Prim(PrimType::Float),
                Literal::Double(_) => Type::Prim(PrimType::Double),
                Literal::Bool(_) => Type::BOOLEAN,
                Literal::Char(_) => Type::Prim(PrimType::Char),
                Literal::Str(_) => Type::class("String"),
                Literal::Null => return None,
            }),
            ExprKind::Ident(name) => self.lookup(name).cloned(),
            ExprKind::This => Some(Type::class(self.class_name.clone())),
            ExprKind::FieldAccess { target, field } => {
                let target_ty = self.type_of(target);
                match (&target_ty, field.as_str()) {
                    (Some(Type::Array(_)), "length") => Some(Type::INT),
                    _ if matches!(target.kind, ExprKind::This) => self.fields.get(field).cloned(),
                    _ => None,
                }
            }
            ExprKind::ArrayAccess { array, .. } => {
                self.type_of(array).and_then(|t| t.element().cloned())
            }
            ExprKind::Binary { left, op, right } => {
                if op.yields_boolean() {
                    return Some(Type::BOOLEAN);
                }
                let l = self.type_of(left)?;
                let r = self.type_of(right)?;
                match op {
                    BinOp::Shl | BinOp::Shr | BinOp::UShr => Some(promote_unary(&l)),
                    BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor if l.is_boolean() && r.is_boolean() => {
                        Some(Type::BOOLEAN)
                    }
                    BinOp::Add if is_string(&l) || is_string(&r) => Some(Type::class("String")),
                    _ => binary_promote(&l, &r),
                }
            }
            ExprKind::Unary { op, expr } => match op {
                UnOp::Not => Some(Type::BOOLEAN),
                UnOp::Neg | UnOp::Plus | UnOp::BitNot => self.type_of(expr).map(|t| promote_unary(&t)),
                _ => self.type_of(expr),
            },
            ExprKind::Assign { target, .. } => self.type_of(target),
            ExprKind::MethodCall {
                receiver, name, args, ..
            } => {
                let local = receiver.as_deref().is_none_or(|r| matches!(r.kind, ExprKind::This));
                if !local {
                    let receiver_ty = receiver.as_deref().and_then(|r| self.type_of(r))?;
                    return library_return(&receiver_ty, name, args.len());
                }
                self.methods
                    .get(name)?
                    .iter()
                    .find(|sig| sig.arity == args.len())
                    .map(|sig| sig.ret_ty.clone())
            }
            ExprKind::New { ty, .. } => Some(ty.clone()),
            ExprKind::NewArray {
                elem,
                dims,
                extra_dims,
                ..
            } => {
                let depth = dims.len() + extra_dims;
                Some((0..depth.max(1)).fold(elem.clone(), |t, _| Type::array_of(t)))
            }
            ExprKind::ArrayInit(_) => None,
            ExprKind::Cast { ty, .. } => Some(ty.clone()),
            ExprKind::Conditional {
                then_expr,
                else_expr,
                ..
            } => self.type_of(then_expr).or_else(|| self.type_of(else_expr)),
            ExprKind::InstanceOf { .. } => Some(Type::BOOLEAN),
            ExprKind::Quantifier {
                kind: QuantKind::ForAll | QuantKind::Exists,
                ..
            } => Some(Type::BOOLEAN),
            ExprKind::Quantifier { var_ty, .. } => Some(var_ty.clone()),
            ExprKind::Old(inner) => self.type_of(inner),
            ExprKind::Result => (!self.ret_ty.is_void()).then(|| self.ret_ty.clone()),
            ExprKind::JmlBuiltin { .. } => None,
        }
    }

    /// `Some(false)` only when `expr` is known not to be boolean
    pub fn is_boolean(&self, expr: &Expr) -> Option<bool> {
        self.type_of(expr).map(|t| t.is_boolean())
    }
}

/// Library classes whose common accessors are typed below
const LIBRARY_CLASSES: &[&str] = &[
    "String", "StringBuilder", "CharSequence", "Collection", "List", "ArrayList", "LinkedList", "Set",
    "HashSet", "LinkedHashSet", "TreeSet", "Queue", "Deque", "ArrayDeque", "Map", "HashMap",
    "LinkedHashMap", "TreeMap", "Integer", "Long", "Short", "Byte", "Character", "Boolean", "Float",
    "Double",
];

/// Return type of a well-known `java.lang`/`java.util` accessor. Anything
/// generic in its element type stays unknown.
fn library_return(receiver: &Type, name: &str, arity: usize) -> Option<Type> {
    let Type::Class { name: class, .. } = receiver else {
        return None;
    };
    let simple = class.rsplit('.').next().unwrap_or(class);
    if !LIBRARY_CLASSES.contains(&simple) {
        return None;
    }
    let ty = match (name, arity) {
        ("size" | "length" | "hashCode" | "intValue", 0) => Type::INT,
        ("indexOf" | "lastIndexOf" | "compareTo", 1) => Type::INT,
        ("isEmpty" | "booleanValue", 0) => Type::BOOLEAN,
        ("contains" | "containsKey" | "containsValue" | "equals" | "startsWith" | "endsWith", 1) => Type::BOOLEAN,
        ("charAt", 1) => Type::Prim(PrimType::Char),
        ("longValue", 0) => Type::Prim(PrimType::Long),
        ("doubleValue", 0) => Type::Prim(PrimType::Double),
        ("toString" | "trim", 0) | ("substring", 1 | 2) => Type::class("String"),
        _ => return None,
    };
    Some(ty)
}

fn is_string(ty: &Type) -> bool {
    matches!(ty, Type::Class { name, .. } if name == "String" || name == "java.lang.String")
}

fn unbox(ty: &Type) -> Option<PrimType> {
    match ty {
        Type::Prim(p) => Some(*p),
        Type::Class { name, .. } => {
            let simple = name.strip_prefix("java.lang.").unwrap_or(name);
            Some(match simple {
                "Boolean" => PrimType::Boolean,
                "Byte" => PrimType::Byte,
                "Short" => PrimType::Short,
                "Character" => PrimType::Char,
                "Integer" => PrimType::Int,
                "Long" => PrimType::Long,
                "Float" => PrimType::Float,
                "Double" => PrimType::Double,
                _ => return None,
            })
        }
        _ => None,
    }
}

fn promote_unary(ty: &Type) -> Type {
    match unbox(ty) {
        Some(PrimType::Byte | PrimType::Short | PrimType::Char) => Type::INT,
        Some(p) => Type::Prim(p),
        None => ty.clone(),
    }
}

fn binary_promote(l: &Type, r: &Type) -> Option<Type> {
    let (l, r) = (unbox(l)?, unbox(r)?);
    let rank = |p: PrimType| match p {
        PrimType::Double => 4,
        PrimType::Float => 3,
        PrimType::Long => 2,
        _ => 1,
    };
    let widest = if rank(l) >= rank(r) { l } else { r };
    Some(match rank(widest) {
        1 => Type::INT,
        _ => Type::Prim(widest),
    })
}

fn collect_locals(stmt: &Stmt, locals: &mut HashMap<String, Type>) {
    match &stmt.kind {
        StmtKind::LocalVar { declarators, .. } => {
            for decl in declarators {
                locals.entry(decl.name.clone()).or_insert_with(|| decl.ty.clone());
            }
        }
        StmtKind::ForEach { ty, var, .. } => {
            locals.entry(var.clone()).or_insert_with(|| ty.clone());
        }
        StmtKind::Try { catches, .. } => {
            for catch in catches {
                if let [ty] = catch.types.as_slice() {
                    locals.entry(catch.var.clone()).or_insert_with(|| ty.clone());
                }
            }
        }
        _ => {}
    }
    for child in stmt.children() {
        collect_locals(child, locals);
    }
}
