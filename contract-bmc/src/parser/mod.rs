//! Recursive descent parser for the Java subset and its JML contracts

use crate::ast::*;
use crate::error::{CompileError, Result};
use crate::lexer::Token;

#[cfg(test)]
mod tests;

/// Stack growth parameters for deeply nested expressions
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// JML modifiers that carry no verification obligation
const IGNORED_JML_WORDS: &[&str] = &[
    "pure",
    "helper",
    "spec_public",
    "spec_protected",
    "nullable",
    "non_null",
    "normal_behavior",
    "normal_behaviour",
    "also",
];

/// Parse tokens into AST
pub fn parse(_filename: &str, source: &str, tokens: Vec<(Token, Span)>) -> Result<Program> {
    Parser::new(tokens, source.len()).parse_program()
}

/// A JML item found in front of a declaration
enum SpecItem {
    Clause(ContractClause),
    Unsupported(Spanned<String>),
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    next_id: u32,
    prev_end: usize,
    eof: Span,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>, source_len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            next_id: 0,
            prev_end: 0,
            eof: Span::new(source_len, source_len),
        }
    }

    // ============================================
    // Token cursor
    // ============================================

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn span_at(&self, n: usize) -> Span {
        self.tokens.get(self.pos + n).map_or(self.eof, |(_, s)| *s)
    }

    fn current_span(&self) -> Span {
        self.span_at(0)
    }

    fn start(&self) -> usize {
        self.current_span().start
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end.max(start))
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn check_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == word)
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let item = self.tokens.get(self.pos).cloned();
        if let Some((_, span)) = &item {
            self.prev_end = span.end;
            self.pos += 1;
        }
        item
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<Span> {
        if self.check(token) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected(&format!("`{token}`")))
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                let span = self.current_span();
                self.advance();
                Ok(Spanned::new(name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        match self.peek() {
            Some(tok) => CompileError::parser(
                format!("expected {expected}, found `{tok}`"),
                self.current_span(),
            ),
            None => CompileError::parser(
                format!("expected {expected}, found end of file"),
                self.eof,
            ),
        }
    }

    /// Number of adjacent `>` tokens at the cursor, and whether an adjacent
    /// `>=` follows them
    fn gt_run(&self) -> (usize, bool) {
        let mut run = 0;
        let mut end = None;
        while let Some((tok, span)) = self.tokens.get(self.pos + run) {
            if end.is_some_and(|e| e != span.start) {
                return (run, false);
            }
            match tok {
                Token::Gt => {
                    run += 1;
                    end = Some(span.end);
                }
                Token::GtEq => return (run, run > 0),
                _ => return (run, false),
            }
        }
        (run, false)
    }

    fn mk(&mut self, kind: ExprKind, span: Span) -> Expr {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        Expr::new(id, kind, span)
    }

    // ============================================
    // Compilation unit
    // ============================================

    fn parse_program(&mut self) -> Result<Program> {
        let mut package = None;
        // a file without a package clause starts directly with the first class prefix
        let (_, leading_modifiers, mut pending_specs) = self.parse_declaration_prefix()?;
        let mut leading_modifiers = Some(leading_modifiers);
        if self.eat(&Token::Package) {
            package = Some(self.parse_qualified_name()?);
            self.expect(&Token::Semi)?;
        }

        let mut imports = Vec::new();
        while self.eat(&Token::Import) {
            let is_static = self.eat(&Token::Static);
            let mut path = self.expect_ident()?.node;
            let mut wildcard = false;
            while self.eat(&Token::Dot) {
                if self.eat(&Token::Star) {
                    wildcard = true;
                    break;
                }
                path.push('.');
                path.push_str(&self.expect_ident()?.node);
            }
            self.expect(&Token::Semi)?;
            imports.push(Import {
                path,
                is_static,
                wildcard,
            });
        }

        let mut classes = Vec::new();
        while !self.at_eof() {
            if self.eat(&Token::Semi) {
                continue;
            }
            let start = self.start();
            let (_, mut modifiers, specs) = self.parse_declaration_prefix()?;
            if let Some(leading) = leading_modifiers.take()
                && modifiers == Modifiers::default()
            {
                modifiers = leading;
            }
            pending_specs.extend(specs);
            let mut class = self.parse_class_decl(modifiers, start)?;
            class.ignored_specs.extend(pending_specs.drain(..).map(spec_keyword));
            classes.push(class);
        }

        Ok(Program {
            package,
            imports,
            classes,
        })
    }

    fn parse_qualified_name(&mut self) -> Result<String> {
        let mut name = self.expect_ident()?.node;
        while self.check(&Token::Dot) && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_ident()?.node);
        }
        Ok(name)
    }

    fn parse_annotation(&mut self) -> Result<Annotation> {
        let start = self.expect(&Token::At)?.start;
        let name = self.parse_qualified_name()?;
        let mut args = AnnotationArgs::None;
        if self.eat(&Token::LParen) {
            if matches!(self.peek(), Some(Token::Ident(_))) && self.peek_at(1) == Some(&Token::Eq) {
                let mut pairs = Vec::new();
                loop {
                    let key = self.expect_ident()?.node;
                    self.expect(&Token::Eq)?;
                    pairs.push((key, self.parse_annotation_value()?));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                args = AnnotationArgs::Named(pairs);
            } else if !self.check(&Token::RParen) {
                args = AnnotationArgs::Single(self.parse_annotation_value()?);
            }
            self.expect(&Token::RParen)?;
        }
        Ok(Annotation {
            name,
            args,
            span: self.span_from(start),
        })
    }

    fn parse_annotation_value(&mut self) -> Result<Expr> {
        if self.check(&Token::LBrace) {
            self.parse_array_init()
        } else {
            self.parse_conditional()
        }
    }

    /// Annotations, modifiers and JML specifications in any order
    fn parse_declaration_prefix(&mut self) -> Result<(Vec<Annotation>, Modifiers, Vec<SpecItem>)> {
        let mut annotations = Vec::new();
        let mut modifiers = Modifiers::default();
        let mut specs = Vec::new();
        loop {
            match self.peek() {
                Some(Token::At) if self.peek_at(1) != Some(&Token::Interface) => {
                    annotations.push(self.parse_annotation()?);
                    continue;
                }
                Some(Token::JmlOpen) => {
                    specs.extend(self.parse_spec_region()?);
                    continue;
                }
                Some(Token::Public) => modifiers.visibility = Visibility::Public,
                Some(Token::Protected) => modifiers.visibility = Visibility::Protected,
                Some(Token::Private) => modifiers.visibility = Visibility::Private,
                Some(Token::Static) => modifiers.is_static = true,
                Some(Token::Final) => modifiers.is_final = true,
                Some(Token::Abstract) => modifiers.is_abstract = true,
                Some(Token::Synchronized) => modifiers.is_synchronized = true,
                Some(Token::Native) => modifiers.is_native = true,
                Some(Token::Transient) => modifiers.is_transient = true,
                Some(Token::Volatile) => modifiers.is_volatile = true,
                Some(Token::Default) => {}
                _ => return Ok((annotations, modifiers, specs)),
            }
            self.advance();
        }
    }

    // ============================================
    // JML regions
    // ============================================

    /// `@{ ... @}` in front of a declaration
    fn parse_spec_region(&mut self) -> Result<Vec<SpecItem>> {
        self.expect(&Token::JmlOpen)?;
        let mut items = Vec::new();
        loop {
            let start = self.start();
            match self.peek().cloned() {
                None => return Err(self.unexpected("`@*/`")),
                Some(Token::JmlClose) => {
                    self.advance();
                    return Ok(items);
                }
                Some(Token::Semi | Token::Public | Token::Private | Token::Protected) => {
                    self.advance();
                }
                Some(Token::Ident(word)) if word == "requires" || word == "pre" => {
                    self.advance();
                    items.push(SpecItem::Clause(self.parse_clause(ClauseKind::Requires, start)?));
                }
                Some(Token::Ident(word)) if word == "ensures" || word == "post" => {
                    self.advance();
                    items.push(SpecItem::Clause(self.parse_clause(ClauseKind::Ensures, start)?));
                }
                Some(Token::Ident(word)) if IGNORED_JML_WORDS.contains(&word.as_str()) => {
                    self.advance();
                }
                Some(other) => {
                    self.skip_spec_clause();
                    items.push(SpecItem::Unsupported(Spanned::new(
                        other.to_string(),
                        self.span_from(start),
                    )));
                }
            }
        }
    }

    fn parse_clause(&mut self, kind: ClauseKind, start: usize) -> Result<ContractClause> {
        let expr = self.parse_expr()?;
        self.expect(&Token::Semi)?;
        Ok(ContractClause {
            kind,
            expr,
            span: self.span_from(start),
        })
    }

    /// Skip to the end of the current clause (`;` at depth 0) or region
    fn skip_spec_clause(&mut self) {
        let mut depth = 0usize;
        while let Some(tok) = self.peek() {
            match tok {
                Token::JmlClose => return,
                Token::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                Token::LParen | Token::LBrace | Token::LBracket => depth += 1,
                Token::RParen | Token::RBrace | Token::RBracket => depth = depth.saturating_sub(1),
                _ => {}
            }
            self.advance();
        }
    }

    /// JML region inside a method body, kept as text
    fn parse_spec_statement(&mut self) -> Result<Stmt> {
        let start = self.expect(&Token::JmlOpen)?.start;
        let mut words = Vec::new();
        loop {
            match self.advance() {
                None => return Err(self.unexpected("`@*/`")),
                Some((Token::JmlClose, _)) => break,
                Some((tok, _)) => words.push(tok.to_string()),
            }
        }
        Ok(Stmt::new(StmtKind::Spec(words.join(" ")), self.span_from(start)))
    }

    // ============================================
    // Classes and members
    // ============================================

    fn parse_class_decl(&mut self, modifiers: Modifiers, start: usize) -> Result<ClassDecl> {
        let kind = match self.peek() {
            Some(Token::Class) => ClassKind::Class,
            Some(Token::Interface) => ClassKind::Interface,
            Some(Token::Ident(word)) if word == "enum" || word == "record" => {
                return Err(CompileError::parser(
                    format!("{word} declarations are not supported"),
                    self.current_span(),
                ));
            }
            _ => return Err(self.unexpected("`class` or `interface`")),
        };
        self.advance();
        let name = self.expect_ident()?;
        let type_params = self.parse_type_params()?;

        let mut extends = None;
        let mut implements = Vec::new();
        if self.eat(&Token::Extends) {
            match kind {
                ClassKind::Class => extends = Some(self.parse_type()?),
                ClassKind::Interface => implements = self.parse_type_list()?,
            }
        }
        if self.eat(&Token::Implements) {
            implements.extend(self.parse_type_list()?);
        }

        self.expect(&Token::LBrace)?;
        let mut members = Vec::new();
        let mut ignored_specs = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected("`}`"));
            }
            if self.eat(&Token::Semi) {
                continue;
            }
            let member_start = self.start();
            let (annotations, modifiers, specs) = self.parse_declaration_prefix()?;

            if self.check(&Token::RBrace) {
                // trailing specs such as a class invariant at the end of the body
                ignored_specs.extend(specs.into_iter().map(spec_keyword));
                break;
            }

            if matches!(self.peek(), Some(Token::Class | Token::Interface))
                || self.check_ident("enum")
                || self.check_ident("record")
            {
                let mut nested = self.parse_class_decl(modifiers, member_start)?;
                nested.ignored_specs.extend(specs.into_iter().map(spec_keyword));
                members.push(Member::Class(nested));
                continue;
            }

            if self.check(&Token::LBrace) {
                ignored_specs.extend(specs.into_iter().map(spec_keyword));
                let body = self.parse_block()?;
                members.push(Member::Initializer {
                    is_static: modifiers.is_static,
                    body,
                });
                continue;
            }

            let type_params = self.parse_type_params()?;
            let is_constructor =
                self.check_ident(&name.node) && self.peek_at(1) == Some(&Token::LParen);
            let ret_ty = if is_constructor {
                Type::Void
            } else if self.eat(&Token::Void) {
                Type::Void
            } else {
                self.parse_type()?
            };
            let member_name = self.expect_ident()?;

            if self.check(&Token::LParen) {
                let method = self.parse_method_rest(
                    annotations,
                    modifiers,
                    type_params,
                    member_name,
                    ret_ty,
                    is_constructor,
                    specs,
                    member_start,
                )?;
                members.push(Member::Method(method));
            } else {
                ignored_specs.extend(specs.into_iter().map(spec_keyword));
                let declarators = self.parse_declarators_after_name(ret_ty, member_name)?;
                self.expect(&Token::Semi)?;
                members.push(Member::Field(FieldDecl {
                    modifiers,
                    declarators,
                    span: self.span_from(member_start),
                }));
            }
        }
        self.expect(&Token::RBrace)?;

        Ok(ClassDecl {
            kind,
            modifiers,
            name,
            type_params,
            extends,
            implements,
            members,
            ignored_specs,
            span: self.span_from(start),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_method_rest(
        &mut self,
        annotations: Vec<Annotation>,
        modifiers: Modifiers,
        type_params: Vec<String>,
        name: Spanned<String>,
        ret_ty: Type,
        is_constructor: bool,
        specs: Vec<SpecItem>,
        start: usize,
    ) -> Result<MethodDecl> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                params.push(self.parse_param()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;

        // legacy `int f()[]` syntax
        let mut ret_ty = ret_ty;
        while self.check(&Token::LBracket) && self.peek_at(1) == Some(&Token::RBracket) {
            self.advance();
            self.advance();
            ret_ty = Type::array_of(ret_ty);
        }

        let throws = if self.eat(&Token::Throws) {
            self.parse_type_list()?
        } else {
            Vec::new()
        };

        let body = if self.eat(&Token::Semi) {
            None
        } else {
            Some(self.parse_block()?)
        };

        let mut contract = MethodContract::default();
        for item in specs {
            match item {
                SpecItem::Clause(clause) => contract.add(clause),
                SpecItem::Unsupported(word) => contract.unsupported.push(word),
            }
        }

        Ok(MethodDecl {
            annotations,
            modifiers,
            type_params,
            name,
            ret_ty,
            is_constructor,
            params,
            throws,
            contract,
            body,
            span: self.span_from(start),
        })
    }

    fn parse_param(&mut self) -> Result<Param> {
        let mut is_final = false;
        loop {
            if self.eat(&Token::Final) {
                is_final = true;
            } else if self.check(&Token::At) {
                self.parse_annotation()?;
            } else if self.check(&Token::JmlOpen) {
                let specs = self.parse_spec_region()?;
                if let Some(item) = specs.into_iter().next() {
                    let span = match item {
                        SpecItem::Clause(c) => c.span,
                        SpecItem::Unsupported(w) => w.span,
                    };
                    return Err(CompileError::parser("JML clause not allowed on a parameter", span));
                }
            } else {
                break;
            }
        }
        let mut ty = self.parse_type()?;
        let is_varargs = self.eat(&Token::Ellipsis);
        if is_varargs {
            ty = Type::array_of(ty);
        }
        let name = self.expect_ident()?;
        let ty = self.parse_dims(ty);
        Ok(Param {
            name,
            ty,
            is_final,
            is_varargs,
        })
    }

    fn parse_declarators_after_name(
        &mut self,
        ty: Type,
        first: Spanned<String>,
    ) -> Result<Vec<VarDeclarator>> {
        let mut declarators = vec![self.parse_declarator_rest(&ty, first.node)?];
        while self.eat(&Token::Comma) {
            let name = self.expect_ident()?.node;
            declarators.push(self.parse_declarator_rest(&ty, name)?);
        }
        Ok(declarators)
    }

    fn parse_declarator_rest(&mut self, ty: &Type, name: String) -> Result<VarDeclarator> {
        let ty = self.parse_dims(ty.clone());
        let init = if self.eat(&Token::Eq) {
            Some(if self.check(&Token::LBrace) {
                self.parse_array_init()?
            } else {
                self.parse_expr()?
            })
        } else {
            None
        };
        Ok(VarDeclarator { name, ty, init })
    }

    // ============================================
    // Types
    // ============================================

    fn parse_type_params(&mut self) -> Result<Vec<String>> {
        let mut params = Vec::new();
        if !self.eat(&Token::Lt) {
            return Ok(params);
        }
        loop {
            params.push(self.expect_ident()?.node);
            if self.eat(&Token::Extends) {
                self.parse_type()?;
                while self.eat(&Token::Amp) {
                    self.parse_type()?;
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::Gt)?;
        Ok(params)
    }

    fn parse_type_list(&mut self) -> Result<Vec<Type>> {
        let mut types = vec![self.parse_type()?];
        while self.eat(&Token::Comma) {
            types.push(self.parse_type()?);
        }
        Ok(types)
    }

    fn primitive_at_cursor(&self) -> Option<PrimType> {
        Some(match self.peek()? {
            Token::TyBoolean => PrimType::Boolean,
            Token::TyByte => PrimType::Byte,
            Token::TyShort => PrimType::Short,
            Token::TyChar => PrimType::Char,
            Token::TyInt => PrimType::Int,
            Token::TyLong => PrimType::Long,
            Token::TyFloat => PrimType::Float,
            Token::TyDouble => PrimType::Double,
            _ => return None,
        })
    }

    /// Type without trailing array dimensions
    fn parse_base_type(&mut self) -> Result<Type> {
        if let Some(prim) = self.primitive_at_cursor() {
            self.advance();
            return Ok(Type::Prim(prim));
        }
        let mut name = self.expect_ident()?.node;
        let mut args = self.parse_type_args()?;
        while self.check(&Token::Dot) && matches!(self.peek_at(1), Some(Token::Ident(_))) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_ident()?.node);
            args = self.parse_type_args()?;
        }
        Ok(Type::Class { name, args })
    }

    fn parse_type(&mut self) -> Result<Type> {
        let base = self.parse_base_type()?;
        Ok(self.parse_dims(base))
    }

    fn parse_dims(&mut self, mut ty: Type) -> Type {
        while self.check(&Token::LBracket) && self.peek_at(1) == Some(&Token::RBracket) {
            self.advance();
            self.advance();
            ty = Type::array_of(ty);
        }
        ty
    }

    fn parse_type_args(&mut self) -> Result<Vec<Type>> {
        let mut args = Vec::new();
        if !self.eat(&Token::Lt) {
            return Ok(args);
        }
        if self.eat(&Token::Gt) {
            // diamond
            return Ok(args);
        }
        loop {
            if self.eat(&Token::Question) {
                // wildcards are kept as written for re-emission
                let name = if self.eat(&Token::Extends) {
                    format!("? extends {}", self.parse_type()?)
                } else if self.eat(&Token::Super) {
                    format!("? super {}", self.parse_type()?)
                } else {
                    "?".to_string()
                };
                args.push(Type::class(name));
            } else {
                args.push(self.parse_type()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::Gt)?;
        Ok(args)
    }

    /// Speculatively parse `Type name`, restoring the cursor on failure
    fn try_local_var_start(&mut self) -> Option<Type> {
        let saved = (self.pos, self.prev_end);
        let ty = self.parse_type().ok();
        let is_decl = ty.is_some()
            && matches!(self.peek(), Some(Token::Ident(_)))
            && matches!(
                self.peek_at(1),
                Some(Token::Eq | Token::Semi | Token::Comma | Token::LBracket | Token::Colon)
            );
        if is_decl {
            ty
        } else {
            (self.pos, self.prev_end) = saved;
            None
        }
    }

    // ============================================
    // Statements
    // ============================================

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.at_eof() {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.parse_stmt_inner())
    }

    fn parse_stmt_inner(&mut self) -> Result<Stmt> {
        let start = self.start();
        let kind = match self.peek() {
            None => return Err(self.unexpected("statement")),
            Some(Token::LBrace) => StmtKind::Block(self.parse_block()?),
            Some(Token::Semi) => {
                self.advance();
                StmtKind::Empty
            }
            Some(Token::JmlOpen) => return self.parse_spec_statement(),
            Some(Token::If) => {
                self.advance();
                let cond = self.parse_paren_expr()?;
                let then_branch = Box::new(self.parse_stmt()?);
                let else_branch = if self.eat(&Token::Else) {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            Some(Token::While) => {
                self.advance();
                let cond = self.parse_paren_expr()?;
                let body = Box::new(self.parse_stmt()?);
                StmtKind::While { cond, body }
            }
            Some(Token::Do) => {
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                self.expect(&Token::While)?;
                let cond = self.parse_paren_expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::DoWhile { body, cond }
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Return) => {
                self.advance();
                let value = if self.check(&Token::Semi) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semi)?;
                StmtKind::Return(value)
            }
            Some(Token::Break) => {
                self.advance();
                let label = self.parse_optional_label();
                self.expect(&Token::Semi)?;
                StmtKind::Break(label)
            }
            Some(Token::Continue) => {
                self.advance();
                let label = self.parse_optional_label();
                self.expect(&Token::Semi)?;
                StmtKind::Continue(label)
            }
            Some(Token::Throw) => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&Token::Semi)?;
                StmtKind::Throw(value)
            }
            Some(Token::Try) => self.parse_try()?,
            Some(Token::Assert) => {
                self.advance();
                let cond = self.parse_expr()?;
                let message = if self.eat(&Token::Colon) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect(&Token::Semi)?;
                StmtKind::Assert {
                    cond,
                    message,
                    kind: CheckKind::User,
                }
            }
            Some(Token::Class | Token::Interface) => {
                return Err(CompileError::parser(
                    "local class declarations are not supported",
                    self.current_span(),
                ));
            }
            Some(Token::Ident(word)) if word == "switch" || word == "yield" => {
                return Err(CompileError::parser(
                    format!("`{word}` statements are not supported"),
                    self.current_span(),
                ));
            }
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::Colon) => {
                let label = self.expect_ident()?.node;
                self.advance();
                let body = Box::new(self.parse_stmt()?);
                StmtKind::Labeled { label, body }
            }
            Some(Token::Final) => {
                self.advance();
                let ty = self.parse_type()?;
                let kind = self.parse_local_var(true, ty)?;
                self.expect(&Token::Semi)?;
                kind
            }
            _ => match self.try_local_var_start() {
                Some(ty) => {
                    let kind = self.parse_local_var(false, ty)?;
                    self.expect(&Token::Semi)?;
                    kind
                }
                None => {
                    let expr = self.parse_expr()?;
                    self.expect(&Token::Semi)?;
                    StmtKind::Expr(expr)
                }
            },
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    fn parse_optional_label(&mut self) -> Option<String> {
        match self.peek() {
            Some(Token::Ident(label)) => {
                let label = label.clone();
                self.advance();
                Some(label)
            }
            _ => None,
        }
    }

    fn parse_local_var(&mut self, is_final: bool, ty: Type) -> Result<StmtKind> {
        let first = self.expect_ident()?;
        let declarators = self.parse_declarators_after_name(ty, first)?;
        Ok(StmtKind::LocalVar {
            is_final,
            declarators,
        })
    }

    fn parse_paren_expr(&mut self) -> Result<Expr> {
        self.expect(&Token::LParen)?;
        let expr = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Ok(expr)
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.expect(&Token::For)?;
        self.expect(&Token::LParen)?;

        let init_start = self.start();
        let is_final = self.eat(&Token::Final);
        let decl_ty = if is_final {
            Some(self.parse_type()?)
        } else {
            self.try_local_var_start()
        };

        if let Some(ty) = &decl_ty
            && matches!(self.peek(), Some(Token::Ident(_)))
            && self.peek_at(1) == Some(&Token::Colon)
        {
            let var = self.expect_ident()?.node;
            self.expect(&Token::Colon)?;
            let iterable = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(StmtKind::ForEach {
                ty: ty.clone(),
                var,
                iterable,
                body,
            });
        }

        let mut init = Vec::new();
        if let Some(ty) = decl_ty {
            let kind = self.parse_local_var(is_final, ty)?;
            init.push(Stmt::new(kind, self.span_from(init_start)));
        } else if !self.check(&Token::Semi) {
            loop {
                init.push(Stmt::expr(self.parse_expr()?));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::Semi)?;

        let cond = if self.check(&Token::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semi)?;

        let mut update = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                update.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        let body = Box::new(self.parse_stmt()?);
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind> {
        self.expect(&Token::Try)?;
        if self.check(&Token::LParen) {
            return Err(CompileError::parser(
                "try-with-resources is not supported",
                self.current_span(),
            ));
        }
        let body = self.parse_block()?;
        let mut catches = Vec::new();
        while self.check(&Token::Catch) {
            let start = self.start();
            self.advance();
            self.expect(&Token::LParen)?;
            self.eat(&Token::Final);
            let mut types = vec![self.parse_type()?];
            while self.eat(&Token::Pipe) {
                types.push(self.parse_type()?);
            }
            let var = self.expect_ident()?.node;
            self.expect(&Token::RParen)?;
            let body = self.parse_block()?;
            catches.push(CatchClause {
                types,
                var,
                body,
                span: self.span_from(start),
            });
        }
        let finally = if self.eat(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(self.unexpected("`catch` or `finally`"));
        }
        Ok(StmtKind::Try {
            body,
            catches,
            finally,
            contract: None,
        })
    }

    // ============================================
    // Expressions
    // ============================================

    fn parse_expr(&mut self) -> Result<Expr> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.parse_assignment())
    }

    fn assignment_op(&self) -> Option<(Option<BinOp>, usize)> {
        let simple = match self.peek()? {
            Token::Eq => Some((None, 1)),
            Token::PlusEq => Some((Some(BinOp::Add), 1)),
            Token::MinusEq => Some((Some(BinOp::Sub), 1)),
            Token::StarEq => Some((Some(BinOp::Mul), 1)),
            Token::SlashEq => Some((Some(BinOp::Div), 1)),
            Token::PercentEq => Some((Some(BinOp::Rem), 1)),
            Token::AmpEq => Some((Some(BinOp::BitAnd), 1)),
            Token::PipeEq => Some((Some(BinOp::BitOr), 1)),
            Token::CaretEq => Some((Some(BinOp::BitXor), 1)),
            Token::ShlEq => Some((Some(BinOp::Shl), 1)),
            _ => None,
        };
        if simple.is_some() {
            return simple;
        }
        match self.gt_run() {
            (1, true) => Some((Some(BinOp::Shr), 2)),
            (2, true) => Some((Some(BinOp::UShr), 3)),
            _ => None,
        }
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let start = self.start();
        let target = self.parse_conditional()?;
        let Some((op, width)) = self.assignment_op() else {
            return Ok(target);
        };
        if !matches!(
            target.kind,
            ExprKind::Ident(_) | ExprKind::FieldAccess { .. } | ExprKind::ArrayAccess { .. }
        ) {
            return Err(CompileError::parser("invalid assignment target", target.span));
        }
        for _ in 0..width {
            self.advance();
        }
        let value = self.parse_expr()?;
        let span = self.span_from(start);
        Ok(self.mk(
            ExprKind::Assign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let start = self.start();
        let cond = self.parse_equivalence()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(&Token::Colon)?;
        let else_expr = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.parse_conditional()
        })?;
        let span = self.span_from(start);
        Ok(self.mk(
            ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        ))
    }

    fn binary(&mut self, left: Expr, op: BinOp, right: Expr, start: usize) -> Expr {
        let span = self.span_from(start);
        self.mk(
            ExprKind::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            span,
        )
    }

    /// Left-associative binary level
    fn parse_left_assoc(
        &mut self,
        next: fn(&mut Self) -> Result<Expr>,
        op_at: fn(&Self) -> Option<(BinOp, usize)>,
    ) -> Result<Expr> {
        let start = self.start();
        let mut left = next(self)?;
        while let Some((op, width)) = op_at(self) {
            for _ in 0..width {
                self.advance();
            }
            let right = next(self)?;
            left = self.binary(left, op, right, start);
        }
        Ok(left)
    }

    fn parse_equivalence(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_implication, |p| match p.peek()? {
            Token::Equiv => Some((BinOp::Equiv, 1)),
            Token::NotEquiv => Some((BinOp::NotEquiv, 1)),
            _ => None,
        })
    }

    /// `==>` is right-associative, `<==` left-associative
    fn parse_implication(&mut self) -> Result<Expr> {
        let start = self.start();
        let mut left = self.parse_or()?;
        loop {
            if self.eat(&Token::Implies) {
                let right = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
                    self.parse_implication()
                })?;
                return Ok(self.binary(left, BinOp::Implies, right, start));
            } else if self.eat(&Token::RevImplies) {
                let right = self.parse_or()?;
                left = self.binary(left, BinOp::RevImplies, right, start);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_and, |p| {
            (p.peek()? == &Token::PipePipe).then_some((BinOp::Or, 1))
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_bit_or, |p| {
            (p.peek()? == &Token::AndAnd).then_some((BinOp::And, 1))
        })
    }

    fn parse_bit_or(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_bit_xor, |p| {
            (p.peek()? == &Token::Pipe).then_some((BinOp::BitOr, 1))
        })
    }

    fn parse_bit_xor(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_bit_and, |p| {
            (p.peek()? == &Token::Caret).then_some((BinOp::BitXor, 1))
        })
    }

    fn parse_bit_and(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_equality, |p| {
            (p.peek()? == &Token::Amp).then_some((BinOp::BitAnd, 1))
        })
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_relational, |p| match p.peek()? {
            Token::EqEq => Some((BinOp::Eq, 1)),
            Token::NotEq => Some((BinOp::Ne, 1)),
            _ => None,
        })
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let start = self.start();
        let mut left = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::LtEq) => BinOp::Le,
                Some(Token::GtEq) => BinOp::Ge,
                Some(Token::Gt) if self.gt_run() == (1, false) => BinOp::Gt,
                Some(Token::InstanceOf) => {
                    self.advance();
                    let ty = self.parse_type()?;
                    let span = self.span_from(start);
                    left = self.mk(
                        ExprKind::InstanceOf {
                            expr: Box::new(left),
                            ty,
                        },
                        span,
                    );
                    continue;
                }
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_shift()?;
            left = self.binary(left, op, right, start);
        }
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_additive, |p| match p.peek()? {
            Token::Shl => Some((BinOp::Shl, 1)),
            Token::Gt => match p.gt_run() {
                (2, false) => Some((BinOp::Shr, 2)),
                (3, false) => Some((BinOp::UShr, 3)),
                _ => None,
            },
            _ => None,
        })
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_multiplicative, |p| match p.peek()? {
            Token::Plus => Some((BinOp::Add, 1)),
            Token::Minus => Some((BinOp::Sub, 1)),
            _ => None,
        })
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        self.parse_left_assoc(Self::parse_unary, |p| match p.peek()? {
            Token::Star => Some((BinOp::Mul, 1)),
            Token::Slash => Some((BinOp::Div, 1)),
            Token::Percent => Some((BinOp::Rem, 1)),
            _ => None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.start();
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnOp::Neg),
            Some(Token::Plus) => Some(UnOp::Plus),
            Some(Token::Bang) => Some(UnOp::Not),
            Some(Token::Tilde) => Some(UnOp::BitNot),
            Some(Token::PlusPlus) => Some(UnOp::PreInc),
            Some(Token::MinusMinus) => Some(UnOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.parse_unary())?;
            let span = self.span_from(start);
            return Ok(self.mk(
                ExprKind::Unary {
                    op,
                    expr: Box::new(expr),
                },
                span,
            ));
        }
        if let Some(ty) = self.try_cast_prefix() {
            let expr = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.parse_unary())?;
            let span = self.span_from(start);
            return Ok(self.mk(
                ExprKind::Cast {
                    ty,
                    expr: Box::new(expr),
                },
                span,
            ));
        }
        self.parse_postfix()
    }

    /// `(Type)` followed by something a cast can apply to
    fn try_cast_prefix(&mut self) -> Option<Type> {
        if !self.check(&Token::LParen) {
            return None;
        }
        let is_primitive = matches!(
            self.peek_at(1),
            Some(
                Token::TyBoolean
                    | Token::TyByte
                    | Token::TyShort
                    | Token::TyChar
                    | Token::TyInt
                    | Token::TyLong
                    | Token::TyFloat
                    | Token::TyDouble
            )
        );
        if !is_primitive && !matches!(self.peek_at(1), Some(Token::Ident(_))) {
            return None;
        }
        let saved = (self.pos, self.prev_end);
        self.advance();
        let ty = self.parse_type().ok();
        let closes = self.eat(&Token::RParen);
        let operand_follows = match self.peek() {
            Some(
                Token::Ident(_)
                | Token::IntLit(_)
                | Token::LongLit(_)
                | Token::FloatLit(_)
                | Token::DoubleLit(_)
                | Token::CharLit(_)
                | Token::StringLit(_)
                | Token::True
                | Token::False
                | Token::Null
                | Token::This
                | Token::Super
                | Token::New
                | Token::LParen
                | Token::Bang
                | Token::Tilde
                | Token::Backslash(_),
            ) => true,
            Some(Token::Minus | Token::Plus | Token::PlusPlus | Token::MinusMinus) => {
                matches!(&ty, Some(Type::Prim(_)) | Some(Type::Array(_)))
            }
            _ => false,
        };
        match ty {
            Some(ty) if closes && operand_follows && (is_primitive || ty_is_plausible_cast(&ty)) => Some(ty),
            _ => {
                (self.pos, self.prev_end) = saved;
                None
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let start = self.start();
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let field = match self.peek() {
                        Some(Token::Class) => {
                            self.advance();
                            "class".to_string()
                        }
                        Some(Token::This) => {
                            self.advance();
                            "this".to_string()
                        }
                        _ => self.expect_ident()?.node,
                    };
                    if self.check(&Token::LParen) {
                        let args = self.parse_args()?;
                        let span = self.span_from(start);
                        expr = self.mk(
                            ExprKind::MethodCall {
                                receiver: Some(Box::new(expr)),
                                name: field,
                                args,
                            },
                            span,
                        );
                    } else {
                        let span = self.span_from(start);
                        expr = self.mk(
                            ExprKind::FieldAccess {
                                target: Box::new(expr),
                                field,
                            },
                            span,
                        );
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket)?;
                    let span = self.span_from(start);
                    expr = self.mk(
                        ExprKind::ArrayAccess {
                            array: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                Some(Token::PlusPlus | Token::MinusMinus) => {
                    let op = if self.check(&Token::PlusPlus) {
                        UnOp::PostInc
                    } else {
                        UnOp::PostDec
                    };
                    self.advance();
                    let span = self.span_from(start);
                    expr = self.mk(
                        ExprKind::Unary {
                            op,
                            expr: Box::new(expr),
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.start();
        let Some((token, span)) = self.advance() else {
            return Err(self.unexpected("expression"));
        };
        let kind = match token {
            Token::IntLit(n) => ExprKind::Literal(Literal::Int(n)),
            Token::LongLit(n) => ExprKind::Literal(Literal::Long(n)),
            Token::FloatLit(v) => ExprKind::Literal(Literal::Float(v)),
            Token::DoubleLit(v) => ExprKind::Literal(Literal::Double(v)),
            Token::CharLit(c) => ExprKind::Literal(Literal::Char(c)),
            Token::StringLit(s) => ExprKind::Literal(Literal::Str(s)),
            Token::True => ExprKind::Literal(Literal::Bool(true)),
            Token::False => ExprKind::Literal(Literal::Bool(false)),
            Token::Null => ExprKind::Literal(Literal::Null),
            Token::This if self.check(&Token::LParen) => ExprKind::MethodCall {
                receiver: None,
                name: "this".to_string(),
                args: self.parse_args()?,
            },
            Token::This => ExprKind::This,
            Token::Super if self.check(&Token::LParen) => ExprKind::MethodCall {
                receiver: None,
                name: "super".to_string(),
                args: self.parse_args()?,
            },
            Token::Super => ExprKind::Ident("super".to_string()),
            Token::Ident(name) if self.check(&Token::LParen) => ExprKind::MethodCall {
                receiver: None,
                name,
                args: self.parse_args()?,
            },
            Token::Ident(name) => ExprKind::Ident(name),
            Token::LParen => {
                if let Some(Token::Backslash(word)) = self.peek()
                    && matches!(word.as_str(), "forall" | "exists" | "sum" | "product" | "max" | "min" | "num_of")
                {
                    return self.parse_quantifier(start);
                }
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                // parentheses are re-derived from precedence when printing
                return Ok(inner);
            }
            Token::New => return self.parse_new(start),
            Token::Backslash(word) => match word.as_str() {
                "result" => ExprKind::Result,
                "old" | "pre" => {
                    self.expect(&Token::LParen)?;
                    let inner = self.parse_expr()?;
                    if self.eat(&Token::Comma) {
                        return Err(CompileError::parser(
                            "labelled \\old references are not supported",
                            self.current_span(),
                        ));
                    }
                    self.expect(&Token::RParen)?;
                    ExprKind::Old(Box::new(inner))
                }
                _ => {
                    let args = if self.check(&Token::LParen) {
                        self.parse_args()?
                    } else {
                        Vec::new()
                    };
                    ExprKind::JmlBuiltin { name: word, args }
                }
            },
            Token::LBrace => {
                return Err(CompileError::parser(
                    "array initializer is only allowed in a declaration",
                    span,
                ));
            }
            other => {
                return Err(CompileError::parser(
                    format!("expected expression, found `{other}`"),
                    span,
                ));
            }
        };
        let span = self.span_from(start);
        Ok(self.mk(kind, span))
    }

    /// `(\forall T x; range; body)` after the opening parenthesis
    fn parse_quantifier(&mut self, start: usize) -> Result<Expr> {
        let kind = match self.advance() {
            Some((Token::Backslash(word), _)) => match word.as_str() {
                "forall" => QuantKind::ForAll,
                "exists" => QuantKind::Exists,
                _ => QuantKind::Other(word),
            },
            _ => return Err(self.unexpected("quantifier")),
        };
        let var_ty = self.parse_type()?;
        let var = self.expect_ident()?.node;
        if self.check(&Token::Comma) {
            return Err(CompileError::parser(
                "quantifiers over several variables are not supported; nest them instead",
                self.current_span(),
            ));
        }
        self.expect(&Token::Semi)?;
        let first = self.parse_expr()?;
        let (range, body) = if self.eat(&Token::Semi) {
            (Some(Box::new(first)), self.parse_expr()?)
        } else {
            (None, first)
        };
        self.expect(&Token::RParen)?;
        let span = self.span_from(start);
        Ok(self.mk(
            ExprKind::Quantifier {
                kind,
                var_ty,
                var,
                range,
                body: Box::new(body),
            },
            span,
        ))
    }

    fn parse_new(&mut self, start: usize) -> Result<Expr> {
        let elem = self.parse_base_type()?;
        if self.check(&Token::LBracket) {
            let mut dims = Vec::new();
            while self.check(&Token::LBracket) && self.peek_at(1) != Some(&Token::RBracket) {
                self.advance();
                dims.push(self.parse_expr()?);
                self.expect(&Token::RBracket)?;
            }
            let mut extra_dims = 0;
            while self.check(&Token::LBracket) && self.peek_at(1) == Some(&Token::RBracket) {
                self.advance();
                self.advance();
                extra_dims += 1;
            }
            let init = if dims.is_empty() && self.check(&Token::LBrace) {
                match self.parse_array_init()?.kind {
                    ExprKind::ArrayInit(items) => Some(items),
                    _ => None,
                }
            } else {
                None
            };
            if dims.is_empty() && init.is_none() {
                return Err(self.unexpected("array dimension or initializer"));
            }
            let span = self.span_from(start);
            return Ok(self.mk(
                ExprKind::NewArray {
                    elem,
                    dims,
                    extra_dims,
                    init,
                },
                span,
            ));
        }
        let args = self.parse_args()?;
        if self.check(&Token::LBrace) {
            return Err(CompileError::parser(
                "anonymous classes are not supported",
                self.current_span(),
            ));
        }
        let span = self.span_from(start);
        Ok(self.mk(ExprKind::New { ty: elem, args }, span))
    }

    fn parse_array_init(&mut self) -> Result<Expr> {
        let start = self.expect(&Token::LBrace)?.start;
        let mut items = Vec::new();
        while !self.check(&Token::RBrace) {
            items.push(if self.check(&Token::LBrace) {
                self.parse_array_init()?
            } else {
                self.parse_expr()?
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBrace)?;
        let span = self.span_from(start);
        Ok(self.mk(ExprKind::ArrayInit(items), span))
    }
}

/// Reference casts need a type that looks like a type name, not a variable
fn ty_is_plausible_cast(ty: &Type) -> bool {
    match ty {
        Type::Class { name, args } => {
            !args.is_empty()
                || name
                    .rsplit('.')
                    .next()
                    .and_then(|n| n.chars().next())
                    .is_some_and(|c| c.is_ascii_uppercase())
        }
        Type::Array(_) | Type::Prim(_) => true,
        Type::Void => false,
    }
}

fn spec_keyword(item: SpecItem) -> Spanned<String> {
    match item {
        SpecItem::Clause(clause) => Spanned::new(clause.kind.to_string(), clause.span),
        SpecItem::Unsupported(word) => word,
    }
}
