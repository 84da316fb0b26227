//! Recursive-descent parser producing the [`ast`](crate::ast) tree.
//!
//! Statements are separated by newlines or `;`. Member chains may continue on
//! the next line when it starts with `.` or `?.`. Trailing lambdas attach to
//! the preceding call on the same line.

use crate::{
    ast::{
        AnnotationUse, AssignTarget, BinOp, BindPattern, Block, CallArg, CatchClause, ClassDecl, ClassKind,
        ClassMember, CtorParam, Expr, FieldBinding, FnResolution, FunDecl, ImportDecl, ImportKind, ImportSymbol,
        InterpPart, Param, SourceModule, Span, Stmt, SuperSpec, TypeRef, UnOp, WhenArm, WhenCond,
    },
    error::{CodeLoc, Error, RunResult},
    lexer::{Keyword, Lexer, StrTemplate, TemplatePart, Token, TokenKind},
};

/// Parses one source file (or REPL chunk).
///
/// # Errors
/// Returns a `SyntaxError` with position on the first malformed construct.
pub fn parse(source: &str, file: &str) -> RunResult<SourceModule> {
    let tokens = Lexer::new(source, file).tokenize()?;
    let mut parser = Parser::new(tokens, file.to_owned());
    parser.module()
}

/// Parses an expression fragment from a `${...}` interpolation segment.
///
/// Token positions are shifted so errors point into the enclosing literal.
fn parse_fragment(source: &str, file: &str, base_line: u32, base_column: u32) -> RunResult<Expr> {
    let mut tokens = Lexer::new(source, file).tokenize()?;
    for token in &mut tokens {
        if token.line == 1 {
            token.column += base_column.saturating_sub(1);
        }
        token.line += base_line - 1;
    }
    let mut parser = Parser::new(tokens, file.to_owned());
    parser.skip_separators();
    let expr = parser.expression()?;
    parser.skip_separators();
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: String,
}

impl Parser {
    fn new(tokens: Vec<Token>, file: String) -> Self {
        Self { tokens, pos: 0, file }
    }

    // --- token plumbing ---

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn span(&self) -> Span {
        let token = self.peek();
        Span::new(token.line, token.column)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        self.eat(&TokenKind::Kw(kw))
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Kw(k) if *k == kw)
    }

    fn err_here(&self, message: impl Into<String>) -> Error {
        let token = self.peek();
        Error::syntax(message).with_pos(CodeLoc::new(&self.file, token.line, token.column))
    }

    fn expect(&mut self, kind: &TokenKind) -> RunResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.err_here(format!("expected {kind}, found {}", self.peek_kind())))
        }
    }

    fn expect_ident(&mut self) -> RunResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.err_here(format!("expected identifier, found {other}"))),
        }
    }

    fn expect_eof(&self) -> RunResult<()> {
        if self.at(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.err_here(format!("unexpected {}", self.peek_kind())))
        }
    }

    /// Skips newlines and semicolons between statements.
    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semi) {
            self.advance();
        }
    }

    /// Skips newlines only (inside constructs that span lines).
    fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.advance();
        }
    }

    /// True when the next non-newline token matches; used for continuations
    /// like a leading `.` on the following line.
    fn next_nonline_is(&self, wanted: &[TokenKind]) -> Option<usize> {
        let mut offset = 0;
        while matches!(self.peek_at(offset), TokenKind::Newline) {
            offset += 1;
        }
        wanted.contains(self.peek_at(offset)).then_some(offset)
    }

    // --- module / statements ---

    fn module(&mut self) -> RunResult<SourceModule> {
        let mut stmts = Vec::new();
        self.skip_separators();
        while !self.at(&TokenKind::Eof) {
            stmts.push(self.statement()?);
            self.skip_separators();
        }
        Ok(SourceModule { stmts })
    }

    fn statement(&mut self) -> RunResult<Stmt> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::At => {
                let annotations = self.annotation_list()?;
                self.class_like(annotations)
            }
            TokenKind::Kw(Keyword::Open | Keyword::Class | Keyword::Interface | Keyword::Object | Keyword::Annotation) => {
                self.class_like(Vec::new())
            }
            TokenKind::Kw(Keyword::Val) => self.binding(false),
            TokenKind::Kw(Keyword::Var) => self.binding(true),
            TokenKind::Kw(Keyword::Fun) => Ok(Stmt::Fun(self.fun_decl(false, false)?)),
            TokenKind::Kw(Keyword::Import) => self.import_decl(),
            TokenKind::Kw(Keyword::While) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.stmt_body()?;
                Ok(Stmt::While { cond, body, span })
            }
            TokenKind::Kw(Keyword::Do) => {
                self.advance();
                let body = self.stmt_body()?;
                self.skip_newlines();
                self.expect(&TokenKind::Kw(Keyword::While))?;
                self.expect(&TokenKind::LParen)?;
                let cond = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Stmt::DoWhile { body, cond, span })
            }
            TokenKind::Kw(Keyword::For) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let pattern = self.bind_pattern()?;
                self.expect(&TokenKind::Kw(Keyword::In))?;
                let iter = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.stmt_body()?;
                Ok(Stmt::For {
                    pattern,
                    iter,
                    body,
                    span,
                    slots: Vec::new(),
                })
            }
            TokenKind::Kw(Keyword::Return) => {
                self.advance();
                let value = if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                Ok(Stmt::Return { value, span })
            }
            TokenKind::Kw(Keyword::Throw) => {
                self.advance();
                let value = self.expression()?;
                Ok(Stmt::Throw { value, span })
            }
            TokenKind::Kw(Keyword::Break) => {
                self.advance();
                Ok(Stmt::Break(span))
            }
            TokenKind::Kw(Keyword::Continue) => {
                self.advance();
                Ok(Stmt::Continue(span))
            }
            TokenKind::Kw(Keyword::Try) => Ok(Stmt::Expr(self.try_expr()?)),
            TokenKind::Kw(Keyword::Use) => self.use_stmt(),
            _ => self.expr_or_assign(),
        }
    }

    fn binding(&mut self, mutable: bool) -> RunResult<Stmt> {
        let span = self.span();
        self.advance(); // val | var
        let pattern = self.bind_pattern()?;
        let ty = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
        self.expect(&TokenKind::Assign)?;
        self.skip_newlines();
        let init = self.expression()?;
        Ok(Stmt::Val {
            pattern,
            mutable,
            ty,
            init,
            span,
            slots: Vec::new(),
        })
    }

    fn bind_pattern(&mut self) -> RunResult<BindPattern> {
        if self.eat(&TokenKind::LParen) {
            let mut names = vec![self.expect_ident()?];
            while self.eat(&TokenKind::Comma) {
                names.push(self.expect_ident()?);
            }
            self.expect(&TokenKind::RParen)?;
            Ok(BindPattern::Tuple(names))
        } else {
            Ok(BindPattern::Name(self.expect_ident()?))
        }
    }

    fn expr_or_assign(&mut self) -> RunResult<Stmt> {
        let span = self.span();
        let expr = self.expression()?;
        let op = match self.peek_kind() {
            TokenKind::Assign => None,
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            TokenKind::PercentAssign => Some(BinOp::Rem),
            TokenKind::CoalesceAssign => {
                self.advance();
                self.skip_newlines();
                let value = self.expression()?;
                let target = Self::assign_target(expr, &self.file)?;
                return Ok(Stmt::CoalesceAssign { target, value, span });
            }
            _ => return Ok(Stmt::Expr(expr)),
        };
        self.advance();
        self.skip_newlines();
        let value = self.expression()?;
        let target = Self::assign_target(expr, &self.file)?;
        Ok(Stmt::Assign { target, op, value, span })
    }

    fn assign_target(expr: Expr, file: &str) -> RunResult<AssignTarget> {
        let span = expr.span();
        match expr {
            Expr::Name(name, s) => Ok(AssignTarget::Name {
                name,
                span: s,
                slot: None,
            }),
            Expr::Member {
                recv, name, safe: false, span,
            } => Ok(AssignTarget::Field { recv, name, span }),
            Expr::Index {
                recv,
                index,
                safe: false,
                span,
            } => Ok(AssignTarget::Index { recv, index, span }),
            _ => Err(Error::syntax("invalid assignment target").with_pos(CodeLoc::new(file, span.line, span.column))),
        }
    }

    fn try_expr(&mut self) -> RunResult<Expr> {
        let span = self.span();
        self.advance(); // try
        let body = self.block()?;
        let mut catches = Vec::new();
        loop {
            self.skip_newlines();
            if !self.at_kw(Keyword::Catch) {
                break;
            }
            let catch_span = self.span();
            self.advance();
            self.expect(&TokenKind::LParen)?;
            let name = self.expect_ident()?;
            let kind = if self.eat(&TokenKind::Colon) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            self.expect(&TokenKind::RParen)?;
            let catch_body = self.block()?;
            catches.push(CatchClause {
                name,
                kind,
                body: catch_body,
                span: catch_span,
                slot: 0,
            });
        }
        self.skip_newlines();
        let finally = if self.eat_kw(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            return Err(self.err_here("expected 'catch' or 'finally' after try block"));
        }
        Ok(Expr::TryCatch {
            body,
            catches,
            finally,
            span,
        })
    }

    fn use_stmt(&mut self) -> RunResult<Stmt> {
        let span = self.span();
        self.advance(); // use
        self.expect(&TokenKind::LParen)?;
        self.expect(&TokenKind::Kw(Keyword::Val))?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::Assign)?;
        let init = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Stmt::Use { name, init, body, span })
    }

    fn import_decl(&mut self) -> RunResult<Stmt> {
        let span = self.span();
        self.advance(); // import
        let kind = if matches!(self.peek_kind(), TokenKind::Ident(name) if name == "java")
            && matches!(self.peek_at(1), TokenKind::Ident(_))
        {
            self.advance();
            let (path, wildcard) = self.dotted_path()?;
            let alias = if self.eat_as()? { Some(self.expect_ident()?) } else { None };
            ImportKind::Java { path, wildcard, alias }
        } else if self.at_kw(Keyword::Static) {
            self.advance();
            let (path, wildcard) = self.dotted_path()?;
            if wildcard {
                return Err(self.err_here("'import static' requires a member name"));
            }
            let alias = if self.eat_as()? { Some(self.expect_ident()?) } else { None };
            ImportKind::JavaStatic { path, alias }
        } else {
            let (path, wildcard) = self.dotted_path()?;
            if wildcard {
                ImportKind::Module {
                    path,
                    symbol: ImportSymbol::Wildcard,
                }
            } else {
                let mut path = path;
                let name = path.pop().ok_or_else(|| self.err_here("empty import path"))?;
                if path.is_empty() {
                    return Err(self.err_here("import needs a module path and symbol (e.g. 'import a.Symbol')"));
                }
                let alias = if self.eat_as()? { Some(self.expect_ident()?) } else { None };
                ImportKind::Module {
                    path,
                    symbol: ImportSymbol::Named { name, alias },
                }
            }
        };
        Ok(Stmt::Import(ImportDecl { kind, span }))
    }

    fn eat_as(&mut self) -> RunResult<bool> {
        Ok(self.eat_kw(Keyword::As))
    }

    /// Parses `a.b.c` or `a.b.*`; returns the segments and the wildcard flag.
    fn dotted_path(&mut self) -> RunResult<(Vec<String>, bool)> {
        let mut path = vec![self.expect_ident()?];
        let mut wildcard = false;
        while self.eat(&TokenKind::Dot) {
            if self.eat(&TokenKind::Star) {
                wildcard = true;
                break;
            }
            path.push(self.expect_ident()?);
        }
        Ok((path, wildcard))
    }

    // --- classes ---

    fn annotation_list(&mut self) -> RunResult<Vec<AnnotationUse>> {
        let mut annotations = Vec::new();
        while self.at(&TokenKind::At) {
            let span = self.span();
            self.advance();
            let name = self.expect_ident()?;
            let args = if self.at(&TokenKind::LParen) {
                self.call_args()?
            } else {
                Vec::new()
            };
            annotations.push(AnnotationUse { name, args, span });
            self.skip_newlines();
        }
        Ok(annotations)
    }

    fn class_like(&mut self, annotations: Vec<AnnotationUse>) -> RunResult<Stmt> {
        let span = self.span();
        let is_open = self.eat_kw(Keyword::Open);
        let kind = if self.eat_kw(Keyword::Class) {
            ClassKind::Class
        } else if self.eat_kw(Keyword::Interface) {
            ClassKind::Interface
        } else if self.eat_kw(Keyword::Object) {
            ClassKind::Object
        } else if self.eat_kw(Keyword::Annotation) {
            self.expect(&TokenKind::Kw(Keyword::Class))?;
            ClassKind::Annotation
        } else {
            return Err(self.err_here("expected class declaration"));
        };
        let name = self.expect_ident()?;

        let ctor_params = if self.at(&TokenKind::LParen) {
            self.ctor_params(kind)?
        } else {
            Vec::new()
        };

        let mut superclass = None;
        let mut interfaces = Vec::new();
        if self.eat(&TokenKind::Colon) {
            loop {
                self.skip_newlines();
                let head_span = self.span();
                let head = self.expect_ident()?;
                if self.at(&TokenKind::LParen) {
                    let args = self.call_args()?;
                    if superclass.is_some() {
                        return Err(self.err_here("only one superclass call is allowed"));
                    }
                    superclass = Some(SuperSpec {
                        name: head,
                        args,
                        span: head_span,
                    });
                } else {
                    interfaces.push(head);
                }
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let members = if self.at(&TokenKind::LBrace) {
            self.class_body(kind)?
        } else {
            Vec::new()
        };

        Ok(Stmt::Class(ClassDecl {
            name,
            kind,
            is_open,
            annotations,
            ctor_params,
            superclass,
            interfaces,
            members,
            init_resolution: FnResolution::default(),
            span,
        }))
    }

    fn ctor_params(&mut self, kind: ClassKind) -> RunResult<Vec<CtorParam>> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            let is_private = self.eat_kw(Keyword::Private);
            let binding = if self.eat_kw(Keyword::Val) {
                FieldBinding::Val
            } else if self.eat_kw(Keyword::Var) {
                FieldBinding::Var
            } else {
                FieldBinding::None
            };
            if kind == ClassKind::Annotation && binding != FieldBinding::Val {
                return Err(self.err_here("annotation class parameters must be 'val'"));
            }
            let name = self.expect_ident()?;
            let ty = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            params.push(CtorParam {
                name,
                binding,
                is_private,
                ty,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn class_body(&mut self, kind: ClassKind) -> RunResult<Vec<ClassMember>> {
        self.expect(&TokenKind::LBrace)?;
        let mut members = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_kw(Keyword::Static) {
                let span = self.span();
                self.advance();
                if self.at_kw(Keyword::Fun) {
                    members.push(ClassMember::StaticMethod(self.fun_decl(false, kind == ClassKind::Interface)?));
                } else {
                    let mutable = if self.eat_kw(Keyword::Var) {
                        true
                    } else {
                        self.expect(&TokenKind::Kw(Keyword::Val))?;
                        false
                    };
                    let _ = mutable;
                    let name = self.expect_ident()?;
                    if self.eat(&TokenKind::Colon) {
                        self.type_ref()?;
                    }
                    self.expect(&TokenKind::Assign)?;
                    let init = self.expression()?;
                    members.push(ClassMember::StaticField { name, init, span });
                }
                continue;
            }
            let is_private = self.eat_kw(Keyword::Private);
            if self.at_kw(Keyword::Fun) {
                let mut decl = self.fun_decl(is_private, kind == ClassKind::Interface)?;
                decl.is_private = is_private;
                members.push(ClassMember::Method(decl));
            } else if self.at_kw(Keyword::Val) || self.at_kw(Keyword::Var) {
                let span = self.span();
                let mutable = self.at_kw(Keyword::Var);
                self.advance();
                let name = self.expect_ident()?;
                if self.eat(&TokenKind::Colon) {
                    self.type_ref()?;
                }
                self.expect(&TokenKind::Assign)?;
                let init = self.expression()?;
                members.push(ClassMember::Field {
                    name,
                    mutable,
                    is_private,
                    init,
                    span,
                });
            } else if is_private {
                return Err(self.err_here("expected 'fun', 'val' or 'var' after 'private'"));
            } else {
                members.push(ClassMember::Init(self.statement()?));
            }
        }
        Ok(members)
    }

    // --- functions ---

    fn fun_decl(&mut self, is_private: bool, allow_bodyless: bool) -> RunResult<FunDecl> {
        let span = self.span();
        self.expect(&TokenKind::Kw(Keyword::Fun))?;
        let first = self.expect_ident()?;
        let (receiver, name) = if self.eat(&TokenKind::Dot) {
            (Some(first), self.expect_ident()?)
        } else {
            (None, first)
        };
        let params = self.param_list()?;
        let ret = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
        let (body, expr_body) = if self.eat(&TokenKind::Assign) {
            self.skip_newlines();
            let expr = self.expression()?;
            (
                Block {
                    stmts: vec![Stmt::Expr(expr)],
                },
                true,
            )
        } else if self.at(&TokenKind::LBrace) {
            (self.block()?, false)
        } else if allow_bodyless {
            // Abstract interface method: implementors must override.
            let message = format!("abstract method '{name}' not implemented");
            (
                Block {
                    stmts: vec![Stmt::Throw {
                        value: Expr::Str(message, span),
                        span,
                    }],
                },
                false,
            )
        } else {
            return Err(self.err_here("expected function body"));
        };
        Ok(FunDecl {
            name,
            receiver,
            params,
            ret,
            body,
            expr_body,
            is_private,
            resolution: FnResolution::default(),
            slot: None,
            span,
        })
    }

    fn param_list(&mut self) -> RunResult<Vec<Param>> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            let name = self.expect_ident()?;
            let ty = if self.eat(&TokenKind::Colon) { Some(self.type_ref()?) } else { None };
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            params.push(Param { name, ty, default });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn type_ref(&mut self) -> RunResult<TypeRef> {
        let name = match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            other => return Err(self.err_here(format!("expected type name, found {other}"))),
        };
        // Generic arguments are parsed and discarded (runtime is dynamic).
        if self.eat(&TokenKind::Lt) {
            let mut depth = 1;
            while depth > 0 {
                match self.peek_kind() {
                    TokenKind::Lt => depth += 1,
                    TokenKind::Gt => depth -= 1,
                    TokenKind::Eof => return Err(self.err_here("unterminated generic argument list")),
                    _ => {}
                }
                self.advance();
            }
        }
        let nullable = self.eat(&TokenKind::Question);
        Ok(TypeRef { name, nullable })
    }

    // --- blocks ---

    fn block(&mut self) -> RunResult<Block> {
        self.skip_newlines();
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at(&TokenKind::Eof) {
                return Err(self.err_here("unterminated block"));
            }
            stmts.push(self.statement()?);
        }
        Ok(Block { stmts })
    }

    /// A loop/branch body: either a block or a single statement.
    fn stmt_body(&mut self) -> RunResult<Block> {
        self.skip_newlines();
        if self.at(&TokenKind::LBrace) {
            self.block()
        } else {
            Ok(Block {
                stmts: vec![self.statement()?],
            })
        }
    }

    // --- expressions ---

    fn expression(&mut self) -> RunResult<Expr> {
        self.pipeline_expr()
    }

    fn pipeline_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.elvis_expr()?;
        while self.at(&TokenKind::Pipeline) {
            let span = self.span();
            self.advance();
            self.skip_newlines();
            let rhs = self.elvis_expr()?;
            lhs = Expr::Pipeline {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn elvis_expr(&mut self) -> RunResult<Expr> {
        let lhs = self.or_expr()?;
        if self.at(&TokenKind::Elvis) {
            let span = self.span();
            self.advance();
            self.skip_newlines();
            // Right-associative: `a ?: b ?: c` is `a ?: (b ?: c)`.
            let rhs = self.elvis_expr()?;
            return Ok(Expr::Elvis {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            });
        }
        Ok(lhs)
    }

    fn or_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.and_expr()?;
        while self.at(&TokenKind::OrOr) {
            let span = self.span();
            self.advance();
            self.skip_newlines();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.equality_expr()?;
        while self.at(&TokenKind::AndAnd) {
            let span = self.span();
            self.advance();
            self.skip_newlines();
            let rhs = self.equality_expr()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.comparison_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            let span = self.span();
            self.advance();
            self.skip_newlines();
            let rhs = self.comparison_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn comparison_expr(&mut self) -> RunResult<Expr> {
        let first = self.type_ops_expr()?;
        let mut operands = vec![first];
        let mut ops = Vec::new();
        let span = self.span();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            self.skip_newlines();
            operands.push(self.type_ops_expr()?);
            ops.push(op);
        }
        match ops.len() {
            0 => Ok(operands.pop().expect("at least one operand")),
            1 => {
                let rhs = operands.pop().expect("two operands");
                let lhs = operands.pop().expect("two operands");
                Ok(Expr::Binary {
                    op: ops[0],
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    span,
                })
            }
            _ => Ok(Expr::CmpChain { operands, ops, span }),
        }
    }

    /// `is` / `!is` / `as` / `as?` / `in` / `!in` at comparison precedence.
    fn type_ops_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.range_expr()?;
        loop {
            let span = self.span();
            match self.peek_kind() {
                TokenKind::Kw(Keyword::Is) => {
                    self.advance();
                    let ty = self.type_ref()?;
                    lhs = Expr::Is {
                        operand: Box::new(lhs),
                        ty: ty.name,
                        negated: false,
                        span,
                    };
                }
                TokenKind::NotIs => {
                    self.advance();
                    let ty = self.type_ref()?;
                    lhs = Expr::Is {
                        operand: Box::new(lhs),
                        ty: ty.name,
                        negated: true,
                        span,
                    };
                }
                TokenKind::Kw(Keyword::As) => {
                    self.advance();
                    let safe = self.eat(&TokenKind::Question);
                    let ty = self.type_ref()?;
                    lhs = Expr::Cast {
                        operand: Box::new(lhs),
                        ty: ty.name,
                        safe,
                        span,
                    };
                }
                TokenKind::Kw(Keyword::In) => {
                    self.advance();
                    self.skip_newlines();
                    let rhs = self.range_expr()?;
                    lhs = Expr::Binary {
                        op: BinOp::In,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        span,
                    };
                }
                TokenKind::NotIn => {
                    self.advance();
                    self.skip_newlines();
                    let rhs = self.range_expr()?;
                    lhs = Expr::Binary {
                        op: BinOp::NotIn,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        span,
                    };
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn range_expr(&mut self) -> RunResult<Expr> {
        let lhs = self.additive_expr()?;
        let span = self.span();
        let (inclusive, down) = match self.peek_kind() {
            TokenKind::DotDot => (true, false),
            TokenKind::DotDotLt => (false, false),
            TokenKind::Ident(name) if name == "downTo" => (true, true),
            TokenKind::Ident(name) if name == "to" => {
                self.advance();
                self.skip_newlines();
                let second = self.additive_expr()?;
                return Ok(Expr::PairOf {
                    first: Box::new(lhs),
                    second: Box::new(second),
                    span,
                });
            }
            _ => return Ok(lhs),
        };
        self.advance();
        self.skip_newlines();
        let end = self.additive_expr()?;
        let step = if matches!(self.peek_kind(), TokenKind::Ident(name) if name == "step") {
            self.advance();
            Some(Box::new(self.additive_expr()?))
        } else {
            None
        };
        Ok(Expr::Range {
            start: Box::new(lhs),
            end: Box::new(end),
            inclusive,
            down,
            step,
            span,
        })
    }

    fn additive_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.multiplicative_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            self.skip_newlines();
            let rhs = self.multiplicative_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn multiplicative_expr(&mut self) -> RunResult<Expr> {
        let mut lhs = self.unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => break,
            };
            let span = self.span();
            self.advance();
            self.skip_newlines();
            let rhs = self.unary_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span,
            };
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self) -> RunResult<Expr> {
        let span = self.span();
        if self.eat(&TokenKind::Minus) {
            let operand = self.unary_expr()?;
            return Ok(Expr::Unary {
                op: UnOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        if self.eat(&TokenKind::Bang) {
            let operand = self.unary_expr()?;
            return Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> RunResult<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek_kind() {
                TokenKind::LParen => {
                    let span = self.span();
                    let mut args = self.call_args()?;
                    if self.at(&TokenKind::LBrace) {
                        args.push(CallArg {
                            name: None,
                            value: self.lambda()?,
                            spread: false,
                        });
                    }
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        span,
                    };
                }
                TokenKind::LBrace if Self::takes_trailing_lambda(&expr) => {
                    let span = self.span();
                    let lambda = self.lambda()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args: vec![CallArg {
                            name: None,
                            value: lambda,
                            spread: false,
                        }],
                        span,
                    };
                }
                TokenKind::Dot | TokenKind::SafeDot => {
                    let safe = self.at(&TokenKind::SafeDot);
                    let span = self.span();
                    self.advance();
                    self.skip_newlines();
                    let name = self.expect_ident()?;
                    expr = Expr::Member {
                        recv: Box::new(expr),
                        name,
                        safe,
                        span,
                    };
                }
                TokenKind::ColonColon => {
                    let span = self.span();
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = Expr::Member {
                        recv: Box::new(expr),
                        name,
                        safe: false,
                        span,
                    };
                }
                TokenKind::LBracket | TokenKind::SafeBracket => {
                    let safe = self.at(&TokenKind::SafeBracket);
                    let span = self.span();
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Index {
                        recv: Box::new(expr),
                        index: Box::new(index),
                        safe,
                        span,
                    };
                }
                TokenKind::Question => {
                    let span = self.span();
                    self.advance();
                    expr = Expr::TryPostfix {
                        operand: Box::new(expr),
                        span,
                    };
                }
                TokenKind::Newline => {
                    // Chains may continue on the next line with a leading dot.
                    let Some(offset) = self.next_nonline_is(&[TokenKind::Dot, TokenKind::SafeDot]) else {
                        break;
                    };
                    for _ in 0..offset {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Trailing lambdas attach to calls and names, not to literals or blocks,
    /// so `val x = 1 { ... }` stays a syntax error.
    fn takes_trailing_lambda(expr: &Expr) -> bool {
        matches!(
            expr,
            Expr::Name(..) | Expr::Member { .. } | Expr::Call { .. } | Expr::Global(..)
        )
    }

    fn call_args(&mut self) -> RunResult<Vec<CallArg>> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        self.skip_newlines();
        while !self.at(&TokenKind::RParen) {
            let name = if matches!(self.peek_kind(), TokenKind::Ident(_)) && self.peek_at(1) == &TokenKind::Assign {
                let name = self.expect_ident()?;
                self.advance(); // '='
                Some(name)
            } else {
                None
            };
            let spread = name.is_none() && self.eat(&TokenKind::Star);
            let value = self.expression()?;
            args.push(CallArg { name, value, spread });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    fn lambda(&mut self) -> RunResult<Expr> {
        let span = self.span();
        self.expect(&TokenKind::LBrace)?;
        self.skip_newlines();
        let params = self.try_lambda_params()?;
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at(&TokenKind::Eof) {
                return Err(self.err_here("unterminated lambda"));
            }
            stmts.push(self.statement()?);
        }
        Ok(Expr::Lambda(Box::new(FunDecl {
            name: "<lambda>".to_owned(),
            receiver: None,
            params,
            ret: None,
            body: Block { stmts },
            expr_body: true,
            is_private: false,
            resolution: FnResolution::default(),
            slot: None,
            span,
        })))
    }

    /// Detects `a, b ->` at the head of a lambda; restores position when the
    /// lookahead does not end in an arrow.
    fn try_lambda_params(&mut self) -> RunResult<Vec<Param>> {
        let saved = self.pos;
        let mut params = Vec::new();
        loop {
            let TokenKind::Ident(name) = self.peek_kind().clone() else {
                self.pos = saved;
                return Ok(Vec::new());
            };
            self.advance();
            let ty = if self.eat(&TokenKind::Colon) {
                match self.type_ref() {
                    Ok(ty) => Some(ty),
                    Err(_) => {
                        self.pos = saved;
                        return Ok(Vec::new());
                    }
                }
            } else {
                None
            };
            params.push(Param { name, ty, default: None });
            if self.eat(&TokenKind::Comma) {
                self.skip_newlines();
                continue;
            }
            if self.eat(&TokenKind::Arrow) {
                return Ok(params);
            }
            self.pos = saved;
            return Ok(Vec::new());
        }
    }

    fn primary_expr(&mut self) -> RunResult<Expr> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Kw(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null(span))
            }
            TokenKind::Kw(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true, span))
            }
            TokenKind::Kw(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false, span))
            }
            TokenKind::Int(v) => {
                self.advance();
                Ok(Expr::Int(v, span))
            }
            TokenKind::Long(v) => {
                self.advance();
                Ok(Expr::Long(v, span))
            }
            TokenKind::Double(v) => {
                self.advance();
                Ok(Expr::Double(v, span))
            }
            TokenKind::Char(c) => {
                self.advance();
                Ok(Expr::CharLit(c, span))
            }
            TokenKind::Str(template) => {
                self.advance();
                self.interp_expr(&template, span)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Name(name, span))
            }
            TokenKind::Underscore => {
                self.advance();
                Ok(Expr::Placeholder(span))
            }
            TokenKind::ColonColon => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(Expr::CallableRef(name, span))
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let expr = self.expression()?;
                self.skip_newlines();
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                self.skip_newlines();
                while !self.at(&TokenKind::RBracket) {
                    let spread = self.eat(&TokenKind::Star);
                    let value = self.expression()?;
                    items.push(CallArg {
                        name: None,
                        value,
                        spread,
                    });
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::ListLit { items, span })
            }
            TokenKind::LBrace => self.lambda(),
            TokenKind::Kw(Keyword::If) => self.if_expr(),
            TokenKind::Kw(Keyword::When) => self.when_expr(),
            TokenKind::Kw(Keyword::Try) => self.try_expr(),
            other => Err(self.err_here(format!("expected expression, found {other}"))),
        }
    }

    fn interp_expr(&mut self, template: &StrTemplate, span: Span) -> RunResult<Expr> {
        if let Some(text) = template.as_plain() {
            return Ok(Expr::Str(text.to_owned(), span));
        }
        let mut parts = Vec::new();
        for part in &template.parts {
            match part {
                TemplatePart::Text(text) => parts.push(InterpPart::Text(text.clone())),
                TemplatePart::Interp(source, line, column) => {
                    let expr = parse_fragment(source, &self.file, *line, *column)?;
                    parts.push(InterpPart::Expr(expr));
                }
            }
        }
        Ok(Expr::Interp { parts, span })
    }

    fn if_expr(&mut self) -> RunResult<Expr> {
        let span = self.span();
        self.expect(&TokenKind::Kw(Keyword::If))?;
        self.expect(&TokenKind::LParen)?;
        if self.at_kw(Keyword::Val) {
            self.advance();
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Assign)?;
            let value = self.expression()?;
            self.expect(&TokenKind::RParen)?;
            let then = self.stmt_body()?;
            let else_ = self.else_branch()?;
            return Ok(Expr::IfLet {
                name,
                value: Box::new(value),
                then,
                else_,
                span,
            });
        }
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let then = self.stmt_body()?;
        let else_ = self.else_branch()?;
        Ok(Expr::If {
            cond: Box::new(cond),
            then,
            else_,
            span,
        })
    }

    fn else_branch(&mut self) -> RunResult<Option<Block>> {
        if self.next_nonline_is(&[TokenKind::Kw(Keyword::Else)]).is_some() {
            self.skip_newlines();
            self.advance(); // else
            Ok(Some(self.stmt_body()?))
        } else {
            Ok(None)
        }
    }

    fn when_expr(&mut self) -> RunResult<Expr> {
        let span = self.span();
        self.expect(&TokenKind::Kw(Keyword::When))?;
        let subject = if self.at(&TokenKind::LParen) {
            self.advance();
            let expr = self.expression()?;
            self.expect(&TokenKind::RParen)?;
            Some(Box::new(expr))
        } else {
            None
        };
        self.skip_newlines();
        self.expect(&TokenKind::LBrace)?;
        let mut arms = Vec::new();
        let mut else_arm = None;
        loop {
            self.skip_separators();
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_kw(Keyword::Else) {
                self.advance();
                self.expect(&TokenKind::Arrow)?;
                else_arm = Some(self.arm_body()?);
                continue;
            }
            let arm_span = self.span();
            let mut conds = vec![self.when_cond()?];
            while self.eat(&TokenKind::Comma) {
                self.skip_newlines();
                conds.push(self.when_cond()?);
            }
            self.expect(&TokenKind::Arrow)?;
            let body = self.arm_body()?;
            arms.push(WhenArm {
                conds,
                body,
                span: arm_span,
            });
        }
        Ok(Expr::When {
            subject,
            arms,
            else_arm,
            span,
        })
    }

    fn when_cond(&mut self) -> RunResult<WhenCond> {
        match self.peek_kind() {
            TokenKind::Kw(Keyword::In) => {
                self.advance();
                Ok(WhenCond::In {
                    expr: self.expression()?,
                    negated: false,
                })
            }
            TokenKind::NotIn => {
                self.advance();
                Ok(WhenCond::In {
                    expr: self.expression()?,
                    negated: true,
                })
            }
            TokenKind::Kw(Keyword::Is) => {
                self.advance();
                let ty = self.type_ref()?;
                Ok(WhenCond::Is {
                    ty: ty.name,
                    negated: false,
                })
            }
            TokenKind::NotIs => {
                self.advance();
                let ty = self.type_ref()?;
                Ok(WhenCond::Is {
                    ty: ty.name,
                    negated: true,
                })
            }
            _ => Ok(WhenCond::Expr(self.expression()?)),
        }
    }

    fn arm_body(&mut self) -> RunResult<Block> {
        self.skip_newlines();
        if self.at(&TokenKind::LBrace) {
            self.block()
        } else {
            Ok(Block {
                stmts: vec![Stmt::Expr(self.expression()?)],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> SourceModule {
        parse(source, "test.nova").unwrap()
    }

    #[test]
    fn statements_split_on_newlines() {
        let module = parse_ok("val x = 10\nvar y = 0\ny + x");
        assert_eq!(module.stmts.len(), 3);
    }

    #[test]
    fn trailing_lambda_attaches_to_call() {
        let module = parse_ok("coroutineScope { s -> s }");
        let Stmt::Expr(Expr::Call { args, .. }) = &module.stmts[0] else {
            panic!("expected call, got {:?}", module.stmts[0]);
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(args[0].value, Expr::Lambda(_)));
    }

    #[test]
    fn if_condition_does_not_capture_then_block() {
        let module = parse_ok("if (x) { 1 } else { 2 }");
        assert!(matches!(&module.stmts[0], Stmt::Expr(Expr::If { .. })));
    }

    #[test]
    fn chained_comparison_collects_operands() {
        let module = parse_ok("a < b <= c");
        let Stmt::Expr(Expr::CmpChain { operands, ops, .. }) = &module.stmts[0] else {
            panic!("expected comparison chain");
        };
        assert_eq!(operands.len(), 3);
        assert_eq!(ops, &[BinOp::Lt, BinOp::Le]);
    }

    #[test]
    fn class_with_data_annotation() {
        let module = parse_ok("@data class V(val x: Int, val y: Int, val z: Int)");
        let Stmt::Class(decl) = &module.stmts[0] else {
            panic!("expected class");
        };
        assert_eq!(decl.annotations[0].name, "data");
        assert_eq!(decl.ctor_params.len(), 3);
        assert!(decl.ctor_params.iter().all(|p| p.binding == FieldBinding::Val));
    }

    #[test]
    fn import_forms() {
        let module = parse_ok("import a.b.Symbol as S\nimport a.*\nimport java java.util.ArrayList\nimport static java.lang.Math.max");
        assert_eq!(module.stmts.len(), 4);
        let Stmt::Import(decl) = &module.stmts[0] else { panic!() };
        assert_eq!(
            decl.kind,
            ImportKind::Module {
                path: vec!["a".into(), "b".into()],
                symbol: ImportSymbol::Named {
                    name: "Symbol".into(),
                    alias: Some("S".into())
                },
            }
        );
    }

    #[test]
    fn destructuring_binding() {
        let module = parse_ok("val (p, q, r) = b");
        let Stmt::Val { pattern: BindPattern::Tuple(names), .. } = &module.stmts[0] else {
            panic!("expected tuple binding");
        };
        assert_eq!(names, &["p", "q", "r"]);
    }

    #[test]
    fn member_chain_continues_after_newline() {
        let module = parse_ok("list\n    .map { it }\n    .size()");
        let Stmt::Expr(Expr::Call { callee, .. }) = &module.stmts[0] else {
            panic!("expected call");
        };
        assert!(matches!(**callee, Expr::Member { ref name, .. } if name == "size"));
    }

    #[test]
    fn when_with_subject_and_ranges() {
        let module = parse_ok("when (x) { 1, 2 -> \"a\"\n in 3..5 -> \"b\"\n is String -> \"c\"\n else -> \"d\" }");
        let Stmt::Expr(Expr::When { arms, else_arm, .. }) = &module.stmts[0] else {
            panic!("expected when");
        };
        assert_eq!(arms.len(), 3);
        assert!(else_arm.is_some());
    }

    #[test]
    fn error_carries_position() {
        let err = parse("val x = ", "bad.nova").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SyntaxError);
        assert!(err.pos().is_some());
    }
}
