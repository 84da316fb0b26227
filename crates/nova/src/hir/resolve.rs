//! Name resolution: rewrites identifier expressions into slot-addressed
//! variants and computes per-function locals and capture lists.
//!
//! Scoping rules:
//! - Module level: declared `val`/`var`/`fun`/`class` bind module globals
//!   (late-bound, REPL-persistent). Desugar temporaries (`$`-prefixed), loop
//!   variables and catch bindings live in entry-function locals.
//! - Function level: parameters and bindings are frame locals. A local
//!   referenced by an inner lambda is marked captured and becomes a shared
//!   cell; lambdas capture by reference, chained through intermediate frames.
//! - Methods: `this` is local 0. A name that resolves nowhere but matches a
//!   statically-known member of the enclosing class rewrites to `this.name`.

use ahash::{AHashMap, AHashSet};

use super::HirModule;
use crate::{
    ast::{
        AssignTarget, BindPattern, Block, CaptureSource, ClassMember, Expr, FnResolution, FunDecl, Param,
        ResolvedSlot, Span, Stmt,
    },
    error::{CodeLoc, Error, RunResult},
};

pub(super) fn resolve_names(hir: &mut HirModule) -> RunResult<()> {
    let mut resolver = Resolver {
        fns: Vec::new(),
        classes: Vec::new(),
        file: hir.file.clone(),
    };
    resolver.push_fn();
    resolver.push_block();
    let module_stmts = &mut hir.stmts;
    for stmt in module_stmts.iter_mut() {
        resolver.resolve_stmt(stmt)?;
    }
    resolver.pop_block();
    hir.entry_resolution = resolver.pop_fn();
    Ok(())
}

struct FnCtx {
    blocks: Vec<AHashMap<String, u32>>,
    locals: Vec<String>,
    captured: AHashSet<u32>,
    captures: Vec<CaptureSource>,
    capture_names: AHashMap<String, u32>,
}

struct ClassCtx {
    members: AHashSet<String>,
}

struct Resolver {
    fns: Vec<FnCtx>,
    classes: Vec<ClassCtx>,
    file: String,
}

impl Resolver {
    fn push_fn(&mut self) {
        self.fns.push(FnCtx {
            blocks: Vec::new(),
            locals: Vec::new(),
            captured: AHashSet::new(),
            captures: Vec::new(),
            capture_names: AHashMap::new(),
        });
    }

    fn pop_fn(&mut self) -> FnResolution {
        let ctx = self.fns.pop().expect("fn stack underflow");
        let mut captured: Vec<u32> = ctx.captured.into_iter().collect();
        captured.sort_unstable();
        FnResolution {
            locals: ctx.locals.len() as u32,
            local_names: ctx.locals,
            captured,
            captures_from: ctx.captures,
        }
    }

    fn push_block(&mut self) {
        self.fns.last_mut().expect("no fn ctx").blocks.push(AHashMap::new());
    }

    fn pop_block(&mut self) {
        self.fns.last_mut().expect("no fn ctx").blocks.pop();
    }

    fn declare(&mut self, name: &str) -> u32 {
        let ctx = self.fns.last_mut().expect("no fn ctx");
        let slot = ctx.locals.len() as u32;
        ctx.locals.push(name.to_owned());
        ctx.blocks
            .last_mut()
            .expect("no block scope")
            .insert(name.to_owned(), slot);
        slot
    }

    /// True when a declaration at this point binds a module global.
    fn binds_global(&self, name: &str) -> bool {
        self.fns.len() == 1 && self.fns[0].blocks.len() == 1 && !name.starts_with('$')
    }

    fn err(&self, span: Span, message: impl Into<String>) -> Error {
        Error::syntax(message).with_pos(CodeLoc::new(&self.file, span.line, span.column))
    }

    /// Recursive upvalue search: locals of `fi`, then its captures, then the
    /// enclosing function (marking intermediate captures as needed).
    fn find_slot(&mut self, fi: usize, name: &str) -> Option<ResolvedSlot> {
        for block in self.fns[fi].blocks.iter().rev() {
            if let Some(&slot) = block.get(name) {
                return Some(ResolvedSlot::Local(slot));
            }
        }
        if let Some(&capture) = self.fns[fi].capture_names.get(name) {
            return Some(ResolvedSlot::Capture(capture));
        }
        if fi == 0 {
            return None;
        }
        let outer = self.find_slot(fi - 1, name)?;
        let source = match outer {
            ResolvedSlot::Local(slot) => {
                self.fns[fi - 1].captured.insert(slot);
                CaptureSource::Local(slot)
            }
            ResolvedSlot::Capture(capture) => CaptureSource::Capture(capture),
        };
        let idx = self.fns[fi].captures.len() as u32;
        self.fns[fi].captures.push(source);
        self.fns[fi].capture_names.insert(name.to_owned(), idx);
        Some(ResolvedSlot::Capture(idx))
    }

    fn lookup(&mut self, name: &str) -> Option<ResolvedSlot> {
        let innermost = self.fns.len().checked_sub(1)?;
        self.find_slot(innermost, name)
    }

    /// Resolves an identifier to an expression node.
    fn resolve_name_expr(&mut self, name: &str, span: Span) -> Expr {
        if let Some(slot) = self.lookup(name) {
            return match slot {
                ResolvedSlot::Local(slot) => Expr::Local(slot, span),
                ResolvedSlot::Capture(capture) => Expr::Capture(capture, span),
            };
        }
        // Unqualified member access inside a class body or method.
        if name != "this" && self.classes.last().is_some_and(|c| c.members.contains(name)) {
            if let Some(this_slot) = self.lookup("this") {
                let this_expr = match this_slot {
                    ResolvedSlot::Local(slot) => Expr::Local(slot, span),
                    ResolvedSlot::Capture(capture) => Expr::Capture(capture, span),
                };
                return Expr::Member {
                    recv: Box::new(this_expr),
                    name: name.to_owned(),
                    safe: false,
                    span,
                };
            }
        }
        Expr::Global(name.to_owned(), span)
    }

    // --- statements ---

    fn resolve_stmt(&mut self, stmt: &mut Stmt) -> RunResult<()> {
        match stmt {
            Stmt::Expr(expr) | Stmt::Throw { value: expr, .. } => self.resolve_expr(expr),
            Stmt::Val {
                pattern, init, slots, ..
            } => {
                self.resolve_expr(init)?;
                let names: Vec<String> = match pattern {
                    BindPattern::Name(name) => vec![name.clone()],
                    BindPattern::Tuple(names) => names.clone(),
                };
                for name in &names {
                    if self.binds_global(name) {
                        slots.push(None);
                    } else {
                        slots.push(Some(self.declare(name)));
                    }
                }
                Ok(())
            }
            Stmt::Assign { target, value, .. } => {
                self.resolve_expr(value)?;
                self.resolve_target(target)
            }
            Stmt::CoalesceAssign { .. } => unreachable!("'??=' is desugared before resolution"),
            Stmt::Fun(decl) => {
                if self.binds_global(&decl.name) {
                    decl.slot = None;
                } else {
                    decl.slot = Some(self.declare(&decl.name));
                }
                self.resolve_fun(decl, false)
            }
            Stmt::Class(decl) => self.resolve_class(decl),
            Stmt::Import(_) | Stmt::Break(_) | Stmt::Continue(_) => Ok(()),
            Stmt::While { cond, body, .. } => {
                self.resolve_expr(cond)?;
                self.resolve_block(body)
            }
            Stmt::DoWhile { body, cond, .. } => {
                self.resolve_block(body)?;
                self.resolve_expr(cond)
            }
            Stmt::For {
                pattern,
                iter,
                body,
                slots,
                ..
            } => {
                self.resolve_expr(iter)?;
                self.push_block();
                let names: Vec<String> = match pattern {
                    BindPattern::Name(name) => vec![name.clone()],
                    BindPattern::Tuple(names) => names.clone(),
                };
                for name in &names {
                    slots.push(self.declare(name));
                }
                for stmt in &mut body.stmts {
                    self.resolve_stmt(stmt)?;
                }
                self.pop_block();
                Ok(())
            }
            Stmt::Return { value, .. } => value.as_mut().map_or(Ok(()), |v| self.resolve_expr(v)),
            Stmt::Try {
                body, catches, finally, ..
            } => {
                self.resolve_block(body)?;
                for catch in catches {
                    self.push_block();
                    catch.slot = self.declare(&catch.name);
                    for stmt in &mut catch.body.stmts {
                        self.resolve_stmt(stmt)?;
                    }
                    self.pop_block();
                }
                finally.as_mut().map_or(Ok(()), |b| self.resolve_block(b))
            }
            Stmt::Use { .. } => unreachable!("'use' is desugared before resolution"),
            Stmt::CloseResource { resource, .. } => self.resolve_expr(resource),
        }
    }

    fn resolve_target(&mut self, target: &mut AssignTarget) -> RunResult<()> {
        match target {
            AssignTarget::Name { name, span, slot } => {
                if let Some(resolved) = self.lookup(name) {
                    *slot = Some(resolved);
                } else if name != "this" && self.classes.last().is_some_and(|c| c.members.contains(name.as_str())) {
                    if let Some(this_slot) = self.lookup("this") {
                        let this_expr = match this_slot {
                            ResolvedSlot::Local(s) => Expr::Local(s, *span),
                            ResolvedSlot::Capture(c) => Expr::Capture(c, *span),
                        };
                        *target = AssignTarget::Field {
                            recv: Box::new(this_expr),
                            name: name.clone(),
                            span: *span,
                        };
                    }
                }
                // Unresolved: a module-global store.
                Ok(())
            }
            AssignTarget::Field { recv, .. } => self.resolve_expr(recv),
            AssignTarget::Index { recv, index, .. } => {
                self.resolve_expr(recv)?;
                self.resolve_expr(index)
            }
        }
    }

    fn resolve_block(&mut self, block: &mut Block) -> RunResult<()> {
        self.push_block();
        for stmt in &mut block.stmts {
            self.resolve_stmt(stmt)?;
        }
        self.pop_block();
        Ok(())
    }

    // --- functions and classes ---

    fn resolve_fun(&mut self, decl: &mut FunDecl, is_method: bool) -> RunResult<()> {
        self.push_fn();
        self.push_block();
        if is_method {
            self.declare("this");
        }
        for i in 0..decl.params.len() {
            // Defaults see the previously declared parameters only.
            if let Some(default) = &mut decl.params[i].default {
                let mut default = std::mem::replace(default, Expr::Null(decl.span));
                self.resolve_expr(&mut default)?;
                decl.params[i].default = Some(default);
            }
            let param_name = decl.params[i].name.clone();
            self.declare(&param_name);
        }
        for stmt in &mut decl.body.stmts {
            self.resolve_stmt(stmt)?;
        }
        self.pop_block();
        decl.resolution = self.pop_fn();
        Ok(())
    }

    fn resolve_lambda(&mut self, decl: &mut FunDecl) -> RunResult<()> {
        // Parameterless lambdas get the implicit `it`.
        if decl.params.is_empty() {
            decl.params.push(Param {
                name: "it".to_owned(),
                ty: None,
                default: None,
            });
        }
        self.resolve_fun(decl, false)
    }

    fn resolve_class(&mut self, decl: &mut crate::ast::ClassDecl) -> RunResult<()> {
        // Annotation arguments evaluate in the enclosing scope at declaration.
        for ann in &mut decl.annotations {
            for arg in &mut ann.args {
                self.resolve_expr(&mut arg.value)?;
            }
        }

        let mut members = AHashSet::new();
        for param in &decl.ctor_params {
            if param.binding != crate::ast::FieldBinding::None {
                members.insert(param.name.clone());
            }
        }
        for member in &decl.members {
            match member {
                ClassMember::Method(m) => {
                    members.insert(m.name.clone());
                }
                ClassMember::Field { name, .. } => {
                    members.insert(name.clone());
                }
                _ => {}
            }
        }
        self.classes.push(ClassCtx { members });

        // Constructor-init context: this + ctor params, then field inits and
        // body init statements, with the superclass call between them.
        self.push_fn();
        self.push_block();
        self.declare("this");
        for i in 0..decl.ctor_params.len() {
            if let Some(default) = &mut decl.ctor_params[i].default {
                let mut default = std::mem::replace(default, Expr::Null(decl.span));
                self.resolve_expr(&mut default)?;
                decl.ctor_params[i].default = Some(default);
            }
            let param_name = decl.ctor_params[i].name.clone();
            self.declare(&param_name);
        }
        if let Some(superclass) = &mut decl.superclass {
            for arg in &mut superclass.args {
                self.resolve_expr(&mut arg.value)?;
            }
        }
        for member in &mut decl.members {
            match member {
                ClassMember::Field { init, .. } => self.resolve_expr(init)?,
                ClassMember::Init(stmt) => self.resolve_stmt(stmt)?,
                _ => {}
            }
        }
        self.pop_block();
        decl.init_resolution = self.pop_fn();

        // Static initializers run at declaration time in the enclosing scope.
        for member in &mut decl.members {
            if let ClassMember::StaticField { init, .. } = member {
                self.resolve_expr(init)?;
            }
        }

        for member in &mut decl.members {
            match member {
                ClassMember::Method(m) => self.resolve_fun(m, true)?,
                ClassMember::StaticMethod(m) => self.resolve_fun(m, false)?,
                _ => {}
            }
        }

        self.classes.pop();
        Ok(())
    }

    // --- expressions ---

    fn resolve_expr(&mut self, expr: &mut Expr) -> RunResult<()> {
        match expr {
            Expr::Name(..) | Expr::CallableRef(..) => {
                let (name, span) = match expr {
                    Expr::Name(n, s) | Expr::CallableRef(n, s) => (n.clone(), *s),
                    _ => unreachable!(),
                };
                *expr = self.resolve_name_expr(&name, span);
                Ok(())
            }
            Expr::Placeholder(span) => Err(self.err(*span, "'_' is only allowed in call arguments")),
            Expr::Lambda(decl) => self.resolve_lambda(decl),
            Expr::Null(_)
            | Expr::Bool(..)
            | Expr::Int(..)
            | Expr::Long(..)
            | Expr::Double(..)
            | Expr::CharLit(..)
            | Expr::Str(..)
            | Expr::Local(..)
            | Expr::Capture(..)
            | Expr::Global(..) => Ok(()),
            Expr::Call { callee, args, .. } => {
                self.resolve_expr(callee)?;
                for arg in args {
                    self.resolve_expr(&mut arg.value)?;
                }
                Ok(())
            }
            Expr::Member { recv, .. } => self.resolve_expr(recv),
            Expr::Index { recv, index, .. } => {
                self.resolve_expr(recv)?;
                self.resolve_expr(index)
            }
            Expr::Unary { operand, .. }
            | Expr::Is { operand, .. }
            | Expr::Cast { operand, .. }
            | Expr::ToStr { operand, .. } => self.resolve_expr(operand),
            Expr::Binary { lhs, rhs, .. } | Expr::Concat { lhs, rhs, .. } => {
                self.resolve_expr(lhs)?;
                self.resolve_expr(rhs)
            }
            Expr::Range { start, end, step, .. } => {
                self.resolve_expr(start)?;
                self.resolve_expr(end)?;
                step.as_mut().map_or(Ok(()), |s| self.resolve_expr(s))
            }
            Expr::PairOf { first, second, .. } => {
                self.resolve_expr(first)?;
                self.resolve_expr(second)
            }
            Expr::If { cond, then, else_, .. } => {
                self.resolve_expr(cond)?;
                self.resolve_block(then)?;
                else_.as_mut().map_or(Ok(()), |b| self.resolve_block(b))
            }
            Expr::ListLit { items, .. } => {
                for item in items {
                    self.resolve_expr(&mut item.value)?;
                }
                Ok(())
            }
            Expr::BlockExpr { block, .. } => self.resolve_block(block),
            Expr::TryCatch {
                body, catches, finally, ..
            } => {
                self.resolve_block(body)?;
                for catch in catches {
                    self.push_block();
                    catch.slot = self.declare(&catch.name);
                    for stmt in &mut catch.body.stmts {
                        self.resolve_stmt(stmt)?;
                    }
                    self.pop_block();
                }
                finally.as_mut().map_or(Ok(()), |b| self.resolve_block(b))
            }
            Expr::Interp { .. }
            | Expr::When { .. }
            | Expr::CmpChain { .. }
            | Expr::Elvis { .. }
            | Expr::IfLet { .. }
            | Expr::TryPostfix { .. }
            | Expr::Pipeline { .. } => {
                unreachable!("surface construct must be desugared before resolution")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{ast::Expr, ast::Stmt, hir, parse::parse};

    fn lower(source: &str) -> hir::HirModule {
        hir::lower(parse(source, "t.nova").unwrap(), "t.nova").unwrap()
    }

    #[test]
    fn top_level_val_binds_global() {
        let hir = lower("val x = 1\nx");
        let Stmt::Val { slots, .. } = &hir.stmts[0] else { panic!() };
        assert_eq!(slots, &[None]);
        let Stmt::Expr(Expr::Global(name, _)) = &hir.stmts[1] else {
            panic!("expected global read, got {:?}", hir.stmts[1]);
        };
        assert_eq!(name, "x");
    }

    #[test]
    fn lambda_captures_enclosing_local() {
        let hir = lower("fun outer() { var n = 0\nval inc = { n = n + 1 }\ninc() }");
        let Stmt::Fun(decl) = &hir.stmts[0] else { panic!() };
        // `n` is captured by the lambda, so it must be flagged as a cell.
        assert!(!decl.resolution.captured.is_empty());
    }

    #[test]
    fn implicit_it_parameter() {
        let hir = lower("val f = { it }");
        let Stmt::Val { init, .. } = &hir.stmts[0] else { panic!() };
        let Expr::Lambda(decl) = init else { panic!("expected lambda") };
        assert_eq!(decl.params.len(), 1);
        assert_eq!(decl.params[0].name, "it");
        assert!(matches!(decl.body.stmts[0], Stmt::Expr(Expr::Local(0, _))));
    }

    #[test]
    fn method_names_resolve_through_this() {
        let hir = lower("class C(val x: Int) { fun double() = x * 2 }");
        let Stmt::Class(decl) = &hir.stmts[0] else { panic!() };
        let crate::ast::ClassMember::Method(method) = &decl.members[0] else {
            panic!()
        };
        let Stmt::Expr(Expr::Binary { lhs, .. }) = &method.body.stmts[0] else {
            panic!()
        };
        assert!(matches!(**lhs, Expr::Member { .. }), "x should resolve to this.x");
    }
}
