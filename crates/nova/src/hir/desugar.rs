//! Desugar passes: rewrite surface constructs into core HIR nodes.
//!
//! Every pass walks the full module (including class members and lambda
//! bodies) and rewrites its construct in place. Temporaries introduced here
//! use `$`-prefixed names, which the resolver always treats as locals.

use std::mem;

use super::HirModule;
use crate::{
    ast::{
        AssignTarget, BinOp, Block, CallArg, ClassMember, Expr, FunDecl, FnResolution, InterpPart, Param, Span, Stmt,
        WhenCond,
    },
    error::{CodeLoc, Error, RunResult},
};

// --- shared plumbing ---

/// Unique temp-name generator for one pass run.
struct Gensym {
    prefix: &'static str,
    next: u32,
}

impl Gensym {
    fn new(prefix: &'static str) -> Self {
        Self { prefix, next: 0 }
    }

    fn fresh(&mut self) -> String {
        let name = format!("${}{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

fn take(expr: &mut Expr) -> Expr {
    mem::replace(expr, Expr::Null(Span::new(0, 0)))
}

fn name(name: impl Into<String>, span: Span) -> Expr {
    Expr::Name(name.into(), span)
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr, span: Span) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        span,
    }
}

fn val(bind_name: String, init: Expr, span: Span) -> Stmt {
    Stmt::Val {
        pattern: crate::ast::BindPattern::Name(bind_name),
        mutable: false,
        ty: None,
        init,
        span,
        slots: Vec::new(),
    }
}

fn expr_block(stmts: Vec<Stmt>, span: Span) -> Expr {
    Expr::BlockExpr {
        block: Block { stmts },
        span,
    }
}

fn single(expr: Expr) -> Block {
    Block {
        stmts: vec![Stmt::Expr(expr)],
    }
}

fn err_at(file: &str, span: Span, message: impl Into<String>) -> Error {
    Error::syntax(message).with_pos(CodeLoc::new(file, span.line, span.column))
}

// --- generic walkers ---

fn walk_fun<F: FnMut(&mut Expr) -> RunResult<()>>(decl: &mut FunDecl, f: &mut F) -> RunResult<()> {
    for param in &mut decl.params {
        if let Some(default) = &mut param.default {
            walk_expr(default, f)?;
        }
    }
    walk_block(&mut decl.body, f)
}

fn walk_block<F: FnMut(&mut Expr) -> RunResult<()>>(block: &mut Block, f: &mut F) -> RunResult<()> {
    for stmt in &mut block.stmts {
        walk_stmt(stmt, f)?;
    }
    Ok(())
}

fn walk_target<F: FnMut(&mut Expr) -> RunResult<()>>(target: &mut AssignTarget, f: &mut F) -> RunResult<()> {
    match target {
        AssignTarget::Name { .. } => Ok(()),
        AssignTarget::Field { recv, .. } => walk_expr(recv, f),
        AssignTarget::Index { recv, index, .. } => {
            walk_expr(recv, f)?;
            walk_expr(index, f)
        }
    }
}

fn walk_stmt<F: FnMut(&mut Expr) -> RunResult<()>>(stmt: &mut Stmt, f: &mut F) -> RunResult<()> {
    match stmt {
        Stmt::Expr(expr) | Stmt::Throw { value: expr, .. } => walk_expr(expr, f),
        Stmt::Val { init, .. } => walk_expr(init, f),
        Stmt::Assign { target, value, .. } | Stmt::CoalesceAssign { target, value, .. } => {
            walk_target(target, f)?;
            walk_expr(value, f)
        }
        Stmt::Fun(decl) => walk_fun(decl, f),
        Stmt::Class(decl) => {
            for ann in &mut decl.annotations {
                for arg in &mut ann.args {
                    walk_expr(&mut arg.value, f)?;
                }
            }
            for param in &mut decl.ctor_params {
                if let Some(default) = &mut param.default {
                    walk_expr(default, f)?;
                }
            }
            if let Some(superclass) = &mut decl.superclass {
                for arg in &mut superclass.args {
                    walk_expr(&mut arg.value, f)?;
                }
            }
            for member in &mut decl.members {
                match member {
                    ClassMember::Method(decl) | ClassMember::StaticMethod(decl) => walk_fun(decl, f)?,
                    ClassMember::StaticField { init, .. } | ClassMember::Field { init, .. } => walk_expr(init, f)?,
                    ClassMember::Init(stmt) => walk_stmt(stmt, f)?,
                }
            }
            Ok(())
        }
        Stmt::Import(_) | Stmt::Break(_) | Stmt::Continue(_) => Ok(()),
        Stmt::While { cond, body, .. } => {
            walk_expr(cond, f)?;
            walk_block(body, f)
        }
        Stmt::DoWhile { body, cond, .. } => {
            walk_block(body, f)?;
            walk_expr(cond, f)
        }
        Stmt::For { iter, body, .. } => {
            walk_expr(iter, f)?;
            walk_block(body, f)
        }
        Stmt::Return { value, .. } => value.as_mut().map_or(Ok(()), |v| walk_expr(v, f)),
        Stmt::Try {
            body, catches, finally, ..
        } => {
            walk_block(body, f)?;
            for catch in catches {
                walk_block(&mut catch.body, f)?;
            }
            finally.as_mut().map_or(Ok(()), |b| walk_block(b, f))
        }
        Stmt::Use { init, body, .. } => {
            walk_expr(init, f)?;
            walk_block(body, f)
        }
        Stmt::CloseResource { resource, .. } => walk_expr(resource, f),
    }
}

/// Post-order expression rewrite: children first, then the node itself.
fn walk_expr<F: FnMut(&mut Expr) -> RunResult<()>>(expr: &mut Expr, f: &mut F) -> RunResult<()> {
    match expr {
        Expr::Null(_)
        | Expr::Bool(..)
        | Expr::Int(..)
        | Expr::Long(..)
        | Expr::Double(..)
        | Expr::CharLit(..)
        | Expr::Str(..)
        | Expr::Name(..)
        | Expr::Placeholder(_)
        | Expr::CallableRef(..)
        | Expr::Local(..)
        | Expr::Capture(..)
        | Expr::Global(..) => {}
        Expr::Interp { parts, .. } => {
            for part in parts {
                if let InterpPart::Expr(e) = part {
                    walk_expr(e, f)?;
                }
            }
        }
        Expr::Lambda(decl) => walk_fun(decl, f)?,
        Expr::Call { callee, args, .. } => {
            walk_expr(callee, f)?;
            for arg in args {
                walk_expr(&mut arg.value, f)?;
            }
        }
        Expr::Member { recv, .. } => walk_expr(recv, f)?,
        Expr::Index { recv, index, .. } => {
            walk_expr(recv, f)?;
            walk_expr(index, f)?;
        }
        Expr::Unary { operand, .. } | Expr::TryPostfix { operand, .. } => walk_expr(operand, f)?,
        Expr::TryCatch {
            body, catches, finally, ..
        } => {
            walk_block(body, f)?;
            for catch in catches {
                walk_block(&mut catch.body, f)?;
            }
            if let Some(finally) = finally {
                walk_block(finally, f)?;
            }
        }
        Expr::Binary { lhs, rhs, .. }
        | Expr::Elvis { lhs, rhs, .. }
        | Expr::Pipeline { lhs, rhs, .. }
        | Expr::Concat { lhs, rhs, .. } => {
            walk_expr(lhs, f)?;
            walk_expr(rhs, f)?;
        }
        Expr::CmpChain { operands, .. } => {
            for operand in operands {
                walk_expr(operand, f)?;
            }
        }
        Expr::Range { start, end, step, .. } => {
            walk_expr(start, f)?;
            walk_expr(end, f)?;
            if let Some(step) = step {
                walk_expr(step, f)?;
            }
        }
        Expr::PairOf { first, second, .. } => {
            walk_expr(first, f)?;
            walk_expr(second, f)?;
        }
        Expr::If { cond, then, else_, .. } => {
            walk_expr(cond, f)?;
            walk_block(then, f)?;
            if let Some(else_) = else_ {
                walk_block(else_, f)?;
            }
        }
        Expr::IfLet { value, then, else_, .. } => {
            walk_expr(value, f)?;
            walk_block(then, f)?;
            if let Some(else_) = else_ {
                walk_block(else_, f)?;
            }
        }
        Expr::When {
            subject, arms, else_arm, ..
        } => {
            if let Some(subject) = subject {
                walk_expr(subject, f)?;
            }
            for arm in arms {
                for cond in &mut arm.conds {
                    match cond {
                        WhenCond::Expr(e) | WhenCond::In { expr: e, .. } => walk_expr(e, f)?,
                        WhenCond::Is { .. } => {}
                    }
                }
                walk_block(&mut arm.body, f)?;
            }
            if let Some(else_arm) = else_arm {
                walk_block(else_arm, f)?;
            }
        }
        Expr::Is { operand, .. } | Expr::Cast { operand, .. } | Expr::ToStr { operand, .. } => walk_expr(operand, f)?,
        Expr::ListLit { items, .. } => {
            for item in items {
                walk_expr(&mut item.value, f)?;
            }
        }
        Expr::BlockExpr { block, .. } => walk_block(block, f)?,
    }
    f(expr)
}

fn walk_module<F: FnMut(&mut Expr) -> RunResult<()>>(hir: &mut HirModule, f: &mut F) -> RunResult<()> {
    for stmt in &mut hir.stmts {
        walk_stmt(stmt, f)?;
    }
    Ok(())
}

/// Post-order statement rewrite (used by statement-shaped desugars).
fn walk_module_stmts<F: FnMut(&mut Stmt) -> RunResult<()>>(hir: &mut HirModule, f: &mut F) -> RunResult<()> {
    fn stmt_rec<F: FnMut(&mut Stmt) -> RunResult<()>>(stmt: &mut Stmt, f: &mut F) -> RunResult<()> {
        match stmt {
            Stmt::Fun(decl) => block_rec(&mut decl.body, f)?,
            Stmt::Class(decl) => {
                for member in &mut decl.members {
                    match member {
                        ClassMember::Method(d) | ClassMember::StaticMethod(d) => block_rec(&mut d.body, f)?,
                        ClassMember::Init(s) => stmt_rec(s, f)?,
                        ClassMember::StaticField { .. } | ClassMember::Field { .. } => {}
                    }
                }
            }
            Stmt::While { body, .. } | Stmt::DoWhile { body, .. } | Stmt::For { body, .. } => block_rec(body, f)?,
            Stmt::Try {
                body, catches, finally, ..
            } => {
                block_rec(body, f)?;
                for catch in catches {
                    block_rec(&mut catch.body, f)?;
                }
                if let Some(finally) = finally {
                    block_rec(finally, f)?;
                }
            }
            Stmt::Use { body, .. } => block_rec(body, f)?,
            Stmt::Expr(e)
            | Stmt::Val { init: e, .. }
            | Stmt::Throw { value: e, .. }
            | Stmt::Assign { value: e, .. }
            | Stmt::CoalesceAssign { value: e, .. } => expr_blocks_rec(e, f)?,
            _ => {}
        }
        f(stmt)
    }
    fn block_rec<F: FnMut(&mut Stmt) -> RunResult<()>>(block: &mut Block, f: &mut F) -> RunResult<()> {
        for stmt in &mut block.stmts {
            stmt_rec(stmt, f)?;
        }
        Ok(())
    }
    // Statements nested inside expressions (lambda bodies, if/when blocks).
    fn expr_blocks_rec<F: FnMut(&mut Stmt) -> RunResult<()>>(expr: &mut Expr, f: &mut F) -> RunResult<()> {
        walk_expr(expr, &mut |e| {
            match e {
                Expr::Lambda(decl) => block_rec(&mut decl.body, f),
                Expr::If { then, else_, .. } | Expr::IfLet { then, else_, .. } => {
                    block_rec(then, f)?;
                    else_.as_mut().map_or(Ok(()), |b| block_rec(b, f))
                }
                Expr::BlockExpr { block, .. } => block_rec(block, f),
                Expr::When {
                    arms, else_arm, ..
                } => {
                    for arm in arms {
                        block_rec(&mut arm.body, f)?;
                    }
                    else_arm.as_mut().map_or(Ok(()), |b| block_rec(b, f))
                }
                Expr::TryCatch {
                    body, catches, finally, ..
                } => {
                    block_rec(body, f)?;
                    for catch in catches {
                        block_rec(&mut catch.body, f)?;
                    }
                    finally.as_mut().map_or(Ok(()), |b| block_rec(b, f))
                }
                _ => Ok(()),
            }
        })
    }
    for stmt in &mut hir.stmts {
        stmt_rec(stmt, f)?;
    }
    Ok(())
}

// --- passes ---

/// `when` -> chained conditionals, with the subject evaluated once.
pub(super) fn desugar_when(hir: &mut HirModule) -> RunResult<()> {
    let mut gensym = Gensym::new("when");
    let file = hir.file.clone();
    walk_module(hir, &mut |expr| {
        if !matches!(expr, Expr::When { .. }) {
            return Ok(());
        }
        let Expr::When {
            subject,
            arms,
            else_arm,
            span,
        } = take(expr)
        else {
            unreachable!()
        };
        let (pre, subject_ref) = match subject {
            Some(subject) => {
                let tmp = gensym.fresh();
                (Some(val(tmp.clone(), *subject, span)), Some(name(tmp, span)))
            }
            None => (None, None),
        };
        let mut acc = match else_arm {
            Some(block) => Expr::BlockExpr { block, span },
            None => Expr::Null(span),
        };
        for arm in arms.into_iter().rev() {
            let mut cond: Option<Expr> = None;
            for when_cond in arm.conds {
                let piece = match when_cond {
                    WhenCond::Expr(e) => match &subject_ref {
                        Some(s) => binary(BinOp::Eq, s.clone(), e, arm.span),
                        None => e,
                    },
                    WhenCond::In { expr, negated } => {
                        let s = subject_ref
                            .clone()
                            .ok_or_else(|| err_at(&file, arm.span, "'in' condition requires a when subject"))?;
                        binary(if negated { BinOp::NotIn } else { BinOp::In }, s, expr, arm.span)
                    }
                    WhenCond::Is { ty, negated } => {
                        let s = subject_ref
                            .clone()
                            .ok_or_else(|| err_at(&file, arm.span, "'is' condition requires a when subject"))?;
                        Expr::Is {
                            operand: Box::new(s),
                            ty,
                            negated,
                            span: arm.span,
                        }
                    }
                };
                cond = Some(match cond {
                    None => piece,
                    Some(prev) => binary(BinOp::Or, prev, piece, arm.span),
                });
            }
            let cond = cond.ok_or_else(|| err_at(&file, arm.span, "when arm without condition"))?;
            acc = Expr::If {
                cond: Box::new(cond),
                then: arm.body,
                else_: Some(single(acc)),
                span,
            };
        }
        *expr = match pre {
            Some(pre) => expr_block(vec![pre, Stmt::Expr(acc)], span),
            None => acc,
        };
        Ok(())
    })
}

/// String interpolation -> concatenation with canonical `toString` calls.
pub(super) fn desugar_interp(hir: &mut HirModule) -> RunResult<()> {
    walk_module(hir, &mut |expr| {
        if !matches!(expr, Expr::Interp { .. }) {
            return Ok(());
        }
        let Expr::Interp { parts, span } = take(expr) else {
            unreachable!()
        };
        let mut acc: Option<Expr> = None;
        for part in parts {
            let piece = match part {
                InterpPart::Text(text) => Expr::Str(text, span),
                InterpPart::Expr(e) => Expr::ToStr {
                    operand: Box::new(e),
                    span,
                },
            };
            acc = Some(match acc {
                None => piece,
                Some(prev) => Expr::Concat {
                    lhs: Box::new(prev),
                    rhs: Box::new(piece),
                    span,
                },
            });
        }
        *expr = acc.unwrap_or(Expr::Str(String::new(), span));
        Ok(())
    })
}

/// `?.`, `?[`, `?:` and `??=` -> explicit conditionals with a single
/// evaluation of the receiver.
pub(super) fn desugar_null_safety(hir: &mut HirModule) -> RunResult<()> {
    let mut gensym = Gensym::new("null");
    // Statement form first: `target ??= value`.
    walk_module_stmts(hir, &mut |stmt| {
        if !matches!(stmt, Stmt::CoalesceAssign { .. }) {
            return Ok(());
        }
        let Stmt::CoalesceAssign { target, value, span } = mem::replace(stmt, Stmt::Break(Span::new(0, 0))) else {
            unreachable!()
        };
        *stmt = match target {
            AssignTarget::Name { name: n, span: s, slot } => {
                let cond = binary(BinOp::Eq, name(n.clone(), s), Expr::Null(s), span);
                Stmt::Expr(Expr::If {
                    cond: Box::new(cond),
                    then: Block {
                        stmts: vec![Stmt::Assign {
                            target: AssignTarget::Name { name: n, span: s, slot },
                            op: None,
                            value,
                            span,
                        }],
                    },
                    else_: None,
                    span,
                })
            }
            AssignTarget::Field { recv, name: field, span: s } => {
                let tmp = gensym.fresh();
                let load = Expr::Member {
                    recv: Box::new(name(tmp.clone(), s)),
                    name: field.clone(),
                    safe: false,
                    span: s,
                };
                let cond = binary(BinOp::Eq, load, Expr::Null(s), span);
                let assign = Stmt::Assign {
                    target: AssignTarget::Field {
                        recv: Box::new(name(tmp.clone(), s)),
                        name: field,
                        span: s,
                    },
                    op: None,
                    value,
                    span,
                };
                Stmt::Expr(expr_block(
                    vec![
                        val(tmp, *recv, span),
                        Stmt::Expr(Expr::If {
                            cond: Box::new(cond),
                            then: Block { stmts: vec![assign] },
                            else_: None,
                            span,
                        }),
                    ],
                    span,
                ))
            }
            AssignTarget::Index { recv, index, span: s } => {
                let recv_tmp = gensym.fresh();
                let index_tmp = gensym.fresh();
                let load = Expr::Index {
                    recv: Box::new(name(recv_tmp.clone(), s)),
                    index: Box::new(name(index_tmp.clone(), s)),
                    safe: false,
                    span: s,
                };
                let cond = binary(BinOp::Eq, load, Expr::Null(s), span);
                let assign = Stmt::Assign {
                    target: AssignTarget::Index {
                        recv: Box::new(name(recv_tmp.clone(), s)),
                        index: Box::new(name(index_tmp.clone(), s)),
                        span: s,
                    },
                    op: None,
                    value,
                    span,
                };
                Stmt::Expr(expr_block(
                    vec![
                        val(recv_tmp, *recv, span),
                        val(index_tmp, *index, span),
                        Stmt::Expr(Expr::If {
                            cond: Box::new(cond),
                            then: Block { stmts: vec![assign] },
                            else_: None,
                            span,
                        }),
                    ],
                    span,
                ))
            }
        };
        Ok(())
    })?;

    // Expression forms, pre-order so `a?.m(...)` is seen before its callee.
    walk_module_pre(hir, &mut |expr, gensym| {
        match expr {
            // Safe method call: skip the call entirely on a null receiver.
            Expr::Call { callee, .. } if matches!(callee.as_ref(), Expr::Member { safe: true, .. }) => {
                let Expr::Call { callee, args, span } = take(expr) else {
                    unreachable!()
                };
                let Expr::Member {
                    recv, name: method, span: member_span, ..
                } = *callee
                else {
                    unreachable!()
                };
                let tmp = gensym.fresh();
                let call = Expr::Call {
                    callee: Box::new(Expr::Member {
                        recv: Box::new(name(tmp.clone(), member_span)),
                        name: method,
                        safe: false,
                        span: member_span,
                    }),
                    args,
                    span,
                };
                *expr = null_guard(tmp, *recv, call, span);
                true
            }
            Expr::Member { safe: true, .. } => {
                let Expr::Member {
                    recv, name: field, span, ..
                } = take(expr)
                else {
                    unreachable!()
                };
                let tmp = gensym.fresh();
                let access = Expr::Member {
                    recv: Box::new(name(tmp.clone(), span)),
                    name: field,
                    safe: false,
                    span,
                };
                *expr = null_guard(tmp, *recv, access, span);
                true
            }
            Expr::Index { safe: true, .. } => {
                let Expr::Index {
                    recv, index, span, ..
                } = take(expr)
                else {
                    unreachable!()
                };
                let tmp = gensym.fresh();
                let access = Expr::Index {
                    recv: Box::new(name(tmp.clone(), span)),
                    index,
                    safe: false,
                    span,
                };
                *expr = null_guard(tmp, *recv, access, span);
                true
            }
            Expr::Elvis { .. } => {
                let Expr::Elvis { lhs, rhs, span } = take(expr) else {
                    unreachable!()
                };
                let tmp = gensym.fresh();
                let cond = binary(BinOp::Eq, name(tmp.clone(), span), Expr::Null(span), span);
                *expr = expr_block(
                    vec![
                        val(tmp.clone(), *lhs, span),
                        Stmt::Expr(Expr::If {
                            cond: Box::new(cond),
                            then: single(*rhs),
                            else_: Some(single(name(tmp, span))),
                            span,
                        }),
                    ],
                    span,
                );
                true
            }
            _ => false,
        }
    })
}

/// `if (tmp != null) access else null`, with `tmp` bound to `recv`.
fn null_guard(tmp: String, recv: Expr, access: Expr, span: Span) -> Expr {
    let cond = binary(BinOp::Ne, name(tmp.clone(), span), Expr::Null(span), span);
    expr_block(
        vec![
            val(tmp, recv, span),
            Stmt::Expr(Expr::If {
                cond: Box::new(cond),
                then: single(access),
                else_: Some(single(Expr::Null(span))),
                span,
            }),
        ],
        span,
    )
}

/// Pre-order fixpoint walk: the callback runs on a node (repeatedly, while it
/// reports a rewrite) before its children are visited.
fn walk_module_pre(
    hir: &mut HirModule,
    f: &mut impl FnMut(&mut Expr, &mut Gensym) -> bool,
) -> RunResult<()> {
    let mut gensym = Gensym::new("ns");
    fn go(expr: &mut Expr, f: &mut impl FnMut(&mut Expr, &mut Gensym) -> bool, gensym: &mut Gensym) -> RunResult<()> {
        let mut budget = 64;
        while f(expr, gensym) && budget > 0 {
            budget -= 1;
        }
        // Recurse through the (possibly rewritten) node's children with a
        // post-order walker whose callback immediately pre-walks new nodes.
        match expr {
            Expr::Lambda(decl) => {
                for stmt in &mut decl.body.stmts {
                    go_stmt(stmt, f, gensym)?;
                }
                Ok(())
            }
            _ => {
                // Manual child recursion using the shared traversal shape.
                walk_children(expr, &mut |child| go(child, f, gensym))
            }
        }
    }
    fn go_stmt(
        stmt: &mut Stmt,
        f: &mut impl FnMut(&mut Expr, &mut Gensym) -> bool,
        gensym: &mut Gensym,
    ) -> RunResult<()> {
        walk_stmt_shallow(stmt, &mut |expr| go(expr, f, gensym))
    }
    for stmt in &mut hir.stmts {
        go_stmt(stmt, f, &mut gensym)?;
    }
    Ok(())
}

/// Applies `f` to each direct child expression (and recurses into blocks and
/// nested statements via `walk_stmt_shallow`).
fn walk_children<F: FnMut(&mut Expr) -> RunResult<()>>(expr: &mut Expr, f: &mut F) -> RunResult<()> {
    match expr {
        Expr::Lambda(decl) => {
            for stmt in &mut decl.body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            Ok(())
        }
        Expr::If { cond, then, else_, .. } => {
            f(cond)?;
            for stmt in &mut then.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            if let Some(else_) = else_ {
                for stmt in &mut else_.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            Ok(())
        }
        Expr::IfLet { value, then, else_, .. } => {
            f(value)?;
            for stmt in &mut then.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            if let Some(else_) = else_ {
                for stmt in &mut else_.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            Ok(())
        }
        Expr::BlockExpr { block, .. } => {
            for stmt in &mut block.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            Ok(())
        }
        Expr::When {
            subject, arms, else_arm, ..
        } => {
            if let Some(subject) = subject {
                f(subject)?;
            }
            for arm in arms {
                for cond in &mut arm.conds {
                    match cond {
                        WhenCond::Expr(e) | WhenCond::In { expr: e, .. } => f(e)?,
                        WhenCond::Is { .. } => {}
                    }
                }
                for stmt in &mut arm.body.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            if let Some(else_arm) = else_arm {
                for stmt in &mut else_arm.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            Ok(())
        }
        Expr::Interp { parts, .. } => {
            for part in parts {
                if let InterpPart::Expr(e) = part {
                    f(e)?;
                }
            }
            Ok(())
        }
        Expr::Call { callee, args, .. } => {
            f(callee)?;
            for arg in args {
                f(&mut arg.value)?;
            }
            Ok(())
        }
        Expr::Member { recv, .. } => f(recv),
        Expr::Index { recv, index, .. } => {
            f(recv)?;
            f(index)
        }
        Expr::Unary { operand, .. }
        | Expr::TryPostfix { operand, .. }
        | Expr::Is { operand, .. }
        | Expr::Cast { operand, .. }
        | Expr::ToStr { operand, .. } => f(operand),
        Expr::TryCatch {
            body, catches, finally, ..
        } => {
            for stmt in &mut body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            for catch in catches {
                for stmt in &mut catch.body.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            if let Some(finally) = finally {
                for stmt in &mut finally.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            Ok(())
        }
        Expr::Binary { lhs, rhs, .. }
        | Expr::Elvis { lhs, rhs, .. }
        | Expr::Pipeline { lhs, rhs, .. }
        | Expr::Concat { lhs, rhs, .. } => {
            f(lhs)?;
            f(rhs)
        }
        Expr::CmpChain { operands, .. } => {
            for operand in operands {
                f(operand)?;
            }
            Ok(())
        }
        Expr::Range { start, end, step, .. } => {
            f(start)?;
            f(end)?;
            step.as_mut().map_or(Ok(()), |s| f(s))
        }
        Expr::PairOf { first, second, .. } => {
            f(first)?;
            f(second)
        }
        Expr::ListLit { items, .. } => {
            for item in items {
                f(&mut item.value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Applies `f` to the expressions of one statement and recurses into its
/// nested blocks statement-by-statement.
fn walk_stmt_shallow<F: FnMut(&mut Expr) -> RunResult<()>>(stmt: &mut Stmt, f: &mut F) -> RunResult<()> {
    match stmt {
        Stmt::Expr(e) | Stmt::Throw { value: e, .. } | Stmt::Val { init: e, .. } => f(e),
        Stmt::Assign { target, value, .. } | Stmt::CoalesceAssign { target, value, .. } => {
            match target {
                AssignTarget::Name { .. } => {}
                AssignTarget::Field { recv, .. } => f(recv)?,
                AssignTarget::Index { recv, index, .. } => {
                    f(recv)?;
                    f(index)?;
                }
            }
            f(value)
        }
        Stmt::Fun(decl) => {
            for stmt in &mut decl.body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            Ok(())
        }
        Stmt::Class(decl) => {
            for ann in &mut decl.annotations {
                for arg in &mut ann.args {
                    f(&mut arg.value)?;
                }
            }
            for param in &mut decl.ctor_params {
                if let Some(default) = &mut param.default {
                    f(default)?;
                }
            }
            if let Some(superclass) = &mut decl.superclass {
                for arg in &mut superclass.args {
                    f(&mut arg.value)?;
                }
            }
            for member in &mut decl.members {
                match member {
                    ClassMember::Method(d) | ClassMember::StaticMethod(d) => {
                        for stmt in &mut d.body.stmts {
                            walk_stmt_shallow(stmt, f)?;
                        }
                    }
                    ClassMember::StaticField { init, .. } | ClassMember::Field { init, .. } => f(init)?,
                    ClassMember::Init(s) => walk_stmt_shallow(s, f)?,
                }
            }
            Ok(())
        }
        Stmt::Import(_) | Stmt::Break(_) | Stmt::Continue(_) => Ok(()),
        Stmt::While { cond, body, .. } => {
            f(cond)?;
            for stmt in &mut body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            Ok(())
        }
        Stmt::DoWhile { body, cond, .. } => {
            for stmt in &mut body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            f(cond)
        }
        Stmt::For { iter, body, .. } => {
            f(iter)?;
            for stmt in &mut body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            Ok(())
        }
        Stmt::Return { value, .. } => value.as_mut().map_or(Ok(()), f),
        Stmt::Try {
            body, catches, finally, ..
        } => {
            for stmt in &mut body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            for catch in catches {
                for stmt in &mut catch.body.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            if let Some(finally) = finally {
                for stmt in &mut finally.stmts {
                    walk_stmt_shallow(stmt, f)?;
                }
            }
            Ok(())
        }
        Stmt::Use { init, body, .. } => {
            f(init)?;
            for stmt in &mut body.stmts {
                walk_stmt_shallow(stmt, f)?;
            }
            Ok(())
        }
        Stmt::CloseResource { resource, .. } => f(resource),
    }
}

/// Chained comparisons `a < b <= c` -> `a < b && b <= c` with the middle
/// operands evaluated once.
pub(super) fn desugar_compare(hir: &mut HirModule) -> RunResult<()> {
    let mut gensym = Gensym::new("cmp");
    walk_module(hir, &mut |expr| {
        if !matches!(expr, Expr::CmpChain { .. }) {
            return Ok(());
        }
        let Expr::CmpChain { operands, ops, span } = take(expr) else {
            unreachable!()
        };
        let count = operands.len();
        let mut stmts = Vec::new();
        let mut refs = Vec::with_capacity(count);
        for (i, operand) in operands.into_iter().enumerate() {
            if i == 0 || i == count - 1 {
                refs.push(operand);
            } else {
                let tmp = gensym.fresh();
                stmts.push(val(tmp.clone(), operand, span));
                refs.push(name(tmp, span));
            }
        }
        let mut acc: Option<Expr> = None;
        for (i, op) in ops.iter().enumerate() {
            let piece = binary(*op, refs[i].clone(), refs[i + 1].clone(), span);
            acc = Some(match acc {
                None => piece,
                Some(prev) => binary(BinOp::And, prev, piece, span),
            });
        }
        let chain = acc.expect("chain has at least two ops");
        *expr = if stmts.is_empty() {
            chain
        } else {
            stmts.push(Stmt::Expr(chain));
            expr_block(stmts, span)
        };
        Ok(())
    })
}

/// `a |> f` -> `f(a)`.
pub(super) fn desugar_pipeline(hir: &mut HirModule) -> RunResult<()> {
    walk_module(hir, &mut |expr| {
        if !matches!(expr, Expr::Pipeline { .. }) {
            return Ok(());
        }
        let Expr::Pipeline { lhs, rhs, span } = take(expr) else {
            unreachable!()
        };
        *expr = Expr::Call {
            callee: rhs,
            args: vec![CallArg {
                name: None,
                value: *lhs,
                spread: false,
            }],
            span,
        };
        Ok(())
    })
}

/// `f(_, x)` -> a synthesized lambda capturing `f` and `x` by value.
pub(super) fn desugar_partial(hir: &mut HirModule) -> RunResult<()> {
    let mut gensym = Gensym::new("pa");
    walk_module(hir, &mut |expr| {
        let Expr::Call { args, .. } = expr else {
            return Ok(());
        };
        if !args.iter().any(|a| matches!(a.value, Expr::Placeholder(_))) {
            return Ok(());
        }
        let Expr::Call { callee, args, span } = take(expr) else {
            unreachable!()
        };
        let mut stmts = Vec::new();
        let func_tmp = gensym.fresh();
        stmts.push(val(func_tmp.clone(), *callee, span));
        let mut params = Vec::new();
        let mut call_args = Vec::with_capacity(args.len());
        for arg in args {
            if matches!(arg.value, Expr::Placeholder(_)) {
                let param = format!("$p{}", params.len());
                params.push(Param {
                    name: param.clone(),
                    ty: None,
                    default: None,
                });
                call_args.push(CallArg {
                    name: arg.name,
                    value: name(param, span),
                    spread: arg.spread,
                });
            } else {
                let tmp = gensym.fresh();
                stmts.push(val(tmp.clone(), arg.value, span));
                call_args.push(CallArg {
                    name: arg.name,
                    value: name(tmp, span),
                    spread: arg.spread,
                });
            }
        }
        let body_call = Expr::Call {
            callee: Box::new(name(func_tmp, span)),
            args: call_args,
            span,
        };
        stmts.push(Stmt::Expr(Expr::Lambda(Box::new(FunDecl {
            name: "<partial>".to_owned(),
            receiver: None,
            params,
            ret: None,
            body: single(body_call),
            expr_body: true,
            is_private: false,
            resolution: FnResolution::default(),
            slot: None,
            span,
        }))));
        *expr = expr_block(stmts, span);
        Ok(())
    })
}

/// `fun T.m(...)` -> free function taking `this` as its first parameter; the
/// dispatch entry on `T` is emitted during MIR lowering.
pub(super) fn desugar_extensions(hir: &mut HirModule) -> RunResult<()> {
    walk_module_stmts(hir, &mut |stmt| {
        if let Stmt::Fun(decl) = stmt {
            if decl.receiver.is_some() {
                decl.params.insert(
                    0,
                    Param {
                        name: "this".to_owned(),
                        ty: None,
                        default: None,
                    },
                );
            }
        }
        Ok(())
    })
}

/// Validates operator-method arity on class declarations so `a + b` can
/// dispatch to `plus` with a predictable shape.
pub(super) fn desugar_operators(hir: &mut HirModule) -> RunResult<()> {
    let file = hir.file.clone();
    walk_module_stmts(hir, &mut |stmt| {
        let Stmt::Class(decl) = stmt else {
            return Ok(());
        };
        for member in &decl.members {
            let ClassMember::Method(method) = member else {
                continue;
            };
            let expected = match method.name.as_str() {
                "plus" | "minus" | "times" | "div" | "rem" | "contains" | "compareTo" | "equals" => Some(1),
                "unaryMinus" | "not" | "toString" | "hashCode" | "close" => Some(0),
                "set" => Some(2),
                _ => None,
            };
            if let Some(expected) = expected {
                if method.params.len() != expected {
                    return Err(err_at(
                        &file,
                        method.span,
                        format!(
                            "operator method '{}' must take {} parameter(s), found {}",
                            method.name,
                            expected,
                            method.params.len()
                        ),
                    ));
                }
            }
        }
        Ok(())
    })
}

/// `if (val x = e) body else alt` -> bind once, test against null.
pub(super) fn desugar_if_let(hir: &mut HirModule) -> RunResult<()> {
    let mut gensym = Gensym::new("il");
    walk_module(hir, &mut |expr| {
        if !matches!(expr, Expr::IfLet { .. }) {
            return Ok(());
        }
        let Expr::IfLet {
            name: bind,
            value,
            mut then,
            else_,
            span,
        } = take(expr)
        else {
            unreachable!()
        };
        let tmp = gensym.fresh();
        let cond = binary(BinOp::Ne, name(tmp.clone(), span), Expr::Null(span), span);
        then.stmts.insert(0, val(bind, name(tmp.clone(), span), span));
        *expr = expr_block(
            vec![
                val(tmp, *value, span),
                Stmt::Expr(Expr::If {
                    cond: Box::new(cond),
                    then,
                    else_,
                    span,
                }),
            ],
            span,
        );
        Ok(())
    })
}

/// `e?` -> evaluate once, return null early when null.
pub(super) fn desugar_try_postfix(hir: &mut HirModule) -> RunResult<()> {
    let mut gensym = Gensym::new("tp");
    walk_module(hir, &mut |expr| {
        if !matches!(expr, Expr::TryPostfix { .. }) {
            return Ok(());
        }
        let Expr::TryPostfix { operand, span } = take(expr) else {
            unreachable!()
        };
        let tmp = gensym.fresh();
        let cond = binary(BinOp::Eq, name(tmp.clone(), span), Expr::Null(span), span);
        *expr = expr_block(
            vec![
                val(tmp.clone(), *operand, span),
                Stmt::Expr(Expr::If {
                    cond: Box::new(cond),
                    then: Block {
                        stmts: vec![Stmt::Return { value: None, span }],
                    },
                    else_: None,
                    span,
                }),
                Stmt::Expr(name(tmp, span)),
            ],
            span,
        );
        Ok(())
    })
}

/// `use (val r = e) body` -> `val r = e; try body finally r.close()`.
pub(super) fn desugar_use(hir: &mut HirModule) -> RunResult<()> {
    walk_module_stmts(hir, &mut |stmt| {
        if !matches!(stmt, Stmt::Use { .. }) {
            return Ok(());
        }
        let Stmt::Use { name: bind, init, body, span } = mem::replace(stmt, Stmt::Break(Span::new(0, 0))) else {
            unreachable!()
        };
        let close = Stmt::CloseResource {
            resource: name(bind.clone(), span),
            span,
        };
        *stmt = Stmt::Expr(expr_block(
            vec![
                val(bind, init, span),
                Stmt::Try {
                    body,
                    catches: Vec::new(),
                    finally: Some(Block { stmts: vec![close] }),
                    span,
                },
            ],
            span,
        ));
        Ok(())
    })
}
