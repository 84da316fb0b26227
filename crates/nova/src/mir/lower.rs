//! Lowers resolved HIR into MIR control-flow graphs.
//!
//! Every expression result lands in a frame local (three-address form).
//! `&&`/`||` and branches become control flow; `try`/`catch`/`finally`
//! become handler-stack regions (`TryPush`/`TryPop`) with `EndFinally`
//! terminators resuming the pending action.

use ahash::AHashSet;

use super::{
    BinOp, BlockId, CaptureFrom, CatchArm, ClassKind, Const, FieldKind, FuncId, ImportSpec, Inst, Local, MirAnnotation,
    MirBlock, MirClass, MirCtorParam, MirFunction, MirLocal, MirModule, MirParam, Op, Terminator, UnOp,
};
use crate::{
    ast::{
        self, AssignTarget, BindPattern, Block, CallArg, ClassDecl, ClassMember, Expr, FnResolution, FunDecl,
        ImportKind, ImportSymbol, ResolvedSlot, Span, Stmt,
    },
    error::{CodeLoc, Error, RunResult},
    hir::HirModule,
};

/// Lowers a fully resolved HIR module to MIR.
///
/// # Errors
/// Returns `SyntaxError` for constructs that cannot be lowered (spread
/// outside list literals, `break` outside a loop, ...).
pub fn lower(hir: HirModule) -> RunResult<MirModule> {
    let mut module = ModuleBuilder {
        functions: Vec::new(),
        classes: Vec::new(),
        class_names: collect_class_names(&hir.stmts),
        file: hir.file.clone(),
    };
    let entry = lower_function(
        &mut module,
        "<main>".to_owned(),
        Vec::new(),
        &hir.entry_resolution,
        hir.stmts,
        true,
    )?;
    Ok(MirModule {
        file: module.file,
        functions: module.functions,
        classes: module.classes,
        entry,
    })
}

fn collect_class_names(stmts: &[Stmt]) -> AHashSet<String> {
    stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Class(decl) if decl.kind == ast::ClassKind::Class => Some(decl.name.clone()),
            _ => None,
        })
        .collect()
}

struct ModuleBuilder {
    functions: Vec<MirFunction>,
    classes: Vec<MirClass>,
    /// Top-level `class` names: calls to these lower to `NewObject`.
    class_names: AHashSet<String>,
    file: String,
}

struct LoopCtx {
    continue_target: BlockId,
    break_target: BlockId,
    handler_depth: u32,
}

struct FnBuilder<'m> {
    module: &'m mut ModuleBuilder,
    name: String,
    params: Vec<MirParam>,
    locals: Vec<MirLocal>,
    captures: Vec<CaptureFrom>,
    blocks: Vec<MirBlock>,
    current: BlockId,
    loops: Vec<LoopCtx>,
    handler_depth: u32,
    span: Span,
}

fn lower_function(
    module: &mut ModuleBuilder,
    name: String,
    params: Vec<MirParam>,
    resolution: &FnResolution,
    stmts: Vec<Stmt>,
    expr_body: bool,
) -> RunResult<FuncId> {
    let captured: AHashSet<u32> = resolution.captured.iter().copied().collect();
    let locals = resolution
        .local_names
        .iter()
        .enumerate()
        .map(|(i, local_name)| MirLocal {
            name: local_name.clone(),
            is_cell: captured.contains(&(i as u32)),
        })
        .collect();
    let captures = resolution
        .captures_from
        .iter()
        .map(|source| match source {
            ast::CaptureSource::Local(slot) => CaptureFrom::Local(*slot),
            ast::CaptureSource::Capture(idx) => CaptureFrom::Capture(*idx),
        })
        .collect();

    let mut builder = FnBuilder {
        module,
        name,
        params,
        locals,
        captures,
        blocks: Vec::new(),
        current: 0,
        loops: Vec::new(),
        handler_depth: 0,
        span: Span::new(1, 1),
    };
    let entry = builder.new_block();
    builder.current = entry;

    let result = builder.lower_stmts_value(stmts)?;
    let src = if expr_body { result } else { None };
    builder.terminate(Terminator::Return { src }, builder.span);

    let function = MirFunction {
        name: builder.name.clone(),
        params: std::mem::take(&mut builder.params),
        locals: std::mem::take(&mut builder.locals),
        captures: std::mem::take(&mut builder.captures),
        blocks: std::mem::take(&mut builder.blocks),
        expr_body,
    };
    let id = builder.module.functions.len() as FuncId;
    builder.module.functions.push(function);
    Ok(id)
}

impl FnBuilder<'_> {
    fn err(&self, span: Span, message: impl Into<String>) -> Error {
        Error::syntax(message).with_pos(CodeLoc::new(&self.module.file, span.line, span.column))
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len() as BlockId;
        self.blocks.push(MirBlock {
            insts: Vec::new(),
            terminator: Terminator::Unreachable,
            term_line: 0,
            term_column: 0,
        });
        id
    }

    fn temp(&mut self) -> Local {
        let slot = self.locals.len() as Local;
        self.locals.push(MirLocal {
            name: format!("$t{slot}"),
            is_cell: false,
        });
        slot
    }

    fn emit(&mut self, op: Op, span: Span) {
        self.blocks[self.current as usize].insts.push(Inst {
            op,
            line: span.line,
            column: span.column,
        });
    }

    fn terminate(&mut self, terminator: Terminator, span: Span) {
        let block = &mut self.blocks[self.current as usize];
        if matches!(block.terminator, Terminator::Unreachable) && block.term_line == 0 {
            block.terminator = terminator;
            block.term_line = span.line;
            block.term_column = span.column;
        }
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    fn const_into(&mut self, value: Const, span: Span) -> Local {
        let dst = self.temp();
        self.emit(Op::Const { dst, value }, span);
        dst
    }

    // --- statements ---

    /// Lowers a statement list, returning the trailing expression's local.
    fn lower_stmts_value(&mut self, stmts: Vec<Stmt>) -> RunResult<Option<Local>> {
        let mut result = None;
        let count = stmts.len();
        for (i, stmt) in stmts.into_iter().enumerate() {
            if i + 1 == count {
                if let Stmt::Expr(expr) = stmt {
                    result = Some(self.lower_expr(expr)?);
                    continue;
                }
            }
            self.lower_stmt(stmt)?;
            result = None;
        }
        Ok(result)
    }

    fn lower_block_value(&mut self, block: Block, span: Span) -> RunResult<Local> {
        match self.lower_stmts_value(block.stmts)? {
            Some(local) => Ok(local),
            None => Ok(self.const_into(Const::Null, span)),
        }
    }

    fn lower_stmt(&mut self, stmt: Stmt) -> RunResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::Val {
                pattern,
                init,
                span,
                slots,
                ..
            } => {
                let value = self.lower_expr(init)?;
                match pattern {
                    BindPattern::Name(name) => self.store_binding(&name, slots[0], value, span),
                    BindPattern::Tuple(names) => {
                        for (i, name) in names.iter().enumerate() {
                            let dst = self.temp();
                            self.emit(
                                Op::Destructure {
                                    dst,
                                    src: value,
                                    index: i as u32,
                                },
                                span,
                            );
                            self.store_binding(name, slots[i], dst, span)?;
                        }
                        Ok(())
                    }
                }
            }
            Stmt::Assign { target, op, value, span } => self.lower_assign(target, op, value, span),
            Stmt::CoalesceAssign { .. } | Stmt::Use { .. } => {
                unreachable!("desugared before MIR lowering")
            }
            Stmt::Fun(decl) => {
                let span = decl.span;
                let slot = decl.slot;
                let name = decl.name.clone();
                let receiver = decl.receiver.clone();
                let closure = self.lower_fun_decl(decl, false)?;
                if let Some(ty) = receiver {
                    self.emit(
                        Op::RegisterExt {
                            type_name: ty,
                            method: name.clone(),
                            func: closure,
                        },
                        span,
                    );
                }
                match slot {
                    Some(slot) => self.emit(Op::Copy { dst: slot, src: closure }, span),
                    None => self.emit(Op::StoreGlobal { name, src: closure }, span),
                }
                Ok(())
            }
            Stmt::Class(decl) => self.lower_class_decl(decl),
            Stmt::Import(decl) => {
                let spec = match decl.kind {
                    ImportKind::Module { path, symbol } => match symbol {
                        ImportSymbol::Named { name, alias } => ImportSpec::Named { path, name, alias },
                        ImportSymbol::Wildcard => ImportSpec::Wildcard { path },
                    },
                    ImportKind::Java { path, wildcard, alias } => ImportSpec::Java { path, wildcard, alias },
                    ImportKind::JavaStatic { path, alias } => ImportSpec::JavaStatic { path, alias },
                };
                self.emit(Op::Import { spec }, decl.span);
                Ok(())
            }
            Stmt::While { cond, body, span } => {
                let cond_block = self.new_block();
                let body_block = self.new_block();
                let join = self.new_block();
                self.terminate(Terminator::Jump { target: cond_block }, span);
                self.switch_to(cond_block);
                let cond_local = self.lower_expr(cond)?;
                self.terminate(
                    Terminator::CondJump {
                        cond: cond_local,
                        then_block: body_block,
                        else_block: join,
                    },
                    span,
                );
                self.switch_to(body_block);
                self.loops.push(LoopCtx {
                    continue_target: cond_block,
                    break_target: join,
                    handler_depth: self.handler_depth,
                });
                for stmt in body.stmts {
                    self.lower_stmt(stmt)?;
                }
                self.loops.pop();
                self.terminate(Terminator::Jump { target: cond_block }, span);
                self.switch_to(join);
                Ok(())
            }
            Stmt::DoWhile { body, cond, span } => {
                let body_block = self.new_block();
                let cond_block = self.new_block();
                let join = self.new_block();
                self.terminate(Terminator::Jump { target: body_block }, span);
                self.switch_to(body_block);
                self.loops.push(LoopCtx {
                    continue_target: cond_block,
                    break_target: join,
                    handler_depth: self.handler_depth,
                });
                for stmt in body.stmts {
                    self.lower_stmt(stmt)?;
                }
                self.loops.pop();
                self.terminate(Terminator::Jump { target: cond_block }, span);
                self.switch_to(cond_block);
                let cond_local = self.lower_expr(cond)?;
                self.terminate(
                    Terminator::CondJump {
                        cond: cond_local,
                        then_block: body_block,
                        else_block: join,
                    },
                    span,
                );
                self.switch_to(join);
                Ok(())
            }
            Stmt::For {
                pattern,
                iter,
                body,
                span,
                slots,
            } => {
                let subject = self.lower_expr(iter)?;
                let iter_local = self.temp();
                self.emit(
                    Op::IterNew {
                        dst: iter_local,
                        src: subject,
                    },
                    span,
                );
                let cond_block = self.new_block();
                let body_block = self.new_block();
                let join = self.new_block();
                self.terminate(Terminator::Jump { target: cond_block }, span);
                self.switch_to(cond_block);
                let has_next = self.temp();
                self.emit(
                    Op::IterHasNext {
                        dst: has_next,
                        iter: iter_local,
                    },
                    span,
                );
                self.terminate(
                    Terminator::CondJump {
                        cond: has_next,
                        then_block: body_block,
                        else_block: join,
                    },
                    span,
                );
                self.switch_to(body_block);
                let item = self.temp();
                self.emit(
                    Op::IterNext {
                        dst: item,
                        iter: iter_local,
                    },
                    span,
                );
                match &pattern {
                    BindPattern::Name(_) => {
                        self.emit(Op::Copy { dst: slots[0], src: item }, span);
                    }
                    BindPattern::Tuple(names) => {
                        for i in 0..names.len() {
                            let dst = slots[i];
                            self.emit(
                                Op::Destructure {
                                    dst,
                                    src: item,
                                    index: i as u32,
                                },
                                span,
                            );
                        }
                    }
                }
                self.loops.push(LoopCtx {
                    continue_target: cond_block,
                    break_target: join,
                    handler_depth: self.handler_depth,
                });
                for stmt in body.stmts {
                    self.lower_stmt(stmt)?;
                }
                self.loops.pop();
                self.terminate(Terminator::Jump { target: cond_block }, span);
                self.switch_to(join);
                Ok(())
            }
            Stmt::Return { value, span } => {
                let src = match value {
                    Some(value) => Some(self.lower_expr(value)?),
                    None => None,
                };
                self.terminate(Terminator::Return { src }, span);
                let dead = self.new_block();
                self.switch_to(dead);
                Ok(())
            }
            Stmt::Throw { value, span } => {
                let src = self.lower_expr(value)?;
                self.emit(Op::Throw { src }, span);
                self.terminate(Terminator::Unreachable, span);
                let dead = self.new_block();
                self.switch_to(dead);
                Ok(())
            }
            Stmt::Break(span) => {
                let ctx = self.loops.last().ok_or_else(|| self.err(span, "'break' outside a loop"))?;
                let (target, depth) = (ctx.break_target, ctx.handler_depth);
                if self.handler_depth > depth {
                    self.terminate(Terminator::ExitJump { target, depth }, span);
                } else {
                    self.terminate(Terminator::Jump { target }, span);
                }
                let dead = self.new_block();
                self.switch_to(dead);
                Ok(())
            }
            Stmt::Continue(span) => {
                let ctx = self
                    .loops
                    .last()
                    .ok_or_else(|| self.err(span, "'continue' outside a loop"))?;
                let (target, depth) = (ctx.continue_target, ctx.handler_depth);
                if self.handler_depth > depth {
                    self.terminate(Terminator::ExitJump { target, depth }, span);
                } else {
                    self.terminate(Terminator::Jump { target }, span);
                }
                let dead = self.new_block();
                self.switch_to(dead);
                Ok(())
            }
            Stmt::Try {
                body,
                catches,
                finally,
                span,
            } => {
                self.lower_try(body, catches, finally, span, None)?;
                Ok(())
            }
            Stmt::CloseResource { resource, span } => {
                let src = self.lower_expr(resource)?;
                self.emit(Op::CloseResource { src }, span);
                Ok(())
            }
        }
    }

    fn store_binding(&mut self, name: &str, slot: Option<u32>, value: Local, span: Span) -> RunResult<()> {
        match slot {
            Some(slot) => self.emit(Op::Copy { dst: slot, src: value }, span),
            None => self.emit(
                Op::StoreGlobal {
                    name: name.to_owned(),
                    src: value,
                },
                span,
            ),
        }
        Ok(())
    }

    fn lower_assign(&mut self, target: AssignTarget, op: Option<ast::BinOp>, value: Expr, span: Span) -> RunResult<()> {
        match target {
            AssignTarget::Name { name, slot, .. } => {
                let rhs = match op {
                    None => self.lower_expr(value)?,
                    Some(op) => {
                        let current = match slot {
                            Some(ResolvedSlot::Local(s)) => s,
                            Some(ResolvedSlot::Capture(c)) => {
                                let dst = self.temp();
                                self.emit(Op::LoadCapture { dst, index: c }, span);
                                dst
                            }
                            None => {
                                let dst = self.temp();
                                self.emit(Op::LoadGlobal { dst, name: name.clone() }, span);
                                dst
                            }
                        };
                        let rhs = self.lower_expr(value)?;
                        let dst = self.temp();
                        self.emit(
                            Op::Binary {
                                dst,
                                op: lower_binop(op),
                                lhs: current,
                                rhs,
                            },
                            span,
                        );
                        dst
                    }
                };
                match slot {
                    Some(ResolvedSlot::Local(s)) => self.emit(Op::Copy { dst: s, src: rhs }, span),
                    Some(ResolvedSlot::Capture(c)) => self.emit(Op::StoreCapture { index: c, src: rhs }, span),
                    None => self.emit(Op::StoreGlobal { name, src: rhs }, span),
                }
                Ok(())
            }
            AssignTarget::Field { recv, name, span: s } => {
                let obj = self.lower_expr(*recv)?;
                let rhs = match op {
                    None => self.lower_expr(value)?,
                    Some(op) => {
                        let current = self.temp();
                        self.emit(
                            Op::LoadField {
                                dst: current,
                                obj,
                                name: name.clone(),
                            },
                            s,
                        );
                        let rhs = self.lower_expr(value)?;
                        let dst = self.temp();
                        self.emit(
                            Op::Binary {
                                dst,
                                op: lower_binop(op),
                                lhs: current,
                                rhs,
                            },
                            s,
                        );
                        dst
                    }
                };
                self.emit(Op::StoreField { obj, name, src: rhs }, span);
                Ok(())
            }
            AssignTarget::Index { recv, index, span: s } => {
                let obj = self.lower_expr(*recv)?;
                let idx = self.lower_expr(*index)?;
                let rhs = match op {
                    None => self.lower_expr(value)?,
                    Some(op) => {
                        let current = self.temp();
                        self.emit(
                            Op::LoadIndex {
                                dst: current,
                                obj,
                                index: idx,
                            },
                            s,
                        );
                        let rhs = self.lower_expr(value)?;
                        let dst = self.temp();
                        self.emit(
                            Op::Binary {
                                dst,
                                op: lower_binop(op),
                                lhs: current,
                                rhs,
                            },
                            s,
                        );
                        dst
                    }
                };
                self.emit(Op::StoreIndex { obj, index: idx, src: rhs }, span);
                Ok(())
            }
        }
    }

    fn lower_try(
        &mut self,
        body: Block,
        catches: Vec<ast::CatchClause>,
        finally: Option<Block>,
        span: Span,
        result: Option<Local>,
    ) -> RunResult<()> {
        let join = self.new_block();
        let finally_block = match &finally {
            Some(_) => Some(self.new_block()),
            None => None,
        };
        let catch_blocks: Vec<BlockId> = catches.iter().map(|_| 0).collect();
        let mut catch_blocks = catch_blocks;
        for slot in &mut catch_blocks {
            *slot = self.new_block();
        }

        // The finally region wraps the catch region, so failures inside
        // catch bodies still run the finally block.
        if let Some(fb) = finally_block {
            self.emit(
                Op::TryPush {
                    catches: Vec::new(),
                    finally_block: Some(fb),
                },
                span,
            );
            self.handler_depth += 1;
        }
        if !catches.is_empty() {
            let arms = catches
                .iter()
                .zip(&catch_blocks)
                .map(|(clause, block)| CatchArm {
                    kind: clause.kind.clone(),
                    block: *block,
                })
                .collect();
            self.emit(
                Op::TryPush {
                    catches: arms,
                    finally_block: None,
                },
                span,
            );
            self.handler_depth += 1;
        }

        if let Some(result) = result {
            let value = self.lower_block_value(body, span)?;
            self.emit(Op::Copy { dst: result, src: value }, span);
        } else {
            for stmt in body.stmts {
                self.lower_stmt(stmt)?;
            }
        }
        if !catches.is_empty() {
            self.emit(Op::TryPop, span);
            self.handler_depth -= 1;
        }
        if let Some(fb) = finally_block {
            self.emit(Op::TryPop, span);
            self.handler_depth -= 1;
            self.terminate(Terminator::Jump { target: fb }, span);
        } else {
            self.terminate(Terminator::Jump { target: join }, span);
        }

        // Catch bodies run with only the finally entry active.
        for (clause, block) in catches.into_iter().zip(catch_blocks) {
            self.switch_to(block);
            self.emit(Op::CatchBind { dst: clause.slot }, clause.span);
            if let Some(result) = result {
                let value = self.lower_block_value(clause.body, clause.span)?;
                self.emit(Op::Copy { dst: result, src: value }, clause.span);
            } else {
                for stmt in clause.body.stmts {
                    self.lower_stmt(stmt)?;
                }
            }
            if let Some(fb) = finally_block {
                self.emit(Op::TryPop, clause.span);
                self.terminate(Terminator::Jump { target: fb }, clause.span);
            } else {
                self.terminate(Terminator::Jump { target: join }, clause.span);
            }
        }

        if let (Some(fb), Some(finally)) = (finally_block, finally) {
            self.switch_to(fb);
            for stmt in finally.stmts {
                self.lower_stmt(stmt)?;
            }
            self.terminate(Terminator::EndFinally { next: join }, span);
        }

        self.switch_to(join);
        Ok(())
    }

    // --- functions and classes ---

    /// Lowers a function declaration (or lambda) into a module function and
    /// emits `ClosureMake`, returning the closure's local.
    fn lower_fun_decl(&mut self, decl: FunDecl, is_method: bool) -> RunResult<Local> {
        let span = decl.span;
        let func = lower_callable(self.module, decl, is_method)?;
        let dst = self.temp();
        self.emit(Op::ClosureMake { dst, func }, span);
        Ok(dst)
    }

    fn lower_class_decl(&mut self, decl: ClassDecl) -> RunResult<()> {
        let span = decl.span;
        let class_name = decl.name.clone();
        let superclass = match &decl.superclass {
            Some(spec) => {
                let dst = self.temp();
                self.emit(
                    Op::LoadGlobal {
                        dst,
                        name: spec.name.clone(),
                    },
                    spec.span,
                );
                Some(dst)
            }
            None => None,
        };

        let mut ann_args = Vec::with_capacity(decl.annotations.len());
        let mut annotations = Vec::with_capacity(decl.annotations.len());
        for ann in &decl.annotations {
            let mut locals = Vec::with_capacity(ann.args.len());
            let mut names = Vec::with_capacity(ann.args.len());
            for arg in ann.args.clone() {
                names.push(arg.name.clone());
                locals.push(self.lower_expr(arg.value)?);
            }
            ann_args.push(locals);
            annotations.push(MirAnnotation {
                name: ann.name.clone(),
                arg_names: names,
            });
        }

        let statics: Vec<(String, Expr, Span)> = decl
            .members
            .iter()
            .filter_map(|member| match member {
                ClassMember::StaticField { name, init, span } => Some((name.clone(), init.clone(), *span)),
                _ => None,
            })
            .collect();

        let class_idx = lower_class(self.module, decl, annotations)?;
        let class_local = self.temp();
        self.emit(
            Op::DeclareClass {
                dst: class_local,
                class_idx,
                superclass,
                ann_args,
            },
            span,
        );
        for (name, init, field_span) in statics {
            let src = self.lower_expr(init)?;
            self.emit(
                Op::StoreStatic {
                    class: class_local,
                    name,
                    src,
                },
                field_span,
            );
        }
        self.emit(
            Op::StoreGlobal {
                name: class_name,
                src: class_local,
            },
            span,
        );
        self.emit(Op::FireProcessors { class: class_local }, span);
        Ok(())
    }

    // --- expressions ---

    fn lower_expr(&mut self, expr: Expr) -> RunResult<Local> {
        let span = expr.span();
        match expr {
            Expr::Null(_) => Ok(self.const_into(Const::Null, span)),
            Expr::Bool(v, _) => Ok(self.const_into(Const::Bool(v), span)),
            Expr::Int(v, _) => Ok(self.const_into(Const::Int(v), span)),
            Expr::Long(v, _) => Ok(self.const_into(Const::Long(v), span)),
            Expr::Double(v, _) => Ok(self.const_into(Const::Double(v), span)),
            Expr::CharLit(v, _) => Ok(self.const_into(Const::Char(v), span)),
            Expr::Str(v, _) => Ok(self.const_into(Const::Str(v), span)),
            Expr::Local(slot, _) => Ok(slot),
            Expr::Capture(index, _) => {
                let dst = self.temp();
                self.emit(Op::LoadCapture { dst, index }, span);
                Ok(dst)
            }
            Expr::Global(name, _) => {
                let dst = self.temp();
                self.emit(Op::LoadGlobal { dst, name }, span);
                Ok(dst)
            }
            Expr::Lambda(decl) => self.lower_fun_decl(*decl, false),
            Expr::Member { recv, name, .. } => {
                let obj = self.lower_expr(*recv)?;
                let dst = self.temp();
                self.emit(Op::LoadField { dst, obj, name }, span);
                Ok(dst)
            }
            Expr::Index { recv, index, .. } => {
                let obj = self.lower_expr(*recv)?;
                let idx = self.lower_expr(*index)?;
                let dst = self.temp();
                self.emit(Op::LoadIndex { dst, obj, index: idx }, span);
                Ok(dst)
            }
            Expr::Call { callee, args, .. } => self.lower_call(*callee, args, span),
            Expr::Unary { op, operand, .. } => {
                let operand = self.lower_expr(*operand)?;
                let dst = self.temp();
                let op = match op {
                    ast::UnOp::Neg => UnOp::Neg,
                    ast::UnOp::Not => UnOp::Not,
                };
                self.emit(Op::Unary { dst, op, operand }, span);
                Ok(dst)
            }
            Expr::Binary { op, lhs, rhs, .. } => match op {
                ast::BinOp::And | ast::BinOp::Or => self.lower_logical(op, *lhs, *rhs, span),
                _ => {
                    let lhs = self.lower_expr(*lhs)?;
                    let rhs = self.lower_expr(*rhs)?;
                    let dst = self.temp();
                    self.emit(
                        Op::Binary {
                            dst,
                            op: lower_binop(op),
                            lhs,
                            rhs,
                        },
                        span,
                    );
                    Ok(dst)
                }
            },
            Expr::Range {
                start,
                end,
                inclusive,
                down,
                step,
                ..
            } => {
                let start = self.lower_expr(*start)?;
                let end = self.lower_expr(*end)?;
                let step = match step {
                    Some(step) => Some(self.lower_expr(*step)?),
                    None => None,
                };
                let dst = self.temp();
                self.emit(
                    Op::RangeNew {
                        dst,
                        start,
                        end,
                        step,
                        inclusive,
                        down,
                    },
                    span,
                );
                Ok(dst)
            }
            Expr::PairOf { first, second, .. } => {
                let first = self.lower_expr(*first)?;
                let second = self.lower_expr(*second)?;
                let dst = self.temp();
                self.emit(Op::PairNew { dst, first, second }, span);
                Ok(dst)
            }
            Expr::If { cond, then, else_, .. } => {
                let cond_local = self.lower_expr(*cond)?;
                let then_block = self.new_block();
                let else_block = self.new_block();
                let join = self.new_block();
                let result = self.temp();
                self.terminate(
                    Terminator::CondJump {
                        cond: cond_local,
                        then_block,
                        else_block,
                    },
                    span,
                );
                self.switch_to(then_block);
                let then_value = self.lower_block_value(then, span)?;
                self.emit(Op::Copy { dst: result, src: then_value }, span);
                self.terminate(Terminator::Jump { target: join }, span);
                self.switch_to(else_block);
                match else_ {
                    Some(else_) => {
                        let else_value = self.lower_block_value(else_, span)?;
                        self.emit(Op::Copy { dst: result, src: else_value }, span);
                    }
                    None => {
                        let null = self.const_into(Const::Null, span);
                        self.emit(Op::Copy { dst: result, src: null }, span);
                    }
                }
                self.terminate(Terminator::Jump { target: join }, span);
                self.switch_to(join);
                Ok(result)
            }
            Expr::Is { operand, ty, negated, .. } => {
                let src = self.lower_expr(*operand)?;
                let dst = self.temp();
                self.emit(Op::TypeTest { dst, src, ty, negated }, span);
                Ok(dst)
            }
            Expr::Cast { operand, ty, safe, .. } => {
                let src = self.lower_expr(*operand)?;
                let dst = self.temp();
                self.emit(Op::Cast { dst, src, ty, safe }, span);
                Ok(dst)
            }
            Expr::ListLit { items, .. } => {
                let dst = self.temp();
                self.emit(Op::ListNew { dst }, span);
                for item in items {
                    let value = self.lower_expr(item.value)?;
                    if item.spread {
                        self.emit(Op::ListSpread { list: dst, items: value }, span);
                    } else {
                        self.emit(Op::ListPush { list: dst, item: value }, span);
                    }
                }
                Ok(dst)
            }
            Expr::ToStr { operand, .. } => {
                let src = self.lower_expr(*operand)?;
                let dst = self.temp();
                self.emit(Op::ToStr { dst, src }, span);
                Ok(dst)
            }
            Expr::Concat { lhs, rhs, .. } => {
                let lhs = self.lower_expr(*lhs)?;
                let rhs = self.lower_expr(*rhs)?;
                let dst = self.temp();
                self.emit(Op::Concat { dst, lhs, rhs }, span);
                Ok(dst)
            }
            Expr::BlockExpr { block, .. } => self.lower_block_value(block, span),
            Expr::TryCatch {
                body,
                catches,
                finally,
                ..
            } => {
                let result = self.temp();
                self.lower_try(body, catches, finally, span, Some(result))?;
                Ok(result)
            }
            Expr::Name(name, _) | Expr::CallableRef(name, _) => {
                // The resolver rewrites these; reaching here is a lowering bug.
                Err(self.err(span, format!("unresolved name '{name}' reached MIR lowering")))
            }
            Expr::Placeholder(_) => Err(self.err(span, "'_' is only allowed in call arguments")),
            Expr::Interp { .. }
            | Expr::When { .. }
            | Expr::CmpChain { .. }
            | Expr::Elvis { .. }
            | Expr::IfLet { .. }
            | Expr::TryPostfix { .. }
            | Expr::Pipeline { .. } => unreachable!("surface construct must be desugared before MIR lowering"),
        }
    }

    fn lower_logical(&mut self, op: ast::BinOp, lhs: Expr, rhs: Expr, span: Span) -> RunResult<Local> {
        let result = self.temp();
        let lhs_local = self.lower_expr(lhs)?;
        self.emit(Op::Copy { dst: result, src: lhs_local }, span);
        let rhs_block = self.new_block();
        let join = self.new_block();
        let (then_block, else_block) = match op {
            ast::BinOp::And => (rhs_block, join),
            ast::BinOp::Or => (join, rhs_block),
            _ => unreachable!(),
        };
        self.terminate(
            Terminator::CondJump {
                cond: lhs_local,
                then_block,
                else_block,
            },
            span,
        );
        self.switch_to(rhs_block);
        let rhs_local = self.lower_expr(rhs)?;
        self.emit(Op::Copy { dst: result, src: rhs_local }, span);
        self.terminate(Terminator::Jump { target: join }, span);
        self.switch_to(join);
        Ok(result)
    }

    fn lower_call(&mut self, callee: Expr, args: Vec<CallArg>, span: Span) -> RunResult<Local> {
        let mut arg_locals = Vec::with_capacity(args.len());
        let mut names = Vec::with_capacity(args.len());

        match callee {
            // Reserved marker for the superclass constructor call.
            Expr::Global(name, _) if name == "$super" => {
                for arg in args {
                    if arg.spread {
                        return Err(self.err(span, "spread arguments are only allowed in list literals"));
                    }
                    names.push(arg.name);
                    arg_locals.push(self.lower_expr(arg.value)?);
                }
                self.emit(
                    Op::SuperInit {
                        args: arg_locals,
                        names,
                    },
                    span,
                );
                Ok(self.const_into(Const::Null, span))
            }
            Expr::Member { recv, name, .. } => {
                let recv = self.lower_expr(*recv)?;
                for arg in args {
                    if arg.spread {
                        return Err(self.err(span, "spread arguments are only allowed in list literals"));
                    }
                    names.push(arg.name);
                    arg_locals.push(self.lower_expr(arg.value)?);
                }
                let dst = self.temp();
                self.emit(
                    Op::CallMethod {
                        dst,
                        recv,
                        name,
                        args: arg_locals,
                        names,
                    },
                    span,
                );
                Ok(dst)
            }
            Expr::Global(name, name_span) if self.module.class_names.contains(&name) => {
                let class = self.temp();
                self.emit(
                    Op::LoadGlobal {
                        dst: class,
                        name,
                    },
                    name_span,
                );
                for arg in args {
                    if arg.spread {
                        return Err(self.err(span, "spread arguments are only allowed in list literals"));
                    }
                    names.push(arg.name);
                    arg_locals.push(self.lower_expr(arg.value)?);
                }
                let dst = self.temp();
                self.emit(
                    Op::NewObject {
                        dst,
                        class,
                        args: arg_locals,
                        names,
                    },
                    span,
                );
                Ok(dst)
            }
            other => {
                let func = self.lower_expr(other)?;
                for arg in args {
                    if arg.spread {
                        return Err(self.err(span, "spread arguments are only allowed in list literals"));
                    }
                    names.push(arg.name);
                    arg_locals.push(self.lower_expr(arg.value)?);
                }
                let dst = self.temp();
                self.emit(
                    Op::Call {
                        dst,
                        func,
                        args: arg_locals,
                        names,
                    },
                    span,
                );
                Ok(dst)
            }
        }
    }
}

fn lower_binop(op: ast::BinOp) -> BinOp {
    match op {
        ast::BinOp::Add => BinOp::Add,
        ast::BinOp::Sub => BinOp::Sub,
        ast::BinOp::Mul => BinOp::Mul,
        ast::BinOp::Div => BinOp::Div,
        ast::BinOp::Rem => BinOp::Rem,
        ast::BinOp::Eq => BinOp::Eq,
        ast::BinOp::Ne => BinOp::Ne,
        ast::BinOp::Lt => BinOp::Lt,
        ast::BinOp::Le => BinOp::Le,
        ast::BinOp::Gt => BinOp::Gt,
        ast::BinOp::Ge => BinOp::Ge,
        ast::BinOp::In => BinOp::In,
        ast::BinOp::NotIn => BinOp::NotIn,
        ast::BinOp::And | ast::BinOp::Or => unreachable!("short-circuit ops lower to control flow"),
    }
}

/// Lowers a function/lambda/method declaration into a module function,
/// including the parameter-default prelude.
fn lower_callable(module: &mut ModuleBuilder, decl: FunDecl, is_method: bool) -> RunResult<FuncId> {
    let mut params = Vec::new();
    if is_method {
        params.push(MirParam {
            name: "this".to_owned(),
            has_default: false,
        });
    }
    for param in &decl.params {
        params.push(MirParam {
            name: param.name.clone(),
            has_default: param.default.is_some(),
        });
    }

    // Prepend the default-completion prelude as synthetic statements: each
    // defaulted parameter gets `if (p == undefined) p = <default>`.
    let mut stmts = Vec::with_capacity(decl.body.stmts.len() + decl.params.len());
    let param_base = u32::from(is_method);
    for (i, param) in decl.params.into_iter().enumerate() {
        if let Some(default) = param.default {
            stmts.push(default_completion(param_base + i as u32, default, decl.span));
        }
    }
    stmts.extend(decl.body.stmts);

    lower_function(module, decl.name, params, &decl.resolution, stmts, decl.expr_body)
}

/// Synthesizes `if (param#slot is undefined) param = default` as HIR.
///
/// The undefined test cannot be written in source; lowering recognizes the
/// marker statement shape and emits the check directly.
fn default_completion(slot: u32, default: Expr, span: Span) -> Stmt {
    Stmt::Expr(Expr::BlockExpr {
        block: Block {
            stmts: vec![Stmt::Expr(Expr::If {
                cond: Box::new(Expr::Is {
                    operand: Box::new(Expr::Local(slot, span)),
                    ty: "Undefined".to_owned(),
                    negated: false,
                    span,
                }),
                then: Block {
                    stmts: vec![Stmt::Assign {
                        target: AssignTarget::Name {
                            name: String::new(),
                            span,
                            slot: Some(ResolvedSlot::Local(slot)),
                        },
                        op: None,
                        value: default,
                        span,
                    }],
                },
                else_: None,
                span,
            })],
        },
        span,
    })
}

fn lower_class(module: &mut ModuleBuilder, decl: ClassDecl, annotations: Vec<MirAnnotation>) -> RunResult<u32> {
    let kind = match decl.kind {
        ast::ClassKind::Class => ClassKind::Class,
        ast::ClassKind::Interface => ClassKind::Interface,
        ast::ClassKind::Object => ClassKind::Object,
        ast::ClassKind::Annotation => ClassKind::Annotation,
    };

    let ctor_params: Vec<MirCtorParam> = decl
        .ctor_params
        .iter()
        .map(|param| MirCtorParam {
            name: param.name.clone(),
            binding: match param.binding {
                ast::FieldBinding::Val => FieldKind::Val,
                ast::FieldBinding::Var => FieldKind::Var,
                ast::FieldBinding::None => FieldKind::None,
            },
            is_private: param.is_private,
            has_default: param.default.is_some(),
        })
        .collect();

    let mut field_names = Vec::new();
    let mut private_fields = Vec::new();
    for param in &decl.ctor_params {
        if param.binding != ast::FieldBinding::None {
            if param.is_private {
                private_fields.push(param.name.clone());
            } else {
                field_names.push(param.name.clone());
            }
        }
    }

    let mut methods = Vec::new();
    let mut static_methods = Vec::new();
    let mut init_stmts: Vec<Stmt> = Vec::new();

    // Parameter defaults, then the super call, then field assignment, then
    // body initializers, in declaration order.
    for (i, param) in decl.ctor_params.iter().enumerate() {
        if let Some(default) = param.default.clone() {
            init_stmts.push(default_completion(1 + i as u32, default, decl.span));
        }
    }
    if let Some(superclass) = decl.superclass.clone() {
        init_stmts.push(super_init_marker(superclass.args, superclass.span));
    }
    for (i, param) in decl.ctor_params.iter().enumerate() {
        if param.binding != ast::FieldBinding::None {
            init_stmts.push(Stmt::Assign {
                target: AssignTarget::Field {
                    recv: Box::new(Expr::Local(0, decl.span)),
                    name: param.name.clone(),
                    span: decl.span,
                },
                op: None,
                value: Expr::Local(1 + i as u32, decl.span),
                span: decl.span,
            });
        }
    }

    for member in decl.members {
        match member {
            ClassMember::Method(method) => {
                let name = method.name.clone();
                let func = lower_callable(module, method, true)?;
                methods.push((name, func));
            }
            ClassMember::StaticMethod(method) => {
                let name = method.name.clone();
                let func = lower_callable(module, method, false)?;
                static_methods.push((name, func));
            }
            ClassMember::Field {
                name,
                is_private,
                init,
                span,
                ..
            } => {
                if is_private {
                    private_fields.push(name.clone());
                } else {
                    field_names.push(name.clone());
                }
                init_stmts.push(Stmt::Assign {
                    target: AssignTarget::Field {
                        recv: Box::new(Expr::Local(0, span)),
                        name,
                        span,
                    },
                    op: None,
                    value: init,
                    span,
                });
            }
            ClassMember::Init(stmt) => init_stmts.push(stmt),
            ClassMember::StaticField { .. } => {} // lowered after DeclareClass
        }
    }

    let init = if init_stmts.is_empty() && ctor_params.is_empty() {
        None
    } else {
        let mut params = vec![MirParam {
            name: "this".to_owned(),
            has_default: false,
        }];
        for param in &ctor_params {
            params.push(MirParam {
                name: param.name.clone(),
                has_default: param.has_default,
            });
        }
        Some(lower_function(
            module,
            format!("{}.<init>", decl.name),
            params,
            &decl.init_resolution,
            init_stmts,
            false,
        )?)
    };

    let class = MirClass {
        name: decl.name,
        kind,
        is_open: decl.is_open,
        ctor_params,
        init,
        methods,
        static_methods,
        field_names,
        private_fields,
        interfaces: decl.interfaces,
        annotations,
    };
    let idx = module.classes.len() as u32;
    module.classes.push(class);
    Ok(idx)
}

/// The super call is a marker statement recognized by `lower_stmt` via a
/// dedicated expression shape; represented as a call to the reserved global
/// `$super` so it flows through the normal lowering machinery.
fn super_init_marker(args: Vec<CallArg>, span: Span) -> Stmt {
    Stmt::Expr(Expr::Call {
        callee: Box::new(Expr::Global("$super".to_owned(), span)),
        args,
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hir, parse::parse};

    fn lower_source(source: &str) -> MirModule {
        let ast = parse(source, "t.nova").unwrap();
        let hir = hir::lower(ast, "t.nova").unwrap();
        lower(hir).unwrap()
    }

    #[test]
    fn entry_returns_trailing_expression() {
        let module = lower_source("1 + 2");
        let entry = &module.functions[module.entry as usize];
        let last = &entry.blocks[0];
        assert!(matches!(last.terminator, Terminator::Return { src: Some(_) }));
    }

    #[test]
    fn while_loop_has_back_edge() {
        let module = lower_source("var i = 0\nwhile (i < 3) { i = i + 1 }");
        let entry = &module.functions[module.entry as usize];
        // The body block jumps back to the condition block (a lower id).
        let has_back_edge = entry.blocks.iter().enumerate().any(|(id, block)| {
            matches!(block.terminator, Terminator::Jump { target } if (target as usize) < id)
        });
        assert!(has_back_edge, "expected a loop back-edge");
    }

    #[test]
    fn short_circuit_becomes_control_flow() {
        let module = lower_source("val a = true\na && false");
        let entry = &module.functions[module.entry as usize];
        let has_binary_and = entry
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .any(|inst| matches!(inst.op, Op::Binary { .. }));
        assert!(!has_binary_and, "&& must not lower to a Binary instruction");
        assert!(entry.blocks.len() >= 3);
    }

    #[test]
    fn try_finally_shape() {
        let module = lower_source("try { 1 } finally { 2 }");
        let entry = &module.functions[module.entry as usize];
        let pushes = entry
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| matches!(i.op, Op::TryPush { .. }))
            .count();
        assert_eq!(pushes, 1);
        let has_end_finally = entry
            .blocks
            .iter()
            .any(|b| matches!(b.terminator, Terminator::EndFinally { .. }));
        assert!(has_end_finally);
    }

    #[test]
    fn class_lowering_registers_metadata() {
        let module = lower_source("@data class V(val x: Int, val y: Int)");
        assert_eq!(module.classes.len(), 1);
        let class = &module.classes[0];
        assert_eq!(class.name, "V");
        assert_eq!(class.annotations[0].name, "data");
        assert_eq!(class.ctor_params.len(), 2);
        assert!(class.init.is_some());
    }

    #[test]
    fn lambda_captures_lower_to_cells() {
        let module = lower_source("fun counter() { var n = 0\nreturn { n = n + 1 } }");
        let counter = module.functions.iter().find(|f| f.name == "counter").unwrap();
        assert!(counter.locals.iter().any(|l| l.is_cell), "captured var must be a cell");
        let lambda = module.functions.iter().find(|f| f.name == "<lambda>").unwrap();
        assert!(!lambda.captures.is_empty());
    }
}
