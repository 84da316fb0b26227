//! The MIR interpreter.
//!
//! Each call executes one [`MirFunction`] with a frame owning locals, a
//! handler stack for protected regions, and a pending-action register that
//! threads control through `finally` blocks. Dispatch is a dense match over
//! instructions. Cooperative checkpoints run at loop back-edges (jumps to an
//! earlier block) and before every suspension point.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    annotations::{ClassTarget, Processor, Registry},
    builtins,
    concurrency::{Dispatcher, TaskHandle, TaskKind, TaskScope, WaitCx},
    error::{CodeLoc, Error, RunResult},
    host::{HostInterop, NoHostInterop},
    io::{PrintWriter, StdPrint},
    loader::{self, BeginLoad, ModuleBindings, ModuleCache},
    mir::{
        BinOp, BlockId, CaptureFrom, CatchArm, ClassKind, Const, FuncId, ImportSpec, MirClass, MirFunction, MirModule,
        Op, Terminator, UnOp,
    },
    modules,
    security::{LimitTracker, SecurityPolicy},
    types::{
        self,
        class::{ClassAnnotation, ClassDef, ObjectInner},
    },
    value::{CellRef, FunctionKind, FunctionValue, Number, RangeValue, UserFunction, Value, ValueIter},
};

/// State shared by every VM (main evaluation and spawned tasks) of one
/// interpreter.
#[derive(Debug)]
pub struct EngineShared {
    pub modules: ModuleCache,
    pub registry: Arc<Registry>,
    /// Extension-function dispatch table: `(type name, method)` -> function.
    pub ext_methods: Mutex<AHashMap<(String, String), Value>>,
    pub policy: Mutex<SecurityPolicy>,
    pub stdout: Mutex<Arc<Mutex<dyn PrintWriter>>>,
    pub host: Mutex<Arc<dyn HostInterop>>,
    pub root_scope: Arc<TaskScope>,
    pub base_path: Mutex<Option<PathBuf>>,
    pub cli_args: Mutex<Vec<String>>,
    pub live_tasks: AtomicUsize,
    /// Packages from `import java fq.*`, consulted lazily on name misses.
    pub lazy_java_packages: Mutex<Vec<String>>,
}

impl EngineShared {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Registry::default());
        let _handles = Registry::with_builtins(&registry);
        Arc::new(Self {
            modules: ModuleCache::default(),
            registry,
            ext_methods: Mutex::new(AHashMap::new()),
            policy: Mutex::new(SecurityPolicy::standard()),
            stdout: Mutex::new(Arc::new(Mutex::new(StdPrint))),
            host: Mutex::new(Arc::new(NoHostInterop)),
            root_scope: TaskScope::root(Dispatcher::Default),
            base_path: Mutex::new(None),
            cli_args: Mutex::new(Vec::new()),
            live_tasks: AtomicUsize::new(0),
            lazy_java_packages: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn root_scope(&self) -> &Arc<TaskScope> {
        &self.root_scope
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

/// Compiles source through the whole front half of the pipeline.
pub(crate) fn compile(source: &str, file: &str) -> RunResult<Arc<MirModule>> {
    let ast = crate::parse::parse(source, file)?;
    let hir = crate::hir::lower(ast, file)?;
    let mut module = crate::mir::lower::lower(hir)?;
    crate::mir::passes::optimize(&mut module);
    Ok(Arc::new(module))
}

// --- frames ---

#[derive(Debug)]
enum Slot {
    Plain(Value),
    Cell(CellRef),
}

#[derive(Debug)]
enum Handler {
    Catch(Vec<CatchArm>),
    Finally(BlockId),
}

#[derive(Debug)]
enum Pending {
    Jump { target: BlockId, depth: u32 },
    Return(Value),
    Raise(Error),
}

struct Frame {
    locals: Vec<Slot>,
    handlers: Vec<Handler>,
    pending: Option<Pending>,
    cur_exc: Option<Error>,
}

impl Frame {
    fn get(&self, slot: u32) -> Value {
        match &self.locals[slot as usize] {
            Slot::Plain(value) => value.clone(),
            Slot::Cell(cell) => cell.lock().expect("cell lock").clone(),
        }
    }

    fn set(&mut self, slot: u32, value: Value) {
        match &mut self.locals[slot as usize] {
            Slot::Plain(current) => *current = value,
            Slot::Cell(cell) => *cell.lock().expect("cell lock") = value,
        }
    }

    fn cell(&self, slot: u32) -> RunResult<CellRef> {
        match &self.locals[slot as usize] {
            Slot::Cell(cell) => Ok(Arc::clone(cell)),
            Slot::Plain(_) => Err(Error::type_error("captured variable is not a cell")),
        }
    }
}

/// What the in-frame control logic decided to do next.
enum Flow {
    Goto(BlockId),
    Finished(Value),
    Propagate(Error),
}

/// Return path: discard catch regions, run finally regions, then finish.
fn do_return(frame: &mut Frame, value: Value) -> Flow {
    while let Some(handler) = frame.handlers.pop() {
        match handler {
            Handler::Catch(_) => {}
            Handler::Finally(finally_block) => {
                frame.pending = Some(Pending::Return(value));
                return Flow::Goto(finally_block);
            }
        }
    }
    Flow::Finished(value)
}

/// `break`/`continue` crossing protected regions.
fn do_exit_jump(frame: &mut Frame, target: BlockId, depth: u32) -> Flow {
    while frame.handlers.len() as u32 > depth {
        match frame.handlers.pop().expect("handler underflow") {
            Handler::Catch(_) => {}
            Handler::Finally(finally_block) => {
                frame.pending = Some(Pending::Jump { target, depth });
                return Flow::Goto(finally_block);
            }
        }
    }
    Flow::Goto(target)
}

/// Exception path: find a matching catch arm, running finallys on the way
/// out; propagate past the frame when nothing matches.
fn unwind(frame: &mut Frame, error: Error) -> Flow {
    while let Some(handler) = frame.handlers.pop() {
        match handler {
            Handler::Catch(arms) => {
                let kind_name = error.kind().to_string();
                if let Some(arm) = arms
                    .iter()
                    .find(|arm| arm.kind.as_deref().is_none_or(|k| k == kind_name))
                {
                    frame.cur_exc = Some(error);
                    return Flow::Goto(arm.block);
                }
            }
            Handler::Finally(finally_block) => {
                frame.pending = Some(Pending::Raise(error));
                return Flow::Goto(finally_block);
            }
        }
    }
    Flow::Propagate(error)
}

/// One executing task: the interpreter state for a single host thread.
pub struct Vm {
    shared: Arc<EngineShared>,
    scope: Arc<TaskScope>,
    cancel: Arc<AtomicBool>,
    limits: LimitTracker,
    deadline: Option<Instant>,
}

impl Vm {
    #[must_use]
    pub fn new(shared: Arc<EngineShared>, scope: Arc<TaskScope>, cancel: Arc<AtomicBool>) -> Self {
        let policy = shared.policy.lock().expect("policy lock").clone();
        let deadline = (policy.max_execution_time_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(policy.max_execution_time_ms));
        Self {
            shared,
            scope,
            cancel,
            limits: LimitTracker::new(&policy),
            deadline,
        }
    }

    #[must_use]
    pub fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    #[must_use]
    pub fn scope(&self) -> &Arc<TaskScope> {
        &self.scope
    }

    #[must_use]
    pub fn policy(&self) -> SecurityPolicy {
        self.shared.policy.lock().expect("policy lock").clone()
    }

    #[must_use]
    pub fn wait_cx(&self) -> WaitCx {
        WaitCx {
            cancel: Arc::clone(&self.cancel),
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn eval_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn write_stdout(&self, text: &str, newline: bool) {
        let writer = Arc::clone(&self.shared.stdout.lock().expect("stdout slot lock"));
        let mut writer = writer.lock().expect("stdout writer lock");
        writer.write(text);
        if newline {
            writer.newline();
        }
    }

    /// Strict boolean conditions.
    pub fn truthy(&self, value: &Value) -> RunResult<bool> {
        match value {
            Value::Bool(v) => Ok(*v),
            other => Err(Error::type_error(format!(
                "condition must be a Bool, got {}",
                other.type_name()
            ))),
        }
    }

    fn checkpoint(&mut self) -> RunResult<()> {
        if self.cancel.load(Ordering::Acquire) || self.scope.cancel_flag().load(Ordering::Acquire) {
            return Err(Error::cancelled("task was cancelled"));
        }
        self.limits.on_back_edge()
    }

    /// Runs a compiled module's entry function against the given globals.
    pub fn exec_module(&mut self, code: &Arc<MirModule>, globals: &Arc<ModuleBindings>) -> RunResult<Value> {
        self.exec_function(code, code.entry, globals, &[], Vec::new(), None)
    }

    // --- the interpreter loop ---

    fn exec_function(
        &mut self,
        code: &Arc<MirModule>,
        func: FuncId,
        globals: &Arc<ModuleBindings>,
        captures: &[CellRef],
        bound: Vec<Value>,
        owner: Option<Arc<ClassDef>>,
    ) -> RunResult<Value> {
        self.limits.enter_call()?;
        let result = self.exec_function_inner(code, func, globals, captures, bound, owner);
        self.limits.leave_call();
        result
    }

    fn exec_function_inner(
        &mut self,
        code: &Arc<MirModule>,
        func: FuncId,
        globals: &Arc<ModuleBindings>,
        captures: &[CellRef],
        bound: Vec<Value>,
        owner: Option<Arc<ClassDef>>,
    ) -> RunResult<Value> {
        let function = &code.functions[func as usize];
        let mut locals = Vec::with_capacity(function.locals.len());
        for (i, decl) in function.locals.iter().enumerate() {
            let initial = bound.get(i).cloned().unwrap_or(Value::Undefined);
            locals.push(if decl.is_cell {
                Slot::Cell(Arc::new(Mutex::new(initial)))
            } else {
                Slot::Plain(initial)
            });
        }
        let mut frame = Frame {
            locals,
            handlers: Vec::new(),
            pending: None,
            cur_exc: None,
        };

        let mut block = 0u32;
        loop {
            let mut raised: Option<Error> = None;
            let inst_count = function.blocks[block as usize].insts.len();
            for i in 0..inst_count {
                let inst = &code.functions[func as usize].blocks[block as usize].insts[i];
                let (line, column) = (inst.line, inst.column);
                let op = inst.op.clone();
                if let Err(error) = self.step(&op, code, globals, captures, &mut frame, owner.as_ref()) {
                    raised = Some(error.with_pos(CodeLoc::new(&code.file, line, column)));
                    break;
                }
            }
            let flow = match raised {
                Some(error) => unwind(&mut frame, error),
                None => {
                    let blk = &function.blocks[block as usize];
                    let term_pos = CodeLoc::new(&code.file, blk.term_line, blk.term_column);
                    match self.terminator(&blk.terminator.clone(), block, &mut frame) {
                        Ok(flow) => flow,
                        Err(error) => unwind(&mut frame, error.with_pos(term_pos)),
                    }
                }
            };
            match flow {
                Flow::Goto(next) => block = next,
                Flow::Finished(value) => return Ok(value),
                Flow::Propagate(error) => return Err(error),
            }
        }
    }

    fn terminator(&mut self, terminator: &Terminator, current: BlockId, frame: &mut Frame) -> RunResult<Flow> {
        match terminator {
            Terminator::Jump { target } => {
                if *target <= current {
                    self.checkpoint()?;
                }
                Ok(Flow::Goto(*target))
            }
            Terminator::CondJump {
                cond,
                then_block,
                else_block,
            } => {
                let value = frame.get(*cond);
                let target = if self.truthy(&value)? { *then_block } else { *else_block };
                if target <= current {
                    self.checkpoint()?;
                }
                Ok(Flow::Goto(target))
            }
            Terminator::Switch { disc, cases, default } => {
                let value = frame.get(*disc);
                for (constant, target) in cases {
                    if const_value(constant) == value {
                        return Ok(Flow::Goto(*target));
                    }
                }
                Ok(Flow::Goto(*default))
            }
            Terminator::Return { src } => {
                let value = src.map_or(Value::Null, |s| frame.get(s));
                Ok(do_return(frame, value))
            }
            Terminator::EndFinally { next } => match frame.pending.take() {
                None => Ok(Flow::Goto(*next)),
                Some(Pending::Return(value)) => Ok(do_return(frame, value)),
                Some(Pending::Raise(error)) => Ok(unwind(frame, error)),
                Some(Pending::Jump { target, depth }) => Ok(do_exit_jump(frame, target, depth)),
            },
            Terminator::ExitJump { target, depth } => {
                if *target <= current {
                    self.checkpoint()?;
                }
                Ok(do_exit_jump(frame, *target, *depth))
            }
            Terminator::Unreachable => Err(Error::type_error("internal error: unreachable block executed")),
        }
    }

    // --- instruction dispatch ---

    #[expect(clippy::too_many_lines, reason = "dense opcode dispatch stays in one match")]
    fn step(
        &mut self,
        op: &Op,
        code: &Arc<MirModule>,
        globals: &Arc<ModuleBindings>,
        captures: &[CellRef],
        frame: &mut Frame,
        owner: Option<&Arc<ClassDef>>,
    ) -> RunResult<()> {
        match op {
            Op::Const { dst, value } => frame.set(*dst, const_value(value)),
            Op::Copy { dst, src } => {
                let value = frame.get(*src);
                frame.set(*dst, value);
            }
            Op::LoadCapture { dst, index } => {
                let value = captures[*index as usize].lock().expect("cell lock").clone();
                frame.set(*dst, value);
            }
            Op::StoreCapture { index, src } => {
                let value = frame.get(*src);
                *captures[*index as usize].lock().expect("cell lock") = value;
            }
            Op::LoadGlobal { dst, name } => {
                let value = self.load_global(globals, name)?;
                frame.set(*dst, value);
            }
            Op::StoreGlobal { name, src } => globals.set(name, frame.get(*src)),
            Op::LoadField { dst, obj, name } => {
                let recv = frame.get(*obj);
                let value = self.member_get(&recv, name, owner)?;
                frame.set(*dst, value);
            }
            Op::StoreField { obj, name, src } => {
                let recv = frame.get(*obj);
                let value = frame.get(*src);
                self.member_set(&recv, name, value, owner)?;
            }
            Op::LoadStatic { dst, class, name } => {
                let recv = frame.get(*class);
                let Value::Class(class) = recv else {
                    return Err(Error::type_error("static access on a non-class value"));
                };
                let value = class
                    .static_field(name)
                    .ok_or_else(|| Error::name(format!("class {} has no static field '{name}'", class.name)))?;
                frame.set(*dst, value);
            }
            Op::StoreStatic { class, name, src } => {
                let recv = frame.get(*class);
                let Value::Class(class) = recv else {
                    return Err(Error::type_error("static access on a non-class value"));
                };
                class.set_static_field(name, frame.get(*src));
            }
            Op::LoadIndex { dst, obj, index } => {
                let recv = frame.get(*obj);
                let idx = frame.get(*index);
                let value = self.index_get(&recv, &idx)?;
                frame.set(*dst, value);
            }
            Op::StoreIndex { obj, index, src } => {
                let recv = frame.get(*obj);
                let idx = frame.get(*index);
                let value = frame.get(*src);
                self.index_set(&recv, &idx, value)?;
            }
            Op::Binary { dst, op, lhs, rhs } => {
                let a = frame.get(*lhs);
                let b = frame.get(*rhs);
                let value = self.binary_op(*op, &a, &b)?;
                frame.set(*dst, value);
            }
            Op::Unary { dst, op, operand } => {
                let value = frame.get(*operand);
                let result = match (op, &value) {
                    (UnOp::Neg, Value::Int(v)) => Value::Int(v.wrapping_neg()),
                    (UnOp::Neg, Value::Long(v)) => Value::Long(v.wrapping_neg()),
                    (UnOp::Neg, Value::Double(v)) => Value::Double(-v),
                    (UnOp::Neg, Value::Object(_)) => self.call_method(&value, "unaryMinus", Vec::new(), &[])?,
                    (UnOp::Not, Value::Bool(v)) => Value::Bool(!v),
                    (op, other) => {
                        return Err(Error::type_error(format!(
                            "cannot apply {op} to {}",
                            other.type_name()
                        )));
                    }
                };
                frame.set(*dst, result);
            }
            Op::Call { dst, func, args, names } => {
                let callee = frame.get(*func);
                let arg_values: Vec<Value> = args.iter().map(|a| frame.get(*a)).collect();
                let value = self.call_value_named(&callee, arg_values, names)?;
                frame.set(*dst, value);
            }
            Op::CallMethod {
                dst,
                recv,
                name,
                args,
                names,
            } => {
                let receiver = frame.get(*recv);
                let arg_values: Vec<Value> = args.iter().map(|a| frame.get(*a)).collect();
                let value = self.call_method(&receiver, name, arg_values, names)?;
                frame.set(*dst, value);
            }
            Op::NewObject { dst, class, args, names } => {
                let callee = frame.get(*class);
                let Value::Class(class) = callee else {
                    return Err(Error::type_error(format!(
                        "'{}' is not a class",
                        callee.type_name()
                    )));
                };
                let arg_values: Vec<Value> = args.iter().map(|a| frame.get(*a)).collect();
                let value = self.instantiate_class(&class, arg_values, names)?;
                frame.set(*dst, value);
            }
            Op::SuperInit { args, names } => {
                let class = owner.ok_or_else(|| Error::type_error("super call outside a constructor"))?;
                let this = frame.get(0);
                let arg_values: Vec<Value> = args.iter().map(|a| frame.get(*a)).collect();
                match &class.superclass {
                    Some(Value::Class(superclass)) => {
                        self.run_init(superclass, &this, arg_values, names)?;
                    }
                    Some(Value::ExternalObject(_)) | None => {
                        // Host-backed superclasses construct lazily through
                        // the interop boundary; nothing to run here.
                    }
                    Some(other) => {
                        return Err(Error::type_error(format!(
                            "superclass is not a class ({})",
                            other.type_name()
                        )));
                    }
                }
            }
            Op::ClosureMake { dst, func } => {
                let target = &code.functions[*func as usize];
                let mut cells = Vec::with_capacity(target.captures.len());
                for capture in &target.captures {
                    cells.push(match capture {
                        CaptureFrom::Local(slot) => frame.cell(*slot)?,
                        CaptureFrom::Capture(idx) => Arc::clone(&captures[*idx as usize]),
                    });
                }
                let value = Value::Function(Arc::new(FunctionValue {
                    name: target.name.clone(),
                    kind: FunctionKind::User(UserFunction {
                        code: Arc::clone(code),
                        func: *func,
                        globals: Arc::clone(globals),
                        captures: cells,
                    }),
                }));
                frame.set(*dst, value);
            }
            Op::ListNew { dst } => frame.set(*dst, Value::list(Vec::new())),
            Op::ListPush { list, item } => {
                let target = frame.get(*list);
                let Value::List(items) = target else {
                    return Err(Error::type_error("list literal target is not a list"));
                };
                items.lock().expect("list lock").push(frame.get(*item));
            }
            Op::ListSpread { list, items } => {
                let target = frame.get(*list);
                let Value::List(out) = target else {
                    return Err(Error::type_error("list literal target is not a list"));
                };
                let spread = frame.get(*items);
                let mut iter = self.make_iter(&spread)?;
                while let Some(item) = self.iter_next_opt(&mut iter)? {
                    out.lock().expect("list lock").push(item);
                }
            }
            Op::RangeNew {
                dst,
                start,
                end,
                step,
                inclusive,
                down,
            } => {
                let start = int_operand(&frame.get(*start), "range start")?;
                let end = int_operand(&frame.get(*end), "range end")?;
                let step_value = match step {
                    Some(step) => int_operand(&frame.get(*step), "range step")?,
                    None => 1,
                };
                if step_value == 0 {
                    return Err(Error::type_error("range step must not be zero"));
                }
                let step_value = if *down { -step_value.abs() } else { step_value.abs() };
                frame.set(
                    *dst,
                    Value::Range(Arc::new(RangeValue {
                        start,
                        end,
                        step: step_value,
                        inclusive: *inclusive,
                    })),
                );
            }
            Op::PairNew { dst, first, second } => {
                let value = Value::pair(frame.get(*first), frame.get(*second));
                frame.set(*dst, value);
            }
            Op::Cast { dst, src, ty, safe } => {
                let value = frame.get(*src);
                if type_matches(&value, ty) {
                    frame.set(*dst, value);
                } else if *safe {
                    frame.set(*dst, Value::Null);
                } else {
                    return Err(Error::cast(format!("cannot cast {} to {ty}", value.type_name())));
                }
            }
            Op::TypeTest { dst, src, ty, negated } => {
                let value = frame.get(*src);
                let matched = type_matches(&value, ty);
                frame.set(*dst, Value::Bool(matched != *negated));
            }
            Op::ToStr { dst, src } => {
                let value = frame.get(*src);
                let text = self.to_display(&value)?;
                frame.set(*dst, Value::from_string(text));
            }
            Op::Concat { dst, lhs, rhs } => {
                let a = frame.get(*lhs);
                let b = frame.get(*rhs);
                let mut text = match &a {
                    Value::Str(s) => s.to_string(),
                    other => self.to_display(other)?,
                };
                match &b {
                    Value::Str(s) => text.push_str(s),
                    other => text.push_str(&self.to_display(other)?),
                }
                frame.set(*dst, Value::from_string(text));
            }
            Op::Destructure { dst, src, index } => {
                let value = frame.get(*src);
                let component = self.destructure(&value, *index)?;
                frame.set(*dst, component);
            }
            Op::IterNew { dst, src } => {
                let subject = frame.get(*src);
                let iter = self.make_iter(&subject)?;
                frame.set(*dst, Value::Iter(Arc::new(Mutex::new(iter))));
            }
            Op::IterHasNext { dst, iter } => {
                let value = frame.get(*iter);
                let Value::Iter(state) = value else {
                    return Err(Error::type_error("iterator state corrupted"));
                };
                let mut state = state.lock().expect("iter lock");
                let has_next = self.iter_has_next(&mut state)?;
                frame.set(*dst, Value::Bool(has_next));
            }
            Op::IterNext { dst, iter } => {
                let value = frame.get(*iter);
                let Value::Iter(state) = value else {
                    return Err(Error::type_error("iterator state corrupted"));
                };
                let mut state = state.lock().expect("iter lock");
                let item = self
                    .iter_next_opt(&mut state)?
                    .ok_or_else(|| Error::index("iterator exhausted"))?;
                frame.set(*dst, item);
            }
            Op::Throw { src } => {
                let value = frame.get(*src);
                return Err(Error::thrown(value));
            }
            Op::TryPush { catches, finally_block } => {
                if let Some(finally_block) = finally_block {
                    frame.handlers.push(Handler::Finally(*finally_block));
                } else {
                    frame.handlers.push(Handler::Catch(catches.clone()));
                }
            }
            Op::TryPop => {
                frame.handlers.pop();
            }
            Op::CatchBind { dst } => {
                let error = frame.cur_exc.take().unwrap_or_else(|| Error::type_error("no in-flight error"));
                frame.set(*dst, error.catch_value());
            }
            Op::CloseResource { src } => {
                let resource = frame.get(*src);
                if !resource.is_null() {
                    let closed = self.call_method(&resource, "close", Vec::new(), &[]);
                    if let Err(close_error) = closed {
                        // While unwinding, a close failure becomes a
                        // suppressed note on the primary error.
                        if let Some(Pending::Raise(primary)) = &mut frame.pending {
                            primary.suppress(close_error);
                        } else {
                            return Err(close_error);
                        }
                    }
                }
            }
            Op::DeclareClass {
                dst,
                class_idx,
                superclass,
                ann_args,
            } => {
                let superclass = superclass.map(|s| frame.get(s));
                let mut evaluated = Vec::with_capacity(ann_args.len());
                for locals in ann_args {
                    evaluated.push(locals.iter().map(|l| frame.get(*l)).collect::<Vec<Value>>());
                }
                let value = self.declare_class(code, globals, *class_idx, superclass, evaluated)?;
                frame.set(*dst, value);
            }
            Op::FireProcessors { class } => {
                let value = frame.get(*class);
                let class = match &value {
                    Value::Class(class) => Arc::clone(class),
                    Value::Object(object) => Arc::clone(&object.class),
                    other => {
                        return Err(Error::type_error(format!(
                            "cannot run processors on {}",
                            other.type_name()
                        )));
                    }
                };
                self.fire_processors(&class)?;
            }
            Op::RegisterExt { type_name, method, func } => {
                let function = frame.get(*func);
                self.shared
                    .ext_methods
                    .lock()
                    .expect("ext methods lock")
                    .insert((type_name.clone(), method.clone()), function);
            }
            Op::Import { spec } => self.exec_import(spec, globals)?,
        }
        Ok(())
    }

    // --- globals and imports ---

    fn load_global(&mut self, globals: &Arc<ModuleBindings>, name: &str) -> RunResult<Value> {
        if let Some(value) = globals.get(name) {
            return Ok(value);
        }
        if let Some(value) = builtins::lookup_global(name) {
            return Ok(value);
        }
        // Lazy wildcard java packages, resolved on first reference.
        let packages: Vec<String> = self.shared.lazy_java_packages.lock().expect("lazy package lock").clone();
        if !packages.is_empty() {
            let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
            for package in packages {
                if let Ok(value) = host.resolve_class(&format!("{package}.{name}")) {
                    globals.set(name, value.clone());
                    return Ok(value);
                }
            }
        }
        Err(Error::name(format!("name '{name}' is not defined")))
    }

    fn exec_import(&mut self, spec: &ImportSpec, globals: &Arc<ModuleBindings>) -> RunResult<()> {
        match spec {
            ImportSpec::Named { path, name, alias } => {
                let mut segments = path.clone();
                segments.push(name.clone());
                let resolved = self.resolve_module(&segments)?;
                let bindings = self.load_module(&resolved)?;
                match &resolved.trailing_symbol {
                    Some(symbol) => {
                        let value = bindings
                            .get(symbol)
                            .ok_or_else(|| Error::import(format!("module '{}' has no symbol '{symbol}'", resolved.canonical)))?;
                        globals.set(alias.as_deref().unwrap_or(symbol), value);
                    }
                    None => {
                        // The whole dotted path named a module file; bind its
                        // public bindings as a map under the trailing name.
                        let mut map = IndexMap::new();
                        for (key, value) in bindings.public_snapshot() {
                            map.insert(Value::from_string(key), value);
                        }
                        globals.set(alias.as_deref().unwrap_or(name), Value::map(map));
                    }
                }
            }
            ImportSpec::Wildcard { path } => {
                let resolved = self.resolve_module(path)?;
                if resolved.trailing_symbol.is_some() {
                    return Err(Error::import(format!("module '{}' not found", path.join("."))));
                }
                let bindings = self.load_module(&resolved)?;
                for (name, value) in bindings.public_snapshot() {
                    globals.set(&name, value);
                }
            }
            ImportSpec::Java { path, wildcard, alias } => {
                self.policy().check_java_interop()?;
                let fq = path.join(".");
                if *wildcard {
                    self.shared
                        .lazy_java_packages
                        .lock()
                        .expect("lazy package lock")
                        .push(fq);
                } else {
                    let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
                    let value = host.resolve_class(&fq)?;
                    let simple = alias.clone().unwrap_or_else(|| path.last().expect("non-empty").clone());
                    globals.set(&simple, value);
                }
            }
            ImportSpec::JavaStatic { path, alias } => {
                self.policy().check_java_interop()?;
                let fq = path.join(".");
                let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
                let value = host.resolve_static(&fq)?;
                let simple = alias.clone().unwrap_or_else(|| path.last().expect("non-empty").clone());
                globals.set(&simple, value);
            }
        }
        Ok(())
    }

    fn resolve_module(&self, segments: &[String]) -> RunResult<loader::ResolvedModule> {
        let base = self
            .shared
            .base_path
            .lock()
            .expect("base path lock")
            .clone()
            .ok_or_else(|| Error::import("script base path is not set"))?;
        loader::resolve(&base, segments)
    }

    fn load_module(&mut self, resolved: &loader::ResolvedModule) -> RunResult<Arc<ModuleBindings>> {
        match self.shared.modules.begin_load(&resolved.canonical) {
            BeginLoad::Loaded(bindings) | BeginLoad::Loading(bindings) => Ok(bindings),
            BeginLoad::Fresh(bindings) => {
                let source = match std::fs::read_to_string(&resolved.file) {
                    Ok(source) => source,
                    Err(e) => {
                        self.shared.modules.finish_load(&resolved.canonical, false);
                        return Err(Error::import(format!(
                            "cannot read module '{}': {e}",
                            resolved.canonical
                        )));
                    }
                };
                let outcome = compile(&source, &resolved.file.display().to_string())
                    .and_then(|code| self.exec_module(&code, &bindings));
                match outcome {
                    Ok(_) => {
                        self.shared.modules.finish_load(&resolved.canonical, true);
                        Ok(bindings)
                    }
                    Err(error) => {
                        self.shared.modules.finish_load(&resolved.canonical, false);
                        Err(error)
                    }
                }
            }
        }
    }

    // --- calls ---

    /// Calls any callable value with positional arguments.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value> {
        let names: Vec<Option<String>> = vec![None; args.len()];
        self.call_value_named(callee, args, &names)
    }

    pub fn call_value_named(&mut self, callee: &Value, args: Vec<Value>, names: &[Option<String>]) -> RunResult<Value> {
        match callee {
            Value::Function(function) => match &function.kind {
                FunctionKind::User(user) => self.call_user(user, None, args, names, None),
                FunctionKind::Builtin(builtin) => {
                    if names.iter().any(Option::is_some) {
                        return Err(Error::type_error(format!(
                            "{}() does not accept named arguments",
                            function.name
                        )));
                    }
                    builtin.call(self, args)
                }
                FunctionKind::BoundMethod { receiver, method } => {
                    self.call_method(&receiver.clone(), method, args, names)
                }
            },
            Value::Class(class) => self.instantiate_class(class, args, names),
            other => Err(Error::type_error(format!(
                "value of type {} is not callable",
                other.type_name()
            ))),
        }
    }

    /// Runs a user function, optionally with a bound `this` and owner class.
    fn call_user(
        &mut self,
        user: &UserFunction,
        this: Option<Value>,
        args: Vec<Value>,
        names: &[Option<String>],
        owner: Option<Arc<ClassDef>>,
    ) -> RunResult<Value> {
        let function = &user.code.functions[user.func as usize];
        let bound = bind_args(function, this, args, names)?;
        let code = Arc::clone(&user.code);
        let globals = Arc::clone(&user.globals);
        self.exec_function(&code, user.func, &globals, &user.captures, bound, owner)
    }

    /// Method dispatch over the receiver's tag and resolution order.
    pub fn call_method(
        &mut self,
        recv: &Value,
        name: &str,
        args: Vec<Value>,
        names: &[Option<String>],
    ) -> RunResult<Value> {
        match recv {
            Value::Null => Err(Error::null_deref(format!("cannot call '{name}' on null"))),
            Value::Object(object) => self.call_object_method(recv, object, name, args, names),
            Value::Class(class) => self.call_class_method(class, name, args, names),
            Value::ExternalObject(host_obj) => {
                if let Some(ns) = host_obj.as_namespace() {
                    return modules::namespace_call(self, ns, name, &args);
                }
                self.policy().check_java_interop()?;
                let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
                host.call_method(recv, name, &args)
            }
            _ => {
                if let Some(result) = types::dispatch_method(self, recv, name, &args)? {
                    return Ok(result);
                }
                if let Some(result) = self.call_extension(recv.type_name(), recv, name, &args)? {
                    return Ok(result);
                }
                Err(Error::type_error(format!(
                    "{} has no method '{name}'",
                    recv.type_name()
                )))
            }
        }
    }

    fn call_extension(&mut self, type_name: &str, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
        let function = {
            let table = self.shared.ext_methods.lock().expect("ext methods lock");
            table.get(&(type_name.to_owned(), name.to_owned())).cloned()
        };
        match function {
            Some(function) => {
                let mut full_args = Vec::with_capacity(args.len() + 1);
                full_args.push(recv.clone());
                full_args.extend(args.iter().cloned());
                Ok(Some(self.call_value(&function, full_args)?))
            }
            None => Ok(None),
        }
    }

    fn call_object_method(
        &mut self,
        recv: &Value,
        object: &Arc<ObjectInner>,
        name: &str,
        args: Vec<Value>,
        names: &[Option<String>],
    ) -> RunResult<Value> {
        // Builder objects: `build()` plus fluent setters.
        if let Some(target) = &object.builder_target {
            return self.call_builder_method(recv, object, target, name, args);
        }

        // Own methods, then the superclass chain.
        if let Some((class, func)) = resolve_method(&object.class, name) {
            let user = UserFunction {
                code: Arc::clone(&class.code),
                func,
                globals: Arc::clone(&class.globals),
                captures: Vec::new(),
            };
            return self.call_user(&user, Some(recv.clone()), args, names, Some(class));
        }

        // `@data` synthesized members.
        if object.class.is_data() {
            if let Some(result) = self.data_synth_method(recv, object, name, &args, names)? {
                return Ok(result);
            }
        }

        // Host delegate fallback.
        if let Some(delegate) = object.host_delegate.as_ref() {
            self.policy().check_java_interop()?;
            let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
            return host.call_method(delegate, name, &args);
        }

        // Extension functions registered for this class or its supertypes.
        let mut type_names = vec![object.class.name.clone()];
        let mut current = object.class.superclass.clone();
        while let Some(Value::Class(class)) = current {
            type_names.push(class.name.clone());
            current = class.superclass.clone();
        }
        for type_name in type_names {
            if let Some(result) = self.call_extension(&type_name, recv, name, &args)? {
                return Ok(result);
            }
        }

        // Universal defaults.
        match name {
            "toString" => Ok(Value::from_string(self.to_display(recv)?)),
            "equals" if args.len() == 1 => Ok(Value::Bool(self.values_equal(recv, &args[0])?)),
            "hashCode" if args.is_empty() => Ok(Value::Int(types::default_hash(recv))),
            _ => Err(Error::type_error(format!(
                "{} has no method '{name}'",
                object.class.name
            ))),
        }
    }

    fn data_synth_method(
        &mut self,
        recv: &Value,
        object: &Arc<ObjectInner>,
        name: &str,
        args: &[Value],
        names: &[Option<String>],
    ) -> RunResult<Option<Value>> {
        match name {
            "equals" => {
                types::need_args(name, args, 1)?;
                Ok(Some(Value::Bool(recv == &args[0])))
            }
            "hashCode" => {
                types::need_args(name, args, 0)?;
                Ok(Some(Value::Int(types::default_hash(recv))))
            }
            "toString" => {
                types::need_args(name, args, 0)?;
                Ok(Some(Value::from_string(self.to_display(recv)?)))
            }
            "copy" => {
                let copy = ObjectInner::new(Arc::clone(&object.class));
                {
                    let source = object.fields.lock().expect("fields lock");
                    let mut fields = copy.fields.lock().expect("fields lock");
                    *fields = source.clone();
                }
                for (i, arg) in args.iter().enumerate() {
                    let Some(Some(field)) = names.get(i).map(Option::as_ref) else {
                        return Err(Error::type_error("copy() takes named arguments only"));
                    };
                    copy.set_field(field, arg.clone());
                }
                Ok(Some(Value::Object(Arc::new(copy))))
            }
            _ => {
                if let Some(n) = name.strip_prefix("component").and_then(|n| n.parse::<usize>().ok()) {
                    types::need_args(name, args, 0)?;
                    let fields = object.ctor_field_values();
                    let (_, value) = fields
                        .get(n.checked_sub(1).ok_or_else(|| Error::index("component0 does not exist"))?)
                        .ok_or_else(|| {
                            Error::index(format!("{} has no component{n}", object.class.name))
                        })?;
                    return Ok(Some(value.clone()));
                }
                Ok(None)
            }
        }
    }

    fn call_builder_method(
        &mut self,
        recv: &Value,
        object: &Arc<ObjectInner>,
        target: &Arc<ClassDef>,
        name: &str,
        args: Vec<Value>,
    ) -> RunResult<Value> {
        if name == "build" {
            types::need_args(name, &args, 0)?;
            let fields = object.fields.lock().expect("fields lock").clone();
            let mut values = Vec::new();
            let mut names = Vec::new();
            for param in &target.ctor_params {
                match fields.get(&param.name) {
                    Some(value) => {
                        values.push(value.clone());
                        names.push(Some(param.name.clone()));
                    }
                    None if param.has_default => {}
                    None => {
                        return Err(Error::type_error(format!(
                            "builder for {} is missing field '{}'",
                            target.name, param.name
                        )));
                    }
                }
            }
            return self.instantiate_class(target, values, &names);
        }
        if target.ctor_params.iter().any(|p| p.name == name) {
            types::need_args(name, &args, 1)?;
            object.set_field(name, args[0].clone());
            return Ok(recv.clone());
        }
        Err(Error::type_error(format!(
            "builder for {} has no field '{name}'",
            target.name
        )))
    }

    fn call_class_method(
        &mut self,
        class: &Arc<ClassDef>,
        name: &str,
        args: Vec<Value>,
        names: &[Option<String>],
    ) -> RunResult<Value> {
        if let Some(func) = class.static_methods.get(name).copied() {
            let user = UserFunction {
                code: Arc::clone(&class.code),
                func,
                globals: Arc::clone(&class.globals),
                captures: Vec::new(),
            };
            return self.call_user(&user, None, args, names, Some(Arc::clone(class)));
        }
        match name {
            "builder" if class.is_builder() => {
                types::need_args(name, &args, 0)?;
                let builder_class = Arc::new(ClassDef::new(
                    format!("{}.Builder", class.name),
                    ClassKind::Class,
                    false,
                    Vec::new(),
                    Arc::clone(&class.code),
                    Arc::clone(&class.globals),
                    None,
                    IndexMap::new(),
                    IndexMap::new(),
                    Vec::new(),
                    AHashSet::new(),
                    None,
                    Vec::new(),
                    Vec::new(),
                ));
                Ok(Value::Object(Arc::new(ObjectInner::builder_for(
                    builder_class,
                    Arc::clone(class),
                ))))
            }
            "setStaticField" => {
                types::need_args(name, &args, 2)?;
                let Value::Str(field) = &args[0] else {
                    return Err(Error::type_error("setStaticField() expects a field name string"));
                };
                class.set_static_field(field, args[1].clone());
                Ok(Value::Null)
            }
            _ => {
                // A static field holding a callable is invokable.
                if let Some(value) = class.static_field(name) {
                    return self.call_value_named(&value, args, names);
                }
                Err(Error::type_error(format!("class {} has no method '{name}'", class.name)))
            }
        }
    }

    // --- member access ---

    fn member_get(&mut self, recv: &Value, name: &str, owner: Option<&Arc<ClassDef>>) -> RunResult<Value> {
        match recv {
            Value::Null => Err(Error::null_deref(format!("cannot access '{name}' on null"))),
            Value::Object(object) => {
                if object.class.field_is_private(name)
                    && !owner.is_some_and(|cls| Arc::ptr_eq(cls, &object.class))
                {
                    return Err(Error::type_error(format!(
                        "field '{name}' of {} is private",
                        object.class.name
                    )));
                }
                if let Some(value) = object.field(name) {
                    return Ok(value);
                }
                // A known method name yields a bound method value.
                let data_synth = object.class.is_data()
                    && (matches!(name, "copy" | "equals" | "hashCode" | "toString") || name.starts_with("component"));
                if resolve_method(&object.class, name).is_some() || data_synth {
                    return Ok(bound_method(recv, name));
                }
                Err(Error::type_error(format!(
                    "{} has no member '{name}'",
                    object.class.name
                )))
            }
            Value::Class(class) => self.class_member(class, name),
            Value::ExternalObject(host_obj) => {
                if let Some(ns) = host_obj.as_namespace() {
                    return modules::namespace_member(ns, name);
                }
                self.policy().check_java_interop()?;
                let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
                host.get_property(recv, name)
            }
            other => {
                if let Some(value) = types::property(other, name) {
                    return Ok(value);
                }
                Ok(bound_method(recv, name))
            }
        }
    }

    /// Class values double as the annotation-processor reflection target.
    fn class_member(&mut self, class: &Arc<ClassDef>, name: &str) -> RunResult<Value> {
        match name {
            "name" => Ok(Value::str(&class.name)),
            "fields" => {
                let mut out = Vec::new();
                for param in &class.ctor_params {
                    if param.binding == crate::mir::FieldKind::None {
                        continue;
                    }
                    let mut entry = IndexMap::new();
                    entry.insert(Value::str("name"), Value::str(&param.name));
                    entry.insert(Value::str("type"), Value::str("Any"));
                    entry.insert(
                        Value::str("visibility"),
                        Value::str(if param.is_private { "private" } else { "public" }),
                    );
                    out.push(Value::map(entry));
                }
                for field in &class.field_names {
                    if class.ctor_params.iter().any(|p| &p.name == field) {
                        continue;
                    }
                    let mut entry = IndexMap::new();
                    entry.insert(Value::str("name"), Value::str(field));
                    entry.insert(Value::str("type"), Value::str("Any"));
                    entry.insert(Value::str("visibility"), Value::str("public"));
                    out.push(Value::map(entry));
                }
                for field in &class.private_fields {
                    if class.ctor_params.iter().any(|p| &p.name == field) {
                        continue;
                    }
                    let mut entry = IndexMap::new();
                    entry.insert(Value::str("name"), Value::str(field));
                    entry.insert(Value::str("type"), Value::str("Any"));
                    entry.insert(Value::str("visibility"), Value::str("private"));
                    out.push(Value::map(entry));
                }
                Ok(Value::list(out))
            }
            "methods" => {
                let mut out = Vec::new();
                for (method_name, func) in &class.methods {
                    let function = &class.code.functions[*func as usize];
                    let mut entry = IndexMap::new();
                    entry.insert(Value::str("name"), Value::str(method_name));
                    entry.insert(
                        Value::str("parameterNames"),
                        Value::list(
                            function
                                .params
                                .iter()
                                .skip(1) // implicit this
                                .map(|p| Value::str(&p.name))
                                .collect(),
                        ),
                    );
                    out.push(Value::map(entry));
                }
                Ok(Value::list(out))
            }
            "annotations" => {
                let mut out = Vec::new();
                for annotation in &class.annotations {
                    let mut entry = IndexMap::new();
                    entry.insert(Value::str("name"), Value::str(&annotation.name));
                    let mut args = IndexMap::new();
                    for (key, value) in &annotation.args {
                        args.insert(Value::str(key), value.clone());
                    }
                    entry.insert(Value::str("args"), Value::map(args));
                    out.push(Value::map(entry));
                }
                Ok(Value::list(out))
            }
            _ => {
                if let Some(value) = class.static_field(name) {
                    return Ok(value);
                }
                if class.static_methods.contains_key(name) || (name == "builder" && class.is_builder()) {
                    return Ok(bound_method(&Value::Class(Arc::clone(class)), name));
                }
                Err(Error::type_error(format!("class {} has no member '{name}'", class.name)))
            }
        }
    }

    fn member_set(&mut self, recv: &Value, name: &str, value: Value, owner: Option<&Arc<ClassDef>>) -> RunResult<()> {
        match recv {
            Value::Null => Err(Error::null_deref(format!("cannot assign '{name}' on null"))),
            Value::Object(object) => {
                let same_class = owner.is_some_and(|cls| Arc::ptr_eq(cls, &object.class));
                if object.class.field_is_private(name) && !same_class {
                    return Err(Error::type_error(format!(
                        "field '{name}' of {} is private",
                        object.class.name
                    )));
                }
                // `val` constructor fields stay immutable outside the class.
                let is_val = object
                    .class
                    .ctor_params
                    .iter()
                    .any(|p| p.name == name && p.binding == crate::mir::FieldKind::Val);
                if is_val && !same_class && object.field(name).is_some() {
                    return Err(Error::type_error(format!("val field '{name}' cannot be reassigned")));
                }
                object.set_field(name, value);
                Ok(())
            }
            Value::Class(class) => {
                class.set_static_field(name, value);
                Ok(())
            }
            Value::ExternalObject(_) => {
                self.policy().check_java_interop()?;
                let host = Arc::clone(&self.shared.host.lock().expect("host lock"));
                host.set_property(recv, name, &value)
            }
            other => Err(Error::type_error(format!(
                "cannot assign member '{name}' on {}",
                other.type_name()
            ))),
        }
    }

    // --- indexing ---

    fn index_get(&mut self, recv: &Value, index: &Value) -> RunResult<Value> {
        match recv {
            Value::Null => Err(Error::null_deref("cannot index null")),
            Value::List(items) => {
                let items = items.lock().expect("list lock");
                let i = int_operand(index, "list index")?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or_else(|| Error::index(format!("list index {i} out of bounds for length {}", items.len())))
            }
            Value::Map(entries) => Ok(entries
                .lock()
                .expect("map lock")
                .get(index)
                .cloned()
                .unwrap_or(Value::Null)),
            Value::Str(s) => {
                let i = int_operand(index, "string index")?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(Value::Char)
                    .ok_or_else(|| Error::index(format!("string index {i} out of bounds")))
            }
            Value::Object(_) => self.call_method(recv, "get", vec![index.clone()], &[]),
            other => Err(Error::type_error(format!("{} is not indexable", other.type_name()))),
        }
    }

    fn index_set(&mut self, recv: &Value, index: &Value, value: Value) -> RunResult<()> {
        match recv {
            Value::List(items) => {
                let mut items = items.lock().expect("list lock");
                let i = int_operand(index, "list index")?;
                let len = items.len();
                let slot = usize::try_from(i)
                    .ok()
                    .filter(|i| *i < len)
                    .ok_or_else(|| Error::index(format!("list index {i} out of bounds for length {len}")))?;
                items[slot] = value;
                Ok(())
            }
            Value::Map(entries) => {
                entries.lock().expect("map lock").insert(index.clone(), value);
                Ok(())
            }
            Value::Object(_) => {
                self.call_method(recv, "set", vec![index.clone(), value], &[])?;
                Ok(())
            }
            other => Err(Error::type_error(format!(
                "{} does not support index assignment",
                other.type_name()
            ))),
        }
    }

    // --- operators ---

    fn binary_op(&mut self, op: BinOp, a: &Value, b: &Value) -> RunResult<Value> {
        match op {
            BinOp::Eq => return Ok(Value::Bool(self.values_equal(a, b)?)),
            BinOp::Ne => return Ok(Value::Bool(!self.values_equal(a, b)?)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = self.compare_values(a, b)?;
                let result = match op {
                    BinOp::Lt => ordering == std::cmp::Ordering::Less,
                    BinOp::Le => ordering != std::cmp::Ordering::Greater,
                    BinOp::Gt => ordering == std::cmp::Ordering::Greater,
                    BinOp::Ge => ordering != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                return Ok(Value::Bool(result));
            }
            BinOp::In => return Ok(Value::Bool(self.contains(b, a)?)),
            BinOp::NotIn => return Ok(Value::Bool(!self.contains(b, a)?)),
            _ => {}
        }

        // String concatenation on `+` with a string left operand.
        if op == BinOp::Add {
            if let Value::Str(s) = a {
                let mut out = s.to_string();
                out.push_str(&self.to_display(b)?);
                return Ok(Value::from_string(out));
            }
            if let (Value::List(x), Value::List(y)) = (a, b) {
                let mut out = x.lock().expect("list lock").clone();
                out.extend(y.lock().expect("list lock").clone());
                return Ok(Value::list(out));
            }
        }

        // User operator methods.
        if let Value::Object(_) = a {
            let method = match op {
                BinOp::Add => "plus",
                BinOp::Sub => "minus",
                BinOp::Mul => "times",
                BinOp::Div => "div",
                BinOp::Rem => "rem",
                _ => unreachable!("handled above"),
            };
            return self.call_method(a, method, vec![b.clone()], &[]);
        }

        let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
            return Err(Error::type_error(format!(
                "cannot apply {op} to {} and {}",
                a.type_name(),
                b.type_name()
            )));
        };

        // JVM widening: Double if either is Double, else Long if either is
        // Long, else Int (wrapping).
        if matches!(x, Number::Double(_)) || matches!(y, Number::Double(_)) {
            let (x, y) = (x.as_f64(), y.as_f64());
            return Ok(Value::Double(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Rem => x % y,
                _ => unreachable!(),
            }));
        }
        let is_long = matches!(x, Number::Long(_)) || matches!(y, Number::Long(_));
        let (x, y) = (int_of(x), int_of(y));
        if matches!(op, BinOp::Div | BinOp::Rem) && y == 0 {
            return Err(Error::arithmetic("division by zero"));
        }
        let result = match op {
            BinOp::Add => x.wrapping_add(y),
            BinOp::Sub => x.wrapping_sub(y),
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div => x.wrapping_div(y),
            BinOp::Rem => x.wrapping_rem(y),
            _ => unreachable!(),
        };
        Ok(if is_long { Value::Long(result) } else { Value::Int(result) })
    }

    fn contains(&mut self, container: &Value, item: &Value) -> RunResult<bool> {
        match container {
            Value::Range(range) => Ok(match item.as_number() {
                Some(Number::Int(v) | Number::Long(v)) => range.contains(v),
                Some(Number::Double(v)) => v.fract() == 0.0 && range.contains(v as i64),
                None => false,
            }),
            Value::List(items) => Ok(items.lock().expect("list lock").contains(item)),
            Value::Set(entries) => Ok(entries.lock().expect("set lock").contains(item)),
            Value::Map(entries) => Ok(entries.lock().expect("map lock").contains_key(item)),
            Value::Str(s) => match item {
                Value::Str(needle) => Ok(s.contains(needle.as_ref())),
                Value::Char(c) => Ok(s.contains(*c)),
                _ => Ok(false),
            },
            Value::Object(_) => {
                let result = self.call_method(container, "contains", vec![item.clone()], &[])?;
                self.truthy(&result)
            }
            other => Err(Error::type_error(format!(
                "'in' is not supported on {}",
                other.type_name()
            ))),
        }
    }

    /// Structural equality with user `equals` overrides on plain classes.
    pub fn values_equal(&mut self, a: &Value, b: &Value) -> RunResult<bool> {
        if let Value::Object(object) = a {
            if !object.class.is_data() {
                if let Some((class, func)) = resolve_method(&object.class, "equals") {
                    let user = UserFunction {
                        code: Arc::clone(&class.code),
                        func,
                        globals: Arc::clone(&class.globals),
                        captures: Vec::new(),
                    };
                    let result = self.call_user(&user, Some(a.clone()), vec![b.clone()], &[None], Some(class))?;
                    return self.truthy(&result);
                }
            }
        }
        Ok(a == b)
    }

    /// Ordering with `compareTo` dispatch on user classes.
    pub fn compare_values(&mut self, a: &Value, b: &Value) -> RunResult<std::cmp::Ordering> {
        match (a, b) {
            (Value::Object(_), _) => {
                let result = self.call_method(a, "compareTo", vec![b.clone()], &[])?;
                let v = int_operand(&result, "compareTo result")?;
                Ok(v.cmp(&0))
            }
            (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
            (Value::Char(x), Value::Char(y)) => Ok(x.cmp(y)),
            (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
            _ => {
                let (Some(x), Some(y)) = (a.as_number(), b.as_number()) else {
                    return Err(Error::type_error(format!(
                        "cannot compare {} and {}",
                        a.type_name(),
                        b.type_name()
                    )));
                };
                x.as_f64()
                    .partial_cmp(&y.as_f64())
                    .ok_or_else(|| Error::type_error("cannot order NaN"))
            }
        }
    }

    /// Recursive canonical `toString`, honoring user overrides.
    pub fn to_display(&mut self, value: &Value) -> RunResult<String> {
        Ok(match value {
            Value::List(items) => {
                let snapshot = items.lock().expect("list lock").clone();
                let mut out = String::from("[");
                for (i, item) in snapshot.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.to_display(item)?);
                }
                out.push(']');
                out
            }
            Value::Map(entries) => {
                let snapshot: Vec<(Value, Value)> = entries
                    .lock()
                    .expect("map lock")
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut out = String::from("{");
                for (i, (k, v)) in snapshot.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.to_display(k)?);
                    out.push('=');
                    out.push_str(&self.to_display(v)?);
                }
                out.push('}');
                out
            }
            Value::Pair(pair) => {
                format!("({}, {})", self.to_display(&pair.first)?, self.to_display(&pair.second)?)
            }
            Value::Object(object) => {
                // User toString wins; then the @data rendering; then identity.
                if let Some((class, func)) = resolve_method(&object.class, "toString") {
                    let user = UserFunction {
                        code: Arc::clone(&class.code),
                        func,
                        globals: Arc::clone(&class.globals),
                        captures: Vec::new(),
                    };
                    let rendered = self.call_user(&user, Some(value.clone()), Vec::new(), &[], Some(class))?;
                    return Ok(match rendered {
                        Value::Str(s) => s.to_string(),
                        other => other.display_string(),
                    });
                }
                if object.class.is_data() {
                    let mut out = format!("{}(", object.class.name);
                    for (i, (field, field_value)) in object.ctor_field_values().iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(field);
                        out.push('=');
                        out.push_str(&self.to_display(field_value)?);
                    }
                    out.push(')');
                    out
                } else {
                    value.display_string()
                }
            }
            other => other.display_string(),
        })
    }

    // --- destructuring and iteration ---

    fn destructure(&mut self, value: &Value, index: u32) -> RunResult<Value> {
        match value {
            Value::Object(object) => {
                let component = format!("component{}", index + 1);
                if object.class.is_data() || resolve_method(&object.class, &component).is_some() {
                    return self.call_method(value, &component, Vec::new(), &[]);
                }
                Err(Error::type_error(format!(
                    "{} does not support destructuring",
                    object.class.name
                )))
            }
            Value::List(items) => {
                let items = items.lock().expect("list lock");
                items
                    .get(index as usize)
                    .cloned()
                    .ok_or_else(|| Error::index(format!("destructuring index {index} out of bounds")))
            }
            Value::Pair(pair) => match index {
                0 => Ok(pair.first.clone()),
                1 => Ok(pair.second.clone()),
                _ => Err(Error::index("pairs destructure into two components")),
            },
            other => Err(Error::type_error(format!(
                "{} does not support destructuring",
                other.type_name()
            ))),
        }
    }

    fn make_iter(&mut self, subject: &Value) -> RunResult<ValueIter> {
        Ok(match subject {
            Value::List(items) => ValueIter::Items {
                items: items.lock().expect("list lock").clone(),
                index: 0,
            },
            Value::Set(entries) => ValueIter::Items {
                items: entries.lock().expect("set lock").iter().cloned().collect(),
                index: 0,
            },
            Value::Range(range) => ValueIter::Range {
                range: (**range).clone(),
                next: range.start,
                remaining: range.len(),
            },
            Value::Str(s) => ValueIter::Chars {
                chars: s.chars().collect(),
                index: 0,
            },
            Value::Map(entries) => ValueIter::Pairs {
                pairs: entries
                    .lock()
                    .expect("map lock")
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                index: 0,
            },
            Value::Channel(channel) => ValueIter::Channel {
                channel: Arc::clone(channel),
                pending: None,
            },
            other => {
                return Err(Error::type_error(format!(
                    "{} is not iterable",
                    other.type_name()
                )));
            }
        })
    }

    fn iter_has_next(&mut self, iter: &mut ValueIter) -> RunResult<bool> {
        match iter {
            ValueIter::Items { items, index } => Ok(*index < items.len()),
            ValueIter::Range { remaining, .. } => Ok(*remaining > 0),
            ValueIter::Chars { chars, index } => Ok(*index < chars.len()),
            ValueIter::Pairs { pairs, index } => Ok(*index < pairs.len()),
            ValueIter::Channel { channel, pending } => {
                if pending.is_some() {
                    return Ok(true);
                }
                match channel.receive_or_closed(&self.wait_cx())? {
                    Some(value) => {
                        *pending = Some(value);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    fn iter_next_opt(&mut self, iter: &mut ValueIter) -> RunResult<Option<Value>> {
        if !self.iter_has_next(iter)? {
            return Ok(None);
        }
        Ok(Some(match iter {
            ValueIter::Items { items, index } => {
                let value = items[*index].clone();
                *index += 1;
                value
            }
            ValueIter::Range { range, next, remaining } => {
                let value = *next;
                *next += range.step;
                *remaining -= 1;
                Value::Int(value)
            }
            ValueIter::Chars { chars, index } => {
                let value = chars[*index];
                *index += 1;
                Value::Char(value)
            }
            ValueIter::Pairs { pairs, index } => {
                let (k, v) = pairs[*index].clone();
                *index += 1;
                Value::pair(k, v)
            }
            ValueIter::Channel { pending, .. } => pending.take().expect("has_next filled pending"),
        }))
    }

    // --- classes ---

    fn declare_class(
        &mut self,
        code: &Arc<MirModule>,
        globals: &Arc<ModuleBindings>,
        class_idx: u32,
        superclass: Option<Value>,
        ann_args: Vec<Vec<Value>>,
    ) -> RunResult<Value> {
        let mir_class: &MirClass = &code.classes[class_idx as usize];

        if let Some(Value::Class(superclass)) = &superclass {
            if !superclass.is_open {
                return Err(Error::type_error(format!(
                    "class {} is not open and cannot be extended",
                    superclass.name
                )));
            }
        }

        let mut interfaces = Vec::with_capacity(mir_class.interfaces.len());
        for interface in &mir_class.interfaces {
            match self.load_global(globals, interface)? {
                Value::Class(class) if class.is_interface() => interfaces.push(class),
                other => {
                    return Err(Error::type_error(format!(
                        "'{interface}' is not an interface ({})",
                        other.type_name()
                    )));
                }
            }
        }

        // Annotation arguments: named by the annotation class's declared
        // parameters when it is known, positional indices otherwise.
        let mut annotations = Vec::with_capacity(mir_class.annotations.len());
        for (annotation, values) in mir_class.annotations.iter().zip(ann_args) {
            let declared: Option<Vec<String>> = globals.get(&annotation.name).and_then(|v| match v {
                Value::Class(class) if class.is_annotation() => {
                    Some(class.ctor_params.iter().map(|p| p.name.clone()).collect())
                }
                _ => None,
            });
            let mut args = IndexMap::new();
            for (i, value) in values.into_iter().enumerate() {
                let key = match &annotation.arg_names[i] {
                    Some(name) => name.clone(),
                    None => match &declared {
                        Some(params) if i < params.len() => params[i].clone(),
                        _ => i.to_string(),
                    },
                };
                args.insert(key, value);
            }
            annotations.push(ClassAnnotation {
                name: annotation.name.clone(),
                args,
            });
        }

        let methods: IndexMap<String, FuncId> = mir_class.methods.iter().cloned().collect();
        let static_methods: IndexMap<String, FuncId> = mir_class.static_methods.iter().cloned().collect();
        let private_fields: AHashSet<String> = mir_class.private_fields.iter().cloned().collect();

        let class = Arc::new(ClassDef::new(
            mir_class.name.clone(),
            mir_class.kind,
            mir_class.is_open,
            mir_class.ctor_params.clone(),
            Arc::clone(code),
            Arc::clone(globals),
            mir_class.init,
            methods,
            static_methods,
            mir_class.field_names.clone(),
            private_fields,
            superclass,
            interfaces,
            annotations,
        ));

        if class.is_object() {
            // Singleton declaration: bind the instance.
            return self.instantiate_object(&class, Vec::new(), &[]);
        }
        Ok(Value::Class(class))
    }

    fn fire_processors(&mut self, class: &Arc<ClassDef>) -> RunResult<()> {
        // Annotation-left-to-right across the class, registration order
        // within each annotation.
        for annotation in class.annotations.clone() {
            for processor in self.shared.registry.processors_for(&annotation.name) {
                match processor {
                    Processor::Native(native) => {
                        let target = ClassTarget { class: Arc::clone(class) };
                        native.process_class(&target, &annotation.args)?;
                    }
                    Processor::Script(function) => {
                        let mut args_map = IndexMap::new();
                        for (key, value) in &annotation.args {
                            args_map.insert(Value::str(key), value.clone());
                        }
                        self.call_value(
                            &function,
                            vec![Value::Class(Arc::clone(class)), Value::map(args_map)],
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Public entry for embedding: instantiate with positional and named args.
    pub fn instantiate_class(
        &mut self,
        class: &Arc<ClassDef>,
        args: Vec<Value>,
        names: &[Option<String>],
    ) -> RunResult<Value> {
        if class.is_annotation() {
            return Err(Error::type_error(format!(
                "annotation class {} cannot be instantiated",
                class.name
            )));
        }
        if class.is_interface() {
            return Err(Error::type_error(format!(
                "interface {} cannot be instantiated",
                class.name
            )));
        }
        self.instantiate_object(class, args, names)
    }

    fn instantiate_object(&mut self, class: &Arc<ClassDef>, args: Vec<Value>, names: &[Option<String>]) -> RunResult<Value> {
        let object = Value::Object(Arc::new(ObjectInner::new(Arc::clone(class))));
        self.run_init(class, &object, args, names)?;
        Ok(object)
    }

    /// Runs a class's constructor-init function on an existing object
    /// (also the super-call path).
    fn run_init(&mut self, class: &Arc<ClassDef>, this: &Value, args: Vec<Value>, names: &[Option<String>]) -> RunResult<Value> {
        let Some(init) = class.init_func else {
            if !args.is_empty() {
                return Err(Error::type_error(format!(
                    "{}() takes no arguments, got {}",
                    class.name,
                    args.len()
                )));
            }
            return Ok(Value::Null);
        };
        let user = UserFunction {
            code: Arc::clone(&class.code),
            func: init,
            globals: Arc::clone(&class.globals),
            captures: Vec::new(),
        };
        self.call_user(&user, Some(this.clone()), args, names, Some(Arc::clone(class)))
    }

    // --- tasks ---

    /// Spawns `body` as a task of `scope`, returning its handle.
    pub fn spawn_task(&mut self, scope: &Arc<TaskScope>, kind: TaskKind, body: Value) -> RunResult<Arc<TaskHandle>> {
        let policy = self.policy();
        if policy.max_async_tasks > 0 && self.shared.live_tasks.load(Ordering::Acquire) >= policy.max_async_tasks {
            return Err(Error::quota(format!(
                "async task limit exceeded ({})",
                policy.max_async_tasks
            )));
        }
        let handle = Arc::new(TaskHandle::new(kind));
        scope.add_child(Arc::clone(&handle))?;
        self.shared.live_tasks.fetch_add(1, Ordering::AcqRel);

        let shared = Arc::clone(&self.shared);
        let task_scope = Arc::clone(scope);
        let task_handle = Arc::clone(&handle);
        task_scope.dispatcher.spawn(move || {
            let cancel = task_handle.cancel_flag();
            let mut vm = Vm::new(Arc::clone(&shared), Arc::clone(&task_scope), cancel);
            let result = vm.call_value(&body, Vec::new());
            shared.live_tasks.fetch_sub(1, Ordering::AcqRel);
            match result {
                Ok(value) => task_handle.complete(value),
                Err(error) => {
                    task_handle.fail(error.clone());
                    task_scope.child_failed(error);
                }
            }
        });
        Ok(handle)
    }
}

// --- free helpers ---

fn const_value(constant: &Const) -> Value {
    match constant {
        Const::Null => Value::Null,
        Const::Undefined => Value::Undefined,
        Const::Bool(v) => Value::Bool(*v),
        Const::Int(v) => Value::Int(*v),
        Const::Long(v) => Value::Long(*v),
        Const::Double(v) => Value::Double(*v),
        Const::Char(v) => Value::Char(*v),
        Const::Str(v) => Value::str(v),
    }
}

fn int_of(n: Number) -> i64 {
    match n {
        Number::Int(v) | Number::Long(v) => v,
        Number::Double(v) => v as i64,
    }
}

fn int_operand(value: &Value, what: &str) -> RunResult<i64> {
    match value {
        Value::Int(v) | Value::Long(v) => Ok(*v),
        other => Err(Error::type_error(format!(
            "{what} must be an integer, got {}",
            other.type_name()
        ))),
    }
}

fn bound_method(recv: &Value, name: &str) -> Value {
    Value::Function(Arc::new(FunctionValue {
        name: name.to_owned(),
        kind: FunctionKind::BoundMethod {
            receiver: recv.clone(),
            method: name.to_owned(),
        },
    }))
}

/// Walks the superclass chain and interface lists for a method.
fn resolve_method(class: &Arc<ClassDef>, name: &str) -> Option<(Arc<ClassDef>, FuncId)> {
    if let Some(func) = class.own_method(name) {
        return Some((Arc::clone(class), func));
    }
    if let Some(Value::Class(superclass)) = &class.superclass {
        if let Some(found) = resolve_method(superclass, name) {
            return Some(found);
        }
    }
    for interface in &class.interfaces {
        if let Some(found) = resolve_method(interface, name) {
            return Some(found);
        }
    }
    None
}

/// Runtime type tests for `is` / `as` / `when`.
fn type_matches(value: &Value, ty: &str) -> bool {
    match ty {
        "Any" => !matches!(value, Value::Null | Value::Undefined),
        "Undefined" => matches!(value, Value::Undefined),
        "Null" | "Nothing" => value.is_null(),
        "Number" => value.as_number().is_some(),
        "Boolean" => matches!(value, Value::Bool(_)),
        _ => {
            if value.type_name() == ty {
                return true;
            }
            match value {
                Value::Object(object) => object.class.conforms_to(ty),
                _ => false,
            }
        }
    }
}

/// Binds call arguments to parameter slots: positional first, then named by
/// parameter name. Missing defaulted parameters stay `Undefined` for the
/// callee's completion prelude; missing plain parameters bind to null.
fn bind_args(
    function: &MirFunction,
    this: Option<Value>,
    args: Vec<Value>,
    names: &[Option<String>],
) -> RunResult<Vec<Value>> {
    let mut bound = vec![Value::Undefined; function.params.len()];
    let mut next_positional = 0usize;
    if let Some(this) = this {
        if function.params.first().is_none_or(|p| p.name != "this") {
            return Err(Error::type_error(format!(
                "{} is not an instance method",
                function.name
            )));
        }
        bound[0] = this;
        next_positional = 1;
    }
    for (i, value) in args.into_iter().enumerate() {
        match names.get(i).and_then(Option::as_ref) {
            Some(name) => {
                let slot = function
                    .params
                    .iter()
                    .position(|p| &p.name == name)
                    .ok_or_else(|| {
                        Error::type_error(format!("{}() has no parameter '{name}'", function.name))
                    })?;
                bound[slot] = value;
            }
            None => {
                if next_positional >= function.params.len() {
                    return Err(Error::type_error(format!(
                        "{}() takes {} argument(s), got more",
                        function.name,
                        function.params.len()
                    )));
                }
                bound[next_positional] = value;
                next_positional += 1;
            }
        }
    }
    // Missing non-defaulted parameters bind to null (lenient dynamic calls);
    // defaulted ones keep Undefined so the prelude fills them in.
    for (i, param) in function.params.iter().enumerate() {
        if matches!(bound[i], Value::Undefined) && !param.has_default {
            bound[i] = Value::Null;
        }
    }
    Ok(bound)
}
