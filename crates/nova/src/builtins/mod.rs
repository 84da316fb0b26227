//! Global builtin functions.
//!
//! One enum over every interpreter-native global; `lookup_global` resolves a
//! name to a callable (or namespace) value, and [`Builtin::call`] is the
//! central dispatch. Scope builders and task primitives live here because
//! they need the VM (they run user lambdas and spawn tasks).

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use indexmap::{IndexMap, IndexSet};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    concurrency::{ChannelValue, Dispatcher, MutexValue, TaskKind, TaskScope},
    error::{Error, RunResult},
    modules,
    types::{int_arg, need_args, num_arg, str_arg},
    value::{FileValue, FunctionValue, FunctionKind, Number, RegexValue, Value},
    vm::Vm,
};

/// Enumerates every interpreter-native global function.
///
/// Uses strum derives so the variant names double as the Nova-visible names
/// (`Println` -> `println`, `ListOf` -> `listOf`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "camelCase")]
pub enum Builtin {
    Println,
    Print,
    ReadLine,
    Typeof,
    ListOf,
    MutableListOf,
    MapOf,
    MutableMapOf,
    SetOf,
    MutableSetOf,
    #[strum(serialize = "Pair")]
    PairOf,
    Min,
    Max,
    Abs,
    Sqrt,
    Pow,
    Floor,
    Ceil,
    Round,
    Assert,
    AssertEquals,
    AssertTrue,
    AssertFalse,
    AssertNull,
    AssertNotNull,
    Fail,
    CoroutineScope,
    SupervisorScope,
    WithContext,
    WithTimeout,
    Launch,
    Async,
    Delay,
    #[strum(serialize = "Channel")]
    ChannelNew,
    #[strum(serialize = "Mutex")]
    MutexNew,
    #[strum(serialize = "AtomicInt")]
    AtomicIntNew,
    #[strum(serialize = "AtomicLong")]
    AtomicLongNew,
    #[strum(serialize = "AtomicRef")]
    AtomicRefNew,
    #[strum(serialize = "Regex")]
    RegexNew,
    #[strum(serialize = "File")]
    FileNew,
    RegisterAnnotationProcessor,
    MeasureTimeMillis,
    Now,
    NanoTime,
}

/// All builtin function names, used by global resolution.
const ALL: &[Builtin] = &[
    Builtin::Println,
    Builtin::Print,
    Builtin::ReadLine,
    Builtin::Typeof,
    Builtin::ListOf,
    Builtin::MutableListOf,
    Builtin::MapOf,
    Builtin::MutableMapOf,
    Builtin::SetOf,
    Builtin::MutableSetOf,
    Builtin::PairOf,
    Builtin::Min,
    Builtin::Max,
    Builtin::Abs,
    Builtin::Sqrt,
    Builtin::Pow,
    Builtin::Floor,
    Builtin::Ceil,
    Builtin::Round,
    Builtin::Assert,
    Builtin::AssertEquals,
    Builtin::AssertTrue,
    Builtin::AssertFalse,
    Builtin::AssertNull,
    Builtin::AssertNotNull,
    Builtin::Fail,
    Builtin::CoroutineScope,
    Builtin::SupervisorScope,
    Builtin::WithContext,
    Builtin::WithTimeout,
    Builtin::Launch,
    Builtin::Async,
    Builtin::Delay,
    Builtin::ChannelNew,
    Builtin::MutexNew,
    Builtin::AtomicIntNew,
    Builtin::AtomicLongNew,
    Builtin::AtomicRefNew,
    Builtin::RegexNew,
    Builtin::FileNew,
    Builtin::RegisterAnnotationProcessor,
    Builtin::MeasureTimeMillis,
    Builtin::Now,
    Builtin::NanoTime,
];

/// Resolves a global name to a builtin function or stdlib namespace.
#[must_use]
pub fn lookup_global(name: &str) -> Option<Value> {
    if let Some(ns) = modules::namespace_value(name) {
        return Some(ns);
    }
    ALL.iter()
        .find(|b| {
            let s: &'static str = (**b).into();
            s == name
        })
        .map(|b| {
            Value::Function(Arc::new(FunctionValue {
                name: name.to_owned(),
                kind: FunctionKind::Builtin(*b),
            }))
        })
}

impl Builtin {
    /// Calls this builtin with already-evaluated arguments.
    pub(crate) fn call(self, vm: &mut Vm, args: Vec<Value>) -> RunResult<Value> {
        let name: &'static str = self.into();
        match self {
            Self::Println => {
                vm.policy().check_stdio()?;
                let mut line = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        line.push(' ');
                    }
                    line.push_str(&vm.to_display(arg)?);
                }
                vm.write_stdout(&line, true);
                Ok(Value::Null)
            }
            Self::Print => {
                vm.policy().check_stdio()?;
                let mut chunk = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        chunk.push(' ');
                    }
                    chunk.push_str(&vm.to_display(arg)?);
                }
                vm.write_stdout(&chunk, false);
                Ok(Value::Null)
            }
            Self::ReadLine => {
                need_args(name, &args, 0)?;
                vm.policy().check_stdio()?;
                let mut line = String::new();
                match std::io::BufRead::read_line(&mut std::io::stdin().lock(), &mut line) {
                    Ok(0) => Ok(Value::Null),
                    Ok(_) => {
                        while line.ends_with('\n') || line.ends_with('\r') {
                            line.pop();
                        }
                        Ok(Value::from_string(line))
                    }
                    Err(e) => Err(Error::type_error(format!("readLine failed: {e}"))),
                }
            }
            Self::Typeof => {
                need_args(name, &args, 1)?;
                Ok(Value::str(args[0].type_name()))
            }
            Self::ListOf | Self::MutableListOf => Ok(Value::list(args)),
            Self::MapOf | Self::MutableMapOf => {
                let mut map = IndexMap::new();
                for arg in args {
                    let Value::Pair(pair) = arg else {
                        return Err(Error::type_error(format!("{name}() expects pairs (use 'a to b')")));
                    };
                    map.insert(pair.first.clone(), pair.second.clone());
                }
                Ok(Value::map(map))
            }
            Self::SetOf | Self::MutableSetOf => {
                let mut set = IndexSet::new();
                for arg in args {
                    set.insert(arg);
                }
                Ok(Value::set(set))
            }
            Self::PairOf => {
                need_args(name, &args, 2)?;
                Ok(Value::pair(args[0].clone(), args[1].clone()))
            }
            Self::Min | Self::Max => {
                if args.is_empty() {
                    return Err(Error::type_error(format!("{name}() expects at least one argument")));
                }
                let mut best = args[0].clone();
                for candidate in &args[1..] {
                    let ordering = vm.compare_values(candidate, &best)?;
                    let better = if self == Self::Min {
                        ordering == std::cmp::Ordering::Less
                    } else {
                        ordering == std::cmp::Ordering::Greater
                    };
                    if better {
                        best = candidate.clone();
                    }
                }
                Ok(best)
            }
            Self::Abs => {
                need_args(name, &args, 1)?;
                match args[0].as_number() {
                    Some(Number::Int(v)) => Ok(Value::Int(v.wrapping_abs())),
                    Some(Number::Long(v)) => Ok(Value::Long(v.wrapping_abs())),
                    Some(Number::Double(v)) => Ok(Value::Double(v.abs())),
                    None => Err(Error::type_error("abs() expects a number")),
                }
            }
            Self::Sqrt => {
                need_args(name, &args, 1)?;
                Ok(Value::Double(num_arg(name, &args, 0)?.sqrt()))
            }
            Self::Pow => {
                need_args(name, &args, 2)?;
                Ok(Value::Double(num_arg(name, &args, 0)?.powf(num_arg(name, &args, 1)?)))
            }
            Self::Floor => {
                need_args(name, &args, 1)?;
                Ok(Value::Double(num_arg(name, &args, 0)?.floor()))
            }
            Self::Ceil => {
                need_args(name, &args, 1)?;
                Ok(Value::Double(num_arg(name, &args, 0)?.ceil()))
            }
            Self::Round => {
                need_args(name, &args, 1)?;
                // Half away from zero, matching roundToInt.
                Ok(Value::Double(num_arg(name, &args, 0)?.round()))
            }
            Self::Assert => modules::test::assert_cond(vm, &args),
            Self::AssertEquals => modules::test::assert_equals(vm, &args),
            Self::AssertTrue => modules::test::assert_true(vm, &args),
            Self::AssertFalse => modules::test::assert_false(vm, &args),
            Self::AssertNull => modules::test::assert_null(vm, &args),
            Self::AssertNotNull => modules::test::assert_not_null(&args),
            Self::Fail => modules::test::fail(vm, &args),
            Self::CoroutineScope => scope_builder(vm, name, args, false),
            Self::SupervisorScope => scope_builder(vm, name, args, true),
            Self::WithContext => {
                need_args(name, &args, 2)?;
                let dispatcher = dispatcher_arg(name, &args, 0)?;
                if dispatcher == Dispatcher::Unconfined {
                    return vm.call_value(&args[1], Vec::new());
                }
                let scope = TaskScope::child(vm.scope(), true, dispatcher);
                let handle = vm.spawn_task(&scope, TaskKind::Deferred, args[1].clone())?;
                handle.wait_value(&vm.wait_cx())
            }
            Self::WithTimeout => {
                need_args(name, &args, 2)?;
                let ms = int_arg(name, &args, 0)?;
                let ms = u64::try_from(ms).map_err(|_| Error::type_error("withTimeout() expects a non-negative timeout"))?;
                let scope = TaskScope::child(vm.scope(), true, Dispatcher::Io);
                let handle = vm.spawn_task(&scope, TaskKind::Deferred, args[1].clone())?;
                let deadline = Instant::now() + Duration::from_millis(ms);
                while !handle.is_done() {
                    if Instant::now() > deadline {
                        handle.cancel();
                        scope.cancel();
                        return Err(Error::timeout(format!("timed out after {ms} ms")));
                    }
                    vm.wait_cx().check()?;
                    std::thread::sleep(Duration::from_millis(1));
                }
                handle.wait_value(&vm.wait_cx())
            }
            Self::Launch => {
                need_args(name, &args, 1)?;
                let root = Arc::clone(vm.shared().root_scope());
                let handle = vm.spawn_task(&root, TaskKind::Job, args[0].clone())?;
                Ok(Value::Job(handle))
            }
            Self::Async => {
                need_args(name, &args, 1)?;
                let root = Arc::clone(vm.shared().root_scope());
                let handle = vm.spawn_task(&root, TaskKind::Deferred, args[0].clone())?;
                Ok(Value::Deferred(handle))
            }
            Self::Delay => {
                need_args(name, &args, 1)?;
                let ms = int_arg(name, &args, 0)?;
                let ms = u64::try_from(ms).map_err(|_| Error::type_error("delay() expects a non-negative duration"))?;
                let deadline = Instant::now() + Duration::from_millis(ms);
                // Sleep in slices so cancellation lands at this suspension point.
                while Instant::now() < deadline {
                    vm.wait_cx().check()?;
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(remaining.min(Duration::from_millis(5)));
                }
                Ok(Value::Null)
            }
            Self::ChannelNew => {
                let capacity = match args.first() {
                    None => 0,
                    Some(Value::Int(v)) if *v >= 0 => *v as usize,
                    Some(other) => {
                        return Err(Error::type_error(format!(
                            "Channel() capacity must be a non-negative Int, got {}",
                            other.display_string()
                        )));
                    }
                };
                Ok(Value::Channel(Arc::new(ChannelValue::new(capacity))))
            }
            Self::MutexNew => {
                need_args(name, &args, 0)?;
                Ok(Value::Mutex(Arc::new(MutexValue::new())))
            }
            Self::AtomicIntNew | Self::AtomicLongNew => {
                let initial = match args.first() {
                    None => 0,
                    Some(value) => match value {
                        Value::Int(v) | Value::Long(v) => *v,
                        other => {
                            return Err(Error::type_error(format!(
                                "{name}() expects an integer, got {}",
                                other.type_name()
                            )));
                        }
                    },
                };
                let cell = Arc::new(std::sync::atomic::AtomicI64::new(initial));
                Ok(if self == Self::AtomicIntNew {
                    Value::AtomicInt(cell)
                } else {
                    Value::AtomicLong(cell)
                })
            }
            Self::AtomicRefNew => {
                let initial = args.first().cloned().unwrap_or(Value::Null);
                Ok(Value::AtomicRef(Arc::new(std::sync::Mutex::new(initial))))
            }
            Self::RegexNew => {
                need_args(name, &args, 1)?;
                let pattern = str_arg(name, &args, 0)?;
                let regex =
                    regex::Regex::new(pattern).map_err(|e| Error::type_error(format!("invalid regex pattern: {e}")))?;
                Ok(Value::Regex(Arc::new(RegexValue {
                    pattern: pattern.to_owned(),
                    regex,
                })))
            }
            Self::FileNew => {
                need_args(name, &args, 1)?;
                let path = str_arg(name, &args, 0)?;
                Ok(Value::File(Arc::new(FileValue {
                    path: std::path::PathBuf::from(path),
                })))
            }
            Self::RegisterAnnotationProcessor => {
                need_args(name, &args, 2)?;
                let annotation = str_arg(name, &args, 0)?;
                let handle = vm
                    .shared()
                    .registry()
                    .register(annotation, crate::annotations::Processor::Script(args[1].clone()));
                Ok(Value::Handle(handle))
            }
            Self::MeasureTimeMillis => modules::time::call(vm, "measureTimeMillis", &args),
            Self::Now => modules::time::call(vm, "now", &args),
            Self::NanoTime => modules::time::call(vm, "nanoTime", &args),
        }
    }
}

/// `coroutineScope { s -> ... }` / `supervisorScope(dispatcher) { ... }`.
fn scope_builder(vm: &mut Vm, name: &str, args: Vec<Value>, is_supervisor: bool) -> RunResult<Value> {
    let (dispatcher, body) = match args.len() {
        1 => (vm.scope().dispatcher, args[0].clone()),
        2 => (dispatcher_arg(name, &args, 0)?, args[1].clone()),
        n => {
            return Err(Error::type_error(format!(
                "{name}() expects a lambda (and optional dispatcher), got {n} arguments"
            )));
        }
    };
    let scope = TaskScope::child(vm.scope(), is_supervisor, dispatcher);
    let scope_value = Value::Scope(Arc::clone(&scope));
    let body_result = vm.call_value(&body, vec![scope_value]);
    match body_result {
        Ok(result) => {
            scope.wait_children(vm.eval_deadline())?;
            Ok(result)
        }
        Err(error) => {
            // The body itself failed: cancel outstanding tasks, then wait so
            // the scope never leaks running children.
            scope.cancel();
            let _ = scope.wait_children(vm.eval_deadline());
            Err(error)
        }
    }
}

fn dispatcher_arg(name: &str, args: &[Value], index: usize) -> RunResult<Dispatcher> {
    match args.get(index) {
        Some(Value::ExternalObject(host)) => host
            .as_dispatcher()
            .ok_or_else(|| Error::type_error(format!("{name}() expects a dispatcher"))),
        _ => Err(Error::type_error(format!("{name}() expects a dispatcher"))),
    }
}
