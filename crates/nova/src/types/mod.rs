//! Built-in type method dispatch.
//!
//! Methods on primitive and container values are resolved here by
//! `(tag, name)` before the VM falls back to extension functions. Each
//! submodule covers one family; `dispatch_method` returns `Ok(None)` for
//! unknown names so the caller can keep resolving.

pub mod class;
pub(crate) mod collections;
pub(crate) mod concurrent;
pub(crate) mod list;
pub(crate) mod str;

use crate::{
    error::{Error, RunResult},
    value::{Number, Value},
    vm::Vm,
};

/// Dispatches a method call on a built-in value.
///
/// `Ok(None)` means the receiver has no such built-in method; the VM then
/// tries extension functions.
pub(crate) fn dispatch_method(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    match recv {
        Value::Str(s) => str::call(vm, s, name, args),
        Value::List(_) => list::call(vm, recv, name, args),
        Value::Map(_) | Value::Set(_) | Value::Pair(_) | Value::Range(_) => collections::call(vm, recv, name, args),
        Value::Deferred(_)
        | Value::Job(_)
        | Value::Scope(_)
        | Value::Channel(_)
        | Value::Mutex(_)
        | Value::AtomicInt(_)
        | Value::AtomicLong(_)
        | Value::AtomicRef(_) => concurrent::call(vm, recv, name, args),
        Value::Int(_) | Value::Long(_) | Value::Double(_) => number_method(vm, recv, name, args),
        Value::Char(c) => char_method(vm, *c, name, args),
        Value::Bool(b) => match name {
            "toString" => {
                need_args(name, args, 0)?;
                Ok(Some(Value::from_string(b.to_string())))
            }
            "not" => {
                need_args(name, args, 0)?;
                Ok(Some(Value::Bool(!b)))
            }
            _ => Ok(None),
        },
        Value::Regex(r) => crate::modules::text::call(vm, r, name, args),
        Value::File(f) => crate::modules::io::call(vm, f, name, args),
        Value::Handle(handle) => handle_method(vm, handle, name, args),
        Value::Function(_) => match name {
            "invoke" | "call" => Ok(Some(vm.call_value(recv, args.to_vec())?)),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

fn handle_method(
    vm: &mut Vm,
    handle: &std::sync::Arc<crate::annotations::ProcessorHandle>,
    name: &str,
    args: &[Value],
) -> RunResult<Option<Value>> {
    let _ = vm;
    match name {
        "register" => {
            need_args(name, args, 0)?;
            handle.register();
            Ok(Some(Value::Null))
        }
        "unregister" => {
            need_args(name, args, 0)?;
            handle.unregister();
            Ok(Some(Value::Null))
        }
        "replace" => {
            need_args(name, args, 1)?;
            handle.replace(crate::annotations::Processor::Script(args[0].clone()));
            Ok(Some(Value::Null))
        }
        _ => Ok(None),
    }
}

fn number_method(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let number = recv.as_number().expect("numeric receiver");
    let result = match name {
        "toInt" => {
            need_args(name, args, 0)?;
            // Narrowing truncates toward zero.
            Value::Int(match number {
                Number::Int(v) | Number::Long(v) => v,
                Number::Double(v) => v.trunc() as i64,
            })
        }
        "toLong" => {
            need_args(name, args, 0)?;
            Value::Long(match number {
                Number::Int(v) | Number::Long(v) => v,
                Number::Double(v) => v.trunc() as i64,
            })
        }
        "toDouble" => {
            need_args(name, args, 0)?;
            Value::Double(number.as_f64())
        }
        "roundToInt" => {
            need_args(name, args, 0)?;
            // Half away from zero: 3.5 -> 4, -3.5 -> -4.
            Value::Int(match number {
                Number::Int(v) | Number::Long(v) => v,
                Number::Double(v) => v.round() as i64,
            })
        }
        "abs" => {
            need_args(name, args, 0)?;
            match number {
                Number::Int(v) => Value::Int(v.wrapping_abs()),
                Number::Long(v) => Value::Long(v.wrapping_abs()),
                Number::Double(v) => Value::Double(v.abs()),
            }
        }
        "pow" => {
            need_args(name, args, 1)?;
            let exp = num_arg("pow", args, 0)?;
            Value::Double(number.as_f64().powf(exp))
        }
        "sqrt" => {
            need_args(name, args, 0)?;
            Value::Double(number.as_f64().sqrt())
        }
        "floor" => {
            need_args(name, args, 0)?;
            Value::Double(number.as_f64().floor())
        }
        "ceil" => {
            need_args(name, args, 0)?;
            Value::Double(number.as_f64().ceil())
        }
        "toChar" => {
            need_args(name, args, 0)?;
            let code = match number {
                Number::Int(v) | Number::Long(v) => v,
                Number::Double(v) => v as i64,
            };
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| Error::type_error(format!("invalid char code {code}")))?;
            Value::Char(c)
        }
        "compareTo" => {
            need_args(name, args, 1)?;
            let ordering = vm.compare_values(recv, &args[0])?;
            Value::Int(ordering as i64)
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::from_string(recv.display_string())
        }
        "hashCode" => {
            need_args(name, args, 0)?;
            Value::Int(default_hash(recv))
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn char_method(vm: &mut Vm, c: char, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let _ = vm;
    let result = match name {
        "code" => {
            need_args(name, args, 0)?;
            Value::Int(i64::from(u32::from(c)))
        }
        "uppercase" => {
            need_args(name, args, 0)?;
            Value::from_string(c.to_uppercase().collect())
        }
        "lowercase" => {
            need_args(name, args, 0)?;
            Value::from_string(c.to_lowercase().collect())
        }
        "isDigit" => {
            need_args(name, args, 0)?;
            Value::Bool(c.is_ascii_digit())
        }
        "isLetter" => {
            need_args(name, args, 0)?;
            Value::Bool(c.is_alphabetic())
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::from_string(c.to_string())
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

/// Properties readable without a call (`s.length`, `p.first`, ...).
pub fn property(recv: &Value, name: &str) -> Option<Value> {
    match (recv, name) {
        (Value::Str(s), "length") => Some(Value::Int(s.encode_utf16().count() as i64)),
        (Value::List(items), "size") => Some(Value::Int(items.lock().expect("list lock").len() as i64)),
        (Value::Pair(pair), "first") => Some(pair.first.clone()),
        (Value::Pair(pair), "second") => Some(pair.second.clone()),
        (Value::Range(range), "start") => Some(Value::Int(range.start)),
        (Value::Range(range), "end") => Some(Value::Int(range.end)),
        (Value::Range(range), "step") => Some(Value::Int(range.step)),
        (Value::Regex(regex), "pattern") => Some(Value::str(&regex.pattern)),
        (Value::File(file), "path") => Some(Value::from_string(file.path.display().to_string())),
        _ => None,
    }
}

/// Stable structural hash exposed as `hashCode()`.
#[must_use]
pub fn default_hash(value: &Value) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = ahash::AHasher::default();
    value.hash(&mut hasher);
    hasher.finish() as i64
}

// --- argument helpers ---

pub(crate) fn need_args(name: &str, args: &[Value], expected: usize) -> RunResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Error::type_error(format!(
            "{name}() expects {expected} argument(s), got {}",
            args.len()
        )))
    }
}

pub(crate) fn int_arg(name: &str, args: &[Value], index: usize) -> RunResult<i64> {
    match args.get(index) {
        Some(Value::Int(v) | Value::Long(v)) => Ok(*v),
        Some(other) => Err(Error::type_error(format!(
            "{name}() argument {} must be an integer, got {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(Error::type_error(format!("{name}() is missing argument {}", index + 1))),
    }
}

pub(crate) fn num_arg(name: &str, args: &[Value], index: usize) -> RunResult<f64> {
    args.get(index)
        .and_then(Value::as_number)
        .map(Number::as_f64)
        .ok_or_else(|| Error::type_error(format!("{name}() argument {} must be numeric", index + 1)))
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], index: usize) -> RunResult<&'a str> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => Err(Error::type_error(format!(
            "{name}() argument {} must be a string, got {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(Error::type_error(format!("{name}() is missing argument {}", index + 1))),
    }
}
