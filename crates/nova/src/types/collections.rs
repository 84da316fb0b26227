//! Map, set, pair and range methods.
//!
//! Maps preserve insertion order; callback-taking methods snapshot entries
//! before invoking user code.

use indexmap::{IndexMap, IndexSet};

use super::{int_arg, need_args};
use crate::{
    error::{Error, RunResult},
    value::Value,
    vm::Vm,
};

pub fn call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    match recv {
        Value::Map(_) => map_call(vm, recv, name, args),
        Value::Set(_) => set_call(vm, recv, name, args),
        Value::Pair(_) => pair_call(vm, recv, name, args),
        Value::Range(_) => range_call(vm, recv, name, args),
        _ => Ok(None),
    }
}

fn map_snapshot(recv: &Value) -> IndexMap<Value, Value> {
    let Value::Map(entries) = recv else {
        unreachable!("map dispatch on non-map");
    };
    entries.lock().expect("map lock").clone()
}

fn map_call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let Value::Map(entries) = recv else { unreachable!() };
    let result = match name {
        "size" => {
            need_args(name, args, 0)?;
            Value::Int(entries.lock().expect("map lock").len() as i64)
        }
        "isEmpty" => {
            need_args(name, args, 0)?;
            Value::Bool(entries.lock().expect("map lock").is_empty())
        }
        "get" => {
            need_args(name, args, 1)?;
            entries
                .lock()
                .expect("map lock")
                .get(&args[0])
                .cloned()
                .unwrap_or(Value::Null)
        }
        "getOrDefault" => {
            need_args(name, args, 2)?;
            entries
                .lock()
                .expect("map lock")
                .get(&args[0])
                .cloned()
                .unwrap_or_else(|| args[1].clone())
        }
        "put" | "set" => {
            need_args(name, args, 2)?;
            entries
                .lock()
                .expect("map lock")
                .insert(args[0].clone(), args[1].clone())
                .unwrap_or(Value::Null)
        }
        "remove" => {
            need_args(name, args, 1)?;
            entries
                .lock()
                .expect("map lock")
                .shift_remove(&args[0])
                .unwrap_or(Value::Null)
        }
        "containsKey" => {
            need_args(name, args, 1)?;
            Value::Bool(entries.lock().expect("map lock").contains_key(&args[0]))
        }
        "containsValue" => {
            need_args(name, args, 1)?;
            Value::Bool(entries.lock().expect("map lock").values().any(|v| v == &args[0]))
        }
        "keys" => {
            need_args(name, args, 0)?;
            Value::list(map_snapshot(recv).keys().cloned().collect())
        }
        "values" => {
            need_args(name, args, 0)?;
            Value::list(map_snapshot(recv).values().cloned().collect())
        }
        "entries" => {
            need_args(name, args, 0)?;
            Value::list(
                map_snapshot(recv)
                    .into_iter()
                    .map(|(k, v)| Value::pair(k, v))
                    .collect(),
            )
        }
        "clear" => {
            need_args(name, args, 0)?;
            entries.lock().expect("map lock").clear();
            Value::Null
        }
        "forEach" => {
            need_args(name, args, 1)?;
            for (k, v) in map_snapshot(recv) {
                vm.call_value(&args[0], vec![k, v])?;
            }
            Value::Null
        }
        "mapValues" => {
            need_args(name, args, 1)?;
            let mut out = IndexMap::new();
            for (k, v) in map_snapshot(recv) {
                let mapped = vm.call_value(&args[0], vec![k.clone(), v])?;
                out.insert(k, mapped);
            }
            Value::map(out)
        }
        "filterKeys" => {
            need_args(name, args, 1)?;
            let mut out = IndexMap::new();
            for (k, v) in map_snapshot(recv) {
                let keep = vm.call_value(&args[0], vec![k.clone()])?;
                if vm.truthy(&keep)? {
                    out.insert(k, v);
                }
            }
            Value::map(out)
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::from_string(vm.to_display(recv)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn set_snapshot(recv: &Value) -> IndexSet<Value> {
    let Value::Set(entries) = recv else {
        unreachable!("set dispatch on non-set");
    };
    entries.lock().expect("set lock").clone()
}

fn set_call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let Value::Set(entries) = recv else { unreachable!() };
    let result = match name {
        "size" => {
            need_args(name, args, 0)?;
            Value::Int(entries.lock().expect("set lock").len() as i64)
        }
        "isEmpty" => {
            need_args(name, args, 0)?;
            Value::Bool(entries.lock().expect("set lock").is_empty())
        }
        "add" => {
            need_args(name, args, 1)?;
            Value::Bool(entries.lock().expect("set lock").insert(args[0].clone()))
        }
        "remove" => {
            need_args(name, args, 1)?;
            Value::Bool(entries.lock().expect("set lock").shift_remove(&args[0]))
        }
        "contains" => {
            need_args(name, args, 1)?;
            Value::Bool(entries.lock().expect("set lock").contains(&args[0]))
        }
        "union" => {
            need_args(name, args, 1)?;
            let Value::Set(other) = &args[0] else {
                return Err(Error::type_error("union() expects a set"));
            };
            let mut out = set_snapshot(recv);
            out.extend(other.lock().expect("set lock").iter().cloned());
            Value::set(out)
        }
        "intersect" => {
            need_args(name, args, 1)?;
            let Value::Set(other) = &args[0] else {
                return Err(Error::type_error("intersect() expects a set"));
            };
            let other = other.lock().expect("set lock").clone();
            let out: IndexSet<Value> = set_snapshot(recv)
                .into_iter()
                .filter(|item| other.contains(item))
                .collect();
            Value::set(out)
        }
        "forEach" => {
            need_args(name, args, 1)?;
            for item in set_snapshot(recv) {
                vm.call_value(&args[0], vec![item])?;
            }
            Value::Null
        }
        "toList" => {
            need_args(name, args, 0)?;
            Value::list(set_snapshot(recv).into_iter().collect())
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::from_string(vm.to_display(recv)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn pair_call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let Value::Pair(pair) = recv else { unreachable!() };
    let result = match name {
        "first" | "component1" => {
            need_args(name, args, 0)?;
            pair.first.clone()
        }
        "second" | "component2" => {
            need_args(name, args, 0)?;
            pair.second.clone()
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::from_string(vm.to_display(recv)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

fn range_call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let Value::Range(range) = recv else { unreachable!() };
    let result = match name {
        "contains" => {
            need_args(name, args, 1)?;
            Value::Bool(range.contains(int_arg(name, args, 0)?))
        }
        "count" | "size" => {
            need_args(name, args, 0)?;
            Value::Int(range.len())
        }
        "isEmpty" => {
            need_args(name, args, 0)?;
            Value::Bool(range.is_empty())
        }
        "toList" => {
            need_args(name, args, 0)?;
            let mut out = Vec::new();
            let mut next = range.start;
            for _ in 0..range.len() {
                out.push(Value::Int(next));
                next += range.step;
            }
            Value::list(out)
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::from_string(vm.to_display(recv)?)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}
