//! List methods.
//!
//! Callback-taking methods (`map`, `filter`, `sortedBy`, ...) snapshot the
//! elements first, so a callback that mutates the receiver cannot invalidate
//! iteration.

use indexmap::{IndexMap, IndexSet};

use super::{int_arg, need_args};
use crate::{
    error::{Error, RunResult},
    value::Value,
    vm::Vm,
};

fn snapshot(recv: &Value) -> Vec<Value> {
    let Value::List(items) = recv else {
        unreachable!("list dispatch on non-list");
    };
    items.lock().expect("list lock").clone()
}

fn with_items<R>(recv: &Value, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
    let Value::List(items) = recv else {
        unreachable!("list dispatch on non-list");
    };
    let mut guard = items.lock().expect("list lock");
    f(&mut guard)
}

fn index_in(len: usize, index: i64, what: &str) -> RunResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| Error::index(format!("{what} index {index} out of bounds for length {len}")))
}

pub fn call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let result = match name {
        "size" | "count" if args.is_empty() => Value::Int(snapshot(recv).len() as i64),
        "isEmpty" => {
            need_args(name, args, 0)?;
            Value::Bool(snapshot(recv).is_empty())
        }
        "isNotEmpty" => {
            need_args(name, args, 0)?;
            Value::Bool(!snapshot(recv).is_empty())
        }
        "get" => {
            need_args(name, args, 1)?;
            let items = snapshot(recv);
            let index = int_arg(name, args, 0)?;
            items[index_in(items.len(), index, "list")?].clone()
        }
        "set" => {
            need_args(name, args, 2)?;
            let index = int_arg(name, args, 0)?;
            let value = args[1].clone();
            with_items(recv, |items| {
                let i = index_in(items.len(), index, "list")?;
                items[i] = value;
                Ok::<_, Error>(())
            })?;
            Value::Null
        }
        "add" => {
            need_args(name, args, 1)?;
            with_items(recv, |items| items.push(args[0].clone()));
            recv.clone()
        }
        "addAll" => {
            need_args(name, args, 1)?;
            let Value::List(other) = &args[0] else {
                return Err(Error::type_error("addAll() expects a list"));
            };
            let extra = other.lock().expect("list lock").clone();
            with_items(recv, |items| items.extend(extra));
            recv.clone()
        }
        "removeAt" => {
            need_args(name, args, 1)?;
            let index = int_arg(name, args, 0)?;
            with_items(recv, |items| {
                let i = index_in(items.len(), index, "list")?;
                Ok::<_, Error>(items.remove(i))
            })?
        }
        "remove" => {
            need_args(name, args, 1)?;
            let removed = with_items(recv, |items| {
                match items.iter().position(|item| item == &args[0]) {
                    Some(i) => {
                        items.remove(i);
                        true
                    }
                    None => false,
                }
            });
            Value::Bool(removed)
        }
        "clear" => {
            need_args(name, args, 0)?;
            with_items(recv, Vec::clear);
            Value::Null
        }
        "contains" => {
            need_args(name, args, 1)?;
            Value::Bool(snapshot(recv).contains(&args[0]))
        }
        "indexOf" => {
            need_args(name, args, 1)?;
            let position = snapshot(recv).iter().position(|item| item == &args[0]);
            Value::Int(position.map_or(-1, |i| i as i64))
        }
        "first" => {
            need_args(name, args, 0)?;
            snapshot(recv)
                .first()
                .cloned()
                .ok_or_else(|| Error::index("first() on empty list"))?
        }
        "last" => {
            need_args(name, args, 0)?;
            snapshot(recv)
                .last()
                .cloned()
                .ok_or_else(|| Error::index("last() on empty list"))?
        }
        "sublist" => {
            need_args(name, args, 2)?;
            let items = snapshot(recv);
            let start = usize::try_from(int_arg(name, args, 0)?).map_err(|_| Error::index("negative sublist start"))?;
            let end = usize::try_from(int_arg(name, args, 1)?).map_err(|_| Error::index("negative sublist end"))?;
            if start > end || end > items.len() {
                return Err(Error::index(format!(
                    "sublist range {start}..{end} out of bounds for length {}",
                    items.len()
                )));
            }
            Value::list(items[start..end].to_vec())
        }
        "take" => {
            need_args(name, args, 1)?;
            let n = usize::try_from(int_arg(name, args, 0)?).unwrap_or(0);
            let items = snapshot(recv);
            Value::list(items.into_iter().take(n).collect())
        }
        "drop" => {
            need_args(name, args, 1)?;
            let n = usize::try_from(int_arg(name, args, 0)?).unwrap_or(0);
            let items = snapshot(recv);
            Value::list(items.into_iter().skip(n).collect())
        }
        "reversed" => {
            need_args(name, args, 0)?;
            let mut items = snapshot(recv);
            items.reverse();
            Value::list(items)
        }
        "distinct" => {
            need_args(name, args, 0)?;
            let mut seen = IndexSet::new();
            for item in snapshot(recv) {
                seen.insert(item);
            }
            Value::list(seen.into_iter().collect())
        }
        "flatten" => {
            need_args(name, args, 0)?;
            let mut out = Vec::new();
            for item in snapshot(recv) {
                match item {
                    Value::List(inner) => out.extend(inner.lock().expect("list lock").clone()),
                    other => out.push(other),
                }
            }
            Value::list(out)
        }
        "zip" => {
            need_args(name, args, 1)?;
            let Value::List(other) = &args[0] else {
                return Err(Error::type_error("zip() expects a list"));
            };
            let other = other.lock().expect("list lock").clone();
            let items = snapshot(recv);
            Value::list(
                items
                    .into_iter()
                    .zip(other)
                    .map(|(a, b)| Value::pair(a, b))
                    .collect(),
            )
        }
        "toSet" => {
            need_args(name, args, 0)?;
            let mut set = IndexSet::new();
            for item in snapshot(recv) {
                set.insert(item);
            }
            Value::set(set)
        }
        "toList" => {
            need_args(name, args, 0)?;
            Value::list(snapshot(recv))
        }
        "sum" => {
            need_args(name, args, 0)?;
            let mut int_sum = 0i64;
            let mut double_sum = 0f64;
            let mut is_double = false;
            for item in snapshot(recv) {
                match item {
                    Value::Int(v) | Value::Long(v) => {
                        int_sum = int_sum.wrapping_add(v);
                        double_sum += v as f64;
                    }
                    Value::Double(v) => {
                        is_double = true;
                        double_sum += v;
                    }
                    other => {
                        return Err(Error::type_error(format!(
                            "sum() over non-numeric element {}",
                            other.type_name()
                        )));
                    }
                }
            }
            if is_double { Value::Double(double_sum) } else { Value::Int(int_sum) }
        }
        "joinToString" => {
            let sep = match args.first() {
                None => ", ".to_owned(),
                Some(Value::Str(s)) => s.to_string(),
                Some(other) => {
                    return Err(Error::type_error(format!(
                        "joinToString() separator must be a string, got {}",
                        other.type_name()
                    )));
                }
            };
            let mut out = String::new();
            for (i, item) in snapshot(recv).iter().enumerate() {
                if i > 0 {
                    out.push_str(&sep);
                }
                out.push_str(&vm.to_display(item)?);
            }
            Value::from_string(out)
        }
        "sorted" => {
            need_args(name, args, 0)?;
            let mut items = snapshot(recv);
            sort_values(vm, &mut items, None)?;
            Value::list(items)
        }
        "sortedBy" => {
            need_args(name, args, 1)?;
            let mut items = snapshot(recv);
            sort_values(vm, &mut items, Some(&args[0]))?;
            Value::list(items)
        }
        "map" => {
            need_args(name, args, 1)?;
            let mut out = Vec::new();
            for item in snapshot(recv) {
                out.push(vm.call_value(&args[0], vec![item])?);
            }
            Value::list(out)
        }
        "filter" => {
            need_args(name, args, 1)?;
            let mut out = Vec::new();
            for item in snapshot(recv) {
                let keep = vm.call_value(&args[0], vec![item.clone()])?;
                if vm.truthy(&keep)? {
                    out.push(item);
                }
            }
            Value::list(out)
        }
        "forEach" => {
            need_args(name, args, 1)?;
            for item in snapshot(recv) {
                vm.call_value(&args[0], vec![item])?;
            }
            Value::Null
        }
        "reduce" => {
            need_args(name, args, 1)?;
            let items = snapshot(recv);
            let mut iter = items.into_iter();
            let mut acc = iter.next().ok_or_else(|| Error::index("reduce() on empty list"))?;
            for item in iter {
                acc = vm.call_value(&args[0], vec![acc, item])?;
            }
            acc
        }
        "fold" => {
            need_args(name, args, 2)?;
            let mut acc = args[0].clone();
            for item in snapshot(recv) {
                acc = vm.call_value(&args[1], vec![acc, item])?;
            }
            acc
        }
        "any" => {
            need_args(name, args, 1)?;
            let mut found = false;
            for item in snapshot(recv) {
                let test = vm.call_value(&args[0], vec![item])?;
                if vm.truthy(&test)? {
                    found = true;
                    break;
                }
            }
            Value::Bool(found)
        }
        "all" => {
            need_args(name, args, 1)?;
            let mut all = true;
            for item in snapshot(recv) {
                let test = vm.call_value(&args[0], vec![item])?;
                if !vm.truthy(&test)? {
                    all = false;
                    break;
                }
            }
            Value::Bool(all)
        }
        "none" => {
            need_args(name, args, 1)?;
            let mut none = true;
            for item in snapshot(recv) {
                let test = vm.call_value(&args[0], vec![item])?;
                if vm.truthy(&test)? {
                    none = false;
                    break;
                }
            }
            Value::Bool(none)
        }
        "find" => {
            need_args(name, args, 1)?;
            let mut found = Value::Null;
            for item in snapshot(recv) {
                let test = vm.call_value(&args[0], vec![item.clone()])?;
                if vm.truthy(&test)? {
                    found = item;
                    break;
                }
            }
            found
        }
        "count" => {
            need_args(name, args, 1)?;
            let mut count = 0i64;
            for item in snapshot(recv) {
                let test = vm.call_value(&args[0], vec![item])?;
                if vm.truthy(&test)? {
                    count += 1;
                }
            }
            Value::Int(count)
        }
        "groupBy" => {
            need_args(name, args, 1)?;
            let mut groups: IndexMap<Value, Value> = IndexMap::new();
            for item in snapshot(recv) {
                let key = vm.call_value(&args[0], vec![item.clone()])?;
                let bucket = groups.entry(key).or_insert_with(|| Value::list(Vec::new()));
                if let Value::List(items) = bucket {
                    items.lock().expect("list lock").push(item);
                }
            }
            Value::map(groups)
        }
        "associateBy" => {
            need_args(name, args, 1)?;
            let mut out: IndexMap<Value, Value> = IndexMap::new();
            for item in snapshot(recv) {
                let key = vm.call_value(&args[0], vec![item.clone()])?;
                out.insert(key, item);
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

/// Sorts by natural order, or by a key extractor when provided.
fn sort_values(vm: &mut Vm, items: &mut [Value], key_fn: Option<&Value>) -> RunResult<()> {
    let keys: Vec<Value> = match key_fn {
        Some(f) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items.iter() {
                keys.push(vm.call_value(f, vec![item.clone()])?);
            }
            keys
        }
        None => items.to_vec(),
    };
    let mut indexed: Vec<(usize, Value)> = keys.into_iter().enumerate().collect();
    let mut failure = None;
    indexed.sort_by(|(_, a), (_, b)| match vm.compare_values(a, b) {
        Ok(ordering) => ordering,
        Err(error) => {
            failure.get_or_insert(error);
            std::cmp::Ordering::Equal
        }
    });
    if let Some(error) = failure {
        return Err(error);
    }
    let sorted: Vec<Value> = indexed.into_iter().map(|(i, _)| items[i].clone()).collect();
    items.clone_from_slice(&sorted);
    Ok(())
}
