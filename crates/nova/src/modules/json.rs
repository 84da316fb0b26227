//! `Json` namespace: parse and stringify via serde_json.
//!
//! Parsed objects become insertion-ordered maps (serde_json is built with
//! `preserve_order`), arrays become lists, numbers become Int when they fit
//! and Double otherwise.

use indexmap::IndexMap;

use crate::{
    error::{Error, RunResult},
    types::{need_args, str_arg},
    value::Value,
    vm::Vm,
};

pub fn call(vm: &mut Vm, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "parse" => {
            need_args(name, args, 1)?;
            let text = str_arg(name, args, 0)?;
            let parsed: serde_json::Value =
                serde_json::from_str(text).map_err(|e| Error::type_error(format!("invalid json: {e}")))?;
            Ok(from_json(&parsed))
        }
        "stringify" => {
            if args.is_empty() || args.len() > 2 {
                return Err(Error::type_error("stringify() expects a value and an optional indent"));
            }
            let json = to_json(vm, &args[0])?;
            let rendered = if let Some(indent) = args.get(1) {
                let Value::Int(indent) = indent else {
                    return Err(Error::type_error("stringify() indent must be an Int"));
                };
                let spaces = vec![b' '; usize::try_from(*indent).unwrap_or(0)];
                let mut out = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(&spaces);
                let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
                serde::Serialize::serialize(&json, &mut serializer)
                    .map_err(|e| Error::type_error(format!("json serialization failed: {e}")))?;
                String::from_utf8(out).expect("serde_json emits utf-8")
            } else {
                serde_json::to_string(&json).map_err(|e| Error::type_error(format!("json serialization failed: {e}")))?
            };
            Ok(Value::from_string(rendered))
        }
        _ => Err(Error::type_error(format!("Json has no member '{name}'"))),
    }
}

fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Bool(*v),
        serde_json::Value::Number(v) => {
            if let Some(i) = v.as_i64() {
                Value::Int(i)
            } else {
                Value::Double(v.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(v) => Value::str(v),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(entries) => {
            let mut map = IndexMap::new();
            for (k, v) in entries {
                map.insert(Value::str(k), from_json(v));
            }
            Value::map(map)
        }
    }
}

fn to_json(vm: &mut Vm, value: &Value) -> RunResult<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(v) => serde_json::Value::Bool(*v),
        Value::Int(v) | Value::Long(v) => serde_json::Value::Number((*v).into()),
        Value::Double(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .ok_or_else(|| Error::type_error("cannot serialize a non-finite number to json"))?,
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Char(c) => serde_json::Value::String(c.to_string()),
        Value::List(items) => {
            let snapshot = items.lock().expect("list lock").clone();
            let mut out = Vec::with_capacity(snapshot.len());
            for item in &snapshot {
                out.push(to_json(vm, item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Map(entries) => {
            let snapshot: Vec<(Value, Value)> = entries
                .lock()
                .expect("map lock")
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut out = serde_json::Map::new();
            for (k, v) in &snapshot {
                out.insert(vm.to_display(k)?, to_json(vm, v)?);
            }
            serde_json::Value::Object(out)
        }
        Value::Pair(pair) => serde_json::Value::Array(vec![to_json(vm, &pair.first)?, to_json(vm, &pair.second)?]),
        Value::Object(object) => {
            // Objects serialize as their public field map.
            let mut out = serde_json::Map::new();
            let fields: Vec<(String, Value)> = {
                let guard = object.fields.lock().expect("fields lock");
                guard
                    .iter()
                    .filter(|(name, _)| !object.class.field_is_private(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            };
            for (name, field) in &fields {
                out.insert(name.clone(), to_json(vm, field)?);
            }
            serde_json::Value::Object(out)
        }
        other => {
            return Err(Error::type_error(format!(
                "cannot serialize {} to json",
                other.type_name()
            )));
        }
    })
}
