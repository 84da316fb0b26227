//! String methods.
//!
//! `length` is available both as a property and as a zero-argument method,
//! backed by the UTF-16 code-unit count. Index-based operations work on
//! chars, which agrees with code units for all BMP text.

use std::sync::Arc;

use super::{int_arg, need_args, str_arg};
use crate::{
    error::{Error, RunResult},
    value::Value,
    vm::Vm,
};

pub fn call(vm: &mut Vm, s: &Arc<str>, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let result = match name {
        "length" => {
            need_args(name, args, 0)?;
            Value::Int(s.encode_utf16().count() as i64)
        }
        "isEmpty" => {
            need_args(name, args, 0)?;
            Value::Bool(s.is_empty())
        }
        "isBlank" => {
            need_args(name, args, 0)?;
            Value::Bool(s.trim().is_empty())
        }
        "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let start = usize::try_from(int_arg(name, args, 0)?)
                .map_err(|_| Error::index("substring start must be non-negative"))?;
            let end = if args.len() > 1 {
                usize::try_from(int_arg(name, args, 1)?).map_err(|_| Error::index("substring end must be non-negative"))?
            } else {
                chars.len()
            };
            if start > end || end > chars.len() {
                return Err(Error::index(format!(
                    "substring range {start}..{end} out of bounds for length {}",
                    chars.len()
                )));
            }
            Value::from_string(chars[start..end].iter().collect())
        }
        "get" => {
            need_args(name, args, 1)?;
            let index = int_arg(name, args, 0)?;
            let c = usize::try_from(index)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .ok_or_else(|| Error::index(format!("string index {index} out of bounds")))?;
            Value::Char(c)
        }
        "first" => {
            need_args(name, args, 0)?;
            Value::Char(s.chars().next().ok_or_else(|| Error::index("first() on empty string"))?)
        }
        "last" => {
            need_args(name, args, 0)?;
            Value::Char(s.chars().last().ok_or_else(|| Error::index("last() on empty string"))?)
        }
        "indexOf" => {
            need_args(name, args, 1)?;
            let needle = str_arg(name, args, 0)?;
            match s.find(needle) {
                Some(byte_idx) => Value::Int(s[..byte_idx].chars().count() as i64),
                None => Value::Int(-1),
            }
        }
        "contains" => {
            need_args(name, args, 1)?;
            match &args[0] {
                Value::Str(needle) => Value::Bool(s.contains(needle.as_ref())),
                Value::Char(c) => Value::Bool(s.contains(*c)),
                other => {
                    return Err(Error::type_error(format!(
                        "contains() expects a string or char, got {}",
                        other.type_name()
                    )));
                }
            }
        }
        "startsWith" => {
            need_args(name, args, 1)?;
            Value::Bool(s.starts_with(str_arg(name, args, 0)?))
        }
        "endsWith" => {
            need_args(name, args, 1)?;
            Value::Bool(s.ends_with(str_arg(name, args, 0)?))
        }
        "split" => {
            need_args(name, args, 1)?;
            let sep = str_arg(name, args, 0)?;
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::from_string(c.to_string())).collect()
            } else {
                s.split(sep).map(Value::str).collect()
            };
            Value::list(parts)
        }
        "lines" => {
            need_args(name, args, 0)?;
            Value::list(s.lines().map(Value::str).collect())
        }
        "trim" => {
            need_args(name, args, 0)?;
            Value::str(s.trim())
        }
        "uppercase" => {
            need_args(name, args, 0)?;
            Value::from_string(s.to_uppercase())
        }
        "lowercase" => {
            need_args(name, args, 0)?;
            Value::from_string(s.to_lowercase())
        }
        "replace" => {
            need_args(name, args, 2)?;
            let from = str_arg(name, args, 0)?;
            let to = str_arg(name, args, 1)?;
            Value::from_string(s.replace(from, to))
        }
        "repeat" => {
            need_args(name, args, 1)?;
            let times = int_arg(name, args, 0)?;
            let times = usize::try_from(times).map_err(|_| Error::type_error("repeat() count must be non-negative"))?;
            Value::from_string(s.repeat(times))
        }
        "reversed" => {
            need_args(name, args, 0)?;
            Value::from_string(s.chars().rev().collect())
        }
        "padStart" => {
            let width = usize::try_from(int_arg(name, args, 0)?).unwrap_or(0);
            let pad = pad_char(name, args)?;
            let len = s.chars().count();
            let mut out = String::new();
            for _ in len..width {
                out.push(pad);
            }
            out.push_str(s);
            Value::from_string(out)
        }
        "padEnd" => {
            let width = usize::try_from(int_arg(name, args, 0)?).unwrap_or(0);
            let pad = pad_char(name, args)?;
            let len = s.chars().count();
            let mut out = s.to_string();
            for _ in len..width {
                out.push(pad);
            }
            Value::from_string(out)
        }
        "toInt" => {
            need_args(name, args, 0)?;
            let v: i64 = s
                .trim()
                .parse()
                .map_err(|_| Error::type_error(format!("cannot parse '{s}' as Int")))?;
            Value::Int(v)
        }
        "toLong" => {
            need_args(name, args, 0)?;
            let v: i64 = s
                .trim()
                .parse()
                .map_err(|_| Error::type_error(format!("cannot parse '{s}' as Long")))?;
            Value::Long(v)
        }
        "toDouble" => {
            need_args(name, args, 0)?;
            let v: f64 = s
                .trim()
                .parse()
                .map_err(|_| Error::type_error(format!("cannot parse '{s}' as Double")))?;
            Value::Double(v)
        }
        "toCharList" | "chars" => {
            need_args(name, args, 0)?;
            Value::list(s.chars().map(Value::Char).collect())
        }
        "compareTo" => {
            need_args(name, args, 1)?;
            let other = str_arg(name, args, 0)?;
            Value::Int(s.as_ref().cmp(other) as i64)
        }
        "matches" => {
            need_args(name, args, 1)?;
            match &args[0] {
                Value::Regex(regex) => Value::Bool(regex.regex.is_match(s)),
                Value::Str(pattern) => {
                    let regex = regex::Regex::new(pattern)
                        .map_err(|e| Error::type_error(format!("invalid regex pattern: {e}")))?;
                    Value::Bool(regex.is_match(s))
                }
                other => {
                    return Err(Error::type_error(format!(
                        "matches() expects a regex or pattern string, got {}",
                        other.type_name()
                    )));
                }
            }
        }
        "toString" => {
            need_args(name, args, 0)?;
            Value::Str(Arc::clone(s))
        }
        "hashCode" => {
            need_args(name, args, 0)?;
            Value::Int(super::default_hash(&Value::Str(Arc::clone(s))))
        }
        _ => return Ok(None),
    };
    let _ = vm;
    Ok(Some(result))
}

fn pad_char(name: &str, args: &[Value]) -> RunResult<char> {
    match args.get(1) {
        None => Ok(' '),
        Some(Value::Char(c)) => Ok(*c),
        Some(Value::Str(s)) if s.chars().count() == 1 => Ok(s.chars().next().expect("one char")),
        Some(other) => Err(Error::type_error(format!(
            "{name}() pad must be a single char, got {}",
            other.type_name()
        ))),
    }
}
