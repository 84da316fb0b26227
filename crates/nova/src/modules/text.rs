//! Regex value methods.

use crate::{
    error::RunResult,
    types::{need_args, str_arg},
    value::{RegexValue, Value},
    vm::Vm,
};

pub fn call(vm: &mut Vm, regex: &RegexValue, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let _ = vm;
    let result = match name {
        "matches" => {
            need_args(name, args, 1)?;
            Value::Bool(regex.regex.is_match(str_arg(name, args, 0)?))
        }
        "find" => {
            need_args(name, args, 1)?;
            let text = str_arg(name, args, 0)?;
            regex
                .regex
                .find(text)
                .map_or(Value::Null, |found| Value::str(found.as_str()))
        }
        "findAll" => {
            need_args(name, args, 1)?;
            let text = str_arg(name, args, 0)?;
            Value::list(regex.regex.find_iter(text).map(|m| Value::str(m.as_str())).collect())
        }
        "replace" => {
            need_args(name, args, 2)?;
            let text = str_arg(name, args, 0)?;
            let replacement = str_arg(name, args, 1)?;
            Value::from_string(regex.regex.replace_all(text, replacement).into_owned())
        }
        "split" => {
            need_args(name, args, 1)?;
            let text = str_arg(name, args, 0)?;
            Value::list(regex.regex.split(text).map(Value::str).collect())
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}
