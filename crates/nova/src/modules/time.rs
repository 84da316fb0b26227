//! `Time` namespace: clocks and timing, chrono-backed.

use std::time::Instant;

use crate::{
    error::{Error, RunResult},
    types::need_args,
    value::Value,
    vm::Vm,
};

pub fn call(vm: &mut Vm, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "now" => {
            need_args(name, args, 0)?;
            Ok(Value::Long(chrono::Utc::now().timestamp_millis()))
        }
        "nanoTime" => {
            need_args(name, args, 0)?;
            Ok(Value::Long(
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
            ))
        }
        "today" => {
            need_args(name, args, 0)?;
            Ok(Value::from_string(chrono::Local::now().date_naive().to_string()))
        }
        "measureTimeMillis" => {
            need_args(name, args, 1)?;
            let start = Instant::now();
            vm.call_value(&args[0], Vec::new())?;
            Ok(Value::Long(start.elapsed().as_millis() as i64))
        }
        _ => Err(Error::type_error(format!("Time has no member '{name}'"))),
    }
}
