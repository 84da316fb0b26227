//! `System` namespace: CLI args, environment, process execution.
//!
//! `env` and `exec` sit behind `allowExec`; `exit` raises a user error the
//! host surfaces.

use crate::{
    error::{Error, RunResult},
    types::{need_args, str_arg},
    value::Value,
    vm::Vm,
};

pub fn call(vm: &mut Vm, name: &str, args: &[Value]) -> RunResult<Value> {
    match name {
        "args" => {
            need_args(name, args, 0)?;
            let cli = vm.shared().cli_args.lock().expect("cli args lock").clone();
            Ok(Value::list(cli.into_iter().map(Value::from_string).collect()))
        }
        "env" => {
            need_args(name, args, 1)?;
            vm.policy().check_exec()?;
            let key = str_arg(name, args, 0)?;
            Ok(std::env::var(key).map_or(Value::Null, Value::from_string))
        }
        "exec" => {
            need_args(name, args, 1)?;
            vm.policy().check_exec()?;
            let command = str_arg(name, args, 0)?;
            let output = std::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .output()
                .map_err(|e| Error::type_error(format!("exec failed: {e}")))?;
            Ok(Value::from_string(String::from_utf8_lossy(&output.stdout).into_owned()))
        }
        "exit" => {
            let code = match args.first() {
                None => 0,
                Some(Value::Int(v)) => *v,
                Some(other) => {
                    return Err(Error::type_error(format!(
                        "exit() expects an Int, got {}",
                        other.type_name()
                    )));
                }
            };
            Err(Error::new(
                crate::ErrorKind::UserError,
                format!("exit({code})"),
            ))
        }
        "gc" => {
            need_args(name, args, 0)?;
            Ok(Value::Null)
        }
        _ => Err(Error::type_error(format!("System has no member '{name}'"))),
    }
}
